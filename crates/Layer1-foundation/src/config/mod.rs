//! Config - 런타임 통합 설정 관리
//!
//! - `runtime.rs` - RuntimeConfig (플러그인, 이벤트 버스, 메시징, 스토리지, 로깅)

mod runtime;

pub use runtime::{
    EventBusSettings, LoggingSettings, MessagingSettings, PluginSettings, ResourceLimits,
    RuntimeConfig, StorageSettings, DEFAULT_MAX_PAYLOAD, DEFAULT_STORAGE_QUOTA, ENV_LOG_LEVEL,
    ENV_PLUGIN_DIR, RUNTIME_CONFIG_FILE,
};
