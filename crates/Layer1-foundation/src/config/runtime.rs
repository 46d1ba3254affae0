//! Runtime Config - 플러그인 런타임 통합 설정
//!
//! 글로벌(`~/.config/mnemos/runtime.json`)과 프로젝트(`.mnemos/runtime.json`)
//! 설정을 병합해서 사용합니다. 모든 필드는 기본값을 가집니다.

use crate::storage::JsonStore;
use crate::{Error, Result};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// 설정 파일명
pub const RUNTIME_CONFIG_FILE: &str = "runtime.json";

/// 플러그인 디렉토리 환경 변수
pub const ENV_PLUGIN_DIR: &str = "MNEMOS_PLUGIN_DIR";

/// 로그 레벨 환경 변수
pub const ENV_LOG_LEVEL: &str = "MNEMOS_LOG";

/// 플러그인별 스토리지 기본 할당량 (10 MiB)
pub const DEFAULT_STORAGE_QUOTA: usize = 10 * 1024 * 1024;

/// 메시지 페이로드 최대 크기 (1 MiB)
pub const DEFAULT_MAX_PAYLOAD: usize = 1024 * 1024;

// ============================================================================
// RuntimeConfig
// ============================================================================

/// 런타임 통합 설정
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct RuntimeConfig {
    pub plugins: PluginSettings,
    pub event_bus: EventBusSettings,
    pub messaging: MessagingSettings,
    pub storage: StorageSettings,
    pub logging: LoggingSettings,
}

impl RuntimeConfig {
    pub fn new() -> Self {
        Self::default()
    }

    // ========================================================================
    // Load / Save
    // ========================================================================

    /// 글로벌 + 프로젝트 병합 로드 (환경 변수 적용 포함)
    pub fn load() -> Result<Self> {
        let mut merged = Value::Object(Default::default());

        if let Ok(global) = JsonStore::global() {
            if let Some(value) = global.load_optional::<Value>(RUNTIME_CONFIG_FILE)? {
                merge_json(&mut merged, value);
            }
        }

        if let Ok(project) = JsonStore::current_project() {
            if let Some(value) = project.load_optional::<Value>(RUNTIME_CONFIG_FILE)? {
                merge_json(&mut merged, value);
            }
        }

        let mut config: RuntimeConfig = serde_json::from_value(merged)
            .map_err(|e| Error::Config(format!("Invalid runtime config: {}", e)))?;
        config.apply_env();
        Ok(config)
    }

    /// 특정 파일에서 로드
    pub fn load_from(path: &Path) -> Result<Self> {
        let dir = path.parent().unwrap_or_else(|| Path::new("."));
        let filename = path
            .file_name()
            .and_then(|n| n.to_str())
            .ok_or_else(|| Error::Config(format!("Invalid config path: {}", path.display())))?;

        let mut config: RuntimeConfig = JsonStore::new(dir).load(filename)?;
        config.apply_env();
        Ok(config)
    }

    /// 프로젝트 설정 저장
    pub fn save_project(&self) -> Result<()> {
        JsonStore::current_project()?.save(RUNTIME_CONFIG_FILE, self)
    }

    /// 환경 변수 적용
    pub fn apply_env(&mut self) {
        if let Ok(dir) = std::env::var(ENV_PLUGIN_DIR) {
            if !dir.trim().is_empty() {
                let dir = PathBuf::from(dir);
                self.plugins.directories.retain(|d| d != &dir);
                self.plugins.directories.insert(0, dir);
            }
        }
        if let Ok(level) = std::env::var(ENV_LOG_LEVEL) {
            if !level.trim().is_empty() {
                self.logging.level = level;
            }
        }
    }

    // ========================================================================
    // Builder
    // ========================================================================

    pub fn with_plugin_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.plugins.directories.push(dir.into());
        self
    }

    pub fn with_trusted_plugin(mut self, id: impl Into<String>) -> Self {
        self.plugins.trusted.push(id.into());
        self
    }
}

/// JSON 객체 깊은 병합 (overlay가 우선)
fn merge_json(base: &mut Value, overlay: Value) {
    match (base, overlay) {
        (Value::Object(base_map), Value::Object(overlay_map)) => {
            for (key, value) in overlay_map {
                match base_map.get_mut(&key) {
                    Some(existing) => merge_json(existing, value),
                    None => {
                        base_map.insert(key, value);
                    }
                }
            }
        }
        (base, overlay) => *base = overlay,
    }
}

// ============================================================================
// 세부 설정
// ============================================================================

/// 플러그인 매니저 설정
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct PluginSettings {
    /// 플러그인 검색 디렉토리
    pub directories: Vec<PathBuf>,

    /// 초기화 시 자동 로드할 신뢰 플러그인
    pub trusted: Vec<String>,

    /// 초기화 시 디렉토리 자동 검색
    pub auto_discover: bool,

    /// 매니페스트에 지정이 없을 때 적용할 리소스 제한
    pub default_limits: ResourceLimits,

    /// initialize() 제한 시간 (ms)
    pub init_timeout_ms: u64,

    /// 훅 호출 제한 시간 (ms)
    pub hook_timeout_ms: u64,

    /// capability 호출 제한 시간 (ms)
    pub capability_timeout_ms: u64,

    /// shutdown() 제한 시간 (ms)
    pub shutdown_timeout_ms: u64,
}

impl Default for PluginSettings {
    fn default() -> Self {
        Self {
            directories: Vec::new(),
            trusted: Vec::new(),
            auto_discover: true,
            default_limits: ResourceLimits::default(),
            init_timeout_ms: 30_000,
            hook_timeout_ms: 5_000,
            capability_timeout_ms: 30_000,
            shutdown_timeout_ms: 5_000,
        }
    }
}

impl PluginSettings {
    pub fn init_timeout(&self) -> Duration {
        Duration::from_millis(self.init_timeout_ms)
    }

    pub fn hook_timeout(&self) -> Duration {
        Duration::from_millis(self.hook_timeout_ms)
    }

    pub fn capability_timeout(&self) -> Duration {
        Duration::from_millis(self.capability_timeout_ms)
    }

    pub fn shutdown_timeout(&self) -> Duration {
        Duration::from_millis(self.shutdown_timeout_ms)
    }
}

/// 플러그인 리소스 제한 (샌드박스가 소비하는 선언적 설정)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ResourceLimits {
    /// 최대 메모리 (MB)
    pub max_memory_mb: u64,

    /// 단일 호출 최대 실행 시간 (ms)
    pub max_execution_time_ms: u64,

    /// 최대 CPU 사용률 (%)
    pub max_cpu_percent: u8,

    /// 플러그인 스토리지 최대 크기 (bytes)
    pub max_storage_bytes: usize,
}

impl Default for ResourceLimits {
    fn default() -> Self {
        Self {
            max_memory_mb: 256,
            max_execution_time_ms: 30_000,
            max_cpu_percent: 50,
            max_storage_bytes: DEFAULT_STORAGE_QUOTA,
        }
    }
}

impl ResourceLimits {
    pub fn max_execution_time(&self) -> Duration {
        Duration::from_millis(self.max_execution_time_ms)
    }
}

/// 이벤트 버스 설정
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct EventBusSettings {
    /// 이벤트 타입별 히스토리 보관 개수
    pub history_size: usize,

    /// 핸들러 호출 제한 시간 (ms)
    pub handler_timeout_ms: u64,

    /// catch-all 브로드캐스트 채널 용량
    pub channel_capacity: usize,
}

impl Default for EventBusSettings {
    fn default() -> Self {
        Self {
            history_size: 100,
            handler_timeout_ms: 5_000,
            channel_capacity: 1024,
        }
    }
}

impl EventBusSettings {
    pub fn handler_timeout(&self) -> Duration {
        Duration::from_millis(self.handler_timeout_ms)
    }
}

/// 플러그인 간 메시징 설정
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct MessagingSettings {
    /// 메시지 히스토리 보관 개수
    pub history_size: usize,

    /// 페이로드 최대 크기 (bytes)
    pub max_payload_bytes: usize,

    /// 메시지 핸들러 호출 제한 시간 (ms)
    pub handler_timeout_ms: u64,

    /// capability 요청 기본 제한 시간 (ms)
    pub default_request_timeout_ms: u64,
}

impl Default for MessagingSettings {
    fn default() -> Self {
        Self {
            history_size: 1000,
            max_payload_bytes: DEFAULT_MAX_PAYLOAD,
            handler_timeout_ms: 5_000,
            default_request_timeout_ms: 30_000,
        }
    }
}

impl MessagingSettings {
    pub fn handler_timeout(&self) -> Duration {
        Duration::from_millis(self.handler_timeout_ms)
    }

    pub fn default_request_timeout(&self) -> Duration {
        Duration::from_millis(self.default_request_timeout_ms)
    }
}

/// 플러그인 스토리지 설정
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct StorageSettings {
    /// 플러그인별 할당량 (bytes)
    pub quota_bytes: usize,

    /// 영속화 디렉토리 (None이면 메모리 전용)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub persist_dir: Option<PathBuf>,
}

impl Default for StorageSettings {
    fn default() -> Self {
        Self {
            quota_bytes: DEFAULT_STORAGE_QUOTA,
            persist_dir: None,
        }
    }
}

/// 로깅 설정
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct LoggingSettings {
    /// 기본 로그 레벨 (RUST_LOG가 우선)
    pub level: String,
}

impl Default for LoggingSettings {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
        }
    }
}
