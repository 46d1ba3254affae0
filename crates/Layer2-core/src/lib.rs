//! mnemos-core: Plugin Runtime for Mnemos
//!
//! Layer2 - 플러그인 런타임 레이어
//!
//! # 주요 모듈
//!
//! - `plugin`: 의존성 해석, 로드/언로드, 샌드박스, 이벤트/통신 버스, 설치 관리
//! - `api`: 플러그인에 제공되는 권한 범위 리소스 API
//!
//! # 사용 예시
//!
//! ```ignore
//! use mnemos_core::{LoadOptions, PluginManager};
//! use mnemos_foundation::RuntimeConfig;
//!
//! let manager = PluginManager::new(RuntimeConfig::load()?);
//! let report = manager.initialize().await;
//! println!("loaded {} plugins", report.loaded.len());
//!
//! let results = manager.execute_hook("before-save", json!({"content": "note"})).await;
//! manager.shutdown().await;
//! ```

pub mod api;
pub mod plugin;

// Re-exports: API
pub use api::{
    ApiGuard, GraphApi, GraphStore, InMemoryGraphStore, InMemoryMemoryStore, MemoryApi,
    MemoryStore, PluginLogger, StorageApi,
};

// Re-exports: Plugin
pub use plugin::{
    // Communication
    comm::{CommunicationBus, PluginMessage},
    // Manifest
    CapabilityDeclaration,
    // Resolver
    DependencyResolver,
    // Events
    EventBus,
    EventType,
    InitReport,
    InstallOptions,
    // Lifecycle
    InstallationStore,
    LifecycleManager,
    LoadOptions,
    // Traits
    Plugin,
    PluginContext,
    PluginDiscovery,
    PluginFactory,
    PluginInstaller,
    // Manager
    PluginManager,
    PluginManifest,
    PluginSource,
    PluginState,
    RuntimeServices,
};

// Layer1 re-exports
pub use mnemos_foundation::{Error, Result};

/// Layer2 버전
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_version() {
        assert!(!VERSION.is_empty());
    }

    #[test]
    fn test_plugin_exports() {
        let resolver = DependencyResolver::new();
        assert!(resolver.get_load_order(None).unwrap().is_empty());
        assert_eq!(EventType::PluginLoaded.as_str(), "plugin:loaded");
    }
}
