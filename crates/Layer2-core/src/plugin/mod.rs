//! # Plugin System
//!
//! Mnemos 플러그인 런타임
//!
//! ## 개요
//!
//! 플러그인은 훅과 capability로 메모리 시스템을 확장합니다:
//! - 의존성 순서에 따른 로드/언로드
//! - 권한 범위가 정해진 리소스 API (memory, graph, storage, logger)
//! - 이벤트 버스와 플러그인 간 통신
//! - 설치 기록 관리 (install/uninstall/update)
//!
//! ## 아키텍처
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                     PluginManager                           │
//! │  ┌──────────────────┐  ┌─────────────────────────────────┐ │
//! │  │ DependencyResolver│  │        PluginRegistry           │ │
//! │  │ (load/unload 순서)│  │  ┌──────────┬──────────┐       │ │
//! │  └──────────────────┘  │  │ Plugin A │ Plugin B │ ...   │ │
//! │                        │  └──────────┴──────────┘       │ │
//! │                        └─────────────────────────────────┘ │
//! │                          │ Sandbox (timeout + panic 격리)   │
//! │  ┌───────────────────────┼───────────────────────────────┐ │
//! │  │     PluginContext     │                               │ │
//! │  │  - MemoryApi / GraphApi / StorageApi / PluginLogger   │ │
//! │  │  - PluginEventBus (구독 추적)                          │ │
//! │  │  - PluginMessageBus (메시지, capability, 공유 메모리)   │ │
//! │  └───────────────────────────────────────────────────────┘ │
//! └─────────────────────────────────────────────────────────────┘
//!
//!   LifecycleManager ── InstallationStore (installations.json)
//!          └── PluginInstaller (GitHub / local / URL)
//! ```
//!
//! ## 예시
//!
//! ```ignore
//! let manager = PluginManager::new(RuntimeConfig::default());
//! manager.register(manifest, Arc::new(MyFactory))?;
//!
//! let result = manager.load_plugin("summarizer", LoadOptions::default()).await;
//! assert!(result.success);
//!
//! let results = manager.execute_hook("before-save", json!({"content": "..."})).await;
//! ```

pub mod comm;
pub mod events;

mod discovery;
mod installer;
mod lifecycle;
mod manager;
mod manifest;
mod registry;
mod resolver;
mod sandbox;
mod store;
mod traits;

pub use discovery::{load_manifest, DiscoveredPlugin, PluginDiscovery, PluginScope};
pub use events::{
    handler_fn, BusEvent, EmitReport, EventBus, EventFilter, EventHandler, EventSubscription,
    EventType, HandlerFailure, PluginEventBus, SubscriptionId, SubscriptionInfo,
};
pub use installer::{PluginInstaller, PluginSource, StagedPlugin};
pub use lifecycle::{
    InstallOptions, LifecycleManager, LifecycleResult, PostInstallHook, UninstallOptions,
    UpdateOptions, BACKUP_DIR,
};
pub use manager::{
    CapabilityExecution, HookResult, InitReport, LoadOptions, PluginManager,
    PluginOperationResult, RuntimeServices,
};
pub use manifest::{
    CapabilityDeclaration, ManifestIssue, PluginDependency, PluginManifest, MANIFEST_FILE,
    PACKAGE_FILE, PACKAGE_SECTION,
};
pub use registry::{PluginMetadata, PluginMetrics, PluginRegistry, PluginRegistryEntry};
pub use resolver::{
    DependencyCheck, DependencyResolver, GraphIssue, GraphValidation, ImpactAnalysis,
    VersionMismatch,
};
pub use sandbox::{guarded, Sandbox, SandboxFailure};
pub use store::{InstallState, InstallationStore, PluginInstallationRecord, INSTALLATIONS_FILE};
pub use traits::{hook_method_name, HookResponse, Plugin, PluginContext, PluginFactory, PluginState};
