//! # mnemos-foundation
//!
//! Foundation layer for Mnemos:
//! - Error: 공통 에러 타입 (Error, Result)
//! - Permission: 플러그인 권한 토큰 (PermissionToken, PermissionSet)
//! - Audit: 리소스 API 감사 로그 (AuditLog)
//! - Storage: JsonStore (범용 JSON 파일 저장소)
//! - Config: 런타임 통합 설정 (RuntimeConfig, ResourceLimits 등)
//!
//! ## 아키텍처
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────┐
//! │  mnemos-core (Plugin Runtime)                           │
//! │                     │                                   │
//! │          ┌──────────┼───────────┐                       │
//! │          ▼          ▼           ▼                       │
//! │     Permission    Audit      Config ── JsonStore        │
//! │          └──────────┴───────────┘                       │
//! │                     │                                   │
//! │                  Error                                  │
//! └─────────────────────────────────────────────────────────┘
//! ```

pub mod audit;
pub mod config;
pub mod error;
pub mod permission;
pub mod storage;

// ============================================================================
// Error
// ============================================================================
pub use error::{Error, ErrorKind, Result};

// ============================================================================
// Config (설정)
// ============================================================================
pub use config::{
    EventBusSettings, LoggingSettings, MessagingSettings, PluginSettings, ResourceLimits,
    RuntimeConfig, StorageSettings, DEFAULT_MAX_PAYLOAD, DEFAULT_STORAGE_QUOTA, ENV_LOG_LEVEL,
    ENV_PLUGIN_DIR, RUNTIME_CONFIG_FILE,
};

// ============================================================================
// Permission (권한 시스템)
// ============================================================================
pub use permission::{PermissionSet, PermissionToken};

// ============================================================================
// Storage (저장소)
// ============================================================================
pub use storage::JsonStore;

// ============================================================================
// Audit (감사 로깅)
// ============================================================================
pub use audit::{AuditEntry, AuditId, AuditLog, AuditQuery, AuditResult};
