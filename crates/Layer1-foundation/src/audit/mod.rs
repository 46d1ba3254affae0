//! Audit System - 감사 로깅 시스템
//!
//! 플러그인이 리소스 API를 통해 수행한 모든 작업을 기록합니다.
//!
//! ```text
//! ┌──────────────┐   record(entry)   ┌──────────────────────┐
//! │ MemoryApi    │ ─────────────────►│ AuditLog             │
//! │ GraphApi     │                   │  - ring buffer       │
//! │ StorageApi   │                   │  - tracing "audit"   │
//! └──────────────┘                   └──────────────────────┘
//! ```

mod logger;
mod types;

pub use logger::{AuditLog, DEFAULT_AUDIT_CAPACITY};
pub use types::{AuditEntry, AuditId, AuditQuery, AuditResult};
