//! Resource APIs - 플러그인 권한 범위 안의 리소스 접근
//!
//! 플러그인은 `PluginContext`에 담긴 API만으로 외부와 상호작용합니다.
//!
//! ```text
//! ┌──────────────┐   ┌───────────┐   ┌────────────┐   ┌──────────────┐
//! │ permission   │ → │ validate  │ → │ ownership  │ → │ workspace    │
//! │ (token)      │   │ (limits)  │   │ (!system)  │   │ (plugin:<id>)│
//! └──────────────┘   └───────────┘   └────────────┘   └──────────────┘
//! ```
//!
//! - `MemoryApi` - 메모리 저장/검색 (`MemoryStore`)
//! - `GraphApi` - 노드/관계/탐색 (`GraphStore`)
//! - `StorageApi` - 플러그인 전용 키/값 저장소
//! - `PluginLogger` - 민감 정보 마스킹 로거

mod graph;
mod guard;
mod logger;
mod memory;
mod storage;
mod store;

pub use graph::{GraphApi, GraphPattern, Traversal};
pub use guard::{workspace_for, ApiGuard};
pub use logger::{redact_message, redact_value, LogLevel, PluginLogger, REDACTED};
pub use memory::{MemoryApi, MemoryInput, MemoryUpdate};
pub use storage::{StorageApi, StorageUsage, MAX_KEY_LEN};
pub use store::{
    Direction, GraphNode, GraphRelationship, GraphStore, InMemoryGraphStore, InMemoryMemoryStore,
    MemoryRecord, MemoryStore, NodeType, RelationshipType, ScoredMemory,
};

/// 메모리 내용 최대 크기 (1 MiB)
pub const MAX_CONTENT_BYTES: usize = 1024 * 1024;

/// 임베딩 최대 차원
pub const MAX_EMBEDDING_DIMS: usize = 1536;

pub const DEFAULT_SEARCH_LIMIT: usize = 10;
pub const MAX_SEARCH_LIMIT: usize = 100;

/// 그래프 패턴 조건 최대 개수
pub const MAX_PATTERN_COMPLEXITY: usize = 10;

pub const MAX_TRAVERSAL_DEPTH: usize = 5;

/// 일괄 저장 최대 개수
pub const MAX_BATCH_SIZE: usize = 100;
