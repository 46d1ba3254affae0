//! Audit Log Types - 감사 로그 타입 정의
//!
//! 리소스 API 호출, 권한 거부, 플러그인 실행 실패 등의 감사 기록 타입입니다.
//! 내용(content)은 절대 기록하지 않고 식별자만 남깁니다.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

// ============================================================================
// Audit Entry ID
// ============================================================================

/// 감사 로그 엔트리 ID
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct AuditId(pub String);

impl AuditId {
    pub fn new() -> Self {
        Self(uuid::Uuid::new_v4().to_string())
    }
}

impl Default for AuditId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for AuditId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

// ============================================================================
// Audit Result
// ============================================================================

/// 감사 대상 작업의 결과
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuditResult {
    /// 성공
    Success,
    /// 권한 부족으로 거부
    Denied,
    /// 입력 검증 실패
    Invalid,
    /// 실행 실패
    Failure,
}

impl AuditResult {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Success => "success",
            Self::Denied => "denied",
            Self::Invalid => "invalid",
            Self::Failure => "failure",
        }
    }
}

// ============================================================================
// Audit Entry
// ============================================================================

/// 감사 로그 엔트리
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AuditEntry {
    pub id: AuditId,
    pub timestamp: DateTime<Utc>,

    /// 호출한 플러그인
    pub plugin_id: String,

    /// 작업 이름 (예: "memory.store", "graph.traverse")
    pub operation: String,

    /// 대상 식별자 (메모리 ID, 노드 ID, 스토리지 키 등)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub target: Option<String>,

    pub result: AuditResult,

    /// 부가 정보 (에러 메시지, 건수 등 - 내용 제외)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
}

impl AuditEntry {
    pub fn new(plugin_id: impl Into<String>, operation: impl Into<String>) -> Self {
        Self {
            id: AuditId::new(),
            timestamp: Utc::now(),
            plugin_id: plugin_id.into(),
            operation: operation.into(),
            target: None,
            result: AuditResult::Success,
            detail: None,
        }
    }

    pub fn with_target(mut self, target: impl Into<String>) -> Self {
        self.target = Some(target.into());
        self
    }

    pub fn with_result(mut self, result: AuditResult) -> Self {
        self.result = result;
        self
    }

    pub fn with_detail(mut self, detail: impl Into<String>) -> Self {
        self.detail = Some(detail.into());
        self
    }
}

// ============================================================================
// Audit Query
// ============================================================================

/// 감사 로그 조회 조건
#[derive(Debug, Clone, Default)]
pub struct AuditQuery {
    pub plugin_id: Option<String>,
    /// 작업 이름 prefix (예: "memory.")
    pub operation_prefix: Option<String>,
    pub result: Option<AuditResult>,
    pub limit: Option<usize>,
}

impl AuditQuery {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_plugin(mut self, plugin_id: impl Into<String>) -> Self {
        self.plugin_id = Some(plugin_id.into());
        self
    }

    pub fn with_operation_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.operation_prefix = Some(prefix.into());
        self
    }

    pub fn with_result(mut self, result: AuditResult) -> Self {
        self.result = Some(result);
        self
    }

    pub fn with_limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }

    pub fn matches(&self, entry: &AuditEntry) -> bool {
        if let Some(ref plugin) = self.plugin_id {
            if &entry.plugin_id != plugin {
                return false;
            }
        }
        if let Some(ref prefix) = self.operation_prefix {
            if !entry.operation.starts_with(prefix.as_str()) {
                return false;
            }
        }
        if let Some(result) = self.result {
            if entry.result != result {
                return false;
            }
        }
        true
    }
}
