//! Audit Logger - 감사 로그 기록 및 조회
//!
//! 최근 엔트리를 메모리 링 버퍼에 보관하고 `audit` 타깃으로 tracing에 남깁니다.

use super::types::{AuditEntry, AuditQuery, AuditResult};
use parking_lot::Mutex;
use std::collections::VecDeque;
use tracing::{info, warn};

/// 기본 보관 개수
pub const DEFAULT_AUDIT_CAPACITY: usize = 10_000;

/// 감사 로그
///
/// ## 사용법
///
/// ```ignore
/// use mnemos_foundation::audit::{AuditLog, AuditEntry, AuditResult};
///
/// let audit = AuditLog::new();
/// audit.record(AuditEntry::new("my-plugin", "memory.store").with_target("mem-1"));
///
/// let denied = audit.query(&AuditQuery::new().with_result(AuditResult::Denied));
/// ```
pub struct AuditLog {
    entries: Mutex<VecDeque<AuditEntry>>,
    capacity: usize,
}

impl AuditLog {
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_AUDIT_CAPACITY)
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            entries: Mutex::new(VecDeque::with_capacity(capacity.min(1024))),
            capacity: capacity.max(1),
        }
    }

    /// 엔트리 기록
    pub fn record(&self, entry: AuditEntry) {
        match entry.result {
            AuditResult::Success => info!(
                target: "audit",
                plugin_id = %entry.plugin_id,
                operation = %entry.operation,
                target_id = entry.target.as_deref().unwrap_or("-"),
                "audit"
            ),
            _ => warn!(
                target: "audit",
                plugin_id = %entry.plugin_id,
                operation = %entry.operation,
                target_id = entry.target.as_deref().unwrap_or("-"),
                result = entry.result.as_str(),
                detail = entry.detail.as_deref().unwrap_or(""),
                "audit"
            ),
        }

        let mut entries = self.entries.lock();
        if entries.len() >= self.capacity {
            entries.pop_front();
        }
        entries.push_back(entry);
    }

    /// 조건에 맞는 엔트리 조회 (최신순)
    pub fn query(&self, query: &AuditQuery) -> Vec<AuditEntry> {
        let entries = self.entries.lock();
        let limit = query.limit.unwrap_or(usize::MAX);
        entries
            .iter()
            .rev()
            .filter(|e| query.matches(e))
            .take(limit)
            .cloned()
            .collect()
    }

    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.lock().is_empty()
    }

    pub fn clear(&self) {
        self.entries.lock().clear();
    }
}

impl Default for AuditLog {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_record_and_query() {
        let audit = AuditLog::new();
        audit.record(AuditEntry::new("a", "memory.store").with_target("m1"));
        audit.record(
            AuditEntry::new("a", "graph.create_node").with_result(AuditResult::Denied),
        );
        audit.record(AuditEntry::new("b", "memory.get"));

        assert_eq!(audit.len(), 3);
        assert_eq!(audit.query(&AuditQuery::new().with_plugin("a")).len(), 2);
        assert_eq!(
            audit
                .query(&AuditQuery::new().with_operation_prefix("memory."))
                .len(),
            2
        );

        let denied = audit.query(&AuditQuery::new().with_result(AuditResult::Denied));
        assert_eq!(denied.len(), 1);
        assert_eq!(denied[0].operation, "graph.create_node");
    }

    #[test]
    fn test_capacity_drops_oldest() {
        let audit = AuditLog::with_capacity(2);
        audit.record(AuditEntry::new("a", "op.1"));
        audit.record(AuditEntry::new("a", "op.2"));
        audit.record(AuditEntry::new("a", "op.3"));

        let all = audit.query(&AuditQuery::new());
        assert_eq!(all.len(), 2);
        assert_eq!(all[0].operation, "op.3");
        assert_eq!(all[1].operation, "op.2");
    }
}
