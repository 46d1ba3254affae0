//! API Guard - 리소스 API 공통 검사 및 감사 기록
//!
//! 모든 호출은 권한 → 입력 검증 → 소유권 → 워크스페이스 순서로 검사됩니다.

use mnemos_foundation::{
    AuditEntry, AuditLog, AuditResult, Error, PermissionSet, PermissionToken, Result,
};
use std::sync::Arc;

/// 플러그인 하나에 바인딩된 검사기
#[derive(Clone)]
pub struct ApiGuard {
    plugin_id: String,
    permissions: PermissionSet,
    audit: Arc<AuditLog>,
}

impl ApiGuard {
    pub fn new(plugin_id: impl Into<String>, permissions: PermissionSet, audit: Arc<AuditLog>) -> Self {
        Self {
            plugin_id: plugin_id.into(),
            permissions,
            audit,
        }
    }

    pub fn plugin_id(&self) -> &str {
        &self.plugin_id
    }

    pub fn permissions(&self) -> &PermissionSet {
        &self.permissions
    }

    pub fn audit_log(&self) -> &Arc<AuditLog> {
        &self.audit
    }

    pub fn is_system(&self) -> bool {
        self.permissions.is_system()
    }

    /// 1단계: 권한 확인 (실패 시 Denied 기록)
    pub fn authorize(&self, operation: &str, token: PermissionToken) -> Result<()> {
        self.permissions
            .require(&self.plugin_id, token, operation)
            .map_err(|e| {
                self.record(operation, None, AuditResult::Denied, Some(e.to_string()));
                e
            })
    }

    /// 2단계: 입력 검증 결과 기록
    pub fn validate<T>(&self, operation: &str, check: Result<T>) -> Result<T> {
        check.map_err(|e| {
            self.record(operation, None, AuditResult::Invalid, Some(e.to_string()));
            e
        })
    }

    /// 3단계: 소유권 확인 (system 권한은 통과)
    pub fn check_owner(&self, operation: &str, owner: &str, target: &str) -> Result<()> {
        if self.is_system() || owner == self.plugin_id {
            return Ok(());
        }
        let err = Error::AccessDenied(format!(
            "Plugin '{}' does not own '{}' (owner: {})",
            self.plugin_id, target, owner
        ));
        self.record(operation, Some(target), AuditResult::Denied, Some(err.to_string()));
        Err(err)
    }

    /// 4단계: 워크스페이스 (system 플러그인은 None = 전체)
    pub fn workspace(&self) -> Option<String> {
        if self.is_system() {
            None
        } else {
            Some(workspace_for(&self.plugin_id))
        }
    }

    /// 항목이 호출자의 워크스페이스에 보이는지
    pub fn can_see(&self, workspace: Option<&str>) -> bool {
        match self.workspace() {
            None => true,
            Some(own) => workspace == Some(own.as_str()),
        }
    }

    pub fn success(&self, operation: &str, target: Option<&str>) {
        self.record(operation, target, AuditResult::Success, None);
    }

    pub fn success_with(&self, operation: &str, target: Option<&str>, detail: impl Into<String>) {
        self.record(operation, target, AuditResult::Success, Some(detail.into()));
    }

    pub fn failure(&self, operation: &str, target: Option<&str>, error: &Error) {
        self.record(operation, target, AuditResult::Failure, Some(error.to_string()));
    }

    fn record(&self, operation: &str, target: Option<&str>, result: AuditResult, detail: Option<String>) {
        let mut entry = AuditEntry::new(&self.plugin_id, operation).with_result(result);
        if let Some(target) = target {
            entry = entry.with_target(target);
        }
        if let Some(detail) = detail {
            entry = entry.with_detail(detail);
        }
        self.audit.record(entry);
    }
}

/// 플러그인 워크스페이스 namespace
pub fn workspace_for(plugin_id: &str) -> String {
    format!("plugin:{}", plugin_id)
}

#[cfg(test)]
mod tests {
    use super::*;
    use mnemos_foundation::AuditQuery;

    #[test]
    fn test_denied_calls_are_audited() {
        let audit = Arc::new(AuditLog::new());
        let guard = ApiGuard::new("p", PermissionSet::new(), audit.clone());

        let err = guard.authorize("memory.store", PermissionToken::WriteMemory).unwrap_err();
        assert!(matches!(err, Error::PermissionDenied { .. }));
        assert_eq!(
            audit.query(&AuditQuery::new().with_result(AuditResult::Denied)).len(),
            1
        );
    }

    #[test]
    fn test_workspace_scoping() {
        let audit = Arc::new(AuditLog::new());
        let plain = ApiGuard::new("p", PermissionSet::new(), audit.clone());
        let system = ApiGuard::new("core", PermissionSet::system(), audit);

        assert_eq!(plain.workspace().as_deref(), Some("plugin:p"));
        assert!(plain.can_see(Some("plugin:p")));
        assert!(!plain.can_see(Some("plugin:q")));
        assert!(!plain.can_see(None));
        assert!(system.can_see(Some("plugin:q")));

        assert!(plain.check_owner("memory.update", "q", "mem-1").is_err());
        assert!(system.check_owner("memory.update", "q", "mem-1").is_ok());
    }
}
