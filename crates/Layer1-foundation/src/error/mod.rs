//! Error types for Mnemos
//!
//! 플러그인 런타임 전체의 에러를 중앙에서 관리

use thiserror::Error;

/// Result type alias
pub type Result<T> = std::result::Result<T, Error>;

/// Mnemos 에러 타입
#[derive(Error, Debug)]
pub enum Error {
    // ========================================================================
    // 설정 관련
    // ========================================================================
    #[error("Configuration error: {0}")]
    Config(String),

    // ========================================================================
    // 검증 관련
    // ========================================================================
    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Invalid input: {0}")]
    InvalidInput(String),

    // ========================================================================
    // 권한 관련
    // ========================================================================
    #[error("Permission denied: plugin '{plugin}' lacks '{permission}' for {operation}")]
    PermissionDenied {
        plugin: String,
        permission: String,
        operation: String,
    },

    #[error("Access denied: {0}")]
    AccessDenied(String),

    // ========================================================================
    // 의존성 관련
    // ========================================================================
    #[error("Missing dependency: plugin '{plugin}' requires '{dependency}'")]
    MissingDependency { plugin: String, dependency: String },

    #[error("Circular dependency detected involving plugin '{0}'")]
    CircularDependency(String),

    #[error("Version conflict: '{plugin}' requires '{dependency}' {required}, found {found}")]
    VersionConflict {
        plugin: String,
        dependency: String,
        required: String,
        found: String,
    },

    // ========================================================================
    // 플러그인 실행 관련
    // ========================================================================
    #[error("Plugin error: {0}")]
    Plugin(String),

    #[error("Plugin '{plugin}' failed in {operation}: {message}")]
    Sandbox {
        plugin: String,
        operation: String,
        message: String,
    },

    #[error("Timeout: {0}")]
    Timeout(String),

    // ========================================================================
    // 라이프사이클 관련
    // ========================================================================
    #[error("Lifecycle error: {0}")]
    Lifecycle(String),

    #[error("Already exists: {0}")]
    AlreadyExists(String),

    #[error("Storage quota exceeded for plugin '{plugin}': {used} + {requested} > {quota} bytes")]
    QuotaExceeded {
        plugin: String,
        used: usize,
        requested: usize,
        quota: usize,
    },

    // ========================================================================
    // 일반
    // ========================================================================
    #[error("Not found: {0}")]
    NotFound(String),

    // ========================================================================
    // 외부 에러 변환
    // ========================================================================
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("HTTP error: {0}")]
    Http(String),

    // ========================================================================
    // 기타
    // ========================================================================
    #[error("Internal error: {0}")]
    Internal(String),
}

/// 에러 분류 (에러 처리 정책 결정용)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// 잘못된 입력/매니페스트 - 재시도 불가
    Validation,
    /// 권한 부족
    Authorization,
    /// 의존성 누락/순환
    Dependency,
    /// 플러그인 코드 실행 실패 (에러, 타임아웃, 패닉)
    Runtime,
    /// 설치/제거/업데이트 실패
    Lifecycle,
    /// 그 외 예상치 못한 에러
    Internal,
}

impl Error {
    /// 에러 분류
    pub fn kind(&self) -> ErrorKind {
        match self {
            Error::Validation(_) | Error::InvalidInput(_) | Error::Config(_) => {
                ErrorKind::Validation
            }
            Error::PermissionDenied { .. } | Error::AccessDenied(_) => ErrorKind::Authorization,
            Error::MissingDependency { .. }
            | Error::CircularDependency(_)
            | Error::VersionConflict { .. } => ErrorKind::Dependency,
            Error::Plugin(_) | Error::Sandbox { .. } | Error::Timeout(_) => ErrorKind::Runtime,
            Error::Lifecycle(_) | Error::AlreadyExists(_) | Error::QuotaExceeded { .. } => {
                ErrorKind::Lifecycle
            }
            Error::NotFound(_)
            | Error::Io(_)
            | Error::Json(_)
            | Error::Http(_)
            | Error::Internal(_) => ErrorKind::Internal,
        }
    }

    /// 재시도 가능한 에러인지 확인
    pub fn is_retryable(&self) -> bool {
        matches!(self, Error::Timeout(_) | Error::Http(_))
    }

    /// 사용자에게 보여줄 수 있는 에러인지 확인
    pub fn is_user_facing(&self) -> bool {
        matches!(
            self.kind(),
            ErrorKind::Validation | ErrorKind::Authorization | ErrorKind::Dependency
        ) || matches!(self, Error::NotFound(_))
    }

    /// 권한 거부 에러 생성 헬퍼
    pub fn permission_denied(
        plugin: impl Into<String>,
        permission: impl Into<String>,
        operation: impl Into<String>,
    ) -> Self {
        Error::PermissionDenied {
            plugin: plugin.into(),
            permission: permission.into(),
            operation: operation.into(),
        }
    }

    /// 의존성 누락 에러 생성 헬퍼
    pub fn missing_dependency(plugin: impl Into<String>, dependency: impl Into<String>) -> Self {
        Error::MissingDependency {
            plugin: plugin.into(),
            dependency: dependency.into(),
        }
    }

    /// 샌드박스 실행 실패 에러 생성 헬퍼
    pub fn sandbox(
        plugin: impl Into<String>,
        operation: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        Error::Sandbox {
            plugin: plugin.into(),
            operation: operation.into(),
            message: message.into(),
        }
    }
}

// ============================================================================
// From 구현 (추가 변환)
// ============================================================================

impl From<String> for Error {
    fn from(s: String) -> Self {
        Error::Internal(s)
    }
}

impl From<&str> for Error {
    fn from(s: &str) -> Self {
        Error::Internal(s.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_kind() {
        assert_eq!(
            Error::permission_denied("p", "read-memory", "memory.get").kind(),
            ErrorKind::Authorization
        );
        assert_eq!(
            Error::missing_dependency("a", "b").kind(),
            ErrorKind::Dependency
        );
        assert_eq!(
            Error::Timeout("hook".into()).kind(),
            ErrorKind::Runtime
        );
        assert!(Error::Validation("bad".into()).is_user_facing());
        assert!(!Error::Internal("boom".into()).is_user_facing());
    }

    #[test]
    fn test_error_messages() {
        let err = Error::missing_dependency("a", "b");
        assert_eq!(
            err.to_string(),
            "Missing dependency: plugin 'a' requires 'b'"
        );

        let err = Error::CircularDependency("x".into());
        assert!(err.to_string().contains("'x'"));
    }
}
