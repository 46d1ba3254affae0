//! Plugin Sandbox - 플러그인 코드 실행 경계
//!
//! 플러그인이 제공한 future를 제한 시간과 경주시키고 패닉을 잡아
//! 구조화된 실패로 변환합니다. 메모리/CPU 제한은 선언적 설정으로만
//! 보관됩니다.

use futures::FutureExt;
use mnemos_foundation::{Error, ResourceLimits, Result};
use std::any::Any;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::time::Duration;
use tracing::warn;

// ============================================================================
// SandboxFailure
// ============================================================================

/// 샌드박스 실행 실패 원인
#[derive(Debug)]
pub enum SandboxFailure {
    /// 플러그인이 에러를 반환
    Failed(Error),
    /// 제한 시간 초과
    TimedOut(Duration),
    /// 플러그인 코드가 패닉
    Panicked(String),
}

impl SandboxFailure {
    /// 플러그인/작업 정보를 붙여 런타임 에러로 변환
    pub fn into_error(self, plugin_id: &str, operation: &str) -> Error {
        match self {
            Self::Failed(e) => Error::sandbox(plugin_id, operation, e.to_string()),
            Self::TimedOut(limit) => Error::Timeout(format!(
                "{} for plugin '{}' did not settle within {} ms",
                operation,
                plugin_id,
                limit.as_millis()
            )),
            Self::Panicked(msg) => {
                Error::sandbox(plugin_id, operation, format!("panicked: {}", msg))
            }
        }
    }
}

impl std::fmt::Display for SandboxFailure {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Failed(e) => write!(f, "{}", e),
            Self::TimedOut(limit) => write!(f, "timed out after {} ms", limit.as_millis()),
            Self::Panicked(msg) => write!(f, "panicked: {}", msg),
        }
    }
}

fn panic_message(payload: Box<dyn Any + Send>) -> String {
    if let Some(s) = payload.downcast_ref::<&'static str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic payload".to_string()
    }
}

/// future를 제한 시간과 패닉 격리 안에서 실행
pub async fn guarded<T, F>(limit: Duration, fut: F) -> std::result::Result<T, SandboxFailure>
where
    F: Future<Output = Result<T>>,
{
    match tokio::time::timeout(limit, AssertUnwindSafe(fut).catch_unwind()).await {
        Err(_) => Err(SandboxFailure::TimedOut(limit)),
        Ok(Err(payload)) => Err(SandboxFailure::Panicked(panic_message(payload))),
        Ok(Ok(Err(e))) => Err(SandboxFailure::Failed(e)),
        Ok(Ok(Ok(value))) => Ok(value),
    }
}

// ============================================================================
// Sandbox
// ============================================================================

/// 플러그인 하나에 대한 실행 경계
#[derive(Debug, Clone)]
pub struct Sandbox {
    plugin_id: String,
    limits: ResourceLimits,
}

impl Sandbox {
    pub fn new(plugin_id: impl Into<String>, limits: ResourceLimits) -> Self {
        Self {
            plugin_id: plugin_id.into(),
            limits,
        }
    }

    pub fn plugin_id(&self) -> &str {
        &self.plugin_id
    }

    pub fn limits(&self) -> &ResourceLimits {
        &self.limits
    }

    /// `max_execution_time` 안에서 실행
    pub async fn run<T, F>(&self, operation: &str, fut: F) -> Result<T>
    where
        F: Future<Output = Result<T>>,
    {
        self.run_with_timeout(operation, self.limits.max_execution_time(), fut)
            .await
    }

    /// 호출별 제한 시간 지정 (리소스 제한보다 길어지지 않음)
    pub async fn run_with_timeout<T, F>(&self, operation: &str, timeout: Duration, fut: F) -> Result<T>
    where
        F: Future<Output = Result<T>>,
    {
        let limit = timeout.min(self.limits.max_execution_time());
        guarded(limit, fut).await.map_err(|failure| {
            warn!(
                plugin_id = %self.plugin_id,
                operation = %operation,
                error = %failure,
                "Plugin call failed inside sandbox"
            );
            failure.into_error(&self.plugin_id, operation)
        })
    }
}
