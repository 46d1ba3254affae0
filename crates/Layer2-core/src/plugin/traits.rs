//! Plugin traits - 핵심 플러그인 인터페이스

use super::comm::PluginMessageBus;
use super::events::PluginEventBus;
use crate::api::{GraphApi, MemoryApi, PluginLogger, StorageApi};
use async_trait::async_trait;
use mnemos_foundation::{Error, PermissionSet, ResourceLimits, Result};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::sync::Arc;

// ============================================================================
// PluginState - 플러그인 상태
// ============================================================================

/// 로드된 플러그인 상태
///
/// ```text
/// LOADED → INITIALIZING → ACTIVE ⇄ DISABLED
///              │             │         │
///              ▼             └──► UNLOADING ◄┘ → (제거)
///            ERROR
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PluginState {
    /// 레지스트리에 등록됨 (아직 초기화 안됨)
    Loaded,
    Initializing,
    /// 활성화됨
    Active,
    /// 비활성화됨 (훅/capability 호출 대상 아님)
    Disabled,
    Unloading,
    /// 초기화 실패
    Error,
}

impl std::fmt::Display for PluginState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Loaded => write!(f, "loaded"),
            Self::Initializing => write!(f, "initializing"),
            Self::Active => write!(f, "active"),
            Self::Disabled => write!(f, "disabled"),
            Self::Unloading => write!(f, "unloading"),
            Self::Error => write!(f, "error"),
        }
    }
}

// ============================================================================
// HookResponse
// ============================================================================

/// 훅 메서드 반환값
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HookResponse {
    /// false면 호출자에게 중단을 요청
    pub proceed: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub modifications: Option<Value>,
}

impl HookResponse {
    pub fn proceed() -> Self {
        Self {
            proceed: true,
            modifications: None,
        }
    }

    pub fn halt() -> Self {
        Self {
            proceed: false,
            modifications: None,
        }
    }

    pub fn modify(modifications: Value) -> Self {
        Self {
            proceed: true,
            modifications: Some(modifications),
        }
    }
}

impl Default for HookResponse {
    fn default() -> Self {
        Self::proceed()
    }
}

/// 훅 이름 → 메서드 이름 (`before-save` → `onBeforeSave`)
pub fn hook_method_name(hook: &str) -> String {
    let mut name = String::from("on");
    for part in hook.split(|c: char| c == '-' || c == '_' || c == ':' || c == '.' || c.is_whitespace()) {
        let mut chars = part.chars();
        if let Some(first) = chars.next() {
            name.extend(first.to_uppercase());
            name.push_str(chars.as_str());
        }
    }
    name
}

// ============================================================================
// Plugin Trait - 모든 플러그인이 구현해야 하는 인터페이스
// ============================================================================

/// 플러그인 트레이트
///
/// `initialize`/`shutdown`은 필수이고, 훅과 capability는 `methods()`에
/// 이름을 노출한 것만 호출됩니다.
#[async_trait]
pub trait Plugin: Send + Sync {
    /// 컨텍스트를 받아 초기화 (샌드박스 안에서 호출)
    async fn initialize(&self, ctx: Arc<PluginContext>) -> Result<()>;

    /// 종료 (실패해도 언로드는 계속)
    async fn shutdown(&self) -> Result<()> {
        Ok(())
    }

    /// 구현한 메서드 이름 (`onXxx` 훅 메서드, capability 이름)
    fn methods(&self) -> Vec<String> {
        vec![]
    }

    /// 훅 호출 (`hook`은 매니페스트에 선언된 이름)
    async fn on_hook(&self, hook: &str, _args: Value) -> Result<HookResponse> {
        Err(Error::NotFound(format!("hook method {}", hook_method_name(hook))))
    }

    /// capability 실행
    async fn execute_capability(&self, capability: &str, _args: Value) -> Result<Value> {
        Err(Error::NotFound(format!("capability method {}", capability)))
    }
}

/// 메서드 노출 여부
pub(crate) fn exposes(plugin: &dyn Plugin, method: &str) -> bool {
    plugin.methods().iter().any(|m| m == method)
}

// ============================================================================
// PluginFactory
// ============================================================================

/// 플러그인 인스턴스 생성기 (ID별 조회 테이블에 등록)
pub trait PluginFactory: Send + Sync {
    fn create(&self) -> Result<Arc<dyn Plugin>>;
}

impl<F> PluginFactory for F
where
    F: Fn() -> Arc<dyn Plugin> + Send + Sync,
{
    fn create(&self) -> Result<Arc<dyn Plugin>> {
        Ok(self())
    }
}

// ============================================================================
// PluginContext - 플러그인에 제공되는 컨텍스트
// ============================================================================

/// 플러그인 컨텍스트
///
/// 플러그인이 외부에 영향을 줄 수 있는 유일한 통로입니다. 모든 핸들은
/// 플러그인 ID와 권한에 바인딩되어 있습니다.
pub struct PluginContext {
    pub(crate) plugin_id: String,
    pub(crate) permissions: PermissionSet,
    pub(crate) config: Map<String, Value>,
    pub(crate) resource_limits: ResourceLimits,
    pub(crate) events: PluginEventBus,
    pub(crate) messages: PluginMessageBus,
    pub(crate) logger: PluginLogger,
    pub(crate) storage: StorageApi,
    pub(crate) graph: GraphApi,
    pub(crate) memory: MemoryApi,
}

impl PluginContext {
    pub fn plugin_id(&self) -> &str {
        &self.plugin_id
    }

    pub fn permissions(&self) -> &PermissionSet {
        &self.permissions
    }

    /// 플러그인 설정 (매니페스트 기본값 + 로드 옵션)
    pub fn config(&self) -> &Map<String, Value> {
        &self.config
    }

    pub fn config_value(&self, key: &str) -> Option<&Value> {
        self.config.get(key)
    }

    pub fn resource_limits(&self) -> &ResourceLimits {
        &self.resource_limits
    }

    /// 이벤트 버스 프록시
    pub fn events(&self) -> &PluginEventBus {
        &self.events
    }

    /// 통신 버스 프록시
    pub fn messages(&self) -> &PluginMessageBus {
        &self.messages
    }

    pub fn logger(&self) -> &PluginLogger {
        &self.logger
    }

    pub fn storage(&self) -> &StorageApi {
        &self.storage
    }

    pub fn graph(&self) -> &GraphApi {
        &self.graph
    }

    pub fn memory(&self) -> &MemoryApi {
        &self.memory
    }
}
