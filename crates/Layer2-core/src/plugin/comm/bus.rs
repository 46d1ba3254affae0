//! Communication Bus - 플러그인 간 메시징
//!
//! - 1:1 / 브로드캐스트 메시지 (필터 지원)
//! - capability 요청/응답 (신뢰도 기반 제공자 선택)
//! - 공유 메모리 공간

use super::message::{
    CapabilityHandler, CapabilityRegistration, CapabilityRequest, CapabilityResponse,
    MessageFilter, MessageHandler, MessageType, PluginMessage,
};
use super::shared_memory::{SharedMemoryRegistry, SharedMemorySpace, SpaceAccess, SpaceGrant};
use crate::plugin::sandbox::guarded;
use mnemos_foundation::{Error, MessagingSettings, PermissionSet, Result};
use parking_lot::{Mutex, RwLock};
use serde::Serialize;
use serde_json::Value;
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, warn};

/// 메시지 전달 결과
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DeliveryReport {
    pub message_id: String,
    /// 필터를 통과해 호출된 핸들러 수
    pub delivered: usize,
    /// (플러그인 ID, 에러)
    pub failures: Vec<(String, String)>,
}

/// 제공자 후보
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CapabilityMatch {
    pub plugin_id: String,
    pub confidence: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

#[derive(Clone)]
struct MessageSubscriber {
    plugin_id: String,
    filters: Vec<MessageFilter>,
    handler: Arc<dyn MessageHandler>,
}

#[derive(Clone)]
struct CapabilityProvider {
    registration: CapabilityRegistration,
    handler: Arc<dyn CapabilityHandler>,
    seq: u64,
}

// ============================================================================
// CommunicationBus
// ============================================================================

/// 플러그인 간 통신 버스
pub struct CommunicationBus {
    settings: MessagingSettings,
    subscribers: RwLock<Vec<MessageSubscriber>>,
    capabilities: RwLock<HashMap<String, Vec<CapabilityProvider>>>,
    history: Mutex<VecDeque<PluginMessage>>,
    spaces: SharedMemoryRegistry,
    next_seq: AtomicU64,
}

impl CommunicationBus {
    pub fn new() -> Self {
        Self::with_settings(MessagingSettings::default())
    }

    pub fn with_settings(settings: MessagingSettings) -> Self {
        Self {
            settings,
            subscribers: RwLock::new(Vec::new()),
            capabilities: RwLock::new(HashMap::new()),
            history: Mutex::new(VecDeque::new()),
            spaces: SharedMemoryRegistry::new(),
            next_seq: AtomicU64::new(0),
        }
    }

    pub fn settings(&self) -> &MessagingSettings {
        &self.settings
    }

    // ========================================================================
    // 메시지 구독
    // ========================================================================

    /// 메시지 핸들러 등록 (모든 필터를 통과한 메시지만 전달)
    pub fn subscribe_to_messages(
        &self,
        plugin_id: impl Into<String>,
        filters: Vec<MessageFilter>,
        handler: Arc<dyn MessageHandler>,
    ) {
        let plugin_id = plugin_id.into();
        debug!(plugin_id = %plugin_id, filters = filters.len(), "subscribe to messages");
        self.subscribers.write().push(MessageSubscriber {
            plugin_id,
            filters,
            handler,
        });
    }

    pub fn unsubscribe_from_messages(&self, plugin_id: &str) -> usize {
        let mut subs = self.subscribers.write();
        let before = subs.len();
        subs.retain(|s| s.plugin_id != plugin_id);
        before - subs.len()
    }

    pub fn is_subscribed(&self, plugin_id: &str) -> bool {
        self.subscribers.read().iter().any(|s| s.plugin_id == plugin_id)
    }

    // ========================================================================
    // 메시지 전송
    // ========================================================================

    /// 1:1 메시지 전송
    pub async fn send_message(&self, message: PluginMessage) -> Result<DeliveryReport> {
        message.validate(self.settings.max_payload_bytes)?;
        let Some(to) = message.to.clone() else {
            return Err(Error::Validation("direct message requires a recipient".into()));
        };

        let targets: Vec<MessageSubscriber> = self
            .subscribers
            .read()
            .iter()
            .filter(|s| s.plugin_id == to)
            .cloned()
            .collect();
        if targets.is_empty() {
            return Err(Error::NotFound(format!(
                "Plugin '{}' is not subscribed to messages",
                to
            )));
        }

        self.record(&message);
        Ok(self.deliver(&message, targets).await)
    }

    /// 발신자를 제외한 모든 구독자에게 전송
    pub async fn broadcast_message(&self, mut message: PluginMessage) -> Result<DeliveryReport> {
        message.message_type = MessageType::Broadcast;
        message.to = None;
        message.validate(self.settings.max_payload_bytes)?;

        let targets: Vec<MessageSubscriber> = self
            .subscribers
            .read()
            .iter()
            .filter(|s| s.plugin_id != message.from)
            .cloned()
            .collect();

        self.record(&message);
        Ok(self.deliver(&message, targets).await)
    }

    async fn deliver(&self, message: &PluginMessage, targets: Vec<MessageSubscriber>) -> DeliveryReport {
        let timeout = self.settings.handler_timeout();
        let mut delivered = 0;
        let mut failures = Vec::new();
        // 필터 평가용 문서는 전송당 한 번만 만듦
        let doc = if targets.iter().any(|t| !t.filters.is_empty()) {
            serde_json::to_value(message).ok()
        } else {
            None
        };

        for target in targets {
            let accepted = match &doc {
                _ if target.filters.is_empty() => true,
                Some(doc) => target.filters.iter().all(|f| f.matches_value(doc)),
                None => false,
            };
            if !accepted {
                continue;
            }
            delivered += 1;
            if let Err(failure) = guarded(timeout, target.handler.handle(message)).await {
                warn!(
                    plugin_id = %target.plugin_id,
                    subject = %message.subject,
                    error = %failure,
                    "Message handler failed"
                );
                failures.push((target.plugin_id.clone(), failure.to_string()));
            }
        }

        DeliveryReport {
            message_id: message.id.clone(),
            delivered,
            failures,
        }
    }

    fn record(&self, message: &PluginMessage) {
        let cap = self.settings.history_size;
        if cap == 0 {
            return;
        }
        let mut history = self.history.lock();
        if history.len() >= cap {
            history.pop_front();
        }
        history.push_back(message.clone());
    }

    /// 최근 메시지 (오래된 것부터)
    pub fn message_history(&self, limit: Option<usize>) -> Vec<PluginMessage> {
        let history = self.history.lock();
        let limit = limit.unwrap_or(history.len()).min(history.len());
        history.iter().skip(history.len() - limit).cloned().collect()
    }

    // ========================================================================
    // Capability
    // ========================================================================

    /// capability 등록 (같은 플러그인의 같은 capability는 교체)
    pub fn register_capability(
        &self,
        registration: CapabilityRegistration,
        handler: Arc<dyn CapabilityHandler>,
    ) -> Result<()> {
        if registration.capability.trim().is_empty() {
            return Err(Error::Validation("capability name is required".into()));
        }
        if !(0.0..=1.0).contains(&registration.confidence) {
            return Err(Error::Validation(format!(
                "capability confidence {} is outside [0, 1]",
                registration.confidence
            )));
        }

        debug!(
            plugin_id = %registration.plugin_id,
            capability = %registration.capability,
            confidence = registration.confidence,
            "register capability"
        );

        let mut caps = self.capabilities.write();
        let providers = caps.entry(registration.capability.clone()).or_default();
        if let Some(existing) = providers
            .iter_mut()
            .find(|p| p.registration.plugin_id == registration.plugin_id)
        {
            existing.registration = registration;
            existing.handler = handler;
        } else {
            providers.push(CapabilityProvider {
                registration,
                handler,
                seq: self.next_seq.fetch_add(1, Ordering::SeqCst),
            });
        }
        Ok(())
    }

    pub fn unregister_capability(&self, plugin_id: &str, capability: &str) -> bool {
        let mut caps = self.capabilities.write();
        let Some(providers) = caps.get_mut(capability) else {
            return false;
        };
        let before = providers.len();
        providers.retain(|p| p.registration.plugin_id != plugin_id);
        let removed = before != providers.len();
        if providers.is_empty() {
            caps.remove(capability);
        }
        removed
    }

    /// 플러그인의 모든 capability 해제
    pub fn unregister_capabilities(&self, plugin_id: &str) -> usize {
        let mut caps = self.capabilities.write();
        let mut removed = 0;
        caps.retain(|_, providers| {
            let before = providers.len();
            providers.retain(|p| p.registration.plugin_id != plugin_id);
            removed += before - providers.len();
            !providers.is_empty()
        });
        removed
    }

    fn ranked_providers(&self, capability: &str) -> Vec<CapabilityProvider> {
        let mut providers = self
            .capabilities
            .read()
            .get(capability)
            .cloned()
            .unwrap_or_default();
        providers.sort_by(|a, b| {
            b.registration
                .confidence
                .partial_cmp(&a.registration.confidence)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then(a.seq.cmp(&b.seq))
        });
        providers
    }

    /// 신뢰도 내림차순 제공자 목록 (동률은 먼저 등록한 쪽이 앞)
    pub fn find_plugins_by_capability(&self, capability: &str) -> Vec<CapabilityMatch> {
        self.ranked_providers(capability)
            .into_iter()
            .map(|p| CapabilityMatch {
                plugin_id: p.registration.plugin_id,
                confidence: p.registration.confidence,
                description: p.registration.description,
            })
            .collect()
    }

    /// capability 요청 (실패도 응답으로 반환)
    pub async fn request_capability(&self, request: CapabilityRequest) -> CapabilityResponse {
        let started = Instant::now();
        let elapsed = |started: Instant| started.elapsed().as_millis() as u64;

        let Some(provider) = self.ranked_providers(&request.capability).into_iter().next() else {
            debug!(capability = %request.capability, requestor = %request.requestor, "no provider");
            return CapabilityResponse {
                request_id: request.id,
                provider: None,
                result: None,
                success: false,
                error: Some(format!(
                    "No plugins found with capability '{}'",
                    request.capability
                )),
                elapsed_ms: elapsed(started),
            };
        };

        let timeout = request
            .timeout()
            .unwrap_or_else(|| self.settings.default_request_timeout());
        let provider_id = provider.registration.plugin_id.clone();

        debug!(
            capability = %request.capability,
            requestor = %request.requestor,
            provider = %provider_id,
            "dispatch capability request"
        );

        match guarded(timeout, provider.handler.handle(request.args)).await {
            Ok(result) => CapabilityResponse {
                request_id: request.id,
                provider: Some(provider_id),
                result: Some(result),
                success: true,
                error: None,
                elapsed_ms: elapsed(started),
            },
            Err(failure) => {
                warn!(
                    capability = %request.capability,
                    provider = %provider_id,
                    error = %failure,
                    "Capability request failed"
                );
                CapabilityResponse {
                    request_id: request.id,
                    provider: Some(provider_id),
                    result: None,
                    success: false,
                    error: Some(failure.to_string()),
                    elapsed_ms: elapsed(started),
                }
            }
        }
    }

    // ========================================================================
    // 공유 메모리
    // ========================================================================

    pub fn create_shared_memory_space(&self, space: SharedMemorySpace) -> Result<String> {
        self.spaces.create(space)
    }

    pub fn access_shared_memory_space(&self, namespace: &str, plugin_id: &str) -> Result<Value> {
        self.spaces.access(namespace, plugin_id)
    }

    pub fn update_shared_memory_space(&self, namespace: &str, plugin_id: &str, data: Value) -> Result<()> {
        self.spaces.update(namespace, plugin_id, data)
    }

    pub fn grant_shared_memory_access(&self, namespace: &str, owner: &str, grant: SpaceGrant) -> Result<()> {
        self.spaces.grant(namespace, owner, grant)
    }

    pub fn delete_shared_memory_space(&self, namespace: &str, plugin_id: &str) -> Result<()> {
        self.spaces.delete(namespace, plugin_id)
    }

    // ========================================================================
    // 정리
    // ========================================================================

    /// 플러그인 관련 구독/capability/공유 공간 정리
    pub fn cleanup_plugin(&self, plugin_id: &str) {
        let subs = self.unsubscribe_from_messages(plugin_id);
        let caps = self.unregister_capabilities(plugin_id);
        let spaces = self.spaces.cleanup_plugin(plugin_id);
        debug!(plugin_id = %plugin_id, subs, caps, spaces, "cleaned up plugin messaging state");
    }

    /// 플러그인 전용 프록시 생성
    pub fn create_plugin_message_bus(
        self: &Arc<Self>,
        plugin_id: impl Into<String>,
        permissions: &PermissionSet,
    ) -> PluginMessageBus {
        PluginMessageBus {
            plugin_id: plugin_id.into(),
            bus: Arc::clone(self),
            is_system: permissions.is_system(),
        }
    }
}

impl Default for CommunicationBus {
    fn default() -> Self {
        Self::new()
    }
}

// ============================================================================
// PluginMessageBus - 플러그인 전용 뷰
// ============================================================================

/// 플러그인에 전달되는 통신 버스 프록시 (발신자 고정)
pub struct PluginMessageBus {
    plugin_id: String,
    bus: Arc<CommunicationBus>,
    is_system: bool,
}

impl PluginMessageBus {
    pub fn plugin_id(&self) -> &str {
        &self.plugin_id
    }

    pub async fn send(&self, to: &str, subject: &str, payload: Value) -> Result<DeliveryReport> {
        self.bus
            .send_message(PluginMessage::direct(&self.plugin_id, to, subject, payload))
            .await
    }

    pub async fn broadcast(&self, subject: &str, payload: Value) -> Result<DeliveryReport> {
        self.bus
            .broadcast_message(PluginMessage::broadcast(&self.plugin_id, subject, payload))
            .await
    }

    pub fn subscribe(&self, filters: Vec<MessageFilter>, handler: Arc<dyn MessageHandler>) {
        self.bus.subscribe_to_messages(&self.plugin_id, filters, handler);
    }

    pub fn unsubscribe(&self) -> usize {
        self.bus.unsubscribe_from_messages(&self.plugin_id)
    }

    pub fn register_capability(
        &self,
        capability: &str,
        confidence: f64,
        handler: Arc<dyn CapabilityHandler>,
    ) -> Result<()> {
        self.bus.register_capability(
            CapabilityRegistration::new(&self.plugin_id, capability, confidence),
            handler,
        )
    }

    pub fn find_providers(&self, capability: &str) -> Vec<CapabilityMatch> {
        self.bus.find_plugins_by_capability(capability)
    }

    pub async fn request_capability(
        &self,
        capability: &str,
        args: Value,
        timeout: Option<Duration>,
    ) -> CapabilityResponse {
        let mut request = CapabilityRequest::new(&self.plugin_id, capability).with_args(args);
        if let Some(timeout) = timeout {
            request = request.with_timeout(timeout);
        }
        self.bus.request_capability(request).await
    }

    /// 워크스페이스 namespace (시스템 플러그인은 접두사 없음)
    pub fn scoped_namespace(&self, name: &str) -> String {
        let prefix = format!("plugin:{}:", self.plugin_id);
        if self.is_system || name.starts_with(&prefix) {
            name.to_string()
        } else {
            format!("{}{}", prefix, name)
        }
    }

    /// 공유 공간 생성 (실제 namespace 반환)
    pub fn create_shared_space(
        &self,
        name: &str,
        data: Value,
        grants: Vec<(String, SpaceAccess)>,
        ttl: Option<Duration>,
    ) -> Result<String> {
        let mut space = SharedMemorySpace::new(self.scoped_namespace(name), &self.plugin_id, data);
        for (plugin_id, access) in grants {
            space = space.with_grant(plugin_id, access);
        }
        if let Some(ttl) = ttl {
            space = space.with_ttl(ttl);
        }
        self.bus.create_shared_memory_space(space)
    }

    pub fn access_shared_space(&self, namespace: &str) -> Result<Value> {
        self.bus.access_shared_memory_space(namespace, &self.plugin_id)
    }

    pub fn update_shared_space(&self, namespace: &str, data: Value) -> Result<()> {
        self.bus
            .update_shared_memory_space(namespace, &self.plugin_id, data)
    }

    pub fn delete_shared_space(&self, namespace: &str) -> Result<()> {
        self.bus.delete_shared_memory_space(namespace, &self.plugin_id)
    }
}

#[cfg(test)]
mod tests {
    use super::super::message::{capability_handler_fn, message_handler_fn, FilterOperator};
    use super::*;
    use serde_json::json;

    fn collecting_handler(log: Arc<Mutex<Vec<String>>>) -> Arc<dyn MessageHandler> {
        message_handler_fn(move |msg| {
            let log = log.clone();
            async move {
                log.lock().push(msg.subject);
                Ok(())
            }
        })
    }

    #[tokio::test]
    async fn test_direct_message_routing_with_filters() {
        let bus = CommunicationBus::new();
        let log = Arc::new(Mutex::new(Vec::new()));
        bus.subscribe_to_messages(
            "ui",
            vec![MessageFilter::new("payload.priority", FilterOperator::Gt, json!(2))],
            collecting_handler(log.clone()),
        );

        let low = bus
            .send_message(PluginMessage::direct("indexer", "ui", "low", json!({"priority": 1})))
            .await
            .unwrap();
        assert_eq!(low.delivered, 0);

        bus.send_message(PluginMessage::direct("indexer", "ui", "high", json!({"priority": 5})))
            .await
            .unwrap();
        assert_eq!(*log.lock(), vec!["high"]);
        assert_eq!(bus.message_history(None).len(), 2);

        let missing = bus
            .send_message(PluginMessage::direct("indexer", "nobody", "x", Value::Null))
            .await;
        assert!(matches!(missing, Err(Error::NotFound(_))));
    }

    #[tokio::test]
    async fn test_broadcast_applies_pattern_filters_per_subscriber() {
        let bus = CommunicationBus::new();
        let notes = Arc::new(Mutex::new(Vec::new()));
        let all = Arc::new(Mutex::new(Vec::new()));
        let broken = Arc::new(Mutex::new(Vec::new()));
        bus.subscribe_to_messages(
            "notes",
            vec![MessageFilter::new("subject", FilterOperator::Matches, json!(r"^note\."))],
            collecting_handler(notes.clone()),
        );
        bus.subscribe_to_messages("all", vec![], collecting_handler(all.clone()));
        bus.subscribe_to_messages(
            "broken",
            vec![MessageFilter::new("subject", FilterOperator::Matches, json!("(unclosed"))],
            collecting_handler(broken.clone()),
        );

        for subject in ["note.saved", "task.done", "note.deleted"] {
            bus.broadcast_message(PluginMessage::broadcast("indexer", subject, Value::Null))
                .await
                .unwrap();
        }

        assert_eq!(*notes.lock(), vec!["note.saved", "note.deleted"]);
        assert_eq!(all.lock().len(), 3);
        assert!(broken.lock().is_empty());
    }

    #[tokio::test]
    async fn test_broadcast_skips_sender() {
        let bus = CommunicationBus::new();
        let a = Arc::new(Mutex::new(Vec::new()));
        let b = Arc::new(Mutex::new(Vec::new()));
        bus.subscribe_to_messages("a", vec![], collecting_handler(a.clone()));
        bus.subscribe_to_messages("b", vec![], collecting_handler(b.clone()));

        let report = bus
            .broadcast_message(PluginMessage::broadcast("a", "hello", Value::Null))
            .await
            .unwrap();
        assert_eq!(report.delivered, 1);
        assert!(a.lock().is_empty());
        assert_eq!(*b.lock(), vec!["hello"]);
    }

    #[tokio::test]
    async fn test_failing_message_handler_reported() {
        let bus = CommunicationBus::new();
        bus.subscribe_to_messages(
            "b",
            vec![],
            message_handler_fn(|_| async { Err::<(), _>(Error::Plugin("bad".into())) }),
        );
        let report = bus
            .send_message(PluginMessage::direct("a", "b", "x", Value::Null))
            .await
            .unwrap();
        assert_eq!(report.failures.len(), 1);
    }

    #[tokio::test]
    async fn test_capability_selection_by_confidence() {
        let bus = CommunicationBus::new();
        for (plugin, confidence) in [("weak", 0.6), ("strong", 0.9), ("also-strong", 0.9)] {
            bus.register_capability(
                CapabilityRegistration::new(plugin, "summarize", confidence),
                capability_handler_fn(move |_| async move { Ok(json!(plugin)) }),
            )
            .unwrap();
        }

        let ranked = bus.find_plugins_by_capability("summarize");
        let ids: Vec<_> = ranked.iter().map(|m| m.plugin_id.as_str()).collect();
        assert_eq!(ids, vec!["strong", "also-strong", "weak"]);

        let response = bus
            .request_capability(CapabilityRequest::new("client", "summarize"))
            .await;
        assert!(response.success);
        assert_eq!(response.provider.as_deref(), Some("strong"));
        assert_eq!(response.result, Some(json!("strong")));
    }

    #[tokio::test]
    async fn test_capability_failures_are_responses() {
        let bus = CommunicationBus::new();

        let none = bus
            .request_capability(CapabilityRequest::new("client", "translate"))
            .await;
        assert!(!none.success);
        assert!(none.error.unwrap().contains("No plugins found"));

        bus.register_capability(
            CapabilityRegistration::new("slow", "translate", 0.5),
            capability_handler_fn(|_| async {
                tokio::time::sleep(Duration::from_millis(500)).await;
                Ok(Value::Null)
            }),
        )
        .unwrap();
        let timed_out = bus
            .request_capability(
                CapabilityRequest::new("client", "translate").with_timeout(Duration::from_millis(20)),
            )
            .await;
        assert!(!timed_out.success);
        assert_eq!(timed_out.provider.as_deref(), Some("slow"));

        assert!(bus
            .register_capability(
                CapabilityRegistration::new("x", "bad", 1.2),
                capability_handler_fn(|_| async { Ok(Value::Null) }),
            )
            .is_err());
    }

    #[tokio::test]
    async fn test_cleanup_plugin() {
        let bus = Arc::new(CommunicationBus::new());
        let proxy = bus.create_plugin_message_bus("tagger", &PermissionSet::new());
        proxy.subscribe(vec![], message_handler_fn(|_| async { Ok(()) }));
        proxy
            .register_capability("tag", 0.7, capability_handler_fn(|_| async { Ok(Value::Null) }))
            .unwrap();
        let ns = proxy
            .create_shared_space("cache", json!({}), vec![], None)
            .unwrap();
        assert_eq!(ns, "plugin:tagger:cache");
        assert!(proxy.access_shared_space(&ns).is_ok());

        bus.cleanup_plugin("tagger");
        assert!(!bus.is_subscribed("tagger"));
        assert!(bus.find_plugins_by_capability("tag").is_empty());
        assert!(bus.access_shared_memory_space(&ns, "tagger").is_err());
    }

    #[test]
    fn test_system_plugins_are_not_scoped() {
        let bus = Arc::new(CommunicationBus::new());
        let proxy = bus.create_plugin_message_bus("core", &PermissionSet::system());
        assert_eq!(proxy.scoped_namespace("global"), "global");
    }
}
