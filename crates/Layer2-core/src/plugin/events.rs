//! Plugin Events - 이벤트 버스 (발행/구독)
//!
//! 시스템 및 플러그인 라이프사이클 이벤트를 구독자에게 전달합니다.
//!
//! - 이벤트 타입별 구독은 priority 내림차순 (같은 priority는 등록 순)
//! - 핸들러 호출은 필터 → 제한 시간 → 격리 순으로 감싸짐
//! - 실패한 핸들러마다 `plugin:error` 이벤트가 한 번 발행됨
//! - `plugin:unloaded` 이벤트는 해당 플러그인의 구독을 모두 제거함

use super::sandbox::guarded;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use mnemos_foundation::{Error, EventBusSettings, PermissionSet, PermissionToken, Result};
use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::collections::{HashMap, HashSet, VecDeque};
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::broadcast;
use tracing::{debug, trace, warn};

// ============================================================================
// EventType
// ============================================================================

/// 이벤트 타입
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum EventType {
    // 플러그인 라이프사이클
    PluginLoaded,
    PluginUnloaded,
    PluginEnabled,
    PluginDisabled,
    PluginError,
    PluginInstalled,
    PluginUninstalled,
    PluginUpdated,

    // 시스템
    SystemStartup,
    SystemShutdown,

    // 메모리 / 그래프
    MemoryCreated,
    MemoryUpdated,
    MemoryDeleted,
    GraphNodeCreated,
    GraphRelationshipCreated,

    // 사용자 정의 이벤트
    Custom(String),
}

impl EventType {
    pub fn as_str(&self) -> &str {
        match self {
            Self::PluginLoaded => "plugin:loaded",
            Self::PluginUnloaded => "plugin:unloaded",
            Self::PluginEnabled => "plugin:enabled",
            Self::PluginDisabled => "plugin:disabled",
            Self::PluginError => "plugin:error",
            Self::PluginInstalled => "plugin:installed",
            Self::PluginUninstalled => "plugin:uninstalled",
            Self::PluginUpdated => "plugin:updated",
            Self::SystemStartup => "system:startup",
            Self::SystemShutdown => "system:shutdown",
            Self::MemoryCreated => "memory:created",
            Self::MemoryUpdated => "memory:updated",
            Self::MemoryDeleted => "memory:deleted",
            Self::GraphNodeCreated => "graph:node-created",
            Self::GraphRelationshipCreated => "graph:relationship-created",
            Self::Custom(name) => name,
        }
    }

    /// 런타임이 정의한 이벤트인지 (Custom 제외)
    pub fn is_system(&self) -> bool {
        !matches!(self, Self::Custom(_))
    }

    pub fn custom(name: impl Into<String>) -> Self {
        Self::from(name.into())
    }
}

impl From<String> for EventType {
    fn from(s: String) -> Self {
        match s.as_str() {
            "plugin:loaded" => Self::PluginLoaded,
            "plugin:unloaded" => Self::PluginUnloaded,
            "plugin:enabled" => Self::PluginEnabled,
            "plugin:disabled" => Self::PluginDisabled,
            "plugin:error" => Self::PluginError,
            "plugin:installed" => Self::PluginInstalled,
            "plugin:uninstalled" => Self::PluginUninstalled,
            "plugin:updated" => Self::PluginUpdated,
            "system:startup" => Self::SystemStartup,
            "system:shutdown" => Self::SystemShutdown,
            "memory:created" => Self::MemoryCreated,
            "memory:updated" => Self::MemoryUpdated,
            "memory:deleted" => Self::MemoryDeleted,
            "graph:node-created" => Self::GraphNodeCreated,
            "graph:relationship-created" => Self::GraphRelationshipCreated,
            _ => Self::Custom(s),
        }
    }
}

impl From<EventType> for String {
    fn from(t: EventType) -> Self {
        t.as_str().to_string()
    }
}

impl std::fmt::Display for EventType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

// ============================================================================
// BusEvent
// ============================================================================

/// 버스를 통해 전달되는 이벤트
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BusEvent {
    pub id: String,
    pub event_type: EventType,
    pub payload: Value,
    pub timestamp: DateTime<Utc>,
    /// 발행한 플러그인 (런타임이 발행하면 None)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub source: Option<String>,
}

impl BusEvent {
    pub fn new(event_type: EventType, payload: Value) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            event_type,
            payload,
            timestamp: Utc::now(),
            source: None,
        }
    }

    pub fn with_source(mut self, source: impl Into<String>) -> Self {
        self.source = Some(source.into());
        self
    }
}

// ============================================================================
// EventHandler
// ============================================================================

/// 이벤트 핸들러 트레이트
#[async_trait]
pub trait EventHandler: Send + Sync {
    async fn handle(&self, event: &BusEvent) -> Result<()>;
}

/// 클로저 기반 핸들러
pub struct FnHandler<F>(F);

#[async_trait]
impl<F, Fut> EventHandler for FnHandler<F>
where
    F: Fn(BusEvent) -> Fut + Send + Sync,
    Fut: Future<Output = Result<()>> + Send,
{
    async fn handle(&self, event: &BusEvent) -> Result<()> {
        (self.0)(event.clone()).await
    }
}

/// 클로저를 핸들러로 변환
pub fn handler_fn<F, Fut>(f: F) -> Arc<dyn EventHandler>
where
    F: Fn(BusEvent) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<()>> + Send + 'static,
{
    Arc::new(FnHandler(f))
}

/// 디스패치 전에 평가되는 필터
pub type EventFilter = Arc<dyn Fn(&BusEvent) -> bool + Send + Sync>;

// ============================================================================
// EventSubscription
// ============================================================================

/// 구독 ID
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub struct SubscriptionId(u64);

impl std::fmt::Display for SubscriptionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "subscription-{}", self.0)
    }
}

/// 이벤트 구독
#[derive(Clone)]
pub struct EventSubscription {
    pub event_type: EventType,
    pub plugin_id: String,
    pub handler: Arc<dyn EventHandler>,
    pub priority: i32,
    pub filter: Option<EventFilter>,
}

impl EventSubscription {
    pub fn new(
        event_type: EventType,
        plugin_id: impl Into<String>,
        handler: Arc<dyn EventHandler>,
    ) -> Self {
        Self {
            event_type,
            plugin_id: plugin_id.into(),
            handler,
            priority: 0,
            filter: None,
        }
    }

    pub fn with_priority(mut self, priority: i32) -> Self {
        self.priority = priority;
        self
    }

    pub fn with_filter<F>(mut self, filter: F) -> Self
    where
        F: Fn(&BusEvent) -> bool + Send + Sync + 'static,
    {
        self.filter = Some(Arc::new(filter));
        self
    }
}

#[derive(Clone)]
struct Registered {
    id: SubscriptionId,
    subscription: EventSubscription,
}

/// 구독 조회 결과 (핸들러 제외)
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SubscriptionInfo {
    pub id: SubscriptionId,
    pub event_type: EventType,
    pub plugin_id: String,
    pub priority: i32,
    pub has_filter: bool,
}

/// 핸들러 실패 정보
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct HandlerFailure {
    pub plugin_id: String,
    pub event_type: EventType,
    pub error: String,
}

/// `emit` 결과
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct EmitReport {
    pub event_id: String,
    /// 필터를 통과해 호출된 핸들러 수
    pub delivered: usize,
    pub failures: Vec<HandlerFailure>,
}

// ============================================================================
// EventBus
// ============================================================================

/// 이벤트 버스
///
/// 런타임이 하나를 만들어 `Arc`로 공유합니다. 락은 핸들러 await 동안
/// 잡지 않습니다.
pub struct EventBus {
    subscriptions: RwLock<HashMap<EventType, Vec<Registered>>>,
    history: Mutex<HashMap<EventType, VecDeque<BusEvent>>>,
    sender: broadcast::Sender<BusEvent>,
    settings: EventBusSettings,
    next_id: AtomicU64,
}

impl EventBus {
    pub fn new() -> Self {
        Self::with_settings(EventBusSettings::default())
    }

    pub fn with_settings(settings: EventBusSettings) -> Self {
        let (sender, _) = broadcast::channel(settings.channel_capacity.max(1));
        Self {
            subscriptions: RwLock::new(HashMap::new()),
            history: Mutex::new(HashMap::new()),
            sender,
            settings,
            next_id: AtomicU64::new(1),
        }
    }

    pub fn settings(&self) -> &EventBusSettings {
        &self.settings
    }

    // ========================================================================
    // 구독
    // ========================================================================

    /// 구독 등록 (priority 내림차순, 동일 priority는 등록 순)
    pub fn subscribe(&self, subscription: EventSubscription) -> SubscriptionId {
        let id = SubscriptionId(self.next_id.fetch_add(1, Ordering::SeqCst));
        debug!(
            plugin_id = %subscription.plugin_id,
            event_type = %subscription.event_type,
            priority = subscription.priority,
            "subscribe"
        );

        let mut subs = self.subscriptions.write();
        let list = subs.entry(subscription.event_type.clone()).or_default();
        let pos = list
            .iter()
            .position(|r| r.subscription.priority < subscription.priority)
            .unwrap_or(list.len());
        list.insert(pos, Registered { id, subscription });
        id
    }

    /// 특정 플러그인의 특정 이벤트 구독 해제
    pub fn unsubscribe(&self, event_type: &EventType, plugin_id: &str) -> usize {
        let mut subs = self.subscriptions.write();
        let Some(list) = subs.get_mut(event_type) else {
            return 0;
        };
        let before = list.len();
        list.retain(|r| r.subscription.plugin_id != plugin_id);
        let removed = before - list.len();
        if list.is_empty() {
            subs.remove(event_type);
        }
        removed
    }

    /// ID로 구독 해제
    pub fn unsubscribe_by_id(&self, id: SubscriptionId) -> bool {
        let mut subs = self.subscriptions.write();
        let mut found = false;
        subs.retain(|_, list| {
            let before = list.len();
            list.retain(|r| r.id != id);
            found |= before != list.len();
            !list.is_empty()
        });
        found
    }

    /// 플러그인의 모든 구독 해제
    pub fn unsubscribe_all(&self, plugin_id: &str) -> usize {
        let mut subs = self.subscriptions.write();
        let mut removed = 0;
        subs.retain(|_, list| {
            let before = list.len();
            list.retain(|r| r.subscription.plugin_id != plugin_id);
            removed += before - list.len();
            !list.is_empty()
        });
        if removed > 0 {
            debug!(plugin_id = %plugin_id, removed, "removed plugin subscriptions");
        }
        removed
    }

    /// 구독 목록 (디스패치 순서)
    pub fn list_subscriptions(&self, event_type: Option<&EventType>) -> Vec<SubscriptionInfo> {
        let subs = self.subscriptions.read();
        let info = |r: &Registered| SubscriptionInfo {
            id: r.id,
            event_type: r.subscription.event_type.clone(),
            plugin_id: r.subscription.plugin_id.clone(),
            priority: r.subscription.priority,
            has_filter: r.subscription.filter.is_some(),
        };
        match event_type {
            Some(t) => subs
                .get(t)
                .map(|list| list.iter().map(info).collect())
                .unwrap_or_default(),
            None => subs.values().flat_map(|list| list.iter().map(info)).collect(),
        }
    }

    /// catch-all 스트림
    pub fn receiver(&self) -> broadcast::Receiver<BusEvent> {
        self.sender.subscribe()
    }

    // ========================================================================
    // 발행
    // ========================================================================

    /// 이벤트 발행 (런타임 출처)
    pub async fn emit(&self, event_type: EventType, payload: Value) -> EmitReport {
        self.emit_event(BusEvent::new(event_type, payload)).await
    }

    /// 준비된 이벤트 발행
    ///
    /// 핸들러 실패는 발행자에게 전파되지 않고 `plugin:error` 이벤트로
    /// 재발행됩니다. `plugin:error` 핸들러의 실패는 로그만 남깁니다.
    pub async fn emit_event(&self, event: BusEvent) -> EmitReport {
        if event.event_type == EventType::PluginUnloaded {
            if let Some(plugin_id) = event.payload.get("pluginId").and_then(Value::as_str) {
                self.unsubscribe_all(plugin_id);
            }
        }

        let (delivered, failures) = self.deliver(&event).await;

        if event.event_type != EventType::PluginError {
            for failure in &failures {
                let error_event = BusEvent::new(
                    EventType::PluginError,
                    json!({
                        "pluginId": failure.plugin_id,
                        "eventType": failure.event_type.as_str(),
                        "eventId": event.id,
                        "error": failure.error,
                    }),
                );
                let (_, nested) = self.deliver(&error_event).await;
                for f in nested {
                    warn!(
                        plugin_id = %f.plugin_id,
                        error = %f.error,
                        "plugin:error handler failed"
                    );
                }
            }
        }

        EmitReport {
            event_id: event.id,
            delivered,
            failures,
        }
    }

    /// 히스토리 기록 + 브로드캐스트 + 핸들러 순차 호출
    async fn deliver(&self, event: &BusEvent) -> (usize, Vec<HandlerFailure>) {
        trace!(event_type = %event.event_type, event_id = %event.id, "deliver");
        self.record(event);
        let _ = self.sender.send(event.clone());

        let snapshot: Vec<Registered> = self
            .subscriptions
            .read()
            .get(&event.event_type)
            .cloned()
            .unwrap_or_default();

        let timeout = self.settings.handler_timeout();
        let mut delivered = 0;
        let mut failures = Vec::new();

        for registered in snapshot {
            let sub = &registered.subscription;
            if let Some(filter) = &sub.filter {
                if !filter(event) {
                    continue;
                }
            }
            delivered += 1;

            if let Err(failure) = guarded(timeout, sub.handler.handle(event)).await {
                warn!(
                    plugin_id = %sub.plugin_id,
                    event_type = %event.event_type,
                    error = %failure,
                    "Event handler failed"
                );
                failures.push(HandlerFailure {
                    plugin_id: sub.plugin_id.clone(),
                    event_type: event.event_type.clone(),
                    error: failure.to_string(),
                });
            }
        }

        (delivered, failures)
    }

    fn record(&self, event: &BusEvent) {
        let cap = self.settings.history_size;
        if cap == 0 {
            return;
        }
        let mut history = self.history.lock();
        let ring = history.entry(event.event_type.clone()).or_default();
        if ring.len() >= cap {
            ring.pop_front();
        }
        ring.push_back(event.clone());
    }

    // ========================================================================
    // 히스토리
    // ========================================================================

    /// 최근 이벤트 (오래된 것부터, 최대 `limit`개)
    pub fn get_event_history(&self, event_type: &EventType, limit: Option<usize>) -> Vec<BusEvent> {
        let history = self.history.lock();
        let Some(ring) = history.get(event_type) else {
            return Vec::new();
        };
        let limit = limit.unwrap_or(ring.len()).min(ring.len());
        ring.iter().skip(ring.len() - limit).cloned().collect()
    }

    pub fn clear_history(&self) {
        self.history.lock().clear();
    }

    // ========================================================================
    // 플러그인 프록시
    // ========================================================================

    /// 플러그인 전용 프록시 생성
    pub fn create_plugin_event_bus(
        self: &Arc<Self>,
        plugin_id: impl Into<String>,
        permissions: &PermissionSet,
    ) -> PluginEventBus {
        PluginEventBus {
            plugin_id: plugin_id.into(),
            bus: Arc::clone(self),
            can_emit_system: permissions.contains(PermissionToken::SystemEvents)
                || permissions.is_system(),
            subscribed: Mutex::new(HashSet::new()),
        }
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}

// ============================================================================
// PluginEventBus - 플러그인 전용 뷰
// ============================================================================

/// 플러그인에 전달되는 이벤트 버스 프록시
///
/// 발행 시 payload에 `source`/`timestamp`를 붙이고, 자신이 구독한
/// 이벤트 타입을 추적해 일괄 정리합니다.
pub struct PluginEventBus {
    plugin_id: String,
    bus: Arc<EventBus>,
    can_emit_system: bool,
    subscribed: Mutex<HashSet<EventType>>,
}

impl PluginEventBus {
    pub fn plugin_id(&self) -> &str {
        &self.plugin_id
    }

    /// 구독 (priority 0, 필터 없음)
    pub fn subscribe(&self, event_type: EventType, handler: Arc<dyn EventHandler>) -> SubscriptionId {
        self.subscribe_with(event_type, handler, 0, None)
    }

    pub fn subscribe_with(
        &self,
        event_type: EventType,
        handler: Arc<dyn EventHandler>,
        priority: i32,
        filter: Option<EventFilter>,
    ) -> SubscriptionId {
        self.subscribed.lock().insert(event_type.clone());
        let mut subscription = EventSubscription::new(event_type, &self.plugin_id, handler)
            .with_priority(priority);
        subscription.filter = filter;
        self.bus.subscribe(subscription)
    }

    pub fn unsubscribe(&self, event_type: &EventType) -> usize {
        self.subscribed.lock().remove(event_type);
        self.bus.unsubscribe(event_type, &self.plugin_id)
    }

    /// 이벤트 발행 (시스템 이벤트는 `system-events` 권한 필요)
    pub async fn emit(&self, event_type: EventType, payload: Value) -> Result<EmitReport> {
        if event_type.is_system() && !self.can_emit_system {
            return Err(Error::permission_denied(
                &self.plugin_id,
                PermissionToken::SystemEvents.as_str(),
                format!("emit {}", event_type),
            ));
        }

        let now = Utc::now();
        let payload = match payload {
            Value::Object(mut map) => {
                map.insert("source".into(), Value::String(self.plugin_id.clone()));
                map.insert("timestamp".into(), Value::String(now.to_rfc3339()));
                Value::Object(map)
            }
            other => json!({
                "data": other,
                "source": self.plugin_id,
                "timestamp": now.to_rfc3339(),
            }),
        };

        let mut event = BusEvent::new(event_type, payload).with_source(&self.plugin_id);
        event.timestamp = now;
        Ok(self.bus.emit_event(event).await)
    }

    /// 구독 중인 이벤트 타입
    pub fn subscribed_events(&self) -> Vec<EventType> {
        self.subscribed.lock().iter().cloned().collect()
    }

    pub fn history(&self, event_type: &EventType, limit: Option<usize>) -> Vec<BusEvent> {
        self.bus.get_event_history(event_type, limit)
    }

    /// 이 플러그인의 모든 구독 해제
    pub fn cleanup(&self) -> usize {
        self.subscribed.lock().clear();
        self.bus.unsubscribe_all(&self.plugin_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn recorder(log: Arc<Mutex<Vec<String>>>, tag: &'static str) -> Arc<dyn EventHandler> {
        handler_fn(move |_event| {
            let log = log.clone();
            async move {
                log.lock().push(tag.to_string());
                Ok(())
            }
        })
    }

    #[test]
    fn test_event_type_strings() {
        assert_eq!(EventType::PluginLoaded.as_str(), "plugin:loaded");
        assert_eq!(EventType::from("graph:node-created".to_string()), EventType::GraphNodeCreated);
        assert_eq!(
            EventType::custom("tagger:done"),
            EventType::Custom("tagger:done".into())
        );
        assert!(!EventType::custom("x").is_system());

        let json = serde_json::to_string(&EventType::MemoryDeleted).unwrap();
        assert_eq!(json, "\"memory:deleted\"");
    }

    #[tokio::test]
    async fn test_priority_order() {
        let bus = EventBus::new();
        let log = Arc::new(Mutex::new(Vec::new()));

        bus.subscribe(
            EventSubscription::new(EventType::SystemStartup, "low", recorder(log.clone(), "low"))
                .with_priority(1),
        );
        bus.subscribe(
            EventSubscription::new(EventType::SystemStartup, "high", recorder(log.clone(), "high"))
                .with_priority(10),
        );
        bus.subscribe(
            EventSubscription::new(EventType::SystemStartup, "mid", recorder(log.clone(), "mid"))
                .with_priority(1),
        );

        let report = bus.emit(EventType::SystemStartup, Value::Null).await;
        assert_eq!(report.delivered, 3);
        assert_eq!(*log.lock(), vec!["high", "low", "mid"]);
    }

    #[tokio::test]
    async fn test_failing_handler_is_isolated() {
        let bus = EventBus::new();
        let log = Arc::new(Mutex::new(Vec::new()));

        bus.subscribe(
            EventSubscription::new(
                EventType::MemoryCreated,
                "broken",
                handler_fn(|_| async { Err::<(), _>(Error::Plugin("nope".into())) }),
            )
            .with_priority(5),
        );
        bus.subscribe(EventSubscription::new(
            EventType::MemoryCreated,
            "healthy",
            recorder(log.clone(), "healthy"),
        ));
        bus.subscribe(EventSubscription::new(
            EventType::PluginError,
            "monitor",
            recorder(log.clone(), "error-seen"),
        ));

        let report = bus.emit(EventType::MemoryCreated, json!({"id": "m1"})).await;

        assert_eq!(report.failures.len(), 1);
        assert_eq!(report.failures[0].plugin_id, "broken");
        assert_eq!(*log.lock(), vec!["healthy", "error-seen"]);

        let errors = bus.get_event_history(&EventType::PluginError, None);
        assert_eq!(errors.len(), 1);
        assert_eq!(errors[0].payload["pluginId"], "broken");
    }

    #[tokio::test]
    async fn test_handler_timeout_counts_as_failure() {
        let bus = EventBus::with_settings(EventBusSettings {
            handler_timeout_ms: 20,
            ..Default::default()
        });
        bus.subscribe(EventSubscription::new(
            EventType::custom("slow"),
            "sleepy",
            handler_fn(|_| async {
                tokio::time::sleep(Duration::from_millis(500)).await;
                Ok(())
            }),
        ));

        let report = bus.emit(EventType::custom("slow"), Value::Null).await;
        assert_eq!(report.failures.len(), 1);
        assert!(report.failures[0].error.contains("timed out"));
    }

    #[tokio::test]
    async fn test_filter_skips_handler() {
        let bus = EventBus::new();
        let log = Arc::new(Mutex::new(Vec::new()));
        bus.subscribe(
            EventSubscription::new(EventType::MemoryCreated, "p", recorder(log.clone(), "hit"))
                .with_filter(|e| e.payload["kind"] == "note"),
        );

        bus.emit(EventType::MemoryCreated, json!({"kind": "task"})).await;
        bus.emit(EventType::MemoryCreated, json!({"kind": "note"})).await;
        assert_eq!(log.lock().len(), 1);
    }

    #[tokio::test]
    async fn test_plugin_unloaded_removes_subscriptions() {
        let bus = EventBus::new();
        let log = Arc::new(Mutex::new(Vec::new()));
        bus.subscribe(EventSubscription::new(
            EventType::PluginUnloaded,
            "gone",
            recorder(log.clone(), "gone"),
        ));
        bus.subscribe(EventSubscription::new(
            EventType::MemoryCreated,
            "gone",
            recorder(log.clone(), "gone"),
        ));

        bus.emit(EventType::PluginUnloaded, json!({"pluginId": "gone"}))
            .await;

        assert!(bus.list_subscriptions(None).is_empty());
        assert!(log.lock().is_empty());
    }

    #[tokio::test]
    async fn test_history_is_bounded() {
        let bus = EventBus::with_settings(EventBusSettings {
            history_size: 2,
            ..Default::default()
        });
        for i in 0..3 {
            bus.emit(EventType::custom("tick"), json!(i)).await;
        }

        let history = bus.get_event_history(&EventType::custom("tick"), None);
        assert_eq!(history.len(), 2);
        assert_eq!(history[0].payload, json!(1));
        assert_eq!(
            bus.get_event_history(&EventType::custom("tick"), Some(1))[0].payload,
            json!(2)
        );
    }

    #[tokio::test]
    async fn test_catch_all_receiver() {
        let bus = EventBus::new();
        let mut rx = bus.receiver();
        bus.emit(EventType::SystemShutdown, Value::Null).await;

        let event = rx.recv().await.unwrap();
        assert_eq!(event.event_type, EventType::SystemShutdown);
    }

    #[tokio::test]
    async fn test_plugin_proxy_tags_and_cleans_up() {
        let bus = Arc::new(EventBus::new());
        let proxy = bus.create_plugin_event_bus("tagger", &PermissionSet::new());
        let other = bus.create_plugin_event_bus("watcher", &PermissionSet::new());

        let log = Arc::new(Mutex::new(Vec::new()));
        other.subscribe(EventType::custom("tagger:done"), recorder(log.clone(), "seen"));
        proxy.subscribe(EventType::MemoryCreated, recorder(log.clone(), "mem"));
        proxy.subscribe(EventType::MemoryUpdated, recorder(log.clone(), "mem"));
        assert_eq!(proxy.subscribed_events().len(), 2);

        proxy
            .emit(EventType::custom("tagger:done"), json!({"count": 3}))
            .await
            .unwrap();
        let history = bus.get_event_history(&EventType::custom("tagger:done"), None);
        assert_eq!(history[0].payload["source"], "tagger");
        assert!(history[0].payload.get("timestamp").is_some());
        assert_eq!(history[0].source.as_deref(), Some("tagger"));
        assert_eq!(*log.lock(), vec!["seen"]);

        let denied = proxy.emit(EventType::SystemStartup, Value::Null).await;
        assert!(matches!(denied, Err(Error::PermissionDenied { .. })));

        assert_eq!(proxy.cleanup(), 2);
        assert!(proxy.subscribed_events().is_empty());
        assert_eq!(bus.list_subscriptions(None).len(), 1);
    }
}
