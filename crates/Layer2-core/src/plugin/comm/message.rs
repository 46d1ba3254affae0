//! Plugin Messages - 플러그인 간 메시지와 capability 요청 타입

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use mnemos_foundation::{Error, Result};
use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tracing::warn;

// ============================================================================
// PluginMessage
// ============================================================================

/// 메시지 타입
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageType {
    Direct,
    Broadcast,
    Request,
    Response,
    Notification,
}

impl MessageType {
    /// 수신자(`to`)가 필요한 타입인지
    pub fn requires_recipient(&self) -> bool {
        matches!(self, Self::Direct | Self::Request | Self::Response)
    }
}

/// 플러그인 간 메시지
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PluginMessage {
    pub id: String,
    pub from: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub to: Option<String>,
    #[serde(rename = "type")]
    pub message_type: MessageType,
    pub subject: String,
    #[serde(default)]
    pub payload: Value,
    pub timestamp: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub correlation_id: Option<String>,
}

impl PluginMessage {
    fn build(
        from: impl Into<String>,
        to: Option<String>,
        message_type: MessageType,
        subject: impl Into<String>,
        payload: Value,
    ) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            from: from.into(),
            to,
            message_type,
            subject: subject.into(),
            payload,
            timestamp: Utc::now(),
            correlation_id: None,
        }
    }

    /// 1:1 메시지
    pub fn direct(
        from: impl Into<String>,
        to: impl Into<String>,
        subject: impl Into<String>,
        payload: Value,
    ) -> Self {
        Self::build(from, Some(to.into()), MessageType::Direct, subject, payload)
    }

    /// 발신자를 제외한 전체 전송
    pub fn broadcast(from: impl Into<String>, subject: impl Into<String>, payload: Value) -> Self {
        Self::build(from, None, MessageType::Broadcast, subject, payload)
    }

    pub fn notification(
        from: impl Into<String>,
        to: impl Into<String>,
        subject: impl Into<String>,
        payload: Value,
    ) -> Self {
        Self::build(from, Some(to.into()), MessageType::Notification, subject, payload)
    }

    pub fn with_correlation(mut self, correlation_id: impl Into<String>) -> Self {
        self.correlation_id = Some(correlation_id.into());
        self
    }

    /// 송신 전 검증
    pub fn validate(&self, max_payload_bytes: usize) -> Result<()> {
        if self.id.trim().is_empty() {
            return Err(Error::Validation("message id is required".into()));
        }
        if self.from.trim().is_empty() {
            return Err(Error::Validation("message sender is required".into()));
        }
        if self.subject.trim().is_empty() {
            return Err(Error::Validation("message subject is required".into()));
        }
        if self.message_type.requires_recipient()
            && self.to.as_deref().map_or(true, |t| t.trim().is_empty())
        {
            return Err(Error::Validation(format!(
                "{:?} message requires a recipient",
                self.message_type
            )));
        }

        let size = serde_json::to_vec(&self.payload)?.len();
        if size > max_payload_bytes {
            return Err(Error::Validation(format!(
                "message payload is {} bytes (max {})",
                size, max_payload_bytes
            )));
        }
        Ok(())
    }
}

// ============================================================================
// MessageFilter
// ============================================================================

/// 필터 연산자
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FilterOperator {
    Equals,
    Contains,
    Matches,
    Gt,
    Lt,
}

/// 메시지 필터 (필드 경로는 점으로 구분, 예: `payload.priority`)
///
/// `Matches` 패턴은 생성 시 한 번만 컴파일됨.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(from = "FilterSpec")]
pub struct MessageFilter {
    pub field: String,
    pub operator: FilterOperator,
    pub value: Value,
    #[serde(skip)]
    pattern: Option<Regex>,
}

#[derive(Deserialize)]
struct FilterSpec {
    field: String,
    operator: FilterOperator,
    value: Value,
}

impl From<FilterSpec> for MessageFilter {
    fn from(spec: FilterSpec) -> Self {
        Self::new(spec.field, spec.operator, spec.value)
    }
}

impl PartialEq for MessageFilter {
    fn eq(&self, other: &Self) -> bool {
        self.field == other.field && self.operator == other.operator && self.value == other.value
    }
}

impl MessageFilter {
    pub fn new(field: impl Into<String>, operator: FilterOperator, value: Value) -> Self {
        let field = field.into();
        let pattern = match (operator, &value) {
            (FilterOperator::Matches, Value::String(pattern)) => match Regex::new(pattern) {
                Ok(re) => Some(re),
                Err(e) => {
                    warn!(field = %field, pattern = %pattern, error = %e, "Invalid message filter pattern");
                    None
                }
            },
            _ => None,
        };
        Self {
            field,
            operator,
            value,
            pattern,
        }
    }

    /// `Matches` 필터의 패턴이 올바른지 (다른 연산자는 항상 true)
    pub fn is_valid(&self) -> bool {
        self.operator != FilterOperator::Matches || self.pattern.is_some()
    }

    pub fn equals(field: impl Into<String>, value: Value) -> Self {
        Self::new(field, FilterOperator::Equals, value)
    }

    /// 메시지가 필터를 통과하는지
    ///
    /// 메시지를 매번 직렬화하므로 여러 필터를 평가할 때는 `matches_value` 사용.
    pub fn matches(&self, message: &PluginMessage) -> bool {
        match serde_json::to_value(message) {
            Ok(doc) => self.matches_value(&doc),
            Err(_) => false,
        }
    }

    /// JSON 문서에 대해 평가
    pub fn matches_value(&self, doc: &Value) -> bool {
        let Some(actual) = lookup_path(doc, &self.field) else {
            return false;
        };

        match self.operator {
            FilterOperator::Equals => actual == &self.value,
            FilterOperator::Contains => match (actual, &self.value) {
                (Value::String(s), Value::String(needle)) => s.contains(needle.as_str()),
                (Value::Array(items), needle) => items.contains(needle),
                (Value::Object(map), Value::String(key)) => map.contains_key(key),
                _ => false,
            },
            FilterOperator::Matches => match (actual, &self.pattern) {
                (Value::String(s), Some(re)) => re.is_match(s),
                _ => false,
            },
            FilterOperator::Gt => compare(actual, &self.value) == Some(std::cmp::Ordering::Greater),
            FilterOperator::Lt => compare(actual, &self.value) == Some(std::cmp::Ordering::Less),
        }
    }
}

/// 점 경로 조회 (배열은 숫자 인덱스)
fn lookup_path<'a>(doc: &'a Value, path: &str) -> Option<&'a Value> {
    path.split('.').try_fold(doc, |current, segment| match current {
        Value::Object(map) => map.get(segment),
        Value::Array(items) => segment.parse::<usize>().ok().and_then(|i| items.get(i)),
        _ => None,
    })
}

fn compare(a: &Value, b: &Value) -> Option<std::cmp::Ordering> {
    match (a, b) {
        (Value::Number(x), Value::Number(y)) => x.as_f64()?.partial_cmp(&y.as_f64()?),
        (Value::String(x), Value::String(y)) => Some(x.cmp(y)),
        _ => None,
    }
}

// ============================================================================
// Handlers
// ============================================================================

/// 메시지 핸들러
#[async_trait]
pub trait MessageHandler: Send + Sync {
    async fn handle(&self, message: &PluginMessage) -> Result<()>;
}

struct FnMessageHandler<F>(F);

#[async_trait]
impl<F, Fut> MessageHandler for FnMessageHandler<F>
where
    F: Fn(PluginMessage) -> Fut + Send + Sync,
    Fut: Future<Output = Result<()>> + Send,
{
    async fn handle(&self, message: &PluginMessage) -> Result<()> {
        (self.0)(message.clone()).await
    }
}

pub fn message_handler_fn<F, Fut>(f: F) -> Arc<dyn MessageHandler>
where
    F: Fn(PluginMessage) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<()>> + Send + 'static,
{
    Arc::new(FnMessageHandler(f))
}

/// capability 요청 처리기
#[async_trait]
pub trait CapabilityHandler: Send + Sync {
    async fn handle(&self, args: Value) -> Result<Value>;
}

struct FnCapabilityHandler<F>(F);

#[async_trait]
impl<F, Fut> CapabilityHandler for FnCapabilityHandler<F>
where
    F: Fn(Value) -> Fut + Send + Sync,
    Fut: Future<Output = Result<Value>> + Send,
{
    async fn handle(&self, args: Value) -> Result<Value> {
        (self.0)(args).await
    }
}

pub fn capability_handler_fn<F, Fut>(f: F) -> Arc<dyn CapabilityHandler>
where
    F: Fn(Value) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<Value>> + Send + 'static,
{
    Arc::new(FnCapabilityHandler(f))
}

// ============================================================================
// Capability Request / Response
// ============================================================================

/// capability 요청
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CapabilityRequest {
    pub id: String,
    pub capability: String,
    pub requestor: String,
    #[serde(default)]
    pub args: Value,
    /// 제한 시간 (ms, None이면 기본값)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeout_ms: Option<u64>,
}

impl CapabilityRequest {
    pub fn new(requestor: impl Into<String>, capability: impl Into<String>) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            capability: capability.into(),
            requestor: requestor.into(),
            args: Value::Null,
            timeout_ms: None,
        }
    }

    pub fn with_args(mut self, args: Value) -> Self {
        self.args = args;
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout_ms = Some(timeout.as_millis() as u64);
        self
    }

    pub fn timeout(&self) -> Option<Duration> {
        self.timeout_ms.map(Duration::from_millis)
    }
}

/// capability 응답
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CapabilityResponse {
    pub request_id: String,
    /// 선택된 제공자
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub provider: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    pub success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub elapsed_ms: u64,
}

/// capability 등록 정보
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CapabilityRegistration {
    pub plugin_id: String,
    pub capability: String,
    pub confidence: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

impl CapabilityRegistration {
    pub fn new(plugin_id: impl Into<String>, capability: impl Into<String>, confidence: f64) -> Self {
        Self {
            plugin_id: plugin_id.into(),
            capability: capability.into(),
            confidence,
            description: None,
        }
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }
}
