//! Plugin Logger - 민감 정보 마스킹 로거
//!
//! 메시지와 메타데이터에서 password/token/key/secret 형태의 값을 가린 뒤
//! `plugin` 타깃으로 tracing에 기록합니다.

use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::sync::OnceLock;
use tracing::{debug, error, info, warn};

/// 마스킹 치환 문자열
pub const REDACTED: &str = "[REDACTED]";

static MESSAGE_PATTERN: OnceLock<Option<Regex>> = OnceLock::new();
static FIELD_PATTERN: OnceLock<Option<Regex>> = OnceLock::new();

fn message_pattern() -> Option<&'static Regex> {
    MESSAGE_PATTERN
        .get_or_init(|| {
            Regex::new(
                r#"(?i)\b(passw(?:or)?d|pwd|secret|token|api[_-]?key|access[_-]?key|private[_-]?key|key)(\s*[:=]\s*)("[^"]*"|'[^']*'|\S+)"#,
            )
            .ok()
        })
        .as_ref()
}

fn field_pattern() -> Option<&'static Regex> {
    FIELD_PATTERN
        .get_or_init(|| {
            Regex::new(r"(?i)(passw(or)?d|secret|token|credential|api[_-]?key|private[_-]?key|^key$|[_.-]key$)").ok()
        })
        .as_ref()
}

/// 메시지 안의 `name=value` / `name: value` 형태 비밀값 마스킹
pub fn redact_message(message: &str) -> String {
    match message_pattern() {
        Some(re) => re
            .replace_all(message, format!("${{1}}${{2}}{}", REDACTED).as_str())
            .into_owned(),
        None => message.to_string(),
    }
}

/// 민감한 이름의 필드 값을 재귀적으로 마스킹
pub fn redact_value(value: &Value) -> Value {
    match value {
        Value::Object(map) => {
            let mut out = Map::with_capacity(map.len());
            for (key, inner) in map {
                let sensitive = field_pattern().map_or(false, |re| re.is_match(key));
                let redacted = if sensitive {
                    Value::String(REDACTED.to_string())
                } else {
                    redact_value(inner)
                };
                out.insert(key.clone(), redacted);
            }
            Value::Object(out)
        }
        Value::Array(items) => Value::Array(items.iter().map(redact_value).collect()),
        Value::String(s) => Value::String(redact_message(s)),
        other => other.clone(),
    }
}

/// 로그 레벨
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Debug,
    Info,
    Warn,
    Error,
}

/// 플러그인 전용 로거
#[derive(Debug, Clone)]
pub struct PluginLogger {
    plugin_id: String,
}

impl PluginLogger {
    pub fn new(plugin_id: impl Into<String>) -> Self {
        Self {
            plugin_id: plugin_id.into(),
        }
    }

    pub fn plugin_id(&self) -> &str {
        &self.plugin_id
    }

    pub fn debug(&self, message: &str, metadata: Option<Value>) {
        self.log(LogLevel::Debug, message, metadata);
    }

    pub fn info(&self, message: &str, metadata: Option<Value>) {
        self.log(LogLevel::Info, message, metadata);
    }

    pub fn warn(&self, message: &str, metadata: Option<Value>) {
        self.log(LogLevel::Warn, message, metadata);
    }

    pub fn error(&self, message: &str, metadata: Option<Value>) {
        self.log(LogLevel::Error, message, metadata);
    }

    pub fn log(&self, level: LogLevel, message: &str, metadata: Option<Value>) {
        let message = redact_message(message);
        let metadata = metadata
            .map(|m| redact_value(&m).to_string())
            .unwrap_or_default();
        let plugin_id = self.plugin_id.as_str();

        match level {
            LogLevel::Debug => debug!(target: "plugin", plugin_id, metadata = %metadata, "{}", message),
            LogLevel::Info => info!(target: "plugin", plugin_id, metadata = %metadata, "{}", message),
            LogLevel::Warn => warn!(target: "plugin", plugin_id, metadata = %metadata, "{}", message),
            LogLevel::Error => error!(target: "plugin", plugin_id, metadata = %metadata, "{}", message),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_redact_message() {
        assert_eq!(
            redact_message("login with password=hunter2 ok"),
            "login with password=[REDACTED] ok"
        );
        assert_eq!(redact_message("api_key: \"abc def\""), "api_key: [REDACTED]");
        assert_eq!(redact_message("Token=xyz"), "Token=[REDACTED]");
        assert_eq!(redact_message("nothing to hide"), "nothing to hide");
    }

    #[test]
    fn test_redact_metadata() {
        let meta = json!({
            "user": "kim",
            "password": "hunter2",
            "nested": {"authToken": "t", "count": 3},
            "items": [{"secret": "s"}],
            "note": "key=abc"
        });

        let redacted = redact_value(&meta);
        assert_eq!(redacted["user"], "kim");
        assert_eq!(redacted["password"], REDACTED);
        assert_eq!(redacted["nested"]["authToken"], REDACTED);
        assert_eq!(redacted["nested"]["count"], 3);
        assert_eq!(redacted["items"][0]["secret"], REDACTED);
        assert_eq!(redacted["note"], "key=[REDACTED]");
    }

    #[test]
    fn test_non_secret_keys_kept() {
        let redacted = redact_value(&json!({"monkey": 1, "keyboard": 2}));
        assert_eq!(redacted["monkey"], 1);
        assert_eq!(redacted["keyboard"], 2);
    }

    #[test]
    fn test_logger_does_not_panic() {
        let logger = PluginLogger::new("p");
        logger.info("password=abc", Some(json!({"token": "x"})));
        logger.error("failed", None);
    }
}
