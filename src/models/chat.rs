use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

pub const SYSTEM_INTRO: &str = "This is the beginning of your conversation";

/// Session lifecycle.
///
/// `ACTIVE` ⇄ `PROCESSING` are driven by message appends. `ERROR` and
/// `COMPLETED` are only entered through an explicit status change, and
/// `COMPLETED` cannot be left again.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ChatStatus {
    Active,
    Processing,
    Completed,
    Error,
}

impl ChatStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ChatStatus::Active => "ACTIVE",
            ChatStatus::Processing => "PROCESSING",
            ChatStatus::Completed => "COMPLETED",
            ChatStatus::Error => "ERROR",
        }
    }

    /// Whether a message append may move the session between ACTIVE and PROCESSING.
    pub fn follows_appends(&self) -> bool {
        matches!(self, ChatStatus::Active | ChatStatus::Processing)
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, ChatStatus::Completed)
    }
}

impl fmt::Display for ChatStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ChatStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "ACTIVE" => Ok(ChatStatus::Active),
            "PROCESSING" => Ok(ChatStatus::Processing),
            "COMPLETED" => Ok(ChatStatus::Completed),
            "ERROR" => Ok(ChatStatus::Error),
            other => Err(format!("unknown chat status '{}'", other)),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    pub role: Role,
    pub content: String,
    pub timestamp: DateTime<Utc>,
    #[serde(default)]
    pub hidden: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metadata: Option<Value>,
}

impl Message {
    pub fn new(role: Role, content: impl Into<String>) -> Self {
        Self {
            role,
            content: content.into(),
            timestamp: Utc::now(),
            hidden: false,
            metadata: None,
        }
    }

    pub fn system_intro() -> Self {
        Self {
            hidden: true,
            ..Self::new(Role::System, SYSTEM_INTRO)
        }
    }

    pub fn with_metadata(mut self, metadata: Option<Value>) -> Self {
        self.metadata = metadata;
        self
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ChatSession {
    pub id: Uuid,
    pub organization_id: Uuid,
    pub chatbot_id: Uuid,
    pub connector_id: Option<Uuid>,
    pub external_session_key: Option<String>,
    pub messages: Vec<Message>,
    pub status: ChatStatus,
    pub feedback: Option<i16>,
    pub configuration: Value,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct NewChatSession {
    pub organization_id: Uuid,
    pub chatbot_id: Uuid,
    pub connector_id: Option<Uuid>,
    pub external_session_key: Option<String>,
    pub messages: Vec<Message>,
    pub status: ChatStatus,
    pub configuration: Value,
}

/// One atomic change to a session's log.
#[derive(Debug, Clone)]
pub struct MessageAppend {
    pub messages: Vec<Message>,
    /// Applied only while the session is ACTIVE or PROCESSING.
    pub transition: Option<ChatStatus>,
    /// Shallow-merged into the session configuration.
    pub configuration: Option<Value>,
}

/// Shallow object merge with right-hand keys winning, matching jsonb `||`.
pub fn merge_configuration(base: &Value, patch: &Value) -> Value {
    match (base, patch) {
        (Value::Object(b), Value::Object(p)) => {
            let mut merged = b.clone();
            for (k, v) in p {
                merged.insert(k.clone(), v.clone());
            }
            Value::Object(merged)
        }
        (_, Value::Null) => base.clone(),
        (Value::Null, p) => p.clone(),
        (_, p) => p.clone(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn only_idle_and_busy_follow_appends() {
        assert!(ChatStatus::Active.follows_appends());
        assert!(ChatStatus::Processing.follows_appends());
        assert!(!ChatStatus::Error.follows_appends());
        assert!(!ChatStatus::Completed.follows_appends());
        assert!(ChatStatus::Completed.is_terminal());
    }

    #[test]
    fn intro_message_is_hidden_system() {
        let m = Message::system_intro();
        assert_eq!(m.role, Role::System);
        assert!(m.hidden);
        assert_eq!(m.content, SYSTEM_INTRO);
    }

    #[test]
    fn merge_keeps_existing_keys() {
        let merged = merge_configuration(&json!({"a": 1, "thread_ts": "1"}), &json!({"thread_ts": "2"}));
        assert_eq!(merged, json!({"a": 1, "thread_ts": "2"}));
        assert_eq!(merge_configuration(&Value::Null, &json!({"x": true})), json!({"x": true}));
        assert_eq!(merge_configuration(&json!({"x": 1}), &Value::Null), json!({"x": 1}));
    }

    #[test]
    fn message_serializes_lowercase_role() {
        let v = serde_json::to_value(Message::new(Role::Assistant, "hi")).unwrap();
        assert_eq!(v["role"], "assistant");
        assert_eq!(v["hidden"], false);
        assert!(v.get("metadata").is_none());
    }
}
