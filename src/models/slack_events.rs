//! Slack Events API payloads.

use serde::Deserialize;

#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum SlackEnvelope {
    UrlVerification {
        challenge: String,
    },
    EventCallback {
        #[serde(default)]
        team_id: Option<String>,
        #[serde(default)]
        event_id: Option<String>,
        event: SlackEvent,
    },
    #[serde(other)]
    Unsupported,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SlackEvent {
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(default)]
    pub subtype: Option<String>,
    #[serde(default)]
    pub bot_id: Option<String>,
    #[serde(default)]
    pub user: Option<String>,
    #[serde(default)]
    pub text: Option<String>,
    #[serde(default)]
    pub channel: Option<String>,
    #[serde(default)]
    pub team: Option<String>,
    #[serde(default)]
    pub ts: Option<String>,
    #[serde(default)]
    pub thread_ts: Option<String>,
}

impl SlackEvent {
    pub fn is_conversational(&self) -> bool {
        matches!(self.kind.as_str(), "message" | "app_mention")
    }

    /// Edits, joins and our own bot's echoes carry one of these.
    pub fn is_bot_or_subtype(&self) -> bool {
        self.bot_id.is_some() || self.subtype.is_some()
    }

    /// Thread the reply should land in.
    pub fn thread_hint(&self) -> Option<&str> {
        self.thread_ts.as_deref().or(self.ts.as_deref())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn parses_url_verification() {
        let env: SlackEnvelope = serde_json::from_value(json!({
            "type": "url_verification", "token": "x", "challenge": "abc"
        }))
        .unwrap();
        assert!(matches!(env, SlackEnvelope::UrlVerification { challenge } if challenge == "abc"));
    }

    #[test]
    fn parses_event_callback() {
        let env: SlackEnvelope = serde_json::from_value(json!({
            "type": "event_callback",
            "team_id": "T1",
            "event": {"type": "message", "user": "U1", "text": "hi", "channel": "C1", "ts": "1.2"}
        }))
        .unwrap();
        let SlackEnvelope::EventCallback { team_id, event, .. } = env else {
            panic!("expected event callback");
        };
        assert_eq!(team_id.as_deref(), Some("T1"));
        assert!(event.is_conversational());
        assert!(!event.is_bot_or_subtype());
        assert_eq!(event.thread_hint(), Some("1.2"));
    }

    #[test]
    fn unknown_envelope_kind_is_unsupported() {
        let env: SlackEnvelope = serde_json::from_value(json!({"type": "app_rate_limited"})).unwrap();
        assert!(matches!(env, SlackEnvelope::Unsupported));
    }
}
