use serde::{ Serialize, Deserialize };
use serde_json::{ json, Value as JsonValue };

pub const PHOENIX_TOPIC: &str = "phoenix";

pub const EVENT_JOIN: &str = "phx_join";
pub const EVENT_LEAVE: &str = "phx_leave";
pub const EVENT_REPLY: &str = "phx_reply";
pub const EVENT_ERROR: &str = "phx_error";
pub const EVENT_CLOSE: &str = "phx_close";
pub const EVENT_HEARTBEAT: &str = "heartbeat";
pub const EVENT_POSTGRES_CHANGES: &str = "postgres_changes";

/// A Phoenix channel frame as spoken by the Realtime websocket.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct PhoenixFrame {
    pub topic: String,
    pub event: String,
    #[serde(default)]
    pub payload: JsonValue,
    #[serde(rename = "ref", default)]
    pub reference: Option<String>,
}

impl PhoenixFrame {
    pub fn heartbeat(reference: String) -> Self {
        Self {
            topic: PHOENIX_TOPIC.to_string(),
            event: EVENT_HEARTBEAT.to_string(),
            payload: json!({}),
            reference: Some(reference),
        }
    }

    pub fn join(topic: String, filter: &PostgresChangesFilter, reference: String) -> Self {
        Self {
            topic,
            event: EVENT_JOIN.to_string(),
            payload: json!({
                "config": {
                    "broadcast": { "self": false },
                    "presence": { "key": "" },
                    "postgres_changes": [filter],
                }
            }),
            reference: Some(reference),
        }
    }

    pub fn leave(topic: String, reference: String) -> Self {
        Self {
            topic,
            event: EVENT_LEAVE.to_string(),
            payload: json!({}),
            reference: Some(reference),
        }
    }

    /// `true` when a `phx_reply` carries `status: ok`.
    pub fn is_ok_reply(&self) -> bool {
        self.event == EVENT_REPLY &&
            self.payload.get("status").and_then(|s| s.as_str()) == Some("ok")
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct PostgresChangesFilter {
    pub event: String,
    pub schema: String,
    pub table: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub filter: Option<String>,
}

impl PostgresChangesFilter {
    pub fn all_events(table: &str, filter: Option<String>) -> Self {
        Self {
            event: "*".to_string(),
            schema: "public".to_string(),
            table: table.to_string(),
            filter,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn join_frame_carries_postgres_changes_config() {
        let filter = PostgresChangesFilter::all_events(
            "chat_messages",
            Some("session_id=eq.s1".to_string())
        );
        let frame = PhoenixFrame::join("realtime:chat_messages_s1".into(), &filter, "1".into());
        let value = serde_json::to_value(&frame).unwrap();

        assert_eq!(value["event"], "phx_join");
        assert_eq!(value["ref"], "1");
        let changes = &value["payload"]["config"]["postgres_changes"][0];
        assert_eq!(changes["table"], "chat_messages");
        assert_eq!(changes["filter"], "session_id=eq.s1");
        assert_eq!(changes["event"], "*");
    }

    #[test]
    fn reply_frame_without_ref_still_parses() {
        let frame: PhoenixFrame = serde_json
            ::from_str(
                r#"{"topic":"realtime:x","event":"phx_reply","payload":{"status":"ok","response":{}}}"#
            )
            .unwrap();
        assert!(frame.is_ok_reply());
        assert_eq!(frame.reference, None);
    }
}
