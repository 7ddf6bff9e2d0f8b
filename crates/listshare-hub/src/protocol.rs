//! Outbound WebSocket messages
//!
//! The server only ever writes two kinds of text frame:
//!
//! ```text
//! {"type":"connected"}
//! {"type":"update","todo_list":{...},"updated_by":"<session id>"}
//! ```
//!
//! Inbound frames are read but not interpreted.

use serde::Serialize;

use crate::error::Result;
use crate::model::PublicTodoList;

#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Envelope<'a> {
    /// Sent once, right after a viewer joins
    Connected,

    /// A list changed; `updated_by` is the session that made the change
    Update {
        todo_list: PublicTodoList<'a>,
        updated_by: &'a str,
    },
}

impl Envelope<'_> {
    /// Serialize to the JSON text carried in a single frame.
    pub fn to_text(&self) -> Result<String> {
        Ok(serde_json::to_string(self)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::TodoList;
    use chrono::{Duration, Utc};
    use serde_json::Value;

    #[test]
    fn test_connected_shape() {
        let text = Envelope::Connected.to_text().unwrap();
        assert_eq!(text, r#"{"type":"connected"}"#);
    }

    #[test]
    fn test_update_shape() {
        let now = Utc::now();
        let list = TodoList {
            id: "list-9".to_string(),
            items: Vec::new(),
            created_at: now,
            expires_at: now + Duration::hours(1),
            edit_token_hash: "hash".to_string(),
            version: 1,
        };

        let text = Envelope::Update {
            todo_list: list.public(),
            updated_by: "session-1",
        }
        .to_text()
        .unwrap();

        let json: Value = serde_json::from_str(&text).unwrap();
        assert_eq!(json["type"], "update");
        assert_eq!(json["updated_by"], "session-1");
        assert_eq!(json["todo_list"]["id"], "list-9");
        assert!(json["todo_list"].get("edit_token_hash").is_none());
    }
}
