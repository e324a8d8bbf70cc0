use crate::error::Result;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// What happened to the board tree.
///
/// Serialized in snake_case, matching the wire names consumed by the
/// rendering collaborator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChangeKind {
    BoardCreated,
    BoardRenamed,
    BoardDeleted,
    ColumnAdded,
    ColumnRenamed,
    ColumnMoved,
    ColumnRemoved,
    TaskAdded,
    TaskUpdated,
    TaskMoved,
    TaskRemoved,
}

/// One mutation, as delivered to every live subscriber.
///
/// `target_parent_id` names the parent whose child list the mutation touched:
/// the board for column events, the destination column for task events, and
/// absent for board-level events (boards have no parent). `payload` is an
/// opaque JSON snapshot of the affected entity; resolving it into HTML or any
/// other representation is the rendering collaborator's job.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChangeEvent {
    #[serde(rename = "type")]
    pub kind: ChangeKind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub target_parent_id: Option<Uuid>,
    pub payload: serde_json::Value,
}

impl ChangeEvent {
    pub fn new(kind: ChangeKind, target_parent_id: Option<Uuid>, payload: serde_json::Value) -> Self {
        Self {
            kind,
            target_parent_id,
            payload,
        }
    }

    /// Encodes the event as one push-stream text frame.
    ///
    /// Frames are `data: {json}` blocks terminated by a blank line, the
    /// format the event-stream endpoint forwards verbatim.
    pub fn to_frame(&self) -> Result<String> {
        Ok(format!("data: {}\n\n", serde_json::to_string(self)?))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_kind_serializes_snake_case() {
        let json = serde_json::to_string(&ChangeKind::TaskAdded).unwrap();
        assert_eq!(json, r#""task_added""#);

        let json = serde_json::to_string(&ChangeKind::ColumnMoved).unwrap();
        assert_eq!(json, r#""column_moved""#);
    }

    #[test]
    fn test_event_serialization() {
        let parent = Uuid::new_v4();
        let event = ChangeEvent::new(
            ChangeKind::TaskAdded,
            Some(parent),
            json!({"title": "Fix login"}),
        );

        let value = serde_json::to_value(&event).unwrap();
        assert_eq!(value["type"], "task_added");
        assert_eq!(value["target_parent_id"], parent.to_string());
        assert_eq!(value["payload"]["title"], "Fix login");
    }

    #[test]
    fn test_board_event_omits_parent() {
        let event = ChangeEvent::new(ChangeKind::BoardCreated, None, json!({"name": "Q3"}));
        let json = serde_json::to_string(&event).unwrap();

        assert!(!json.contains("target_parent_id"));
    }

    #[test]
    fn test_frame_format() {
        let event = ChangeEvent::new(ChangeKind::TaskRemoved, Some(Uuid::nil()), json!({}));
        let frame = event.to_frame().unwrap();

        assert!(frame.starts_with("data: {"));
        assert!(frame.ends_with("\n\n"));

        // The body between prefix and terminator is the event itself
        let body = frame.strip_prefix("data: ").unwrap().trim_end();
        let parsed: ChangeEvent = serde_json::from_str(body).unwrap();
        assert_eq!(parsed.kind, ChangeKind::TaskRemoved);
    }

    #[test]
    fn test_event_round_trip() {
        let event = ChangeEvent::new(
            ChangeKind::ColumnRemoved,
            Some(Uuid::new_v4()),
            json!({"name": "In Progress"}),
        );

        let json = serde_json::to_string(&event).unwrap();
        let loaded: ChangeEvent = serde_json::from_str(&json).unwrap();

        assert_eq!(loaded.kind, event.kind);
        assert_eq!(loaded.target_parent_id, event.target_parent_id);
        assert_eq!(loaded.payload, event.payload);
    }
}
