//! Wire envelopes exchanged with viewers.
//!
//! ```text
//! client → server   {"type": "open" | "close" | "change", "path", ...}
//! server → client   {"type": "notebook",     "operation": "opened" | "updated" | "closed", ...}
//!                   {"type": "collaborator", "operation": "connected" | "disconnected", ...}
//!                   {"type": "error", "message", "kind", "requestId"?}
//! ```

use notebook_editor::{ChangeRequest, ErrorKind, UpdateBatch};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum ClientMessage {
    Open {
        path: String,
    },
    Close {
        path: String,
    },
    #[serde(rename_all = "camelCase")]
    Change {
        path: String,
        requests: Vec<ChangeRequest>,
        #[serde(default)]
        request_id: Option<String>,
    },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum ServerMessage {
    Notebook(NotebookEvent),
    Collaborator(CollaboratorEvent),
    #[serde(rename_all = "camelCase")]
    Error {
        message: String,
        kind: ErrorKind,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        request_id: Option<String>,
    },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "operation", rename_all = "camelCase")]
pub enum NotebookEvent {
    /// Full persisted form of the notebook, sent to the joining session only
    Opened {
        path: String,
        version: u64,
        document: serde_json::Value,
    },
    /// One round of an operation; see [`UpdateBatch::complete`]
    Updated {
        path: String,
        #[serde(flatten)]
        batch: UpdateBatch,
        /// Milliseconds since the Unix epoch
        timestamp: i64,
    },
    Closed {
        path: String,
    },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "operation", rename_all = "camelCase")]
pub enum CollaboratorEvent {
    #[serde(rename_all = "camelCase")]
    Connected { path: String, session_id: String },
    #[serde(rename_all = "camelCase")]
    Disconnected { path: String, session_id: String },
}

impl ServerMessage {
    pub fn error(error: &crate::WorkspaceError, request_id: Option<String>) -> Self {
        ServerMessage::Error {
            message: error.to_string(),
            kind: error.kind(),
            request_id,
        }
    }

    /// Request id carried by this message, if any
    pub fn request_id(&self) -> Option<&str> {
        match self {
            ServerMessage::Notebook(NotebookEvent::Updated { batch, .. }) => {
                batch.request_id.as_deref()
            }
            ServerMessage::Error { request_id, .. } => request_id.as_deref(),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use notebook_editor::{NodeId, Update};
    use serde_json::json;

    #[test]
    fn test_change_message_parses() {
        let message: ClientMessage = serde_json::from_value(json!({
            "type": "change",
            "path": "a.json",
            "requestId": "c1-1",
            "requests": [{"type": "deleteCell", "cellId": 4}]
        }))
        .unwrap();

        assert_eq!(
            message,
            ClientMessage::Change {
                path: "a.json".into(),
                requests: vec![ChangeRequest::DeleteCell { cell_id: NodeId(4) }],
                request_id: Some("c1-1".into()),
            }
        );
    }

    #[test]
    fn test_updated_envelope_shape() {
        let message = ServerMessage::Notebook(NotebookEvent::Updated {
            path: "a.json".into(),
            batch: UpdateBatch {
                updates: vec![Update::CellResized {
                    cell_id: NodeId(1),
                    height: 90.0,
                }],
                undo_change_requests: vec![ChangeRequest::ResizeCell {
                    cell_id: NodeId(1),
                    height: 120.0,
                }],
                redo_change_requests: Vec::new(),
                complete: true,
                request_id: None,
            },
            timestamp: 1_700_000_000_000,
        });

        let value = serde_json::to_value(&message).unwrap();
        assert_eq!(value["type"], "notebook");
        assert_eq!(value["operation"], "updated");
        assert_eq!(value["updates"][0]["type"], "cellResized");
        assert_eq!(value["undoChangeRequests"][0]["height"], 120.0);
        assert_eq!(value["complete"], true);
        assert!(value.get("requestId").is_none());

        let back: ServerMessage = serde_json::from_value(value).unwrap();
        assert_eq!(back, message);
    }

    #[test]
    fn test_error_envelope_shape() {
        let message = ServerMessage::Error {
            message: "Document a.json is not open in this session".into(),
            kind: ErrorKind::Expected,
            request_id: Some("c1-3".into()),
        };
        let value = serde_json::to_value(&message).unwrap();
        assert_eq!(
            value,
            json!({
                "type": "error",
                "message": "Document a.json is not open in this session",
                "kind": "expected",
                "requestId": "c1-3"
            })
        );
    }
}
