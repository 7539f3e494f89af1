//! Update notifications emitted by the change applier.
//!
//! Every variant carries enough data for a viewer to patch its mirror without
//! re-fetching the document. Deletions carry the removed entity so rules can
//! still match on its kind after it is gone.

use crate::model::{
    Cell, NodeId, NodeKind, Position, Relationship, RelationshipRole, Stroke, StrokeId, Style,
    StyleData,
};
use crate::mutations::ChangeRequest;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum Update {
    #[serde(rename_all = "camelCase")]
    CellInserted { cell: Cell, after: Position },

    #[serde(rename_all = "camelCase")]
    CellDeleted { cell: Cell },

    #[serde(rename_all = "camelCase")]
    CellMoved { cell_id: NodeId, after: Position },

    #[serde(rename_all = "camelCase")]
    CellResized { cell_id: NodeId, height: f64 },

    #[serde(rename_all = "camelCase")]
    StrokeInserted {
        cell_id: NodeId,
        stroke: Stroke,
        index: usize,
    },

    #[serde(rename_all = "camelCase")]
    StrokeDeleted { cell_id: NodeId, stroke_id: StrokeId },

    #[serde(rename_all = "camelCase")]
    StyleInserted { style: Style },

    /// `style` holds the new payload, `previous` the replaced one
    #[serde(rename_all = "camelCase")]
    StyleChanged { style: Style, previous: StyleData },

    #[serde(rename_all = "camelCase")]
    StyleDeleted { style: Style },

    #[serde(rename_all = "camelCase")]
    RelationshipInserted { relationship: Relationship },

    #[serde(rename_all = "camelCase")]
    RelationshipDeleted { relationship: Relationship },
}

/// Fieldless discriminant of [`Update`], used in rule triggers
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum UpdateEvent {
    CellInserted,
    CellDeleted,
    CellMoved,
    CellResized,
    StrokeInserted,
    StrokeDeleted,
    StyleInserted,
    StyleChanged,
    StyleDeleted,
    RelationshipInserted,
    RelationshipDeleted,
}

impl Update {
    pub fn event(&self) -> UpdateEvent {
        match self {
            Update::CellInserted { .. } => UpdateEvent::CellInserted,
            Update::CellDeleted { .. } => UpdateEvent::CellDeleted,
            Update::CellMoved { .. } => UpdateEvent::CellMoved,
            Update::CellResized { .. } => UpdateEvent::CellResized,
            Update::StrokeInserted { .. } => UpdateEvent::StrokeInserted,
            Update::StrokeDeleted { .. } => UpdateEvent::StrokeDeleted,
            Update::StyleInserted { .. } => UpdateEvent::StyleInserted,
            Update::StyleChanged { .. } => UpdateEvent::StyleChanged,
            Update::StyleDeleted { .. } => UpdateEvent::StyleDeleted,
            Update::RelationshipInserted { .. } => UpdateEvent::RelationshipInserted,
            Update::RelationshipDeleted { .. } => UpdateEvent::RelationshipDeleted,
        }
    }

    /// Id of the entity this update is about
    pub fn subject(&self) -> NodeId {
        match self {
            Update::CellInserted { cell, .. } | Update::CellDeleted { cell } => cell.id,
            Update::CellMoved { cell_id, .. }
            | Update::CellResized { cell_id, .. }
            | Update::StrokeInserted { cell_id, .. }
            | Update::StrokeDeleted { cell_id, .. } => *cell_id,
            Update::StyleInserted { style }
            | Update::StyleChanged { style, .. }
            | Update::StyleDeleted { style } => style.id,
            Update::RelationshipInserted { relationship }
            | Update::RelationshipDeleted { relationship } => relationship.id,
        }
    }

    /// The style this update is about, if any
    pub fn style(&self) -> Option<&Style> {
        match self {
            Update::StyleInserted { style }
            | Update::StyleChanged { style, .. }
            | Update::StyleDeleted { style } => Some(style),
            _ => None,
        }
    }

    pub fn relationship(&self) -> Option<&Relationship> {
        match self {
            Update::RelationshipInserted { relationship }
            | Update::RelationshipDeleted { relationship } => Some(relationship),
            _ => None,
        }
    }

    pub fn kind(&self) -> Option<NodeKind> {
        self.style().map(Style::kind)
    }

    pub fn relationship_role(&self) -> Option<RelationshipRole> {
        self.relationship().map(|r| r.role)
    }
}

/// One part of a batched response.
///
/// `complete == false` means more parts for the same logical operation follow
/// (rule rounds); receivers accumulate until `complete == true`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UpdateBatch {
    pub updates: Vec<Update>,
    pub undo_change_requests: Vec<ChangeRequest>,
    #[serde(default)]
    pub redo_change_requests: Vec<ChangeRequest>,
    pub complete: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub request_id: Option<String>,
}
