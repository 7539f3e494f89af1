//! # Change Requests
//!
//! Discrete operations on a notebook graph, and the applier that turns a
//! batch of them into updates plus an undo list.
//!
//! ## Semantics
//!
//! - Each request produces one or more primitive graph operations. Every
//!   primitive yields exactly one [`Update`] and one inverse request, which is
//!   *prepended* to the undo list so replaying the list reverses the batch.
//! - `deleteCell` / `deleteStyle` cascade: incident relationships first, then
//!   descendant styles deepest-first, then the node itself.
//! - Fresh ids are pinned into the returned redo list, so redo recreates the
//!   exact same ids that undo removed.
//! - A batch is atomic. On the first failure the inverses accumulated so far
//!   are replayed; if that rollback fails too, the caller must treat the
//!   document as poisoned.

use crate::graph::{Graph, GraphError};
use crate::model::{
    Cell, CellType, NodeId, Position, Relationship, RelationshipData, RelationshipRole, Source,
    Stroke, StrokeId, Style, StyleData, StyleRole,
};
use crate::updates::Update;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// A single change to a notebook
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum ChangeRequest {
    /// Insert an empty cell after `after`; `id` is pinned on redo
    #[serde(rename_all = "camelCase")]
    InsertEmptyCell {
        cell_type: CellType,
        after: Position,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        id: Option<NodeId>,
    },

    /// Re-insert a previously deleted cell with its content (undo of delete)
    #[serde(rename_all = "camelCase")]
    RestoreCell { cell: Cell, after: Position },

    #[serde(rename_all = "camelCase")]
    DeleteCell { cell_id: NodeId },

    #[serde(rename_all = "camelCase")]
    MoveCell { cell_id: NodeId, after: Position },

    #[serde(rename_all = "camelCase")]
    ResizeCell { cell_id: NodeId, height: f64 },

    #[serde(rename_all = "camelCase")]
    InsertStroke {
        cell_id: NodeId,
        stroke: Stroke,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        index: Option<usize>,
    },

    #[serde(rename_all = "camelCase")]
    DeleteStroke { cell_id: NodeId, stroke_id: StrokeId },

    #[serde(rename_all = "camelCase")]
    InsertStyle {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        id: Option<NodeId>,
        cell_id: NodeId,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        parent_id: Option<NodeId>,
        role: StyleRole,
        source: Source,
        data: StyleData,
    },

    #[serde(rename_all = "camelCase")]
    ChangeStyle { style_id: NodeId, data: StyleData },

    #[serde(rename_all = "camelCase")]
    DeleteStyle { style_id: NodeId },

    #[serde(rename_all = "camelCase")]
    InsertRelationship {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        id: Option<NodeId>,
        from: NodeId,
        to: NodeId,
        role: RelationshipRole,
        source: Source,
        data: RelationshipData,
    },

    #[serde(rename_all = "camelCase")]
    DeleteRelationship { relationship_id: NodeId },
}

impl ChangeRequest {
    /// Request that recreates `style` with its original id
    pub fn restore_style(style: &Style) -> Self {
        ChangeRequest::InsertStyle {
            id: Some(style.id),
            cell_id: style.cell_id,
            parent_id: style.parent_id,
            role: style.role,
            source: style.source,
            data: style.data.clone(),
        }
    }

    pub fn restore_relationship(rel: &Relationship) -> Self {
        ChangeRequest::InsertRelationship {
            id: Some(rel.id),
            from: rel.from,
            to: rel.to,
            role: rel.role,
            source: rel.source,
            data: rel.data.clone(),
        }
    }

    /// Same request with `id` pinned, for requests that allocate one
    fn pinned(&self, id: NodeId) -> Self {
        let mut pinned = self.clone();
        match &mut pinned {
            ChangeRequest::InsertEmptyCell { id: slot, .. }
            | ChangeRequest::InsertStyle { id: slot, .. }
            | ChangeRequest::InsertRelationship { id: slot, .. } => *slot = Some(id),
            _ => {}
        }
        pinned
    }
}

#[derive(Error, Debug, Clone, PartialEq)]
pub enum MutationError {
    /// The request was invalid; the graph was rolled back cleanly
    #[error("Change request {index} rejected: {error}")]
    Rejected {
        index: usize,
        #[source]
        error: GraphError,
    },

    /// The request failed and so did the rollback; the graph is inconsistent
    #[error("Change request {index} failed ({error}) and rollback failed: {rollback_error}")]
    RollbackFailed {
        index: usize,
        error: GraphError,
        rollback_error: GraphError,
    },
}

/// Result of applying one batch
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ApplyOutcome {
    pub updates: Vec<Update>,
    /// Inverse requests, in the order they must be replayed
    pub undo_requests: Vec<ChangeRequest>,
    /// The input requests with allocated ids pinned
    pub redo_requests: Vec<ChangeRequest>,
}

impl ApplyOutcome {
    pub fn is_empty(&self) -> bool {
        self.updates.is_empty()
    }

    fn record(&mut self, update: Update, inverse: ChangeRequest) {
        self.updates.push(update);
        self.undo_requests.insert(0, inverse);
    }
}

/// Apply `requests` to `graph` in order, all or nothing
pub fn apply_batch(
    graph: &mut Graph,
    requests: &[ChangeRequest],
) -> Result<ApplyOutcome, MutationError> {
    let next_id = graph.next_id();
    let mut outcome = ApplyOutcome::default();

    for (index, request) in requests.iter().enumerate() {
        match apply_one(graph, request, &mut outcome) {
            Ok(redo) => outcome.redo_requests.push(redo),
            Err(error) => {
                let mut scratch = ApplyOutcome::default();
                for inverse in &outcome.undo_requests {
                    if let Err(rollback_error) = apply_one(graph, inverse, &mut scratch) {
                        return Err(MutationError::RollbackFailed {
                            index,
                            error,
                            rollback_error,
                        });
                    }
                }
                graph.rewind_next_id(next_id);
                return Err(MutationError::Rejected { index, error });
            }
        }
    }

    Ok(outcome)
}

/// Apply one request, recording its primitives. Returns the pinned redo form.
fn apply_one(
    graph: &mut Graph,
    request: &ChangeRequest,
    outcome: &mut ApplyOutcome,
) -> Result<ChangeRequest, GraphError> {
    match request {
        ChangeRequest::InsertEmptyCell { cell_type, after, id } => {
            let id = graph.claim_id(*id)?;
            let cell = Cell::empty(id, *cell_type);
            insert_cell(graph, cell, *after, outcome)?;
            Ok(request.pinned(id))
        }

        ChangeRequest::RestoreCell { cell, after } => {
            graph.claim_id(Some(cell.id))?;
            insert_cell(graph, cell.clone(), *after, outcome)?;
            Ok(request.clone())
        }

        ChangeRequest::DeleteCell { cell_id } => {
            graph.require_cell(*cell_id)?;
            delete_dependents(graph, *cell_id, outcome)?;
            let (cell, after) = graph.delete_cell(*cell_id)?;
            outcome.record(
                Update::CellDeleted { cell: cell.clone() },
                ChangeRequest::RestoreCell { cell, after },
            );
            Ok(request.clone())
        }

        ChangeRequest::MoveCell { cell_id, after } => {
            let previous = graph.move_cell(*cell_id, *after)?;
            let now = graph.position_before(*cell_id)?;
            outcome.record(
                Update::CellMoved {
                    cell_id: *cell_id,
                    after: now,
                },
                ChangeRequest::MoveCell {
                    cell_id: *cell_id,
                    after: previous,
                },
            );
            Ok(request.clone())
        }

        ChangeRequest::ResizeCell { cell_id, height } => {
            let previous = graph.resize_cell(*cell_id, *height)?;
            outcome.record(
                Update::CellResized {
                    cell_id: *cell_id,
                    height: *height,
                },
                ChangeRequest::ResizeCell {
                    cell_id: *cell_id,
                    height: previous,
                },
            );
            Ok(request.clone())
        }

        ChangeRequest::InsertStroke {
            cell_id,
            stroke,
            index,
        } => {
            let index = graph.insert_stroke(*cell_id, stroke.clone(), *index)?;
            outcome.record(
                Update::StrokeInserted {
                    cell_id: *cell_id,
                    stroke: stroke.clone(),
                    index,
                },
                ChangeRequest::DeleteStroke {
                    cell_id: *cell_id,
                    stroke_id: stroke.id.clone(),
                },
            );
            Ok(request.clone())
        }

        ChangeRequest::DeleteStroke { cell_id, stroke_id } => {
            let (stroke, index) = graph.delete_stroke(*cell_id, stroke_id)?;
            outcome.record(
                Update::StrokeDeleted {
                    cell_id: *cell_id,
                    stroke_id: stroke_id.clone(),
                },
                ChangeRequest::InsertStroke {
                    cell_id: *cell_id,
                    stroke,
                    index: Some(index),
                },
            );
            Ok(request.clone())
        }

        ChangeRequest::InsertStyle {
            id,
            cell_id,
            parent_id,
            role,
            source,
            data,
        } => {
            let id = graph.claim_id(*id)?;
            let style = Style {
                id,
                cell_id: *cell_id,
                parent_id: *parent_id,
                role: *role,
                source: *source,
                data: data.clone(),
            };
            graph.insert_style(style.clone())?;
            outcome.record(
                Update::StyleInserted { style },
                ChangeRequest::DeleteStyle { style_id: id },
            );
            Ok(request.pinned(id))
        }

        ChangeRequest::ChangeStyle { style_id, data } => {
            let previous = graph.change_style(*style_id, data.clone())?;
            let style = graph.require_style(*style_id)?.clone();
            outcome.record(
                Update::StyleChanged {
                    style,
                    previous: previous.clone(),
                },
                ChangeRequest::ChangeStyle {
                    style_id: *style_id,
                    data: previous,
                },
            );
            Ok(request.clone())
        }

        ChangeRequest::DeleteStyle { style_id } => {
            graph.require_style(*style_id)?;
            delete_dependents(graph, *style_id, outcome)?;
            let style = graph.delete_style(*style_id)?;
            outcome.record(
                Update::StyleDeleted {
                    style: style.clone(),
                },
                ChangeRequest::restore_style(&style),
            );
            Ok(request.clone())
        }

        ChangeRequest::InsertRelationship {
            id,
            from,
            to,
            role,
            source,
            data,
        } => {
            let id = graph.claim_id(*id)?;
            let relationship = Relationship {
                id,
                from: *from,
                to: *to,
                role: *role,
                source: *source,
                data: data.clone(),
            };
            graph.insert_relationship(relationship.clone())?;
            outcome.record(
                Update::RelationshipInserted { relationship },
                ChangeRequest::DeleteRelationship {
                    relationship_id: id,
                },
            );
            Ok(request.pinned(id))
        }

        ChangeRequest::DeleteRelationship { relationship_id } => {
            let relationship = graph.delete_relationship(*relationship_id)?;
            outcome.record(
                Update::RelationshipDeleted {
                    relationship: relationship.clone(),
                },
                ChangeRequest::restore_relationship(&relationship),
            );
            Ok(request.clone())
        }
    }
}

fn insert_cell(
    graph: &mut Graph,
    cell: Cell,
    after: Position,
    outcome: &mut ApplyOutcome,
) -> Result<(), GraphError> {
    let id = cell.id;
    graph.insert_cell(cell.clone(), after)?;
    let after = graph.position_before(id)?;
    outcome.record(
        Update::CellInserted { cell, after },
        ChangeRequest::DeleteCell { cell_id: id },
    );
    Ok(())
}

/// Delete everything hanging from `id`: relationships touching the subtree,
/// then descendant styles deepest-first. `id` itself is left in place.
fn delete_dependents(
    graph: &mut Graph,
    id: NodeId,
    outcome: &mut ApplyOutcome,
) -> Result<(), GraphError> {
    let descendants = graph.descendants_of(id);

    let mut subtree = descendants.clone();
    subtree.push(id);
    let relationships: Vec<NodeId> = graph
        .relationships_touching(&subtree)
        .iter()
        .map(|r| r.id)
        .collect();

    for rel_id in relationships {
        let relationship = graph.delete_relationship(rel_id)?;
        outcome.record(
            Update::RelationshipDeleted {
                relationship: relationship.clone(),
            },
            ChangeRequest::restore_relationship(&relationship),
        );
    }

    for style_id in descendants {
        let style = graph.delete_style(style_id)?;
        outcome.record(
            Update::StyleDeleted {
                style: style.clone(),
            },
            ChangeRequest::restore_style(&style),
        );
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::updates::UpdateEvent;

    fn formula(cell_id: NodeId, text: &str) -> ChangeRequest {
        ChangeRequest::InsertStyle {
            id: None,
            cell_id,
            parent_id: None,
            role: StyleRole::Input,
            source: Source::User,
            data: StyleData::Formula(text.to_string()),
        }
    }

    #[test]
    fn test_insert_cell_produces_update_and_inverse() {
        let mut graph = Graph::new();
        let outcome = apply_batch(
            &mut graph,
            &[ChangeRequest::InsertEmptyCell {
                cell_type: CellType::Formula,
                after: Position::Top,
                id: None,
            }],
        )
        .unwrap();

        assert_eq!(outcome.updates.len(), 1);
        assert_eq!(outcome.updates[0].event(), UpdateEvent::CellInserted);
        assert_eq!(
            outcome.undo_requests,
            vec![ChangeRequest::DeleteCell { cell_id: NodeId(1) }]
        );
        assert_eq!(
            outcome.redo_requests,
            vec![ChangeRequest::InsertEmptyCell {
                cell_type: CellType::Formula,
                after: Position::Top,
                id: Some(NodeId(1)),
            }]
        );
    }

    #[test]
    fn test_inverses_are_prepended() {
        let mut graph = Graph::new();
        let outcome = apply_batch(
            &mut graph,
            &[
                ChangeRequest::InsertEmptyCell {
                    cell_type: CellType::Text,
                    after: Position::Bottom,
                    id: None,
                },
                ChangeRequest::ResizeCell {
                    cell_id: NodeId(1),
                    height: 100.0,
                },
            ],
        )
        .unwrap();

        assert_eq!(
            outcome.undo_requests,
            vec![
                ChangeRequest::ResizeCell {
                    cell_id: NodeId(1),
                    height: CellType::Text.default_height(),
                },
                ChangeRequest::DeleteCell { cell_id: NodeId(1) },
            ]
        );

        apply_batch(&mut graph, &outcome.undo_requests).unwrap();
        assert_eq!(graph.cell_count(), 0);
    }

    #[test]
    fn test_delete_cell_cascades_and_undo_restores_ids() {
        let mut graph = Graph::new();
        let cell = NodeId(1);
        apply_batch(
            &mut graph,
            &[ChangeRequest::InsertEmptyCell {
                cell_type: CellType::Formula,
                after: Position::Bottom,
                id: None,
            }],
        )
        .unwrap();
        apply_batch(&mut graph, &[formula(cell, "x = 3"), formula(cell, "x + 1")]).unwrap();
        apply_batch(
            &mut graph,
            &[ChangeRequest::InsertStyle {
                id: None,
                cell_id: cell,
                parent_id: Some(NodeId(2)),
                role: StyleRole::Symbol,
                source: Source::User,
                data: StyleData::SymbolDefinition {
                    name: "x".into(),
                    value: "3".into(),
                },
            }],
        )
        .unwrap();
        apply_batch(
            &mut graph,
            &[ChangeRequest::InsertRelationship {
                id: None,
                from: NodeId(4),
                to: NodeId(3),
                role: RelationshipRole::SymbolDependency,
                source: Source::User,
                data: RelationshipData::Symbol { name: "x".into() },
            }],
        )
        .unwrap();
        let before = graph.clone();

        let outcome =
            apply_batch(&mut graph, &[ChangeRequest::DeleteCell { cell_id: cell }]).unwrap();

        let events: Vec<UpdateEvent> = outcome.updates.iter().map(Update::event).collect();
        assert_eq!(
            events,
            vec![
                UpdateEvent::RelationshipDeleted,
                UpdateEvent::StyleDeleted,
                UpdateEvent::StyleDeleted,
                UpdateEvent::StyleDeleted,
                UpdateEvent::CellDeleted,
            ]
        );
        // Nested symbol style goes before its parent
        assert_eq!(outcome.updates[1].subject(), NodeId(4));
        assert_eq!(graph.cell_count(), 0);
        graph.check_integrity().unwrap();

        apply_batch(&mut graph, &outcome.undo_requests).unwrap();
        assert_eq!(graph, before);
    }

    #[test]
    fn test_failed_batch_rolls_back() {
        let mut graph = Graph::new();
        apply_batch(
            &mut graph,
            &[ChangeRequest::InsertEmptyCell {
                cell_type: CellType::Formula,
                after: Position::Bottom,
                id: None,
            }],
        )
        .unwrap();
        let before = graph.clone();

        let result = apply_batch(
            &mut graph,
            &[
                formula(NodeId(1), "y"),
                ChangeRequest::ResizeCell {
                    cell_id: NodeId(1),
                    height: 10.0,
                },
                ChangeRequest::DeleteCell { cell_id: NodeId(42) },
            ],
        );

        assert_eq!(
            result,
            Err(MutationError::Rejected {
                index: 2,
                error: GraphError::NotFound(NodeId(42)),
            })
        );
        assert_eq!(graph, before);
    }

    #[test]
    fn test_stroke_undo_restores_order() {
        let mut graph = Graph::new();
        let cell = NodeId(1);
        apply_batch(
            &mut graph,
            &[
                ChangeRequest::InsertEmptyCell {
                    cell_type: CellType::Figure,
                    after: Position::Bottom,
                    id: None,
                },
                ChangeRequest::InsertStroke {
                    cell_id: cell,
                    stroke: Stroke::new("a", "M0 0L1 1"),
                    index: None,
                },
                ChangeRequest::InsertStroke {
                    cell_id: cell,
                    stroke: Stroke::new("b", "M1 1L2 2"),
                    index: None,
                },
            ],
        )
        .unwrap();
        let before = graph.clone();

        let outcome = apply_batch(
            &mut graph,
            &[ChangeRequest::DeleteStroke {
                cell_id: cell,
                stroke_id: "a".into(),
            }],
        )
        .unwrap();
        apply_batch(&mut graph, &outcome.undo_requests).unwrap();

        assert_eq!(graph, before);
    }

    #[test]
    fn test_change_request_wire_format() {
        let json = serde_json::json!({
            "type": "insertEmptyCell",
            "cellType": "formula",
            "after": "top"
        });
        let request: ChangeRequest = serde_json::from_value(json).unwrap();
        assert_eq!(
            request,
            ChangeRequest::InsertEmptyCell {
                cell_type: CellType::Formula,
                after: Position::Top,
                id: None,
            }
        );

        let json = serde_json::to_value(ChangeRequest::MoveCell {
            cell_id: NodeId(3),
            after: Position::After(NodeId(1)),
        })
        .unwrap();
        assert_eq!(json["type"], "moveCell");
        assert_eq!(json["cellId"], 3);
        assert_eq!(json["after"], 1);
    }
}
