//! # Client Mirror
//!
//! One viewer's local copy of a notebook.
//!
//! The mirror never mutates its graph speculatively: it sends change
//! requests and applies whatever updates the server broadcasts back. Every
//! update is applied idempotently by id, so a batch delivered twice (or an
//! update describing state the mirror already has) is harmless.
//!
//! ```text
//! edit(requests) ──▶ OutgoingRequest{requestId} ──▶ server
//!                                                     │
//! receive(batch part 1, complete=false) ◀─────────────┤
//! receive(batch part n, complete=true)  ◀─────────────┘
//!        └─▶ UndoStack::push({forward: redo, inverse: undo})
//! ```

use crate::document::Document;
use crate::errors::EditorError;
use crate::graph::{Graph, GraphError, GraphResult};
use crate::mutations::ChangeRequest;
use crate::undo_stack::{UndoEntry, UndoStack};
use crate::updates::{Update, UpdateBatch};
use std::collections::BTreeMap;

/// What an outstanding request was issued for
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PendingKind {
    Edit,
    /// Undo of the entry at this stack index
    Undo(usize),
    /// Redo of the entry at this stack index
    Redo(usize),
}

/// Request waiting for its final (`complete`) batch
#[derive(Debug, Clone)]
struct Pending {
    kind: PendingKind,
    /// At least one part has landed on the server
    landed: bool,
    undo_requests: Vec<ChangeRequest>,
    redo_requests: Vec<ChangeRequest>,
}

/// A change request ready to be sent to the server
#[derive(Debug, Clone, PartialEq)]
pub struct OutgoingRequest {
    pub request_id: String,
    pub requests: Vec<ChangeRequest>,
}

pub struct ClientMirror {
    client_id: String,
    graph: Graph,
    undo_stack: UndoStack,
    pending: BTreeMap<String, Pending>,
    counter: u64,
}

impl ClientMirror {
    pub fn new(client_id: impl Into<String>, graph: Graph) -> Self {
        Self {
            client_id: client_id.into(),
            graph,
            undo_stack: UndoStack::new(),
            pending: BTreeMap::new(),
            counter: 0,
        }
    }

    /// Start from the persisted form sent when the notebook was opened
    pub fn from_snapshot(client_id: impl Into<String>, json: &str) -> Result<Self, EditorError> {
        let document = Document::from_json("snapshot", json)?;
        Ok(Self::new(client_id, document.graph().clone()))
    }

    pub fn graph(&self) -> &Graph {
        &self.graph
    }

    pub fn undo_stack(&self) -> &UndoStack {
        &self.undo_stack
    }

    pub fn can_undo(&self) -> bool {
        self.undo_stack.can_undo()
    }

    pub fn can_redo(&self) -> bool {
        self.undo_stack.can_redo()
    }

    pub fn pending_count(&self) -> usize {
        self.pending.len()
    }

    /// Issue a user edit. Its undo entry is recorded once the server confirms.
    pub fn edit(&mut self, requests: Vec<ChangeRequest>) -> OutgoingRequest {
        self.issue(PendingKind::Edit, requests)
    }

    /// Send the inverse of the entry below the pointer
    pub fn undo(&mut self) -> Option<OutgoingRequest> {
        let index = self.undo_stack.pointer().checked_sub(1)?;
        let inverse = self.undo_stack.undo()?.inverse.clone();
        Some(self.issue(PendingKind::Undo(index), inverse))
    }

    /// Re-send the forward requests of the entry at the pointer
    pub fn redo(&mut self) -> Option<OutgoingRequest> {
        let index = self.undo_stack.pointer();
        let forward = self.undo_stack.redo()?.forward.clone();
        Some(self.issue(PendingKind::Redo(index), forward))
    }

    fn issue(&mut self, kind: PendingKind, requests: Vec<ChangeRequest>) -> OutgoingRequest {
        self.counter += 1;
        let request_id = format!("{}-{}", self.client_id, self.counter);
        self.pending.insert(
            request_id.clone(),
            Pending {
                kind,
                landed: false,
                undo_requests: Vec::new(),
                redo_requests: Vec::new(),
            },
        );
        OutgoingRequest {
            request_id,
            requests,
        }
    }

    /// Apply one broadcast batch part.
    ///
    /// Returns the kind of this mirror's own request when the part completes it.
    pub fn receive(&mut self, batch: &UpdateBatch) -> GraphResult<Option<PendingKind>> {
        for update in &batch.updates {
            apply_update(&mut self.graph, update)?;
        }

        let Some(request_id) = &batch.request_id else {
            return Ok(None);
        };
        let Some(pending) = self.pending.get_mut(request_id) else {
            return Ok(None);
        };

        pending.landed = true;
        // Later parts revert first, so their inverses go in front
        let mut undo = batch.undo_change_requests.clone();
        undo.append(&mut pending.undo_requests);
        pending.undo_requests = undo;
        pending.redo_requests.extend(batch.redo_change_requests.iter().cloned());

        if !batch.complete {
            return Ok(None);
        }

        let Some(pending) = self.pending.remove(request_id) else {
            return Ok(None);
        };
        let kind = pending.kind;
        self.record(pending);
        tracing::debug!(request_id = %request_id, kind = ?kind, "request confirmed");
        Ok(Some(kind))
    }

    /// The server reported an error for a request.
    ///
    /// A request refused outright is forgotten and the pointer restored. One
    /// that failed after some of its parts landed (a rule cascade that did
    /// not settle) stays applied, so it is recorded like a completed one.
    pub fn reject(&mut self, request_id: &str) -> Option<PendingKind> {
        let pending = self.pending.remove(request_id)?;
        let kind = pending.kind;
        if pending.landed {
            tracing::debug!(request_id, kind = ?kind, "request failed after partial application");
            self.record(pending);
            return Some(kind);
        }
        match kind {
            PendingKind::Edit => {}
            PendingKind::Undo(_) => self.undo_stack.cancel_undo(),
            PendingKind::Redo(_) => self.undo_stack.cancel_redo(),
        }
        tracing::debug!(request_id, kind = ?kind, "request rejected");
        Some(kind)
    }

    fn record(&mut self, pending: Pending) {
        if pending.kind == PendingKind::Edit && !pending.undo_requests.is_empty() {
            self.undo_stack
                .push(UndoEntry::new(pending.redo_requests, pending.undo_requests));
        }
    }
}

/// Apply one update to a mirror graph; re-applying the same update is a no-op
pub fn apply_update(graph: &mut Graph, update: &Update) -> GraphResult<()> {
    match update {
        Update::CellInserted { cell, after } => graph.upsert_cell(cell.clone(), *after),
        Update::CellDeleted { cell } => {
            graph.purge_cell(cell.id);
            Ok(())
        }
        Update::CellMoved { cell_id, after } => {
            if graph.cell(*cell_id).is_none() {
                return Err(GraphError::NotFound(*cell_id));
            }
            graph.move_cell(*cell_id, *after).map(|_| ())
        }
        Update::CellResized { cell_id, height } => graph.resize_cell(*cell_id, *height).map(|_| ()),
        Update::StrokeInserted {
            cell_id,
            stroke,
            index,
        } => {
            let cell = graph.require_cell(*cell_id)?;
            if cell.strokes.contains(&stroke.id) {
                return Ok(());
            }
            graph
                .insert_stroke(*cell_id, stroke.clone(), Some(*index))
                .map(|_| ())
        }
        Update::StrokeDeleted { cell_id, stroke_id } => {
            graph.purge_stroke(*cell_id, stroke_id);
            Ok(())
        }
        Update::StyleInserted { style } | Update::StyleChanged { style, .. } => {
            graph.upsert_style(style.clone())
        }
        Update::StyleDeleted { style } => {
            graph.purge_style(style.id);
            Ok(())
        }
        Update::RelationshipInserted { relationship } => {
            graph.upsert_relationship(relationship.clone())
        }
        Update::RelationshipDeleted { relationship } => {
            graph.purge_relationship(relationship.id);
            Ok(())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{CellType, NodeId, Position};
    use crate::mutations::apply_batch;

    fn insert_cell() -> ChangeRequest {
        ChangeRequest::InsertEmptyCell {
            cell_type: CellType::Text,
            after: Position::Top,
            id: None,
        }
    }

    /// Run a request on the authoritative graph and shape the reply
    fn serve(server: &mut Graph, request: &OutgoingRequest, complete: bool) -> UpdateBatch {
        let outcome = apply_batch(server, &request.requests).unwrap();
        UpdateBatch {
            updates: outcome.updates,
            undo_change_requests: outcome.undo_requests,
            redo_change_requests: outcome.redo_requests,
            complete,
            request_id: Some(request.request_id.clone()),
        }
    }

    #[test]
    fn test_edit_is_recorded_on_completion() {
        let mut server = Graph::new();
        let mut mirror = ClientMirror::new("c1", Graph::new());

        let request = mirror.edit(vec![insert_cell()]);
        assert_eq!(request.request_id, "c1-1");
        let mut batch = serve(&mut server, &request, false);

        assert_eq!(mirror.receive(&batch).unwrap(), None);
        assert!(!mirror.can_undo());

        batch.updates.clear();
        batch.undo_change_requests.clear();
        batch.redo_change_requests.clear();
        batch.complete = true;
        assert_eq!(mirror.receive(&batch).unwrap(), Some(PendingKind::Edit));
        assert!(mirror.can_undo());
        assert_eq!(mirror.graph(), &server);
        assert_eq!(mirror.pending_count(), 0);
    }

    #[test]
    fn test_update_application_is_idempotent() {
        let mut server = Graph::new();
        let mut mirror = ClientMirror::new("c1", Graph::new());
        let request = mirror.edit(vec![insert_cell()]);
        let batch = serve(&mut server, &request, true);

        mirror.receive(&batch).unwrap();
        let once = mirror.graph().clone();
        for update in &batch.updates {
            apply_update(&mut mirror.graph, update).unwrap();
        }
        assert_eq!(mirror.graph(), &once);
    }

    #[test]
    fn test_undo_and_redo_send_stored_requests() {
        let mut server = Graph::new();
        let mut mirror = ClientMirror::new("c1", Graph::new());
        let request = mirror.edit(vec![insert_cell()]);
        mirror.receive(&serve(&mut server, &request, true)).unwrap();

        let undo = mirror.undo().unwrap();
        assert_eq!(
            undo.requests,
            vec![ChangeRequest::DeleteCell { cell_id: NodeId(1) }]
        );
        assert!(!mirror.can_undo());
        mirror.receive(&serve(&mut server, &undo, true)).unwrap();
        assert_eq!(mirror.graph().cell_count(), 0);

        let redo = mirror.redo().unwrap();
        mirror.receive(&serve(&mut server, &redo, true)).unwrap();
        assert!(mirror.graph().cell(NodeId(1)).is_some());
        assert_eq!(mirror.undo_stack().len(), 1);
    }

    #[test]
    fn test_rejected_undo_restores_pointer() {
        let mut server = Graph::new();
        let mut mirror = ClientMirror::new("c1", Graph::new());
        let request = mirror.edit(vec![insert_cell()]);
        mirror.receive(&serve(&mut server, &request, true)).unwrap();

        let undo = mirror.undo().unwrap();
        assert_eq!(mirror.reject(&undo.request_id), Some(PendingKind::Undo(0)));
        assert!(mirror.can_undo());
        assert!(!mirror.can_redo());
        assert_eq!(mirror.reject("unknown"), None);
    }

    #[test]
    fn test_error_after_landed_part_keeps_edit() {
        let mut server = Graph::new();
        let mut mirror = ClientMirror::new("c1", Graph::new());

        let request = mirror.edit(vec![insert_cell()]);
        mirror.receive(&serve(&mut server, &request, false)).unwrap();
        assert_eq!(mirror.reject(&request.request_id), Some(PendingKind::Edit));
        assert_eq!(mirror.undo_stack().len(), 1);
        assert_eq!(mirror.pending_count(), 0);

        // An undo whose first part landed is not cancelled either
        let undo = mirror.undo().unwrap();
        mirror.receive(&serve(&mut server, &undo, false)).unwrap();
        assert_eq!(mirror.reject(&undo.request_id), Some(PendingKind::Undo(0)));
        assert!(!mirror.can_undo());
        assert!(mirror.can_redo());
        assert_eq!(mirror.graph().cell_count(), 0);
    }

    #[test]
    fn test_foreign_batches_only_update_the_graph() {
        let mut server = Graph::new();
        let mut mirror = ClientMirror::new("c1", Graph::new());
        let mut other = ClientMirror::new("c2", Graph::new());

        let request = other.edit(vec![insert_cell()]);
        let mut batch = serve(&mut server, &request, true);
        batch.request_id = None;

        assert_eq!(mirror.receive(&batch).unwrap(), None);
        assert_eq!(mirror.graph(), &server);
        assert!(!mirror.can_undo());
    }
}
