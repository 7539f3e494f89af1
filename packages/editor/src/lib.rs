//! # Notebook Editor
//!
//! Core change-propagation engine for collaborative math notebooks.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────┐
//! │ graph: cells, styles, relationships         │
//! └─────────────────────────────────────────────┘
//!                     ↑
//! ┌─────────────────────────────────────────────┐
//! │ mutations: change requests → updates + undo │
//! │  - atomic batches with rollback             │
//! │  - cascading deletes, pinned-id restore     │
//! └─────────────────────────────────────────────┘
//!                     ↑
//! ┌─────────────────────────────────────────────┐
//! │ pipeline: apply, then rule rounds until     │
//! │ nothing fires (rules/ + external/)          │
//! └─────────────────────────────────────────────┘
//!                     ↓
//! ┌─────────────────────────────────────────────┐
//! │ session: client mirror + undo stack         │
//! └─────────────────────────────────────────────┘
//! ```
//!
//! ## Core Principles
//!
//! 1. **Server authority**: clients only apply confirmed updates
//! 2. **Every change is explicit**: no implicit garbage collection; each
//!    deletion yields an update and an inverse
//! 3. **Rules are idempotent**: they reconcile against current state, so a
//!    rule may fire any number of times
//!
//! ## Usage
//!
//! ```rust,ignore
//! use notebook_editor::{ChangeRequest, CellType, Document, Pipeline, Position, RuleEngine, Source};
//!
//! let document = Document::open_or_create("notes.json")?;
//! let mut pipeline = Pipeline::new(document, RuleEngine::default());
//!
//! let request = ChangeRequest::InsertEmptyCell {
//!     cell_type: CellType::Formula,
//!     after: Position::Bottom,
//!     id: None,
//! };
//! pipeline
//!     .submit(Source::User, &[request], |batch| broadcast(batch))
//!     .await?;
//! ```

mod document;
mod errors;
mod graph;
mod model;
mod mutations;
mod pipeline;
mod session;
mod undo_stack;
mod updates;

pub mod external;
pub mod formula;
pub mod rules;

pub use document::{
    Document, DocumentStorage, Margins, PageLayout, PageSize, FORMAT_VERSION,
};
pub use errors::{EditorError, ErrorKind};
pub use graph::{Graph, GraphError, GraphResult, RelationshipPattern, StylePattern};
pub use model::{
    Cell, CellType, NodeId, NodeKind, NodeRef, Position, Relationship, RelationshipData,
    RelationshipRole, Source, Stroke, StrokeData, StrokeId, Style, StyleData, StyleRole,
    StyleType,
};
pub use mutations::{apply_batch, ApplyOutcome, ChangeRequest, MutationError};
pub use pipeline::{AppliedBatch, Pipeline, SubmitReport};
pub use rules::{Rule, RuleEngine, RuleEngineConfig, RuleId, RuleRegistry};
pub use session::{apply_update, ClientMirror, OutgoingRequest, PendingKind};
pub use undo_stack::{UndoEntry, UndoStack};
pub use updates::{Update, UpdateBatch, UpdateEvent};
