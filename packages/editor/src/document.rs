//! # Document Handle
//!
//! One notebook: its graph, page layout and backing storage.
//!
//! Documents can be:
//! - **Memory-backed**: temporary, for tests or scratch notebooks
//! - **File-backed**: persisted after every successful batch
//!
//! ## Lifecycle
//!
//! ```text
//! Load → Apply → Apply → ... → Save
//!   ↓      ↓                     ↓
//! File   Graph (+ updates)      File
//! ```
//!
//! A batch whose rollback fails *poisons* the document: every later
//! [`Document::apply`] is refused until the document is reloaded.

use crate::errors::EditorError;
use crate::graph::Graph;
use crate::model::{Cell, NodeId, Relationship, Source, Style};
use crate::mutations::{apply_batch, ApplyOutcome, ChangeRequest, MutationError};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Persisted format version; files with any other version are refused
pub const FORMAT_VERSION: u32 = 3;

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Margins {
    pub top: f64,
    pub right: f64,
    pub bottom: f64,
    pub left: f64,
}

impl Default for Margins {
    fn default() -> Self {
        Self {
            top: 72.0,
            right: 72.0,
            bottom: 72.0,
            left: 72.0,
        }
    }
}

/// Page dimensions in CSS pixels (US letter by default)
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PageSize {
    pub width: f64,
    pub height: f64,
}

impl Default for PageSize {
    fn default() -> Self {
        Self {
            width: 816.0,
            height: 1056.0,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct PageLayout {
    pub margins: Margins,
    pub page_size: PageSize,
    /// First cell of each page after the first
    pub pagination: Vec<NodeId>,
}

/// Storage backend for a document
#[derive(Debug, Clone, PartialEq)]
pub enum DocumentStorage {
    Memory,
    File { dirty: bool },
}

#[derive(Debug)]
pub struct Document {
    pub path: PathBuf,

    /// Increments on every applied batch
    pub version: u64,

    graph: Graph,
    layout: PageLayout,
    storage: DocumentStorage,
    poisoned: Option<String>,
}

#[derive(Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct NotebookFile {
    format_version: u32,
    next_id: u64,
    cells: Vec<CellObject>,
    #[serde(default)]
    relationships: Vec<Relationship>,
    #[serde(flatten)]
    layout: PageLayout,
}

#[derive(Serialize, Deserialize)]
struct CellObject {
    #[serde(flatten)]
    cell: Cell,
    #[serde(default)]
    styles: Vec<Style>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct VersionHeader {
    format_version: u32,
}

impl Document {
    /// Empty memory-backed document
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self::from_graph(path, Graph::new())
    }

    /// Memory-backed document over an existing graph
    pub fn from_graph(path: impl Into<PathBuf>, graph: Graph) -> Self {
        Self {
            path: path.into(),
            version: 0,
            graph,
            layout: PageLayout::default(),
            storage: DocumentStorage::Memory,
            poisoned: None,
        }
    }

    /// Parse a persisted notebook (memory-backed)
    pub fn from_json(path: impl Into<PathBuf>, json: &str) -> Result<Self, EditorError> {
        let header: VersionHeader = serde_json::from_str(json)?;
        if header.format_version != FORMAT_VERSION {
            return Err(EditorError::FormatVersion {
                expected: FORMAT_VERSION,
                found: header.format_version,
            });
        }

        let file: NotebookFile = serde_json::from_str(json)?;
        let mut cells = Vec::with_capacity(file.cells.len());
        let mut styles = Vec::new();
        for object in file.cells {
            cells.push(object.cell);
            styles.extend(object.styles);
        }
        let graph = Graph::from_parts(file.next_id, cells, styles, file.relationships)?;

        let mut document = Self::from_graph(path, graph);
        document.layout = file.layout;
        Ok(document)
    }

    /// Load a notebook from disk (file-backed)
    pub fn load(path: impl Into<PathBuf>) -> Result<Self, EditorError> {
        let path = path.into();
        let json = std::fs::read_to_string(&path)?;
        let mut document = Self::from_json(path, &json)?;
        document.storage = DocumentStorage::File { dirty: false };
        Ok(document)
    }

    /// Load from disk, or start an empty file-backed notebook at `path`
    pub fn open_or_create(path: impl Into<PathBuf>) -> Result<Self, EditorError> {
        let path = path.into();
        if path.exists() {
            return Self::load(path);
        }
        let mut document = Self::new(path);
        document.storage = DocumentStorage::File { dirty: true };
        Ok(document)
    }

    pub fn graph(&self) -> &Graph {
        &self.graph
    }

    pub fn layout(&self) -> &PageLayout {
        &self.layout
    }

    pub fn storage(&self) -> &DocumentStorage {
        &self.storage
    }

    pub fn is_poisoned(&self) -> bool {
        self.poisoned.is_some()
    }

    /// Apply a batch atomically and persist the result.
    ///
    /// A clean rollback leaves the document untouched and returns the
    /// rejection; a failed rollback poisons the document.
    pub fn apply(
        &mut self,
        source: Source,
        requests: &[ChangeRequest],
    ) -> Result<ApplyOutcome, EditorError> {
        if let Some(reason) = &self.poisoned {
            return Err(EditorError::Poisoned(reason.clone()));
        }

        let outcome = match apply_batch(&mut self.graph, requests) {
            Ok(outcome) => outcome,
            Err(error @ MutationError::RollbackFailed { .. }) => {
                tracing::error!(
                    path = %self.path.display(),
                    error = %error,
                    "rollback failed, document poisoned"
                );
                self.poisoned = Some(error.to_string());
                return Err(error.into());
            }
            Err(error) => return Err(error.into()),
        };

        if outcome.is_empty() {
            return Ok(outcome);
        }

        let previous_layout = self.layout.clone();
        self.version += 1;
        let graph = &self.graph;
        self.layout.pagination.retain(|id| graph.cell(*id).is_some());

        tracing::debug!(
            path = %self.path.display(),
            ?source,
            version = self.version,
            updates = outcome.updates.len(),
            "batch applied"
        );

        if let DocumentStorage::File { dirty } = &mut self.storage {
            let was_dirty = std::mem::replace(dirty, true);
            // Nothing is acknowledged that is not on disk
            if let Err(error) = self.save() {
                tracing::error!(
                    path = %self.path.display(),
                    error = %error,
                    "failed to persist notebook, reverting batch"
                );
                self.revert(&outcome, previous_layout, was_dirty)?;
                return Err(error);
            }
        }

        Ok(outcome)
    }

    /// Undo an applied batch whose result could not be persisted
    fn revert(
        &mut self,
        outcome: &ApplyOutcome,
        layout: PageLayout,
        was_dirty: bool,
    ) -> Result<(), EditorError> {
        if let Err(error) = apply_batch(&mut self.graph, &outcome.undo_requests) {
            tracing::error!(
                path = %self.path.display(),
                error = %error,
                "revert after failed save did not apply, document poisoned"
            );
            self.poisoned = Some(error.to_string());
            return Err(EditorError::Poisoned(error.to_string()));
        }
        self.version -= 1;
        self.layout = layout;
        self.storage = DocumentStorage::File { dirty: was_dirty };
        Ok(())
    }

    /// Check if document has unsaved changes
    pub fn is_dirty(&self) -> bool {
        matches!(self.storage, DocumentStorage::File { dirty: true })
    }

    /// Serialize to the persisted format
    pub fn to_json(&self) -> Result<String, EditorError> {
        let cells = self
            .graph
            .cells()
            .map(|cell| CellObject {
                cell: cell.clone(),
                styles: self
                    .graph
                    .styles()
                    .filter(|style| style.cell_id == cell.id)
                    .cloned()
                    .collect(),
            })
            .collect();

        let file = NotebookFile {
            format_version: FORMAT_VERSION,
            next_id: self.graph.next_id(),
            cells,
            relationships: self.graph.relationships().cloned().collect(),
            layout: self.layout.clone(),
        };
        Ok(serde_json::to_string_pretty(&file)?)
    }

    /// Save document to disk (if file-backed)
    pub fn save(&mut self) -> Result<(), EditorError> {
        let json = self.to_json()?;
        match &mut self.storage {
            DocumentStorage::File { dirty } => {
                write_atomically(&self.path, &json)?;
                *dirty = false;
                Ok(())
            }
            DocumentStorage::Memory => Err(EditorError::NotFileBacked),
        }
    }
}

fn write_atomically(path: &Path, contents: &str) -> std::io::Result<()> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent)?;
        }
    }
    let staging = path.with_extension("tmp");
    std::fs::write(&staging, contents)?;
    std::fs::rename(&staging, path)
}
