//! # Undo/Redo Stack
//!
//! Client-side history of confirmed edits.
//!
//! ## Design
//!
//! - Each entry pairs the forward requests with the server-provided inverse
//! - A pointer separates done entries from undone ones, so redo survives
//!   any number of undos
//! - A new entry truncates everything past the pointer
//! - Affordances follow the pointer: `0` means no undo, `len` means no redo
//!
//! ```text
//! entries: [ e0 | e1 | e2 | e3 ]
//!                      ^ pointer = 2
//! undo → sends e1.inverse, pointer = 1
//! redo → sends e2.forward, pointer = 3
//! ```

use crate::mutations::ChangeRequest;

/// One undoable step: a submitted batch and its inverse
#[derive(Debug, Clone, PartialEq)]
pub struct UndoEntry {
    /// Requests that redo the step (ids pinned by the server)
    pub forward: Vec<ChangeRequest>,

    /// Requests that revert the step, in replay order
    pub inverse: Vec<ChangeRequest>,

    pub description: Option<String>,
}

impl UndoEntry {
    pub fn new(forward: Vec<ChangeRequest>, inverse: Vec<ChangeRequest>) -> Self {
        Self {
            forward,
            inverse,
            description: None,
        }
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }
}

#[derive(Debug)]
pub struct UndoStack {
    entries: Vec<UndoEntry>,

    /// Number of entries currently applied
    pointer: usize,

    /// Maximum number of undo levels (0 = unlimited)
    max_levels: usize,
}

impl UndoStack {
    /// Create a new undo stack with default max levels (100)
    pub fn new() -> Self {
        Self::with_max_levels(100)
    }

    pub fn with_max_levels(max_levels: usize) -> Self {
        Self {
            entries: Vec::new(),
            pointer: 0,
            max_levels,
        }
    }

    /// Record a confirmed edit, discarding the redo tail
    pub fn push(&mut self, entry: UndoEntry) {
        self.entries.truncate(self.pointer);
        self.entries.push(entry);

        if self.max_levels > 0 && self.entries.len() > self.max_levels {
            let excess = self.entries.len() - self.max_levels;
            self.entries.drain(..excess);
        }
        self.pointer = self.entries.len();
    }

    /// Step back; returns the entry whose `inverse` must be sent
    pub fn undo(&mut self) -> Option<&UndoEntry> {
        if !self.can_undo() {
            return None;
        }
        self.pointer -= 1;
        self.entries.get(self.pointer)
    }

    /// Step forward; returns the entry whose `forward` must be sent
    pub fn redo(&mut self) -> Option<&UndoEntry> {
        if !self.can_redo() {
            return None;
        }
        self.pointer += 1;
        self.entries.get(self.pointer - 1)
    }

    /// Revert an [`UndoStack::undo`] whose requests the server refused
    pub fn cancel_undo(&mut self) {
        if self.pointer < self.entries.len() {
            self.pointer += 1;
        }
    }

    /// Revert an [`UndoStack::redo`] whose requests the server refused
    pub fn cancel_redo(&mut self) {
        self.pointer = self.pointer.saturating_sub(1);
    }

    pub fn can_undo(&self) -> bool {
        self.pointer > 0
    }

    pub fn can_redo(&self) -> bool {
        self.pointer < self.entries.len()
    }

    pub fn pointer(&self) -> usize {
        self.pointer
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn clear(&mut self) {
        self.entries.clear();
        self.pointer = 0;
    }

    /// Get description of the next undo operation
    pub fn undo_description(&self) -> Option<&str> {
        self.pointer
            .checked_sub(1)
            .and_then(|index| self.entries.get(index))
            .and_then(|entry| entry.description.as_deref())
    }

    /// Get description of the next redo operation
    pub fn redo_description(&self) -> Option<&str> {
        self.entries
            .get(self.pointer)
            .and_then(|entry| entry.description.as_deref())
    }
}

impl Default for UndoStack {
    fn default() -> Self {
        Self::new()
    }
}
