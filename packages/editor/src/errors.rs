//! Error types for the editor

use crate::graph::GraphError;
use crate::mutations::MutationError;
use crate::rules::RuleId;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// How an error should be surfaced
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum ErrorKind {
    /// Bad input from a viewer; reported back, not logged as a failure
    Expected,
    /// Invariant violation; aborts the operation loudly
    Structural,
    /// A collaborator or the filesystem misbehaved
    External,
}

#[derive(Error, Debug)]
pub enum EditorError {
    #[error("Graph error: {0}")]
    Graph(#[from] GraphError),

    #[error("Mutation error: {0}")]
    Mutation(#[from] MutationError),

    #[error("Rule cascade did not settle after {rounds} rounds (still firing: {rules:?})")]
    RuleCycle { rounds: usize, rules: Vec<RuleId> },

    #[error("Document is poisoned by an earlier failure: {0}")]
    Poisoned(String),

    #[error("Unsupported format version: expected {expected}, found {found}")]
    FormatVersion { expected: u32, found: u32 },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serde(#[from] serde_json::Error),

    #[error("Document is not file-backed")]
    NotFileBacked,
}

impl EditorError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            EditorError::Graph(error) => error.kind(),
            EditorError::Mutation(MutationError::Rejected { error, .. }) => error.kind(),
            EditorError::Mutation(MutationError::RollbackFailed { .. })
            | EditorError::RuleCycle { .. }
            | EditorError::Poisoned(_)
            | EditorError::FormatVersion { .. } => ErrorKind::Structural,
            EditorError::Io(_) | EditorError::Serde(_) => ErrorKind::External,
            EditorError::NotFileBacked => ErrorKind::Expected,
        }
    }
}

impl GraphError {
    /// Requests naming missing or wrong nodes are user errors; broken
    /// invariants are not.
    pub fn kind(&self) -> ErrorKind {
        match self {
            GraphError::NotFound(_)
            | GraphError::WouldOrphan { .. }
            | GraphError::WrongKind { .. }
            | GraphError::ForeignParent { .. }
            | GraphError::SelfPosition { .. }
            | GraphError::StrokeNotFound { .. }
            | GraphError::DuplicateStroke { .. } => ErrorKind::Expected,
            GraphError::Dangling { .. }
            | GraphError::IdCollision(_)
            | GraphError::Cycle(_)
            | GraphError::OrderMismatch => ErrorKind::Structural,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::NodeId;

    #[test]
    fn test_rejected_requests_are_expected() {
        let error = EditorError::from(MutationError::Rejected {
            index: 0,
            error: GraphError::NotFound(NodeId(9)),
        });
        assert_eq!(error.kind(), ErrorKind::Expected);
    }

    #[test]
    fn test_pinned_id_collision_is_structural() {
        let error = EditorError::from(MutationError::Rejected {
            index: 0,
            error: GraphError::IdCollision(NodeId(2)),
        });
        assert_eq!(error.kind(), ErrorKind::Structural);
    }
}
