use notebook_editor::{EditorError, ErrorKind};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum WorkspaceError {
    #[error(transparent)]
    Editor(#[from] EditorError),

    #[error("Invalid config {path}: {message}")]
    Config { path: String, message: String },

    #[error("Path escapes the workspace root: {0}")]
    InvalidPath(String),

    #[error("Document {0} is not open in this session")]
    NotOpen(String),

    #[error("Worker for {0} has stopped")]
    WorkerGone(String),

    #[error("Failed to start collaborator {program}: {source}")]
    Spawn {
        program: String,
        #[source]
        source: std::io::Error,
    },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serde(#[from] serde_json::Error),
}

impl WorkspaceError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            WorkspaceError::Editor(error) => error.kind(),
            WorkspaceError::InvalidPath(_) | WorkspaceError::NotOpen(_) => ErrorKind::Expected,
            WorkspaceError::WorkerGone(_) => ErrorKind::Structural,
            WorkspaceError::Config { .. }
            | WorkspaceError::Spawn { .. }
            | WorkspaceError::Io(_)
            | WorkspaceError::Serde(_) => ErrorKind::External,
        }
    }
}
