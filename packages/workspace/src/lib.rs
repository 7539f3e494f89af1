//! # Notebook Workspace
//!
//! Synchronization layer: routes viewer messages to per-document workers and
//! fans applied batches back out to every viewer of the notebook.

pub mod cas;
pub mod config;
pub mod errors;
pub mod messages;
pub mod server;
pub mod state;
pub mod worker;

pub use cas::FramedProcess;
pub use config::{CommandConfig, ServerConfig, CONFIG_FILE};
pub use errors::WorkspaceError;
pub use messages::{ClientMessage, CollaboratorEvent, NotebookEvent, ServerMessage};
pub use server::{Connection, WorkspaceServer};
pub use state::{DocumentHandle, DocumentRegistry};
pub use worker::{Outbox, SessionId};
