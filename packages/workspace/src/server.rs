//! # Workspace Server
//!
//! Composition root: builds the rule registry (with external collaborators
//! from config) and the document registry, and hands out one [`Connection`]
//! per viewer.
//!
//! ```text
//! transport ──ClientMessage──▶ Connection ──▶ DocumentRegistry ──▶ worker
//!     ▲                                                              │
//!     └────────────── ServerMessage (outbox receiver) ◀──────────────┘
//! ```
//!
//! Request failures never close a connection; they come back as `error`
//! envelopes carrying the request id.

use crate::cas::FramedProcess;
use crate::config::ServerConfig;
use crate::errors::WorkspaceError;
use crate::messages::{ClientMessage, ServerMessage};
use crate::state::DocumentRegistry;
use crate::worker::{Outbox, SessionId};
use notebook_editor::rules::{EvaluatorRule, TypesetterRule};
use notebook_editor::{ErrorKind, RuleRegistry};
use std::collections::BTreeSet;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc;

#[derive(Clone)]
pub struct WorkspaceServer {
    registry: Arc<DocumentRegistry>,
    next_session: Arc<AtomicU64>,
}

impl WorkspaceServer {
    /// Build from config, starting any configured collaborator processes
    pub fn new(config: ServerConfig) -> Result<Self, WorkspaceError> {
        let mut rules = RuleRegistry::new();
        if let Some(command) = &config.typesetter {
            let process = Arc::new(FramedProcess::spawn(command)?);
            rules.add_rule(TypesetterRule::new(process));
        }
        if let Some(command) = &config.cas {
            let process = Arc::new(FramedProcess::spawn(command)?);
            rules.add_rule(EvaluatorRule::new(process));
        }
        Ok(Self::with_rules(config, rules))
    }

    pub fn with_rules(config: ServerConfig, rules: RuleRegistry) -> Self {
        tracing::info!(
            root = %config.root_dir.display(),
            rules = ?rules,
            persist = config.persist,
            "workspace server ready"
        );
        Self {
            registry: Arc::new(DocumentRegistry::new(config, rules)),
            next_session: Arc::new(AtomicU64::new(1)),
        }
    }

    pub fn registry(&self) -> &DocumentRegistry {
        &self.registry
    }

    /// Accept a viewer. Everything addressed to it arrives on the receiver.
    pub fn connect(&self) -> (Connection, mpsc::UnboundedReceiver<ServerMessage>) {
        let id = format!("session-{}", self.next_session.fetch_add(1, Ordering::Relaxed));
        let (outbox, inbox) = mpsc::unbounded_channel();
        tracing::debug!(session = %id, "viewer connected");
        let connection = Connection {
            id,
            registry: self.registry.clone(),
            outbox,
            open: BTreeSet::new(),
        };
        (connection, inbox)
    }
}

/// One viewer's view of the server. Dropping it closes every open notebook.
pub struct Connection {
    id: SessionId,
    registry: Arc<DocumentRegistry>,
    outbox: Outbox,
    open: BTreeSet<String>,
}

impl Connection {
    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn is_open(&self, path: &str) -> bool {
        self.open.contains(path)
    }

    /// Send a message straight to this viewer's outbox
    pub fn reply(&self, message: ServerMessage) {
        let _ = self.outbox.send(message);
    }

    /// Dispatch one message; failures are reported to this viewer
    pub fn handle(&mut self, message: ClientMessage) {
        let request_id = match &message {
            ClientMessage::Change { request_id, .. } => request_id.clone(),
            _ => None,
        };
        if let Err(error) = self.dispatch(message) {
            if error.kind() == ErrorKind::Structural {
                tracing::error!(session = %self.id, error = %error, "request failed");
            } else {
                tracing::debug!(session = %self.id, error = %error, "request refused");
            }
            let _ = self.outbox.send(ServerMessage::error(&error, request_id));
        }
    }

    fn dispatch(&mut self, message: ClientMessage) -> Result<(), WorkspaceError> {
        match message {
            ClientMessage::Open { path } => {
                if self.open.contains(&path) {
                    return Ok(());
                }
                self.registry.open(&path, &self.id, self.outbox.clone())?;
                self.open.insert(path);
            }
            ClientMessage::Close { path } => {
                if !self.open.remove(&path) {
                    return Err(WorkspaceError::NotOpen(path));
                }
                self.registry.close(&path, &self.id)?;
            }
            ClientMessage::Change {
                path,
                requests,
                request_id,
            } => {
                if !self.open.contains(&path) {
                    return Err(WorkspaceError::NotOpen(path));
                }
                let handle = self
                    .registry
                    .handle(&path)
                    .ok_or_else(|| WorkspaceError::WorkerGone(path.clone()))?;
                handle.submit(&self.id, request_id, requests)?;
            }
        }
        Ok(())
    }
}

impl Drop for Connection {
    fn drop(&mut self) {
        for path in std::mem::take(&mut self.open) {
            if let Err(error) = self.registry.close(&path, &self.id) {
                tracing::warn!(session = %self.id, path = %path, error = %error, "close on disconnect failed");
            }
        }
        tracing::debug!(session = %self.id, "viewer disconnected");
    }
}
