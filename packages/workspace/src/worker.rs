//! # Document Worker
//!
//! One task per open notebook. It owns the [`Pipeline`] and drains a FIFO
//! command queue, so submissions to a notebook are applied strictly one
//! after another and a submission's rule rounds all land before the next
//! submission starts.
//!
//! ```text
//! sessions ──▶ Command queue ──▶ worker ──▶ Pipeline::submit
//!                                  │
//!                                  └──▶ every round ──▶ all session outboxes
//! ```

use crate::errors::WorkspaceError;
use crate::messages::{CollaboratorEvent, NotebookEvent, ServerMessage};
use notebook_editor::{AppliedBatch, ChangeRequest, ErrorKind, Pipeline, Source};
use std::collections::BTreeMap;
use tokio::sync::mpsc;

pub type SessionId = String;

/// Messages addressed to one session
pub type Outbox = mpsc::UnboundedSender<ServerMessage>;

#[derive(Debug)]
pub(crate) enum Command {
    Join {
        session: SessionId,
        outbox: Outbox,
    },
    Leave {
        session: SessionId,
    },
    Submit {
        session: SessionId,
        request_id: Option<String>,
        requests: Vec<ChangeRequest>,
    },
    /// Stop unless a viewer rejoined after the close that queued this
    Shutdown,
}

struct Worker {
    path: String,
    pipeline: Pipeline,
    sessions: BTreeMap<SessionId, Outbox>,
    retire: Box<dyn Fn() -> bool + Send>,
}

/// Start the worker task for `path`. On `Shutdown` the worker calls `retire`
/// and stops only if it returns true.
pub(crate) fn spawn(
    path: String,
    pipeline: Pipeline,
    retire: impl Fn() -> bool + Send + 'static,
) -> mpsc::UnboundedSender<Command> {
    let (commands, queue) = mpsc::unbounded_channel();
    let worker = Worker {
        path,
        pipeline,
        sessions: BTreeMap::new(),
        retire: Box::new(retire),
    };
    tokio::spawn(worker.run(queue));
    commands
}

impl Worker {
    async fn run(mut self, mut queue: mpsc::UnboundedReceiver<Command>) {
        tracing::debug!(path = %self.path, "document worker started");

        while let Some(command) = queue.recv().await {
            match command {
                Command::Join { session, outbox } => self.join(session, outbox),
                Command::Leave { session } => self.leave(&session),
                Command::Submit {
                    session,
                    request_id,
                    requests,
                } => self.submit(&session, request_id, &requests).await,
                Command::Shutdown => {
                    if (self.retire)() {
                        break;
                    }
                    tracing::debug!(path = %self.path, "reopened while closing, still serving");
                }
            }
        }

        tracing::debug!(path = %self.path, "document worker stopped");
    }

    fn join(&mut self, session: SessionId, outbox: Outbox) {
        let document = self.pipeline.document();
        let opened: Result<serde_json::Value, WorkspaceError> = document
            .to_json()
            .map_err(WorkspaceError::from)
            .and_then(|json| Ok(serde_json::from_str(&json)?));
        let message = match opened {
            Ok(snapshot) => ServerMessage::Notebook(NotebookEvent::Opened {
                path: self.path.clone(),
                version: document.version,
                document: snapshot,
            }),
            Err(error) => ServerMessage::error(&error, None),
        };
        let _ = outbox.send(message);

        self.broadcast_except(
            &session,
            ServerMessage::Collaborator(CollaboratorEvent::Connected {
                path: self.path.clone(),
                session_id: session.clone(),
            }),
        );
        tracing::info!(path = %self.path, session = %session, "session joined");
        self.sessions.insert(session, outbox);
    }

    fn leave(&mut self, session: &str) {
        let Some(outbox) = self.sessions.remove(session) else {
            return;
        };
        let _ = outbox.send(ServerMessage::Notebook(NotebookEvent::Closed {
            path: self.path.clone(),
        }));
        self.broadcast_except(
            session,
            ServerMessage::Collaborator(CollaboratorEvent::Disconnected {
                path: self.path.clone(),
                session_id: session.to_string(),
            }),
        );
        tracing::info!(path = %self.path, session, "session left");
    }

    async fn submit(
        &mut self,
        session: &str,
        request_id: Option<String>,
        requests: &[ChangeRequest],
    ) {
        let Worker {
            path,
            pipeline,
            sessions,
            ..
        } = self;
        let path = path.as_str();
        let sessions = &*sessions;

        let result = pipeline
            .submit(Source::User, requests, |applied| {
                fan_out(path, sessions, session, request_id.as_deref(), &applied)
            })
            .await;

        match result {
            Ok(report) => {
                tracing::debug!(
                    path = %path,
                    session,
                    request_id = ?request_id,
                    rounds = report.rounds,
                    "submission settled"
                );
            }
            Err(error) => {
                let error = WorkspaceError::from(error);
                if error.kind() == ErrorKind::Structural {
                    tracing::error!(path = %path, session, error = %error, "submission failed");
                } else {
                    tracing::debug!(path = %path, session, error = %error, "submission rejected");
                }
                if let Some(outbox) = sessions.get(session) {
                    let _ = outbox.send(ServerMessage::error(&error, request_id));
                }
            }
        }
    }

    fn broadcast_except(&self, excluded: &str, message: ServerMessage) {
        for (id, outbox) in &self.sessions {
            if id != excluded {
                let _ = outbox.send(message.clone());
            }
        }
    }
}

/// Send one applied round to every session; only the originator's copy is
/// correlated with its request id.
fn fan_out(
    path: &str,
    sessions: &BTreeMap<SessionId, Outbox>,
    originator: &str,
    request_id: Option<&str>,
    applied: &AppliedBatch,
) {
    let timestamp = chrono::Utc::now().timestamp_millis();
    for (id, outbox) in sessions {
        let correlated = if id == originator {
            request_id.map(str::to_string)
        } else {
            None
        };
        let message = ServerMessage::Notebook(NotebookEvent::Updated {
            path: path.to_string(),
            batch: applied.clone().into_update_batch(correlated),
            timestamp,
        });
        if outbox.send(message).is_err() {
            tracing::debug!(path, session = %id, "outbox closed, dropping update");
        }
    }
}
