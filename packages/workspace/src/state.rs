//! # Document Registry
//!
//! Maps notebook paths to their running workers. The lock only guards
//! open/close bookkeeping; loading and all document work happen outside it.
//!
//! ```text
//! open(path, s1)  → load + spawn worker, refs = {s1}
//! open(path, s2)  → refs = {s1, s2}
//! close(path, s1) → refs = {s2}
//! close(path, s2) → refs = {}, Shutdown queued
//! worker Shutdown → entry removed if refs still empty, else keeps serving
//! ```
//!
//! A notebook reopened before its worker drained the shutdown joins that
//! worker, so no submission queued ahead of the close can be lost to a
//! fresh load.

use crate::config::ServerConfig;
use crate::errors::WorkspaceError;
use crate::worker::{self, Command, Outbox, SessionId};
use notebook_editor::{ChangeRequest, Document, Pipeline, RuleEngine, RuleRegistry};
use parking_lot::Mutex;
use std::collections::{BTreeSet, HashMap};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use tokio::sync::mpsc;

/// Cheap handle for sending commands to one document's worker
#[derive(Debug, Clone)]
pub struct DocumentHandle {
    path: String,
    commands: mpsc::UnboundedSender<Command>,
}

impl DocumentHandle {
    pub fn path(&self) -> &str {
        &self.path
    }

    /// Queue a change submission behind everything already queued
    pub fn submit(
        &self,
        session: &str,
        request_id: Option<String>,
        requests: Vec<ChangeRequest>,
    ) -> Result<(), WorkspaceError> {
        self.send(Command::Submit {
            session: session.to_string(),
            request_id,
            requests,
        })
    }

    fn send(&self, command: Command) -> Result<(), WorkspaceError> {
        self.commands
            .send(command)
            .map_err(|_| WorkspaceError::WorkerGone(self.path.clone()))
    }
}

struct Entry {
    handle: DocumentHandle,
    generation: u64,
    /// Empty while the worker has a shutdown queued
    sessions: BTreeSet<SessionId>,
}

impl Entry {
    fn join(&mut self, session: &str, outbox: Outbox) -> Result<DocumentHandle, WorkspaceError> {
        if self.sessions.insert(session.to_string()) {
            self.handle.send(Command::Join {
                session: session.to_string(),
                outbox,
            })?;
        }
        Ok(self.handle.clone())
    }
}

type Documents = Mutex<HashMap<String, Entry>>;

pub struct DocumentRegistry {
    config: ServerConfig,
    rules: RuleRegistry,
    documents: Arc<Documents>,
    next_generation: AtomicU64,
}

impl DocumentRegistry {
    pub fn new(config: ServerConfig, rules: RuleRegistry) -> Self {
        Self {
            config,
            rules,
            documents: Arc::new(Mutex::new(HashMap::new())),
            next_generation: AtomicU64::new(1),
        }
    }

    pub fn config(&self) -> &ServerConfig {
        &self.config
    }

    /// Register `session` as a viewer of `path`, starting a worker if needed.
    ///
    /// The session receives the `opened` snapshot through `outbox`.
    pub fn open(
        &self,
        path: &str,
        session: &str,
        outbox: Outbox,
    ) -> Result<DocumentHandle, WorkspaceError> {
        if let Some(entry) = self.documents.lock().get_mut(path) {
            return entry.join(session, outbox);
        }
        let document = self.load(path)?;
        self.install(path, session, outbox, document)
    }

    /// Start a worker for a freshly loaded document, unless another open
    /// got there first while the lock was released.
    fn install(
        &self,
        path: &str,
        session: &str,
        outbox: Outbox,
        document: Document,
    ) -> Result<DocumentHandle, WorkspaceError> {
        let mut documents = self.documents.lock();
        if let Some(entry) = documents.get_mut(path) {
            tracing::debug!(path, "document opened concurrently, discarding load");
            return entry.join(session, outbox);
        }

        let generation = self.next_generation.fetch_add(1, Ordering::Relaxed);
        let engine = RuleEngine::new(self.rules.clone(), self.config.engine_config());
        let commands = worker::spawn(
            path.to_string(),
            Pipeline::new(document, engine),
            retirement(Arc::downgrade(&self.documents), path.to_string(), generation),
        );
        let mut entry = Entry {
            handle: DocumentHandle {
                path: path.to_string(),
                commands,
            },
            generation,
            sessions: BTreeSet::new(),
        };
        let handle = entry.join(session, outbox)?;

        tracing::info!(path, "document opened");
        documents.insert(path.to_string(), entry);
        Ok(handle)
    }

    /// Drop `session` from `path`; the last viewer out asks the worker to stop
    pub fn close(&self, path: &str, session: &str) -> Result<(), WorkspaceError> {
        let mut documents = self.documents.lock();
        let Some(entry) = documents.get_mut(path) else {
            return Err(WorkspaceError::NotOpen(path.to_string()));
        };
        if !entry.sessions.remove(session) {
            return Err(WorkspaceError::NotOpen(path.to_string()));
        }

        let _ = entry.handle.send(Command::Leave {
            session: session.to_string(),
        });
        if entry.sessions.is_empty() && entry.handle.send(Command::Shutdown).is_err() {
            // Worker is already gone; nothing left to retire the entry
            documents.remove(path);
        }
        Ok(())
    }

    /// Handle of a notebook with at least one viewer
    pub fn handle(&self, path: &str) -> Option<DocumentHandle> {
        self.documents
            .lock()
            .get(path)
            .filter(|e| !e.sessions.is_empty())
            .map(|e| e.handle.clone())
    }

    pub fn viewer_count(&self, path: &str) -> usize {
        self.documents
            .lock()
            .get(path)
            .map_or(0, |e| e.sessions.len())
    }

    /// Paths with at least one viewer
    pub fn open_documents(&self) -> Vec<String> {
        let mut paths: Vec<String> = self
            .documents
            .lock()
            .iter()
            .filter(|(_, e)| !e.sessions.is_empty())
            .map(|(path, _)| path.clone())
            .collect();
        paths.sort();
        paths
    }

    fn load(&self, path: &str) -> Result<Document, WorkspaceError> {
        let file = self.config.resolve(path)?;
        if self.config.persist {
            return Ok(Document::open_or_create(file)?);
        }
        if file.exists() {
            let json = std::fs::read_to_string(&file)?;
            return Ok(Document::from_json(file, &json)?);
        }
        Ok(Document::new(file))
    }
}

/// Called by a worker on `Shutdown`. Removes its entry if nobody reopened the
/// notebook meanwhile and reports whether the worker should stop.
fn retirement(
    documents: Weak<Documents>,
    path: String,
    generation: u64,
) -> impl Fn() -> bool + Send + 'static {
    move || {
        let Some(documents) = documents.upgrade() else {
            return true;
        };
        let mut documents = documents.lock();
        match documents.get(&path) {
            Some(entry) if entry.generation == generation => {
                if !entry.sessions.is_empty() {
                    return false;
                }
                documents.remove(&path);
                tracing::info!(path = %path, "document closed");
                true
            }
            _ => true,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::messages::{NotebookEvent, ServerMessage};
    use notebook_editor::{CellType, Position};

    fn registry() -> DocumentRegistry {
        DocumentRegistry::new(
            ServerConfig {
                persist: false,
                ..ServerConfig::default()
            },
            RuleRegistry::new(),
        )
    }

    #[tokio::test]
    async fn test_reference_counting() {
        let registry = registry();
        let (tx1, mut rx1) = mpsc::unbounded_channel();
        let (tx2, _rx2) = mpsc::unbounded_channel();

        registry.open("a.json", "s1", tx1).unwrap();
        registry.open("a.json", "s2", tx2).unwrap();
        assert_eq!(registry.viewer_count("a.json"), 2);
        assert_eq!(registry.open_documents(), vec!["a.json".to_string()]);

        let opened = rx1.recv().await.unwrap();
        assert!(matches!(
            opened,
            ServerMessage::Notebook(NotebookEvent::Opened { version: 0, .. })
        ));

        registry.close("a.json", "s1").unwrap();
        assert_eq!(registry.viewer_count("a.json"), 1);
        registry.close("a.json", "s2").unwrap();
        assert!(registry.handle("a.json").is_none());
        assert!(registry.open_documents().is_empty());
    }

    async fn opened_cells(inbox: &mut mpsc::UnboundedReceiver<ServerMessage>) -> usize {
        loop {
            if let ServerMessage::Notebook(NotebookEvent::Opened { document, .. }) =
                inbox.recv().await.unwrap()
            {
                let document = Document::from_json("snapshot.json", &document.to_string()).unwrap();
                return document.graph().cell_count();
            }
        }
    }

    fn insert_cell() -> ChangeRequest {
        ChangeRequest::InsertEmptyCell {
            cell_type: CellType::Formula,
            after: Position::Bottom,
            id: None,
        }
    }

    #[tokio::test]
    async fn test_reopen_while_closing_keeps_queued_edits() {
        let registry = registry();
        let (tx1, _rx1) = mpsc::unbounded_channel();
        let (tx2, mut rx2) = mpsc::unbounded_channel();

        let handle = registry.open("a.json", "s1", tx1).unwrap();
        handle.submit("s1", None, vec![insert_cell()]).unwrap();
        registry.close("a.json", "s1").unwrap();
        registry.open("a.json", "s2", tx2).unwrap();

        assert_eq!(opened_cells(&mut rx2).await, 1);
        assert_eq!(registry.viewer_count("a.json"), 1);

        // The shutdown queued by the close was ignored
        registry
            .handle("a.json")
            .unwrap()
            .submit("s2", None, vec![insert_cell()])
            .unwrap();
        let (tx3, mut rx3) = mpsc::unbounded_channel();
        registry.open("a.json", "s3", tx3).unwrap();
        assert_eq!(opened_cells(&mut rx3).await, 2);
    }

    #[tokio::test]
    async fn test_last_close_retires_the_worker() {
        let registry = registry();
        let (tx, _rx) = mpsc::unbounded_channel();
        registry.open("a.json", "s1", tx).unwrap();
        registry.close("a.json", "s1").unwrap();
        assert!(registry.handle("a.json").is_none());

        for _ in 0..100 {
            if registry.documents.lock().is_empty() {
                return;
            }
            tokio::task::yield_now().await;
        }
        panic!("worker never retired");
    }

    #[tokio::test]
    async fn test_concurrent_load_joins_the_first_worker() {
        let registry = registry();
        let (tx1, mut rx1) = mpsc::unbounded_channel();
        let (tx2, mut rx2) = mpsc::unbounded_channel();

        // s2 loads, then s1 opens and starts the worker before s2 installs
        let stale = registry.load("a.json").unwrap();
        let first = registry.open("a.json", "s1", tx1).unwrap();
        first.submit("s1", None, vec![insert_cell()]).unwrap();
        registry.install("a.json", "s2", tx2, stale).unwrap();

        assert_eq!(opened_cells(&mut rx1).await, 0);
        assert_eq!(opened_cells(&mut rx2).await, 1);
        assert_eq!(registry.viewer_count("a.json"), 2);
    }

    #[tokio::test]
    async fn test_close_unknown_session_fails() {
        let registry = registry();
        let (tx, _rx) = mpsc::unbounded_channel();
        registry.open("a.json", "s1", tx).unwrap();

        assert!(matches!(
            registry.close("a.json", "s9"),
            Err(WorkspaceError::NotOpen(_))
        ));
        assert!(matches!(
            registry.close("b.json", "s1"),
            Err(WorkspaceError::NotOpen(_))
        ));
    }

    #[tokio::test]
    async fn test_escaping_path_is_refused() {
        let registry = registry();
        let (tx, _rx) = mpsc::unbounded_channel();
        assert!(matches!(
            registry.open("../secret.json", "s1", tx),
            Err(WorkspaceError::InvalidPath(_))
        ));
        assert!(registry.open_documents().is_empty());
    }
}
