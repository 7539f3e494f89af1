//! # Framed Process Adapter
//!
//! Talks to an external engine (computer algebra, typesetter) over the
//! child's stdin/stdout. Each frame is a 4-byte big-endian length followed by
//! a JSON body:
//!
//! ```text
//! → {"op": "execute", "input": "x^2 + 1"}
//! ← {"ok": "x^2 + 1"}  or  {"error": "syntax error at 3"}
//! ```
//!
//! A process handles one request at a time; callers queue on a mutex. The
//! link is taken out of the mutex for the duration of a call, so a call that
//! is cancelled mid-exchange (a rule timeout) drops the link and kills the
//! child. The next call starts a fresh process instead of reading the
//! abandoned reply.

use crate::config::CommandConfig;
use crate::errors::WorkspaceError;
use async_trait::async_trait;
use notebook_editor::external::{CollaboratorError, ComputerAlgebra, Typesetter};
use serde::{Deserialize, Serialize};
use std::process::Stdio;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::process::{Child, Command};
use tokio::sync::Mutex;

const MAX_FRAME_BYTES: usize = 16 * 1024 * 1024;

#[derive(Debug, Serialize)]
struct Request<'a> {
    op: &'a str,
    input: &'a str,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
enum Response {
    Ok(String),
    Error(String),
}

/// One live connection to an engine
struct Link {
    // Held so the child is killed when the link is dropped
    _child: Option<Child>,
    reader: Box<dyn AsyncRead + Send + Unpin>,
    writer: Box<dyn AsyncWrite + Send + Unpin>,
}

type Connect = Box<dyn Fn() -> Result<Link, WorkspaceError> + Send + Sync>;

pub struct FramedProcess {
    program: String,
    connect: Connect,
    link: Mutex<Option<Link>>,
}

impl FramedProcess {
    /// Start the engine. Later restarts reuse the same command.
    pub fn spawn(command: &CommandConfig) -> Result<Self, WorkspaceError> {
        let command = command.clone();
        let program = command.program.clone();
        Self::with_connector(program, move || start(&command))
    }

    fn with_connector(
        program: String,
        connect: impl Fn() -> Result<Link, WorkspaceError> + Send + Sync + 'static,
    ) -> Result<Self, WorkspaceError> {
        let link = connect()?;
        tracing::info!(program = %program, "collaborator process started");
        Ok(Self {
            program,
            connect: Box::new(connect),
            link: Mutex::new(Some(link)),
        })
    }

    async fn call(&self, op: &str, input: &str) -> Result<String, CollaboratorError> {
        let mut slot = self.link.lock().await;
        let mut link = match slot.take() {
            Some(link) => link,
            None => {
                tracing::info!(program = %self.program, "restarting collaborator process");
                (self.connect)().map_err(|e| CollaboratorError::Process(e.to_string()))?
            }
        };

        let result = exchange(&mut link.reader, &mut link.writer, op, input).await;
        match &result {
            // A whole reply frame was read, so the stream is still in step
            Ok(_) | Err(CollaboratorError::Rejected(_)) => *slot = Some(link),
            Err(error @ CollaboratorError::Protocol(_)) => {
                tracing::warn!(program = %self.program, op, error = %error, "collaborator call failed");
                *slot = Some(link);
            }
            Err(error) => {
                tracing::warn!(program = %self.program, op, error = %error, "collaborator call failed, dropping process");
            }
        }
        result
    }
}

fn start(command: &CommandConfig) -> Result<Link, WorkspaceError> {
    let spawn_error = |source| WorkspaceError::Spawn {
        program: command.program.clone(),
        source,
    };

    let mut child = Command::new(&command.program)
        .args(&command.args)
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::inherit())
        .kill_on_drop(true)
        .spawn()
        .map_err(spawn_error)?;

    let missing = || {
        spawn_error(std::io::Error::new(
            std::io::ErrorKind::BrokenPipe,
            "child stdio not captured",
        ))
    };
    let stdin = child.stdin.take().ok_or_else(missing)?;
    let stdout = child.stdout.take().ok_or_else(missing)?;

    Ok(Link {
        _child: Some(child),
        reader: Box::new(stdout),
        writer: Box::new(stdin),
    })
}

impl std::fmt::Debug for FramedProcess {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FramedProcess")
            .field("program", &self.program)
            .finish_non_exhaustive()
    }
}

#[async_trait]
impl ComputerAlgebra for FramedProcess {
    async fn execute(&self, expression: &str) -> Result<String, CollaboratorError> {
        self.call("execute", expression).await
    }
}

#[async_trait]
impl Typesetter for FramedProcess {
    async fn typeset(&self, formula: &str) -> Result<String, CollaboratorError> {
        self.call("typeset", formula).await
    }
}

/// One request/response round trip over a framed stream
async fn exchange<R, W>(
    reader: &mut R,
    writer: &mut W,
    op: &str,
    input: &str,
) -> Result<String, CollaboratorError>
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin,
{
    let body = serde_json::to_vec(&Request { op, input })
        .map_err(|e| CollaboratorError::Protocol(e.to_string()))?;
    write_frame(writer, &body)
        .await
        .map_err(|e| CollaboratorError::Process(e.to_string()))?;

    let reply = read_frame(reader)
        .await
        .map_err(|e| CollaboratorError::Process(e.to_string()))?;
    match serde_json::from_slice(&reply) {
        Ok(Response::Ok(output)) => Ok(output),
        Ok(Response::Error(message)) => Err(CollaboratorError::Rejected(message)),
        Err(error) => Err(CollaboratorError::Protocol(error.to_string())),
    }
}

async fn write_frame<W: AsyncWrite + Unpin>(writer: &mut W, body: &[u8]) -> std::io::Result<()> {
    let len = u32::try_from(body.len())
        .map_err(|_| std::io::Error::new(std::io::ErrorKind::InvalidInput, "frame too large"))?;
    writer.write_u32(len).await?;
    writer.write_all(body).await?;
    writer.flush().await
}

async fn read_frame<R: AsyncRead + Unpin>(reader: &mut R) -> std::io::Result<Vec<u8>> {
    let len = reader.read_u32().await? as usize;
    if len > MAX_FRAME_BYTES {
        return Err(std::io::Error::new(
            std::io::ErrorKind::InvalidData,
            "frame exceeds max allowed size",
        ));
    }
    let mut body = vec![0u8; len];
    reader.read_exact(&mut body).await?;
    Ok(body)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::{json, Value};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;
    use std::time::Duration;
    use tokio::io::duplex;

    /// Answers one framed request the way an engine would
    async fn engine<S: AsyncRead + AsyncWrite + Unpin>(mut stream: S, reply: Value) -> Value {
        let request = read_frame(&mut stream).await.unwrap();
        let body = serde_json::to_vec(&reply).unwrap();
        write_frame(&mut stream, &body).await.unwrap();
        serde_json::from_slice(&request).unwrap()
    }

    #[tokio::test]
    async fn test_exchange_round_trip() {
        let (client, server) = duplex(1024);
        let engine = tokio::spawn(engine(server, json!({"ok": "2"})));

        let (mut reader, mut writer) = tokio::io::split(client);
        let result = exchange(&mut reader, &mut writer, "execute", "1 + 1").await;

        assert_eq!(result, Ok("2".to_string()));
        assert_eq!(
            engine.await.unwrap(),
            json!({"op": "execute", "input": "1 + 1"})
        );
    }

    #[tokio::test]
    async fn test_engine_error_is_rejection() {
        let (client, server) = duplex(1024);
        tokio::spawn(engine(server, json!({"error": "syntax error"})));

        let (mut reader, mut writer) = tokio::io::split(client);
        let result = exchange(&mut reader, &mut writer, "execute", "1 +").await;
        assert_eq!(result, Err(CollaboratorError::Rejected("syntax error".into())));
    }

    #[tokio::test]
    async fn test_malformed_reply_is_protocol_error() {
        let (client, server) = duplex(1024);
        tokio::spawn(engine(server, json!({"result": 3})));

        let (mut reader, mut writer) = tokio::io::split(client);
        let result = exchange(&mut reader, &mut writer, "typeset", "x").await;
        assert!(matches!(result, Err(CollaboratorError::Protocol(_))));
    }

    #[tokio::test]
    async fn test_oversized_frame_is_refused() {
        let mut bytes: &[u8] = &[0xFF, 0xFF, 0xFF, 0xFF];
        let error = read_frame(&mut bytes).await.unwrap_err();
        assert_eq!(error.kind(), std::io::ErrorKind::InvalidData);
    }

    /// Connects to in-memory engines; the first one answers slowly
    fn slow_then_fast(
        connections: Arc<AtomicUsize>,
    ) -> impl Fn() -> Result<Link, WorkspaceError> + Send + Sync + 'static {
        move || {
            let n = connections.fetch_add(1, Ordering::SeqCst);
            let (client, mut server) = duplex(1024);
            tokio::spawn(async move {
                while let Ok(request) = read_frame(&mut server).await {
                    let request: Value = serde_json::from_slice(&request).unwrap();
                    if n == 0 {
                        tokio::time::sleep(Duration::from_millis(200)).await;
                    }
                    let reply = json!({"ok": format!("{} from {n}", request["input"])});
                    let body = serde_json::to_vec(&reply).unwrap();
                    if write_frame(&mut server, &body).await.is_err() {
                        break;
                    }
                }
            });
            let (reader, writer) = tokio::io::split(client);
            Ok(Link {
                _child: None,
                reader: Box::new(reader),
                writer: Box::new(writer),
            })
        }
    }

    #[tokio::test]
    async fn test_abandoned_call_does_not_leak_its_reply() {
        let connections = Arc::new(AtomicUsize::new(0));
        let process =
            FramedProcess::with_connector("engine".into(), slow_then_fast(connections.clone()))
                .unwrap();

        let abandoned =
            tokio::time::timeout(Duration::from_millis(20), process.execute("first")).await;
        assert!(abandoned.is_err());

        // Give the slow engine time to write its late reply
        tokio::time::sleep(Duration::from_millis(300)).await;

        assert_eq!(process.execute("second").await, Ok("\"second\" from 1".into()));
        assert_eq!(process.execute("third").await, Ok("\"third\" from 1".into()));
        assert_eq!(connections.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_rejection_keeps_the_process() {
        let connections = Arc::new(AtomicUsize::new(0));
        let counter = connections.clone();
        let process = FramedProcess::with_connector("engine".into(), move || {
            counter.fetch_add(1, Ordering::SeqCst);
            let (client, server) = duplex(1024);
            tokio::spawn(async move {
                let mut server = server;
                while read_frame(&mut server).await.is_ok() {
                    let body = serde_json::to_vec(&json!({"error": "bad input"})).unwrap();
                    if write_frame(&mut server, &body).await.is_err() {
                        break;
                    }
                }
            });
            let (reader, writer) = tokio::io::split(client);
            Ok(Link {
                _child: None,
                reader: Box::new(reader),
                writer: Box::new(writer),
            })
        })
        .unwrap();

        for _ in 0..2 {
            assert_eq!(
                process.typeset("x").await,
                Err(CollaboratorError::Rejected("bad input".into()))
            );
        }
        assert_eq!(connections.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_closed_stream_is_process_error() {
        let (client, server) = duplex(64);
        drop(server);
        let (mut reader, mut writer) = tokio::io::split(client);
        let result = exchange(&mut reader, &mut writer, "execute", "x").await;
        assert!(matches!(result, Err(CollaboratorError::Process(_))));
    }
}
