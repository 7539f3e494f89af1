//! Stdio host: one viewer per process, newline-delimited JSON both ways.
//!
//! Logs go to stderr so stdout carries only protocol messages.

use anyhow::Context;
use notebook_editor::ErrorKind;
use notebook_workspace::{
    ClientMessage, ServerConfig, ServerMessage, WorkspaceError, WorkspaceServer,
};
use std::path::PathBuf;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio_stream::wrappers::{LinesStream, UnboundedReceiverStream};
use tokio_stream::StreamExt;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let args: Vec<String> = std::env::args().collect();
    let mut root_dir = std::env::current_dir().context("cannot read current directory")?;

    let mut i = 1;
    while i < args.len() {
        match args[i].as_str() {
            "--help" | "-h" => {
                println!("Usage: notebook-server [ROOT_DIR]");
                println!();
                println!("Reads client messages from stdin and writes server messages to stdout,");
                println!("one JSON object per line.");
                println!();
                println!("Arguments:");
                println!("  [ROOT_DIR]    Directory holding notebooks and notebook.config.json");
                println!("                (default: current dir)");
                return Ok(());
            }
            arg if !arg.starts_with('-') => {
                root_dir = PathBuf::from(arg);
                i += 1;
            }
            other => anyhow::bail!("unknown option: {other}"),
        }
    }

    let config = ServerConfig::load(&root_dir)
        .with_context(|| format!("loading config from {}", root_dir.display()))?;
    let server = WorkspaceServer::new(config)?;
    let (mut connection, inbox) = server.connect();

    let writer = tokio::spawn(async move {
        let mut stdout = tokio::io::stdout();
        let mut outgoing = UnboundedReceiverStream::new(inbox);
        while let Some(message) = outgoing.next().await {
            let mut line = serde_json::to_vec(&message)?;
            line.push(b'\n');
            stdout.write_all(&line).await?;
            stdout.flush().await?;
        }
        anyhow::Ok(())
    });

    let mut lines = LinesStream::new(BufReader::new(tokio::io::stdin()).lines());
    while let Some(line) = lines.next().await {
        let line = line.context("reading stdin")?;
        if line.trim().is_empty() {
            continue;
        }
        match serde_json::from_str::<ClientMessage>(&line) {
            Ok(message) => connection.handle(message),
            Err(error) => {
                tracing::debug!(error = %error, "unparseable client message");
                connection.reply(parse_error(WorkspaceError::from(error)));
            }
        }
    }

    tracing::info!(session = connection.id(), "stdin closed, shutting down");
    drop(connection);
    drop(server);
    writer.await.context("writer task panicked")??;
    Ok(())
}

fn parse_error(error: WorkspaceError) -> ServerMessage {
    ServerMessage::Error {
        message: error.to_string(),
        kind: ErrorKind::Expected,
        request_id: None,
    }
}
