//! Subprocess stdio transport
//!
//! Launches the server as a child process. Framing is one JSON value per
//! line: writes append a newline to the child's stdin, reads split the
//! child's stdout on newlines. Stderr is captured and logged, never parsed.

use super::{Transport, TransportHandle, INCOMING_BUFFER};
use crate::{McpError, Result};
use async_trait::async_trait;
use serde_json::Value;
use std::collections::HashMap;
use std::process::Stdio;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::process::{Child, ChildStdin, Command};
use tokio::sync::{mpsc, Mutex};
use tracing::{debug, warn};

/// Child-process transport with line-delimited JSON framing
pub struct StdioTransport {
    stdin: Mutex<ChildStdin>,
    child: Mutex<Child>,
}

impl StdioTransport {
    /// Launch `command` and wire up its pipes.
    ///
    /// Fails if the process cannot be spawned or any stdio pipe is missing.
    pub async fn spawn(
        command: &str,
        args: &[String],
        env: &HashMap<String, String>,
    ) -> Result<TransportHandle> {
        debug!(command = %command, args = ?args, "Spawning stdio tool server");

        let mut child = Command::new(command)
            .args(args)
            .envs(env)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| McpError::Transport(format!("Failed to spawn '{}': {}", command, e)))?;

        let stdin = child
            .stdin
            .take()
            .ok_or_else(|| McpError::transport("Child stdin unavailable"))?;
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| McpError::transport("Child stdout unavailable"))?;
        let stderr = child
            .stderr
            .take()
            .ok_or_else(|| McpError::transport("Child stderr unavailable"))?;

        let (incoming_tx, incoming) = mpsc::channel(INCOMING_BUFFER);

        // stdout reader: one JSON value per line. Unparseable lines are
        // logged and skipped; the loop ends when the pipe closes.
        let command_name = command.to_string();
        tokio::spawn(async move {
            let mut lines = BufReader::new(stdout).lines();
            loop {
                match lines.next_line().await {
                    Ok(Some(line)) => {
                        let line = line.trim();
                        if line.is_empty() {
                            continue;
                        }
                        match serde_json::from_str::<Value>(line) {
                            Ok(message) => {
                                if incoming_tx.send(message).await.is_err() {
                                    break;
                                }
                            }
                            Err(e) => {
                                warn!(command = %command_name, error = %e, "Dropping unparseable stdout line");
                            }
                        }
                    }
                    Ok(None) => break,
                    Err(e) => {
                        warn!(command = %command_name, error = %e, "Stdout read failed");
                        break;
                    }
                }
            }
            debug!(command = %command_name, "Stdio transport stdout closed");
        });

        // stderr is diagnostics only
        let command_name = command.to_string();
        tokio::spawn(async move {
            let mut lines = BufReader::new(stderr).lines();
            while let Ok(Some(line)) = lines.next_line().await {
                warn!(command = %command_name, "server stderr: {}", line);
            }
        });

        Ok(TransportHandle {
            transport: Box::new(Self {
                stdin: Mutex::new(stdin),
                child: Mutex::new(child),
            }),
            incoming,
        })
    }
}

#[async_trait]
impl Transport for StdioTransport {
    async fn send(&self, message: Value) -> Result<()> {
        let mut line = serde_json::to_vec(&message)?;
        line.push(b'\n');

        let mut stdin = self.stdin.lock().await;
        stdin
            .write_all(&line)
            .await
            .map_err(|e| McpError::Transport(format!("Failed to write to child stdin: {}", e)))?;
        stdin
            .flush()
            .await
            .map_err(|e| McpError::Transport(format!("Failed to flush child stdin: {}", e)))?;
        Ok(())
    }

    async fn close(&self) {
        let mut child = self.child.lock().await;
        if let Err(e) = child.kill().await {
            debug!(error = %e, "Child process already gone");
        }
    }
}
