//! Child-process LLM backend: prompt on stdin, completion on stdout.
//!
//! Prompts can exceed the OS pipe buffer, so stdin is written from its own
//! task while stdout is drained concurrently. The backend has no wall-clock
//! timeout; cancellation terminates the child (TERM, then KILL after a
//! grace period).

use crate::errors::LlmError;
use crate::llm::{LlmBackend, LlmInvocation};
use async_trait::async_trait;
use std::process::Stdio;
use std::time::Duration;
use tokio::io::AsyncWriteExt;
use tokio::process::{Child, Command};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

/// Grace period between SIGTERM and SIGKILL on cancellation.
const KILL_GRACE: Duration = Duration::from_secs(5);

/// Backend that pipes the prompt to an external command line.
pub struct CmdBackend {
    command: String,
}

impl CmdBackend {
    pub fn new(command: impl Into<String>) -> Self {
        Self {
            command: command.into(),
        }
    }

    /// Run the configured command with `prompt` on stdin and return stdout.
    ///
    /// Success iff the exit status is zero and stdout is non-empty.
    pub async fn run(
        &self,
        prompt: &str,
        working_dir: Option<&std::path::Path>,
        cancel: &CancellationToken,
    ) -> Result<String, LlmError> {
        let mut cmd = Command::new("sh");
        cmd.arg("-c")
            .arg(&self.command)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());
        if let Some(dir) = working_dir {
            cmd.current_dir(dir);
        }

        let mut child = cmd.spawn().map_err(LlmError::CmdSpawnFailed)?;
        debug!(command = %self.command, pid = child.id().unwrap_or(0), "Spawned agent command");

        // Stream the prompt from a separate task while stdout is drained,
        // otherwise a large prompt deadlocks against a full pipe buffer.
        let stdin = child.stdin.take();
        let prompt_bytes = prompt.as_bytes().to_vec();
        let writer = tokio::spawn(async move {
            if let Some(mut stdin) = stdin {
                let _ = stdin.write_all(&prompt_bytes).await;
                let _ = stdin.shutdown().await;
            }
        });

        // Drain stdout and stderr concurrently with the stdin writer.
        let mut stdout_pipe = child
            .stdout
            .take()
            .ok_or_else(|| LlmError::Transport("agent command stdout unavailable".into()))?;
        let stdout_task = tokio::spawn(async move {
            use tokio::io::AsyncReadExt;
            let mut buf = Vec::new();
            let _ = stdout_pipe.read_to_end(&mut buf).await;
            buf
        });
        let mut stderr_pipe = child.stderr.take();
        let stderr_task = tokio::spawn(async move {
            use tokio::io::AsyncReadExt;
            let mut buf = Vec::new();
            if let Some(pipe) = stderr_pipe.as_mut() {
                let _ = pipe.read_to_end(&mut buf).await;
            }
            buf
        });

        let status = tokio::select! {
            status = child.wait() => {
                status.map_err(|e| LlmError::Transport(format!("agent command wait failed: {e}")))?
            }
            _ = cancel.cancelled() => {
                terminate_child(&mut child).await;
                writer.abort();
                stdout_task.abort();
                stderr_task.abort();
                return Err(LlmError::Cancelled);
            }
        };
        writer.abort();

        let stdout_bytes = stdout_task.await.unwrap_or_default();
        let stderr_bytes = stderr_task.await.unwrap_or_default();

        if !status.success() {
            let stderr = String::from_utf8_lossy(&stderr_bytes);
            warn!(
                command = %self.command,
                exit_code = status.code().unwrap_or(-1),
                stderr = %stderr.chars().take(500).collect::<String>(),
                "Agent command failed"
            );
            return Err(LlmError::CmdNonZeroExit {
                exit_code: status.code().unwrap_or(-1),
            });
        }

        let stdout = String::from_utf8_lossy(&stdout_bytes).into_owned();
        if stdout.is_empty() {
            return Err(LlmError::CmdEmptyOutput);
        }
        Ok(stdout)
    }
}

#[async_trait]
impl LlmBackend for CmdBackend {
    fn label(&self) -> String {
        "cmd".to_string()
    }

    async fn invoke(
        &self,
        inv: &LlmInvocation,
        cancel: &CancellationToken,
    ) -> Result<String, LlmError> {
        self.run(&inv.prompt, None, cancel).await
    }
}

/// Terminate a child cooperatively: SIGTERM first, SIGKILL after the grace
/// period. Used by cancellation paths that hold the `Child` directly.
pub async fn terminate_child(child: &mut Child) {
    if let Some(pid) = child.id() {
        let _ = Command::new("kill")
            .arg("-TERM")
            .arg(pid.to_string())
            .status()
            .await;
        if tokio::time::timeout(KILL_GRACE, child.wait()).await.is_ok() {
            return;
        }
    }
    let _ = child.start_kill();
    let _ = child.wait().await;
}
