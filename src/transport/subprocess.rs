//! Subprocess transport for a locally spawned agent

use async_trait::async_trait;
use futures::StreamExt;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use tokio::io::AsyncWriteExt;
use tokio::process::{ChildStdin, ChildStdout, Command};
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio_util::codec::{FramedRead, LinesCodec, LinesCodecError};
use tokio_util::sync::CancellationToken;

use super::{CloseMode, Transport, TransportEvent};
use crate::VERSION;
use crate::error::{AgentError, Result};
use crate::types::SpawnSpec;
use crate::utils::truncate_for_display;

// Dangerous environment variables that should not be passed to subprocess
const DANGEROUS_ENV_VARS: &[&str] = &[
    "LD_PRELOAD",
    "LD_LIBRARY_PATH",
    "DYLD_INSERT_LIBRARIES",
    "DYLD_LIBRARY_PATH",
    "PATH",
    "NODE_OPTIONS",
    "PYTHONPATH",
    "PERL5LIB",
    "RUBYLIB",
];

/// How long the reader waits for an exit status after stdout hits EOF
const EXIT_STATUS_WAIT: Duration = Duration::from_secs(2);

/// How long a killed process gets to be reaped
const KILL_WAIT: Duration = Duration::from_secs(5);

#[derive(Debug, Clone, Copy)]
struct ProcessExit {
    code: Option<i32>,
}

type ExitWatch = watch::Receiver<Option<ProcessExit>>;

/// Subprocess transport
///
/// The child is owned by a watcher task that reaps it and publishes the exit
/// status. Killing goes through a [`CancellationToken`], so the transport
/// never needs a lock around the child handle.
pub struct SubprocessTransport {
    spec: SpawnSpec,
    stdin: Option<ChildStdin>,
    stdout: Option<ChildStdout>,
    exit: Option<ExitWatch>,
    kill: CancellationToken,
    ready: Arc<AtomicBool>,
    reader_task: Option<JoinHandle<()>>,
    stderr_task: Option<JoinHandle<()>>,
    exit_task: Option<JoinHandle<()>>,
}

impl SubprocessTransport {
    /// Create a transport for `spec`; nothing is spawned until `connect`
    #[must_use]
    pub fn new(spec: SpawnSpec) -> Self {
        Self {
            spec,
            stdin: None,
            stdout: None,
            exit: None,
            kill: CancellationToken::new(),
            ready: Arc::new(AtomicBool::new(false)),
            reader_task: None,
            stderr_task: None,
            exit_task: None,
        }
    }

    /// Resolve the program to an executable path
    fn resolve_program(program: &Path) -> Result<PathBuf> {
        if program.components().count() > 1 {
            return if program.is_file() {
                Ok(program.to_path_buf())
            } else {
                Err(AgentError::cli_not_found(format!(
                    "{} does not exist",
                    program.display()
                )))
            };
        }

        which::which(program).map_err(|e| {
            AgentError::cli_not_found(format!("{} not found in PATH: {e}", program.display()))
        })
    }

    /// Environment for the child, layered over the inherited one
    fn build_env(&self) -> Result<HashMap<String, String>> {
        let dangerous: Vec<&str> = self
            .spec
            .env
            .keys()
            .filter(|key| DANGEROUS_ENV_VARS.contains(&key.as_str()))
            .map(String::as_str)
            .collect();

        if !dangerous.is_empty() {
            let vars_str = dangerous.join(", ");
            tracing::warn!(
                vars = %vars_str,
                "Rejected dangerous environment variables"
            );
            return Err(AgentError::invalid_config(format!(
                "Dangerous environment variables detected: [{vars_str}]"
            )));
        }

        let mut env = self.spec.env.clone();
        env.insert("CLAUDE_CODE_ENTRYPOINT".to_string(), "sdk-rust".to_string());
        env.insert("CLAUDE_AGENT_SDK_VERSION".to_string(), VERSION.to_string());
        if let Some(ref cwd) = self.spec.cwd {
            env.insert("PWD".to_string(), cwd.to_string_lossy().to_string());
        }
        Ok(env)
    }

    async fn wait_for_exit(&mut self, limit: Duration) -> Option<ProcessExit> {
        let exit = self.exit.as_mut()?;
        wait_for_exit(exit, limit).await
    }
}

async fn wait_for_exit(exit: &mut ExitWatch, limit: Duration) -> Option<ProcessExit> {
    tokio::time::timeout(limit, exit.wait_for(Option::is_some))
        .await
        .ok()?
        .ok()
        .and_then(|status| *status)
}

#[async_trait]
impl Transport for SubprocessTransport {
    async fn connect(&mut self) -> Result<()> {
        if self.exit.is_some() {
            return Err(AgentError::connection("Transport already connected"));
        }

        let program = Self::resolve_program(&self.spec.program)?;
        let env = self.build_env()?;

        let mut cmd = Command::new(&program);
        cmd.args(&self.spec.args)
            .envs(env)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        if let Some(ref cwd) = self.spec.cwd {
            if !cwd.is_dir() {
                return Err(AgentError::connection(format!(
                    "Working directory does not exist: {}",
                    cwd.display()
                )));
            }
            cmd.current_dir(cwd);
        }

        let mut child = cmd.spawn().map_err(|e| {
            if e.kind() == std::io::ErrorKind::NotFound {
                AgentError::cli_not_found(format!("{}: {e}", program.display()))
            } else {
                AgentError::connection(format!("Failed to start agent: {e}"))
            }
        })?;

        tracing::debug!(program = %program.display(), pid = ?child.id(), "Spawned agent process");

        let stdin = child
            .stdin
            .take()
            .ok_or_else(|| AgentError::connection("Failed to get stdin handle"))?;
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| AgentError::connection("Failed to get stdout handle"))?;
        let stderr = child
            .stderr
            .take()
            .ok_or_else(|| AgentError::connection("Failed to get stderr handle"))?;

        // Drain stderr so the child never blocks on a full pipe
        let callback = self.spec.stderr.clone();
        let max = self.spec.max_buffer_size;
        self.stderr_task = Some(tokio::spawn(async move {
            let mut lines = FramedRead::new(stderr, LinesCodec::new_with_max_length(max));
            while let Some(line) = lines.next().await {
                let Ok(line) = line else { continue };
                tracing::debug!(target: "agent_control_client::stderr", "{line}");
                if let Some(ref callback) = callback {
                    callback(line);
                }
            }
        }));

        let (exit_tx, exit_rx) = watch::channel(None);
        let kill = self.kill.clone();
        self.exit_task = Some(tokio::spawn(async move {
            let status = tokio::select! {
                status = child.wait() => status,
                () = kill.cancelled() => {
                    if let Err(e) = child.start_kill() {
                        tracing::debug!(error = %e, "Kill failed, process likely gone");
                    }
                    child.wait().await
                }
            };
            let code = match status {
                Ok(status) => status.code(),
                Err(e) => {
                    tracing::warn!(error = %e, "Failed to reap agent process");
                    None
                }
            };
            tracing::debug!(exit_code = ?code, "Agent process exited");
            let _ = exit_tx.send(Some(ProcessExit { code }));
        }));

        self.stdin = Some(stdin);
        self.stdout = Some(stdout);
        self.exit = Some(exit_rx);
        self.ready.store(true, Ordering::SeqCst);
        Ok(())
    }

    async fn write(&mut self, line: &str) -> Result<()> {
        if !self.is_ready() {
            return Err(AgentError::connection_closed("Transport is not ready for writing"));
        }

        let stdin = self
            .stdin
            .as_mut()
            .ok_or_else(|| AgentError::connection_closed("stdin not available"))?;

        let mut frame = String::with_capacity(line.len() + 1);
        frame.push_str(line);
        frame.push('\n');

        stdin
            .write_all(frame.as_bytes())
            .await
            .map_err(|e| AgentError::connection_closed(format!("Failed to write to stdin: {e}")))?;
        stdin
            .flush()
            .await
            .map_err(|e| AgentError::connection_closed(format!("Failed to flush stdin: {e}")))?;

        tracing::trace!(
            line = %truncate_for_display(line, 200),
            "Wrote line to agent"
        );
        Ok(())
    }

    async fn end_input(&mut self) -> Result<()> {
        if let Some(mut stdin) = self.stdin.take() {
            stdin.shutdown().await?;
        }
        Ok(())
    }

    fn read_events(&mut self) -> Result<mpsc::UnboundedReceiver<TransportEvent>> {
        let stdout = self
            .stdout
            .take()
            .ok_or_else(|| AgentError::connection("Not connected, or events already taken"))?;
        let mut exit = self
            .exit
            .clone()
            .ok_or_else(|| AgentError::connection("Not connected"))?;

        let (tx, rx) = mpsc::unbounded_channel();
        let max = self.spec.max_buffer_size;
        let ready = Arc::clone(&self.ready);

        self.reader_task = Some(tokio::spawn(async move {
            let mut lines = FramedRead::new(stdout, LinesCodec::new_with_max_length(max));
            // After a decode error the framed reader yields one `None` before
            // resuming; only a `None` that follows a good frame is EOF.
            let mut resuming = false;

            loop {
                match lines.next().await {
                    Some(Ok(line)) => {
                        resuming = false;
                        if line.trim().is_empty() {
                            continue;
                        }
                        tracing::trace!(line = %truncate_for_display(&line, 200), "Read line from agent");
                        if tx.send(TransportEvent::Line(line)).is_err() {
                            break;
                        }
                    }
                    Some(Err(LinesCodecError::MaxLineLengthExceeded)) => {
                        tracing::warn!(max_buffer_size = max, "Skipping line over the maximum length");
                        resuming = true;
                    }
                    Some(Err(LinesCodecError::Io(e)))
                        if e.kind() == std::io::ErrorKind::InvalidData =>
                    {
                        tracing::warn!(error = %e, "Skipping line that is not valid UTF-8");
                        resuming = true;
                    }
                    Some(Err(LinesCodecError::Io(e))) => {
                        tracing::warn!(error = %e, "Failed reading agent stdout");
                        break;
                    }
                    None if resuming => resuming = false,
                    None => break,
                }
            }

            ready.store(false, Ordering::SeqCst);
            let exit_code = wait_for_exit(&mut exit, EXIT_STATUS_WAIT)
                .await
                .and_then(|exit| exit.code);
            let _ = tx.send(TransportEvent::Closed { exit_code });
        }));

        Ok(rx)
    }

    fn is_ready(&self) -> bool {
        self.ready.load(Ordering::SeqCst) && self.stdin.is_some()
    }

    async fn close(&mut self, mode: CloseMode) -> Result<()> {
        self.ready.store(false, Ordering::SeqCst);

        if let CloseMode::Graceful { grace } = mode {
            if let Some(mut stdin) = self.stdin.take() {
                let _ = stdin.shutdown().await;
            }
            if self.wait_for_exit(grace).await.is_none() && self.exit.is_some() {
                tracing::debug!(grace_ms = grace.as_millis() as u64, "Grace period elapsed, killing agent");
            }
        }

        self.stdin = None;
        self.kill.cancel();
        if self.exit.is_some() && self.wait_for_exit(KILL_WAIT).await.is_none() {
            tracing::warn!("Agent process did not exit after kill");
        }

        if let Some(task) = self.stderr_task.take() {
            task.abort();
        }

        Ok(())
    }
}

impl Drop for SubprocessTransport {
    fn drop(&mut self) {
        self.kill.cancel();

        if let Some(task) = self.reader_task.take() {
            task.abort();
        }

        if let Some(task) = self.stderr_task.take() {
            task.abort();
        }

        // The exit watcher kills and reaps on its own once cancelled
        drop(self.exit_task.take());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_missing_program_is_not_found() {
        let err = SubprocessTransport::resolve_program(Path::new(
            "definitely-not-an-agent-binary-4242",
        ))
        .unwrap_err();
        assert!(matches!(err, AgentError::CliNotFound(_)));

        let err =
            SubprocessTransport::resolve_program(Path::new("/nonexistent/dir/agent")).unwrap_err();
        assert!(matches!(err, AgentError::CliNotFound(_)));
    }

    #[test]
    fn test_dangerous_env_vars_rejected() {
        let mut env = HashMap::new();
        env.insert("LD_PRELOAD".to_string(), "/tmp/evil.so".to_string());
        let transport =
            SubprocessTransport::new(SpawnSpec::builder().program("agent").env(env).build());

        let err = transport.build_env().unwrap_err();
        assert!(matches!(err, AgentError::InvalidConfig(_)));
        assert!(err.to_string().contains("LD_PRELOAD"));
    }

    #[test]
    fn test_env_carries_entrypoint() {
        let mut env = HashMap::new();
        env.insert("MY_SAFE_VAR".to_string(), "safe value".to_string());
        let transport =
            SubprocessTransport::new(SpawnSpec::builder().program("agent").env(env).build());

        let env = transport.build_env().unwrap();
        assert_eq!(env["MY_SAFE_VAR"], "safe value");
        assert_eq!(env["CLAUDE_CODE_ENTRYPOINT"], "sdk-rust");
        assert_eq!(env["CLAUDE_AGENT_SDK_VERSION"], VERSION);
    }

    #[tokio::test]
    async fn test_write_before_connect_fails() {
        let mut transport = SubprocessTransport::new(SpawnSpec::new("agent"));
        assert!(!transport.is_ready());
        let err = transport.write("{}").await.unwrap_err();
        assert!(matches!(err, AgentError::ConnectionClosed(_)));
        assert!(transport.read_events().is_err());
    }
}
