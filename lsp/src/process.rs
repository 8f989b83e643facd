//! Process manager: owns one language server subprocess.
//!
//! Stdout is read by a dedicated reader thread that splits it into framed
//! message bodies and hands them over a channel, so [`Process::try_read_message`]
//! never blocks the editor's main loop. Stderr is owned by a [`StderrDrain`].

use std::io::BufReader;
use std::path::PathBuf;
use std::process::{Child, ChildStdin, Command, Stdio};
use std::thread::JoinHandle;
use std::time::Duration;

use tokio::sync::mpsc;

use crate::client::Transport;
use crate::codec::{DEFAULT_MAX_MESSAGE_BYTES, FrameReader, FrameWriter};
use crate::error::LspError;
use crate::stderr_log::{JOIN_TIMEOUT, StderrDrain, join_bounded};
use crate::types::{LspConfig, ServerConfig};

type Inbound = Result<Vec<u8>, LspError>;

/// Static description of how to launch a server.
#[derive(Debug, Clone)]
pub struct ProcessConfig {
    /// Name used in logs and for the stderr log file.
    pub name: String,
    pub command: String,
    pub args: Vec<String>,
    pub working_dir: Option<PathBuf>,
    pub max_restarts: u32,
    pub restart_base_delay: Duration,
    pub max_message_bytes: usize,
    /// Stderr log file; `None` discards stderr.
    pub stderr_log: Option<PathBuf>,
}

impl ProcessConfig {
    #[must_use]
    pub fn new(name: impl Into<String>, command: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            command: command.into(),
            args: Vec::new(),
            working_dir: None,
            max_restarts: 3,
            restart_base_delay: Duration::from_millis(250),
            max_message_bytes: DEFAULT_MAX_MESSAGE_BYTES,
            stderr_log: None,
        }
    }

    /// Build from a configured server plus the global limits.
    #[must_use]
    pub fn from_server(name: &str, server: &ServerConfig, lsp: &LspConfig) -> Self {
        Self {
            name: name.to_string(),
            command: server.command().to_string(),
            args: server.args().to_vec(),
            working_dir: None,
            max_restarts: lsp.max_restarts(),
            restart_base_delay: lsp.restart_base_delay(),
            max_message_bytes: lsp.max_message_bytes(),
            stderr_log: Some(crate::stderr_log::default_log_path(name)),
        }
    }

    #[must_use]
    pub fn with_args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args = args.into_iter().map(Into::into).collect();
        self
    }

    #[must_use]
    pub fn with_working_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.working_dir = Some(dir.into());
        self
    }

    #[must_use]
    pub fn with_restart_policy(mut self, max_restarts: u32, base_delay: Duration) -> Self {
        self.max_restarts = max_restarts;
        self.restart_base_delay = base_delay;
        self
    }

    #[must_use]
    pub fn with_stderr_log(mut self, path: Option<PathBuf>) -> Self {
        self.stderr_log = path;
        self
    }
}

/// Delay before restart attempt `attempt` (0-based): `base * 2^attempt`.
#[must_use]
pub fn backoff_delay(base: Duration, attempt: u32) -> Duration {
    base.saturating_mul(2u32.saturating_pow(attempt))
}

struct Running {
    child: Child,
    writer: FrameWriter<ChildStdin>,
    inbound: mpsc::UnboundedReceiver<Inbound>,
    reader: Option<JoinHandle<()>>,
    stderr: StderrDrain,
}

/// One external analyzer subprocess.
pub struct Process {
    config: ProcessConfig,
    restart_count: u32,
    running: Option<Running>,
}

impl Process {
    /// Create a process handle; nothing is spawned until [`Process::spawn`].
    #[must_use]
    pub fn new(config: ProcessConfig) -> Self {
        Self {
            config,
            restart_count: 0,
            running: None,
        }
    }

    #[must_use]
    pub fn name(&self) -> &str {
        &self.config.name
    }

    #[must_use]
    pub fn restart_count(&self) -> u32 {
        self.restart_count
    }

    #[must_use]
    pub fn max_restarts(&self) -> u32 {
        self.config.max_restarts
    }

    #[must_use]
    pub fn is_running(&self) -> bool {
        self.running.is_some()
    }

    /// Launch the command with piped stdio.
    pub fn spawn(&mut self) -> Result<(), LspError> {
        if self.running.is_some() {
            return Err(LspError::AlreadyRunning);
        }

        let resolved = which::which(&self.config.command).map_err(|_| LspError::NotFound {
            command: self.config.command.clone(),
        })?;

        let mut cmd = Command::new(&resolved);
        cmd.args(&self.config.args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());
        if let Some(dir) = &self.config.working_dir {
            cmd.current_dir(dir);
        }

        let mut child = cmd.spawn().map_err(|source| LspError::Spawn {
            command: self.config.command.clone(),
            source,
        })?;

        let (Some(stdin), Some(stdout), Some(stderr)) =
            (child.stdin.take(), child.stdout.take(), child.stderr.take())
        else {
            let _ = child.kill();
            let _ = child.wait();
            return Err(LspError::ProcessNotRunning);
        };

        let stderr =
            match StderrDrain::start(&self.config.name, stderr, self.config.stderr_log.clone()) {
                Ok(drain) => drain,
                Err(e) => {
                    let _ = child.kill();
                    let _ = child.wait();
                    return Err(e.into());
                }
            };

        let (tx, inbound) = mpsc::unbounded_channel();
        let limit = self.config.max_message_bytes;
        let name = self.config.name.clone();
        let reader = match std::thread::Builder::new()
            .name(format!("lsp-stdout-{name}"))
            .spawn(move || read_loop(&name, FrameReader::new(BufReader::new(stdout), limit), &tx))
        {
            Ok(reader) => reader,
            Err(e) => {
                let _ = child.kill();
                let _ = child.wait();
                let mut stderr = stderr;
                stderr.stop();
                return Err(e.into());
            }
        };

        tracing::info!(
            server = %self.config.name,
            command = %resolved.display(),
            pid = child.id(),
            "Language server spawned"
        );

        self.running = Some(Running {
            child,
            writer: FrameWriter::new(stdin),
            inbound,
            reader: Some(reader),
            stderr,
        });
        Ok(())
    }

    /// Terminate the subprocess and reap it. Idempotent.
    ///
    /// Stdin is closed first. The I/O threads get [`JOIN_TIMEOUT`] to see EOF;
    /// a grandchild that inherited the pipes can keep them open, in which
    /// case the threads are detached rather than waited on.
    pub fn stop(&mut self) {
        let Some(Running {
            mut child,
            writer,
            inbound,
            reader,
            mut stderr,
        }) = self.running.take()
        else {
            return;
        };
        drop(writer);
        drop(inbound);

        if let Err(e) = child.kill()
            && e.kind() != std::io::ErrorKind::InvalidInput
        {
            tracing::warn!(server = %self.config.name, error = %e, "Failed to kill language server");
        }
        match child.wait() {
            Ok(status) => {
                tracing::info!(server = %self.config.name, %status, "Language server stopped");
            }
            Err(e) => {
                tracing::warn!(server = %self.config.name, error = %e, "Failed to reap language server");
            }
        }

        let reader_joined = reader.is_none_or(|reader| join_bounded(reader, JOIN_TIMEOUT, "stdout reader"));
        let stderr_joined = stderr.stop();
        if !(reader_joined && stderr_joined) {
            tracing::warn!(
                server = %self.config.name,
                "Language server pipes still held by another process, detached I/O threads"
            );
        }
    }

    /// Stop, back off, and spawn again.
    ///
    /// Fails with [`LspError::TooManyRestarts`] once the budget is spent,
    /// without touching the current process.
    pub fn restart(&mut self) -> Result<(), LspError> {
        if self.restart_count >= self.config.max_restarts {
            return Err(LspError::TooManyRestarts {
                attempts: self.restart_count,
            });
        }

        self.stop();
        let delay = backoff_delay(self.config.restart_base_delay, self.restart_count);
        tracing::info!(
            server = %self.config.name,
            attempt = self.restart_count + 1,
            delay_ms = delay.as_millis() as u64,
            "Restarting language server"
        );
        std::thread::sleep(delay);
        self.restart_count += 1;
        self.spawn()
    }

    /// Write one framed message body.
    pub fn write_message(&mut self, body: &[u8]) -> Result<(), LspError> {
        let running = self.running.as_mut().ok_or(LspError::ProcessNotRunning)?;
        tracing::trace!(server = %self.config.name, len = body.len(), "-> frame");
        running.writer.write_message(body)?;
        Ok(())
    }

    /// Take the next fully received message body, if one is ready.
    ///
    /// `Ok(None)` means nothing has arrived yet. Framing errors surface once
    /// and do not close the stream; a closed stream yields
    /// [`LspError::ProcessNotRunning`].
    pub fn try_read_message(&mut self) -> Result<Option<Vec<u8>>, LspError> {
        let running = self.running.as_mut().ok_or(LspError::ProcessNotRunning)?;
        match running.inbound.try_recv() {
            Ok(Ok(body)) => Ok(Some(body)),
            Ok(Err(e)) => Err(e),
            Err(mpsc::error::TryRecvError::Empty) => Ok(None),
            Err(mpsc::error::TryRecvError::Disconnected) => Err(LspError::ProcessNotRunning),
        }
    }
}

impl Drop for Process {
    fn drop(&mut self) {
        self.stop();
    }
}

impl Transport for Process {
    fn write_message(&mut self, body: &[u8]) -> Result<(), LspError> {
        Process::write_message(self, body)
    }

    fn try_read_message(&mut self) -> Result<Option<Vec<u8>>, LspError> {
        Process::try_read_message(self)
    }

    fn is_running(&self) -> bool {
        Process::is_running(self)
    }
}

fn read_loop<R: std::io::BufRead>(
    name: &str,
    mut reader: FrameReader<R>,
    tx: &mpsc::UnboundedSender<Inbound>,
) {
    loop {
        match reader.read_message() {
            Ok(Some(body)) => {
                if tx.send(Ok(body)).is_err() {
                    return;
                }
            }
            Ok(None) => {
                tracing::info!(server = %name, "Language server closed stdout");
                return;
            }
            Err(e) if e.is_fatal_to_transport() => {
                tracing::warn!(server = %name, error = %e, "Language server stream failed");
                let _ = tx.send(Err(e));
                return;
            }
            Err(e) => {
                tracing::warn!(server = %name, error = %e, "Dropping malformed frame");
                if tx.send(Err(e)).is_err() {
                    return;
                }
            }
        }
    }
}
