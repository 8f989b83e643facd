//! quill CLI - headless harness for the LSP runtime.
//!
//! Drives [`quill_lsp::LspManager`] from the same cooperative loop the editor
//! uses: open a buffer, then alternate `poll()` with short sleeps until the
//! answer arrives or the deadline passes.
//!
//! ```text
//! quill check <file>                  print diagnostics, exit 1 on errors
//! quill hover <file> <line> <col>     print hover text (1-indexed position)
//! ```

mod config;

use std::{
    fs::{self, OpenOptions},
    path::{Path, PathBuf},
    process::ExitCode,
    sync::{Arc, Mutex},
    thread,
    time::{Duration, Instant},
};

use anyhow::{Context, Result, bail};
use clap::{Parser, Subcommand};
use tracing_subscriber::{EnvFilter, fmt, prelude::*};

use quill_lsp::decode::Hover;
use quill_lsp::{LspConfig, LspError, LspEvent, LspManager, Position, ServerConfig, ServerStopReason, handlers};

use config::QuillConfig;

/// Messages handled per loop iteration.
const POLL_BUDGET: usize = 64;
const TICK: Duration = Duration::from_millis(20);
const SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(2);

#[derive(Parser, Debug)]
#[command(name = "quill")]
#[command(about = "Query a language server from the command line")]
#[command(version)]
struct Cli {
    /// Use this server command instead of the configured servers.
    #[arg(long, global = true)]
    server: Option<String>,

    /// Language identifier for `--server` (defaults to the file extension).
    #[arg(long, global = true)]
    language: Option<String>,

    /// Seconds to wait for the server.
    #[arg(long, global = true, default_value_t = 30)]
    timeout: u64,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Print the diagnostics published for a file.
    Check { file: PathBuf },
    /// Print hover information at a position.
    Hover { file: PathBuf, line: u32, col: u32 },
}

fn init_tracing() {
    let env_filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new("info"))
        .unwrap_or_else(|_| EnvFilter::new("warn"));

    let (log_file, init_warnings) = open_quill_log_file();

    if let Some((log_path, file)) = log_file {
        tracing_subscriber::registry()
            .with(fmt::layer().with_ansi(false).with_writer(Mutex::new(file)))
            .with(env_filter)
            .init();

        tracing::info!(path = %log_path.display(), "Logging initialized");
        for warning in init_warnings {
            tracing::warn!("{warning}");
        }
        return;
    }

    // The terminal is reserved for command output.
    tracing_subscriber::registry().with(env_filter).init();
}

fn open_quill_log_file() -> (Option<(PathBuf, fs::File)>, Vec<String>) {
    let mut warnings = Vec::new();

    for candidate in quill_log_file_candidates() {
        if let Some(parent) = candidate.parent()
            && let Err(e) = fs::create_dir_all(parent)
        {
            warnings.push(format!(
                "Failed to create log dir {}: {e}",
                parent.display()
            ));
            continue;
        }

        match OpenOptions::new().create(true).append(true).open(&candidate) {
            Ok(file) => return (Some((candidate, file)), warnings),
            Err(e) => {
                warnings.push(format!(
                    "Failed to open log file {}: {e}",
                    candidate.display()
                ));
            }
        }
    }

    (None, warnings)
}

fn quill_log_file_candidates() -> Vec<PathBuf> {
    let mut candidates = Vec::new();

    // Primary: <data_local_dir>/quill/logs/quill.log
    if let Some(data_dir) = dirs::data_local_dir() {
        candidates.push(data_dir.join("quill").join("logs").join("quill.log"));
    }

    // Fallback: ./.quill/logs/quill.log
    candidates.push(PathBuf::from(".quill").join("logs").join("quill.log"));

    candidates
}

/// Config from `--server`, or the user's config file.
fn lsp_config(cli: &Cli, file: &Path) -> Result<LspConfig> {
    let Some(command) = &cli.server else {
        return Ok(QuillConfig::load()?.lsp);
    };
    let Some(ext) = file.extension().and_then(|e| e.to_str()) else {
        bail!("--server needs a file with an extension: {}", file.display());
    };
    let mut parts = command.split_whitespace();
    let Some(program) = parts.next() else {
        bail!("--server command is empty");
    };
    let language_id = cli.language.clone().unwrap_or_else(|| ext.to_string());
    let server = ServerConfig::new(config::expand_env_vars(program), language_id)
        .with_args(parts.map(config::expand_env_vars))
        .with_extensions([ext]);
    Ok(LspConfig::default().with_server("cli", server))
}

/// Poll until `done` returns a value, the server gives up, or `deadline`.
fn drive<R>(
    manager: &mut LspManager,
    deadline: Instant,
    mut done: impl FnMut(&mut LspManager, &[LspEvent]) -> Result<Option<R>>,
) -> Result<R> {
    loop {
        manager.poll(POLL_BUDGET);
        let events = manager.take_events();
        for event in &events {
            match event {
                LspEvent::Message { server, level, text } => {
                    tracing::info!(server = %server, ?level, "{text}");
                }
                LspEvent::ServerStopped {
                    server,
                    reason: ServerStopReason::Failed(reason),
                } => bail!("language server '{server}' stopped: {reason}"),
                LspEvent::ServerRestarted { server } => {
                    tracing::warn!(server = %server, "Language server restarted");
                }
                _ => {}
            }
        }
        if let Some(result) = done(manager, &events)? {
            return Ok(result);
        }
        if Instant::now() >= deadline {
            bail!("timed out waiting for the language server");
        }
        thread::sleep(TICK);
    }
}

fn open(manager: &mut LspManager, file: &Path) -> Result<String> {
    let text = fs::read_to_string(file)
        .with_context(|| format!("Failed to read {}", file.display()))?;
    match manager.open_document(file, &text)? {
        Some(uri) => Ok(uri),
        None => bail!("no language server configured for {}", file.display()),
    }
}

fn check(manager: &mut LspManager, file: &Path, deadline: Instant) -> Result<ExitCode> {
    let uri = open(manager, file)?;
    drive(manager, deadline, |_, events| {
        Ok(events
            .iter()
            .any(|event| matches!(event, LspEvent::Diagnostics { uri: u, .. } if *u == uri))
            .then_some(()))
    })?;

    let name = file.display().to_string();
    let diagnostics = manager.diagnostics().get(&uri).unwrap_or_default();
    for diagnostic in diagnostics {
        println!("{}", diagnostic.display_with_name(&name));
    }

    let snapshot = manager.snapshot();
    if !snapshot.is_empty() {
        eprintln!("{}", snapshot.status_string());
    }
    let has_errors = diagnostics.iter().any(|d| d.severity().is_error());
    Ok(if has_errors {
        ExitCode::FAILURE
    } else {
        ExitCode::SUCCESS
    })
}

type HoverSlot = Arc<Mutex<Option<Result<Option<Hover>, LspError>>>>;

fn hover(manager: &mut LspManager, file: &Path, position: Position, deadline: Instant) -> Result<ExitCode> {
    open(manager, file)?;
    drive(manager, deadline, |manager, _| Ok(manager.is_ready(file).then_some(())))?;

    let slot: HoverSlot = Arc::default();
    let sink = Arc::clone(&slot);
    manager.with_connection(file, |conn, uri| {
        handlers::hover(conn, uri, position, move |result| {
            if let Ok(mut slot) = sink.lock() {
                *slot = Some(result);
            }
        })
    })?;

    let result = drive(manager, deadline, |_, _| {
        Ok(slot.lock().ok().and_then(|mut slot| slot.take()))
    })?;

    match result? {
        Some(hover) => {
            println!("{}", hover.text);
            Ok(ExitCode::SUCCESS)
        }
        None => {
            eprintln!("no hover information");
            Ok(ExitCode::FAILURE)
        }
    }
}

fn main() -> Result<ExitCode> {
    init_tracing();
    let cli = Cli::parse();

    let file = match &cli.command {
        Command::Check { file } | Command::Hover { file, .. } => file,
    };
    let file = fs::canonicalize(file).with_context(|| format!("Cannot open {}", file.display()))?;
    let config = lsp_config(&cli, &file)?;
    let deadline = Instant::now() + Duration::from_secs(cli.timeout);

    let mut manager = LspManager::new(config, None);
    let outcome = match cli.command {
        Command::Check { .. } => check(&mut manager, &file, deadline),
        Command::Hover { line, col, .. } => {
            let position = Position::new(line.saturating_sub(1), col.saturating_sub(1));
            hover(&mut manager, &file, position, deadline)
        }
    };
    manager.shutdown(SHUTDOWN_TIMEOUT);
    outcome
}
