//! Public types shared with the editor.
//!
//! The editor constructs [`LspConfig`], receives [`LspEvent`]s, and reads
//! [`Diagnostic`]s and [`DiagnosticsSnapshot`]s for gutter and status-bar
//! rendering.

use std::collections::HashMap;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::codec::DEFAULT_MAX_MESSAGE_BYTES;

const fn default_max_restarts() -> u32 {
    3
}

const fn default_restart_base_delay_ms() -> u64 {
    250
}

const fn default_max_message_bytes() -> usize {
    DEFAULT_MAX_MESSAGE_BYTES
}

/// Configuration for the LSP client subsystem.
#[derive(Debug, Clone, Deserialize)]
pub struct LspConfig {
    /// Whether the LSP client is enabled. Default: false.
    #[serde(default)]
    enabled: bool,
    /// Restarts allowed per server before it is disabled for the session.
    #[serde(default = "default_max_restarts")]
    max_restarts: u32,
    /// Base of the exponential restart backoff.
    #[serde(default = "default_restart_base_delay_ms")]
    restart_base_delay_ms: u64,
    /// Largest accepted message body.
    #[serde(default = "default_max_message_bytes")]
    max_message_bytes: usize,
    /// Per-language server configurations, keyed by name (e.g. "rust").
    #[serde(default)]
    servers: HashMap<String, ServerConfig>,
}

impl Default for LspConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            max_restarts: default_max_restarts(),
            restart_base_delay_ms: default_restart_base_delay_ms(),
            max_message_bytes: default_max_message_bytes(),
            servers: HashMap::new(),
        }
    }
}

impl LspConfig {
    #[must_use]
    pub fn enabled(&self) -> bool {
        self.enabled
    }

    #[must_use]
    pub fn max_restarts(&self) -> u32 {
        self.max_restarts
    }

    #[must_use]
    pub fn restart_base_delay(&self) -> Duration {
        Duration::from_millis(self.restart_base_delay_ms)
    }

    #[must_use]
    pub fn max_message_bytes(&self) -> usize {
        self.max_message_bytes
    }

    #[must_use]
    pub fn servers(&self) -> &HashMap<String, ServerConfig> {
        &self.servers
    }

    /// Enable the client and register one more server.
    #[must_use]
    pub fn with_server(mut self, name: impl Into<String>, server: ServerConfig) -> Self {
        self.enabled = true;
        self.servers.insert(name.into(), server);
        self
    }

    /// Apply `f` to every server's command and arguments.
    pub fn map_commands(&mut self, mut f: impl FnMut(&str) -> String) {
        for server in self.servers.values_mut() {
            server.command = f(&server.command);
            for arg in &mut server.args {
                *arg = f(arg);
            }
        }
    }
}

/// Configuration for a single language server.
#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    /// Executable command (e.g. "rust-analyzer").
    command: String,
    /// Arguments to pass to the command.
    #[serde(default)]
    args: Vec<String>,
    /// LSP language identifier (e.g. "rust", "zig").
    language_id: String,
    /// File extensions this server handles (e.g. `["rs"]`).
    #[serde(default)]
    file_extensions: Vec<String>,
    /// File name globs this server handles (e.g. `["Dockerfile", "*.zon"]`).
    #[serde(default)]
    file_patterns: Vec<String>,
    /// Files that indicate a workspace root (e.g. `["Cargo.toml"]`).
    #[serde(default)]
    root_markers: Vec<String>,
    /// Passed verbatim as `initializationOptions`.
    #[serde(default)]
    initialization_options: Option<serde_json::Value>,
}

impl ServerConfig {
    #[must_use]
    pub fn new(command: impl Into<String>, language_id: impl Into<String>) -> Self {
        Self {
            command: command.into(),
            args: Vec::new(),
            language_id: language_id.into(),
            file_extensions: Vec::new(),
            file_patterns: Vec::new(),
            root_markers: Vec::new(),
            initialization_options: None,
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
    pub fn with_extensions<I, S>(mut self, exts: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.file_extensions = exts.into_iter().map(Into::into).collect();
        self
    }

    #[must_use]
    pub fn with_patterns<I, S>(mut self, patterns: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.file_patterns = patterns.into_iter().map(Into::into).collect();
        self
    }

    #[must_use]
    pub fn command(&self) -> &str {
        &self.command
    }

    #[must_use]
    pub fn args(&self) -> &[String] {
        &self.args
    }

    #[must_use]
    pub fn language_id(&self) -> &str {
        &self.language_id
    }

    #[must_use]
    pub fn file_extensions(&self) -> &[String] {
        &self.file_extensions
    }

    #[must_use]
    pub fn file_patterns(&self) -> &[String] {
        &self.file_patterns
    }

    #[must_use]
    pub fn root_markers(&self) -> &[String] {
        &self.root_markers
    }

    #[must_use]
    pub fn initialization_options(&self) -> Option<&serde_json::Value> {
        self.initialization_options.as_ref()
    }
}

/// Zero-based line and UTF-16 character offset.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Position {
    pub line: u32,
    pub character: u32,
}

impl Position {
    #[must_use]
    pub const fn new(line: u32, character: u32) -> Self {
        Self { line, character }
    }
}

/// Half-open range between two positions.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Range {
    pub start: Position,
    pub end: Position,
}

impl Range {
    #[must_use]
    pub const fn new(start: Position, end: Position) -> Self {
        Self { start, end }
    }
}

/// Severity level for a diagnostic.
///
/// Ordered so that the most severe level compares lowest.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum DiagnosticSeverity {
    Error = 1,
    Warning = 2,
    Information = 3,
    Hint = 4,
}

impl DiagnosticSeverity {
    /// Convert from LSP numeric severity (1=Error, 2=Warning, 3=Info, 4=Hint).
    ///
    /// Returns `None` for values outside the LSP-defined range.
    #[must_use]
    pub fn from_lsp(value: u64) -> Option<Self> {
        match value {
            1 => Some(Self::Error),
            2 => Some(Self::Warning),
            3 => Some(Self::Information),
            4 => Some(Self::Hint),
            _ => None,
        }
    }

    #[must_use]
    pub fn is_error(self) -> bool {
        self == Self::Error
    }

    #[must_use]
    pub fn label(self) -> &'static str {
        match self {
            Self::Error => "error",
            Self::Warning => "warning",
            Self::Information => "info",
            Self::Hint => "hint",
        }
    }
}

/// A single diagnostic published by a language server.
///
/// Fields are private; external consumers read via accessors.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Diagnostic {
    range: Range,
    severity: DiagnosticSeverity,
    code: Option<String>,
    source: Option<String>,
    message: String,
}

impl Diagnostic {
    #[must_use]
    pub fn new(range: Range, severity: DiagnosticSeverity, message: impl Into<String>) -> Self {
        Self {
            range,
            severity,
            code: None,
            source: None,
            message: message.into(),
        }
    }

    #[must_use]
    pub fn with_code(mut self, code: impl Into<String>) -> Self {
        self.code = Some(code.into());
        self
    }

    #[must_use]
    pub fn with_source(mut self, source: impl Into<String>) -> Self {
        self.source = Some(source.into());
        self
    }

    #[must_use]
    pub fn range(&self) -> Range {
        self.range
    }

    #[must_use]
    pub fn severity(&self) -> DiagnosticSeverity {
        self.severity
    }

    #[must_use]
    pub fn code(&self) -> Option<&str> {
        self.code.as_deref()
    }

    #[must_use]
    pub fn source(&self) -> Option<&str> {
        self.source.as_deref()
    }

    #[must_use]
    pub fn message(&self) -> &str {
        &self.message
    }

    /// 0-indexed line the diagnostic starts on.
    #[must_use]
    pub fn line(&self) -> u32 {
        self.range.start.line
    }

    /// Format as `name:line:col: severity: [source] message` (1-indexed).
    #[must_use]
    pub fn display_with_name(&self, name: &str) -> String {
        format!(
            "{}:{}:{}: {}: [{}] {}",
            name,
            self.range.start.line + 1,
            self.range.start.character + 1,
            self.severity.label(),
            self.source.as_deref().unwrap_or("unknown"),
            self.message,
        )
    }
}

/// Per-severity totals across every tracked document.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SeverityCounts {
    pub errors: usize,
    pub warnings: usize,
    pub information: usize,
    pub hints: usize,
}

impl SeverityCounts {
    pub(crate) fn add(&mut self, severity: DiagnosticSeverity) {
        match severity {
            DiagnosticSeverity::Error => self.errors += 1,
            DiagnosticSeverity::Warning => self.warnings += 1,
            DiagnosticSeverity::Information => self.information += 1,
            DiagnosticSeverity::Hint => self.hints += 1,
        }
    }

    #[must_use]
    pub fn total(&self) -> usize {
        self.errors + self.warnings + self.information + self.hints
    }
}

/// Immutable snapshot of all diagnostics, suitable for UI rendering.
#[derive(Debug, Clone, Default)]
pub struct DiagnosticsSnapshot {
    /// Per-document diagnostics, sorted with error-containing documents first.
    files: Vec<(String, Vec<Diagnostic>)>,
}

impl DiagnosticsSnapshot {
    pub(crate) fn new(files: Vec<(String, Vec<Diagnostic>)>) -> Self {
        Self { files }
    }

    #[must_use]
    pub fn files(&self) -> &[(String, Vec<Diagnostic>)] {
        &self.files
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.files.is_empty()
    }

    #[must_use]
    pub fn counts(&self) -> SeverityCounts {
        let mut counts = SeverityCounts::default();
        for diag in self.files.iter().flat_map(|(_, items)| items) {
            counts.add(diag.severity());
        }
        counts
    }

    /// Format a compact status string like "E:3 W:5".
    #[must_use]
    pub fn status_string(&self) -> String {
        if self.is_empty() {
            return String::new();
        }
        let counts = self.counts();
        format!("E:{} W:{}", counts.errors, counts.warnings)
    }
}

/// Severity of a `window/logMessage` or `window/showMessage`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MessageLevel {
    Error,
    Warning,
    Info,
    Log,
}

impl MessageLevel {
    #[must_use]
    pub fn from_lsp(value: u64) -> Self {
        match value {
            1 => Self::Error,
            2 => Self::Warning,
            3 => Self::Info,
            _ => Self::Log,
        }
    }
}

/// An event emitted by the LSP subsystem.
#[derive(Debug, Clone, PartialEq)]
pub enum LspEvent {
    /// Diagnostics were replaced for a document.
    Diagnostics { uri: String, count: usize },
    /// The server logged or asked to show a message.
    Message {
        server: String,
        level: MessageLevel,
        text: String,
    },
    /// The server crashed and was restarted; open documents must be re-sent.
    ServerRestarted { server: String },
    /// The server is gone for the rest of the session.
    ServerStopped {
        server: String,
        reason: ServerStopReason,
    },
}

/// Why a server stopped.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ServerStopReason {
    /// Clean shutdown requested by the editor.
    Exited,
    /// Crashed past its restart budget, or failed to start.
    Failed(String),
}
