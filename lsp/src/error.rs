//! Error taxonomy for the LSP runtime.
//!
//! Variants are grouped by where they originate: process lifecycle, framing,
//! protocol state, request correlation, the remote server, and response
//! decoding. Framing and correlation errors abort a single poll cycle; they
//! never tear down the process-management loop.

use thiserror::Error;

use crate::client::ConnectionState;

/// Errors produced by the LSP runtime.
#[derive(Debug, Error)]
pub enum LspError {
    // ── Process lifecycle ──────────────────────────────────────────────
    /// `spawn()` was called while the subprocess is still running.
    #[error("language server process is already running")]
    AlreadyRunning,

    /// An operation needed a live subprocess but none is running.
    #[error("language server process is not running")]
    ProcessNotRunning,

    /// The restart budget is exhausted.
    #[error("language server restarted too many times ({attempts} attempts)")]
    TooManyRestarts { attempts: u32 },

    /// The configured command could not be found on `PATH`.
    #[error("{command} not found in PATH")]
    NotFound { command: String },

    /// The operating system refused to start the command.
    #[error("failed to spawn language server '{command}': {source}")]
    Spawn {
        command: String,
        #[source]
        source: std::io::Error,
    },

    // ── Framing ────────────────────────────────────────────────────────
    /// A header block ended without a `Content-Length` header.
    #[error("missing Content-Length header")]
    MissingContentLength,

    /// The `Content-Length` value is not a non-negative integer.
    #[error("invalid Content-Length value: {0}")]
    InvalidContentLength(String),

    /// The declared body length exceeds the reader's limit.
    #[error("message of {length} bytes exceeds limit of {limit} bytes")]
    MessageTooLarge { length: usize, limit: usize },

    /// The stream closed before a full message was read.
    #[error("unexpected end of stream while reading message")]
    UnexpectedEof,

    // ── Protocol state ─────────────────────────────────────────────────
    #[error("connection is already initialized")]
    AlreadyInitialized,

    #[error("connection is not initialized")]
    NotInitialized,

    #[error("cannot {operation} while connection is {state:?}")]
    InvalidState {
        state: ConnectionState,
        operation: &'static str,
    },

    // ── Correlation ────────────────────────────────────────────────────
    #[error("response for unknown request id {0}")]
    UnknownRequestId(u32),

    #[error("response without an id")]
    ResponseWithoutId,

    // ── Server-reported ────────────────────────────────────────────────
    #[error("server error {code}: {message}")]
    ServerError { code: i64, message: String },

    // ── Documents ──────────────────────────────────────────────────────
    #[error("document is not open: {0}")]
    DocumentNotOpen(String),

    #[error("document is already open: {0}")]
    DocumentAlreadyOpen(String),

    /// The document version cannot be incremented further; reopen it.
    #[error("document version exhausted: {0}")]
    VersionExhausted(String),

    #[error(transparent)]
    InvalidPath(#[from] crate::protocol::PathToUriError),

    // ── Decoding ───────────────────────────────────────────────────────
    #[error("cannot rename at this position")]
    CannotRename,

    #[error("malformed response: {0}")]
    Decode(#[from] DecodeError),

    // ── Infrastructure ─────────────────────────────────────────────────
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl LspError {
    #[must_use]
    pub fn server_error(code: i64, message: impl Into<String>) -> Self {
        Self::ServerError {
            code,
            message: message.into(),
        }
    }

    /// Whether this error means the subprocess is gone and the restart
    /// policy should run.
    #[must_use]
    pub fn is_fatal_to_transport(&self) -> bool {
        matches!(
            self,
            Self::UnexpectedEof | Self::ProcessNotRunning | Self::Io(_)
        )
    }
}

/// Structural failures of a response body as a whole.
///
/// Malformed elements inside an array response never produce this error;
/// they are skipped by the decoders.
#[derive(Debug, Error)]
pub enum DecodeError {
    #[error("missing field `{0}`")]
    MissingField(&'static str),

    #[error("expected {expected}, found {found}")]
    InvalidShape {
        expected: &'static str,
        found: &'static str,
    },

    #[error("invalid JSON: {0}")]
    Json(#[from] serde_json::Error),
}

impl DecodeError {
    pub(crate) fn invalid_shape(expected: &'static str, found: &serde_json::Value) -> Self {
        Self::InvalidShape {
            expected,
            found: json_kind(found),
        }
    }
}

pub(crate) fn json_kind(value: &serde_json::Value) -> &'static str {
    match value {
        serde_json::Value::Null => "null",
        serde_json::Value::Bool(_) => "boolean",
        serde_json::Value::Number(_) => "number",
        serde_json::Value::String(_) => "string",
        serde_json::Value::Array(_) => "array",
        serde_json::Value::Object(_) => "object",
    }
}
