//! LSP client runtime for the quill editor.
//!
//! Spawns language servers as subprocesses, speaks JSON-RPC 2.0 over their
//! stdio, keeps open buffers in sync, and decodes diagnostics and feature
//! responses into editor-facing types. Nothing here blocks: the editor calls
//! [`LspManager::poll`] from its main loop.

pub mod client;
pub mod codec;
pub mod decode;
pub mod diagnostics;
pub mod documents;
pub mod handlers;
pub mod process;
pub mod protocol;
pub mod stderr_log;
pub mod types;

mod error;
mod manager;

pub use client::{Connection, ConnectionState, Transport};
pub use diagnostics::DiagnosticsStore;
pub use documents::DocumentSynchronizer;
pub use error::{DecodeError, LspError};
pub use manager::{Launcher, LspManager, ServerTransport};
pub use process::{Process, ProcessConfig};
pub use protocol::{PathToUriError, file_uri_to_path, path_to_file_uri};
pub use types::{
    Diagnostic, DiagnosticSeverity, DiagnosticsSnapshot, LspConfig, LspEvent, MessageLevel,
    Position, Range, ServerConfig, ServerStopReason, SeverityCounts,
};

pub type Result<T, E = LspError> = std::result::Result<T, E>;
