//! JSON-RPC envelopes, inbound classification, and LSP parameter builders.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::types::{Diagnostic, DiagnosticSeverity, Position, Range};

#[derive(Debug, thiserror::Error)]
#[error("cannot convert path to file URI: {}", path.display())]
pub struct PathToUriError {
    path: PathBuf,
}

pub(crate) const JSONRPC_VERSION: &str = "2.0";

/// JSON-RPC "method not found" error code.
pub(crate) const METHOD_NOT_FOUND: i64 = -32601;

#[derive(Debug, Serialize)]
pub(crate) struct Request<'a> {
    pub jsonrpc: &'static str,
    pub id: u32,
    pub method: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub params: Option<Value>,
}

impl<'a> Request<'a> {
    pub fn new(id: u32, method: &'a str, params: Option<Value>) -> Self {
        Self {
            jsonrpc: JSONRPC_VERSION,
            id,
            method,
            params,
        }
    }
}

#[derive(Debug, Serialize)]
pub(crate) struct Notification<'a> {
    pub jsonrpc: &'static str,
    pub method: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub params: Option<Value>,
}

impl<'a> Notification<'a> {
    pub fn new(method: &'a str, params: Option<Value>) -> Self {
        Self {
            jsonrpc: JSONRPC_VERSION,
            method,
            params,
        }
    }
}

/// Reply to a server-initiated request.
#[derive(Debug, Serialize)]
pub(crate) struct Response {
    pub jsonrpc: &'static str,
    pub id: Value,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<ResponseError>,
}

impl Response {
    pub fn ok(id: Value, result: Value) -> Self {
        Self {
            jsonrpc: JSONRPC_VERSION,
            id,
            result: Some(result),
            error: None,
        }
    }

    pub fn method_not_found(id: Value, method: &str) -> Self {
        Self {
            jsonrpc: JSONRPC_VERSION,
            id,
            result: None,
            error: Some(ResponseError {
                code: METHOD_NOT_FOUND,
                message: format!("Method not found: {method}"),
            }),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub(crate) struct ResponseError {
    pub code: i64,
    #[serde(default)]
    pub message: String,
}

/// Minimal structural view of any inbound message.
///
/// `result` is kept as raw JSON so large payloads are parsed once, by the
/// decoder that knows their shape.
#[derive(Debug, Deserialize)]
struct Envelope {
    #[serde(default)]
    id: Option<Value>,
    #[serde(default)]
    method: Option<String>,
    #[serde(default)]
    params: Option<Value>,
    #[serde(default)]
    result: Option<Value>,
    /// Decoded only after classification so a malformed error body still
    /// completes its request.
    #[serde(default)]
    error: Option<Value>,
}

/// Why a response carries no result.
#[derive(Debug)]
pub(crate) enum ResponseFailure {
    Server(ResponseError),
    /// The `error` member is not a valid JSON-RPC error object.
    Malformed(serde_json::Error),
}

/// Classified inbound message.
#[derive(Debug)]
pub(crate) enum Incoming {
    Response {
        id: Option<Value>,
        outcome: Result<Value, ResponseFailure>,
    },
    ServerRequest {
        id: Value,
        method: String,
        params: Value,
    },
    Notification {
        method: String,
        params: Value,
    },
}

/// Classify by structure: a `method` makes it a notification (or, with an
/// `id`, a server request); otherwise it is a response.
pub(crate) fn classify(body: &[u8]) -> Result<Incoming, serde_json::Error> {
    let envelope: Envelope = serde_json::from_slice(body)?;
    let id = envelope.id.filter(|id| !id.is_null());

    Ok(match (envelope.method, id) {
        (Some(method), Some(id)) => Incoming::ServerRequest {
            id,
            method,
            params: envelope.params.unwrap_or(Value::Null),
        },
        (Some(method), None) => Incoming::Notification {
            method,
            params: envelope.params.unwrap_or(Value::Null),
        },
        (None, id) => Incoming::Response {
            id,
            outcome: match envelope.error {
                Some(error) => Err(serde_json::from_value(error)
                    .map_or_else(ResponseFailure::Malformed, ResponseFailure::Server)),
                // An absent `result` is treated as `null`.
                None => Ok(envelope.result.unwrap_or(Value::Null)),
            },
        },
    })
}

// ── Parameter builders ─────────────────────────────────────────────────

pub(crate) fn client_capabilities() -> Value {
    serde_json::json!({
        "textDocument": {
            "synchronization": {
                "dynamicRegistration": false,
                "willSave": false,
                "willSaveWaitUntil": false,
                "didSave": true
            },
            "completion": {
                "completionItem": {
                    "snippetSupport": false,
                    "documentationFormat": ["plaintext", "markdown"]
                }
            },
            "hover": { "contentFormat": ["plaintext", "markdown"] },
            "signatureHelp": {
                "signatureInformation": {
                    "documentationFormat": ["plaintext", "markdown"],
                    "parameterInformation": { "labelOffsetSupport": true }
                }
            },
            "definition": { "linkSupport": true },
            "references": {},
            "formatting": {},
            "codeAction": {
                "codeActionLiteralSupport": {
                    "codeActionKind": {
                        "valueSet": ["quickfix", "refactor", "source"]
                    }
                }
            },
            "documentSymbol": { "hierarchicalDocumentSymbolSupport": true },
            "rename": { "prepareSupport": true },
            "publishDiagnostics": { "relatedInformation": false }
        },
        "window": { "workDoneProgress": true },
        "workspace": { "configuration": true, "workspaceFolders": true }
    })
}

pub(crate) fn initialize_params(root_uri: Option<&str>, options: Option<&Value>) -> Value {
    let mut params = serde_json::json!({
        "processId": std::process::id(),
        "clientInfo": { "name": "quill", "version": env!("CARGO_PKG_VERSION") },
        "rootUri": root_uri,
        "capabilities": client_capabilities(),
    });
    if let Some(root) = root_uri {
        params["workspaceFolders"] = serde_json::json!([{ "uri": root, "name": "workspace" }]);
    }
    if let Some(options) = options {
        params["initializationOptions"] = options.clone();
    }
    params
}

pub(crate) fn did_open_params(uri: &str, language_id: &str, version: i32, text: &str) -> Value {
    serde_json::json!({
        "textDocument": {
            "uri": uri,
            "languageId": language_id,
            "version": version,
            "text": text
        }
    })
}

pub(crate) fn did_change_params(uri: &str, version: i32, text: &str) -> Value {
    serde_json::json!({
        "textDocument": {
            "uri": uri,
            "version": version
        },
        "contentChanges": [{
            "text": text
        }]
    })
}

pub(crate) fn did_save_params(uri: &str, text: Option<&str>) -> Value {
    let mut params = serde_json::json!({ "textDocument": { "uri": uri } });
    if let Some(text) = text {
        params["text"] = Value::String(text.to_string());
    }
    params
}

pub(crate) fn text_document_params(uri: &str) -> Value {
    serde_json::json!({ "textDocument": { "uri": uri } })
}

pub(crate) fn position_params(uri: &str, position: Position) -> Value {
    serde_json::json!({
        "textDocument": { "uri": uri },
        "position": position
    })
}

// ── Diagnostics ────────────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
pub(crate) struct PublishDiagnosticsParams {
    pub uri: String,
    #[serde(default)]
    pub diagnostics: Vec<Value>,
}

#[derive(Debug, Deserialize)]
pub(crate) struct LspDiagnostic {
    pub range: Range,
    pub severity: Option<u64>,
    pub code: Option<Value>,
    pub source: Option<String>,
    pub message: String,
}

impl LspDiagnostic {
    /// Missing or unknown severities are treated as errors.
    pub fn into_diagnostic(self) -> Diagnostic {
        let severity = self
            .severity
            .and_then(DiagnosticSeverity::from_lsp)
            .unwrap_or(DiagnosticSeverity::Error);
        let mut diag = Diagnostic::new(self.range, severity, self.message);
        match self.code {
            Some(Value::String(code)) => diag = diag.with_code(code),
            Some(Value::Number(code)) => diag = diag.with_code(code.to_string()),
            _ => {}
        }
        if let Some(source) = self.source {
            diag = diag.with_source(source);
        }
        diag
    }
}

/// Wire form of a stored diagnostic, for code action contexts.
pub(crate) fn diagnostic_to_lsp(diag: &Diagnostic) -> Value {
    let mut value = serde_json::json!({
        "range": diag.range(),
        "severity": diag.severity() as u8,
        "message": diag.message(),
    });
    if let Some(code) = diag.code() {
        value["code"] = Value::String(code.to_string());
    }
    if let Some(source) = diag.source() {
        value["source"] = Value::String(source.to_string());
    }
    value
}

impl PublishDiagnosticsParams {
    /// Convert the wire diagnostics, skipping malformed entries.
    pub fn into_diagnostics(self) -> Vec<Diagnostic> {
        self.diagnostics
            .into_iter()
            .filter_map(|raw| match serde_json::from_value::<LspDiagnostic>(raw) {
                Ok(diag) => Some(diag.into_diagnostic()),
                Err(e) => {
                    tracing::debug!(error = %e, "Skipping malformed diagnostic");
                    None
                }
            })
            .collect()
    }
}

// ── URIs ───────────────────────────────────────────────────────────────

pub fn path_to_file_uri(path: &Path) -> Result<url::Url, PathToUriError> {
    url::Url::from_file_path(path).map_err(|()| PathToUriError {
        path: path.to_path_buf(),
    })
}

#[must_use]
pub fn file_uri_to_path(uri: &str) -> Option<PathBuf> {
    url::Url::parse(uri)
        .ok()
        .and_then(|u| u.to_file_path().ok())
}
