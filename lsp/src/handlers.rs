//! Method handlers: build LSP requests and notifications on a [`Connection`].
//!
//! Handlers are stateless. Each one checks that the connection is ready,
//! builds the params, and for requests wraps the caller's typed callback
//! around the matching decoder.

use serde_json::Value;

use crate::client::{Connection, Transport};
use crate::decode::{
    self, CodeActionOrCommand, CompletionList, DocumentSymbol, FileEdits, Hover, Location,
    PrepareRename, SignatureHelp, TextEdit,
};
use crate::documents::{DocumentNotification, DocumentSynchronizer};
use crate::error::LspError;
use crate::protocol;
use crate::types::{Diagnostic, Position, Range};

fn ensure_ready<T: Transport>(conn: &Connection<T>) -> Result<(), LspError> {
    if conn.is_ready() {
        Ok(())
    } else {
        Err(LspError::NotInitialized)
    }
}

/// Send a request whose result is decoded before reaching `callback`.
fn request<T, R, E, D, F>(
    conn: &mut Connection<T>,
    method: &str,
    params: Value,
    decode: D,
    callback: F,
) -> Result<u32, LspError>
where
    T: Transport,
    E: Into<LspError>,
    D: FnOnce(&Value) -> Result<R, E> + Send + 'static,
    F: FnOnce(Result<R, LspError>) + Send + 'static,
{
    ensure_ready(conn)?;
    conn.send_request(
        method,
        Some(params),
        Box::new(move |result| callback(result.and_then(|value| decode(&value).map_err(Into::into)))),
    )
}

/// Apply `change` to `documents` and send the resulting notification.
///
/// The document state is rolled back if the notification cannot be written,
/// so it never runs ahead of what the server has seen.
fn sync<T, C>(
    conn: &mut Connection<T>,
    documents: &mut DocumentSynchronizer,
    uri: &str,
    change: C,
) -> Result<i32, LspError>
where
    T: Transport,
    C: FnOnce(&mut DocumentSynchronizer) -> Result<DocumentNotification, LspError>,
{
    ensure_ready(conn)?;
    let previous = documents.get(uri).cloned();
    let notification = change(documents)?;
    if let Err(e) = conn.send_notification(notification.method, Some(notification.params)) {
        documents.restore(uri, previous);
        return Err(e);
    }
    Ok(notification.version)
}

/// Start the handshake. `callback` receives the raw `InitializeResult`.
pub fn initialize<T, F>(
    conn: &mut Connection<T>,
    root_uri: Option<&str>,
    initialization_options: Option<&Value>,
    callback: F,
) -> Result<u32, LspError>
where
    T: Transport,
    F: FnOnce(Result<Value, LspError>) + Send + 'static,
{
    let params = protocol::initialize_params(root_uri, initialization_options);
    conn.initialize(params, Box::new(callback))
}

// ── Document lifecycle ─────────────────────────────────────────────────

/// Returns the document version sent.
pub fn did_open<T: Transport>(
    conn: &mut Connection<T>,
    documents: &mut DocumentSynchronizer,
    uri: &str,
    language_id: &str,
    text: &str,
) -> Result<i32, LspError> {
    sync(conn, documents, uri, |docs| docs.did_open(uri, language_id, text))
}

pub fn did_change<T: Transport>(
    conn: &mut Connection<T>,
    documents: &mut DocumentSynchronizer,
    uri: &str,
    text: &str,
) -> Result<i32, LspError> {
    sync(conn, documents, uri, |docs| docs.did_change(uri, text))
}

pub fn did_save<T: Transport>(
    conn: &mut Connection<T>,
    documents: &mut DocumentSynchronizer,
    uri: &str,
    text: Option<&str>,
) -> Result<i32, LspError> {
    sync(conn, documents, uri, |docs| docs.did_save(uri, text))
}

pub fn did_close<T: Transport>(
    conn: &mut Connection<T>,
    documents: &mut DocumentSynchronizer,
    uri: &str,
) -> Result<i32, LspError> {
    sync(conn, documents, uri, |docs| docs.did_close(uri))
}

// ── Feature requests ───────────────────────────────────────────────────

pub fn completion<T, F>(conn: &mut Connection<T>, uri: &str, position: Position, callback: F) -> Result<u32, LspError>
where
    T: Transport,
    F: FnOnce(Result<CompletionList, LspError>) + Send + 'static,
{
    let mut params = protocol::position_params(uri, position);
    params["context"] = serde_json::json!({ "triggerKind": 1 });
    request(conn, "textDocument/completion", params, decode::decode_completion, callback)
}

pub fn hover<T, F>(conn: &mut Connection<T>, uri: &str, position: Position, callback: F) -> Result<u32, LspError>
where
    T: Transport,
    F: FnOnce(Result<Option<Hover>, LspError>) + Send + 'static,
{
    let params = protocol::position_params(uri, position);
    request(conn, "textDocument/hover", params, decode::decode_hover, callback)
}

pub fn definition<T, F>(conn: &mut Connection<T>, uri: &str, position: Position, callback: F) -> Result<u32, LspError>
where
    T: Transport,
    F: FnOnce(Result<Vec<Location>, LspError>) + Send + 'static,
{
    let params = protocol::position_params(uri, position);
    request(conn, "textDocument/definition", params, decode::decode_definition, callback)
}

pub fn references<T, F>(
    conn: &mut Connection<T>,
    uri: &str,
    position: Position,
    include_declaration: bool,
    callback: F,
) -> Result<u32, LspError>
where
    T: Transport,
    F: FnOnce(Result<Vec<Location>, LspError>) + Send + 'static,
{
    let mut params = protocol::position_params(uri, position);
    params["context"] = serde_json::json!({ "includeDeclaration": include_declaration });
    request(conn, "textDocument/references", params, decode::decode_references, callback)
}

pub fn formatting<T, F>(
    conn: &mut Connection<T>,
    uri: &str,
    tab_size: u32,
    insert_spaces: bool,
    callback: F,
) -> Result<u32, LspError>
where
    T: Transport,
    F: FnOnce(Result<Vec<TextEdit>, LspError>) + Send + 'static,
{
    let mut params = protocol::text_document_params(uri);
    params["options"] = serde_json::json!({
        "tabSize": tab_size,
        "insertSpaces": insert_spaces
    });
    request(conn, "textDocument/formatting", params, decode::decode_formatting, callback)
}

/// Request code actions for `range`, passing the diagnostics that overlap it
/// so the server can offer quick fixes.
pub fn code_action<T, F>(
    conn: &mut Connection<T>,
    uri: &str,
    range: Range,
    diagnostics: &[Diagnostic],
    callback: F,
) -> Result<u32, LspError>
where
    T: Transport,
    F: FnOnce(Result<Vec<CodeActionOrCommand>, LspError>) + Send + 'static,
{
    let mut params = protocol::text_document_params(uri);
    params["range"] = serde_json::json!(range);
    params["context"] = serde_json::json!({
        "diagnostics": diagnostics.iter().map(protocol::diagnostic_to_lsp).collect::<Vec<_>>()
    });
    request(conn, "textDocument/codeAction", params, decode::decode_code_actions, callback)
}

pub fn document_symbol<T, F>(conn: &mut Connection<T>, uri: &str, callback: F) -> Result<u32, LspError>
where
    T: Transport,
    F: FnOnce(Result<Vec<DocumentSymbol>, LspError>) + Send + 'static,
{
    let params = protocol::text_document_params(uri);
    request(conn, "textDocument/documentSymbol", params, decode::decode_document_symbols, callback)
}

pub fn signature_help<T, F>(conn: &mut Connection<T>, uri: &str, position: Position, callback: F) -> Result<u32, LspError>
where
    T: Transport,
    F: FnOnce(Result<Option<SignatureHelp>, LspError>) + Send + 'static,
{
    let params = protocol::position_params(uri, position);
    request(conn, "textDocument/signatureHelp", params, decode::decode_signature_help, callback)
}

pub fn prepare_rename<T, F>(conn: &mut Connection<T>, uri: &str, position: Position, callback: F) -> Result<u32, LspError>
where
    T: Transport,
    F: FnOnce(Result<PrepareRename, LspError>) + Send + 'static,
{
    let params = protocol::position_params(uri, position);
    request(conn, "textDocument/prepareRename", params, decode::decode_prepare_rename, callback)
}

pub fn rename<T, F>(
    conn: &mut Connection<T>,
    uri: &str,
    position: Position,
    new_name: &str,
    callback: F,
) -> Result<u32, LspError>
where
    T: Transport,
    F: FnOnce(Result<Vec<FileEdits>, LspError>) + Send + 'static,
{
    let mut params = protocol::position_params(uri, position);
    params["newName"] = Value::String(new_name.to_string());
    request(conn, "textDocument/rename", params, decode::decode_rename, callback)
}

#[cfg(test)]
mod tests {
    use std::sync::{Arc, Mutex};

    use super::*;
    use crate::client::tests::{MockTransport, initialized_connection};
    use crate::types::DiagnosticSeverity;

    type Slot<T> = Arc<Mutex<Option<Result<T, LspError>>>>;

    fn slot<T: Send + 'static>() -> (Slot<T>, impl FnOnce(Result<T, LspError>) + Send + 'static) {
        let slot: Slot<T> = Arc::new(Mutex::new(None));
        let sink = Arc::clone(&slot);
        (slot, move |result| *sink.lock().unwrap() = Some(result))
    }

    fn respond(conn: &mut Connection<MockTransport>, id: u32, result: Value) {
        conn.transport_mut()
            .push(serde_json::json!({ "jsonrpc": "2.0", "id": id, "result": result }));
        assert!(conn.poll().unwrap());
    }

    #[test]
    fn test_requests_require_initialized() {
        let mut conn = Connection::new("test", MockTransport::default());
        let mut docs = DocumentSynchronizer::new();

        assert!(matches!(
            hover(&mut conn, "file:///a.rs", Position::new(0, 0), |_| {}),
            Err(LspError::NotInitialized)
        ));
        assert!(matches!(
            did_open(&mut conn, &mut docs, "file:///a.rs", "rust", ""),
            Err(LspError::NotInitialized)
        ));
        assert!(!docs.is_open("file:///a.rs"));
        assert!(conn.transport().written.is_empty());
    }

    #[test]
    fn test_document_lifecycle_notifications() {
        let mut conn = initialized_connection();
        let mut docs = DocumentSynchronizer::new();

        assert_eq!(did_open(&mut conn, &mut docs, "file:///a.zig", "zig", "x").unwrap(), 1);
        assert_eq!(did_change(&mut conn, &mut docs, "file:///a.zig", "xy").unwrap(), 2);
        assert_eq!(did_change(&mut conn, &mut docs, "file:///a.zig", "xyz").unwrap(), 3);
        did_save(&mut conn, &mut docs, "file:///a.zig", None).unwrap();
        did_close(&mut conn, &mut docs, "file:///a.zig").unwrap();

        let methods: Vec<&str> = conn
            .transport()
            .written
            .iter()
            .map(|m| m["method"].as_str().unwrap())
            .collect();
        assert_eq!(
            methods,
            [
                "textDocument/didOpen",
                "textDocument/didChange",
                "textDocument/didChange",
                "textDocument/didSave",
                "textDocument/didClose"
            ]
        );
        assert_eq!(conn.transport().written[2]["params"]["textDocument"]["version"], 3);
        assert!(conn.transport().written.iter().all(|m| m.get("id").is_none()));
    }

    #[test]
    fn test_change_unopened_document() {
        let mut conn = initialized_connection();
        let mut docs = DocumentSynchronizer::new();
        assert!(matches!(
            did_change(&mut conn, &mut docs, "file:///nope.rs", "x"),
            Err(LspError::DocumentNotOpen(_))
        ));
    }

    #[test]
    fn test_failed_write_leaves_documents_untouched() {
        let mut conn = initialized_connection();
        let mut docs = DocumentSynchronizer::new();

        conn.transport_mut().dead = true;
        assert!(matches!(
            did_open(&mut conn, &mut docs, "file:///a.rs", "rust", "x"),
            Err(LspError::ProcessNotRunning)
        ));
        assert!(!docs.is_open("file:///a.rs"));

        conn.transport_mut().dead = false;
        assert_eq!(did_open(&mut conn, &mut docs, "file:///a.rs", "rust", "x").unwrap(), 1);

        conn.transport_mut().dead = true;
        assert!(did_change(&mut conn, &mut docs, "file:///a.rs", "xy").is_err());
        assert!(did_close(&mut conn, &mut docs, "file:///a.rs").is_err());
        assert_eq!(docs.version("file:///a.rs"), Some(1));

        conn.transport_mut().dead = false;
        assert_eq!(did_change(&mut conn, &mut docs, "file:///a.rs", "xy").unwrap(), 2);
    }

    #[test]
    fn test_hover_decodes_through_callback() {
        let mut conn = initialized_connection();
        let (result, callback) = slot();
        let id = hover(&mut conn, "file:///a.rs", Position::new(2, 5), callback).unwrap();

        let sent = conn.transport().last_written();
        assert_eq!(sent["method"], "textDocument/hover");
        assert_eq!(sent["params"]["position"]["line"], 2);

        respond(&mut conn, id, serde_json::json!({ "contents": [{ "value": "A" }, "B"] }));
        let hover = result.lock().unwrap().take().unwrap().unwrap().unwrap();
        assert_eq!(hover.text, "A\nB");
    }

    #[test]
    fn test_definition_null_is_empty() {
        let mut conn = initialized_connection();
        let (result, callback) = slot();
        let id = definition(&mut conn, "file:///a.rs", Position::new(0, 0), callback).unwrap();
        respond(&mut conn, id, Value::Null);
        assert!(result.lock().unwrap().take().unwrap().unwrap().is_empty());
    }

    #[test]
    fn test_completion_partial_decode() {
        let mut conn = initialized_connection();
        let (result, callback) = slot();
        let id = completion(&mut conn, "file:///a.rs", Position::new(0, 1), callback).unwrap();
        respond(
            &mut conn,
            id,
            serde_json::json!([{ "label": "ok" }, { "detail": "no label" }]),
        );
        let list = result.lock().unwrap().take().unwrap().unwrap();
        assert_eq!(list.items.len(), 1);
    }

    #[test]
    fn test_decode_error_fails_request() {
        let mut conn = initialized_connection();
        let (result, callback) = slot();
        let id = formatting(&mut conn, "file:///a.rs", 4, true, callback).unwrap();
        assert_eq!(conn.transport().last_written()["params"]["options"]["tabSize"], 4);

        respond(&mut conn, id, serde_json::json!("not edits"));
        assert!(matches!(
            result.lock().unwrap().take().unwrap(),
            Err(LspError::Decode(_))
        ));
    }

    #[test]
    fn test_prepare_rename_null_cannot_rename() {
        let mut conn = initialized_connection();
        let (result, callback) = slot();
        let id = prepare_rename(&mut conn, "file:///a.rs", Position::new(1, 1), callback).unwrap();
        respond(&mut conn, id, Value::Null);
        assert!(matches!(
            result.lock().unwrap().take().unwrap(),
            Err(LspError::CannotRename)
        ));
    }

    #[test]
    fn test_rename_params_and_result() {
        let mut conn = initialized_connection();
        let (result, callback) = slot();
        let id = rename(&mut conn, "file:///a.rs", Position::new(1, 1), "renamed", callback).unwrap();
        assert_eq!(conn.transport().last_written()["params"]["newName"], "renamed");

        respond(
            &mut conn,
            id,
            serde_json::json!({ "changes": { "file:///a.rs": [] } }),
        );
        let groups = result.lock().unwrap().take().unwrap().unwrap();
        assert_eq!(groups[0].uri, "file:///a.rs");
    }

    #[test]
    fn test_references_context() {
        let mut conn = initialized_connection();
        references(&mut conn, "file:///a.rs", Position::new(0, 0), true, |_| {}).unwrap();
        let sent = conn.transport().last_written();
        assert_eq!(sent["params"]["context"]["includeDeclaration"], true);
    }

    #[test]
    fn test_code_action_sends_diagnostics() {
        let mut conn = initialized_connection();
        let range = Range::new(Position::new(3, 0), Position::new(3, 10));
        let diag = Diagnostic::new(range, DiagnosticSeverity::Error, "unresolved import")
            .with_code("E0432");
        code_action(&mut conn, "file:///a.rs", range, &[diag], |_| {}).unwrap();

        let sent = conn.transport().last_written();
        assert_eq!(sent["params"]["range"]["start"]["line"], 3);
        let wire = &sent["params"]["context"]["diagnostics"][0];
        assert_eq!(wire["severity"], 1);
        assert_eq!(wire["code"], "E0432");
        assert_eq!(wire["message"], "unresolved import");
    }

    #[test]
    fn test_server_error_reaches_typed_callback() {
        let mut conn = initialized_connection();
        let (result, callback) = slot();
        let id = document_symbol(&mut conn, "file:///a.rs", callback).unwrap();
        conn.transport_mut().push(serde_json::json!({
            "jsonrpc": "2.0",
            "id": id,
            "error": { "code": -32801, "message": "content modified" }
        }));
        conn.poll().unwrap();
        assert!(matches!(
            result.lock().unwrap().take().unwrap(),
            Err(LspError::ServerError { code: -32801, .. })
        ));
    }

    #[test]
    fn test_signature_help_request() {
        let mut conn = initialized_connection();
        let (result, callback) = slot();
        let id = signature_help(&mut conn, "file:///a.rs", Position::new(0, 4), callback).unwrap();
        respond(
            &mut conn,
            id,
            serde_json::json!({ "signatures": [{ "label": "f(x)" }] }),
        );
        let help = result.lock().unwrap().take().unwrap().unwrap().unwrap();
        assert_eq!(help.signatures[0].label, "f(x)");
    }
}
