//! Protocol client: the connection state machine and request correlation.
//!
//! A [`Connection`] sits on top of a [`Transport`] (normally a
//! [`Process`](crate::process::Process)). Requests are written immediately and
//! answered later through a callback when [`Connection::poll`] sees the
//! matching response. Everything here runs on the editor's main thread.

use std::collections::HashMap;
use std::time::Instant;

use serde_json::Value;

use crate::error::LspError;
use crate::process::Process;
use crate::protocol::{self, Incoming, Notification, Request, Response, ResponseFailure};

/// Completion callback for a request. Context is whatever the closure captures.
pub type ResponseCallback = Box<dyn FnOnce(Result<Value, LspError>) + Send>;

/// Receives every server notification as `(method, params)`.
pub type NotificationHandler = Box<dyn FnMut(&str, Value) + Send>;

/// A duplex stream of framed JSON-RPC bodies.
pub trait Transport {
    fn write_message(&mut self, body: &[u8]) -> Result<(), LspError>;

    /// Return the next complete body, or `Ok(None)` when nothing is buffered.
    fn try_read_message(&mut self) -> Result<Option<Vec<u8>>, LspError>;

    fn is_running(&self) -> bool;
}

/// Connection lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Uninitialized,
    Initializing,
    Initialized,
    ShuttingDown,
    Exited,
}

struct PendingRequest {
    method: String,
    issued: Instant,
    callback: ResponseCallback,
}

/// One JSON-RPC conversation with a language server.
pub struct Connection<T: Transport = Process> {
    name: String,
    transport: T,
    state: ConnectionState,
    next_id: u32,
    pending: HashMap<u32, PendingRequest>,
    initialize_id: Option<u32>,
    capabilities: Option<Value>,
    notification_handler: Option<NotificationHandler>,
}

impl<T: Transport> Connection<T> {
    pub fn new(name: impl Into<String>, transport: T) -> Self {
        Self {
            name: name.into(),
            transport,
            state: ConnectionState::Uninitialized,
            next_id: 0,
            pending: HashMap::new(),
            initialize_id: None,
            capabilities: None,
            notification_handler: None,
        }
    }

    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    #[must_use]
    pub fn state(&self) -> ConnectionState {
        self.state
    }

    /// Whether document and feature requests may be sent.
    #[must_use]
    pub fn is_ready(&self) -> bool {
        self.state == ConnectionState::Initialized
    }

    /// Capabilities returned by the server's `initialize` response.
    #[must_use]
    pub fn server_capabilities(&self) -> Option<&Value> {
        self.capabilities.as_ref()
    }

    #[must_use]
    pub fn pending_count(&self) -> usize {
        self.pending.len()
    }

    pub fn transport(&self) -> &T {
        &self.transport
    }

    pub fn transport_mut(&mut self) -> &mut T {
        &mut self.transport
    }

    /// Install the single notification handler, replacing any previous one.
    pub fn set_notification_handler<F>(&mut self, handler: F)
    where
        F: FnMut(&str, Value) + Send + 'static,
    {
        self.notification_handler = Some(Box::new(handler));
    }

    /// Send the `initialize` request.
    ///
    /// When the response arrives the capabilities are stored, the state moves
    /// to `Initialized`, the `initialized` notification is sent, and then
    /// `callback` runs with the raw result.
    pub fn initialize(&mut self, params: Value, callback: ResponseCallback) -> Result<u32, LspError> {
        match self.state {
            ConnectionState::Uninitialized => {}
            ConnectionState::Initializing | ConnectionState::Initialized => {
                return Err(LspError::AlreadyInitialized);
            }
            state => {
                return Err(LspError::InvalidState {
                    state,
                    operation: "initialize",
                });
            }
        }

        let id = self.send_request("initialize", Some(params), callback)?;
        self.initialize_id = Some(id);
        self.state = ConnectionState::Initializing;
        Ok(id)
    }

    /// Serialize and write a request, returning its id without waiting.
    pub fn send_request(
        &mut self,
        method: &str,
        params: Option<Value>,
        callback: ResponseCallback,
    ) -> Result<u32, LspError> {
        self.ensure_open(method)?;

        let id = self.allocate_id();
        let body = serde_json::to_vec(&Request::new(id, method, params))?;
        self.transport.write_message(&body)?;
        tracing::debug!(server = %self.name, id, method, "Sent request");

        self.pending.insert(
            id,
            PendingRequest {
                method: method.to_string(),
                issued: Instant::now(),
                callback,
            },
        );
        Ok(id)
    }

    /// Serialize and write a notification. No reply is expected.
    pub fn send_notification(&mut self, method: &str, params: Option<Value>) -> Result<(), LspError> {
        self.ensure_open(method)?;
        self.write_notification(method, params)
    }

    /// Send the `shutdown` request. Only legal once initialized.
    pub fn shutdown(&mut self, callback: ResponseCallback) -> Result<u32, LspError> {
        match self.state {
            ConnectionState::Initialized => {}
            ConnectionState::Uninitialized | ConnectionState::Initializing => {
                return Err(LspError::NotInitialized);
            }
            state => {
                return Err(LspError::InvalidState {
                    state,
                    operation: "shutdown",
                });
            }
        }
        let id = self.send_request("shutdown", None, callback)?;
        self.state = ConnectionState::ShuttingDown;
        Ok(id)
    }

    /// Send the `exit` notification. Only legal after `shutdown`.
    ///
    /// Requests still pending are failed with
    /// [`LspError::ProcessNotRunning`].
    pub fn exit(&mut self) -> Result<(), LspError> {
        if self.state != ConnectionState::ShuttingDown {
            return Err(LspError::InvalidState {
                state: self.state,
                operation: "exit",
            });
        }
        let result = self.write_notification("exit", None);
        self.state = ConnectionState::Exited;
        self.fail_pending();
        result
    }

    /// Forget the conversation so a fresh `initialize` can be sent, e.g. after
    /// the transport was restarted. Pending requests are failed.
    pub fn reset(&mut self) {
        self.fail_pending();
        self.state = ConnectionState::Uninitialized;
        self.initialize_id = None;
        self.capabilities = None;
    }

    /// Try to handle one inbound message without blocking.
    ///
    /// Returns `Ok(false)` when nothing was available. Correlation and framing
    /// errors are returned for this message only; the connection stays usable.
    /// When the transport is gone, pending requests are failed first.
    pub fn poll(&mut self) -> Result<bool, LspError> {
        let body = match self.transport.try_read_message() {
            Ok(Some(body)) => body,
            Ok(None) => return Ok(false),
            Err(e) => {
                if e.is_fatal_to_transport() {
                    self.fail_pending();
                }
                return Err(e);
            }
        };

        tracing::trace!(server = %self.name, body = %String::from_utf8_lossy(&body), "Received");

        match protocol::classify(&body)? {
            Incoming::Response { id, outcome } => self.handle_response(id, outcome)?,
            Incoming::Notification { method, params } => self.handle_notification(&method, params),
            Incoming::ServerRequest { id, method, params } => {
                self.handle_server_request(id, &method, &params)?;
            }
        }
        Ok(true)
    }

    fn handle_response(
        &mut self,
        id: Option<Value>,
        outcome: Result<Value, ResponseFailure>,
    ) -> Result<(), LspError> {
        let Some(id) = id else {
            if let Err(ResponseFailure::Server(error)) = &outcome {
                tracing::warn!(
                    server = %self.name,
                    code = error.code,
                    message = %error.message,
                    "Server error without request id"
                );
            }
            return Err(LspError::ResponseWithoutId);
        };
        let id = id
            .as_u64()
            .and_then(|n| u32::try_from(n).ok())
            .ok_or(LspError::ResponseWithoutId)?;

        let Some(request) = self.pending.remove(&id) else {
            tracing::warn!(server = %self.name, id, "Response for unknown request");
            return Err(LspError::UnknownRequestId(id));
        };

        let elapsed_ms = request.issued.elapsed().as_millis() as u64;
        let result = match outcome {
            Ok(value) => {
                tracing::debug!(server = %self.name, id, method = %request.method, elapsed_ms, "Response");
                Ok(value)
            }
            Err(ResponseFailure::Server(error)) => {
                tracing::warn!(
                    server = %self.name,
                    id,
                    method = %request.method,
                    code = error.code,
                    message = %error.message,
                    "Server returned error"
                );
                Err(LspError::server_error(error.code, error.message))
            }
            Err(ResponseFailure::Malformed(e)) => {
                tracing::warn!(
                    server = %self.name,
                    id,
                    method = %request.method,
                    error = %e,
                    "Malformed error object in response"
                );
                Err(LspError::Json(e))
            }
        };

        if self.initialize_id == Some(id) {
            self.initialize_id = None;
            self.finish_initialize(result.as_ref().ok());
        }

        (request.callback)(result);
        Ok(())
    }

    fn finish_initialize(&mut self, result: Option<&Value>) {
        if self.state != ConnectionState::Initializing {
            tracing::warn!(server = %self.name, state = ?self.state, "Ignoring late initialize response");
            return;
        }
        let Some(result) = result else {
            self.state = ConnectionState::Uninitialized;
            return;
        };

        self.capabilities = Some(result.get("capabilities").cloned().unwrap_or(Value::Null));
        self.state = ConnectionState::Initialized;
        tracing::info!(server = %self.name, "LSP server initialized");

        if let Err(e) = self.write_notification("initialized", Some(serde_json::json!({}))) {
            tracing::warn!(server = %self.name, error = %e, "Failed to send initialized notification");
        }
    }

    fn handle_notification(&mut self, method: &str, params: Value) {
        match self.notification_handler.as_mut() {
            Some(handler) => handler(method, params),
            None => tracing::trace!(server = %self.name, method, "Dropped notification"),
        }
    }

    /// Answer a server-initiated request so the server never waits on us.
    fn handle_server_request(&mut self, id: Value, method: &str, params: &Value) -> Result<(), LspError> {
        let response = match method {
            "window/workDoneProgress/create" | "client/registerCapability" => {
                Response::ok(id, Value::Null)
            }
            "workspace/configuration" => {
                let count = params
                    .get("items")
                    .and_then(Value::as_array)
                    .map_or(0, Vec::len);
                Response::ok(id, Value::Array(vec![Value::Null; count]))
            }
            _ => {
                tracing::debug!(server = %self.name, method, "Unsupported server request");
                Response::method_not_found(id, method)
            }
        };
        let body = serde_json::to_vec(&response)?;
        self.transport.write_message(&body)
    }

    fn write_notification(&mut self, method: &str, params: Option<Value>) -> Result<(), LspError> {
        let body = serde_json::to_vec(&Notification::new(method, params))?;
        self.transport.write_message(&body)?;
        tracing::debug!(server = %self.name, method, "Sent notification");
        Ok(())
    }

    fn ensure_open(&self, method: &str) -> Result<(), LspError> {
        if self.state == ConnectionState::Exited {
            tracing::debug!(server = %self.name, method, "Rejected message after exit");
            return Err(LspError::InvalidState {
                state: self.state,
                operation: "send",
            });
        }
        Ok(())
    }

    /// Next id, wrapping on overflow and skipping ids still pending.
    fn allocate_id(&mut self) -> u32 {
        loop {
            let id = self.next_id;
            self.next_id = self.next_id.wrapping_add(1);
            if !self.pending.contains_key(&id) {
                return id;
            }
        }
    }

    fn fail_pending(&mut self) {
        for (id, request) in self.pending.drain() {
            tracing::debug!(server = %self.name, id, method = %request.method, "Failing pending request");
            (request.callback)(Err(LspError::ProcessNotRunning));
        }
        self.initialize_id = None;
    }
}

impl<T: Transport> Drop for Connection<T> {
    fn drop(&mut self) {
        self.fail_pending();
    }
}
