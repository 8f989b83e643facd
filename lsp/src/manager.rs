//! `LspManager` facade: the API the editor talks to.
//!
//! Servers are spawned lazily, the first time a file routed to them is
//! opened. The manager owns one [`Connection`] and one
//! [`DocumentSynchronizer`] per server plus the shared [`DiagnosticsStore`],
//! and drives everything from [`LspManager::poll`] on the editor's main loop.

use std::collections::{HashMap, HashSet, VecDeque};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

use globset::{Glob, GlobSet, GlobSetBuilder};
use serde_json::Value;
use tokio::sync::mpsc;

use crate::client::{Connection, Transport};
use crate::diagnostics::DiagnosticsStore;
use crate::documents::DocumentSynchronizer;
use crate::error::LspError;
use crate::handlers;
use crate::process::{Process, ProcessConfig};
use crate::protocol::{self, PublishDiagnosticsParams};
use crate::types::{
    DiagnosticsSnapshot, LspConfig, LspEvent, MessageLevel, ServerConfig, ServerStopReason,
};

const SHUTDOWN_POLL_INTERVAL: Duration = Duration::from_millis(10);

/// A transport the manager can relaunch after a crash.
pub trait ServerTransport: Transport {
    /// Apply the restart-with-backoff policy once.
    fn restart(&mut self) -> Result<(), LspError>;

    fn stop(&mut self);
}

impl ServerTransport for Process {
    fn restart(&mut self) -> Result<(), LspError> {
        Process::restart(self)
    }

    fn stop(&mut self) {
        Process::stop(self);
    }
}

/// Starts the transport for a configured server.
pub type Launcher<T> = Box<dyn FnMut(&str, &ServerConfig, Option<&Path>) -> Result<T, LspError>>;

/// Notification forwarded from a connection: `(server, method, params)`.
type Inbound = (String, String, Value);

/// Build extension → server name map from config.
fn build_extension_map(config: &LspConfig) -> HashMap<String, String> {
    let mut extension_map = HashMap::new();
    let mut server_names: Vec<&String> = config.servers().keys().collect();
    server_names.sort();
    for name in server_names {
        let server_config = &config.servers()[name];
        for ext in server_config.file_extensions() {
            if let Some(existing) = extension_map.get(ext) {
                tracing::warn!(
                    "Multiple LSP servers configured for extension '{ext}': '{existing}' and '{name}'. Using '{existing}'."
                );
                continue;
            }
            extension_map.insert(ext.clone(), name.clone());
        }
    }
    extension_map
}

/// Compile each server's `file_patterns`, sorted by server name.
fn build_pattern_sets(config: &LspConfig) -> Vec<(String, GlobSet)> {
    let mut server_names: Vec<&String> = config.servers().keys().collect();
    server_names.sort();

    let mut sets = Vec::new();
    for name in server_names {
        let patterns = config.servers()[name].file_patterns();
        if patterns.is_empty() {
            continue;
        }
        let mut builder = GlobSetBuilder::new();
        for pattern in patterns {
            match Glob::new(pattern) {
                Ok(glob) => {
                    builder.add(glob);
                }
                Err(e) => tracing::warn!(server = %name, pattern, error = %e, "Invalid file pattern"),
            }
        }
        match builder.build() {
            Ok(set) => sets.push((name.clone(), set)),
            Err(e) => tracing::warn!(server = %name, error = %e, "Cannot compile file patterns"),
        }
    }
    sets
}

/// Nearest ancestor directory of `path` containing one of `markers`.
fn find_root(path: &Path, markers: &[String]) -> Option<PathBuf> {
    if markers.is_empty() {
        return None;
    }
    path.ancestors()
        .skip(1)
        .find(|dir| markers.iter().any(|marker| dir.join(marker).exists()))
        .map(Path::to_path_buf)
}

struct QueuedOpen {
    uri: String,
    text: String,
}

struct ServerHandle<T: Transport> {
    connection: Connection<T>,
    documents: DocumentSynchronizer,
    language_id: String,
    root_uri: Option<String>,
    /// Documents opened before the handshake finished.
    queued: Vec<QueuedOpen>,
}

/// Public facade for the LSP client subsystem.
pub struct LspManager<T: ServerTransport = Process> {
    config: LspConfig,
    workspace_root: Option<PathBuf>,
    servers: HashMap<String, ServerHandle<T>>,
    /// Servers that failed for the rest of the session.
    disabled: HashSet<String>,
    diagnostics: DiagnosticsStore,
    events: VecDeque<LspEvent>,
    inbound_tx: mpsc::UnboundedSender<Inbound>,
    inbound_rx: mpsc::UnboundedReceiver<Inbound>,
    /// Maps file extension (e.g. "rs") → server name (e.g. "rust").
    extension_map: HashMap<String, String>,
    pattern_sets: Vec<(String, GlobSet)>,
    launcher: Launcher<T>,
}

impl LspManager<Process> {
    /// Manager that launches real subprocesses.
    #[must_use]
    pub fn new(config: LspConfig, workspace_root: Option<&Path>) -> Self {
        let limits = config.clone();
        let launcher: Launcher<Process> = Box::new(move |name: &str, server: &ServerConfig, root: Option<&Path>| {
            let mut process_config = ProcessConfig::from_server(name, server, &limits);
            if let Some(root) = root {
                process_config = process_config.with_working_dir(root);
            }
            let mut process = Process::new(process_config);
            process.spawn()?;
            Ok(process)
        });
        Self::with_launcher(config, workspace_root, launcher)
    }
}

impl<T: ServerTransport> LspManager<T> {
    pub fn with_launcher(config: LspConfig, workspace_root: Option<&Path>, launcher: Launcher<T>) -> Self {
        let (inbound_tx, inbound_rx) = mpsc::unbounded_channel();
        let extension_map = build_extension_map(&config);
        let pattern_sets = build_pattern_sets(&config);
        Self {
            config,
            workspace_root: workspace_root.map(Path::to_path_buf),
            servers: HashMap::new(),
            disabled: HashSet::new(),
            diagnostics: DiagnosticsStore::new(),
            events: VecDeque::new(),
            inbound_tx,
            inbound_rx,
            extension_map,
            pattern_sets,
            launcher,
        }
    }

    /// Name of the server responsible for `path`: extension first, then
    /// file name patterns.
    #[must_use]
    pub fn server_for_path(&self, path: &Path) -> Option<&str> {
        if !self.config.enabled() {
            return None;
        }
        if let Some(ext) = path.extension().and_then(|e| e.to_str())
            && let Some(name) = self.extension_map.get(ext)
        {
            return Some(name);
        }
        let file_name = path.file_name()?;
        self.pattern_sets
            .iter()
            .find(|(_, set)| set.is_match(file_name))
            .map(|(name, _)| name.as_str())
    }

    /// Spawn and start initializing the server named `name` unless it is
    /// already running. `path` is used to locate a root when no workspace
    /// root was given.
    pub fn ensure_server(&mut self, name: &str, path: &Path) -> Result<(), LspError> {
        if self.servers.contains_key(name) {
            return Ok(());
        }
        if self.disabled.contains(name) {
            return Err(LspError::ProcessNotRunning);
        }
        let Some(server_config) = self.config.servers().get(name).cloned() else {
            return Err(LspError::NotFound {
                command: name.to_string(),
            });
        };

        let root = self
            .workspace_root
            .clone()
            .or_else(|| find_root(path, server_config.root_markers()));
        tracing::info!("Starting LSP server '{name}' ({})...", server_config.command());

        let transport = match (self.launcher)(name, &server_config, root.as_deref()) {
            Ok(transport) => transport,
            Err(e) => {
                tracing::warn!("Failed to start LSP server '{name}': {e}");
                self.disable(name, e.to_string());
                return Err(e);
            }
        };

        let root_uri = root.as_deref().and_then(|root| match protocol::path_to_file_uri(root) {
            Ok(uri) => Some(uri.to_string()),
            Err(e) => {
                tracing::warn!("Ignoring workspace root: {e}");
                None
            }
        });

        let mut connection = Connection::new(name, transport);
        let tx = self.inbound_tx.clone();
        let server_name = name.to_string();
        connection.set_notification_handler(move |method, params| {
            // The receiver lives as long as the manager.
            let _ = tx.send((server_name.clone(), method.to_string(), params));
        });

        let mut handle = ServerHandle {
            connection,
            documents: DocumentSynchronizer::new(),
            language_id: server_config.language_id().to_string(),
            root_uri,
            queued: Vec::new(),
        };
        if let Err(e) = Self::send_initialize(&mut handle, server_config.initialization_options()) {
            tracing::warn!("Failed to initialize LSP server '{name}': {e}");
            self.disable(name, e.to_string());
            return Err(e);
        }
        self.servers.insert(name.to_string(), handle);
        Ok(())
    }

    fn send_initialize(handle: &mut ServerHandle<T>, options: Option<&Value>) -> Result<u32, LspError> {
        let server = handle.connection.name().to_string();
        handlers::initialize(
            &mut handle.connection,
            handle.root_uri.as_deref(),
            options,
            move |result| {
                if let Err(e) = result {
                    tracing::warn!(server = %server, error = %e, "LSP initialize failed");
                }
            },
        )
    }

    fn disable(&mut self, name: &str, reason: String) {
        self.disabled.insert(name.to_string());
        self.events.push_back(LspEvent::ServerStopped {
            server: name.to_string(),
            reason: ServerStopReason::Failed(reason),
        });
    }

    /// Resolve the server name and document URI for `path` without
    /// starting anything.
    ///
    /// `Ok(None)` means no server handles this file.
    fn lookup(&self, path: &Path) -> Result<Option<(String, String)>, LspError> {
        let Some(name) = self.server_for_path(path) else {
            return Ok(None);
        };
        if self.disabled.contains(name) {
            tracing::trace!(server = %name, "Server disabled for this session");
            return Ok(None);
        }
        let uri = protocol::path_to_file_uri(path)?.to_string();
        Ok(Some((name.to_string(), uri)))
    }

    /// Like [`Self::lookup`], starting the server if needed.
    fn route(&mut self, path: &Path) -> Result<Option<(String, String)>, LspError> {
        let Some((name, uri)) = self.lookup(path)? else {
            return Ok(None);
        };
        self.ensure_server(&name, path)?;
        Ok(Some((name, uri)))
    }

    /// Open a buffer. Returns its URI, or `None` when no server handles it.
    ///
    /// Opens issued before the server finished initializing are queued and
    /// sent once it is ready.
    pub fn open_document(&mut self, path: &Path, text: &str) -> Result<Option<String>, LspError> {
        let Some((name, uri)) = self.route(path)? else {
            return Ok(None);
        };
        let Some(server) = self.servers.get_mut(&name) else {
            return Ok(None);
        };
        if server.connection.is_ready() {
            let language_id = server.language_id.clone();
            handlers::did_open(&mut server.connection, &mut server.documents, &uri, &language_id, text)?;
        } else if server.queued.iter().any(|q| q.uri == uri) || server.documents.is_open(&uri) {
            return Err(LspError::DocumentAlreadyOpen(uri));
        } else {
            server.queued.push(QueuedOpen {
                uri: uri.clone(),
                text: text.to_string(),
            });
        }
        Ok(Some(uri))
    }

    /// Send the full new text of a buffer. Returns the new version, or
    /// `None` when its server is not running.
    pub fn change_document(&mut self, path: &Path, text: &str) -> Result<Option<i32>, LspError> {
        let Some((name, uri)) = self.lookup(path)? else {
            return Ok(None);
        };
        let Some(server) = self.servers.get_mut(&name) else {
            return Ok(None);
        };
        if let Some(queued) = server.queued.iter_mut().find(|q| q.uri == uri) {
            queued.text = text.to_string();
            return Ok(Some(1));
        }
        handlers::did_change(&mut server.connection, &mut server.documents, &uri, text).map(Some)
    }

    pub fn save_document(&mut self, path: &Path, text: Option<&str>) -> Result<(), LspError> {
        let Some((name, uri)) = self.lookup(path)? else {
            return Ok(());
        };
        let Some(server) = self.servers.get_mut(&name) else {
            return Ok(());
        };
        if server.queued.iter().any(|q| q.uri == uri) {
            return Ok(());
        }
        handlers::did_save(&mut server.connection, &mut server.documents, &uri, text)?;
        Ok(())
    }

    pub fn close_document(&mut self, path: &Path) -> Result<(), LspError> {
        let Some((name, uri)) = self.lookup(path)? else {
            return Ok(());
        };
        self.diagnostics.clear(&uri);
        let Some(server) = self.servers.get_mut(&name) else {
            return Ok(());
        };
        let queued_before = server.queued.len();
        server.queued.retain(|q| q.uri != uri);
        if server.queued.len() != queued_before {
            return Ok(());
        }
        handlers::did_close(&mut server.connection, &mut server.documents, &uri)?;
        Ok(())
    }

    /// Whether the server for `path` has finished its handshake.
    #[must_use]
    pub fn is_ready(&self, path: &Path) -> bool {
        self.server_for_path(path)
            .and_then(|name| self.servers.get(name))
            .is_some_and(|server| server.connection.is_ready())
    }

    /// Run `f` with the connection serving `path` and the document URI, e.g.
    /// to issue a request through [`handlers`].
    ///
    /// Returns `Ok(None)` when no server handles the file or its server has
    /// not been started by an open.
    pub fn with_connection<R, F>(&mut self, path: &Path, f: F) -> Result<Option<R>, LspError>
    where
        F: FnOnce(&mut Connection<T>, &str) -> Result<R, LspError>,
    {
        let Some((name, uri)) = self.lookup(path)? else {
            return Ok(None);
        };
        let Some(server) = self.servers.get_mut(&name) else {
            return Ok(None);
        };
        f(&mut server.connection, &uri).map(Some)
    }

    /// Handle up to `budget` inbound messages across all servers without
    /// blocking. Returns how many were handled.
    pub fn poll(&mut self, budget: usize) -> usize {
        let mut count = 0;
        let mut names: Vec<String> = self.servers.keys().cloned().collect();
        names.sort();

        for name in names {
            while count < budget {
                let Some(server) = self.servers.get_mut(&name) else {
                    break;
                };
                match server.connection.poll() {
                    Ok(true) => count += 1,
                    Ok(false) => break,
                    Err(e) if e.is_fatal_to_transport() => {
                        tracing::warn!(server = %name, error = %e, "LSP transport lost");
                        self.recover(&name);
                        break;
                    }
                    Err(e) => {
                        tracing::warn!(server = %name, error = %e, "Dropped inbound LSP message");
                        count += 1;
                    }
                }
            }
            self.flush_queued(&name);
        }

        self.drain_notifications();
        count
    }

    fn flush_queued(&mut self, name: &str) {
        let Some(server) = self.servers.get_mut(name) else {
            return;
        };
        if !server.connection.is_ready() || server.queued.is_empty() {
            return;
        }
        let language_id = server.language_id.clone();
        for open in std::mem::take(&mut server.queued) {
            if let Err(e) = handlers::did_open(
                &mut server.connection,
                &mut server.documents,
                &open.uri,
                &language_id,
                &open.text,
            ) {
                tracing::warn!(server = %name, uri = %open.uri, error = %e, "Failed to open queued document");
            }
        }
    }

    /// Restart a dead server, or give up on it for the session.
    fn recover(&mut self, name: &str) {
        let Some(server) = self.servers.get_mut(name) else {
            return;
        };
        server.connection.reset();
        server.documents.clear();
        server.queued.clear();

        let outcome = loop {
            match server.connection.transport_mut().restart() {
                Ok(()) => break Ok(()),
                Err(e @ LspError::TooManyRestarts { .. }) => break Err(e),
                Err(e) => {
                    tracing::warn!(server = %name, error = %e, "LSP restart attempt failed");
                }
            }
        };

        match outcome {
            Ok(()) => {
                let options = self
                    .config
                    .servers()
                    .get(name)
                    .and_then(ServerConfig::initialization_options)
                    .cloned();
                if let Err(e) = Self::send_initialize(server, options.as_ref()) {
                    tracing::warn!(server = %name, error = %e, "Failed to re-initialize LSP server");
                }
                tracing::info!(server = %name, "LSP server restarted");
                self.events.push_back(LspEvent::ServerRestarted {
                    server: name.to_string(),
                });
            }
            Err(e) => {
                tracing::error!(server = %name, error = %e, "LSP server exhausted its restart budget");
                if let Some(mut server) = self.servers.remove(name) {
                    server.connection.transport_mut().stop();
                }
                self.disable(name, e.to_string());
            }
        }
    }

    fn drain_notifications(&mut self) {
        while let Ok((server, method, params)) = self.inbound_rx.try_recv() {
            self.handle_notification(&server, &method, params);
        }
    }

    fn handle_notification(&mut self, server: &str, method: &str, params: Value) {
        match method {
            "textDocument/publishDiagnostics" => {
                match serde_json::from_value::<PublishDiagnosticsParams>(params) {
                    Ok(params) => {
                        let uri = params.uri.clone();
                        let items = params.into_diagnostics();
                        let count = items.len();
                        tracing::debug!(server, uri = %uri, count, "Diagnostics updated");
                        self.diagnostics.update(uri.clone(), items);
                        self.events.push_back(LspEvent::Diagnostics { uri, count });
                    }
                    Err(e) => {
                        tracing::warn!(server, error = %e, "Failed to parse publishDiagnostics");
                    }
                }
            }
            "window/logMessage" | "window/showMessage" => {
                let level = params
                    .get("type")
                    .and_then(Value::as_u64)
                    .map_or(MessageLevel::Log, MessageLevel::from_lsp);
                let text = params
                    .get("message")
                    .and_then(Value::as_str)
                    .unwrap_or_default()
                    .to_string();
                self.events.push_back(LspEvent::Message {
                    server: server.to_string(),
                    level,
                    text,
                });
            }
            _ => {
                tracing::trace!("Ignoring notification from '{server}': {method}");
            }
        }
    }

    /// Take the events produced since the last call.
    pub fn take_events(&mut self) -> Vec<LspEvent> {
        self.events.drain(..).collect()
    }

    #[must_use]
    pub fn diagnostics(&self) -> &DiagnosticsStore {
        &self.diagnostics
    }

    /// Get an immutable snapshot of all diagnostics.
    #[must_use]
    pub fn snapshot(&self) -> DiagnosticsSnapshot {
        self.diagnostics.snapshot()
    }

    /// Whether at least one server is running.
    #[must_use]
    pub fn has_running_servers(&self) -> bool {
        !self.servers.is_empty()
    }

    /// Shut every server down: `shutdown` request, wait up to `timeout` for
    /// the reply, `exit` notification, then stop the transport.
    pub fn shutdown(&mut self, timeout: Duration) {
        let mut servers: Vec<(String, ServerHandle<T>)> = self.servers.drain().collect();
        servers.sort_by(|a, b| a.0.cmp(&b.0));

        for (name, mut server) in servers {
            tracing::info!("Shutting down LSP server '{name}'...");
            let conn = &mut server.connection;
            if conn.is_ready() {
                let acknowledged = Arc::new(AtomicBool::new(false));
                let flag = Arc::clone(&acknowledged);
                match conn.shutdown(Box::new(move |_| flag.store(true, Ordering::Release))) {
                    Ok(_) => {
                        let deadline = Instant::now() + timeout;
                        while !acknowledged.load(Ordering::Acquire) && Instant::now() < deadline {
                            match conn.poll() {
                                Ok(true) => {}
                                Ok(false) => std::thread::sleep(SHUTDOWN_POLL_INTERVAL),
                                Err(e) if e.is_fatal_to_transport() => break,
                                Err(e) => {
                                    tracing::debug!(server = %name, error = %e, "Ignoring message during shutdown");
                                }
                            }
                        }
                        if let Err(e) = conn.exit() {
                            tracing::debug!(server = %name, error = %e, "Failed to send exit");
                        }
                    }
                    Err(e) => tracing::warn!(server = %name, error = %e, "Failed to send shutdown"),
                }
            }
            conn.transport_mut().stop();
            self.events.push_back(LspEvent::ServerStopped {
                server: name,
                reason: ServerStopReason::Exited,
            });
        }
        self.drain_notifications();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::tests::MockTransport;
    use crate::types::DiagnosticSeverity;

    impl ServerTransport for MockTransport {
        fn restart(&mut self) -> Result<(), LspError> {
            if self.restarts >= self.restart_budget {
                return Err(LspError::TooManyRestarts {
                    attempts: self.restarts,
                });
            }
            self.restarts += 1;
            self.dead = false;
            self.inbound.clear();
            Ok(())
        }

        fn stop(&mut self) {
            self.dead = true;
        }
    }

    /// Deserialize a test config through the validated boundary.
    fn test_config() -> LspConfig {
        serde_json::from_value(serde_json::json!({
            "enabled": true,
            "servers": {
                "rust": {
                    "command": "rust-analyzer",
                    "language_id": "rust",
                    "file_extensions": ["rs"],
                    "root_markers": ["Cargo.toml"]
                },
                "python": {
                    "command": "pyright",
                    "language_id": "python",
                    "file_extensions": ["py", "pyi"],
                    "root_markers": ["pyproject.toml"]
                },
                "docker": {
                    "command": "docker-langserver",
                    "language_id": "dockerfile",
                    "file_patterns": ["Dockerfile", "*.dockerfile"]
                }
            }
        }))
        .unwrap()
    }

    fn test_manager_with(config: LspConfig, restart_budget: u32) -> LspManager<MockTransport> {
        LspManager::with_launcher(
            config,
            Some(std::env::temp_dir().as_path()),
            Box::new(move |_: &str, _: &ServerConfig, _: Option<&Path>| {
                Ok(MockTransport {
                    restart_budget,
                    ..MockTransport::default()
                })
            }),
        )
    }

    fn test_manager() -> LspManager<MockTransport> {
        test_manager_with(test_config(), 0)
    }

    fn source_path(name: &str) -> PathBuf {
        std::env::temp_dir().join(name)
    }

    fn transport<'a>(manager: &'a mut LspManager<MockTransport>, name: &str) -> &'a mut MockTransport {
        manager
            .servers
            .get_mut(name)
            .unwrap()
            .connection
            .transport_mut()
    }

    /// Answer the pending initialize request and poll it through.
    fn complete_handshake(manager: &mut LspManager<MockTransport>, name: &str) {
        let id = transport(manager, name)
            .written
            .iter()
            .rev()
            .find(|m| m["method"] == "initialize")
            .map(|m| m["id"].clone())
            .unwrap();
        transport(manager, name).push(serde_json::json!({
            "jsonrpc": "2.0", "id": id, "result": { "capabilities": {} }
        }));
        manager.poll(16);
        assert!(manager.servers[name].connection.is_ready());
    }

    fn publish(manager: &mut LspManager<MockTransport>, name: &str, uri: &str, severities: &[u8]) {
        let diagnostics: Vec<Value> = severities
            .iter()
            .map(|severity| {
                serde_json::json!({
                    "range": { "start": { "line": 0, "character": 0 }, "end": { "line": 0, "character": 1 } },
                    "severity": severity,
                    "message": "m"
                })
            })
            .collect();
        transport(manager, name).push(serde_json::json!({
            "jsonrpc": "2.0",
            "method": "textDocument/publishDiagnostics",
            "params": { "uri": uri, "diagnostics": diagnostics }
        }));
    }

    #[test]
    fn test_extension_map_built_correctly() {
        let manager = test_manager();
        assert_eq!(manager.extension_map.get("rs"), Some(&"rust".to_string()));
        assert_eq!(manager.extension_map.get("py"), Some(&"python".to_string()));
        assert_eq!(
            manager.extension_map.get("pyi"),
            Some(&"python".to_string())
        );
        assert!(!manager.extension_map.contains_key("js"));
    }

    #[test]
    fn test_extension_overlap_is_deterministic() {
        let config: LspConfig = serde_json::from_value(serde_json::json!({
            "enabled": true,
            "servers": {
                "b": { "command": "b-ls", "language_id": "b", "file_extensions": ["rs"] },
                "a": { "command": "a-ls", "language_id": "a", "file_extensions": ["rs"] }
            }
        }))
        .unwrap();
        let manager = test_manager_with(config, 0);
        assert_eq!(manager.extension_map.get("rs"), Some(&"a".to_string()));
    }

    #[test]
    fn test_routing_by_extension_and_pattern() {
        let manager = test_manager();
        assert_eq!(manager.server_for_path(Path::new("/w/src/main.rs")), Some("rust"));
        assert_eq!(manager.server_for_path(Path::new("/w/Dockerfile")), Some("docker"));
        assert_eq!(manager.server_for_path(Path::new("/w/app.dockerfile")), Some("docker"));
        assert_eq!(manager.server_for_path(Path::new("/w/Makefile")), None);
        assert_eq!(manager.server_for_path(Path::new("/w/index.js")), None);
    }

    #[test]
    fn test_disabled_config_routes_nothing() {
        let config: LspConfig = serde_json::from_value(serde_json::json!({
            "servers": { "rust": { "command": "ra", "language_id": "rust", "file_extensions": ["rs"] } }
        }))
        .unwrap();
        let manager = test_manager_with(config, 0);
        assert!(manager.server_for_path(Path::new("/w/main.rs")).is_none());
    }

    #[test]
    fn test_find_root_by_marker() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("Cargo.toml"), "").unwrap();
        let nested = dir.path().join("src").join("bin");
        std::fs::create_dir_all(&nested).unwrap();

        let file = nested.join("main.rs");
        assert_eq!(
            find_root(&file, &["Cargo.toml".to_string()]).unwrap(),
            dir.path()
        );
        assert!(find_root(&file, &[]).is_none());
    }

    #[test]
    fn test_has_running_servers_initially_false() {
        let manager = test_manager();
        assert!(!manager.has_running_servers());
        assert!(manager.snapshot().is_empty());
    }

    #[test]
    fn test_unrouted_file_is_skipped() {
        let mut manager = test_manager();
        assert!(manager.open_document(&source_path("notes.txt"), "x").unwrap().is_none());
        assert!(!manager.has_running_servers());
    }

    #[test]
    fn test_lazy_start_and_queued_open() {
        let mut manager = test_manager();
        let path = source_path("main.rs");

        let uri = manager.open_document(&path, "fn main() {}").unwrap().unwrap();
        assert!(manager.has_running_servers());
        assert!(!manager.is_ready(&path));
        {
            let written = &transport(&mut manager, "rust").written;
            assert_eq!(written.len(), 1);
            assert_eq!(written[0]["method"], "initialize");
        }

        // Edits before the handshake update the queued text.
        manager.change_document(&path, "fn main() { 1 }").unwrap();
        complete_handshake(&mut manager, "rust");

        let written = &transport(&mut manager, "rust").written;
        let methods: Vec<&str> = written.iter().map(|m| m["method"].as_str().unwrap()).collect();
        assert_eq!(methods, ["initialize", "initialized", "textDocument/didOpen"]);
        assert_eq!(written[2]["params"]["textDocument"]["uri"], uri.as_str());
        assert_eq!(written[2]["params"]["textDocument"]["text"], "fn main() { 1 }");
        assert_eq!(written[2]["params"]["textDocument"]["languageId"], "rust");
    }

    #[test]
    fn test_document_versions_after_ready() {
        let mut manager = test_manager();
        let path = source_path("lib.rs");
        manager.open_document(&path, "a").unwrap();
        complete_handshake(&mut manager, "rust");

        assert_eq!(manager.change_document(&path, "ab").unwrap(), Some(2));
        assert_eq!(manager.change_document(&path, "abc").unwrap(), Some(3));
        manager.save_document(&path, None).unwrap();
        manager.close_document(&path).unwrap();
        assert_eq!(
            transport(&mut manager, "rust").last_written()["method"],
            "textDocument/didClose"
        );
    }

    #[test]
    fn test_double_open_is_rejected() {
        let mut manager = test_manager();
        let path = source_path("dup.rs");
        manager.open_document(&path, "").unwrap();
        assert!(matches!(
            manager.open_document(&path, ""),
            Err(LspError::DocumentAlreadyOpen(_))
        ));
    }

    #[test]
    fn test_poll_applies_diagnostics() {
        let mut manager = test_manager();
        let path = source_path("diag.rs");
        let uri = manager.open_document(&path, "").unwrap().unwrap();
        complete_handshake(&mut manager, "rust");
        manager.take_events();

        publish(&mut manager, "rust", &uri, &[1, 2, 2]);
        assert_eq!(manager.poll(16), 1);

        let counts = manager.diagnostics().counts_by_severity();
        assert_eq!(counts.errors, 1);
        assert_eq!(counts.warnings, 2);
        assert_eq!(manager.snapshot().status_string(), "E:1 W:2");
        assert_eq!(
            manager.diagnostics().severest_for_line(&uri, 0).unwrap().severity(),
            DiagnosticSeverity::Error
        );
        assert_eq!(
            manager.take_events(),
            vec![LspEvent::Diagnostics { uri: uri.clone(), count: 3 }]
        );

        // Closing the document forgets its diagnostics.
        manager.close_document(&path).unwrap();
        assert!(manager.diagnostics().get(&uri).is_none());
    }

    #[test]
    fn test_poll_respects_budget() {
        let mut manager = test_manager();
        let path = source_path("budget.rs");
        let uri = manager.open_document(&path, "").unwrap().unwrap();
        complete_handshake(&mut manager, "rust");

        for _ in 0..5 {
            publish(&mut manager, "rust", &uri, &[1]);
        }
        assert_eq!(manager.poll(3), 3);
        assert_eq!(manager.poll(10), 2);
        assert_eq!(manager.poll(10), 0);
    }

    #[test]
    fn test_log_messages_become_events() {
        let mut manager = test_manager();
        manager.open_document(&source_path("log.py"), "").unwrap();
        complete_handshake(&mut manager, "python");
        manager.take_events();

        transport(&mut manager, "python").push(serde_json::json!({
            "jsonrpc": "2.0",
            "method": "window/logMessage",
            "params": { "type": 2, "message": "indexing slow" }
        }));
        manager.poll(16);

        assert_eq!(
            manager.take_events(),
            vec![LspEvent::Message {
                server: "python".to_string(),
                level: MessageLevel::Warning,
                text: "indexing slow".to_string(),
            }]
        );
    }

    #[test]
    fn test_requests_through_connection() {
        let mut manager = test_manager();
        let path = source_path("hover.rs");
        manager.open_document(&path, "").unwrap();

        let before_ready = manager.with_connection(&path, |conn, uri| {
            handlers::hover(conn, uri, crate::types::Position::new(0, 0), |_| {})
        });
        assert!(matches!(before_ready, Err(LspError::NotInitialized)));

        complete_handshake(&mut manager, "rust");
        let id = manager
            .with_connection(&path, |conn, uri| {
                handlers::hover(conn, uri, crate::types::Position::new(0, 0), |_| {})
            })
            .unwrap();
        assert!(id.is_some());
        assert_eq!(
            transport(&mut manager, "rust").last_written()["method"],
            "textDocument/hover"
        );
    }

    #[test]
    fn test_crash_restarts_within_budget() {
        let mut manager = test_manager_with(test_config(), 1);
        let path = source_path("crash.rs");
        manager.open_document(&path, "").unwrap();
        complete_handshake(&mut manager, "rust");
        manager.take_events();

        transport(&mut manager, "rust").dead = true;
        manager.poll(16);

        assert_eq!(
            manager.take_events(),
            vec![LspEvent::ServerRestarted { server: "rust".to_string() }]
        );
        let server = &manager.servers["rust"];
        assert!(!server.connection.is_ready());
        assert!(!server.documents.is_open(&protocol::path_to_file_uri(&path).unwrap().to_string()));
        assert_eq!(
            transport(&mut manager, "rust").last_written()["method"],
            "initialize"
        );

        // Re-open after the new handshake.
        complete_handshake(&mut manager, "rust");
        manager.open_document(&path, "").unwrap();
    }

    #[test]
    fn test_exhausted_budget_disables_server_once() {
        let mut manager = test_manager_with(test_config(), 0);
        let path = source_path("fatal.rs");
        manager.open_document(&path, "").unwrap();
        complete_handshake(&mut manager, "rust");
        manager.take_events();

        transport(&mut manager, "rust").dead = true;
        manager.poll(16);

        let events = manager.take_events();
        assert_eq!(events.len(), 1);
        assert!(matches!(
            &events[0],
            LspEvent::ServerStopped { server, reason: ServerStopReason::Failed(_) } if server == "rust"
        ));
        assert!(!manager.has_running_servers());

        // Not retried for the rest of the session.
        assert!(manager.open_document(&path, "").unwrap().is_none());
        assert!(!manager.has_running_servers());
        assert!(manager.take_events().is_empty());
    }

    #[test]
    fn test_failed_launch_is_reported_once() {
        let mut manager: LspManager<MockTransport> = LspManager::with_launcher(
            test_config(),
            None,
            Box::new(|_: &str, server: &ServerConfig, _: Option<&Path>| {
                Err(LspError::NotFound {
                    command: server.command().to_string(),
                })
            }),
        );
        let path = source_path("missing.rs");
        assert!(matches!(
            manager.open_document(&path, ""),
            Err(LspError::NotFound { .. })
        ));
        assert!(manager.open_document(&path, "").unwrap().is_none());
        assert_eq!(manager.take_events().len(), 1);
    }

    #[test]
    fn test_failed_initialize_write_disables_server() {
        let mut manager: LspManager<MockTransport> = LspManager::with_launcher(
            test_config(),
            None,
            Box::new(|_: &str, _: &ServerConfig, _: Option<&Path>| {
                Ok(MockTransport {
                    dead: true,
                    ..MockTransport::default()
                })
            }),
        );
        let path = source_path("broken.rs");
        assert!(manager.open_document(&path, "").is_err());
        assert!(!manager.has_running_servers());
        assert!(matches!(
            manager.take_events().as_slice(),
            [LspEvent::ServerStopped {
                reason: ServerStopReason::Failed(_),
                ..
            }]
        ));

        assert!(manager.open_document(&path, "").unwrap().is_none());
        assert!(manager.take_events().is_empty());
    }

    #[test]
    fn test_edits_without_open_do_not_start_server() {
        let mut manager = test_manager();
        let path = source_path("never_opened.rs");

        manager.close_document(&path).unwrap();
        manager.save_document(&path, Some("x")).unwrap();
        assert_eq!(manager.change_document(&path, "x").unwrap(), None);
        let hovered = manager.with_connection(&path, |conn, uri| {
            handlers::hover(conn, uri, crate::types::Position::new(0, 0), |_| {})
        });
        assert!(hovered.unwrap().is_none());
        assert!(!manager.has_running_servers());
    }

    #[test]
    fn test_shutdown_handshake() {
        let mut manager = test_manager();
        manager.open_document(&source_path("bye.rs"), "").unwrap();
        complete_handshake(&mut manager, "rust");
        manager.take_events();

        // No reply arrives; the timeout bounds the wait.
        manager.shutdown(Duration::from_millis(20));

        assert!(!manager.has_running_servers());
        assert_eq!(
            manager.take_events(),
            vec![LspEvent::ServerStopped {
                server: "rust".to_string(),
                reason: ServerStopReason::Exited,
            }]
        );
    }
}
