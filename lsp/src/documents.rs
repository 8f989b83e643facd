//! Open-document bookkeeping and lifecycle notification payloads.

use std::collections::HashMap;

use serde_json::Value;

use crate::error::LspError;
use crate::protocol;

/// Synchronization state of one open document.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DocumentState {
    language_id: String,
    version: i32,
    synced: bool,
}

impl DocumentState {
    #[must_use]
    pub fn language_id(&self) -> &str {
        &self.language_id
    }

    #[must_use]
    pub fn version(&self) -> i32 {
        self.version
    }

    /// False between a change and the next save.
    #[must_use]
    pub fn is_synced(&self) -> bool {
        self.synced
    }
}

/// A notification ready to send: method name plus params.
#[derive(Debug, Clone, PartialEq)]
pub struct DocumentNotification {
    pub method: &'static str,
    pub params: Value,
    /// Document version after this notification.
    pub version: i32,
}

/// Tracks which documents are open and their versions.
///
/// Changes always carry the whole document text.
#[derive(Debug, Default)]
pub struct DocumentSynchronizer {
    documents: HashMap<String, DocumentState>,
}

impl DocumentSynchronizer {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `uri` at version 1.
    pub fn did_open(
        &mut self,
        uri: &str,
        language_id: &str,
        text: &str,
    ) -> Result<DocumentNotification, LspError> {
        if self.documents.contains_key(uri) {
            return Err(LspError::DocumentAlreadyOpen(uri.to_string()));
        }
        let state = DocumentState {
            language_id: language_id.to_string(),
            version: 1,
            synced: true,
        };
        let notification = DocumentNotification {
            method: "textDocument/didOpen",
            params: protocol::did_open_params(uri, language_id, state.version, text),
            version: state.version,
        };
        self.documents.insert(uri.to_string(), state);
        Ok(notification)
    }

    /// Bump the version and resend the full text.
    pub fn did_change(&mut self, uri: &str, text: &str) -> Result<DocumentNotification, LspError> {
        let state = self
            .documents
            .get_mut(uri)
            .ok_or_else(|| LspError::DocumentNotOpen(uri.to_string()))?;
        state.version = state
            .version
            .checked_add(1)
            .ok_or_else(|| LspError::VersionExhausted(uri.to_string()))?;
        state.synced = false;
        Ok(DocumentNotification {
            method: "textDocument/didChange",
            params: protocol::did_change_params(uri, state.version, text),
            version: state.version,
        })
    }

    pub fn did_save(&mut self, uri: &str, text: Option<&str>) -> Result<DocumentNotification, LspError> {
        let state = self
            .documents
            .get_mut(uri)
            .ok_or_else(|| LspError::DocumentNotOpen(uri.to_string()))?;
        state.synced = true;
        Ok(DocumentNotification {
            method: "textDocument/didSave",
            params: protocol::did_save_params(uri, text),
            version: state.version,
        })
    }

    /// Forget `uri` and build the close payload.
    pub fn did_close(&mut self, uri: &str) -> Result<DocumentNotification, LspError> {
        let state = self
            .documents
            .remove(uri)
            .ok_or_else(|| LspError::DocumentNotOpen(uri.to_string()))?;
        Ok(DocumentNotification {
            method: "textDocument/didClose",
            params: protocol::text_document_params(uri),
            version: state.version,
        })
    }

    #[must_use]
    pub fn get(&self, uri: &str) -> Option<&DocumentState> {
        self.documents.get(uri)
    }

    #[must_use]
    pub fn version(&self, uri: &str) -> Option<i32> {
        self.documents.get(uri).map(DocumentState::version)
    }

    #[must_use]
    pub fn is_open(&self, uri: &str) -> bool {
        self.documents.contains_key(uri)
    }

    pub fn open_uris(&self) -> impl Iterator<Item = &str> {
        self.documents.keys().map(String::as_str)
    }

    pub fn clear(&mut self) {
        self.documents.clear();
    }

    /// Put back the state `uri` had before a change that was never sent.
    pub(crate) fn restore(&mut self, uri: &str, previous: Option<DocumentState>) {
        match previous {
            Some(state) => {
                self.documents.insert(uri.to_string(), state);
            }
            None => {
                self.documents.remove(uri);
            }
        }
    }
}
