use serde::Deserialize;
use serde_json::Value;

use super::rename::{FileEdits, workspace_edit};
use super::lenient;
use crate::error::DecodeError;

/// A command the server can execute via `workspace/executeCommand`.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct Command {
    pub title: String,
    pub command: String,
    #[serde(default)]
    pub arguments: Vec<Value>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct CodeAction {
    pub title: String,
    pub kind: Option<String>,
    /// Edits to apply, grouped per document. Empty when the action only
    /// carries a command.
    pub edit: Vec<FileEdits>,
    pub command: Option<Command>,
    pub is_preferred: bool,
}

/// One element of a code action response.
#[derive(Debug, Clone, PartialEq)]
pub enum CodeActionOrCommand {
    Command(Command),
    Action(CodeAction),
}

impl CodeActionOrCommand {
    #[must_use]
    pub fn title(&self) -> &str {
        match self {
            Self::Command(command) => &command.title,
            Self::Action(action) => &action.title,
        }
    }
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct WireCodeAction {
    title: String,
    #[serde(default, deserialize_with = "lenient")]
    kind: Option<String>,
    #[serde(default)]
    edit: Option<Value>,
    #[serde(default, deserialize_with = "lenient")]
    command: Option<Command>,
    #[serde(default, deserialize_with = "lenient")]
    is_preferred: Option<bool>,
}

fn decode_element(item: &Value) -> Option<CodeActionOrCommand> {
    // A bare Command has a string `command`; a CodeAction nests it.
    let parsed = if item.get("command").is_some_and(Value::is_string) {
        Command::deserialize(item).map(CodeActionOrCommand::Command)
    } else {
        WireCodeAction::deserialize(item).map(|wire| {
            CodeActionOrCommand::Action(CodeAction {
                title: wire.title,
                kind: wire.kind,
                edit: wire.edit.as_ref().map(workspace_edit).unwrap_or_default(),
                command: wire.command,
                is_preferred: wire.is_preferred.unwrap_or(false),
            })
        })
    };
    match parsed {
        Ok(element) => Some(element),
        Err(e) => {
            tracing::debug!(error = %e, "Skipping malformed code action");
            None
        }
    }
}

/// Decode `(Command | CodeAction)[] | null`.
pub fn decode_code_actions(result: &Value) -> Result<Vec<CodeActionOrCommand>, DecodeError> {
    match result {
        Value::Null => Ok(Vec::new()),
        Value::Array(items) => Ok(items.iter().filter_map(decode_element).collect()),
        other => Err(DecodeError::invalid_shape("array of code actions", other)),
    }
}
