use serde::Deserialize;
use serde_json::Value;

use super::{TextEdit, decode_elements};
use crate::error::{DecodeError, LspError};
use crate::types::Range;

/// Edits to apply to one document.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileEdits {
    pub uri: String,
    pub edits: Vec<TextEdit>,
}

/// Result of `textDocument/prepareRename`.
///
/// Both fields are `None` when the server asks for its default behavior,
/// i.e. the identifier under the cursor.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PrepareRename {
    pub range: Option<Range>,
    pub placeholder: Option<String>,
}

#[derive(Deserialize)]
#[serde(untagged)]
enum WirePrepareRename {
    WithPlaceholder {
        range: Range,
        placeholder: String,
    },
    #[serde(rename_all = "camelCase")]
    DefaultBehavior {
        default_behavior: bool,
    },
    Range(Range),
}

/// Decode `Range | {range, placeholder} | {defaultBehavior} | null`.
///
/// `null` means the position cannot be renamed.
pub fn decode_prepare_rename(result: &Value) -> Result<PrepareRename, LspError> {
    if result.is_null() {
        return Err(LspError::CannotRename);
    }
    let wire = WirePrepareRename::deserialize(result).map_err(DecodeError::from)?;
    Ok(match wire {
        WirePrepareRename::WithPlaceholder { range, placeholder } => PrepareRename {
            range: Some(range),
            placeholder: Some(placeholder),
        },
        WirePrepareRename::DefaultBehavior { default_behavior } => {
            if !default_behavior {
                return Err(LspError::CannotRename);
            }
            PrepareRename {
                range: None,
                placeholder: None,
            }
        }
        WirePrepareRename::Range(range) => PrepareRename {
            range: Some(range),
            placeholder: None,
        },
    })
}

/// Decode the `WorkspaceEdit` returned by `textDocument/rename`.
///
/// An object with neither `changes` nor `documentChanges` is malformed.
pub fn decode_rename(result: &Value) -> Result<Vec<FileEdits>, DecodeError> {
    match result {
        Value::Null => Ok(Vec::new()),
        Value::Object(map)
            if map.contains_key("changes") || map.contains_key("documentChanges") =>
        {
            Ok(workspace_edit(result))
        }
        Value::Object(_) => Err(DecodeError::MissingField("changes")),
        other => Err(DecodeError::invalid_shape("workspace edit", other)),
    }
}

/// Per-document edit groups of a `WorkspaceEdit`.
///
/// `documentChanges` takes precedence over `changes` when both are present.
/// File create, rename, and delete operations are ignored.
pub(crate) fn workspace_edit(edit: &Value) -> Vec<FileEdits> {
    if let Some(document_changes) = edit.get("documentChanges").and_then(Value::as_array) {
        return document_changes
            .iter()
            .filter_map(|change| {
                let uri = change
                    .get("textDocument")
                    .and_then(|doc| doc.get("uri"))
                    .and_then(Value::as_str)?;
                let edits = change.get("edits").and_then(Value::as_array)?;
                Some(FileEdits {
                    uri: uri.to_string(),
                    edits: decode_elements(edits, "text edit"),
                })
            })
            .collect();
    }

    let Some(changes) = edit.get("changes").and_then(Value::as_object) else {
        return Vec::new();
    };
    changes
        .iter()
        .filter_map(|(uri, edits)| {
            let Some(edits) = edits.as_array() else {
                tracing::debug!(uri = %uri, "Skipping non-array edit list");
                return None;
            };
            Some(FileEdits {
                uri: uri.clone(),
                edits: decode_elements(edits, "text edit"),
            })
        })
        .collect()
}
