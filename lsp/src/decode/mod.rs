//! Response decoders: raw `result` JSON into typed values.
//!
//! Every decoder is a pure function. A body whose overall shape is wrong
//! fails with [`DecodeError`]; a malformed element inside an array is
//! skipped and the rest of the array is still returned.

mod code_action;
mod completion;
mod formatting;
mod hover;
mod location;
mod rename;
mod signature;
mod symbols;

pub use code_action::{CodeAction, CodeActionOrCommand, Command, decode_code_actions};
pub use completion::{CompletionItem, CompletionKind, CompletionList, decode_completion};
pub use formatting::{TextEdit, decode_formatting};
pub use hover::{Hover, decode_hover};
pub use location::{Location, decode_definition, decode_references};
pub use rename::{FileEdits, PrepareRename, decode_prepare_rename, decode_rename};
pub use signature::{ParameterInformation, SignatureHelp, SignatureInformation, decode_signature_help};
pub use symbols::{DocumentSymbol, SymbolKind, decode_document_symbols};

use serde::de::DeserializeOwned;
use serde::{Deserialize, Deserializer};
use serde_json::Value;

/// Deserialize each element, dropping the ones that do not fit `T`.
pub(crate) fn decode_elements<T: DeserializeOwned>(items: &[Value], what: &'static str) -> Vec<T> {
    items
        .iter()
        .filter_map(|item| match T::deserialize(item) {
            Ok(value) => Some(value),
            Err(e) => {
                tracing::debug!(element = what, error = %e, "Skipping malformed element");
                None
            }
        })
        .collect()
}

/// Field deserializer that turns a present-but-wrong value into `None`.
pub(crate) fn lenient<'de, D, T>(deserializer: D) -> Result<Option<T>, D::Error>
where
    D: Deserializer<'de>,
    T: DeserializeOwned,
{
    let value = Value::deserialize(deserializer)?;
    Ok(T::deserialize(value).ok())
}

/// Text of a `string | MarkupContent | MarkedString` value.
pub(crate) fn markup_text(value: &Value) -> Option<String> {
    match value {
        Value::String(text) => Some(text.clone()),
        Value::Object(map) => map.get("value").and_then(Value::as_str).map(str::to_string),
        _ => None,
    }
}

/// `documentation`-style field: string or markup object, anything else ignored.
pub(crate) fn lenient_markup<'de, D>(deserializer: D) -> Result<Option<String>, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Value::deserialize(deserializer)?;
    Ok(markup_text(&value))
}
