use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::decode_elements;
use crate::error::DecodeError;
use crate::types::Range;

/// Replace `range` with `new_text`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TextEdit {
    pub range: Range,
    pub new_text: String,
}

/// Decode `TextEdit[] | null`.
pub fn decode_formatting(result: &Value) -> Result<Vec<TextEdit>, DecodeError> {
    match result {
        Value::Null => Ok(Vec::new()),
        Value::Array(items) => Ok(decode_elements(items, "text edit")),
        other => Err(DecodeError::invalid_shape("array of text edits", other)),
    }
}
