use serde_json::Value;

use super::markup_text;
use crate::error::DecodeError;
use crate::types::Range;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Hover {
    pub text: String,
    pub range: Option<Range>,
}

/// Decode a hover result. `null` or empty contents mean nothing to show.
///
/// `contents` may be a string, a `{value}` object, or an array of either;
/// array parts are joined with newlines.
pub fn decode_hover(result: &Value) -> Result<Option<Hover>, DecodeError> {
    let map = match result {
        Value::Null => return Ok(None),
        Value::Object(map) => map,
        other => return Err(DecodeError::invalid_shape("hover object", other)),
    };
    let contents = map
        .get("contents")
        .ok_or(DecodeError::MissingField("contents"))?;

    let text = match contents {
        Value::Array(parts) => parts
            .iter()
            .filter_map(markup_text)
            .filter(|part| !part.is_empty())
            .collect::<Vec<_>>()
            .join("\n"),
        Value::String(_) | Value::Object(_) => {
            markup_text(contents).ok_or(DecodeError::MissingField("value"))?
        }
        other => return Err(DecodeError::invalid_shape("hover contents", other)),
    };

    if text.trim().is_empty() {
        return Ok(None);
    }

    let range = map
        .get("range")
        .and_then(|range| serde_json::from_value(range.clone()).ok());
    Ok(Some(Hover { text, range }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::Position;

    #[test]
    fn test_array_of_mixed_parts() {
        let hover = decode_hover(&serde_json::json!({ "contents": [{ "value": "A" }, "B"] }))
            .unwrap()
            .unwrap();
        assert!(hover.text.contains('A'));
        assert!(hover.text.contains('B'));
        assert_eq!(hover.text, "A\nB");
    }

    #[test]
    fn test_plain_string() {
        let hover = decode_hover(&serde_json::json!({ "contents": "fn main()" }))
            .unwrap()
            .unwrap();
        assert_eq!(hover.text, "fn main()");
        assert!(hover.range.is_none());
    }

    #[test]
    fn test_markup_content_with_range() {
        let hover = decode_hover(&serde_json::json!({
            "contents": { "kind": "markdown", "value": "```rust\nlet x: i32\n```" },
            "range": { "start": { "line": 1, "character": 4 }, "end": { "line": 1, "character": 5 } }
        }))
        .unwrap()
        .unwrap();
        assert!(hover.text.contains("let x: i32"));
        assert_eq!(hover.range.unwrap().start, Position::new(1, 4));
    }

    #[test]
    fn test_null_and_empty() {
        assert!(decode_hover(&Value::Null).unwrap().is_none());
        assert!(decode_hover(&serde_json::json!({ "contents": [] })).unwrap().is_none());
        assert!(decode_hover(&serde_json::json!({ "contents": "" })).unwrap().is_none());
    }

    #[test]
    fn test_malformed() {
        assert!(matches!(
            decode_hover(&serde_json::json!({})),
            Err(DecodeError::MissingField("contents"))
        ));
        assert!(matches!(
            decode_hover(&serde_json::json!({ "contents": 3 })),
            Err(DecodeError::InvalidShape { .. })
        ));
        assert!(decode_hover(&serde_json::json!([1])).is_err());
    }
}
