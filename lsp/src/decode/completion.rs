use serde::Deserialize;
use serde_json::Value;

use super::{decode_elements, lenient, lenient_markup};
use crate::error::DecodeError;

/// Kind of a completion item, as numbered by LSP.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompletionKind {
    Text,
    Method,
    Function,
    Constructor,
    Field,
    Variable,
    Class,
    Interface,
    Module,
    Property,
    Unit,
    Value,
    Enum,
    Keyword,
    Snippet,
    Color,
    File,
    Reference,
    Folder,
    EnumMember,
    Constant,
    Struct,
    Event,
    Operator,
    TypeParameter,
}

impl CompletionKind {
    #[must_use]
    pub fn from_lsp(value: u64) -> Option<Self> {
        Some(match value {
            1 => Self::Text,
            2 => Self::Method,
            3 => Self::Function,
            4 => Self::Constructor,
            5 => Self::Field,
            6 => Self::Variable,
            7 => Self::Class,
            8 => Self::Interface,
            9 => Self::Module,
            10 => Self::Property,
            11 => Self::Unit,
            12 => Self::Value,
            13 => Self::Enum,
            14 => Self::Keyword,
            15 => Self::Snippet,
            16 => Self::Color,
            17 => Self::File,
            18 => Self::Reference,
            19 => Self::Folder,
            20 => Self::EnumMember,
            21 => Self::Constant,
            22 => Self::Struct,
            23 => Self::Event,
            24 => Self::Operator,
            25 => Self::TypeParameter,
            _ => return None,
        })
    }

    /// Short tag for a completion menu column.
    #[must_use]
    pub fn abbreviation(self) -> &'static str {
        match self {
            Self::Method | Self::Function | Self::Constructor => "fn",
            Self::Field | Self::Property => "field",
            Self::Variable | Self::Value => "var",
            Self::Class | Self::Struct | Self::Interface => "type",
            Self::Module | Self::Folder | Self::File => "mod",
            Self::Enum | Self::EnumMember => "enum",
            Self::Keyword => "kw",
            Self::Snippet => "snip",
            Self::Constant => "const",
            Self::TypeParameter => "param",
            Self::Text | Self::Unit | Self::Color | Self::Reference | Self::Event | Self::Operator => {
                "text"
            }
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct CompletionItem {
    pub label: String,
    pub kind: Option<CompletionKind>,
    pub detail: Option<String>,
    pub documentation: Option<String>,
    pub insert_text: Option<String>,
    pub filter_text: Option<String>,
    pub sort_text: Option<String>,
}

impl CompletionItem {
    /// Text to insert when accepted.
    #[must_use]
    pub fn insert_text_or_label(&self) -> &str {
        self.insert_text.as_deref().unwrap_or(&self.label)
    }

    /// Key used for ordering in a menu.
    #[must_use]
    pub fn sort_key(&self) -> &str {
        self.sort_text.as_deref().unwrap_or(&self.label)
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct CompletionList {
    /// More typing should re-request rather than filter locally.
    pub is_incomplete: bool,
    pub items: Vec<CompletionItem>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct WireCompletionItem {
    label: String,
    #[serde(default, deserialize_with = "lenient")]
    kind: Option<u64>,
    #[serde(default, deserialize_with = "lenient")]
    detail: Option<String>,
    #[serde(default, deserialize_with = "lenient_markup")]
    documentation: Option<String>,
    #[serde(default, deserialize_with = "lenient")]
    insert_text: Option<String>,
    #[serde(default, deserialize_with = "lenient")]
    filter_text: Option<String>,
    #[serde(default, deserialize_with = "lenient")]
    sort_text: Option<String>,
}

impl From<WireCompletionItem> for CompletionItem {
    fn from(wire: WireCompletionItem) -> Self {
        Self {
            label: wire.label,
            kind: wire.kind.and_then(CompletionKind::from_lsp),
            detail: wire.detail,
            documentation: wire.documentation,
            insert_text: wire.insert_text,
            filter_text: wire.filter_text,
            sort_text: wire.sort_text,
        }
    }
}

/// Decode `CompletionItem[] | CompletionList | null`.
pub fn decode_completion(result: &Value) -> Result<CompletionList, DecodeError> {
    let (items, is_incomplete) = match result {
        Value::Null => return Ok(CompletionList::default()),
        Value::Array(items) => (items, false),
        Value::Object(map) => {
            let items = map
                .get("items")
                .ok_or(DecodeError::MissingField("items"))?;
            let items = items
                .as_array()
                .ok_or_else(|| DecodeError::invalid_shape("array of completion items", items))?;
            let is_incomplete = map
                .get("isIncomplete")
                .and_then(Value::as_bool)
                .unwrap_or(false);
            (items, is_incomplete)
        }
        other => return Err(DecodeError::invalid_shape("completion list", other)),
    };

    let items = decode_elements::<WireCompletionItem>(items, "completion item")
        .into_iter()
        .map(CompletionItem::from)
        .collect();

    Ok(CompletionList {
        is_incomplete,
        items,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bare_array() {
        let list = decode_completion(&serde_json::json!([
            { "label": "println!", "kind": 3, "detail": "macro", "insertText": "println!($0)" },
            { "label": "print!" }
        ]))
        .unwrap();

        assert!(!list.is_incomplete);
        assert_eq!(list.items.len(), 2);
        assert_eq!(list.items[0].kind, Some(CompletionKind::Function));
        assert_eq!(list.items[0].detail.as_deref(), Some("macro"));
        assert_eq!(list.items[0].insert_text_or_label(), "println!($0)");
        assert_eq!(list.items[1].insert_text_or_label(), "print!");
        assert!(list.items[1].kind.is_none());
    }

    #[test]
    fn test_list_wrapper() {
        let list = decode_completion(&serde_json::json!({
            "isIncomplete": true,
            "items": [{ "label": "foo", "filterText": "f", "sortText": "0001" }]
        }))
        .unwrap();
        assert!(list.is_incomplete);
        assert_eq!(list.items[0].filter_text.as_deref(), Some("f"));
        assert_eq!(list.items[0].sort_key(), "0001");
    }

    #[test]
    fn test_item_missing_label_is_skipped() {
        let list = decode_completion(&serde_json::json!([
            { "label": "good" },
            { "kind": 6, "detail": "no label here" }
        ]))
        .unwrap();
        assert_eq!(list.items.len(), 1);
        assert_eq!(list.items[0].label, "good");
    }

    #[test]
    fn test_optional_fields_default_independently() {
        let list = decode_completion(&serde_json::json!([
            { "label": "x", "kind": "bogus", "detail": 7, "documentation": { "kind": "markdown", "value": "docs" } }
        ]))
        .unwrap();
        let item = &list.items[0];
        assert!(item.kind.is_none());
        assert!(item.detail.is_none());
        assert_eq!(item.documentation.as_deref(), Some("docs"));
    }

    #[test]
    fn test_null_is_empty() {
        assert!(decode_completion(&Value::Null).unwrap().items.is_empty());
    }

    #[test]
    fn test_unrecognized_shapes() {
        assert!(matches!(
            decode_completion(&serde_json::json!({ "isIncomplete": false })),
            Err(DecodeError::MissingField("items"))
        ));
        assert!(matches!(
            decode_completion(&serde_json::json!("nope")),
            Err(DecodeError::InvalidShape { found: "string", .. })
        ));
    }
}
