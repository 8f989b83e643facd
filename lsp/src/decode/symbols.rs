use serde::Deserialize;
use serde_json::Value;

use super::lenient;
use crate::error::DecodeError;
use crate::types::Range;

/// LSP symbol kind number (1 = File ... 26 = TypeParameter).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SymbolKind(pub u32);

impl SymbolKind {
    #[must_use]
    pub fn name(self) -> &'static str {
        match self.0 {
            1 => "file",
            2 => "module",
            3 => "namespace",
            4 => "package",
            5 => "class",
            6 => "method",
            7 => "property",
            8 => "field",
            9 => "constructor",
            10 => "enum",
            11 => "interface",
            12 => "function",
            13 => "variable",
            14 => "constant",
            15 => "string",
            16 => "number",
            17 => "boolean",
            18 => "array",
            19 => "object",
            20 => "key",
            21 => "null",
            22 => "enum member",
            23 => "struct",
            24 => "event",
            25 => "operator",
            26 => "type parameter",
            _ => "unknown",
        }
    }
}

/// A node of the document outline.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DocumentSymbol {
    pub name: String,
    pub detail: Option<String>,
    pub kind: SymbolKind,
    /// Full extent, including body and doc comments.
    pub range: Range,
    /// The identifier itself.
    pub selection_range: Range,
    pub children: Vec<DocumentSymbol>,
}

impl DocumentSymbol {
    /// Depth-first visit of this node and its descendants with their depth.
    pub fn walk<'a>(&'a self, depth: usize, visit: &mut impl FnMut(&'a DocumentSymbol, usize)) {
        visit(self, depth);
        for child in &self.children {
            child.walk(depth + 1, visit);
        }
    }
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct WireDocumentSymbol {
    name: String,
    kind: u32,
    range: Range,
    selection_range: Range,
    #[serde(default, deserialize_with = "lenient")]
    detail: Option<String>,
    #[serde(default)]
    children: Vec<Value>,
}

/// Flat `SymbolInformation`, which some servers return instead.
#[derive(Deserialize)]
struct WireSymbolInformation {
    name: String,
    kind: u32,
    location: WireSymbolLocation,
    #[serde(default, rename = "containerName", deserialize_with = "lenient")]
    container_name: Option<String>,
}

#[derive(Deserialize)]
struct WireSymbolLocation {
    range: Range,
}

fn decode_symbol(item: &Value) -> Option<DocumentSymbol> {
    if item.get("location").is_some() {
        return match WireSymbolInformation::deserialize(item) {
            Ok(info) => Some(DocumentSymbol {
                name: info.name,
                detail: info.container_name,
                kind: SymbolKind(info.kind),
                range: info.location.range,
                selection_range: info.location.range,
                children: Vec::new(),
            }),
            Err(e) => {
                tracing::debug!(error = %e, "Skipping malformed symbol information");
                None
            }
        };
    }

    match WireDocumentSymbol::deserialize(item) {
        Ok(wire) => Some(DocumentSymbol {
            name: wire.name,
            detail: wire.detail,
            kind: SymbolKind(wire.kind),
            range: wire.range,
            selection_range: wire.selection_range,
            children: wire.children.iter().filter_map(decode_symbol).collect(),
        }),
        Err(e) => {
            tracing::debug!(error = %e, "Skipping malformed document symbol");
            None
        }
    }
}

/// Decode `DocumentSymbol[] | SymbolInformation[] | null` into a tree.
pub fn decode_document_symbols(result: &Value) -> Result<Vec<DocumentSymbol>, DecodeError> {
    match result {
        Value::Null => Ok(Vec::new()),
        Value::Array(items) => Ok(items.iter().filter_map(decode_symbol).collect()),
        other => Err(DecodeError::invalid_shape("array of document symbols", other)),
    }
}
