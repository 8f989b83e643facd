use serde::Deserialize;
use serde_json::Value;

use super::decode_elements;
use crate::error::DecodeError;
use crate::protocol::file_uri_to_path;
use crate::types::Range;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Location {
    pub uri: String,
    pub range: Range,
}

impl Location {
    /// Local path for `file://` locations.
    #[must_use]
    pub fn path(&self) -> Option<std::path::PathBuf> {
        file_uri_to_path(&self.uri)
    }
}

/// `Location` or `LocationLink`.
#[derive(Deserialize)]
#[serde(untagged)]
enum WireLocation {
    #[serde(rename_all = "camelCase")]
    Link {
        target_uri: String,
        target_selection_range: Range,
    },
    Plain {
        uri: String,
        range: Range,
    },
}

impl From<WireLocation> for Location {
    fn from(wire: WireLocation) -> Self {
        match wire {
            WireLocation::Link {
                target_uri,
                target_selection_range,
            } => Self {
                uri: target_uri,
                range: target_selection_range,
            },
            WireLocation::Plain { uri, range } => Self { uri, range },
        }
    }
}

fn decode_locations(result: &Value) -> Result<Vec<Location>, DecodeError> {
    match result {
        Value::Null => Ok(Vec::new()),
        Value::Array(items) => Ok(decode_elements::<WireLocation>(items, "location")
            .into_iter()
            .map(Location::from)
            .collect()),
        Value::Object(_) => {
            let location = WireLocation::deserialize(result)?;
            Ok(vec![location.into()])
        }
        other => Err(DecodeError::invalid_shape("location or location array", other)),
    }
}

/// Decode `Location | Location[] | LocationLink[] | null`.
pub fn decode_definition(result: &Value) -> Result<Vec<Location>, DecodeError> {
    decode_locations(result)
}

/// Decode `Location[] | null`.
pub fn decode_references(result: &Value) -> Result<Vec<Location>, DecodeError> {
    decode_locations(result)
}
