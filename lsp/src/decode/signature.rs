use serde::Deserialize;
use serde_json::Value;

use super::{lenient, lenient_markup};
use crate::error::DecodeError;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParameterInformation {
    /// Parameter text as shown inside the signature label.
    pub label: String,
    /// UTF-16 offsets of the parameter within the signature label, when known.
    pub offsets: Option<(u32, u32)>,
    pub documentation: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SignatureInformation {
    pub label: String,
    pub documentation: Option<String>,
    pub parameters: Vec<ParameterInformation>,
    /// Overrides [`SignatureHelp::active_parameter`] for this signature.
    pub active_parameter: Option<u32>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SignatureHelp {
    pub signatures: Vec<SignatureInformation>,
    pub active_signature: u32,
    pub active_parameter: Option<u32>,
}

impl SignatureHelp {
    #[must_use]
    pub fn active(&self) -> Option<&SignatureInformation> {
        let index = usize::try_from(self.active_signature).ok()?;
        self.signatures.get(index).or_else(|| self.signatures.first())
    }

    /// Active parameter of the active signature.
    #[must_use]
    pub fn current_parameter(&self) -> Option<&ParameterInformation> {
        let signature = self.active()?;
        let index = signature.active_parameter.or(self.active_parameter)?;
        signature.parameters.get(usize::try_from(index).ok()?)
    }
}

#[derive(Deserialize)]
#[serde(untagged)]
enum WireParameterLabel {
    Text(String),
    Offsets([u32; 2]),
}

#[derive(Deserialize)]
struct WireParameter {
    label: WireParameterLabel,
    #[serde(default, deserialize_with = "lenient_markup")]
    documentation: Option<String>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct WireSignature {
    label: String,
    #[serde(default, deserialize_with = "lenient_markup")]
    documentation: Option<String>,
    #[serde(default)]
    parameters: Vec<Value>,
    #[serde(default, deserialize_with = "lenient")]
    active_parameter: Option<u32>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct WireSignatureHelp {
    signatures: Vec<Value>,
    #[serde(default, deserialize_with = "lenient")]
    active_signature: Option<u32>,
    #[serde(default, deserialize_with = "lenient")]
    active_parameter: Option<u32>,
}

/// Slice `label` by UTF-16 code unit offsets.
fn utf16_slice(label: &str, start: u32, end: u32) -> Option<String> {
    let units: Vec<u16> = label.encode_utf16().collect();
    let start = usize::try_from(start).ok()?;
    let end = usize::try_from(end).ok()?;
    let slice = units.get(start..end)?;
    String::from_utf16(slice).ok()
}

fn decode_parameter(signature_label: &str, item: &Value) -> Option<ParameterInformation> {
    let wire = match WireParameter::deserialize(item) {
        Ok(wire) => wire,
        Err(e) => {
            tracing::debug!(error = %e, "Skipping malformed signature parameter");
            return None;
        }
    };
    let (label, offsets) = match wire.label {
        WireParameterLabel::Text(text) => (text, None),
        WireParameterLabel::Offsets([start, end]) => {
            (utf16_slice(signature_label, start, end)?, Some((start, end)))
        }
    };
    Some(ParameterInformation {
        label,
        offsets,
        documentation: wire.documentation,
    })
}

fn decode_signature(item: &Value) -> Option<SignatureInformation> {
    let wire = match WireSignature::deserialize(item) {
        Ok(wire) => wire,
        Err(e) => {
            tracing::debug!(error = %e, "Skipping malformed signature");
            return None;
        }
    };
    let parameters = wire
        .parameters
        .iter()
        .filter_map(|param| decode_parameter(&wire.label, param))
        .collect();
    Some(SignatureInformation {
        label: wire.label,
        documentation: wire.documentation,
        parameters,
        active_parameter: wire.active_parameter,
    })
}

/// Decode `SignatureHelp | null`. No usable signatures decodes to `None`.
pub fn decode_signature_help(result: &Value) -> Result<Option<SignatureHelp>, DecodeError> {
    match result {
        Value::Null => return Ok(None),
        Value::Object(map) if !map.contains_key("signatures") => {
            return Err(DecodeError::MissingField("signatures"));
        }
        Value::Object(_) => {}
        other => return Err(DecodeError::invalid_shape("signature help", other)),
    }

    let wire = WireSignatureHelp::deserialize(result)?;
    let signatures: Vec<SignatureInformation> =
        wire.signatures.iter().filter_map(decode_signature).collect();
    if signatures.is_empty() {
        return Ok(None);
    }

    Ok(Some(SignatureHelp {
        signatures,
        active_signature: wire.active_signature.unwrap_or(0),
        active_parameter: wire.active_parameter,
    }))
}
