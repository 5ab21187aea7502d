//! Payload normalization between caller values and store bytes
//!
//! Going in, text is encoded as UTF-8 and binary payloads are copied as-is.
//! Coming out, bytes that decode as strict UTF-8 become text and everything
//! else stays binary. The module never tags its outputs, so the
//! representation is discovered from content.

use crate::error::BridgeError;
use docbridge_api::{ConvertRequest, FileValue, Options};
use serde_json::Value;
use std::collections::BTreeMap;

/// Encode a caller value into store bytes
pub fn to_bytes(value: &FileValue) -> Vec<u8> {
    value.as_bytes().to_vec()
}

/// Decode store bytes into text when valid UTF-8, binary otherwise
pub fn from_bytes(bytes: Vec<u8>) -> FileValue {
    match String::from_utf8(bytes) {
        Ok(text) => FileValue::Text(text),
        Err(e) => FileValue::Binary(e.into_bytes()),
    }
}

/// Build a [`ConvertRequest`] from an untyped JSON document
///
/// Unlike plain deserialization, a bad file value is reported as
/// [`PayloadError::UnsupportedValueKind`](docbridge_api::PayloadError::UnsupportedValueKind).
pub fn request_from_value(value: Value) -> Result<ConvertRequest, BridgeError> {
    let Value::Object(mut root) = value else {
        return Err(BridgeError::InvalidRequest(
            "request must be a JSON object".to_string(),
        ));
    };

    let options = match root.remove("options") {
        None | Some(Value::Null) => Options::new(),
        Some(Value::Object(map)) => Options::from(map),
        Some(_) => {
            return Err(BridgeError::InvalidRequest(
                "`options` must be an object".to_string(),
            ))
        }
    };

    let stdin = match root.remove("stdin") {
        None | Some(Value::Null) => None,
        Some(Value::String(text)) => Some(text),
        Some(_) => {
            return Err(BridgeError::InvalidRequest(
                "`stdin` must be a string".to_string(),
            ))
        }
    };

    let mut files = BTreeMap::new();
    match root.remove("files") {
        None | Some(Value::Null) => {}
        Some(Value::Object(map)) => {
            for (path, value) in map {
                files.insert(path, FileValue::try_from(value)?);
            }
        }
        Some(_) => {
            return Err(BridgeError::InvalidRequest(
                "`files` must be an object".to_string(),
            ))
        }
    }

    Ok(ConvertRequest {
        options,
        stdin,
        files,
    })
}
