//! Decoding of the module's diagnostic streams
//!
//! `stderr` and `warnings` are module-internal and always textual, so a
//! UTF-8 failure there is a protocol mismatch. The warnings payload is a
//! JSON array of records; when it cannot be parsed the run still succeeds
//! with an empty list.

use crate::error::BridgeError;
use crate::store::FileStore;
use docbridge_api::{Warning, STDOUT_PATH, WARNINGS_PATH};

/// Parsed warnings plus the reason parsing failed, if it did
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DecodedWarnings {
    pub records: Vec<Warning>,
    pub error: Option<String>,
}

/// Strictly decode a diagnostic stream. A missing entry decodes as empty.
pub fn decode_stream(store: &FileStore, stream: &'static str) -> Result<String, BridgeError> {
    let Some(entry) = store.get(stream) else {
        return Ok(String::new());
    };
    String::from_utf8(entry.data.clone())
        .map_err(|source| BridgeError::MalformedDiagnostics { stream, source })
}

/// Decode stdout, replacing invalid sequences
pub fn decode_stdout(store: &FileStore) -> String {
    let Some(entry) = store.get(STDOUT_PATH) else {
        return String::new();
    };
    match String::from_utf8(entry.data.clone()) {
        Ok(text) => text,
        Err(e) => {
            tracing::warn!(
                valid_up_to = e.utf8_error().valid_up_to(),
                "stdout is not valid UTF-8, decoding lossily"
            );
            String::from_utf8_lossy(e.as_bytes()).into_owned()
        }
    }
}

/// Parse warning records from decoded text
pub fn parse_warnings(text: &str) -> DecodedWarnings {
    if text.trim().is_empty() {
        return DecodedWarnings::default();
    }
    match serde_json::from_str::<Vec<Warning>>(text) {
        Ok(records) => DecodedWarnings {
            records,
            error: None,
        },
        Err(e) => {
            tracing::warn!(error = %e, "Failed to parse warnings stream");
            DecodedWarnings {
                records: Vec::new(),
                error: Some(e.to_string()),
            }
        }
    }
}

/// Decode and parse the warnings stream
pub fn decode_warnings(store: &FileStore) -> Result<DecodedWarnings, BridgeError> {
    let text = decode_stream(store, WARNINGS_PATH)?;
    Ok(parse_warnings(&text))
}
