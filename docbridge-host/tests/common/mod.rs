//! Fake conversion modules shared by the integration tests

#![allow(dead_code)]

use docbridge_host::{ConversionModule, EntryPoint, FileStore, ModuleFault};
use serde_json::{json, Map, Value};

pub const PNG_BYTES: &[u8] = &[0x89, b'P', b'N', b'G', 0x0d, 0x0a, 0x1a, 0x0a, 0x00, 0xff];
pub const ZIP_BYTES: &[u8] = &[b'P', b'K', 0x03, 0x04, 0x14, 0x00, 0x08, 0x00, 0x9c, 0x8b];

/// A module that replays a fixed list of writes and optionally fails afterwards
#[derive(Debug, Default)]
pub struct ScriptedModule {
    writes: Vec<(String, Vec<u8>)>,
    fault: Option<String>,
    pub requests: Vec<(EntryPoint, Vec<u8>)>,
}

impl ScriptedModule {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn writes(mut self, path: &str, data: impl Into<Vec<u8>>) -> Self {
        self.writes.push((path.to_string(), data.into()));
        self
    }

    pub fn then_fail(mut self, message: &str) -> Self {
        self.fault = Some(message.to_string());
        self
    }

    pub fn last_request(&self) -> Option<&[u8]> {
        self.requests.last().map(|(_, request)| request.as_slice())
    }
}

impl ConversionModule for ScriptedModule {
    fn invoke(
        &mut self,
        entry: EntryPoint,
        request: &[u8],
        store: &mut FileStore,
    ) -> Result<(), ModuleFault> {
        self.requests.push((entry, request.to_vec()));
        for (path, data) in &self.writes {
            store.write(path.as_str(), data.clone());
        }
        match &self.fault {
            Some(message) => Err(ModuleFault::failed(message.clone())),
            None => Ok(()),
        }
    }
}

/// A small stand-in for a document converter
///
/// Reads stdin plus any `input-files`, wraps the text in a paragraph and
/// writes it to `output-file` or stdout. Honors `extract-media` by writing
/// an image below a directory target or archive bytes to a `.zip` target,
/// and reports a missing `bibliography` as a warning record.
#[derive(Debug, Default)]
pub struct FakeConverter {
    pub calls: usize,
}

impl FakeConverter {
    pub fn new() -> Self {
        Self::default()
    }

    fn convert(&self, options: &Map<String, Value>, store: &mut FileStore) -> Result<(), ModuleFault> {
        let mut text = store
            .get("stdin")
            .map(|entry| String::from_utf8_lossy(&entry.data).into_owned())
            .unwrap_or_default();
        if let Some(Value::Array(inputs)) = options.get("input-files") {
            for input in inputs.iter().filter_map(Value::as_str) {
                match store.get(input) {
                    Some(entry) => text.push_str(&String::from_utf8_lossy(&entry.data)),
                    None => {
                        store.write("stderr", format!("pandoc: {}: file not found\n", input));
                        return Err(ModuleFault::Exit(1));
                    }
                }
            }
        }

        let mut warnings = Vec::new();
        if let Some(bibliography) = options.get("bibliography").and_then(Value::as_str) {
            if !store.contains(bibliography) {
                warnings.push(json!({
                    "type": "CouldNotFetchResource",
                    "verbosity": "WARNING",
                    "resource": bibliography,
                    "message": format!("Could not fetch resource {}", bibliography),
                }));
            }
        }

        let rendered = format!("<p>{}</p>\n", text.trim());
        match options.get("output-file").and_then(Value::as_str) {
            Some(path) if !path.is_empty() => store.write(path, rendered),
            _ => store.write("stdout", rendered),
        }

        if let Some(target) = options.get("extract-media").and_then(Value::as_str) {
            if target.ends_with(".zip") {
                store.write(target, ZIP_BYTES);
            } else if !target.is_empty() {
                store.write(format!("{}/img1.png", target), PNG_BYTES);
            }
        }

        if !warnings.is_empty() {
            store.write("warnings", Value::Array(warnings).to_string());
        }
        Ok(())
    }

    fn query(&self, query: &Map<String, Value>, store: &mut FileStore) -> Result<(), ModuleFault> {
        let answer = match query.get("query").and_then(Value::as_str) {
            Some("version") => json!("3.6"),
            Some("input-formats") => json!(["html", "markdown"]),
            Some("default-template") => json!({
                "format": query.get("format").cloned().unwrap_or(Value::Null),
                "template": "$body$",
            }),
            Some(other) => {
                store.write("stderr", format!("unknown query: {}\n", other));
                store.write("stdout", "?");
                return Ok(());
            }
            None => return Err(ModuleFault::failed("query name missing")),
        };
        store.write("stdout", answer.to_string());
        Ok(())
    }
}

impl ConversionModule for FakeConverter {
    fn invoke(
        &mut self,
        entry: EntryPoint,
        request: &[u8],
        store: &mut FileStore,
    ) -> Result<(), ModuleFault> {
        self.calls += 1;
        let request: Map<String, Value> = serde_json::from_slice(request)
            .or_else(|_| rmp_serde::from_slice(request))
            .map_err(|e| ModuleFault::failed(format!("unreadable request: {}", e)))?;
        match entry {
            EntryPoint::Convert => self.convert(&request, store),
            EntryPoint::Query => self.query(&request, store),
        }
    }
}
