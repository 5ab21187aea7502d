//! docbridge-api: Shared types for the docbridge conversion bridge
//!
//! This crate defines the request/result shapes exchanged between a host
//! application and the bridge that drives a sandboxed conversion module.
//! Options travel to the module as JSON (or MessagePack, see the host's
//! `RequestEncoding`).

use serde::de::Error as _;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use serde_json::{Map, Value};
use std::collections::BTreeMap;
use thiserror::Error;

/// Store path the module reads its standard input from
pub const STDIN_PATH: &str = "stdin";

/// Store path the module writes its standard output to
pub const STDOUT_PATH: &str = "stdout";

/// Store path the module writes human-readable diagnostics to
pub const STDERR_PATH: &str = "stderr";

/// Store path the module writes structured warning records to
pub const WARNINGS_PATH: &str = "warnings";

/// All fixed system paths, in seeding order
pub const SYSTEM_PATHS: [&str; 4] = [STDIN_PATH, STDOUT_PATH, STDERR_PATH, WARNINGS_PATH];

/// Option key declaring the output file path
pub const OUTPUT_FILE_KEY: &str = "output-file";

/// Option key declaring the media extraction target
pub const EXTRACT_MEDIA_KEY: &str = "extract-media";

/// Suffixes that make an extraction target an archive rather than a directory.
///
/// This is a naming heuristic; the module may use other conventions.
pub const ARCHIVE_SUFFIXES: &[&str] = &[".zip"];

/// Errors raised while interpreting caller-supplied values
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PayloadError {
    #[error("Unsupported file value kind: {0} (expected text or a byte array)")]
    UnsupportedValueKind(&'static str),
}

/// A file's content as seen by the caller: text when it is valid UTF-8,
/// raw bytes otherwise
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FileValue {
    Text(String),
    Binary(Vec<u8>),
}

impl FileValue {
    /// Create a text value
    pub fn text(text: impl Into<String>) -> Self {
        Self::Text(text.into())
    }

    /// Create a binary value
    pub fn binary(bytes: impl Into<Vec<u8>>) -> Self {
        Self::Binary(bytes.into())
    }

    /// Borrow the underlying bytes
    pub fn as_bytes(&self) -> &[u8] {
        match self {
            Self::Text(text) => text.as_bytes(),
            Self::Binary(bytes) => bytes,
        }
    }

    /// Get the text, if this is a text value
    pub fn as_text(&self) -> Option<&str> {
        match self {
            Self::Text(text) => Some(text),
            Self::Binary(_) => None,
        }
    }

    pub fn is_binary(&self) -> bool {
        matches!(self, Self::Binary(_))
    }

    pub fn is_empty(&self) -> bool {
        self.as_bytes().is_empty()
    }
}

impl From<String> for FileValue {
    fn from(text: String) -> Self {
        Self::Text(text)
    }
}

impl From<&str> for FileValue {
    fn from(text: &str) -> Self {
        Self::Text(text.to_string())
    }
}

impl From<Vec<u8>> for FileValue {
    fn from(bytes: Vec<u8>) -> Self {
        Self::Binary(bytes)
    }
}

impl From<&[u8]> for FileValue {
    fn from(bytes: &[u8]) -> Self {
        Self::Binary(bytes.to_vec())
    }
}

/// Untyped values (e.g. a request read from a JSON file) are accepted when
/// they are a string or an array of bytes.
impl TryFrom<Value> for FileValue {
    type Error = PayloadError;

    fn try_from(value: Value) -> Result<Self, Self::Error> {
        match value {
            Value::String(text) => Ok(Self::Text(text)),
            Value::Array(items) => items
                .into_iter()
                .map(|item| {
                    item.as_u64()
                        .and_then(|n| u8::try_from(n).ok())
                        .ok_or(PayloadError::UnsupportedValueKind("array of non-bytes"))
                })
                .collect::<Result<Vec<u8>, _>>()
                .map(Self::Binary),
            Value::Null => Err(PayloadError::UnsupportedValueKind("null")),
            Value::Bool(_) => Err(PayloadError::UnsupportedValueKind("boolean")),
            Value::Number(_) => Err(PayloadError::UnsupportedValueKind("number")),
            Value::Object(_) => Err(PayloadError::UnsupportedValueKind("object")),
        }
    }
}

impl Serialize for FileValue {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            Self::Text(text) => serializer.serialize_str(text),
            Self::Binary(bytes) => bytes.serialize(serializer),
        }
    }
}

impl<'de> Deserialize<'de> for FileValue {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let value = Value::deserialize(deserializer)?;
        FileValue::try_from(value).map_err(D::Error::custom)
    }
}

/// Where extracted media should go
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ExtractTarget {
    /// A single archive file (e.g. `media.zip`)
    Archive(String),
    /// A directory root (e.g. `media`)
    Directory(String),
}

impl ExtractTarget {
    /// Classify an `extract-media` value by its suffix
    pub fn from_path(path: impl Into<String>) -> Self {
        let path = path.into();
        if ARCHIVE_SUFFIXES.iter().any(|suffix| path.ends_with(suffix)) {
            Self::Archive(path)
        } else {
            Self::Directory(path)
        }
    }

    pub fn path(&self) -> &str {
        match self {
            Self::Archive(path) | Self::Directory(path) => path,
        }
    }

    pub fn is_archive(&self) -> bool {
        matches!(self, Self::Archive(_))
    }
}

/// Conversion options, passed through to the module as a mapping
///
/// Only `output-file` and `extract-media` are interpreted by the bridge.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Options(Map<String, Value>);

impl Options {
    pub fn new() -> Self {
        Self(Map::new())
    }

    /// Add an option (builder style)
    pub fn with(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.0.insert(key.into(), value.into());
        self
    }

    /// Insert or replace an option
    pub fn insert(&mut self, key: impl Into<String>, value: impl Into<Value>) -> Option<Value> {
        self.0.insert(key.into(), value.into())
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.0.get(key)
    }

    pub fn get_mut(&mut self, key: &str) -> Option<&mut Value> {
        self.0.get_mut(key)
    }

    pub fn remove(&mut self, key: &str) -> Option<Value> {
        self.0.remove(key)
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &Value)> {
        self.0.iter()
    }

    /// The declared output path, if set to a non-empty string
    pub fn output_file(&self) -> Option<&str> {
        self.non_empty_str(OUTPUT_FILE_KEY)
    }

    /// The media extraction target, if set to a non-empty string
    pub fn extract_media(&self) -> Option<ExtractTarget> {
        self.non_empty_str(EXTRACT_MEDIA_KEY)
            .map(ExtractTarget::from_path)
    }

    pub fn as_map(&self) -> &Map<String, Value> {
        &self.0
    }

    fn non_empty_str(&self, key: &str) -> Option<&str> {
        self.0
            .get(key)
            .and_then(Value::as_str)
            .filter(|s| !s.is_empty())
    }
}

impl From<Map<String, Value>> for Options {
    fn from(map: Map<String, Value>) -> Self {
        Self(map)
    }
}

/// A conversion request: options, optional stdin text and input files
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ConvertRequest {
    #[serde(default)]
    pub options: Options,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stdin: Option<String>,

    #[serde(default)]
    pub files: BTreeMap<String, FileValue>,
}

impl ConvertRequest {
    pub fn new(options: Options) -> Self {
        Self {
            options,
            stdin: None,
            files: BTreeMap::new(),
        }
    }

    /// Set stdin text
    pub fn stdin(mut self, stdin: impl Into<String>) -> Self {
        self.stdin = Some(stdin.into());
        self
    }

    /// Add an input file
    pub fn file(mut self, path: impl Into<String>, value: impl Into<FileValue>) -> Self {
        self.files.insert(path.into(), value.into());
        self
    }
}

/// A structured warning record emitted by the module
///
/// Records look like `{"type": "CouldNotFetchResource", "verbosity": "WARNING", ...}`;
/// fields other than `type` and `verbosity` are kept in `details`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Warning {
    #[serde(rename = "type", default)]
    pub kind: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub verbosity: Option<String>,

    #[serde(flatten)]
    pub details: Map<String, Value>,
}

impl Warning {
    /// The human-readable message, when the record carries one
    pub fn message(&self) -> Option<&str> {
        self.details.get("message").and_then(Value::as_str)
    }
}

/// Everything a conversion run produced
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RunResult {
    pub stdout: String,

    pub stderr: String,

    #[serde(default)]
    pub warnings: Vec<Warning>,

    /// Set when the warnings stream could not be parsed
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub warnings_error: Option<String>,

    /// Every non-empty file after the run: inputs, declared outputs and new files
    #[serde(default)]
    pub files: BTreeMap<String, FileValue>,

    /// Only the files the module created that the caller did not declare
    #[serde(default)]
    pub media_files: BTreeMap<String, FileValue>,
}

/// An informational query, e.g. `{"query": "version"}`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueryRequest {
    pub query: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub format: Option<String>,
}

impl QueryRequest {
    pub fn new(query: impl Into<String>) -> Self {
        Self {
            query: query.into(),
            format: None,
        }
    }

    pub fn format(mut self, format: impl Into<String>) -> Self {
        self.format = Some(format.into());
        self
    }
}

/// Answer to a [`QueryRequest`]
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum QueryResponse {
    Text(String),
    List(Vec<String>),
    Map(Map<String, Value>),
}

/// A named resource for the legacy argument-string interface
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Resource {
    pub filename: String,
    pub contents: FileValue,
}

impl Resource {
    pub fn new(filename: impl Into<String>, contents: impl Into<FileValue>) -> Self {
        Self {
            filename: filename.into(),
            contents: contents.into(),
        }
    }
}

/// Result of the legacy interface
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LegacyOutput {
    /// The declared output file when one was requested, stdout text otherwise
    pub out: FileValue,

    #[serde(default)]
    pub media_files: BTreeMap<String, FileValue>,
}
