//! Run sessions: one conversion invocation at a time over an owned store
//!
//! # Lifecycle
//!
//! ```text
//! ┌──────┐   ┌──────────┐   ┌──────────┐   ┌────────────┐   ┌──────┐
//! │ Idle │──►│ Seeding  │──►│ Invoking │──►│ Harvesting │──►│ Done │
//! └──────┘   └──────────┘   └──────────┘   └────────────┘   └──────┘
//!                 │               │                │
//!                 │               │                └─ classify, decode diagnostics
//!                 │               └─ encode options, fill stdin, call module once
//!                 └─ reset store, seed system paths, inputs, placeholders,
//!                    record KnownPathSet
//! ```
//!
//! Each run starts from a freshly reset store, so nothing leaks between
//! runs. Sessions take `&mut self`, which rules out concurrent runs against
//! the same store; see [`Converter`](crate::Converter) for an async facade
//! that serializes callers.
//!
//! # Example
//!
//! ```rust
//! use docbridge_host::{ConvertRequest, EntryPoint, FileStore, ModuleFault, Options, Session};
//!
//! let module = |_: EntryPoint, _: &[u8], store: &mut FileStore| -> Result<(), ModuleFault> {
//!     store.write("stdout", b"<h1>T</h1>".to_vec());
//!     Ok(())
//! };
//!
//! let mut session = Session::new(module);
//! let request = ConvertRequest::new(Options::new().with("to", "html")).stdin("# T");
//! let result = session.convert(&request).unwrap();
//! assert_eq!(result.stdout, "<h1>T</h1>");
//! ```

use crate::classify::{classify, KnownPathSet};
use crate::diagnostics;
use crate::error::BridgeError;
use crate::module::{ConversionModule, EntryPoint};
use crate::payload;
use crate::store::FileStore;
use docbridge_api::{
    ConvertRequest, QueryRequest, QueryResponse, RunResult, STDERR_PATH, STDIN_PATH, STDOUT_PATH,
    WARNINGS_PATH,
};
use serde::Serialize;

/// Wire encoding of the request handed to the module
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum RequestEncoding {
    /// UTF-8 JSON text
    #[default]
    Json,
    /// MessagePack with named fields
    MessagePack,
}

impl RequestEncoding {
    pub fn encode<T: Serialize>(self, value: &T) -> Result<Vec<u8>, BridgeError> {
        match self {
            Self::Json => {
                serde_json::to_vec(value).map_err(|e| BridgeError::RequestEncoding(e.to_string()))
            }
            Self::MessagePack => rmp_serde::to_vec_named(value)
                .map_err(|e| BridgeError::RequestEncoding(e.to_string())),
        }
    }
}

/// Session configuration
#[derive(Debug, Clone)]
pub struct SessionConfig {
    /// How options are encoded for the module
    pub encoding: RequestEncoding,

    /// Return caller inputs even when their content is empty
    ///
    /// On by default, so `files` may hold empty entries for empty inputs
    /// even though every other path is reported only with non-empty content.
    pub keep_empty_inputs: bool,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            encoding: RequestEncoding::Json,
            keep_empty_inputs: true,
        }
    }
}

/// Where a session is in its single-pass lifecycle
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Idle,
    Seeding,
    Invoking,
    Harvesting,
    Done,
}

/// Drives a [`ConversionModule`] over an owned [`FileStore`]
pub struct Session<M> {
    module: M,
    store: FileStore,
    config: SessionConfig,
    state: SessionState,
}

impl<M: ConversionModule> Session<M> {
    /// Create a session with default configuration
    pub fn new(module: M) -> Self {
        Self::with_config(module, SessionConfig::default())
    }

    pub fn with_config(module: M, config: SessionConfig) -> Self {
        Self {
            module,
            store: FileStore::new(),
            config,
            state: SessionState::Idle,
        }
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    pub fn module(&self) -> &M {
        &self.module
    }

    pub fn module_mut(&mut self) -> &mut M {
        &mut self.module
    }

    /// Run one conversion
    ///
    /// The request is only borrowed: file payloads are copied into the store
    /// and every value in the result is freshly allocated.
    ///
    /// # Errors
    ///
    /// - [`BridgeError::RequestEncoding`] if the options cannot be encoded
    /// - [`BridgeError::ConversionFault`] if the module fails
    /// - [`BridgeError::MalformedDiagnostics`] if stderr/warnings are not UTF-8
    pub fn convert(&mut self, request: &ConvertRequest) -> Result<RunResult, BridgeError> {
        // 1. Seed
        self.transition(SessionState::Seeding);
        let known = self.seed(request);

        // 2. Invoke
        self.transition(SessionState::Invoking);
        let encoded = self.encode(&request.options)?;
        if let Some(stdin) = &request.stdin {
            self.store.set(STDIN_PATH, stdin.as_bytes(), true);
        }
        self.invoke(EntryPoint::Convert, &encoded)?;

        // 3. Harvest
        self.transition(SessionState::Harvesting);
        let result = self.harvest(&known)?;
        self.transition(SessionState::Done);

        Ok(result)
    }

    /// Ask the module an informational question
    ///
    /// Only the system paths are seeded. Whatever the module writes to
    /// stderr is logged; stdout must hold a JSON answer.
    pub fn query(&mut self, request: &QueryRequest) -> Result<QueryResponse, BridgeError> {
        self.transition(SessionState::Seeding);
        self.seed_system_paths();

        self.transition(SessionState::Invoking);
        let encoded = self.encode(request)?;
        self.invoke(EntryPoint::Query, &encoded)?;

        self.transition(SessionState::Harvesting);
        let stderr = self.harvest_stream(STDERR_PATH)?;
        if !stderr.is_empty() {
            tracing::info!(query = %request.query, stderr = %stderr.trim_end(), "Query wrote diagnostics");
        }
        let stdout = self
            .store
            .get(STDOUT_PATH)
            .map(|entry| entry.data.as_slice())
            .unwrap_or_default();
        match serde_json::from_slice(stdout) {
            Ok(response) => {
                self.transition(SessionState::Done);
                Ok(response)
            }
            Err(e) => {
                self.state = SessionState::Idle;
                Err(BridgeError::QueryResponse(e))
            }
        }
    }

    fn transition(&mut self, next: SessionState) {
        tracing::trace!(from = ?self.state, to = ?next, "Session state change");
        self.state = next;
    }

    fn encode<T: Serialize>(&mut self, value: &T) -> Result<Vec<u8>, BridgeError> {
        self.config.encoding.encode(value).map_err(|e| {
            self.state = SessionState::Idle;
            e
        })
    }

    fn seed_system_paths(&mut self) {
        self.store.reset();
        self.store.set(STDIN_PATH, Vec::new(), true);
        for path in [STDOUT_PATH, STDERR_PATH, WARNINGS_PATH] {
            self.store.set(path, Vec::new(), false);
        }
    }

    fn seed(&mut self, request: &ConvertRequest) -> KnownPathSet {
        self.seed_system_paths();

        for (path, value) in &request.files {
            self.store.set(path.as_str(), payload::to_bytes(value), true);
        }

        let options = &request.options;
        if let Some(output) = options.output_file() {
            self.store.set(output, Vec::new(), false);
        }
        if let Some(target) = options.extract_media() {
            self.store.set(target.path(), Vec::new(), false);
        }

        let known = KnownPathSet::seeded(request.files.keys().map(String::as_str), options);
        tracing::debug!(
            inputs = request.files.len(),
            known = known.len(),
            output = ?known.output_path(),
            extract = ?known.extract_target(),
            "Seeded store"
        );
        known
    }

    fn invoke(&mut self, entry: EntryPoint, request: &[u8]) -> Result<(), BridgeError> {
        tracing::debug!(%entry, request_len = request.len(), "Invoking conversion module");

        if let Err(fault) = self.module.invoke(entry, request, &mut self.store) {
            let stderr = self
                .store
                .get(STDERR_PATH)
                .map(|entry| String::from_utf8_lossy(&entry.data).into_owned())
                .unwrap_or_default();
            tracing::error!(%entry, error = %fault, "Conversion module faulted");
            self.state = SessionState::Idle;
            return Err(BridgeError::ConversionFault { fault, stderr });
        }
        Ok(())
    }

    fn harvest_stream(&mut self, stream: &'static str) -> Result<String, BridgeError> {
        diagnostics::decode_stream(&self.store, stream).map_err(|e| {
            self.state = SessionState::Idle;
            e
        })
    }

    fn harvest(&mut self, known: &KnownPathSet) -> Result<RunResult, BridgeError> {
        let classification = classify(&self.store, known, self.config.keep_empty_inputs);

        let stderr = self.harvest_stream(STDERR_PATH)?;
        let warnings = diagnostics::decode_warnings(&self.store).map_err(|e| {
            self.state = SessionState::Idle;
            e
        })?;
        let stdout = diagnostics::decode_stdout(&self.store);

        if known.output_path().is_some() && classification.output().is_none() {
            tracing::debug!(output = ?known.output_path(), "Declared output was not written");
        }

        Ok(RunResult {
            stdout,
            stderr,
            warnings: warnings.records,
            warnings_error: warnings.error,
            files: classification.files,
            media_files: classification.media_files,
        })
    }
}
