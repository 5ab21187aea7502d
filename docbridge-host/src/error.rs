//! Error types for the bridge and the module boundary

use crate::module::EntryPoint;
use docbridge_api::PayloadError;
use thiserror::Error;

/// Errors surfaced to callers of a [`Session`](crate::Session)
#[derive(Debug, Error)]
pub enum BridgeError {
    /// A file value was neither text nor a byte payload
    #[error(transparent)]
    Payload(#[from] PayloadError),

    /// The request itself was not shaped like a conversion request
    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    #[error("Failed to encode request: {0}")]
    RequestEncoding(String),

    /// The conversion module signaled failure
    #[error("Conversion failed: {fault}")]
    ConversionFault {
        #[source]
        fault: ModuleFault,
        /// Whatever the module had written to stderr before failing
        stderr: String,
    },

    /// A diagnostics stream was not valid UTF-8
    #[error("Malformed {stream} stream: {source}")]
    MalformedDiagnostics {
        stream: &'static str,
        #[source]
        source: std::string::FromUtf8Error,
    },

    #[error("Query response is not valid JSON: {0}")]
    QueryResponse(#[source] serde_json::Error),

    #[error("Invalid legacy arguments: {0}")]
    InvalidArguments(String),

    #[error("Conversion task did not complete: {0}")]
    TaskJoin(#[from] tokio::task::JoinError),
}

impl BridgeError {
    /// Check if the module itself failed (as opposed to the bridge)
    pub fn is_conversion_fault(&self) -> bool {
        matches!(self, Self::ConversionFault { .. })
    }

    /// Partial stderr text captured when the module faulted
    pub fn partial_stderr(&self) -> Option<&str> {
        match self {
            Self::ConversionFault { stderr, .. } => Some(stderr),
            _ => None,
        }
    }
}

/// Failures reported by a [`ConversionModule`](crate::ConversionModule)
#[derive(Debug, Error)]
pub enum ModuleFault {
    /// The module trapped while running an export
    #[error("Trap in `{function}`: {source}")]
    Trap {
        function: &'static str,
        #[source]
        source: anyhow::Error,
    },

    /// The module called `proc_exit` with a non-zero status
    #[error("Module exited with status {0}")]
    Exit(i32),

    #[error("Fuel exhausted (CPU limit exceeded)")]
    FuelExhausted,

    #[error("Export not found: {0}")]
    MissingExport(String),

    #[error("Entry point not supported by this module: {0}")]
    Unsupported(EntryPoint),

    /// The module reported failure in its own terms
    #[error("{0}")]
    Failed(String),

    #[cfg(feature = "wasm")]
    #[error(transparent)]
    Wasm(#[from] crate::wasm::WasmError),
}

impl ModuleFault {
    pub fn failed(message: impl Into<String>) -> Self {
        Self::Failed(message.into())
    }
}
