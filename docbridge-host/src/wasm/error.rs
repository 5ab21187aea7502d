//! Wasm adapter error types
//!
//! Covers module loading, runtime initialization and staging of the store
//! on the host filesystem.

use std::path::PathBuf;
use thiserror::Error;

/// Errors that can occur while loading or driving a wasm conversion module
#[derive(Debug, Error)]
pub enum WasmError {
    #[error("Engine creation failed: {0}")]
    EngineCreation(#[source] anyhow::Error),

    #[error("Failed to read module '{path}': {source}")]
    ReadModule {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Module compilation failed: {0}")]
    ModuleCompilation(#[source] anyhow::Error),

    #[error("Instantiation failed: {0}")]
    Instantiation(#[source] anyhow::Error),

    #[error("Export not found: {0}")]
    ExportNotFound(String),

    /// A runtime initializer (`_initialize`, `hs_init_with_rtsopts`, ...) failed
    #[error("Runtime initialization failed in `{function}`: {source}")]
    Initialization {
        function: &'static str,
        #[source]
        source: anyhow::Error,
    },

    #[error("Store configuration failed: {0}")]
    StoreConfig(String),

    #[error("Memory access error: {0}")]
    MemoryAccess(String),

    /// A store path cannot be mapped onto the staging directory
    #[error("Store path '{path}' cannot be staged: {reason}")]
    UnsafePath { path: String, reason: &'static str },

    #[error("Failed to preopen staging directory '{path}': {reason}")]
    PreopenFailed { path: PathBuf, reason: String },

    #[error("Staging I/O failed at '{path}': {source}")]
    Staging {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

impl WasmError {
    /// Create an unsafe path error
    pub fn unsafe_path(path: impl Into<String>, reason: &'static str) -> Self {
        Self::UnsafePath {
            path: path.into(),
            reason,
        }
    }

    /// Create a staging I/O error
    pub fn staging(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Staging {
            path: path.into(),
            source,
        }
    }

    /// Check if this error came from a path that would escape the staging directory
    pub fn is_security_violation(&self) -> bool {
        matches!(self, Self::UnsafePath { .. })
    }
}
