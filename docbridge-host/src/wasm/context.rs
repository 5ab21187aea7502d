//! WASI context for a conversion module
//!
//! The guest gets exactly one preopened directory: the staging directory,
//! mounted at `/` with full permissions. Everything else (environment,
//! network, host stdio) is withheld unless host stdio inheritance is turned
//! on for debugging.
//!
//! | Grant | Value |
//! |-------|-------|
//! | argv | `[program_name, args..]` |
//! | preopen | staging dir → `/` (`DirPerms::all()`, `FilePerms::all()`) |
//! | env | none |
//! | stdout / stderr | captured in the store, or inherited when requested |

use super::error::WasmError;
use std::path::{Path, PathBuf};
use wasmtime_wasi::preview1::WasiP1Ctx;
use wasmtime_wasi::{DirPerms, FilePerms, WasiCtxBuilder};

/// Guest path the staging directory is mounted at
pub const GUEST_ROOT: &str = "/";

/// Resolved WASI settings for one module instance
#[derive(Debug, Clone)]
pub struct GuestSpec {
    /// Program name (argv[0])
    pub program_name: String,

    /// Additional arguments
    pub args: Vec<String>,

    /// Host directory mounted at [`GUEST_ROOT`]
    pub staging_root: PathBuf,

    /// Inherit host stdout and stderr
    pub inherit_stdio: bool,
}

impl GuestSpec {
    pub fn new(program_name: impl Into<String>, staging_root: impl AsRef<Path>) -> Self {
        Self {
            program_name: program_name.into(),
            args: Vec::new(),
            staging_root: staging_root.as_ref().to_path_buf(),
            inherit_stdio: false,
        }
    }

    pub fn with_args(mut self, args: Vec<String>) -> Self {
        self.args = args;
        self
    }

    pub fn inherit_stdio(mut self, inherit: bool) -> Self {
        self.inherit_stdio = inherit;
        self
    }

    /// Full argument vector as the guest sees it
    pub fn argv(&self) -> Vec<String> {
        let mut argv = vec![self.program_name.clone()];
        argv.extend(self.args.iter().cloned());
        argv
    }

    /// Build a WASI Preview 1 context
    ///
    /// # Errors
    ///
    /// Returns [`WasmError::PreopenFailed`] if the staging directory cannot
    /// be opened.
    pub fn build_p1_ctx(&self) -> Result<WasiP1Ctx, WasmError> {
        let mut builder = WasiCtxBuilder::new();
        builder.args(&self.argv());

        if self.inherit_stdio {
            builder.inherit_stdout();
            builder.inherit_stderr();
        }

        builder
            .preopened_dir(
                &self.staging_root,
                GUEST_ROOT,
                DirPerms::all(),
                FilePerms::all(),
            )
            .map_err(|e| WasmError::PreopenFailed {
                path: self.staging_root.clone(),
                reason: e.to_string(),
            })?;

        Ok(builder.build_p1())
    }
}
