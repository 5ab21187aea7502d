//! wasmtime adapter for conversion modules
//!
//! Runs a WASI Preview 1 module (such as a wasm build of pandoc) as a
//! [`ConversionModule`](crate::module::ConversionModule). The module's
//! filesystem is a private staging directory that mirrors the session store
//! for the duration of each call.
//!
//! # Example
//!
//! ```rust,ignore
//! use docbridge_host::{Session, WasmConversionModule, WasmModuleConfig};
//!
//! let module = WasmConversionModule::from_file("pandoc.wasm", WasmModuleConfig::default())?;
//! let mut session = Session::new(module);
//! let result = session.convert(&request)?;
//! ```

mod context;
mod error;
mod loader;
mod sandbox;

pub use context::{GuestSpec, GUEST_ROOT};
pub use error::WasmError;
pub use loader::{WasmConversionModule, WasmModuleConfig, WasmState};
pub use sandbox::{validate_store_path, StagingDir};
