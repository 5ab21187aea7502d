//! docbridge-host: Virtual filesystem bridge for sandboxed conversion modules
//!
//! This crate projects a caller's file collection into an in-memory store,
//! runs an opaque conversion module over it, and classifies what comes back
//! into inputs, declared outputs and newly produced media.

pub mod classify;
pub mod converter;
pub mod diagnostics;
pub mod error;
pub mod legacy;
pub mod module;
pub mod payload;
pub mod session;
pub mod store;
#[cfg(feature = "wasm")]
pub mod wasm;

pub use classify::{classify, Classification, FileRole, KnownPathSet};
pub use converter::Converter;
pub use error::{BridgeError, ModuleFault};
pub use module::{ConversionModule, EntryPoint};
pub use session::{RequestEncoding, Session, SessionConfig, SessionState};
pub use store::{FileStore, StoreEntry};
#[cfg(feature = "wasm")]
pub use wasm::{WasmConversionModule, WasmError, WasmModuleConfig};

pub use docbridge_api::{
    ConvertRequest, ExtractTarget, FileValue, LegacyOutput, Options, PayloadError, QueryRequest,
    QueryResponse, Resource, RunResult, Warning,
};
