//! The conversion module seam
//!
//! The bridge treats the conversion module as an opaque, synchronous,
//! side-effecting call: it receives the encoded request and the store, and
//! its only observable effects are writes into the store.

use crate::error::ModuleFault;
use crate::store::FileStore;
use std::fmt;

/// Which module export a run targets
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EntryPoint {
    /// Run a conversion over the seeded files
    Convert,
    /// Answer an informational query on stdout
    Query,
}

impl EntryPoint {
    /// Export name in the module
    pub fn export_name(self) -> &'static str {
        match self {
            Self::Convert => "convert",
            Self::Query => "query",
        }
    }
}

impl fmt::Display for EntryPoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.export_name())
    }
}

/// A document-conversion module driven by the bridge
///
/// Implementations must run to completion (or fault) before returning.
///
/// # Example
///
/// ```rust
/// use docbridge_host::{ConversionModule, EntryPoint, FileStore, ModuleFault};
///
/// struct Echo;
///
/// impl ConversionModule for Echo {
///     fn invoke(
///         &mut self,
///         _entry: EntryPoint,
///         _request: &[u8],
///         store: &mut FileStore,
///     ) -> Result<(), ModuleFault> {
///         let input = store.get("stdin").map(|e| e.data.clone()).unwrap_or_default();
///         store.write("stdout", input);
///         Ok(())
///     }
/// }
/// ```
pub trait ConversionModule {
    fn invoke(
        &mut self,
        entry: EntryPoint,
        request: &[u8],
        store: &mut FileStore,
    ) -> Result<(), ModuleFault>;
}

/// Closures work as modules, which keeps scripted fakes short
impl<F> ConversionModule for F
where
    F: FnMut(EntryPoint, &[u8], &mut FileStore) -> Result<(), ModuleFault>,
{
    fn invoke(
        &mut self,
        entry: EntryPoint,
        request: &[u8],
        store: &mut FileStore,
    ) -> Result<(), ModuleFault> {
        self(entry, request, store)
    }
}
