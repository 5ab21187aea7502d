//! Named-file store shared between the bridge and the conversion module
//!
//! A flat mapping from path name to bytes. Paths are opaque strings: no
//! normalization, case folding or separator handling is applied, so
//! `"Über.html"` and `"über.html"` are different entries.
//!
//! The read-only flag is metadata for the module's own introspection. The
//! store never enforces it.

use std::collections::HashMap;

/// A single file in the store
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StoreEntry {
    pub data: Vec<u8>,
    pub readonly: bool,
}

impl StoreEntry {
    pub fn new(data: impl Into<Vec<u8>>, readonly: bool) -> Self {
        Self {
            data: data.into(),
            readonly,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }
}

/// In-memory filesystem seen by the conversion module
#[derive(Debug, Default)]
pub struct FileStore {
    entries: HashMap<String, StoreEntry>,
}

impl FileStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Discard every entry
    pub fn reset(&mut self) {
        self.entries.clear();
    }

    /// Insert or overwrite an entry. Overwriting a read-only entry is allowed.
    pub fn set(&mut self, path: impl Into<String>, data: impl Into<Vec<u8>>, readonly: bool) {
        self.entries
            .insert(path.into(), StoreEntry::new(data, readonly));
    }

    /// Replace an entry's content, keeping its read-only flag.
    /// New paths are created writable.
    pub fn write(&mut self, path: impl Into<String>, data: impl Into<Vec<u8>>) {
        let entry = self.entries.entry(path.into()).or_default();
        entry.data = data.into();
    }

    pub fn get(&self, path: &str) -> Option<&StoreEntry> {
        self.entries.get(path)
    }

    pub fn contains(&self, path: &str) -> bool {
        self.entries.contains_key(path)
    }

    /// Iterate all entries in unspecified order
    pub fn entries(&self) -> impl Iterator<Item = (&str, &StoreEntry)> {
        self.entries.iter().map(|(path, entry)| (path.as_str(), entry))
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
