//! Staging the store on the host filesystem
//!
//! wasmtime-wasi grants filesystem access through preopened host
//! directories, so the in-memory store is mirrored into a private temporary
//! directory that the guest sees as `/`.
//!
//! # Sync Flow
//!
//! ```text
//! FileStore ──stage()──► staging dir ──(module runs)──► staging dir ──collect()──► FileStore
//!             │                                                        │
//!             ├─ clear previous run                                    ├─ walk regular files
//!             ├─ validate every path                                   ├─ rebuild entries
//!             └─ skip empty writable placeholders                      └─ keep read-only flags
//! ```
//!
//! Placeholders (empty, writable entries) are not materialized: the module
//! creates them as files, or as directories in the case of a
//! directory-form extraction target.
//!
//! # Path Safety
//!
//! Store paths are opaque strings, but once they touch the host filesystem
//! they must stay inside the staging directory and map back to the same
//! string. Paths that are absolute, contain `.` or `..` components, or are
//! not in normal form (`a//b`, trailing `/`) are rejected.

use super::error::WasmError;
use crate::store::FileStore;
use std::collections::HashMap;
use std::fs;
use std::path::{Component, Path, PathBuf};
use tempfile::TempDir;
use walkdir::WalkDir;

/// Validate a store path and convert it to a path relative to the staging root
pub fn validate_store_path(path: &str) -> Result<PathBuf, WasmError> {
    if path.is_empty() {
        return Err(WasmError::unsafe_path(path, "path is empty"));
    }

    let mut relative = PathBuf::new();
    let mut normal = Vec::new();
    for component in Path::new(path).components() {
        match component {
            Component::Normal(part) => {
                let part = part
                    .to_str()
                    .ok_or_else(|| WasmError::unsafe_path(path, "path is not valid UTF-8"))?;
                normal.push(part);
                relative.push(part);
            }
            Component::ParentDir => {
                return Err(WasmError::unsafe_path(path, "path escapes the staging directory"))
            }
            Component::RootDir | Component::Prefix(_) => {
                return Err(WasmError::unsafe_path(path, "absolute paths cannot be staged"))
            }
            Component::CurDir => {
                return Err(WasmError::unsafe_path(path, "path contains a `.` component"))
            }
        }
    }

    if normal.join("/") != path {
        return Err(WasmError::unsafe_path(path, "path is not in normal form"));
    }
    Ok(relative)
}

/// Convert a staged relative path back into a store path
fn store_path_of(relative: &Path) -> Option<String> {
    let parts = relative
        .components()
        .map(|component| match component {
            Component::Normal(part) => part.to_str(),
            _ => None,
        })
        .collect::<Option<Vec<_>>>()?;
    Some(parts.join("/"))
}

/// Private host directory mirroring the store for one module instance
#[derive(Debug)]
pub struct StagingDir {
    dir: TempDir,
}

impl StagingDir {
    pub fn new() -> Result<Self, WasmError> {
        let dir = tempfile::Builder::new()
            .prefix("docbridge-")
            .tempdir()
            .map_err(|e| WasmError::staging(std::env::temp_dir(), e))?;
        Ok(Self { dir })
    }

    /// Host path of the staging root
    pub fn path(&self) -> &Path {
        self.dir.path()
    }

    /// Remove everything below the staging root
    pub fn clear(&self) -> Result<(), WasmError> {
        let root = self.path();
        let entries = fs::read_dir(root).map_err(|e| WasmError::staging(root, e))?;
        for entry in entries {
            let entry = entry.map_err(|e| WasmError::staging(root, e))?;
            let path = entry.path();
            let file_type = entry
                .file_type()
                .map_err(|e| WasmError::staging(&path, e))?;
            let removed = if file_type.is_dir() {
                fs::remove_dir_all(&path)
            } else {
                fs::remove_file(&path)
            };
            removed.map_err(|e| WasmError::staging(&path, e))?;
        }
        Ok(())
    }

    /// Mirror the store into the staging directory
    ///
    /// Every path is validated before anything is written.
    pub fn stage(&self, store: &FileStore) -> Result<(), WasmError> {
        let mut staged = Vec::new();
        for (path, entry) in store.entries() {
            if entry.is_empty() && !entry.readonly {
                continue;
            }
            staged.push((validate_store_path(path)?, &entry.data));
        }

        self.clear()?;
        for (relative, data) in &staged {
            let host_path = self.path().join(relative);
            if let Some(parent) = host_path.parent() {
                fs::create_dir_all(parent).map_err(|e| WasmError::staging(parent, e))?;
            }
            fs::write(&host_path, data).map_err(|e| WasmError::staging(&host_path, e))?;
        }

        tracing::trace!(files = staged.len(), root = %self.path().display(), "Staged store");
        Ok(())
    }

    /// Rebuild the store from the staging directory
    ///
    /// Read-only flags of paths that existed before the run are kept; new
    /// paths are writable. Symlinks and files whose names are not UTF-8 are
    /// skipped.
    pub fn collect(&self, store: &mut FileStore) -> Result<(), WasmError> {
        let readonly: HashMap<String, bool> = store
            .entries()
            .map(|(path, entry)| (path.to_string(), entry.readonly))
            .collect();
        store.reset();

        let root = self.path();
        for entry in WalkDir::new(root).min_depth(1).sort_by_file_name() {
            let entry = entry.map_err(|e| {
                let path = e.path().unwrap_or(root).to_path_buf();
                WasmError::staging(path, e.into())
            })?;
            if !entry.file_type().is_file() {
                continue;
            }

            let host_path = entry.path();
            let Ok(relative) = host_path.strip_prefix(root) else {
                continue;
            };
            let Some(store_path) = store_path_of(relative) else {
                tracing::warn!(
                    path = %relative.display(),
                    "Skipping staged file with a non-UTF-8 name"
                );
                continue;
            };

            let data = fs::read(host_path).map_err(|e| WasmError::staging(host_path, e))?;
            let flag = readonly.get(&store_path).copied().unwrap_or(false);
            store.set(store_path, data, flag);
        }

        tracing::trace!(files = store.len(), "Collected staged files");
        Ok(())
    }
}
