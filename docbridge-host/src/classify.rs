//! Known-set classification of post-run store entries
//!
//! Before the module runs, the session records every path it seeded itself
//! with. After the run, each store entry is classified against that set:
//!
//! ```text
//! ┌──────────────────────────┬──────────────┬───────────┬──────────────┐
//! │ entry path               │ role         │ in files  │ in media     │
//! ├──────────────────────────┼──────────────┼───────────┼──────────────┤
//! │ stdin/stdout/stderr/...  │ (stream)     │ no        │ no           │
//! │ == output-file           │ Output       │ yes       │ no           │
//! │ == extract-media         │ Extraction   │ yes       │ no           │
//! │ other known path         │ Passthrough  │ yes       │ no           │
//! │ unknown path             │ Media        │ yes       │ yes          │
//! └──────────────────────────┴──────────────┴───────────┴──────────────┘
//! ```
//!
//! The output and extraction paths are compared by exact string equality
//! with the option values read at seeding time. A directory-form extraction
//! target is never added to the known set, so every file written beneath it
//! is classified as media without walking directories.

use crate::payload;
use crate::store::FileStore;
use docbridge_api::{ExtractTarget, FileValue, Options, SYSTEM_PATHS};
use std::collections::{BTreeMap, HashSet};

/// How a post-run entry is returned to the caller
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FileRole {
    /// A caller-supplied input, returned as-is
    Passthrough,
    /// The declared output deliverable
    Output,
    /// The extraction target written as a single file
    Extraction,
    /// A file the module produced on its own
    Media,
}

impl FileRole {
    pub fn is_media(self) -> bool {
        matches!(self, Self::Media)
    }
}

/// Paths seeded by the bridge before invocation
#[derive(Debug, Clone, Default)]
pub struct KnownPathSet {
    known: HashSet<String>,
    inputs: HashSet<String>,
    output: Option<String>,
    extract: Option<ExtractTarget>,
}

impl KnownPathSet {
    /// Record the known set for a run seeded with `inputs` and `options`
    pub fn seeded<'a>(inputs: impl IntoIterator<Item = &'a str>, options: &Options) -> Self {
        let inputs: HashSet<String> = inputs.into_iter().map(str::to_string).collect();
        let output = options.output_file().map(str::to_string);
        let extract = options.extract_media();

        let mut known: HashSet<String> = SYSTEM_PATHS.iter().map(|p| p.to_string()).collect();
        known.extend(inputs.iter().cloned());
        known.extend(output.iter().cloned());
        if let Some(ExtractTarget::Archive(path)) = &extract {
            known.insert(path.clone());
        }

        Self {
            known,
            inputs,
            output,
            extract,
        }
    }

    pub fn contains(&self, path: &str) -> bool {
        self.known.contains(path)
    }

    pub fn is_input(&self, path: &str) -> bool {
        self.inputs.contains(path)
    }

    pub fn is_system(path: &str) -> bool {
        SYSTEM_PATHS.contains(&path)
    }

    pub fn output_path(&self) -> Option<&str> {
        self.output.as_deref()
    }

    pub fn extract_target(&self) -> Option<&ExtractTarget> {
        self.extract.as_ref()
    }

    pub fn len(&self) -> usize {
        self.known.len()
    }

    pub fn is_empty(&self) -> bool {
        self.known.is_empty()
    }

    /// Decide the role of a non-system path
    ///
    /// Returns `None` for system stream paths, which are surfaced as
    /// stdout/stderr/warnings rather than as files.
    pub fn role_of(&self, path: &str) -> Option<FileRole> {
        if Self::is_system(path) {
            return None;
        }
        if self.output.as_deref() == Some(path) {
            return Some(FileRole::Output);
        }
        if self.extract.as_ref().map(ExtractTarget::path) == Some(path) {
            return Some(FileRole::Extraction);
        }
        if self.contains(path) {
            Some(FileRole::Passthrough)
        } else {
            Some(FileRole::Media)
        }
    }
}

/// Result buckets of one classification pass
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Classification {
    pub files: BTreeMap<String, FileValue>,
    pub media_files: BTreeMap<String, FileValue>,
    pub roles: BTreeMap<String, FileRole>,
}

impl Classification {
    /// The output deliverable, when the module wrote one
    pub fn output(&self) -> Option<(&str, &FileValue)> {
        self.find_role(FileRole::Output)
    }

    /// The extraction archive, when the module wrote one
    pub fn extraction(&self) -> Option<(&str, &FileValue)> {
        self.find_role(FileRole::Extraction)
    }

    fn find_role(&self, role: FileRole) -> Option<(&str, &FileValue)> {
        self.roles
            .iter()
            .find(|(_, r)| **r == role)
            .and_then(|(path, _)| self.files.get_key_value(path))
            .map(|(path, value)| (path.as_str(), value))
    }
}

/// Partition the store against the known set
///
/// Entries with empty content are skipped, except caller inputs when
/// `keep_empty_inputs` is set, so an empty input still round-trips.
pub fn classify(store: &FileStore, known: &KnownPathSet, keep_empty_inputs: bool) -> Classification {
    let mut result = Classification::default();

    for (path, entry) in store.entries() {
        let Some(role) = known.role_of(path) else {
            continue;
        };

        if entry.is_empty() {
            let keep = keep_empty_inputs && role == FileRole::Passthrough && known.is_input(path);
            if !keep {
                continue;
            }
        }

        let value = payload::from_bytes(entry.data.clone());
        if role.is_media() {
            result.media_files.insert(path.to_string(), value.clone());
        }
        result.files.insert(path.to_string(), value);
        result.roles.insert(path.to_string(), role);
    }

    tracing::debug!(
        files = result.files.len(),
        media = result.media_files.len(),
        output = result.output().is_some(),
        extraction = result.extraction().is_some(),
        "Classified store entries"
    );

    result
}

#[cfg(test)]
mod tests {
    use super::*;
    use docbridge_api::{EXTRACT_MEDIA_KEY, OUTPUT_FILE_KEY, STDOUT_PATH};

    fn options_with(output: Option<&str>, extract: Option<&str>) -> Options {
        let mut options = Options::new().with("to", "html");
        if let Some(path) = output {
            options.insert(OUTPUT_FILE_KEY, path);
        }
        if let Some(path) = extract {
            options.insert(EXTRACT_MEDIA_KEY, path);
        }
        options
    }

    #[test]
    fn test_known_set_contents() {
        let known = KnownPathSet::seeded(["a.png"], &options_with(Some("out.html"), Some("media")));

        assert!(known.contains("stdin"));
        assert!(known.contains("warnings"));
        assert!(known.contains("a.png"));
        assert!(known.contains("out.html"));
        // Directory-form extraction targets are not known
        assert!(!known.contains("media"));

        let known = KnownPathSet::seeded([], &options_with(None, Some("media.zip")));
        assert!(known.contains("media.zip"));
    }

    #[test]
    fn test_roles() {
        let known = KnownPathSet::seeded(["in.md"], &options_with(Some("out.html"), Some("media")));

        assert_eq!(known.role_of(STDOUT_PATH), None);
        assert_eq!(known.role_of("in.md"), Some(FileRole::Passthrough));
        assert_eq!(known.role_of("out.html"), Some(FileRole::Output));
        assert_eq!(known.role_of("media"), Some(FileRole::Extraction));
        assert_eq!(known.role_of("media/img1.png"), Some(FileRole::Media));
    }

    #[test]
    fn test_output_equal_to_input_is_output() {
        let known = KnownPathSet::seeded(["doc.md"], &options_with(Some("doc.md"), None));
        assert_eq!(known.role_of("doc.md"), Some(FileRole::Output));
    }

    #[test]
    fn test_classify_partitions_store() {
        let known = KnownPathSet::seeded(
            ["a.png"],
            &options_with(Some("out.html"), Some("media.zip")),
        );

        let mut store = FileStore::new();
        store.set("stdout", b"ignored".to_vec(), false);
        store.set("a.png", vec![0x89, b'P'], true);
        store.set("out.html", b"<p>x</p>".to_vec(), false);
        store.set("media.zip", vec![b'P', b'K', 3, 4, 0xff], false);
        store.set("fig-1.svg", b"<svg/>".to_vec(), false);
        store.set("empty-new.txt", Vec::new(), false);

        let result = classify(&store, &known, true);

        assert_eq!(
            result.files.keys().collect::<Vec<_>>(),
            ["a.png", "fig-1.svg", "media.zip", "out.html"]
        );
        assert_eq!(result.media_files.keys().collect::<Vec<_>>(), ["fig-1.svg"]);
        assert_eq!(result.output().map(|(p, _)| p), Some("out.html"));
        assert_eq!(result.extraction().map(|(p, _)| p), Some("media.zip"));
        assert!(result.files["media.zip"].is_binary());
    }

    #[test]
    fn test_empty_inputs_are_kept_only_when_configured() {
        let known = KnownPathSet::seeded(["empty.txt"], &Options::new());
        let mut store = FileStore::new();
        store.set("empty.txt", Vec::new(), true);

        assert!(classify(&store, &known, true).files.contains_key("empty.txt"));
        assert!(classify(&store, &known, false).files.is_empty());
    }

    #[test]
    fn test_unwritten_placeholders_are_absent() {
        let known = KnownPathSet::seeded([], &options_with(Some("out.docx"), Some("media.zip")));
        let mut store = FileStore::new();
        store.set("out.docx", Vec::new(), false);
        store.set("media.zip", Vec::new(), false);

        let result = classify(&store, &known, true);
        assert!(result.files.is_empty());
        assert!(result.output().is_none());
        assert!(result.extraction().is_none());
    }
}
