//! Legacy argument-string interface
//!
//! Older callers pass a flat command line (`"-f markdown -t html -s"`) plus a
//! list of named resources. This module translates that into a
//! [`ConvertRequest`] and runs it through the regular session, so the legacy
//! path shares seeding and classification with everything else.
//!
//! # Option mapping
//!
//! | Argument | Option key |
//! |----------|------------|
//! | `-f`, `-r`, `--from`, `--read` | `from` |
//! | `-t`, `-w`, `--to`, `--write` | `to` |
//! | `-o`, `--output` | `output-file` |
//! | `-M k=v`, `--metadata k=v` | `metadata.k` |
//! | `-V k=v`, `--variable k=v` | `variables.k` |
//! | `--bibliography`, `--lua-filter`, `--css`, ... | list of strings |
//! | `-s`, `-C`, `--toc`, ... | `true` |
//! | positionals | `input-files` |

use crate::error::BridgeError;
use crate::module::ConversionModule;
use crate::session::Session;
use docbridge_api::{ConvertRequest, FileValue, LegacyOutput, Options, Resource, OUTPUT_FILE_KEY};
use serde_json::{Map, Value};

/// Long options that never take a value
const BOOLEAN_FLAGS: &[&str] = &[
    "standalone",
    "citeproc",
    "toc",
    "number-sections",
    "embed-resources",
    "self-contained",
    "sandbox",
    "verbose",
    "quiet",
    "strip-comments",
    "ascii",
    "no-highlight",
    "preserve-tabs",
    "file-scope",
    "fail-if-warnings",
    "section-divs",
    "reference-links",
    "incremental",
    "list-tables",
    "html-q-tags",
];

/// Long options that may repeat and collect into a list
const LIST_OPTIONS: &[&str] = &[
    "bibliography",
    "lua-filter",
    "filter",
    "css",
    "resource-path",
    "include-in-header",
    "include-before-body",
    "include-after-body",
];

/// Options that collect `key=value` pairs into a mapping
const MAPPING_OPTIONS: &[&str] = &["metadata", "variables"];

const SHORT_OPTIONS: &[(char, &str)] = &[
    ('f', "from"),
    ('r', "from"),
    ('t', "to"),
    ('w', "to"),
    ('o', OUTPUT_FILE_KEY),
    ('s', "standalone"),
    ('C', "citeproc"),
    ('N', "number-sections"),
    ('M', "metadata"),
    ('V', "variables"),
    ('L', "lua-filter"),
    ('F', "filter"),
    ('c', "css"),
    ('H', "include-in-header"),
    ('B', "include-before-body"),
    ('A', "include-after-body"),
];

const LONG_ALIASES: &[(&str, &str)] = &[
    ("read", "from"),
    ("write", "to"),
    ("output", OUTPUT_FILE_KEY),
    ("variable", "variables"),
    ("table-of-contents", "toc"),
];

const INPUT_FILES_KEY: &str = "input-files";

/// Split a flat argument string into words using POSIX shell rules
///
/// Unterminated quotes and a dangling backslash are rejected. A word starting
/// with `#` begins a comment that runs to the end of the line.
pub fn tokenize(args: &str) -> Result<Vec<String>, BridgeError> {
    shlex::split(args).ok_or_else(|| {
        BridgeError::InvalidArguments(format!("unbalanced quoting in arguments: {}", args))
    })
}

/// Translate a flat argument string into conversion options
pub fn parse_args(args: &str) -> Result<Options, BridgeError> {
    let words = tokenize(args)?;
    let mut options = Options::new();
    let mut iter = words.into_iter().peekable();
    let mut only_positionals = false;

    while let Some(word) = iter.next() {
        if only_positionals || word == "-" || !word.starts_with('-') {
            push_list(&mut options, INPUT_FILES_KEY, word);
            continue;
        }

        if word == "--" {
            only_positionals = true;
            continue;
        }

        if let Some(long) = word.strip_prefix("--") {
            let (name, inline) = match long.split_once('=') {
                Some((name, value)) => (name, Some(value.to_string())),
                None => (long, None),
            };
            let key = canonical_long(name);

            if BOOLEAN_FLAGS.contains(&key) {
                if inline.is_some() {
                    return Err(BridgeError::InvalidArguments(format!(
                        "--{} does not take a value",
                        name
                    )));
                }
                options.insert(key, true);
                continue;
            }

            let value = match inline {
                Some(value) => Some(value),
                None if is_known_valued(key) => Some(iter.next().ok_or_else(|| {
                    BridgeError::InvalidArguments(format!("missing value for --{}", name))
                })?),
                None => iter.next_if(|next| !next.starts_with('-')),
            };
            match value {
                Some(value) => apply_value(&mut options, key, value)?,
                None => {
                    options.insert(key, true);
                }
            }
            continue;
        }

        // Short option cluster, e.g. `-sC` or `-fmarkdown`
        let mut rest = &word[1..];
        while let Some(flag) = rest.chars().next() {
            rest = &rest[flag.len_utf8()..];
            let key = SHORT_OPTIONS
                .iter()
                .find(|(short, _)| *short == flag)
                .map(|(_, key)| *key)
                .ok_or_else(|| {
                    BridgeError::InvalidArguments(format!("unknown option -{}", flag))
                })?;

            if BOOLEAN_FLAGS.contains(&key) {
                options.insert(key, true);
                continue;
            }

            let value = if rest.is_empty() {
                iter.next().ok_or_else(|| {
                    BridgeError::InvalidArguments(format!("missing value for -{}", flag))
                })?
            } else {
                std::mem::take(&mut rest).to_string()
            };
            apply_value(&mut options, key, value)?;
        }
    }

    Ok(options)
}

fn canonical_long(name: &str) -> &str {
    LONG_ALIASES
        .iter()
        .find(|(alias, _)| *alias == name)
        .map(|(_, key)| *key)
        .unwrap_or(name)
}

fn is_known_valued(key: &str) -> bool {
    LIST_OPTIONS.contains(&key)
        || MAPPING_OPTIONS.contains(&key)
        || SHORT_OPTIONS.iter().any(|(_, k)| *k == key)
        || key == docbridge_api::EXTRACT_MEDIA_KEY
}

fn apply_value(options: &mut Options, key: &str, value: String) -> Result<(), BridgeError> {
    if LIST_OPTIONS.contains(&key) {
        push_list(options, key, value);
    } else if MAPPING_OPTIONS.contains(&key) {
        let (name, entry) = match value.split_once(|c: char| c == '=' || c == ':') {
            Some((name, entry)) => (name.to_string(), Value::String(entry.to_string())),
            None => (value.clone(), Value::Bool(true)),
        };
        if name.is_empty() {
            return Err(BridgeError::InvalidArguments(format!(
                "empty name in --{} value",
                key
            )));
        }
        match options.get_mut(key) {
            Some(Value::Object(map)) => {
                map.insert(name, entry);
            }
            _ => {
                let mut map = Map::new();
                map.insert(name, entry);
                options.insert(key, map);
            }
        }
    } else {
        options.insert(key, value);
    }
    Ok(())
}

fn push_list(options: &mut Options, key: &str, value: String) {
    match options.get_mut(key) {
        Some(Value::Array(items)) => items.push(Value::String(value)),
        _ => {
            options.insert(key, vec![Value::String(value)]);
        }
    }
}

impl<M: ConversionModule> Session<M> {
    /// Run a conversion through the legacy argument-string interface
    ///
    /// `out` is the declared output file when `-o` was given and the module
    /// wrote it, stdout text otherwise.
    pub fn legacy(
        &mut self,
        args: &str,
        stdin: &str,
        resources: &[Resource],
    ) -> Result<LegacyOutput, BridgeError> {
        let options = parse_args(args)?;
        let output = options.output_file().map(str::to_string);

        let mut request = ConvertRequest::new(options);
        if !stdin.is_empty() {
            request.stdin = Some(stdin.to_string());
        }
        for resource in resources {
            request
                .files
                .insert(resource.filename.clone(), resource.contents.clone());
        }

        let mut result = self.convert(&request)?;
        if !result.stderr.is_empty() {
            tracing::debug!(stderr = %result.stderr.trim_end(), "Legacy conversion wrote diagnostics");
        }

        let out = match output.and_then(|path| result.files.remove(&path)) {
            Some(value) => value,
            None => FileValue::Text(result.stdout),
        };

        Ok(LegacyOutput {
            out,
            media_files: result.media_files,
        })
    }
}
