//! Subcommand implementations

use anyhow::{bail, Context};
use clap::Args;
use docbridge_host::payload;
use docbridge_host::wasm::validate_store_path;
use docbridge_host::{
    ConversionModule, Converter, ConvertRequest, FileValue, Options, QueryRequest, Resource,
    RunResult,
};
use serde_json::Value;
use std::collections::BTreeMap;
use std::io::{Read, Write};
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use walkdir::WalkDir;

#[derive(Debug, Args)]
pub struct ConvertArgs {
    /// JSON request file (`{"options": .., "stdin": .., "files": ..}`)
    #[arg(long, conflicts_with_all = ["input_dir", "option"])]
    request: Option<PathBuf>,

    /// Directory whose files become the request's input files
    #[arg(long)]
    input_dir: Option<PathBuf>,

    /// Option as key=value; the value is parsed as JSON when possible
    #[arg(short = 'O', long = "option", value_parser = parse_option)]
    option: Vec<(String, Value)>,

    /// File to use as stdin text, `-` for this process's stdin
    #[arg(long)]
    stdin: Option<PathBuf>,

    /// Where to write output and media files
    #[arg(long)]
    out_dir: Option<PathBuf>,

    /// Print the full result as JSON instead of stdout text
    #[arg(long)]
    json: bool,
}

#[derive(Debug, Args)]
pub struct QueryArgs {
    /// Query name, e.g. `version` or `input-formats`
    query: String,

    /// Format argument for format-specific queries
    #[arg(long)]
    format: Option<String>,
}

#[derive(Debug, Args)]
pub struct LegacyArgs {
    /// Argument string, e.g. "-f markdown -t html -s"
    #[arg(long, allow_hyphen_values = true)]
    args: String,

    /// File to use as stdin text, `-` for this process's stdin
    #[arg(long)]
    stdin: Option<PathBuf>,

    /// Resource file passed under its file name
    #[arg(long)]
    resource: Vec<PathBuf>,

    /// Where to write media files
    #[arg(long)]
    out_dir: Option<PathBuf>,
}

pub async fn convert<M>(converter: &Converter<M>, args: ConvertArgs) -> anyhow::Result<ExitCode>
where
    M: ConversionModule + Send + 'static,
{
    let mut request = match &args.request {
        Some(path) => read_request(path)?,
        None => {
            let options = args.option.into_iter().fold(Options::new(), |options, (k, v)| {
                options.with(k, v)
            });
            let mut request = ConvertRequest::new(options);
            if let Some(dir) = &args.input_dir {
                request.files = collect_input_dir(dir)?;
            }
            request
        }
    };
    if let Some(path) = &args.stdin {
        request.stdin = Some(read_text(path)?);
    }

    tracing::info!(
        inputs = request.files.len(),
        options = request.options.as_map().len(),
        "Converting"
    );
    let result = converter.convert(request).await?;
    report_warnings(&result);

    if let Some(dir) = &args.out_dir {
        let written = write_files(dir, &result.files)?;
        tracing::info!(written, media = result.media_files.len(), out_dir = %dir.display(), "Wrote files");
    }

    let mut stdout = std::io::stdout().lock();
    if args.json {
        serde_json::to_writer_pretty(&mut stdout, &result)?;
        writeln!(stdout)?;
    } else {
        stdout.write_all(result.stdout.as_bytes())?;
    }
    if !result.stderr.is_empty() {
        eprint!("{}", result.stderr);
    }
    Ok(ExitCode::SUCCESS)
}

pub async fn query<M>(converter: &Converter<M>, args: QueryArgs) -> anyhow::Result<ExitCode>
where
    M: ConversionModule + Send + 'static,
{
    let mut request = QueryRequest::new(args.query);
    if let Some(format) = args.format {
        request = request.format(format);
    }
    let response = converter.query(request).await?;
    println!("{}", serde_json::to_string_pretty(&response)?);
    Ok(ExitCode::SUCCESS)
}

pub async fn legacy<M>(converter: &Converter<M>, args: LegacyArgs) -> anyhow::Result<ExitCode>
where
    M: ConversionModule + Send + 'static,
{
    let stdin = match &args.stdin {
        Some(path) => read_text(path)?,
        None => String::new(),
    };
    let resources = args
        .resource
        .iter()
        .map(|path| {
            let name = path
                .file_name()
                .and_then(|n| n.to_str())
                .with_context(|| format!("Resource path has no UTF-8 file name: {}", path.display()))?;
            let data = std::fs::read(path)
                .with_context(|| format!("Failed to read resource {}", path.display()))?;
            Ok(Resource::new(name, payload::from_bytes(data)))
        })
        .collect::<anyhow::Result<Vec<_>>>()?;

    let output = converter.legacy(args.args, stdin, resources).await?;
    if let Some(dir) = &args.out_dir {
        write_files(dir, &output.media_files)?;
    }
    std::io::stdout().lock().write_all(output.out.as_bytes())?;
    Ok(ExitCode::SUCCESS)
}

/// Parse `key=value`; values that are valid JSON keep their JSON type
pub fn parse_option(raw: &str) -> Result<(String, Value), String> {
    let (key, value) = raw
        .split_once('=')
        .ok_or_else(|| format!("expected key=value, got `{}`", raw))?;
    if key.is_empty() {
        return Err(format!("empty option name in `{}`", raw));
    }
    let value = serde_json::from_str(value).unwrap_or_else(|_| Value::String(value.to_string()));
    Ok((key.to_string(), value))
}

fn read_request(path: &Path) -> anyhow::Result<ConvertRequest> {
    let text = read_text(path)?;
    let value: Value = serde_json::from_str(&text)
        .with_context(|| format!("Request {} is not valid JSON", path.display()))?;
    Ok(payload::request_from_value(value)?)
}

fn read_text(path: &Path) -> anyhow::Result<String> {
    if path == Path::new("-") {
        let mut text = String::new();
        std::io::stdin().read_to_string(&mut text)?;
        return Ok(text);
    }
    std::fs::read_to_string(path).with_context(|| format!("Failed to read {}", path.display()))
}

/// Load every regular file below `dir`, keyed by its `/`-joined relative path
pub fn collect_input_dir(dir: &Path) -> anyhow::Result<BTreeMap<String, FileValue>> {
    let mut files = BTreeMap::new();
    for entry in WalkDir::new(dir).min_depth(1).sort_by_file_name() {
        let entry = entry?;
        if !entry.file_type().is_file() {
            continue;
        }
        let relative = entry.path().strip_prefix(dir)?;
        let Some(key) = relative
            .iter()
            .map(|part| part.to_str())
            .collect::<Option<Vec<_>>>()
        else {
            tracing::warn!(path = %relative.display(), "Skipping input with a non-UTF-8 name");
            continue;
        };
        let data = std::fs::read(entry.path())
            .with_context(|| format!("Failed to read {}", entry.path().display()))?;
        files.insert(key.join("/"), payload::from_bytes(data));
    }
    Ok(files)
}

/// Write result files below `dir`, refusing paths that would escape it
pub fn write_files(dir: &Path, files: &BTreeMap<String, FileValue>) -> anyhow::Result<usize> {
    for (path, value) in files {
        let relative = match validate_store_path(path) {
            Ok(relative) => relative,
            Err(e) => bail!("Refusing to write result file: {}", e),
        };
        let target = dir.join(relative);
        if let Some(parent) = target.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(&target, value.as_bytes())
            .with_context(|| format!("Failed to write {}", target.display()))?;
    }
    Ok(files.len())
}

fn report_warnings(result: &RunResult) {
    for warning in &result.warnings {
        tracing::warn!(
            kind = %warning.kind,
            message = warning.message().unwrap_or_default(),
            "Module warning"
        );
    }
    if let Some(error) = &result.warnings_error {
        tracing::warn!(error = %error, "Module warnings could not be parsed");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_option() {
        assert_eq!(
            parse_option("to=html").unwrap(),
            ("to".to_string(), Value::String("html".into()))
        );
        assert_eq!(
            parse_option("standalone=true").unwrap(),
            ("standalone".to_string(), Value::Bool(true))
        );
        assert_eq!(
            parse_option("metadata={\"title\":\"T\"}").unwrap().1["title"],
            "T"
        );
        assert!(parse_option("no-equals").is_err());
        assert!(parse_option("=x").is_err());
    }

    #[test]
    fn test_collect_input_dir() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir_all(dir.path().join("images")).unwrap();
        std::fs::write(dir.path().join("doc.md"), "# T").unwrap();
        std::fs::write(dir.path().join("images").join("a.png"), [0x89, 0xff]).unwrap();

        let files = collect_input_dir(dir.path()).unwrap();
        assert_eq!(files.len(), 2);
        assert_eq!(files["doc.md"], FileValue::text("# T"));
        assert_eq!(files["images/a.png"], FileValue::binary(vec![0x89, 0xff]));
    }

    #[test]
    fn test_write_files() {
        let dir = tempfile::tempdir().unwrap();
        let mut files = BTreeMap::new();
        files.insert("out/index.html".to_string(), FileValue::text("<p/>"));
        assert_eq!(write_files(dir.path(), &files).unwrap(), 1);
        assert_eq!(
            std::fs::read_to_string(dir.path().join("out").join("index.html")).unwrap(),
            "<p/>"
        );

        files.insert("../escape".to_string(), FileValue::text("x"));
        assert!(write_files(dir.path(), &files).is_err());
    }
}
