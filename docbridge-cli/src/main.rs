//! `docbridge`: run a wasm document-conversion module against host files

mod commands;
mod logging;

use clap::{Args, Parser, Subcommand};
use commands::{ConvertArgs, LegacyArgs, QueryArgs};
use docbridge_host::{
    Converter, RequestEncoding, Session, SessionConfig, WasmConversionModule, WasmModuleConfig,
};
use logging::{TracingConfig, TracingFormat};
use std::path::PathBuf;
use std::process::ExitCode;

#[derive(Debug, Parser)]
#[command(name = "docbridge", version, about = "Run a sandboxed document-conversion module")]
struct Cli {
    #[command(flatten)]
    module: ModuleArgs,

    /// Log output format
    #[arg(long, value_enum, default_value_t = TracingFormat::Compact, global = true)]
    log_format: TracingFormat,

    /// Log level (overrides RUST_LOG)
    #[arg(long, global = true)]
    log_level: Option<tracing::Level>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Args)]
struct ModuleArgs {
    /// Path to the conversion module (.wasm)
    #[arg(long, env = "DOCBRIDGE_MODULE", global = true, default_value = "pandoc.wasm")]
    module: PathBuf,

    /// Fuel per call; unlimited when omitted
    #[arg(long, global = true)]
    fuel: Option<u64>,

    /// Let the module write to this process's stdout/stderr
    #[arg(long, global = true)]
    inherit_stdio: bool,

    /// Encode requests as MessagePack instead of JSON
    #[arg(long, global = true)]
    msgpack: bool,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Convert a request or a directory of inputs
    Convert(ConvertArgs),
    /// Ask the module for information (version, formats, ...)
    Query(QueryArgs),
    /// Convert using a flat argument string
    Legacy(LegacyArgs),
}

impl ModuleArgs {
    fn load(&self) -> anyhow::Result<Converter<WasmConversionModule>> {
        let config = WasmModuleConfig {
            fuel_limit: self.fuel,
            inherit_stdio: self.inherit_stdio,
            ..Default::default()
        };
        let module = WasmConversionModule::from_file(&self.module, config)?;
        let encoding = if self.msgpack {
            RequestEncoding::MessagePack
        } else {
            RequestEncoding::Json
        };
        let session = Session::with_config(
            module,
            SessionConfig {
                encoding,
                ..Default::default()
            },
        );
        Ok(Converter::new(session))
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    logging::init_subscriber(&TracingConfig {
        level: cli.log_level,
        format: cli.log_format,
        ..Default::default()
    });

    match run(cli).await {
        Ok(code) => code,
        Err(e) => {
            tracing::error!(error = %e, "docbridge failed");
            eprintln!("error: {:#}", e);
            ExitCode::FAILURE
        }
    }
}

async fn run(cli: Cli) -> anyhow::Result<ExitCode> {
    let converter = cli.module.load()?;
    tracing::debug!(module = %cli.module.module.display(), "Module loaded");

    match cli.command {
        Command::Convert(args) => commands::convert(&converter, args).await,
        Command::Query(args) => commands::query(&converter, args).await,
        Command::Legacy(args) => commands::legacy(&converter, args).await,
    }
}
