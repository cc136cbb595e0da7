//! gaplint Language Server - Entry Point
//!
//! Sets up logging, parses arguments, and serves LSP over stdio.

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{Parser, ValueEnum};
use gaplint_ls::ToolSpec;
use gaplint_ls::lsp::{ServerOptions, run_stdio};
use tracing::{Level, info};
use tracing_subscriber::{EnvFilter, fmt, prelude::*};

/// Output format of the server's own log.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum LogFormat {
    Text,
    Json,
}

/// Language server publishing gaplint diagnostics.
#[derive(Parser, Debug)]
#[command(name = "gaplint-ls")]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Interpreter command line used to run the linter module.
    #[arg(long, num_args = 1.., default_value = "python3")]
    interpreter: Vec<String>,

    /// Helper script started for workspaces that select another interpreter.
    #[arg(long)]
    runner: Option<PathBuf>,

    /// Library directory whose files are never linted (repeatable).
    #[arg(long = "stdlib-path")]
    stdlib_paths: Vec<PathBuf>,

    /// Linter module name.
    #[arg(long, default_value = "gaplint")]
    tool_module: String,

    /// Log level: trace, debug, info, warn, error.
    #[arg(long, default_value = "info")]
    log_level: String,

    /// Log format written to stderr.
    #[arg(long, value_enum, default_value_t = LogFormat::Text)]
    log_format: LogFormat,
}

impl Args {
    /// Parses the log level string into a tracing Level.
    fn parse_log_level(&self) -> Result<Level> {
        match self.log_level.to_lowercase().as_str() {
            "trace" => Ok(Level::TRACE),
            "debug" => Ok(Level::DEBUG),
            "info" => Ok(Level::INFO),
            "warn" => Ok(Level::WARN),
            "error" => Ok(Level::ERROR),
            other => anyhow::bail!("invalid log level: {}", other),
        }
    }

    fn tool(&self) -> ToolSpec {
        ToolSpec {
            module: self.tool_module.clone(),
            display: self.tool_module.clone(),
            ..ToolSpec::default()
        }
    }
}

/// Initializes the tracing subscriber for logging.
fn init_tracing(level: Level, format: LogFormat) -> Result<()> {
    // Create an env filter that respects RUST_LOG but has a default level
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        EnvFilter::new(format!("gaplint_ls={level},async_lsp={level}"))
    });

    // Logs go to stderr; stdout carries the protocol.
    let registry = tracing_subscriber::registry().with(filter);
    match format {
        LogFormat::Text => registry
            .with(
                fmt::layer()
                    .with_writer(std::io::stderr)
                    .with_ansi(false)
                    .with_target(true)
                    .with_thread_ids(false)
                    .with_file(true)
                    .with_line_number(true),
            )
            .try_init(),
        LogFormat::Json => registry
            .with(fmt::layer().json().with_writer(std::io::stderr))
            .try_init(),
    }
    .context("failed to initialize tracing subscriber")?;

    Ok(())
}

/// Main entry point.
#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let log_level = args.parse_log_level()?;
    init_tracing(log_level, args.log_format)?;

    let runner = args
        .runner
        .as_ref()
        .map(|runner| {
            runner
                .canonicalize()
                .with_context(|| format!("failed to resolve runner script: {}", runner.display()))
        })
        .transpose()?;

    info!(
        interpreter = %args.interpreter.join(" "),
        tool = %args.tool_module,
        "starting gaplint-ls"
    );

    let options = ServerOptions {
        tool: args.tool(),
        host_interpreter: args.interpreter,
        runner,
        stdlib_paths: args.stdlib_paths,
        module_host: None,
    };
    run_stdio(options).await.context("language server failed")?;

    info!("gaplint-ls shut down");
    Ok(())
}
