//! Toolgate - OpenAI-compatible gateway for MCP tools
//!
//! Main entry point for the Toolgate CLI.

use std::path::PathBuf;

use anyhow::Result;
use clap::{Parser, Subcommand, ValueEnum};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::EnvFilter;

mod commands;

use commands::{call, serve, tools};

/// Crates whose level follows `--log-level` / `--verbose`.
const LOG_TARGETS: [&str; 5] = [
    "toolgate",
    "toolgate_mcp",
    "toolgate_llm",
    "toolgate_agent",
    "toolgate_server",
];

// ─────────────────────────────────────────────────────────────────────────────
// CLI Structure
// ─────────────────────────────────────────────────────────────────────────────

/// Toolgate - OpenAI-compatible gateway exposing MCP tools to a CLI-driven model
#[derive(Parser)]
#[command(name = "toolgate")]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
pub struct Cli {
    /// Enable verbose (debug) logging
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Output as JSON (for scripting)
    #[arg(long, global = true)]
    pub json: bool,

    /// Log level for toolgate crates (ignored when RUST_LOG is set)
    #[arg(long, global = true, env = "LOG_LEVEL", default_value = "info")]
    pub log_level: String,

    /// Console log format
    #[arg(long, global = true, value_enum, default_value_t = LogFormat::Text)]
    pub log_format: LogFormat,

    /// Also write JSON logs to a daily rotating file in this directory
    #[arg(long, global = true)]
    pub log_dir: Option<PathBuf>,

    /// MCP configuration file (YAML, or TOML by extension)
    #[arg(long, global = true, env = "TOOLGATE_MCP_CONFIG")]
    pub mcp_config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Run the gateway
    Serve(serve::ServeArgs),

    /// Start the configured MCP servers and list their tools
    Tools(tools::ToolsArgs),

    /// Call one MCP tool directly
    Call(call::CallArgs),
}

/// Console log output format.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum LogFormat {
    /// Human-readable lines
    Text,
    /// One JSON object per line
    Json,
}

// ─────────────────────────────────────────────────────────────────────────────
// Main
// ─────────────────────────────────────────────────────────────────────────────

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let _guard = init_tracing(&cli);

    let ctx = commands::Context {
        json_output: cli.json,
        verbose: cli.verbose,
        mcp_config: cli.mcp_config,
    };

    match cli.command {
        Commands::Serve(args) => serve::run(args, &ctx).await,
        Commands::Tools(args) => tools::run(args, &ctx).await,
        Commands::Call(args) => call::run(args, &ctx).await,
    }
}

/// Console logging on stderr plus an optional rotating JSON file.
///
/// The returned guard flushes the file writer when dropped.
fn init_tracing(cli: &Cli) -> Option<WorkerGuard> {
    use tracing_subscriber::prelude::*;

    let (file_writer, guard) = match &cli.log_dir {
        Some(dir) => {
            let appender = tracing_appender::rolling::daily(dir, "toolgate.log");
            let (writer, guard) = tracing_appender::non_blocking(appender);
            (Some(writer), Some(guard))
        }
        None => (None, None),
    };
    let json = cli.log_format == LogFormat::Json;

    tracing_subscriber::registry()
        .with((!json).then(|| {
            tracing_subscriber::fmt::layer()
                .with_writer(std::io::stderr)
                .with_target(true)
                .with_filter(console_filter(cli))
        }))
        .with(json.then(|| {
            tracing_subscriber::fmt::layer()
                .json()
                .with_writer(std::io::stderr)
                .with_filter(console_filter(cli))
        }))
        .with(file_writer.map(|writer| {
            tracing_subscriber::fmt::layer()
                .json()
                .with_writer(writer)
                .with_filter(EnvFilter::new(directives("trace", "info")))
        }))
        .init();

    guard
}

/// `RUST_LOG` wins; otherwise `--verbose` or `--log-level` for our crates.
fn console_filter(cli: &Cli) -> EnvFilter {
    EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        let level = if cli.verbose {
            "debug"
        } else {
            cli.log_level.as_str()
        };
        EnvFilter::try_new(directives(level, "warn"))
            .unwrap_or_else(|_| EnvFilter::new(directives("info", "warn")))
    })
}

fn directives(level: &str, fallback: &str) -> String {
    let mut directives: Vec<String> = LOG_TARGETS
        .iter()
        .map(|target| format!("{}={}", target, level))
        .collect();
    directives.push(fallback.to_string());
    directives.join(",")
}
