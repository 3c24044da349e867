//! Serve command - runs the gateway.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context as _, Result};
use clap::Args;
use console::style;

use toolgate_llm::{ClaudeCliBackend, ClaudeCliConfig, DEFAULT_COMMAND};
use toolgate_server::config::DEFAULT_MAX_BODY_SIZE;
use toolgate_server::{Server, ServerConfig};

use super::{Context, start_mcp};

/// Arguments for the serve command.
#[derive(Args, Debug)]
pub struct ServeArgs {
    /// Address to bind to
    #[arg(short, long, env = "TOOLGATE_BIND", default_value = "127.0.0.1:8080")]
    pub bind: SocketAddr,

    /// Port to listen on (overrides the bind port)
    #[arg(short, long, env = "PORT")]
    pub port: Option<u16>,

    /// Per-request timeout in seconds, tool round included
    #[arg(long, env = "REQUEST_TIMEOUT", default_value_t = 600)]
    pub request_timeout: u64,

    /// Executable of the model CLI
    #[arg(long, env = "TOOLGATE_BACKEND_COMMAND", default_value = DEFAULT_COMMAND)]
    pub backend_command: String,

    /// Largest accepted request body in bytes
    #[arg(long, default_value_t = DEFAULT_MAX_BODY_SIZE)]
    pub max_body_size: usize,

    /// Disable per-request logging
    #[arg(long)]
    pub no_request_logging: bool,
}

impl ServeArgs {
    fn server_config(&self) -> ServerConfig {
        let mut config = ServerConfig::new()
            .with_bind_address(self.bind)
            .with_request_timeout(Duration::from_secs(self.request_timeout))
            .with_max_body_size(self.max_body_size)
            .with_request_logging(!self.no_request_logging);
        if let Some(port) = self.port {
            config = config.with_port(port);
        }
        config
    }
}

/// Run the serve command.
pub async fn run(args: ServeArgs, ctx: &Context) -> Result<()> {
    let config = args.server_config();
    let manager = ctx.mcp_manager()?;
    let summary = start_mcp(&manager).await;

    let backend = Arc::new(ClaudeCliBackend::new(ClaudeCliConfig::new(
        args.backend_command.clone(),
    )));

    if !ctx.json_output {
        println!("{}", style("Toolgate").bold());
        println!("  Listening:   {}", style(config.bind_address).cyan());
        println!("  Backend:     {}", style(&args.backend_command).cyan());
        println!(
            "  MCP servers: {} running, {} failed",
            style(summary.started.len()).cyan(),
            style(summary.failed.len()).yellow()
        );
        println!("  MCP tools:   {}", style(manager.tool_count()).cyan());
        if ctx.verbose {
            for server in &summary.started {
                println!("    {} {}", style("✓").green(), server);
            }
            for (server, error) in &summary.failed {
                println!("    {} {}: {}", style("✗").red(), server, error);
            }
        }
        println!();
    }

    tracing::info!(
        bind = %config.bind_address,
        backend = %args.backend_command,
        mcp_tools = manager.tool_count(),
        "Starting gateway"
    );

    Server::new(backend, manager, config)
        .run_with_shutdown(toolgate_server::shutdown_signal())
        .await
        .context("gateway failed")
}
