//! Tools command - lists the aggregate MCP tool catalog.

use anyhow::Result;
use clap::Args;
use console::style;
use serde_json::json;

use toolgate_mcp::{McpTool, StartSummary, ToolCollision};

use super::{Context, start_mcp, stop_mcp, truncate};

/// Arguments for `toolgate tools`.
#[derive(Args, Debug)]
pub struct ToolsArgs {
    /// Show input schemas
    #[arg(long)]
    pub schemas: bool,
}

/// Run the tools command.
pub async fn run(args: ToolsArgs, ctx: &Context) -> Result<()> {
    let manager = ctx.mcp_manager()?;
    let summary = start_mcp(&manager).await;
    let tools = manager.all_tools();
    let collisions = manager.tool_collisions();
    stop_mcp(&manager).await;

    if ctx.json_output {
        print_json(&tools, &collisions, &summary)
    } else {
        print_table(&tools, &collisions, &summary, args.schemas || ctx.verbose)
    }
}

fn print_json(tools: &[McpTool], collisions: &[ToolCollision], summary: &StartSummary) -> Result<()> {
    let failed: Vec<_> = summary
        .failed
        .iter()
        .map(|(server, error)| json!({"server": server, "error": error}))
        .collect();
    let output = json!({
        "tools": tools,
        "count": tools.len(),
        "collisions": collisions,
        "failed": failed,
    });
    println!("{}", serde_json::to_string_pretty(&output)?);
    Ok(())
}

fn print_table(
    tools: &[McpTool],
    collisions: &[ToolCollision],
    summary: &StartSummary,
    schemas: bool,
) -> Result<()> {
    for (server, error) in &summary.failed {
        eprintln!("{} {}: {}", style("✗").red(), style(server).bold(), error);
    }

    if tools.is_empty() {
        println!("No MCP tools available.");
        if summary.started.is_empty() && summary.failed.is_empty() {
            println!();
            println!("Configure servers in toolgate.yaml or point --mcp-config at a file.");
        }
        return Ok(());
    }

    println!("{}", style("MCP Tools").bold());
    println!();
    println!("{:<28} {:<16} {}", "NAME", "SERVER", "DESCRIPTION");
    println!("{}", "-".repeat(88));
    for tool in tools {
        println!(
            "{:<28} {:<16} {}",
            style(&tool.name).cyan(),
            tool.server,
            truncate(&tool.description, 44)
        );
        if schemas {
            println!("    {}", serde_json::to_string(&tool.input_schema)?);
        }
    }
    println!();
    println!(
        "{} tools from {} servers",
        style(tools.len()).cyan(),
        style(summary.started.len()).cyan()
    );

    if !collisions.is_empty() {
        println!();
        println!("{}", style("Name collisions").yellow().bold());
        for c in collisions {
            println!(
                "  {}: {} replaced {}",
                style(&c.tool).bold(),
                c.server,
                c.previous_server
            );
        }
    }

    Ok(())
}
