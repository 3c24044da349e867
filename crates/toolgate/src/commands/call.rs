//! Call command - invokes one MCP tool directly.

use anyhow::{Context as _, Result, bail};
use clap::Args;
use console::style;
use serde_json::Value;

use super::{Context, start_mcp, stop_mcp};

/// Arguments for `toolgate call`.
#[derive(Args, Debug)]
pub struct CallArgs {
    /// Tool name
    pub tool: String,

    /// Arguments as a JSON object
    #[arg(long, short = 'a', default_value = "{}")]
    pub args: String,
}

/// Run the call command.
///
/// Fails when the tool is unknown, the call fails, or the tool reports an
/// error result.
pub async fn run(args: CallArgs, ctx: &Context) -> Result<()> {
    let arguments = parse_arguments(&args.args)?;

    let manager = ctx.mcp_manager()?;
    start_mcp(&manager).await;
    let outcome = manager.call_tool(&args.tool, arguments).await;
    stop_mcp(&manager).await;

    let result = outcome.with_context(|| format!("calling tool '{}' failed", args.tool))?;

    if ctx.json_output {
        println!("{}", serde_json::to_string_pretty(&result)?);
    } else if result.is_error() {
        eprintln!("{} {}", style("✗").red(), result.text());
    } else {
        println!("{}", result.text());
    }

    if result.is_error() {
        bail!("tool '{}' returned an error", args.tool);
    }
    Ok(())
}

fn parse_arguments(raw: &str) -> Result<Value> {
    if raw.trim().is_empty() {
        return Ok(Value::Object(Default::default()));
    }
    let value: Value = serde_json::from_str(raw).context("--args is not valid JSON")?;
    if !value.is_object() {
        bail!("--args must be a JSON object");
    }
    Ok(value)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_parse_arguments() {
        assert_eq!(parse_arguments("").unwrap(), json!({}));
        assert_eq!(parse_arguments(r#"{"a":1}"#).unwrap(), json!({"a": 1}));
        assert!(parse_arguments("[1]").is_err());
        assert!(parse_arguments("{oops").is_err());
    }
}
