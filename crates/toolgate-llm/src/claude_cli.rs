//! Claude CLI backend.
//!
//! Runs the `claude` command in print mode once per completion. The
//! conversation is written to stdin as `stream-json` NDJSON and the answer is
//! read back from `stream-json` events on stdout.
//!
//! ```text
//! claude -p --verbose --input-format stream-json --output-format stream-json \
//!        [--include-partial-messages] --dangerously-skip-permissions \
//!        [--system-prompt <prompt>]
//! ```

use std::process::Stdio;

use async_trait::async_trait;
use serde_json::{Value, json};
use tokio::io::{AsyncBufReadExt, AsyncReadExt, AsyncWriteExt, BufReader};
use tokio::process::{Child, ChildStdin, Command};
use toolgate_types::{ContentPart, Message, MessageContent, Role};

use crate::backend::{Backend, TextStream};
use crate::error::{LlmError, Result};
use crate::prompt::BackendPrompt;

/// Default executable name.
pub const DEFAULT_COMMAND: &str = "claude";

// ─────────────────────────────────────────────────────────────────────────────
// Configuration
// ─────────────────────────────────────────────────────────────────────────────

/// How to invoke the CLI.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClaudeCliConfig {
    /// Executable to run.
    pub command: String,
    /// Arguments placed before the generated flags.
    pub extra_args: Vec<String>,
}

impl Default for ClaudeCliConfig {
    fn default() -> Self {
        Self::new(DEFAULT_COMMAND)
    }
}

impl ClaudeCliConfig {
    /// Run `command` with no extra arguments.
    pub fn new(command: impl Into<String>) -> Self {
        Self {
            command: command.into(),
            extra_args: Vec::new(),
        }
    }

    /// Append an argument placed before the generated flags.
    pub fn with_arg(mut self, arg: impl Into<String>) -> Self {
        self.extra_args.push(arg.into());
        self
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Backend
// ─────────────────────────────────────────────────────────────────────────────

/// Backend driving the Claude CLI as a child process.
#[derive(Debug, Clone)]
pub struct ClaudeCliBackend {
    config: ClaudeCliConfig,
}

impl Default for ClaudeCliBackend {
    fn default() -> Self {
        Self::new(ClaudeCliConfig::default())
    }
}

impl ClaudeCliBackend {
    /// Create a backend from its configuration.
    pub fn new(config: ClaudeCliConfig) -> Self {
        Self { config }
    }

    /// The executable this backend runs.
    pub fn command(&self) -> &str {
        &self.config.command
    }

    /// Full argument vector for one run.
    pub fn build_args(&self, prompt: &BackendPrompt, streaming: bool) -> Vec<String> {
        let mut args = self.config.extra_args.clone();
        args.extend(
            [
                "-p",
                "--verbose",
                "--input-format",
                "stream-json",
                "--output-format",
                "stream-json",
            ]
            .map(String::from),
        );
        if streaming {
            args.push("--include-partial-messages".to_string());
        }
        args.push("--dangerously-skip-permissions".to_string());
        if !prompt.system_prompt.is_empty() {
            args.push("--system-prompt".to_string());
            args.push(prompt.system_prompt.clone());
        }
        args
    }

    fn spawn(&self, prompt: &BackendPrompt, streaming: bool) -> Result<Child> {
        tracing::debug!(
            command = %self.config.command,
            streaming,
            messages = prompt.messages.len(),
            system_prompt_len = prompt.system_prompt.len(),
            "Starting backend process"
        );
        Command::new(&self.config.command)
            .args(self.build_args(prompt, streaming))
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| LlmError::spawn(format!("failed to run '{}': {}", self.config.command, e)))
    }
}

async fn write_input(mut stdin: ChildStdin, input: String) {
    if let Err(e) = stdin.write_all(input.as_bytes()).await {
        tracing::debug!(error = %e, "Backend closed stdin early");
        return;
    }
    let _ = stdin.shutdown().await;
}

#[async_trait]
impl Backend for ClaudeCliBackend {
    async fn complete(&self, prompt: &BackendPrompt) -> Result<String> {
        let input = encode_input(&prompt.messages)?;
        let mut child = self.spawn(prompt, false)?;
        let writer = child.stdin.take().map(|stdin| tokio::spawn(write_input(stdin, input)));

        let output = child.wait_with_output().await?;
        if let Some(writer) = writer {
            let _ = writer.await;
        }

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            tracing::warn!(status = %output.status, stderr = %stderr.trim(), "Backend failed");
            return Err(LlmError::process(output.status, stderr));
        }
        parse_final_text(&String::from_utf8_lossy(&output.stdout))
    }

    async fn complete_stream(&self, prompt: &BackendPrompt) -> Result<TextStream> {
        let input = encode_input(&prompt.messages)?;
        let mut child = self.spawn(prompt, true)?;

        if let Some(stdin) = child.stdin.take() {
            tokio::spawn(write_input(stdin, input));
        }
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| LlmError::spawn("backend stdout was not captured"))?;
        let stderr_task = child.stderr.take().map(|mut stderr| {
            tokio::spawn(async move {
                let mut buf = String::new();
                let _ = stderr.read_to_string(&mut buf).await;
                buf
            })
        });

        let stream = async_stream::stream! {
            let mut lines = BufReader::new(stdout).lines();
            let mut streamed = false;
            loop {
                match lines.next_line().await {
                    Ok(Some(line)) => match parse_stream_line(&line) {
                        Some(StreamLine::Delta(text)) => {
                            streamed = true;
                            yield Ok(text);
                        }
                        // Only used when the CLI emitted no partial messages.
                        Some(StreamLine::Result(text)) if !streamed && !text.is_empty() => {
                            streamed = true;
                            yield Ok(text);
                        }
                        _ => {}
                    },
                    Ok(None) => break,
                    Err(e) => {
                        yield Err(LlmError::Io(e));
                        return;
                    }
                }
            }

            match child.wait().await {
                Ok(status) if status.success() => {}
                Ok(status) => {
                    let stderr = match stderr_task {
                        Some(task) => task.await.unwrap_or_default(),
                        None => String::new(),
                    };
                    tracing::warn!(status = %status, stderr = %stderr.trim(), "Backend stream failed");
                    yield Err(LlmError::process(status, stderr));
                }
                Err(e) => yield Err(LlmError::Io(e)),
            }
        };

        Ok(Box::pin(stream))
    }

    fn name(&self) -> &str {
        "claude-cli"
    }

    async fn health_check(&self) -> Result<()> {
        let output = Command::new(&self.config.command)
            .arg("--version")
            .stdin(Stdio::null())
            .kill_on_drop(true)
            .output()
            .await
            .map_err(|e| LlmError::spawn(format!("failed to run '{}': {}", self.config.command, e)))?;
        if output.status.success() {
            Ok(())
        } else {
            Err(LlmError::process(
                output.status,
                String::from_utf8_lossy(&output.stderr),
            ))
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Input Encoding
// ─────────────────────────────────────────────────────────────────────────────

/// Encode the conversation as `stream-json` input lines.
///
/// System messages are skipped (they travel as `--system-prompt`). Tool
/// results become user text, since the CLI has no tool role.
pub fn encode_input(messages: &[Message]) -> Result<String> {
    let mut out = String::new();
    for message in messages.iter().filter(|m| !m.role.is_system()) {
        out.push_str(&serde_json::to_string(&input_message(message))?);
        out.push('\n');
    }
    Ok(out)
}

fn input_message(message: &Message) -> Value {
    let (kind, role) = match message.role {
        Role::Assistant => ("assistant", "assistant"),
        _ => ("user", "user"),
    };

    let content = match (&message.role, &message.content) {
        (Role::Tool, _) => Value::String(format!(
            "[Tool Result for {}]: {}",
            message.tool_call_id.as_deref().unwrap_or_default(),
            message.text()
        )),
        (_, Some(MessageContent::Parts(parts))) => Value::Array(content_blocks(parts)),
        _ => Value::String(message.text()),
    };

    json!({"type": kind, "message": {"role": role, "content": content}})
}

fn content_blocks(parts: &[ContentPart]) -> Vec<Value> {
    parts
        .iter()
        .filter_map(|part| match part.kind.as_str() {
            "text" => Some(json!({"type": "text", "text": part.text.clone().unwrap_or_default()})),
            "image_url" => part.image_url.as_ref().and_then(|img| image_block(&img.url)),
            _ => None,
        })
        .collect()
}

/// Convert a `data:` URL into a base64 image block. Remote URLs are dropped.
fn image_block(url: &str) -> Option<Value> {
    let (header, data) = url.strip_prefix("data:")?.split_once(',')?;
    let media_type = ["image/jpeg", "image/webp", "image/gif", "image/png"]
        .into_iter()
        .find(|t| header.contains(t))
        .or_else(|| header.contains("image/jpg").then_some("image/jpeg"))
        .unwrap_or("image/png");
    Some(json!({
        "type": "image",
        "source": {"type": "base64", "media_type": media_type, "data": data}
    }))
}

// ─────────────────────────────────────────────────────────────────────────────
// Output Parsing
// ─────────────────────────────────────────────────────────────────────────────

/// A meaningful line of streaming output.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StreamLine {
    /// A partial text delta.
    Delta(String),
    /// The final result text.
    Result(String),
}

/// Interpret one `stream-json` output line.
pub fn parse_stream_line(line: &str) -> Option<StreamLine> {
    let event: Value = serde_json::from_str(line.trim()).ok()?;
    match event.get("type").and_then(Value::as_str)? {
        "stream_event" => {
            let inner = event.get("event")?;
            if inner.get("type").and_then(Value::as_str) != Some("content_block_delta") {
                return None;
            }
            let delta = inner.get("delta")?;
            if delta.get("type").and_then(Value::as_str) != Some("text_delta") {
                return None;
            }
            let text = delta.get("text").and_then(Value::as_str)?;
            Some(StreamLine::Delta(text.to_string()))
        }
        "result" => event
            .get("result")
            .and_then(Value::as_str)
            .map(|r| StreamLine::Result(r.to_string())),
        _ => None,
    }
}

/// Extract the answer from complete `stream-json` output.
///
/// The `result` event wins; otherwise the text blocks of assistant events
/// are concatenated.
pub fn parse_final_text(output: &str) -> Result<String> {
    let events: Vec<Value> = output
        .lines()
        .filter(|l| !l.trim().is_empty())
        .filter_map(|l| serde_json::from_str(l).ok())
        .collect();

    let result = events.iter().find_map(|e| {
        (e.get("type").and_then(Value::as_str) == Some("result"))
            .then(|| e.get("result").and_then(Value::as_str))
            .flatten()
    });
    if let Some(result) = result {
        return Ok(result.to_string());
    }

    let mut found = false;
    let mut text = String::new();
    for event in &events {
        if event.get("type").and_then(Value::as_str) != Some("assistant") {
            continue;
        }
        found = true;
        match event.pointer("/message/content") {
            Some(Value::String(s)) => text.push_str(s),
            Some(Value::Array(blocks)) => {
                for block in blocks {
                    if block.get("type").and_then(Value::as_str) == Some("text")
                        && let Some(t) = block.get("text").and_then(Value::as_str)
                    {
                        text.push_str(t);
                    }
                }
            }
            _ => {}
        }
    }

    if found {
        Ok(text)
    } else {
        Err(LlmError::invalid_output("no result or assistant event in backend output"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::StreamExt;
    use toolgate_types::ImageUrl;

    fn sh_backend(script: &str) -> ClaudeCliBackend {
        ClaudeCliBackend::new(
            ClaudeCliConfig::new("sh")
                .with_arg("-c")
                .with_arg(script)
                .with_arg("fake-claude"),
        )
    }

    #[test]
    fn test_build_args() {
        let backend = ClaudeCliBackend::default();
        let prompt = BackendPrompt {
            system_prompt: "be nice".to_string(),
            messages: vec![Message::user("hi")],
        };

        let args = backend.build_args(&prompt, false);
        assert_eq!(args[0], "-p");
        assert!(args.contains(&"--dangerously-skip-permissions".to_string()));
        assert!(!args.contains(&"--include-partial-messages".to_string()));
        assert_eq!(args[args.len() - 2..], ["--system-prompt", "be nice"]);

        let args = backend.build_args(&BackendPrompt::user("hi"), true);
        assert!(args.contains(&"--include-partial-messages".to_string()));
        assert!(!args.contains(&"--system-prompt".to_string()));
    }

    #[test]
    fn test_encode_input_roles() {
        let messages = vec![
            Message::system("ignored"),
            Message::user("question"),
            Message::assistant("answer"),
            Message::tool("call_1", "42"),
        ];
        let input = encode_input(&messages).unwrap();
        let lines: Vec<Value> = input
            .lines()
            .map(|l| serde_json::from_str(l).unwrap())
            .collect();

        assert_eq!(lines.len(), 3);
        assert_eq!(lines[0]["type"], "user");
        assert_eq!(lines[0]["message"]["content"], "question");
        assert_eq!(lines[1]["type"], "assistant");
        assert_eq!(lines[1]["message"]["role"], "assistant");
        assert_eq!(lines[2]["type"], "user");
        assert_eq!(lines[2]["message"]["content"], "[Tool Result for call_1]: 42");
    }

    #[test]
    fn test_encode_input_images() {
        let message = Message {
            content: Some(MessageContent::Parts(vec![
                ContentPart {
                    kind: "text".to_string(),
                    text: Some("what is this".to_string()),
                    image_url: None,
                },
                ContentPart {
                    kind: "image_url".to_string(),
                    text: None,
                    image_url: Some(ImageUrl {
                        url: "data:image/jpeg;base64,QUJD".to_string(),
                        detail: None,
                    }),
                },
                ContentPart {
                    kind: "image_url".to_string(),
                    text: None,
                    image_url: Some(ImageUrl {
                        url: "https://example.com/cat.png".to_string(),
                        detail: None,
                    }),
                },
            ])),
            ..Message::user("")
        };
        let input = encode_input(&[message]).unwrap();
        let line: Value = serde_json::from_str(input.trim()).unwrap();
        let blocks = line["message"]["content"].as_array().unwrap();

        assert_eq!(blocks.len(), 2);
        assert_eq!(blocks[0]["text"], "what is this");
        assert_eq!(blocks[1]["type"], "image");
        assert_eq!(blocks[1]["source"]["media_type"], "image/jpeg");
        assert_eq!(blocks[1]["source"]["data"], "QUJD");
    }

    #[test]
    fn test_image_media_types() {
        let media = |url: &str| image_block(url).map(|b| b["source"]["media_type"].clone());
        assert_eq!(media("data:image/webp;base64,x").unwrap(), "image/webp");
        assert_eq!(media("data:image/jpg;base64,x").unwrap(), "image/jpeg");
        assert_eq!(media("data:application/octet-stream;base64,x").unwrap(), "image/png");
        assert!(media("data:image/png;base64").is_none());
        assert!(media("http://x/y.png").is_none());
    }

    #[test]
    fn test_parse_stream_line() {
        let delta = r#"{"type":"stream_event","event":{"type":"content_block_delta","index":0,"delta":{"type":"text_delta","text":"Hel"}}}"#;
        assert_eq!(parse_stream_line(delta), Some(StreamLine::Delta("Hel".to_string())));

        let json_delta = r#"{"type":"stream_event","event":{"type":"content_block_delta","delta":{"type":"input_json_delta","partial_json":"{"}}}"#;
        assert_eq!(parse_stream_line(json_delta), None);

        let start = r#"{"type":"stream_event","event":{"type":"message_start"}}"#;
        assert_eq!(parse_stream_line(start), None);

        let result = r#"{"type":"result","subtype":"success","result":"Hello"}"#;
        assert_eq!(parse_stream_line(result), Some(StreamLine::Result("Hello".to_string())));

        assert_eq!(parse_stream_line("not json"), None);
    }

    #[test]
    fn test_parse_final_text_prefers_result() {
        let output = concat!(
            r#"{"type":"system","subtype":"init"}"#,
            "\n",
            r#"{"type":"assistant","message":{"content":[{"type":"text","text":"draft"}]}}"#,
            "\n",
            r#"{"type":"result","result":"final"}"#,
            "\n"
        );
        assert_eq!(parse_final_text(output).unwrap(), "final");
    }

    #[test]
    fn test_parse_final_text_falls_back_to_assistant_blocks() {
        let output = concat!(
            r#"{"type":"assistant","message":{"content":[{"type":"text","text":"Hello, "},{"type":"tool_use","id":"x"},{"type":"text","text":"world"}]}}"#,
            "\n",
            "garbage line\n"
        );
        assert_eq!(parse_final_text(output).unwrap(), "Hello, world");

        let output = r#"{"type":"assistant","message":{"content":"plain"}}"#;
        assert_eq!(parse_final_text(output).unwrap(), "plain");
    }

    #[test]
    fn test_parse_final_text_without_answer() {
        let err = parse_final_text("{\"type\":\"system\"}\n").unwrap_err();
        assert!(matches!(err, LlmError::InvalidOutput(_)));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_complete_reads_result_event() {
        let backend = sh_backend(
            r#"cat >/dev/null; echo '{"type":"system"}'; echo '{"type":"result","result":"Sure."}'"#,
        );
        let text = backend.complete(&BackendPrompt::user("hi")).await.unwrap();
        assert_eq!(text, "Sure.");
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_complete_passes_conversation_on_stdin() {
        // Echo the first input line back as the result text.
        let backend = sh_backend(
            r#"read -r line; printf '{"type":"result","result":"%s"}\n' "$(printf '%s' "$line" | sed 's/"/\\"/g')""#,
        );
        let text = backend.complete(&BackendPrompt::user("ping")).await.unwrap();
        let echoed: Value = serde_json::from_str(&text).unwrap();
        assert_eq!(echoed["type"], "user");
        assert_eq!(echoed["message"]["content"], "ping");
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_complete_surfaces_stderr_on_failure() {
        let backend = sh_backend("cat >/dev/null; echo 'auth expired' >&2; exit 3");
        let err = backend.complete(&BackendPrompt::user("hi")).await.unwrap_err();
        match err {
            LlmError::Process { stderr, .. } => assert_eq!(stderr, "auth expired"),
            other => panic!("unexpected {:?}", other),
        }
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_complete_stream_yields_deltas() {
        let backend = sh_backend(concat!(
            "cat >/dev/null; ",
            r#"echo '{"type":"stream_event","event":{"type":"content_block_delta","delta":{"type":"text_delta","text":"Hel"}}}'; "#,
            r#"echo '{"type":"stream_event","event":{"type":"content_block_delta","delta":{"type":"text_delta","text":"lo"}}}'; "#,
            r#"echo '{"type":"result","result":"Hello"}'"#
        ));
        let stream = backend
            .complete_stream(&BackendPrompt::user("hi"))
            .await
            .unwrap();
        let chunks: Vec<String> = stream.map(|r| r.unwrap()).collect().await;
        assert_eq!(chunks, ["Hel", "lo"]);
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_complete_stream_uses_result_without_partials() {
        let backend = sh_backend(r#"cat >/dev/null; echo '{"type":"result","result":"whole"}'"#);
        let stream = backend
            .complete_stream(&BackendPrompt::user("hi"))
            .await
            .unwrap();
        let chunks: Vec<String> = stream.map(|r| r.unwrap()).collect().await;
        assert_eq!(chunks, ["whole"]);
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_complete_stream_reports_failure_last() {
        let backend = sh_backend("cat >/dev/null; echo 'bad flag' >&2; exit 1");
        let stream = backend
            .complete_stream(&BackendPrompt::user("hi"))
            .await
            .unwrap();
        let items: Vec<Result<String>> = stream.collect().await;
        assert_eq!(items.len(), 1);
        assert!(matches!(&items[0], Err(LlmError::Process { stderr, .. }) if stderr == "bad flag"));
    }

    #[tokio::test]
    async fn test_missing_command_is_spawn_error() {
        let backend = ClaudeCliBackend::new(ClaudeCliConfig::new("toolgate-no-such-cli-12345"));
        let err = backend.complete(&BackendPrompt::user("hi")).await.unwrap_err();
        assert!(matches!(err, LlmError::Spawn(_)));
        assert!(backend.health_check().await.is_err());
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_health_check_runs_version() {
        let backend = sh_backend(r#"[ "$1" = "--version" ] && echo "1.0.0""#);
        backend.health_check().await.unwrap();

        let backend = sh_backend("exit 1");
        assert!(backend.health_check().await.is_err());
    }
}
