//! Tool-call extraction from free-form backend output.
//!
//! Text-only backends are instructed to request tools by emitting a
//! `{"tool_calls":[...]}` envelope. Models do not always follow the format
//! exactly, so the envelope is searched for in several places, in priority
//! order, and the first candidate that parses wins:
//!
//! 1. a fenced block tagged `json`
//! 2. any other fenced block whose content starts with `{`
//! 3. a raw `{"tool_calls"` object, delimited by brace matching
//! 4. the whole trimmed text
//!
//! The matched region (with its fence) is removed from the visible content.

use std::ops::Range;

use serde::Deserialize;
use serde_json::Value;
use toolgate_types::{ChatCompletionResponse, FinishReason, Message, MessageContent, Role, ToolCall};

/// Key of the envelope object.
pub const ENVELOPE_KEY: &str = "tool_calls";

const RAW_ENVELOPE_START: &str = "{\"tool_calls\"";
const FENCE: &str = "```";
const JSON_FENCE: &str = "```json";

/// Result of scanning backend output.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Extraction {
    /// Visible text. Equal to the input when no calls were found.
    pub content: String,
    /// Requested calls, in envelope order.
    pub tool_calls: Vec<ToolCall>,
}

impl Extraction {
    /// Whether any tool call was found.
    pub fn has_tool_calls(&self) -> bool {
        !self.tool_calls.is_empty()
    }
}

#[derive(Deserialize)]
struct Envelope {
    tool_calls: Vec<RawToolCall>,
}

#[derive(Deserialize)]
struct RawToolCall {
    #[serde(default)]
    id: Option<String>,
    function: RawFunction,
}

#[derive(Deserialize)]
struct RawFunction {
    name: String,
    #[serde(default)]
    arguments: Option<Value>,
}

/// A region of the input that may hold an envelope.
struct Candidate<'a> {
    json: &'a str,
    /// Bytes to strip from the text if this candidate wins.
    span: Range<usize>,
}

/// Split backend output into visible content and requested tool calls.
pub fn extract_tool_calls(text: &str) -> Extraction {
    for candidate in candidates(text) {
        let Some(tool_calls) = parse_envelope(candidate.json) else {
            continue;
        };
        let mut content = String::with_capacity(text.len());
        content.push_str(&text[..candidate.span.start]);
        content.push_str(&text[candidate.span.end..]);
        return Extraction {
            content: content.trim().to_string(),
            tool_calls,
        };
    }

    Extraction {
        content: text.to_string(),
        tool_calls: Vec::new(),
    }
}

/// Build the chat response for a backend answer.
///
/// With tool calls the finish reason is `tool_calls` and the content is
/// `null` when nothing visible remains.
pub fn answer_to_response(model: &str, answer: &str) -> ChatCompletionResponse {
    let extraction = extract_tool_calls(answer);
    if !extraction.has_tool_calls() {
        return ChatCompletionResponse::new(model, Message::assistant(answer), FinishReason::Stop);
    }

    let content = (!extraction.content.is_empty()).then(|| MessageContent::Text(extraction.content));
    let message = Message {
        role: Role::Assistant,
        content,
        name: None,
        tool_calls: extraction.tool_calls,
        tool_call_id: None,
    };
    ChatCompletionResponse::new(model, message, FinishReason::ToolCalls)
}

fn candidates(text: &str) -> Vec<Candidate<'_>> {
    let mut out = Vec::new();

    // 1. ```json fences
    let mut from = 0;
    while let Some(offset) = text[from..].find(JSON_FENCE) {
        let open = from + offset;
        let body = open + JSON_FENCE.len();
        // Tags like `jsonc` or `json5` are left to the generic pass.
        if text[body..].chars().next().is_some_and(|c| !c.is_whitespace()) {
            from = body;
            continue;
        }
        let Some(len) = text[body..].find(FENCE) else {
            break;
        };
        let close = body + len;
        out.push(Candidate {
            json: text[body..close].trim(),
            span: open..close + FENCE.len(),
        });
        from = close + FENCE.len();
    }

    // 2. any fence whose body starts with `{`
    let mut from = 0;
    while let Some(offset) = text[from..].find(FENCE) {
        let open = from + offset;
        let mut body = open + FENCE.len();
        let Some(len) = text[body..].find(FENCE) else {
            break;
        };
        let close = body + len;

        // Skip a language tag on the opening line.
        let first_line = text[body..close].split('\n').next().unwrap_or_default();
        if !first_line.trim_start().starts_with('{') && first_line.len() < close - body {
            body += first_line.len() + 1;
        }
        let json = text[body..close].trim();
        if json.starts_with('{') {
            out.push(Candidate {
                json,
                span: open..close + FENCE.len(),
            });
        }
        from = close + FENCE.len();
    }

    // 3. raw envelope objects
    let mut from = 0;
    while let Some(offset) = text[from..].find(RAW_ENVELOPE_START) {
        let start = from + offset;
        match matching_object_end(&text[start..]) {
            Some(len) => {
                out.push(Candidate {
                    json: &text[start..start + len],
                    span: start..start + len,
                });
                from = start + len;
            }
            None => from = start + RAW_ENVELOPE_START.len(),
        }
    }

    // 4. the whole text
    let trimmed = text.trim();
    if trimmed.starts_with('{') && trimmed.contains(ENVELOPE_KEY) {
        out.push(Candidate {
            json: trimmed,
            span: 0..text.len(),
        });
    }

    out
}

/// Length of the JSON object at the start of `s`, brace-matched while
/// ignoring braces inside strings.
fn matching_object_end(s: &str) -> Option<usize> {
    let bytes = s.as_bytes();
    if bytes.first() != Some(&b'{') {
        return None;
    }

    let mut depth = 0usize;
    let mut in_string = false;
    let mut escaped = false;
    for (i, &b) in bytes.iter().enumerate() {
        if escaped {
            escaped = false;
            continue;
        }
        match b {
            b'\\' if in_string => escaped = true,
            b'"' => in_string = !in_string,
            b'{' if !in_string => depth += 1,
            b'}' if !in_string => {
                depth -= 1;
                if depth == 0 {
                    return Some(i + 1);
                }
            }
            _ => {}
        }
    }
    None
}

fn parse_envelope(json: &str) -> Option<Vec<ToolCall>> {
    let envelope: Envelope = serde_json::from_str(json).ok()?;
    if envelope.tool_calls.is_empty() {
        return None;
    }

    let calls = envelope
        .tool_calls
        .into_iter()
        .map(|raw| {
            let id = raw
                .id
                .filter(|id| !id.is_empty())
                .unwrap_or_else(toolgate_types::tool_call_id);
            ToolCall::function(id, raw.function.name, normalize_arguments(raw.function.arguments))
        })
        .collect();
    Some(calls)
}

/// Arguments as a JSON-encoded string.
fn normalize_arguments(arguments: Option<Value>) -> String {
    match arguments {
        None | Some(Value::Null) => "{}".to_string(),
        Some(Value::String(encoded)) => encoded,
        Some(value) => value.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const ENVELOPE: &str = r#"{"tool_calls":[{"id":"call_1","type":"function","function":{"name":"ping","arguments":"{}"}}]}"#;

    #[test]
    fn test_json_fence_with_prose() {
        let text = format!("Sure.\n```json\n{}\n```", ENVELOPE);
        let extraction = extract_tool_calls(&text);

        assert_eq!(extraction.content, "Sure.");
        assert_eq!(extraction.tool_calls.len(), 1);
        let call = &extraction.tool_calls[0];
        assert_eq!(call.id, "call_1");
        assert_eq!(call.kind, "function");
        assert_eq!(call.function.name, "ping");
        assert_eq!(call.function.arguments, "{}");
    }

    #[test]
    fn test_generic_fence() {
        let text = format!("Checking.\n```\n{}\n```\nOne moment.", ENVELOPE);
        let extraction = extract_tool_calls(&text);
        assert_eq!(extraction.content, "Checking.\n\nOne moment.");
        assert_eq!(extraction.tool_calls[0].function.name, "ping");
    }

    #[test]
    fn test_generic_fence_with_other_language_tag() {
        let text = format!("```javascript\n{}\n```", ENVELOPE);
        let extraction = extract_tool_calls(&text);
        assert_eq!(extraction.content, "");
        assert_eq!(extraction.tool_calls.len(), 1);
    }

    #[test]
    fn test_raw_envelope_in_prose() {
        let text = format!("Let me look that up. {} Done.", ENVELOPE);
        let extraction = extract_tool_calls(&text);
        assert_eq!(extraction.content, "Let me look that up.  Done.");
        assert_eq!(extraction.tool_calls.len(), 1);
    }

    #[test]
    fn test_unbalanced_raw_envelope_is_skipped() {
        let text = format!(r#"I tried {{"tool_calls": [ but got cut off. Again: {}"#, ENVELOPE);
        let extraction = extract_tool_calls(&text);
        assert_eq!(extraction.tool_calls.len(), 1);
        assert_eq!(extraction.tool_calls[0].id, "call_1");
        assert_eq!(
            extraction.content,
            r#"I tried {"tool_calls": [ but got cut off. Again:"#
        );
    }

    #[test]
    fn test_json_prefixed_tags_are_not_json_fences() {
        let text = format!("```jsonc\n{}\n```\n```json5\n{}\n```", ENVELOPE, ENVELOPE);
        let found = candidates(&text);
        assert!(!found.is_empty());
        assert!(found.iter().all(|c| c.json.starts_with('{')));

        let extraction = extract_tool_calls(&text);
        assert_eq!(extraction.tool_calls.len(), 1);
        assert_eq!(extraction.content, format!("```json5\n{}\n```", ENVELOPE));
    }

    #[test]
    fn test_json_fence_tag_at_end_of_text() {
        let extraction = extract_tool_calls("Unfinished ```json");
        assert!(!extraction.has_tool_calls());
        assert_eq!(extraction.content, "Unfinished ```json");
    }

    #[test]
    fn test_raw_envelope_with_braces_in_strings() {
        let text = r#"Here: {"tool_calls":[{"id":"c","type":"function","function":{"name":"echo","arguments":"{\"text\":\"a } \\\" { b\"}"}}]} trailing"#;
        let extraction = extract_tool_calls(text);
        assert_eq!(extraction.content, "Here:  trailing");
        assert_eq!(extraction.tool_calls.len(), 1);
        let args: Value = serde_json::from_str(&extraction.tool_calls[0].function.arguments).unwrap();
        assert_eq!(args["text"], "a } \" { b");
    }

    #[test]
    fn test_whole_text_envelope_with_spacing() {
        let text = r#"  { "tool_calls": [ { "function": { "name": "ping" } } ] }  "#;
        let extraction = extract_tool_calls(text);
        assert_eq!(extraction.content, "");
        assert_eq!(extraction.tool_calls.len(), 1);
        assert!(extraction.tool_calls[0].id.starts_with("call_"));
        assert_eq!(extraction.tool_calls[0].function.arguments, "{}");
    }

    #[test]
    fn test_object_and_string_arguments_normalize_identically() {
        let as_object = r#"{"tool_calls":[{"id":"a","type":"function","function":{"name":"add","arguments":{"a":2,"b":3}}}]}"#;
        let as_string = r#"{"tool_calls":[{"id":"a","type":"function","function":{"name":"add","arguments":"{\"a\":2,\"b\":3}"}}]}"#;

        let a = extract_tool_calls(as_object);
        let b = extract_tool_calls(as_string);
        assert_eq!(a.tool_calls[0].function.arguments, r#"{"a":2,"b":3}"#);
        assert_eq!(a.tool_calls, b.tool_calls);
    }

    #[test]
    fn test_multiple_calls_keep_order() {
        let text = r#"```json
{"tool_calls":[
  {"id":"call_a","type":"function","function":{"name":"ping","arguments":"{}"}},
  {"id":"call_b","type":"function","function":{"name":"ping","arguments":"{}"}}
]}
```"#;
        let extraction = extract_tool_calls(text);
        let ids: Vec<&str> = extraction.tool_calls.iter().map(|c| c.id.as_str()).collect();
        assert_eq!(ids, ["call_a", "call_b"]);
    }

    #[test]
    fn test_missing_ids_are_unique() {
        let text = r#"{"tool_calls":[{"function":{"name":"a"}},{"function":{"name":"b"}}]}"#;
        let extraction = extract_tool_calls(text);
        assert_eq!(extraction.tool_calls.len(), 2);
        assert_ne!(extraction.tool_calls[0].id, extraction.tool_calls[1].id);
    }

    #[test]
    fn test_plain_text_is_unchanged() {
        for text in [
            "Hello there.",
            "  padded answer \n",
            "Code:\n```rust\nfn main() {}\n```",
            "```json\n{\"answer\": 42}\n```",
            "",
        ] {
            let extraction = extract_tool_calls(text);
            assert_eq!(extraction.content, text);
            assert!(!extraction.has_tool_calls());
        }
    }

    #[test]
    fn test_empty_or_invalid_envelopes_are_ignored() {
        for text in [
            r#"{"tool_calls":[]}"#,
            r#"{"tool_calls":"ping"}"#,
            r#"{"tool_calls":[{"id":"x"}]}"#,
            r#"prefix {"tool_calls":[{"function":{"name":"a"}}"#,
        ] {
            let extraction = extract_tool_calls(text);
            assert_eq!(extraction.content, text);
            assert!(extraction.tool_calls.is_empty(), "{}", text);
        }
    }

    #[test]
    fn test_json_fence_wins_over_raw() {
        let text = r#"{"tool_calls":[{"id":"raw","function":{"name":"a"}}]}
```json
{"tool_calls":[{"id":"fenced","function":{"name":"b"}}]}
```"#;
        let extraction = extract_tool_calls(text);
        assert_eq!(extraction.tool_calls[0].id, "fenced");
        assert!(extraction.content.starts_with(r#"{"tool_calls""#));
    }

    #[test]
    fn test_invalid_first_fence_falls_through() {
        let text = format!("```json\n{{not json}}\n```\n{}", ENVELOPE);
        let extraction = extract_tool_calls(&text);
        assert_eq!(extraction.tool_calls.len(), 1);
        assert_eq!(extraction.content, "```json\n{not json}\n```");
    }

    #[test]
    fn test_answer_to_response() {
        let response = answer_to_response("m", "Just text");
        assert_eq!(response.choices[0].finish_reason, Some(FinishReason::Stop));
        assert_eq!(response.message().unwrap().text(), "Just text");
        assert!(response.tool_calls().is_empty());

        let response = answer_to_response("m", ENVELOPE);
        assert_eq!(response.choices[0].finish_reason, Some(FinishReason::ToolCalls));
        assert!(response.message().unwrap().content.is_none());
        assert_eq!(response.tool_calls().len(), 1);

        let response = answer_to_response("m", &format!("Sure.\n```json\n{}\n```", ENVELOPE));
        assert_eq!(response.message().unwrap().text(), "Sure.");
    }
}
