//! Prompt construction for text-only backends.
//!
//! The backend has no structured tool-calling API, so the tool catalog is
//! rendered into the system prompt together with strict instructions for the
//! `{"tool_calls":[...]}` envelope the model must emit.

use serde_json::Value;
use toolgate_types::{ChatCompletionRequest, Message, Role, Tool};

/// What a backend receives for one completion.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct BackendPrompt {
    /// System messages joined, followed by the rendered tool section.
    pub system_prompt: String,
    /// Conversation without system messages, in order.
    pub messages: Vec<Message>,
}

impl BackendPrompt {
    /// Build a prompt from an OpenAI-style request.
    pub fn from_request(request: &ChatCompletionRequest) -> Self {
        let mut sections: Vec<String> = request
            .messages
            .iter()
            .filter(|m| m.role.is_system())
            .map(Message::text)
            .filter(|t| !t.is_empty())
            .collect();

        if request.tools.iter().any(Tool::is_function) {
            sections.push(render_tools_prompt(&request.tools, request.tool_choice.as_ref()));
        }

        Self {
            system_prompt: sections.join("\n\n"),
            messages: request
                .messages
                .iter()
                .filter(|m| !m.role.is_system())
                .cloned()
                .collect(),
        }
    }

    /// A prompt with a single user message.
    pub fn user(text: impl Into<String>) -> Self {
        Self {
            system_prompt: String::new(),
            messages: vec![Message::user(text)],
        }
    }

    /// Whether any message carries image parts.
    pub fn has_images(&self) -> bool {
        self.messages.iter().any(Message::has_images)
    }

    /// Text of the last user message, for logging.
    pub fn last_user_text(&self) -> Option<String> {
        self.messages
            .iter()
            .rev()
            .find(|m| m.role == Role::User)
            .map(Message::text)
    }
}

const ENVELOPE_EXAMPLE: &str = r#"```json
{
  "tool_calls": [
    {
      "id": "call_abc123",
      "type": "function",
      "function": {
        "name": "tool_name_here",
        "arguments": "{\"param1\": \"value1\"}"
      }
    }
  ]
}
```"#;

/// Render the tool section of the system prompt.
pub fn render_tools_prompt(tools: &[Tool], tool_choice: Option<&Value>) -> String {
    let mut out = String::from("## Available Tools\n\n");
    out.push_str(
        "You have access to the following tools. When you decide to use a tool, you MUST \
         respond with ONLY a JSON object (no other text before or after) in this exact format:\n\n",
    );
    out.push_str(ENVELOPE_EXAMPLE);
    out.push_str("\n\nCRITICAL RULES:\n");
    out.push_str("1. The 'arguments' field MUST be a JSON-encoded STRING, not a raw object\n");
    out.push_str(
        "2. Generate unique IDs like 'call_' followed by random alphanumeric characters\n",
    );
    out.push_str("3. When using tools, output ONLY the JSON - no explanation text\n");
    out.push_str(
        "4. You can include brief reasoning BEFORE the JSON if needed, but the JSON must be last\n\n",
    );
    out.push_str("### Tool Definitions:\n\n");

    for tool in tools.iter().filter(|t| t.is_function()) {
        let function = &tool.function;
        out.push_str(&format!("#### {}\n", function.name));
        if let Some(description) = function.description.as_deref().filter(|d| !d.is_empty()) {
            out.push_str(&format!("Description: {}\n", description));
        }
        if let Some(parameters) = function.parameters.as_ref().filter(|p| !p.is_null()) {
            let schema = serde_json::to_string_pretty(parameters).unwrap_or_default();
            out.push_str(&format!("Parameters schema:\n```json\n{}\n```\n", schema));
        }
        out.push('\n');
    }

    if let Some(guidance) = tool_choice.and_then(tool_choice_guidance) {
        out.push('\n');
        out.push_str(&guidance);
        out.push('\n');
    }

    out
}

fn tool_choice_guidance(choice: &Value) -> Option<String> {
    match choice {
        Value::String(mode) => match mode.as_str() {
            "required" => Some(
                "**IMPORTANT**: You MUST use one of the available tools in your response. \
                 Do not respond with plain text only."
                    .to_string(),
            ),
            "none" => Some(
                "**IMPORTANT**: Do NOT use any tools. Respond with plain text only.".to_string(),
            ),
            "auto" => Some(
                "**MODE**: Auto - Use tools when appropriate, or respond with text if no tool \
                 is needed."
                    .to_string(),
            ),
            _ => None,
        },
        Value::Object(_) => choice
            .pointer("/function/name")
            .and_then(Value::as_str)
            .map(|name| {
                format!(
                    "**IMPORTANT**: You MUST use the '{}' tool in your response.",
                    name
                )
            }),
        _ => None,
    }
}
