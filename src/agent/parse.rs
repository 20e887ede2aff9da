//! Turning a model response into an action.
//!
//! Structured tool calls win. Otherwise the text is searched, in order, for a
//! fenced code block and then for a JSON tool-call object. A fenced `json`
//! block that holds a tool call counts as a tool call, not as code.

use regex::Regex;
use std::sync::LazyLock;

use super::model::ModelResponse;
use super::step::{Action, ToolCall};

/// Fenced block with an optional language tag.
static FENCED_BLOCK_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?s)```([A-Za-z0-9_+-]*)[ \t]*\n(.*?)```").unwrap());

/// Parse `response` into an action.
///
/// The `Err` string is shown to the model as the step error, so it says what
/// a well-formed response looks like.
pub fn parse_response(response: &ModelResponse) -> Result<Action, String> {
    if !response.tool_calls.is_empty() {
        return Ok(Action::ToolCalls {
            calls: response.tool_calls.clone(),
        });
    }

    let text = response.text.trim();
    if text.is_empty() {
        return Err("Empty response. Call a tool or provide a code block.".to_string());
    }

    if let Some(captures) = FENCED_BLOCK_RE.captures(text) {
        let lang = captures.get(1).map(|m| m.as_str()).unwrap_or_default();
        let body = captures.get(2).map(|m| m.as_str()).unwrap_or_default().trim();
        if lang.eq_ignore_ascii_case("json") {
            if let Some(call) = tool_call_from_json(body) {
                return Ok(Action::ToolCalls { calls: vec![call] });
            }
        }
        if body.is_empty() {
            return Err("Empty code block.".to_string());
        }
        return Ok(Action::Code {
            source: body.to_string(),
        });
    }

    if let (Some(start), Some(end)) = (text.find('{'), text.rfind('}')) {
        if start < end {
            if let Some(call) = tool_call_from_json(&text[start..=end]) {
                return Ok(Action::ToolCalls { calls: vec![call] });
            }
        }
    }

    Err(
        "Could not find an action. Reply with a tool call such as \
         {\"name\": \"final_answer\", \"arguments\": {\"answer\": \"...\"}} \
         or a fenced code block."
            .to_string(),
    )
}

fn tool_call_from_json(raw: &str) -> Option<ToolCall> {
    let value: serde_json::Value = serde_json::from_str(raw).ok()?;
    let name = value.get("name")?.as_str()?.to_string();
    let arguments = value
        .get("arguments")
        .cloned()
        .unwrap_or(serde_json::Value::Object(Default::default()));
    Some(ToolCall { name, arguments })
}
