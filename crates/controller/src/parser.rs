//! Parser for plain-text provider responses.
//!
//! Some providers cannot return structured tool calls. When enabled, the
//! runtime runs their text through [`ActionParser`] to recover `ACTION:`/`ARGS:`
//! tool calls and `FINAL ANSWER:` prefixes.

use serde_json::Value;

/// Action recovered from response text.
#[derive(Debug, Clone, PartialEq)]
pub enum ParsedAction {
    /// Call a tool with arguments.
    ToolCall { name: String, args: Value },
    /// Final answer - task complete.
    FinalAnswer(String),
}

/// Parser for provider text, supporting JSON and line-oriented formats.
#[derive(Debug, Default, Clone, Copy)]
pub struct ActionParser;

impl ActionParser {
    pub fn new() -> Self {
        Self
    }

    /// Parse response text. Text matching no known format is a final answer.
    pub fn parse(&self, response: &str) -> ParsedAction {
        let response_trimmed = response.trim();

        if let Some(answer) = find_final_answer(response_trimmed) {
            return ParsedAction::FinalAnswer(answer);
        }

        if let Some(action) = self.try_parse_function_call(response_trimmed) {
            return action;
        }

        if let Some(action) = self.try_parse_text_format(response_trimmed) {
            return action;
        }

        ParsedAction::FinalAnswer(response_trimmed.to_string())
    }

    /// Try to parse an OpenAI-style function call from JSON.
    fn try_parse_function_call(&self, response: &str) -> Option<ParsedAction> {
        if !(response.starts_with('{') || response.starts_with('[')) {
            return None;
        }
        let json = serde_json::from_str::<Value>(response).ok()?;
        match json.as_array() {
            Some(calls) => calls.first().and_then(extract_tool_call),
            None => extract_tool_call(&json),
        }
    }

    /// Try to parse the ACTION/ARGS text format.
    fn try_parse_text_format(&self, response: &str) -> Option<ParsedAction> {
        let mut tool_name = None;
        let mut args_json = None;

        for line in response.lines().map(str::trim) {
            if let Some(name) = line.strip_prefix("ACTION:") {
                tool_name = Some(name.trim().to_string());
            } else if let Some(args) = line.strip_prefix("ARGS:") {
                args_json = Some(args.trim().to_string());
            }
        }

        let name = tool_name.filter(|n| !n.is_empty())?;
        let args = match args_json {
            Some(raw) => serde_json::from_str(&raw).ok()?,
            None => Value::Object(Default::default()),
        };
        Some(ParsedAction::ToolCall { name, args })
    }
}

fn find_final_answer(response: &str) -> Option<String> {
    let idx = response.find("FINAL ANSWER:")?;
    Some(response[idx + "FINAL ANSWER:".len()..].trim().to_string())
}

fn extract_tool_call(json: &Value) -> Option<ParsedAction> {
    // { "function": { "name": "...", "arguments": "<json string>" } }
    if let Some(func) = json.get("function") {
        let name = func.get("name")?.as_str()?.to_string();
        let args = match func.get("arguments") {
            Some(Value::String(raw)) => serde_json::from_str(raw).ok()?,
            Some(other) => other.clone(),
            None => Value::Object(Default::default()),
        };
        return Some(ParsedAction::ToolCall { name, args });
    }

    // { "name": "...", "arguments": {...} }
    let name = json.get("name")?.as_str()?.to_string();
    let args = json
        .get("arguments")
        .cloned()
        .unwrap_or_else(|| Value::Object(Default::default()));
    Some(ParsedAction::ToolCall { name, args })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_final_answer() {
        let action = ActionParser::new().parse("THOUGHT: easy.\nFINAL ANSWER: The result is 42.");
        assert_eq!(action, ParsedAction::FinalAnswer("The result is 42.".into()));
    }

    #[test]
    fn test_parse_text_tool_call() {
        let action = ActionParser::new()
            .parse("THOUGHT: I need to search.\nACTION: search\nARGS: {\"query\": \"rust\"}");
        match action {
            ParsedAction::ToolCall { name, args } => {
                assert_eq!(name, "search");
                assert_eq!(args["query"], "rust");
            }
            _ => panic!("Expected ToolCall"),
        }
    }

    #[test]
    fn test_parse_json_function_call() {
        let action = ActionParser::new()
            .parse(r#"{"function": {"name": "calculator", "arguments": "{\"a\": 5}"}}"#);
        match action {
            ParsedAction::ToolCall { name, args } => {
                assert_eq!(name, "calculator");
                assert_eq!(args["a"], 5);
            }
            _ => panic!("Expected ToolCall"),
        }
    }

    #[test]
    fn test_malformed_args_fall_back_to_answer() {
        let action = ActionParser::new().parse("ACTION: search\nARGS: {not json");
        assert!(matches!(action, ParsedAction::FinalAnswer(_)));
    }

    #[test]
    fn test_plain_text_is_answer() {
        let action = ActionParser::new().parse("  Paris is the capital.  ");
        assert_eq!(action, ParsedAction::FinalAnswer("Paris is the capital.".into()));
    }
}
