//! Append-only conversation history for one request.

use serde::Serialize;
use serde_json::{Map, Value};

use crate::llm::types::{Message, Role};

/// Ordered messages exchanged during a single request.
///
/// Messages can only be appended; nothing is ever edited or removed.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct Conversation {
    messages: Vec<Message>,
}

impl Conversation {
    pub fn new() -> Self {
        Self::default()
    }

    /// A conversation opened by an optional system prompt and a user message.
    pub fn from_user(system_prompt: Option<&str>, user_message: impl Into<String>) -> Self {
        let mut conversation = Self::new();
        if let Some(prompt) = system_prompt.filter(|p| !p.trim().is_empty()) {
            conversation.push(Message::system(prompt));
        }
        conversation.push(Message::user(user_message));
        conversation
    }

    pub fn push(&mut self, message: Message) {
        self.messages.push(message);
    }

    pub fn messages(&self) -> &[Message] {
        &self.messages
    }

    pub fn len(&self) -> usize {
        self.messages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }

    /// The most recent non-empty assistant text, if any.
    pub fn last_assistant_text(&self) -> Option<&str> {
        self.messages
            .iter()
            .rev()
            .filter(|m| m.role == Role::Assistant)
            .map(|m| m.content.trim())
            .find(|text| !text.is_empty())
    }
}

impl From<Vec<Message>> for Conversation {
    fn from(messages: Vec<Message>) -> Self {
        Self { messages }
    }
}

/// Parse tool-call arguments into a key-value map.
///
/// An empty or whitespace-only string is an empty map.  Anything that is not
/// a JSON object is an error describing what was received.
pub fn parse_arguments(raw: &str) -> Result<Map<String, Value>, String> {
    let raw = raw.trim();
    if raw.is_empty() {
        return Ok(Map::new());
    }
    match serde_json::from_str::<Value>(raw) {
        Ok(Value::Object(map)) => Ok(map),
        Ok(Value::Null) => Ok(Map::new()),
        Ok(other) => Err(format!(
            "arguments must be a JSON object, got {}",
            json_type(&other)
        )),
        Err(e) => Err(format!("arguments are not valid JSON: {e}")),
    }
}

fn json_type(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "an array",
        Value::Object(_) => "an object",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn empty_arguments_are_empty_map() {
        assert!(parse_arguments("").unwrap().is_empty());
        assert!(parse_arguments("  \n").unwrap().is_empty());
        assert!(parse_arguments("null").unwrap().is_empty());
    }

    #[test]
    fn object_arguments_parse() {
        let map = parse_arguments(r#"{"command": "echo hi", "timeout": 5}"#).unwrap();
        assert_eq!(map["command"], json!("echo hi"));
        assert_eq!(map["timeout"], json!(5));
    }

    #[test]
    fn non_object_arguments_are_rejected() {
        assert!(parse_arguments("[1, 2]").unwrap_err().contains("an array"));
        assert!(parse_arguments("\"ls\"").unwrap_err().contains("a string"));
        assert!(parse_arguments("{not json").unwrap_err().contains("not valid JSON"));
    }

    #[test]
    fn system_prompt_is_optional() {
        let with = Conversation::from_user(Some("be brief"), "hi");
        assert_eq!(with.len(), 2);
        assert_eq!(with.messages()[0].role, Role::System);

        let without = Conversation::from_user(None, "hi");
        assert_eq!(without.len(), 1);
        assert_eq!(without.messages()[0].role, Role::User);
    }

    #[test]
    fn last_assistant_text_skips_empty_turns() {
        let mut conversation = Conversation::from_user(None, "hi");
        assert_eq!(conversation.last_assistant_text(), None);
        conversation.push(Message::assistant("checking"));
        conversation.push(Message::assistant_tool_calls("", Vec::new()));
        assert_eq!(conversation.last_assistant_text(), Some("checking"));
    }
}
