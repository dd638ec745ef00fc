use {
    async_trait::async_trait,
    serde::{Deserialize, Serialize},
    serde_json::{Map, Value},
};

/// Model backend trait (Ollama today; anything with function calling fits).
#[async_trait]
pub trait LlmProvider: Send + Sync {
    fn name(&self) -> &str;

    /// Model identifier (e.g. "mistral", "llama3.1:70b").
    fn id(&self) -> &str;

    /// Send the full conversation plus tool advertisements, get one assistant message back.
    ///
    /// An `Err` means the backend itself could not be reached or answered
    /// garbage; it aborts the current turn.
    async fn complete(
        &self,
        messages: &[Message],
        tools: &[Value],
    ) -> anyhow::Result<CompletionResponse>;
}

/// Response from a model completion call.
#[derive(Debug, Clone)]
pub struct CompletionResponse {
    pub text: Option<String>,
    pub tool_calls: Vec<ToolCall>,
    pub usage: Usage,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Usage {
    pub input_tokens: u32,
    pub output_tokens: u32,
}

// ── Conversation messages ────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
    Tool,
}

/// One entry of the conversation history.
#[derive(Debug, Clone, PartialEq)]
pub struct Message {
    pub role: Role,
    pub content: String,
    /// Calls requested by an assistant message.
    pub tool_calls: Vec<ToolCall>,
    /// For tool messages: the id of the call this message answers.
    pub tool_call_id: Option<String>,
    /// For tool messages: the capability that produced the content.
    pub tool_name: Option<String>,
}

impl Message {
    fn plain(role: Role, content: impl Into<String>) -> Self {
        Self {
            role,
            content: content.into(),
            tool_calls: Vec::new(),
            tool_call_id: None,
            tool_name: None,
        }
    }

    pub fn system(content: impl Into<String>) -> Self {
        Self::plain(Role::System, content)
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self::plain(Role::User, content)
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self::plain(Role::Assistant, content)
    }

    pub fn assistant_with_calls(content: impl Into<String>, tool_calls: Vec<ToolCall>) -> Self {
        Self {
            tool_calls,
            ..Self::plain(Role::Assistant, content)
        }
    }

    pub fn tool(call: &ToolCall, content: impl Into<String>) -> Self {
        Self {
            tool_call_id: Some(call.id.clone()),
            tool_name: Some(call.name.clone()),
            ..Self::plain(Role::Tool, content)
        }
    }
}

// ── Tool calls ───────────────────────────────────────────────────────────────

/// A capability invocation requested by the model.
#[derive(Debug, Clone, PartialEq)]
pub struct ToolCall {
    pub id: String,
    pub name: String,
    pub arguments: RawArguments,
}

/// Arguments exactly as the model emitted them.
#[derive(Debug, Clone, PartialEq)]
pub enum RawArguments {
    /// Already-decoded JSON (Ollama sends objects).
    Structured(Value),
    /// Encoded JSON text (OpenAI-style backends send strings), possibly malformed.
    Text(String),
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("malformed tool call arguments: {reason}")]
pub struct MalformedArguments {
    pub reason: String,
}

impl MalformedArguments {
    fn new(reason: impl Into<String>) -> Self {
        Self {
            reason: reason.into(),
        }
    }
}

impl RawArguments {
    /// Decode into an argument object.
    ///
    /// Absent arguments (`null`, empty or whitespace-only text) are an
    /// intentionally empty call. Anything that is not a JSON object is malformed.
    pub fn parse(&self) -> Result<Map<String, Value>, MalformedArguments> {
        match self {
            RawArguments::Structured(Value::Object(map)) => Ok(map.clone()),
            RawArguments::Structured(Value::Null) => Ok(Map::new()),
            RawArguments::Structured(other) => Err(MalformedArguments::new(format!(
                "expected a JSON object, got {}",
                json_kind(other)
            ))),
            RawArguments::Text(text) if text.trim().is_empty() => Ok(Map::new()),
            RawArguments::Text(text) => match serde_json::from_str::<Value>(text) {
                Ok(Value::Object(map)) => Ok(map),
                Ok(other) => Err(MalformedArguments::new(format!(
                    "expected a JSON object, got {}",
                    json_kind(&other)
                ))),
                Err(e) => Err(MalformedArguments::new(e.to_string())),
            },
        }
    }

    /// Argument object to echo back when replaying history. Anything that
    /// does not decode to an object is sent as `{}`.
    pub fn to_object(&self) -> Value {
        Value::Object(self.parse().unwrap_or_default())
    }
}

fn json_kind(v: &Value) -> &'static str {
    match v {
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
    use {super::*, serde_json::json};

    #[test]
    fn structured_object_parses() {
        let args = RawArguments::Structured(json!({ "target": "10.0.0.5" }));
        assert_eq!(args.parse().unwrap()["target"], "10.0.0.5");
    }

    #[test]
    fn empty_arguments_are_not_malformed() {
        assert!(RawArguments::Text(String::new()).parse().unwrap().is_empty());
        assert!(RawArguments::Text("  \n".into()).parse().unwrap().is_empty());
        assert!(RawArguments::Structured(Value::Null).parse().unwrap().is_empty());
    }

    #[test]
    fn text_object_parses() {
        let args = RawArguments::Text(r#"{"keyword": "smb"}"#.into());
        assert_eq!(args.parse().unwrap()["keyword"], "smb");
    }

    #[test]
    fn broken_json_is_malformed() {
        let err = RawArguments::Text(r#"{"keyword": "smb""#.into())
            .parse()
            .unwrap_err();
        assert!(err.to_string().starts_with("malformed tool call arguments"));
    }

    #[test]
    fn non_object_is_malformed() {
        let err = RawArguments::Structured(json!(["-F"])).parse().unwrap_err();
        assert_eq!(err.reason, "expected a JSON object, got an array");

        let err = RawArguments::Text("\"scan\"".into()).parse().unwrap_err();
        assert_eq!(err.reason, "expected a JSON object, got a string");
    }

    #[test]
    fn replayed_arguments_are_always_objects() {
        let text = RawArguments::Text(r#"{"keyword": "smb"}"#.into());
        assert_eq!(text.to_object(), json!({ "keyword": "smb" }));
        assert_eq!(RawArguments::Text("{broken".into()).to_object(), json!({}));
        assert_eq!(RawArguments::Structured(json!(["-F"])).to_object(), json!({}));
    }

    #[test]
    fn tool_message_carries_call_id() {
        let call = ToolCall {
            id: "call_1".into(),
            name: "scan".into(),
            arguments: RawArguments::Structured(json!({})),
        };
        let msg = Message::tool(&call, "{}");
        assert_eq!(msg.role, Role::Tool);
        assert_eq!(msg.tool_call_id.as_deref(), Some("call_1"));
        assert_eq!(msg.tool_name.as_deref(), Some("scan"));
    }
}
