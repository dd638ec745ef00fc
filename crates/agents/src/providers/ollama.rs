use std::time::Duration;

use {
    anyhow::Context,
    async_trait::async_trait,
    serde_json::{Value, json},
    tracing::debug,
};

use crate::model::{CompletionResponse, LlmProvider, Message, RawArguments, Role, ToolCall, Usage};

/// Local Ollama server speaking `/api/chat` with native tool calling.
pub struct OllamaProvider {
    model: String,
    base_url: String,
    client: reqwest::Client,
}

impl OllamaProvider {
    pub fn new(base_url: &str, model: &str, timeout: Duration) -> anyhow::Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .context("failed to build HTTP client for Ollama")?;
        Ok(Self {
            model: model.to_string(),
            base_url: base_url.trim_end_matches('/').to_string(),
            client,
        })
    }

    fn convert_messages(messages: &[Message]) -> Vec<Value> {
        messages
            .iter()
            .map(|msg| match msg.role {
                Role::Assistant if !msg.tool_calls.is_empty() => {
                    let calls: Vec<Value> = msg
                        .tool_calls
                        .iter()
                        .map(|call| {
                            json!({
                                "id": call.id,
                                "type": "function",
                                "function": {
                                    "name": call.name,
                                    "arguments": call.arguments.to_object(),
                                }
                            })
                        })
                        .collect();
                    json!({
                        "role": "assistant",
                        "content": msg.content,
                        "tool_calls": calls,
                    })
                },
                Role::Tool => json!({
                    "role": "tool",
                    "content": msg.content,
                    "tool_call_id": msg.tool_call_id,
                    "tool_name": msg.tool_name,
                }),
                role => json!({
                    "role": role,
                    "content": msg.content,
                }),
            })
            .collect()
    }

    fn parse_tool_calls(message: &Value) -> Vec<ToolCall> {
        let Some(calls) = message["tool_calls"]
            .as_array()
            .or_else(|| message["toolCalls"].as_array())
        else {
            return Vec::new();
        };

        calls
            .iter()
            .filter_map(|call| {
                let function = &call["function"];
                let name = function["name"].as_str()?.to_string();
                let id = call["id"]
                    .as_str()
                    .filter(|id| !id.is_empty())
                    .map(str::to_string)
                    .unwrap_or_else(|| format!("call_{}", uuid::Uuid::new_v4().simple()));
                let arguments = match &function["arguments"] {
                    Value::String(text) => RawArguments::Text(text.clone()),
                    other => RawArguments::Structured(other.clone()),
                };
                Some(ToolCall {
                    id,
                    name,
                    arguments,
                })
            })
            .collect()
    }
}

#[async_trait]
impl LlmProvider for OllamaProvider {
    fn name(&self) -> &str {
        "ollama"
    }

    fn id(&self) -> &str {
        &self.model
    }

    async fn complete(
        &self,
        messages: &[Message],
        tools: &[Value],
    ) -> anyhow::Result<CompletionResponse> {
        let mut body = json!({
            "model": self.model,
            "messages": Self::convert_messages(messages),
            "stream": false,
        });
        if !tools.is_empty() {
            body["tools"] = Value::Array(tools.to_vec());
        }

        let url = format!("{}/api/chat", self.base_url);
        debug!(%url, model = %self.model, messages = messages.len(), "ollama request");

        let resp = self
            .client
            .post(&url)
            .json(&body)
            .send()
            .await
            .with_context(|| format!("failed to reach Ollama at {}", self.base_url))?;

        let status = resp.status();
        if !status.is_success() {
            let body_text = resp.text().await.unwrap_or_default();
            anyhow::bail!("Ollama returned HTTP {}: {}", status.as_u16(), body_text.trim());
        }

        let resp: Value = resp
            .json()
            .await
            .context("Ollama returned an unreadable response")?;

        let message = &resp["message"];
        if !message.is_object() {
            anyhow::bail!("Ollama response has no message");
        }

        let text = message["content"]
            .as_str()
            .filter(|s| !s.is_empty())
            .map(str::to_string);
        let tool_calls = Self::parse_tool_calls(message);

        let usage = Usage {
            input_tokens: resp["prompt_eval_count"].as_u64().unwrap_or(0) as u32,
            output_tokens: resp["eval_count"].as_u64().unwrap_or(0) as u32,
        };

        Ok(CompletionResponse {
            text,
            tool_calls,
            usage,
        })
    }
}

#[cfg(test)]
mod tests {
    use {super::*, mockito::Matcher};

    fn provider(url: &str) -> OllamaProvider {
        OllamaProvider::new(url, "mistral", Duration::from_secs(5)).unwrap()
    }

    #[tokio::test]
    async fn test_plain_text_reply() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("POST", "/api/chat")
            .match_body(Matcher::PartialJson(json!({
                "model": "mistral",
                "stream": false,
                "messages": [{ "role": "user", "content": "hello" }],
            })))
            .with_status(200)
            .with_body(
                r#"{"message":{"role":"assistant","content":"Hi there"},"prompt_eval_count":12,"eval_count":3,"done":true}"#,
            )
            .create_async()
            .await;

        let resp = provider(&server.url())
            .complete(&[Message::user("hello")], &[])
            .await
            .unwrap();
        mock.assert_async().await;
        assert_eq!(resp.text.as_deref(), Some("Hi there"));
        assert!(resp.tool_calls.is_empty());
        assert_eq!(resp.usage.input_tokens, 12);
        assert_eq!(resp.usage.output_tokens, 3);
    }

    #[tokio::test]
    async fn test_tool_calls_are_parsed() {
        let mut server = mockito::Server::new_async().await;
        let _mock = server
            .mock("POST", "/api/chat")
            .match_body(Matcher::PartialJson(json!({
                "tools": [{ "type": "function", "function": { "name": "scan" } }],
            })))
            .with_status(200)
            .with_body(
                r#"{"message":{"role":"assistant","content":"","tool_calls":[
                    {"function":{"name":"scan","arguments":{"target":"10.0.0.5"}}},
                    {"id":"c2","function":{"name":"msf_search","arguments":"{\"keyword\":\"smb\"}"}}
                ]}}"#,
            )
            .create_async()
            .await;

        let tools = vec![json!({ "type": "function", "function": { "name": "scan" } })];
        let resp = provider(&server.url())
            .complete(&[Message::user("scan it")], &tools)
            .await
            .unwrap();

        assert_eq!(resp.text, None);
        assert_eq!(resp.tool_calls.len(), 2);
        assert_eq!(resp.tool_calls[0].name, "scan");
        assert!(resp.tool_calls[0].id.starts_with("call_"));
        assert_eq!(
            resp.tool_calls[0].arguments,
            RawArguments::Structured(json!({ "target": "10.0.0.5" }))
        );
        assert_eq!(resp.tool_calls[1].id, "c2");
        assert_eq!(
            resp.tool_calls[1].arguments,
            RawArguments::Text(r#"{"keyword":"smb"}"#.into())
        );
    }

    #[tokio::test]
    async fn test_camel_case_tool_calls_accepted() {
        let mut server = mockito::Server::new_async().await;
        let _mock = server
            .mock("POST", "/api/chat")
            .with_status(200)
            .with_body(
                r#"{"message":{"role":"assistant","content":"","toolCalls":[{"function":{"name":"msf_sessions","arguments":{}}}]}}"#,
            )
            .create_async()
            .await;

        let resp = provider(&server.url())
            .complete(&[Message::user("sessions?")], &[])
            .await
            .unwrap();
        assert_eq!(resp.tool_calls.len(), 1);
        assert_eq!(resp.tool_calls[0].name, "msf_sessions");
    }

    #[tokio::test]
    async fn test_http_error_is_reported() {
        let mut server = mockito::Server::new_async().await;
        let _mock = server
            .mock("POST", "/api/chat")
            .with_status(404)
            .with_body(r#"{"error":"model 'mistral' not found"}"#)
            .create_async()
            .await;

        let err = provider(&server.url())
            .complete(&[Message::user("hi")], &[])
            .await
            .unwrap_err();
        let msg = format!("{err:#}");
        assert!(msg.contains("HTTP 404"));
        assert!(msg.contains("not found"));
    }

    #[tokio::test]
    async fn test_unreachable_backend_is_error() {
        let err = provider("http://127.0.0.1:1")
            .complete(&[Message::user("hi")], &[])
            .await
            .unwrap_err();
        assert!(format!("{err:#}").contains("failed to reach Ollama"));
    }

    #[test]
    fn test_text_arguments_replay_as_objects() {
        let calls = vec![
            ToolCall {
                id: "c1".into(),
                name: "msf_search".into(),
                arguments: RawArguments::Text(r#"{"keyword":"smb"}"#.into()),
            },
            ToolCall {
                id: "c2".into(),
                name: "scan".into(),
                arguments: RawArguments::Text("{\"target\":".into()),
            },
        ];
        let wire = OllamaProvider::convert_messages(&[Message::assistant_with_calls("", calls)]);
        let sent = &wire[0]["tool_calls"];
        assert_eq!(sent[0]["function"]["arguments"], json!({ "keyword": "smb" }));
        assert_eq!(sent[1]["function"]["arguments"], json!({}));
    }

    #[test]
    fn test_history_conversion() {
        let call = ToolCall {
            id: "call_1".into(),
            name: "scan".into(),
            arguments: RawArguments::Structured(json!({ "target": "10.0.0.5" })),
        };
        let messages = vec![
            Message::system("be careful"),
            Message::user("scan 10.0.0.5"),
            Message::assistant_with_calls("", vec![call.clone()]),
            Message::tool(&call, r#"{"result":"22/tcp open","id":"call_1"}"#),
        ];
        let wire = OllamaProvider::convert_messages(&messages);
        assert_eq!(wire[0], json!({ "role": "system", "content": "be careful" }));
        assert_eq!(wire[2]["tool_calls"][0]["function"]["name"], "scan");
        assert_eq!(
            wire[2]["tool_calls"][0]["function"]["arguments"]["target"],
            "10.0.0.5"
        );
        assert_eq!(wire[3]["role"], "tool");
        assert_eq!(wire[3]["tool_call_id"], "call_1");
        assert_eq!(wire[3]["tool_name"], "scan");
    }
}
