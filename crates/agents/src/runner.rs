use std::{collections::HashSet, sync::Arc};

use {
    kestrel_protocol::{InvocationRequest, InvocationResult},
    serde_json::Value,
    tokio_util::sync::CancellationToken,
    tracing::{debug, info, warn},
};

use crate::{
    model::{CompletionResponse, LlmProvider, Message, ToolCall},
    tool_registry::CapabilityInvoker,
};

/// Maximum number of tool-resolution rounds per user turn.
///
/// After the last round the model is queried once more so it can summarize;
/// tool calls in that final response are not executed.
pub const MAX_TOOL_ROUNDS: usize = 3;

/// Result of one user turn.
#[derive(Debug, Clone, PartialEq)]
pub struct TurnResult {
    pub text: String,
    /// Tool rounds executed during the turn.
    pub rounds: usize,
    pub tool_calls_made: usize,
    /// The round limit was hit while the model still wanted tools.
    pub exhausted: bool,
}

#[derive(Debug, thiserror::Error)]
pub enum RunnerError {
    #[error("model backend unreachable: {0:#}")]
    ModelBackendUnreachable(anyhow::Error),
    #[error("turn cancelled")]
    Cancelled,
}

/// Callback for streaming events out of the runner.
pub type OnEvent = Box<dyn Fn(RunnerEvent) + Send + Sync>;

/// Events emitted during a turn.
#[derive(Debug, Clone, PartialEq)]
pub enum RunnerEvent {
    /// Model is processing (show a "thinking" indicator).
    Thinking,
    /// Model answered (hide the indicator).
    ThinkingDone,
    ToolCallStart {
        id: String,
        name: String,
    },
    ToolCallEnd {
        id: String,
        name: String,
        success: bool,
    },
    /// A model query is about to start (1-based).
    Iteration(usize),
}

enum RoundOutcome {
    /// Plain answer, turn is over.
    Answer(Message),
    /// Assistant message followed by one tool message per call.
    Tools { messages: Vec<Message>, calls: usize },
    /// Tool calls requested past the round limit; they were dropped.
    Exhausted(Message),
}

/// One conversational session: the history plus the collaborators that
/// drive it. Only one turn can be in flight at a time (`run_turn` takes
/// `&mut self`).
pub struct ChatSession {
    provider: Arc<dyn LlmProvider>,
    invoker: Arc<dyn CapabilityInvoker>,
    tool_schemas: Vec<Value>,
    messages: Vec<Message>,
    on_event: Option<OnEvent>,
}

impl ChatSession {
    pub fn new(
        provider: Arc<dyn LlmProvider>,
        invoker: Arc<dyn CapabilityInvoker>,
        system_prompt: &str,
    ) -> Self {
        let tool_schemas = invoker.registry().function_schemas();
        Self {
            provider,
            invoker,
            tool_schemas,
            messages: vec![Message::system(system_prompt)],
            on_event: None,
        }
    }

    pub fn with_events(mut self, on_event: OnEvent) -> Self {
        self.on_event = Some(on_event);
        self
    }

    pub fn messages(&self) -> &[Message] {
        &self.messages
    }

    /// Run one user turn to completion.
    ///
    /// History only ever grows by whole rounds: when `cancel` fires or the
    /// backend fails, the in-flight round is dropped and everything appended
    /// before it stays.
    pub async fn run_turn(
        &mut self,
        user_text: &str,
        cancel: &CancellationToken,
    ) -> Result<TurnResult, RunnerError> {
        if cancel.is_cancelled() {
            return Err(RunnerError::Cancelled);
        }
        self.messages.push(Message::user(user_text));

        let mut rounds = 0;
        let mut tool_calls_made = 0;

        loop {
            let allow_tools = rounds < MAX_TOOL_ROUNDS;
            let outcome = tokio::select! {
                biased;
                () = cancel.cancelled() => {
                    info!(rounds, "turn cancelled, discarding in-flight round");
                    return Err(RunnerError::Cancelled);
                }
                outcome = self.round(rounds + 1, allow_tools) => outcome?,
            };

            match outcome {
                RoundOutcome::Answer(msg) => {
                    let text = msg.content.clone();
                    self.messages.push(msg);
                    info!(rounds, tool_calls = tool_calls_made, "turn complete");
                    return Ok(TurnResult {
                        text,
                        rounds,
                        tool_calls_made,
                        exhausted: false,
                    });
                },
                RoundOutcome::Exhausted(msg) => {
                    let text = msg.content.clone();
                    self.messages.push(msg);
                    return Ok(TurnResult {
                        text,
                        rounds,
                        tool_calls_made,
                        exhausted: true,
                    });
                },
                RoundOutcome::Tools { messages, calls } => {
                    self.messages.extend(messages);
                    rounds += 1;
                    tool_calls_made += calls;
                },
            }
        }
    }

    async fn round(&self, iteration: usize, allow_tools: bool) -> Result<RoundOutcome, RunnerError> {
        self.emit(RunnerEvent::Iteration(iteration));
        debug!(iteration, messages = self.messages.len(), "calling model");

        self.emit(RunnerEvent::Thinking);
        let response = self
            .provider
            .complete(&self.messages, &self.tool_schemas)
            .await;
        self.emit(RunnerEvent::ThinkingDone);

        let CompletionResponse {
            text,
            tool_calls,
            usage,
        } = response.map_err(|e| {
            warn!(
                provider = self.provider.name(),
                model = self.provider.id(),
                error = %e,
                "model request failed"
            );
            RunnerError::ModelBackendUnreachable(e)
        })?;
        debug!(
            iteration,
            model = self.provider.id(),
            input_tokens = usage.input_tokens,
            output_tokens = usage.output_tokens,
            tool_calls = tool_calls.len(),
            "model responded"
        );

        let text = text.unwrap_or_default();
        if tool_calls.is_empty() {
            return Ok(RoundOutcome::Answer(Message::assistant(text)));
        }
        if !allow_tools {
            warn!(
                max_rounds = MAX_TOOL_ROUNDS,
                dropped = tool_calls.len(),
                "tool round limit reached, ignoring requested calls"
            );
            return Ok(RoundOutcome::Exhausted(Message::assistant(text)));
        }

        let calls = normalize_call_ids(tool_calls, iteration);
        let mut messages = Vec::with_capacity(calls.len() + 1);
        messages.push(Message::assistant_with_calls(text, calls.clone()));
        for call in &calls {
            messages.push(self.execute_call(call).await);
        }
        Ok(RoundOutcome::Tools {
            messages,
            calls: calls.len(),
        })
    }

    async fn execute_call(&self, call: &ToolCall) -> Message {
        self.emit(RunnerEvent::ToolCallStart {
            id: call.id.clone(),
            name: call.name.clone(),
        });

        let id = Value::String(call.id.clone());
        let result = match call.arguments.parse() {
            Ok(params) => {
                let request = InvocationRequest::new(call.name.clone(), Value::Object(params), id);
                self.invoker.invoke(request).await
            },
            Err(e) => {
                warn!(tool = %call.name, error = %e, "model sent malformed tool call arguments");
                InvocationResult::err(id, e.to_string())
            },
        };

        if let Some(message) = result.error_message() {
            debug!(tool = %call.name, error = %message, "tool call failed, reporting to model");
        }
        self.emit(RunnerEvent::ToolCallEnd {
            id: call.id.clone(),
            name: call.name.clone(),
            success: result.is_success(),
        });

        Message::tool(call, result.to_value().to_string())
    }

    fn emit(&self, event: RunnerEvent) {
        if let Some(cb) = &self.on_event {
            cb(event);
        }
    }
}

/// Give every call in a response a unique, non-empty id so each tool message
/// answers exactly one call.
fn normalize_call_ids(calls: Vec<ToolCall>, iteration: usize) -> Vec<ToolCall> {
    let mut seen = HashSet::new();
    calls
        .into_iter()
        .enumerate()
        .map(|(i, mut call)| {
            if call.id.is_empty() || !seen.insert(call.id.clone()) {
                call.id = format!("call_{iteration}_{i}");
                seen.insert(call.id.clone());
            }
            call
        })
        .collect()
}
