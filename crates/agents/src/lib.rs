//! Agent runtime: model backend trait, capability registry, the bounded
//! orchestration loop and the default system prompt.

pub mod model;
pub mod prompt;
pub mod providers;
pub mod runner;
pub mod tool_registry;

pub use {
    model::{CompletionResponse, LlmProvider, Message, RawArguments, Role, ToolCall, Usage},
    runner::{ChatSession, MAX_TOOL_ROUNDS, OnEvent, RunnerError, RunnerEvent, TurnResult},
    tool_registry::{
        CapabilityDescriptor, CapabilityInvoker, CapabilityRegistry, ParamKind, ParamSpec,
        RegistryError, SchemaViolation,
    },
};
