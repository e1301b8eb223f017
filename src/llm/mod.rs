//! Chat-completion client used by the LLM tool.

mod client;
mod types;

pub use client::LlmClient;
pub use types::{ChatRequest, ChatResponse, Choice, CompletionParams, Message, MessageRole, Usage};
