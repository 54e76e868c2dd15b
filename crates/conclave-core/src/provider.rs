//! `ProviderPort` capability contract (spec.md §4.2). An opaque abstraction
//! over LLM backends; the core only ever depends on this trait, never a
//! concrete provider crate (mirrors the teacher's `aof-core`/`aof-llm` split).

use async_trait::async_trait;
use futures::stream::BoxStream;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;

use crate::agent::Message;
use crate::error::ConclaveResult;
use crate::tool::ToolDefinition;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProviderRequest {
    pub model: String,
    pub messages: Vec<Message>,
    pub temperature: f32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_tokens: Option<usize>,
    #[serde(default)]
    pub tools: Vec<ToolDefinition>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FinishReason {
    Stop,
    Length,
    ToolCall,
    Error,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TokenUsage {
    pub prompt_tokens: u64,
    pub completion_tokens: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProviderResponse {
    pub message: Message,
    pub finish_reason: FinishReason,
    pub usage: TokenUsage,
}

/// A single delta chunk of a streamed completion (spec.md §4.2 `Stream`).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum StreamChunk {
    TextDelta(String),
    ToolCallDelta { id: String, name: String, arguments_delta: String },
    Final { finish_reason: FinishReason, usage: TokenUsage },
}

#[derive(Debug, Clone, Default)]
pub struct ProviderCapabilities {
    pub model_ids: HashSet<String>,
    pub supports_tools: bool,
    pub supports_streaming: bool,
}

/// Capability contract abstracting an LLM backend (spec.md §4.2).
///
/// Implementations are responsible for surfacing the typed error kinds
/// spec.md §4.2 lists (`rate_limited`, `auth`, `model_unavailable`,
/// `quota_exceeded`, `bad_request`, `transient`, `timeout`) rather than an
/// opaque failure — `AgentExecutor` branches its retry behavior on them.
#[async_trait]
pub trait ProviderPort: Send + Sync {
    async fn complete(&self, request: ProviderRequest) -> ConclaveResult<ProviderResponse>;

    async fn stream(
        &self,
        request: ProviderRequest,
    ) -> ConclaveResult<BoxStream<'static, ConclaveResult<StreamChunk>>>;

    fn capabilities(&self) -> ProviderCapabilities;
}
