//! Deterministic, in-memory `ProviderPort` used by `conclave-runtime`'s own
//! test suite (`AgentExecutor`, `WorkflowEngine` step dispatch) so engine
//! tests never need network access.

use std::collections::VecDeque;
use std::sync::Mutex;

use async_trait::async_trait;
use conclave_core::{
    ConclaveError, ConclaveResult, ContentPart, FinishReason, Message, MessageRole,
    ProviderCapabilities, ProviderPort, ProviderRequest, ProviderResponse, StreamChunk, TokenUsage,
};
use futures::stream::{self, BoxStream};

/// A scripted provider response, queued up by test setup code.
#[derive(Debug, Clone)]
pub enum ScriptedReply {
    Text(String),
    ToolCall {
        id: String,
        name: String,
        arguments: serde_json::Value,
    },
    Error(MockFailure),
}

/// Failure mode a [`MockProvider`] can be scripted to return, mirroring the
/// error kinds real providers surface (spec.md §4.2).
#[derive(Debug, Clone, Copy)]
pub enum MockFailure {
    RateLimited,
    Timeout,
    Transient,
    ModelUnavailable,
}

impl MockFailure {
    fn into_error(self) -> ConclaveError {
        match self {
            MockFailure::RateLimited => ConclaveError::rate_limited("mock rate limit"),
            MockFailure::Timeout => ConclaveError::timeout("mock timeout"),
            MockFailure::Transient => ConclaveError::transient("mock transient failure"),
            MockFailure::ModelUnavailable => ConclaveError::model_unavailable("mock model unavailable"),
        }
    }
}

/// Deterministic `ProviderPort` backed by a FIFO queue of scripted replies.
/// If the queue is exhausted, falls back to echoing the last user message -
/// convenient for tests that only care about control flow, not content.
pub struct MockProvider {
    queue: Mutex<VecDeque<ScriptedReply>>,
}

impl Default for MockProvider {
    fn default() -> Self {
        Self::new()
    }
}

impl MockProvider {
    pub fn new() -> Self {
        Self {
            queue: Mutex::new(VecDeque::new()),
        }
    }

    pub fn with_replies(replies: impl IntoIterator<Item = ScriptedReply>) -> Self {
        Self {
            queue: Mutex::new(replies.into_iter().collect()),
        }
    }

    pub fn push_reply(&self, reply: ScriptedReply) {
        self.queue.lock().unwrap().push_back(reply);
    }

    fn next_reply(&self, request: &ProviderRequest) -> Result<ScriptedReply, ConclaveError> {
        if let Some(reply) = self.queue.lock().unwrap().pop_front() {
            return Ok(reply);
        }
        let echoed = request
            .messages
            .iter()
            .rev()
            .find(|m| m.role == MessageRole::User)
            .map(|m| m.text_content())
            .unwrap_or_default();
        Ok(ScriptedReply::Text(format!("echo: {echoed}")))
    }
}

#[async_trait]
impl ProviderPort for MockProvider {
    async fn complete(&self, request: ProviderRequest) -> ConclaveResult<ProviderResponse> {
        let reply = self.next_reply(&request)?;
        match reply {
            ScriptedReply::Text(text) => Ok(ProviderResponse {
                message: Message::text(MessageRole::Assistant, "mock", text),
                finish_reason: FinishReason::Stop,
                usage: TokenUsage {
                    prompt_tokens: 1,
                    completion_tokens: 1,
                },
            }),
            ScriptedReply::ToolCall { id, name, arguments } => Ok(ProviderResponse {
                message: Message {
                    role: MessageRole::Assistant,
                    content: vec![ContentPart::ToolCall { id, name, arguments }],
                    timestamp: chrono::Utc::now(),
                    sender_id: "mock".to_string(),
                    tool_call_id: None,
                    performative: None,
                },
                finish_reason: FinishReason::ToolCall,
                usage: TokenUsage {
                    prompt_tokens: 1,
                    completion_tokens: 1,
                },
            }),
            ScriptedReply::Error(failure) => Err(failure.into_error()),
        }
    }

    async fn stream(
        &self,
        request: ProviderRequest,
    ) -> ConclaveResult<BoxStream<'static, ConclaveResult<StreamChunk>>> {
        let response = self.complete(request).await?;
        let text = response.message.text_content();
        let chunks = vec![
            Ok(StreamChunk::TextDelta(text)),
            Ok(StreamChunk::Final {
                finish_reason: response.finish_reason,
                usage: response.usage,
            }),
        ];
        Ok(Box::pin(stream::iter(chunks)))
    }

    fn capabilities(&self) -> ProviderCapabilities {
        ProviderCapabilities {
            model_ids: ["mock:echo".to_string()].into_iter().collect(),
            supports_tools: true,
            supports_streaming: true,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn request(text: &str) -> ProviderRequest {
        ProviderRequest {
            model: "mock:echo".into(),
            messages: vec![Message::text(MessageRole::User, "user-1", text)],
            temperature: 0.7,
            max_tokens: None,
            tools: vec![],
        }
    }

    #[tokio::test]
    async fn empty_queue_echoes_last_user_message() {
        let provider = MockProvider::new();
        let response = provider.complete(request("hello")).await.unwrap();
        assert_eq!(response.message.text_content(), "echo: hello");
    }

    #[tokio::test]
    async fn scripted_replies_are_consumed_in_order() {
        let provider = MockProvider::with_replies([
            ScriptedReply::Text("first".into()),
            ScriptedReply::Text("second".into()),
        ]);
        let first = provider.complete(request("x")).await.unwrap();
        let second = provider.complete(request("x")).await.unwrap();
        assert_eq!(first.message.text_content(), "first");
        assert_eq!(second.message.text_content(), "second");
    }

    #[tokio::test]
    async fn scripted_error_is_returned_with_matching_kind() {
        let provider = MockProvider::with_replies([ScriptedReply::Error(MockFailure::RateLimited)]);
        let err = provider.complete(request("x")).await.unwrap_err();
        assert_eq!(err.kind(), "rate_limited");
    }
}
