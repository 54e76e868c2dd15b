//! `AgentExecutor`: one agent turn, end to end (spec.md §4.4). Grounded in
//! the teacher's `aof-runtime::executor::agent_executor::AgentExecutor`
//! turn loop (resolve config, build transcript, call the model, dispatch
//! any tool calls, loop until a stop condition), generalized from the
//! teacher's single bundled `aof_llm` model + `aof_core::AgentContext`
//! shape onto `conclave_core`'s `ProviderPort`/`ToolExecutor`/`Memory`
//! capability traits and the `SpecRegistry` inheritance resolver.

use std::sync::Arc;

use conclave_core::{
    CancelToken, ConclaveError, ConclaveResult, ContentPart, EffectiveSpec, ExecutionMetadata,
    FinishReason, Memory, Message, MessageRole, ProviderPort, ProviderRequest, RetryConfig,
    SpecRegistry, ToolExecutor, ToolInput,
};
use rand::Rng;
use tracing::{debug, info, warn};
use ulid::Ulid;

use crate::events::{Event, EventBus, EventKind};

/// Safety valve on the tool-call loop within a single turn. Not a spec.md
/// invariant - a provider that always returns `FinishReason::ToolCall`
/// would otherwise spin forever.
const MAX_TOOL_ITERATIONS: u32 = 25;

/// Outcome of one `AgentExecutor::execute` call.
#[derive(Debug, Clone)]
pub struct TurnResult {
    pub execution_id: Ulid,
    pub transcript: Vec<Message>,
    pub final_text: String,
    pub usage: ExecutionMetadata,
}

/// Executes one agent turn against a resolved [`EffectiveSpec`] (spec.md
/// §4.4 `Execute`). Holds no per-turn state itself; every call is
/// independent, so one `AgentExecutor` can be shared across concurrent
/// workflow steps.
pub struct AgentExecutor {
    registry: Arc<SpecRegistry>,
    provider: Arc<dyn ProviderPort>,
    tools: Arc<dyn ToolExecutor>,
    memory: Option<Arc<dyn Memory>>,
    events: Arc<EventBus>,
}

impl AgentExecutor {
    pub fn new(
        registry: Arc<SpecRegistry>,
        provider: Arc<dyn ProviderPort>,
        tools: Arc<dyn ToolExecutor>,
        events: Arc<EventBus>,
    ) -> Self {
        Self {
            registry,
            provider,
            tools,
            memory: None,
            events,
        }
    }

    pub fn with_memory(mut self, memory: Arc<dyn Memory>) -> Self {
        self.memory = Some(memory);
        self
    }

    /// **Execute(agent_name, task, inputs)** (spec.md §4.4):
    /// 1. Resolve `agent_name` through the `SpecRegistry`.
    /// 2. Build the initial transcript: system prompt, then the task as a
    ///    user message.
    /// 3. Call the provider; on `Stop`, return. On `ToolCall`, dispatch
    ///    every call through the tool executor, append results, and loop.
    ///    On `Length`, return what was produced with a truncation note.
    /// 4. Retry the provider call with jittered backoff on retryable
    ///    errors, up to `retry.max_attempts`.
    pub async fn execute(
        &self,
        agent_name: &str,
        task: &str,
        retry: &RetryConfig,
        cancel: CancelToken,
        correlation_id: Ulid,
    ) -> ConclaveResult<TurnResult> {
        let execution_id = Ulid::new();
        let effective = self.registry.resolve(agent_name)?;

        self.events.publish(Event::new(
            EventKind::AgentTurnStarted,
            correlation_id,
            serde_json::json!({"execution_id": execution_id.to_string(), "agent": agent_name}),
        ));

        match self.run_turn(&effective, task, retry, &cancel, execution_id).await {
            Ok(result) => {
                self.events.publish(Event::new(
                    EventKind::AgentTurnCompleted,
                    correlation_id,
                    serde_json::json!({
                        "execution_id": execution_id.to_string(),
                        "prompt_tokens": result.usage.prompt_tokens,
                        "completion_tokens": result.usage.completion_tokens,
                    }),
                ));
                Ok(result)
            }
            Err(err) => {
                self.events.publish(Event::new(
                    EventKind::AgentTurnFailed,
                    correlation_id,
                    serde_json::json!({"execution_id": execution_id.to_string(), "kind": err.kind()}),
                ));
                Err(err)
            }
        }
    }

    async fn run_turn(
        &self,
        effective: &Arc<EffectiveSpec>,
        task: &str,
        retry: &RetryConfig,
        cancel: &CancelToken,
        execution_id: Ulid,
    ) -> ConclaveResult<TurnResult> {
        let mut transcript = Vec::new();
        if let Some(prompt) = &effective.system_prompt {
            transcript.push(Message::text(MessageRole::System, "system", prompt.clone()));
        }
        transcript.push(Message::text(MessageRole::User, "user", task.to_string()));

        let mut usage = ExecutionMetadata::default();
        let tool_defs = self.tools.list_tools();

        for iteration in 0..MAX_TOOL_ITERATIONS {
            if cancel.is_cancelled() {
                return Err(ConclaveError::cancelled(format!(
                    "agent turn {execution_id} cancelled"
                )));
            }

            let request = ProviderRequest {
                model: effective.model.clone(),
                messages: transcript.clone(),
                temperature: effective.temperature,
                max_tokens: effective.max_tokens,
                tools: tool_defs.clone(),
            };

            let response = self.complete_with_retry(request, retry, cancel).await?;
            usage.prompt_tokens += response.usage.prompt_tokens;
            usage.completion_tokens += response.usage.completion_tokens;

            match response.finish_reason {
                FinishReason::Stop | FinishReason::Error => {
                    let final_text = response.message.text_content();
                    transcript.push(response.message);
                    if let Some(memory) = &self.memory {
                        self.persist_transcript(memory.as_ref(), execution_id, &transcript).await;
                    }
                    return Ok(TurnResult {
                        execution_id,
                        transcript,
                        final_text,
                        usage,
                    });
                }
                FinishReason::Length => {
                    let final_text = response.message.text_content();
                    warn!(execution_id = %execution_id, "provider truncated response at max_tokens");
                    transcript.push(response.message);
                    return Ok(TurnResult {
                        execution_id,
                        transcript,
                        final_text,
                        usage,
                    });
                }
                FinishReason::ToolCall => {
                    let calls: Vec<(String, String, serde_json::Value)> = response
                        .message
                        .content
                        .iter()
                        .filter_map(|part| match part {
                            ContentPart::ToolCall { id, name, arguments } => {
                                Some((id.clone(), name.clone(), arguments.clone()))
                            }
                            _ => None,
                        })
                        .collect();
                    transcript.push(response.message);

                    for (id, name, arguments) in calls {
                        debug!(execution_id = %execution_id, tool = %name, "dispatching tool call");
                        let input = ToolInput::new(arguments).with_cancel(cancel.child());
                        let result = self.tools.execute_tool(&name, input).await;
                        usage.tool_call_count += 1;

                        let payload = match result {
                            Ok(r) => r.output,
                            Err(e) => serde_json::json!({"error": e.to_string()}),
                        };
                        transcript.push(Message {
                            role: MessageRole::Tool,
                            content: vec![ContentPart::ToolResult {
                                tool_call_id: id.clone(),
                                result: payload,
                            }],
                            timestamp: chrono::Utc::now(),
                            sender_id: name,
                            tool_call_id: Some(id),
                            performative: None,
                        });
                    }
                    let _ = iteration;
                }
            }
        }

        Err(ConclaveError::resource_exhausted(format!(
            "agent turn {execution_id} exceeded {MAX_TOOL_ITERATIONS} tool-call iterations"
        )))
    }

    /// Retries a provider call with jittered exponential backoff (spec.md
    /// §4.4: base 1s, factor 2, max 30s, jitter +/-20%), stopping as soon as
    /// an error is not retryable or attempts are exhausted.
    async fn complete_with_retry(
        &self,
        request: ProviderRequest,
        retry: &RetryConfig,
        cancel: &CancelToken,
    ) -> ConclaveResult<conclave_core::ProviderResponse> {
        let mut attempt = 0;
        loop {
            attempt += 1;
            tokio::select! {
                result = self.provider.complete(request.clone()) => {
                    match result {
                        Ok(response) => return Ok(response),
                        Err(err) if err.is_retryable() && attempt < retry.max_attempts => {
                            let jitter_unit = rand::thread_rng().gen_range(-1.0..=1.0);
                            let delay = retry.delay_ms(attempt, jitter_unit);
                            warn!(attempt, kind = err.kind(), delay_ms = delay, "retrying provider call");
                            tokio::time::sleep(std::time::Duration::from_millis(delay)).await;
                        }
                        Err(err) => return Err(err),
                    }
                }
                _ = cancel.cancelled() => {
                    return Err(ConclaveError::cancelled("provider call cancelled"));
                }
            }
        }
    }

    async fn persist_transcript(&self, memory: &dyn Memory, execution_id: Ulid, transcript: &[Message]) {
        let key = format!("transcript:{execution_id}");
        let value = serde_json::to_value(transcript).unwrap_or(serde_json::Value::Null);
        if let Err(err) = memory.store(&key, conclave_core::MemoryEntry::new(key.clone(), value)).await {
            warn!(execution_id = %execution_id, error = %err, "failed to persist transcript");
        } else {
            info!(execution_id = %execution_id, "transcript persisted");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use conclave_core::{AgentSpec, RegistryConfig};
    use conclave_llm::mock::{MockFailure, MockProvider, ScriptedReply};
    use conclave_tools::ToolRegistry;
    use std::collections::HashMap;

    fn base_spec(name: &str) -> AgentSpec {
        AgentSpec {
            name: name.into(),
            parent: None,
            provider: None,
            model: "mock:echo".into(),
            temperature: Some(0.5),
            max_tokens: None,
            system_prompt: Some("You are terse.".into()),
            tools: vec![],
            skills: vec![],
            metadata: HashMap::new(),
            config: HashMap::new(),
        }
    }

    fn executor(provider: MockProvider) -> AgentExecutor {
        let registry = Arc::new(SpecRegistry::new(RegistryConfig::default()));
        registry.register(base_spec("echoer"), false).unwrap();
        let tools = Arc::new(ToolRegistry::new().into_executor());
        AgentExecutor::new(registry, Arc::new(provider), tools, Arc::new(EventBus::default()))
    }

    #[tokio::test]
    async fn happy_path_single_turn() {
        let exec = executor(MockProvider::with_replies([ScriptedReply::Text("hi there".into())]));
        let result = exec
            .execute("echoer", "hello", &RetryConfig::default(), CancelToken::new(), Ulid::new())
            .await
            .unwrap();
        assert_eq!(result.final_text, "hi there");
        assert_eq!(result.usage.prompt_tokens, 1);
    }

    #[tokio::test]
    async fn retryable_failure_is_retried_then_succeeds() {
        let exec = executor(MockProvider::with_replies([
            ScriptedReply::Error(MockFailure::Transient),
            ScriptedReply::Text("recovered".into()),
        ]));
        let mut retry = RetryConfig::default();
        retry.base_delay_ms = 1;
        let result = exec
            .execute("echoer", "hello", &retry, CancelToken::new(), Ulid::new())
            .await
            .unwrap();
        assert_eq!(result.final_text, "recovered");
    }

    #[tokio::test]
    async fn non_retryable_failure_propagates_immediately() {
        let exec = executor(MockProvider::with_replies([ScriptedReply::Error(MockFailure::ModelUnavailable)]));
        let err = exec
            .execute("echoer", "hello", &RetryConfig::default(), CancelToken::new(), Ulid::new())
            .await
            .unwrap_err();
        assert_eq!(err.kind(), "model_unavailable");
    }

    #[tokio::test]
    async fn cancelled_token_short_circuits_the_turn() {
        let exec = executor(MockProvider::new());
        let cancel = CancelToken::new();
        cancel.cancel();
        let err = exec
            .execute("echoer", "hello", &RetryConfig::default(), cancel, Ulid::new())
            .await
            .unwrap_err();
        assert_eq!(err.kind(), "cancelled");
    }

    #[tokio::test]
    async fn unknown_agent_is_not_found() {
        let exec = executor(MockProvider::new());
        let err = exec
            .execute("ghost", "hello", &RetryConfig::default(), CancelToken::new(), Ulid::new())
            .await
            .unwrap_err();
        assert_eq!(err.kind(), "not_found");
    }
}
