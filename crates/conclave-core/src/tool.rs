//! Tool capability contract (spec.md §4.3). `conclave-core` only defines the
//! trait surface; `conclave-tools` supplies the registry, policy gate, and
//! built-in implementations.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;

use crate::error::ConclaveResult;

/// Where a tool implementation comes from, mirrored from `AgentSpec.tools`
/// (teacher's `aof-core::agent::ToolSource`, minus the full MCP client —
/// MCP tools are described but dispatched through `conclave-mcp`).
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ToolSource {
    #[default]
    Builtin,
    Mcp,
}

/// Declared side-effect class for a tool (spec.md §4.3). Governs the
/// allowlist-or-`policy_denied` gate in `conclave-tools::policy`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SideEffectClass {
    Pure,
    Read,
    Write,
    External,
}

/// Descriptor exposed to prompt assembly and policy evaluation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolDefinition {
    pub name: String,
    pub description: String,
    pub parameters: serde_json::Value,
    pub side_effect_class: SideEffectClass,
}

/// Arguments passed to a tool invocation.
#[derive(Debug, Clone)]
pub struct ToolInput {
    pub args: serde_json::Value,
    pub cancel: crate::cancel::CancelToken,
}

impl ToolInput {
    pub fn new(args: serde_json::Value) -> Self {
        Self {
            args,
            cancel: crate::cancel::CancelToken::new(),
        }
    }

    pub fn with_cancel(mut self, cancel: crate::cancel::CancelToken) -> Self {
        self.cancel = cancel;
        self
    }
}

/// Result of a tool invocation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolResult {
    pub success: bool,
    pub output: serde_json::Value,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub execution_time_ms: u64,
}

impl ToolResult {
    pub fn success(output: serde_json::Value) -> Self {
        Self {
            success: true,
            output,
            error: None,
            execution_time_ms: 0,
        }
    }

    pub fn failure(error: impl Into<String>) -> Self {
        Self {
            success: false,
            output: serde_json::Value::Null,
            error: Some(error.into()),
            execution_time_ms: 0,
        }
    }

    pub fn with_execution_time(mut self, ms: u64) -> Self {
        self.execution_time_ms = ms;
        self
    }
}

/// A single invokable capability (spec.md §4.3 `Register(descriptor, handler)`).
#[async_trait]
pub trait Tool: Send + Sync {
    async fn execute(&self, input: ToolInput) -> ConclaveResult<ToolResult>;
    fn definition(&self) -> ToolDefinition;
}

/// Dispatch surface consumed by `AgentExecutor` and `WorkflowEngine`'s
/// `tool`-kind steps (teacher's `ToolExecutor` trait, unchanged shape).
#[async_trait]
pub trait ToolExecutor: Send + Sync {
    async fn execute_tool(&self, name: &str, input: ToolInput) -> ConclaveResult<ToolResult>;
    fn list_tools(&self) -> Vec<ToolDefinition>;
    fn get_tool(&self, name: &str) -> Option<Arc<dyn Tool>>;
}

/// Tool-call part emitted by a provider response, echoed back as a
/// `ContentPart::ToolCall` in the transcript.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolCall {
    pub id: String,
    pub name: String,
    pub arguments: serde_json::Value,
}

/// Free-form per-tool configuration map, as loaded from `AgentSpec.config`
/// or a direct `ToolRegistry::register` call.
pub type ToolConfig = HashMap<String, serde_json::Value>;
