//! Agent data model: declarative [`AgentSpec`], its resolved [`EffectiveSpec`],
//! and the live, per-execution [`Agent`] entity (spec.md §3).

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use crate::tool::ToolSource;

/// Name pattern shared by workflow and agent names: `[a-z0-9][a-z0-9_-]*`, 1-64 chars.
pub fn is_valid_name(name: &str) -> bool {
    if name.is_empty() || name.len() > 64 {
        return false;
    }
    let mut chars = name.chars();
    let first_ok = chars.next().map(|c| c.is_ascii_lowercase() || c.is_ascii_digit()).unwrap_or(false);
    first_ok
        && name
            .chars()
            .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '_' || c == '-')
}

/// Tool reference on an [`AgentSpec`]. Supports a bare name (built-in,
/// backward-compatible) or a qualified source for MCP-backed tools.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ToolSpec {
    Simple(String),
    Qualified(QualifiedToolSpec),
}

impl ToolSpec {
    pub fn name(&self) -> &str {
        match self {
            ToolSpec::Simple(name) => name,
            ToolSpec::Qualified(spec) => &spec.name,
        }
    }

    pub fn source(&self) -> ToolSource {
        match self {
            ToolSpec::Simple(_) => ToolSource::Builtin,
            ToolSpec::Qualified(spec) => spec.source,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QualifiedToolSpec {
    pub name: String,
    #[serde(default)]
    pub source: ToolSource,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub server: Option<String>,
}

/// Declarative agent definition (spec.md §3 `AgentSpec`).
///
/// Supports both a flat document and the teacher's Kubernetes-style
/// `apiVersion`/`kind`/`metadata`/`spec` envelope.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(from = "AgentSpecInput")]
pub struct AgentSpec {
    pub name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub parent: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub provider: Option<String>,
    pub model: String,
    /// `None` means "not set on this spec" - distinct from an explicit
    /// `0.7`, so `SpecRegistry::resolve`'s bottom-up merge (spec.md §3:
    /// "child value if set, else parent") can tell the two apart. The
    /// default is applied only once, in `EffectiveSpec`, if no spec in the
    /// whole inheritance chain set it.
    #[serde(default)]
    pub temperature: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_tokens: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub system_prompt: Option<String>,
    #[serde(default)]
    pub tools: Vec<ToolSpec>,
    #[serde(default)]
    pub skills: Vec<String>,
    #[serde(default)]
    pub metadata: HashMap<String, serde_json::Value>,
    #[serde(default)]
    pub config: HashMap<String, serde_json::Value>,
}

/// Default sampling temperature applied when no spec in an inheritance
/// chain sets one (spec.md §3).
pub fn default_temperature() -> f32 {
    0.7
}

impl AgentSpec {
    /// Structural validation per spec.md §3/§8 (name, bounds). Does not
    /// touch the registry, so it cannot detect cycles or missing parents.
    pub fn validate(&self) -> Result<(), crate::error::ConclaveError> {
        if !is_valid_name(&self.name) {
            return Err(crate::error::ConclaveError::invalid_spec(format!(
                "agent name {:?} does not match [a-z0-9][a-z0-9_-]*",
                self.name
            )));
        }
        if let Some(t) = self.temperature {
            if !(0.0..=2.0).contains(&t) {
                return Err(crate::error::ConclaveError::invalid_spec(format!(
                    "temperature {} out of bounds [0, 2]",
                    t
                )));
            }
        }
        if self.model.trim().is_empty() {
            return Err(crate::error::ConclaveError::invalid_spec(
                "model must not be empty",
            ));
        }
        Ok(())
    }
}

/// Dual-format input wrapper, mirroring the teacher's `AgentConfigInput` pattern.
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
enum AgentSpecInput {
    Flat(FlatAgentSpec),
    Kubernetes(KubernetesAgentSpec),
}

#[derive(Debug, Clone, Deserialize)]
struct FlatAgentSpec {
    name: String,
    #[serde(default)]
    parent: Option<String>,
    #[serde(default)]
    provider: Option<String>,
    model: String,
    #[serde(default)]
    temperature: Option<f32>,
    #[serde(default)]
    max_tokens: Option<usize>,
    #[serde(default, alias = "instructions")]
    system_prompt: Option<String>,
    #[serde(default)]
    tools: Vec<ToolSpec>,
    #[serde(default)]
    skills: Vec<String>,
    #[serde(default)]
    metadata: HashMap<String, serde_json::Value>,
    #[serde(default)]
    config: HashMap<String, serde_json::Value>,
}

#[derive(Debug, Clone, Deserialize)]
struct KubernetesAgentSpec {
    #[serde(rename = "apiVersion")]
    #[allow(dead_code)]
    api_version: String,
    #[allow(dead_code)]
    kind: String,
    metadata: K8sMetadata,
    spec: K8sSpecBody,
}

#[derive(Debug, Clone, Deserialize)]
struct K8sMetadata {
    name: String,
}

#[derive(Debug, Clone, Deserialize)]
struct K8sSpecBody {
    #[serde(default)]
    parent: Option<String>,
    #[serde(default)]
    provider: Option<String>,
    model: String,
    #[serde(default)]
    temperature: Option<f32>,
    #[serde(default)]
    max_tokens: Option<usize>,
    #[serde(default, alias = "instructions")]
    system_prompt: Option<String>,
    #[serde(default)]
    tools: Vec<ToolSpec>,
    #[serde(default)]
    skills: Vec<String>,
    #[serde(default)]
    metadata: HashMap<String, serde_json::Value>,
    #[serde(default)]
    config: HashMap<String, serde_json::Value>,
}

impl From<AgentSpecInput> for AgentSpec {
    fn from(input: AgentSpecInput) -> Self {
        match input {
            AgentSpecInput::Flat(f) => AgentSpec {
                name: f.name,
                parent: f.parent,
                provider: f.provider,
                model: f.model,
                temperature: f.temperature,
                max_tokens: f.max_tokens,
                system_prompt: f.system_prompt,
                tools: f.tools,
                skills: f.skills,
                metadata: f.metadata,
                config: f.config,
            },
            AgentSpecInput::Kubernetes(k) => AgentSpec {
                name: k.metadata.name,
                parent: k.spec.parent,
                provider: k.spec.provider,
                model: k.spec.model,
                temperature: k.spec.temperature,
                max_tokens: k.spec.max_tokens,
                system_prompt: k.spec.system_prompt,
                tools: k.spec.tools,
                skills: k.spec.skills,
                metadata: k.spec.metadata,
                config: k.spec.config,
            },
        }
    }
}

/// Fully resolved, immutable agent spec after inheritance merge (spec.md §3).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EffectiveSpec {
    pub name: String,
    pub provider: Option<String>,
    pub model: String,
    pub temperature: f32,
    pub max_tokens: Option<usize>,
    pub system_prompt: Option<String>,
    pub tools: Vec<ToolSpec>,
    pub skills: Vec<String>,
    pub metadata: HashMap<String, serde_json::Value>,
    pub config: HashMap<String, serde_json::Value>,
}

/// Per-execution agent status (spec.md §3).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AgentStatus {
    Idle,
    Running,
    AwaitingTool,
    AwaitingApproval,
    Failed,
    Completed,
}

/// A live, per-execution entity bound to an [`EffectiveSpec`] (spec.md §3).
/// Owned exclusively by the `AgentExecutor` invocation that created it.
#[derive(Debug, Clone)]
pub struct Agent {
    pub execution_id: ulid::Ulid,
    pub effective_spec: std::sync::Arc<EffectiveSpec>,
    pub status: AgentStatus,
    pub transcript: Vec<Message>,
    pub usage: ExecutionMetadata,
}

impl Agent {
    pub fn new(execution_id: ulid::Ulid, effective_spec: std::sync::Arc<EffectiveSpec>) -> Self {
        Self {
            execution_id,
            effective_spec,
            status: AgentStatus::Idle,
            transcript: Vec::new(),
            usage: ExecutionMetadata::default(),
        }
    }
}

/// Accumulated token/cost counters for one agent turn (spec.md §9 Open Question:
/// cost accounting is out of scope here; only raw token counts are tracked).
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct ExecutionMetadata {
    pub prompt_tokens: u64,
    pub completion_tokens: u64,
    pub tool_call_count: u64,
}

impl ExecutionMetadata {
    pub fn add(&mut self, other: ExecutionMetadata) {
        self.prompt_tokens += other.prompt_tokens;
        self.completion_tokens += other.completion_tokens;
        self.tool_call_count += other.tool_call_count;
    }
}

/// Message role (spec.md §3).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MessageRole {
    System,
    User,
    Assistant,
    Tool,
}

/// FIPA-inspired performative label carried by group-collaboration messages
/// (spec.md §4.6, §6). `None` for ordinary agent-turn transcript messages.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Performative {
    Inform,
    Request,
    Propose,
    Agree,
    Disagree,
    Query,
    Confirm,
    Refuse,
}

/// One entry in a conversation (spec.md §3 `Message`).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Message {
    pub role: MessageRole,
    pub content: Vec<ContentPart>,
    pub timestamp: DateTime<Utc>,
    pub sender_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tool_call_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub performative: Option<Performative>,
}

impl Message {
    pub fn text(role: MessageRole, sender_id: impl Into<String>, text: impl Into<String>) -> Self {
        Self {
            role,
            content: vec![ContentPart::Text(text.into())],
            timestamp: Utc::now(),
            sender_id: sender_id.into(),
            tool_call_id: None,
            performative: None,
        }
    }

    pub fn with_performative(mut self, performative: Performative) -> Self {
        self.performative = Some(performative);
        self
    }

    /// Concatenated text content, ignoring non-text parts, for callers that
    /// just want the plain prose (e.g. consensus display, prompt rendering).
    pub fn text_content(&self) -> String {
        self.content
            .iter()
            .filter_map(|p| match p {
                ContentPart::Text(s) => Some(s.as_str()),
                _ => None,
            })
            .collect::<Vec<_>>()
            .join("\n")
    }
}

/// A single content part within a [`Message`] (spec.md §3: `{kind, payload}`).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ContentPart {
    Text(String),
    Json(serde_json::Value),
    Code { language: Option<String>, source: String },
    ImageRef(String),
    ToolCall { id: String, name: String, arguments: serde_json::Value },
    ToolResult { tool_call_id: String, result: serde_json::Value },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn flat_agent_spec_parses_defaults() {
        let yaml = r#"
            name: echoer
            model: mock:echo
        "#;
        let spec: AgentSpec = serde_yaml::from_str(yaml).unwrap();
        assert_eq!(spec.name, "echoer");
        assert_eq!(spec.temperature, None);
        assert!(spec.parent.is_none());
        assert!(spec.tools.is_empty());
    }

    #[test]
    fn kubernetes_style_agent_spec_parses() {
        let yaml = r#"
            apiVersion: conclave.dev/v1
            kind: Agent
            metadata:
              name: k8s-agent
            spec:
              model: anthropic:claude-3-5-sonnet
              parent: base
              instructions: Be terse.
              tools:
                - shell
        "#;
        let spec: AgentSpec = serde_yaml::from_str(yaml).unwrap();
        assert_eq!(spec.name, "k8s-agent");
        assert_eq!(spec.parent.as_deref(), Some("base"));
        assert_eq!(spec.system_prompt.as_deref(), Some("Be terse."));
        assert_eq!(spec.tools[0].name(), "shell");
    }

    #[test]
    fn validate_rejects_bad_name_and_temperature() {
        let mut spec = AgentSpec {
            name: "Bad Name".into(),
            parent: None,
            provider: None,
            model: "m".into(),
            temperature: Some(0.5),
            max_tokens: None,
            system_prompt: None,
            tools: vec![],
            skills: vec![],
            metadata: HashMap::new(),
            config: HashMap::new(),
        };
        assert!(spec.validate().is_err());
        spec.name = "good-name".into();
        spec.temperature = Some(2.1);
        assert!(spec.validate().is_err());
        spec.temperature = Some(2.0);
        assert!(spec.validate().is_ok());
        spec.temperature = Some(0.0);
        assert!(spec.validate().is_ok());
    }

    #[test]
    fn message_text_content_ignores_non_text_parts() {
        let mut msg = Message::text(MessageRole::Assistant, "agent-1", "hello");
        msg.content.push(ContentPart::Json(serde_json::json!({"a": 1})));
        assert_eq!(msg.text_content(), "hello");
    }
}
