//! Conclave Core - foundation types and traits for the Conclave multi-agent
//! orchestration runtime.
//!
//! This crate holds the data model (spec.md §3), the error taxonomy (§7),
//! and the capability contracts (`ProviderPort`, `Tool`/`ToolExecutor`) that
//! the rest of the workspace is handed explicitly. It has no opinion about
//! *how* an agent turn, workflow, group session, or sandbox gets executed -
//! that lives in `conclave-runtime`.

pub mod agent;
pub mod cancel;
pub mod error;
pub mod group;
pub mod memory;
pub mod provider;
pub mod registry;
pub mod review;
pub mod sandbox;
pub mod tool;
pub mod workflow;

pub use agent::{
    is_valid_name, Agent, AgentSpec, AgentStatus, ContentPart, EffectiveSpec, ExecutionMetadata,
    Message, MessageRole, Performative, QualifiedToolSpec, ToolSpec,
};
pub use cancel::CancelToken;
pub use error::{ConclaveError, ConclaveResult};
pub use group::{
    AgentGroup, CommunicationPattern, ConsensusRecord, GroupSession, GroupStatus, Stance,
};
pub use memory::{Memory, MemoryEntry, MemoryQuery};
pub use provider::{
    FinishReason, ProviderCapabilities, ProviderPort, ProviderRequest, ProviderResponse,
    StreamChunk, TokenUsage,
};
pub use registry::{RegistryConfig, SpecRegistry};
pub use review::{ArtifactContent, ReviewDecision, ReviewPolicy, ReviewRequest, ReviewState, ReviewVote};
pub use sandbox::{
    FilesystemMode, NetworkPolicy, ResourceBreach, ResourceLimits, RetentionPolicy,
    RollbackTrigger, Sandbox, SandboxConfig, SandboxExecutionResult, SandboxState, Snapshot,
    MIN_DISK_BYTES, MIN_MEMORY_BYTES, MIN_TIMEOUT_SECS,
};
pub use tool::{
    SideEffectClass, Tool, ToolCall, ToolConfig, ToolDefinition, ToolExecutor, ToolInput,
    ToolResult, ToolSource,
};
pub use workflow::{
    Binding, Condition, ExecutionContext, ExecutionStatus, FailurePolicy, FailureRecord,
    InputDecl, OutputBinding, RetryConfig, Step, StepKind, StepResult, StepStatus, Workflow,
};

/// Crate version, surfaced in event payloads and CLI front-ends.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Default inheritance-depth cap for `SpecRegistry::resolve` (spec.md §9
/// Open Question, decided: exposed as a configuration knob, default 8).
pub const DEFAULT_MAX_INHERITANCE_DEPTH: usize = 8;
