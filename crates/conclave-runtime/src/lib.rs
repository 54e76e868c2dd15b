//! Conclave Runtime - the orchestration engines that turn `conclave-core`'s
//! declarative data model into running execution (spec.md §4.4-§4.9):
//! `AgentExecutor`, `WorkflowEngine`, `GroupCollaborationEngine`,
//! `SandboxManager`, `EventBus`, `ReviewGate`.
//!
//! Every engine here is a capability passed explicitly by `Arc` - there is
//! no global registry or singleton. A front-end (CLI, server, test harness)
//! wires the engines together itself, the way the teacher's `aof-runtime`
//! crate is assembled by its own binaries rather than self-initializing.

pub mod events;
pub mod executor;
pub mod group;
pub mod review;
pub mod sandbox;
pub mod workflow;

pub use events::{Event, EventBus, EventKind, Subscription};
pub use executor::{AgentExecutor, TurnResult};
pub use group::{GroupCollaborationEngine, GroupRegistry};
pub use review::ReviewGate;
pub use sandbox::{ProcessSandboxBackend, SandboxBackend, SandboxManager};
pub use workflow::{ExecuteOptions, WorkflowEngine};
