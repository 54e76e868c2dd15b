//! Workflow graph types (spec.md §3, §6). REDESIGN FLAG applied: step
//! payloads are a tagged `StepKind` enum, not the teacher's `NodeConfig`
//! god-struct (`aof-core/src/agentflow.rs`) — each kind carries only the
//! fields valid for it.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use crate::agent::is_valid_name;
use crate::error::ConclaveError;

/// Declarative graph of steps (spec.md §3 `Workflow`).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Workflow {
    pub name: String,
    #[serde(default)]
    pub inputs: HashMap<String, InputDecl>,
    #[serde(default)]
    pub outputs: HashMap<String, OutputBinding>,
    pub steps: Vec<Step>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InputDecl {
    #[serde(rename = "type")]
    pub value_type: String,
    #[serde(default)]
    pub required: bool,
}

/// Declared workflow output, referencing a step's output by name
/// (spec.md §3 invariant: "every output reference names an existing step
/// and declared output").
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OutputBinding {
    pub step: String,
    pub output: String,
}

/// A single node in the workflow graph (spec.md §3 `Step`).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Step {
    pub id: String,
    #[serde(flatten)]
    pub kind: StepKind,
    #[serde(default)]
    pub depends_on: Vec<String>,
    #[serde(default)]
    pub input_bindings: HashMap<String, Binding>,
    #[serde(default)]
    pub retry: RetryConfig,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub condition: Option<Condition>,
    /// When set, this step's output must clear a `ReviewGate` before the
    /// step is considered `completed` (spec.md §4.5 step 5: "On human
    /// approval requirement: set workflow status to `awaiting_approval`").
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub review: Option<crate::review::ReviewPolicy>,
}

fn default_timeout_secs() -> u64 {
    300
}

/// Source of a step input: a workflow input by name, or an upstream step's
/// declared output by (step id, output name).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Binding {
    Input(String),
    StepOutput { step: String, output: String },
    Literal(serde_json::Value),
}

/// Condition restricted to boolean equality tests over bound values
/// (spec.md §1 Non-goals: no expression language).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Condition {
    pub left: Binding,
    pub equals: serde_json::Value,
}

/// Tagged step payload (spec.md's REDESIGN FLAG, §4.5).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum StepKind {
    Agent {
        agent: String,
    },
    Group {
        group: String,
        goal_binding: Binding,
    },
    Tool {
        tool: String,
    },
    Branch {
        condition: Condition,
        on_true: String,
        on_false: String,
    },
    Parallel {
        steps: Vec<String>,
    },
}

/// Step retry policy (spec.md §4.4: base 1s, factor 2, max 30s, jitter ±20%).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetryConfig {
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    #[serde(default = "default_base_delay_ms")]
    pub base_delay_ms: u64,
    #[serde(default = "default_backoff_factor")]
    pub backoff_factor: f64,
    #[serde(default = "default_max_delay_ms")]
    pub max_delay_ms: u64,
    #[serde(default = "default_jitter")]
    pub jitter: f64,
}

fn default_max_attempts() -> u32 {
    3
}
fn default_base_delay_ms() -> u64 {
    1000
}
fn default_backoff_factor() -> f64 {
    2.0
}
fn default_max_delay_ms() -> u64 {
    30_000
}
fn default_jitter() -> f64 {
    0.2
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            base_delay_ms: default_base_delay_ms(),
            backoff_factor: default_backoff_factor(),
            max_delay_ms: default_max_delay_ms(),
            jitter: default_jitter(),
        }
    }
}

impl RetryConfig {
    /// Delay before attempt `attempt` (1-indexed), with ±jitter applied by
    /// the caller using a supplied random unit in `[-1, 1]` so the policy
    /// stays deterministic and testable without embedding an RNG here.
    pub fn delay_ms(&self, attempt: u32, jitter_unit: f64) -> u64 {
        let base = self.base_delay_ms as f64 * self.backoff_factor.powi(attempt.saturating_sub(1) as i32);
        let capped = base.min(self.max_delay_ms as f64);
        let jittered = capped * (1.0 + self.jitter * jitter_unit);
        jittered.max(0.0) as u64
    }
}

/// Failure handling policy for a workflow run (spec.md §4.5).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailurePolicy {
    FailFast,
    ContinueOnError,
}

impl Default for FailurePolicy {
    fn default() -> Self {
        Self::FailFast
    }
}

/// Per-step terminal (or in-flight) status (spec.md §3 `ExecutionContext`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StepStatus {
    Pending,
    Running,
    Completed,
    Failed,
    Skipped,
    Cancelled,
}

impl StepStatus {
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            StepStatus::Completed | StepStatus::Failed | StepStatus::Skipped | StepStatus::Cancelled
        )
    }
}

/// Outcome of one step's execution, returned by `AgentExecutor::execute` and
/// friends, and recorded into `ExecutionContext`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StepResult {
    pub step_id: String,
    pub status: StepStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub output: Option<serde_json::Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub failure: Option<FailureRecord>,
    pub attempts: u32,
}

/// Structured, user-visible failure record (spec.md §7: "no stack traces
/// are exposed in user-visible failures").
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FailureRecord {
    pub kind: String,
    pub message: String,
    pub entity_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub remediation_hint: Option<String>,
}

impl FailureRecord {
    pub fn from_error(entity_id: impl Into<String>, err: &ConclaveError) -> Self {
        Self {
            kind: err.kind().to_string(),
            message: err.to_string(),
            entity_id: entity_id.into(),
            remediation_hint: None,
        }
    }
}

/// Aggregate workflow run status (spec.md §3 `ExecutionContext`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExecutionStatus {
    Pending,
    Running,
    AwaitingApproval,
    Completed,
    Failed,
    Cancelled,
    Timeout,
}

/// Per-invocation workflow run state (spec.md §3 `ExecutionContext`).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutionContext {
    pub execution_id: ulid::Ulid,
    pub workflow_name: String,
    pub inputs: HashMap<String, serde_json::Value>,
    pub step_status: HashMap<String, StepStatus>,
    pub step_outputs: HashMap<String, serde_json::Value>,
    pub status: ExecutionStatus,
    pub started_at: chrono::DateTime<chrono::Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ended_at: Option<chrono::DateTime<chrono::Utc>>,
    pub correlation_id: ulid::Ulid,
    #[serde(default)]
    pub metadata: HashMap<String, serde_json::Value>,
    #[serde(default)]
    pub outputs: HashMap<String, serde_json::Value>,
    #[serde(default)]
    pub failure: Option<FailureRecord>,
}

impl ExecutionContext {
    pub fn new(workflow_name: impl Into<String>, inputs: HashMap<String, serde_json::Value>) -> Self {
        let execution_id = ulid::Ulid::new();
        Self {
            execution_id,
            workflow_name: workflow_name.into(),
            inputs,
            step_status: HashMap::new(),
            step_outputs: HashMap::new(),
            status: ExecutionStatus::Pending,
            started_at: chrono::Utc::now(),
            ended_at: None,
            correlation_id: execution_id,
            metadata: HashMap::new(),
            outputs: HashMap::new(),
            failure: None,
        }
    }
}

impl Workflow {
    /// Structural validation (spec.md §4.5 step 1, §8 boundary behavior:
    /// zero steps is `invalid_workflow`). Grounded in
    /// `aof-core/src/agentflow.rs`'s `validate()`/duplicate-id/connection
    /// checks, generalized to `depends_on` edges over `StepKind`.
    pub fn validate(&self) -> Result<(), ConclaveError> {
        if !is_valid_name(&self.name) {
            return Err(ConclaveError::invalid_workflow(format!(
                "workflow name {:?} does not match [a-z0-9][a-z0-9_-]*",
                self.name
            )));
        }
        if self.steps.is_empty() {
            return Err(ConclaveError::invalid_workflow("workflow has zero steps"));
        }

        let mut seen = std::collections::HashSet::new();
        for step in &self.steps {
            if !seen.insert(step.id.clone()) {
                return Err(ConclaveError::invalid_workflow(format!(
                    "duplicate step id {:?}",
                    step.id
                )));
            }
        }

        for step in &self.steps {
            for dep in &step.depends_on {
                if !seen.contains(dep) {
                    return Err(ConclaveError::invalid_workflow(format!(
                        "step {:?} depends on unknown step {:?}",
                        step.id, dep
                    )));
                }
            }
            if let StepKind::Parallel { steps } = &step.kind {
                for sub in steps {
                    if !seen.contains(sub) {
                        return Err(ConclaveError::invalid_workflow(format!(
                            "parallel step {:?} references unknown sub-step {:?}",
                            step.id, sub
                        )));
                    }
                }
            }
            if let StepKind::Branch { on_true, on_false, .. } = &step.kind {
                for target in [on_true, on_false] {
                    if !seen.contains(target) {
                        return Err(ConclaveError::invalid_workflow(format!(
                            "branch step {:?} references unknown successor {:?}",
                            step.id, target
                        )));
                    }
                }
            }
        }

        for (name, binding) in &self.outputs {
            if !seen.contains(&binding.step) {
                return Err(ConclaveError::invalid_workflow(format!(
                    "output {:?} references unknown step {:?}",
                    name, binding.step
                )));
            }
        }

        self.topological_layers()?;
        Ok(())
    }

    /// Compute topological layers for concurrent dispatch (spec.md §4.5
    /// step 2). Fails with `cycle` if the dependency graph is not a DAG.
    pub fn topological_layers(&self) -> Result<Vec<Vec<String>>, ConclaveError> {
        let mut remaining: HashMap<&str, &Step> =
            self.steps.iter().map(|s| (s.id.as_str(), s)).collect();
        let mut resolved: std::collections::HashSet<String> = std::collections::HashSet::new();
        let mut layers = Vec::new();

        while !remaining.is_empty() {
            let layer: Vec<String> = remaining
                .values()
                .filter(|s| s.depends_on.iter().all(|d| resolved.contains(d)))
                .map(|s| s.id.clone())
                .collect();

            if layer.is_empty() {
                let stuck: Vec<&str> = remaining.keys().copied().collect();
                return Err(ConclaveError::cycle(format!(
                    "dependency cycle among steps: {}",
                    stuck.join(", ")
                )));
            }

            for id in &layer {
                remaining.remove(id.as_str());
                resolved.insert(id.clone());
            }
            layers.push(layer);
        }

        Ok(layers)
    }

    pub fn step(&self, id: &str) -> Option<&Step> {
        self.steps.iter().find(|s| s.id == id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn agent_step(id: &str, depends_on: &[&str]) -> Step {
        Step {
            id: id.to_string(),
            kind: StepKind::Agent { agent: "echoer".into() },
            depends_on: depends_on.iter().map(|s| s.to_string()).collect(),
            input_bindings: HashMap::new(),
            retry: RetryConfig::default(),
            timeout_secs: default_timeout_secs(),
            condition: None,
            review: None,
        }
    }

    #[test]
    fn zero_steps_is_invalid() {
        let wf = Workflow {
            name: "empty".into(),
            inputs: HashMap::new(),
            outputs: HashMap::new(),
            steps: vec![],
        };
        assert!(matches!(wf.validate(), Err(ConclaveError::InvalidWorkflow(_))));
    }

    #[test]
    fn duplicate_step_ids_rejected() {
        let wf = Workflow {
            name: "dup".into(),
            inputs: HashMap::new(),
            outputs: HashMap::new(),
            steps: vec![agent_step("s1", &[]), agent_step("s1", &[])],
        };
        assert!(wf.validate().is_err());
    }

    #[test]
    fn cycle_detected_in_topological_layers() {
        let wf = Workflow {
            name: "cyclic".into(),
            inputs: HashMap::new(),
            outputs: HashMap::new(),
            steps: vec![agent_step("a", &["b"]), agent_step("b", &["a"])],
        };
        assert!(matches!(wf.validate(), Err(ConclaveError::Cycle(_))));
    }

    #[test]
    fn valid_dag_produces_layers() {
        let wf = Workflow {
            name: "fanout".into(),
            inputs: HashMap::new(),
            outputs: HashMap::new(),
            steps: vec![
                agent_step("p1", &[]),
                agent_step("p2", &[]),
                agent_step("join", &["p1", "p2"]),
            ],
        };
        wf.validate().unwrap();
        let layers = wf.topological_layers().unwrap();
        assert_eq!(layers.len(), 2);
        assert_eq!(layers[1], vec!["join".to_string()]);
    }

    #[test]
    fn retry_delay_respects_cap() {
        let retry = RetryConfig::default();
        assert_eq!(retry.delay_ms(1, 0.0), 1000);
        assert_eq!(retry.delay_ms(2, 0.0), 2000);
        let capped = retry.delay_ms(10, 0.0);
        assert_eq!(capped, 30_000);
    }
}
