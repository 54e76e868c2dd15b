//! `WorkflowEngine`: declarative multi-step orchestration (spec.md §4.5).
//! Grounded in the teacher's `aof-runtime::executor::agentflow_executor`
//! layer-by-layer execution loop (`FlowExecutionStatus`, per-node retry,
//! fail-fast cancellation of running siblings), generalized from its single
//! `NodeType::Agent` dispatch onto `StepKind`'s five variants and from its
//! `AgentFlow` state machine onto `conclave_core::workflow::ExecutionContext`.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use conclave_core::{
    ArtifactContent, Binding, CancelToken, Condition, ConclaveError, ConclaveResult,
    ExecutionContext, ExecutionStatus, FailurePolicy, FailureRecord, RetryConfig, Step, StepKind,
    StepResult, StepStatus, ToolExecutor, ToolInput, Workflow,
};
use futures::future::join_all;
use futures::stream::{FuturesUnordered, StreamExt};
use rand::Rng;
use tracing::warn;
use ulid::Ulid;

use crate::events::{Event, EventBus, EventKind};
use crate::group::{GroupCollaborationEngine, GroupRegistry};
use crate::review::ReviewGate;
use crate::AgentExecutor;

/// Options for one [`WorkflowEngine::execute`] run (spec.md §4.5 `Execute`).
#[derive(Debug, Clone)]
pub struct ExecuteOptions {
    pub failure_policy: FailurePolicy,
    /// Upper bound on steps dispatched concurrently within one layer
    /// (spec.md §5: "bounded worker concurrency", not unbounded fan-out).
    pub max_concurrency: usize,
}

impl Default for ExecuteOptions {
    fn default() -> Self {
        Self {
            failure_policy: FailurePolicy::default(),
            max_concurrency: 8,
        }
    }
}

/// Capability bundle threaded into every step dispatch. Cheap to clone -
/// every field is an `Arc`.
#[derive(Clone)]
struct Caps {
    executor: Arc<AgentExecutor>,
    group_engine: Arc<GroupCollaborationEngine>,
    groups: Arc<GroupRegistry>,
    tools: Arc<dyn ToolExecutor>,
    review_gate: Arc<ReviewGate>,
    events: Arc<EventBus>,
}

/// Drives a [`Workflow`] to completion one topological layer at a time
/// (spec.md §4.5). Stateless and shareable across concurrent runs; all
/// per-run state lives in the [`ExecutionContext`] it returns.
pub struct WorkflowEngine {
    executor: Arc<AgentExecutor>,
    group_engine: Arc<GroupCollaborationEngine>,
    groups: Arc<GroupRegistry>,
    tools: Arc<dyn ToolExecutor>,
    review_gate: Arc<ReviewGate>,
    events: Arc<EventBus>,
}

impl WorkflowEngine {
    pub fn new(
        executor: Arc<AgentExecutor>,
        group_engine: Arc<GroupCollaborationEngine>,
        groups: Arc<GroupRegistry>,
        tools: Arc<dyn ToolExecutor>,
        review_gate: Arc<ReviewGate>,
        events: Arc<EventBus>,
    ) -> Self {
        Self {
            executor,
            group_engine,
            groups,
            tools,
            review_gate,
            events,
        }
    }

    fn caps(&self) -> Caps {
        Caps {
            executor: self.executor.clone(),
            group_engine: self.group_engine.clone(),
            groups: self.groups.clone(),
            tools: self.tools.clone(),
            review_gate: self.review_gate.clone(),
            events: self.events.clone(),
        }
    }

    /// **Execute(workflow, inputs)** (spec.md §4.5):
    /// 1. Validate the graph and compute its topological layers.
    /// 2. Dispatch each layer's steps concurrently (bounded by
    ///    `max_concurrency`), waiting for the whole layer before advancing.
    /// 3. On a step failure under `FailFast`, cancel every other step still
    ///    running in that layer and stop after it drains.
    /// 4. Resolve `workflow.outputs` from the final `step_outputs` map.
    pub async fn execute(
        &self,
        workflow: &Workflow,
        inputs: HashMap<String, serde_json::Value>,
        options: &ExecuteOptions,
        cancel: CancelToken,
    ) -> ConclaveResult<ExecutionContext> {
        workflow.validate()?;
        let layers = workflow.topological_layers()?;

        let mut ctx = ExecutionContext::new(workflow.name.clone(), inputs);
        ctx.status = ExecutionStatus::Running;
        let correlation_id = ctx.correlation_id;

        self.events.publish(Event::new(
            EventKind::WorkflowStarted,
            correlation_id,
            serde_json::json!({"execution_id": ctx.execution_id.to_string(), "workflow": workflow.name}),
        ));

        // Sub-steps of a `Parallel` step are dispatched directly by their
        // parent, not scheduled again as ordinary layer members.
        let parallel_children: HashSet<String> = workflow
            .steps
            .iter()
            .filter_map(|s| match &s.kind {
                StepKind::Parallel { steps } => Some(steps.clone()),
                _ => None,
            })
            .flatten()
            .collect();

        let caps = self.caps();
        let mut failed = false;

        'layers: for layer in &layers {
            if cancel.is_cancelled() {
                ctx.status = ExecutionStatus::Cancelled;
                break;
            }
            if failed {
                break;
            }

            let runnable: Vec<&Step> = layer
                .iter()
                .filter(|id| !parallel_children.contains(*id))
                .filter_map(|id| workflow.step(id))
                .collect();
            if runnable.is_empty() {
                continue;
            }

            // Branch resolution happens before dispatch so its not-chosen
            // successor never runs, even if it sits in this same layer.
            let mut force_skip: HashSet<String> = HashSet::new();
            for step in &runnable {
                if let StepKind::Branch { condition, on_true, on_false } = &step.kind {
                    let taken = evaluate_condition(condition, &ctx, workflow);
                    let (chosen, skipped) = if taken { (on_true, on_false) } else { (on_false, on_true) };
                    force_skip.insert(skipped.clone());
                    let output = serde_json::json!({"taken": chosen});
                    ctx.step_status.insert(step.id.clone(), StepStatus::Completed);
                    ctx.step_outputs.insert(step.id.clone(), output);
                }
            }

            let any_review = runnable
                .iter()
                .any(|s| s.review.is_some() && !force_skip.contains(&s.id) && !matches!(s.kind, StepKind::Branch { .. }));
            if any_review {
                ctx.status = ExecutionStatus::AwaitingApproval;
            }

            let layer_cancel = cancel.child();

            // `Parallel` containers are dispatched as one joined fan-out over
            // their named sub-steps, which is why `parallel_children` excludes
            // those sub-steps from ordinary scheduling above.
            for step in runnable.iter().filter(|s| matches!(s.kind, StepKind::Parallel { .. })) {
                if force_skip.contains(&step.id) {
                    ctx.step_status.insert(step.id.clone(), StepStatus::Skipped);
                    continue;
                }
                if let Some(cond) = &step.condition {
                    if !evaluate_condition(cond, &ctx, workflow) {
                        ctx.step_status.insert(step.id.clone(), StepStatus::Skipped);
                        continue;
                    }
                }
                let child_ids = match &step.kind {
                    StepKind::Parallel { steps } => steps.clone(),
                    _ => unreachable!(),
                };
                let snapshot = bindings_snapshot(&ctx);
                let parent_cancel = layer_cancel.child();
                let joined = join_all(child_ids.iter().map(|cid| {
                    let child = workflow.step(cid).cloned();
                    let caps = caps.clone();
                    let snapshot = snapshot.clone();
                    let child_cancel = parent_cancel.child();
                    let cid = cid.clone();
                    async move {
                        match child {
                            Some(child_step) => {
                                let result = run_step(&caps, &child_step, &snapshot, child_cancel, correlation_id).await;
                                (cid, result)
                            }
                            None => (
                                cid.clone(),
                                StepResult {
                                    step_id: cid.clone(),
                                    status: StepStatus::Failed,
                                    output: None,
                                    failure: Some(FailureRecord {
                                        kind: "invalid_workflow".into(),
                                        message: format!("unknown sub-step {cid}"),
                                        entity_id: cid,
                                        remediation_hint: None,
                                    }),
                                    attempts: 0,
                                },
                            ),
                        }
                    }
                }))
                .await;

                let mut any_child_failed = false;
                let mut outputs_map = serde_json::Map::new();
                for (cid, result) in joined {
                    ctx.step_status.insert(cid.clone(), result.status);
                    if let Some(out) = result.output.clone() {
                        ctx.step_outputs.insert(cid.clone(), out.clone());
                        outputs_map.insert(cid.clone(), out);
                    }
                    self.events.publish(Event::new(
                        match result.status {
                            StepStatus::Failed => EventKind::WorkflowStepFailed,
                            _ => EventKind::WorkflowStepCompleted,
                        },
                        correlation_id,
                        serde_json::json!({"step": cid, "status": format!("{:?}", result.status)}),
                    ));
                    if result.status == StepStatus::Failed {
                        any_child_failed = true;
                        ctx.failure = result.failure.clone();
                    }
                }

                let parent_status = if any_child_failed { StepStatus::Failed } else { StepStatus::Completed };
                ctx.step_status.insert(step.id.clone(), parent_status);
                ctx.step_outputs
                    .insert(step.id.clone(), serde_json::Value::Object(outputs_map));
                self.events.publish(Event::new(
                    match parent_status {
                        StepStatus::Failed => EventKind::WorkflowStepFailed,
                        _ => EventKind::WorkflowStepCompleted,
                    },
                    correlation_id,
                    serde_json::json!({"step": step.id, "status": format!("{:?}", parent_status)}),
                ));
                if any_child_failed && options.failure_policy == FailurePolicy::FailFast {
                    failed = true;
                }
            }
            if failed {
                break 'layers;
            }

            let mut in_flight = FuturesUnordered::new();
            let mut pending: Vec<&Step> = runnable
                .iter()
                .copied()
                .filter(|s| !matches!(s.kind, StepKind::Branch { .. } | StepKind::Parallel { .. }))
                .collect();

            while !pending.is_empty() || !in_flight.is_empty() {
                while in_flight.len() < options.max_concurrency && !pending.is_empty() {
                    let step = pending.remove(0);
                    if force_skip.contains(&step.id) {
                        ctx.step_status.insert(step.id.clone(), StepStatus::Skipped);
                        continue;
                    }
                    if let Some(cond) = &step.condition {
                        if !evaluate_condition(cond, &ctx, workflow) {
                            ctx.step_status.insert(step.id.clone(), StepStatus::Skipped);
                            self.events.publish(Event::new(
                                EventKind::WorkflowStepCompleted,
                                correlation_id,
                                serde_json::json!({"step": step.id, "status": "skipped"}),
                            ));
                            continue;
                        }
                    }

                    let step = step.clone();
                    let snapshot = bindings_snapshot(&ctx);
                    let caps = caps.clone();
                    let step_cancel = layer_cancel.child();
                    let step_id = step.id.clone();
                    in_flight.push(async move {
                        let result = run_step(&caps, &step, &snapshot, step_cancel, correlation_id).await;
                        (step_id, result)
                    });
                }

                match in_flight.next().await {
                    Some((step_id, result)) => {
                        ctx.step_status.insert(step_id.clone(), result.status);
                        if let Some(output) = result.output.clone() {
                            ctx.step_outputs.insert(step_id.clone(), output);
                        }
                        self.events.publish(Event::new(
                            match result.status {
                                StepStatus::Failed => EventKind::WorkflowStepFailed,
                                _ => EventKind::WorkflowStepCompleted,
                            },
                            correlation_id,
                            serde_json::json!({"step": step_id, "status": format!("{:?}", result.status)}),
                        ));

                        if result.status == StepStatus::Failed {
                            ctx.failure = result.failure.clone();
                            if options.failure_policy == FailurePolicy::FailFast {
                                layer_cancel.cancel();
                                pending.clear();
                                failed = true;
                            }
                        }
                    }
                    None => break,
                }
            }

            if failed {
                break 'layers;
            }
        }

        if ctx.status == ExecutionStatus::Cancelled {
            // already set above
        } else if failed {
            ctx.status = ExecutionStatus::Failed;
        } else {
            ctx.status = ExecutionStatus::Running;
            for (name, binding) in &workflow.outputs {
                let value = ctx
                    .step_outputs
                    .get(&binding.step)
                    .and_then(|out| out.get(&binding.output).cloned().or_else(|| Some(out.clone())))
                    .unwrap_or(serde_json::Value::Null);
                ctx.outputs.insert(name.clone(), value);
            }
            ctx.status = ExecutionStatus::Completed;
        }
        ctx.ended_at = Some(chrono::Utc::now());

        self.events.publish(Event::new(
            match ctx.status {
                ExecutionStatus::Completed => EventKind::WorkflowCompleted,
                _ => EventKind::WorkflowFailed,
            },
            correlation_id,
            serde_json::json!({"execution_id": ctx.execution_id.to_string(), "status": format!("{:?}", ctx.status)}),
        ));

        Ok(ctx)
    }
}

/// Read-only snapshot of the values a running layer's steps may bind
/// against - taken once per dispatch so concurrent futures don't need a
/// lock on the (mutably advancing) `ExecutionContext`.
#[derive(Clone, Default)]
struct BindingsSnapshot {
    inputs: HashMap<String, serde_json::Value>,
    step_outputs: HashMap<String, serde_json::Value>,
}

fn bindings_snapshot(ctx: &ExecutionContext) -> BindingsSnapshot {
    BindingsSnapshot {
        inputs: ctx.inputs.clone(),
        step_outputs: ctx.step_outputs.clone(),
    }
}

fn resolve_binding(binding: &Binding, snapshot: &BindingsSnapshot) -> serde_json::Value {
    match binding {
        Binding::Input(name) => snapshot.inputs.get(name).cloned().unwrap_or(serde_json::Value::Null),
        Binding::Literal(value) => value.clone(),
        Binding::StepOutput { step, output } => {
            let value = snapshot.step_outputs.get(step).cloned().unwrap_or(serde_json::Value::Null);
            match &value {
                serde_json::Value::Object(map) => map.get(output).cloned().unwrap_or(value.clone()),
                _ => value,
            }
        }
    }
}

fn evaluate_condition(condition: &Condition, ctx: &ExecutionContext, _workflow: &Workflow) -> bool {
    let snapshot = bindings_snapshot(ctx);
    resolve_binding(&condition.left, &snapshot) == condition.equals
}

fn resolve_inputs(step: &Step, snapshot: &BindingsSnapshot) -> HashMap<String, serde_json::Value> {
    step.input_bindings
        .iter()
        .map(|(k, b)| (k.clone(), resolve_binding(b, snapshot)))
        .collect()
}

fn render_task(resolved: &HashMap<String, serde_json::Value>) -> String {
    match resolved.get("task").or_else(|| resolved.get("text")) {
        Some(serde_json::Value::String(s)) => s.clone(),
        _ => serde_json::to_string(resolved).unwrap_or_default(),
    }
}

/// Execute one step to a terminal [`StepResult`], including its own retry
/// loop and (for `review`-gated steps) an approval wait. Free function so a
/// `Parallel` step's children can call it directly, bypassing the top-level
/// scheduler.
async fn run_step(
    caps: &Caps,
    step: &Step,
    snapshot: &BindingsSnapshot,
    cancel: CancelToken,
    correlation_id: Ulid,
) -> StepResult {
    caps.events.publish(Event::new(
        EventKind::WorkflowStepStarted,
        correlation_id,
        serde_json::json!({"step": step.id}),
    ));

    if cancel.is_cancelled() {
        return StepResult {
            step_id: step.id.clone(),
            status: StepStatus::Cancelled,
            output: None,
            failure: Some(FailureRecord {
                kind: "cancelled".into(),
                message: "step cancelled before dispatch".into(),
                entity_id: step.id.clone(),
                remediation_hint: None,
            }),
            attempts: 0,
        };
    }

    let mut attempt = 0u32;
    let outcome = loop {
        attempt += 1;
        let dispatch = tokio::select! {
            biased;
            _ = cancel.cancelled() => Err(ConclaveError::cancelled(format!("step {} cancelled", step.id))),
            result = tokio::time::timeout(
                std::time::Duration::from_secs(step.timeout_secs),
                dispatch_step(caps, step, snapshot, cancel.clone(), correlation_id),
            ) => match result {
                Ok(inner) => inner,
                Err(_) => Err(ConclaveError::timeout(format!("step {} exceeded {}s", step.id, step.timeout_secs))),
            },
        };

        match dispatch {
            Ok(output) => break Ok(output),
            Err(err) if err.is_retryable() && attempt < step.retry.max_attempts => {
                let jitter_unit = rand::thread_rng().gen_range(-1.0..=1.0);
                let delay = step.retry.delay_ms(attempt, jitter_unit);
                warn!(step = %step.id, attempt, error = %err, "step failed, retrying");
                tokio::time::sleep(std::time::Duration::from_millis(delay)).await;
                continue;
            }
            Err(err) => break Err(err),
        }
    };

    match outcome {
        Ok(output) => {
            if let Some(policy) = &step.review {
                let review = caps.review_gate.request(
                    step.id.clone(),
                    "workflow_step",
                    ArtifactContent::Inline(output.clone()),
                    step.id.clone(),
                    policy,
                    correlation_id,
                );
                match caps.review_gate.wait_for(review.review_id, policy, correlation_id).await {
                    Ok(conclave_core::ReviewDecision::Approved) => StepResult {
                        step_id: step.id.clone(),
                        status: StepStatus::Completed,
                        output: Some(output),
                        failure: None,
                        attempts: attempt,
                    },
                    Ok(conclave_core::ReviewDecision::Rejected) => {
                        let err = ConclaveError::policy_denied(format!("step {} rejected in review", step.id));
                        StepResult {
                            step_id: step.id.clone(),
                            status: StepStatus::Failed,
                            output: Some(output),
                            failure: Some(FailureRecord::from_error(step.id.clone(), &err)),
                            attempts: attempt,
                        }
                    }
                    Err(err) => StepResult {
                        step_id: step.id.clone(),
                        status: StepStatus::Failed,
                        output: Some(output),
                        failure: Some(FailureRecord::from_error(step.id.clone(), &err)),
                        attempts: attempt,
                    },
                }
            } else {
                StepResult {
                    step_id: step.id.clone(),
                    status: StepStatus::Completed,
                    output: Some(output),
                    failure: None,
                    attempts: attempt,
                }
            }
        }
        Err(err) => {
            let status = if matches!(err, ConclaveError::Cancelled(_)) {
                StepStatus::Cancelled
            } else {
                StepStatus::Failed
            };
            StepResult {
                step_id: step.id.clone(),
                status,
                output: None,
                failure: Some(FailureRecord::from_error(step.id.clone(), &err)),
                attempts: attempt,
            }
        }
    }
}

async fn dispatch_step(
    caps: &Caps,
    step: &Step,
    snapshot: &BindingsSnapshot,
    cancel: CancelToken,
    correlation_id: Ulid,
) -> ConclaveResult<serde_json::Value> {
    match &step.kind {
        StepKind::Agent { agent } => {
            let resolved = resolve_inputs(step, snapshot);
            let task = render_task(&resolved);
            let turn = caps
                .executor
                .execute(agent, &task, &step.retry, cancel, correlation_id)
                .await?;
            Ok(serde_json::json!({"text": turn.final_text, "execution_id": turn.execution_id.to_string()}))
        }
        StepKind::Tool { tool } => {
            let resolved = resolve_inputs(step, snapshot);
            let args = serde_json::Value::Object(resolved.into_iter().collect());
            let input = ToolInput::new(args).with_cancel(cancel);
            let result = caps.tools.execute_tool(tool, input).await?;
            if result.success {
                Ok(result.output)
            } else {
                Err(ConclaveError::bad_request(
                    result.error.unwrap_or_else(|| format!("tool {tool} failed")),
                ))
            }
        }
        StepKind::Group { group, goal_binding } => {
            let goal_value = resolve_binding(goal_binding, snapshot);
            let goal = match &goal_value {
                serde_json::Value::String(s) => s.clone(),
                other => other.to_string(),
            };
            let def = caps.groups.get(group)?;
            let session = caps.group_engine.collaborate(&def, &goal, cancel).await?;
            Ok(serde_json::json!({
                "session_id": session.session_id.to_string(),
                "status": format!("{:?}", session.status),
                "round": session.round,
                "message_count": session.messages.len(),
                "consensus": session.consensus,
            }))
        }
        StepKind::Branch { .. } | StepKind::Parallel { .. } => {
            // Both are resolved directly by `WorkflowEngine::execute` before
            // any step of their kind reaches `run_step`/`dispatch_step`.
            unreachable!("branch and parallel steps are never generically dispatched")
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use conclave_core::{AgentSpec, Binding as B, OutputBinding, RetryConfig as RC, SpecRegistry};
    use conclave_llm::mock::{MockProvider, ScriptedReply};
    use conclave_tools::registry::ToolRegistry;
    use std::collections::HashMap as Map;

    fn agent_spec(name: &str) -> AgentSpec {
        AgentSpec {
            name: name.to_string(),
            parent: None,
            provider: None,
            model: "mock".to_string(),
            temperature: None,
            max_tokens: None,
            system_prompt: None,
            tools: vec![],
            skills: vec![],
            metadata: Map::new(),
            config: Map::new(),
        }
    }

    fn engine(replies: Vec<ScriptedReply>) -> (WorkflowEngine, Arc<AgentExecutor>) {
        let registry = Arc::new(SpecRegistry::new(Default::default()));
        registry.register(agent_spec("writer"), false).unwrap();
        registry.register(agent_spec("coordinator"), false).unwrap();
        let tools: Arc<dyn ToolExecutor> = Arc::new(ToolRegistry::new().into_executor());
        let events = Arc::new(EventBus::default());
        let provider = Arc::new(MockProvider::with_replies(replies));
        let executor = Arc::new(AgentExecutor::new(registry, provider, tools.clone(), events.clone()));
        let groups = Arc::new(GroupRegistry::new());
        let group_engine = Arc::new(GroupCollaborationEngine::new(executor.clone(), events.clone()));
        let review_gate = Arc::new(ReviewGate::new(events.clone()));
        (
            WorkflowEngine::new(executor.clone(), group_engine, groups, tools, review_gate, events),
            executor,
        )
    }

    fn single_agent_step(id: &str) -> Step {
        Step {
            id: id.to_string(),
            kind: StepKind::Agent { agent: "writer".into() },
            depends_on: vec![],
            input_bindings: {
                let mut m = Map::new();
                m.insert("task".to_string(), B::Input("topic".to_string()));
                m
            },
            retry: RC::default(),
            timeout_secs: 30,
            condition: None,
            review: None,
        }
    }

    #[tokio::test]
    async fn single_step_happy_path_completes() {
        let (engine, _exec) = engine(vec![ScriptedReply::Text("done".into())]);
        let wf = Workflow {
            name: "draft".into(),
            inputs: Map::new(),
            outputs: {
                let mut o = Map::new();
                o.insert(
                    "result".to_string(),
                    OutputBinding { step: "s1".into(), output: "text".into() },
                );
                o
            },
            steps: vec![single_agent_step("s1")],
        };
        let mut inputs = Map::new();
        inputs.insert("topic".to_string(), serde_json::json!("widgets"));

        let ctx = engine
            .execute(&wf, inputs, &ExecuteOptions::default(), CancelToken::new())
            .await
            .unwrap();
        assert_eq!(ctx.status, ExecutionStatus::Completed);
        assert_eq!(ctx.outputs.get("result").unwrap(), "done");
    }

    #[tokio::test]
    async fn fan_out_failure_cancels_siblings_under_fail_fast() {
        let (engine, _exec) = engine(vec![
            ScriptedReply::Error(conclave_llm::mock::MockFailure::Transient),
            ScriptedReply::Error(conclave_llm::mock::MockFailure::Transient),
            ScriptedReply::Error(conclave_llm::mock::MockFailure::Transient),
        ]);
        let mut p1 = single_agent_step("p1");
        p1.retry = RC { max_attempts: 1, ..RC::default() };
        let mut p2 = single_agent_step("p2");
        p2.retry = RC { max_attempts: 1, ..RC::default() };

        let wf = Workflow {
            name: "fanout".into(),
            inputs: Map::new(),
            outputs: Map::new(),
            steps: vec![p1, p2],
        };
        let mut inputs = Map::new();
        inputs.insert("topic".to_string(), serde_json::json!("widgets"));

        let ctx = engine
            .execute(&wf, inputs, &ExecuteOptions::default(), CancelToken::new())
            .await
            .unwrap();
        assert_eq!(ctx.status, ExecutionStatus::Failed);
        assert!(ctx.failure.is_some());
    }

    #[tokio::test]
    async fn unknown_agent_step_fails_the_workflow() {
        let (engine, _exec) = engine(vec![]);
        let step = Step {
            id: "s1".into(),
            kind: StepKind::Agent { agent: "ghost".into() },
            depends_on: vec![],
            input_bindings: Map::new(),
            retry: RC { max_attempts: 1, ..RC::default() },
            timeout_secs: 30,
            condition: None,
            review: None,
        };
        let wf = Workflow {
            name: "broken".into(),
            inputs: Map::new(),
            outputs: Map::new(),
            steps: vec![step],
        };
        let ctx = engine
            .execute(&wf, Map::new(), &ExecuteOptions::default(), CancelToken::new())
            .await
            .unwrap();
        assert_eq!(ctx.status, ExecutionStatus::Failed);
    }

    #[test]
    fn resolve_binding_falls_back_to_whole_output_when_key_missing() {
        let mut snapshot = BindingsSnapshot::default();
        snapshot.step_outputs.insert("s1".to_string(), serde_json::json!("plain"));
        let value = resolve_binding(&B::StepOutput { step: "s1".into(), output: "text".into() }, &snapshot);
        assert_eq!(value, serde_json::json!("plain"));
    }
}
