//! Isolated execution environment data model (spec.md §3, §4.7). No direct
//! teacher analog - `aof-tools/src/tools/docker.rs`'s argv-building
//! convention for process invocation is the model for
//! `conclave-runtime::sandbox::SandboxManager`'s backend dispatch; the types
//! here are authored fresh against spec.md's invariants and boundary values.

use serde::{Deserialize, Serialize};

use crate::error::ConclaveError;

/// Network isolation level granted to a sandbox (spec.md §3).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NetworkPolicy {
    None,
    Bridged,
    Host,
}

/// Filesystem mount mode for a sandbox's root (spec.md §3).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FilesystemMode {
    ReadOnlyRoot,
    Writable,
}

/// Lifecycle state of a [`Sandbox`] handle (spec.md §3).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SandboxState {
    Provisioning,
    Ready,
    Executing,
    Suspended,
    Destroyed,
}

/// Which failure kinds trigger `AutoRollbackOnError` (spec.md §4.7).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RollbackTrigger {
    OnError,
    OnTimeout,
    OnOom,
}

/// Resource ceilings enforced on a sandbox (spec.md §4.7 bounds):
/// CPU share `0.1..=16`, memory `128 MiB..=16 GiB`, disk `256 MiB..=10 GiB`,
/// wall-clock timeout `10s..=3600s`.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct ResourceLimits {
    pub cpu_share: f64,
    pub memory_bytes: u64,
    pub disk_bytes: u64,
    pub timeout_secs: u64,
}

pub const MIN_CPU_SHARE: f64 = 0.1;
pub const MAX_CPU_SHARE: f64 = 16.0;
pub const MIN_MEMORY_BYTES: u64 = 128 * 1024 * 1024;
pub const MAX_MEMORY_BYTES: u64 = 16 * 1024 * 1024 * 1024;
pub const MIN_DISK_BYTES: u64 = 256 * 1024 * 1024;
pub const MAX_DISK_BYTES: u64 = 10 * 1024 * 1024 * 1024;
pub const MIN_TIMEOUT_SECS: u64 = 10;
pub const MAX_TIMEOUT_SECS: u64 = 3600;

impl ResourceLimits {
    pub fn validate(&self) -> Result<(), ConclaveError> {
        if !(MIN_CPU_SHARE..=MAX_CPU_SHARE).contains(&self.cpu_share) {
            return Err(ConclaveError::invalid_spec(format!(
                "cpu_share {} out of bounds [{}, {}]",
                self.cpu_share, MIN_CPU_SHARE, MAX_CPU_SHARE
            )));
        }
        if !(MIN_MEMORY_BYTES..=MAX_MEMORY_BYTES).contains(&self.memory_bytes) {
            return Err(ConclaveError::invalid_spec(format!(
                "memory_bytes {} out of bounds [{}, {}]",
                self.memory_bytes, MIN_MEMORY_BYTES, MAX_MEMORY_BYTES
            )));
        }
        if !(MIN_DISK_BYTES..=MAX_DISK_BYTES).contains(&self.disk_bytes) {
            return Err(ConclaveError::invalid_spec(format!(
                "disk_bytes {} out of bounds [{}, {}]",
                self.disk_bytes, MIN_DISK_BYTES, MAX_DISK_BYTES
            )));
        }
        if !(MIN_TIMEOUT_SECS..=MAX_TIMEOUT_SECS).contains(&self.timeout_secs) {
            return Err(ConclaveError::invalid_spec(format!(
                "timeout_secs {} out of bounds [{}, {}]",
                self.timeout_secs, MIN_TIMEOUT_SECS, MAX_TIMEOUT_SECS
            )));
        }
        Ok(())
    }
}

/// Snapshot/rollback retention policy (spec.md §4.7: keep N most recent,
/// at most M hours).
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct RetentionPolicy {
    pub max_snapshots: usize,
    pub max_age_hours: i64,
}

impl Default for RetentionPolicy {
    fn default() -> Self {
        Self {
            max_snapshots: 3,
            max_age_hours: 24,
        }
    }
}

/// Input to `SandboxManager::Create` (spec.md §4.7).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SandboxConfig {
    pub limits: ResourceLimits,
    pub network_policy: NetworkPolicy,
    pub filesystem_mode: FilesystemMode,
    #[serde(default)]
    pub rollback_triggers: Vec<RollbackTrigger>,
    #[serde(default)]
    pub backup_before_rollback: bool,
    #[serde(default)]
    pub retention: RetentionPolicy,
}

impl SandboxConfig {
    pub fn validate(&self) -> Result<(), ConclaveError> {
        self.limits.validate()
    }
}

/// An isolated execution environment handle (spec.md §3 `Sandbox`). Owned by
/// `SandboxManager`; handles returned to callers are references, not
/// ownership.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Sandbox {
    pub sandbox_id: ulid::Ulid,
    pub config: SandboxConfig,
    pub state: SandboxState,
    pub snapshots: Vec<ulid::Ulid>,
}

/// Point-in-time capture of a sandbox's mutable filesystem (spec.md §3
/// `Snapshot`). Append-only.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Snapshot {
    pub snapshot_id: ulid::Ulid,
    pub sandbox_id: ulid::Ulid,
    pub created_at: chrono::DateTime<chrono::Utc>,
    pub size_bytes: u64,
}

/// A resource cap breached during `Execute` (spec.md §6 execution result
/// `resource_breaches`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResourceBreach {
    Memory,
    Cpu,
    Disk,
    WallClock,
}

/// Result of `SandboxManager::Execute` (spec.md §6).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SandboxExecutionResult {
    pub exit_code: i32,
    pub stdout_bytes: Vec<u8>,
    pub stderr_bytes: Vec<u8>,
    pub duration_ms: u64,
    pub peak_memory_bytes: u64,
    pub peak_cpu_share: f64,
    #[serde(default)]
    pub resource_breaches: Vec<ResourceBreach>,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn limits(cpu: f64) -> ResourceLimits {
        ResourceLimits {
            cpu_share: cpu,
            memory_bytes: MIN_MEMORY_BYTES,
            disk_bytes: MIN_DISK_BYTES,
            timeout_secs: MIN_TIMEOUT_SECS,
        }
    }

    #[test]
    fn cpu_share_boundary_accepted_and_rejected() {
        assert!(limits(0.1).validate().is_ok());
        assert!(limits(0.09).validate().is_err());
        assert!(limits(16.0).validate().is_ok());
        assert!(limits(16.01).validate().is_err());
    }

    #[test]
    fn timeout_boundary() {
        let mut l = limits(1.0);
        l.timeout_secs = 9;
        assert!(l.validate().is_err());
        l.timeout_secs = 3601;
        assert!(l.validate().is_err());
        l.timeout_secs = 3600;
        assert!(l.validate().is_ok());
    }
}
