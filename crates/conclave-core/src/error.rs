//! Error taxonomy (spec.md §7). One `thiserror`-derived enum per the
//! teacher's convention (`AofError` in `aof-core`), generalized to the kinds
//! spec.md §7 names, with the same lowercase constructor-method style.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConclaveError {
    #[error("invalid spec: {0}")]
    InvalidSpec(String),

    #[error("invalid workflow: {0}")]
    InvalidWorkflow(String),

    #[error("invalid group: {0}")]
    InvalidGroup(String),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("cycle detected: {0}")]
    Cycle(String),

    #[error("duplicate name: {0}")]
    DuplicateName(String),

    #[error("in use: {0}")]
    InUse(String),

    #[error("policy denied: {0}")]
    PolicyDenied(String),

    #[error("rate limited: {0}")]
    RateLimited(String),

    #[error("transient failure: {0}")]
    Transient(String),

    #[error("timeout: {0}")]
    Timeout(String),

    #[error("authentication failure: {0}")]
    Auth(String),

    #[error("quota exceeded: {0}")]
    QuotaExceeded(String),

    #[error("model unavailable: {0}")]
    ModelUnavailable(String),

    #[error("bad request: {0}")]
    BadRequest(String),

    #[error("resource exhausted: {0}")]
    ResourceExhausted(String),

    #[error("out of memory: {0}")]
    Oom(String),

    #[error("at capacity: {0}")]
    AtCapacity(String),

    #[error("backend unavailable: {0}")]
    BackendUnavailable(String),

    #[error("cancelled: {0}")]
    Cancelled(String),

    #[error("configuration error: {0}")]
    ConfigurationError(String),

    #[error("consensus failed: {0}")]
    ConsensusFailed(String),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("yaml error: {0}")]
    Yaml(#[from] serde_yaml::Error),
}

impl ConclaveError {
    pub fn invalid_spec(msg: impl Into<String>) -> Self {
        Self::InvalidSpec(msg.into())
    }
    pub fn invalid_workflow(msg: impl Into<String>) -> Self {
        Self::InvalidWorkflow(msg.into())
    }
    pub fn invalid_group(msg: impl Into<String>) -> Self {
        Self::InvalidGroup(msg.into())
    }
    pub fn not_found(msg: impl Into<String>) -> Self {
        Self::NotFound(msg.into())
    }
    pub fn cycle(msg: impl Into<String>) -> Self {
        Self::Cycle(msg.into())
    }
    pub fn duplicate_name(msg: impl Into<String>) -> Self {
        Self::DuplicateName(msg.into())
    }
    pub fn in_use(msg: impl Into<String>) -> Self {
        Self::InUse(msg.into())
    }
    pub fn policy_denied(msg: impl Into<String>) -> Self {
        Self::PolicyDenied(msg.into())
    }
    pub fn rate_limited(msg: impl Into<String>) -> Self {
        Self::RateLimited(msg.into())
    }
    pub fn transient(msg: impl Into<String>) -> Self {
        Self::Transient(msg.into())
    }
    pub fn timeout(msg: impl Into<String>) -> Self {
        Self::Timeout(msg.into())
    }
    pub fn auth(msg: impl Into<String>) -> Self {
        Self::Auth(msg.into())
    }
    pub fn quota_exceeded(msg: impl Into<String>) -> Self {
        Self::QuotaExceeded(msg.into())
    }
    pub fn model_unavailable(msg: impl Into<String>) -> Self {
        Self::ModelUnavailable(msg.into())
    }
    pub fn bad_request(msg: impl Into<String>) -> Self {
        Self::BadRequest(msg.into())
    }
    pub fn resource_exhausted(msg: impl Into<String>) -> Self {
        Self::ResourceExhausted(msg.into())
    }
    pub fn oom(msg: impl Into<String>) -> Self {
        Self::Oom(msg.into())
    }
    pub fn at_capacity(msg: impl Into<String>) -> Self {
        Self::AtCapacity(msg.into())
    }
    pub fn backend_unavailable(msg: impl Into<String>) -> Self {
        Self::BackendUnavailable(msg.into())
    }
    pub fn cancelled(msg: impl Into<String>) -> Self {
        Self::Cancelled(msg.into())
    }
    pub fn configuration_error(msg: impl Into<String>) -> Self {
        Self::ConfigurationError(msg.into())
    }
    pub fn consensus_failed(msg: impl Into<String>) -> Self {
        Self::ConsensusFailed(msg.into())
    }

    /// Kind name, used for structured failure records (spec.md §7) and event
    /// payloads rather than matching on the enum variant directly.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::InvalidSpec(_) => "invalid_spec",
            Self::InvalidWorkflow(_) => "invalid_workflow",
            Self::InvalidGroup(_) => "invalid_group",
            Self::NotFound(_) => "not_found",
            Self::Cycle(_) => "cycle",
            Self::DuplicateName(_) => "duplicate_name",
            Self::InUse(_) => "in_use",
            Self::PolicyDenied(_) => "policy_denied",
            Self::RateLimited(_) => "rate_limited",
            Self::Transient(_) => "transient",
            Self::Timeout(_) => "timeout",
            Self::Auth(_) => "auth",
            Self::QuotaExceeded(_) => "quota_exceeded",
            Self::ModelUnavailable(_) => "model_unavailable",
            Self::BadRequest(_) => "bad_request",
            Self::ResourceExhausted(_) => "resource_exhausted",
            Self::Oom(_) => "oom",
            Self::AtCapacity(_) => "at_capacity",
            Self::BackendUnavailable(_) => "backend_unavailable",
            Self::Cancelled(_) => "cancelled",
            Self::ConfigurationError(_) => "configuration_error",
            Self::ConsensusFailed(_) => "consensus_failed",
            Self::Serialization(_) => "invalid_spec",
            Self::Yaml(_) => "invalid_spec",
        }
    }

    /// Whether a failure of this kind is retryable under a step's retry
    /// policy (spec.md §7 propagation policy).
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::RateLimited(_) | Self::Transient(_) | Self::Timeout(_)
        )
    }
}

pub type ConclaveResult<T> = Result<T, ConclaveError>;
