//! Conversation/transcript memory contract, ambient stack carried from the
//! teacher's `aof-memory` crate (spec.md never excludes it; not itself a
//! spec.md component). `conclave-core` only defines the trait and data
//! shapes; `conclave-memory` supplies `InMemoryBackend`/`FileBackend`.

use std::collections::HashMap;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::ConclaveResult;

/// One stored fact, keyed and optionally expiring (teacher's
/// `MemoryEntry::new(key, value)`, `is_expired()`).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MemoryEntry {
    pub key: String,
    pub value: serde_json::Value,
    pub timestamp: chrono::DateTime<chrono::Utc>,
    #[serde(default)]
    pub ttl_secs: Option<u64>,
    #[serde(default)]
    pub tags: HashMap<String, String>,
}

impl MemoryEntry {
    pub fn new(key: impl Into<String>, value: serde_json::Value) -> Self {
        Self {
            key: key.into(),
            value,
            timestamp: chrono::Utc::now(),
            ttl_secs: None,
            tags: HashMap::new(),
        }
    }

    pub fn with_ttl(mut self, ttl_secs: u64) -> Self {
        self.ttl_secs = Some(ttl_secs);
        self
    }

    pub fn with_tag(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.tags.insert(key.into(), value.into());
        self
    }

    pub fn is_expired(&self) -> bool {
        match self.ttl_secs {
            Some(ttl) => {
                let age = chrono::Utc::now() - self.timestamp;
                age.num_seconds() >= ttl as i64
            }
            None => false,
        }
    }
}

/// Filter passed to [`Memory::search`] (teacher's `MemoryQuery`).
#[derive(Debug, Clone, Default)]
pub struct MemoryQuery {
    pub prefix: Option<String>,
    pub tag: Option<(String, String)>,
    pub limit: Option<usize>,
}

impl MemoryQuery {
    pub fn matches(&self, entry: &MemoryEntry) -> bool {
        if entry.is_expired() {
            return false;
        }
        if let Some(ref prefix) = self.prefix {
            if !entry.key.starts_with(prefix.as_str()) {
                return false;
            }
        }
        if let Some((ref k, ref v)) = self.tag {
            if entry.tags.get(k).map(|tv| tv.as_str()) != Some(v.as_str()) {
                return false;
            }
        }
        true
    }
}

/// Pluggable key-value store for per-agent transcripts and scratch state
/// (spec.md §9 ambient concern, not a numbered [MODULE]). Optionally
/// consulted by `AgentExecutor` at the start and end of a turn.
#[async_trait]
pub trait Memory: Send + Sync {
    async fn store(&self, key: &str, entry: MemoryEntry) -> ConclaveResult<()>;
    async fn retrieve(&self, key: &str) -> ConclaveResult<Option<MemoryEntry>>;
    async fn delete(&self, key: &str) -> ConclaveResult<()>;
    async fn list_keys(&self, prefix: Option<&str>) -> ConclaveResult<Vec<String>>;
    async fn clear(&self) -> ConclaveResult<()>;
    async fn search(&self, query: &MemoryQuery) -> ConclaveResult<Vec<MemoryEntry>>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn entry_without_ttl_never_expires() {
        let entry = MemoryEntry::new("k", serde_json::json!(1));
        assert!(!entry.is_expired());
    }

    #[test]
    fn entry_with_zero_ttl_is_immediately_expired() {
        let entry = MemoryEntry::new("k", serde_json::json!(1)).with_ttl(0);
        assert!(entry.is_expired());
    }

    #[test]
    fn query_matches_prefix_and_tag() {
        let entry = MemoryEntry::new("conv:1", serde_json::json!("hi")).with_tag("agent", "a1");
        let query = MemoryQuery {
            prefix: Some("conv:".into()),
            tag: Some(("agent".into(), "a1".into())),
            limit: None,
        };
        assert!(query.matches(&entry));

        let mismatched = MemoryQuery {
            prefix: Some("other:".into()),
            tag: None,
            limit: None,
        };
        assert!(!mismatched.matches(&entry));
    }
}
