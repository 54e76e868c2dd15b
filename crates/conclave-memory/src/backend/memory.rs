//! In-memory `Memory` backend. Lock-free concurrent storage via `DashMap`,
//! cleared on restart - the default backend for tests and callers that
//! don't opt into file persistence.

use async_trait::async_trait;
use conclave_core::{ConclaveResult, Memory, MemoryEntry, MemoryQuery};
use dashmap::DashMap;

#[derive(Default)]
pub struct InMemoryBackend {
    entries: DashMap<String, MemoryEntry>,
}

impl InMemoryBackend {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[async_trait]
impl Memory for InMemoryBackend {
    async fn store(&self, key: &str, entry: MemoryEntry) -> ConclaveResult<()> {
        self.entries.insert(key.to_string(), entry);
        Ok(())
    }

    async fn retrieve(&self, key: &str) -> ConclaveResult<Option<MemoryEntry>> {
        match self.entries.get(key) {
            Some(entry) if entry.is_expired() => {
                drop(entry);
                self.entries.remove(key);
                Ok(None)
            }
            Some(entry) => Ok(Some(entry.clone())),
            None => Ok(None),
        }
    }

    async fn delete(&self, key: &str) -> ConclaveResult<()> {
        self.entries.remove(key);
        Ok(())
    }

    async fn list_keys(&self, prefix: Option<&str>) -> ConclaveResult<Vec<String>> {
        let keys = match prefix {
            Some(p) => self
                .entries
                .iter()
                .filter(|e| e.key().starts_with(p))
                .map(|e| e.key().clone())
                .collect(),
            None => self.entries.iter().map(|e| e.key().clone()).collect(),
        };
        Ok(keys)
    }

    async fn clear(&self) -> ConclaveResult<()> {
        self.entries.clear();
        Ok(())
    }

    async fn search(&self, query: &MemoryQuery) -> ConclaveResult<Vec<MemoryEntry>> {
        let mut results = Vec::new();
        for entry in self.entries.iter() {
            if query.matches(entry.value()) {
                results.push(entry.value().clone());
                if let Some(limit) = query.limit {
                    if results.len() >= limit {
                        break;
                    }
                }
            }
        }
        Ok(results)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn store_then_retrieve_roundtrips() {
        let backend = InMemoryBackend::new();
        backend
            .store("k1", MemoryEntry::new("k1", json!({"a": 1})))
            .await
            .unwrap();
        let got = backend.retrieve("k1").await.unwrap().unwrap();
        assert_eq!(got.value, json!({"a": 1}));
    }

    #[tokio::test]
    async fn expired_entry_is_lazily_removed_on_retrieve() {
        let backend = InMemoryBackend::new();
        backend
            .store("k1", MemoryEntry::new("k1", json!(1)).with_ttl(0))
            .await
            .unwrap();
        assert!(backend.retrieve("k1").await.unwrap().is_none());
        assert!(backend.is_empty());
    }

    #[tokio::test]
    async fn list_keys_filters_by_prefix() {
        let backend = InMemoryBackend::new();
        backend.store("user:1", MemoryEntry::new("user:1", json!(1))).await.unwrap();
        backend.store("admin:1", MemoryEntry::new("admin:1", json!(1))).await.unwrap();
        let keys = backend.list_keys(Some("user:")).await.unwrap();
        assert_eq!(keys, vec!["user:1".to_string()]);
    }

    #[tokio::test]
    async fn clear_empties_backend() {
        let backend = InMemoryBackend::new();
        backend.store("k1", MemoryEntry::new("k1", json!(1))).await.unwrap();
        backend.clear().await.unwrap();
        assert!(backend.is_empty());
    }
}
