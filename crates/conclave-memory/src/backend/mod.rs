//! Backend implementations of `conclave_core::Memory`.

pub mod file;
pub mod memory;

use std::path::Path;
use std::sync::Arc;

use conclave_core::{ConclaveResult, Memory, MemoryEntry, MemoryQuery};

use self::file::FileBackend;
use self::memory::InMemoryBackend;

/// A small enum wrapper over the two built-in backends, so callers that
/// just want "in-memory or file, picked at config time" don't need to hold
/// a `dyn Memory` themselves.
#[derive(Clone)]
pub enum SimpleMemory {
    InMemory(Arc<InMemoryBackend>),
    File(Arc<FileBackend>),
}

impl SimpleMemory {
    pub fn in_memory() -> Self {
        Self::InMemory(Arc::new(InMemoryBackend::new()))
    }

    pub async fn file(path: impl AsRef<Path>) -> ConclaveResult<Self> {
        Ok(Self::File(Arc::new(FileBackend::new(path).await?)))
    }
}

#[async_trait::async_trait]
impl Memory for SimpleMemory {
    async fn store(&self, key: &str, entry: MemoryEntry) -> ConclaveResult<()> {
        match self {
            Self::InMemory(b) => b.store(key, entry).await,
            Self::File(b) => b.store(key, entry).await,
        }
    }

    async fn retrieve(&self, key: &str) -> ConclaveResult<Option<MemoryEntry>> {
        match self {
            Self::InMemory(b) => b.retrieve(key).await,
            Self::File(b) => b.retrieve(key).await,
        }
    }

    async fn delete(&self, key: &str) -> ConclaveResult<()> {
        match self {
            Self::InMemory(b) => b.delete(key).await,
            Self::File(b) => b.delete(key).await,
        }
    }

    async fn list_keys(&self, prefix: Option<&str>) -> ConclaveResult<Vec<String>> {
        match self {
            Self::InMemory(b) => b.list_keys(prefix).await,
            Self::File(b) => b.list_keys(prefix).await,
        }
    }

    async fn clear(&self) -> ConclaveResult<()> {
        match self {
            Self::InMemory(b) => b.clear().await,
            Self::File(b) => b.clear().await,
        }
    }

    async fn search(&self, query: &MemoryQuery) -> ConclaveResult<Vec<MemoryEntry>> {
        match self {
            Self::InMemory(b) => b.search(query).await,
            Self::File(b) => b.search(query).await,
        }
    }
}
