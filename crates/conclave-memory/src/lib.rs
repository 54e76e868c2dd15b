//! Conclave Memory - pluggable transcript/scratch-state backends for agents
//! (spec.md §9 ambient concern, carried from the teacher's `aof-memory`
//! crate unchanged in spirit: spec.md never excludes it).
//!
//! ## Memory Backends
//!
//! - **InMemoryBackend**: lock-free concurrent storage cleared on restart (default).
//! - **FileBackend**: persistent JSON file storage that survives agent restarts.
//!
//! ## Usage
//!
//! ```rust,no_run
//! use conclave_memory::SimpleMemory;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! // In-memory (ephemeral)
//! let memory = SimpleMemory::in_memory();
//!
//! // File-based (persistent)
//! let memory = SimpleMemory::file("./agent-memory.json").await?;
//! # Ok(())
//! # }
//! ```

pub mod backend;

pub use backend::file::FileBackend;
pub use backend::memory::InMemoryBackend;
pub use backend::SimpleMemory;

pub use conclave_core::{Memory, MemoryEntry, MemoryQuery};
