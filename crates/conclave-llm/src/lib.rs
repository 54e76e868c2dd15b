//! `ProviderPort` implementations for the Conclave orchestration runtime
//! (spec.md §4.2). `conclave-core` owns the trait; this crate owns the
//! wire-format adapters downstream of it, the way the teacher's `aof-llm`
//! sits downstream of `aof-core`.

#[cfg(feature = "anthropic")]
pub mod anthropic;
#[cfg(feature = "mock")]
pub mod mock;

#[cfg(feature = "anthropic")]
pub use anthropic::{AnthropicConfig, AnthropicProvider};
#[cfg(feature = "mock")]
pub use mock::MockProvider;
