//! Built-in tool implementations, one module per capability (spec.md
//! §4.3). Each module is feature-gated and requires an explicit
//! allowlist at construction time.

#[cfg(feature = "file")]
pub mod file;

#[cfg(feature = "http")]
pub mod http;

#[cfg(feature = "shell")]
pub mod shell;

pub mod common;
