//! HTTP helpers for provider REST calls, key retrieval, and cache semantics.

pub mod client;
pub mod retry;
pub mod semantics;
