//! Shared helpers.
//!
//! Tracing bootstrap for binaries and tests, and conflict retry for callers
//! of the event store.

pub mod bootstrap;
pub mod retry;
