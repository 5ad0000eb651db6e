//! Cucumber step definitions for interface tests.

pub mod event_store;
