//! Deterministic, pure logic shared by the pipeline controller.
//!
//! Core modules must be free of I/O side effects. They operate on in-memory
//! data structures and take the current time as an argument, so every
//! outcome is reproducible in tests.

pub mod artifact;
pub mod commit_strategy;
pub mod feature_id;
pub mod stage;
pub mod sweep_policy;
pub mod trigger;
pub mod types;
