//! I/O adapters for the pipeline controller.

pub mod agent;
pub mod artifacts;
pub mod atomic;
pub mod config;
pub mod events;
pub mod git;
pub mod init;
pub mod lock;
pub mod process;
pub mod prompt;
pub mod review;
pub mod run_store;
