//! Research -> Plan -> Implement pipeline controller.
//!
//! A labelled work item becomes a [`core::types::PipelineRun`] that an agent
//! drives through three stages, each committed to the run's branch. Reviewers
//! can rewind a run from its review object with `replan` or `reresearch`, and
//! a scheduled sweep removes artifacts of runs whose review was finalized.
//!
//! - **[`core`]**: Pure, deterministic logic (classification, stage machine,
//!   commit strategy, sweep eligibility). No I/O.
//! - **[`io`]**: Side-effecting adapters (filesystem, locks, git, review host,
//!   agent processes). Behind traits so tests can script them.
//!
//! Orchestration modules ([`controller`], [`dispatch`], [`sweep`]) coordinate
//! core logic with I/O to implement CLI commands.

pub mod controller;
pub mod core;
pub mod dispatch;
pub mod errors;
pub mod exit_codes;
pub mod io;
pub mod logging;
pub mod sweep;
#[cfg(any(test, feature = "test-support"))]
pub mod test_support;
