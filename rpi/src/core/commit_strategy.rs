//! Rewrite-versus-append decision for rerun commits.

use crate::core::types::CommitStrategy;

/// Decide how a rerun's commits land.
///
/// Only the run's own author may rewrite history. An unknown author (lookup
/// failed or never recorded) and an empty actor both resolve to `Append`.
pub fn resolve(actor: &str, author: Option<&str>) -> CommitStrategy {
    match author {
        Some(author) if !actor.is_empty() && actor == author => CommitStrategy::Rewrite,
        _ => CommitStrategy::Append,
    }
}
