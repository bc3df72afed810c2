//! Stable exit codes for rpi CLI commands.

/// Command succeeded.
pub const OK: i32 = 0;
/// Command failed: agent, git, review host, config or I/O errors.
pub const FAILED: i32 = 1;
/// `rpi dispatch` received an event not addressed to the pipeline.
pub const IGNORED: i32 = 2;
/// The request was refused: missing upstream artifact, finalized or unknown
/// review, or a conflicting active run.
pub const REJECTED: i32 = 3;
