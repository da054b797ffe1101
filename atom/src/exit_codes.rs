//! Stable exit codes for atom CLI commands.

/// The run terminated with the marker, or the command succeeded.
pub const OK: i32 = 0;
/// The run ended without success (iteration cap, missing agent, runtime error).
pub const FAILED: i32 = 1;
/// Invalid input: bad config or rules, missing working directory, or a
/// missing prompt fragment.
pub const INVALID: i32 = 2;
/// The run was cancelled by Ctrl-C.
pub const INTERRUPTED: i32 = 130;
