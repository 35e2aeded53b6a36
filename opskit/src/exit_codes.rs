//! Stable exit codes for opskit CLI commands.

/// Command succeeded.
pub const OK: i32 = 0;
/// Invalid config or arguments, or a fatal error before any work was done.
pub const INVALID: i32 = 1;
/// `backup`/`prune` finished, but at least one export or deletion failed.
pub const PARTIAL: i32 = 2;
/// `repeat` saw a failing iteration, or a `bootstrap` step failed.
pub const FAILED: i32 = 3;
