//! Exit code partition (spec.md §6 "Exit codes: 0 success; non-zero error
//! codes partitioned by kind").

use lumenflow::error::{ErrorKind, LumenError};

/// Map a failed operation's error to a process exit code. `0` is reserved
/// for success and is never returned here.
#[must_use]
pub const fn code_for(err: &LumenError) -> i32 {
    match err.kind() {
        ErrorKind::Validation => 2,
        ErrorKind::Concurrency => 3,
        ErrorKind::Io => 4,
        ErrorKind::Git => 5,
        ErrorKind::Recovery => 6,
        ErrorKind::Fatal => 7,
    }
}
