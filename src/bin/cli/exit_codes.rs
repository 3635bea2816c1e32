//! Exit codes for the CLI tool.

use ragzip::Error;

/// Operation completed.
pub const SUCCESS: i32 = 0;
/// Invalid command-line arguments or configuration.
pub const BAD_ARGS: i32 = 1;
/// Processing failed (I/O, format, or integrity error).
pub const PROCESSING_ERROR: i32 = 2;

/// Maps a ragzip error to an exit code.
///
/// Configuration errors are argument errors by the CLI contract; every
/// other failure happened while processing.
pub fn error_to_exit_code(error: &Error) -> i32 {
    match error {
        Error::InvalidConfig(_) => BAD_ARGS,
        _ => PROCESSING_ERROR,
    }
}
