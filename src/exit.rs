//! Process exit codes shared by the builder and launcher binaries.

/// Successful execution
pub const EXIT_SUCCESS: i32 = 0;

/// Panic or unrecoverable error
pub const EXIT_PANIC: i32 = 101;

/// PSPF format error (invalid structure, failed integrity check)
pub const EXIT_PSPF_ERROR: i32 = 102;

/// Extraction error (slot extraction, disk space, lock timeout)
pub const EXIT_EXTRACTION_ERROR: i32 = 103;

/// Execution error (failed to spawn or exec the payload)
pub const EXIT_EXECUTION_ERROR: i32 = 104;

/// Invalid command-line arguments
pub const EXIT_INVALID_ARGS: i32 = 105;

/// I/O error (file not found, permission denied, disk error)
pub const EXIT_IO_ERROR: i32 = 106;
