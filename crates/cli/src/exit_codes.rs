//! CLI Exit Code Registry
//!
//! This is the single source of truth for all CLI exit codes.
//! Exit codes are part of the shell contract — scripts rely on them.
//!
//! # Exit Code Ranges
//!
//! | Range   | Domain           | Description                              |
//! |---------|------------------|------------------------------------------|
//! | 0       | Universal        | Success (per-record failures included)   |
//! | 1       | lookup           | Entity not found                         |
//! | 2       | Universal        | CLI usage error (bad args)               |
//! | 3-9     | input            | Source files and configuration           |
//! | 10-19   | target           | Target/source API failures               |
//!
//! Per-record failures never change the exit code; they are reported in
//! the run summary only.
//!
//! # Adding New Exit Codes
//!
//! 1. Add the constant in the appropriate range
//! 2. Document what triggers it
//! 3. Update the table above
//! 4. Wire it into the relevant command's error handling

use invsync_recon::ApiError;

// =============================================================================
// Universal (0-2)
// =============================================================================

/// Success - the run completed, whatever its per-record outcomes.
pub const EXIT_SUCCESS: u8 = 0;

/// `lookup` found nothing.
pub const EXIT_NOT_FOUND: u8 = 1;

/// Usage error - bad arguments, invalid option values.
pub const EXIT_USAGE: u8 = 2;

// =============================================================================
// Input (3-9)
// =============================================================================

/// A required input file is missing, unreadable, or lacks a required column.
pub const EXIT_MISSING_INPUT: u8 = 3;

/// Config file unreadable or invalid, or a bad `INVSYNC_*` override.
pub const EXIT_CONFIG: u8 = 4;

/// Output file could not be written.
pub const EXIT_OUTPUT: u8 = 5;

// =============================================================================
// Target (10-19)
// =============================================================================

/// Authentication rejected (401/403). The run was aborted.
pub const EXIT_AUTH: u8 = 10;

/// No credentials supplied (flag or environment).
pub const EXIT_MISSING_CREDENTIALS: u8 = 11;

/// An initial listing could not be fetched, so nothing was reconciled.
pub const EXIT_LISTING: u8 = 12;

/// Map an API error raised outside per-record processing.
pub fn api_exit_code(err: &ApiError) -> u8 {
    if err.is_fatal() {
        EXIT_AUTH
    } else {
        EXIT_LISTING
    }
}
