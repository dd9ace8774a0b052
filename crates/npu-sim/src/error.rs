// SPDX-License-Identifier: AGPL-3.0-only

//! Error types for simulator operations.

use thiserror::Error;

/// Result type alias for simulator operations.
pub type Result<T> = std::result::Result<T, NpuError>;

/// Errors observable outside the core.
///
/// The core itself has no recoverable-error channel: malformed
/// microcode and protocol violations are undefined/ignored inputs, not
/// faults. The only externally observable failure is the absence of
/// `done` within a caller-chosen cycle budget.
#[derive(Debug, Error)]
pub enum NpuError {
    /// The device did not assert `done` within the cycle budget.
    #[error("device not done after {cycles} cycles")]
    Timeout {
        /// Cycles spent polling before giving up.
        cycles: u64,
    },

    /// A load target does not fit the addressed store.
    #[error("region out of bounds: {what} at {offset:#x}+{len:#x} exceeds {size:#x}")]
    OutOfBounds {
        /// What was being placed.
        what: &'static str,
        /// Requested byte offset.
        offset: usize,
        /// Requested byte length.
        len: usize,
        /// Size of the addressed store.
        size: usize,
    },
}

impl NpuError {
    /// Create a timeout error.
    pub const fn timeout(cycles: u64) -> Self {
        Self::Timeout { cycles }
    }

    /// Create an out-of-bounds error.
    pub const fn out_of_bounds(
        what: &'static str,
        offset: usize,
        len: usize,
        size: usize,
    ) -> Self {
        Self::OutOfBounds {
            what,
            offset,
            len,
            size,
        }
    }
}
