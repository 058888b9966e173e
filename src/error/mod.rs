// Error types for the detector bank library
//
// This module defines custom error types for the detector bank, the sliding
// result cache and the profile store, providing structured error handling
// with stable numeric codes.

mod bank;
mod cache;
mod profile;

pub use bank::{log_bank_error, BankError};
pub use cache::CacheError;
pub use profile::ProfileError;

/// Error codes for structured error reporting
///
/// This trait provides a standard way to get error codes and messages
/// from custom error types, enabling consistent error handling at the
/// library boundary.
pub trait ErrorCode {
    /// Get the numeric error code
    fn code(&self) -> i32;

    /// Get the human-readable error message
    fn message(&self) -> String;
}
