// Detector bank error types and constants

use crate::error::ErrorCode;
use log::error;
use std::fmt;

/// Error code range: 1001-1001
const INVALID_ARGUMENT: i32 = 1001;

/// Log a bank error with structured context
///
/// Logs the error code and message along with the call site supplied by
/// the caller. Logging is non-blocking and never panics.
pub fn log_bank_error(err: &BankError, context: &str) {
    error!(
        "Bank error in {}: code={}, component=DetectorBank, message={}",
        context,
        err.code(),
        err.message()
    );
}

/// Errors raised while constructing or driving a `DetectorBank`
///
/// The DSP core recovers no failures: every error aborts the current call
/// and surfaces to the caller.
#[derive(Debug, Clone, PartialEq)]
pub enum BankError {
    /// A constructor or operation argument was rejected
    InvalidArgument { reason: String },
}

impl BankError {
    /// Shorthand for the common construction-validation failure
    pub fn invalid<S: Into<String>>(reason: S) -> Self {
        BankError::InvalidArgument {
            reason: reason.into(),
        }
    }
}

impl ErrorCode for BankError {
    fn code(&self) -> i32 {
        match self {
            BankError::InvalidArgument { .. } => INVALID_ARGUMENT,
        }
    }

    fn message(&self) -> String {
        match self {
            BankError::InvalidArgument { reason } => reason.clone(),
        }
    }
}

impl fmt::Display for BankError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "BankError (code {}): {}", self.code(), self.message())
    }
}

impl std::error::Error for BankError {}
