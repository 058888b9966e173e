// Sliding buffer / detector cache error types

use crate::error::ErrorCode;
use std::fmt;

/// Error code range: 2001-2003
const NEGATIVE_INDEX: i32 = 2001;
const EXPIRED_INDEX: i32 = 2002;
const INDEX_OUT_OF_RANGE: i32 = 2003;

/// Errors raised by indexed access into a sliding buffer
///
/// Each variant records the requested index which caused the failure, so
/// callers walking a history window can report exactly where they fell off.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CacheError {
    /// Attempt to access a negative index
    NegativeIndex { index: i64 },

    /// The indexed item was valid once but has been evicted from the window
    ExpiredIndex { index: i64 },

    /// The indexed item lies past the end of the produced data
    IndexOutOfRange { index: i64 },
}

impl CacheError {
    /// The index whose access raised this error
    pub fn index(&self) -> i64 {
        match self {
            CacheError::NegativeIndex { index }
            | CacheError::ExpiredIndex { index }
            | CacheError::IndexOutOfRange { index } => *index,
        }
    }
}

impl ErrorCode for CacheError {
    fn code(&self) -> i32 {
        match self {
            CacheError::NegativeIndex { .. } => NEGATIVE_INDEX,
            CacheError::ExpiredIndex { .. } => EXPIRED_INDEX,
            CacheError::IndexOutOfRange { .. } => INDEX_OUT_OF_RANGE,
        }
    }

    fn message(&self) -> String {
        match self {
            CacheError::NegativeIndex { index } => {
                format!("Attempt to access negative index {}", index)
            }
            CacheError::ExpiredIndex { index } => {
                format!("Indexed item {} no longer available (underflow)", index)
            }
            CacheError::IndexOutOfRange { index } => {
                format!("Attempt to access past end of data at index {}", index)
            }
        }
    }
}

impl fmt::Display for CacheError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "CacheError (code {}): {}", self.code(), self.message())
    }
}

impl std::error::Error for CacheError {}
