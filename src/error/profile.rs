// Profile store error types

use crate::error::ErrorCode;
use std::fmt;

/// Error code range: 3001-3003
const PROFILE_NOT_FOUND: i32 = 3001;
const PROFILE_PROTOCOL_MISMATCH: i32 = 3002;
const PROFILE_MALFORMED: i32 = 3003;

/// Errors raised by the profile store collaborator
#[derive(Debug, Clone, PartialEq)]
pub enum ProfileError {
    /// No profile with the requested name exists in the store
    NotFound { name: String },

    /// The store's protocol tag does not match the required literal
    ProtocolMismatch { found: String },

    /// The store document or a stored profile could not be parsed
    Malformed { reason: String },
}

impl ErrorCode for ProfileError {
    fn code(&self) -> i32 {
        match self {
            ProfileError::NotFound { .. } => PROFILE_NOT_FOUND,
            ProfileError::ProtocolMismatch { .. } => PROFILE_PROTOCOL_MISMATCH,
            ProfileError::Malformed { .. } => PROFILE_MALFORMED,
        }
    }

    fn message(&self) -> String {
        match self {
            ProfileError::NotFound { name } => {
                format!("Profile '{}' not found.", name)
            }
            ProfileError::ProtocolMismatch { found } => {
                format!("Protocol of configuration file is incompatible: '{}'", found)
            }
            ProfileError::Malformed { reason } => {
                format!("Malformed profile data: {}", reason)
            }
        }
    }
}

impl fmt::Display for ProfileError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ProfileError (code {}): {}", self.code(), self.message())
    }
}

impl std::error::Error for ProfileError {}

impl From<std::io::Error> for ProfileError {
    fn from(err: std::io::Error) -> Self {
        ProfileError::Malformed {
            reason: err.to_string(),
        }
    }
}

impl From<serde_json::Error> for ProfileError {
    fn from(err: serde_json::Error) -> Self {
        ProfileError::Malformed {
            reason: err.to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_profile_error_codes() {
        let err = ProfileError::NotFound {
            name: "piano".to_string(),
        };
        assert_eq!(err.code(), 3001);
        assert!(err.message().contains("piano"));

        let err = ProfileError::ProtocolMismatch {
            found: "v1".to_string(),
        };
        assert_eq!(err.code(), 3002);

        let err = ProfileError::Malformed {
            reason: "unexpected end of input".to_string(),
        };
        assert_eq!(err.code(), 3003);
    }

    #[test]
    fn test_from_io_error() {
        let io_err = std::io::Error::other("disk gone");
        let err: ProfileError = io_err.into();
        match err {
            ProfileError::Malformed { reason } => assert!(reason.contains("disk gone")),
            _ => panic!("Expected Malformed"),
        }
    }
}
