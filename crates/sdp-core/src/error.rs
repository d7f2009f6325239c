//! Error types for session description handling

use thiserror::Error;

use crate::types::MediaKind;

/// Result type for SDP operations
pub type Result<T> = std::result::Result<T, SdpError>;

/// Errors produced while building, parsing or translating session descriptions
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SdpError {
    /// A line or attribute could not be parsed
    #[error("Malformed SDP line {line:?}: {reason}")]
    Parse { line: String, reason: String },

    /// The answer has no usable section for a requested media kind
    #[error("Answer has no usable m={kind} section")]
    MissingMediaSection { kind: MediaKind },

    /// None of the remote codecs matched the local requirement for a kind
    #[error("No matching {kind} codec, wanted one of {wanted:?}")]
    NoMatchingCodec { kind: MediaKind, wanted: Vec<String> },

    /// A capability record failed validation
    #[error("Invalid capability: {reason}")]
    InvalidCapability { reason: String },

    /// The offer could not be assembled from the given inputs
    #[error("Cannot build offer: {reason}")]
    Build { reason: String },
}

impl SdpError {
    /// Create a parse error for the given line
    pub fn parse(line: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::Parse {
            line: line.into(),
            reason: reason.into(),
        }
    }

    /// Create a capability validation error
    pub fn invalid_capability(reason: impl Into<String>) -> Self {
        Self::InvalidCapability {
            reason: reason.into(),
        }
    }

    /// Create an offer build error
    pub fn build(reason: impl Into<String>) -> Self {
        Self::Build {
            reason: reason.into(),
        }
    }
}
