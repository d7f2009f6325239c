//! Error types for the bridge orchestrator
//!
//! Every error carries a [`ErrorScope`] that decides how far a failure
//! reaches: only the request that caused it, the whole session, or the
//! process.

use castbridge_sdp_core::{MediaKind, SdpError};
use thiserror::Error;

use crate::session::BridgeState;

/// Result type for bridge operations
pub type Result<T> = std::result::Result<T, BridgeError>;

/// How far an error propagates
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorScope {
    /// Fail the current request, keep the session
    Request,
    /// Tear the session down
    Session,
    /// Engine connection lost; the process cannot serve further sessions
    Process,
}

/// Errors raised by the bridge orchestrator
#[derive(Debug, Error)]
pub enum BridgeError {
    /// An offer or answer was malformed or rejected, or an engine step failed
    #[error("Negotiation failed for session {session_id}: {reason}")]
    Negotiation { session_id: String, reason: String },

    /// The answer is missing a requested media kind
    #[error("Answer for session {session_id} has no usable m={kind} section")]
    MissingMediaSection { session_id: String, kind: MediaKind },

    /// No remote codec matched the required local codecs
    #[error("No matching {kind} codec for session {session_id}, wanted one of {wanted:?}")]
    NoMatchingCodec {
        session_id: String,
        kind: MediaKind,
        wanted: Vec<String>,
    },

    /// No free block of ports in the configured range
    #[error("Cannot allocate {requested} ports in range {min}-{max}")]
    PortExhaustion { requested: usize, min: u16, max: u16 },

    /// The egress process failed to spawn or died unexpectedly
    #[error("Egress process for session {session_id} failed: {reason}")]
    EgressProcess { session_id: String, reason: String },

    /// Connection to a media engine was lost
    #[error("Media engine {engine} unavailable: {reason}")]
    EngineUnavailable { engine: String, reason: String },

    #[error("Session not found: {session_id}")]
    SessionNotFound { session_id: String },

    /// The requested operation is not valid in the session's current state
    #[error("Cannot {operation} for session {session_id} in state {state}")]
    InvalidState {
        session_id: String,
        state: BridgeState,
        operation: String,
    },

    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// A signaling message could not be decoded
    #[error("Signaling error: {0}")]
    Signaling(String),
}

impl BridgeError {
    /// Create a negotiation error
    pub fn negotiation(session_id: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::Negotiation {
            session_id: session_id.into(),
            reason: reason.into(),
        }
    }

    /// Create an egress process error
    pub fn egress(session_id: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::EgressProcess {
            session_id: session_id.into(),
            reason: reason.into(),
        }
    }

    /// Create an engine unavailable error
    pub fn engine_unavailable(engine: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::EngineUnavailable {
            engine: engine.into(),
            reason: reason.into(),
        }
    }

    pub fn session_not_found(session_id: impl Into<String>) -> Self {
        Self::SessionNotFound {
            session_id: session_id.into(),
        }
    }

    pub fn invalid_state(session_id: impl Into<String>, state: BridgeState, operation: impl Into<String>) -> Self {
        Self::InvalidState {
            session_id: session_id.into(),
            state,
            operation: operation.into(),
        }
    }

    pub fn configuration(reason: impl Into<String>) -> Self {
        Self::Configuration(reason.into())
    }

    pub fn signaling(reason: impl Into<String>) -> Self {
        Self::Signaling(reason.into())
    }

    /// Map an SDP failure onto the bridge taxonomy for `session_id`
    pub fn from_sdp(session_id: impl Into<String>, error: SdpError) -> Self {
        let session_id = session_id.into();
        match error {
            SdpError::MissingMediaSection { kind } => Self::MissingMediaSection { session_id, kind },
            SdpError::NoMatchingCodec { kind, wanted } => Self::NoMatchingCodec {
                session_id,
                kind,
                wanted,
            },
            other => Self::Negotiation {
                session_id,
                reason: other.to_string(),
            },
        }
    }

    /// How far this error propagates
    pub fn scope(&self) -> ErrorScope {
        match self {
            BridgeError::PortExhaustion { .. }
            | BridgeError::SessionNotFound { .. }
            | BridgeError::InvalidState { .. }
            | BridgeError::Signaling(_)
            | BridgeError::Configuration(_) => ErrorScope::Request,
            BridgeError::Negotiation { .. }
            | BridgeError::MissingMediaSection { .. }
            | BridgeError::NoMatchingCodec { .. }
            | BridgeError::EgressProcess { .. }
            | BridgeError::Io(_) => ErrorScope::Session,
            BridgeError::EngineUnavailable { .. } => ErrorScope::Process,
        }
    }

    /// Whether the session must be torn down after this error
    pub fn is_session_fatal(&self) -> bool {
        self.scope() != ErrorScope::Request
    }
}

impl From<SdpError> for BridgeError {
    fn from(error: SdpError) -> Self {
        BridgeError::from_sdp("unknown", error)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sdp_errors_keep_identity() {
        let missing = BridgeError::from_sdp("s1", SdpError::MissingMediaSection { kind: MediaKind::Video });
        assert!(matches!(
            missing,
            BridgeError::MissingMediaSection { ref session_id, kind: MediaKind::Video } if session_id == "s1"
        ));

        let parse = BridgeError::from_sdp("s1", SdpError::parse("m=video", "bad"));
        assert!(matches!(parse, BridgeError::Negotiation { .. }));
        assert_eq!(parse.scope(), ErrorScope::Session);
    }

    #[test]
    fn test_scopes() {
        let exhausted = BridgeError::PortExhaustion {
            requested: 4,
            min: 10000,
            max: 10003,
        };
        assert_eq!(exhausted.scope(), ErrorScope::Request);
        assert!(!exhausted.is_session_fatal());

        assert_eq!(BridgeError::egress("s", "exited").scope(), ErrorScope::Session);
        assert_eq!(
            BridgeError::engine_unavailable("ingest", "socket closed").scope(),
            ErrorScope::Process
        );
        assert!(BridgeError::engine_unavailable("ingest", "socket closed").is_session_fatal());
    }

    #[test]
    fn test_display() {
        let err = BridgeError::invalid_state("s9", BridgeState::Idle, "start cast");
        assert_eq!(err.to_string(), "Cannot start cast for session s9 in state IDLE");
    }
}
