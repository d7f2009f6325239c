//! Media engine collaborator interfaces
//!
//! Both engines are opaque services. The orchestrator only creates, wires,
//! negotiates and releases their endpoints; media never passes through it.
//! Event callbacks are delivered as a channel of [`EngineEvent`] per
//! subscribed endpoint.

use std::fmt;

use async_trait::async_trait;
use castbridge_sdp_core::{MediaKind, NegotiatedAnswer, NegotiatedMedia};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::sync::mpsc;

use crate::candidates::IceCandidate;
use crate::errors::BridgeError;

/// Result type for engine calls
pub type EngineResult<T> = std::result::Result<T, EngineError>;

/// Events of one subscribed endpoint
pub type EngineEvents = mpsc::Receiver<EngineEvent>;

/// Failures reported by an engine
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum EngineError {
    /// The connection to the engine is gone
    #[error("engine unavailable: {reason}")]
    Unavailable { reason: String },

    /// The engine refused the request, e.g. an offer it cannot answer
    #[error("request rejected: {reason}")]
    Rejected { reason: String },

    #[error("engine call failed: {reason}")]
    Failed { reason: String },
}

impl EngineError {
    pub fn unavailable(reason: impl Into<String>) -> Self {
        Self::Unavailable { reason: reason.into() }
    }

    pub fn rejected(reason: impl Into<String>) -> Self {
        Self::Rejected { reason: reason.into() }
    }

    pub fn failed(reason: impl Into<String>) -> Self {
        Self::Failed { reason: reason.into() }
    }

    /// Map onto the bridge taxonomy for a call made on behalf of a session
    pub fn into_bridge_error(self, engine: &str, session_id: &str) -> BridgeError {
        match self {
            EngineError::Unavailable { reason } => BridgeError::engine_unavailable(engine, reason),
            other => BridgeError::negotiation(session_id, format!("{} engine: {}", engine, other)),
        }
    }
}

/// What an endpoint handle refers to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EndpointKind {
    /// Session-scoped container owning the ingest endpoints
    Pipeline,
    /// Browser-facing endpoint on the ingest engine
    WebRtc,
    /// Plain RTP endpoint on the ingest engine
    Rtp,
    /// Receiving endpoint on the bridge engine
    Bridge,
}

/// Opaque reference to an engine-side object
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct EndpointHandle {
    pub id: String,
    pub kind: EndpointKind,
}

impl EndpointHandle {
    pub fn new(id: impl Into<String>, kind: EndpointKind) -> Self {
        Self { id: id.into(), kind }
    }
}

impl fmt::Display for EndpointHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}({})", self.kind, self.id)
    }
}

/// Where the ingest RTP endpoint sends media: the bridge engine's answered
/// addresses and ports, normalized for this host
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RtpTarget {
    pub media: Vec<NegotiatedMedia>,
}

impl RtpTarget {
    pub fn from_answer(answer: &NegotiatedAnswer) -> Self {
        Self {
            media: answer.media.iter().map(NegotiatedMedia::normalized).collect(),
        }
    }

    pub fn get(&self, kind: MediaKind) -> Option<&NegotiatedMedia> {
        self.media.iter().find(|m| m.kind == kind)
    }
}

/// Asynchronous notifications from an endpoint
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EngineEvent {
    /// Local candidate gathered for the browser
    IceCandidate(IceCandidate),
    /// Receiver-side bandwidth estimate
    BandwidthEstimate { bitrate_bps: u64 },
    MediaFlow { kind: MediaKind, flowing: bool },
    Error { reason: String },
    /// The engine connection dropped
    Disconnected,
}

/// Engine A: terminates the browser session and forwards plain RTP
#[async_trait]
pub trait IngestEngine: Send + Sync {
    fn name(&self) -> &str {
        "ingest"
    }

    async fn check_available(&self) -> EngineResult<()>;

    async fn create_pipeline(&self, session_id: &str) -> EngineResult<EndpointHandle>;

    async fn create_webrtc_endpoint(&self, pipeline: &EndpointHandle) -> EngineResult<EndpointHandle>;

    async fn create_rtp_endpoint(&self, pipeline: &EndpointHandle) -> EngineResult<EndpointHandle>;

    /// Route media from `source` into `sink`
    async fn connect(&self, source: &EndpointHandle, sink: &EndpointHandle) -> EngineResult<()>;

    async fn add_ice_candidate(&self, endpoint: &EndpointHandle, candidate: &IceCandidate) -> EngineResult<()>;

    /// Returns the answer
    async fn process_offer(&self, endpoint: &EndpointHandle, offer: &str) -> EngineResult<String>;

    async fn gather_candidates(&self, endpoint: &EndpointHandle) -> EngineResult<()>;

    async fn set_max_video_send_bandwidth(&self, endpoint: &EndpointHandle, kbps: u32) -> EngineResult<()>;

    async fn connect_rtp_target(&self, endpoint: &EndpointHandle, target: &RtpTarget) -> EngineResult<()>;

    async fn cap_inbound_bandwidth(&self, endpoint: &EndpointHandle, bitrate_bps: u64) -> EngineResult<()>;

    async fn subscribe(&self, endpoint: &EndpointHandle) -> EngineResult<EngineEvents>;

    async fn release(&self, endpoint: &EndpointHandle) -> EngineResult<()>;
}

/// Engine B: receives the bridged RTP
#[async_trait]
pub trait BridgeEngine: Send + Sync {
    fn name(&self) -> &str {
        "bridge"
    }

    async fn check_available(&self) -> EngineResult<()>;

    async fn create_endpoint(&self, session_id: &str) -> EngineResult<EndpointHandle>;

    /// Returns the answer
    async fn process_offer(&self, endpoint: &EndpointHandle, offer: &str) -> EngineResult<String>;

    /// Whether endpoints emit [`EngineEvent::MediaFlow`]. Without it the
    /// bridge counts as active as soon as the answer is in.
    fn reports_media_flow(&self) -> bool;

    async fn subscribe(&self, endpoint: &EndpointHandle) -> EngineResult<EngineEvents>;

    async fn cap_inbound_bandwidth(&self, endpoint: &EndpointHandle, bitrate_bps: u64) -> EngineResult<()>;

    async fn release(&self, endpoint: &EndpointHandle) -> EngineResult<()>;
}
