//! Per-session bridge state
//!
//! A [`Session`] owns every resource created for one client. Each resource
//! is an explicit `Option` so teardown can release exactly what exists and
//! nothing twice.

use std::fmt;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use castbridge_sdp_core::{MediaCapability, NegotiatedAnswer, PortBlock, SessionOffer};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;
use tokio::task::JoinHandle;

use crate::candidates::CandidateQueue;
use crate::egress::{EgressProcess, EgressSnapshot};
use crate::engine::EndpointHandle;
use crate::errors::{BridgeError, Result};
use crate::feedback::FeedbackRelay;
use crate::logging::SessionLog;
use crate::sdp_file::SessionDescriptionFile;

/// Lifecycle of one bridge
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum BridgeState {
    Idle,
    NegotiatingA,
    BridgedA,
    NegotiatingB,
    Active,
    Closing,
    Closed,
}

impl BridgeState {
    pub fn as_str(&self) -> &'static str {
        match self {
            BridgeState::Idle => "IDLE",
            BridgeState::NegotiatingA => "NEGOTIATING_A",
            BridgeState::BridgedA => "BRIDGED_A",
            BridgeState::NegotiatingB => "NEGOTIATING_B",
            BridgeState::Active => "ACTIVE",
            BridgeState::Closing => "CLOSING",
            BridgeState::Closed => "CLOSED",
        }
    }

    /// Whether `next` is a legal successor
    pub fn can_transition_to(&self, next: BridgeState) -> bool {
        use BridgeState::*;
        matches!(
            (self, next),
            (Idle, NegotiatingA)
                | (NegotiatingA, BridgedA)
                | (BridgedA, NegotiatingB)
                | (NegotiatingB, Active)
                | (Idle | NegotiatingA | BridgedA | NegotiatingB | Active, Closing)
                | (Closing, Closed)
        )
    }

    pub fn is_shutting_down(&self) -> bool {
        matches!(self, BridgeState::Closing | BridgeState::Closed)
    }
}

impl fmt::Display for BridgeState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Everything one client's bridge holds
#[derive(Debug)]
pub struct Session {
    pub id: String,
    state: BridgeState,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,

    /// Session-scoped container on the ingest engine, released last
    pub pipeline: Option<EndpointHandle>,
    pub webrtc_endpoint: Option<EndpointHandle>,
    pub rtp_endpoint: Option<EndpointHandle>,
    pub bridge_endpoint: Option<EndpointHandle>,

    pub candidates: CandidateQueue,
    /// Capabilities the ingest engine answered the browser with
    pub ingest_capabilities: Vec<MediaCapability>,
    /// Capabilities offered to the bridge engine by the latest negotiation
    pub capabilities: Option<Vec<MediaCapability>>,

    pub port_block: Option<PortBlock>,
    pub bridge_offer: Option<SessionOffer>,
    pub bridge_answer: Option<NegotiatedAnswer>,
    pub encryption: bool,

    pub sdp_file: Option<SessionDescriptionFile>,
    pub egress: Option<EgressProcess>,

    /// Engine event pumps for this session's endpoints
    pub event_tasks: Vec<JoinHandle<()>>,
}

impl Session {
    pub fn new(id: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            id: id.into(),
            state: BridgeState::Idle,
            created_at: now,
            updated_at: now,
            pipeline: None,
            webrtc_endpoint: None,
            rtp_endpoint: None,
            bridge_endpoint: None,
            candidates: CandidateQueue::new(),
            ingest_capabilities: Vec::new(),
            capabilities: None,
            port_block: None,
            bridge_offer: None,
            bridge_answer: None,
            encryption: false,
            sdp_file: None,
            egress: None,
            event_tasks: Vec::new(),
        }
    }

    pub fn state(&self) -> BridgeState {
        self.state
    }

    /// Move to `next`, rejecting illegal transitions
    pub fn transition(&mut self, next: BridgeState) -> Result<()> {
        if !self.state.can_transition_to(next) {
            return Err(BridgeError::invalid_state(
                &self.id,
                self.state,
                format!("move to {}", next),
            ));
        }
        tracing::debug!("Session {} state: {} -> {}", self.id, self.state, next);
        self.state = next;
        self.updated_at = Utc::now();
        Ok(())
    }

    /// Fail unless the session is in `expected`
    pub fn require_state(&self, expected: BridgeState, operation: &str) -> Result<()> {
        if self.state != expected {
            return Err(BridgeError::invalid_state(&self.id, self.state, operation));
        }
        Ok(())
    }

    /// Whether any engine-side or process resource is still held
    pub fn holds_resources(&self) -> bool {
        self.pipeline.is_some()
            || self.webrtc_endpoint.is_some()
            || self.rtp_endpoint.is_some()
            || self.bridge_endpoint.is_some()
            || self.port_block.is_some()
            || self.sdp_file.is_some()
            || self.egress.is_some()
    }

    pub fn snapshot(&self) -> SessionSnapshot {
        let endpoints = [
            &self.pipeline,
            &self.webrtc_endpoint,
            &self.rtp_endpoint,
            &self.bridge_endpoint,
        ]
        .into_iter()
        .flatten()
        .cloned()
        .collect();

        SessionSnapshot {
            session_id: self.id.clone(),
            state: self.state,
            created_at: self.created_at,
            updated_at: self.updated_at,
            endpoints,
            pending_candidates: self.candidates.len(),
            port_block: self.port_block.as_ref().map(|b| b.ports().to_vec()),
            capabilities: self.capabilities.clone().unwrap_or_default(),
            negotiated: self.bridge_answer.clone(),
            encryption: self.encryption,
            sdp_file: self.sdp_file.as_ref().map(|f| f.path().to_path_buf()),
            egress: self.egress.as_ref().map(EgressProcess::snapshot),
        }
    }
}

/// Serializable view of a session for debugging
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionSnapshot {
    pub session_id: String,
    pub state: BridgeState,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub endpoints: Vec<EndpointHandle>,
    pub pending_candidates: usize,
    pub port_block: Option<Vec<u16>>,
    pub capabilities: Vec<MediaCapability>,
    pub negotiated: Option<NegotiatedAnswer>,
    pub encryption: bool,
    pub sdp_file: Option<PathBuf>,
    pub egress: Option<EgressSnapshot>,
}

/// Shared handle to a registered session.
///
/// The mutex serializes lifecycle steps of one session. The close flag can
/// be raised without the lock so an in-flight negotiation notices a
/// disconnect at its next step.
#[derive(Debug)]
pub struct SessionHandle {
    id: String,
    session: Mutex<Session>,
    closing: AtomicBool,
    relay: Arc<FeedbackRelay>,
    log: SessionLog,
}

impl SessionHandle {
    pub fn new(session: Session, log: SessionLog) -> Self {
        let id = session.id.clone();
        Self {
            relay: Arc::new(FeedbackRelay::new(id.clone())),
            id,
            session: Mutex::new(session),
            closing: AtomicBool::new(false),
            log,
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub async fn lock(&self) -> tokio::sync::MutexGuard<'_, Session> {
        self.session.lock().await
    }

    /// Raise the close flag; returns whether it was already raised
    pub fn request_close(&self) -> bool {
        self.closing.swap(true, Ordering::SeqCst)
    }

    pub fn is_closing(&self) -> bool {
        self.closing.load(Ordering::SeqCst)
    }

    /// Abort a lifecycle step if a close was requested meanwhile
    pub fn ensure_open(&self, session: &Session, step: &str) -> Result<()> {
        if self.is_closing() {
            return Err(BridgeError::invalid_state(&self.id, BridgeState::Closing, step));
        }
        if session.state().is_shutting_down() {
            return Err(BridgeError::invalid_state(&self.id, session.state(), step));
        }
        Ok(())
    }

    pub fn relay(&self) -> &Arc<FeedbackRelay> {
        &self.relay
    }

    pub fn log(&self) -> &SessionLog {
        &self.log
    }
}
