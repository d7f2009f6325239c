//! Bandwidth-estimate relay between the two bridge legs
//!
//! An estimate reported by one leg becomes an inbound bandwidth cap on the
//! other leg, if that leg exists at the time. Nothing is queued or replayed
//! and nothing is acknowledged.

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::RwLock;
use serde::Serialize;

use crate::engine::{BridgeEngine, EndpointHandle, EndpointKind, EngineResult, IngestEngine};

/// The two sides of a bridge
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum LegId {
    Ingest,
    Bridge,
}

impl LegId {
    /// The leg whose estimates an endpoint reports. Only the ingest RTP
    /// endpoint and the bridge endpoint sit on a leg.
    pub fn for_endpoint(kind: EndpointKind) -> Option<LegId> {
        match kind {
            EndpointKind::Rtp => Some(LegId::Ingest),
            EndpointKind::Bridge => Some(LegId::Bridge),
            EndpointKind::Pipeline | EndpointKind::WebRtc => None,
        }
    }

    pub fn opposite(self) -> LegId {
        match self {
            LegId::Ingest => LegId::Bridge,
            LegId::Bridge => LegId::Ingest,
        }
    }

    fn slot(self) -> usize {
        match self {
            LegId::Ingest => 0,
            LegId::Bridge => 1,
        }
    }
}

impl fmt::Display for LegId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LegId::Ingest => f.write_str("ingest"),
            LegId::Bridge => f.write_str("bridge"),
        }
    }
}

/// A transport that accepts an inbound bandwidth cap
#[async_trait]
pub trait FeedbackLeg: Send + Sync {
    async fn cap_inbound(&self, bitrate_bps: u64) -> EngineResult<()>;

    fn endpoint(&self) -> &EndpointHandle;
}

/// The ingest engine's RTP endpoint
pub struct IngestLeg {
    engine: Arc<dyn IngestEngine>,
    endpoint: EndpointHandle,
}

impl IngestLeg {
    pub fn new(engine: Arc<dyn IngestEngine>, endpoint: EndpointHandle) -> Self {
        Self { engine, endpoint }
    }
}

#[async_trait]
impl FeedbackLeg for IngestLeg {
    async fn cap_inbound(&self, bitrate_bps: u64) -> EngineResult<()> {
        self.engine.cap_inbound_bandwidth(&self.endpoint, bitrate_bps).await
    }

    fn endpoint(&self) -> &EndpointHandle {
        &self.endpoint
    }
}

/// The bridge engine's receiving endpoint
pub struct BridgeLeg {
    engine: Arc<dyn BridgeEngine>,
    endpoint: EndpointHandle,
}

impl BridgeLeg {
    pub fn new(engine: Arc<dyn BridgeEngine>, endpoint: EndpointHandle) -> Self {
        Self { engine, endpoint }
    }
}

#[async_trait]
impl FeedbackLeg for BridgeLeg {
    async fn cap_inbound(&self, bitrate_bps: u64) -> EngineResult<()> {
        self.engine.cap_inbound_bandwidth(&self.endpoint, bitrate_bps).await
    }

    fn endpoint(&self) -> &EndpointHandle {
        &self.endpoint
    }
}

/// Relay counters
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct RelayStats {
    pub forwarded: u64,
    pub dropped: u64,
}

/// Per-session relay between the ingest and bridge legs
pub struct FeedbackRelay {
    session_id: String,
    legs: RwLock<[Option<Arc<dyn FeedbackLeg>>; 2]>,
    forwarded: AtomicU64,
    dropped: AtomicU64,
}

impl FeedbackRelay {
    pub fn new(session_id: impl Into<String>) -> Self {
        Self {
            session_id: session_id.into(),
            legs: RwLock::new([None, None]),
            forwarded: AtomicU64::new(0),
            dropped: AtomicU64::new(0),
        }
    }

    pub fn attach(&self, id: LegId, leg: Arc<dyn FeedbackLeg>) {
        tracing::debug!("Feedback relay for {}: {} leg is {}", self.session_id, id, leg.endpoint());
        self.legs.write()[id.slot()] = Some(leg);
    }

    pub fn detach(&self, id: LegId) {
        self.legs.write()[id.slot()] = None;
    }

    /// Detach both legs
    pub fn clear(&self) {
        *self.legs.write() = [None, None];
    }

    pub fn has_leg(&self, id: LegId) -> bool {
        self.legs.read()[id.slot()].is_some()
    }

    /// Forward an estimate from leg `from` to the opposite leg. Returns
    /// whether it was delivered.
    pub async fn on_estimate(&self, from: LegId, bitrate_bps: u64) -> bool {
        let target = from.opposite();
        // Clone out so the lock is not held across the engine call
        let leg = self.legs.read()[target.slot()].clone();

        let Some(leg) = leg else {
            tracing::trace!(
                "Feedback relay for {}: no {} leg, dropping {} bps estimate",
                self.session_id,
                target,
                bitrate_bps
            );
            self.dropped.fetch_add(1, Ordering::Relaxed);
            return false;
        };

        match leg.cap_inbound(bitrate_bps).await {
            Ok(()) => {
                tracing::trace!(
                    "Feedback relay for {}: {} -> {} {} bps",
                    self.session_id,
                    from,
                    target,
                    bitrate_bps
                );
                self.forwarded.fetch_add(1, Ordering::Relaxed);
                true
            }
            Err(e) => {
                tracing::warn!("Feedback relay for {}: cap on {} leg failed: {}", self.session_id, target, e);
                self.dropped.fetch_add(1, Ordering::Relaxed);
                false
            }
        }
    }

    pub fn stats(&self) -> RelayStats {
        RelayStats {
            forwarded: self.forwarded.load(Ordering::Relaxed),
            dropped: self.dropped.load(Ordering::Relaxed),
        }
    }
}

impl fmt::Debug for FeedbackRelay {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FeedbackRelay")
            .field("session_id", &self.session_id)
            .field("ingest", &self.has_leg(LegId::Ingest))
            .field("bridge", &self.has_leg(LegId::Bridge))
            .field("stats", &self.stats())
            .finish()
    }
}
