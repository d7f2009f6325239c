//! # castbridge-bridge-core
//!
//! Session negotiation and bridge lifecycle orchestration between a
//! browser-facing ingest engine and a second RTP engine, with optional
//! hand-off to an external egress process.
//!
//! ## Architecture
//!
//! ```text
//! client ──signaling──▶ SignalingHandler ──▶ BridgeManager
//!                                             │  ├─ SessionRegistry (per-session lock)
//!                                             │  ├─ PortAllocator
//!                                             │  └─ FeedbackRelay per session
//!                                             ├──▶ IngestEngine (engine A)
//!                                             ├──▶ BridgeEngine (engine B)
//!                                             └──▶ EgressProcess
//! ```
//!
//! The engines are reached through the [`IngestEngine`] and
//! [`BridgeEngine`] traits; media itself never passes through this crate.

pub mod candidates;
pub mod config;
pub mod egress;
pub mod engine;
pub mod errors;
pub mod feedback;
pub mod logging;
pub mod manager;
pub mod ports;
pub mod registry;
pub mod sdp_file;
pub mod session;
pub mod signaling;

pub use candidates::{CandidateQueue, IceCandidate};
pub use config::{BridgeConfig, BridgeSettings, CapabilitySource, EgressConfig, PortConfig, TimeoutConfig};
pub use egress::{EgressExit, EgressProcess, ExitReport};
pub use engine::{
    BridgeEngine, EndpointHandle, EndpointKind, EngineError, EngineEvent, EngineEvents, EngineResult, IngestEngine,
    RtpTarget,
};
pub use errors::{BridgeError, ErrorScope, Result};
pub use feedback::{FeedbackRelay, LegId, RelayStats};
pub use logging::{setup_logging, LoggingConfig, SessionLog};
pub use manager::{BridgeEngines, BridgeManager, DebugReport};
pub use ports::{PortAllocator, PortCheck, UdpBindCheck};
pub use registry::{RegistryStats, SessionRegistry};
pub use session::{BridgeState, Session, SessionHandle, SessionSnapshot};
pub use signaling::{ClientRequest, EventSink, Response, ServerEvent, SignalingHandler};

/// Re-export of common types for easier use
pub mod prelude {
    pub use crate::{
        BridgeConfig, BridgeEngine, BridgeEngines, BridgeError, BridgeManager, BridgeState, EndpointHandle,
        EngineEvent, IceCandidate, IngestEngine, Result, ServerEvent, SignalingHandler,
    };
}
