//! # castbridge-sdp-core
//!
//! Session description handling for the castbridge media bridge.
//!
//! This crate provides:
//! - Offer construction for the bridge engine ([`OfferBuilder`])
//! - Answer parsing into typed media records ([`parse_session_description`],
//!   [`NegotiatedAnswer`])
//! - Capability translation between engines ([`translate`],
//!   [`EngineRtpCapabilities`])
//! - Loopback normalization of answered addresses
//!
//! Everything here is synchronous and free of I/O apart from local interface
//! enumeration.

pub mod address;
pub mod answer;
pub mod builder;
pub mod capability;
pub mod codec;
pub mod crypto;
pub mod description;
pub mod error;
pub mod parser;
pub mod types;

pub use address::{normalize_remote_address, normalize_with};
pub use answer::{negotiate_media, NegotiatedAnswer, NegotiatedMedia};
pub use builder::{OfferBuilder, OfferedMedia, SessionOffer, SsrcIdentity};
pub use capability::{translate, CodecPreference, EngineCodec, EngineFeedback, EngineHeaderExtension, EngineRtpCapabilities};
pub use crypto::CryptoAttribute;
pub use description::{MediaDescription, Origin, SessionDescription};
pub use error::{Result, SdpError};
pub use parser::parse_session_description;
pub use types::{
    FormatParameter, HeaderExtension, MediaCapability, MediaDirection, MediaKind, PortBlock, RtcpFeedback, RtpPorts,
    TransportProtocol, PORTS_PER_BRIDGE,
};

/// Re-export of common types for easier use
pub mod prelude {
    pub use crate::{
        parse_session_description, translate, CodecPreference, MediaCapability, MediaKind, NegotiatedAnswer,
        NegotiatedMedia, OfferBuilder, PortBlock, Result, SdpError, SessionOffer, TransportProtocol,
    };
}
