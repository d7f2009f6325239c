//! Media types shared by the offer builder, the answer parser and the
//! capability translator.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::{Result, SdpError};

/// Number of ports a bridge leg needs: audio RTP/RTCP, video RTP/RTCP
pub const PORTS_PER_BRIDGE: usize = 4;

/// Kind of media carried by an `m=` section
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MediaKind {
    Audio,
    Video,
}

impl MediaKind {
    /// Both kinds, in the order sections are emitted
    pub const ALL: [MediaKind; 2] = [MediaKind::Audio, MediaKind::Video];

    pub fn as_str(&self) -> &'static str {
        match self {
            MediaKind::Audio => "audio",
            MediaKind::Video => "video",
        }
    }
}

impl fmt::Display for MediaKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for MediaKind {
    type Err = SdpError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "audio" => Ok(MediaKind::Audio),
            "video" => Ok(MediaKind::Video),
            other => Err(SdpError::parse(other, "unknown media kind")),
        }
    }
}

/// RTP profile announced on an `m=` line
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TransportProtocol {
    #[serde(rename = "RTP/AVP")]
    RtpAvp,
    #[serde(rename = "RTP/AVPF")]
    RtpAvpf,
    #[serde(rename = "RTP/SAVP")]
    RtpSavp,
    #[serde(rename = "RTP/SAVPF")]
    RtpSavpf,
    #[serde(rename = "UDP/TLS/RTP/SAVPF")]
    UdpTlsRtpSavpf,
}

impl TransportProtocol {
    pub fn as_str(&self) -> &'static str {
        match self {
            TransportProtocol::RtpAvp => "RTP/AVP",
            TransportProtocol::RtpAvpf => "RTP/AVPF",
            TransportProtocol::RtpSavp => "RTP/SAVP",
            TransportProtocol::RtpSavpf => "RTP/SAVPF",
            TransportProtocol::UdpTlsRtpSavpf => "UDP/TLS/RTP/SAVPF",
        }
    }

    /// Whether the profile carries SRTP
    pub fn is_secure(&self) -> bool {
        matches!(
            self,
            TransportProtocol::RtpSavp | TransportProtocol::RtpSavpf | TransportProtocol::UdpTlsRtpSavpf
        )
    }

    /// Profile to use once encryption has been requested
    pub fn secured(self) -> Self {
        if self.is_secure() {
            self
        } else {
            TransportProtocol::RtpSavpf
        }
    }
}

impl Default for TransportProtocol {
    fn default() -> Self {
        TransportProtocol::RtpAvpf
    }
}

impl fmt::Display for TransportProtocol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TransportProtocol {
    type Err = SdpError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_uppercase().as_str() {
            "RTP/AVP" => Ok(TransportProtocol::RtpAvp),
            "RTP/AVPF" => Ok(TransportProtocol::RtpAvpf),
            "RTP/SAVP" => Ok(TransportProtocol::RtpSavp),
            "RTP/SAVPF" => Ok(TransportProtocol::RtpSavpf),
            "UDP/TLS/RTP/SAVPF" => Ok(TransportProtocol::UdpTlsRtpSavpf),
            _ => Err(SdpError::parse(s, "unsupported transport protocol")),
        }
    }
}

/// Media direction attribute
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MediaDirection {
    SendRecv,
    SendOnly,
    RecvOnly,
    Inactive,
}

impl MediaDirection {
    pub fn as_str(&self) -> &'static str {
        match self {
            MediaDirection::SendRecv => "sendrecv",
            MediaDirection::SendOnly => "sendonly",
            MediaDirection::RecvOnly => "recvonly",
            MediaDirection::Inactive => "inactive",
        }
    }
}

impl FromStr for MediaDirection {
    type Err = SdpError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "sendrecv" => Ok(MediaDirection::SendRecv),
            "sendonly" => Ok(MediaDirection::SendOnly),
            "recvonly" => Ok(MediaDirection::RecvOnly),
            "inactive" => Ok(MediaDirection::Inactive),
            _ => Err(SdpError::parse(s, "invalid media direction")),
        }
    }
}

/// RTP header extension mapping (`a=extmap`)
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HeaderExtension {
    pub id: u16,
    pub uri: String,
    pub direction: Option<MediaDirection>,
}

impl HeaderExtension {
    pub fn new(id: u16, uri: impl Into<String>) -> Self {
        Self {
            id,
            uri: uri.into(),
            direction: None,
        }
    }

    pub fn to_sdp_value(&self) -> String {
        match self.direction {
            Some(direction) => format!("{}/{} {}", self.id, direction.as_str(), self.uri),
            None => format!("{} {}", self.id, self.uri),
        }
    }
}

/// RTCP feedback type (`a=rtcp-fb`), e.g. `nack pli`
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RtcpFeedback {
    pub kind: String,
    pub parameter: Option<String>,
}

impl RtcpFeedback {
    pub fn new(kind: impl Into<String>) -> Self {
        Self {
            kind: kind.into(),
            parameter: None,
        }
    }

    pub fn with_parameter(kind: impl Into<String>, parameter: impl Into<String>) -> Self {
        Self {
            kind: kind.into(),
            parameter: Some(parameter.into()),
        }
    }

    pub fn to_sdp_value(&self) -> String {
        match &self.parameter {
            Some(parameter) => format!("{} {}", self.kind, parameter),
            None => self.kind.clone(),
        }
    }
}

/// One `name[=value]` entry of an `a=fmtp` line
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FormatParameter {
    pub name: String,
    pub value: Option<String>,
}

impl FormatParameter {
    pub fn new(name: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            value: Some(value.into()),
        }
    }

    pub fn flag(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            value: None,
        }
    }
}

impl fmt::Display for FormatParameter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.value {
            Some(value) => write!(f, "{}={}", self.name, value),
            None => f.write_str(&self.name),
        }
    }
}

/// A negotiated codec for one media kind.
///
/// Records are validated when they are created from engine output or from
/// parsed SDP, and are treated as read-only afterwards.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MediaCapability {
    pub kind: MediaKind,
    pub payload_type: u8,
    /// MIME subtype, e.g. `H264` or `opus`
    pub codec: String,
    pub clock_rate: u32,
    /// Channel count, audio only
    pub channels: Option<u8>,
    pub parameters: Vec<FormatParameter>,
    pub rtcp_feedback: Vec<RtcpFeedback>,
    pub header_extensions: Vec<HeaderExtension>,
}

impl MediaCapability {
    /// Create a capability with no parameters, feedback or extensions
    pub fn new(kind: MediaKind, payload_type: u8, codec: impl Into<String>, clock_rate: u32) -> Self {
        Self {
            kind,
            payload_type,
            codec: codec.into(),
            clock_rate,
            channels: None,
            parameters: Vec::new(),
            rtcp_feedback: Vec::new(),
            header_extensions: Vec::new(),
        }
    }

    pub fn with_channels(mut self, channels: u8) -> Self {
        self.channels = Some(channels);
        self
    }

    pub fn with_parameter(mut self, parameter: FormatParameter) -> Self {
        self.parameters.push(parameter);
        self
    }

    pub fn with_feedback(mut self, feedback: RtcpFeedback) -> Self {
        self.rtcp_feedback.push(feedback);
        self
    }

    pub fn with_header_extension(mut self, extension: HeaderExtension) -> Self {
        self.header_extensions.push(extension);
        self
    }

    /// Full MIME type, e.g. `video/H264`
    pub fn mime_type(&self) -> String {
        format!("{}/{}", self.kind, self.codec)
    }

    /// Case-insensitive codec match for a kind
    pub fn matches(&self, kind: MediaKind, codec: &str) -> bool {
        self.kind == kind && self.codec.eq_ignore_ascii_case(codec)
    }

    /// Value part of the `a=rtpmap` line
    pub fn rtpmap_value(&self) -> String {
        match self.channels {
            Some(channels) if self.kind == MediaKind::Audio => {
                format!("{} {}/{}/{}", self.payload_type, self.codec, self.clock_rate, channels)
            }
            _ => format!("{} {}/{}", self.payload_type, self.codec, self.clock_rate),
        }
    }

    /// Value part of the `a=fmtp` line, if there are any parameters
    pub fn fmtp_value(&self) -> Option<String> {
        if self.parameters.is_empty() {
            return None;
        }
        let params: Vec<String> = self.parameters.iter().map(|p| p.to_string()).collect();
        Some(format!("{} {}", self.payload_type, params.join(";")))
    }

    /// Check the record's shape
    pub fn validate(&self) -> Result<()> {
        if self.payload_type > 127 {
            return Err(SdpError::invalid_capability(format!(
                "payload type {} out of range for {}",
                self.payload_type,
                self.mime_type()
            )));
        }
        if self.codec.is_empty() || self.codec.contains(char::is_whitespace) || self.codec.contains('/') {
            return Err(SdpError::invalid_capability(format!("bad codec name {:?}", self.codec)));
        }
        if self.clock_rate == 0 {
            return Err(SdpError::invalid_capability(format!(
                "zero clock rate for {}",
                self.mime_type()
            )));
        }
        if self.kind == MediaKind::Video && self.channels.is_some() {
            return Err(SdpError::invalid_capability(format!(
                "channel count given for video codec {}",
                self.codec
            )));
        }
        Ok(())
    }
}

/// RTP and RTCP port of one media leg
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RtpPorts {
    pub rtp: u16,
    pub rtcp: u16,
}

/// Ports reserved for one session's engine-B leg.
///
/// Ordered as audio RTP, audio RTCP, video RTP, video RTCP. The ports are
/// ascending but need not be adjacent.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PortBlock {
    ports: Vec<u16>,
}

impl PortBlock {
    pub fn new(ports: Vec<u16>) -> Self {
        Self { ports }
    }

    pub fn ports(&self) -> &[u16] {
        &self.ports
    }

    pub fn len(&self) -> usize {
        self.ports.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ports.is_empty()
    }

    pub fn lowest(&self) -> Option<u16> {
        self.ports.iter().copied().min()
    }

    pub fn highest(&self) -> Option<u16> {
        self.ports.iter().copied().max()
    }

    pub fn contains(&self, port: u16) -> bool {
        self.ports.contains(&port)
    }

    pub fn overlaps(&self, other: &PortBlock) -> bool {
        self.ports.iter().any(|port| other.contains(*port))
    }

    /// RTP/RTCP pair for a media kind, if the block is large enough
    pub fn media_ports(&self, kind: MediaKind) -> Option<RtpPorts> {
        let base = match kind {
            MediaKind::Audio => 0,
            MediaKind::Video => 2,
        };
        match (self.ports.get(base), self.ports.get(base + 1)) {
            (Some(rtp), Some(rtcp)) => Some(RtpPorts { rtp: *rtp, rtcp: *rtcp }),
            _ => None,
        }
    }
}

impl fmt::Display for PortBlock {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let ports: Vec<String> = self.ports.iter().map(|p| p.to_string()).collect();
        write!(f, "[{}]", ports.join(", "))
    }
}
