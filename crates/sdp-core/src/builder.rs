//! Offer builder
//!
//! Produces the offer handed to the bridge engine. Every emitted section is
//! receive-only from this side's point of view, with comedia enabled so the
//! remote transport latches onto the first packet's source.

use std::net::IpAddr;

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::crypto::CryptoAttribute;
use crate::error::{Result, SdpError};
use crate::types::{MediaCapability, MediaDirection, MediaKind, PortBlock, RtpPorts, TransportProtocol};

const CRLF: &str = "\r\n";

/// SSRC and CNAME announced for one media section.
///
/// Derived from the session identifier so concurrent sessions announce
/// distinct values and repeated offers for one session stay stable.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SsrcIdentity {
    pub ssrc: u32,
    pub cname: String,
}

impl SsrcIdentity {
    pub fn derive(session_id: &str, kind: MediaKind) -> Self {
        let cname_digest = Sha256::digest(session_id.as_bytes());
        let cname = hex::encode(&cname_digest[..8]);

        let mut hasher = Sha256::new();
        hasher.update(session_id.as_bytes());
        hasher.update(b"/");
        hasher.update(kind.as_str().as_bytes());
        let digest = hasher.finalize();
        let ssrc = u32::from_be_bytes([digest[0], digest[1], digest[2], digest[3]]);

        // 0 is avoided by some stacks
        let ssrc = if ssrc == 0 { 1 } else { ssrc };
        Self { ssrc, cname }
    }
}

/// What one emitted section announced
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OfferedMedia {
    pub kind: MediaKind,
    pub ports: RtpPorts,
    pub capabilities: Vec<MediaCapability>,
    pub identity: SsrcIdentity,
    pub crypto: Option<CryptoAttribute>,
}

/// A built offer and the per-section values that went into it
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionOffer {
    pub sdp: String,
    pub protocol: TransportProtocol,
    pub media: Vec<OfferedMedia>,
}

impl SessionOffer {
    pub fn media(&self, kind: MediaKind) -> Option<&OfferedMedia> {
        self.media.iter().find(|m| m.kind == kind)
    }

    pub fn kinds(&self) -> Vec<MediaKind> {
        self.media.iter().map(|m| m.kind).collect()
    }
}

/// Builder for bridge-engine offers
#[derive(Debug, Clone)]
pub struct OfferBuilder {
    session_id: String,
    address: IpAddr,
    protocol: TransportProtocol,
    direction: MediaDirection,
    comedia: bool,
    encrypt: bool,
    capabilities: Vec<MediaCapability>,
    port_block: Option<PortBlock>,
}

impl OfferBuilder {
    pub fn new(session_id: impl Into<String>, address: IpAddr) -> Self {
        Self {
            session_id: session_id.into(),
            address,
            protocol: TransportProtocol::default(),
            direction: MediaDirection::RecvOnly,
            comedia: true,
            encrypt: false,
            capabilities: Vec::new(),
            port_block: None,
        }
    }

    pub fn protocol(mut self, protocol: TransportProtocol) -> Self {
        self.protocol = protocol;
        self
    }

    pub fn direction(mut self, direction: MediaDirection) -> Self {
        self.direction = direction;
        self
    }

    pub fn comedia(mut self, comedia: bool) -> Self {
        self.comedia = comedia;
        self
    }

    /// Request SRTP; forces a secure profile and adds `a=crypto` lines
    pub fn encryption(mut self, encrypt: bool) -> Self {
        self.encrypt = encrypt;
        self
    }

    pub fn capabilities(mut self, capabilities: Vec<MediaCapability>) -> Self {
        self.capabilities = capabilities;
        self
    }

    pub fn port_block(mut self, port_block: PortBlock) -> Self {
        self.port_block = Some(port_block);
        self
    }

    fn effective_protocol(&self) -> TransportProtocol {
        if self.encrypt {
            self.protocol.secured()
        } else {
            self.protocol
        }
    }

    /// Assemble the offer text. Sections are emitted audio first, then
    /// video, for every kind that has at least one capability.
    pub fn build(&self) -> Result<SessionOffer> {
        let port_block = self
            .port_block
            .as_ref()
            .ok_or_else(|| SdpError::build("no port block assigned"))?;

        for capability in &self.capabilities {
            capability.validate()?;
        }

        let protocol = self.effective_protocol();
        let net_type = match self.address {
            IpAddr::V4(_) => "IP4",
            IpAddr::V6(_) => "IP6",
        };

        let mut sdp = String::new();
        push_line(&mut sdp, "v=0");
        push_line(&mut sdp, &format!("o=- 0 0 IN {} {}", net_type, self.address));
        push_line(&mut sdp, "s=-");
        push_line(&mut sdp, &format!("c=IN {} {}", net_type, self.address));
        push_line(&mut sdp, "t=0 0");

        let mut media = Vec::new();
        for kind in MediaKind::ALL {
            let capabilities: Vec<MediaCapability> =
                self.capabilities.iter().filter(|c| c.kind == kind).cloned().collect();
            if capabilities.is_empty() {
                continue;
            }

            let ports = port_block.media_ports(kind).ok_or_else(|| {
                SdpError::build(format!("port block {} has no {} ports", port_block, kind))
            })?;
            let identity = SsrcIdentity::derive(&self.session_id, kind);
            let crypto = self.encrypt.then(|| CryptoAttribute::generate(1));

            self.write_section(&mut sdp, kind, protocol, ports, &capabilities, &identity, crypto.as_ref());

            media.push(OfferedMedia {
                kind,
                ports,
                capabilities,
                identity,
                crypto,
            });
        }

        if media.is_empty() {
            return Err(SdpError::build("no capabilities to offer"));
        }

        tracing::debug!(
            "Built {} offer for session {} with {} section(s) on {}",
            protocol,
            self.session_id,
            media.len(),
            port_block
        );

        Ok(SessionOffer { sdp, protocol, media })
    }

    #[allow(clippy::too_many_arguments)]
    fn write_section(
        &self,
        sdp: &mut String,
        kind: MediaKind,
        protocol: TransportProtocol,
        ports: RtpPorts,
        capabilities: &[MediaCapability],
        identity: &SsrcIdentity,
        crypto: Option<&CryptoAttribute>,
    ) {
        let formats: Vec<String> = capabilities.iter().map(|c| c.payload_type.to_string()).collect();
        push_line(sdp, &format!("m={} {} {} {}", kind, ports.rtp, protocol, formats.join(" ")));
        push_line(sdp, &format!("a={}", self.direction.as_str()));
        if self.comedia {
            push_line(sdp, "a=direction:active");
        }
        push_line(sdp, &format!("a=rtcp:{}", ports.rtcp));

        for capability in capabilities {
            push_line(sdp, &format!("a=rtpmap:{}", capability.rtpmap_value()));
            for feedback in &capability.rtcp_feedback {
                push_line(
                    sdp,
                    &format!("a=rtcp-fb:{} {}", capability.payload_type, feedback.to_sdp_value()),
                );
            }
            if let Some(fmtp) = capability.fmtp_value() {
                push_line(sdp, &format!("a=fmtp:{}", fmtp));
            }
        }

        // Extensions are per section; skip duplicates across codecs
        let mut extension_ids = Vec::new();
        for extension in capabilities.iter().flat_map(|c| c.header_extensions.iter()) {
            if !extension_ids.contains(&extension.id) {
                extension_ids.push(extension.id);
                push_line(sdp, &format!("a=extmap:{}", extension.to_sdp_value()));
            }
        }

        if let Some(crypto) = crypto {
            push_line(sdp, &format!("a=crypto:{}", crypto.to_sdp_value()));
        }
        push_line(sdp, &format!("a=ssrc:{} cname:{}", identity.ssrc, identity.cname));
    }
}

fn push_line(sdp: &mut String, line: &str) {
    sdp.push_str(line);
    sdp.push_str(CRLF);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::answer::NegotiatedAnswer;
    use crate::parser::parse_session_description;
    use crate::types::{FormatParameter, HeaderExtension, RtcpFeedback};
    use pretty_assertions::assert_eq;

    fn opus() -> MediaCapability {
        MediaCapability::new(MediaKind::Audio, 111, "opus", 48000).with_channels(2)
    }

    fn h264() -> MediaCapability {
        MediaCapability::new(MediaKind::Video, 102, "H264", 90000)
            .with_parameter(FormatParameter::new("level-asymmetry-allowed", "1"))
            .with_parameter(FormatParameter::new("packetization-mode", "1"))
            .with_parameter(FormatParameter::new("profile-level-id", "42001f"))
            .with_feedback(RtcpFeedback::new("goog-remb"))
            .with_feedback(RtcpFeedback::with_parameter("ccm", "fir"))
            .with_feedback(RtcpFeedback::new("nack"))
            .with_feedback(RtcpFeedback::with_parameter("nack", "pli"))
    }

    fn block() -> PortBlock {
        PortBlock::new(vec![10000, 10001, 10002, 10003])
    }

    #[test]
    fn test_video_section_layout() {
        let offer = OfferBuilder::new("session-1", "127.0.0.1".parse().unwrap())
            .capabilities(vec![h264()])
            .port_block(block())
            .build()
            .unwrap();

        let identity = SsrcIdentity::derive("session-1", MediaKind::Video);
        let expected = format!(
            "v=0\r\n\
o=- 0 0 IN IP4 127.0.0.1\r\n\
s=-\r\n\
c=IN IP4 127.0.0.1\r\n\
t=0 0\r\n\
m=video 10002 RTP/AVPF 102\r\n\
a=recvonly\r\n\
a=direction:active\r\n\
a=rtcp:10003\r\n\
a=rtpmap:102 H264/90000\r\n\
a=rtcp-fb:102 goog-remb\r\n\
a=rtcp-fb:102 ccm fir\r\n\
a=rtcp-fb:102 nack\r\n\
a=rtcp-fb:102 nack pli\r\n\
a=fmtp:102 level-asymmetry-allowed=1;packetization-mode=1;profile-level-id=42001f\r\n\
a=ssrc:{} cname:{}\r\n",
            identity.ssrc, identity.cname
        );
        assert_eq!(offer.sdp, expected);
        assert_eq!(offer.kinds(), vec![MediaKind::Video]);
    }

    #[test]
    fn test_audio_and_video_use_distinct_ports() {
        let offer = OfferBuilder::new("s", "127.0.0.1".parse().unwrap())
            .capabilities(vec![h264(), opus()])
            .port_block(block())
            .build()
            .unwrap();

        let parsed = parse_session_description(&offer.sdp).unwrap();
        assert_eq!(parsed.media.len(), 2);
        assert_eq!(parsed.media[0].media, "audio");
        assert_eq!(parsed.media[0].port, 10000);
        assert_eq!(parsed.media[0].rtcp().map(|r| r.port), Some(10001));
        assert_eq!(parsed.media[1].media, "video");
        assert_eq!(parsed.media[1].port, 10002);
        assert_eq!(parsed.media[1].rtcp().map(|r| r.port), Some(10003));
    }

    #[test]
    fn test_encryption_forces_savpf_and_adds_keys() {
        let offer = OfferBuilder::new("s", "127.0.0.1".parse().unwrap())
            .protocol(TransportProtocol::RtpAvp)
            .encryption(true)
            .capabilities(vec![opus(), h264()])
            .port_block(block())
            .build()
            .unwrap();

        assert_eq!(offer.protocol, TransportProtocol::RtpSavpf);
        let parsed = parse_session_description(&offer.sdp).unwrap();
        for media in &parsed.media {
            assert_eq!(media.protocol, "RTP/SAVPF");
            assert_eq!(media.crypto().len(), 1);
        }
        // Each section gets its own key
        assert_ne!(
            offer.media[0].crypto.as_ref().unwrap().key_params,
            offer.media[1].crypto.as_ref().unwrap().key_params
        );
    }

    #[test]
    fn test_extmap_and_ipv6_header() {
        let video = h264().with_header_extension(HeaderExtension::new(
            3,
            "http://www.webrtc.org/experiments/rtp-hdrext/abs-send-time",
        ));
        let offer = OfferBuilder::new("s", "::1".parse().unwrap())
            .capabilities(vec![video])
            .comedia(false)
            .port_block(block())
            .build()
            .unwrap();

        assert!(offer.sdp.contains("c=IN IP6 ::1\r\n"));
        assert!(offer
            .sdp
            .contains("a=extmap:3 http://www.webrtc.org/experiments/rtp-hdrext/abs-send-time\r\n"));
        assert!(!offer.sdp.contains("a=direction:active"));
    }

    #[test]
    fn test_identity_is_stable_and_distinct() {
        let a = SsrcIdentity::derive("alpha", MediaKind::Video);
        assert_eq!(a, SsrcIdentity::derive("alpha", MediaKind::Video));
        assert_ne!(a.ssrc, SsrcIdentity::derive("beta", MediaKind::Video).ssrc);
        assert_ne!(a.cname, SsrcIdentity::derive("beta", MediaKind::Video).cname);
        // One CNAME per session, one SSRC per section
        let audio = SsrcIdentity::derive("alpha", MediaKind::Audio);
        assert_eq!(a.cname, audio.cname);
        assert_ne!(a.ssrc, audio.ssrc);
    }

    #[test]
    fn test_build_errors() {
        let builder = OfferBuilder::new("s", "127.0.0.1".parse().unwrap()).capabilities(vec![opus()]);
        assert!(matches!(builder.build(), Err(SdpError::Build { .. })));

        let empty = OfferBuilder::new("s", "127.0.0.1".parse().unwrap()).port_block(block());
        assert!(matches!(empty.build(), Err(SdpError::Build { .. })));

        let short = OfferBuilder::new("s", "127.0.0.1".parse().unwrap())
            .capabilities(vec![h264()])
            .port_block(PortBlock::new(vec![20000, 20001]));
        assert!(matches!(short.build(), Err(SdpError::Build { .. })));
    }

    #[test]
    fn test_offer_parses_back_as_answer() {
        let offer = OfferBuilder::new("s", "127.0.0.1".parse().unwrap())
            .capabilities(vec![opus(), h264()])
            .port_block(block())
            .build()
            .unwrap();

        let negotiated = NegotiatedAnswer::from_answer(&offer.sdp, &MediaKind::ALL).unwrap();
        let video = negotiated.get(MediaKind::Video).unwrap();
        assert_eq!(video.payload_type, 102);
        assert_eq!(video.codec, "H264");
        assert_eq!(video.clock_rate, 90000);
        assert_eq!(video.rtcp_port, 10003);
        assert_eq!(video.cname.as_deref(), Some(offer.media[1].identity.cname.as_str()));
    }
}
