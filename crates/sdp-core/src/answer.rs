//! Answer negotiation
//!
//! Extracts, per requested media kind, everything needed to point a transport
//! at the answerer: payload type, codec, address, RTP/RTCP ports, CNAME and
//! reduced-size RTCP.

use std::net::{IpAddr, SocketAddr};

use serde::{Deserialize, Serialize};

use crate::address::normalize_remote_address;
use crate::crypto::CryptoAttribute;
use crate::description::SessionDescription;
use crate::error::{Result, SdpError};
use crate::parser::parse_session_description;
use crate::types::MediaKind;

/// Negotiated parameters of one media kind
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NegotiatedMedia {
    pub kind: MediaKind,
    pub payload_type: u8,
    pub codec: String,
    pub clock_rate: u32,
    pub channels: Option<u8>,
    pub address: IpAddr,
    pub rtp_port: u16,
    pub rtcp_port: u16,
    pub cname: Option<String>,
    pub reduced_size: bool,
    pub rtcp_mux: bool,
    pub crypto: Option<CryptoAttribute>,
}

impl NegotiatedMedia {
    pub fn rtp_addr(&self) -> SocketAddr {
        SocketAddr::new(self.address, self.rtp_port)
    }

    pub fn rtcp_addr(&self) -> SocketAddr {
        SocketAddr::new(self.address, self.rtcp_port)
    }

    /// Copy with the address normalized for a local transport connection
    pub fn normalized(&self) -> Self {
        let mut media = self.clone();
        media.address = normalize_remote_address(self.address);
        media
    }
}

/// Extract the negotiated parameters for `kind`.
///
/// The negotiated payload type is the first format on the `m=` line. The
/// first section of the kind with a non-zero port is used; if there is none
/// the answerer rejected the stream.
pub fn negotiate_media(description: &SessionDescription, kind: MediaKind) -> Result<NegotiatedMedia> {
    let media = description
        .accepted_section(kind)
        .ok_or(SdpError::MissingMediaSection { kind })?;

    let payload_type = *media
        .payload_types()
        .first()
        .ok_or_else(|| SdpError::parse(format!("m={}", media.media), "no payload types listed"))?;
    let capability = media.capability(payload_type)?;

    let address = description
        .connection_address(media)
        .ok_or_else(|| SdpError::parse(format!("m={}", media.media), "no connection address"))?;

    let rtcp_port = match media.rtcp() {
        Some(rtcp) => rtcp.port,
        None => media.port.checked_add(1).ok_or_else(|| {
            SdpError::parse(format!("m={} {}", media.media, media.port), "no room for implicit RTCP port")
        })?,
    };

    Ok(NegotiatedMedia {
        kind,
        payload_type,
        codec: capability.codec,
        clock_rate: capability.clock_rate,
        channels: capability.channels,
        address,
        rtp_port: media.port,
        rtcp_port,
        cname: media.cname().map(str::to_string),
        reduced_size: media.has_rtcp_rsize(),
        rtcp_mux: media.has_rtcp_mux(),
        crypto: media.crypto().first().map(|c| (*c).clone()),
    })
}

/// A parsed answer reduced to the requested media kinds
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NegotiatedAnswer {
    pub media: Vec<NegotiatedMedia>,
}

impl NegotiatedAnswer {
    /// Parse `text` and negotiate every kind in `requested`, failing on the
    /// first kind the answer does not carry
    pub fn from_answer(text: &str, requested: &[MediaKind]) -> Result<Self> {
        let description = parse_session_description(text)?;
        Self::from_description(&description, requested)
    }

    pub fn from_description(description: &SessionDescription, requested: &[MediaKind]) -> Result<Self> {
        let media = requested
            .iter()
            .map(|kind| negotiate_media(description, *kind))
            .collect::<Result<Vec<_>>>()?;
        Ok(Self { media })
    }

    pub fn get(&self, kind: MediaKind) -> Option<&NegotiatedMedia> {
        self.media.iter().find(|m| m.kind == kind)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const BRIDGE_ANSWER: &str = "v=0\r\n\
o=- 3812345 3812345 IN IP4 127.0.0.1\r\n\
s=Kurento Media Server\r\n\
c=IN IP4 127.0.0.1\r\n\
t=0 0\r\n\
m=audio 40000 RTP/AVPF 111\r\n\
a=rtpmap:111 opus/48000/2\r\n\
a=ssrc:11 cname:kms-audio\r\n\
m=video 40002 RTP/AVPF 102\r\n\
a=rtcp:40005\r\n\
a=rtcp-rsize\r\n\
a=rtpmap:102 H264/90000\r\n\
a=ssrc:22 cname:kms-video\r\n";

    #[test]
    fn test_negotiates_requested_kinds() {
        let answer = NegotiatedAnswer::from_answer(BRIDGE_ANSWER, &MediaKind::ALL).unwrap();

        let audio = answer.get(MediaKind::Audio).unwrap();
        assert_eq!(audio.payload_type, 111);
        assert_eq!(audio.codec, "opus");
        assert_eq!(audio.channels, Some(2));
        assert_eq!(audio.rtp_port, 40000);
        // No a=rtcp line: RTP + 1
        assert_eq!(audio.rtcp_port, 40001);
        assert_eq!(audio.cname.as_deref(), Some("kms-audio"));
        assert!(!audio.reduced_size);

        let video = answer.get(MediaKind::Video).unwrap();
        assert_eq!(video.rtp_port, 40002);
        assert_eq!(video.rtcp_port, 40005);
        assert!(video.reduced_size);
        assert_eq!(video.rtp_addr(), "127.0.0.1:40002".parse().unwrap());
    }

    #[test]
    fn test_missing_video_section() {
        let audio_only = "v=0\r\no=- 1 1 IN IP4 127.0.0.1\r\ns=-\r\nc=IN IP4 127.0.0.1\r\nt=0 0\r\n\
m=audio 40000 RTP/AVP 111\r\na=rtpmap:111 opus/48000/2\r\n";
        assert_eq!(
            NegotiatedAnswer::from_answer(audio_only, &MediaKind::ALL),
            Err(SdpError::MissingMediaSection { kind: MediaKind::Video })
        );
    }

    #[test]
    fn test_rejected_section_counts_as_missing() {
        let rejected = "v=0\r\no=- 1 1 IN IP4 127.0.0.1\r\ns=-\r\nc=IN IP4 127.0.0.1\r\nt=0 0\r\n\
m=audio 40000 RTP/AVP 111\r\na=rtpmap:111 opus/48000/2\r\n\
m=video 0 RTP/AVP 102\r\na=rtpmap:102 H264/90000\r\n";
        assert_eq!(
            NegotiatedAnswer::from_answer(rejected, &[MediaKind::Video]),
            Err(SdpError::MissingMediaSection { kind: MediaKind::Video })
        );
    }

    #[test]
    fn test_skips_rejected_section_of_same_kind() {
        let answer = "v=0\r\no=- 1 1 IN IP4 127.0.0.1\r\ns=-\r\nc=IN IP4 127.0.0.1\r\nt=0 0\r\n\
m=video 0 RTP/AVP 96\r\na=rtpmap:96 VP8/90000\r\n\
m=video 40010 RTP/AVP 102\r\na=rtpmap:102 H264/90000\r\n";
        let negotiated = NegotiatedAnswer::from_answer(answer, &[MediaKind::Video]).unwrap();
        let video = negotiated.get(MediaKind::Video).unwrap();
        assert_eq!(video.rtp_port, 40010);
        assert_eq!(video.payload_type, 102);
        assert_eq!(video.codec, "H264");
    }

    #[test]
    fn test_normalized_keeps_ports() {
        let answer = NegotiatedAnswer::from_answer(BRIDGE_ANSWER, &[MediaKind::Video]).unwrap();
        let video = answer.get(MediaKind::Video).unwrap().normalized();
        assert!(video.address.is_loopback());
        assert_eq!(video.rtp_port, 40002);
    }
}
