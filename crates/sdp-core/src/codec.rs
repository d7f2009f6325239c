//! Static RTP payload type assignments (RFC 3551)
//!
//! Answers may omit `a=rtpmap` for static payload types; these are resolved
//! from the table below.

use crate::types::{MediaCapability, MediaKind};

struct StaticPayload {
    payload_type: u8,
    kind: MediaKind,
    codec: &'static str,
    clock_rate: u32,
    channels: Option<u8>,
}

const STATIC_PAYLOADS: &[StaticPayload] = &[
    StaticPayload { payload_type: 0, kind: MediaKind::Audio, codec: "PCMU", clock_rate: 8000, channels: Some(1) },
    StaticPayload { payload_type: 3, kind: MediaKind::Audio, codec: "GSM", clock_rate: 8000, channels: Some(1) },
    StaticPayload { payload_type: 8, kind: MediaKind::Audio, codec: "PCMA", clock_rate: 8000, channels: Some(1) },
    StaticPayload { payload_type: 9, kind: MediaKind::Audio, codec: "G722", clock_rate: 8000, channels: Some(1) },
    StaticPayload { payload_type: 10, kind: MediaKind::Audio, codec: "L16", clock_rate: 44100, channels: Some(2) },
    StaticPayload { payload_type: 11, kind: MediaKind::Audio, codec: "L16", clock_rate: 44100, channels: Some(1) },
    StaticPayload { payload_type: 18, kind: MediaKind::Audio, codec: "G729", clock_rate: 8000, channels: Some(1) },
    StaticPayload { payload_type: 26, kind: MediaKind::Video, codec: "JPEG", clock_rate: 90000, channels: None },
    StaticPayload { payload_type: 31, kind: MediaKind::Video, codec: "H261", clock_rate: 90000, channels: None },
    StaticPayload { payload_type: 34, kind: MediaKind::Video, codec: "H263", clock_rate: 90000, channels: None },
];

/// Capability for a static payload type, if the type is assigned to `kind`
pub fn static_capability(kind: MediaKind, payload_type: u8) -> Option<MediaCapability> {
    STATIC_PAYLOADS
        .iter()
        .find(|p| p.payload_type == payload_type && p.kind == kind)
        .map(|p| {
            let mut capability = MediaCapability::new(p.kind, p.payload_type, p.codec, p.clock_rate);
            capability.channels = p.channels;
            capability
        })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_static_lookup_respects_kind() {
        let pcmu = static_capability(MediaKind::Audio, 0).unwrap();
        assert_eq!(pcmu.codec, "PCMU");
        assert_eq!(pcmu.clock_rate, 8000);

        assert!(static_capability(MediaKind::Video, 0).is_none());
        assert!(static_capability(MediaKind::Audio, 96).is_none());
        assert_eq!(static_capability(MediaKind::Video, 34).unwrap().codec, "H263");
    }
}
