//! Capability translation between media engines
//!
//! Engines describe what they can send or receive in their own native shape.
//! This module turns those descriptions into validated [`MediaCapability`]
//! records and picks, per media kind, the codec to announce to the other
//! engine.
//!
//! Selection is first-match: the first remote codec whose kind and name match
//! one of the preferred codecs wins. The remote list order is trusted as-is;
//! no attempt is made to rank codecs.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::error::{Result, SdpError};
use crate::types::{FormatParameter, HeaderExtension, MediaCapability, MediaDirection, MediaKind, RtcpFeedback};

/// A codec the local side is able to carry for a kind
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CodecPreference {
    pub kind: MediaKind,
    pub codec: String,
}

impl CodecPreference {
    pub fn new(kind: MediaKind, codec: impl Into<String>) -> Self {
        Self {
            kind,
            codec: codec.into(),
        }
    }

    /// audio/opus and video/H264
    pub fn defaults() -> Vec<CodecPreference> {
        vec![
            CodecPreference::new(MediaKind::Audio, "opus"),
            CodecPreference::new(MediaKind::Video, "H264"),
        ]
    }
}

/// Pick one capability per preferred kind from `remote`.
///
/// Kinds are returned audio first, then video. Inputs are not modified.
pub fn translate(remote: &[MediaCapability], preferred: &[CodecPreference]) -> Result<Vec<MediaCapability>> {
    let mut selected = Vec::new();

    for kind in MediaKind::ALL {
        let wanted: Vec<&str> = preferred
            .iter()
            .filter(|p| p.kind == kind)
            .map(|p| p.codec.as_str())
            .collect();
        if wanted.is_empty() {
            continue;
        }

        let found = remote
            .iter()
            .find(|capability| wanted.iter().any(|codec| capability.matches(kind, codec)));

        match found {
            Some(capability) => {
                tracing::debug!("Selected {} (PT {}) for {}", capability.mime_type(), capability.payload_type, kind);
                selected.push(capability.clone());
            }
            None => {
                return Err(SdpError::NoMatchingCodec {
                    kind,
                    wanted: wanted.iter().map(|c| c.to_string()).collect(),
                });
            }
        }
    }

    Ok(selected)
}

/// One RTCP feedback entry as engines report it
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EngineFeedback {
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub parameter: String,
}

/// One codec as engines report it.
///
/// Snake-case aliases let the same shape be read from configuration files,
/// whose keys are case-folded on load.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EngineCodec {
    /// `kind/subtype`, e.g. `video/H264`
    #[serde(alias = "mime_type")]
    pub mime_type: String,
    #[serde(alias = "clock_rate")]
    pub clock_rate: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub channels: Option<u8>,
    #[serde(alias = "preferred_payload_type")]
    pub preferred_payload_type: u8,
    #[serde(default)]
    pub parameters: BTreeMap<String, serde_json::Value>,
    #[serde(default, alias = "rtcp_feedback")]
    pub rtcp_feedback: Vec<EngineFeedback>,
}

/// One RTP header extension as engines report it. An empty kind applies to
/// both audio and video.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EngineHeaderExtension {
    #[serde(default)]
    pub kind: String,
    pub uri: String,
    #[serde(alias = "preferred_id")]
    pub preferred_id: u16,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub direction: Option<String>,
}

impl EngineHeaderExtension {
    fn applies_to(&self, kind: MediaKind) -> bool {
        self.kind.is_empty() || self.kind.eq_ignore_ascii_case(kind.as_str())
    }
}

/// An engine's full capability description
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EngineRtpCapabilities {
    #[serde(default)]
    pub codecs: Vec<EngineCodec>,
    #[serde(default, alias = "header_extensions")]
    pub header_extensions: Vec<EngineHeaderExtension>,
}

impl EngineRtpCapabilities {
    pub fn from_json(value: serde_json::Value) -> Result<Self> {
        serde_json::from_value(value)
            .map_err(|e| SdpError::invalid_capability(format!("unexpected capability shape: {}", e)))
    }

    /// Preferred payload type for an exact MIME type such as `video/H264`
    pub fn preferred_payload_type(&self, mime_type: &str) -> Option<u8> {
        self.codecs
            .iter()
            .find(|c| c.mime_type == mime_type)
            .map(|c| c.preferred_payload_type)
    }

    /// Preferred id of the first header extension of `kind` whose URI
    /// contains `fragment`
    pub fn header_extension_id(&self, kind: MediaKind, fragment: &str) -> Option<u16> {
        self.header_extensions
            .iter()
            .find(|e| e.kind.eq_ignore_ascii_case(kind.as_str()) && e.uri.contains(fragment))
            .map(|e| e.preferred_id)
    }

    /// Validated capability records, in codec list order
    pub fn to_media_capabilities(&self) -> Result<Vec<MediaCapability>> {
        self.codecs.iter().map(|codec| self.convert(codec)).collect()
    }

    fn convert(&self, codec: &EngineCodec) -> Result<MediaCapability> {
        let (kind, subtype) = codec
            .mime_type
            .split_once('/')
            .ok_or_else(|| SdpError::invalid_capability(format!("mime type {:?} has no subtype", codec.mime_type)))?;
        let kind: MediaKind = kind
            .parse()
            .map_err(|_| SdpError::invalid_capability(format!("unsupported media kind in {:?}", codec.mime_type)))?;

        let mut capability = MediaCapability::new(kind, codec.preferred_payload_type, subtype, codec.clock_rate);
        capability.channels = match kind {
            MediaKind::Audio => Some(codec.channels.unwrap_or(1)),
            MediaKind::Video => codec.channels,
        };
        capability.parameters = codec
            .parameters
            .iter()
            .map(|(name, value)| match value {
                serde_json::Value::String(s) => FormatParameter::new(name.clone(), s.clone()),
                serde_json::Value::Null => FormatParameter::flag(name.clone()),
                other => FormatParameter::new(name.clone(), other.to_string()),
            })
            .collect();
        capability.rtcp_feedback = codec
            .rtcp_feedback
            .iter()
            .map(|fb| {
                if fb.parameter.is_empty() {
                    RtcpFeedback::new(fb.kind.clone())
                } else {
                    RtcpFeedback::with_parameter(fb.kind.clone(), fb.parameter.clone())
                }
            })
            .collect();
        capability.header_extensions = self
            .header_extensions
            .iter()
            .filter(|e| e.applies_to(kind))
            .map(|e| HeaderExtension {
                id: e.preferred_id,
                uri: e.uri.clone(),
                direction: e.direction.as_deref().and_then(|d| d.parse::<MediaDirection>().ok()),
            })
            .collect();

        capability.validate()?;
        Ok(capability)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::answer::NegotiatedAnswer;
    use crate::builder::OfferBuilder;
    use crate::types::PortBlock;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    fn router_capabilities() -> EngineRtpCapabilities {
        EngineRtpCapabilities::from_json(json!({
            "codecs": [
                {
                    "kind": "audio",
                    "mimeType": "audio/opus",
                    "clockRate": 48000,
                    "channels": 2,
                    "preferredPayloadType": 100,
                    "rtcpFeedback": [{ "type": "transport-cc" }]
                },
                {
                    "mimeType": "video/VP8",
                    "clockRate": 90000,
                    "preferredPayloadType": 101,
                    "rtcpFeedback": [{ "type": "nack" }, { "type": "nack", "parameter": "pli" }]
                },
                {
                    "mimeType": "video/H264",
                    "clockRate": 90000,
                    "preferredPayloadType": 103,
                    "parameters": {
                        "packetization-mode": 1,
                        "profile-level-id": "42e01f",
                        "level-asymmetry-allowed": 1
                    },
                    "rtcpFeedback": [{ "type": "goog-remb" }]
                },
                {
                    "mimeType": "video/h264",
                    "clockRate": 90000,
                    "preferredPayloadType": 105
                }
            ],
            "headerExtensions": [
                { "kind": "video", "uri": "http://www.webrtc.org/experiments/rtp-hdrext/abs-send-time", "preferredId": 4, "direction": "sendrecv" },
                { "kind": "audio", "uri": "urn:ietf:params:rtp-hdrext:ssrc-audio-level", "preferredId": 10 }
            ]
        }))
        .unwrap()
    }

    #[test]
    fn test_engine_codecs_become_capabilities() {
        let capabilities = router_capabilities().to_media_capabilities().unwrap();
        assert_eq!(capabilities.len(), 4);

        let opus = &capabilities[0];
        assert_eq!(opus.mime_type(), "audio/opus");
        assert_eq!(opus.channels, Some(2));
        assert_eq!(opus.header_extensions.len(), 1);
        assert_eq!(opus.header_extensions[0].id, 10);

        let h264 = &capabilities[2];
        assert_eq!(h264.payload_type, 103);
        assert_eq!(
            h264.fmtp_value().as_deref(),
            Some("103 level-asymmetry-allowed=1;packetization-mode=1;profile-level-id=42e01f")
        );
        assert_eq!(h264.header_extensions[0].direction, Some(MediaDirection::SendRecv));
    }

    #[test]
    fn test_first_match_wins() {
        let remote = router_capabilities().to_media_capabilities().unwrap();
        let selected = translate(&remote, &CodecPreference::defaults()).unwrap();

        assert_eq!(selected.len(), 2);
        assert_eq!(selected[0].codec, "opus");
        // Both H264 entries match case-insensitively; the first listed is taken
        assert_eq!(selected[1].payload_type, 103);
    }

    #[test]
    fn test_no_matching_codec() {
        let remote = vec![MediaCapability::new(MediaKind::Video, 96, "VP8", 90000)];
        let err = translate(&remote, &[CodecPreference::new(MediaKind::Video, "H264")]).unwrap_err();
        assert_eq!(
            err,
            SdpError::NoMatchingCodec {
                kind: MediaKind::Video,
                wanted: vec!["H264".to_string()],
            }
        );
    }

    #[test]
    fn test_translate_does_not_touch_input() {
        let remote = router_capabilities().to_media_capabilities().unwrap();
        let before = remote.clone();
        let _ = translate(&remote, &CodecPreference::defaults());
        assert_eq!(remote, before);
    }

    #[test]
    fn test_lookup_helpers() {
        let caps = router_capabilities();
        assert_eq!(caps.preferred_payload_type("video/H264"), Some(103));
        assert_eq!(caps.preferred_payload_type("video/AV1"), None);
        assert_eq!(caps.header_extension_id(MediaKind::Video, "abs-send-time"), Some(4));
        assert_eq!(caps.header_extension_id(MediaKind::Audio, "abs-send-time"), None);
    }

    #[test]
    fn test_unexpected_shape_is_rejected() {
        assert!(EngineRtpCapabilities::from_json(json!({ "codecs": [{ "mimeType": "video/H264" }] })).is_err());

        let bad_kind = EngineRtpCapabilities::from_json(json!({
            "codecs": [{ "mimeType": "text/t140", "clockRate": 1000, "preferredPayloadType": 98 }]
        }))
        .unwrap();
        assert!(matches!(
            bad_kind.to_media_capabilities(),
            Err(SdpError::InvalidCapability { .. })
        ));
    }

    #[test]
    fn test_translated_offer_round_trips() {
        let remote = router_capabilities().to_media_capabilities().unwrap();
        let selected = translate(&remote, &CodecPreference::defaults()).unwrap();
        let offer = OfferBuilder::new("round-trip", "127.0.0.1".parse().unwrap())
            .capabilities(selected.clone())
            .port_block(PortBlock::new(vec![30000, 30001, 30002, 30003]))
            .build()
            .unwrap();

        let answer = NegotiatedAnswer::from_answer(&offer.sdp, &MediaKind::ALL).unwrap();
        for capability in &selected {
            let media = answer.get(capability.kind).unwrap();
            assert_eq!(media.payload_type, capability.payload_type);
            assert_eq!(media.codec, capability.codec);
            assert_eq!(media.clock_rate, capability.clock_rate);
        }
    }
}
