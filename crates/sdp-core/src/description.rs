//! Parsed session description records

use std::net::IpAddr;

use serde::{Deserialize, Serialize};

use crate::codec::static_capability;
use crate::crypto::CryptoAttribute;
use crate::error::{Result, SdpError};
use crate::parser::{Attribute, RtcpAttribute, RtpMap};
use crate::types::{FormatParameter, HeaderExtension, MediaCapability, MediaDirection, MediaKind, RtcpFeedback};

/// `o=` line fields
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Origin {
    pub username: String,
    pub session_id: String,
    pub session_version: String,
    pub address: IpAddr,
}

/// A whole session description
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionDescription {
    pub origin: Option<Origin>,
    pub session_name: Option<String>,
    pub timing: Option<String>,
    /// Session-level `c=` address
    pub connection: Option<IpAddr>,
    /// Session-level attributes
    pub attributes: Vec<Attribute>,
    pub media: Vec<MediaDescription>,
}

impl SessionDescription {
    /// First section of the given kind
    pub fn media_section(&self, kind: MediaKind) -> Option<&MediaDescription> {
        self.media.iter().find(|m| m.media_kind() == Some(kind))
    }

    /// First section of the given kind the answerer did not reject
    pub fn accepted_section(&self, kind: MediaKind) -> Option<&MediaDescription> {
        self.media
            .iter()
            .find(|m| m.media_kind() == Some(kind) && !m.is_rejected())
    }

    /// Number of sections of the given kind
    pub fn count_sections(&self, kind: MediaKind) -> usize {
        self.media.iter().filter(|m| m.media_kind() == Some(kind)).count()
    }

    /// Address a section's media is sent to: media-level `c=`, then
    /// session-level `c=`, then the origin address
    pub fn connection_address(&self, media: &MediaDescription) -> Option<IpAddr> {
        media
            .connection
            .or(self.connection)
            .or_else(|| self.origin.as_ref().map(|o| o.address))
    }

    /// Capabilities of every accepted audio/video section, in section and
    /// format order
    pub fn capabilities(&self) -> Result<Vec<MediaCapability>> {
        let mut capabilities = Vec::new();
        for media in self.media.iter().filter(|m| !m.is_rejected()) {
            if media.media_kind().is_some() {
                capabilities.extend(media.capabilities()?);
            }
        }
        Ok(capabilities)
    }
}

/// One `m=` section
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MediaDescription {
    /// Media type as written, e.g. `video` or `application`
    pub media: String,
    pub port: u16,
    pub protocol: String,
    pub formats: Vec<String>,
    pub connection: Option<IpAddr>,
    pub attributes: Vec<Attribute>,
}

impl MediaDescription {
    pub fn media_kind(&self) -> Option<MediaKind> {
        self.media.parse().ok()
    }

    /// A zero port marks a stream the answerer refused
    pub fn is_rejected(&self) -> bool {
        self.port == 0
    }

    /// Payload types listed on the `m=` line, in order
    pub fn payload_types(&self) -> Vec<u8> {
        self.formats.iter().filter_map(|f| f.parse::<u8>().ok()).collect()
    }

    pub fn rtpmap(&self, payload_type: u8) -> Option<&RtpMap> {
        self.attributes.iter().find_map(|a| match a {
            Attribute::RtpMap(map) if map.payload_type == payload_type => Some(map),
            _ => None,
        })
    }

    pub fn fmtp(&self, payload_type: u8) -> Vec<FormatParameter> {
        self.attributes
            .iter()
            .find_map(|a| match a {
                Attribute::Fmtp {
                    payload_type: pt,
                    parameters,
                } if *pt == payload_type => Some(parameters.clone()),
                _ => None,
            })
            .unwrap_or_default()
    }

    /// Feedback for a payload type, including `*` wildcard entries
    pub fn rtcp_feedback(&self, payload_type: u8) -> Vec<RtcpFeedback> {
        self.attributes
            .iter()
            .filter_map(|a| match a {
                Attribute::RtcpFb {
                    payload_type: pt,
                    feedback,
                } if pt.map_or(true, |pt| pt == payload_type) => Some(feedback.clone()),
                _ => None,
            })
            .collect()
    }

    pub fn header_extensions(&self) -> Vec<HeaderExtension> {
        self.attributes
            .iter()
            .filter_map(|a| match a {
                Attribute::ExtMap(ext) => Some(ext.clone()),
                _ => None,
            })
            .collect()
    }

    pub fn rtcp(&self) -> Option<&RtcpAttribute> {
        self.attributes.iter().find_map(|a| match a {
            Attribute::Rtcp(rtcp) => Some(rtcp),
            _ => None,
        })
    }

    /// CNAME announced through `a=ssrc:<n> cname:<value>`
    pub fn cname(&self) -> Option<&str> {
        self.attributes.iter().find_map(|a| match a {
            Attribute::Ssrc {
                attribute, value, ..
            } if attribute == "cname" => value.as_deref(),
            _ => None,
        })
    }

    pub fn ssrcs(&self) -> Vec<u32> {
        let mut ssrcs: Vec<u32> = Vec::new();
        for attribute in &self.attributes {
            if let Attribute::Ssrc { ssrc, .. } = attribute {
                if !ssrcs.contains(ssrc) {
                    ssrcs.push(*ssrc);
                }
            }
        }
        ssrcs
    }

    pub fn has_rtcp_rsize(&self) -> bool {
        self.attributes.iter().any(|a| matches!(a, Attribute::RtcpRsize))
    }

    pub fn has_rtcp_mux(&self) -> bool {
        self.attributes.iter().any(|a| matches!(a, Attribute::RtcpMux))
    }

    pub fn direction(&self) -> Option<MediaDirection> {
        self.attributes.iter().find_map(|a| match a {
            Attribute::Direction(direction) => Some(*direction),
            _ => None,
        })
    }

    pub fn crypto(&self) -> Vec<&CryptoAttribute> {
        self.attributes
            .iter()
            .filter_map(|a| match a {
                Attribute::Crypto(crypto) => Some(crypto),
                _ => None,
            })
            .collect()
    }

    pub fn candidates(&self) -> Vec<&str> {
        self.attributes
            .iter()
            .filter_map(|a| match a {
                Attribute::Candidate(candidate) => Some(candidate.as_str()),
                _ => None,
            })
            .collect()
    }

    /// Capability record for one payload type of this section
    pub fn capability(&self, payload_type: u8) -> Result<MediaCapability> {
        let kind = self.media_kind().ok_or_else(|| {
            SdpError::invalid_capability(format!("m={} is not an audio or video section", self.media))
        })?;

        let mut capability = match self.rtpmap(payload_type) {
            Some(map) => {
                let mut capability =
                    MediaCapability::new(kind, payload_type, map.codec.clone(), map.clock_rate);
                capability.channels = match kind {
                    MediaKind::Audio => Some(map.channels.unwrap_or(1)),
                    MediaKind::Video => None,
                };
                capability
            }
            None => static_capability(kind, payload_type).ok_or_else(|| {
                SdpError::invalid_capability(format!(
                    "payload type {} in m={} has no rtpmap",
                    payload_type, self.media
                ))
            })?,
        };

        capability.parameters = self.fmtp(payload_type);
        capability.rtcp_feedback = self.rtcp_feedback(payload_type);
        capability.header_extensions = self.header_extensions();
        capability.validate()?;

        Ok(capability)
    }

    /// Capabilities for every payload type on the `m=` line
    pub fn capabilities(&self) -> Result<Vec<MediaCapability>> {
        self.payload_types().into_iter().map(|pt| self.capability(pt)).collect()
    }
}
