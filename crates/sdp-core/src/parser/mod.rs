//! Session description parser
//!
//! Turns answer text into a [`SessionDescription`] with typed attributes.
//! Line types the bridge does not use (`i=`, `u=`, `e=`, `p=`, `b=`, `r=`,
//! `z=`, `k=`) are skipped.

pub mod attributes;
pub mod line_parser;

pub use attributes::{parse_attribute, Attribute, RtcpAttribute, RtpMap};
pub use line_parser::{parse_connection_line, parse_media_line, parse_sdp_line};

use crate::description::{MediaDescription, Origin, SessionDescription};
use crate::error::{Result, SdpError};

fn parse_origin(value: &str) -> Result<Origin> {
    let fields: Vec<&str> = value.split_whitespace().collect();
    if fields.len() != 6 {
        return Err(SdpError::parse(value, "origin needs six fields"));
    }
    let address = fields[5]
        .parse()
        .map_err(|_| SdpError::parse(value, "origin address is not an IP address"))?;

    Ok(Origin {
        username: fields[0].to_string(),
        session_id: fields[1].to_string(),
        session_version: fields[2].to_string(),
        address,
    })
}

/// Parse a complete session description
pub fn parse_session_description(text: &str) -> Result<SessionDescription> {
    let mut description = SessionDescription::default();
    let mut saw_version = false;

    for raw_line in text.lines() {
        let line = raw_line.trim_end_matches('\r');
        if line.trim().is_empty() {
            continue;
        }

        let (_, (key, value)) = parse_sdp_line(line)
            .map_err(|_| SdpError::parse(line, "expected <type>=<value>"))?;

        match key {
            'v' => {
                if value != "0" {
                    return Err(SdpError::parse(line, "unsupported SDP version"));
                }
                saw_version = true;
            }
            'o' => description.origin = Some(parse_origin(value)?),
            's' => description.session_name = Some(value.to_string()),
            't' => description.timing = Some(value.to_string()),
            'c' => {
                let (_, address) = parse_connection_line(value)
                    .map_err(|_| SdpError::parse(line, "invalid connection line"))?;
                match description.media.last_mut() {
                    Some(media) => media.connection = Some(address),
                    None => description.connection = Some(address),
                }
            }
            'm' => {
                let (_, media) = parse_media_line(value)
                    .map_err(|_| SdpError::parse(line, "invalid media line"))?;
                description.media.push(MediaDescription {
                    media: media.media.to_string(),
                    port: media.port,
                    protocol: media.protocol.to_string(),
                    formats: media.formats.iter().map(|f| f.to_string()).collect(),
                    connection: None,
                    attributes: Vec::new(),
                });
            }
            'a' => {
                let attribute = parse_attribute(value)?;
                match description.media.last_mut() {
                    Some(media) => media.attributes.push(attribute),
                    None => description.attributes.push(attribute),
                }
            }
            _ => {
                tracing::trace!("Skipping SDP line type '{}'", key);
            }
        }
    }

    if !saw_version {
        return Err(SdpError::parse(text.lines().next().unwrap_or_default(), "missing v= line"));
    }

    Ok(description)
}
