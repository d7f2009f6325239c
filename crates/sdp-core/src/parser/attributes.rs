//! Typed attribute parsing
//!
//! Known attributes are validated when the description is parsed; a malformed
//! `rtpmap` or `rtcp` line is an error rather than something to skip over.

use std::net::IpAddr;

use serde::{Deserialize, Serialize};

use crate::crypto::CryptoAttribute;
use crate::error::{Result, SdpError};
use crate::types::{FormatParameter, HeaderExtension, MediaDirection, RtcpFeedback};

use super::line_parser::{parse_connection_line, split_attribute};

/// `a=rtpmap:<pt> <codec>/<clock>[/<channels>]`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RtpMap {
    pub payload_type: u8,
    pub codec: String,
    pub clock_rate: u32,
    pub channels: Option<u8>,
}

/// `a=rtcp:<port> [IN IP4 <address>]`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RtcpAttribute {
    pub port: u16,
    pub address: Option<IpAddr>,
}

/// A parsed attribute line
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Attribute {
    RtpMap(RtpMap),
    Fmtp {
        payload_type: u8,
        parameters: Vec<FormatParameter>,
    },
    Rtcp(RtcpAttribute),
    /// `None` payload type stands for the `*` wildcard
    RtcpFb {
        payload_type: Option<u8>,
        feedback: RtcpFeedback,
    },
    ExtMap(HeaderExtension),
    Ssrc {
        ssrc: u32,
        attribute: String,
        value: Option<String>,
    },
    Crypto(CryptoAttribute),
    Direction(MediaDirection),
    RtcpMux,
    RtcpRsize,
    Mid(String),
    Candidate(String),
    Other {
        name: String,
        value: Option<String>,
    },
}

fn payload_type(line: &str, value: &str) -> Result<u8> {
    match value.parse::<u8>() {
        Ok(pt) if pt <= 127 => Ok(pt),
        _ => Err(SdpError::parse(line, format!("invalid payload type {:?}", value))),
    }
}

/// Parse the value of an `a=` line
pub fn parse_attribute(value: &str) -> Result<Attribute> {
    let (name, attr_value) = split_attribute(value);
    let required = || {
        attr_value
            .filter(|v| !v.is_empty())
            .ok_or_else(|| SdpError::parse(value, format!("attribute {} needs a value", name)))
    };

    let attribute = match name {
        "rtpmap" => Attribute::RtpMap(parse_rtpmap(required()?)?),
        "fmtp" => {
            let (payload_type, parameters) = parse_fmtp(required()?)?;
            Attribute::Fmtp {
                payload_type,
                parameters,
            }
        }
        "rtcp" => Attribute::Rtcp(parse_rtcp(required()?)?),
        "rtcp-fb" => {
            let (payload_type, feedback) = parse_rtcp_fb(required()?)?;
            Attribute::RtcpFb {
                payload_type,
                feedback,
            }
        }
        "extmap" => Attribute::ExtMap(parse_extmap(required()?)?),
        "ssrc" => {
            let (ssrc, attribute, value) = parse_ssrc(required()?)?;
            Attribute::Ssrc {
                ssrc,
                attribute,
                value,
            }
        }
        "crypto" => Attribute::Crypto(CryptoAttribute::parse(required()?)?),
        "sendrecv" | "sendonly" | "recvonly" | "inactive" if attr_value.is_none() => {
            Attribute::Direction(name.parse()?)
        }
        "rtcp-mux" => Attribute::RtcpMux,
        "rtcp-rsize" => Attribute::RtcpRsize,
        "mid" => Attribute::Mid(required()?.to_string()),
        "candidate" => Attribute::Candidate(required()?.to_string()),
        _ => Attribute::Other {
            name: name.to_string(),
            value: attr_value.map(str::to_string),
        },
    };

    Ok(attribute)
}

/// Parse `<pt> <codec>/<clock>[/<channels>]`
pub fn parse_rtpmap(value: &str) -> Result<RtpMap> {
    let (pt, encoding) = value
        .split_once(char::is_whitespace)
        .ok_or_else(|| SdpError::parse(value, "rtpmap needs payload type and encoding"))?;
    let payload_type = payload_type(value, pt)?;

    let mut parts = encoding.trim().split('/');
    let codec = parts.next().unwrap_or_default();
    if codec.is_empty() {
        return Err(SdpError::parse(value, "rtpmap has empty encoding name"));
    }
    let clock_rate = parts
        .next()
        .and_then(|c| c.parse::<u32>().ok())
        .filter(|c| *c > 0)
        .ok_or_else(|| SdpError::parse(value, "rtpmap has invalid clock rate"))?;
    let channels = match parts.next() {
        Some(c) => Some(
            c.parse::<u8>()
                .map_err(|_| SdpError::parse(value, "rtpmap has invalid channel count"))?,
        ),
        None => None,
    };

    Ok(RtpMap {
        payload_type,
        codec: codec.to_string(),
        clock_rate,
        channels,
    })
}

/// Parse `<pt> <name>=<value>;<flag>;...`
pub fn parse_fmtp(value: &str) -> Result<(u8, Vec<FormatParameter>)> {
    let (pt, params) = value
        .split_once(char::is_whitespace)
        .ok_or_else(|| SdpError::parse(value, "fmtp needs payload type and parameters"))?;
    let payload_type = payload_type(value, pt)?;

    let parameters = params
        .split(';')
        .map(str::trim)
        .filter(|p| !p.is_empty())
        .map(|p| match p.split_once('=') {
            Some((name, v)) => FormatParameter::new(name.trim(), v.trim()),
            None => FormatParameter::flag(p),
        })
        .collect();

    Ok((payload_type, parameters))
}

/// Parse `<port> [IN IP4 <address>]`
pub fn parse_rtcp(value: &str) -> Result<RtcpAttribute> {
    let (port, rest) = match value.split_once(char::is_whitespace) {
        Some((port, rest)) => (port, Some(rest.trim())),
        None => (value, None),
    };
    let port = port
        .parse::<u16>()
        .map_err(|_| SdpError::parse(value, "rtcp port is not a number"))?;
    let address = match rest {
        Some(rest) if !rest.is_empty() => {
            let (_, address) = parse_connection_line(rest)
                .map_err(|_| SdpError::parse(value, "rtcp has invalid connection address"))?;
            Some(address)
        }
        _ => None,
    };

    Ok(RtcpAttribute { port, address })
}

/// Parse `<pt|*> <type> [<parameter>]`
pub fn parse_rtcp_fb(value: &str) -> Result<(Option<u8>, RtcpFeedback)> {
    let mut parts = value.split_whitespace();
    let pt = parts
        .next()
        .ok_or_else(|| SdpError::parse(value, "rtcp-fb needs a payload type"))?;
    let payload_type = if pt == "*" { None } else { Some(payload_type(value, pt)?) };
    let kind = parts
        .next()
        .ok_or_else(|| SdpError::parse(value, "rtcp-fb needs a feedback type"))?;
    let parameter: Vec<&str> = parts.collect();

    let feedback = if parameter.is_empty() {
        RtcpFeedback::new(kind)
    } else {
        RtcpFeedback::with_parameter(kind, parameter.join(" "))
    };

    Ok((payload_type, feedback))
}

/// Parse `<id>[/<direction>] <uri> [<extension attributes>]` (RFC 8285)
pub fn parse_extmap(value: &str) -> Result<HeaderExtension> {
    let parts: Vec<&str> = value.split_whitespace().collect();
    if parts.len() < 2 {
        return Err(SdpError::parse(value, "invalid extmap format"));
    }

    let id_parts: Vec<&str> = parts[0].split('/').collect();
    let id = match id_parts[0].parse::<u16>() {
        Ok(id) if (1..=255).contains(&id) => id,
        _ => return Err(SdpError::parse(value, "extmap id out of range (1-255)")),
    };

    let direction = match id_parts.get(1) {
        Some(dir) => Some(dir.parse::<MediaDirection>()?),
        None => None,
    };

    let uri = parts[1];
    if !uri.starts_with("urn:") && !uri.starts_with("http:") && !uri.starts_with("https:") {
        return Err(SdpError::parse(value, "invalid extmap URI"));
    }

    Ok(HeaderExtension {
        id,
        uri: uri.to_string(),
        direction,
    })
}

/// Parse `<ssrc> <attribute>[:<value>]`
pub fn parse_ssrc(value: &str) -> Result<(u32, String, Option<String>)> {
    let (ssrc, rest) = value
        .split_once(char::is_whitespace)
        .ok_or_else(|| SdpError::parse(value, "ssrc needs an attribute"))?;
    let ssrc = ssrc
        .parse::<u32>()
        .map_err(|_| SdpError::parse(value, "ssrc is not a 32-bit number"))?;
    let (attribute, attr_value) = split_attribute(rest.trim());

    Ok((ssrc, attribute.to_string(), attr_value.map(str::to_string)))
}
