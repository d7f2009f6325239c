//! SDP line parsing utilities
//!
//! Low-level parsers for the line types the bridge cares about. Each SDP line
//! has the format `<type>=<value>` where type is a single character:
//! - v= (Protocol Version)
//! - o= (Origin)
//! - s= (Session Name)
//! - c= (Connection Information)
//! - t= (Timing)
//! - a= (Attributes)
//! - m= (Media Descriptions)
//!
//! Other line types are accepted and ignored by the description parser.

use std::net::IpAddr;

use nom::{
    branch::alt,
    bytes::complete::{tag, take_while1},
    character::complete::{alpha1, anychar, char, digit1, not_line_ending, space1},
    combinator::{map_res, opt},
    multi::many0,
    sequence::preceded,
    IResult,
};

/// Parse an SDP line into a key-value pair
///
/// Handles CRLF and LF line endings and trims whitespace from the value.
///
/// ```
/// use castbridge_sdp_core::parser::parse_sdp_line;
///
/// let (_, (key, value)) = parse_sdp_line("a=rtpmap:96 VP8/90000").unwrap();
/// assert_eq!(key, 'a');
/// assert_eq!(value, "rtpmap:96 VP8/90000");
/// ```
pub fn parse_sdp_line(input: &str) -> IResult<&str, (char, &str)> {
    let (input, key) = anychar(input)?;
    let (input, _) = char('=')(input)?;
    let (input, value) = not_line_ending(input)?;

    let input = input.trim_start_matches(['\r', '\n']);

    Ok((input, (key, value.trim())))
}

fn token(input: &str) -> IResult<&str, &str> {
    take_while1(|c: char| !c.is_ascii_whitespace())(input)
}

fn port_number(input: &str) -> IResult<&str, u16> {
    map_res(digit1, |s: &str| s.parse::<u16>())(input)
}

/// Fields of an `m=` line value
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MediaLine<'a> {
    pub media: &'a str,
    pub port: u16,
    pub port_count: Option<u16>,
    pub protocol: &'a str,
    pub formats: Vec<&'a str>,
}

/// Parse the value of a media line: `<media> <port>[/<count>] <proto> <fmt> ...`
pub fn parse_media_line(input: &str) -> IResult<&str, MediaLine<'_>> {
    let (input, media) = alpha1(input)?;
    let (input, _) = space1(input)?;
    let (input, port) = port_number(input)?;
    let (input, port_count) = opt(preceded(char('/'), port_number))(input)?;
    let (input, _) = space1(input)?;
    let (input, protocol) = token(input)?;
    let (input, formats) = many0(preceded(space1, token))(input)?;

    Ok((
        input,
        MediaLine {
            media,
            port,
            port_count,
            protocol,
            formats,
        },
    ))
}

/// Parse the value of a connection line: `IN IP4 <address>[/<ttl>]`
pub fn parse_connection_line(input: &str) -> IResult<&str, IpAddr> {
    let (input, _) = tag("IN")(input)?;
    let (input, _) = space1(input)?;
    let (input, _) = alt((tag("IP4"), tag("IP6")))(input)?;
    let (input, _) = space1(input)?;
    let (input, address) = map_res(
        take_while1(|c: char| c != '/' && !c.is_ascii_whitespace()),
        |s: &str| s.parse::<IpAddr>(),
    )(input)?;
    let (input, _) = opt(preceded(char('/'), digit1))(input)?;

    Ok((input, address))
}

/// Split an attribute value into name and optional value at the first `:`
pub fn split_attribute(value: &str) -> (&str, Option<&str>) {
    match value.split_once(':') {
        Some((name, rest)) => (name.trim(), Some(rest.trim())),
        None => (value.trim(), None),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_sdp_line() {
        let (_, (key, value)) = parse_sdp_line("v=0").unwrap();
        assert_eq!(key, 'v');
        assert_eq!(value, "0");

        let (_, (key, value)) = parse_sdp_line("s=My Session Name").unwrap();
        assert_eq!(key, 's');
        assert_eq!(value, "My Session Name");

        // Values may themselves contain '='
        let (_, (key, value)) = parse_sdp_line("a=fmtp:102 packetization-mode=1").unwrap();
        assert_eq!(key, 'a');
        assert_eq!(value, "fmtp:102 packetization-mode=1");

        // Line endings are consumed
        let (rest, (_, value)) = parse_sdp_line("c=IN IP4 127.0.0.1\r\nt=0 0").unwrap();
        assert_eq!(value, "IN IP4 127.0.0.1");
        assert_eq!(rest, "t=0 0");

        assert!(parse_sdp_line("garbage").is_err());
    }

    #[test]
    fn test_parse_media_line() {
        let (_, media) = parse_media_line("video 10002 RTP/AVPF 102 103").unwrap();
        assert_eq!(media.media, "video");
        assert_eq!(media.port, 10002);
        assert_eq!(media.port_count, None);
        assert_eq!(media.protocol, "RTP/AVPF");
        assert_eq!(media.formats, vec!["102", "103"]);

        let (_, media) = parse_media_line("audio 49170/2 RTP/AVP 0").unwrap();
        assert_eq!(media.port_count, Some(2));

        assert!(parse_media_line("video abc RTP/AVP 96").is_err());
        assert!(parse_media_line("video 99999 RTP/AVP 96").is_err());
    }

    #[test]
    fn test_parse_connection_line() {
        let (_, addr) = parse_connection_line("IN IP4 192.168.1.10").unwrap();
        assert_eq!(addr, "192.168.1.10".parse::<IpAddr>().unwrap());

        let (_, addr) = parse_connection_line("IN IP4 224.2.1.1/127").unwrap();
        assert_eq!(addr, "224.2.1.1".parse::<IpAddr>().unwrap());

        let (_, addr) = parse_connection_line("IN IP6 ::1").unwrap();
        assert!(addr.is_loopback());

        assert!(parse_connection_line("IN IP4 not-an-address").is_err());
    }

    #[test]
    fn test_split_attribute() {
        assert_eq!(split_attribute("rtcp-rsize"), ("rtcp-rsize", None));
        assert_eq!(split_attribute("rtcp:10003"), ("rtcp", Some("10003")));
        assert_eq!(
            split_attribute("ssrc:1 cname:abc"),
            ("ssrc", Some("1 cname:abc"))
        );
    }
}
