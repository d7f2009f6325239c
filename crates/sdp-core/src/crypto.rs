//! SDES key attributes (RFC 4568 `a=crypto`)

use base64::{engine::general_purpose::STANDARD, Engine as _};
use rand::RngCore;
use serde::{Deserialize, Serialize};

use crate::error::{Result, SdpError};

/// Suite spelling used on the wire
pub const DEFAULT_CRYPTO_SUITE: &str = "AES_CM_128_HMAC_SHA1_80";

/// 16-byte master key followed by a 14-byte master salt
pub const MASTER_KEY_SALT_LEN: usize = 30;

/// One `a=crypto:<tag> <suite> <key-params>` attribute
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CryptoAttribute {
    pub tag: u32,
    pub suite: String,
    /// Key parameters as written, e.g. `inline:<base64>`
    pub key_params: String,
}

impl CryptoAttribute {
    /// Generate a fresh master key/salt for the default suite
    pub fn generate(tag: u32) -> Self {
        let mut key = [0u8; MASTER_KEY_SALT_LEN];
        rand::thread_rng().fill_bytes(&mut key);
        Self {
            tag,
            suite: DEFAULT_CRYPTO_SUITE.to_string(),
            key_params: format!("inline:{}", STANDARD.encode(key)),
        }
    }

    /// Parse the value part of an `a=crypto` line
    pub fn parse(value: &str) -> Result<Self> {
        let mut parts = value.split_whitespace();
        let (tag, suite, key_params) = match (parts.next(), parts.next(), parts.next()) {
            (Some(tag), Some(suite), Some(key_params)) => (tag, suite, key_params),
            _ => return Err(SdpError::parse(value, "crypto needs tag, suite and key parameters")),
        };
        let tag = tag
            .parse::<u32>()
            .map_err(|_| SdpError::parse(value, "crypto tag is not a number"))?;
        if !key_params.starts_with("inline:") {
            return Err(SdpError::parse(value, "only inline crypto keys are supported"));
        }
        Ok(Self {
            tag,
            suite: suite.to_string(),
            key_params: key_params.to_string(),
        })
    }

    pub fn to_sdp_value(&self) -> String {
        format!("{} {} {}", self.tag, self.suite, self.key_params)
    }

    /// Decoded master key and salt, without any `|lifetime|mki` suffix
    pub fn master_key(&self) -> Option<Vec<u8>> {
        let encoded = self.key_params.strip_prefix("inline:")?;
        let encoded = encoded.split('|').next()?;
        STANDARD.decode(encoded).ok()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_generated_key_decodes_to_full_length() {
        let crypto = CryptoAttribute::generate(1);
        assert_eq!(crypto.suite, DEFAULT_CRYPTO_SUITE);
        assert_eq!(crypto.master_key().map(|k| k.len()), Some(MASTER_KEY_SALT_LEN));
    }

    #[test]
    fn test_generated_keys_differ() {
        assert_ne!(CryptoAttribute::generate(1).key_params, CryptoAttribute::generate(1).key_params);
    }

    #[test]
    fn test_parse_crypto_line() {
        let value = "1 AES_CM_128_HMAC_SHA1_80 inline:PS1uQCVeeCFCanVmcjkpPywjNWhcYD0mXXtxaVBR|2^20|1:32";
        let crypto = CryptoAttribute::parse(value).unwrap();
        assert_eq!(crypto.tag, 1);
        assert_eq!(crypto.suite, "AES_CM_128_HMAC_SHA1_80");
        assert_eq!(crypto.master_key().map(|k| k.len()), Some(MASTER_KEY_SALT_LEN));
        assert_eq!(crypto.to_sdp_value(), value);
    }

    #[test]
    fn test_parse_rejects_non_inline_keys() {
        assert!(CryptoAttribute::parse("1 AES_CM_128_HMAC_SHA1_80 uri:https://example.com").is_err());
        assert!(CryptoAttribute::parse("x AES_CM_128_HMAC_SHA1_80 inline:abc").is_err());
        assert!(CryptoAttribute::parse("1 AES_CM_128_HMAC_SHA1_80").is_err());
    }
}
