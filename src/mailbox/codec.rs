//! base64url decoding as used by Gmail message bodies and JWT segments.

use base64::alphabet;
use base64::engine::general_purpose::{GeneralPurpose, GeneralPurposeConfig, URL_SAFE_NO_PAD};
use base64::engine::DecodePaddingMode;
use base64::Engine;
use serde::Deserialize;

use crate::error::MailboxError;

/// Lenient decoder: stray bits in the final symbol are ignored the way
/// browser `atob` ignores them.
const LENIENT: GeneralPurpose = GeneralPurpose::new(
    &alphabet::STANDARD,
    GeneralPurposeConfig::new()
        .with_decode_allow_trailing_bits(true)
        .with_decode_padding_mode(DecodePaddingMode::Indifferent),
);

/// Decode base64url into text.
///
/// Bytes that are not valid UTF-8 come back as one `char` per byte
/// (Latin-1) instead of failing; callers that need strict text should use
/// [`decode_bytes`] and validate themselves.
pub fn decode(input: &str) -> Result<String, MailboxError> {
    let bytes = decode_bytes(input)?;
    match String::from_utf8(bytes) {
        Ok(text) => Ok(text),
        Err(err) => Ok(err.into_bytes().iter().map(|&b| char::from(b)).collect()),
    }
}

pub fn decode_bytes(input: &str) -> Result<Vec<u8>, MailboxError> {
    let mut standard: String = input
        .trim()
        .trim_end_matches('=')
        .chars()
        .map(|c| match c {
            '-' => '+',
            '_' => '/',
            other => other,
        })
        .collect();

    match standard.len() % 4 {
        0 => {}
        1 => {
            return Err(MailboxError::InvalidEncoding(format!(
                "length {} leaves a dangling character",
                standard.len()
            )))
        }
        remainder => standard.push_str(&"=".repeat(4 - remainder)),
    }

    LENIENT
        .decode(standard.as_bytes())
        .map_err(|e| MailboxError::InvalidEncoding(e.to_string()))
}

pub fn encode(input: &[u8]) -> String {
    URL_SAFE_NO_PAD.encode(input)
}

/// Claims read from a JWT payload segment. The signature is not verified;
/// the token came from the provider's own token endpoint.
#[derive(Debug, Clone, Default, Deserialize, PartialEq, Eq)]
pub struct JwtClaims {
    pub email: Option<String>,
    pub email_verified: Option<bool>,
    pub sub: Option<String>,
    pub exp: Option<i64>,
}

pub fn is_jwt(token: &str) -> bool {
    let segments: Vec<&str> = token.split('.').collect();
    segments.len() == 3 && segments.iter().all(|segment| !segment.is_empty())
}

pub fn decode_jwt_claims(token: &str) -> Result<JwtClaims, MailboxError> {
    if !is_jwt(token) {
        return Err(MailboxError::InvalidEncoding(
            "token is not a three-segment JWT".to_string(),
        ));
    }
    let payload = token.split('.').nth(1).unwrap_or_default();
    let bytes = decode_bytes(payload)?;
    serde_json::from_slice(&bytes).map_err(|e| MailboxError::decode("jwt payload", e))
}
