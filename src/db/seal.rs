//! At-rest sealing of integration documents with AES-256-GCM.

use ring::aead::{Aad, LessSafeKey, Nonce, UnboundKey, AES_256_GCM};
use ring::rand::{SecureRandom, SystemRandom};
use serde::{Deserialize, Serialize};

use crate::db::DbError;

pub const SEALING_KEY_BYTES: usize = 32;
const NONCE_BYTES: usize = 12;
const ENVELOPE_VERSION: u8 = 1;

#[derive(Clone)]
pub struct SealingKey([u8; SEALING_KEY_BYTES]);

impl std::fmt::Debug for SealingKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("SealingKey(..)")
    }
}

impl SealingKey {
    pub fn from_bytes(bytes: [u8; SEALING_KEY_BYTES]) -> Self {
        Self(bytes)
    }

    /// Parse a key given as 64 hex characters.
    pub fn from_hex(raw: &str) -> Result<Self, DbError> {
        let decoded = hex_decode(raw)?;
        let bytes: [u8; SEALING_KEY_BYTES] = decoded
            .try_into()
            .map_err(|_| DbError::Seal("sealing key must be 32 bytes".to_string()))?;
        Ok(Self(bytes))
    }

    fn aead_key(&self) -> Result<LessSafeKey, DbError> {
        let unbound = UnboundKey::new(&AES_256_GCM, &self.0)
            .map_err(|_| DbError::Seal("construct AES-256-GCM key".to_string()))?;
        Ok(LessSafeKey::new(unbound))
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct SealedEnvelope {
    version: u8,
    nonce_hex: String,
    ciphertext_hex: String,
}

pub fn seal(plaintext: &str, key: &SealingKey) -> Result<String, DbError> {
    let mut buffer = plaintext.as_bytes().to_vec();

    let mut nonce_bytes = [0u8; NONCE_BYTES];
    SystemRandom::new()
        .fill(&mut nonce_bytes)
        .map_err(|_| DbError::Seal("generate random nonce".to_string()))?;

    key.aead_key()?
        .seal_in_place_append_tag(
            Nonce::assume_unique_for_key(nonce_bytes),
            Aad::empty(),
            &mut buffer,
        )
        .map_err(|_| DbError::Seal("encrypt integration document".to_string()))?;

    let envelope = SealedEnvelope {
        version: ENVELOPE_VERSION,
        nonce_hex: hex_encode(&nonce_bytes),
        ciphertext_hex: hex_encode(&buffer),
    };
    Ok(serde_json::to_string(&envelope)?)
}

/// Returns `Ok(None)` when `raw` is not a sealed envelope at all.
pub fn unseal(raw: &str, key: &SealingKey) -> Result<Option<String>, DbError> {
    let Ok(envelope) = serde_json::from_str::<SealedEnvelope>(raw) else {
        return Ok(None);
    };

    if envelope.version != ENVELOPE_VERSION {
        return Err(DbError::Seal(format!(
            "unsupported envelope version {}",
            envelope.version
        )));
    }

    let nonce_bytes: [u8; NONCE_BYTES] = hex_decode(&envelope.nonce_hex)?
        .try_into()
        .map_err(|_| DbError::Seal("invalid nonce length in envelope".to_string()))?;
    let mut ciphertext = hex_decode(&envelope.ciphertext_hex)?;

    let plaintext = key
        .aead_key()?
        .open_in_place(
            Nonce::assume_unique_for_key(nonce_bytes),
            Aad::empty(),
            &mut ciphertext,
        )
        .map_err(|_| DbError::Seal("decrypt integration document".to_string()))?;

    String::from_utf8(plaintext.to_vec())
        .map(Some)
        .map_err(|_| DbError::Seal("decrypted document is not utf-8".to_string()))
}

/// Cheap check used when no key is configured but a sealed document is found.
pub fn looks_sealed(raw: &str) -> bool {
    serde_json::from_str::<SealedEnvelope>(raw).is_ok()
}

fn hex_encode(bytes: &[u8]) -> String {
    const HEX: &[u8; 16] = b"0123456789abcdef";
    let mut out = String::with_capacity(bytes.len() * 2);
    for byte in bytes {
        out.push(HEX[(byte >> 4) as usize] as char);
        out.push(HEX[(byte & 0x0f) as usize] as char);
    }
    out
}

fn hex_decode(raw: &str) -> Result<Vec<u8>, DbError> {
    let bytes = raw.trim().as_bytes();
    if bytes.len() % 2 != 0 {
        return Err(DbError::Seal("hex string length must be even".to_string()));
    }

    bytes
        .chunks(2)
        .map(|pair| {
            let hi = hex_nibble(pair[0]);
            let lo = hex_nibble(pair[1]);
            match (hi, lo) {
                (Some(hi), Some(lo)) => Ok((hi << 4) | lo),
                _ => Err(DbError::Seal("invalid hex digit".to_string())),
            }
        })
        .collect()
}

fn hex_nibble(byte: u8) -> Option<u8> {
    match byte {
        b'0'..=b'9' => Some(byte - b'0'),
        b'a'..=b'f' => Some(byte - b'a' + 10),
        b'A'..=b'F' => Some(byte - b'A' + 10),
        _ => None,
    }
}
