//! Secure encoder: HMAC-SHA256 over an optional AES-256-GCM envelope.
//!
//! ```text
//! encoded = [nonce(12) || ciphertext] || tag(32)      with a block key
//! encoded = plaintext || tag(32)                      MAC only
//! ```
//!
//! `decode` verifies the tag in constant time before anything is decrypted.

use aes_gcm::aead::{Aead, KeyInit};
use aes_gcm::{Aes256Gcm, Nonce};
use hmac::{Hmac, Mac};
use rand::RngCore;
use sha2::Sha256;
use thiserror::Error;

type HmacSha256 = Hmac<Sha256>;

pub const MIN_HASH_KEY_LEN: usize = 32;
pub const BLOCK_KEY_LEN: usize = 32;
const TAG_LEN: usize = 32;
const NONCE_LEN: usize = 12;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum EncoderError {
    #[error("hash key must be at least {MIN_HASH_KEY_LEN} bytes, got {0}")]
    HashKeyLength(usize),

    #[error("block key must be {BLOCK_KEY_LEN} bytes, got {0}")]
    BlockKeyLength(usize),

    #[error("encoded value too short")]
    Truncated,

    #[error("mac verification failed")]
    InvalidMac,

    #[error("encryption failed")]
    Encrypt,

    #[error("decryption failed")]
    Decrypt,
}

/// Authenticates (and optionally encrypts) opaque blobs.
pub trait SecureEncoder: Send + Sync {
    fn encode(&self, plaintext: &[u8]) -> Result<Vec<u8>, EncoderError>;
    fn decode(&self, encoded: &[u8]) -> Result<Vec<u8>, EncoderError>;
}

pub struct HmacAesEncoder {
    /// Keyed MAC, cloned per operation.
    mac: HmacSha256,
    cipher: Option<Aes256Gcm>,
}

impl HmacAesEncoder {
    pub fn new(hash_key: &[u8], block_key: Option<&[u8]>) -> Result<Self, EncoderError> {
        if hash_key.len() < MIN_HASH_KEY_LEN {
            return Err(EncoderError::HashKeyLength(hash_key.len()));
        }
        let cipher = match block_key {
            Some(key) if key.len() != BLOCK_KEY_LEN => return Err(EncoderError::BlockKeyLength(key.len())),
            Some(key) => Some(
                <Aes256Gcm as KeyInit>::new_from_slice(key).map_err(|_| EncoderError::BlockKeyLength(key.len()))?,
            ),
            None => None,
        };
        let mac = <HmacSha256 as Mac>::new_from_slice(hash_key)
            .map_err(|_| EncoderError::HashKeyLength(hash_key.len()))?;
        Ok(Self { mac, cipher })
    }
}

impl SecureEncoder for HmacAesEncoder {
    fn encode(&self, plaintext: &[u8]) -> Result<Vec<u8>, EncoderError> {
        let mut out = match &self.cipher {
            Some(cipher) => {
                let mut nonce = [0u8; NONCE_LEN];
                rand::rngs::OsRng.fill_bytes(&mut nonce);
                let ciphertext = cipher
                    .encrypt(Nonce::from_slice(&nonce), plaintext)
                    .map_err(|_| EncoderError::Encrypt)?;
                let mut out = Vec::with_capacity(NONCE_LEN + ciphertext.len() + TAG_LEN);
                out.extend_from_slice(&nonce);
                out.extend_from_slice(&ciphertext);
                out
            }
            None => {
                let mut out = Vec::with_capacity(plaintext.len() + TAG_LEN);
                out.extend_from_slice(plaintext);
                out
            }
        };

        let mut mac = self.mac.clone();
        mac.update(&out);
        out.extend_from_slice(&mac.finalize().into_bytes());
        Ok(out)
    }

    fn decode(&self, encoded: &[u8]) -> Result<Vec<u8>, EncoderError> {
        if encoded.len() < TAG_LEN {
            return Err(EncoderError::Truncated);
        }
        let (body, tag) = encoded.split_at(encoded.len() - TAG_LEN);
        let mut mac = self.mac.clone();
        mac.update(body);
        mac.verify_slice(tag).map_err(|_| EncoderError::InvalidMac)?;

        match &self.cipher {
            Some(cipher) => {
                if body.len() < NONCE_LEN {
                    return Err(EncoderError::Truncated);
                }
                let (nonce, ciphertext) = body.split_at(NONCE_LEN);
                cipher
                    .decrypt(Nonce::from_slice(nonce), ciphertext)
                    .map_err(|_| EncoderError::Decrypt)
            }
            None => Ok(body.to_vec()),
        }
    }
}
