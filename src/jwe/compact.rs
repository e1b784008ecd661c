//! # JWE Compact Serialization
//!
//! RSA-OAEP-256 key management with A256GCM content encryption.
//!
//! A token is five base64url (unpadded) segments separated by dots:
//! `protected header . encrypted key . IV . ciphertext . authentication tag`.
//! The additional authenticated data for AES-GCM is the ASCII of the encoded
//! protected header.

use super::error::JweError;
use aes_gcm::aead::{Aead, KeyInit, OsRng, Payload};
use aes_gcm::{Aes256Gcm, Key, Nonce};
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use rand::RngCore;
use rsa::{Oaep, RsaPrivateKey, RsaPublicKey};
use serde::{Deserialize, Serialize};
use sha2::Sha256;
use zeroize::Zeroizing;

pub const KEY_ALGORITHM: &str = "RSA-OAEP-256";
pub const CONTENT_ENCRYPTION: &str = "A256GCM";

const CEK_SIZE: usize = 32;
const IV_SIZE: usize = 12;
const TAG_SIZE: usize = 16;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProtectedHeader {
    pub alg: String,
    pub enc: String,
}

impl Default for ProtectedHeader {
    fn default() -> Self {
        Self {
            alg: KEY_ALGORITHM.to_string(),
            enc: CONTENT_ENCRYPTION.to_string(),
        }
    }
}

/// Encrypts payloads for the holder of one RSA public key
#[derive(Debug, Clone)]
pub struct Encrypter {
    public_key: RsaPublicKey,
}

impl Encrypter {
    pub fn new(public_key: RsaPublicKey) -> Self {
        Self { public_key }
    }

    pub fn public_key(&self) -> &RsaPublicKey {
        &self.public_key
    }

    /// Encrypt `plaintext` into a compact JWE with a fresh content key and IV
    pub fn encrypt(&self, plaintext: &[u8]) -> Result<String, JweError> {
        let header = serde_json::to_vec(&ProtectedHeader::default())
            .map_err(|e| JweError::Encryption(format!("header serialization failed: {e}")))?;
        let protected = URL_SAFE_NO_PAD.encode(header);

        let mut cek = Zeroizing::new([0u8; CEK_SIZE]);
        OsRng.fill_bytes(cek.as_mut());
        let encrypted_key = self
            .public_key
            .encrypt(&mut OsRng, Oaep::new::<Sha256>(), cek.as_slice())
            .map_err(|e| JweError::Encryption(format!("key wrap failed: {e}")))?;

        let mut iv = [0u8; IV_SIZE];
        OsRng.fill_bytes(&mut iv);

        let cipher = Aes256Gcm::new(Key::<Aes256Gcm>::from_slice(cek.as_slice()));
        let mut ciphertext = cipher
            .encrypt(
                Nonce::from_slice(&iv),
                Payload {
                    msg: plaintext,
                    aad: protected.as_bytes(),
                },
            )
            .map_err(|e| JweError::Encryption(format!("content encryption failed: {e}")))?;
        let tag = ciphertext.split_off(ciphertext.len() - TAG_SIZE);

        Ok(format!(
            "{protected}.{}.{}.{}.{}",
            URL_SAFE_NO_PAD.encode(encrypted_key),
            URL_SAFE_NO_PAD.encode(iv),
            URL_SAFE_NO_PAD.encode(ciphertext),
            URL_SAFE_NO_PAD.encode(tag),
        ))
    }
}

/// Parsed, still encrypted compact JWE
#[derive(Debug, Clone)]
pub struct JweObject {
    protected: String,
    header: ProtectedHeader,
    encrypted_key: Vec<u8>,
    iv: Vec<u8>,
    ciphertext: Vec<u8>,
    tag: Vec<u8>,
}

fn decode_segment(name: &str, segment: &str) -> Result<Vec<u8>, JweError> {
    URL_SAFE_NO_PAD
        .decode(segment)
        .map_err(|e| JweError::Malformed(format!("{name} is not base64url: {e}")))
}

impl JweObject {
    /// Parse a compact serialization without decrypting it
    pub fn parse(token: &str) -> Result<Self, JweError> {
        let segments: Vec<&str> = token.trim().split('.').collect();
        let [protected, encrypted_key, iv, ciphertext, tag] = segments.as_slice() else {
            return Err(JweError::Malformed(format!(
                "expected 5 segments, found {}",
                segments.len()
            )));
        };

        let header: ProtectedHeader =
            serde_json::from_slice(&decode_segment("protected header", protected)?)
                .map_err(|e| JweError::Malformed(format!("invalid protected header: {e}")))?;
        if header.alg != KEY_ALGORITHM || header.enc != CONTENT_ENCRYPTION {
            return Err(JweError::Malformed(format!(
                "unsupported algorithms alg={} enc={}",
                header.alg, header.enc
            )));
        }

        let object = Self {
            protected: (*protected).to_string(),
            header,
            encrypted_key: decode_segment("encrypted key", encrypted_key)?,
            iv: decode_segment("IV", iv)?,
            ciphertext: decode_segment("ciphertext", ciphertext)?,
            tag: decode_segment("authentication tag", tag)?,
        };

        if object.encrypted_key.is_empty() {
            return Err(JweError::Malformed("empty encrypted key".into()));
        }
        if object.iv.len() != IV_SIZE {
            return Err(JweError::Malformed(format!("IV must be {IV_SIZE} bytes")));
        }
        if object.tag.len() != TAG_SIZE {
            return Err(JweError::Malformed(format!(
                "authentication tag must be {TAG_SIZE} bytes"
            )));
        }
        Ok(object)
    }

    pub fn header(&self) -> &ProtectedHeader {
        &self.header
    }

    /// Unwrap the content key with `key` and decrypt the payload.
    ///
    /// Any failure here is a [`JweError::CryptoFailure`]; with a well-formed token
    /// that almost always means it was encrypted for a different key.
    pub fn decrypt(&self, key: &RsaPrivateKey) -> Result<Zeroizing<Vec<u8>>, JweError> {
        let cek = Zeroizing::new(
            key.decrypt(Oaep::new::<Sha256>(), &self.encrypted_key)
                .map_err(|e| JweError::CryptoFailure(format!("key unwrap failed: {e}")))?,
        );
        if cek.len() != CEK_SIZE {
            return Err(JweError::CryptoFailure(format!(
                "content key must be {CEK_SIZE} bytes"
            )));
        }

        let mut sealed = Vec::with_capacity(self.ciphertext.len() + TAG_SIZE);
        sealed.extend_from_slice(&self.ciphertext);
        sealed.extend_from_slice(&self.tag);

        let cipher = Aes256Gcm::new(Key::<Aes256Gcm>::from_slice(cek.as_slice()));
        let plaintext = cipher
            .decrypt(
                Nonce::from_slice(&self.iv),
                Payload {
                    msg: &sealed,
                    aad: self.protected.as_bytes(),
                },
            )
            .map_err(|e| JweError::CryptoFailure(format!("content decryption failed: {e}")))?;
        Ok(Zeroizing::new(plaintext))
    }
}
