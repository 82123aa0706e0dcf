//! Cipher engine
//!
//! Authenticated encryption of single field values. The engine owns the
//! process key (as per-algorithm ciphers) and is otherwise stateless, so one
//! instance is shared across every concurrent caller without locking.

use crate::crypto::frame::{Algorithm, CipherFrame, TAG_LEN};
use crate::error::AuditError;
use crate::schema::TableRef;
use aes_gcm::aead::{Aead, KeyInit, Nonce, Payload};
use aes_gcm::Aes256Gcm;
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use chacha20poly1305::ChaCha20Poly1305;
use rand::rngs::OsRng;
use rand::RngCore;
use sha2::{Digest, Sha256};
use std::fmt;
use uuid::Uuid;

pub const KEY_LEN: usize = 32;

/// The single symmetric key of a process. Never persisted, never logged.
#[derive(Clone, PartialEq, Eq)]
pub struct KeyMaterial([u8; KEY_LEN]);

impl KeyMaterial {
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, AuditError> {
        let key: [u8; KEY_LEN] = bytes.try_into().map_err(|_| {
            AuditError::InvalidKey(format!("expected {} bytes, got {}", KEY_LEN, bytes.len()))
        })?;
        Ok(Self(key))
    }

    /// Decode a standard base64 key
    pub fn from_base64(encoded: &str) -> Result<Self, AuditError> {
        let raw = BASE64
            .decode(encoded.trim().as_bytes())
            .map_err(|e| AuditError::InvalidKey(format!("not valid base64: {}", e)))?;
        Self::from_bytes(&raw)
    }

    /// Fresh random key from the OS generator
    pub fn generate() -> Self {
        let mut key = [0u8; KEY_LEN];
        OsRng.fill_bytes(&mut key);
        Self(key)
    }

    pub fn to_base64(&self) -> String {
        BASE64.encode(self.0)
    }

    /// Per-algorithm subkey, so the two AEADs never share raw key bytes
    fn subkey(&self, algorithm: Algorithm) -> [u8; KEY_LEN] {
        let mut hasher = Sha256::new();
        hasher.update(b"audit-mirror/field-key/");
        hasher.update(algorithm.name().as_bytes());
        hasher.update(self.0);
        hasher.finalize().into()
    }
}

impl fmt::Debug for KeyMaterial {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("KeyMaterial(<redacted>)")
    }
}

/// Context bytes bound into every frame's tag
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AssociatedData(Vec<u8>);

impl AssociatedData {
    /// Length-prefixed encoding, so distinct part lists never collide
    pub fn from_parts(parts: &[&[u8]]) -> Self {
        let mut out = Vec::new();
        for part in parts {
            // identifiers are capped at 63 bytes; u16 covers any realistic part
            out.extend_from_slice(&(part.len() as u16).to_be_bytes());
            out.extend_from_slice(part);
        }
        Self(out)
    }

    /// Binds a frame to one cell: table, column and shadow row key
    pub fn for_field(table: &TableRef, column: &str, row_key: &Uuid) -> Self {
        Self::from_parts(&[
            table.schema.as_bytes(),
            table.name.as_bytes(),
            column.as_bytes(),
            row_key.as_bytes(),
        ])
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }
}

/// AEAD encrypt/decrypt of individual field values
pub struct CipherEngine {
    aes: Aes256Gcm,
    chacha: ChaCha20Poly1305,
}

impl CipherEngine {
    pub fn new(key: &KeyMaterial) -> Self {
        let aes_key = key.subkey(Algorithm::Aes256Gcm);
        let chacha_key = key.subkey(Algorithm::ChaCha20Poly1305);
        Self {
            aes: Aes256Gcm::new(&aes_key.into()),
            chacha: ChaCha20Poly1305::new(&chacha_key.into()),
        }
    }

    /// Encrypt with the default algorithm and a fresh random nonce
    pub fn encrypt_field(
        &self,
        plaintext: &[u8],
        aad: &AssociatedData,
    ) -> Result<CipherFrame, AuditError> {
        self.encrypt_field_with(Algorithm::DEFAULT, plaintext, aad)
    }

    /// Encrypt with an explicit algorithm
    pub fn encrypt_field_with(
        &self,
        algorithm: Algorithm,
        plaintext: &[u8],
        aad: &AssociatedData,
    ) -> Result<CipherFrame, AuditError> {
        let mut nonce = vec![0u8; algorithm.nonce_len()];
        OsRng.fill_bytes(&mut nonce);

        let payload = Payload {
            msg: plaintext,
            aad: aad.as_bytes(),
        };
        let mut sealed = match algorithm {
            Algorithm::Aes256Gcm => seal(&self.aes, &nonce, payload)?,
            Algorithm::ChaCha20Poly1305 => seal(&self.chacha, &nonce, payload)?,
        };

        let tag = sealed.split_off(sealed.len() - algorithm.tag_len());
        Ok(CipherFrame {
            algorithm,
            nonce,
            ciphertext: sealed,
            tag,
        })
    }

    /// Verify and decrypt. Returns nothing but the error on any mismatch.
    pub fn decrypt_field(
        &self,
        frame: &CipherFrame,
        aad: &AssociatedData,
    ) -> Result<Vec<u8>, AuditError> {
        let algorithm = frame.algorithm;
        if frame.nonce.len() != algorithm.nonce_len() || frame.tag.len() != algorithm.tag_len() {
            return Err(AuditError::MalformedFrame(format!(
                "{} frame with {}-byte nonce and {}-byte tag",
                algorithm,
                frame.nonce.len(),
                frame.tag.len()
            )));
        }

        let mut sealed = Vec::with_capacity(frame.ciphertext.len() + TAG_LEN);
        sealed.extend_from_slice(&frame.ciphertext);
        sealed.extend_from_slice(&frame.tag);

        let payload = Payload {
            msg: &sealed,
            aad: aad.as_bytes(),
        };
        match algorithm {
            Algorithm::Aes256Gcm => open(&self.aes, &frame.nonce, payload),
            Algorithm::ChaCha20Poly1305 => open(&self.chacha, &frame.nonce, payload),
        }
    }

    /// Decode a stored frame and decrypt it
    pub fn decrypt_encoded(
        &self,
        encoded: &[u8],
        aad: &AssociatedData,
    ) -> Result<Vec<u8>, AuditError> {
        let frame = CipherFrame::decode(encoded)?;
        self.decrypt_field(&frame, aad)
    }
}

fn seal<C: Aead>(
    cipher: &C,
    nonce: &[u8],
    payload: Payload<'_, '_>,
) -> Result<Vec<u8>, AuditError> {
    cipher
        .encrypt(Nonce::<C>::from_slice(nonce), payload)
        .map_err(|_| AuditError::Validation("plaintext exceeds cipher limits".to_string()))
}

fn open<C: Aead>(
    cipher: &C,
    nonce: &[u8],
    payload: Payload<'_, '_>,
) -> Result<Vec<u8>, AuditError> {
    cipher
        .decrypt(Nonce::<C>::from_slice(nonce), payload)
        .map_err(|_| AuditError::AuthenticationFailure)
}
