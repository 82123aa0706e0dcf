//! Cipher frame codec
//!
//! On-disk layout of one encrypted value:
//!
//! ```text
//! +--------+-----------+-----------------+--------------+-----------+
//! | alg id | nonce len | nonce           | ciphertext   | tag       |
//! | 1 byte | 1 byte    | nonce len bytes | variable     | 16 bytes  |
//! +--------+-----------+-----------------+--------------+-----------+
//! ```
//!
//! Algorithm ids are never reused. Decoding dispatches on the id so frames
//! written under an older default keep decrypting after the default changes.

use crate::error::AuditError;
use serde::{Deserialize, Serialize};
use std::fmt;

pub const HEADER_LEN: usize = 2;
pub const NONCE_LEN: usize = 12;
pub const TAG_LEN: usize = 16;

/// AEAD algorithms a frame may carry
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[repr(u8)]
pub enum Algorithm {
    /// AES-256-GCM, 96-bit nonce, 128-bit tag
    Aes256Gcm = 0x01,
    /// ChaCha20-Poly1305, 96-bit nonce, 128-bit tag
    ChaCha20Poly1305 = 0x02,
}

impl Algorithm {
    /// Algorithm used for new frames
    pub const DEFAULT: Algorithm = Algorithm::Aes256Gcm;

    pub fn from_id(id: u8) -> Option<Self> {
        match id {
            0x01 => Some(Algorithm::Aes256Gcm),
            0x02 => Some(Algorithm::ChaCha20Poly1305),
            _ => None,
        }
    }

    pub fn id(self) -> u8 {
        self as u8
    }

    pub fn nonce_len(self) -> usize {
        match self {
            Algorithm::Aes256Gcm | Algorithm::ChaCha20Poly1305 => NONCE_LEN,
        }
    }

    pub fn tag_len(self) -> usize {
        match self {
            Algorithm::Aes256Gcm | Algorithm::ChaCha20Poly1305 => TAG_LEN,
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            Algorithm::Aes256Gcm => "aes-256-gcm",
            Algorithm::ChaCha20Poly1305 => "chacha20-poly1305",
        }
    }
}

impl fmt::Display for Algorithm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// One encrypted field value
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CipherFrame {
    pub algorithm: Algorithm,
    pub nonce: Vec<u8>,
    pub ciphertext: Vec<u8>,
    pub tag: Vec<u8>,
}

impl CipherFrame {
    pub fn encoded_len(&self) -> usize {
        HEADER_LEN + self.nonce.len() + self.ciphertext.len() + self.tag.len()
    }

    /// Serialize to the storage layout
    pub fn encode(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(self.encoded_len());
        out.push(self.algorithm.id());
        // nonce lengths are fixed per algorithm and always fit in a byte
        out.push(self.nonce.len() as u8);
        out.extend_from_slice(&self.nonce);
        out.extend_from_slice(&self.ciphertext);
        out.extend_from_slice(&self.tag);
        out
    }

    /// Parse the storage layout, checking lengths against the algorithm id
    pub fn decode(bytes: &[u8]) -> Result<Self, AuditError> {
        if bytes.len() < HEADER_LEN {
            return Err(AuditError::MalformedFrame(format!(
                "frame is {} bytes, header needs {}",
                bytes.len(),
                HEADER_LEN
            )));
        }

        let algorithm = Algorithm::from_id(bytes[0]).ok_or_else(|| {
            AuditError::MalformedFrame(format!("unknown algorithm id 0x{:02x}", bytes[0]))
        })?;

        let nonce_len = bytes[1] as usize;
        if nonce_len != algorithm.nonce_len() {
            return Err(AuditError::MalformedFrame(format!(
                "{} expects a {}-byte nonce, header says {}",
                algorithm,
                algorithm.nonce_len(),
                nonce_len
            )));
        }

        let body = &bytes[HEADER_LEN..];
        let tag_len = algorithm.tag_len();
        if body.len() < nonce_len + tag_len {
            return Err(AuditError::MalformedFrame(format!(
                "frame truncated: {} body bytes, need at least {}",
                body.len(),
                nonce_len + tag_len
            )));
        }

        let (nonce, rest) = body.split_at(nonce_len);
        let (ciphertext, tag) = rest.split_at(rest.len() - tag_len);

        Ok(Self {
            algorithm,
            nonce: nonce.to_vec(),
            ciphertext: ciphertext.to_vec(),
            tag: tag.to_vec(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn sample() -> CipherFrame {
        CipherFrame {
            algorithm: Algorithm::Aes256Gcm,
            nonce: vec![7; NONCE_LEN],
            ciphertext: b"secret".to_vec(),
            tag: vec![9; TAG_LEN],
        }
    }

    #[test]
    fn test_layout() {
        let bytes = sample().encode();
        assert_eq!(bytes.len(), HEADER_LEN + NONCE_LEN + 6 + TAG_LEN);
        assert_eq!(bytes[0], 0x01);
        assert_eq!(bytes[1], 12);
        assert_eq!(&bytes[2..14], &[7u8; 12]);
        assert_eq!(&bytes[14..20], b"secret");
        assert_eq!(CipherFrame::decode(&bytes).unwrap(), sample());
    }

    #[test]
    fn test_empty_ciphertext_decodes() {
        let mut frame = sample();
        frame.ciphertext.clear();
        assert_eq!(CipherFrame::decode(&frame.encode()).unwrap(), frame);
    }

    #[test]
    fn test_unknown_algorithm() {
        let mut bytes = sample().encode();
        bytes[0] = 0x7f;
        let err = CipherFrame::decode(&bytes).unwrap_err();
        assert!(matches!(err, AuditError::MalformedFrame(msg) if msg.contains("0x7f")));
    }

    #[test]
    fn test_nonce_length_mismatch() {
        let mut bytes = sample().encode();
        bytes[1] = 24;
        assert!(matches!(
            CipherFrame::decode(&bytes),
            Err(AuditError::MalformedFrame(_))
        ));
    }

    #[test]
    fn test_truncated_frames() {
        assert!(CipherFrame::decode(&[]).is_err());
        assert!(CipherFrame::decode(&[0x01]).is_err());
        let bytes = sample().encode();
        assert!(CipherFrame::decode(&bytes[..HEADER_LEN + NONCE_LEN + TAG_LEN - 1]).is_err());
    }

    #[test]
    fn test_algorithm_ids_are_stable() {
        assert_eq!(Algorithm::Aes256Gcm.id(), 0x01);
        assert_eq!(Algorithm::ChaCha20Poly1305.id(), 0x02);
        assert_eq!(Algorithm::from_id(0x02), Some(Algorithm::ChaCha20Poly1305));
        assert_eq!(Algorithm::from_id(0x00), None);
        assert_eq!(Algorithm::DEFAULT, Algorithm::Aes256Gcm);
    }
}
