//! Authorization blob encryption (AES-256-GCM).
//!
//! A sealed blob is a format marker byte, the 12 byte nonce, then the
//! ciphertext with its tag. `"{workspace_id}:{vendor}"` is authenticated
//! alongside it, so a blob moved to a different row no longer opens.

#![allow(deprecated)]

use aes_gcm::{
    Aes256Gcm, Key, Nonce,
    aead::{Aead, AeadCore, KeyInit, OsRng, Payload},
};
use thiserror::Error;
use zeroize::{Zeroize, ZeroizeOnDrop};

const SEALED_MARKER: u8 = 0x01;
const NONCE_LEN: usize = 12;
const HEADER_LEN: usize = 1 + NONCE_LEN;
const SEALED_MIN_LEN: usize = HEADER_LEN + 16;

#[derive(Debug, Error)]
pub enum CryptoError {
    #[error("crypto key must be 32 bytes, got {0}")]
    KeyLength(usize),
    #[error("sealing failed")]
    Seal,
    #[error("blob is truncated")]
    Truncated,
    #[error("blob failed authentication")]
    Tampered,
}

/// AES-256 key. The bytes are wiped when the last clone drops.
#[derive(Clone, Zeroize, ZeroizeOnDrop)]
pub struct CryptoKey(Vec<u8>);

impl CryptoKey {
    pub fn new(bytes: Vec<u8>) -> Result<Self, CryptoError> {
        match bytes.len() {
            32 => Ok(Self(bytes)),
            len => Err(CryptoError::KeyLength(len)),
        }
    }

    fn cipher(&self) -> Aes256Gcm {
        Aes256Gcm::new(Key::<Aes256Gcm>::from_slice(&self.0))
    }

    fn seal(&self, aad: &[u8], data: &[u8]) -> Result<Vec<u8>, CryptoError> {
        let nonce = Aes256Gcm::generate_nonce(&mut OsRng);
        let body = self
            .cipher()
            .encrypt(&nonce, Payload { msg: data, aad })
            .map_err(|_| CryptoError::Seal)?;

        let mut out = Vec::with_capacity(HEADER_LEN + body.len());
        out.push(SEALED_MARKER);
        out.extend_from_slice(nonce.as_slice());
        out.extend(body);
        Ok(out)
    }

    fn open(&self, aad: &[u8], blob: &[u8]) -> Result<Vec<u8>, CryptoError> {
        match blob.first() {
            Some(&SEALED_MARKER) => {}
            // Rows stored before encryption hold the raw JSON blob.
            _ => return Ok(blob.to_vec()),
        }
        if blob.len() < SEALED_MIN_LEN {
            return Err(CryptoError::Truncated);
        }
        let (header, body) = blob.split_at(HEADER_LEN);
        self.cipher()
            .decrypt(Nonce::from_slice(&header[1..]), Payload { msg: body, aad })
            .map_err(|_| CryptoError::Tampered)
    }
}

impl std::fmt::Debug for CryptoKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("CryptoKey(..)")
    }
}

fn row_binding(workspace_id: i64, vendor: &str) -> Vec<u8> {
    format!("{workspace_id}:{vendor}").into_bytes()
}

/// True when the blob carries the sealed format marker.
pub fn is_encrypted_payload(blob: &[u8]) -> bool {
    blob.len() >= SEALED_MIN_LEN && blob[0] == SEALED_MARKER
}

pub fn seal_authorization(
    key: &CryptoKey,
    workspace_id: i64,
    vendor: &str,
    data: &[u8],
) -> Result<Vec<u8>, CryptoError> {
    key.seal(&row_binding(workspace_id, vendor), data)
}

/// Opens a stored blob. Unsealed legacy rows come back as they are.
pub fn open_authorization(
    key: &CryptoKey,
    workspace_id: i64,
    vendor: &str,
    blob: &[u8],
) -> Result<Vec<u8>, CryptoError> {
    key.open(&row_binding(workspace_id, vendor), blob)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn key() -> CryptoKey {
        CryptoKey::new(vec![42u8; 32]).unwrap()
    }

    #[test]
    fn key_must_be_256_bits() {
        assert!(matches!(
            CryptoKey::new(vec![1u8; 16]),
            Err(CryptoError::KeyLength(16))
        ));
    }

    #[test]
    fn blob_opens_only_for_its_own_row() {
        let blob = br#"{"access_token":"abc"}"#;
        let sealed = seal_authorization(&key(), 7, "asana", blob).unwrap();

        assert!(is_encrypted_payload(&sealed));
        assert!(!sealed.windows(blob.len()).any(|w| w == blob));
        assert_eq!(open_authorization(&key(), 7, "asana", &sealed).unwrap(), blob);
        assert!(matches!(
            open_authorization(&key(), 8, "asana", &sealed),
            Err(CryptoError::Tampered)
        ));
        assert!(open_authorization(&key(), 7, "github", &sealed).is_err());
    }

    #[test]
    fn legacy_plaintext_is_returned_unchanged() {
        let legacy = br#"{"token":"t","secret":"s"}"#;
        assert!(!is_encrypted_payload(legacy));
        assert_eq!(open_authorization(&key(), 1, "basecamp", legacy).unwrap(), legacy);
    }

    #[test]
    fn short_sealed_blob_is_truncated() {
        assert!(matches!(
            open_authorization(&key(), 1, "asana", &[SEALED_MARKER, 0, 1, 2]),
            Err(CryptoError::Truncated)
        ));
    }

    #[test]
    fn key_bytes_never_print() {
        assert_eq!(format!("{:?}", key()), "CryptoKey(..)");
    }
}
