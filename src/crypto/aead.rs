//! ChaCha20-Poly1305 sealing of probe payloads.
//!
//! Nonces are 12 bytes:
//! ```text
//! [ session id (2, BE) | sequence (2, BE) | unix seconds (8, LE) ]
//! ```
//! The first four bytes travel in the ICMP echo header, the last eight in the
//! echo body. The AAD is the microsecond-of-second of the send time (LE64).

use chacha20poly1305::{
    ChaCha20Poly1305, Key, Nonce, Tag,
    aead::{Aead, AeadInPlace, KeyInit, Payload},
};

use crate::core::{AAD_SIZE, AEAD_KEY_SIZE, AEAD_NONCE_SIZE, AEAD_TAG_SIZE, CodecError};

/// An AEAD instance bound to one session key.
///
/// Only the expanded cipher is kept; the raw key bytes are wiped by the
/// caller once the cipher has been built.
#[derive(Clone)]
pub struct ProbeKey {
    cipher: ChaCha20Poly1305,
}

impl std::fmt::Debug for ProbeKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("ProbeKey(..)")
    }
}

impl ProbeKey {
    /// Build an AEAD instance from raw key bytes.
    pub fn from_bytes(key: &[u8; AEAD_KEY_SIZE]) -> Self {
        Self {
            cipher: ChaCha20Poly1305::new(Key::from_slice(key)),
        }
    }

    /// Encrypt `buffer` in place and return the detached tag.
    pub fn seal_in_place(
        &self,
        nonce: &[u8; AEAD_NONCE_SIZE],
        aad: &[u8],
        buffer: &mut [u8],
    ) -> Result<[u8; AEAD_TAG_SIZE], CodecError> {
        let tag: Tag = self
            .cipher
            .encrypt_in_place_detached(Nonce::from_slice(nonce), aad, buffer)
            .map_err(|_| CodecError::EncryptionFailed)?;
        let mut out = [0u8; AEAD_TAG_SIZE];
        out.copy_from_slice(&tag);
        Ok(out)
    }

    /// Decrypt `ciphertext` (with appended tag).
    ///
    /// Returns `None` when authentication fails: the packet was sealed under
    /// another key, or was altered in flight.
    pub fn open(&self, nonce: &[u8; AEAD_NONCE_SIZE], aad: &[u8], ciphertext: &[u8]) -> Option<Vec<u8>> {
        if ciphertext.len() < AEAD_TAG_SIZE {
            return None;
        }
        self.cipher
            .decrypt(Nonce::from_slice(nonce), Payload { msg: ciphertext, aad })
            .ok()
    }
}

/// Construct the 12-byte probe nonce.
///
/// Layout:
/// ```text
/// [ session_id (2, BE) | seq (2, BE) | unix_secs (8, LE) ]
/// ```
pub fn construct_nonce(session_id: u16, seq: u16, unix_secs: u64) -> [u8; AEAD_NONCE_SIZE] {
    let mut nonce = [0u8; AEAD_NONCE_SIZE];
    nonce[0..2].copy_from_slice(&session_id.to_be_bytes());
    nonce[2..4].copy_from_slice(&seq.to_be_bytes());
    nonce[4..12].copy_from_slice(&unix_secs.to_le_bytes());
    nonce
}

/// Rebuild a nonce from ICMP header fields and the 8-byte tail carried in
/// the echo body.
pub fn reconstruct_nonce(session_id: u16, seq: u16, tail: &[u8; 8]) -> [u8; AEAD_NONCE_SIZE] {
    let mut nonce = [0u8; AEAD_NONCE_SIZE];
    nonce[0..2].copy_from_slice(&session_id.to_be_bytes());
    nonce[2..4].copy_from_slice(&seq.to_be_bytes());
    nonce[4..12].copy_from_slice(tail);
    nonce
}

/// Construct AAD from the microsecond-of-second of the send time.
pub fn construct_aad(subsec_micros: u32) -> [u8; AAD_SIZE] {
    u64::from(subsec_micros).to_le_bytes()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn key(byte: u8) -> ProbeKey {
        ProbeKey::from_bytes(&[byte; AEAD_KEY_SIZE])
    }

    fn seal(key: &ProbeKey, nonce: &[u8; AEAD_NONCE_SIZE], aad: &[u8], plaintext: &[u8]) -> Vec<u8> {
        let mut buffer = plaintext.to_vec();
        let tag = key.seal_in_place(nonce, aad, &mut buffer).unwrap();
        buffer.extend_from_slice(&tag);
        buffer
    }

    #[test]
    fn test_nonce_construction() {
        let nonce = construct_nonce(0x1234, 0xABCD, 1_700_000_000);

        assert_eq!(&nonce[0..2], &[0x12, 0x34]);
        assert_eq!(&nonce[2..4], &[0xAB, 0xCD]);
        assert_eq!(&nonce[4..12], &1_700_000_000u64.to_le_bytes());
    }

    #[test]
    fn test_nonce_reconstruction_matches() {
        let nonce = construct_nonce(7, 65535, 42);
        let tail: [u8; 8] = nonce[4..12].try_into().unwrap();
        assert_eq!(reconstruct_nonce(7, 65535, &tail), nonce);
    }

    #[test]
    fn test_aad_construction() {
        let aad = construct_aad(999_999);
        assert_eq!(aad, hex::decode("3f420f0000000000").unwrap().as_slice());
    }

    #[test]
    fn test_seal_open_roundtrip() {
        let k = key(0x42);
        let nonce = construct_nonce(1, 2, 3);
        let ciphertext = seal(&k, &nonce, b"aad", b"Hello, probe!");
        assert_eq!(ciphertext.len(), 13 + AEAD_TAG_SIZE);

        assert_eq!(k.open(&nonce, b"aad", &ciphertext).unwrap(), b"Hello, probe!");
    }

    #[test]
    fn test_open_wrong_key_fails() {
        let nonce = construct_nonce(1, 2, 3);
        let ciphertext = seal(&key(0x42), &nonce, b"aad", b"secret");
        assert!(key(0x43).open(&nonce, b"aad", &ciphertext).is_none());
    }

    #[test]
    fn test_open_wrong_nonce_fails() {
        let k = key(0x42);
        let ciphertext = seal(&k, &construct_nonce(1, 2, 3), b"aad", b"secret");
        assert!(k.open(&construct_nonce(1, 3, 3), b"aad", &ciphertext).is_none());
    }

    #[test]
    fn test_open_wrong_aad_fails() {
        let k = key(0x42);
        let nonce = construct_nonce(1, 2, 3);
        let ciphertext = seal(&k, &nonce, &construct_aad(1), b"secret");
        assert!(k.open(&nonce, &construct_aad(2), &ciphertext).is_none());
    }

    #[test]
    fn test_open_short_input_fails() {
        assert!(key(0x42).open(&construct_nonce(0, 0, 0), b"", &[0u8; 15]).is_none());
    }
}
