//! Cryptographically secure random source.
//!
//! A ChaCha20 keystream seeded from the operating system. Each key/nonce
//! pair emits at most 2^32 - 1 blocks of 64 bytes; after that the stream is
//! reseeded from fresh OS entropy, so the 32-bit block counter never wraps.

use std::sync::{Mutex, PoisonError};

use chacha20::{
    ChaCha20, Key, Nonce,
    cipher::{KeyIvInit, StreamCipher},
};
use rand::{RngCore, rngs::OsRng};
use zeroize::{Zeroize, Zeroizing};

use crate::core::{
    AEAD_KEY_SIZE, KEYSTREAM_BLOCK_SIZE, KEYSTREAM_REKEY_BLOCKS, KEYSTREAM_SEED_SIZE, RandomError,
};

use super::aead::ProbeKey;

/// Keystream budget of one seed, in bytes.
const KEYSTREAM_BUDGET: u64 = KEYSTREAM_BLOCK_SIZE * KEYSTREAM_REKEY_BLOCKS;

/// Where seeds come from.
type Entropy = Box<dyn Fn(&mut [u8]) -> Result<(), rand::Error> + Send + Sync>;

fn os_entropy(buf: &mut [u8]) -> Result<(), rand::Error> {
    OsRng.try_fill_bytes(buf)
}

struct Keystream {
    cipher: ChaCha20,
    remaining: u64,
}

impl Keystream {
    fn seed(entropy: &Entropy) -> Result<Self, RandomError> {
        let mut seed = Zeroizing::new([0u8; KEYSTREAM_SEED_SIZE]);
        entropy(seed.as_mut())?;
        let cipher = ChaCha20::new(
            Key::from_slice(&seed[..32]),
            Nonce::from_slice(&seed[32..KEYSTREAM_SEED_SIZE]),
        );
        Ok(Self {
            cipher,
            remaining: KEYSTREAM_BUDGET,
        })
    }
}

/// Shared random source.
///
/// All callers are serialized behind one lock, so the keystream bytes handed
/// to concurrent callers never interleave.
pub struct RandomSource {
    stream: Mutex<Option<Keystream>>,
    entropy: Entropy,
}

impl Default for RandomSource {
    fn default() -> Self {
        Self {
            stream: Mutex::new(None),
            entropy: Box::new(os_entropy),
        }
    }
}

impl std::fmt::Debug for RandomSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RandomSource").finish_non_exhaustive()
    }
}

impl RandomSource {
    /// Create a random source. The first call to [`fill`](Self::fill) seeds it.
    pub fn new() -> Self {
        Self::default()
    }

    /// Random source seeded from `entropy` instead of the OS.
    #[cfg(test)]
    pub(crate) fn with_entropy(
        entropy: impl Fn(&mut [u8]) -> Result<(), rand::Error> + Send + Sync + 'static,
    ) -> Self {
        Self {
            stream: Mutex::new(None),
            entropy: Box::new(entropy),
        }
    }

    /// Fill `buf` with uniformly random bytes.
    ///
    /// On error the whole buffer is zeroed; its contents must not be used.
    pub fn fill(&self, buf: &mut [u8]) -> Result<(), RandomError> {
        buf.zeroize();
        let mut guard = self.stream.lock().unwrap_or_else(PoisonError::into_inner);

        let mut filled = 0;
        while filled < buf.len() {
            if guard.as_ref().is_none_or(|stream| stream.remaining == 0) {
                match Keystream::seed(&self.entropy) {
                    Ok(stream) => *guard = Some(stream),
                    Err(e) => {
                        *guard = None;
                        drop(guard);
                        buf.zeroize();
                        return Err(e);
                    }
                }
            }

            if let Some(stream) = guard.as_mut() {
                let step = (buf.len() - filled)
                    .min(usize::try_from(stream.remaining).unwrap_or(usize::MAX));
                let chunk = &mut buf[filled..filled + step];
                if stream.cipher.try_apply_keystream(chunk).is_ok() {
                    stream.remaining -= step as u64;
                    filled += step;
                } else {
                    // Block counter exhausted; nothing was written.
                    stream.remaining = 0;
                }
            }
        }

        Ok(())
    }

    /// Draw a random `u16` (native endian).
    pub fn random_u16(&self) -> Result<u16, RandomError> {
        let mut buf = [0u8; 2];
        self.fill(&mut buf)?;
        Ok(u16::from_ne_bytes(buf))
    }

    /// Draw a random `u32` (native endian).
    pub fn random_u32(&self) -> Result<u32, RandomError> {
        let mut buf = [0u8; 4];
        self.fill(&mut buf)?;
        Ok(u32::from_ne_bytes(buf))
    }

    /// Draw a random `u64` (native endian).
    pub fn random_u64(&self) -> Result<u64, RandomError> {
        let mut buf = [0u8; 8];
        self.fill(&mut buf)?;
        Ok(u64::from_ne_bytes(buf))
    }

    /// Derive a fresh AEAD key from the keystream.
    pub fn derive_aead_key(&self) -> Result<ProbeKey, RandomError> {
        let mut key = Zeroizing::new([0u8; AEAD_KEY_SIZE]);
        self.fill(key.as_mut())?;
        Ok(ProbeKey::from_bytes(&key))
    }

    #[cfg(test)]
    fn remaining(&self) -> Option<u64> {
        self.stream
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .as_ref()
            .map(|stream| stream.remaining)
    }

    #[cfg(test)]
    pub(crate) fn exhaust(&self, leave: u64) {
        if let Some(stream) = self
            .stream
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .as_mut()
        {
            stream.remaining = leave;
        }
    }

    #[cfg(test)]
    fn seek_to_last_block(&self) {
        use chacha20::cipher::StreamCipherSeek;

        if let Some(stream) = self
            .stream
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .as_mut()
        {
            stream.cipher.seek(u64::from(u32::MAX) * KEYSTREAM_BLOCK_SIZE);
        }
    }
}

/// Entropy that fails once `down` is set.
#[cfg(test)]
pub(crate) fn switchable_entropy(
    down: std::sync::Arc<std::sync::atomic::AtomicBool>,
) -> impl Fn(&mut [u8]) -> Result<(), rand::Error> + Send + Sync + 'static {
    move |buf| {
        if down.load(std::sync::atomic::Ordering::SeqCst) {
            Err(rand::Error::new(std::io::Error::other("entropy unavailable")))
        } else {
            os_entropy(buf)
        }
    }
}
