//! Security layer for authenticated probes.
//!
//! - [`RandomSource`]: ChaCha20 keystream CSPRNG with bounded output per seed
//! - [`ProbeKey`]: ChaCha20-Poly1305 instance of one rotation
//! - [`KeySlots`]: lock-free current/previous key pair shared by sender and receivers
//! - [`SequenceCounter`]: 16-bit sequence whose wrap triggers rotation

mod aead;
mod random;
mod rekey;

pub use aead::{ProbeKey, construct_aad, construct_nonce, reconstruct_nonce};
pub use random::RandomSource;
#[cfg(test)]
pub(crate) use random::switchable_entropy;
pub use rekey::{KeySlot, KeySlots, SequenceCounter, SequenceStep};
