//! Protocol constants for authenticated probes.
//!
//! The wire layout is fixed; changing any of these breaks compatibility with
//! replies already in flight from a running prober.

use std::time::Duration;

// =============================================================================
// CRYPTOGRAPHIC CONSTANTS
// =============================================================================

/// Poly1305 authentication tag size.
pub const AEAD_TAG_SIZE: usize = 16;

/// ChaCha20-Poly1305 (IETF) nonce size.
pub const AEAD_NONCE_SIZE: usize = 12;

/// ChaCha20-Poly1305 key size.
pub const AEAD_KEY_SIZE: usize = 32;

/// ChaCha20 keystream block size used by the random source.
pub const KEYSTREAM_BLOCK_SIZE: u64 = 64;

/// Keystream blocks emitted by the random source before it reseeds.
///
/// One short of 2^32: the cipher refuses to produce the block at counter
/// `u32::MAX`.
pub const KEYSTREAM_REKEY_BLOCKS: u64 = (1 << 32) - 1;

/// Raw ChaCha20 key + nonce drawn from the OS when the random source reseeds.
pub const KEYSTREAM_SEED_SIZE: usize = 32 + 12;

// =============================================================================
// PROBE BODY LAYOUT
// =============================================================================

/// Unix seconds carried in the body (bytes 4..12 of the nonce, LE64).
pub const NONCE_TAIL_SIZE: usize = 8;

/// Microsecond-of-second additional authenticated data (LE64).
pub const AAD_SIZE: usize = 8;

/// Send time since the process epoch, first bytes of the plaintext (BE64).
pub const SEND_TIME_SIZE: usize = 8;

/// Smallest echo body that can hold a probe.
pub const MIN_PROBE_SIZE: usize = NONCE_TAIL_SIZE + AAD_SIZE + AEAD_TAG_SIZE + SEND_TIME_SIZE;

/// Largest echo body accepted from configuration.
pub const MAX_PROBE_SIZE: usize = 65528;

/// Default echo body size.
pub const DEFAULT_PROBE_SIZE: u16 = 56;

// =============================================================================
// ICMP (RFC 792 / RFC 4443)
// =============================================================================

/// IP protocol number of ICMP.
pub const IPPROTO_ICMP: i32 = 1;

/// IP protocol number of ICMPv6.
pub const IPPROTO_ICMPV6: i32 = 58;

/// ICMP header size (type, code, checksum, identifier, sequence).
pub const ICMP_HEADER_SIZE: usize = 8;

/// ICMPv4 echo reply.
pub const ICMPV4_ECHO_REPLY: u8 = 0;

/// ICMPv4 echo request.
pub const ICMPV4_ECHO_REQUEST: u8 = 8;

/// ICMPv6 echo request.
pub const ICMPV6_ECHO_REQUEST: u8 = 128;

/// ICMPv6 echo reply.
pub const ICMPV6_ECHO_REPLY: u8 = 129;

/// Receive buffer large enough for any IP datagram.
pub const RECV_BUFFER_SIZE: usize = 65536;

// =============================================================================
// TIMING
// =============================================================================

/// Default interval between probes of one destination.
pub const DEFAULT_INTERVAL: Duration = Duration::from_secs(1);

/// Shortest interval accepted from configuration.
pub const MIN_INTERVAL: Duration = Duration::from_millis(2);
