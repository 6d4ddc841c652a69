//! Authenticated probe codec.
//!
//! Echo body layout (total length = configured probe size):
//! ```text
//! +----------------+----------------+--------------------------+---------+
//! | unix secs      | AAD            | ciphertext               | tag     |
//! | 8 bytes (LE64) | 8 bytes (LE64) | size - 32 bytes          | 16 bytes|
//! +----------------+----------------+--------------------------+---------+
//! ```
//! The plaintext is the send time since the process epoch in nanoseconds
//! (BE64) followed by zero padding. The session id and sequence number are
//! not repeated in the body: the receiver takes them from the ICMP header
//! and they enter the nonce, so a reply with altered header fields cannot
//! authenticate.

use std::time::Duration;

use crate::core::{
    AAD_SIZE, AEAD_TAG_SIZE, CodecError, MAX_PROBE_SIZE, MIN_PROBE_SIZE, NONCE_TAIL_SIZE,
    SEND_TIME_SIZE,
};
use crate::crypto::{ProbeKey, construct_aad, construct_nonce, reconstruct_nonce};

use super::frame::{IpFamily, build_echo_request};
use super::timing::ProbeTime;

/// Offset of the ciphertext within the echo body.
const CIPHERTEXT_OFFSET: usize = NONCE_TAIL_SIZE + AAD_SIZE;

/// A probe encoded for both address families.
///
/// Both messages carry the same echo body; only the ICMP type and checksum
/// differ.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EncodedProbe {
    /// Sealed echo body.
    pub body: Vec<u8>,
    /// Complete ICMPv4 echo request.
    pub v4: Vec<u8>,
    /// Complete ICMPv6 echo request (checksum filled by the kernel).
    pub v6: Vec<u8>,
}

impl EncodedProbe {
    /// The message to send over a socket of `family`.
    pub fn message(&self, family: IpFamily) -> &[u8] {
        match family {
            IpFamily::V4 => &self.v4,
            IpFamily::V6 => &self.v6,
        }
    }
}

/// Seal an echo body of `size` bytes.
pub fn seal_body(
    session_id: u16,
    seq: u16,
    key: &ProbeKey,
    size: usize,
    sent: ProbeTime,
) -> Result<Vec<u8>, CodecError> {
    if !(MIN_PROBE_SIZE..=MAX_PROBE_SIZE).contains(&size) {
        return Err(CodecError::InvalidPacketSize {
            size,
            min: MIN_PROBE_SIZE,
            max: MAX_PROBE_SIZE,
        });
    }

    let nonce = construct_nonce(session_id, seq, sent.unix.as_secs());
    let aad = construct_aad(sent.unix.subsec_micros());
    let send_nanos = u64::try_from(sent.since_epoch.as_nanos()).unwrap_or(u64::MAX);

    let mut body = vec![0u8; size];
    body[..NONCE_TAIL_SIZE].copy_from_slice(&nonce[4..]);
    body[NONCE_TAIL_SIZE..CIPHERTEXT_OFFSET].copy_from_slice(&aad);

    let tag_offset = size - AEAD_TAG_SIZE;
    let plaintext = &mut body[CIPHERTEXT_OFFSET..tag_offset];
    plaintext[..SEND_TIME_SIZE].copy_from_slice(&send_nanos.to_be_bytes());
    let tag = key.seal_in_place(&nonce, &aad, plaintext)?;
    body[tag_offset..].copy_from_slice(&tag);

    Ok(body)
}

/// Encode a probe as ICMPv4 and ICMPv6 echo requests.
pub fn encode_probe(
    session_id: u16,
    seq: u16,
    key: &ProbeKey,
    size: usize,
    sent: ProbeTime,
) -> Result<EncodedProbe, CodecError> {
    let body = seal_body(session_id, seq, key, size, sent)?;
    Ok(EncodedProbe {
        v4: build_echo_request(IpFamily::V4, session_id, seq, &body),
        v6: build_echo_request(IpFamily::V6, session_id, seq, &body),
        body,
    })
}

/// Try to open an echo body with `key`.
///
/// `session_id` and `seq` come from the ICMP header of the received message.
/// Returns the send time since the process epoch, or `None` if the body is
/// too short or does not authenticate under `key`.
pub fn decode_probe(session_id: u16, seq: u16, body: &[u8], key: &ProbeKey) -> Option<Duration> {
    if body.len() < MIN_PROBE_SIZE {
        return None;
    }

    let mut tail = [0u8; NONCE_TAIL_SIZE];
    tail.copy_from_slice(&body[..NONCE_TAIL_SIZE]);
    let nonce = reconstruct_nonce(session_id, seq, &tail);
    let aad = &body[NONCE_TAIL_SIZE..CIPHERTEXT_OFFSET];
    let ciphertext = &body[CIPHERTEXT_OFFSET..];

    let payload = key.open(&nonce, aad, ciphertext)?;
    let mut send_nanos = [0u8; SEND_TIME_SIZE];
    send_nanos.copy_from_slice(payload.get(..SEND_TIME_SIZE)?);
    Some(Duration::from_nanos(u64::from_be_bytes(send_nanos)))
}
