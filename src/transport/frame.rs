//! ICMP and ICMPv6 echo framing.
//!
//! Wire format of an echo message (RFC 792 / RFC 4443):
//! ```text
//! +--------+--------+-----------------+
//! | Type   | Code   | Checksum        |
//! +--------+--------+-----------------+
//! | Identifier      | Sequence        |
//! +-----------------+-----------------+
//! | Data ...                          |
//! +-----------------------------------+
//! ```

use std::fmt;

use crate::core::{
    FrameError, ICMP_HEADER_SIZE, ICMPV4_ECHO_REPLY, ICMPV4_ECHO_REQUEST, ICMPV6_ECHO_REPLY,
    ICMPV6_ECHO_REQUEST, IPPROTO_ICMP, IPPROTO_ICMPV6,
};

/// Minimum IPv4 header size.
const IPV4_MIN_HEADER_SIZE: usize = 20;

/// IP version of a socket or message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum IpFamily {
    /// IPv4 / ICMP.
    V4,
    /// IPv6 / ICMPv6.
    V6,
}

impl IpFamily {
    /// IP protocol number of the matching ICMP flavor.
    pub fn icmp_protocol(self) -> i32 {
        match self {
            IpFamily::V4 => IPPROTO_ICMP,
            IpFamily::V6 => IPPROTO_ICMPV6,
        }
    }

    /// ICMP type of an echo request.
    pub fn echo_request_type(self) -> u8 {
        match self {
            IpFamily::V4 => ICMPV4_ECHO_REQUEST,
            IpFamily::V6 => ICMPV6_ECHO_REQUEST,
        }
    }

    /// Check if `icmp_type` is an echo request or reply of this family.
    pub fn is_echo(self, icmp_type: u8) -> bool {
        match self {
            IpFamily::V4 => matches!(icmp_type, ICMPV4_ECHO_REQUEST | ICMPV4_ECHO_REPLY),
            IpFamily::V6 => matches!(icmp_type, ICMPV6_ECHO_REQUEST | ICMPV6_ECHO_REPLY),
        }
    }
}

impl fmt::Display for IpFamily {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            IpFamily::V4 => f.write_str("IPv4"),
            IpFamily::V6 => f.write_str("IPv6"),
        }
    }
}

/// A parsed echo request or reply.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EchoMessage<'a> {
    /// ICMP type (request or reply).
    pub icmp_type: u8,
    /// Echo identifier.
    pub id: u16,
    /// Echo sequence number.
    pub seq: u16,
    /// Echo data.
    pub data: &'a [u8],
}

/// A parsed ICMP message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IcmpMessage<'a> {
    /// Echo request or reply.
    Echo(EchoMessage<'a>),
    /// Any other message type; carries the type byte.
    Other(u8),
}

impl<'a> IcmpMessage<'a> {
    /// Parse an ICMP message of `family` (no IP header).
    pub fn parse(family: IpFamily, bytes: &'a [u8]) -> Result<Self, FrameError> {
        // Type, code and checksum are needed for every message.
        if bytes.len() < 4 {
            return Err(FrameError::Truncated {
                expected: 4,
                actual: bytes.len(),
            });
        }

        let icmp_type = bytes[0];
        if !family.is_echo(icmp_type) {
            return Ok(IcmpMessage::Other(icmp_type));
        }

        if bytes.len() < ICMP_HEADER_SIZE {
            return Err(FrameError::Truncated {
                expected: ICMP_HEADER_SIZE,
                actual: bytes.len(),
            });
        }

        Ok(IcmpMessage::Echo(EchoMessage {
            icmp_type,
            id: u16::from_be_bytes([bytes[4], bytes[5]]),
            seq: u16::from_be_bytes([bytes[6], bytes[7]]),
            data: &bytes[ICMP_HEADER_SIZE..],
        }))
    }
}

/// Build an echo request of `family` carrying `data`.
///
/// ICMPv4 messages get their checksum here; for ICMPv6 the checksum covers a
/// pseudo-header only the kernel knows, so it is left zero for the kernel to
/// fill in.
pub fn build_echo_request(family: IpFamily, id: u16, seq: u16, data: &[u8]) -> Vec<u8> {
    let mut message = Vec::with_capacity(ICMP_HEADER_SIZE + data.len());
    message.push(family.echo_request_type());
    message.push(0);
    message.extend_from_slice(&[0, 0]);
    message.extend_from_slice(&id.to_be_bytes());
    message.extend_from_slice(&seq.to_be_bytes());
    message.extend_from_slice(data);

    if family == IpFamily::V4 {
        let checksum = calculate_checksum(&message);
        message[2..4].copy_from_slice(&checksum.to_be_bytes());
    }

    message
}

/// Strip the IPv4 header from a datagram read off a raw IPv4 socket.
pub fn strip_ipv4_header(datagram: &[u8]) -> Result<&[u8], FrameError> {
    if datagram.len() < IPV4_MIN_HEADER_SIZE {
        return Err(FrameError::Truncated {
            expected: IPV4_MIN_HEADER_SIZE,
            actual: datagram.len(),
        });
    }
    if datagram[0] >> 4 != 4 {
        return Err(FrameError::MalformedIpHeader);
    }
    let header_len = usize::from(datagram[0] & 0x0F) * 4;
    if header_len < IPV4_MIN_HEADER_SIZE {
        return Err(FrameError::MalformedIpHeader);
    }
    if datagram.len() < header_len {
        return Err(FrameError::Truncated {
            expected: header_len,
            actual: datagram.len(),
        });
    }
    Ok(&datagram[header_len..])
}

/// Internet checksum (RFC 1071).
pub fn calculate_checksum(data: &[u8]) -> u16 {
    let mut sum: u32 = 0;
    let mut chunks = data.chunks_exact(2);
    for word in &mut chunks {
        sum = sum.wrapping_add(u32::from(u16::from_be_bytes([word[0], word[1]])));
    }
    // Odd trailing byte is padded with zero.
    if let [last] = chunks.remainder() {
        sum = sum.wrapping_add(u32::from(*last) << 8);
    }
    while sum >> 16 != 0 {
        sum = (sum & 0xFFFF) + (sum >> 16);
    }
    !(sum as u16)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_checksum_zeros() {
        assert_eq!(calculate_checksum(&[0u8; 20]), 0xFFFF);
    }

    #[test]
    fn test_checksum_odd_length() {
        assert_eq!(calculate_checksum(&[0x01]), !0x0100);
    }

    #[test]
    fn test_v4_request_checksum_verifies() {
        let message = build_echo_request(IpFamily::V4, 0x1234, 7, b"abcdefgh");
        assert_eq!(message[0], ICMPV4_ECHO_REQUEST);
        assert_eq!(calculate_checksum(&message), 0);
    }

    #[test]
    fn test_v6_request_leaves_checksum_to_kernel() {
        let message = build_echo_request(IpFamily::V6, 0x1234, 7, b"abcdefgh");
        assert_eq!(message[0], ICMPV6_ECHO_REQUEST);
        assert_eq!(&message[2..4], &[0, 0]);
    }

    #[test]
    fn test_parse_echo() {
        let message = build_echo_request(IpFamily::V4, 0xBEEF, 0x0102, b"payload");
        let parsed = IcmpMessage::parse(IpFamily::V4, &message).unwrap();
        assert_eq!(
            parsed,
            IcmpMessage::Echo(EchoMessage {
                icmp_type: ICMPV4_ECHO_REQUEST,
                id: 0xBEEF,
                seq: 0x0102,
                data: b"payload",
            })
        );
    }

    #[test]
    fn test_parse_v6_reply() {
        let mut message = build_echo_request(IpFamily::V6, 1, 2, b"");
        message[0] = ICMPV6_ECHO_REPLY;
        match IcmpMessage::parse(IpFamily::V6, &message).unwrap() {
            IcmpMessage::Echo(echo) => {
                assert_eq!((echo.id, echo.seq), (1, 2));
                assert!(echo.data.is_empty());
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn test_parse_other_and_truncated() {
        // Destination unreachable.
        assert_eq!(
            IcmpMessage::parse(IpFamily::V4, &[3, 1, 0, 0]).unwrap(),
            IcmpMessage::Other(3)
        );
        // ICMPv4 echo request type means nothing to ICMPv6.
        assert_eq!(
            IcmpMessage::parse(IpFamily::V6, &[8, 0, 0, 0, 0, 0, 0, 0]).unwrap(),
            IcmpMessage::Other(8)
        );
        assert_eq!(
            IcmpMessage::parse(IpFamily::V4, &[0, 0]),
            Err(FrameError::Truncated { expected: 4, actual: 2 })
        );
        assert_eq!(
            IcmpMessage::parse(IpFamily::V4, &[0, 0, 0, 0, 0, 1]),
            Err(FrameError::Truncated { expected: 8, actual: 6 })
        );
    }

    #[test]
    fn test_strip_ipv4_header() {
        let mut datagram = vec![0x45, 0, 0, 28, 0, 0, 0x40, 0, 64, 1, 0, 0, 127, 0, 0, 1, 127, 0, 0, 1];
        datagram.extend_from_slice(&[0, 0, 0xff, 0xff, 0, 1, 0, 1]);
        assert_eq!(strip_ipv4_header(&datagram).unwrap(), &[0, 0, 0xff, 0xff, 0, 1, 0, 1]);

        // Options push the payload further.
        let mut with_options = datagram.clone();
        with_options[0] = 0x46;
        with_options.splice(20..20, [1, 1, 1, 0]);
        assert_eq!(strip_ipv4_header(&with_options).unwrap().len(), 8);

        datagram[0] = 0x65;
        assert_eq!(strip_ipv4_header(&datagram), Err(FrameError::MalformedIpHeader));
        assert!(strip_ipv4_header(&datagram[..10]).is_err());
    }
}
