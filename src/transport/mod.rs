//! Transport layer: ICMP framing, the probe codec, raw sockets and timing.
//!
//! ```text
//! ┌─────────────────────────────────────────┐
//! │       Engine (sender / receivers)       │
//! ├─────────────────────────────────────────┤
//! │  probe: sealed echo bodies              │  ← ProbeKey from crypto
//! ├─────────────────────────────────────────┤
//! │  frame: echo header, checksum, parse    │
//! ├─────────────────────────────────────────┤
//! │  socket: raw ICMP / ICMPv6 + metadata   │
//! └─────────────────────────────────────────┘
//! ```
//!
//! `timing` holds the process epoch every send time and output timestamp is
//! measured from.

mod frame;
mod probe;
#[allow(unsafe_code)]
mod socket;
mod timing;

pub use frame::{
    EchoMessage, IcmpMessage, IpFamily, build_echo_request, calculate_checksum, strip_ipv4_header,
};
pub use probe::{EncodedProbe, decode_probe, encode_probe, seal_body};
pub use socket::{Datagram, IcmpSocket, PeerAddr};
pub use timing::{OutputTimestamp, ProbeTime, ProcessClock};
