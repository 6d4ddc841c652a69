//! # authping
//!
//! Continuous ICMP echo probing where every reply must prove it answers one
//! of this process's own probes.
//!
//! Each probe body is sealed with ChaCha20-Poly1305 under a per-destination
//! key that rotates every 65536 probes. The session id and sequence number
//! in the ICMP header are bound into the nonce, so spoofed, foreign or
//! altered replies never authenticate and never reach the output. Every
//! verified reply becomes one InfluxDB line protocol record with a unique,
//! strictly increasing timestamp.
//!
//! ## Modules
//!
//! - [`core`]: constants, error types and the [`RecordSink`](core::RecordSink) trait
//! - [`crypto`]: random source, probe keys and key rotation
//! - [`transport`]: ICMP framing, the probe codec, raw sockets and the process clock
//! - [`session`]: destinations and the shared registry
//! - [`engine`]: sender and receiver loops and their supervisor
//! - [`output`]: measurement records and line protocol encoding
//! - [`config`]: destination configuration and command line parsing
//!
//! ## Example Usage
//!
//! ```no_run
//! use std::sync::Arc;
//!
//! use authping::prelude::*;
//!
//! # async fn example() -> PingResult<()> {
//! let registry = Arc::new(SessionRegistry::build(vec![DestinationConfig::new("example.com")])?);
//! // Only returns on failure.
//! let error = match authping::engine::run(registry, Arc::new(StdoutSink)).await {
//!     Ok(never) => match never {},
//!     Err(error) => error,
//! };
//! eprintln!("{error}");
//! # Ok(())
//! # }
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

#[cfg(not(target_os = "linux"))]
compile_error!("authping needs Linux raw sockets with IP_PKTINFO / IPV6_RECVPKTINFO support");

pub mod config;
pub mod core;
pub mod crypto;
pub mod engine;
pub mod output;
pub mod session;
pub mod transport;

/// Prelude module for convenient imports.
pub mod prelude {
    pub use crate::config::{Args, DestinationConfig, Invocation, ProtocolPreference};
    pub use crate::core::*;
    pub use crate::crypto::{KeySlot, KeySlots, ProbeKey, RandomSource, SequenceCounter};
    pub use crate::output::{MeasurementRecord, StdoutSink};
    pub use crate::session::{Destination, SessionRegistry};
    pub use crate::transport::{IpFamily, PeerAddr, ProcessClock};
}

pub use crate::core::{PingError, PingResult, RecordSink};
pub use output::MeasurementRecord;
pub use session::SessionRegistry;
