//! Receiver loop of one address family.
//!
//! Every echo message seen on the raw socket is tried against every
//! destination's current key, then its previous key. The first key that
//! authenticates the body claims the packet; a packet no key opens is not
//! ours and is dropped.

use std::convert::Infallible;
use std::sync::Arc;
use std::time::{Duration, Instant};

use crate::core::{PingError, PingResult, RECV_BUFFER_SIZE, RecordSink};
use crate::crypto::KeySlot;
use crate::output::MeasurementRecord;
use crate::session::{Destination, SessionRegistry};
use crate::transport::{
    Datagram, EchoMessage, IcmpMessage, IcmpSocket, IpFamily, decode_probe, strip_ipv4_header,
};

/// A reply matched to one of our sessions.
#[derive(Debug)]
pub struct Match<'a> {
    /// Destination whose key authenticated the reply.
    pub destination: &'a Destination,
    /// Slot the key was found in.
    pub slot: KeySlot,
    /// Send time of the probe since the process epoch.
    pub sent: Duration,
}

/// Find the session that sent `echo`.
///
/// Stops at the first (destination, slot) pair that authenticates.
pub fn match_reply<'a>(registry: &'a SessionRegistry, echo: &EchoMessage<'_>) -> Option<Match<'a>> {
    registry.destinations().iter().find_map(|destination| {
        destination.keys().candidates().find_map(|(slot, key)| {
            decode_probe(echo.id, echo.seq, echo.data, &key).map(|sent| Match {
                destination,
                slot,
                sent,
            })
        })
    })
}

/// Receiver of one address family.
pub struct Receiver {
    family: IpFamily,
    registry: Arc<SessionRegistry>,
    sink: Arc<dyn RecordSink>,
}

impl Receiver {
    /// Create a receiver for `family`.
    pub fn new(family: IpFamily, registry: Arc<SessionRegistry>, sink: Arc<dyn RecordSink>) -> Self {
        Self {
            family,
            registry,
            sink,
        }
    }

    /// Read from `socket` until a read fails.
    pub async fn run(self, socket: IcmpSocket) -> PingResult<Infallible> {
        let mut buf = vec![0u8; RECV_BUFFER_SIZE];
        loop {
            let datagram = socket
                .recv(&mut buf)
                .await
                .map_err(|source| PingError::ReceiveFailed {
                    family: self.family,
                    source,
                })?;
            let received_at = Instant::now();
            let len = datagram.len.min(buf.len());
            self.handle(&datagram, &buf[..len], received_at);
        }
    }

    /// Verify one datagram and emit its record. Returns whether it matched.
    ///
    /// `packet` is the datagram as read off the socket: for IPv4 it still
    /// starts with the IP header.
    pub fn handle(&self, datagram: &Datagram, packet: &[u8], received_at: Instant) -> bool {
        match self.verify(datagram, packet, received_at) {
            Some(record) => {
                self.sink.emit(&record);
                true
            }
            None => false,
        }
    }

    /// Verify one datagram and build its record without emitting it.
    pub fn verify(&self, datagram: &Datagram, packet: &[u8], received_at: Instant) -> Option<MeasurementRecord> {
        let message = match self.family {
            IpFamily::V4 => strip_ipv4_header(packet),
            IpFamily::V6 => Ok(packet),
        }
        .and_then(|message| IcmpMessage::parse(self.family, message));

        let echo = match message {
            Ok(IcmpMessage::Echo(echo)) => echo,
            Ok(IcmpMessage::Other(_)) => return None,
            Err(e) => {
                tracing::debug!(family = %self.family, from = %datagram.source, error = %e, "failed to decode ICMP message");
                return None;
            }
        };

        let Some(found) = match_reply(&self.registry, &echo) else {
            tracing::trace!(from = %datagram.source, id = echo.id, seq = echo.seq, "echo did not authenticate");
            return None;
        };

        let clock = self.registry.clock();
        let sent_nanos = i64::try_from(found.sent.as_nanos()).unwrap_or(i64::MAX);
        let rtt_nanos = clock.offset_nanos(received_at).saturating_sub(sent_nanos);
        let timestamp = clock.next_timestamp(received_at);
        let config = found.destination.config();

        if found.slot == KeySlot::Previous {
            tracing::debug!(destination = %config.destination, seq = echo.seq, "reply under previous key");
        }

        Some(MeasurementRecord {
            host_tag: config.host_tag.clone(),
            destination: config.destination.clone(),
            comment: config.comment.clone(),
            size: echo.data.len(),
            reply_from: datagram.source.clone(),
            reply_to: datagram.destination,
            icmp_id: echo.id,
            icmp_seq: u32::from(echo.seq) + 1,
            hop_limit: datagram.hop_limit,
            rtt_nanos,
            timestamp_nanos: timestamp.unix_nanos(),
        })
    }
}
