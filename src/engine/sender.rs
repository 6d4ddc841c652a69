//! Per-destination sender loop.
//!
//! ```text
//! Binding ──sockets open──► Probing ──(jitter, then every interval)──► tick
//!    │                                                                 │
//!    └──no socket──► Terminated ◄──────── key rotation failure ────────┘
//! ```
//! Each tick resolves the host, rotates the key when the sequence counter
//! wraps to zero, seals one probe and sends it to the first address that
//! accepts it.

use std::convert::Infallible;
use std::io;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use tokio::time::MissedTickBehavior;

use crate::config::{DestinationConfig, ProtocolPreference};
use crate::core::{PingError, PingResult, RecordSink};
use crate::crypto::{ProbeKey, SequenceCounter};
use crate::session::{Destination, SessionRegistry};
use crate::transport::{EncodedProbe, IcmpSocket, IpFamily, encode_probe};

/// Raw sockets of one destination; at least one is open.
#[derive(Debug)]
pub struct SenderSockets {
    v4: Option<IcmpSocket>,
    v6: Option<IcmpSocket>,
}

impl SenderSockets {
    /// Open the sockets the destination's protocol preference asks for.
    ///
    /// `Auto` succeeds if either family opens; the IPv4 error is reported
    /// when both fail.
    pub fn open(config: &DestinationConfig) -> PingResult<Self> {
        let setup_error = |family, source| PingError::SocketSetup {
            family,
            destination: config.destination.clone(),
            source,
        };

        match config.protocol {
            ProtocolPreference::Auto => {
                let v4 = IcmpSocket::bind(IpFamily::V4, config.source);
                let v6 = IcmpSocket::bind(IpFamily::V6, config.source);
                match (v4, v6) {
                    (Err(e), Err(_)) => Err(setup_error(IpFamily::V4, e)),
                    (v4, v6) => Ok(Self {
                        v4: v4.ok(),
                        v6: v6.ok(),
                    }),
                }
            }
            ProtocolPreference::V4Only => Ok(Self {
                v4: Some(
                    IcmpSocket::bind(IpFamily::V4, config.source)
                        .map_err(|e| setup_error(IpFamily::V4, e))?,
                ),
                v6: None,
            }),
            ProtocolPreference::V6Only => Ok(Self {
                v4: None,
                v6: Some(
                    IcmpSocket::bind(IpFamily::V6, config.source)
                        .map_err(|e| setup_error(IpFamily::V6, e))?,
                ),
            }),
        }
    }

    fn for_addr(&self, addr: &SocketAddr) -> Option<&IcmpSocket> {
        match addr {
            SocketAddr::V4(_) => self.v4.as_ref(),
            SocketAddr::V6(_) => self.v6.as_ref(),
        }
    }
}

/// Sender of one destination.
pub struct Sender {
    registry: Arc<SessionRegistry>,
    index: usize,
    sink: Arc<dyn RecordSink>,
}

impl Sender {
    /// Create the sender of destination `index`, if it exists.
    pub fn new(registry: Arc<SessionRegistry>, index: usize, sink: Arc<dyn RecordSink>) -> Option<Self> {
        (index < registry.len()).then_some(Self {
            registry,
            index,
            sink,
        })
    }

    fn destination(&self) -> &Destination {
        &self.registry.destinations()[self.index]
    }

    /// Run until a socket cannot be opened or key rotation fails.
    pub async fn run(self) -> PingResult<Infallible> {
        let config = self.destination().config();
        let sockets = SenderSockets::open(config)?;

        let delay = self.jitter(config.interval);
        self.sink.announce(&config.destination, config.size, delay);
        tokio::time::sleep(delay).await;

        let mut ticker = tokio::time::interval(config.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
        let mut counter = SequenceCounter::new();

        loop {
            ticker.tick().await;
            self.tick(&sockets, &mut counter).await?;
        }
    }

    /// One probe: resolve, seal, send.
    ///
    /// Resolution and send failures are logged; only key rotation failure
    /// is returned.
    async fn tick(&self, sockets: &SenderSockets, counter: &mut SequenceCounter) -> PingResult<()> {
        let name = self.destination().name();

        let mut addrs: Vec<SocketAddr> = match tokio::net::lookup_host((name, 0)).await {
            Ok(addrs) => addrs.collect(),
            Err(e) => {
                tracing::warn!(destination = %name, error = %e, "failed to lookup");
                return Ok(());
            }
        };
        // IPv6 first; the sort is stable so resolver order is kept otherwise.
        addrs.sort_by_key(SocketAddr::is_ipv4);
        addrs.dedup();

        let probe = self.prepare_probe(counter)?;

        let mut first_error: Option<io::Error> = None;
        for addr in &addrs {
            let Some(socket) = sockets.for_addr(addr) else {
                continue;
            };
            match socket.send_to(probe.message(socket.family()), *addr).await {
                Ok(_) => return Ok(()),
                Err(e) => {
                    first_error.get_or_insert(e);
                }
            }
        }

        match first_error {
            Some(e) => tracing::warn!(destination = %name, error = %e, "failed to ping"),
            None => tracing::warn!(destination = %name, "failed to ping: no available address"),
        }
        Ok(())
    }

    /// Take the next sequence number and seal a probe for it.
    ///
    /// Rotates the key first when the counter is at zero.
    pub fn prepare_probe(&self, counter: &mut SequenceCounter) -> PingResult<EncodedProbe> {
        let destination = self.destination();
        let step = counter.advance();

        let key = match destination.keys().current() {
            Some(key) if !step.rotate => key,
            _ => self.rotate_key()?,
        };

        let sent = self.registry.clock().now();
        let size = usize::from(destination.config().size);
        Ok(encode_probe(destination.id(), step.seq, &key, size, sent)?)
    }

    fn rotate_key(&self) -> PingResult<Arc<ProbeKey>> {
        let destination = self.destination();
        let key = self
            .registry
            .random()
            .derive_aead_key()
            .map_err(|source| PingError::KeyRotation {
                destination: destination.name().to_string(),
                source,
            })?;
        tracing::debug!(destination = %destination.name(), id = destination.id(), "key rotated");
        Ok(destination.keys().rotate(key))
    }

    /// Random start delay in `[0, interval)`; zero if entropy fails.
    fn jitter(&self, interval: Duration) -> Duration {
        let range = u64::try_from(interval.as_nanos()).unwrap_or(u64::MAX).max(1);
        match self.registry.random().random_u64() {
            Ok(r) => Duration::from_nanos(r % range),
            Err(e) => {
                tracing::warn!(destination = %self.destination().name(), error = %e, "no start jitter");
                Duration::ZERO
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicBool, Ordering};

    use super::*;
    use crate::config::DestinationConfig;
    use crate::crypto::{RandomSource, switchable_entropy};
    use crate::output::MeasurementRecord;
    use crate::transport::{IcmpMessage, ProcessClock, decode_probe};

    struct NullSink;

    impl RecordSink for NullSink {
        fn emit(&self, _record: &MeasurementRecord) {}
    }

    fn sender(config: DestinationConfig) -> Sender {
        let registry = Arc::new(SessionRegistry::build(vec![config]).unwrap());
        Sender::new(registry, 0, Arc::new(NullSink)).unwrap()
    }

    #[test]
    fn test_new_checks_index() {
        let registry = Arc::new(SessionRegistry::build(vec![DestinationConfig::new("a")]).unwrap());
        assert!(Sender::new(Arc::clone(&registry), 0, Arc::new(NullSink)).is_some());
        assert!(Sender::new(registry, 1, Arc::new(NullSink)).is_none());
    }

    #[test]
    fn test_first_probe_installs_key() {
        let sender = sender(DestinationConfig::new("a"));
        let mut counter = SequenceCounter::new();
        assert!(sender.destination().keys().current().is_none());

        let probe = sender.prepare_probe(&mut counter).unwrap();
        let keys = sender.destination().keys();
        let key = keys.current().unwrap();
        assert!(keys.previous().is_none());

        match IcmpMessage::parse(IpFamily::V4, &probe.v4).unwrap() {
            IcmpMessage::Echo(echo) => {
                assert_eq!(echo.id, sender.destination().id());
                assert_eq!(echo.seq, 0);
                assert_eq!(echo.data.len(), 56);
                assert!(decode_probe(echo.id, echo.seq, echo.data, &key).is_some());
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn test_key_kept_between_wraps() {
        let sender = sender(DestinationConfig::new("a"));
        let mut counter = SequenceCounter::new();
        sender.prepare_probe(&mut counter).unwrap();
        let first = sender.destination().keys().current().unwrap();
        for _ in 0..10 {
            sender.prepare_probe(&mut counter).unwrap();
        }
        assert!(Arc::ptr_eq(&first, &sender.destination().keys().current().unwrap()));
        assert_eq!(counter.peek(), 11);
    }

    /// Sender whose entropy source fails once `down` is set.
    fn sender_with_entropy(down: &Arc<AtomicBool>) -> Sender {
        let random = RandomSource::with_entropy(switchable_entropy(Arc::clone(down)));
        let registry = Arc::new(
            SessionRegistry::with_parts(vec![DestinationConfig::new("a")], ProcessClock::new(), random)
                .unwrap(),
        );
        Sender::new(registry, 0, Arc::new(NullSink)).unwrap()
    }

    #[test]
    fn test_rotation_without_entropy_fails() {
        let down = Arc::new(AtomicBool::new(false));
        let sender = sender_with_entropy(&down);
        let mut counter = SequenceCounter::new();

        // Force the next draw to reseed, then cut entropy.
        sender.registry.random().exhaust(0);
        down.store(true, Ordering::SeqCst);

        match sender.prepare_probe(&mut counter) {
            Err(error @ PingError::KeyRotation { .. }) => assert!(error.is_fatal()),
            other => panic!("unexpected {other:?}"),
        }
        assert!(sender.destination().keys().current().is_none());
    }

    #[test]
    fn test_jitter_without_entropy_is_zero() {
        let down = Arc::new(AtomicBool::new(false));
        let sender = sender_with_entropy(&down);
        sender.registry.random().exhaust(0);
        down.store(true, Ordering::SeqCst);
        assert_eq!(sender.jitter(Duration::from_secs(1)), Duration::ZERO);
    }

    fn no_sockets() -> SenderSockets {
        SenderSockets { v4: None, v6: None }
    }

    #[tokio::test]
    async fn test_lookup_failure_skips_tick() {
        let sender = sender(DestinationConfig::new("invalid."));
        let mut counter = SequenceCounter::new();
        sender.tick(&no_sockets(), &mut counter).await.unwrap();
        assert_eq!(counter.peek(), 0);
        assert!(sender.destination().keys().current().is_none());
    }

    #[tokio::test]
    async fn test_no_available_address_keeps_going() {
        let sender = sender(DestinationConfig::new("127.0.0.1"));
        let mut counter = SequenceCounter::new();
        let sockets = no_sockets();
        sender.tick(&sockets, &mut counter).await.unwrap();
        assert_eq!(counter.peek(), 1);
        sender.tick(&sockets, &mut counter).await.unwrap();
        assert_eq!(counter.peek(), 2);
    }

    #[test]
    fn test_jitter_within_interval() {
        let mut config = DestinationConfig::new("a");
        config.interval = Duration::from_millis(2);
        let sender = sender(config);
        for _ in 0..100 {
            assert!(sender.jitter(Duration::from_millis(2)) < Duration::from_millis(2));
        }
    }
}
