//! Destination sessions and the process-wide registry.
//!
//! The registry is built once at startup and shared read-only by every task:
//! ```text
//! SessionRegistry
//! ├── clock:  ProcessClock   (epoch + last output timestamp)
//! ├── random: RandomSource   (session ids, keys, jitter)
//! └── destinations[i]: Destination
//!     ├── config  (immutable)
//!     ├── id      (random u16, fixed)
//!     └── keys    (current / previous; written by sender i only)
//! ```

use crate::config::DestinationConfig;
use crate::core::{PingError, PingResult};
use crate::crypto::{KeySlots, RandomSource};
use crate::transport::ProcessClock;

/// One configured destination and its session state.
#[derive(Debug)]
pub struct Destination {
    config: DestinationConfig,
    id: u16,
    keys: KeySlots,
}

impl Destination {
    /// Create a session with no keys installed yet.
    pub fn new(config: DestinationConfig, id: u16) -> Self {
        Self {
            config,
            id,
            keys: KeySlots::new(),
        }
    }

    /// Static configuration.
    pub fn config(&self) -> &DestinationConfig {
        &self.config
    }

    /// Destination host as configured.
    pub fn name(&self) -> &str {
        &self.config.destination
    }

    /// Session id carried in the ICMP identifier field.
    pub fn id(&self) -> u16 {
        self.id
    }

    /// Key slots of this session.
    pub fn keys(&self) -> &KeySlots {
        &self.keys
    }
}

/// All sessions plus the shared clock and random source.
#[derive(Debug)]
pub struct SessionRegistry {
    destinations: Vec<Destination>,
    clock: ProcessClock,
    random: RandomSource,
}

impl SessionRegistry {
    /// Build the registry, taking the process epoch now.
    pub fn build(configs: Vec<DestinationConfig>) -> PingResult<Self> {
        Self::with_parts(configs, ProcessClock::new(), RandomSource::new())
    }

    /// Build the registry around an existing clock and random source.
    ///
    /// Every configuration is validated, then each destination draws its
    /// session id. A failed draw aborts the whole build.
    pub fn with_parts(
        configs: Vec<DestinationConfig>,
        clock: ProcessClock,
        random: RandomSource,
    ) -> PingResult<Self> {
        for config in &configs {
            config.validate()?;
        }

        let destinations = configs
            .into_iter()
            .map(|config| {
                let id = random.random_u16().map_err(|source| PingError::SessionInit {
                    destination: config.destination.clone(),
                    source,
                })?;
                tracing::debug!(destination = %config.destination, id, "session created");
                Ok(Destination::new(config, id))
            })
            .collect::<PingResult<Vec<_>>>()?;

        Ok(Self {
            destinations,
            clock,
            random,
        })
    }

    /// All destinations, in configuration order.
    pub fn destinations(&self) -> &[Destination] {
        &self.destinations
    }

    /// Destination at `index`.
    pub fn destination(&self, index: usize) -> Option<&Destination> {
        self.destinations.get(index)
    }

    /// Number of destinations.
    pub fn len(&self) -> usize {
        self.destinations.len()
    }

    /// Check if there are no destinations.
    pub fn is_empty(&self) -> bool {
        self.destinations.is_empty()
    }

    /// Process clock.
    pub fn clock(&self) -> &ProcessClock {
        &self.clock
    }

    /// Shared random source.
    pub fn random(&self) -> &RandomSource {
        &self.random
    }
}
