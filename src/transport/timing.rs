//! Process epoch and strictly increasing output timestamps.
//!
//! All probe times are offsets from one epoch taken at startup. The epoch
//! records both the monotonic clock and the wall clock, so offsets are immune
//! to wall-clock steps while output timestamps can still be expressed in
//! Unix nanoseconds.

use std::sync::atomic::{AtomicI64, Ordering};
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};

/// Wall-clock and epoch-relative readings of one instant.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProbeTime {
    /// Monotonic time since the process epoch.
    pub since_epoch: Duration,
    /// Wall-clock time since the Unix epoch.
    pub unix: Duration,
}

/// An output timestamp issued by [`ProcessClock::next_timestamp`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct OutputTimestamp {
    offset_nanos: i64,
    unix_nanos: i128,
}

impl OutputTimestamp {
    /// Nanoseconds since the process epoch.
    pub fn offset_nanos(&self) -> i64 {
        self.offset_nanos
    }

    /// Nanoseconds since the Unix epoch.
    pub fn unix_nanos(&self) -> i128 {
        self.unix_nanos
    }
}

/// Process-wide clock state.
///
/// `epoch` is fixed at construction. `last` is the offset of the most recent
/// output timestamp and only ever grows.
#[derive(Debug)]
pub struct ProcessClock {
    epoch: Instant,
    epoch_unix_nanos: i128,
    last: AtomicI64,
}

impl Default for ProcessClock {
    fn default() -> Self {
        Self::new()
    }
}

impl ProcessClock {
    /// Take the epoch now.
    pub fn new() -> Self {
        let epoch = Instant::now();
        let unix = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or(Duration::ZERO);
        Self::with_epoch(epoch, unix)
    }

    /// Use a given epoch (monotonic instant + its Unix time).
    pub fn with_epoch(epoch: Instant, unix: Duration) -> Self {
        Self {
            epoch,
            epoch_unix_nanos: unix.as_nanos() as i128,
            last: AtomicI64::new(i64::MIN),
        }
    }

    /// The monotonic instant of the epoch.
    pub fn epoch(&self) -> Instant {
        self.epoch
    }

    /// Offset of `instant` from the epoch in nanoseconds.
    ///
    /// Instants before the epoch give negative offsets.
    pub fn offset_nanos(&self, instant: Instant) -> i64 {
        match instant.checked_duration_since(self.epoch) {
            Some(after) => saturating_nanos(after),
            None => -saturating_nanos(self.epoch.duration_since(instant)),
        }
    }

    /// Read both clocks now.
    pub fn now(&self) -> ProbeTime {
        let unix = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or(Duration::ZERO);
        let since_epoch = Instant::now().saturating_duration_since(self.epoch);
        ProbeTime { since_epoch, unix }
    }

    /// Issue an output timestamp for `candidate`.
    ///
    /// The returned offset is strictly greater than every offset returned
    /// before, by any caller. When `candidate` is not ahead of the last
    /// issued offset it is pushed to `last + 1ns`.
    ///
    /// Lock-free; retries are unbounded, which is fine at the emission rates
    /// involved (one per verified reply).
    pub fn next_timestamp(&self, candidate: Instant) -> OutputTimestamp {
        let mut offset = self.offset_nanos(candidate);
        let mut last = self.last.load(Ordering::Acquire);
        loop {
            if offset <= last {
                offset = last.saturating_add(1);
            }
            match self
                .last
                .compare_exchange_weak(last, offset, Ordering::AcqRel, Ordering::Acquire)
            {
                Ok(_) => break,
                Err(actual) => last = actual,
            }
        }
        OutputTimestamp {
            offset_nanos: offset,
            unix_nanos: self.epoch_unix_nanos + i128::from(offset),
        }
    }
}

fn saturating_nanos(duration: Duration) -> i64 {
    i64::try_from(duration.as_nanos()).unwrap_or(i64::MAX)
}
