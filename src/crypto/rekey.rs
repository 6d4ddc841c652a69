//! Per-destination key rotation.
//!
//! Every destination owns two key slots. The sender is the only writer; any
//! receiver task may read them at any time without locking:
//! - `current`: key used for new probes
//! - `previous`: key of the previous rotation, kept for late replies
//!
//! A key covers exactly 65536 probes, one per value of the 16-bit ICMP
//! sequence number. The counter wrapping back to zero is the rotation signal,
//! so no (session id, sequence, second) nonce repeats under one key.

use std::sync::Arc;

use arc_swap::ArcSwapOption;

use super::aead::ProbeKey;

/// Which slot a key was found in.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeySlot {
    /// Key of the running rotation.
    Current,
    /// Key of the rotation before it.
    Previous,
}

/// Two atomically swappable key slots.
#[derive(Debug, Default)]
pub struct KeySlots {
    current: ArcSwapOption<ProbeKey>,
    previous: ArcSwapOption<ProbeKey>,
}

impl KeySlots {
    /// Create empty slots. Nothing validates until the first rotation.
    pub fn new() -> Self {
        Self::default()
    }

    /// Install `key` as the current key, demoting the old current key.
    ///
    /// `previous` is published before `current` is overwritten, so a reader
    /// racing the rotation always finds the outgoing key in one of the slots.
    /// Must only be called by the destination's sender.
    pub fn rotate(&self, key: ProbeKey) -> Arc<ProbeKey> {
        if let Some(outgoing) = self.current.load_full() {
            self.previous.store(Some(outgoing));
        }
        let key = Arc::new(key);
        self.current.store(Some(Arc::clone(&key)));
        key
    }

    /// The key used for new probes, if any rotation happened yet.
    pub fn current(&self) -> Option<Arc<ProbeKey>> {
        self.current.load_full()
    }

    /// The key retained from the previous rotation.
    pub fn previous(&self) -> Option<Arc<ProbeKey>> {
        self.previous.load_full()
    }

    /// Present keys in match order: current, then previous.
    pub fn candidates(&self) -> impl Iterator<Item = (KeySlot, Arc<ProbeKey>)> {
        [
            (KeySlot::Current, self.current()),
            (KeySlot::Previous, self.previous()),
        ]
        .into_iter()
        .filter_map(|(slot, key)| key.map(|key| (slot, key)))
    }
}

/// Next sequence number of one destination.
///
/// Owned by the destination's sender task; wraps silently at 2^16.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SequenceCounter {
    next: u16,
}

/// One step of a [`SequenceCounter`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SequenceStep {
    /// Sequence number to put on the wire.
    pub seq: u16,
    /// A fresh key must be installed before this probe is sealed.
    pub rotate: bool,
}

impl SequenceCounter {
    /// Start at sequence zero, which requests the first key.
    pub fn new() -> Self {
        Self::default()
    }

    /// Take the next sequence number.
    ///
    /// Wrapping to zero is intentional: it starts a new key rotation.
    pub fn advance(&mut self) -> SequenceStep {
        let seq = self.next;
        self.next = self.next.wrapping_add(1);
        SequenceStep {
            seq,
            rotate: seq == 0,
        }
    }

    /// Peek at the next sequence number without consuming it.
    pub fn peek(&self) -> u16 {
        self.next
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::AEAD_KEY_SIZE;

    fn key(byte: u8) -> ProbeKey {
        ProbeKey::from_bytes(&[byte; AEAD_KEY_SIZE])
    }

    #[test]
    fn test_empty_slots() {
        let slots = KeySlots::new();
        assert!(slots.current().is_none());
        assert!(slots.previous().is_none());
        assert_eq!(slots.candidates().count(), 0);
    }

    #[test]
    fn test_first_rotation_leaves_previous_empty() {
        let slots = KeySlots::new();
        slots.rotate(key(1));
        assert!(slots.current().is_some());
        assert!(slots.previous().is_none());

        let order: Vec<_> = slots.candidates().map(|(slot, _)| slot).collect();
        assert_eq!(order, vec![KeySlot::Current]);
    }

    #[test]
    fn test_rotation_demotes_current() {
        let slots = KeySlots::new();
        let first = slots.rotate(key(1));
        let second = slots.rotate(key(2));

        assert!(Arc::ptr_eq(&slots.previous().unwrap(), &first));
        assert!(Arc::ptr_eq(&slots.current().unwrap(), &second));

        let third = slots.rotate(key(3));
        assert!(Arc::ptr_eq(&slots.previous().unwrap(), &second));
        assert!(Arc::ptr_eq(&slots.current().unwrap(), &third));

        let order: Vec<_> = slots.candidates().map(|(slot, _)| slot).collect();
        assert_eq!(order, vec![KeySlot::Current, KeySlot::Previous]);
    }

    #[test]
    fn test_sequence_rotates_on_wrap() {
        let mut counter = SequenceCounter::new();
        let first = counter.advance();
        assert_eq!(first, SequenceStep { seq: 0, rotate: true });

        for expected in 1..=u16::MAX {
            let step = counter.advance();
            assert_eq!(step.seq, expected);
            assert!(!step.rotate);
        }

        assert_eq!(counter.peek(), 0);
        assert_eq!(counter.advance(), SequenceStep { seq: 0, rotate: true });
        assert_eq!(counter.advance(), SequenceStep { seq: 1, rotate: false });
    }
}
