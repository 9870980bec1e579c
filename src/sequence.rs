//! Sequence counters used to coordinate producers and consumers.
//!
//! A [`Sequence`] tracks progress through the ring buffer. The same primitive
//! serves as the publisher cursor, the per-consumer read cursor, and the
//! gating sequences that keep producers from lapping slow consumers.

use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;

use crossbeam_utils::CachePadded;

use crate::INITIAL_CURSOR_VALUE;

/// A monotonic sequence counter padded to its own cache line.
///
/// Producers publish with release stores and consumers observe with acquire
/// loads; that pairing is the synchronizes-with edge that makes ring buffer
/// slot contents visible across threads. Padding keeps a hot consumer cursor
/// from false-sharing with its neighbours.
pub struct Sequence {
    value: CachePadded<AtomicI64>,
}

impl Sequence {
    /// Create a sequence with the given starting value.
    pub fn new(initial_value: i64) -> Self {
        Self {
            value: CachePadded::new(AtomicI64::new(initial_value)),
        }
    }

    /// Create a sequence at the initial cursor value (`-1`).
    pub fn new_with_initial_value() -> Self {
        Self::new(INITIAL_CURSOR_VALUE)
    }

    /// Get the current value (acquire).
    #[inline]
    pub fn get(&self) -> i64 {
        self.value.load(Ordering::Acquire)
    }

    /// Set the value (release).
    #[inline]
    pub fn set(&self, value: i64) {
        self.value.store(value, Ordering::Release);
    }

    /// Atomically add `increment` and return the new value.
    #[inline]
    pub fn add_and_get(&self, increment: i64) -> i64 {
        self.value.fetch_add(increment, Ordering::AcqRel) + increment
    }

    /// Atomically add one and return the new value.
    #[inline]
    pub fn increment_and_get(&self) -> i64 {
        self.add_and_get(1)
    }

    /// Atomically replace `expected` with `new`.
    ///
    /// Returns true if the exchange happened. Release on success, acquire on
    /// failure, so a successful claim publishes the claim to other producers.
    #[inline]
    pub fn compare_and_set(&self, expected: i64, new: i64) -> bool {
        self.value
            .compare_exchange(expected, new, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }
}

impl Default for Sequence {
    fn default() -> Self {
        Self::new_with_initial_value()
    }
}

impl std::fmt::Debug for Sequence {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Sequence").field("value", &self.get()).finish()
    }
}

impl std::fmt::Display for Sequence {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.get())
    }
}

/// Minimum over a set of sequences, or `default` when the set is empty.
///
/// Producers gate on this: an empty gating set means nothing holds the
/// producer back, so the producer's own position is the right floor.
pub fn minimum_sequence(sequences: &[Arc<Sequence>], default: i64) -> i64 {
    sequences
        .iter()
        .map(|seq| seq.get())
        .min()
        .unwrap_or(default)
}
