//! Sequencers: claim/publish coordination over the ring.
//!
//! A sequencer hands out sequence numbers to producers, enforces that no
//! producer laps the slowest gating consumer, and turns claims into
//! publications consumers can observe. Two implementations cover the two
//! producer regimes: [`SingleProducerSequencer`] for one publishing thread,
//! [`MultiProducerSequencer`] for concurrent publishers.

use std::sync::atomic::{AtomicI32, AtomicI64, Ordering};
use std::sync::Arc;
use std::thread;

use parking_lot::RwLock;

use crate::sequence::{minimum_sequence, Sequence};
use crate::sequence_barrier::{PublishedTracker, SequenceBarrier};
use crate::wait_strategy::WaitStrategy;
use crate::{is_power_of_two, BusError, Result};

/// Producer regime for a sequencer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ProducerMode {
    /// Exactly one thread claims and publishes. Non-atomic claim counter,
    /// atomic publish.
    #[default]
    Single,
    /// Any number of threads claim concurrently via CAS, with per-slot
    /// availability tracking to bridge out-of-order publication.
    Multi,
}

impl ProducerMode {
    /// Build a sequencer of this mode.
    ///
    /// # Errors
    /// Returns [`BusError::InvalidCapacity`] unless `buffer_size` is a
    /// positive power of two.
    pub fn create_sequencer(
        self,
        buffer_size: usize,
        wait_strategy: Arc<dyn WaitStrategy>,
    ) -> Result<Arc<dyn Sequencer>> {
        Ok(match self {
            ProducerMode::Single => {
                Arc::new(SingleProducerSequencer::new(buffer_size, wait_strategy)?)
            }
            ProducerMode::Multi => {
                Arc::new(MultiProducerSequencer::new(buffer_size, wait_strategy)?)
            }
        })
    }
}

/// Coordination contract between producers, the cursor, and consumers.
///
/// `claim`/`claim_batch` block until capacity frees up; they never fail
/// permanently. The `try_` variants report [`BusError::InsufficientCapacity`]
/// instead of waiting. Publication is split from claiming so producers can
/// fill the slot in between.
pub trait Sequencer: Send + Sync + std::fmt::Debug {
    /// The publisher cursor.
    fn cursor(&self) -> Arc<Sequence>;

    /// Ring capacity.
    fn buffer_size(&self) -> usize;

    /// Claim the next sequence, waiting for capacity if the ring is full.
    fn claim(&self) -> i64;

    /// Claim `n` consecutive sequences, returning the last.
    fn claim_batch(&self, n: i64) -> i64;

    /// Claim the next sequence without waiting.
    ///
    /// # Errors
    /// Returns [`BusError::InsufficientCapacity`] when the ring is full.
    fn try_claim(&self) -> Result<i64> {
        self.try_claim_batch(1)
    }

    /// Claim `n` consecutive sequences without waiting, returning the last.
    ///
    /// # Errors
    /// Returns [`BusError::InsufficientCapacity`] when fewer than `n` slots
    /// are free.
    fn try_claim_batch(&self, n: i64) -> Result<i64>;

    /// Publish a claimed sequence, making its slot visible to consumers.
    fn publish(&self, sequence: i64);

    /// Publish an inclusive range of claimed sequences.
    fn publish_range(&self, low: i64, high: i64);

    /// Whether `sequence` has been published.
    fn is_available(&self, sequence: i64) -> bool;

    /// Highest sequence in `next_sequence..=available_sequence` with no
    /// unpublished gap before it.
    fn highest_published_sequence(&self, next_sequence: i64, available_sequence: i64) -> i64;

    /// Replace the gating set. Must not be called concurrently with active
    /// claims.
    fn set_gating_sequences(&self, sequences: Vec<Arc<Sequence>>);

    /// Append to the gating set.
    fn add_gating_sequences(&self, sequences: &[Arc<Sequence>]);

    /// Remove one gating sequence by identity. Returns false if absent.
    fn remove_gating_sequence(&self, sequence: &Arc<Sequence>) -> bool;

    /// Minimum of the gating sequences, or the cursor when none are set.
    fn minimum_gating_sequence(&self) -> i64;

    /// Free slots remaining before the producer would overrun the slowest
    /// gating consumer.
    fn remaining_capacity(&self) -> i64;

    /// Build a barrier over `{cursor} ∪ dependents`.
    fn new_barrier(&self, dependents: Vec<Arc<Sequence>>) -> SequenceBarrier;
}

/// Per-slot publication generations for multi-producer mode.
///
/// Slot `s % N` holds the generation `s / N` on which it was last published;
/// sequence `s` is readable iff the stored generation matches. This is what
/// lets barriers find the highest contiguous publication when CAS claims
/// complete out of order.
#[derive(Debug)]
pub(crate) struct AvailabilityBuffer {
    flags: Box<[AtomicI32]>,
    index_mask: usize,
    index_shift: u32,
}

impl AvailabilityBuffer {
    fn new(buffer_size: usize) -> Self {
        let flags: Box<[AtomicI32]> = (0..buffer_size).map(|_| AtomicI32::new(-1)).collect();
        Self {
            flags,
            index_mask: buffer_size - 1,
            index_shift: buffer_size.trailing_zeros(),
        }
    }

    #[inline]
    fn generation(&self, sequence: i64) -> i32 {
        (sequence >> self.index_shift) as i32
    }

    fn set(&self, sequence: i64) {
        let index = (sequence as usize) & self.index_mask;
        self.flags[index].store(self.generation(sequence), Ordering::Release);
    }

    fn is_set(&self, sequence: i64) -> bool {
        let index = (sequence as usize) & self.index_mask;
        self.flags[index].load(Ordering::Acquire) == self.generation(sequence)
    }

    pub(crate) fn highest_published(&self, next_sequence: i64, available_sequence: i64) -> i64 {
        let mut sequence = next_sequence;
        while sequence <= available_sequence {
            if !self.is_set(sequence) {
                return sequence - 1;
            }
            sequence += 1;
        }
        available_sequence
    }
}

/// Sequencer for exactly one publishing thread.
///
/// Claiming is a plain counter bump plus a gating check; the gating minimum
/// is cached so the hot path re-reads consumer sequences only when the ring
/// is close to full. Publication is a single release store on the cursor.
#[derive(Debug)]
pub struct SingleProducerSequencer {
    buffer_size: usize,
    wait_strategy: Arc<dyn WaitStrategy>,
    cursor: Arc<Sequence>,
    gating_sequences: RwLock<Vec<Arc<Sequence>>>,
    /// Last claimed sequence. Only the owning producer thread writes it, so
    /// relaxed ordering suffices.
    claimed: AtomicI64,
    gating_cache: AtomicI64,
}

impl SingleProducerSequencer {
    /// # Errors
    /// Returns [`BusError::InvalidCapacity`] unless `buffer_size` is a
    /// positive power of two.
    pub fn new(buffer_size: usize, wait_strategy: Arc<dyn WaitStrategy>) -> Result<Self> {
        if !is_power_of_two(buffer_size) {
            return Err(BusError::InvalidCapacity(buffer_size));
        }
        Ok(Self {
            buffer_size,
            wait_strategy,
            cursor: Arc::new(Sequence::new_with_initial_value()),
            gating_sequences: RwLock::new(Vec::new()),
            claimed: AtomicI64::new(crate::INITIAL_CURSOR_VALUE),
            gating_cache: AtomicI64::new(crate::INITIAL_CURSOR_VALUE),
        })
    }

    fn minimum_gating_or(&self, default: i64) -> i64 {
        minimum_sequence(&self.gating_sequences.read(), default)
    }
}

impl Sequencer for SingleProducerSequencer {
    fn cursor(&self) -> Arc<Sequence> {
        Arc::clone(&self.cursor)
    }

    fn buffer_size(&self) -> usize {
        self.buffer_size
    }

    fn claim(&self) -> i64 {
        self.claim_batch(1)
    }

    fn claim_batch(&self, n: i64) -> i64 {
        debug_assert!(n > 0 && n <= self.buffer_size as i64);
        let claimed = self.claimed.load(Ordering::Relaxed);
        let next = claimed + n;
        let wrap_point = next - self.buffer_size as i64;

        if wrap_point > self.gating_cache.load(Ordering::Relaxed) {
            loop {
                let minimum = self.minimum_gating_or(claimed);
                self.gating_cache.store(minimum, Ordering::Relaxed);
                if wrap_point <= minimum {
                    break;
                }
                thread::yield_now();
            }
        }

        self.claimed.store(next, Ordering::Relaxed);
        next
    }

    fn try_claim_batch(&self, n: i64) -> Result<i64> {
        debug_assert!(n > 0 && n <= self.buffer_size as i64);
        let claimed = self.claimed.load(Ordering::Relaxed);
        let next = claimed + n;
        let wrap_point = next - self.buffer_size as i64;

        if wrap_point > self.gating_cache.load(Ordering::Relaxed) {
            let minimum = self.minimum_gating_or(claimed);
            self.gating_cache.store(minimum, Ordering::Relaxed);
            if wrap_point > minimum {
                return Err(BusError::InsufficientCapacity);
            }
        }

        self.claimed.store(next, Ordering::Relaxed);
        Ok(next)
    }

    fn publish(&self, sequence: i64) {
        self.cursor.set(sequence);
        self.wait_strategy.signal_all_when_blocking();
    }

    fn publish_range(&self, _low: i64, high: i64) {
        self.publish(high);
    }

    fn is_available(&self, sequence: i64) -> bool {
        sequence <= self.cursor.get()
    }

    fn highest_published_sequence(&self, _next_sequence: i64, available_sequence: i64) -> i64 {
        available_sequence
    }

    fn set_gating_sequences(&self, sequences: Vec<Arc<Sequence>>) {
        *self.gating_sequences.write() = sequences;
    }

    fn add_gating_sequences(&self, sequences: &[Arc<Sequence>]) {
        self.gating_sequences.write().extend_from_slice(sequences);
    }

    fn remove_gating_sequence(&self, sequence: &Arc<Sequence>) -> bool {
        let mut gating = self.gating_sequences.write();
        if let Some(pos) = gating.iter().position(|s| Arc::ptr_eq(s, sequence)) {
            gating.remove(pos);
            true
        } else {
            false
        }
    }

    fn minimum_gating_sequence(&self) -> i64 {
        self.minimum_gating_or(self.cursor.get())
    }

    fn remaining_capacity(&self) -> i64 {
        let produced = self.claimed.load(Ordering::Relaxed);
        let consumed = self.minimum_gating_or(produced);
        self.buffer_size as i64 - (produced - consumed)
    }

    fn new_barrier(&self, dependents: Vec<Arc<Sequence>>) -> SequenceBarrier {
        SequenceBarrier::new(
            Arc::clone(&self.cursor),
            Arc::clone(&self.wait_strategy),
            dependents,
            PublishedTracker::Cursor,
        )
    }
}

/// Sequencer for concurrent publishers.
///
/// The cursor doubles as the claim counter, advanced by CAS, so each
/// sequence is claimed by exactly one producer. Because claims then publish
/// out of order, `publish` records a per-slot generation instead of moving
/// the cursor, and barriers scan those generations for the highest
/// contiguous publication.
#[derive(Debug)]
pub struct MultiProducerSequencer {
    buffer_size: usize,
    wait_strategy: Arc<dyn WaitStrategy>,
    cursor: Arc<Sequence>,
    gating_sequences: RwLock<Vec<Arc<Sequence>>>,
    available: Arc<AvailabilityBuffer>,
    gating_cache: AtomicI64,
}

impl MultiProducerSequencer {
    /// # Errors
    /// Returns [`BusError::InvalidCapacity`] unless `buffer_size` is a
    /// positive power of two.
    pub fn new(buffer_size: usize, wait_strategy: Arc<dyn WaitStrategy>) -> Result<Self> {
        if !is_power_of_two(buffer_size) {
            return Err(BusError::InvalidCapacity(buffer_size));
        }
        Ok(Self {
            buffer_size,
            wait_strategy,
            cursor: Arc::new(Sequence::new_with_initial_value()),
            gating_sequences: RwLock::new(Vec::new()),
            available: Arc::new(AvailabilityBuffer::new(buffer_size)),
            gating_cache: AtomicI64::new(crate::INITIAL_CURSOR_VALUE),
        })
    }

    fn minimum_gating_or(&self, default: i64) -> i64 {
        minimum_sequence(&self.gating_sequences.read(), default)
    }
}

impl Sequencer for MultiProducerSequencer {
    fn cursor(&self) -> Arc<Sequence> {
        Arc::clone(&self.cursor)
    }

    fn buffer_size(&self) -> usize {
        self.buffer_size
    }

    fn claim(&self) -> i64 {
        self.claim_batch(1)
    }

    fn claim_batch(&self, n: i64) -> i64 {
        debug_assert!(n > 0 && n <= self.buffer_size as i64);
        loop {
            let current = self.cursor.get();
            let next = current + n;
            let wrap_point = next - self.buffer_size as i64;

            let cached = self.gating_cache.load(Ordering::Acquire);
            if wrap_point > cached || cached > current {
                let minimum = self.minimum_gating_or(current);
                self.gating_cache.store(minimum, Ordering::Release);
                if wrap_point > minimum {
                    thread::yield_now();
                    continue;
                }
            }

            if self.cursor.compare_and_set(current, next) {
                return next;
            }
        }
    }

    fn try_claim_batch(&self, n: i64) -> Result<i64> {
        debug_assert!(n > 0 && n <= self.buffer_size as i64);
        loop {
            let current = self.cursor.get();
            let next = current + n;
            let wrap_point = next - self.buffer_size as i64;

            let minimum = self.minimum_gating_or(current);
            self.gating_cache.store(minimum, Ordering::Release);
            if wrap_point > minimum {
                return Err(BusError::InsufficientCapacity);
            }

            if self.cursor.compare_and_set(current, next) {
                return Ok(next);
            }
        }
    }

    fn publish(&self, sequence: i64) {
        self.available.set(sequence);
        self.wait_strategy.signal_all_when_blocking();
    }

    fn publish_range(&self, low: i64, high: i64) {
        for sequence in low..=high {
            self.available.set(sequence);
        }
        self.wait_strategy.signal_all_when_blocking();
    }

    fn is_available(&self, sequence: i64) -> bool {
        self.available.is_set(sequence)
    }

    fn highest_published_sequence(&self, next_sequence: i64, available_sequence: i64) -> i64 {
        self.available
            .highest_published(next_sequence, available_sequence)
    }

    fn set_gating_sequences(&self, sequences: Vec<Arc<Sequence>>) {
        *self.gating_sequences.write() = sequences;
    }

    fn add_gating_sequences(&self, sequences: &[Arc<Sequence>]) {
        self.gating_sequences.write().extend_from_slice(sequences);
    }

    fn remove_gating_sequence(&self, sequence: &Arc<Sequence>) -> bool {
        let mut gating = self.gating_sequences.write();
        if let Some(pos) = gating.iter().position(|s| Arc::ptr_eq(s, sequence)) {
            gating.remove(pos);
            true
        } else {
            false
        }
    }

    fn minimum_gating_sequence(&self) -> i64 {
        self.minimum_gating_or(self.cursor.get())
    }

    fn remaining_capacity(&self) -> i64 {
        let produced = self.cursor.get();
        let consumed = self.minimum_gating_or(produced);
        self.buffer_size as i64 - (produced - consumed)
    }

    fn new_barrier(&self, dependents: Vec<Arc<Sequence>>) -> SequenceBarrier {
        SequenceBarrier::new(
            Arc::clone(&self.cursor),
            Arc::clone(&self.wait_strategy),
            dependents,
            PublishedTracker::Slots(Arc::clone(&self.available)),
        )
    }
}
