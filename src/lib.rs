//! `ringbus`: a disruptor-style in-process message bus.
//!
//! A pre-allocated power-of-two ring buffer with sequence-number
//! coordination for low-latency inter-thread hand-off: no allocation on
//! publish, no locks on the hot path, no signal-based wake-ups unless you
//! opt into a blocking wait strategy.
//!
//! ## Layers
//!
//! - [`Sequence`]: cache-line-padded monotonic counter, the universal
//!   synchronization primitive.
//! - [`Sequencer`] ([`SingleProducerSequencer`] / [`MultiProducerSequencer`],
//!   selected via [`ProducerMode`]): claims sequence slots, gates producers
//!   on the slowest consumer, publishes slots to readers.
//! - [`WaitStrategy`] + [`SequenceBarrier`]: how consumers wait (busy-spin,
//!   yielding, sleeping, blocking, or timed).
//! - [`RingBuffer`]: the fixed storage itself.
//! - The distribution tree in [`distributor`]: [`Handler`] leaves fanned out
//!   through [`SingleDistributor`] / [`SequentialDistributor`] /
//!   [`ParallelDistributor`] / [`CompositeDistributor`], with [`Connector`]
//!   letting a subtree pose as a single handler.
//!
//! ## Quick start
//!
//! ```
//! use ringbus::{Distributor, ParallelDistributor, DEFAULT_STOP};
//! use std::sync::atomic::{AtomicU64, Ordering};
//! use std::sync::Arc;
//!
//! # fn main() -> ringbus::Result<()> {
//! let sum = Arc::new(AtomicU64::new(0));
//! let acc = Arc::clone(&sum);
//!
//! let mut fanout = ParallelDistributor::<u64>::new(64)?;
//! fanout.add_handler(Box::new(move |msg: &u64| {
//!     acc.fetch_add(*msg, Ordering::Relaxed);
//! }))?;
//! fanout.start()?;
//!
//! for n in 1..=100 {
//!     fanout.distribute(&n);
//! }
//! fanout.signal(DEFAULT_STOP);
//! fanout.join();
//!
//! assert_eq!(sum.load(Ordering::Relaxed), 5050);
//! # Ok(())
//! # }
//! ```
//!
//! ## Raw producer/consumer protocol
//!
//! The distribution tree is a convenience; the core protocol is usable
//! directly. Producers `claim` a slot, write it, then `publish`. Consumers
//! hold their own [`Sequence`], register it as a gating sequence on the
//! sequencer, and loop `wait_for(own + 1)` → read slots → advance. One wait
//! can unblock a whole batch.

pub mod distributor;
pub mod ring_buffer;
pub mod sequence;
pub mod sequence_barrier;
pub mod sequencer;
pub mod thread_management;
pub mod wait_strategy;


pub use distributor::{
    CompositeDistributor, Connector, Distributor, Handler, HandlerId, ParallelDistributor,
    SequentialDistributor, SingleDistributor, StopCheckFn, DEFAULT_STOP, STOP_IMMEDIATELY,
};
pub use ring_buffer::RingBuffer;
pub use sequence::Sequence;
pub use sequence_barrier::SequenceBarrier;
pub use sequencer::{MultiProducerSequencer, ProducerMode, Sequencer, SingleProducerSequencer};
pub use thread_management::{available_cores, ManagedThread, ThreadBuilder};
pub use wait_strategy::{
    BlockingWaitStrategy, BusySpinWaitStrategy, SleepingWaitStrategy, WaitStrategy,
    YieldingWaitStrategy,
};

/// Initial value of every sequence; real sequence numbers start at 0.
pub const INITIAL_CURSOR_VALUE: i64 = -1;

/// Errors surfaced by the bus. Hot-path publish and process never fail;
/// these cover construction, lifecycle misuse, and interrupted waits.
#[derive(Debug, thiserror::Error)]
pub enum BusError {
    /// Ring capacity must be a positive power of two.
    #[error("ring capacity must be a power of two, got: {0}")]
    InvalidCapacity(usize),

    /// A non-blocking claim found the ring full.
    #[error("insufficient capacity in ring buffer")]
    InsufficientCapacity,

    /// A wait was interrupted by a barrier alert (shutdown).
    #[error("sequence barrier alerted")]
    Alerted,

    /// The distributor's handler chain is frozen after `start`.
    #[error("distributor already started")]
    AlreadyStarted,

    /// The handler id is not registered with this distributor.
    #[error("unknown handler")]
    UnknownHandler,

    /// A single-handler distributor already holds a handler.
    #[error("handler slot already occupied")]
    HandlerSlotOccupied,

    /// Worker thread creation failed.
    #[error("failed to spawn worker thread")]
    ThreadSpawn(#[from] std::io::Error),
}

/// Crate-wide result alias.
pub type Result<T> = std::result::Result<T, BusError>;

/// Whether `n` is a positive power of two.
pub fn is_power_of_two(n: usize) -> bool {
    n != 0 && (n & (n - 1)) == 0
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn power_of_two_check() {
        assert!(is_power_of_two(1));
        assert!(is_power_of_two(2));
        assert!(is_power_of_two(1024));

        assert!(!is_power_of_two(0));
        assert!(!is_power_of_two(3));
        assert!(!is_power_of_two(1023));
    }

    #[test]
    fn sentinels_do_not_collide_with_sequences() {
        assert!(INITIAL_CURSOR_VALUE < 0);
        assert!(DEFAULT_STOP < 0);
        assert!(STOP_IMMEDIATELY < 0);
        assert_ne!(DEFAULT_STOP, STOP_IMMEDIATELY);
    }
}
