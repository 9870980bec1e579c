//! Sequence barriers: the read side of the coordination protocol.
//!
//! A barrier combines the publisher cursor, the consumer's dependent
//! sequences, and a wait strategy into one question: "what is the highest
//! published sequence at or beyond the one I need?" It also carries the alert
//! flag used to unblock consumers during shutdown.

use std::sync::atomic::{fence, AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use crate::sequencer::AvailabilityBuffer;
use crate::wait_strategy::WaitStrategy;
use crate::{BusError, Result, Sequence};

/// How the barrier resolves "waited-for" into "published".
///
/// Single-producer publication moves the cursor itself, so the cursor is the
/// answer. Multi-producer claims move the cursor before the slot is written,
/// so the barrier must scan the availability buffer for the highest
/// contiguously published sequence instead.
#[derive(Clone, Debug)]
pub(crate) enum PublishedTracker {
    Cursor,
    Slots(Arc<AvailabilityBuffer>),
}

/// Read-side coordination point handed to each consumer.
///
/// Constructed by [`Sequencer::new_barrier`](crate::Sequencer::new_barrier);
/// the dependency set is always `{cursor} ∪ deps`, which keeps the barrier
/// graph rooted at the producer (and acyclic as long as callers never make a
/// consumer depend on itself).
#[derive(Debug)]
pub struct SequenceBarrier {
    cursor: Arc<Sequence>,
    wait_strategy: Arc<dyn WaitStrategy>,
    dependents: Vec<Arc<Sequence>>,
    published: PublishedTracker,
    alerted: AtomicBool,
}

impl SequenceBarrier {
    pub(crate) fn new(
        cursor: Arc<Sequence>,
        wait_strategy: Arc<dyn WaitStrategy>,
        dependents: Vec<Arc<Sequence>>,
        published: PublishedTracker,
    ) -> Self {
        Self {
            cursor,
            wait_strategy,
            dependents,
            published,
            alerted: AtomicBool::new(false),
        }
    }

    /// Block until `sequence` is published, returning the highest published
    /// sequence (which may be greater, enabling batch consumption).
    ///
    /// # Errors
    /// Returns [`BusError::Alerted`] if the barrier is alerted before or
    /// while waiting.
    pub fn wait_for(&self, sequence: i64) -> Result<i64> {
        self.check_alert()?;
        let available =
            self.wait_strategy
                .wait_for(sequence, &self.cursor, &self.dependents, &self.alerted)?;
        self.resolve_published(sequence, available)
    }

    /// As [`SequenceBarrier::wait_for`] with a deadline. On timeout the
    /// returned value is below `sequence`; the caller must not advance. A
    /// zero timeout is a non-blocking poll.
    ///
    /// # Errors
    /// Returns [`BusError::Alerted`] if the barrier is alerted before or
    /// while waiting.
    pub fn wait_for_timeout(&self, sequence: i64, timeout: Duration) -> Result<i64> {
        self.check_alert()?;
        let available = self.wait_strategy.wait_for_timeout(
            sequence,
            &self.cursor,
            &self.dependents,
            &self.alerted,
            timeout,
        )?;
        self.resolve_published(sequence, available)
    }

    fn resolve_published(&self, sequence: i64, available: i64) -> Result<i64> {
        self.check_alert()?;
        // Pairs with the release store on publish; everything written to the
        // slot before publication is visible after this fence.
        fence(Ordering::Acquire);

        if available < sequence {
            return Ok(available);
        }
        Ok(match &self.published {
            PublishedTracker::Cursor => available,
            PublishedTracker::Slots(availability) => {
                availability.highest_published(sequence, available)
            }
        })
    }

    /// The cursor this barrier tracks.
    pub fn cursor(&self) -> Arc<Sequence> {
        Arc::clone(&self.cursor)
    }

    /// Whether the barrier has been alerted.
    pub fn is_alerted(&self) -> bool {
        self.alerted.load(Ordering::Acquire)
    }

    /// Alert the barrier, waking every parked waiter. The standard way to
    /// unblock consumers during shutdown.
    pub fn alert(&self) {
        self.alerted.store(true, Ordering::Release);
        self.wait_strategy.signal_all_when_blocking();
    }

    /// Reset the alert flag so the barrier can be waited on again.
    pub fn clear_alert(&self) {
        self.alerted.store(false, Ordering::Release);
    }

    /// # Errors
    /// Returns [`BusError::Alerted`] if the barrier is alerted.
    pub fn check_alert(&self) -> Result<()> {
        if self.is_alerted() {
            Err(BusError::Alerted)
        } else {
            Ok(())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::wait_strategy::BusySpinWaitStrategy;
    use std::thread;

    fn barrier_over(cursor: Arc<Sequence>, dependents: Vec<Arc<Sequence>>) -> SequenceBarrier {
        SequenceBarrier::new(
            cursor,
            Arc::new(BusySpinWaitStrategy::new()),
            dependents,
            PublishedTracker::Cursor,
        )
    }

    #[test]
    fn returns_cursor_when_ahead() {
        let cursor = Arc::new(Sequence::new(9));
        let barrier = barrier_over(cursor, vec![]);
        assert_eq!(barrier.wait_for(4).unwrap(), 9);
    }

    #[test]
    fn dependents_gate_the_result() {
        let cursor = Arc::new(Sequence::new(9));
        let upstream = Arc::new(Sequence::new(5));
        let barrier = barrier_over(cursor, vec![upstream]);
        assert_eq!(barrier.wait_for(3).unwrap(), 5);
    }

    #[test]
    fn wait_for_is_monotone_on_repeat() {
        let cursor = Arc::new(Sequence::new(3));
        let barrier = barrier_over(Arc::clone(&cursor), vec![]);
        let first = barrier.wait_for(2).unwrap();
        cursor.set(7);
        let second = barrier.wait_for(2).unwrap();
        assert!(second >= first);
    }

    #[test]
    fn timeout_reports_no_progress() {
        let cursor = Arc::new(Sequence::new(1));
        let barrier = barrier_over(cursor, vec![]);
        let available = barrier
            .wait_for_timeout(5, Duration::from_millis(2))
            .unwrap();
        assert!(available < 5);
        assert_eq!(available, 1);
    }

    #[test]
    fn alert_short_circuits_waiters() {
        let cursor = Arc::new(Sequence::new(-1));
        let barrier = Arc::new(barrier_over(cursor, vec![]));

        let waiter = {
            let barrier = Arc::clone(&barrier);
            thread::spawn(move || barrier.wait_for(0))
        };
        thread::sleep(Duration::from_millis(10));
        barrier.alert();

        assert!(matches!(waiter.join().unwrap(), Err(BusError::Alerted)));
        assert!(barrier.is_alerted());

        barrier.clear_alert();
        assert!(!barrier.is_alerted());
        assert!(barrier.check_alert().is_ok());
    }
}
