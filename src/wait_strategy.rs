//! Wait strategies for consumers.
//!
//! A wait strategy decides how a consumer burns time until a sequence becomes
//! available: spinning, yielding, sleeping, or parking on a condition
//! variable. Strategies trade latency against CPU; busy-spin is the default
//! for latency-critical pipelines, blocking for everything else.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use parking_lot::{Condvar, Mutex};

use crate::sequence::{minimum_sequence, Sequence};
use crate::{BusError, Result};

/// How a consumer waits for the cursor and its dependent sequences.
///
/// `wait_for` blocks until `min(cursor, dependents) >= sequence` and returns
/// that minimum, which may exceed the requested sequence and unlocks batch
/// consumption. `wait_for_timeout` may instead return early with whatever is
/// available; a value below the requested sequence means "no new data yet"
/// and the caller must not advance.
///
/// Every loop iteration checks `alerted`; an alerted wait returns
/// [`BusError::Alerted`] so shutdown never hangs on an idle consumer.
pub trait WaitStrategy: Send + Sync + std::fmt::Debug {
    /// Wait until `sequence` is reachable, returning the highest reachable
    /// sequence.
    ///
    /// # Errors
    /// Returns [`BusError::Alerted`] if the owning barrier was alerted.
    fn wait_for(
        &self,
        sequence: i64,
        cursor: &Sequence,
        dependents: &[Arc<Sequence>],
        alerted: &AtomicBool,
    ) -> Result<i64>;

    /// As [`WaitStrategy::wait_for`], giving up after `timeout`.
    ///
    /// A zero timeout is a non-blocking poll.
    ///
    /// # Errors
    /// Returns [`BusError::Alerted`] if the owning barrier was alerted.
    fn wait_for_timeout(
        &self,
        sequence: i64,
        cursor: &Sequence,
        dependents: &[Arc<Sequence>],
        alerted: &AtomicBool,
        timeout: Duration,
    ) -> Result<i64>;

    /// Wake any parked waiters. Called by publishers and on alert; a no-op
    /// for strategies that never park.
    fn signal_all_when_blocking(&self) {}
}

/// Highest sequence currently reachable: the cursor floor'd by every
/// dependent sequence.
#[inline]
fn available_sequence(cursor: &Sequence, dependents: &[Arc<Sequence>]) -> i64 {
    minimum_sequence(dependents, i64::MAX).min(cursor.get())
}

#[inline]
fn check_alert(alerted: &AtomicBool) -> Result<()> {
    if alerted.load(Ordering::Acquire) {
        Err(BusError::Alerted)
    } else {
        Ok(())
    }
}

/// Tight spin loop. Lowest latency, one core pinned at 100%.
#[derive(Debug, Default)]
pub struct BusySpinWaitStrategy;

impl BusySpinWaitStrategy {
    pub fn new() -> Self {
        Self
    }
}

impl WaitStrategy for BusySpinWaitStrategy {
    fn wait_for(
        &self,
        sequence: i64,
        cursor: &Sequence,
        dependents: &[Arc<Sequence>],
        alerted: &AtomicBool,
    ) -> Result<i64> {
        loop {
            let available = available_sequence(cursor, dependents);
            if available >= sequence {
                return Ok(available);
            }
            check_alert(alerted)?;
            std::hint::spin_loop();
        }
    }

    fn wait_for_timeout(
        &self,
        sequence: i64,
        cursor: &Sequence,
        dependents: &[Arc<Sequence>],
        alerted: &AtomicBool,
        timeout: Duration,
    ) -> Result<i64> {
        let deadline = Instant::now() + timeout;
        loop {
            let available = available_sequence(cursor, dependents);
            if available >= sequence {
                return Ok(available);
            }
            check_alert(alerted)?;
            if Instant::now() >= deadline {
                return Ok(available);
            }
            std::hint::spin_loop();
        }
    }
}

/// Spin a bounded number of times, then yield to the scheduler.
#[derive(Debug)]
pub struct YieldingWaitStrategy {
    spin_tries: u32,
}

impl YieldingWaitStrategy {
    pub fn new() -> Self {
        Self { spin_tries: 100 }
    }

    /// Number of spin iterations before each yield.
    pub fn with_spin_tries(spin_tries: u32) -> Self {
        Self { spin_tries }
    }

    #[inline]
    fn back_off(&self, remaining: &mut u32) {
        if *remaining > 0 {
            *remaining -= 1;
            std::hint::spin_loop();
        } else {
            thread::yield_now();
        }
    }
}

impl Default for YieldingWaitStrategy {
    fn default() -> Self {
        Self::new()
    }
}

impl WaitStrategy for YieldingWaitStrategy {
    fn wait_for(
        &self,
        sequence: i64,
        cursor: &Sequence,
        dependents: &[Arc<Sequence>],
        alerted: &AtomicBool,
    ) -> Result<i64> {
        let mut remaining = self.spin_tries;
        loop {
            let available = available_sequence(cursor, dependents);
            if available >= sequence {
                return Ok(available);
            }
            check_alert(alerted)?;
            self.back_off(&mut remaining);
        }
    }

    fn wait_for_timeout(
        &self,
        sequence: i64,
        cursor: &Sequence,
        dependents: &[Arc<Sequence>],
        alerted: &AtomicBool,
        timeout: Duration,
    ) -> Result<i64> {
        let deadline = Instant::now() + timeout;
        let mut remaining = self.spin_tries;
        loop {
            let available = available_sequence(cursor, dependents);
            if available >= sequence {
                return Ok(available);
            }
            check_alert(alerted)?;
            if Instant::now() >= deadline {
                return Ok(available);
            }
            self.back_off(&mut remaining);
        }
    }
}

/// Sleep a fixed duration between polls. Moderate latency, low CPU.
#[derive(Debug)]
pub struct SleepingWaitStrategy {
    sleep_duration: Duration,
}

impl SleepingWaitStrategy {
    pub fn new() -> Self {
        Self {
            sleep_duration: Duration::from_millis(1),
        }
    }

    pub fn with_duration(sleep_duration: Duration) -> Self {
        Self { sleep_duration }
    }
}

impl Default for SleepingWaitStrategy {
    fn default() -> Self {
        Self::new()
    }
}

impl WaitStrategy for SleepingWaitStrategy {
    fn wait_for(
        &self,
        sequence: i64,
        cursor: &Sequence,
        dependents: &[Arc<Sequence>],
        alerted: &AtomicBool,
    ) -> Result<i64> {
        loop {
            let available = available_sequence(cursor, dependents);
            if available >= sequence {
                return Ok(available);
            }
            check_alert(alerted)?;
            thread::sleep(self.sleep_duration);
        }
    }

    fn wait_for_timeout(
        &self,
        sequence: i64,
        cursor: &Sequence,
        dependents: &[Arc<Sequence>],
        alerted: &AtomicBool,
        timeout: Duration,
    ) -> Result<i64> {
        let deadline = Instant::now() + timeout;
        loop {
            let available = available_sequence(cursor, dependents);
            if available >= sequence {
                return Ok(available);
            }
            check_alert(alerted)?;
            let now = Instant::now();
            if now >= deadline {
                return Ok(available);
            }
            thread::sleep(self.sleep_duration.min(deadline - now));
        }
    }
}

/// Park on a condition variable until a publisher signals.
///
/// Near-zero CPU while idle, at the price of a wake-up on the publish path.
/// `with_default_timeout` turns this into the timed-blocking variant: plain
/// `wait_for` calls then give up after the configured deadline and return
/// whatever is available, letting callers re-check stop conditions.
#[derive(Debug)]
pub struct BlockingWaitStrategy {
    mutex: Mutex<()>,
    condvar: Condvar,
    default_timeout: Option<Duration>,
}

impl BlockingWaitStrategy {
    pub fn new() -> Self {
        Self {
            mutex: Mutex::new(()),
            condvar: Condvar::new(),
            default_timeout: None,
        }
    }

    /// Timed-blocking variant: `wait_for` returns after `timeout` even when
    /// nothing was published.
    pub fn with_default_timeout(timeout: Duration) -> Self {
        Self {
            mutex: Mutex::new(()),
            condvar: Condvar::new(),
            default_timeout: Some(timeout),
        }
    }
}

impl Default for BlockingWaitStrategy {
    fn default() -> Self {
        Self::new()
    }
}

impl WaitStrategy for BlockingWaitStrategy {
    fn wait_for(
        &self,
        sequence: i64,
        cursor: &Sequence,
        dependents: &[Arc<Sequence>],
        alerted: &AtomicBool,
    ) -> Result<i64> {
        if let Some(timeout) = self.default_timeout {
            return self.wait_for_timeout(sequence, cursor, dependents, alerted, timeout);
        }

        let mut available = available_sequence(cursor, dependents);
        if available < sequence {
            let mut guard = self.mutex.lock();
            loop {
                check_alert(alerted)?;
                available = available_sequence(cursor, dependents);
                if available >= sequence {
                    break;
                }
                // Bounded park so a publish signal racing ahead of the park
                // cannot strand this waiter.
                self.condvar
                    .wait_for(&mut guard, Duration::from_millis(1));
            }
        }
        Ok(available)
    }

    fn wait_for_timeout(
        &self,
        sequence: i64,
        cursor: &Sequence,
        dependents: &[Arc<Sequence>],
        alerted: &AtomicBool,
        timeout: Duration,
    ) -> Result<i64> {
        let deadline = Instant::now() + timeout;
        let mut available = available_sequence(cursor, dependents);
        if available < sequence {
            let mut guard = self.mutex.lock();
            loop {
                check_alert(alerted)?;
                available = available_sequence(cursor, dependents);
                if available >= sequence {
                    break;
                }
                if Instant::now() >= deadline {
                    return Ok(available);
                }
                self.condvar.wait_until(&mut guard, deadline);
            }
        }
        Ok(available)
    }

    fn signal_all_when_blocking(&self) {
        self.condvar.notify_all();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn no_alert() -> AtomicBool {
        AtomicBool::new(false)
    }

    #[test]
    fn returns_immediately_when_available() {
        let cursor = Sequence::new(10);
        let alerted = no_alert();

        let strategies: Vec<Box<dyn WaitStrategy>> = vec![
            Box::new(BusySpinWaitStrategy::new()),
            Box::new(YieldingWaitStrategy::new()),
            Box::new(SleepingWaitStrategy::new()),
            Box::new(BlockingWaitStrategy::new()),
        ];
        for strategy in strategies {
            let available = strategy.wait_for(5, &cursor, &[], &alerted).unwrap();
            assert_eq!(available, 10);
        }
    }

    #[test]
    fn dependents_floor_the_cursor() {
        let cursor = Sequence::new(10);
        let dependents = vec![Arc::new(Sequence::new(7)), Arc::new(Sequence::new(9))];
        let alerted = no_alert();

        let strategy = BusySpinWaitStrategy::new();
        let available = strategy.wait_for(3, &cursor, &dependents, &alerted).unwrap();
        assert_eq!(available, 7);
    }

    #[test]
    fn timeout_returns_whatever_is_available() {
        let cursor = Sequence::new(2);
        let alerted = no_alert();

        let strategy = YieldingWaitStrategy::new();
        let available = strategy
            .wait_for_timeout(5, &cursor, &[], &alerted, Duration::from_millis(5))
            .unwrap();
        assert_eq!(available, 2);
    }

    #[test]
    fn zero_timeout_is_a_poll() {
        let cursor = Sequence::new(-1);
        let alerted = no_alert();

        let strategy = BusySpinWaitStrategy::new();
        let available = strategy
            .wait_for_timeout(0, &cursor, &[], &alerted, Duration::ZERO)
            .unwrap();
        assert_eq!(available, -1);
    }

    #[test]
    fn alert_interrupts_the_wait() {
        let cursor = Arc::new(Sequence::new(-1));
        let alerted = Arc::new(AtomicBool::new(false));
        let strategy = Arc::new(BlockingWaitStrategy::new());

        let waiter = {
            let cursor = Arc::clone(&cursor);
            let alerted = Arc::clone(&alerted);
            let strategy = Arc::clone(&strategy);
            thread::spawn(move || strategy.wait_for(0, &cursor, &[], &alerted))
        };

        thread::sleep(Duration::from_millis(10));
        alerted.store(true, Ordering::Release);
        strategy.signal_all_when_blocking();

        assert!(matches!(waiter.join().unwrap(), Err(BusError::Alerted)));
    }

    #[test]
    fn timed_blocking_gives_up_on_deadline() {
        let cursor = Sequence::new(-1);
        let alerted = no_alert();
        let strategy = BlockingWaitStrategy::with_default_timeout(Duration::from_millis(5));

        let start = Instant::now();
        let available = strategy.wait_for(0, &cursor, &[], &alerted).unwrap();
        assert_eq!(available, -1);
        assert!(start.elapsed() < Duration::from_secs(1));
    }

    #[test]
    fn blocking_wakes_on_publish_signal() {
        let cursor = Arc::new(Sequence::new(-1));
        let alerted = Arc::new(AtomicBool::new(false));
        let strategy = Arc::new(BlockingWaitStrategy::new());

        let waiter = {
            let cursor = Arc::clone(&cursor);
            let alerted = Arc::clone(&alerted);
            let strategy = Arc::clone(&strategy);
            thread::spawn(move || strategy.wait_for(0, &cursor, &[], &alerted))
        };

        thread::sleep(Duration::from_millis(10));
        cursor.set(0);
        strategy.signal_all_when_blocking();

        assert_eq!(waiter.join().unwrap().unwrap(), 0);
    }
}
