//! Async fan-out: one owned worker thread per handler, fed by an internal
//! sequencer.
//!
//! `distribute` runs on the caller's thread: claim a slot, clone the message
//! into it, publish. Each registered handler is wrapped in an `AsyncWrapper`
//! that owns a consumer [`Sequence`] (registered as a gating sequence on the
//! internal sequencer), a barrier over the cursor, and a worker thread
//! running the wait → process → advance loop.

use std::sync::atomic::{AtomicBool, AtomicI64, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use crate::distributor::{Distributor, Handler, HandlerId, DEFAULT_STOP, STOP_IMMEDIATELY};
use crate::ring_buffer::RingBuffer;
use crate::sequence::Sequence;
use crate::sequence_barrier::SequenceBarrier;
use crate::sequencer::{ProducerMode, Sequencer};
use crate::thread_management::ThreadBuilder;
use crate::wait_strategy::{BusySpinWaitStrategy, WaitStrategy};
use crate::{BusError, Result};

/// Default worker poll interval for periodic stop-checks.
pub const DEFAULT_POLL_TIMEOUT: Duration = Duration::from_micros(100);

/// Predicate a worker evaluates against each message before processing; a
/// true result stops the worker at that message.
pub type StopCheckFn<T> = Arc<dyn Fn(&T) -> bool + Send + Sync>;

/// Distributor that fans out through owned worker threads.
///
/// Messages are cloned into a pre-allocated ring and every worker observes
/// the same total order. The handler set is frozen once `start` has been
/// called: worker sequences are the sequencer's gating set, and that set
/// must not change while producers are active.
pub struct ParallelDistributor<T>
where
    T: Clone + Send + Sync + 'static,
{
    ring: Arc<RingBuffer<T>>,
    sequencer: Arc<dyn Sequencer>,
    workers: Vec<AsyncWrapper<T>>,
    next_id: u64,
    started: bool,
    poll_timeout: Option<Duration>,
    affinity: Vec<usize>,
}

impl<T> ParallelDistributor<T>
where
    T: Clone + Send + Sync + 'static,
{
    /// Single-producer, busy-spin distributor of the given capacity.
    ///
    /// # Errors
    /// Returns [`BusError::InvalidCapacity`] unless `capacity` is a positive
    /// power of two.
    pub fn new(capacity: usize) -> Result<Self>
    where
        T: Default,
    {
        Self::with_options(
            capacity,
            ProducerMode::Single,
            Arc::new(BusySpinWaitStrategy::new()),
        )
    }

    /// Choose the producer mode and wait strategy.
    ///
    /// # Errors
    /// Returns [`BusError::InvalidCapacity`] unless `capacity` is a positive
    /// power of two.
    pub fn with_options(
        capacity: usize,
        mode: ProducerMode,
        wait_strategy: Arc<dyn WaitStrategy>,
    ) -> Result<Self>
    where
        T: Default,
    {
        Self::with_factory(capacity, mode, wait_strategy, T::default)
    }

    /// As [`ParallelDistributor::with_options`], pre-filling ring slots from
    /// `factory` for message types without a `Default`.
    ///
    /// # Errors
    /// Returns [`BusError::InvalidCapacity`] unless `capacity` is a positive
    /// power of two.
    pub fn with_factory<F>(
        capacity: usize,
        mode: ProducerMode,
        wait_strategy: Arc<dyn WaitStrategy>,
        factory: F,
    ) -> Result<Self>
    where
        F: FnMut() -> T,
    {
        let ring = Arc::new(RingBuffer::with_factory(capacity, factory)?);
        let sequencer = mode.create_sequencer(capacity, wait_strategy)?;
        Ok(Self {
            ring,
            sequencer,
            workers: Vec::new(),
            next_id: 0,
            started: false,
            poll_timeout: Some(DEFAULT_POLL_TIMEOUT),
            affinity: Vec::new(),
        })
    }

    /// Worker poll interval: `Some(duration)` makes idle workers re-check
    /// their stop flag at that cadence, `None` waits purely on publication
    /// or alert. Takes effect at `start`.
    pub fn set_poll_timeout(&mut self, poll_timeout: Option<Duration>) {
        self.poll_timeout = poll_timeout;
    }

    /// Pin worker threads to the given CPU cores, assigned round-robin in
    /// registration order. Takes effect at `start`.
    pub fn set_affinity(&mut self, cores: Vec<usize>) {
        self.affinity = cores;
    }

    /// Install `check` as the stop condition of every registered handler's
    /// worker. A wrapper's condition is assignable once; workers that
    /// already have one keep it.
    pub fn assign_stop_condition_all(&mut self, check: StopCheckFn<T>) {
        for wrapper in &mut self.workers {
            wrapper.assign_stop_condition(Arc::clone(&check));
        }
    }

    /// Pause every worker. Paused workers spin at the top of their wait
    /// iteration without advancing; no data is discarded.
    pub fn pause_all(&self) {
        for wrapper in &self.workers {
            wrapper.paused.store(true, Ordering::Release);
        }
    }

    /// Resume paused workers.
    pub fn resume_all(&self) {
        for wrapper in &self.workers {
            wrapper.paused.store(false, Ordering::Release);
        }
    }

    /// Ring capacity.
    pub fn capacity(&self) -> usize {
        self.ring.capacity()
    }

    /// Free slots before `distribute` would block on the slowest worker.
    pub fn remaining_capacity(&self) -> i64 {
        self.sequencer.remaining_capacity()
    }

    pub fn is_started(&self) -> bool {
        self.started
    }
}

impl<T> Distributor<T> for ParallelDistributor<T>
where
    T: Clone + Send + Sync + 'static,
{
    fn add_handler(&mut self, handler: Box<dyn Handler<T>>) -> Result<HandlerId> {
        if self.started {
            return Err(BusError::AlreadyStarted);
        }
        let id = HandlerId(self.next_id);
        self.next_id += 1;

        let wrapper = AsyncWrapper::new(id, handler);
        self.sequencer.add_gating_sequences(&[wrapper.sequence()]);
        self.workers.push(wrapper);
        Ok(id)
    }

    fn remove_handler(&mut self, id: HandlerId) -> Result<Box<dyn Handler<T>>> {
        if self.started {
            return Err(BusError::AlreadyStarted);
        }
        let pos = self
            .workers
            .iter()
            .position(|wrapper| wrapper.id == id)
            .ok_or(BusError::UnknownHandler)?;
        let mut wrapper = self.workers.remove(pos);
        self.sequencer.remove_gating_sequence(&wrapper.sequence());
        wrapper.take_handler().ok_or(BusError::UnknownHandler)
    }

    fn distribute(&mut self, msg: &T) {
        let sequence = self.sequencer.claim();
        // SAFETY: the claim grants exclusive write access to this slot until
        // it is published.
        unsafe {
            *self.ring.get_mut_unchecked(sequence) = msg.clone();
        }
        self.sequencer.publish(sequence);
    }

    fn start(&mut self) -> Result<()> {
        if self.started {
            return Err(BusError::AlreadyStarted);
        }
        for (index, wrapper) in self.workers.iter_mut().enumerate() {
            let core = if self.affinity.is_empty() {
                None
            } else {
                Some(self.affinity[index % self.affinity.len()])
            };
            wrapper.start(
                Arc::clone(&self.ring),
                &self.sequencer,
                self.poll_timeout,
                core,
            )?;
        }
        self.started = true;
        tracing::debug!(
            workers = self.workers.len(),
            capacity = self.ring.capacity(),
            "parallel distributor started"
        );
        Ok(())
    }

    fn signal(&mut self, stop_sequence: i64) {
        let stop_at = if stop_sequence == DEFAULT_STOP {
            let cursor = self.sequencer.cursor().get();
            // Nothing distributed yet: there is nothing to drain.
            if cursor < 0 {
                STOP_IMMEDIATELY
            } else {
                cursor
            }
        } else {
            stop_sequence
        };
        for wrapper in &mut self.workers {
            wrapper.signal(stop_at);
        }
    }

    fn join(&mut self) {
        for wrapper in &mut self.workers {
            wrapper.join();
        }
    }
}

impl<T> std::fmt::Debug for ParallelDistributor<T>
where
    T: Clone + Send + Sync + 'static,
{
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ParallelDistributor")
            .field("capacity", &self.ring.capacity())
            .field("workers", &self.workers.len())
            .field("started", &self.started)
            .finish()
    }
}

/// Worker-thread-owning wrapper around one handler.
///
/// Construction allocates the consumer sequence; `start` builds the barrier
/// and spawns the worker; drop signals an immediate stop and joins, so a
/// wrapper never outlives its thread.
struct AsyncWrapper<T>
where
    T: Clone + Send + Sync + 'static,
{
    id: HandlerId,
    name: String,
    sequence: Arc<Sequence>,
    stop_sequence: Arc<AtomicI64>,
    paused: Arc<AtomicBool>,
    stop_check: Option<StopCheckFn<T>>,
    handler: Option<Box<dyn Handler<T>>>,
    barrier: Option<Arc<SequenceBarrier>>,
    worker: Option<crate::thread_management::ManagedThread>,
}

impl<T> AsyncWrapper<T>
where
    T: Clone + Send + Sync + 'static,
{
    fn new(id: HandlerId, handler: Box<dyn Handler<T>>) -> Self {
        Self {
            id,
            name: format!("ringbus-worker-{}", id.0),
            sequence: Arc::new(Sequence::new_with_initial_value()),
            stop_sequence: Arc::new(AtomicI64::new(DEFAULT_STOP)),
            paused: Arc::new(AtomicBool::new(false)),
            stop_check: None,
            handler: Some(handler),
            barrier: None,
            worker: None,
        }
    }

    fn sequence(&self) -> Arc<Sequence> {
        Arc::clone(&self.sequence)
    }

    fn take_handler(&mut self) -> Option<Box<dyn Handler<T>>> {
        self.handler.take()
    }

    fn assign_stop_condition(&mut self, check: StopCheckFn<T>) {
        if self.stop_check.is_none() && self.worker.is_none() {
            self.stop_check = Some(check);
        }
    }

    fn start(
        &mut self,
        ring: Arc<RingBuffer<T>>,
        sequencer: &Arc<dyn Sequencer>,
        poll_timeout: Option<Duration>,
        core: Option<usize>,
    ) -> Result<()> {
        let Some(mut handler) = self.handler.take() else {
            return Ok(());
        };
        handler.start()?;

        let barrier = Arc::new(sequencer.new_barrier(Vec::new()));
        self.barrier = Some(Arc::clone(&barrier));

        let context = WorkerContext {
            name: self.name.clone(),
            ring,
            barrier,
            sequence: Arc::clone(&self.sequence),
            stop_sequence: Arc::clone(&self.stop_sequence),
            paused: Arc::clone(&self.paused),
            stop_check: self.stop_check.clone(),
            poll_timeout,
        };

        let mut builder = ThreadBuilder::new().thread_name(self.name.clone());
        if let Some(core) = core {
            builder = builder.pin_at_core(core);
        }
        self.worker = Some(builder.spawn(move || context.run(handler))?);
        Ok(())
    }

    fn signal(&mut self, stop_sequence: i64) {
        self.stop_sequence.store(stop_sequence, Ordering::Release);
        if let Some(barrier) = &self.barrier {
            barrier.alert();
        }
        // Not started yet: forward straight to the held handler.
        if let Some(handler) = &mut self.handler {
            handler.signal(stop_sequence);
        }
    }

    fn join(&mut self) {
        if let Some(mut worker) = self.worker.take() {
            worker.join();
        }
        if let Some(handler) = &mut self.handler {
            handler.join();
        }
    }
}

impl<T> Drop for AsyncWrapper<T>
where
    T: Clone + Send + Sync + 'static,
{
    fn drop(&mut self) {
        if self.worker.is_some() {
            self.signal(STOP_IMMEDIATELY);
            self.join();
        }
    }
}

/// Everything the worker loop needs, moved onto the worker thread.
struct WorkerContext<T>
where
    T: Clone + Send + Sync + 'static,
{
    name: String,
    ring: Arc<RingBuffer<T>>,
    barrier: Arc<SequenceBarrier>,
    sequence: Arc<Sequence>,
    stop_sequence: Arc<AtomicI64>,
    paused: Arc<AtomicBool>,
    stop_check: Option<StopCheckFn<T>>,
    poll_timeout: Option<Duration>,
}

impl<T> WorkerContext<T>
where
    T: Clone + Send + Sync + 'static,
{
    fn run(self, mut handler: Box<dyn Handler<T>>) {
        tracing::debug!(worker = %self.name, "worker started");
        let exit_signal = self.process_loop(&mut *handler);
        // Propagate the stop into handler-owned subtrees before exiting.
        handler.signal(exit_signal);
        handler.join();
        tracing::debug!(
            worker = %self.name,
            sequence = self.sequence.get(),
            "worker stopped"
        );
    }

    fn process_loop(&self, handler: &mut dyn Handler<T>) -> i64 {
        loop {
            while self.paused.load(Ordering::Acquire) {
                if self.stop_sequence.load(Ordering::Acquire) == STOP_IMMEDIATELY {
                    return STOP_IMMEDIATELY;
                }
                std::hint::spin_loop();
                thread::yield_now();
            }

            let stop_at = self.stop_sequence.load(Ordering::Acquire);
            if stop_at == STOP_IMMEDIATELY {
                return STOP_IMMEDIATELY;
            }
            if stop_at != DEFAULT_STOP && self.sequence.get() >= stop_at {
                return DEFAULT_STOP;
            }

            let next = self.sequence.get() + 1;
            let waited = match self.poll_timeout {
                Some(timeout) => self.barrier.wait_for_timeout(next, timeout),
                None => self.barrier.wait_for(next),
            };

            if self.stop_sequence.load(Ordering::Acquire) == STOP_IMMEDIATELY {
                return STOP_IMMEDIATELY;
            }

            match waited {
                Ok(available) if available >= next => {
                    // Never process past an explicit stop boundary.
                    let limit = if stop_at == DEFAULT_STOP {
                        available
                    } else {
                        available.min(stop_at)
                    };
                    for sequence in next..=limit {
                        let msg = self.ring.get(sequence);
                        if let Some(check) = &self.stop_check {
                            if check(msg) {
                                self.sequence.set(sequence);
                                return DEFAULT_STOP;
                            }
                        }
                        handler.process(msg);
                    }
                    self.sequence.set(limit);
                }
                // Timed out with nothing new; loop to re-check stop flags.
                Ok(_) => {}
                // Alerted: a stop signal is pending. Clear it and keep
                // draining toward the recorded boundary.
                Err(_) => self.barrier.clear_alert(),
            }
        }
    }
}
