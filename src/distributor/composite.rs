//! Convenience constructors for common async fan-out shapes.

use std::sync::Arc;

use crate::distributor::parallel::{ParallelDistributor, StopCheckFn};
use crate::distributor::{
    Connector, Distributor, Handler, HandlerId, SequentialDistributor,
};
use crate::sequencer::ProducerMode;
use crate::wait_strategy::{BusySpinWaitStrategy, WaitStrategy};
use crate::Result;

/// Default ring capacity for async subtrees spliced in by the helpers.
pub(crate) const DEFAULT_ASYNC_CAPACITY: usize = 1024;

/// A sequential chain with helpers that splice in asynchronous subtrees.
///
/// `add_handler` behaves exactly like [`SequentialDistributor`]. The
/// `add_async_*` helpers construct a [`ParallelDistributor`] internally and
/// register it through a [`Connector`], so a group of handlers can be moved
/// off the caller's thread with one call:
///
/// - `add_async_parallel`: each handler gets its own worker thread.
/// - `add_async_sequential`: the handlers run in registration order on one
///   shared worker thread.
///
/// Synthesized subtrees are owned by the composite; removing one via
/// [`Distributor::remove_handler`] signal-stops and joins it before the
/// connector is handed back.
pub struct CompositeDistributor<T>
where
    T: Clone + Send + Sync + 'static,
{
    chain: SequentialDistributor<T>,
}

impl<T> CompositeDistributor<T>
where
    T: Clone + Send + Sync + 'static,
{
    pub fn new() -> Self {
        Self {
            chain: SequentialDistributor::new(),
        }
    }

    pub fn len(&self) -> usize {
        self.chain.len()
    }

    pub fn is_empty(&self) -> bool {
        self.chain.is_empty()
    }

    /// Splice in an async fan-out: one worker thread per handler.
    ///
    /// # Errors
    /// Fails if the composite has already started.
    pub fn add_async_parallel(
        &mut self,
        handlers: Vec<Box<dyn Handler<T>>>,
    ) -> Result<HandlerId>
    where
        T: Default,
    {
        self.add_async_parallel_with(
            handlers,
            DEFAULT_ASYNC_CAPACITY,
            Arc::new(BusySpinWaitStrategy::new()),
            None,
        )
    }

    /// As [`CompositeDistributor::add_async_parallel`] with an explicit ring
    /// capacity, wait strategy, and optional stop condition applied to every
    /// wrapped handler.
    ///
    /// # Errors
    /// Fails if the composite has already started or the capacity is not a
    /// power of two.
    pub fn add_async_parallel_with(
        &mut self,
        handlers: Vec<Box<dyn Handler<T>>>,
        capacity: usize,
        wait_strategy: Arc<dyn WaitStrategy>,
        stop_check: Option<StopCheckFn<T>>,
    ) -> Result<HandlerId>
    where
        T: Default,
    {
        let mut parallel =
            ParallelDistributor::with_options(capacity, ProducerMode::Single, wait_strategy)?;
        for handler in handlers {
            parallel.add_handler(handler)?;
        }
        if let Some(check) = stop_check {
            parallel.assign_stop_condition_all(check);
        }
        self.chain
            .add_handler(Box::new(Connector::new(Box::new(parallel))))
    }

    /// Splice in an async chain: the handlers run sequentially on one shared
    /// worker thread.
    ///
    /// # Errors
    /// Fails if the composite has already started.
    pub fn add_async_sequential(
        &mut self,
        handlers: Vec<Box<dyn Handler<T>>>,
    ) -> Result<HandlerId>
    where
        T: Default,
    {
        self.add_async_sequential_with(
            handlers,
            DEFAULT_ASYNC_CAPACITY,
            Arc::new(BusySpinWaitStrategy::new()),
            None,
        )
    }

    /// As [`CompositeDistributor::add_async_sequential`] with an explicit
    /// ring capacity, wait strategy, and optional stop condition.
    ///
    /// # Errors
    /// Fails if the composite has already started or the capacity is not a
    /// power of two.
    pub fn add_async_sequential_with(
        &mut self,
        handlers: Vec<Box<dyn Handler<T>>>,
        capacity: usize,
        wait_strategy: Arc<dyn WaitStrategy>,
        stop_check: Option<StopCheckFn<T>>,
    ) -> Result<HandlerId>
    where
        T: Default,
    {
        let mut inner = SequentialDistributor::new();
        for handler in handlers {
            inner.add_handler(handler)?;
        }

        let mut parallel =
            ParallelDistributor::with_options(capacity, ProducerMode::Single, wait_strategy)?;
        parallel.add_handler(Box::new(Connector::new(Box::new(inner))))?;
        if let Some(check) = stop_check {
            parallel.assign_stop_condition_all(check);
        }
        self.chain
            .add_handler(Box::new(Connector::new(Box::new(parallel))))
    }
}

impl<T> Default for CompositeDistributor<T>
where
    T: Clone + Send + Sync + 'static,
{
    fn default() -> Self {
        Self::new()
    }
}

impl<T> Distributor<T> for CompositeDistributor<T>
where
    T: Clone + Send + Sync + 'static,
{
    fn add_handler(&mut self, handler: Box<dyn Handler<T>>) -> Result<HandlerId> {
        self.chain.add_handler(handler)
    }

    fn remove_handler(&mut self, id: HandlerId) -> Result<Box<dyn Handler<T>>> {
        self.chain.remove_handler(id)
    }

    fn distribute(&mut self, msg: &T) {
        self.chain.distribute(msg);
    }

    fn start(&mut self) -> Result<()> {
        self.chain.start()
    }

    fn signal(&mut self, stop_sequence: i64) {
        self.chain.signal(stop_sequence);
    }

    fn join(&mut self) {
        self.chain.join();
    }
}

impl<T> std::fmt::Debug for CompositeDistributor<T>
where
    T: Clone + Send + Sync + 'static,
{
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CompositeDistributor")
            .field("handlers", &self.chain.len())
            .finish()
    }
}
