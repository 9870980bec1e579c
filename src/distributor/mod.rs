//! Message fan-out: handlers, distributors, and the composition tree.
//!
//! A [`Handler`] is a leaf consumer. A [`Distributor`] fans messages out to
//! one or more handlers, synchronously on the caller's thread
//! ([`SingleDistributor`], [`SequentialDistributor`]) or through owned
//! worker threads fed by an internal sequencer ([`ParallelDistributor`]).
//! A [`Connector`] makes any distributor look like a single handler, which
//! is how subtrees nest; [`CompositeDistributor`] packages the common async
//! fan-out shapes.

mod composite;
mod connector;
mod handler;
mod parallel;
mod sequential;
mod single;

pub use composite::CompositeDistributor;
pub use connector::Connector;
pub use handler::{Handler, DEFAULT_STOP, STOP_IMMEDIATELY};
pub use parallel::{ParallelDistributor, StopCheckFn, DEFAULT_POLL_TIMEOUT};
pub use sequential::SequentialDistributor;
pub use single::SingleDistributor;

use crate::Result;

/// Token identifying a handler within the distributor that registered it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct HandlerId(pub(crate) u64);

/// Fan-out of messages to registered handlers.
///
/// Lifecycle: register handlers, `start`, `distribute` any number of times,
/// `signal` a stop boundary, `join`. The handler chain is frozen once
/// `start` has been called; `add_handler`/`remove_handler` then return
/// [`BusError::AlreadyStarted`](crate::BusError::AlreadyStarted).
pub trait Distributor<T>: Send {
    /// Register a handler, transferring ownership to the distributor.
    ///
    /// # Errors
    /// Fails if the distributor has started or cannot accept more handlers.
    fn add_handler(&mut self, handler: Box<dyn Handler<T>>) -> Result<HandlerId>;

    /// Unregister a handler, signalling it to stop and joining it before
    /// handing it back.
    ///
    /// # Errors
    /// Fails if the distributor has started or the id is unknown.
    fn remove_handler(&mut self, id: HandlerId) -> Result<Box<dyn Handler<T>>>;

    /// Deliver one message to every registered handler.
    fn distribute(&mut self, msg: &T);

    /// Start the distributor and its handlers; freezes the handler chain.
    ///
    /// # Errors
    /// Fails if already started or if a worker thread cannot be spawned.
    fn start(&mut self) -> Result<()>;

    /// Convey a stop boundary: [`DEFAULT_STOP`] drains everything
    /// distributed so far, [`STOP_IMMEDIATELY`] abandons in-flight messages,
    /// and a concrete sequence stops after that sequence is processed.
    fn signal(&mut self, stop_sequence: i64);

    /// Block until every owned worker has exited.
    fn join(&mut self);
}
