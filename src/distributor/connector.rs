//! Adapter that lets a distributor subtree pose as one handler.

use crate::distributor::{Distributor, Handler, DEFAULT_STOP, STOP_IMMEDIATELY};
use crate::Result;

/// A [`Handler`] whose `process` forwards into an owned [`Distributor`].
///
/// This is the nesting point of the composition tree: a parent distributor
/// sees one handler; the handler re-distributes into a whole subtree.
///
/// Stop boundaries are translated on the way down. A concrete sequence from
/// the parent is meaningless in the subtree's own sequence space, so
/// anything except [`STOP_IMMEDIATELY`] forwards as [`DEFAULT_STOP`],
/// "drain everything this connector has distributed to you".
pub struct Connector<T> {
    distributor: Box<dyn Distributor<T>>,
}

impl<T> Connector<T> {
    pub fn new(distributor: Box<dyn Distributor<T>>) -> Self {
        Self { distributor }
    }

    /// Hand back the wrapped distributor.
    pub fn into_inner(self) -> Box<dyn Distributor<T>> {
        self.distributor
    }
}

impl<T> Handler<T> for Connector<T> {
    fn process(&mut self, msg: &T) {
        self.distributor.distribute(msg);
    }

    fn start(&mut self) -> Result<()> {
        self.distributor.start()
    }

    fn signal(&mut self, stop_sequence: i64) {
        let forwarded = if stop_sequence == STOP_IMMEDIATELY {
            STOP_IMMEDIATELY
        } else {
            DEFAULT_STOP
        };
        self.distributor.signal(forwarded);
    }

    fn join(&mut self) {
        self.distributor.join();
    }
}

impl<T> std::fmt::Debug for Connector<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Connector").finish_non_exhaustive()
    }
}
