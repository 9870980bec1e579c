//! The leaf consumer contract.

use crate::Result;

/// Stop sentinel: no stop requested; on `signal` it means "stop after the
/// last message distributed so far".
pub const DEFAULT_STOP: i64 = -1;

/// Stop sentinel: do not drain; exit as soon as the current wait returns.
pub const STOP_IMMEDIATELY: i64 = -2;

/// A message consumer endpoint.
///
/// `process` runs on whatever thread the owning distributor drives it from:
/// the caller's thread for sequential fan-out, an owned worker thread for
/// async fan-out. It must not block and must not panic; there is no error
/// channel on the hot path.
///
/// The lifecycle hooks exist for handlers that own resources or subtrees
/// (see [`Connector`](crate::Connector)); plain handlers keep the default
/// no-ops. `signal` conveys the stop boundary: a sequence number past which
/// the handler may stop after draining, or one of the two sentinels.
pub trait Handler<T>: Send {
    /// Consume one message.
    fn process(&mut self, msg: &T);

    /// Called once before any `process` invocation.
    ///
    /// # Errors
    /// Propagated out of the owning distributor's `start`.
    fn start(&mut self) -> Result<()> {
        Ok(())
    }

    /// Convey a stop boundary ([`DEFAULT_STOP`], [`STOP_IMMEDIATELY`], or a
    /// concrete sequence).
    fn signal(&mut self, stop_sequence: i64) {
        let _ = stop_sequence;
    }

    /// Block until the handler has released everything it owns.
    fn join(&mut self) {}
}

/// Any `FnMut(&T) + Send` closure is a handler with default lifecycle.
impl<T, F> Handler<T> for F
where
    F: FnMut(&T) + Send,
{
    fn process(&mut self, msg: &T) {
        self(msg);
    }
}
