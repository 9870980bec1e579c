//! In-thread fan-out over an ordered handler chain.

use crate::distributor::{Distributor, Handler, HandlerId, STOP_IMMEDIATELY};
use crate::{BusError, Result};

/// Distributor that iterates its handlers synchronously, in registration
/// order, on the caller's thread.
///
/// `distribute` returns only after every handler has seen the message, so a
/// slow handler stalls everything behind it; hang slow consumers behind a
/// [`Connector`](crate::Connector) to a
/// [`ParallelDistributor`](crate::ParallelDistributor) instead.
#[derive(Default)]
pub struct SequentialDistributor<T> {
    chain: Vec<(HandlerId, Box<dyn Handler<T>>)>,
    next_id: u64,
    started: bool,
}

impl<T> SequentialDistributor<T> {
    pub fn new() -> Self {
        Self {
            chain: Vec::new(),
            next_id: 0,
            started: false,
        }
    }

    pub fn len(&self) -> usize {
        self.chain.len()
    }

    pub fn is_empty(&self) -> bool {
        self.chain.is_empty()
    }
}

impl<T> Distributor<T> for SequentialDistributor<T> {
    fn add_handler(&mut self, handler: Box<dyn Handler<T>>) -> Result<HandlerId> {
        if self.started {
            return Err(BusError::AlreadyStarted);
        }
        let id = HandlerId(self.next_id);
        self.next_id += 1;
        self.chain.push((id, handler));
        Ok(id)
    }

    fn remove_handler(&mut self, id: HandlerId) -> Result<Box<dyn Handler<T>>> {
        if self.started {
            return Err(BusError::AlreadyStarted);
        }
        let pos = self
            .chain
            .iter()
            .position(|(held, _)| *held == id)
            .ok_or(BusError::UnknownHandler)?;
        let (_, mut handler) = self.chain.remove(pos);
        handler.signal(STOP_IMMEDIATELY);
        handler.join();
        Ok(handler)
    }

    fn distribute(&mut self, msg: &T) {
        for (_, handler) in &mut self.chain {
            handler.process(msg);
        }
    }

    fn start(&mut self) -> Result<()> {
        if self.started {
            return Err(BusError::AlreadyStarted);
        }
        for (_, handler) in &mut self.chain {
            handler.start()?;
        }
        self.started = true;
        Ok(())
    }

    fn signal(&mut self, stop_sequence: i64) {
        for (_, handler) in &mut self.chain {
            handler.signal(stop_sequence);
        }
    }

    fn join(&mut self) {
        for (_, handler) in &mut self.chain {
            handler.join();
        }
    }
}

impl<T> std::fmt::Debug for SequentialDistributor<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SequentialDistributor")
            .field("handlers", &self.chain.len())
            .field("started", &self.started)
            .finish()
    }
}
