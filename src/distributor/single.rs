//! Fan-out to exactly one handler.

use crate::distributor::{Distributor, Handler, HandlerId, STOP_IMMEDIATELY};
use crate::{BusError, Result};

/// Distributor holding a single handler.
///
/// The degenerate fan-out: useful as the leaf of a composition tree or as a
/// uniform stand-in where the handler count happens to be one.
#[derive(Default)]
pub struct SingleDistributor<T> {
    handler: Option<(HandlerId, Box<dyn Handler<T>>)>,
    next_id: u64,
    started: bool,
}

impl<T> SingleDistributor<T> {
    pub fn new() -> Self {
        Self {
            handler: None,
            next_id: 0,
            started: false,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.handler.is_none()
    }
}

impl<T> Distributor<T> for SingleDistributor<T> {
    fn add_handler(&mut self, handler: Box<dyn Handler<T>>) -> Result<HandlerId> {
        if self.started {
            return Err(BusError::AlreadyStarted);
        }
        if self.handler.is_some() {
            return Err(BusError::HandlerSlotOccupied);
        }
        let id = HandlerId(self.next_id);
        self.next_id += 1;
        self.handler = Some((id, handler));
        Ok(id)
    }

    fn remove_handler(&mut self, id: HandlerId) -> Result<Box<dyn Handler<T>>> {
        if self.started {
            return Err(BusError::AlreadyStarted);
        }
        match self.handler.take() {
            Some((held, mut handler)) if held == id => {
                handler.signal(STOP_IMMEDIATELY);
                handler.join();
                Ok(handler)
            }
            other => {
                self.handler = other;
                Err(BusError::UnknownHandler)
            }
        }
    }

    fn distribute(&mut self, msg: &T) {
        if let Some((_, handler)) = &mut self.handler {
            handler.process(msg);
        }
    }

    fn start(&mut self) -> Result<()> {
        if self.started {
            return Err(BusError::AlreadyStarted);
        }
        if let Some((_, handler)) = &mut self.handler {
            handler.start()?;
        }
        self.started = true;
        Ok(())
    }

    fn signal(&mut self, stop_sequence: i64) {
        if let Some((_, handler)) = &mut self.handler {
            handler.signal(stop_sequence);
        }
    }

    fn join(&mut self) {
        if let Some((_, handler)) = &mut self.handler {
            handler.join();
        }
    }
}

impl<T> std::fmt::Debug for SingleDistributor<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SingleDistributor")
            .field("occupied", &self.handler.is_some())
            .field("started", &self.started)
            .finish()
    }
}
