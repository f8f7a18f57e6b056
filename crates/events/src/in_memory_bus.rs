//! Single-process bus: feeds batches to workers and fans snapshots out to
//! subscribers in the same address space.
//!
//! Subscribers only see messages published after they joined. Closing the
//! bus disconnects every subscription, which is how an in-process record
//! source signals "no more batches" to its ingest workers.

use std::sync::{Mutex, mpsc};

use thiserror::Error;

use crate::bus::{EventBus, Subscription};

#[derive(Debug, Error, PartialEq, Eq)]
pub enum InMemoryBusError {
    #[error("bus state lock poisoned")]
    Poisoned,
    #[error("bus is closed")]
    Closed,
}

#[derive(Debug)]
struct Fanout<M> {
    senders: Vec<mpsc::Sender<M>>,
    closed: bool,
}

#[derive(Debug)]
pub struct InMemoryEventBus<M> {
    fanout: Mutex<Fanout<M>>,
}

impl<M> InMemoryEventBus<M> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Live subscriptions, as of the last publish.
    pub fn subscriber_count(&self) -> usize {
        self.fanout.lock().map_or(0, |f| f.senders.len())
    }

    /// Stop accepting messages and disconnect every subscriber.
    ///
    /// Messages already queued stay readable; afterwards `recv*` report
    /// disconnection. Closing twice is a no-op.
    pub fn close(&self) {
        if let Ok(mut fanout) = self.fanout.lock() {
            fanout.closed = true;
            fanout.senders.clear();
        }
    }

    pub fn is_closed(&self) -> bool {
        self.fanout.lock().map_or(true, |f| f.closed)
    }
}

impl<M> Default for InMemoryEventBus<M> {
    fn default() -> Self {
        Self {
            fanout: Mutex::new(Fanout {
                senders: Vec::new(),
                closed: false,
            }),
        }
    }
}

impl<M> EventBus<M> for InMemoryEventBus<M>
where
    M: Clone + Send + 'static,
{
    type Error = InMemoryBusError;

    fn publish(&self, message: M) -> Result<(), Self::Error> {
        let mut fanout = self.fanout.lock().map_err(|_| InMemoryBusError::Poisoned)?;
        if fanout.closed {
            return Err(InMemoryBusError::Closed);
        }

        // A failed send means the subscription was dropped.
        fanout.senders.retain(|tx| tx.send(message.clone()).is_ok());
        Ok(())
    }

    fn subscribe(&self) -> Subscription<M> {
        let (tx, rx) = mpsc::channel();

        // Closed or poisoned: `tx` drops here and the subscription reads as
        // disconnected.
        if let Ok(mut fanout) = self.fanout.lock() {
            if !fanout.closed {
                fanout.senders.push(tx);
            }
        }

        Subscription::new(rx)
    }
}
