//! Ordered queue of channel requests made before (or while) a connection is up.
//!
//! Writes are accepted as soon as a backend exists. The connection task
//! drains the queue once the channel is open, so input issued during the
//! handshake arrives in the order it was issued.

use tokio::sync::mpsc;

use super::Signal;
use super::config::TerminalSize;
use crate::error::{Result, TransportError};

/// A request for the connection task.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum Outgoing {
    Data(Vec<u8>),
    Resize(TerminalSize),
    Signal(Signal),
    Close,
}

/// Producer half, held by the backend.
#[derive(Debug, Clone)]
pub(crate) struct Outbox {
    tx: mpsc::UnboundedSender<Outgoing>,
}

/// Consumer half, owned by the connection task.
#[derive(Debug)]
pub(crate) struct OutboxReceiver {
    rx: mpsc::UnboundedReceiver<Outgoing>,
}

pub(crate) fn outbox() -> (Outbox, OutboxReceiver) {
    let (tx, rx) = mpsc::unbounded_channel();
    (Outbox { tx }, OutboxReceiver { rx })
}

impl Outbox {
    pub fn push(&self, item: Outgoing) -> Result<()> {
        self.tx
            .send(item)
            .map_err(|_| TransportError::Disconnected.into())
    }
}

impl OutboxReceiver {
    pub async fn recv(&mut self) -> Option<Outgoing> {
        self.rx.recv().await
    }
}
