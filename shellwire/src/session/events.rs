//! Session event bus.

use bytes::Bytes;
use futures_core::Stream;
use futures_util::stream;
use log::warn;
use tokio::sync::broadcast::{self, error::RecvError};

use super::command::Command;
use crate::transport::ExitInfo;

/// Something that happened on a session.
#[derive(Debug, Clone)]
pub enum SessionEvent {
    /// Output chunk; `cid` is `None` when no visible command was running.
    Stdout { cid: Option<i64>, data: Bytes },

    Stderr { cid: Option<i64>, data: Bytes },

    /// A visible command found its boundary or failed.
    CommandFinished(Box<Command>),

    /// The tracked directory or user changed.
    ContextChanged {
        cwd: Option<String>,
        user: Option<String>,
    },

    /// The backend went away; always the last event.
    Disconnected(ExitInfo),
}

/// Adapt a broadcast receiver into a stream, skipping over lag.
pub(crate) fn into_stream(
    rx: broadcast::Receiver<SessionEvent>,
) -> impl Stream<Item = SessionEvent> + Send + 'static {
    stream::unfold(rx, |mut rx| async move {
        loop {
            match rx.recv().await {
                Ok(event) => return Some((event, rx)),
                Err(RecvError::Lagged(skipped)) => {
                    warn!("event subscriber lagged, {} events dropped", skipped);
                }
                Err(RecvError::Closed) => return None,
            }
        }
    })
}
