//! Status push
//!
//! The orchestrator publishes typed `StatusEvent`s and never waits on
//! delivery. Transports subscribe to the receiving end of a channel.

use crate::models::StatusEvent;
use tokio::sync::mpsc;
use tracing::debug;
use uuid::Uuid;

/// Fire-and-forget status sink
pub trait StatusSink: Send + Sync {
    fn publish(&self, session_id: Uuid, event: StatusEvent);
}

/// Sink over a bounded channel. Events are dropped when the channel is
/// full or closed.
#[derive(Clone)]
pub struct ChannelStatusSink {
    tx: mpsc::Sender<(Uuid, StatusEvent)>,
}

impl ChannelStatusSink {
    pub fn new(capacity: usize) -> (Self, mpsc::Receiver<(Uuid, StatusEvent)>) {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        (Self { tx }, rx)
    }
}

impl StatusSink for ChannelStatusSink {
    fn publish(&self, session_id: Uuid, event: StatusEvent) {
        if let Err(e) = self.tx.try_send((session_id, event)) {
            debug!(session_id = %session_id, error = %e, "Status event dropped");
        }
    }
}

/// Discards every event
pub struct NoopStatusSink;

impl StatusSink for NoopStatusSink {
    fn publish(&self, _session_id: Uuid, _event: StatusEvent) {}
}
