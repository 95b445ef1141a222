use std::sync::Arc;

use dashmap::DashMap;
use tokio::sync::mpsc;
use tracing::debug;

use crate::events::SessionEvent;

const CHANNEL_CAPACITY: usize = 256;

/// Per-session event channels, keyed by session id.
///
/// Single producer (the worker that owns the session), single consumer
/// (the SSE responder). Publishing to a session nobody subscribed to, or
/// whose subscriber went away, silently drops the event — the worker
/// always runs to completion regardless of delivery.
pub struct EventBus {
    channels: Arc<DashMap<String, mpsc::Sender<SessionEvent>>>,
}

impl EventBus {
    pub fn new() -> Self {
        Self {
            channels: Arc::new(DashMap::new()),
        }
    }

    /// Open the channel for a session. Must happen before the task is
    /// enqueued so the worker's `worker_ack` has somewhere to land.
    pub fn subscribe(&self, session_id: &str) -> SessionSubscription {
        let (tx, rx) = mpsc::channel(CHANNEL_CAPACITY);
        self.channels.insert(session_id.to_string(), tx);
        debug!(session_id, "session channel opened");
        SessionSubscription {
            session_id: session_id.to_string(),
            rx,
            channels: self.channels.clone(),
        }
    }

    /// Publish an event to a session channel. Returns `false` when the
    /// event was dropped (no subscriber, or subscriber gone).
    pub async fn publish(&self, session_id: &str, event: SessionEvent) -> bool {
        let Some(tx) = self.channels.get(session_id).map(|e| e.value().clone()) else {
            debug!(session_id, "publish dropped: no subscriber");
            return false;
        };
        if tx.send(event).await.is_err() {
            // subscriber dropped mid-session; tear the channel down
            self.channels.remove(session_id);
            debug!(session_id, "publish dropped: subscriber gone");
            return false;
        }
        true
    }

    pub fn active_sessions(&self) -> usize {
        self.channels.len()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}

/// The consuming end of a session channel. Dropping it unregisters the
/// channel, so a disconnected client stops delivery without touching the
/// worker.
pub struct SessionSubscription {
    pub session_id: String,
    pub(crate) rx: mpsc::Receiver<SessionEvent>,
    channels: Arc<DashMap<String, mpsc::Sender<SessionEvent>>>,
}

impl SessionSubscription {
    pub async fn recv(&mut self) -> Option<SessionEvent> {
        self.rx.recv().await
    }
}

impl Drop for SessionSubscription {
    fn drop(&mut self) {
        self.channels.remove(&self.session_id);
        debug!(session_id = %self.session_id, "session channel closed");
    }
}
