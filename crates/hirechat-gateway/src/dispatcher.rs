use std::sync::Arc;

use serde::Serialize;
use tokio::sync::broadcast;
use tokio::sync::broadcast::error::{RecvError, TryRecvError};
use tracing::{debug, warn};

use hirechat_types::events::{Broadcaster, ChatEvent};

/// An event together with the channel it was published on.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Envelope {
    pub channel: String,
    pub event: String,
    pub payload: ChatEvent,
}

impl Envelope {
    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string(self)
    }
}

/// Fans chat events out to in-process subscribers.
#[derive(Clone)]
pub struct Dispatcher {
    inner: Arc<DispatcherInner>,
}

struct DispatcherInner {
    /// Every subscriber receives every envelope; channel filtering happens on
    /// the receiving side.
    broadcast_tx: broadcast::Sender<Envelope>,
}

impl Default for Dispatcher {
    fn default() -> Self {
        Self::new()
    }
}

impl Dispatcher {
    pub fn new() -> Self {
        Self::with_capacity(1024)
    }

    pub fn with_capacity(capacity: usize) -> Self {
        let (broadcast_tx, _) = broadcast::channel(capacity);
        Self {
            inner: Arc::new(DispatcherInner { broadcast_tx }),
        }
    }

    /// Subscribe to all channels.
    pub fn subscribe(&self) -> broadcast::Receiver<Envelope> {
        self.inner.broadcast_tx.subscribe()
    }

    /// Subscribe to a single channel, e.g. `conversation.42`.
    pub fn subscribe_channel(&self, channel: impl Into<String>) -> ChannelSubscription {
        ChannelSubscription {
            channel: channel.into(),
            rx: self.subscribe(),
        }
    }

    pub fn subscriber_count(&self) -> usize {
        self.inner.broadcast_tx.receiver_count()
    }

    pub fn broadcast(&self, envelope: Envelope) {
        // No receivers is not an error: nobody is listening right now.
        let _ = self.inner.broadcast_tx.send(envelope);
    }
}

impl Broadcaster for Dispatcher {
    fn publish(&self, channel: &str, event: ChatEvent) {
        debug!("Publishing {} on {}", event.name(), channel);
        self.broadcast(Envelope {
            channel: channel.to_string(),
            event: event.name().to_string(),
            payload: event,
        });
    }
}

pub struct ChannelSubscription {
    channel: String,
    rx: broadcast::Receiver<Envelope>,
}

impl ChannelSubscription {
    pub fn channel(&self) -> &str {
        &self.channel
    }

    /// Next event on this channel, or `None` once the dispatcher is gone.
    /// Events dropped because this subscriber fell behind are skipped.
    pub async fn recv(&mut self) -> Option<ChatEvent> {
        loop {
            match self.rx.recv().await {
                Ok(envelope) if envelope.channel == self.channel => return Some(envelope.payload),
                Ok(_) => continue,
                Err(RecvError::Lagged(skipped)) => {
                    warn!("Subscriber on {} lagged, {} event(s) dropped", self.channel, skipped);
                }
                Err(RecvError::Closed) => return None,
            }
        }
    }

    /// Non-blocking variant of [`recv`](Self::recv).
    pub fn try_recv(&mut self) -> Option<ChatEvent> {
        loop {
            match self.rx.try_recv() {
                Ok(envelope) if envelope.channel == self.channel => return Some(envelope.payload),
                Ok(_) => continue,
                Err(TryRecvError::Lagged(skipped)) => {
                    warn!("Subscriber on {} lagged, {} event(s) dropped", self.channel, skipped);
                }
                Err(TryRecvError::Empty | TryRecvError::Closed) => return None,
            }
        }
    }
}
