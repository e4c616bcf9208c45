//! Lifecycle and message events, and the bus that fans them out.

use std::fmt;
use std::sync::{Arc, Mutex, PoisonError};

use tokio::sync::mpsc;

use crate::Error;
use crate::protocol::ProtocolMessage;

/// Why a connection ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DisconnectCause {
    /// The server sent a close frame.
    Closed { code: u16, reason: String },
    /// The stream ended without a close frame.
    StreamEnded,
    /// A transport error broke the connection.
    Transport(String),
    /// No probe response arrived within one heartbeat period.
    HeartbeatTimeout,
    /// [`terminate`](crate::ConnectionManager::terminate) was called.
    Terminated,
}

impl fmt::Display for DisconnectCause {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Closed { code, reason } if reason.is_empty() => write!(f, "closed ({code})"),
            Self::Closed { code, reason } => write!(f, "closed ({code}): {reason}"),
            Self::StreamEnded => write!(f, "stream ended"),
            Self::Transport(e) => write!(f, "transport error: {e}"),
            Self::HeartbeatTimeout => write!(f, "heartbeat timeout"),
            Self::Terminated => write!(f, "terminated"),
        }
    }
}

/// Events published by a [`ConnectionManager`](crate::ConnectionManager).
#[derive(Debug, Clone)]
pub enum Event {
    /// A connection was opened (initially or after a reconnect).
    Connected,
    /// The active connection ended.
    Disconnected { cause: DisconnectCause },
    /// A connection attempt or the transport failed.
    Error { error: Arc<Error> },
    /// A frame decoded into a protocol message.
    Message {
        message: ProtocolMessage,
        raw: String,
    },
    /// The server's signal arrived and was acknowledged.
    SignalReceived,
    /// Reconnecting was abandoned after `attempts` retries.
    MaxRetriesReached { attempts: u32 },
    /// [`terminate`](crate::ConnectionManager::terminate) completed.
    Terminated,
}

impl Event {
    /// Channel name of this event.
    pub fn name(&self) -> &'static str {
        match self {
            Event::Connected => "connected",
            Event::Disconnected { .. } => "disconnected",
            Event::Error { .. } => "error",
            Event::Message { .. } => "message",
            Event::SignalReceived => "signal-received",
            Event::MaxRetriesReached { .. } => "max-retries-reached",
            Event::Terminated => "terminated",
        }
    }
}

/// Fans events out to every live subscriber, in publish order.
///
/// Each subscriber has its own unbounded queue, so a slow consumer neither
/// misses events nor holds up the publisher.
#[derive(Debug, Default)]
pub struct EventBus {
    subscribers: Mutex<Vec<mpsc::UnboundedSender<Event>>>,
}

impl EventBus {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a subscriber. It sees every event published from now on.
    pub fn subscribe(&self) -> Subscription {
        let (tx, rx) = mpsc::unbounded_channel();
        self.lock().push(tx);
        Subscription { rx }
    }

    /// Deliver `event` to all subscribers, dropping the ones that have gone.
    pub fn publish(&self, event: Event) {
        tracing::trace!(event = event.name(), "publishing event");
        self.lock().retain(|tx| tx.send(event.clone()).is_ok());
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Vec<mpsc::UnboundedSender<Event>>> {
        // The list stays consistent even if a holder panicked mid-publish.
        self.subscribers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }
}

/// Receiving end of an [`EventBus`] registration.
#[derive(Debug)]
pub struct Subscription {
    rx: mpsc::UnboundedReceiver<Event>,
}

impl Subscription {
    /// Receive the next event. Returns `None` once the bus is gone and the
    /// queue is drained.
    pub async fn next(&mut self) -> Option<Event> {
        self.rx.recv().await
    }

    /// Take an already-queued event without waiting.
    pub fn try_next(&mut self) -> Option<Event> {
        self.rx.try_recv().ok()
    }
}
