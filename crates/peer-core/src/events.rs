//! Event system for the rendering layer
//!
//! Everything the rendering layer needs to present (state changes, chat
//! traffic, media attachment, failures) is published as a [`PeerEvent`] on a
//! broadcast channel. Connection-scoped events are never emitted after the
//! connection's `ConnectionClosed`.

use tokio::sync::broadcast;
use tokio_stream::wrappers::BroadcastStream;

use crate::chat::ChatMessage;
use crate::error::{CaptureError, DialError};
use crate::types::{CloseReason, ConnectionId, ConnectionInfo, Identity, LifecycleState, Role};

/// Events emitted by a peer agent
#[derive(Debug, Clone, PartialEq)]
pub enum PeerEvent {
    // Lifecycle events
    /// The presented lifecycle state changed
    StateChanged {
        previous: LifecycleState,
        current: LifecycleState,
    },

    /// Identity registration succeeded
    Registered {
        identity: Identity,
    },

    // Connection events
    /// An inbound dial was accepted as the current connection
    IncomingConnection {
        connection: ConnectionInfo,
    },

    /// A connection reached `Open`
    ConnectionOpened {
        connection: ConnectionInfo,
    },

    /// A connection reached `Closed`; its media and transcript are gone
    ConnectionClosed {
        connection: ConnectionId,
        remote: Identity,
        reason: CloseReason,
    },

    /// An inbound dial arrived while busy
    InboundDialIgnored {
        remote: Identity,
        /// The second caller's link was closed
        rejected: bool,
    },

    /// An outgoing dial failed
    DialFailed {
        remote: String,
        error: DialError,
    },

    // Media events
    /// Local capture failed; the connection continues chat-only
    CaptureFailed {
        connection: ConnectionId,
        error: CaptureError,
    },

    /// The local capture is rendered muted in the self-preview sink
    LocalPreviewStarted {
        connection: ConnectionId,
    },

    /// The caller originated its media offer
    MediaOfferSent {
        connection: ConnectionId,
    },

    /// The callee answered the inbound offer
    MediaAnswered {
        connection: ConnectionId,
    },

    /// A media offer was declined
    MediaDeclined {
        connection: ConnectionId,
        /// Which side declined
        by: Role,
    },

    /// The remote stream is rendered unmuted in the remote sink
    RemoteStreamReceived {
        connection: ConnectionId,
    },

    // Chat events
    MessageSent {
        connection: ConnectionId,
        message: ChatMessage,
    },

    MessageReceived {
        connection: ConnectionId,
        message: ChatMessage,
    },
}

/// Event stream type
pub type EventStream = BroadcastStream<PeerEvent>;

/// Simple event iterator that doesn't require StreamExt
pub struct EventIterator {
    stream: EventStream,
}

impl EventIterator {
    pub fn new(stream: EventStream) -> Self {
        Self { stream }
    }

    /// Next event; lagged gaps are skipped, `None` once the emitter is gone
    pub async fn next(&mut self) -> Option<PeerEvent> {
        use tokio_stream::StreamExt;
        loop {
            match self.stream.next().await {
                Some(Ok(event)) => return Some(event),
                Some(Err(_lagged)) => continue,
                None => return None,
            }
        }
    }
}

/// Event emitter for a peer agent
#[derive(Debug, Clone)]
pub struct EventEmitter {
    sender: broadcast::Sender<PeerEvent>,
}

impl EventEmitter {
    /// Create a new event emitter with the specified capacity
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity.max(1));
        Self { sender }
    }

    /// Emit an event
    pub fn emit(&self, event: PeerEvent) {
        // Ignore send errors (no receivers)
        let _ = self.sender.send(event);
    }

    /// Subscribe to events
    pub fn subscribe(&self) -> EventStream {
        BroadcastStream::new(self.sender.subscribe())
    }

    /// Subscribe to events with a simple iterator
    pub fn subscribe_simple(&self) -> EventIterator {
        EventIterator::new(self.subscribe())
    }

    /// Get the number of active receivers
    pub fn receiver_count(&self) -> usize {
        self.sender.receiver_count()
    }
}

impl Default for EventEmitter {
    fn default() -> Self {
        Self::new(crate::config::DEFAULT_EVENT_CAPACITY)
    }
}
