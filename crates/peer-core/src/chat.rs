//! Chat channel and transcript
//!
//! Text messages ride the connection's data channel as UTF-8 payloads. The
//! transcript is append-only, in local observation order, and scoped to one
//! connection: a new connection starts a new [`ChatChannel`].

use bytes::Bytes;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;
use tracing::{debug, warn};

use crate::error::SendError;
use crate::events::{EventEmitter, PeerEvent};
use crate::transport::PeerLink;
use crate::types::{ConnectionId, Identity};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum MessageDirection {
    Sent,
    Received,
}

/// Monotonic message id: microseconds since the epoch, clamped to increase
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct MessageId(pub u64);

impl fmt::Display for MessageId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub id: MessageId,
    pub author: Identity,
    pub body: String,
    pub sent_at: DateTime<Utc>,
    pub direction: MessageDirection,
}

/// Transcript row as the rendering layer shows it
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TranscriptEntry {
    pub author: Identity,
    pub body: String,
    pub time: DateTime<Utc>,
}

/// Append-only message history of one connection
#[derive(Debug, Clone, Default)]
pub struct Transcript {
    messages: Vec<ChatMessage>,
    last_id: u64,
}

impl Transcript {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a message stamped now
    pub fn append(&mut self, author: Identity, body: String, direction: MessageDirection) -> ChatMessage {
        let sent_at = Utc::now();
        let micros = u64::try_from(sent_at.timestamp_micros()).unwrap_or(0);
        let id = micros.max(self.last_id.saturating_add(1));
        self.last_id = id;

        let message = ChatMessage {
            id: MessageId(id),
            author,
            body,
            sent_at,
            direction,
        };
        self.messages.push(message.clone());
        message
    }

    pub fn messages(&self) -> &[ChatMessage] {
        &self.messages
    }

    pub fn len(&self) -> usize {
        self.messages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }

    /// Ordered `{author, body, time}` rows
    pub fn view(&self) -> Vec<TranscriptEntry> {
        self.messages
            .iter()
            .map(|m| TranscriptEntry {
                author: m.author.clone(),
                body: m.body.clone(),
                time: m.sent_at,
            })
            .collect()
    }
}

/// Chat over the data channel of one open connection
#[derive(Debug)]
pub struct ChatChannel {
    connection: ConnectionId,
    local: Identity,
    remote: Identity,
    link: Arc<dyn PeerLink>,
    transcript: Transcript,
    events: EventEmitter,
}

impl ChatChannel {
    pub fn new(
        connection: ConnectionId,
        local: Identity,
        link: Arc<dyn PeerLink>,
        events: EventEmitter,
    ) -> Self {
        let remote = link.remote().clone();
        Self {
            connection,
            local,
            remote,
            link,
            transcript: Transcript::new(),
            events,
        }
    }

    /// Transmit `body`; appended as `Sent` only if the transport accepted it
    pub fn send(&mut self, body: impl Into<String>) -> Result<ChatMessage, SendError> {
        let body = body.into();
        if self.link.is_closed() {
            return Err(SendError::NotOpen);
        }
        self.link.send(Bytes::from(body.clone().into_bytes()))?;

        let message = self.transcript.append(self.local.clone(), body, MessageDirection::Sent);
        debug!("Sent message {} on {}", message.id, self.connection);
        self.events.emit(PeerEvent::MessageSent {
            connection: self.connection,
            message: message.clone(),
        });
        Ok(message)
    }

    /// Handle an inbound data payload
    pub fn on_data(&mut self, payload: Bytes) -> ChatMessage {
        let body = match String::from_utf8(payload.to_vec()) {
            Ok(body) => body,
            Err(e) => {
                warn!("Non UTF-8 chat payload from {} on {}", self.remote, self.connection);
                String::from_utf8_lossy(e.as_bytes()).into_owned()
            }
        };

        let message = self.transcript.append(self.remote.clone(), body, MessageDirection::Received);
        debug!("Received message {} on {}", message.id, self.connection);
        self.events.emit(PeerEvent::MessageReceived {
            connection: self.connection,
            message: message.clone(),
        });
        message
    }

    pub fn transcript(&self) -> &Transcript {
        &self.transcript
    }
}
