//! Rendezvous/signaling transport boundary
//!
//! The transport is an external collaborator: it lets an agent register
//! under an identity, dial another identity, and exchange data and media
//! offers over the resulting duplex link. This module only defines the
//! contract; [`memory`] provides an in-process implementation.
//!
//! Link operations (`send`, `offer_media`, `answer_media`, `decline_media`,
//! `close`) are non-blocking enqueues. Everything the remote side does
//! arrives as a [`LinkEvent`] on the receiver handed out with the link.

pub mod memory;

use async_trait::async_trait;
use bytes::Bytes;
use std::fmt;
use std::sync::Arc;
use tokio::sync::mpsc;
use uuid::Uuid;

use crate::capture::MediaStream;
use crate::error::TransportError;
use crate::types::Identity;

pub type TransportResult<T> = Result<T, TransportError>;

/// Id of one media offer/answer exchange on a link
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct MediaCallId(pub Uuid);

impl MediaCallId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for MediaCallId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for MediaCallId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Events delivered by a link
#[derive(Debug, Clone)]
pub enum LinkEvent {
    /// Channel established
    Opened,
    /// Payload sent by the remote side
    Data(Bytes),
    /// Remote side offers media
    MediaOffer { call: MediaCallId },
    /// Remote side declined our offer
    MediaDeclined { call: MediaCallId },
    /// A remote stream became available for a media call
    RemoteStream { call: MediaCallId, stream: MediaStream },
    /// Remote side closed the channel
    Closed,
    /// The channel broke
    Failed(String),
}

/// One end of a duplex link between two identities
pub trait PeerLink: Send + Sync + fmt::Debug {
    /// Identity at the other end
    fn remote(&self) -> &Identity;

    /// Queue a data payload
    fn send(&self, payload: Bytes) -> TransportResult<()>;

    /// Offer a local stream; the remote receives `MediaOffer`
    fn offer_media(&self, stream: &MediaStream) -> TransportResult<MediaCallId>;

    /// Answer a received offer with a local stream
    fn answer_media(&self, call: MediaCallId, stream: &MediaStream) -> TransportResult<()>;

    /// Refuse a received offer
    fn decline_media(&self, call: MediaCallId) -> TransportResult<()>;

    /// Close the link; idempotent
    fn close(&self);

    fn is_closed(&self) -> bool;
}

/// A link plus the receiver for its events
#[derive(Debug)]
pub struct LinkHandle {
    pub link: Arc<dyn PeerLink>,
    pub events: mpsc::UnboundedReceiver<LinkEvent>,
}

/// Opens links to other identities on behalf of a registered agent
#[async_trait]
pub trait Dialer: Send + Sync {
    async fn dial(&self, remote: &Identity) -> TransportResult<LinkHandle>;
}

/// What a successful registration yields
pub struct Binding {
    pub dialer: Arc<dyn Dialer>,
    /// Inbound dials addressed to the registered identity
    pub inbound: mpsc::UnboundedReceiver<LinkHandle>,
}

impl fmt::Debug for Binding {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Binding").finish_non_exhaustive()
    }
}

/// The rendezvous service
#[async_trait]
pub trait Rendezvous: Send + Sync {
    /// Claim `identity`; first registration wins
    async fn register(&self, identity: &Identity) -> TransportResult<Binding>;
}
