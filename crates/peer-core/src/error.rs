//! Error types for peer-core
//!
//! The four user-facing failures ([`RegistrationError`], [`DialError`],
//! [`CaptureError`], [`SendError`]) are all local and recoverable: the caller
//! decides whether to retry. A remote hang-up or transport drop is never an
//! error here; it surfaces as a `Closed` connection instead.

use thiserror::Error;

/// Result type for agent/controller operations
pub type PeerResult<T> = Result<T, PeerError>;

/// Result type for capture operations
pub type CaptureResult<T> = Result<T, CaptureError>;

/// Failure reported by the external rendezvous/signaling transport
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum TransportError {
    /// Another agent already holds the identity
    #[error("identity '{0}' is already registered")]
    NameTaken(String),

    /// The rendezvous service cannot be reached
    #[error("rendezvous service unreachable: {0}")]
    Unreachable(String),

    /// No agent is registered under the identity
    #[error("peer '{0}' not found")]
    PeerNotFound(String),

    /// Channel negotiation failed or timed out
    #[error("negotiation failed: {0}")]
    NegotiationFailed(String),

    /// The channel is already closed
    #[error("channel closed")]
    ChannelClosed,

    /// The media call id is unknown to the transport
    #[error("unknown media call {0}")]
    UnknownMediaCall(String),
}

/// Identity string rejected before it reached the transport
#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("invalid identity: {reason}")]
pub struct InvalidIdentity {
    pub reason: &'static str,
}

/// Registration of a display name failed
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum RegistrationError {
    #[error(transparent)]
    InvalidName(#[from] InvalidIdentity),

    /// Rendezvous service rejected the name
    #[error("name '{name}' is unavailable")]
    NameUnavailable { name: String },

    #[error("rendezvous service unreachable: {reason}")]
    Unreachable { reason: String },
}

impl RegistrationError {
    pub(crate) fn from_transport(name: &str, err: TransportError) -> Self {
        match err {
            TransportError::NameTaken(_) => RegistrationError::NameUnavailable { name: name.to_string() },
            TransportError::Unreachable(reason) => RegistrationError::Unreachable { reason },
            other => RegistrationError::Unreachable { reason: other.to_string() },
        }
    }
}

/// Opening a connection to a remote identity failed
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum DialError {
    #[error(transparent)]
    InvalidIdentity(#[from] InvalidIdentity),

    #[error("cannot dial own identity '{0}'")]
    SelfDial(String),

    /// Nobody is registered under the remote identity
    #[error("remote '{remote}' not found")]
    NotFound { remote: String },

    /// The transport gave up negotiating the channel
    #[error("negotiation with '{remote}' failed: {reason}")]
    NegotiationFailed { remote: String, reason: String },

    #[error("rendezvous service unreachable: {reason}")]
    Unreachable { reason: String },

    /// The pending dial was superseded by a hang-up or a newer dial
    #[error("dial to '{remote}' was cancelled")]
    Cancelled { remote: String },
}

impl DialError {
    pub fn not_found(remote: impl Into<String>) -> Self {
        Self::NotFound { remote: remote.into() }
    }

    pub fn cancelled(remote: impl Into<String>) -> Self {
        Self::Cancelled { remote: remote.into() }
    }

    pub(crate) fn from_transport(remote: &str, err: TransportError) -> Self {
        match err {
            TransportError::PeerNotFound(_) => DialError::not_found(remote),
            TransportError::Unreachable(reason) => DialError::Unreachable { reason },
            other => DialError::NegotiationFailed {
                remote: remote.to_string(),
                reason: other.to_string(),
            },
        }
    }
}

/// Local audio/video capture could not be acquired
///
/// Never fatal to a connection: the call degrades to chat-only.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum CaptureError {
    #[error("capture permission denied")]
    PermissionDenied,

    #[error("no capture device available")]
    NoDevice,

    #[error("capture device error: {0}")]
    Device(String),
}

/// A chat message could not be transmitted
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum SendError {
    /// No connection is open
    #[error("no open connection")]
    NotOpen,

    #[error("transport refused message: {0}")]
    Transport(#[from] TransportError),
}

/// Umbrella error for the agent facade and controller handle
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum PeerError {
    #[error(transparent)]
    Registration(#[from] RegistrationError),

    #[error(transparent)]
    Dial(#[from] DialError),

    #[error(transparent)]
    Send(#[from] SendError),

    #[error("invalid configuration: {0}")]
    Config(String),

    /// An intent other than `register` arrived before registration
    #[error("agent is not registered")]
    NotRegistered,

    #[error("agent is already registered as '{0}'")]
    AlreadyRegistered(String),

    /// The session handle's inbound dials are already consumed by another controller
    #[error("session handle is already driven by a controller")]
    HandleInUse,

    /// The controller event loop has stopped
    #[error("controller has shut down")]
    Shutdown,
}

impl PeerError {
    pub fn config(message: impl Into<String>) -> Self {
        Self::Config(message.into())
    }
}
