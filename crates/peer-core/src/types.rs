//! Core identifiers and state enums shared by every module

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

use crate::error::InvalidIdentity;

/// Longest identity accepted, in characters
pub const MAX_IDENTITY_LEN: usize = 64;

/// A self-chosen display name, unique within the rendezvous service
///
/// Opaque apart from basic hygiene: surrounding whitespace is trimmed and
/// empty, over-long or control-character names are rejected.
///
/// ```rust
/// use peerlink_peer_core::Identity;
///
/// let alice = Identity::new("  alice ").unwrap();
/// assert_eq!(alice.as_str(), "alice");
/// assert!(Identity::new("").is_err());
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Identity(String);

impl Identity {
    pub fn new(raw: impl AsRef<str>) -> Result<Self, InvalidIdentity> {
        let name = raw.as_ref().trim();
        if name.is_empty() {
            return Err(InvalidIdentity { reason: "identity is empty" });
        }
        if name.chars().count() > MAX_IDENTITY_LEN {
            return Err(InvalidIdentity { reason: "identity is longer than 64 characters" });
        }
        if name.chars().any(char::is_control) {
            return Err(InvalidIdentity { reason: "identity contains control characters" });
        }
        Ok(Self(name.to_string()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Identity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl std::str::FromStr for Identity {
    type Err = InvalidIdentity;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::new(s)
    }
}

/// Unique id of one Connection object
///
/// Every dial or accepted inbound dial gets a fresh id; a closed connection
/// is never reopened, so events tagged with an old id can be recognised as
/// stale.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ConnectionId(pub Uuid);

impl ConnectionId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for ConnectionId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Which side of a connection we are
///
/// Fixed when the connection is created. Only the caller ever originates a
/// media offer; the callee only answers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Role {
    /// We issued the dial
    Caller,
    /// We received the inbound dial
    Callee,
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Role::Caller => write!(f, "caller"),
            Role::Callee => write!(f, "callee"),
        }
    }
}

/// Transport-level state of a connection
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ConnectionState {
    /// Created, channel not yet established
    Pending,
    /// Channel established; media and chat are live
    Open,
    /// Terminal
    Closed,
}

/// The states the rendering layer presents
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum LifecycleState {
    /// No identity registered yet
    Unnamed,
    /// Registered, no current connection
    Idle,
    /// A current connection exists but is not open yet
    Pending,
    /// The current connection is open
    Active,
}

impl fmt::Display for LifecycleState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            LifecycleState::Unnamed => "unnamed",
            LifecycleState::Idle => "idle",
            LifecycleState::Pending => "pending",
            LifecycleState::Active => "active",
        };
        f.write_str(name)
    }
}

/// Why a connection reached `Closed`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum CloseReason {
    /// `hang_up()` was called locally
    LocalHangUp,
    /// The remote side closed the channel
    RemoteHangUp,
    /// The transport reported a failure
    TransportFailure(String),
    /// A newer outgoing dial replaced this connection
    Replaced,
    /// The controller shut down
    Shutdown,
}

/// Snapshot of the current connection
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConnectionInfo {
    pub id: ConnectionId,
    pub local: Identity,
    pub remote: Identity,
    pub role: Role,
    pub state: ConnectionState,
    pub created_at: DateTime<Utc>,
    pub opened_at: Option<DateTime<Utc>>,
    /// A local capture or remote stream is currently rendered
    pub media_live: bool,
}
