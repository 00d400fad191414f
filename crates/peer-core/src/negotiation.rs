//! Connection negotiation
//!
//! A [`Connection`] is the logical duplex session between two identities.
//! The transport is symmetric, so the role is decided here: whoever issued
//! the dial is the `Caller`, whoever received the inbound notification is
//! the `Callee`. The role is fixed at construction.
//!
//! State machine:
//!
//! ```text
//! Pending ──(channel established)──▶ Open
//!    │                                 │
//!    └──────(close / failure)──────────┴──▶ Closed (terminal)
//! ```

use chrono::{DateTime, Utc};
use std::sync::Arc;
use tracing::{debug, info};

use crate::error::DialError;
use crate::registration::SessionHandle;
use crate::transport::{LinkHandle, PeerLink};
use crate::types::{ConnectionId, ConnectionInfo, ConnectionState, Identity, Role};

/// One logical session between the local and a remote identity
#[derive(Debug)]
pub struct Connection {
    id: ConnectionId,
    local: Identity,
    remote: Identity,
    role: Role,
    state: ConnectionState,
    link: Option<Arc<dyn PeerLink>>,
    created_at: DateTime<Utc>,
    opened_at: Option<DateTime<Utc>>,
}

impl Connection {
    /// Outgoing connection; the link is attached once the dial completes
    pub fn outgoing(local: Identity, remote: Identity) -> Self {
        Self::new(local, remote, Role::Caller, None)
    }

    /// Connection for an accepted inbound dial
    pub fn incoming(local: Identity, link: Arc<dyn PeerLink>) -> Self {
        let remote = link.remote().clone();
        Self::new(local, remote, Role::Callee, Some(link))
    }

    fn new(local: Identity, remote: Identity, role: Role, link: Option<Arc<dyn PeerLink>>) -> Self {
        let connection = Self {
            id: ConnectionId::new(),
            local,
            remote,
            role,
            state: ConnectionState::Pending,
            link,
            created_at: Utc::now(),
            opened_at: None,
        };
        debug!(
            "Created {} connection {} ({} -> {})",
            connection.role, connection.id, connection.local, connection.remote
        );
        connection
    }

    pub fn id(&self) -> ConnectionId {
        self.id
    }

    pub fn local(&self) -> &Identity {
        &self.local
    }

    pub fn remote(&self) -> &Identity {
        &self.remote
    }

    pub fn role(&self) -> Role {
        self.role
    }

    pub fn state(&self) -> ConnectionState {
        self.state
    }

    pub fn is_closed(&self) -> bool {
        self.state == ConnectionState::Closed
    }

    pub fn link(&self) -> Option<&Arc<dyn PeerLink>> {
        self.link.as_ref()
    }

    /// Attach the link produced by a completed dial
    ///
    /// Ignored once closed; the caller is then responsible for closing the
    /// link it holds.
    pub fn attach_link(&mut self, link: Arc<dyn PeerLink>) -> bool {
        if self.is_closed() || self.link.is_some() {
            return false;
        }
        self.link = Some(link);
        true
    }

    /// `Pending -> Open`; any other transition is refused
    pub fn mark_open(&mut self) -> bool {
        if self.state != ConnectionState::Pending || self.link.is_none() {
            return false;
        }
        self.state = ConnectionState::Open;
        self.opened_at = Some(Utc::now());
        info!("Connection {} with {} is open ({})", self.id, self.remote, self.role);
        true
    }

    /// Move to `Closed` and close the link; returns false if already closed
    pub fn close(&mut self) -> bool {
        if self.is_closed() {
            return false;
        }
        self.state = ConnectionState::Closed;
        if let Some(link) = &self.link {
            link.close();
        }
        info!("Connection {} with {} closed", self.id, self.remote);
        true
    }

    pub fn info(&self, media_live: bool) -> ConnectionInfo {
        ConnectionInfo {
            id: self.id,
            local: self.local.clone(),
            remote: self.remote.clone(),
            role: self.role,
            state: self.state,
            created_at: self.created_at,
            opened_at: self.opened_at,
            media_live,
        }
    }
}

/// Validate `remote` before dialing it from `handle`
pub fn dial_target(handle: &SessionHandle, remote: &str) -> Result<Identity, DialError> {
    let remote = Identity::new(remote)?;
    if &remote == handle.identity() {
        return Err(DialError::SelfDial(remote.to_string()));
    }
    Ok(remote)
}

/// Ask the transport for a link to `remote`
///
/// Surfaces whatever failure the transport reports; no timer of its own.
pub async fn dial(handle: &SessionHandle, remote: &Identity) -> Result<LinkHandle, DialError> {
    let dialer = handle.dialer();
    dialer
        .dial(remote)
        .await
        .map_err(|e| DialError::from_transport(remote.as_str(), e))
}
