//! Identity registration
//!
//! Binds a locally chosen display name to a [`SessionHandle`] on the
//! rendezvous service. The handle is the agent's registered presence: it
//! never changes and lives until the process drops it.

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use std::fmt;
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{info, warn};

use crate::error::RegistrationError;
use crate::transport::{Dialer, LinkHandle, Rendezvous};
use crate::types::Identity;

/// The local agent's registered presence
pub struct SessionHandle {
    identity: Identity,
    dialer: Arc<dyn Dialer>,
    inbound: Mutex<Option<mpsc::UnboundedReceiver<LinkHandle>>>,
    registered_at: DateTime<Utc>,
}

impl fmt::Debug for SessionHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SessionHandle")
            .field("identity", &self.identity)
            .field("registered_at", &self.registered_at)
            .finish_non_exhaustive()
    }
}

impl SessionHandle {
    pub fn identity(&self) -> &Identity {
        &self.identity
    }

    pub fn registered_at(&self) -> DateTime<Utc> {
        self.registered_at
    }

    /// Inbound dial notifications; can be taken exactly once
    pub(crate) fn take_inbound(&self) -> Option<mpsc::UnboundedReceiver<LinkHandle>> {
        self.inbound.lock().take()
    }

    pub(crate) fn dialer(&self) -> Arc<dyn Dialer> {
        Arc::clone(&self.dialer)
    }
}

/// Register `name` with the rendezvous service
///
/// No retries: on failure the caller decides whether to try again, possibly
/// with a different name.
pub async fn register(rendezvous: &dyn Rendezvous, name: &str) -> Result<SessionHandle, RegistrationError> {
    let identity = Identity::new(name)?;

    let binding = rendezvous.register(&identity).await.map_err(|e| {
        warn!("Registration of '{}' failed: {}", identity, e);
        RegistrationError::from_transport(identity.as_str(), e)
    })?;

    info!("Registered as '{}'", identity);
    Ok(SessionHandle {
        identity,
        dialer: binding.dialer,
        inbound: Mutex::new(Some(binding.inbound)),
        registered_at: Utc::now(),
    })
}
