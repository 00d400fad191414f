//! High-level agent facade
//!
//! [`PeerAgent`] is the surface the rendering layer talks to. It accepts the
//! four user intents (`register`, `dial`, `send`, `hang_up`), answers state
//! queries, and publishes every change on one event stream that exists
//! before registration, so the `Unnamed -> Idle` transition is observable
//! too.
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use peerlink_peer_core::{MemoryRendezvous, MockCaptureDevice, RecordingSink};
//! use peerlink_peer_core::{MediaSinks, PeerAgent, PeerConfig};
//!
//! # async fn run() -> peerlink_peer_core::PeerResult<()> {
//! let rendezvous = Arc::new(MemoryRendezvous::new());
//! let agent = PeerAgent::new(
//!     rendezvous,
//!     Arc::new(MockCaptureDevice::new("cam")),
//!     MediaSinks::new(Arc::new(RecordingSink::new()), Arc::new(RecordingSink::new())),
//!     PeerConfig::default(),
//! )?;
//!
//! agent.register("alice").await?;
//! agent.dial("bob").await?;
//! agent.send("hi").await?;
//! agent.hang_up().await?;
//! # Ok(())
//! # }
//! ```

use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{info, warn};

use crate::capture::{CaptureDevice, MediaSinks};
use crate::chat::ChatMessage;
use crate::config::PeerConfig;
use crate::error::{PeerError, PeerResult};
use crate::events::{EventEmitter, EventStream};
use crate::lifecycle::LifecycleController;
use crate::registration;
use crate::transport::Rendezvous;
use crate::types::{ConnectionInfo, Identity, LifecycleState};

/// One end-user agent
pub struct PeerAgent {
    rendezvous: Arc<dyn Rendezvous>,
    capture: Arc<dyn CaptureDevice>,
    sinks: MediaSinks,
    config: PeerConfig,
    events: EventEmitter,
    controller: Mutex<Option<LifecycleController>>,
}

impl std::fmt::Debug for PeerAgent {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PeerAgent")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

impl PeerAgent {
    pub fn new(
        rendezvous: Arc<dyn Rendezvous>,
        capture: Arc<dyn CaptureDevice>,
        sinks: MediaSinks,
        config: PeerConfig,
    ) -> PeerResult<Self> {
        config.validate()?;
        let events = EventEmitter::new(config.event_capacity);
        Ok(Self {
            rendezvous,
            capture,
            sinks,
            config,
            events,
            controller: Mutex::new(None),
        })
    }

    /// Register under `name`; a failure leaves the agent unnamed
    pub async fn register(&self, name: &str) -> PeerResult<Identity> {
        let mut controller = self.controller.lock().await;
        if let Some(existing) = controller.as_ref() {
            return Err(PeerError::AlreadyRegistered(existing.identity().to_string()));
        }

        let handle = registration::register(self.rendezvous.as_ref(), name)
            .await
            .map_err(|e| {
                warn!("Agent stays unnamed: {}", e);
                PeerError::from(e)
            })?;
        let identity = handle.identity().clone();

        let spawned = LifecycleController::spawn_with_emitter(
            Arc::new(handle),
            Arc::clone(&self.capture),
            self.sinks.clone(),
            self.config.clone(),
            self.events.clone(),
        )?;
        *controller = Some(spawned);

        info!("Agent registered as '{}'", identity);
        Ok(identity)
    }

    pub async fn identity(&self) -> Option<Identity> {
        self.controller.lock().await.as_ref().map(|c| c.identity().clone())
    }

    pub async fn dial(&self, remote: &str) -> PeerResult<ConnectionInfo> {
        self.controller().await?.dial(remote).await
    }

    pub async fn send(&self, text: &str) -> PeerResult<ChatMessage> {
        self.controller().await?.send(text).await
    }

    pub async fn hang_up(&self) -> PeerResult<bool> {
        self.controller().await?.hang_up().await
    }

    pub async fn current(&self) -> PeerResult<Option<ConnectionInfo>> {
        self.controller().await?.current().await
    }

    pub async fn transcript(&self) -> PeerResult<Vec<ChatMessage>> {
        self.controller().await?.transcript().await
    }

    /// `Unnamed` until registration succeeds
    pub async fn state(&self) -> PeerResult<LifecycleState> {
        match self.controller.lock().await.clone() {
            Some(controller) => controller.state().await,
            None => Ok(LifecycleState::Unnamed),
        }
    }

    pub fn subscribe(&self) -> EventStream {
        self.events.subscribe()
    }

    pub fn events(&self) -> &EventEmitter {
        &self.events
    }

    /// Stop the controller, hanging up any current connection
    pub async fn shutdown(&self) -> PeerResult<()> {
        match self.controller.lock().await.clone() {
            Some(controller) => controller.shutdown().await,
            None => Ok(()),
        }
    }

    async fn controller(&self) -> PeerResult<LifecycleController> {
        self.controller.lock().await.clone().ok_or(PeerError::NotRegistered)
    }
}
