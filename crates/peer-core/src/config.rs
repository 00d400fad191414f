//! Peer agent configuration

use serde::{Deserialize, Serialize};

use crate::capture::MediaConstraints;
use crate::error::{PeerError, PeerResult};

pub const DEFAULT_EVENT_CAPACITY: usize = 256;
pub const DEFAULT_COMMAND_CAPACITY: usize = 64;

/// What to do with an inbound dial while a connection is current
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BusyPolicy {
    /// Drop the dial without a word; what the second caller then sees is up
    /// to the transport (the memory rendezvous closes a dropped end)
    #[default]
    Ignore,
    /// Close the second caller's link so it observes `Closed`
    Reject,
}

impl std::str::FromStr for BusyPolicy {
    type Err = PeerError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "ignore" => Ok(BusyPolicy::Ignore),
            "reject" => Ok(BusyPolicy::Reject),
            other => Err(PeerError::config(format!("unknown busy policy '{}'", other))),
        }
    }
}

/// Configuration for a peer agent
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PeerConfig {
    /// Constraints passed to the capture device on every `Open`
    pub media: MediaConstraints,
    pub busy_policy: BusyPolicy,
    /// Capacity of the event broadcast channel
    pub event_capacity: usize,
    /// Capacity of the controller command queue
    pub command_capacity: usize,
}

impl Default for PeerConfig {
    fn default() -> Self {
        Self {
            media: MediaConstraints::default(),
            busy_policy: BusyPolicy::default(),
            event_capacity: DEFAULT_EVENT_CAPACITY,
            command_capacity: DEFAULT_COMMAND_CAPACITY,
        }
    }
}

impl PeerConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_media(mut self, media: MediaConstraints) -> Self {
        self.media = media;
        self
    }

    pub fn with_busy_policy(mut self, policy: BusyPolicy) -> Self {
        self.busy_policy = policy;
        self
    }

    pub fn with_event_capacity(mut self, capacity: usize) -> Self {
        self.event_capacity = capacity;
        self
    }

    pub fn with_command_capacity(mut self, capacity: usize) -> Self {
        self.command_capacity = capacity;
        self
    }

    /// Validate the configuration
    pub fn validate(&self) -> PeerResult<()> {
        if self.media.is_empty() {
            return Err(PeerError::config("media constraints request neither audio nor video"));
        }
        if self.event_capacity == 0 {
            return Err(PeerError::config("event_capacity must be greater than zero"));
        }
        if self.command_capacity == 0 {
            return Err(PeerError::config("command_capacity must be greater than zero"));
        }
        Ok(())
    }
}
