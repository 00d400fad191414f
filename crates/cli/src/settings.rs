//! Config file plus command-line overrides

use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::Path;

use peerlink_infra_common::config::load_toml;
use peerlink_infra_common::logging::{parse_log_level, LoggingConfig};
use peerlink_peer_core::PeerConfig;

/// Contents of a `--config` file
///
/// ```toml
/// [logging]
/// level = "debug"
///
/// [peer]
/// busy_policy = "reject"
///
/// [peer.media]
/// video = false
/// ```
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct Settings {
    pub logging: LoggingConfig,
    pub peer: PeerConfig,
}

impl Settings {
    /// Read `path` if given, otherwise start from defaults
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let settings: Settings = match path {
            Some(path) => load_toml(path).with_context(|| format!("loading {}", path.display()))?,
            None => Settings::default(),
        };
        settings.peer.validate().context("invalid [peer] settings")?;
        Ok(settings)
    }

    pub fn with_log_level(mut self, level: Option<&str>) -> Result<Self> {
        if let Some(level) = level {
            self.logging.level = parse_log_level(level)?;
        }
        Ok(self)
    }

    /// `--json-logs` can only switch JSON on
    pub fn with_json_logs(mut self, json: bool) -> Self {
        self.logging.json |= json;
        self
    }
}
