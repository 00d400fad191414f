//! Common infrastructure for the peerlink crates.
//!
//! - [`logging`]: subscriber setup and component log contexts
//! - [`config`]: loading TOML configuration files into typed structs
//! - [`errors`]: the shared infrastructure error type

pub mod config;
pub mod errors;
pub mod logging;

pub use errors::types::{Error, Result};
pub use logging::setup::{setup_logging, LoggingConfig};
