use thiserror::Error;

/// Result alias for infrastructure operations
pub type Result<T> = std::result::Result<T, Error>;

/// Errors raised by the shared infrastructure
#[derive(Debug, Error)]
pub enum Error {
    /// Invalid or unusable configuration value
    #[error("Configuration error: {0}")]
    Config(String),

    /// Reading a file failed
    #[error("I/O error on {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    /// A configuration file could not be parsed
    #[error("Failed to parse {path}: {message}")]
    Parse { path: String, message: String },

    /// The global subscriber could not be installed
    #[error("Logging setup failed: {0}")]
    Logging(String),

    /// Free-form error with attached context
    #[error("{0}")]
    Custom(String),
}
