use crate::errors::types::Error;
use std::fmt;

/// Where an error happened
#[derive(Debug, Clone)]
pub struct ErrorContext {
    /// Component where the error occurred
    pub component: String,
    /// Operation that was being performed
    pub operation: String,
    /// Additional context information
    pub details: Option<String>,
}

impl ErrorContext {
    pub fn new<S: Into<String>, T: Into<String>>(component: S, operation: T) -> Self {
        ErrorContext {
            component: component.into(),
            operation: operation.into(),
            details: None,
        }
    }

    pub fn with_details<S: Into<String>>(mut self, details: S) -> Self {
        self.details = Some(details.into());
        self
    }
}

impl fmt::Display for ErrorContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "in component '{}' during operation '{}'", self.component, self.operation)?;
        if let Some(details) = &self.details {
            write!(f, " ({})", details)?;
        }
        Ok(())
    }
}

/// Extension trait for attaching an [`ErrorContext`] to an error
pub trait ErrorExt<T> {
    /// Attach a full context
    fn context(self, ctx: ErrorContext) -> Result<T, Error>;

    /// Attach a component/operation pair
    fn with_context<S: Into<String>, O: Into<String>>(self, component: S, operation: O) -> Result<T, Error>;
}

impl<T> ErrorExt<T> for Result<T, Error> {
    fn context(self, ctx: ErrorContext) -> Result<T, Error> {
        self.map_err(|e| Error::Custom(format!("{} [{}]", e, ctx)))
    }

    fn with_context<S: Into<String>, O: Into<String>>(self, component: S, operation: O) -> Result<T, Error> {
        self.context(ErrorContext::new(component, operation))
    }
}
