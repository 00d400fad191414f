use std::collections::BTreeMap;
use std::fmt;
use tracing::{Level, Span};

/// Context information for logging
///
/// Used to build a span that tags everything logged inside it with the
/// component name and a few key/value fields.
#[derive(Debug, Clone)]
pub struct LogContext {
    /// Component that is generating the log
    pub component: String,
    /// Operation or action being performed
    pub operation: Option<String>,
    /// Additional contextual fields, rendered in key order
    pub fields: BTreeMap<String, String>,
}

impl LogContext {
    pub fn new<S: Into<String>>(component: S) -> Self {
        LogContext {
            component: component.into(),
            operation: None,
            fields: BTreeMap::new(),
        }
    }

    pub fn with_operation<S: Into<String>, T: Into<String>>(component: S, operation: T) -> Self {
        LogContext {
            component: component.into(),
            operation: Some(operation.into()),
            fields: BTreeMap::new(),
        }
    }

    pub fn with_field<S: Into<String>, T: Into<String>>(mut self, key: S, value: T) -> Self {
        self.fields.insert(key.into(), value.into());
        self
    }

    /// Create a span carrying this context
    ///
    /// Extra fields are flattened into a single `ctx` field since span field
    /// names have to be known at compile time.
    pub fn span(&self, level: Level) -> Span {
        let op = self.operation.as_deref().unwrap_or("-");
        let ctx = self.fields_string();
        // span macros need a constant level
        match level {
            Level::TRACE => tracing::trace_span!("peerlink", component = %self.component, operation = %op, ctx = %ctx),
            Level::DEBUG => tracing::debug_span!("peerlink", component = %self.component, operation = %op, ctx = %ctx),
            Level::INFO => tracing::info_span!("peerlink", component = %self.component, operation = %op, ctx = %ctx),
            Level::WARN => tracing::warn_span!("peerlink", component = %self.component, operation = %op, ctx = %ctx),
            Level::ERROR => tracing::error_span!("peerlink", component = %self.component, operation = %op, ctx = %ctx),
        }
    }

    fn fields_string(&self) -> String {
        self.fields
            .iter()
            .map(|(k, v)| format!("{}={}", k, v))
            .collect::<Vec<_>>()
            .join(",")
    }
}

impl fmt::Display for LogContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}]", self.component)?;

        if let Some(op) = &self.operation {
            write!(f, "[{}]", op)?;
        }

        for (key, value) in &self.fields {
            write!(f, "[{}={}]", key, value)?;
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_display_orders_fields() {
        let ctx = LogContext::with_operation("lifecycle", "dial")
            .with_field("remote", "bob")
            .with_field("local", "alice");
        assert_eq!(ctx.to_string(), "[lifecycle][dial][local=alice][remote=bob]");
    }

    #[test]
    fn test_span_can_be_built_without_subscriber() {
        let ctx = LogContext::new("media");
        let span = ctx.span(Level::DEBUG);
        let _guard = span.enter();
    }
}
