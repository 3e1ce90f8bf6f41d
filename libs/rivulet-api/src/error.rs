use std::fmt;

/// Error kind for sink connection errors.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    Config,
    Io,
    Schema,
    /// Remote store unreachable or refused the request.
    Connection,
    /// Operation on a connection that was already closed or never opened.
    Closed,
}

/// Sink connection error, returned by all `SinkConnection` methods.
#[derive(Debug)]
pub struct SinkError {
    pub kind: ErrorKind,
    pub message: String,
}

impl SinkError {
    pub fn config(msg: impl Into<String>) -> Self {
        Self { kind: ErrorKind::Config, message: msg.into() }
    }

    pub fn io(msg: impl Into<String>) -> Self {
        Self { kind: ErrorKind::Io, message: msg.into() }
    }

    pub fn schema(msg: impl Into<String>) -> Self {
        Self { kind: ErrorKind::Schema, message: msg.into() }
    }

    pub fn connection(msg: impl Into<String>) -> Self {
        Self { kind: ErrorKind::Connection, message: msg.into() }
    }

    pub fn closed(msg: impl Into<String>) -> Self {
        Self { kind: ErrorKind::Closed, message: msg.into() }
    }

    /// Add context to the error, preserving the original ErrorKind.
    ///
    /// Produces: `"context: original message"`.
    pub fn with_context(self, ctx: impl fmt::Display) -> Self {
        Self {
            kind: self.kind,
            message: format!("{ctx}: {}", self.message),
        }
    }
}

impl fmt::Display for SinkError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}: {}", self.kind, self.message)
    }
}

impl std::error::Error for SinkError {}

// ---------------------------------------------------------------------------
// From impls: standard error types → SinkError with correct ErrorKind
// ---------------------------------------------------------------------------

impl From<std::io::Error> for SinkError {
    fn from(e: std::io::Error) -> Self {
        Self::io(e.to_string())
    }
}

impl From<serde_json::Error> for SinkError {
    fn from(e: serde_json::Error) -> Self {
        Self::schema(e.to_string())
    }
}

impl From<crate::schema::SchemaError> for SinkError {
    fn from(e: crate::schema::SchemaError) -> Self {
        Self::schema(e.to_string())
    }
}
