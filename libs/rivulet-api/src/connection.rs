use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use crate::error::SinkError;
use crate::schema::StreamSchema;

/// Opaque key/value text written once when a stream is opened
/// (e.g. `"sampling_rate" -> "30000"`).
pub type StreamMetadata = BTreeMap<String, String>;

/// Where the remote stream store lives.
#[derive(Clone, PartialEq, Eq)]
pub struct ConnectionParams {
    pub hostname: String,
    pub port: i32,
    pub password: String,
}

impl ConnectionParams {
    pub fn new(hostname: impl Into<String>, port: i32, password: impl Into<String>) -> Self {
        Self {
            hostname: hostname.into(),
            port,
            password: password.into(),
        }
    }

    pub fn address(&self) -> String {
        format!("{}:{}", self.hostname, self.port)
    }
}

impl Default for ConnectionParams {
    fn default() -> Self {
        Self::new("127.0.0.1", 6379, "")
    }
}

impl fmt::Debug for ConnectionParams {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConnectionParams")
            .field("hostname", &self.hostname)
            .field("port", &self.port)
            .field("password", &if self.password.is_empty() { "" } else { "***" })
            .finish()
    }
}

/// Client of an append-only, schema-typed stream store.
///
/// All methods are **blocking**. A connection is shared between the session
/// controller and at most one batching writer, so methods take `&self`.
pub trait SinkConnection: Send + Sync {
    /// Create (or attach to) the named stream and record its schema and metadata.
    fn open(&self, stream_name: &str, schema: &StreamSchema, metadata: &StreamMetadata) -> Result<(), SinkError>;

    /// Append `record_count` whole records laid out back to back in `records`.
    fn append(&self, records: &[u8], record_count: usize) -> Result<(), SinkError>;

    /// Finish the stream. Further appends fail with `ErrorKind::Closed`.
    fn close(&self) -> Result<(), SinkError>;

    /// Records the store has accepted since `open`.
    fn total_accepted(&self) -> u64;
}

/// Creates connections for a session. One connection per session lifetime.
pub trait ConnectionFactory: Send + Sync {
    fn connect(&self, params: &ConnectionParams) -> Result<Arc<dyn SinkConnection>, SinkError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn debug_hides_password() {
        let params = ConnectionParams::new("db.local", 6380, "hunter2");
        let dbg = format!("{params:?}");
        assert!(!dbg.contains("hunter2"));
        assert!(dbg.contains("***"));
        assert_eq!(params.address(), "db.local:6380");
    }
}
