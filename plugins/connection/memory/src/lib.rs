use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use tokio::time::Instant;

use rivulet_api::{ConnectionFactory, ConnectionParams, SinkConnection, SinkError, StreamMetadata, StreamSchema};

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

// ═══════════════════════════════════════════════════════════════
//  Recorded calls
// ═══════════════════════════════════════════════════════════════

#[derive(Debug, Clone)]
pub struct OpenCall {
    pub stream_name: String,
    pub schema: StreamSchema,
    pub metadata: StreamMetadata,
}

#[derive(Debug, Clone)]
pub struct AppendCall {
    pub bytes: Vec<u8>,
    pub record_count: usize,
    pub at: Instant,
}

// ═══════════════════════════════════════════════════════════════
//  MemoryConnection
// ═══════════════════════════════════════════════════════════════

#[derive(Default)]
struct State {
    opened: Option<OpenCall>,
    closed: bool,
    appends: Vec<AppendCall>,
}

/// In-process sink connection. Keeps every open/append call for inspection
/// and can be told to fail.
#[derive(Default)]
pub struct MemoryConnection {
    state: Mutex<State>,
    accepted: AtomicU64,
    fail_open: AtomicBool,
    fail_appends: AtomicBool,
    append_delay: Mutex<Duration>,
}

impl MemoryConnection {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_fail_open(&self, fail: bool) {
        self.fail_open.store(fail, Ordering::Relaxed);
    }

    pub fn set_fail_appends(&self, fail: bool) {
        self.fail_appends.store(fail, Ordering::Relaxed);
    }

    /// Block every append for `delay` (simulates a slow store).
    pub fn set_append_delay(&self, delay: Duration) {
        *lock(&self.append_delay) = delay;
    }

    pub fn opened(&self) -> Option<OpenCall> {
        lock(&self.state).opened.clone()
    }

    pub fn is_closed(&self) -> bool {
        lock(&self.state).closed
    }

    pub fn appends(&self) -> Vec<AppendCall> {
        lock(&self.state).appends.clone()
    }

    /// All successfully appended bytes, in append order.
    pub fn records(&self) -> Vec<u8> {
        lock(&self.state).appends.iter().flat_map(|call| call.bytes.iter().copied()).collect()
    }
}

impl SinkConnection for MemoryConnection {
    fn open(&self, stream_name: &str, schema: &StreamSchema, metadata: &StreamMetadata) -> Result<(), SinkError> {
        if self.fail_open.load(Ordering::Relaxed) {
            return Err(SinkError::connection(format!("stream {stream_name} rejected")));
        }
        let mut state = lock(&self.state);
        state.opened = Some(OpenCall {
            stream_name: stream_name.to_string(),
            schema: schema.clone(),
            metadata: metadata.clone(),
        });
        state.closed = false;
        Ok(())
    }

    fn append(&self, records: &[u8], record_count: usize) -> Result<(), SinkError> {
        let delay = *lock(&self.append_delay);
        if !delay.is_zero() {
            std::thread::sleep(delay);
        }

        let mut state = lock(&self.state);
        let Some(opened) = &state.opened else {
            return Err(SinkError::closed("stream not opened"));
        };
        if state.closed {
            return Err(SinkError::closed("stream closed"));
        }
        if self.fail_appends.load(Ordering::Relaxed) {
            return Err(SinkError::io("append failed"));
        }
        let expected = opened.schema.record_len() * record_count;
        if records.len() != expected {
            return Err(SinkError::schema(format!(
                "{record_count} records need {expected} bytes, got {}",
                records.len()
            )));
        }

        state.appends.push(AppendCall {
            bytes: records.to_vec(),
            record_count,
            at: Instant::now(),
        });
        self.accepted.fetch_add(record_count as u64, Ordering::Relaxed);
        Ok(())
    }

    fn close(&self) -> Result<(), SinkError> {
        lock(&self.state).closed = true;
        Ok(())
    }

    fn total_accepted(&self) -> u64 {
        self.accepted.load(Ordering::Relaxed)
    }
}

// ═══════════════════════════════════════════════════════════════
//  MemoryConnectionFactory
// ═══════════════════════════════════════════════════════════════

/// Hands out a fresh `MemoryConnection` per `connect` and remembers them.
#[derive(Default)]
pub struct MemoryConnectionFactory {
    connections: Mutex<Vec<Arc<MemoryConnection>>>,
    fail_connect: AtomicBool,
    fail_open: AtomicBool,
    fail_appends: AtomicBool,
    append_delay: Mutex<Duration>,
}

impl MemoryConnectionFactory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_fail_connect(&self, fail: bool) {
        self.fail_connect.store(fail, Ordering::Relaxed);
    }

    /// Applies to connections created afterwards.
    pub fn set_fail_open(&self, fail: bool) {
        self.fail_open.store(fail, Ordering::Relaxed);
    }

    /// Applies to connections created afterwards.
    pub fn set_fail_appends(&self, fail: bool) {
        self.fail_appends.store(fail, Ordering::Relaxed);
    }

    /// Applies to connections created afterwards.
    pub fn set_append_delay(&self, delay: Duration) {
        *lock(&self.append_delay) = delay;
    }

    pub fn connections(&self) -> Vec<Arc<MemoryConnection>> {
        lock(&self.connections).clone()
    }

    pub fn last(&self) -> Option<Arc<MemoryConnection>> {
        lock(&self.connections).last().cloned()
    }
}

impl ConnectionFactory for MemoryConnectionFactory {
    fn connect(&self, params: &ConnectionParams) -> Result<Arc<dyn SinkConnection>, SinkError> {
        if self.fail_connect.load(Ordering::Relaxed) {
            return Err(SinkError::connection(format!("cannot reach {}", params.address())));
        }
        let connection = Arc::new(MemoryConnection::new());
        connection.set_fail_open(self.fail_open.load(Ordering::Relaxed));
        connection.set_fail_appends(self.fail_appends.load(Ordering::Relaxed));
        connection.set_append_delay(*lock(&self.append_delay));
        lock(&self.connections).push(connection.clone());
        Ok(connection)
    }
}
