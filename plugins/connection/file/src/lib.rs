//! Append-only on-disk sink connection.
//!
//! Layout under `data_dir`:
//! ```text
//! {stream}.json   schema + metadata, written by the first open
//! {stream}.bin    raw records, back to back, appended on every batch
//! ```
//! Re-opening an existing stream appends to it as long as the schema matches.

mod reader;

pub use reader::{StreamReader, list_streams};

use std::fs::{File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use serde::{Deserialize, Serialize};

use rivulet_api::{ConnectionFactory, ConnectionParams, SinkConnection, SinkError, StreamMetadata, StreamSchema};

#[derive(Debug, Serialize, Deserialize)]
struct StreamHeader {
    schema: StreamSchema,
    #[serde(default)]
    metadata: StreamMetadata,
}

fn header_path(data_dir: &Path, stream: &str) -> PathBuf {
    data_dir.join(format!("{stream}.json"))
}

fn records_path(data_dir: &Path, stream: &str) -> PathBuf {
    data_dir.join(format!("{stream}.bin"))
}

fn check_stream_name(stream: &str) -> Result<(), SinkError> {
    if stream.is_empty() || stream.contains(['/', '\\']) || stream.starts_with('.') {
        return Err(SinkError::config(format!("invalid stream name {stream:?}")));
    }
    Ok(())
}

// ═══════════════════════════════════════════════════════════════
//  FileConnection
// ═══════════════════════════════════════════════════════════════

struct OpenStream {
    name: String,
    record_len: usize,
    file: File,
}

enum State {
    Idle,
    Open(OpenStream),
    Closed,
}

pub struct FileConnection {
    data_dir: PathBuf,
    state: Mutex<State>,
    accepted: AtomicU64,
}

impl FileConnection {
    pub fn new(data_dir: impl Into<PathBuf>) -> Self {
        Self {
            data_dir: data_dir.into(),
            state: Mutex::new(State::Idle),
            accepted: AtomicU64::new(0),
        }
    }

    fn lock(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn write_or_check_header(&self, stream: &str, schema: &StreamSchema, metadata: &StreamMetadata) -> Result<(), SinkError> {
        let path = header_path(&self.data_dir, stream);
        if path.exists() {
            let existing: StreamHeader = serde_json::from_slice(&std::fs::read(&path)?)?;
            if existing.schema != *schema {
                return Err(SinkError::schema(format!(
                    "stream {stream} already exists with a different schema"
                )));
            }
            return Ok(());
        }

        let header = StreamHeader {
            schema: schema.clone(),
            metadata: metadata.clone(),
        };
        std::fs::write(&path, serde_json::to_vec_pretty(&header)?)
            .map_err(|e| SinkError::io(format!("write {}: {e}", path.display())))
    }
}

impl SinkConnection for FileConnection {
    fn open(&self, stream: &str, schema: &StreamSchema, metadata: &StreamMetadata) -> Result<(), SinkError> {
        check_stream_name(stream)?;
        let mut state = self.lock();
        if matches!(*state, State::Open(_)) {
            return Err(SinkError::config("connection already has an open stream"));
        }

        std::fs::create_dir_all(&self.data_dir)
            .map_err(|e| SinkError::io(format!("mkdir {}: {e}", self.data_dir.display())))?;
        self.write_or_check_header(stream, schema, metadata)?;

        let path = records_path(&self.data_dir, stream);
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .map_err(|e| SinkError::io(format!("open {}: {e}", path.display())))?;

        tracing::debug!(stream, path = %path.display(), "file stream opened");
        *state = State::Open(OpenStream {
            name: stream.to_string(),
            record_len: schema.record_len(),
            file,
        });
        Ok(())
    }

    fn append(&self, records: &[u8], record_count: usize) -> Result<(), SinkError> {
        let mut state = self.lock();
        let stream = match &mut *state {
            State::Open(stream) => stream,
            State::Idle => return Err(SinkError::closed("stream not opened")),
            State::Closed => return Err(SinkError::closed("stream closed")),
        };

        if records.len() != stream.record_len * record_count {
            return Err(SinkError::schema(format!(
                "{record_count} records of {} bytes, got {} bytes",
                stream.record_len,
                records.len()
            )));
        }
        stream
            .file
            .write_all(records)
            .map_err(|e| SinkError::io(format!("append to {}: {e}", stream.name)))?;
        self.accepted.fetch_add(record_count as u64, Ordering::Relaxed);
        Ok(())
    }

    fn close(&self) -> Result<(), SinkError> {
        let mut state = self.lock();
        if let State::Open(mut stream) = std::mem::replace(&mut *state, State::Closed) {
            stream.file.flush()?;
            stream.file.sync_data()?;
            tracing::debug!(stream = %stream.name, "file stream closed");
        }
        Ok(())
    }

    fn total_accepted(&self) -> u64 {
        self.accepted.load(Ordering::Relaxed)
    }
}

// ═══════════════════════════════════════════════════════════════
//  FileConnectionFactory
// ═══════════════════════════════════════════════════════════════

/// Connects to a local directory. Hostname and port only label the log line.
pub struct FileConnectionFactory {
    data_dir: PathBuf,
}

impl FileConnectionFactory {
    pub fn new(data_dir: impl Into<PathBuf>) -> Self {
        Self { data_dir: data_dir.into() }
    }

    pub fn data_dir(&self) -> &Path {
        &self.data_dir
    }
}

impl ConnectionFactory for FileConnectionFactory {
    fn connect(&self, params: &ConnectionParams) -> Result<Arc<dyn SinkConnection>, SinkError> {
        std::fs::create_dir_all(&self.data_dir)
            .map_err(|e| SinkError::connection(format!("data dir {}: {e}", self.data_dir.display())))?;
        tracing::debug!(address = %params.address(), data_dir = %self.data_dir.display(), "file connection");
        Ok(Arc::new(FileConnection::new(&self.data_dir)))
    }
}
