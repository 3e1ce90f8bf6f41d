use std::fs::File;
use std::io::{BufReader, ErrorKind as IoErrorKind, Read};
use std::path::Path;

use rivulet_api::{SinkError, StreamMetadata, StreamSchema};

use crate::{StreamHeader, check_stream_name, header_path, records_path};

/// Reads a stream written by `FileConnection` back, one record at a time.
pub struct StreamReader {
    name: String,
    header: StreamHeader,
    records: BufReader<File>,
    position: u64,
}

impl StreamReader {
    pub fn open(data_dir: impl AsRef<Path>, stream: &str) -> Result<Self, SinkError> {
        check_stream_name(stream)?;
        let data_dir = data_dir.as_ref();

        let path = header_path(data_dir, stream);
        let raw = std::fs::read(&path).map_err(|e| SinkError::io(format!("read {}: {e}", path.display())))?;
        let header: StreamHeader =
            serde_json::from_slice(&raw).map_err(|e| SinkError::schema(format!("{}: {e}", path.display())))?;

        let path = records_path(data_dir, stream);
        let file = File::open(&path).map_err(|e| SinkError::io(format!("open {}: {e}", path.display())))?;

        Ok(Self {
            name: stream.to_string(),
            header,
            records: BufReader::new(file),
            position: 0,
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn schema(&self) -> &StreamSchema {
        &self.header.schema
    }

    pub fn metadata(&self) -> &StreamMetadata {
        &self.header.metadata
    }

    /// Records read so far.
    pub fn position(&self) -> u64 {
        self.position
    }

    /// Next whole record, `None` at end of stream. A trailing partial
    /// record is an error.
    pub fn next_record(&mut self) -> Result<Option<Vec<u8>>, SinkError> {
        let mut record = vec![0u8; self.header.schema.record_len()];
        let mut filled = 0;
        while filled < record.len() {
            match self.records.read(&mut record[filled..]) {
                Ok(0) => break,
                Ok(n) => filled += n,
                Err(e) if e.kind() == IoErrorKind::Interrupted => continue,
                Err(e) => return Err(e.into()),
            }
        }

        match filled {
            0 => Ok(None),
            n if n == record.len() => {
                self.position += 1;
                Ok(Some(record))
            }
            n => Err(SinkError::schema(format!(
                "stream {} ends with a partial record ({n} of {} bytes)",
                self.name,
                record.len()
            ))),
        }
    }
}

impl Iterator for StreamReader {
    type Item = Result<Vec<u8>, SinkError>;

    fn next(&mut self) -> Option<Self::Item> {
        self.next_record().transpose()
    }
}

/// Names of the streams stored under `data_dir`, sorted.
pub fn list_streams(data_dir: impl AsRef<Path>) -> Result<Vec<String>, SinkError> {
    let data_dir = data_dir.as_ref();
    let dir = match std::fs::read_dir(data_dir) {
        Ok(dir) => dir,
        Err(e) if e.kind() == IoErrorKind::NotFound => return Ok(Vec::new()),
        Err(e) => return Err(SinkError::io(format!("list {}: {e}", data_dir.display()))),
    };

    let mut streams = Vec::new();
    for entry in dir {
        let entry = match entry {
            Ok(e) => e,
            Err(_) => continue,
        };
        let name = entry.file_name();
        let name = name.to_string_lossy();
        if let Some(stream) = name.strip_suffix(".json") {
            if records_path(data_dir, stream).exists() {
                streams.push(stream.to_string());
            }
        }
    }
    streams.sort();
    Ok(streams)
}
