use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use rivulet_api::{
    ConnectionFactory, ConnectionParams, InboundEvent, RecordShape, SinkConnection, SpikeRecord, StreamMetadata,
    StreamSchema,
};
use tokio::task::JoinHandle;

use crate::config::SinkSettings;
use crate::error::EngineError;
use crate::naming::StreamNaming;
use crate::ring::{RingProducer, record_ring};
use crate::writer::{BatchingWriter, StopOutcome, WriterSnapshot};

const DEFAULT_STOP_TIMEOUT: Duration = Duration::from_secs(1);

// ═══════════════════════════════════════════════════════════════
//  Settings
// ═══════════════════════════════════════════════════════════════

/// Record buffer capacity and flush period. Either one at zero selects
/// synchronous delivery.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BatchSettings {
    pub capacity: usize,
    pub period_ms: u64,
}

impl BatchSettings {
    pub fn new(capacity: usize, period_ms: u64) -> Self {
        Self { capacity, period_ms }
    }

    /// Build from signed limits as stored in settings; negatives count as zero.
    pub fn from_limits(max_batch_size: i64, max_latency_ms: i64) -> Self {
        Self {
            capacity: usize::try_from(max_batch_size).unwrap_or(0),
            period_ms: u64::try_from(max_latency_ms).unwrap_or(0),
        }
    }

    pub fn synchronous() -> Self {
        Self::new(0, 0)
    }

    pub fn is_enabled(&self) -> bool {
        self.capacity > 0 && self.period_ms > 0
    }

    pub fn period(&self) -> Duration {
        Duration::from_millis(self.period_ms)
    }
}

impl Default for BatchSettings {
    fn default() -> Self {
        Self::new(4096, 5)
    }
}

/// What the host pipeline tells the sink about its input.
#[derive(Debug, Clone, PartialEq)]
pub struct HostInfo {
    /// Channels that can produce spikes. Spike mode needs at least one.
    pub spike_channels: usize,
    pub prepeak_samples: u32,
    pub postpeak_samples: u32,
    pub sampling_rate: f64,
}

impl HostInfo {
    pub fn spike_metadata(&self) -> StreamMetadata {
        StreamMetadata::from([
            ("prepeak_samples".to_string(), self.prepeak_samples.to_string()),
            ("postpeak_samples".to_string(), self.postpeak_samples.to_string()),
            ("sampling_rate".to_string(), self.sampling_rate.to_string()),
        ])
    }
}

impl Default for HostInfo {
    fn default() -> Self {
        Self {
            spike_channels: 0,
            prepeak_samples: 8,
            postpeak_samples: 32,
            sampling_rate: 30_000.0,
        }
    }
}

// ═══════════════════════════════════════════════════════════════
//  Schema holder
// ═══════════════════════════════════════════════════════════════

/// The record shape in effect. Frozen while a session is open; edits made
/// then are parked in `pending` and applied on the next stop.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SchemaState {
    Unfrozen(RecordShape),
    Frozen { active: RecordShape, pending: Option<RecordShape> },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SchemaChange {
    Applied,
    /// Stored, takes effect after the open session stops.
    Deferred,
}

impl SchemaState {
    pub fn active(&self) -> &RecordShape {
        match self {
            SchemaState::Unfrozen(shape) => shape,
            SchemaState::Frozen { active, .. } => active,
        }
    }

    pub fn pending(&self) -> Option<&RecordShape> {
        match self {
            SchemaState::Unfrozen(_) => None,
            SchemaState::Frozen { pending, .. } => pending.as_ref(),
        }
    }

    pub fn is_frozen(&self) -> bool {
        matches!(self, SchemaState::Frozen { .. })
    }

    fn propose(&mut self, shape: RecordShape) -> SchemaChange {
        match self {
            SchemaState::Unfrozen(current) => {
                *current = shape;
                SchemaChange::Applied
            }
            SchemaState::Frozen { pending, .. } => {
                *pending = Some(shape);
                SchemaChange::Deferred
            }
        }
    }

    fn freeze(&mut self) {
        if let SchemaState::Unfrozen(shape) = self {
            let active = std::mem::take(shape);
            *self = SchemaState::Frozen { active, pending: None };
        }
    }

    fn thaw(&mut self) {
        if let SchemaState::Frozen { active, pending } = self {
            let next = pending.take().unwrap_or_else(|| std::mem::take(active));
            *self = SchemaState::Unfrozen(next);
        }
    }
}

impl Default for SchemaState {
    fn default() -> Self {
        SchemaState::Unfrozen(RecordShape::Spike)
    }
}

// ═══════════════════════════════════════════════════════════════
//  Open session
// ═══════════════════════════════════════════════════════════════

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeliveryMode {
    /// Records go through the ring buffer and the batching writer.
    Batched,
    /// Records are appended on the caller's thread.
    Direct,
}

enum Route {
    Batched { producer: RingProducer, writer: BatchingWriter },
    Direct,
}

struct OpenSession {
    stream: String,
    connection: Arc<dyn SinkConnection>,
    record_len: usize,
    route: Route,
}

// ═══════════════════════════════════════════════════════════════
//  SessionController
// ═══════════════════════════════════════════════════════════════

/// Entry point for the host pipeline: owns configuration, opens one sink
/// connection per session and routes records to the batched or direct path.
///
/// `start` and `stop` must run inside a tokio runtime. `submit*` never
/// awaits and, in batched mode, never blocks.
pub struct SessionController {
    factory: Arc<dyn ConnectionFactory>,
    params: ConnectionParams,
    batch: BatchSettings,
    host: HostInfo,
    naming: StreamNaming,
    schema: SchemaState,
    stop_timeout: Duration,
    session: Option<OpenSession>,
    /// Accepted by connections of finished sessions. Detached writers add
    /// their late appends here once they exit.
    accepted_before: Arc<AtomicU64>,
    last_writer: Option<WriterSnapshot>,
}

impl SessionController {
    pub fn new(factory: Arc<dyn ConnectionFactory>) -> Self {
        Self {
            factory,
            params: ConnectionParams::default(),
            batch: BatchSettings::default(),
            host: HostInfo::default(),
            naming: StreamNaming::default(),
            schema: SchemaState::default(),
            stop_timeout: DEFAULT_STOP_TIMEOUT,
            session: None,
            accepted_before: Arc::new(AtomicU64::new(0)),
            last_writer: None,
        }
    }

    pub fn from_settings(factory: Arc<dyn ConnectionFactory>, settings: &SinkSettings) -> Self {
        let mut controller = Self::new(factory);
        controller.params = settings.connection_params();
        controller.batch = settings.batch();
        controller.naming.set_explicit(settings.stream_name.clone());
        controller.schema = SchemaState::Unfrozen(settings.record_shape());
        controller
    }

    /// Replace the generated-name source (deterministic names in tests and tools).
    pub fn with_naming(mut self, naming: StreamNaming) -> Self {
        self.naming = naming;
        self
    }

    // ── configuration ──

    /// Set connection, schema and batching in one go. Only while closed.
    pub fn configure(
        &mut self,
        params: ConnectionParams,
        event_schema: Option<StreamSchema>,
        batch: BatchSettings,
    ) -> Result<(), EngineError> {
        if self.is_open() {
            return Err(EngineError::SessionOpen);
        }
        self.params = params;
        self.batch = batch;
        self.schema.propose(RecordShape::from_event_schema(event_schema));
        Ok(())
    }

    pub fn set_connection_params(&mut self, params: ConnectionParams) -> Result<(), EngineError> {
        if self.is_open() {
            return Err(EngineError::SessionOpen);
        }
        self.params = params;
        Ok(())
    }

    /// `None` falls back to the generated name.
    pub fn set_stream_name(&mut self, name: Option<String>) -> Result<(), EngineError> {
        if self.is_open() {
            return Err(EngineError::SessionOpen);
        }
        self.naming.set_explicit(name);
        Ok(())
    }

    /// Accepted at any time; an open session keeps its current mode.
    pub fn set_batching(&mut self, batch: BatchSettings) {
        self.batch = batch;
    }

    pub fn set_host_info(&mut self, host: HostInfo) {
        self.host = host;
    }

    pub fn set_stop_timeout(&mut self, timeout: Duration) {
        self.stop_timeout = timeout;
    }

    /// `None` selects spike records.
    pub fn set_event_schema(&mut self, schema: Option<StreamSchema>) -> SchemaChange {
        self.set_record_shape(RecordShape::from_event_schema(schema))
    }

    pub fn set_record_shape(&mut self, shape: RecordShape) -> SchemaChange {
        let change = self.schema.propose(shape);
        if change == SchemaChange::Deferred {
            tracing::warn!("cannot update schema while running, change applies after stop");
        }
        change
    }

    pub fn connection_params(&self) -> &ConnectionParams {
        &self.params
    }

    pub fn batching(&self) -> BatchSettings {
        self.batch
    }

    pub fn schema_state(&self) -> &SchemaState {
        &self.schema
    }

    pub fn naming(&self) -> &StreamNaming {
        &self.naming
    }

    // ── status ──

    pub fn is_open(&self) -> bool {
        self.session.is_some()
    }

    pub fn mode(&self) -> Option<DeliveryMode> {
        self.session.as_ref().map(|session| match session.route {
            Route::Batched { .. } => DeliveryMode::Batched,
            Route::Direct => DeliveryMode::Direct,
        })
    }

    /// Stream of the open session.
    pub fn stream_name(&self) -> Option<&str> {
        self.session.as_ref().map(|session| session.stream.as_str())
    }

    /// Records the store has accepted across all sessions of this controller.
    pub fn total_records_written(&self) -> u64 {
        let current = self.session.as_ref().map_or(0, |session| session.connection.total_accepted());
        self.accepted_before.load(Ordering::Relaxed) + current
    }

    /// Live stats of the running writer, else those of the last one.
    pub fn writer_stats(&self) -> Option<WriterSnapshot> {
        match self.session.as_ref().map(|session| &session.route) {
            Some(Route::Batched { writer, .. }) => Some(writer.snapshot()),
            _ => self.last_writer,
        }
    }

    // ── lifecycle ──

    fn validate(&self) -> Result<String, EngineError> {
        let stream = self.naming.resolve()?.to_string();
        validate_params(&self.params)?;
        if self.schema.active().is_spike() && self.host.spike_channels == 0 {
            return Err(EngineError::Configuration("no spike channels available to record".into()));
        }
        Ok(stream)
    }

    /// Connect and immediately close a throwaway connection.
    pub fn test_connection(&self) -> Result<(), EngineError> {
        validate_params(&self.params)?;
        let connection = self
            .factory
            .connect(&self.params)
            .map_err(|e| EngineError::from(e).with_context(self.params.address()))?;
        connection.close()?;
        tracing::info!(address = %self.params.address(), "connection test succeeded");
        Ok(())
    }

    /// Open the stream and, when batching is enabled, start the writer.
    /// No-op if already open. Nothing is retained on failure.
    pub async fn start(&mut self) -> Result<(), EngineError> {
        if self.session.is_some() {
            return Ok(());
        }
        let stream = self.validate()?;

        let shape = self.schema.active().clone();
        let record_len = shape.record_len();
        let ring = if self.batch.is_enabled() {
            Some(record_ring(self.batch.capacity, record_len)?)
        } else {
            None
        };

        let metadata = if shape.is_spike() {
            self.host.spike_metadata()
        } else {
            StreamMetadata::new()
        };
        let connection = {
            let factory = self.factory.clone();
            let params = self.params.clone();
            let stream = stream.clone();
            let schema = shape.schema();
            tokio::task::spawn_blocking(move || connect_and_open(&*factory, &params, &stream, &schema, &metadata))
                .await??
        };

        let route = match ring {
            Some((producer, consumer)) => {
                let mut writer = BatchingWriter::new(&stream, consumer, connection.clone(), self.batch.period());
                writer.start();
                Route::Batched { producer, writer }
            }
            None => Route::Direct,
        };

        tracing::info!(
            stream = %stream,
            address = %self.params.address(),
            record_len,
            spike = shape.is_spike(),
            batched = matches!(route, Route::Batched { .. }),
            "session started"
        );

        self.schema.freeze();
        self.session = Some(OpenSession {
            stream,
            connection,
            record_len,
            route,
        });
        Ok(())
    }

    /// Stop the writer (bounded wait), close the connection and thaw the
    /// schema. No-op if not open.
    ///
    /// A writer that misses the timeout is detached; its connection is closed
    /// once the writer exits, and the next `start` opens a new one.
    pub async fn stop(&mut self) -> Result<(), EngineError> {
        let Some(OpenSession { stream, connection, route, .. }) = self.session.take() else {
            return Ok(());
        };

        let mut detached = false;
        if let Route::Batched { producer, mut writer } = route {
            drop(producer);
            match writer.stop(self.stop_timeout).await {
                StopOutcome::Stopped(snapshot) => self.last_writer = Some(snapshot),
                StopOutcome::TimedOut(handle) => {
                    self.last_writer = Some(writer.snapshot());
                    detached = true;
                    let counted = connection.total_accepted();
                    self.accepted_before.fetch_add(counted, Ordering::Relaxed);
                    tokio::spawn(reap_detached(
                        stream.clone(),
                        handle,
                        connection.clone(),
                        counted,
                        self.accepted_before.clone(),
                    ));
                }
            }
        }

        self.schema.thaw();

        let closed = if detached {
            Ok(())
        } else {
            self.accepted_before.fetch_add(connection.total_accepted(), Ordering::Relaxed);
            tokio::task::spawn_blocking(move || connection.close()).await?
        };
        tracing::info!(
            stream = %stream,
            total_written = self.accepted_before.load(Ordering::Relaxed),
            "session stopped"
        );
        closed.map_err(|e| EngineError::from(e).with_context(format!("close stream {stream}")))
    }

    // ── producer path ──

    /// Hand over one or more whole records laid out back to back.
    ///
    /// Batched: returns how many fit in the buffer; the rest are dropped
    /// and counted. Direct: appends on this thread and returns the count.
    pub fn submit(&mut self, records: &[u8]) -> Result<usize, EngineError> {
        let session = self.session.as_mut().ok_or(EngineError::NotOpen)?;
        let record_len = session.record_len;
        if records.len() % record_len != 0 {
            return Err(EngineError::RecordSize {
                expected: record_len,
                actual: records.len(),
            });
        }
        if records.is_empty() {
            return Ok(0);
        }

        match &mut session.route {
            Route::Batched { producer, .. } => Ok(producer.push(records)),
            Route::Direct => {
                let count = records.len() / record_len;
                session.connection.append(records, count)?;
                Ok(count)
            }
        }
    }

    pub fn submit_event(&mut self, event: InboundEvent<'_>) -> Result<usize, EngineError> {
        if self.session.is_none() {
            return Err(EngineError::NotOpen);
        }
        let shape = self.schema.active();
        if !event.fits(shape) {
            let expected = if shape.is_spike() { "spike" } else { "event" };
            return Err(EngineError::ShapeMismatch { expected });
        }
        self.submit(event.bytes())
    }

    pub fn submit_spike(&mut self, spike: SpikeRecord) -> Result<usize, EngineError> {
        self.submit_event(InboundEvent::Spike(spike))
    }
}

/// Blocking half of `start`. A connection whose `open` fails is closed
/// before the error is returned.
fn connect_and_open(
    factory: &dyn ConnectionFactory,
    params: &ConnectionParams,
    stream: &str,
    schema: &StreamSchema,
    metadata: &StreamMetadata,
) -> Result<Arc<dyn SinkConnection>, EngineError> {
    let connection = factory
        .connect(params)
        .map_err(|e| EngineError::from(e).with_context(params.address()))?;
    if let Err(e) = connection.open(stream, schema, metadata) {
        if let Err(close) = connection.close() {
            tracing::warn!(stream = %stream, error = %close, "closing connection after failed open");
        }
        return Err(EngineError::from(e).with_context(format!("open stream {stream}")));
    }
    Ok(connection)
}

/// Wait out a writer that missed the stop timeout, then count what its last
/// append got in and close its connection.
async fn reap_detached(
    stream: String,
    handle: JoinHandle<()>,
    connection: Arc<dyn SinkConnection>,
    counted: u64,
    accepted: Arc<AtomicU64>,
) {
    if let Err(e) = handle.await {
        tracing::error!(stream = %stream, error = %e, "detached batching writer task failed");
    }
    let closed = tokio::task::spawn_blocking(move || {
        let late = connection.total_accepted().saturating_sub(counted);
        accepted.fetch_add(late, Ordering::Relaxed);
        connection.close()
    })
    .await;
    match closed {
        Ok(Ok(())) => tracing::info!(stream = %stream, "detached writer exited, connection closed"),
        Ok(Err(e)) => tracing::warn!(stream = %stream, error = %e, "closing detached connection failed"),
        Err(e) => tracing::error!(stream = %stream, error = %e, "closing detached connection panicked"),
    }
}

fn validate_params(params: &ConnectionParams) -> Result<(), EngineError> {
    if params.hostname.trim().is_empty() {
        return Err(EngineError::Configuration("hostname is not set".into()));
    }
    if !(1..=65535).contains(&params.port) {
        return Err(EngineError::Configuration(format!("invalid port {}", params.port)));
    }
    Ok(())
}
