use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use rivulet_api::SinkConnection;

use crate::ring::{RingConsumer, RingStatus};

// ═══════════════════════════════════════════════════════════════
//  Stats
// ═══════════════════════════════════════════════════════════════

#[derive(Debug, Default)]
struct WriterStats {
    batches: AtomicU64,
    records_written: AtomicU64,
    records_failed: AtomicU64,
    records_abandoned: AtomicU64,
}

/// Point-in-time view of a batching writer.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct WriterSnapshot {
    /// Append calls issued, successful or not.
    pub batches: u64,
    /// Records the connection accepted from this writer.
    pub records_written: u64,
    /// Records consumed by appends that failed. They are not retried.
    pub records_failed: u64,
    /// Records the producer could not enqueue because the buffer was full.
    pub records_dropped: u64,
    /// Records still buffered when the writer stopped.
    pub records_abandoned: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriterState {
    Idle,
    Running,
    StopRequested,
    Stopped,
}

/// Result of `BatchingWriter::stop`.
#[derive(Debug)]
pub enum StopOutcome {
    Stopped(WriterSnapshot),
    /// The task did not exit within the timeout and was detached. The handle
    /// resolves once the in-flight append returns; the task starts no new one.
    TimedOut(JoinHandle<()>),
}

enum Task {
    Idle(RingConsumer),
    Running(JoinHandle<()>),
    Stopped,
}

// ═══════════════════════════════════════════════════════════════
//  BatchingWriter
// ═══════════════════════════════════════════════════════════════

/// Background task that drains the record ring into a sink connection once
/// per batch period.
pub struct BatchingWriter {
    stream: String,
    connection: Arc<dyn SinkConnection>,
    period: Duration,
    token: CancellationToken,
    stats: Arc<WriterStats>,
    ring: RingStatus,
    task: Task,
}

impl BatchingWriter {
    pub fn new(
        stream: impl Into<String>,
        consumer: RingConsumer,
        connection: Arc<dyn SinkConnection>,
        period: Duration,
    ) -> Self {
        Self {
            stream: stream.into(),
            connection,
            period,
            token: CancellationToken::new(),
            stats: Arc::new(WriterStats::default()),
            ring: consumer.status(),
            task: Task::Idle(consumer),
        }
    }

    /// Spawn the drain loop on the current tokio runtime. No-op unless idle.
    pub fn start(&mut self) {
        let consumer = match std::mem::replace(&mut self.task, Task::Stopped) {
            Task::Idle(consumer) => consumer,
            other => {
                self.task = other;
                return;
            }
        };

        let handle = tokio::spawn(run(
            self.stream.clone(),
            consumer,
            self.connection.clone(),
            self.period,
            self.token.clone(),
            self.stats.clone(),
        ));
        tracing::info!(
            stream = %self.stream,
            capacity = self.ring.capacity(),
            period_ms = self.period.as_millis() as u64,
            "batching writer started"
        );
        self.task = Task::Running(handle);
    }

    pub fn state(&self) -> WriterState {
        match &self.task {
            Task::Idle(_) => WriterState::Idle,
            Task::Running(handle) if handle.is_finished() => WriterState::Stopped,
            Task::Running(_) if self.token.is_cancelled() => WriterState::StopRequested,
            Task::Running(_) => WriterState::Running,
            Task::Stopped => WriterState::Stopped,
        }
    }

    pub fn snapshot(&self) -> WriterSnapshot {
        WriterSnapshot {
            batches: self.stats.batches.load(Ordering::Relaxed),
            records_written: self.stats.records_written.load(Ordering::Relaxed),
            records_failed: self.stats.records_failed.load(Ordering::Relaxed),
            records_dropped: self.ring.dropped(),
            records_abandoned: self.stats.records_abandoned.load(Ordering::Relaxed),
        }
    }

    /// Request stop and wait up to `timeout` for the loop to return.
    pub async fn stop(&mut self, timeout: Duration) -> StopOutcome {
        self.token.cancel();
        match std::mem::replace(&mut self.task, Task::Stopped) {
            Task::Idle(consumer) => {
                self.stats
                    .records_abandoned
                    .store(consumer.ready() as u64, Ordering::Relaxed);
            }
            Task::Running(mut handle) => match tokio::time::timeout(timeout, &mut handle).await {
                Ok(Err(e)) => {
                    tracing::error!(stream = %self.stream, error = %e, "batching writer task failed");
                }
                Ok(Ok(())) => {}
                Err(_) => {
                    tracing::error!(
                        stream = %self.stream,
                        timeout_ms = timeout.as_millis() as u64,
                        "batching writer did not stop in time, detaching"
                    );
                    return StopOutcome::TimedOut(handle);
                }
            },
            Task::Stopped => {}
        }
        StopOutcome::Stopped(self.snapshot())
    }
}

impl Drop for BatchingWriter {
    fn drop(&mut self) {
        // Dropping the handle detaches the task; make sure it winds down.
        self.token.cancel();
    }
}

// ═══════════════════════════════════════════════════════════════
//  Drain loop
// ═══════════════════════════════════════════════════════════════

async fn run(
    stream: String,
    mut consumer: RingConsumer,
    connection: Arc<dyn SinkConnection>,
    period: Duration,
    token: CancellationToken,
    stats: Arc<WriterStats>,
) {
    let mut reported_drops = 0u64;

    loop {
        if token.is_cancelled() {
            break;
        }
        let start = Instant::now();

        if consumer.ready() > 0 {
            // Appends block; keep them off the runtime workers.
            let pass = {
                let stream = stream.clone();
                let connection = connection.clone();
                let stats = stats.clone();
                tokio::task::spawn_blocking(move || {
                    drain(&stream, &mut consumer, &*connection, &stats);
                    consumer
                })
            };
            consumer = match pass.await {
                Ok(consumer) => consumer,
                Err(e) => {
                    tracing::error!(stream = %stream, error = %e, "drain pass failed, writer exiting");
                    return;
                }
            };
        }

        let dropped = consumer.dropped();
        if dropped > reported_drops {
            tracing::warn!(
                stream = %stream,
                dropped = dropped - reported_drops,
                total_dropped = dropped,
                "record buffer full, records dropped"
            );
            reported_drops = dropped;
        }

        tokio::select! {
            biased;
            _ = token.cancelled() => break,
            _ = tokio::time::sleep_until(start + period) => {}
        }
    }

    let abandoned = consumer.ready();
    stats.records_abandoned.store(abandoned as u64, Ordering::Relaxed);
    tracing::info!(
        stream = %stream,
        written = stats.records_written.load(Ordering::Relaxed),
        abandoned,
        "batching writer stopped"
    );
}

/// One drain pass: take everything ready, append it region by region, then
/// release it regardless of the append outcome. Returns records consumed.
/// Blocks for as long as the connection's appends do.
fn drain(
    stream: &str,
    consumer: &mut RingConsumer,
    connection: &dyn SinkConnection,
    stats: &WriterStats,
) -> usize {
    let record_len = consumer.record_len();
    let ready = consumer.ready();
    if ready == 0 {
        return 0;
    }

    let grant = consumer.reserve_read(ready);
    let (first, second) = grant.regions();
    for region in [first, second] {
        if region.is_empty() {
            continue;
        }
        let count = region.len() / record_len;
        stats.batches.fetch_add(1, Ordering::Relaxed);
        match connection.append(region, count) {
            Ok(()) => {
                stats.records_written.fetch_add(count as u64, Ordering::Relaxed);
            }
            Err(e) => {
                stats.records_failed.fetch_add(count as u64, Ordering::Relaxed);
                tracing::warn!(stream = %stream, records = count, error = %e, "batch append failed, records lost");
            }
        }
    }

    let consumed = grant.len();
    grant.commit(consumed);
    consumed
}

#[cfg(test)]
mod tests {
    use rivulet_api::{SpikeRecord, StreamMetadata, StreamSchema};
    use rivulet_conn_memory::MemoryConnection;

    use super::*;
    use crate::ring::record_ring;

    fn spikes(range: std::ops::Range<i64>) -> Vec<u8> {
        range
            .flat_map(|i| SpikeRecord::new(i as i32, 0, i).as_bytes().to_vec())
            .collect()
    }

    fn open_memory() -> Arc<MemoryConnection> {
        let conn = Arc::new(MemoryConnection::new());
        conn.open("test", &StreamSchema::spike(), &StreamMetadata::new()).unwrap();
        conn
    }

    #[test]
    fn drain_appends_each_region_in_order() {
        let conn = open_memory();
        let stats = WriterStats::default();
        let (mut producer, mut consumer) = record_ring(4, 16).unwrap();

        producer.push(&spikes(0..3));
        assert_eq!(drain("test", &mut consumer, &*conn, &stats), 3);
        // Wraps: slots 3, 0, 1.
        producer.push(&spikes(3..6));
        assert_eq!(drain("test", &mut consumer, &*conn, &stats), 3);

        let calls = conn.appends();
        let counts: Vec<_> = calls.iter().map(|c| c.record_count).collect();
        assert_eq!(counts, [3, 1, 2]);
        assert_eq!(conn.records(), spikes(0..6));
        assert_eq!(stats.records_written.load(Ordering::Relaxed), 6);
        assert_eq!(stats.batches.load(Ordering::Relaxed), 3);
    }

    #[test]
    fn failed_append_still_releases_records() {
        let conn = open_memory();
        conn.set_fail_appends(true);
        let stats = WriterStats::default();
        let (mut producer, mut consumer) = record_ring(8, 16).unwrap();

        producer.push(&spikes(0..5));
        assert_eq!(drain("test", &mut consumer, &*conn, &stats), 5);

        assert_eq!(consumer.ready(), 0);
        assert_eq!(stats.records_failed.load(Ordering::Relaxed), 5);
        assert_eq!(stats.records_written.load(Ordering::Relaxed), 0);
        assert_eq!(conn.total_accepted(), 0);
    }

    #[test]
    fn empty_ring_issues_no_append() {
        let conn = open_memory();
        let stats = WriterStats::default();
        let (_producer, mut consumer) = record_ring(8, 16).unwrap();
        assert_eq!(drain("test", &mut consumer, &*conn, &stats), 0);
        assert!(conn.appends().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn writer_flushes_once_per_period_and_stops() {
        let conn = open_memory();
        let (mut producer, consumer) = record_ring(64, 16).unwrap();
        let mut writer = BatchingWriter::new("test", consumer, conn.clone(), Duration::from_millis(10));
        assert_eq!(writer.state(), WriterState::Idle);

        writer.start();
        assert_eq!(writer.state(), WriterState::Running);

        producer.push(&spikes(0..4));
        tokio::time::sleep(Duration::from_millis(15)).await;
        assert_eq!(conn.records(), spikes(0..4));

        producer.push(&spikes(4..6));
        tokio::time::sleep(Duration::from_millis(10)).await;
        assert_eq!(conn.records(), spikes(0..6));

        match writer.stop(Duration::from_secs(1)).await {
            StopOutcome::Stopped(snapshot) => {
                assert_eq!(snapshot.records_written, 6);
                assert_eq!(snapshot.records_abandoned, 0);
                assert_eq!(snapshot.records_dropped, 0);
            }
            StopOutcome::TimedOut(_) => panic!("writer should stop promptly"),
        }
        assert_eq!(writer.state(), WriterState::Stopped);
    }

    #[tokio::test(start_paused = true)]
    async fn stop_does_not_start_a_new_append() {
        let conn = open_memory();
        let (mut producer, consumer) = record_ring(64, 16).unwrap();
        let mut writer = BatchingWriter::new("test", consumer, conn.clone(), Duration::from_millis(50));
        writer.start();
        tokio::time::sleep(Duration::from_millis(1)).await;

        producer.push(&spikes(0..3));
        let StopOutcome::Stopped(snapshot) = writer.stop(Duration::from_secs(1)).await else {
            panic!("writer should stop promptly");
        };

        assert!(conn.appends().is_empty());
        assert_eq!(snapshot.records_abandoned, 3);
    }

    #[tokio::test]
    async fn slow_append_leaves_the_runtime_responsive() {
        let conn = open_memory();
        conn.set_append_delay(Duration::from_millis(500));
        let (mut producer, consumer) = record_ring(8, 16).unwrap();
        let mut writer = BatchingWriter::new("test", consumer, conn.clone(), Duration::from_millis(5));
        writer.start();
        producer.push(&spikes(0..1));

        let begin = std::time::Instant::now();
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(begin.elapsed() < Duration::from_millis(300));

        let begin = std::time::Instant::now();
        let StopOutcome::TimedOut(handle) = writer.stop(Duration::from_millis(20)).await else {
            panic!("writer is still inside the append");
        };
        assert!(begin.elapsed() < Duration::from_millis(300));
        assert_eq!(writer.state(), WriterState::Stopped);

        handle.await.unwrap();
        assert_eq!(conn.total_accepted(), 1);
        assert_eq!(writer.snapshot().records_written, 1);
    }

    #[tokio::test]
    async fn stopping_an_idle_writer_reports_buffered_records() {
        let conn = open_memory();
        let (mut producer, consumer) = record_ring(4, 16).unwrap();
        let mut writer = BatchingWriter::new("test", consumer, conn, Duration::from_millis(5));
        producer.push(&spikes(0..6));

        let StopOutcome::Stopped(snapshot) = writer.stop(Duration::from_secs(1)).await else {
            panic!("idle writer stops immediately");
        };
        assert_eq!(snapshot.records_abandoned, 4);
        assert_eq!(snapshot.records_dropped, 2);
        assert_eq!(writer.state(), WriterState::Stopped);
    }
}
