//! Fixed-capacity ring of whole records shared by one producer and one consumer.
//!
//! The producer (real-time thread) and the consumer (batching writer) never
//! block each other: both sides reserve a run of slots, touch it, then publish
//! by committing. A run may straddle the end of the backing storage, so every
//! reservation hands out up to two regions that must be handled in order.
//!
//! ```text
//!   storage: [ r r . . . . w w w r r r ]
//!                                ^ write cursor wraps here: region 2 starts at 0
//! ```
//!
//! Writes are capacity-clamped: asking for more slots than are free yields
//! fewer slots. `RingProducer::push` counts whatever it could not place as
//! dropped.

use std::cell::UnsafeCell;
use std::ops::Range;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};

use crate::error::EngineError;

struct Shared {
    storage: Box<[UnsafeCell<u8>]>,
    record_len: usize,
    capacity: usize,
    /// Cursors run over `[0, 2 * capacity)` so that full and empty differ.
    write: AtomicUsize,
    read: AtomicUsize,
    dropped: AtomicU64,
}

// SAFETY: the producer only touches slots in [write, read + capacity) and the
// consumer only touches slots in [read, write). Each side publishes its cursor
// with Release after it is done with the bytes and observes the other side's
// cursor with Acquire, so the two byte ranges never overlap in time.
unsafe impl Sync for Shared {}

impl Shared {
    fn advance(&self, cursor: usize, count: usize) -> usize {
        let next = cursor + count;
        if next >= 2 * self.capacity { next - 2 * self.capacity } else { next }
    }

    fn distance(&self, write: usize, read: usize) -> usize {
        if write >= read { write - read } else { write + 2 * self.capacity - read }
    }

    fn index(&self, cursor: usize) -> usize {
        if cursor >= self.capacity { cursor - self.capacity } else { cursor }
    }

    /// Byte ranges of `count` slots starting at `cursor`, split at the end of storage.
    fn regions(&self, cursor: usize, count: usize) -> (Range<usize>, Range<usize>) {
        let start = self.index(cursor);
        let first = count.min(self.capacity - start);
        let second = count - first;
        let len = self.record_len;
        (start * len..(start + first) * len, 0..second * len)
    }

    /// # Safety
    /// The caller must hold exclusive access to `range` for the returned lifetime.
    #[allow(clippy::mut_from_ref)]
    unsafe fn bytes_mut(&self, range: Range<usize>) -> &mut [u8] {
        debug_assert!(range.end <= self.storage.len());
        // UnsafeCell<u8> is repr(transparent) over u8.
        let base = self.storage.as_ptr() as *mut u8;
        unsafe { std::slice::from_raw_parts_mut(base.add(range.start), range.len()) }
    }

    /// # Safety
    /// No writer may touch `range` for the returned lifetime.
    unsafe fn bytes(&self, range: Range<usize>) -> &[u8] {
        debug_assert!(range.end <= self.storage.len());
        let base = self.storage.as_ptr() as *const u8;
        unsafe { std::slice::from_raw_parts(base.add(range.start), range.len()) }
    }
}

/// Allocate a ring of `capacity` records of `record_len` bytes each
/// (`capacity * record_len` bytes of storage).
pub fn record_ring(capacity: usize, record_len: usize) -> Result<(RingProducer, RingConsumer), EngineError> {
    if capacity == 0 || record_len == 0 {
        return Err(EngineError::Configuration(format!(
            "record ring needs a non-zero capacity and record size (capacity {capacity}, record size {record_len})"
        )));
    }
    let bytes = capacity
        .checked_mul(record_len)
        .filter(|_| capacity.checked_mul(2).is_some())
        .ok_or_else(|| EngineError::Configuration(format!("record ring of {capacity} x {record_len} bytes is too large")))?;

    let shared = Arc::new(Shared {
        storage: (0..bytes).map(|_| UnsafeCell::new(0)).collect(),
        record_len,
        capacity,
        write: AtomicUsize::new(0),
        read: AtomicUsize::new(0),
        dropped: AtomicU64::new(0),
    });
    Ok((RingProducer { shared: shared.clone() }, RingConsumer { shared }))
}

// ═══════════════════════════════════════════════════════════════
//  Producer side
// ═══════════════════════════════════════════════════════════════

/// Write half. Not `Clone`: there is exactly one producer.
pub struct RingProducer {
    shared: Arc<Shared>,
}

impl RingProducer {
    pub fn capacity(&self) -> usize {
        self.shared.capacity
    }

    pub fn record_len(&self) -> usize {
        self.shared.record_len
    }

    /// Size of the backing storage in bytes.
    pub fn byte_capacity(&self) -> usize {
        self.shared.storage.len()
    }

    pub fn free(&self) -> usize {
        let write = self.shared.write.load(Ordering::Relaxed);
        let read = self.shared.read.load(Ordering::Acquire);
        self.shared.capacity - self.shared.distance(write, read)
    }

    /// Reserve up to `n` free slots. The grant holds `min(n, free)` slots;
    /// nothing is published until the grant is committed.
    pub fn reserve_write(&mut self, n: usize) -> WriteGrant<'_> {
        let shared = &*self.shared;
        let cursor = shared.write.load(Ordering::Relaxed);
        let read = shared.read.load(Ordering::Acquire);
        let granted = n.min(shared.capacity - shared.distance(cursor, read));
        let (a, b) = shared.regions(cursor, granted);
        // SAFETY: these slots are free. The consumer released them (Acquire
        // above) and cannot reach them before we advance `write`. The two
        // ranges are disjoint: the second one ends before the first begins.
        let (first, second) = unsafe { (shared.bytes_mut(a), shared.bytes_mut(b)) };
        WriteGrant { shared, cursor, granted, first, second }
    }

    /// Copy whole records into the ring and publish them. Returns how many
    /// were accepted; the rest are dropped and counted.
    pub fn push(&mut self, records: &[u8]) -> usize {
        let record_len = self.shared.record_len;
        let requested = records.len() / record_len;

        let mut grant = self.reserve_write(requested);
        let accepted = grant.len();
        let (first, second) = grant.regions();
        let split = first.len();
        first.copy_from_slice(&records[..split]);
        second.copy_from_slice(&records[split..split + second.len()]);
        grant.commit(accepted);

        if accepted < requested {
            self.shared
                .dropped
                .fetch_add((requested - accepted) as u64, Ordering::Relaxed);
        }
        accepted
    }

    /// Records dropped by `push` because the ring was full.
    pub fn dropped(&self) -> u64 {
        self.shared.dropped.load(Ordering::Relaxed)
    }

    pub fn status(&self) -> RingStatus {
        RingStatus { shared: self.shared.clone() }
    }
}

/// Slots reserved for writing. Region 1 is filled before region 2.
pub struct WriteGrant<'a> {
    shared: &'a Shared,
    cursor: usize,
    granted: usize,
    first: &'a mut [u8],
    second: &'a mut [u8],
}

impl WriteGrant<'_> {
    /// Granted slots, in records.
    pub fn len(&self) -> usize {
        self.granted
    }

    pub fn is_empty(&self) -> bool {
        self.granted == 0
    }

    pub fn regions(&mut self) -> (&mut [u8], &mut [u8]) {
        (&mut *self.first, &mut *self.second)
    }

    /// Publish the first `count` granted slots. `count` is clamped to the grant.
    pub fn commit(self, count: usize) {
        let count = count.min(self.granted);
        self.shared
            .write
            .store(self.shared.advance(self.cursor, count), Ordering::Release);
    }
}

// ═══════════════════════════════════════════════════════════════
//  Consumer side
// ═══════════════════════════════════════════════════════════════

/// Read half. Not `Clone`: there is exactly one consumer.
pub struct RingConsumer {
    shared: Arc<Shared>,
}

impl RingConsumer {
    pub fn capacity(&self) -> usize {
        self.shared.capacity
    }

    pub fn record_len(&self) -> usize {
        self.shared.record_len
    }

    /// Records published and not yet released. A snapshot: the producer may
    /// publish more right after.
    pub fn ready(&self) -> usize {
        let read = self.shared.read.load(Ordering::Relaxed);
        let write = self.shared.write.load(Ordering::Acquire);
        self.shared.distance(write, read)
    }

    /// Reserve up to `n` published slots (`min(n, ready)`).
    pub fn reserve_read(&mut self, n: usize) -> ReadGrant<'_> {
        let shared = &*self.shared;
        let cursor = shared.read.load(Ordering::Relaxed);
        let write = shared.write.load(Ordering::Acquire);
        let granted = n.min(shared.distance(write, cursor));
        let (a, b) = shared.regions(cursor, granted);
        // SAFETY: these slots were published (Acquire above) and the producer
        // cannot reuse them before we advance `read`.
        let (first, second) = unsafe { (shared.bytes(a), shared.bytes(b)) };
        ReadGrant { shared, cursor, granted, first, second }
    }

    /// Move up to `max` records into `out`. Returns the number moved.
    pub fn pop_into(&mut self, max: usize, out: &mut Vec<u8>) -> usize {
        let grant = self.reserve_read(max);
        let (first, second) = grant.regions();
        out.extend_from_slice(first);
        out.extend_from_slice(second);
        let count = grant.len();
        grant.commit(count);
        count
    }

    pub fn dropped(&self) -> u64 {
        self.shared.dropped.load(Ordering::Relaxed)
    }

    pub fn status(&self) -> RingStatus {
        RingStatus { shared: self.shared.clone() }
    }
}

/// Slots reserved for reading. Region 1 precedes region 2 in enqueue order.
pub struct ReadGrant<'a> {
    shared: &'a Shared,
    cursor: usize,
    granted: usize,
    first: &'a [u8],
    second: &'a [u8],
}

impl ReadGrant<'_> {
    pub fn len(&self) -> usize {
        self.granted
    }

    pub fn is_empty(&self) -> bool {
        self.granted == 0
    }

    pub fn regions(&self) -> (&[u8], &[u8]) {
        (self.first, self.second)
    }

    /// Release the first `count` granted slots back to the producer.
    pub fn commit(self, count: usize) {
        let count = count.min(self.granted);
        self.shared
            .read
            .store(self.shared.advance(self.cursor, count), Ordering::Release);
    }
}

/// Read-only view of ring occupancy, for stats from any thread.
#[derive(Clone)]
pub struct RingStatus {
    shared: Arc<Shared>,
}

impl RingStatus {
    pub fn capacity(&self) -> usize {
        self.shared.capacity
    }

    pub fn ready(&self) -> usize {
        let read = self.shared.read.load(Ordering::Acquire);
        let write = self.shared.write.load(Ordering::Acquire);
        self.shared.distance(write, read)
    }

    pub fn dropped(&self) -> u64 {
        self.shared.dropped.load(Ordering::Relaxed)
    }
}
