use bytemuck::{Pod, Zeroable};

use crate::schema::StreamSchema;

/// One spike in the built-in spike layout. `repr(C)` with no padding, so the
/// in-memory bytes are exactly the 16-byte record of `StreamSchema::spike()`.
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Pod, Zeroable)]
pub struct SpikeRecord {
    pub channel_index: i32,
    pub unit_index: i32,
    pub sample_number: i64,
}

const _: () = assert!(std::mem::size_of::<SpikeRecord>() == SpikeRecord::SIZE);

impl SpikeRecord {
    pub const SIZE: usize = 16;

    pub fn new(channel_index: i32, unit_index: i32, sample_number: i64) -> Self {
        Self { channel_index, unit_index, sample_number }
    }

    pub fn as_bytes(&self) -> &[u8] {
        bytemuck::bytes_of(self)
    }

    /// Read a spike from an unaligned 16-byte record.
    pub fn from_bytes(bytes: &[u8]) -> Option<Self> {
        bytemuck::try_pod_read_unaligned(bytes).ok()
    }
}

/// Kind of inbound object a session accepts. Chosen once at configuration
/// time and fixed for an open session.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum RecordShape {
    #[default]
    Spike,
    /// Generic binary events laid out by a user-declared schema.
    Event(StreamSchema),
}

impl RecordShape {
    pub fn from_event_schema(schema: Option<StreamSchema>) -> Self {
        schema.map_or(RecordShape::Spike, RecordShape::Event)
    }

    pub fn is_spike(&self) -> bool {
        matches!(self, RecordShape::Spike)
    }

    pub fn schema(&self) -> StreamSchema {
        match self {
            RecordShape::Spike => StreamSchema::spike(),
            RecordShape::Event(schema) => schema.clone(),
        }
    }

    pub fn record_len(&self) -> usize {
        match self {
            RecordShape::Spike => SpikeRecord::SIZE,
            RecordShape::Event(schema) => schema.record_len(),
        }
    }
}

/// Event handed over by the host pipeline.
#[derive(Debug, Clone, Copy)]
pub enum InboundEvent<'a> {
    Spike(SpikeRecord),
    /// Payload of a generic binary event, already laid out per the event schema.
    Event(&'a [u8]),
}

impl InboundEvent<'_> {
    pub fn bytes(&self) -> &[u8] {
        match self {
            InboundEvent::Spike(spike) => spike.as_bytes(),
            InboundEvent::Event(payload) => payload,
        }
    }

    pub fn fits(&self, shape: &RecordShape) -> bool {
        match (self, shape) {
            (InboundEvent::Spike(_), RecordShape::Spike) => true,
            (InboundEvent::Event(payload), RecordShape::Event(schema)) => payload.len() == schema.record_len(),
            _ => false,
        }
    }
}
