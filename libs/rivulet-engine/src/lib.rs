pub mod config;
pub mod error;
pub mod naming;
pub mod ring;
pub mod session;
pub mod writer;

pub use config::SinkSettings;
pub use error::EngineError;
pub use naming::{Rng, StreamNaming};
pub use ring::{RingConsumer, RingProducer, RingStatus, record_ring};
pub use session::{BatchSettings, DeliveryMode, HostInfo, SchemaChange, SchemaState, SessionController};
pub use writer::{BatchingWriter, StopOutcome, WriterSnapshot, WriterState};
