pub mod connection;
pub mod error;
pub mod record;
pub mod schema;

pub use connection::{ConnectionFactory, ConnectionParams, SinkConnection, StreamMetadata};
pub use error::{ErrorKind, SinkError};
pub use record::{InboundEvent, RecordShape, SpikeRecord};
pub use schema::{FieldDefinition, FieldType, FieldValue, SchemaError, StreamSchema};
