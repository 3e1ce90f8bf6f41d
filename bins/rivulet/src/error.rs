use rivulet_api::{SchemaError, SinkError};
use rivulet_engine::EngineError;

#[derive(Debug, thiserror::Error)]
pub enum RivuletError {
    #[error("config: {0}")]
    Config(String),

    #[error("{0}")]
    Engine(#[from] EngineError),

    #[error("{0}")]
    Sink(#[from] SinkError),

    #[error("{0}")]
    Schema(#[from] SchemaError),

    #[error("io: {0}")]
    Io(#[from] std::io::Error),
}
