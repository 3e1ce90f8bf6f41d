use rivulet_api::{SchemaError, SinkError};

#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    #[error("configuration error: {0}")]
    Configuration(String),

    #[error("connection error: {0}")]
    Connection(#[from] SinkError),

    #[error("schema error: {0}")]
    Schema(#[from] SchemaError),

    #[error("record size mismatch: expected a multiple of {expected} bytes, got {actual}")]
    RecordSize { expected: usize, actual: usize },

    #[error("event does not match the active record shape ({expected})")]
    ShapeMismatch { expected: &'static str },

    #[error("session is open, stop it before reconfiguring")]
    SessionOpen,

    #[error("session is not open")]
    NotOpen,

    #[error("settings error: {0}")]
    Settings(String),

    #[error("background task failed: {0}")]
    Task(#[from] tokio::task::JoinError),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

impl EngineError {
    /// Add context to the error.
    ///
    /// For `Connection` variant, context is added to the inner `SinkError`.
    /// For message variants, context is prepended to the message.
    pub fn with_context(self, ctx: impl std::fmt::Display) -> Self {
        match self {
            EngineError::Connection(e) => EngineError::Connection(e.with_context(ctx)),
            EngineError::Configuration(msg) => EngineError::Configuration(format!("{ctx}: {msg}")),
            EngineError::Settings(msg) => EngineError::Settings(format!("{ctx}: {msg}")),
            other => other,
        }
    }
}
