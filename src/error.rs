use thiserror::Error;

/// Failures reading from the operating system.
#[derive(Error, Debug)]
pub enum ProbeError {
    #[error("system information unavailable: {0}")]
    Unavailable(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("probe task failed: {0}")]
    TaskFailed(String),
}

impl From<tokio::task::JoinError> for ProbeError {
    fn from(err: tokio::task::JoinError) -> Self {
        ProbeError::TaskFailed(err.to_string())
    }
}

/// Rejected or failed engine operations.
#[derive(Error, Debug)]
pub enum EngineError {
    #[error("a recording session is already active")]
    RecordingAlreadyActive,

    #[error("no recording session is active")]
    RecordingNotActive,

    #[error("monitoring must be enabled to start recording")]
    MonitoringDisabled,

    #[error("the engine is shutting down")]
    ShuttingDown,

    #[error("persistence is not configured")]
    PersistenceUnavailable,

    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    #[error("storage error: {0}")]
    Storage(#[from] sqlx::Error),

    #[error(transparent)]
    Probe(#[from] ProbeError),
}

pub type Result<T, E = EngineError> = std::result::Result<T, E>;
