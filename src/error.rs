//! Error types for the logger loop and the reading store

use thiserror::Error;

pub type LoggerResult<T> = Result<T, LoggerError>;

#[derive(Error, Debug)]
pub enum LoggerError {
    /// Connection, insert or commit failure. Always fatal.
    #[error("Store error: {0}")]
    Store(#[from] sqlx::Error),

    /// Too many consecutive sensor misses under a bounded backoff policy.
    #[error("Sensor unavailable after {attempts} consecutive failed reads")]
    SensorUnavailable { attempts: u32 },

    #[error("Sensor task failed: {0}")]
    SensorTask(#[from] tokio::task::JoinError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}
