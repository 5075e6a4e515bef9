//! Error types shared by the schedule calculator, the tracker and the stores.

use thiserror::Error;

/// Errors raised while validating or evaluating a path's schedule.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ScheduleError {
    #[error("invalid schedule time '{0}', expected HH:MM")]
    InvalidTime(String),

    #[error("unsupported recurrence type '{0}'")]
    UnsupportedRecurrence(String),

    #[error("invalid day {day:?} for {kind} schedule")]
    InvalidDay { kind: String, day: Option<u32> },
}

/// Errors raised by a [`crate::KeyValueStore`] implementation.
#[derive(Error, Debug)]
pub enum StoreError {
    #[error("store i/o error for key '{key}': {source}")]
    Io {
        key: String,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to (de)serialize value for key '{key}': {source}")]
    Serialize {
        key: String,
        #[source]
        source: serde_json::Error,
    },
}

/// Errors raised by the execution tracker.
#[derive(Error, Debug)]
pub enum TrackerError {
    /// The in-memory state was updated but could not be written through.
    #[error("failed to persist '{key}': {source}")]
    PersistFailed {
        key: String,
        #[source]
        source: StoreError,
    },

    /// Informational only, logged when reconciliation drops a stale record.
    #[error("in-progress record for unknown path '{0}' dropped")]
    UnknownPathOnReconcile(String),
}

/// Errors raised by the path repository.
#[derive(Error, Debug)]
pub enum RepositoryError {
    #[error("automation path '{0}' not found")]
    NotFound(String),

    #[error(transparent)]
    Schedule(#[from] ScheduleError),

    #[error(transparent)]
    Store(#[from] StoreError),
}

/// Errors raised by a content generation job.
#[derive(Error, Debug)]
pub enum GenerationError {
    #[error("failed to launch generator '{command}': {source}")]
    Spawn {
        command: String,
        #[source]
        source: std::io::Error,
    },

    #[error("generation failed: {0}")]
    Failed(String),
}
