//! Error types for the pipeline engine

use std::io;
use thiserror::Error;

/// Result type for pipeline operations
pub type Result<T> = std::result::Result<T, Error>;

/// Error type for pipeline operations
///
/// The variants form the closed taxonomy surfaced at the engine boundary;
/// the host adapter maps each onto its own exception class.
#[derive(Error, Debug)]
pub enum Error {
    /// The pipeline is broken or a stage failed while producing an example
    #[error("Pipeline error: {0}")]
    Pipeline(String),

    /// I/O failure while reading an underlying source
    #[error("Stream error: {0}")]
    Stream(#[from] io::Error),

    /// Malformed or corrupt record-container data
    #[error("Record error: {0}")]
    Record(String),

    /// Invalid argument, including a corrupt checkpoint record
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),
}

impl Error {
    /// The error every `next` call returns once a pipeline is broken
    pub(crate) fn broken() -> Self {
        Error::Pipeline(
            "The data pipeline is broken by a previous operation and cannot be used.".into(),
        )
    }

    /// The error used for any shape or type mismatch while consuming a tape
    pub(crate) fn corrupt_checkpoint() -> Self {
        Error::InvalidArgument("The data pipeline checkpoint record is corrupt.".into())
    }

    /// The error returned when recording position while a stage holds a
    /// computed fault that has not been surfaced yet
    pub(crate) fn pending_fault() -> Self {
        Error::Pipeline(
            "The data pipeline has a pending fault and its position cannot be recorded.".into(),
        )
    }
}
