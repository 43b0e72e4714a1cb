//! Error types for data pipelines

use std::io;

use thiserror::Error;

use crate::data::Data;

/// Result type for data pipeline operations
pub type Result<T> = std::result::Result<T, Error>;

/// Error type for data pipeline operations
#[derive(Error, Debug)]
pub enum Error {
    /// A previous error has poisoned the pipeline; no further records can be
    /// pulled until `reset`.
    #[error("The data pipeline is broken by a previous operation and cannot be used")]
    Broken,

    /// A user callback or leaf source failed while producing a record.
    #[error("{message}")]
    Operator {
        /// Human-readable description of the failure
        message: String,

        /// The offending record, when the failing operator still owns it
        example: Option<Data>,
    },

    /// The checkpoint tape does not match the current operator graph, or was
    /// exhausted mid-restore.
    #[error("The checkpoint is corrupted: {0}")]
    CorruptedCheckpoint(String),

    /// Invalid operator configuration
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    /// IO error during file operations
    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] bincode::Error),
}

impl Error {
    /// Builds an operator error without an attached record.
    pub fn operator(message: impl Into<String>) -> Self {
        Error::Operator {
            message: message.into(),
            example: None,
        }
    }

    /// Builds an operator error carrying the offending record.
    pub fn operator_with_example(message: impl Into<String>, example: Data) -> Self {
        Error::Operator {
            message: message.into(),
            example: Some(example),
        }
    }
}
