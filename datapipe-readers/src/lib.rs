//! File-backed leaf sources for data pipelines
//!
//! This crate provides the pipeline factories that read from the
//! filesystem: directory enumeration and framed record archives. All
//! sources implement the core pull/reset/checkpoint contract and share the
//! core error taxonomy.

#![warn(missing_docs)]

mod archive;
mod list_files;

pub use archive::{read_zipped_records, RecordArchiveWriter};
pub use list_files::list_files;

// Re-export core types for convenience
pub use datapipe_core::{Data, DataPipeline, DataPipelineBuilder, Error, Result};
