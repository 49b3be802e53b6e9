//! Source-format readers for datapipe pipelines
//!
//! Readers turn on-disk formats into pipeline builders. Faults use the
//! taxonomy of `datapipe-core`: I/O failures are stream faults, and
//! malformed file content is a record fault.

#![warn(missing_docs)]

pub mod container;

pub use container::{read_record_container, RecordContainerWriter};
