//! Lazy, composable, checkpointable data-loading pipelines
//!
//! This crate provides the execution engine for data-loading pipelines
//! used in machine-learning training: a polymorphic source contract, a
//! builder composing transformation stages (batching, mapping,
//! prefetching, sharding, flat-mapping), multiplexers combining several
//! pipelines, and a checkpoint protocol allowing exact resumption of
//! iteration after interruption.

#![warn(missing_docs)]

pub mod error;
pub mod files;
pub mod memory;
pub mod pipeline;
pub mod source;
pub mod tape;
pub mod text;
pub mod value;

mod stage;

// Re-export key types for convenience
pub use error::{Error, Result};
pub use files::list_files;
pub use memory::ByteBuffer;
pub use pipeline::{
    round_robin, round_robin_with, zip, CheckpointRecord, DataPipeline, DataPipelineBuilder,
    DataPipelineIter,
};
pub use source::{read_sequence, DataSource};
pub use stage::round_robin::ExhaustionPolicy;
pub use tape::Tape;
pub use text::ImmutableText;
pub use value::Value;
