//! Stage and multiplexer implementations of the source contract

pub(crate) mod batch;
pub(crate) mod batch_by_length;
pub(crate) mod map;
pub(crate) mod prefetch;
pub mod round_robin;
pub(crate) mod shard;
pub(crate) mod yield_from;
pub(crate) mod zip;
