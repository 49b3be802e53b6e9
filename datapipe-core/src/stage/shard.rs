//! Deterministic modular sharding stage

use crate::error::Result;
use crate::source::DataSource;
use crate::tape::Tape;
use crate::value::Value;

/// Keeps the upstream example at position `k` iff
/// `k % num_shards == shard_index`
///
/// Each `next` pulls a full stride of `num_shards` upstream examples
/// and keeps the one at the shard index, so the stage carries no state
/// between calls and its checkpoint is the upstream position alone.
pub(crate) struct ShardSource {
    inner: Box<dyn DataSource>,
    shard_index: usize,
    num_shards: usize,
}

impl ShardSource {
    pub(crate) fn new(inner: Box<dyn DataSource>, shard_index: usize, num_shards: usize) -> Self {
        Self {
            inner,
            shard_index,
            num_shards,
        }
    }
}

impl DataSource for ShardSource {
    fn next(&mut self) -> Result<Option<Value>> {
        let mut kept = None;

        for i in 0..self.num_shards {
            match self.inner.next()? {
                Some(value) => {
                    if i == self.shard_index {
                        kept = Some(value);
                    }
                }
                None => break,
            }
        }

        Ok(kept)
    }

    fn reset(&mut self) -> Result<()> {
        self.inner.reset()
    }

    fn record_position(&mut self, tape: &mut Tape) -> Result<()> {
        self.inner.record_position(tape)
    }

    fn reload_position(&mut self, tape: &mut Tape) -> Result<()> {
        self.inner.reload_position(tape)
    }
}
