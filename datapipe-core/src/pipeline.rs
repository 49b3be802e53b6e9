//! Pipeline assembly, iteration, and checkpointing

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::source::DataSource;
use crate::stage::batch::BatchSource;
use crate::stage::batch_by_length::BatchByLengthSource;
use crate::stage::map::MapSource;
use crate::stage::prefetch::PrefetchSource;
use crate::stage::round_robin::{ExhaustionPolicy, RoundRobinSource};
use crate::stage::shard::ShardSource;
use crate::stage::yield_from::YieldFromSource;
use crate::stage::zip::ZipSource;
use crate::tape::Tape;
use crate::value::Value;

/// A data pipeline owning a chain of sources
///
/// A pipeline is created empty by [`Default`] and finalized exactly once
/// by a [`DataPipelineBuilder`]. Once a stage fails while producing, the
/// pipeline is broken: every further [`next`] call fails until [`reset`].
///
/// [`next`]: DataPipeline::next
/// [`reset`]: DataPipeline::reset
#[derive(Default)]
pub struct DataPipeline {
    source: Option<Box<dyn DataSource>>,
    broken: bool,
}

/// The persisted-state contract of a pipeline
///
/// A named record whose `position` entry holds the ordered tape contents
/// captured by [`DataPipeline::capture_state`]. The values are opaque to
/// the caller; their order is the pre-order walk of the stage chain.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct CheckpointRecord {
    /// Ordered tape contents, absent for an empty record
    #[serde(default)]
    pub position: Option<Vec<Value>>,
}

impl DataPipeline {
    /// Create an empty pipeline that cannot iterate until built
    pub fn new() -> Self {
        Self::default()
    }

    pub(crate) fn from_source(source: Box<dyn DataSource>) -> Self {
        Self {
            source: Some(source),
            broken: false,
        }
    }

    /// Produce the next example, or `None` at the end of the sequence
    pub fn next(&mut self) -> Result<Option<Value>> {
        if self.broken {
            return Err(Error::broken());
        }

        let source = self.source.as_mut().ok_or_else(Self::uninitialized)?;

        match source.next() {
            Ok(value) => Ok(value),
            Err(e) => {
                self.broken = true;

                tracing::warn!(error = %e, "data pipeline is now broken");

                Err(e)
            }
        }
    }

    /// Advance by discarding up to `num_examples` produced examples
    ///
    /// Returns the number actually discarded, which is smaller only if
    /// the pipeline ends first.
    pub fn skip(&mut self, num_examples: usize) -> Result<usize> {
        let mut skipped = 0;

        while skipped < num_examples {
            if self.next()?.is_none() {
                break;
            }

            skipped += 1;
        }

        Ok(skipped)
    }

    /// Return every stage to its initial state and clear the broken flag
    pub fn reset(&mut self) -> Result<()> {
        if let Some(source) = &mut self.source {
            source.reset()?;

            tracing::trace!("data pipeline reset");
        }

        self.broken = false;

        Ok(())
    }

    /// Whether a stage has failed while producing
    pub fn is_broken(&self) -> bool {
        self.broken
    }

    /// Capture the pipeline's position as a checkpoint record
    pub fn capture_state(&mut self) -> Result<CheckpointRecord> {
        if self.broken {
            return Err(Error::broken());
        }

        let source = self.source.as_mut().ok_or_else(Self::uninitialized)?;

        let mut tape = Tape::new();
        source.record_position(&mut tape)?;

        Ok(CheckpointRecord {
            position: Some(tape.into_storage()),
        })
    }

    /// Restore the pipeline's position from a checkpoint record
    ///
    /// With `strict` false, a record without a `position` entry is a
    /// no-op. A record that does not match the stage chain fails as an
    /// invalid-argument fault and leaves the pipeline at its pre-restore
    /// position.
    pub fn restore_state(&mut self, record: &CheckpointRecord, strict: bool) -> Result<()> {
        let Some(position) = &record.position else {
            if strict {
                return Err(Error::InvalidArgument(
                    "The checkpoint record has no position entry.".into(),
                ));
            }

            return Ok(());
        };

        let source = self.source.as_mut().ok_or_else(Self::uninitialized)?;

        // Capture the current position first so a corrupt record cannot
        // leave the chain partially restored.
        let mut backup = Tape::new();
        source.record_position(&mut backup)?;

        let mut tape = Tape::from_values(position.clone());

        let outcome = source.reload_position(&mut tape).and_then(|()| {
            if tape.is_exhausted() {
                Ok(())
            } else {
                Err(Error::corrupt_checkpoint())
            }
        });

        match outcome {
            Ok(()) => Ok(()),
            Err(e) => {
                tracing::debug!(error = %e, "checkpoint restore failed, rolling back");

                let mut backup = Tape::from_values(backup.into_storage());
                if source.reload_position(&mut backup).is_err() {
                    // The backup came from the chain itself; if even that
                    // fails, fall back to a full reset.
                    source.reset()?;
                }

                Err(Error::corrupt_checkpoint())
            }
        }
    }

    /// Iterate the pipeline from the start of a fresh epoch
    ///
    /// Resets the pipeline, then forwards [`next`] until the end of the
    /// sequence.
    ///
    /// [`next`]: DataPipeline::next
    pub fn iter(&mut self) -> DataPipelineIter<'_> {
        let pending_error = self.reset().err();

        DataPipelineIter {
            pipeline: self,
            pending_error,
            done: false,
        }
    }

    pub(crate) fn record_position(&mut self, tape: &mut Tape) -> Result<()> {
        let source = self.source.as_mut().ok_or_else(Self::uninitialized)?;

        source.record_position(tape)
    }

    pub(crate) fn reload_position(&mut self, tape: &mut Tape) -> Result<()> {
        let source = self.source.as_mut().ok_or_else(Self::uninitialized)?;

        source.reload_position(tape)?;
        self.broken = false;

        Ok(())
    }

    pub(crate) fn reset_source(&mut self) -> Result<()> {
        self.reset()
    }

    fn uninitialized() -> Error {
        Error::Pipeline("The data pipeline is empty and cannot be used.".into())
    }
}

/// Iterator view over a pipeline
///
/// Yields `Result<Value>`; the first error ends the iteration.
pub struct DataPipelineIter<'a> {
    pipeline: &'a mut DataPipeline,
    pending_error: Option<Error>,
    done: bool,
}

impl Iterator for DataPipelineIter<'_> {
    type Item = Result<Value>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.done {
            return None;
        }

        if let Some(e) = self.pending_error.take() {
            self.done = true;

            return Some(Err(e));
        }

        match self.pipeline.next() {
            Ok(Some(value)) => Some(Ok(value)),
            Ok(None) => {
                self.done = true;

                None
            }
            Err(e) => {
                self.done = true;

                Some(Err(e))
            }
        }
    }
}

/// Fluent builder accumulating a linear chain of stages
///
/// Every stage method consumes the builder and returns a new one wrapping
/// an additional source layer; [`and_return`] finalizes the chain into a
/// [`DataPipeline`]. Stage arguments are validated here, at construction,
/// never deferred to the first `next` call.
///
/// [`and_return`]: DataPipelineBuilder::and_return
pub struct DataPipelineBuilder {
    source: Box<dyn DataSource>,
}

impl DataPipelineBuilder {
    /// Start a chain from a custom leaf source
    pub fn from_source(source: Box<dyn DataSource>) -> Self {
        Self { source }
    }

    /// Accumulate `batch_size` examples into list-valued batches
    ///
    /// The final partial batch is emitted unless `drop_remainder` is set.
    /// When `pad_value` is given and every batched example is a list,
    /// shorter lists are padded to the longest in the batch.
    pub fn batch(
        self,
        batch_size: usize,
        drop_remainder: bool,
        pad_value: Option<Value>,
    ) -> Result<Self> {
        if batch_size == 0 {
            return Err(Error::InvalidArgument(
                "The batch size must be greater than zero.".into(),
            ));
        }

        Ok(Self {
            source: Box::new(BatchSource::new(
                self.source,
                batch_size,
                drop_remainder,
                pad_value,
            )),
        })
    }

    /// Bucket examples by length into `(batch_size, max_length)` tiers
    ///
    /// Each example is routed to the smallest tier admitting its length;
    /// a tier flushes as a padded batch once full, and all non-empty
    /// tiers flush in order at the end of the upstream sequence.
    pub fn batch_by_length(self, tiers: Vec<(usize, usize)>, pad_value: Value) -> Result<Self> {
        Ok(Self {
            source: Box::new(BatchByLengthSource::new(self.source, tiers, pad_value)?),
        })
    }

    /// Apply `f` to every example
    ///
    /// With `chunk_size` greater than one, `chunk_size` examples are
    /// pulled and transformed in parallel, and the results are yielded
    /// in the original input order.
    pub fn map<F>(self, f: F, chunk_size: usize) -> Result<Self>
    where
        F: Fn(Value) -> Result<Value> + Send + Sync + 'static,
    {
        if chunk_size == 0 {
            return Err(Error::InvalidArgument(
                "The map chunk size must be greater than zero.".into(),
            ));
        }

        Ok(Self {
            source: Box::new(MapSource::new(self.source, std::sync::Arc::new(f), chunk_size)),
        })
    }

    /// Run the upstream on a background task feeding a bounded queue of
    /// `num_examples` elements
    ///
    /// A depth of zero leaves the chain unchanged.
    pub fn prefetch(self, num_examples: usize) -> Self {
        if num_examples == 0 {
            return self;
        }

        Self {
            source: Box::new(PrefetchSource::new(self.source, num_examples)),
        }
    }

    /// Keep only the examples whose position is `shard_index` modulo
    /// `num_shards`
    pub fn shard(self, shard_index: usize, num_shards: usize) -> Result<Self> {
        if num_shards == 0 {
            return Err(Error::InvalidArgument(
                "The number of shards must be greater than zero.".into(),
            ));
        }

        if shard_index >= num_shards {
            return Err(Error::InvalidArgument(format!(
                "The shard index {shard_index} must be less than the number of shards {num_shards}."
            )));
        }

        Ok(Self {
            source: Box::new(ShardSource::new(self.source, shard_index, num_shards)),
        })
    }

    /// For every upstream example, fully drain the sub-pipeline returned
    /// by `f` before advancing
    pub fn yield_from<F>(self, f: F) -> Self
    where
        F: Fn(&Value) -> Result<DataPipeline> + Send + Sync + 'static,
    {
        Self {
            source: Box::new(YieldFromSource::new(self.source, Box::new(f))),
        }
    }

    /// Finalize the chain into a pipeline, consuming the builder
    pub fn and_return(self) -> DataPipeline {
        DataPipeline::from_source(self.source)
    }
}

/// Combine pipelines by pulling one example from every input per step
///
/// Each step yields the pulled examples as a single list value, in
/// input-list order; the combined pipeline ends as soon as any one input
/// is exhausted. Takes exclusive ownership of the given pipelines.
pub fn zip(pipelines: Vec<DataPipeline>) -> Result<DataPipeline> {
    validate_mux_inputs(&pipelines)?;

    Ok(DataPipeline::from_source(Box::new(ZipSource::new(pipelines))))
}

/// Combine pipelines by drawing from one input per step
///
/// Inputs are visited in proportion to `probs` (uniform when omitted)
/// using a deterministic weighted schedule. Exhausted inputs are skipped
/// and the remaining weights renormalized; use [`round_robin_with`] to
/// stop at the first exhausted input instead. Takes exclusive ownership
/// of the given pipelines.
pub fn round_robin(pipelines: Vec<DataPipeline>, probs: Option<Vec<f64>>) -> Result<DataPipeline> {
    round_robin_with(pipelines, probs, ExhaustionPolicy::DrainRemaining)
}

/// [`round_robin`] with an explicit exhaustion policy
pub fn round_robin_with(
    pipelines: Vec<DataPipeline>,
    probs: Option<Vec<f64>>,
    policy: ExhaustionPolicy,
) -> Result<DataPipeline> {
    validate_mux_inputs(&pipelines)?;

    let weights = match probs {
        Some(probs) => {
            if probs.len() != pipelines.len() {
                return Err(Error::InvalidArgument(format!(
                    "The number of probabilities {} must match the number of pipelines {}.",
                    probs.len(),
                    pipelines.len()
                )));
            }

            if probs.iter().any(|p| !p.is_finite() || *p < 0.0) || probs.iter().sum::<f64>() <= 0.0
            {
                return Err(Error::InvalidArgument(
                    "The probabilities must be non-negative finite numbers with a positive sum."
                        .into(),
                ));
            }

            probs
        }
        None => vec![1.0; pipelines.len()],
    };

    Ok(DataPipeline::from_source(Box::new(RoundRobinSource::new(
        pipelines, weights, policy,
    ))))
}

fn validate_mux_inputs(pipelines: &[DataPipeline]) -> Result<()> {
    if pipelines.is_empty() {
        return Err(Error::InvalidArgument(
            "At least one data pipeline must be specified.".into(),
        ));
    }

    if pipelines.iter().any(|p| p.source.is_none()) {
        return Err(Error::InvalidArgument(
            "An empty data pipeline cannot be multiplexed.".into(),
        ));
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::source::read_sequence;

    fn ints(n: i64) -> Vec<Value> {
        (0..n).map(Value::from).collect()
    }

    fn drain(pipeline: &mut DataPipeline) -> Vec<Value> {
        let mut out = Vec::new();
        while let Some(value) = pipeline.next().unwrap() {
            out.push(value);
        }
        out
    }

    #[test]
    fn test_bare_pipeline_reproduces_input() {
        let mut pipeline = read_sequence(ints(5)).and_return();

        assert_eq!(drain(&mut pipeline), ints(5));
        assert_eq!(pipeline.next().unwrap(), None);
    }

    #[test]
    fn test_empty_pipeline_cannot_iterate() {
        let mut pipeline = DataPipeline::new();

        assert!(matches!(pipeline.next(), Err(Error::Pipeline(_))));
        assert!(matches!(pipeline.capture_state(), Err(Error::Pipeline(_))));
    }

    #[test]
    fn test_skip() {
        let mut pipeline = read_sequence(ints(5)).and_return();

        assert_eq!(pipeline.skip(2).unwrap(), 2);
        assert_eq!(pipeline.next().unwrap(), Some(Value::Int(2)));

        // Fewer remain than requested.
        assert_eq!(pipeline.skip(10).unwrap(), 2);
        assert_eq!(pipeline.next().unwrap(), None);
    }

    #[test]
    fn test_broken_pipeline_reraises_until_reset() {
        let mut pipeline = read_sequence(ints(5))
            .map(
                |v| match v.as_int() {
                    Some(2) => Err(Error::Pipeline("boom".into())),
                    _ => Ok(v),
                },
                1,
            )
            .unwrap()
            .and_return();

        assert_eq!(pipeline.next().unwrap(), Some(Value::Int(0)));
        assert_eq!(pipeline.next().unwrap(), Some(Value::Int(1)));

        assert!(pipeline.next().is_err());
        assert!(pipeline.is_broken());

        // Re-raises without recomputing upstream.
        assert!(pipeline.next().is_err());

        pipeline.reset().unwrap();
        assert!(!pipeline.is_broken());
        assert_eq!(pipeline.next().unwrap(), Some(Value::Int(0)));
    }

    #[test]
    fn test_iter_resets_epoch() {
        let mut pipeline = read_sequence(ints(3)).and_return();

        pipeline.skip(2).unwrap();

        let values: Vec<_> = pipeline.iter().map(Result::unwrap).collect();
        assert_eq!(values, ints(3));

        // A second epoch restarts from the beginning.
        let values: Vec<_> = pipeline.iter().map(Result::unwrap).collect();
        assert_eq!(values, ints(3));
    }

    #[test]
    fn test_capture_restore_resumes_suffix() {
        let mut pipeline = read_sequence(ints(6)).and_return();
        pipeline.skip(2).unwrap();

        let record = pipeline.capture_state().unwrap();

        let mut restored = read_sequence(ints(6)).and_return();
        restored.restore_state(&record, true).unwrap();

        assert_eq!(drain(&mut restored), ints(6)[2..].to_vec());
    }

    #[test]
    fn test_restore_missing_position() {
        let mut pipeline = read_sequence(ints(3)).and_return();
        pipeline.skip(1).unwrap();

        let record = CheckpointRecord::default();

        // Non-strict restore is a no-op.
        pipeline.restore_state(&record, false).unwrap();
        assert_eq!(pipeline.next().unwrap(), Some(Value::Int(1)));

        assert!(matches!(
            pipeline.restore_state(&record, true),
            Err(Error::InvalidArgument(_))
        ));
    }

    #[test]
    fn test_restore_corrupt_record_leaves_position() {
        let mut pipeline = read_sequence(ints(5)).and_return();
        pipeline.skip(3).unwrap();

        let record = CheckpointRecord {
            position: Some(vec![Value::from("garbage"), Value::from(true)]),
        };

        assert!(matches!(
            pipeline.restore_state(&record, true),
            Err(Error::InvalidArgument(_))
        ));

        // Pre-restore position survives.
        assert_eq!(pipeline.next().unwrap(), Some(Value::Int(3)));
    }

    #[test]
    fn test_restore_shape_mismatch_is_corrupt() {
        let mut source = read_sequence(ints(5)).and_return();
        let mut record = source.capture_state().unwrap();

        // Extra trailing entries do not match the stage chain.
        record.position.as_mut().unwrap().push(Value::Int(0));

        let mut pipeline = read_sequence(ints(5)).and_return();
        assert!(matches!(
            pipeline.restore_state(&record, true),
            Err(Error::InvalidArgument(_))
        ));
    }

    #[test]
    fn test_checkpoint_record_serde_round_trip() {
        let mut pipeline = read_sequence(ints(4)).and_return();
        pipeline.skip(2).unwrap();

        let record = pipeline.capture_state().unwrap();

        let encoded = bincode::serialize(&record).unwrap();
        let decoded: CheckpointRecord = bincode::deserialize(&encoded).unwrap();

        let mut restored = read_sequence(ints(4)).and_return();
        restored.restore_state(&decoded, true).unwrap();

        assert_eq!(drain(&mut restored), ints(4)[2..].to_vec());
    }

    #[test]
    fn test_builder_validation() {
        assert!(read_sequence(ints(1)).batch(0, false, None).is_err());
        assert!(read_sequence(ints(1)).map(Ok, 0).is_err());
        assert!(read_sequence(ints(1)).shard(3, 3).is_err());
        assert!(read_sequence(ints(1)).shard(0, 0).is_err());
        assert!(read_sequence(ints(1))
            .batch_by_length(vec![], Value::Int(0))
            .is_err());
    }

    #[test]
    fn test_mux_validation() {
        assert!(zip(vec![]).is_err());
        assert!(zip(vec![DataPipeline::new()]).is_err());

        let p = || read_sequence(ints(2)).and_return();

        assert!(round_robin(vec![p(), p()], Some(vec![0.5])).is_err());
        assert!(round_robin(vec![p(), p()], Some(vec![-1.0, 2.0])).is_err());
        assert!(round_robin(vec![p(), p()], Some(vec![0.0, 0.0])).is_err());
    }
}
