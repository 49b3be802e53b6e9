//! Flat-mapping stage over sub-pipelines

use crate::error::Result;
use crate::pipeline::DataPipeline;
use crate::source::DataSource;
use crate::tape::Tape;
use crate::value::Value;

/// The user-supplied function producing a sub-pipeline per example
pub(crate) type YieldFn = Box<dyn Fn(&Value) -> Result<DataPipeline> + Send + Sync>;

/// For each upstream example, obtains a sub-pipeline and fully drains it
/// before requesting the next example
///
/// Checkpointing records the active example and the sub-pipeline's
/// position; reloading rebuilds the sub-pipeline through the function
/// and restores its position.
pub(crate) struct YieldFromSource {
    inner: Box<dyn DataSource>,
    f: YieldFn,
    current: Option<(Value, DataPipeline)>,
}

impl YieldFromSource {
    pub(crate) fn new(inner: Box<dyn DataSource>, f: YieldFn) -> Self {
        Self {
            inner,
            f,
            current: None,
        }
    }
}

impl DataSource for YieldFromSource {
    fn next(&mut self) -> Result<Option<Value>> {
        loop {
            if let Some((_, pipeline)) = &mut self.current {
                if let Some(value) = pipeline.next()? {
                    return Ok(Some(value));
                }

                self.current = None;
            }

            match self.inner.next()? {
                Some(example) => {
                    let pipeline = (self.f)(&example)?;

                    self.current = Some((example, pipeline));
                }
                None => return Ok(None),
            }
        }
    }

    fn reset(&mut self) -> Result<()> {
        self.current = None;

        self.inner.reset()
    }

    fn record_position(&mut self, tape: &mut Tape) -> Result<()> {
        match &mut self.current {
            Some((example, pipeline)) => {
                tape.record(true);
                tape.record(example.clone());

                pipeline.record_position(tape)?;
            }
            None => tape.record(false),
        }

        self.inner.record_position(tape)
    }

    fn reload_position(&mut self, tape: &mut Tape) -> Result<()> {
        self.current = None;

        if tape.read_bool()? {
            let example = tape.read()?;

            let mut pipeline = (self.f)(&example)?;
            pipeline.reload_position(tape)?;

            self.current = Some((example, pipeline));
        }

        self.inner.reload_position(tape)
    }
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

    /// Expands example `n` into `n` copies of `n`.
    fn repeat_n(example: &Value) -> Result<DataPipeline> {
        let n = example.as_int().unwrap_or(0);

        Ok(read_sequence(vec![example.clone(); n as usize]).and_return())
    }

    #[test]
    fn test_yield_from_drains_each_sub_pipeline() {
        let mut pipeline = read_sequence(ints(4)).yield_from(repeat_n).and_return();

        let expected = vec![
            Value::Int(1),
            Value::Int(2),
            Value::Int(2),
            Value::Int(3),
            Value::Int(3),
            Value::Int(3),
        ];

        assert_eq!(drain(&mut pipeline), expected);
    }

    #[test]
    fn test_yield_from_checkpoint_mid_sub_pipeline() {
        let build = || read_sequence(ints(4)).yield_from(repeat_n).and_return();

        let mut pipeline = build();

        // Stop inside the sub-pipeline for example 3.
        pipeline.skip(4).unwrap();
        let record = pipeline.capture_state().unwrap();

        let mut restored = build();
        restored.restore_state(&record, true).unwrap();

        assert_eq!(drain(&mut restored), vec![Value::Int(3), Value::Int(3)]);
    }

    #[test]
    fn test_yield_from_reset() {
        let mut pipeline = read_sequence(ints(3)).yield_from(repeat_n).and_return();

        pipeline.skip(2).unwrap();
        pipeline.reset().unwrap();

        assert_eq!(drain(&mut pipeline).len(), 3);
    }
}
