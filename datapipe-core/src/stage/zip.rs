//! Lock-step zip multiplexer

use crate::error::Result;
use crate::pipeline::DataPipeline;
use crate::source::DataSource;
use crate::tape::Tape;
use crate::value::Value;

/// Pulls one example from every owned pipeline per step, in input-list
/// order, and yields them combined as a single list value
///
/// The combined sequence ends as soon as any input is exhausted; the
/// end is latched so later calls do not keep pulling from the longer
/// inputs.
pub(crate) struct ZipSource {
    pipelines: Vec<DataPipeline>,
    done: bool,
}

impl ZipSource {
    pub(crate) fn new(pipelines: Vec<DataPipeline>) -> Self {
        Self {
            pipelines,
            done: false,
        }
    }
}

impl DataSource for ZipSource {
    fn next(&mut self) -> Result<Option<Value>> {
        if self.done {
            return Ok(None);
        }

        let mut combined = Vec::with_capacity(self.pipelines.len());

        for pipeline in &mut self.pipelines {
            match pipeline.next()? {
                Some(value) => combined.push(value),
                None => {
                    self.done = true;

                    return Ok(None);
                }
            }
        }

        Ok(Some(Value::List(combined)))
    }

    fn reset(&mut self) -> Result<()> {
        for pipeline in &mut self.pipelines {
            pipeline.reset_source()?;
        }

        self.done = false;

        Ok(())
    }

    fn record_position(&mut self, tape: &mut Tape) -> Result<()> {
        tape.record(self.done);

        for pipeline in &mut self.pipelines {
            pipeline.record_position(tape)?;
        }

        Ok(())
    }

    fn reload_position(&mut self, tape: &mut Tape) -> Result<()> {
        self.done = tape.read_bool()?;

        for pipeline in &mut self.pipelines {
            pipeline.reload_position(tape)?;
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::zip;
    use crate::source::read_sequence;

    fn ints(range: std::ops::Range<i64>) -> Vec<Value> {
        range.map(Value::from).collect()
    }

    fn drain(pipeline: &mut DataPipeline) -> Vec<Value> {
        let mut out = Vec::new();
        while let Some(value) = pipeline.next().unwrap() {
            out.push(value);
        }
        out
    }

    #[test]
    fn test_zip_combines_in_input_order() {
        let pipelines = vec![
            read_sequence(ints(0..3)).and_return(),
            read_sequence(ints(10..13)).and_return(),
        ];

        let mut combined = zip(pipelines).unwrap();

        assert_eq!(
            combined.next().unwrap(),
            Some(Value::List(vec![Value::Int(0), Value::Int(10)]))
        );
        assert_eq!(
            combined.next().unwrap(),
            Some(Value::List(vec![Value::Int(1), Value::Int(11)]))
        );
    }

    #[test]
    fn test_zip_ends_at_shortest_input() {
        let pipelines = vec![
            read_sequence(ints(0..5)).and_return(),
            read_sequence(ints(0..3)).and_return(),
            read_sequence(ints(0..7)).and_return(),
        ];

        let mut combined = zip(pipelines).unwrap();

        assert_eq!(drain(&mut combined).len(), 3);

        // Latched: further calls stay at the end.
        assert_eq!(combined.next().unwrap(), None);
    }

    #[test]
    fn test_zip_reset() {
        let pipelines = vec![
            read_sequence(ints(0..2)).and_return(),
            read_sequence(ints(0..2)).and_return(),
        ];

        let mut combined = zip(pipelines).unwrap();

        drain(&mut combined);
        combined.reset().unwrap();

        assert_eq!(drain(&mut combined).len(), 2);
    }

    #[test]
    fn test_zip_checkpoint_round_trip() {
        let build = || {
            zip(vec![
                read_sequence(ints(0..4)).and_return(),
                read_sequence(ints(10..14)).and_return(),
            ])
            .unwrap()
        };

        let mut combined = build();
        combined.skip(2).unwrap();

        let record = combined.capture_state().unwrap();

        let mut restored = build();
        restored.restore_state(&record, true).unwrap();

        assert_eq!(drain(&mut restored), drain(&mut combined));
    }
}
