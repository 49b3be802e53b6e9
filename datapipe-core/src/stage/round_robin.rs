//! Weighted round-robin multiplexer

use crate::error::Result;
use crate::pipeline::DataPipeline;
use crate::source::DataSource;
use crate::tape::Tape;
use crate::value::Value;

/// How a round-robin multiplexer handles unequal-length inputs
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum ExhaustionPolicy {
    /// Skip exhausted inputs, renormalizing the remaining weights, and
    /// end once every input is exhausted
    #[default]
    DrainRemaining,

    /// End the combined pipeline as soon as any input is exhausted
    StopAtFirst,
}

/// Draws one example per step from a fixed list of pipelines
///
/// Selection is a deterministic weighted schedule: each step picks the
/// non-exhausted input with the lowest `(draws + 1) / weight` score,
/// breaking ties toward the lower index. Uniform weights therefore
/// reduce to cyclic order, and long-run draw frequencies converge to
/// the normalized weights. Draw counters and exhaustion flags are
/// checkpoint state.
pub(crate) struct RoundRobinSource {
    pipelines: Vec<DataPipeline>,
    weights: Vec<f64>,
    policy: ExhaustionPolicy,
    draws: Vec<usize>,
    exhausted: Vec<bool>,
    done: bool,
}

impl RoundRobinSource {
    pub(crate) fn new(
        pipelines: Vec<DataPipeline>,
        weights: Vec<f64>,
        policy: ExhaustionPolicy,
    ) -> Self {
        let num_pipelines = pipelines.len();

        Self {
            pipelines,
            weights,
            policy,
            draws: vec![0; num_pipelines],
            exhausted: vec![false; num_pipelines],
            done: false,
        }
    }

    fn select(&self) -> Option<usize> {
        let mut best: Option<(usize, f64)> = None;

        for i in 0..self.pipelines.len() {
            if self.exhausted[i] || self.weights[i] <= 0.0 {
                continue;
            }

            #[allow(clippy::cast_precision_loss)]
            let score = (self.draws[i] as f64 + 1.0) / self.weights[i];

            match best {
                Some((_, best_score)) if score >= best_score => {}
                _ => best = Some((i, score)),
            }
        }

        best.map(|(i, _)| i)
    }
}

impl DataSource for RoundRobinSource {
    fn next(&mut self) -> Result<Option<Value>> {
        if self.done {
            return Ok(None);
        }

        loop {
            let Some(index) = self.select() else {
                self.done = true;

                return Ok(None);
            };

            match self.pipelines[index].next()? {
                Some(value) => {
                    self.draws[index] += 1;

                    return Ok(Some(value));
                }
                None => match self.policy {
                    ExhaustionPolicy::StopAtFirst => {
                        self.done = true;

                        return Ok(None);
                    }
                    ExhaustionPolicy::DrainRemaining => self.exhausted[index] = true,
                },
            }
        }
    }

    fn reset(&mut self) -> Result<()> {
        for pipeline in &mut self.pipelines {
            pipeline.reset_source()?;
        }

        self.draws.iter_mut().for_each(|d| *d = 0);
        self.exhausted.iter_mut().for_each(|e| *e = false);
        self.done = false;

        Ok(())
    }

    fn record_position(&mut self, tape: &mut Tape) -> Result<()> {
        tape.record(self.done);

        for i in 0..self.pipelines.len() {
            tape.record_usize(self.draws[i]);
            tape.record(self.exhausted[i]);
        }

        for pipeline in &mut self.pipelines {
            pipeline.record_position(tape)?;
        }

        Ok(())
    }

    fn reload_position(&mut self, tape: &mut Tape) -> Result<()> {
        self.done = tape.read_bool()?;

        for i in 0..self.pipelines.len() {
            self.draws[i] = tape.read_usize()?;
            self.exhausted[i] = tape.read_bool()?;
        }

        for pipeline in &mut self.pipelines {
            pipeline.reload_position(tape)?;
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::{round_robin, round_robin_with};
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
    fn test_uniform_weights_cycle_in_order() {
        let pipelines = vec![
            read_sequence(ints(0..2)).and_return(),
            read_sequence(ints(10..12)).and_return(),
            read_sequence(ints(20..22)).and_return(),
        ];

        let mut combined = round_robin(pipelines, None).unwrap();

        let expected: Vec<Value> = [0, 10, 20, 1, 11, 21]
            .iter()
            .map(|&i| Value::Int(i))
            .collect();
        assert_eq!(drain(&mut combined), expected);
    }

    #[test]
    fn test_single_pipeline_reduces_to_plain_iteration() {
        let mut combined =
            round_robin(vec![read_sequence(ints(0..5)).and_return()], None).unwrap();

        assert_eq!(drain(&mut combined), ints(0..5));
    }

    #[test]
    fn test_weighted_frequencies_converge() {
        let pipelines = vec![
            read_sequence(vec![Value::Int(0); 1000]).and_return(),
            read_sequence(vec![Value::Int(1); 1000]).and_return(),
        ];

        let mut combined = round_robin(pipelines, Some(vec![3.0, 1.0])).unwrap();

        let mut counts = [0usize; 2];
        for _ in 0..400 {
            let value = combined.next().unwrap().unwrap();
            counts[usize::try_from(value.as_int().unwrap()).unwrap()] += 1;
        }

        assert_eq!(counts, [300, 100]);
    }

    #[test]
    fn test_drain_remaining_policy() {
        let pipelines = vec![
            read_sequence(ints(0..1)).and_return(),
            read_sequence(ints(10..13)).and_return(),
        ];

        let mut combined = round_robin(pipelines, None).unwrap();

        // After the first input exhausts, the second continues alone.
        let values = drain(&mut combined);
        assert_eq!(values.len(), 4);
        assert_eq!(values[0], Value::Int(0));

        assert_eq!(combined.next().unwrap(), None);
    }

    #[test]
    fn test_stop_at_first_policy() {
        let pipelines = vec![
            read_sequence(ints(0..1)).and_return(),
            read_sequence(ints(10..13)).and_return(),
        ];

        let mut combined =
            round_robin_with(pipelines, None, ExhaustionPolicy::StopAtFirst).unwrap();

        let values = drain(&mut combined);
        assert_eq!(values, vec![Value::Int(0), Value::Int(10)]);
    }

    #[test]
    fn test_round_robin_checkpoint_round_trip() {
        let build = || {
            round_robin(
                vec![
                    read_sequence(ints(0..3)).and_return(),
                    read_sequence(ints(10..13)).and_return(),
                ],
                None,
            )
            .unwrap()
        };

        let mut combined = build();
        combined.skip(3).unwrap();

        let record = combined.capture_state().unwrap();

        let mut restored = build();
        restored.restore_state(&record, true).unwrap();

        assert_eq!(drain(&mut restored), drain(&mut combined));
    }
}
