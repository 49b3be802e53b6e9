//! Length-bucketed batching stage

use crate::error::{Error, Result};
use crate::source::DataSource;
use crate::stage::batch::pad_list_batch;
use crate::tape::Tape;
use crate::value::Value;

/// Routes each upstream example to the smallest length tier admitting it
/// and flushes a tier as a padded batch once it reaches its batch size.
///
/// Tier contents persist across `next` calls, so they are part of the
/// stage's checkpoint state.
pub(crate) struct BatchByLengthSource {
    inner: Box<dyn DataSource>,
    // (batch_size, max_length), max_length strictly increasing.
    tiers: Vec<(usize, usize)>,
    buckets: Vec<Vec<Value>>,
    pad_value: Value,
}

impl BatchByLengthSource {
    pub(crate) fn new(
        inner: Box<dyn DataSource>,
        tiers: Vec<(usize, usize)>,
        pad_value: Value,
    ) -> Result<Self> {
        if tiers.is_empty() {
            return Err(Error::InvalidArgument(
                "At least one (batch_size, max_length) tier must be specified.".into(),
            ));
        }

        let mut prev_max_length = 0;
        for &(batch_size, max_length) in &tiers {
            if batch_size == 0 {
                return Err(Error::InvalidArgument(
                    "The tier batch sizes must be greater than zero.".into(),
                ));
            }

            if max_length <= prev_max_length {
                return Err(Error::InvalidArgument(
                    "The tier maximum lengths must be positive and strictly increasing.".into(),
                ));
            }

            prev_max_length = max_length;
        }

        let buckets = vec![Vec::new(); tiers.len()];

        Ok(Self {
            inner,
            tiers,
            buckets,
            pad_value,
        })
    }

    fn flush(&mut self, tier: usize) -> Value {
        let mut batch = std::mem::take(&mut self.buckets[tier]);

        pad_list_batch(&mut batch, &self.pad_value, Some(self.tiers[tier].1));

        Value::List(batch)
    }
}

impl DataSource for BatchByLengthSource {
    fn next(&mut self) -> Result<Option<Value>> {
        loop {
            match self.inner.next()? {
                Some(value) => {
                    let length = value.sequence_length().ok_or_else(|| {
                        Error::Pipeline(format!(
                            "A {} example has no length and cannot be bucketed.",
                            value.type_name()
                        ))
                    })?;

                    let tier = self
                        .tiers
                        .iter()
                        .position(|&(_, max_length)| max_length >= length)
                        .ok_or_else(|| {
                            Error::Pipeline(format!(
                                "An example of length {length} exceeds the largest tier length {}.",
                                self.tiers[self.tiers.len() - 1].1
                            ))
                        })?;

                    self.buckets[tier].push(value);

                    if self.buckets[tier].len() == self.tiers[tier].0 {
                        return Ok(Some(self.flush(tier)));
                    }
                }
                None => {
                    // Upstream ended; flush remaining tiers in tier order,
                    // one batch per call.
                    if let Some(tier) = (0..self.buckets.len()).find(|&i| !self.buckets[i].is_empty())
                    {
                        return Ok(Some(self.flush(tier)));
                    }

                    return Ok(None);
                }
            }
        }
    }

    fn reset(&mut self) -> Result<()> {
        for bucket in &mut self.buckets {
            bucket.clear();
        }

        self.inner.reset()
    }

    fn record_position(&mut self, tape: &mut Tape) -> Result<()> {
        for bucket in &self.buckets {
            tape.record_values(bucket);
        }

        self.inner.record_position(tape)
    }

    fn reload_position(&mut self, tape: &mut Tape) -> Result<()> {
        let mut buckets = Vec::with_capacity(self.tiers.len());
        for &(batch_size, _) in &self.tiers {
            let bucket = tape.read_values()?;
            if bucket.len() >= batch_size {
                // A full bucket would have been flushed before capture.
                return Err(Error::corrupt_checkpoint());
            }

            buckets.push(bucket);
        }

        self.buckets = buckets;

        self.inner.reload_position(tape)
    }
}
