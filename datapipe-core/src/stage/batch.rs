//! Fixed-size batching stage

use crate::error::Result;
use crate::source::DataSource;
use crate::tape::Tape;
use crate::value::Value;

/// Accumulates a fixed number of upstream examples into list-valued
/// batches. Holds no state between `next` calls, so its checkpoint is
/// the upstream position alone.
pub(crate) struct BatchSource {
    inner: Box<dyn DataSource>,
    batch_size: usize,
    drop_remainder: bool,
    pad_value: Option<Value>,
}

impl BatchSource {
    pub(crate) fn new(
        inner: Box<dyn DataSource>,
        batch_size: usize,
        drop_remainder: bool,
        pad_value: Option<Value>,
    ) -> Self {
        Self {
            inner,
            batch_size,
            drop_remainder,
            pad_value,
        }
    }
}

impl DataSource for BatchSource {
    fn next(&mut self) -> Result<Option<Value>> {
        let mut batch = Vec::with_capacity(self.batch_size);

        while batch.len() < self.batch_size {
            match self.inner.next()? {
                Some(value) => batch.push(value),
                None => break,
            }
        }

        if batch.is_empty() || (batch.len() < self.batch_size && self.drop_remainder) {
            return Ok(None);
        }

        if let Some(pad_value) = &self.pad_value {
            pad_list_batch(&mut batch, pad_value, None);
        }

        Ok(Some(Value::List(batch)))
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

/// Pad the list-valued elements of a batch with `pad_value`
///
/// Padding applies only when every element of the batch is a list; the
/// target length is `target` or, when absent, the longest list in the
/// batch. Non-list batches are left untouched.
pub(crate) fn pad_list_batch(batch: &mut [Value], pad_value: &Value, target: Option<usize>) {
    if !batch.iter().all(|v| matches!(v, Value::List(_))) {
        return;
    }

    let target = target.unwrap_or_else(|| {
        batch
            .iter()
            .filter_map(Value::sequence_length)
            .max()
            .unwrap_or(0)
    });

    for value in batch {
        if let Value::List(items) = value {
            while items.len() < target {
                items.push(pad_value.clone());
            }
        }
    }
}
