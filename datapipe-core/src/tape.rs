//! Ordered value log used to record and replay stage state

use crate::error::{Error, Result};
use crate::value::Value;

/// An ordered log of values backing the checkpoint protocol
///
/// While recording, stages append their state front to back; while
/// restoring, the same pre-order walk consumes the log in the identical
/// order. Any mismatch between the recorded shape and the reader's
/// expectation is a corrupt-checkpoint fault, not a pipeline fault.
#[derive(Debug, Default)]
pub struct Tape {
    storage: Vec<Value>,
    read_pos: usize,
}

impl Tape {
    /// Create an empty tape for recording
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a tape over previously recorded values, for reloading
    pub fn from_values(storage: Vec<Value>) -> Self {
        Self {
            storage,
            read_pos: 0,
        }
    }

    /// Append a value to the log
    pub fn record<V: Into<Value>>(&mut self, value: V) {
        self.storage.push(value.into());
    }

    /// Append an index or count
    pub fn record_usize(&mut self, value: usize) {
        // Tape entries are plain values; counts travel as integers.
        let value = i64::try_from(value).unwrap_or(i64::MAX);
        self.storage.push(Value::Int(value));
    }

    /// Append a sequence of values preceded by its length
    pub fn record_values(&mut self, values: &[Value]) {
        self.record_usize(values.len());
        self.storage.extend(values.iter().cloned());
    }

    /// Read the next value
    pub fn read(&mut self) -> Result<Value> {
        let value = self
            .storage
            .get(self.read_pos)
            .cloned()
            .ok_or_else(Error::corrupt_checkpoint)?;

        self.read_pos += 1;

        Ok(value)
    }

    /// Read the next value as a boolean
    pub fn read_bool(&mut self) -> Result<bool> {
        self.read()?.as_bool().ok_or_else(Error::corrupt_checkpoint)
    }

    /// Read the next value as an index or count
    pub fn read_usize(&mut self) -> Result<usize> {
        let value = self.read()?.as_int().ok_or_else(Error::corrupt_checkpoint)?;

        usize::try_from(value).map_err(|_| Error::corrupt_checkpoint())
    }

    /// Read a length-prefixed sequence recorded by [`record_values`]
    ///
    /// [`record_values`]: Tape::record_values
    pub fn read_values(&mut self) -> Result<Vec<Value>> {
        let len = self.read_usize()?;

        let mut values = Vec::with_capacity(len.min(self.storage.len()));
        for _ in 0..len {
            values.push(self.read()?);
        }

        Ok(values)
    }

    /// Whether every recorded value has been consumed
    pub fn is_exhausted(&self) -> bool {
        self.read_pos >= self.storage.len()
    }

    /// Consume the tape, returning the recorded values
    pub fn into_storage(self) -> Vec<Value> {
        self.storage
    }
}
