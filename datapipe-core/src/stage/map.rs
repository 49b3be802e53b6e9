//! Mapping stage with optional chunked parallel execution

use std::collections::VecDeque;
use std::sync::Arc;

use rayon::prelude::*;

use crate::error::{Error, Result};
use crate::source::DataSource;
use crate::tape::Tape;
use crate::value::Value;

/// The user-supplied transformation applied to every example
pub(crate) type MapFn = Arc<dyn Fn(Value) -> Result<Value> + Send + Sync>;

/// Applies a function to every upstream example
///
/// With a chunk size greater than one, a full chunk is pulled and
/// transformed on the rayon pool; the results are buffered and yielded
/// in the original input order regardless of completion order. A fault
/// on one element surfaces only after the elements preceding it have
/// been yielded; elements after the fault are discarded.
pub(crate) struct MapSource {
    inner: Box<dyn DataSource>,
    f: MapFn,
    chunk_size: usize,
    buffer: VecDeque<Value>,
    pending_error: Option<Error>,
}

impl MapSource {
    pub(crate) fn new(inner: Box<dyn DataSource>, f: MapFn, chunk_size: usize) -> Self {
        Self {
            inner,
            f,
            chunk_size,
            buffer: VecDeque::new(),
            pending_error: None,
        }
    }

    fn pull_chunk(&mut self) -> Result<Vec<Value>> {
        let mut chunk = Vec::with_capacity(self.chunk_size);

        while chunk.len() < self.chunk_size {
            match self.inner.next()? {
                Some(value) => chunk.push(value),
                None => break,
            }
        }

        Ok(chunk)
    }
}

impl DataSource for MapSource {
    fn next(&mut self) -> Result<Option<Value>> {
        loop {
            if let Some(value) = self.buffer.pop_front() {
                return Ok(Some(value));
            }

            if let Some(e) = self.pending_error.take() {
                return Err(e);
            }

            let chunk = self.pull_chunk()?;
            if chunk.is_empty() {
                return Ok(None);
            }

            if self.chunk_size == 1 {
                if let Some(value) = chunk.into_iter().next() {
                    return (self.f)(value).map(Some);
                }

                continue;
            }

            let f = Arc::clone(&self.f);

            let results: Vec<Result<Value>> =
                chunk.into_par_iter().map(move |value| f(value)).collect();

            for result in results {
                match result {
                    Ok(value) => self.buffer.push_back(value),
                    Err(e) => {
                        self.pending_error = Some(e);

                        break;
                    }
                }
            }
        }
    }

    fn reset(&mut self) -> Result<()> {
        self.buffer.clear();
        self.pending_error = None;

        self.inner.reset()
    }

    fn record_position(&mut self, tape: &mut Tape) -> Result<()> {
        // The upstream cursor is already past the faulting chunk; a
        // tape recorded now could not reproduce the fault.
        if self.pending_error.is_some() {
            return Err(Error::pending_fault());
        }

        let buffered: Vec<Value> = self.buffer.iter().cloned().collect();
        tape.record_values(&buffered);

        self.inner.record_position(tape)
    }

    fn reload_position(&mut self, tape: &mut Tape) -> Result<()> {
        self.buffer = tape.read_values()?.into();
        self.pending_error = None;

        self.inner.reload_position(tape)
    }
}
