//! The source contract shared by every stage and raw input

use crate::error::Result;
use crate::pipeline::DataPipelineBuilder;
use crate::tape::Tape;
use crate::value::Value;

/// The polymorphic capability implemented by every pipeline stage,
/// multiplexer, and raw input
///
/// A source is stateful and single-consumer. It owns its upstream
/// source(s) exclusively, so the stage graph is always a tree and the
/// checkpoint walk over it is a fixed pre-order traversal: a source
/// records its own state and then delegates to its upstream(s), and
/// reloads in the identical order.
pub trait DataSource: Send {
    /// Produce the next value, or `None` once the sequence has ended
    ///
    /// After the end has been reached, further calls keep returning
    /// `None` until `reset`.
    fn next(&mut self) -> Result<Option<Value>>;

    /// Return to the state immediately after construction, discarding
    /// any buffered look-ahead
    fn reset(&mut self) -> Result<()>;

    /// Append this source's resumable state to the tape, then delegate
    /// to the upstream source(s)
    fn record_position(&mut self, tape: &mut Tape) -> Result<()>;

    /// Restore this source's state from the tape, consuming exactly what
    /// `record_position` appended, then delegate to the upstream(s)
    fn reload_position(&mut self, tape: &mut Tape) -> Result<()>;
}

/// Leaf source over an in-memory sequence of values
pub(crate) struct SequenceSource {
    items: Vec<Value>,
    pos: usize,
}

impl SequenceSource {
    pub(crate) fn new(items: Vec<Value>) -> Self {
        Self { items, pos: 0 }
    }
}

impl DataSource for SequenceSource {
    fn next(&mut self) -> Result<Option<Value>> {
        match self.items.get(self.pos) {
            Some(value) => {
                self.pos += 1;

                Ok(Some(value.clone()))
            }
            None => Ok(None),
        }
    }

    fn reset(&mut self) -> Result<()> {
        self.pos = 0;

        Ok(())
    }

    fn record_position(&mut self, tape: &mut Tape) -> Result<()> {
        tape.record_usize(self.pos);

        Ok(())
    }

    fn reload_position(&mut self, tape: &mut Tape) -> Result<()> {
        let pos = tape.read_usize()?;
        if pos > self.items.len() {
            return Err(crate::error::Error::corrupt_checkpoint());
        }

        self.pos = pos;

        Ok(())
    }
}

/// Create a pipeline builder over an in-memory sequence of values
///
/// The resulting pipeline yields the items in order; with no further
/// stages it reproduces the input sequence exactly.
pub fn read_sequence<I>(items: I) -> DataPipelineBuilder
where
    I: IntoIterator,
    I::Item: Into<Value>,
{
    let items = items.into_iter().map(Into::into).collect();

    DataPipelineBuilder::from_source(Box::new(SequenceSource::new(items)))
}
