//! Background prefetching stage

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;

use crossbeam_channel::{bounded, Receiver};

use crate::error::{Error, Result};
use crate::source::DataSource;
use crate::tape::Tape;
use crate::value::Value;

/// Runs the upstream source on a dedicated producer thread feeding a
/// bounded channel
///
/// The producer blocks when the channel is full and the consumer blocks
/// when it is empty. An upstream fault travels through the channel and
/// surfaces at the point its element would have been dequeued, after
/// which the producer stops. Reset and checkpoint capture stop and join
/// the producer first; capture preserves the undelivered elements as
/// stage state, reset discards them. Dropping the stage also stops and
/// joins the producer.
pub(crate) struct PrefetchSource {
    depth: usize,
    // Exactly one of `inner` and `worker` is populated: the producer
    // thread owns the upstream source while it runs and hands it back
    // when joined.
    inner: Option<Box<dyn DataSource>>,
    worker: Option<Worker>,
    buffered: VecDeque<Value>,
    pending_error: Option<Error>,
    finished: bool,
}

struct Worker {
    handle: JoinHandle<Box<dyn DataSource>>,
    rx: Receiver<Result<Value>>,
    stop: Arc<AtomicBool>,
}

impl PrefetchSource {
    pub(crate) fn new(inner: Box<dyn DataSource>, depth: usize) -> Self {
        Self {
            depth,
            inner: Some(inner),
            worker: None,
            buffered: VecDeque::new(),
            pending_error: None,
            finished: false,
        }
    }

    fn ensure_worker(&mut self) -> Result<()> {
        if self.worker.is_some() {
            return Ok(());
        }

        let mut source = self.inner.take().ok_or_else(|| {
            Error::Pipeline("The prefetch worker thread has panicked.".into())
        })?;

        let (tx, rx) = bounded(self.depth);

        let stop = Arc::new(AtomicBool::new(false));
        let stop_flag = Arc::clone(&stop);

        let handle = std::thread::Builder::new()
            .name("datapipe-prefetch".into())
            .spawn(move || {
                tracing::debug!("prefetch worker started");

                loop {
                    if stop_flag.load(Ordering::Acquire) {
                        break;
                    }

                    match source.next() {
                        Ok(Some(value)) => {
                            if tx.send(Ok(value)).is_err() {
                                break;
                            }
                        }
                        Ok(None) => break,
                        Err(e) => {
                            let _ = tx.send(Err(e));

                            break;
                        }
                    }
                }

                tracing::debug!("prefetch worker stopped");

                source
            })
            .map_err(|e| Error::Pipeline(format!("Failed to spawn the prefetch thread: {e}")))?;

        self.worker = Some(Worker { handle, rx, stop });

        Ok(())
    }

    /// Stop the producer, join it, and reclaim the upstream source
    ///
    /// With `preserve` set, undelivered elements are kept in order as
    /// buffered stage state; otherwise they are discarded.
    fn stop_worker(&mut self, preserve: bool) {
        let Some(worker) = self.worker.take() else {
            return;
        };

        worker.stop.store(true, Ordering::Release);

        // Draining the channel unblocks a producer waiting on a full
        // queue so it can observe the stop flag; the iterator ends once
        // the producer drops its sender.
        for item in worker.rx.iter() {
            if preserve {
                match item {
                    Ok(value) => self.buffered.push_back(value),
                    Err(e) => self.pending_error = Some(e),
                }
            }
        }

        if let Ok(source) = worker.handle.join() {
            self.inner = Some(source);
        }
    }
}

impl DataSource for PrefetchSource {
    fn next(&mut self) -> Result<Option<Value>> {
        if let Some(value) = self.buffered.pop_front() {
            return Ok(Some(value));
        }

        if let Some(e) = self.pending_error.take() {
            self.finished = true;

            return Err(e);
        }

        if self.finished {
            return Ok(None);
        }

        self.ensure_worker()?;

        let item = match &self.worker {
            Some(worker) => worker.rx.recv(),
            None => return Ok(None),
        };

        match item {
            Ok(Ok(value)) => Ok(Some(value)),
            Ok(Err(e)) => {
                // The producer stops after sending a fault.
                self.stop_worker(false);
                self.finished = true;

                Err(e)
            }
            Err(_) => {
                // Disconnected: the upstream ended.
                self.stop_worker(false);
                self.finished = true;

                Ok(None)
            }
        }
    }

    fn reset(&mut self) -> Result<()> {
        self.stop_worker(false);

        self.buffered.clear();
        self.pending_error = None;
        self.finished = false;

        match &mut self.inner {
            Some(inner) => inner.reset(),
            None => Err(Error::Pipeline(
                "The prefetch worker thread has panicked.".into(),
            )),
        }
    }

    fn record_position(&mut self, tape: &mut Tape) -> Result<()> {
        self.stop_worker(true);

        // A fault drained from the queue would be lost by the tape: the
        // producer has already advanced the upstream past it.
        if self.pending_error.is_some() {
            return Err(Error::pending_fault());
        }

        tape.record_usize(self.buffered.len());
        for value in &self.buffered {
            tape.record(value.clone());
        }

        match &mut self.inner {
            Some(inner) => inner.record_position(tape),
            None => Err(Error::Pipeline(
                "The prefetch worker thread has panicked.".into(),
            )),
        }
    }

    fn reload_position(&mut self, tape: &mut Tape) -> Result<()> {
        self.stop_worker(false);

        self.buffered.clear();
        self.pending_error = None;
        self.finished = false;

        let len = tape.read_usize()?;
        for _ in 0..len {
            self.buffered.push_back(tape.read()?);
        }

        match &mut self.inner {
            Some(inner) => inner.reload_position(tape),
            None => Err(Error::Pipeline(
                "The prefetch worker thread has panicked.".into(),
            )),
        }
    }
}

impl Drop for PrefetchSource {
    fn drop(&mut self) {
        self.stop_worker(false);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::source::read_sequence;

    fn ints(n: i64) -> Vec<Value> {
        (0..n).map(Value::from).collect()
    }

    fn drain(pipeline: &mut crate::pipeline::DataPipeline) -> Vec<Value> {
        let mut out = Vec::new();
        while let Some(value) = pipeline.next().unwrap() {
            out.push(value);
        }
        out
    }

    #[test]
    fn test_prefetch_preserves_sequence() {
        let _ = tracing_subscriber::fmt().with_test_writer().try_init();

        let mut pipeline = read_sequence(ints(100)).prefetch(4).and_return();

        assert_eq!(drain(&mut pipeline), ints(100));
        assert_eq!(pipeline.next().unwrap(), None);
    }

    #[test]
    fn test_prefetch_zero_is_noop() {
        let mut pipeline = read_sequence(ints(5)).prefetch(0).and_return();

        assert_eq!(drain(&mut pipeline), ints(5));
    }

    #[test]
    fn test_prefetch_reset_restarts_upstream() {
        let mut pipeline = read_sequence(ints(50)).prefetch(8).and_return();

        pipeline.skip(10).unwrap();
        pipeline.reset().unwrap();

        assert_eq!(drain(&mut pipeline), ints(50));
    }

    #[test]
    fn test_prefetch_fault_propagates_in_order() {
        let mut pipeline = read_sequence(ints(10))
            .map(
                |v| match v.as_int() {
                    Some(3) => Err(Error::Pipeline("boom".into())),
                    _ => Ok(v),
                },
                1,
            )
            .unwrap()
            .prefetch(4)
            .and_return();

        for i in 0..3 {
            assert_eq!(pipeline.next().unwrap(), Some(Value::Int(i)));
        }

        assert!(pipeline.next().is_err());
        assert!(pipeline.is_broken());

        pipeline.reset().unwrap();
        assert_eq!(pipeline.next().unwrap(), Some(Value::Int(0)));
    }

    #[test]
    fn test_capture_with_undelivered_fault_fails() {
        let mut pipeline = read_sequence(ints(5))
            .map(
                |v| match v.as_int() {
                    Some(3) => Err(Error::Pipeline("boom".into())),
                    _ => Ok(v),
                },
                1,
            )
            .unwrap()
            .prefetch(4)
            .and_return();

        assert_eq!(pipeline.next().unwrap(), Some(Value::Int(0)));

        // Joining the producer drains the queued fault; capture must
        // refuse rather than record a position past it.
        assert!(matches!(pipeline.capture_state(), Err(Error::Pipeline(_))));

        // Delivery order survives the failed capture.
        assert_eq!(pipeline.next().unwrap(), Some(Value::Int(1)));
        assert_eq!(pipeline.next().unwrap(), Some(Value::Int(2)));
        assert!(pipeline.next().is_err());
        assert!(pipeline.is_broken());
    }

    #[test]
    fn test_prefetch_checkpoint_mid_buffer() {
        let build = || read_sequence(ints(20)).prefetch(4).and_return();

        let mut pipeline = build();

        // Let the producer run ahead, then capture with elements still
        // undelivered in the queue.
        pipeline.skip(3).unwrap();
        let record = pipeline.capture_state().unwrap();

        let mut restored = build();
        restored.restore_state(&record, true).unwrap();

        assert_eq!(drain(&mut restored), ints(20)[3..].to_vec());

        // The original also resumes from where it was captured.
        assert_eq!(drain(&mut pipeline), ints(20)[3..].to_vec());
    }

    #[test]
    fn test_prefetch_drop_joins_worker() {
        let mut pipeline = read_sequence(ints(1000)).prefetch(2).and_return();

        // Start the producer, then drop mid-stream.
        pipeline.next().unwrap();
        drop(pipeline);
    }
}
