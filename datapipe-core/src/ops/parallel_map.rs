//! Order-preserving concurrent record mapping

use std::collections::BTreeMap;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;
use std::thread::JoinHandle;

use parking_lot::{Condvar, Mutex};
use tracing::warn;

use crate::data::Data;
use crate::error::{Error, Result};
use crate::pipeline::MapFn;
use crate::source::DataSource;
use crate::tape::Tape;

const STATE_TAG: u8 = 8;

enum Slot {
    Done(Data),
    Skipped,
    Failed(Error),
}

struct Inner {
    upstream: Box<dyn DataSource>,

    /// Index the next claimed input will receive.
    next_index: u64,

    /// Index of the next slot the consumer emits.
    emit_index: u64,

    /// Completed slots keyed by input index, awaiting emission.
    completed: BTreeMap<u64, Slot>,

    /// Number of workers currently applying the callback.
    active: usize,

    upstream_ended: bool,

    /// A failed slot is buffered; workers stop claiming new inputs.
    faulted: bool,

    /// Claiming is suspended while a checkpoint operation quiesces the
    /// stage.
    paused: bool,

    stopped: bool,
}

struct State {
    inner: Mutex<Inner>,
    work_ready: Condvar,
    result_ready: Condvar,
}

/// Applies the map callback on a pool of worker threads while emitting
/// results in input order.
///
/// Workers serialise their upstream pulls under the stage lock, tag every
/// input with a monotonically increasing index, run the callback outside
/// the lock, and deposit the result into its slot. The consumer blocks
/// until the next-in-line slot is ready. At most `num_parallel_calls`
/// claimed inputs are in flight, so the stage never runs more than the
/// pool width ahead of the consumer.
pub(crate) struct ParallelMapDataSource {
    state: Arc<State>,
    workers: Vec<JoinHandle<()>>,
}

impl ParallelMapDataSource {
    pub(crate) fn new(
        upstream: Box<dyn DataSource>,
        map_fn: MapFn,
        num_parallel_calls: usize,
        warn_only: bool,
    ) -> Result<Self> {
        let state = Arc::new(State {
            inner: Mutex::new(Inner {
                upstream,
                next_index: 0,
                emit_index: 0,
                completed: BTreeMap::new(),
                active: 0,
                upstream_ended: false,
                faulted: false,
                paused: false,
                stopped: false,
            }),
            work_ready: Condvar::new(),
            result_ready: Condvar::new(),
        });

        let mut workers = Vec::with_capacity(num_parallel_calls);

        for worker_index in 0..num_parallel_calls {
            let state = Arc::clone(&state);
            let map_fn = Arc::clone(&map_fn);

            let handle = std::thread::Builder::new()
                .name(format!("datapipe-map-{worker_index}"))
                .spawn(move || {
                    worker_loop(&state, &map_fn, num_parallel_calls, warn_only);
                })?;

            workers.push(handle);
        }

        Ok(Self { state, workers })
    }

    /// Suspends claiming and waits until no worker is applying the
    /// callback, so every claimed input has a deposited slot.
    fn quiesce<'a>(&'a self) -> parking_lot::MutexGuard<'a, Inner> {
        let mut inner = self.state.inner.lock();

        inner.paused = true;

        while inner.active > 0 {
            self.state.result_ready.wait(&mut inner);
        }

        inner
    }

    fn resume(&self, inner: &mut Inner) {
        inner.paused = false;

        self.state.work_ready.notify_all();
    }
}

fn worker_loop(state: &State, map_fn: &MapFn, num_parallel_calls: usize, warn_only: bool) {
    loop {
        let claimed = {
            let mut inner = state.inner.lock();

            loop {
                if inner.stopped {
                    return;
                }

                let in_flight = (inner.next_index - inner.emit_index) as usize;

                if !inner.paused
                    && !inner.upstream_ended
                    && !inner.faulted
                    && in_flight < num_parallel_calls
                {
                    break;
                }

                state.work_ready.wait(&mut inner);
            }

            match inner.upstream.next() {
                Ok(Some(record)) => {
                    let index = inner.next_index;

                    inner.next_index += 1;
                    inner.active += 1;

                    Some((index, record))
                }
                Ok(None) => {
                    inner.upstream_ended = true;

                    state.result_ready.notify_all();

                    None
                }
                Err(err) => {
                    // Park the failure in its own slot so the consumer
                    // surfaces it in input order.
                    let index = inner.next_index;

                    inner.next_index += 1;
                    inner.faulted = true;
                    inner.completed.insert(index, Slot::Failed(err));

                    state.result_ready.notify_all();

                    None
                }
            }
        };

        let Some((index, record)) = claimed else {
            continue;
        };

        let slot = match catch_unwind(AssertUnwindSafe(|| (map_fn)(record))) {
            Ok(Ok(output)) => Slot::Done(output),
            Ok(Err(err)) if warn_only => {
                warn!("a map operation failed; skipping the record: {err}");

                Slot::Skipped
            }
            Ok(Err(err)) => Slot::Failed(Error::operator(format!(
                "the map operation has failed: {err}"
            ))),
            Err(_) => Slot::Failed(Error::operator("the map operation has panicked")),
        };

        let mut inner = state.inner.lock();

        if matches!(slot, Slot::Failed(_)) {
            inner.faulted = true;
        }

        inner.completed.insert(index, slot);
        inner.active -= 1;

        state.result_ready.notify_all();
    }
}

impl DataSource for ParallelMapDataSource {
    fn next(&mut self) -> Result<Option<Data>> {
        let mut inner = self.state.inner.lock();

        loop {
            let emit_index = inner.emit_index;

            if let Some(slot) = inner.completed.remove(&emit_index) {
                inner.emit_index += 1;

                // Emission frees one in-flight slot.
                self.state.work_ready.notify_all();

                match slot {
                    Slot::Done(record) => return Ok(Some(record)),
                    Slot::Skipped => continue,
                    Slot::Failed(err) => return Err(err),
                }
            }

            if inner.upstream_ended
                && inner.active == 0
                && inner.emit_index == inner.next_index
            {
                return Ok(None);
            }

            self.state.result_ready.wait(&mut inner);
        }
    }

    fn reset(&mut self) -> Result<()> {
        let mut inner = self.quiesce();

        inner.completed.clear();
        inner.next_index = 0;
        inner.emit_index = 0;
        inner.upstream_ended = false;
        inner.faulted = false;

        let outcome = inner.upstream.reset();

        self.resume(&mut inner);

        outcome
    }

    fn record_position(&mut self, tape: &mut Tape) -> Result<()> {
        let mut inner = self.quiesce();

        if inner.faulted {
            self.resume(&mut inner);

            return Err(Error::operator(
                "the position of a map stage with a failed operation cannot be recorded",
            ));
        }

        tape.write_tag(STATE_TAG);
        tape.write_size((inner.next_index - inner.emit_index) as usize);

        for index in inner.emit_index..inner.next_index {
            match inner.completed.get(&index) {
                Some(Slot::Done(record)) => {
                    tape.write_int(1);
                    tape.write(record.clone());
                }
                Some(Slot::Skipped) => tape.write_int(0),
                // Quiescing left every claimed slot deposited and faulted
                // slots were refused above.
                _ => {
                    self.resume(&mut inner);

                    return Err(Error::operator(
                        "the map stage failed to quiesce for checkpointing",
                    ));
                }
            }
        }

        let outcome = inner.upstream.record_position(tape);

        self.resume(&mut inner);

        outcome
    }

    fn reload_position(&mut self, tape: &mut Tape) -> Result<()> {
        let mut inner = self.quiesce();

        let outcome = (|| {
            tape.expect_tag(STATE_TAG, "map")?;

            let count = tape.read_size()?;

            inner.completed.clear();

            for index in 0..count as u64 {
                let slot = match tape.read_int()? {
                    1 => Slot::Done(tape.read()?),
                    0 => Slot::Skipped,
                    other => {
                        return Err(Error::CorruptedCheckpoint(format!(
                            "invalid map slot marker: {other}"
                        )))
                    }
                };

                inner.completed.insert(index, slot);
            }

            inner.emit_index = 0;
            inner.next_index = count as u64;
            inner.upstream_ended = false;
            inner.faulted = false;

            inner.upstream.reload_position(tape)
        })();

        self.resume(&mut inner);

        outcome
    }
}

impl Drop for ParallelMapDataSource {
    fn drop(&mut self) {
        {
            let mut inner = self.state.inner.lock();

            inner.stopped = true;
        }

        self.state.work_ready.notify_all();

        for handle in self.workers.drain(..) {
            let _ = handle.join();
        }
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use crate::ops::list::read_list;
    use crate::{Data, Error, Tape};

    fn slow_square(record: Data) -> crate::Result<Data> {
        let value = record
            .as_int()
            .ok_or_else(|| Error::operator("expected an int"))?;

        // Earlier records sleep longer, so completion order inverts input
        // order unless the stage re-orders.
        std::thread::sleep(Duration::from_millis(20u64.saturating_sub(value as u64)));

        Ok(Data::Int(value * value))
    }

    fn drain_ints(pipeline: &mut crate::DataPipeline) -> Vec<i64> {
        let mut output = Vec::new();

        while let Some(record) = pipeline.next().unwrap() {
            output.push(record.as_int().unwrap());
        }

        output
    }

    #[test]
    fn test_preserves_input_order() {
        let list = (1..=16).map(Data::Int).collect();

        let mut pipeline = read_list(list).map(slow_square, 4, false).and_return();

        let expected: Vec<i64> = (1..=16).map(|value| value * value).collect();

        assert_eq!(drain_ints(&mut pipeline), expected);
    }

    #[test]
    fn test_callback_failure_surfaces_in_order() {
        let list = vec![Data::Int(1), Data::from("oops"), Data::Int(3)];

        let mut pipeline = read_list(list).map(slow_square, 2, false).and_return();

        assert_eq!(pipeline.next().unwrap(), Some(Data::Int(1)));
        assert!(pipeline.next().is_err());
        assert!(pipeline.is_broken());
    }

    #[test]
    fn test_warn_only_skips_failing_records() {
        let list = vec![Data::Int(1), Data::from("oops"), Data::Int(3)];

        let mut pipeline = read_list(list).map(slow_square, 2, true).and_return();

        assert_eq!(drain_ints(&mut pipeline), vec![1, 9]);
        assert!(!pipeline.is_broken());
    }

    #[test]
    fn test_reset_after_failure_recovers() {
        let list = vec![Data::from("oops"), Data::Int(2)];

        let mut pipeline = read_list(list).map(slow_square, 2, false).and_return();

        assert!(pipeline.next().is_err());

        pipeline.reset().unwrap();

        assert!(pipeline.next().is_err());
    }

    #[test]
    fn test_checkpoint_round_trip_mid_stream() {
        let list = (1..=12).map(Data::Int).collect();

        let mut pipeline = read_list(list).map(slow_square, 3, false).and_return();

        for value in 1..=5i64 {
            assert_eq!(pipeline.next().unwrap(), Some(Data::Int(value * value)));
        }

        let mut tape = Tape::new();
        pipeline.record_position(&mut tape).unwrap();

        let expected = drain_ints(&mut pipeline);

        pipeline.reset().unwrap();

        tape.rewind();
        pipeline.reload_position(&mut tape).unwrap();

        assert_eq!(drain_ints(&mut pipeline), expected);
    }

    #[test]
    fn test_zero_parallel_calls_is_rejected() {
        let mut pipeline = read_list(vec![Data::Int(1)])
            .map(slow_square, 0, false)
            .and_return();

        assert!(matches!(
            pipeline.next(),
            Err(Error::InvalidArgument(_))
        ));
    }
}
