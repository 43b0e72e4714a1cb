//! Background read-ahead

use std::collections::VecDeque;
use std::sync::Arc;
use std::thread::JoinHandle;

use parking_lot::{Condvar, Mutex};

use crate::data::Data;
use crate::error::{Error, Result};
use crate::source::DataSource;
use crate::tape::Tape;

const STATE_TAG: u8 = 9;

struct Inner {
    /// Taken by the producer while it pulls, so the stage lock is not held
    /// across upstream work.
    upstream: Option<Box<dyn DataSource>>,

    queue: VecDeque<Data>,

    /// A parked upstream error, surfaced on the next consumer pull.
    fault: Option<Error>,

    upstream_ended: bool,

    paused: bool,

    stopped: bool,
}

struct State {
    inner: Mutex<Inner>,
    read_ready: Condvar,
    write_ready: Condvar,
}

/// Pulls up to `num_examples` records ahead of the consumer into a bounded
/// FIFO queue filled by a background thread.
pub(crate) struct PrefetchDataSource {
    state: Arc<State>,
    producer: Option<JoinHandle<()>>,
}

impl PrefetchDataSource {
    pub(crate) fn new(upstream: Box<dyn DataSource>, num_examples: usize) -> Result<Self> {
        let state = Arc::new(State {
            inner: Mutex::new(Inner {
                upstream: Some(upstream),
                queue: VecDeque::with_capacity(num_examples),
                fault: None,
                upstream_ended: false,
                paused: false,
                stopped: false,
            }),
            read_ready: Condvar::new(),
            write_ready: Condvar::new(),
        });

        let producer = {
            let state = Arc::clone(&state);

            std::thread::Builder::new()
                .name("datapipe-prefetch".to_string())
                .spawn(move || producer_loop(&state, num_examples))?
        };

        Ok(Self {
            state,
            producer: Some(producer),
        })
    }

    /// Suspends the producer and waits until it is between pulls, leaving
    /// the upstream available to the caller.
    fn quiesce<'a>(&'a self) -> parking_lot::MutexGuard<'a, Inner> {
        let mut inner = self.state.inner.lock();

        inner.paused = true;

        while inner.upstream.is_none() {
            self.state.read_ready.wait(&mut inner);
        }

        inner
    }

    fn resume(&self, inner: &mut Inner) {
        inner.paused = false;

        self.state.write_ready.notify_all();
    }
}

fn producer_loop(state: &State, capacity: usize) {
    loop {
        let mut source = {
            let mut inner = state.inner.lock();

            loop {
                if inner.stopped {
                    return;
                }

                if !inner.paused
                    && !inner.upstream_ended
                    && inner.fault.is_none()
                    && inner.queue.len() < capacity
                {
                    break;
                }

                state.write_ready.wait(&mut inner);
            }

            match inner.upstream.take() {
                Some(source) => source,
                None => continue,
            }
        };

        let item = source.next();

        let mut inner = state.inner.lock();

        inner.upstream = Some(source);

        match item {
            Ok(Some(record)) => inner.queue.push_back(record),
            Ok(None) => inner.upstream_ended = true,
            Err(err) => inner.fault = Some(err),
        }

        state.read_ready.notify_all();
    }
}

impl DataSource for PrefetchDataSource {
    fn next(&mut self) -> Result<Option<Data>> {
        let mut inner = self.state.inner.lock();

        loop {
            if let Some(record) = inner.queue.pop_front() {
                self.state.write_ready.notify_all();

                return Ok(Some(record));
            }

            if let Some(err) = inner.fault.take() {
                inner.upstream_ended = true;

                return Err(err);
            }

            if inner.upstream_ended {
                return Ok(None);
            }

            self.state.read_ready.wait(&mut inner);
        }
    }

    fn reset(&mut self) -> Result<()> {
        let mut inner = self.quiesce();

        inner.queue.clear();
        inner.fault = None;
        inner.upstream_ended = false;

        let outcome = match inner.upstream.as_deref_mut() {
            Some(upstream) => upstream.reset(),
            None => Err(Error::operator("the prefetch stage failed to quiesce")),
        };

        self.resume(&mut inner);

        outcome
    }

    fn record_position(&mut self, tape: &mut Tape) -> Result<()> {
        let mut inner = self.quiesce();

        if let Some(err) = inner.fault.take() {
            inner.upstream_ended = true;

            self.resume(&mut inner);

            return Err(err);
        }

        // The unread queue is discarded; both this run and a resumed run
        // continue from the upstream position the producer had reached.
        inner.queue.clear();

        tape.write_tag(STATE_TAG);

        let outcome = match inner.upstream.as_deref_mut() {
            Some(upstream) => upstream.record_position(tape),
            None => Err(Error::operator("the prefetch stage failed to quiesce")),
        };

        self.resume(&mut inner);

        outcome
    }

    fn reload_position(&mut self, tape: &mut Tape) -> Result<()> {
        let mut inner = self.quiesce();

        let outcome = (|| {
            tape.expect_tag(STATE_TAG, "prefetch")?;

            inner.queue.clear();

            inner.fault = None;
            inner.upstream_ended = false;

            match inner.upstream.as_deref_mut() {
                Some(upstream) => upstream.reload_position(tape),
                None => Err(Error::operator("the prefetch stage failed to quiesce")),
            }
        })();

        self.resume(&mut inner);

        outcome
    }
}

impl Drop for PrefetchDataSource {
    fn drop(&mut self) {
        {
            let mut inner = self.state.inner.lock();

            inner.stopped = true;
        }

        self.state.write_ready.notify_all();

        if let Some(producer) = self.producer.take() {
            let _ = producer.join();
        }
    }
}

#[cfg(test)]
mod tests {
    use crate::ops::list::read_list;
    use crate::{Data, Tape};

    fn drain_ints(pipeline: &mut crate::DataPipeline) -> Vec<i64> {
        let mut output = Vec::new();

        while let Some(record) = pipeline.next().unwrap() {
            output.push(record.as_int().unwrap());
        }

        output
    }

    #[test]
    fn test_preserves_upstream_order() {
        let list = (1..=32).map(Data::Int).collect();

        let mut pipeline = read_list(list).prefetch(4).and_return();

        assert_eq!(drain_ints(&mut pipeline), (1..=32).collect::<Vec<_>>());
    }

    #[test]
    fn test_zero_capacity_passes_through() {
        let list = (1..=3).map(Data::Int).collect();

        let mut pipeline = read_list(list).prefetch(0).and_return();

        assert_eq!(drain_ints(&mut pipeline), vec![1, 2, 3]);
    }

    #[test]
    fn test_upstream_failure_surfaces_and_breaks() {
        let list = vec![Data::Int(1)];

        let mut pipeline = read_list(list)
            .map(
                |_| Err(crate::Error::operator("boom")),
                1,
                false,
            )
            .prefetch(2)
            .and_return();

        assert!(pipeline.next().is_err());
        assert!(pipeline.is_broken());
    }

    #[test]
    fn test_checkpoint_resumes_from_the_producer_position() {
        let list = (1..=20).map(Data::Int).collect();

        let mut pipeline = read_list(list).prefetch(8).and_return();

        for value in 1..=5i64 {
            assert_eq!(pipeline.next().unwrap(), Some(Data::Int(value)));
        }

        let mut tape = Tape::new();
        pipeline.record_position(&mut tape).unwrap();

        // Checkpointing drops the read-ahead queue, so this run continues
        // from the recorded upstream position, exactly like a resumed run.
        let expected = drain_ints(&mut pipeline);

        assert!(expected.first().is_some_and(|&value| value >= 6));
        assert_eq!(expected.last(), Some(&20));
        assert!(expected.windows(2).all(|pair| pair[1] == pair[0] + 1));

        pipeline.reset().unwrap();

        tape.rewind();
        pipeline.reload_position(&mut tape).unwrap();

        assert_eq!(drain_ints(&mut pipeline), expected);
    }

    #[test]
    fn test_reset_restarts_the_stream() {
        let list = (1..=6).map(Data::Int).collect();

        let mut pipeline = read_list(list).prefetch(3).and_return();

        pipeline.next().unwrap();
        pipeline.next().unwrap();

        pipeline.reset().unwrap();

        assert_eq!(drain_ints(&mut pipeline), (1..=6).collect::<Vec<_>>());
    }
}
