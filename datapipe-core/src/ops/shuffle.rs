//! Windowed reservoir shuffling

use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;

use crate::data::Data;
use crate::error::{Error, Result};
use crate::source::DataSource;
use crate::tape::Tape;

const STATE_TAG: u8 = 7;

/// Draws records uniformly at random from a bounded reservoir filled from
/// the upstream.
///
/// In strict mode the reservoir is refilled to capacity before every
/// emission (except while draining at end-of-stream) and its contents are
/// part of the checkpoint. In non-strict mode the reservoir grows by one
/// net record per pull (two upstream pulls per emission until the window
/// is reached), so records flow long before the window fills; the
/// checkpoint holds only the PRNG state and the upstream position, and a
/// resumed run emits its records in a different order.
pub(crate) struct ShuffleDataSource {
    upstream: Box<dyn DataSource>,
    shuffle_window: usize,
    strict: bool,
    buffer: Vec<Data>,
    rng: ChaCha8Rng,
    upstream_ended: bool,
}

impl ShuffleDataSource {
    pub(crate) fn new(
        upstream: Box<dyn DataSource>,
        shuffle_window: usize,
        strict: bool,
    ) -> Self {
        Self {
            upstream,
            shuffle_window,
            strict,
            buffer: Vec::with_capacity(shuffle_window),
            rng: ChaCha8Rng::from_entropy(),
            upstream_ended: false,
        }
    }

    fn fill_reservoir(&mut self) -> Result<()> {
        let target = if self.strict {
            self.shuffle_window
        } else {
            (self.buffer.len() + 2).min(self.shuffle_window)
        };

        while !self.upstream_ended && self.buffer.len() < target {
            match self.upstream.next()? {
                Some(record) => self.buffer.push(record),
                None => self.upstream_ended = true,
            }
        }

        Ok(())
    }
}

impl DataSource for ShuffleDataSource {
    fn next(&mut self) -> Result<Option<Data>> {
        self.fill_reservoir()?;

        if self.buffer.is_empty() {
            return Ok(None);
        }

        let index = self.rng.gen_range(0..self.buffer.len());

        Ok(Some(self.buffer.swap_remove(index)))
    }

    fn reset(&mut self) -> Result<()> {
        self.buffer.clear();

        self.upstream_ended = false;

        self.upstream.reset()
    }

    fn record_position(&mut self, tape: &mut Tape) -> Result<()> {
        tape.write_tag(STATE_TAG);
        tape.write_int(i64::from(self.strict));

        tape.write_bytes(bincode::serialize(&self.rng)?);

        if self.strict {
            tape.write_int(i64::from(self.upstream_ended));
            tape.write_size(self.buffer.len());

            for record in &self.buffer {
                tape.write(record.clone());
            }
        }

        self.upstream.record_position(tape)
    }

    fn reload_position(&mut self, tape: &mut Tape) -> Result<()> {
        tape.expect_tag(STATE_TAG, "shuffle")?;

        if (tape.read_int()? != 0) != self.strict {
            return Err(Error::CorruptedCheckpoint(
                "the recorded shuffle strictness does not match the operator".to_string(),
            ));
        }

        let rng_state = tape.read_bytes()?;

        self.rng = bincode::deserialize(&rng_state)
            .map_err(|err| Error::CorruptedCheckpoint(format!("invalid PRNG state: {err}")))?;

        self.buffer.clear();

        if self.strict {
            self.upstream_ended = tape.read_int()? != 0;

            let count = tape.read_size()?;

            for _ in 0..count {
                self.buffer.push(tape.read()?);
            }
        } else {
            self.upstream_ended = false;
        }

        self.upstream.reload_position(tape)
    }
}
