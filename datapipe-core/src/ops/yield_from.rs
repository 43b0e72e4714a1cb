//! Streaming a sub-pipeline per upstream record

use crate::data::Data;
use crate::error::{Error, Result};
use crate::pipeline::{DataPipeline, YieldFn};
use crate::source::DataSource;
use crate::tape::Tape;

const STATE_TAG: u8 = 4;

pub(crate) struct YieldFromDataSource {
    upstream: Box<dyn DataSource>,
    yield_fn: YieldFn,
    current: Option<(Data, DataPipeline)>,
}

impl YieldFromDataSource {
    pub(crate) fn new(upstream: Box<dyn DataSource>, yield_fn: YieldFn) -> Self {
        Self {
            upstream,
            yield_fn,
            current: None,
        }
    }
}

impl DataSource for YieldFromDataSource {
    fn next(&mut self) -> Result<Option<Data>> {
        loop {
            if let Some((_, pipeline)) = &mut self.current {
                if let Some(record) = pipeline.next()? {
                    return Ok(Some(record));
                }

                self.current = None;
            }

            let Some(record) = self.upstream.next()? else {
                return Ok(None);
            };

            let pipeline = (self.yield_fn)(&record);

            self.current = Some((record, pipeline));
        }
    }

    fn reset(&mut self) -> Result<()> {
        self.current = None;

        self.upstream.reset()
    }

    fn record_position(&mut self, tape: &mut Tape) -> Result<()> {
        tape.write_tag(STATE_TAG);

        self.upstream.record_position(tape)?;

        match &mut self.current {
            Some((record, pipeline)) => {
                tape.write_int(1);
                tape.write(record.clone());

                pipeline.record_position(tape)
            }
            None => {
                tape.write_int(0);

                Ok(())
            }
        }
    }

    fn reload_position(&mut self, tape: &mut Tape) -> Result<()> {
        tape.expect_tag(STATE_TAG, "yield_from")?;

        self.upstream.reload_position(tape)?;

        match tape.read_int()? {
            0 => {
                self.current = None;

                Ok(())
            }
            1 => {
                let record = tape.read()?;

                // The yield callback is required to be deterministic, so
                // re-invoking it on the recorded record rebuilds the same
                // sub-pipeline.
                let mut pipeline = (self.yield_fn)(&record);

                pipeline.reload_position(tape)?;

                self.current = Some((record, pipeline));

                Ok(())
            }
            other => Err(Error::CorruptedCheckpoint(format!(
                "invalid yield_from state marker: {other}"
            ))),
        }
    }
}
