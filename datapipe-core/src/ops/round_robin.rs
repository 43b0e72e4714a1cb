//! Cycling through independent pipelines

use crate::data::Data;
use crate::error::{Error, Result};
use crate::pipeline::DataPipeline;
use crate::source::DataSource;
use crate::tape::Tape;

const STATE_TAG: u8 = 11;

/// Emits one record from each child pipeline in turn.
///
/// A child that reaches end-of-stream is reset and reused, so the
/// composite stream is infinite as long as at least one child is
/// non-empty. The stream ends once a full cycle of children produced
/// nothing even after a reset.
pub(crate) struct RoundRobinDataSource {
    pipelines: Vec<DataPipeline>,
    next_pipeline: usize,
    consecutive_empty: usize,
}

impl RoundRobinDataSource {
    pub(crate) fn new(pipelines: Vec<DataPipeline>) -> Self {
        Self {
            pipelines,
            next_pipeline: 0,
            consecutive_empty: 0,
        }
    }
}

impl DataSource for RoundRobinDataSource {
    fn next(&mut self) -> Result<Option<Data>> {
        if self.pipelines.is_empty() {
            return Ok(None);
        }

        loop {
            if self.consecutive_empty >= self.pipelines.len() {
                return Ok(None);
            }

            let index = self.next_pipeline;

            self.next_pipeline = (index + 1) % self.pipelines.len();

            if let Some(record) = self.pipelines[index].next()? {
                self.consecutive_empty = 0;

                return Ok(Some(record));
            }

            self.pipelines[index].reset()?;

            if let Some(record) = self.pipelines[index].next()? {
                self.consecutive_empty = 0;

                return Ok(Some(record));
            }

            self.consecutive_empty += 1;
        }
    }

    fn reset(&mut self) -> Result<()> {
        self.next_pipeline = 0;
        self.consecutive_empty = 0;

        for pipeline in &mut self.pipelines {
            pipeline.reset()?;
        }

        Ok(())
    }

    fn record_position(&mut self, tape: &mut Tape) -> Result<()> {
        tape.write_tag(STATE_TAG);
        tape.write_size(self.next_pipeline);
        tape.write_size(self.consecutive_empty);
        tape.write_size(self.pipelines.len());

        for pipeline in &mut self.pipelines {
            pipeline.record_position(tape)?;
        }

        Ok(())
    }

    fn reload_position(&mut self, tape: &mut Tape) -> Result<()> {
        tape.expect_tag(STATE_TAG, "round_robin")?;

        let next_pipeline = tape.read_size()?;
        let consecutive_empty = tape.read_size()?;

        let count = tape.read_size()?;

        if count != self.pipelines.len() || next_pipeline >= self.pipelines.len().max(1) {
            return Err(Error::CorruptedCheckpoint(format!(
                "the recorded pipeline count ({count}) does not match the operator ({})",
                self.pipelines.len()
            )));
        }

        for pipeline in &mut self.pipelines {
            pipeline.reload_position(tape)?;
        }

        self.next_pipeline = next_pipeline;
        self.consecutive_empty = consecutive_empty;

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use crate::ops::list::read_list;
    use crate::{Data, DataPipeline};

    #[test]
    fn test_cycles_and_resets_exhausted_children() {
        let short = read_list(vec![Data::Int(1), Data::Int(2)]).and_return();
        let long = read_list(vec![Data::Int(10), Data::Int(20), Data::Int(30)]).and_return();

        let mut pipeline = DataPipeline::round_robin(vec![short, long])
            .take(8)
            .and_return();

        let mut output = Vec::new();

        while let Some(record) = pipeline.next().unwrap() {
            output.push(record.as_int().unwrap());
        }

        assert_eq!(output, vec![1, 10, 2, 20, 1, 30, 2, 10]);
    }

    #[test]
    fn test_ends_when_every_child_is_empty() {
        let first = read_list(Vec::new()).and_return();
        let second = read_list(Vec::new()).and_return();

        let mut pipeline = DataPipeline::round_robin(vec![first, second]).and_return();

        assert_eq!(pipeline.next().unwrap(), None);
        assert_eq!(pipeline.next().unwrap(), None);
    }

    #[test]
    fn test_checkpoint_resumes_mid_cycle() {
        let short = read_list(vec![Data::Int(1), Data::Int(2)]).and_return();
        let long = read_list(vec![Data::Int(10), Data::Int(20), Data::Int(30)]).and_return();

        let mut pipeline = DataPipeline::round_robin(vec![short, long]).and_return();

        // 1, 10, 2
        pipeline.next().unwrap();
        pipeline.next().unwrap();
        pipeline.next().unwrap();

        let mut tape = crate::Tape::new();
        pipeline.record_position(&mut tape).unwrap();

        pipeline.reset().unwrap();

        tape.rewind();
        pipeline.reload_position(&mut tape).unwrap();

        assert_eq!(pipeline.next().unwrap(), Some(Data::Int(20)));
        assert_eq!(pipeline.next().unwrap(), Some(Data::Int(1)));
        assert_eq!(pipeline.next().unwrap(), Some(Data::Int(30)));
    }
}
