//! In-memory list source

use crate::data::Data;
use crate::error::{Error, Result};
use crate::pipeline::DataPipelineBuilder;
use crate::source::DataSource;
use crate::tape::Tape;

const STATE_TAG: u8 = 1;

/// Returns a builder over a pipeline that emits the given records in order.
pub fn read_list(list: Vec<Data>) -> DataPipelineBuilder {
    DataPipelineBuilder::new(move || {
        Ok(Box::new(ListDataSource::new(list)) as Box<dyn DataSource>)
    })
}

pub(crate) struct ListDataSource {
    list: Vec<Data>,
    index: usize,
}

impl ListDataSource {
    pub(crate) fn new(list: Vec<Data>) -> Self {
        Self { list, index: 0 }
    }
}

impl DataSource for ListDataSource {
    fn next(&mut self) -> Result<Option<Data>> {
        if self.index >= self.list.len() {
            return Ok(None);
        }

        let record = self.list[self.index].clone();

        self.index += 1;

        Ok(Some(record))
    }

    fn reset(&mut self) -> Result<()> {
        self.index = 0;

        Ok(())
    }

    fn record_position(&mut self, tape: &mut Tape) -> Result<()> {
        tape.write_tag(STATE_TAG);
        tape.write_size(self.index);

        Ok(())
    }

    fn reload_position(&mut self, tape: &mut Tape) -> Result<()> {
        tape.expect_tag(STATE_TAG, "list")?;

        let index = tape.read_size()?;

        if index > self.list.len() {
            return Err(Error::CorruptedCheckpoint(format!(
                "the recorded index ({index}) exceeds the list length ({})",
                self.list.len()
            )));
        }

        self.index = index;

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn example_list() -> Vec<Data> {
        vec![Data::Int(1), Data::Int(2), Data::Int(3)]
    }

    #[test]
    fn test_emits_records_in_order() {
        let mut pipeline = read_list(example_list()).and_return();

        assert_eq!(pipeline.next().unwrap(), Some(Data::Int(1)));
        assert_eq!(pipeline.next().unwrap(), Some(Data::Int(2)));
        assert_eq!(pipeline.next().unwrap(), Some(Data::Int(3)));
        assert_eq!(pipeline.next().unwrap(), None);
        assert_eq!(pipeline.next().unwrap(), None);
    }

    #[test]
    fn test_reset_restarts_the_stream() {
        let mut pipeline = read_list(example_list()).and_return();

        pipeline.next().unwrap();
        pipeline.reset().unwrap();

        assert_eq!(pipeline.next().unwrap(), Some(Data::Int(1)));
    }

    #[test]
    fn test_checkpoint_resumes_at_recorded_index() {
        let mut pipeline = read_list(example_list()).and_return();

        pipeline.next().unwrap();
        pipeline.next().unwrap();

        let mut tape = Tape::new();
        pipeline.record_position(&mut tape).unwrap();

        pipeline.reset().unwrap();

        tape.rewind();
        pipeline.reload_position(&mut tape).unwrap();

        assert_eq!(pipeline.next().unwrap(), Some(Data::Int(3)));
        assert_eq!(pipeline.next().unwrap(), None);
    }

    #[test]
    fn test_reload_rejects_out_of_range_index() {
        let mut source = ListDataSource::new(example_list());

        let mut tape = Tape::new();
        tape.write_tag(STATE_TAG);
        tape.write_size(9);

        assert!(matches!(
            source.reload_position(&mut tape),
            Err(Error::CorruptedCheckpoint(_))
        ));
    }
}
