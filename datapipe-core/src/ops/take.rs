//! Truncating the stream

use crate::data::Data;
use crate::error::Result;
use crate::source::DataSource;
use crate::tape::Tape;

const STATE_TAG: u8 = 3;

pub(crate) struct TakeDataSource {
    upstream: Box<dyn DataSource>,
    num_examples: usize,
    remaining: usize,
}

impl TakeDataSource {
    pub(crate) fn new(upstream: Box<dyn DataSource>, num_examples: usize) -> Self {
        Self {
            upstream,
            num_examples,
            remaining: num_examples,
        }
    }
}

impl DataSource for TakeDataSource {
    fn next(&mut self) -> Result<Option<Data>> {
        if self.remaining == 0 {
            return Ok(None);
        }

        let record = self.upstream.next()?;

        if record.is_some() {
            self.remaining -= 1;
        }

        Ok(record)
    }

    fn reset(&mut self) -> Result<()> {
        self.remaining = self.num_examples;

        self.upstream.reset()
    }

    fn record_position(&mut self, tape: &mut Tape) -> Result<()> {
        tape.write_tag(STATE_TAG);
        tape.write_size(self.remaining);

        self.upstream.record_position(tape)
    }

    fn reload_position(&mut self, tape: &mut Tape) -> Result<()> {
        tape.expect_tag(STATE_TAG, "take")?;

        self.remaining = tape.read_size()?;

        self.upstream.reload_position(tape)
    }
}

#[cfg(test)]
mod tests {
    use crate::ops::list::read_list;
    use crate::{Data, Tape};

    #[test]
    fn test_emits_at_most_the_requested_count() {
        let list = (1..=5).map(Data::Int).collect();

        let mut pipeline = read_list(list).take(2).and_return();

        assert_eq!(pipeline.next().unwrap(), Some(Data::Int(1)));
        assert_eq!(pipeline.next().unwrap(), Some(Data::Int(2)));
        assert_eq!(pipeline.next().unwrap(), None);
    }

    #[test]
    fn test_taking_more_than_available_passes_through() {
        let list = vec![Data::Int(1), Data::Int(2), Data::Int(3)];

        let mut pipeline = read_list(list).take(10).and_return();

        assert_eq!(pipeline.next().unwrap(), Some(Data::Int(1)));
        assert_eq!(pipeline.next().unwrap(), Some(Data::Int(2)));
        assert_eq!(pipeline.next().unwrap(), Some(Data::Int(3)));
        assert_eq!(pipeline.next().unwrap(), None);
    }

    #[test]
    fn test_checkpoint_preserves_the_remaining_count() {
        let list = (1..=5).map(Data::Int).collect();

        let mut pipeline = read_list(list).take(3).and_return();

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
}
