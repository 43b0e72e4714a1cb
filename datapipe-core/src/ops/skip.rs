//! Skipping a prefix of the stream

use crate::data::Data;
use crate::error::Result;
use crate::source::DataSource;
use crate::tape::Tape;

const STATE_TAG: u8 = 2;

pub(crate) struct SkipDataSource {
    upstream: Box<dyn DataSource>,
    num_examples: usize,
    remaining: usize,
}

impl SkipDataSource {
    pub(crate) fn new(upstream: Box<dyn DataSource>, num_examples: usize) -> Self {
        Self {
            upstream,
            num_examples,
            remaining: num_examples,
        }
    }
}

impl DataSource for SkipDataSource {
    fn next(&mut self) -> Result<Option<Data>> {
        while self.remaining > 0 {
            if self.upstream.next()?.is_none() {
                return Ok(None);
            }

            self.remaining -= 1;
        }

        self.upstream.next()
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
        tape.expect_tag(STATE_TAG, "skip")?;

        self.remaining = tape.read_size()?;

        self.upstream.reload_position(tape)
    }
}

#[cfg(test)]
mod tests {
    use crate::ops::list::read_list;
    use crate::Data;

    #[test]
    fn test_skips_the_first_records() {
        let list = (1..=5).map(Data::Int).collect();

        let mut pipeline = read_list(list).skip(2).and_return();

        assert_eq!(pipeline.next().unwrap(), Some(Data::Int(3)));
        assert_eq!(pipeline.next().unwrap(), Some(Data::Int(4)));
        assert_eq!(pipeline.next().unwrap(), Some(Data::Int(5)));
        assert_eq!(pipeline.next().unwrap(), None);
    }

    #[test]
    fn test_skipping_past_the_end_yields_nothing() {
        let list = vec![Data::Int(1), Data::Int(2), Data::Int(3)];

        let mut pipeline = read_list(list).skip(10).and_return();

        assert_eq!(pipeline.next().unwrap(), None);
    }

    #[test]
    fn test_reset_reapplies_the_skip() {
        let list = (1..=4).map(Data::Int).collect();

        let mut pipeline = read_list(list).skip(2).and_return();

        assert_eq!(pipeline.next().unwrap(), Some(Data::Int(3)));

        pipeline.reset().unwrap();

        assert_eq!(pipeline.next().unwrap(), Some(Data::Int(3)));
    }
}
