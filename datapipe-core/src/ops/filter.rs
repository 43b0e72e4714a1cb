//! Predicate filtering

use crate::data::Data;
use crate::error::Result;
use crate::pipeline::PredicateFn;
use crate::source::DataSource;
use crate::tape::Tape;

pub(crate) struct FilterDataSource {
    upstream: Box<dyn DataSource>,
    predicate_fn: PredicateFn,
}

impl FilterDataSource {
    pub(crate) fn new(upstream: Box<dyn DataSource>, predicate_fn: PredicateFn) -> Self {
        Self {
            upstream,
            predicate_fn,
        }
    }
}

impl DataSource for FilterDataSource {
    fn next(&mut self) -> Result<Option<Data>> {
        loop {
            let Some(record) = self.upstream.next()? else {
                return Ok(None);
            };

            if (self.predicate_fn)(&record) {
                return Ok(Some(record));
            }
        }
    }

    fn reset(&mut self) -> Result<()> {
        self.upstream.reset()
    }

    // The upstream carries all resumption state.
    fn record_position(&mut self, tape: &mut Tape) -> Result<()> {
        self.upstream.record_position(tape)
    }

    fn reload_position(&mut self, tape: &mut Tape) -> Result<()> {
        self.upstream.reload_position(tape)
    }
}
