//! Sequential record mapping

use tracing::warn;

use crate::data::Data;
use crate::error::{Error, Result};
use crate::pipeline::MapFn;
use crate::source::DataSource;
use crate::tape::Tape;

pub(crate) struct MapDataSource {
    upstream: Box<dyn DataSource>,
    map_fn: MapFn,
    warn_only: bool,
}

impl MapDataSource {
    pub(crate) fn new(upstream: Box<dyn DataSource>, map_fn: MapFn, warn_only: bool) -> Self {
        Self {
            upstream,
            map_fn,
            warn_only,
        }
    }
}

impl DataSource for MapDataSource {
    fn next(&mut self) -> Result<Option<Data>> {
        loop {
            let Some(record) = self.upstream.next()? else {
                return Ok(None);
            };

            match (self.map_fn)(record) {
                Ok(output) => return Ok(Some(output)),
                Err(err) if self.warn_only => {
                    warn!("a map operation failed; skipping the record: {err}");
                }
                Err(err) => {
                    return Err(Error::operator(format!(
                        "the map operation has failed: {err}"
                    )))
                }
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

#[cfg(test)]
mod tests {
    use crate::ops::list::read_list;
    use crate::{Data, Error};

    fn square(record: Data) -> crate::Result<Data> {
        match record {
            Data::Int(value) => Ok(Data::Int(value * value)),
            other => Err(Error::operator(format!(
                "expected an int, found {}",
                other.type_name()
            ))),
        }
    }

    #[test]
    fn test_applies_the_callback_to_each_record() {
        let list = vec![Data::Int(2), Data::Int(3)];

        let mut pipeline = read_list(list).map(square, 1, false).and_return();

        assert_eq!(pipeline.next().unwrap(), Some(Data::Int(4)));
        assert_eq!(pipeline.next().unwrap(), Some(Data::Int(9)));
        assert_eq!(pipeline.next().unwrap(), None);
    }

    #[test]
    fn test_callback_failure_breaks_the_pipeline() {
        let list = vec![Data::Int(2), Data::from("oops"), Data::Int(3)];

        let mut pipeline = read_list(list).map(square, 1, false).and_return();

        assert_eq!(pipeline.next().unwrap(), Some(Data::Int(4)));
        assert!(pipeline.next().is_err());
        assert!(pipeline.is_broken());
        assert!(matches!(pipeline.next(), Err(Error::Broken)));
    }

    #[test]
    fn test_warn_only_skips_failing_records() {
        let list = vec![Data::Int(2), Data::from("oops"), Data::Int(3)];

        let mut pipeline = read_list(list).map(square, 1, true).and_return();

        assert_eq!(pipeline.next().unwrap(), Some(Data::Int(4)));
        assert_eq!(pipeline.next().unwrap(), Some(Data::Int(9)));
        assert_eq!(pipeline.next().unwrap(), None);
        assert!(!pipeline.is_broken());
    }
}
