//! Zipping independent pipelines into composite records

use std::collections::BTreeMap;

use rayon::prelude::*;
use tracing::warn;

use crate::data::Data;
use crate::error::{Error, Result};
use crate::pipeline::{DataPipeline, ZipOptions};
use crate::source::DataSource;
use crate::tape::Tape;

const STATE_TAG: u8 = 10;

/// Pulls one record from every child pipeline per emission and combines
/// them into a list, a named map, or a flattened merge.
pub(crate) struct ZipDataSource {
    pipelines: Vec<DataPipeline>,
    names: Option<Vec<String>>,
    flatten: bool,
    warn_only: bool,
    disable_parallelism: bool,
}

impl ZipDataSource {
    pub(crate) fn new(pipelines: Vec<DataPipeline>, options: ZipOptions) -> Self {
        Self {
            pipelines,
            names: options.names,
            flatten: options.flatten,
            warn_only: options.warn_only,
            disable_parallelism: options.disable_parallelism,
        }
    }

    fn flatten_records(&self, records: Vec<Data>) -> Result<Data> {
        if records.iter().all(|record| record.as_map().is_some()) {
            let mut merged = BTreeMap::new();

            for record in records {
                let Data::Map(map) = record else {
                    continue;
                };

                for (key, value) in map {
                    if merged.contains_key(&key) {
                        return Err(Error::operator(format!(
                            "the zipped data pipelines have duplicate keys: '{key}'"
                        )));
                    }

                    merged.insert(key, value);
                }
            }

            return Ok(Data::Map(merged));
        }

        if records.iter().all(|record| record.as_list().is_some()) {
            let mut merged = Vec::new();

            for record in records {
                let Data::List(list) = record else {
                    continue;
                };

                merged.extend(list);
            }

            return Ok(Data::List(merged));
        }

        Err(Error::operator(
            "the zipped records can only be flattened when every record is a map or every record is a list",
        ))
    }
}

impl DataSource for ZipDataSource {
    fn next(&mut self) -> Result<Option<Data>> {
        if self.pipelines.is_empty() {
            return Ok(None);
        }

        // Children are independent, so they are pulled in parallel unless
        // sequential pulls were requested.
        let outputs: Vec<Result<Option<Data>>> =
            if self.disable_parallelism || self.pipelines.len() == 1 {
                self.pipelines.iter_mut().map(DataPipeline::next).collect()
            } else {
                self.pipelines
                    .par_iter_mut()
                    .map(DataPipeline::next)
                    .collect()
            };

        let mut records = Vec::with_capacity(outputs.len());

        let mut num_ended = 0;

        for (index, output) in outputs.into_iter().enumerate() {
            match output {
                Ok(Some(record)) => records.push(record),
                Ok(None) => num_ended += 1,
                Err(err) => {
                    return Err(Error::operator(format!(
                        "the zipped data pipeline at index {index} has failed: {err}"
                    )))
                }
            }
        }

        if num_ended > 0 {
            if num_ended < self.pipelines.len() && self.warn_only {
                warn!(
                    "the zipped data pipelines have different lengths; the shortest determines the stream length"
                );
            }

            return Ok(None);
        }

        if self.flatten {
            return self.flatten_records(records).map(Some);
        }

        match &self.names {
            Some(names) => {
                let map = names.iter().cloned().zip(records).collect();

                Ok(Some(Data::Map(map)))
            }
            None => Ok(Some(Data::List(records))),
        }
    }

    fn reset(&mut self) -> Result<()> {
        for pipeline in &mut self.pipelines {
            pipeline.reset()?;
        }

        Ok(())
    }

    fn record_position(&mut self, tape: &mut Tape) -> Result<()> {
        tape.write_tag(STATE_TAG);
        tape.write_size(self.pipelines.len());

        for pipeline in &mut self.pipelines {
            pipeline.record_position(tape)?;
        }

        Ok(())
    }

    fn reload_position(&mut self, tape: &mut Tape) -> Result<()> {
        tape.expect_tag(STATE_TAG, "zip")?;

        let count = tape.read_size()?;

        if count != self.pipelines.len() {
            return Err(Error::CorruptedCheckpoint(format!(
                "the recorded pipeline count ({count}) does not match the operator ({})",
                self.pipelines.len()
            )));
        }

        for pipeline in &mut self.pipelines {
            pipeline.reload_position(tape)?;
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeMap;

    use crate::ops::list::read_list;
    use crate::{Data, DataPipeline, Error, ZipOptions};

    fn named_options(names: &[&str]) -> ZipOptions {
        ZipOptions {
            names: Some(names.iter().map(|name| name.to_string()).collect()),
            ..ZipOptions::default()
        }
    }

    #[test]
    fn test_combines_records_into_named_maps() {
        let keys = read_list(vec![Data::from("a"), Data::from("b"), Data::from("c")]);
        let values = read_list(vec![Data::Int(1), Data::Int(2)]);

        let mut pipeline = DataPipeline::zip(
            vec![keys.and_return(), values.and_return()],
            named_options(&["k", "v"]),
        )
        .and_return();

        let mut first = BTreeMap::new();
        first.insert("k".to_string(), Data::from("a"));
        first.insert("v".to_string(), Data::Int(1));

        assert_eq!(pipeline.next().unwrap(), Some(Data::Map(first)));

        let mut second = BTreeMap::new();
        second.insert("k".to_string(), Data::from("b"));
        second.insert("v".to_string(), Data::Int(2));

        assert_eq!(pipeline.next().unwrap(), Some(Data::Map(second)));

        // The shortest child determines the length.
        assert_eq!(pipeline.next().unwrap(), None);
    }

    #[test]
    fn test_combines_records_into_lists_without_names() {
        let left = read_list(vec![Data::Int(1)]).and_return();
        let right = read_list(vec![Data::Int(10)]).and_return();

        let mut pipeline =
            DataPipeline::zip(vec![left, right], ZipOptions::default()).and_return();

        assert_eq!(
            pipeline.next().unwrap(),
            Some(Data::List(vec![Data::Int(1), Data::Int(10)]))
        );
        assert_eq!(pipeline.next().unwrap(), None);
    }

    #[test]
    fn test_flatten_merges_maps_and_rejects_duplicate_keys() {
        fn map_of(key: &str, value: i64) -> Data {
            let mut map = BTreeMap::new();
            map.insert(key.to_string(), Data::Int(value));
            Data::Map(map)
        }

        let left = read_list(vec![map_of("x", 1)]).and_return();
        let right = read_list(vec![map_of("y", 2)]).and_return();

        let options = ZipOptions {
            flatten: true,
            ..ZipOptions::default()
        };

        let mut pipeline = DataPipeline::zip(vec![left, right], options).and_return();

        let mut expected = BTreeMap::new();
        expected.insert("x".to_string(), Data::Int(1));
        expected.insert("y".to_string(), Data::Int(2));

        assert_eq!(pipeline.next().unwrap(), Some(Data::Map(expected)));

        let left = read_list(vec![map_of("x", 1)]).and_return();
        let right = read_list(vec![map_of("x", 2)]).and_return();

        let options = ZipOptions {
            flatten: true,
            ..ZipOptions::default()
        };

        let mut pipeline = DataPipeline::zip(vec![left, right], options).and_return();

        assert!(pipeline.next().is_err());
        assert!(pipeline.is_broken());
    }

    #[test]
    fn test_sequential_pulls_match_parallel_pulls() {
        let left = read_list((1..=4).map(Data::Int).collect()).and_return();
        let right = read_list((11..=14).map(Data::Int).collect()).and_return();

        let options = ZipOptions {
            disable_parallelism: true,
            ..ZipOptions::default()
        };

        let mut pipeline = DataPipeline::zip(vec![left, right], options).and_return();

        for value in 1..=4i64 {
            assert_eq!(
                pipeline.next().unwrap(),
                Some(Data::List(vec![Data::Int(value), Data::Int(value + 10)]))
            );
        }

        assert_eq!(pipeline.next().unwrap(), None);
    }

    #[test]
    fn test_name_count_mismatch_is_rejected() {
        let child = read_list(vec![Data::Int(1)]).and_return();

        let mut pipeline =
            DataPipeline::zip(vec![child], named_options(&["a", "b"])).and_return();

        assert!(matches!(
            pipeline.next(),
            Err(Error::InvalidArgument(_))
        ));
    }

    #[test]
    fn test_checkpoint_restores_every_child() {
        let left = read_list((1..=6).map(Data::Int).collect()).and_return();
        let right = read_list((11..=16).map(Data::Int).collect()).and_return();

        let mut pipeline =
            DataPipeline::zip(vec![left, right], ZipOptions::default()).and_return();

        pipeline.next().unwrap();
        pipeline.next().unwrap();

        let mut tape = crate::Tape::new();
        pipeline.record_position(&mut tape).unwrap();

        pipeline.reset().unwrap();

        tape.rewind();
        pipeline.reload_position(&mut tape).unwrap();

        assert_eq!(
            pipeline.next().unwrap(),
            Some(Data::List(vec![Data::Int(3), Data::Int(13)]))
        );
    }
}
