//! Pipeline handle and fluent builder

use std::sync::Arc;

use crate::data::Data;
use crate::error::{Error, Result};
use crate::ops::bucket::{BucketByLengthDataSource, BucketDataSource};
use crate::ops::filter::FilterDataSource;
use crate::ops::map::MapDataSource;
use crate::ops::parallel_map::ParallelMapDataSource;
use crate::ops::prefetch::PrefetchDataSource;
use crate::ops::round_robin::RoundRobinDataSource;
use crate::ops::shard::ShardDataSource;
use crate::ops::shuffle::ShuffleDataSource;
use crate::ops::skip::SkipDataSource;
use crate::ops::take::TakeDataSource;
use crate::ops::yield_from::YieldFromDataSource;
use crate::ops::zip::ZipDataSource;
use crate::source::DataSource;
use crate::tape::Tape;

/// Deferred constructor for the root source of a pipeline.
pub type DataSourceFactory = Box<dyn FnOnce() -> Result<Box<dyn DataSource>> + Send>;

/// Record transformation callback.
///
/// Invoked concurrently from multiple worker threads when the map stage is
/// parallel; it must be safe to call on distinct records at the same time.
pub type MapFn = Arc<dyn Fn(Data) -> Result<Data> + Send + Sync>;

/// Record predicate callback; must not mutate the record.
pub type PredicateFn = Box<dyn Fn(&Data) -> bool + Send>;

/// Record length measure used by `bucket_by_length`.
pub type DataLengthFn = Box<dyn Fn(&Data) -> usize + Send>;

/// Callback producing a sub-pipeline for each upstream record.
///
/// Must be deterministic: reloading a checkpoint re-invokes it on the
/// recorded record to rebuild the sub-pipeline.
pub type YieldFn = Box<dyn Fn(&Data) -> DataPipeline + Send>;

/// A lazy, checkpointable stream of records.
///
/// The handle owns a deferred factory for its operator chain; the chain is
/// materialised on the first pull and can be rewound with [`reset`]. Any
/// error raised while pulling marks the handle broken: every operation
/// except [`is_broken`] then fails until the next [`reset`].
///
/// [`reset`]: DataPipeline::reset
/// [`is_broken`]: DataPipeline::is_broken
pub struct DataPipeline {
    factory: Option<DataSourceFactory>,
    source: Option<Box<dyn DataSource>>,
    is_broken: bool,
}

impl DataPipeline {
    pub(crate) fn new(factory: DataSourceFactory) -> Self {
        Self {
            factory: Some(factory),
            source: None,
            is_broken: false,
        }
    }

    /// Pulls the next record. `Ok(None)` signals end of stream.
    pub fn next(&mut self) -> Result<Option<Data>> {
        self.check_if_broken()?;

        match self.ensure_initialized().and_then(|source| source.next()) {
            Ok(output) => Ok(output),
            Err(err) => {
                self.is_broken = true;

                Err(err)
            }
        }
    }

    /// Rewinds the pipeline to the start of the stream and clears the
    /// broken state.
    pub fn reset(&mut self) -> Result<()> {
        if let Some(source) = self.source.as_deref_mut() {
            if let Err(err) = source.reset() {
                self.is_broken = true;

                return Err(err);
            }
        }

        self.is_broken = false;

        Ok(())
    }

    /// Writes the pipeline's resumption state to the tape.
    pub fn record_position(&mut self, tape: &mut Tape) -> Result<()> {
        self.check_if_broken()?;

        match self
            .ensure_initialized()
            .and_then(|source| source.record_position(tape))
        {
            Ok(()) => Ok(()),
            Err(err) => {
                self.is_broken = true;

                Err(err)
            }
        }
    }

    /// Restores the pipeline's resumption state from the tape.
    ///
    /// Only a tape written by a pipeline with an identical operator graph
    /// can be reloaded; a mismatch fails with a corrupted-checkpoint error.
    pub fn reload_position(&mut self, tape: &mut Tape) -> Result<()> {
        self.check_if_broken()?;

        match self
            .ensure_initialized()
            .and_then(|source| source.reload_position(tape))
        {
            Ok(()) => Ok(()),
            Err(err) => {
                self.is_broken = true;

                Err(err)
            }
        }
    }

    /// Whether a previous error has poisoned the pipeline.
    pub fn is_broken(&self) -> bool {
        self.is_broken
    }

    fn check_if_broken(&self) -> Result<()> {
        if self.is_broken {
            return Err(Error::Broken);
        }

        Ok(())
    }

    fn ensure_initialized(&mut self) -> Result<&mut dyn DataSource> {
        if self.source.is_none() {
            let factory = self
                .factory
                .take()
                .ok_or_else(|| Error::operator("the data pipeline source failed to initialize"))?;

            self.source = Some(factory()?);
        }

        match self.source.as_deref_mut() {
            Some(source) => Ok(source),
            None => Err(Error::operator("the data pipeline source failed to initialize")),
        }
    }

    /// Returns a builder over a pipeline that emits one composite record
    /// per pull, combining one record from every input pipeline.
    pub fn zip(pipelines: Vec<DataPipeline>, options: ZipOptions) -> DataPipelineBuilder {
        DataPipelineBuilder::new(move || {
            if let Some(names) = &options.names {
                if names.len() != pipelines.len() {
                    return Err(Error::InvalidArgument(format!(
                        "the number of names ({}) does not match the number of pipelines ({})",
                        names.len(),
                        pipelines.len()
                    )));
                }

                if options.flatten {
                    return Err(Error::InvalidArgument(
                        "`flatten` cannot be combined with `names`".to_string(),
                    ));
                }
            }

            Ok(Box::new(ZipDataSource::new(pipelines, options)) as Box<dyn DataSource>)
        })
    }

    /// Returns a builder over a pipeline that cycles through the input
    /// pipelines, resetting and reusing each one as it ends.
    pub fn round_robin(pipelines: Vec<DataPipeline>) -> DataPipelineBuilder {
        DataPipelineBuilder::new(move || {
            Ok(Box::new(RoundRobinDataSource::new(pipelines)) as Box<dyn DataSource>)
        })
    }
}

/// Options for [`DataPipeline::zip`].
#[derive(Debug, Clone, Default)]
pub struct ZipOptions {
    /// Keys under which child records appear in the composite map; when
    /// absent the composite is an ordered list.
    pub names: Option<Vec<String>>,

    /// Merge child maps (or lists) into one instead of nesting them.
    pub flatten: bool,

    /// Log a warning instead of silently ending when the children have
    /// different lengths.
    pub warn_only: bool,

    /// Pull the children sequentially in declaration order instead of in
    /// parallel.
    pub disable_parallelism: bool,
}

/// A single-use builder accumulating the factory of a pipeline.
///
/// Each operator method consumes the builder and returns a new one whose
/// factory wraps the previous; nothing is constructed until the pipeline
/// is first pulled. Configuration errors surface on that first pull.
pub struct DataPipelineBuilder {
    factory: DataSourceFactory,
}

impl DataPipelineBuilder {
    /// Creates a builder from a root source factory.
    pub fn new(
        factory: impl FnOnce() -> Result<Box<dyn DataSource>> + Send + 'static,
    ) -> Self {
        Self {
            factory: Box::new(factory),
        }
    }

    fn wrap(
        self,
        wrap: impl FnOnce(Box<dyn DataSource>) -> Result<Box<dyn DataSource>> + Send + 'static,
    ) -> Self {
        let factory = self.factory;

        Self {
            factory: Box::new(move || wrap(factory()?)),
        }
    }

    /// Accumulates `bucket_size` records per pull and emits them as one
    /// list record; a final partial bucket is emitted unless
    /// `drop_remainder`.
    pub fn bucket(self, bucket_size: usize, drop_remainder: bool) -> Self {
        self.wrap(move |upstream| {
            if bucket_size == 0 {
                return Err(Error::InvalidArgument(
                    "`bucket_size` must be greater than zero".to_string(),
                ));
            }

            Ok(Box::new(BucketDataSource::new(
                upstream,
                bucket_size,
                drop_remainder,
            )))
        })
    }

    /// Groups records into `(max_len, batch_size)` buckets keyed by the
    /// length measure; a bucket is emitted when it reaches its batch size.
    pub fn bucket_by_length(
        self,
        bucket_sizes: Vec<(usize, usize)>,
        data_length_fn: impl Fn(&Data) -> usize + Send + 'static,
        drop_remainder: bool,
        warn_only: bool,
    ) -> Self {
        self.wrap(move |upstream| {
            if bucket_sizes.is_empty() {
                return Err(Error::InvalidArgument(
                    "`bucket_sizes` must contain at least one element".to_string(),
                ));
            }

            if bucket_sizes
                .iter()
                .any(|&(max_len, batch_size)| max_len == 0 || batch_size == 0)
            {
                return Err(Error::InvalidArgument(
                    "`bucket_sizes` must hold positive lengths and batch sizes".to_string(),
                ));
            }

            Ok(Box::new(BucketByLengthDataSource::new(
                upstream,
                bucket_sizes,
                Box::new(data_length_fn),
                drop_remainder,
                warn_only,
            )))
        })
    }

    /// Drops records for which the predicate returns `false`.
    pub fn filter(self, predicate_fn: impl Fn(&Data) -> bool + Send + 'static) -> Self {
        self.wrap(move |upstream| {
            Ok(Box::new(FilterDataSource::new(
                upstream,
                Box::new(predicate_fn),
            )))
        })
    }

    /// Applies the callback to every record, on a pool of
    /// `num_parallel_calls` worker threads when greater than one. Input
    /// order is preserved either way. With `warn_only`, a failing call is
    /// logged and its record skipped instead of breaking the pipeline.
    pub fn map(
        self,
        map_fn: impl Fn(Data) -> Result<Data> + Send + Sync + 'static,
        num_parallel_calls: usize,
        warn_only: bool,
    ) -> Self {
        self.wrap(move |upstream| {
            if num_parallel_calls == 0 {
                return Err(Error::InvalidArgument(
                    "`num_parallel_calls` must be greater than zero".to_string(),
                ));
            }

            let map_fn: MapFn = Arc::new(map_fn);

            let source: Box<dyn DataSource> = if num_parallel_calls == 1 {
                Box::new(MapDataSource::new(upstream, map_fn, warn_only))
            } else {
                Box::new(ParallelMapDataSource::new(
                    upstream,
                    map_fn,
                    num_parallel_calls,
                    warn_only,
                )?)
            };

            Ok(source)
        })
    }

    /// Reads up to `num_examples` records ahead on a background thread.
    /// Zero disables read-ahead.
    pub fn prefetch(self, num_examples: usize) -> Self {
        self.wrap(move |upstream| {
            if num_examples == 0 {
                return Ok(upstream);
            }

            Ok(Box::new(PrefetchDataSource::new(upstream, num_examples)?))
        })
    }

    /// Emits the records whose global index modulo `num_shards` equals
    /// `shard_index`.
    pub fn shard(self, shard_index: usize, num_shards: usize) -> Self {
        self.wrap(move |upstream| {
            if num_shards == 0 {
                return Err(Error::InvalidArgument(
                    "`num_shards` must be greater than zero".to_string(),
                ));
            }

            if shard_index >= num_shards {
                return Err(Error::InvalidArgument(format!(
                    "`shard_index` ({shard_index}) must be less than `num_shards` ({num_shards})"
                )));
            }

            Ok(Box::new(ShardDataSource::new(
                upstream,
                shard_index,
                num_shards,
            )))
        })
    }

    /// Emits records in pseudo-random order drawn from a reservoir of up
    /// to `shuffle_window` records. Pass-through when not `enabled` or
    /// when the window is zero.
    pub fn shuffle(self, shuffle_window: usize, strict: bool, enabled: bool) -> Self {
        self.wrap(move |upstream| {
            if !enabled || shuffle_window == 0 {
                return Ok(upstream);
            }

            Ok(Box::new(ShuffleDataSource::new(
                upstream,
                shuffle_window,
                strict,
            )))
        })
    }

    /// Discards the first `num_examples` records of the stream.
    pub fn skip(self, num_examples: usize) -> Self {
        self.wrap(move |upstream| {
            Ok(Box::new(SkipDataSource::new(upstream, num_examples)))
        })
    }

    /// Ends the stream after `num_examples` records.
    pub fn take(self, num_examples: usize) -> Self {
        self.wrap(move |upstream| {
            Ok(Box::new(TakeDataSource::new(upstream, num_examples)))
        })
    }

    /// Streams every record of the sub-pipeline returned by the callback
    /// before pulling the next upstream record.
    pub fn yield_from(self, yield_fn: impl Fn(&Data) -> DataPipeline + Send + 'static) -> Self {
        self.wrap(move |upstream| {
            Ok(Box::new(YieldFromDataSource::new(
                upstream,
                Box::new(yield_fn),
            )))
        })
    }

    /// Finalises the builder into a pipeline handle.
    pub fn and_return(self) -> DataPipeline {
        DataPipeline::new(self.factory)
    }
}
