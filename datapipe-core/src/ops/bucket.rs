//! Batching consecutive records

use tracing::warn;

use crate::data::Data;
use crate::error::{Error, Result};
use crate::pipeline::DataLengthFn;
use crate::source::DataSource;
use crate::tape::Tape;

const BUCKET_STATE_TAG: u8 = 5;
const BUCKET_BY_LENGTH_STATE_TAG: u8 = 6;

/// Accumulates a fixed number of records and emits them as one list record.
pub(crate) struct BucketDataSource {
    upstream: Box<dyn DataSource>,
    bucket_size: usize,
    drop_remainder: bool,
}

impl BucketDataSource {
    pub(crate) fn new(
        upstream: Box<dyn DataSource>,
        bucket_size: usize,
        drop_remainder: bool,
    ) -> Self {
        Self {
            upstream,
            bucket_size,
            drop_remainder,
        }
    }
}

impl DataSource for BucketDataSource {
    fn next(&mut self) -> Result<Option<Data>> {
        let mut bucket = Vec::with_capacity(self.bucket_size);

        while bucket.len() < self.bucket_size {
            match self.upstream.next()? {
                Some(record) => bucket.push(record),
                None => break,
            }
        }

        if bucket.is_empty() {
            return Ok(None);
        }

        if bucket.len() < self.bucket_size && self.drop_remainder {
            return Ok(None);
        }

        Ok(Some(Data::List(bucket)))
    }

    fn reset(&mut self) -> Result<()> {
        self.upstream.reset()
    }

    // Buckets are assembled within a single pull, so no partial bucket ever
    // exists between pulls; the upstream position is the whole state.
    fn record_position(&mut self, tape: &mut Tape) -> Result<()> {
        tape.write_tag(BUCKET_STATE_TAG);

        self.upstream.record_position(tape)
    }

    fn reload_position(&mut self, tape: &mut Tape) -> Result<()> {
        tape.expect_tag(BUCKET_STATE_TAG, "bucket")?;

        self.upstream.reload_position(tape)
    }
}

/// Groups records into buckets keyed by a length measure; each bucket has
/// its own batch size and is emitted when full.
pub(crate) struct BucketByLengthDataSource {
    upstream: Box<dyn DataSource>,
    bucket_sizes: Vec<(usize, usize)>,
    data_length_fn: DataLengthFn,
    drop_remainder: bool,
    warn_only: bool,
    buckets: Vec<Vec<Data>>,
    upstream_ended: bool,
}

impl BucketByLengthDataSource {
    /// `bucket_sizes` holds `(max_len, batch_size)` pairs; they are kept
    /// sorted ascending by `max_len` so lookup finds the tightest bucket.
    pub(crate) fn new(
        upstream: Box<dyn DataSource>,
        mut bucket_sizes: Vec<(usize, usize)>,
        data_length_fn: DataLengthFn,
        drop_remainder: bool,
        warn_only: bool,
    ) -> Self {
        bucket_sizes.sort_unstable_by_key(|(max_len, _)| *max_len);

        let buckets = bucket_sizes.iter().map(|_| Vec::new()).collect();

        Self {
            upstream,
            bucket_sizes,
            data_length_fn,
            drop_remainder,
            warn_only,
            buckets,
            upstream_ended: false,
        }
    }

    fn flush_partial_bucket(&mut self) -> Option<Data> {
        if self.drop_remainder {
            for bucket in &mut self.buckets {
                bucket.clear();
            }

            return None;
        }

        for bucket in &mut self.buckets {
            if !bucket.is_empty() {
                return Some(Data::List(std::mem::take(bucket)));
            }
        }

        None
    }
}

impl DataSource for BucketByLengthDataSource {
    fn next(&mut self) -> Result<Option<Data>> {
        loop {
            if self.upstream_ended {
                return Ok(self.flush_partial_bucket());
            }

            let Some(record) = self.upstream.next()? else {
                self.upstream_ended = true;

                continue;
            };

            let length = (self.data_length_fn)(&record);

            let Some(index) = self
                .bucket_sizes
                .iter()
                .position(|(max_len, _)| *max_len >= length)
            else {
                if self.warn_only {
                    warn!(
                        length,
                        "the length of the record exceeds the largest bucket; skipping"
                    );

                    continue;
                }

                return Err(Error::operator_with_example(
                    format!("the length of the record ({length}) exceeds the largest bucket"),
                    record,
                ));
            };

            let (_, batch_size) = self.bucket_sizes[index];

            self.buckets[index].push(record);

            if self.buckets[index].len() >= batch_size {
                return Ok(Some(Data::List(std::mem::take(&mut self.buckets[index]))));
            }
        }
    }

    fn reset(&mut self) -> Result<()> {
        for bucket in &mut self.buckets {
            bucket.clear();
        }

        self.upstream_ended = false;

        self.upstream.reset()
    }

    fn record_position(&mut self, tape: &mut Tape) -> Result<()> {
        tape.write_tag(BUCKET_BY_LENGTH_STATE_TAG);
        tape.write_int(i64::from(self.upstream_ended));
        tape.write_size(self.buckets.len());

        for bucket in &self.buckets {
            tape.write(Data::List(bucket.clone()));
        }

        self.upstream.record_position(tape)
    }

    fn reload_position(&mut self, tape: &mut Tape) -> Result<()> {
        tape.expect_tag(BUCKET_BY_LENGTH_STATE_TAG, "bucket_by_length")?;

        self.upstream_ended = tape.read_int()? != 0;

        let count = tape.read_size()?;

        if count != self.buckets.len() {
            return Err(Error::CorruptedCheckpoint(format!(
                "the recorded bucket count ({count}) does not match the operator ({})",
                self.buckets.len()
            )));
        }

        for bucket in &mut self.buckets {
            match tape.read()? {
                Data::List(records) => *bucket = records,
                other => {
                    return Err(Error::CorruptedCheckpoint(format!(
                        "expected a bucket list, found {}",
                        other.type_name()
                    )))
                }
            }
        }

        self.upstream.reload_position(tape)
    }
}
