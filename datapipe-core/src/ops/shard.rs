//! Modulo-partitioning the stream across workers

use crate::data::Data;
use crate::error::Result;
use crate::source::DataSource;
use crate::tape::Tape;

/// Emits the records whose global index modulo `num_shards` equals
/// `shard_index`, by reading one block of `num_shards` records per pull.
pub(crate) struct ShardDataSource {
    upstream: Box<dyn DataSource>,
    shard_index: usize,
    num_shards: usize,
}

impl ShardDataSource {
    pub(crate) fn new(
        upstream: Box<dyn DataSource>,
        shard_index: usize,
        num_shards: usize,
    ) -> Self {
        Self {
            upstream,
            shard_index,
            num_shards,
        }
    }
}

impl DataSource for ShardDataSource {
    fn next(&mut self) -> Result<Option<Data>> {
        let mut output = None;

        // A trailing block that ends before this shard's slot ends the
        // stream.
        for slot in 0..self.num_shards {
            match self.upstream.next()? {
                Some(record) => {
                    if slot == self.shard_index {
                        output = Some(record);
                    }
                }
                None => break,
            }
        }

        Ok(output)
    }

    fn reset(&mut self) -> Result<()> {
        self.upstream.reset()
    }

    // Blocks never span pulls, so the upstream carries all state.
    fn record_position(&mut self, tape: &mut Tape) -> Result<()> {
        self.upstream.record_position(tape)
    }

    fn reload_position(&mut self, tape: &mut Tape) -> Result<()> {
        self.upstream.reload_position(tape)
    }
}
