//! Pipeline operators
//!
//! Every operator is a lazy source wrapping its upstream. Operators are
//! constructed through [`DataPipelineBuilder`](crate::DataPipelineBuilder);
//! only the factory functions are part of the public surface.

pub mod list;

pub(crate) mod bucket;
pub(crate) mod filter;
pub(crate) mod map;
pub(crate) mod parallel_map;
pub(crate) mod prefetch;
pub(crate) mod round_robin;
pub(crate) mod shard;
pub(crate) mod shuffle;
pub(crate) mod skip;
pub(crate) mod take;
pub(crate) mod yield_from;
pub(crate) mod zip;
