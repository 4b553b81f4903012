//! Routing of the stream elements from the sources to the partitions.

use std::hash::{BuildHasher, Hash};

mod next_strategy;

pub(crate) use next_strategy::*;

/// Identifier of a source of the pipeline.
pub type SourceId = usize;

/// Identifier of a partition of the pipeline.
pub type PartitionId = usize;

/// Hasher used to route the keys to the partitions and to index the state of the keys.
pub type GroupHasherBuilder = core::hash::BuildHasherDefault<wyhash::WyHash>;

/// Hasher used for small integer identifiers.
pub type CoordHasherBuilder = fxhash::FxBuildHasher;

/// Hash of a key, stable for the whole execution.
#[inline]
pub fn group_by_hash<T: Hash>(item: &T) -> u64 {
    GroupHasherBuilder::default().hash_one(item)
}
