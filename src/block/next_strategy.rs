use std::hash::Hash;
use std::marker::PhantomData;

use super::{group_by_hash, PartitionId};
use crate::operator::KeyerFn;

/// The strategy used by a source to pick the partition that receives an item.
///
/// Watermarks and control messages are not routed: every partition receives them.
#[derive(Clone)]
pub(crate) enum NextStrategy<Out, IndexFn = fn(&Out) -> u64>
where
    IndexFn: KeyerFn<u64, Out>,
{
    /// There is a single partition, every item goes there.
    OnlyOne,
    /// Among the partitions, the one is selected based on the hash of the key of the message.
    GroupBy(IndexFn, PhantomData<fn(&Out)>),
}

impl<Out: 'static> NextStrategy<Out> {
    /// Build a `NextStrategy` from a keyer function.
    pub(crate) fn group_by<Key: Hash, Keyer>(
        keyer: Keyer,
    ) -> NextStrategy<Out, impl KeyerFn<u64, Out>>
    where
        Keyer: KeyerFn<Key, Out>,
    {
        NextStrategy::GroupBy(
            move |item: &Out| group_by_hash(&keyer(item)),
            Default::default(),
        )
    }
}

impl<Out: 'static, IndexFn> NextStrategy<Out, IndexFn>
where
    IndexFn: KeyerFn<u64, Out>,
{
    /// Build the strategy for `partitions` partitions, hashing the keys only when needed.
    pub(crate) fn for_partitions(self, partitions: usize) -> Self {
        if partitions == 1 {
            NextStrategy::OnlyOne
        } else {
            self
        }
    }

    /// Compute the index of the partition which this message should be forwarded to.
    #[inline]
    pub(crate) fn index(&self, message: &Out, partitions: usize) -> PartitionId {
        match self {
            NextStrategy::OnlyOne => 0,
            NextStrategy::GroupBy(keyer, _) => (keyer(message) % partitions as u64) as usize,
        }
    }
}
