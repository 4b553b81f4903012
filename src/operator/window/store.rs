use std::collections::VecDeque;
use std::ops::Range;

use super::aggr::{AggregateError, WindowAccumulator};
use crate::operator::Timestamp;

/// An open session window.
#[derive(Clone, Debug)]
pub(crate) struct Slot<A> {
    /// Timestamp of the earliest event of the session.
    pub(crate) start: Timestamp,
    /// Timestamp of the latest event of the session.
    pub(crate) end: Timestamp,
    /// Partial state of the aggregation.
    pub(crate) acc: A,
}

impl<A> Slot<A> {
    #[inline]
    fn new(acc: A, ts: Timestamp) -> Self {
        Self {
            acc,
            start: ts,
            end: ts,
        }
    }

    /// Whether an event at `ts` belongs to this session.
    #[inline]
    fn admits(&self, ts: Timestamp, gap: Timestamp) -> bool {
        self.start.saturating_sub(gap) <= ts && ts <= self.end.saturating_add(gap)
    }

    /// Whether this session can no longer be extended once the watermark reached `watermark`.
    #[inline]
    pub(crate) fn expired(&self, watermark: Timestamp, gap: Timestamp) -> bool {
        self.end.saturating_add(gap) < watermark
    }
}

/// How an event has been assigned to a session.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Assignment {
    /// A new session has been opened for the event.
    Created,
    /// The event falls inside an open session.
    Extended,
    /// The event bridged two open sessions, which have been merged into one.
    Merged,
}

/// The bounds of the session an event has been assigned to.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct WindowHandle {
    pub start: Timestamp,
    pub end: Timestamp,
    pub assignment: Assignment,
}

/// The open sessions of a single key.
///
/// Sessions are kept sorted by `start`, and any two of them are separated by more than `gap`:
/// since a single event can be at most `gap` away from both its neighbours, an event touches at
/// most two sessions.
#[derive(Clone, Debug)]
pub(crate) struct SessionStore<A> {
    slots: VecDeque<Slot<A>>,
}

impl<A> Default for SessionStore<A> {
    fn default() -> Self {
        Self {
            slots: VecDeque::new(),
        }
    }
}

impl<A: WindowAccumulator> SessionStore<A> {
    /// Range of the sessions that an event at `ts` belongs to.
    fn touching(&self, ts: Timestamp, gap: Timestamp) -> Range<usize> {
        let first = self
            .slots
            .partition_point(|s| s.end.saturating_add(gap) < ts);
        let last = first
            + self
                .slots
                .range(first..)
                .take_while(|s| s.admits(ts, gap))
                .count();
        debug_assert!(last - first <= 2, "sessions of a key must be disjoint");
        first..last
    }

    /// Open a new session at `ts`, keeping the sessions sorted by start.
    pub(crate) fn insert(&mut self, acc: A, ts: Timestamp) -> usize {
        let idx = self.slots.partition_point(|s| s.start < ts);
        self.slots.insert(idx, Slot::new(acc, ts));
        idx
    }

    /// Stretch the session at `idx` so that it includes `ts`.
    pub(crate) fn extend(&mut self, idx: usize, ts: Timestamp) {
        let slot = &mut self.slots[idx];
        slot.start = slot.start.min(ts);
        slot.end = slot.end.max(ts);
    }

    /// Merge the session at `idx + 1` into the one at `idx`.
    pub(crate) fn merge(&mut self, idx: usize) -> Result<(), AggregateError> {
        let Some(next) = self.slots.remove(idx + 1) else {
            return Ok(());
        };
        let slot = &mut self.slots[idx];
        slot.start = slot.start.min(next.start);
        slot.end = slot.end.max(next.end);
        slot.acc.combine(next.acc)
    }

    /// Find the session for an event at `ts`, creating or merging sessions as required, and fold
    /// the event into it.
    pub(crate) fn assign(
        &mut self,
        item: &A::In,
        ts: Timestamp,
        gap: Timestamp,
        init: &A,
    ) -> Result<WindowHandle, AggregateError> {
        let range = self.touching(ts, gap);
        let (idx, assignment) = match range.len() {
            0 => (self.insert(init.clone(), ts), Assignment::Created),
            1 => {
                self.extend(range.start, ts);
                (range.start, Assignment::Extended)
            }
            _ => {
                self.merge(range.start)?;
                self.extend(range.start, ts);
                (range.start, Assignment::Merged)
            }
        };
        let slot = &mut self.slots[idx];
        slot.acc.process(item)?;
        Ok(WindowHandle {
            start: slot.start,
            end: slot.end,
            assignment,
        })
    }

    /// Remove and return the sessions that cannot be extended past `watermark`, in start order.
    ///
    /// Sessions are disjoint and sorted by start, so they are also sorted by end: the expired ones
    /// are a prefix.
    pub(crate) fn evict(
        &mut self,
        watermark: Timestamp,
        gap: Timestamp,
    ) -> impl Iterator<Item = Slot<A>> + '_ {
        let split = self.slots.partition_point(|s| s.expired(watermark, gap));
        self.slots.drain(..split)
    }

    /// Remove and return all the open sessions, in start order.
    pub(crate) fn drain(&mut self) -> impl Iterator<Item = Slot<A>> + '_ {
        self.slots.drain(..)
    }

    pub(crate) fn len(&self) -> usize {
        self.slots.len()
    }

    pub(crate) fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    #[cfg(test)]
    pub(crate) fn bounds(&self) -> Vec<(Timestamp, Timestamp)> {
        self.slots.iter().map(|s| (s.start, s.end)).collect()
    }
}
