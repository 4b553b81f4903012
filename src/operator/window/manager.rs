use std::collections::{BTreeMap, HashMap};
use std::fmt::{Display, Formatter};

use super::aggr::{AggregateError, WindowAccumulator};
use super::store::{SessionStore, Slot, WindowHandle};
use super::WindowResult;
use crate::block::GroupHasherBuilder;
use crate::operator::{DataKey, Timestamp};

/// The open sessions of a key, with the tick of the last event that touched them.
#[derive(Clone, Debug)]
struct KeySessions<A> {
    store: SessionStore<A>,
    touched: u64,
}

/// Manager of the open sessions of every key of a partition.
///
/// Events are assigned with [`add`](Self::add), sessions are closed when the watermark passes
/// their expiry with [`advance`](Self::advance). A session moves from open (inside the store) to
/// closing (evicted from the store) to emitted (finalized into a `WindowResult`), and is never
/// reopened: events older than the watermark must be filtered by the caller with
/// [`is_late_for`](Self::is_late_for).
#[derive(Clone, Debug)]
pub struct KeyedSessionManager<Key, A: WindowAccumulator> {
    /// The maximum inactivity inside a session.
    gap: Timestamp,
    /// The empty accumulator every session starts from.
    init: A,
    sessions: HashMap<Key, KeySessions<A>, GroupHasherBuilder>,
    /// Keys ordered by their last access, used for the capacity policy.
    lru: BTreeMap<u64, Key>,
    tick: u64,
    max_active_keys: Option<usize>,
    evicted_keys: u64,
    /// For the keys closed early by the capacity policy, the last timestamp their emitted sessions
    /// could still have absorbed. Dropped once the watermark passes it.
    horizons: HashMap<Key, Timestamp, GroupHasherBuilder>,
    watermark: Option<Timestamp>,
}

impl<Key: DataKey, A: WindowAccumulator> KeyedSessionManager<Key, A> {
    pub(crate) fn new(gap: Timestamp, init: A) -> Self {
        Self {
            gap,
            init,
            sessions: Default::default(),
            lru: Default::default(),
            tick: 0,
            max_active_keys: None,
            evicted_keys: 0,
            horizons: Default::default(),
            watermark: None,
        }
    }

    /// Limit the number of keys with open sessions.
    ///
    /// When a new key would exceed the limit, the sessions of the least recently active key are
    /// closed early and emitted.
    pub fn with_max_active_keys(mut self, max_active_keys: Option<usize>) -> Self {
        if let Some(max) = max_active_keys {
            assert!(max > 0, "max_active_keys must be > 0");
        }
        self.max_active_keys = max_active_keys;
        self
    }

    pub fn gap(&self) -> Timestamp {
        self.gap
    }

    /// The last watermark that closed the sessions.
    pub fn watermark(&self) -> Option<Timestamp> {
        self.watermark
    }

    /// Whether an event at `ts` arrived after the watermark passed it.
    #[inline]
    pub fn is_late(&self, ts: Timestamp) -> bool {
        matches!(self.watermark, Some(w) if ts < w)
    }

    /// Whether an event of `key` at `ts` must be treated as late.
    ///
    /// Besides the events behind the watermark, this includes the events of a key closed early by
    /// the capacity policy, up to the end of its emitted sessions plus the gap, so that a closed
    /// session is never produced twice.
    #[inline]
    pub fn is_late_for(&self, key: &Key, ts: Timestamp) -> bool {
        self.is_late(ts) || matches!(self.horizons.get(key), Some(h) if ts <= *h)
    }

    /// Number of keys with at least one open session.
    pub fn active_keys(&self) -> usize {
        self.sessions.len()
    }

    /// Number of open sessions, across all the keys.
    pub fn open_windows(&self) -> usize {
        self.sessions.values().map(|s| s.store.len()).sum()
    }

    /// Number of keys closed early by the capacity policy.
    pub fn evicted_keys(&self) -> u64 {
        self.evicted_keys
    }

    /// Assign an event to the sessions of its key.
    ///
    /// Sessions closed early by the capacity policy are pushed into `out`.
    pub fn add(
        &mut self,
        key: Key,
        item: &A::In,
        ts: Timestamp,
        out: &mut Vec<WindowResult<Key, A::Out>>,
    ) -> Result<WindowHandle, AggregateError> {
        self.tick += 1;
        let tick = self.tick;

        let entry = self
            .sessions
            .entry(key.clone())
            .or_insert_with(|| KeySessions {
                store: SessionStore::default(),
                touched: tick,
            });
        self.lru.remove(&entry.touched);
        entry.touched = tick;
        let handle = entry.store.assign(item, ts, self.gap, &self.init)?;
        self.lru.insert(tick, key);

        if let Some(max) = self.max_active_keys {
            while self.sessions.len() > max {
                self.evict_lru(out);
            }
        }
        Ok(handle)
    }

    fn evict_lru(&mut self, out: &mut Vec<WindowResult<Key, A::Out>>) {
        let Some((_, key)) = self.lru.pop_first() else {
            return;
        };
        if let Some(mut sessions) = self.sessions.remove(&key) {
            debug!(
                "capacity reached, closing {} sessions of {:?} early",
                sessions.store.len(),
                key
            );
            self.evicted_keys += 1;
            let first = out.len();
            out.extend(sessions.store.drain().map(|s| finish(&key, s)));
            if let Some(end) = out[first..].iter().map(|r| r.end).max() {
                let horizon = end.saturating_add(self.gap);
                let h = self.horizons.entry(key).or_insert(horizon);
                *h = (*h).max(horizon);
            }
        }
    }

    /// Close all the sessions that can no longer be extended once the watermark is at `ts`.
    ///
    /// The results are pushed into `out`, sorted by start and key. A watermark that does not move
    /// forward is ignored.
    pub fn advance(&mut self, ts: Timestamp, out: &mut Vec<WindowResult<Key, A::Out>>) {
        if matches!(self.watermark, Some(w) if w >= ts) {
            return;
        }
        self.watermark = Some(ts);

        let first = out.len();
        let gap = self.gap;
        let lru = &mut self.lru;
        self.sessions.retain(|key, sessions| {
            out.extend(sessions.store.evict(ts, gap).map(|s| finish(key, s)));
            if sessions.store.is_empty() {
                lru.remove(&sessions.touched);
                false
            } else {
                true
            }
        });
        out[first..].sort_by(|a, b| (a.start, &a.key).cmp(&(b.start, &b.key)));
        self.horizons.retain(|_, h| *h >= ts);
    }

    /// Close every open session, as if the watermark reached the end of time.
    pub fn flush(&mut self, out: &mut Vec<WindowResult<Key, A::Out>>) {
        let first = out.len();
        for (key, mut sessions) in self.sessions.drain() {
            out.extend(sessions.store.drain().map(|s| finish(&key, s)));
        }
        self.lru.clear();
        self.horizons.clear();
        self.watermark = Some(Timestamp::MAX);
        out[first..].sort_by(|a, b| (a.start, &a.key).cmp(&(b.start, &b.key)));
    }

    /// Drop every open session without emitting it, returning how many have been discarded.
    pub fn clear(&mut self) -> usize {
        let discarded = self.open_windows();
        self.sessions.clear();
        self.lru.clear();
        self.horizons.clear();
        discarded
    }
}

fn finish<Key: Clone, A: WindowAccumulator>(key: &Key, slot: Slot<A>) -> WindowResult<Key, A::Out> {
    WindowResult {
        key: key.clone(),
        start: slot.start,
        end: slot.end,
        value: slot.acc.output(),
    }
}

impl<Key: DataKey, A: WindowAccumulator> Display for KeyedSessionManager<Key, A> {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "KeyedSessionManager<({}, {}), gap={}>",
            std::any::type_name::<Key>(),
            std::any::type_name::<A::Out>(),
            self.gap
        )
    }
}
