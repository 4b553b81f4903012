use indexmap::IndexMap;

use crate::block::{CoordHasherBuilder, SourceId};
use crate::operator::Timestamp;

/// Handle watermarks coming from multiple sources.
///
/// A watermark with timestamp `ts` is safe to be passed downstream if and only if, for every
/// active source, a watermark with timestamp greater or equal to `ts` has already been received.
/// A source that announced itself idle is not waited for until it sends a watermark again.
#[derive(Clone, Debug, Default)]
pub struct WatermarkFrontier {
    map: IndexMap<SourceId, SourceState, CoordHasherBuilder>,
    front: Option<Timestamp>,
}

#[derive(Clone, Copy, Debug, Default)]
struct SourceState {
    watermark: Option<Timestamp>,
    idle: bool,
}

fn opt_join<T: std::cmp::Ord>(a: Option<T>, b: Option<T>, f: fn(T, T) -> T) -> Option<T> {
    match (a, b) {
        (Some(a), Some(b)) => Some(f(a, b)),
        (a, None) | (None, a) => a,
    }
}

impl WatermarkFrontier {
    pub fn new(sources: impl IntoIterator<Item = SourceId>) -> Self {
        Self {
            map: sources
                .into_iter()
                .map(|s| (s, SourceState::default()))
                .collect(),
            front: None,
        }
    }

    fn compute_frontier(&self) -> Option<Timestamp> {
        let (complete, min) = self
            .map
            .values()
            .filter(|s| !s.idle)
            .fold((true, None), |(all, min), s| {
                (all & s.watermark.is_some(), opt_join(min, s.watermark, std::cmp::min))
            });

        if complete {
            min
        } else {
            None
        }
    }

    /// Recompute the frontier, return `Some(ts)` if it moved forward.
    fn refresh(&mut self) -> Option<Timestamp> {
        match (self.front, self.compute_frontier()) {
            (None, Some(new)) => {
                self.front = Some(new);
                Some(new)
            }
            (Some(old), Some(new)) if old < new => {
                self.front = Some(new);
                Some(new)
            }
            _ => None,
        }
    }

    /// The current frontier, if every active source sent a watermark.
    pub fn get(&self) -> Option<Timestamp> {
        self.front
    }

    /// Update the frontier, return `Some(ts)` if timestamp `ts` is now safe.
    ///
    /// Watermarks from unknown sources and watermarks older than the last one of their source are
    /// ignored, so the frontier never moves backward. A watermark makes an idle source active.
    pub fn update(&mut self, source: SourceId, ts: Timestamp) -> Option<Timestamp> {
        let Some(state) = self.map.get_mut(&source) else {
            warn!("watermark from unknown source {source} ignored");
            return None;
        };
        let was_idle = std::mem::replace(&mut state.idle, false);
        if matches!(state.watermark, Some(t) if t >= ts) {
            // Early break for old watermark
            return None;
        }
        state.watermark = Some(ts);
        if was_idle {
            debug!("source {source} is active again");
        }
        self.refresh()
    }

    /// Stop waiting for a source that has not produced anything.
    pub fn idle(&mut self, source: SourceId) -> Option<Timestamp> {
        let Some(state) = self.map.get_mut(&source) else {
            warn!("idle notification from unknown source {source} ignored");
            return None;
        };
        state.idle = true;
        self.refresh()
    }

    /// Mark a source as finished: it will never hold back the frontier again.
    pub fn finish(&mut self, source: SourceId) -> Option<Timestamp> {
        self.update(source, Timestamp::MAX)
    }

    /// Whether every source has finished.
    pub fn all_finished(&self) -> bool {
        self.map
            .values()
            .all(|s| s.watermark == Some(Timestamp::MAX))
    }

    /// Reset all the watermarks.
    pub fn reset(&mut self) {
        self.map
            .values_mut()
            .for_each(|s| *s = SourceState::default());
        self.front = None;
    }
}

#[cfg(test)]
mod tests {
    use itertools::Itertools;
    use rand::rngs::SmallRng;
    use rand::{Rng, SeedableRng};

    use super::*;

    #[test]
    fn minimum_of_sources() {
        let mut frontier = WatermarkFrontier::new(0..3);
        assert_eq!(frontier.update(0, 10), None);
        assert_eq!(frontier.update(1, 5), None);
        assert_eq!(frontier.update(2, 7), Some(5));
        assert_eq!(frontier.update(1, 20), Some(7));
        // older than the last watermark of source 0
        assert_eq!(frontier.update(0, 8), None);
        assert_eq!(frontier.update(2, 30), Some(10));
        assert_eq!(frontier.get(), Some(10));
    }

    #[test]
    fn finished_sources() {
        let mut frontier = WatermarkFrontier::new([0, 1]);
        assert_eq!(frontier.update(0, 10), None);
        assert_eq!(frontier.finish(1), Some(10));
        assert!(!frontier.all_finished());
        assert_eq!(frontier.finish(0), Some(Timestamp::MAX));
        assert!(frontier.all_finished());
    }

    #[test]
    fn unknown_source() {
        let mut frontier = WatermarkFrontier::new([0]);
        assert_eq!(frontier.update(3, 10), None);
        assert_eq!(frontier.get(), None);
    }

    #[test]
    fn monotonic_under_any_interleaving() {
        let mut rng = SmallRng::seed_from_u64(0xfeed);
        for _ in 0..100 {
            let mut frontier = WatermarkFrontier::new(0..4);
            let published = (0..200)
                .filter_map(|_| frontier.update(rng.random_range(0..4), rng.random_range(0..1000)))
                .collect_vec();
            assert!(published.iter().tuple_windows().all(|(a, b)| a < b));
        }
    }

    #[test]
    fn idle_sources_are_not_waited_for() {
        let mut frontier = WatermarkFrontier::new(0..3);
        assert_eq!(frontier.update(0, 10), None);
        assert_eq!(frontier.idle(1), None);
        assert_eq!(frontier.idle(2), Some(10));
        assert_eq!(frontier.update(0, 20), Some(20));

        // an idle source that wakes up holds the frontier again, without moving it back
        assert_eq!(frontier.update(1, 5), None);
        assert_eq!(frontier.get(), Some(20));
        assert_eq!(frontier.update(0, 30), None);
        assert_eq!(frontier.update(1, 25), Some(25));
    }

    #[test]
    fn all_sources_idle() {
        let mut frontier = WatermarkFrontier::new([0, 1]);
        assert_eq!(frontier.idle(0), None);
        assert_eq!(frontier.idle(1), None);
        assert_eq!(frontier.get(), None);
        assert_eq!(frontier.finish(0), Some(Timestamp::MAX));
    }

    #[test]
    fn reset() {
        let mut frontier = WatermarkFrontier::new([0]);
        assert_eq!(frontier.update(0, 10), Some(10));
        frontier.reset();
        assert_eq!(frontier.get(), None);
        assert_eq!(frontier.update(0, 5), Some(5));
    }
}
