use coarsetime::{Duration, Instant};

use crate::operator::Timestamp;

/// Generate the watermarks of a single source.
///
/// The watermark trails the highest timestamp seen so far by a fixed lag, so events that are at
/// most `lag` milliseconds out of order are not late. A new watermark is published only when it
/// moved forward by at least `min_step` since the last one.
///
/// When the source stays silent for longer than `idle_timeout`, [`poll_idle`](Self::poll_idle)
/// lets the watermark catch up with the highest timestamp and keep advancing with the wall clock,
/// so that sessions close even when no more events arrive. A source that never produced an event
/// has no watermark to advance: it is announced idle instead, so that the partitions stop waiting
/// for it.
#[derive(Clone, Debug)]
pub struct WatermarkGenerator {
    lag: Timestamp,
    min_step: Timestamp,
    idle_timeout: Duration,
    /// Highest timestamp observed.
    max_seen: Option<Timestamp>,
    /// Last published watermark.
    published: Option<Timestamp>,
    /// When the last event has been observed, or when the generator was created.
    last_event: Instant,
    /// Whether the source has been announced idle since its last event.
    idle: bool,
}

/// What a silent source publishes.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Heartbeat {
    /// The watermark of the source moved forward with the wall clock.
    Watermark(Timestamp),
    /// The source has not produced any event yet.
    Idle,
}

impl WatermarkGenerator {
    pub fn new(lag: Timestamp, min_step: Timestamp, idle_timeout: std::time::Duration) -> Self {
        assert!(lag >= 0, "watermark lag must be >= 0");
        assert!(min_step >= 0, "watermark min step must be >= 0");
        Self {
            lag,
            min_step,
            idle_timeout: Duration::from_millis(idle_timeout.as_millis() as u64),
            max_seen: None,
            published: None,
            last_event: Instant::now(),
            idle: false,
        }
    }

    /// The last published watermark, if any.
    #[inline]
    pub fn current(&self) -> Option<Timestamp> {
        self.published
    }

    /// Observe the timestamp of a new event.
    ///
    /// Returns the new watermark if one should be published. Timestamps lower than the maximum
    /// never move the watermark backward.
    #[inline]
    pub fn advance(&mut self, ts: Timestamp) -> Option<Timestamp> {
        self.advance_at(ts, Instant::now())
    }

    pub(crate) fn advance_at(&mut self, ts: Timestamp, now: Instant) -> Option<Timestamp> {
        self.last_event = now;
        self.idle = false;
        let max = self.max_seen.map_or(ts, |m| m.max(ts));
        self.max_seen = Some(max);
        self.publish(max.saturating_sub(self.lag))
    }

    /// Check whether the source has been idle for too long.
    ///
    /// Returns what should be published, if anything. `Heartbeat::Idle` is returned at most once.
    #[inline]
    pub fn poll_idle(&mut self) -> Option<Heartbeat> {
        self.poll_idle_at(Instant::now())
    }

    pub(crate) fn poll_idle_at(&mut self, now: Instant) -> Option<Heartbeat> {
        if now < self.last_event {
            return None;
        }
        let silence = now.duration_since(self.last_event);
        if silence < self.idle_timeout {
            return None;
        }
        match self.max_seen {
            Some(max) => {
                let overdue = (silence - self.idle_timeout).as_millis() as Timestamp;
                self.publish(max.saturating_add(overdue))
                    .map(Heartbeat::Watermark)
            }
            None if !self.idle => {
                self.idle = true;
                Some(Heartbeat::Idle)
            }
            None => None,
        }
    }

    fn publish(&mut self, candidate: Timestamp) -> Option<Timestamp> {
        match self.published {
            Some(w) if candidate <= w || candidate.saturating_sub(w) < self.min_step => None,
            _ => {
                self.published = Some(candidate);
                Some(candidate)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn generator(lag: Timestamp, min_step: Timestamp, idle_ms: u64) -> WatermarkGenerator {
        WatermarkGenerator::new(lag, min_step, std::time::Duration::from_millis(idle_ms))
    }

    #[test]
    fn limiting_lag() {
        let mut gen = generator(100, 0, 30_000);
        assert_eq!(gen.advance(1000), Some(900));
        assert_eq!(gen.advance(1200), Some(1100));
        // out of order, no change
        assert_eq!(gen.advance(1050), None);
        assert_eq!(gen.current(), Some(1100));
    }

    #[test]
    fn min_step_debounces() {
        let mut gen = generator(0, 100, 30_000);
        assert_eq!(gen.advance(0), Some(0));
        assert_eq!(gen.advance(50), None);
        assert_eq!(gen.advance(99), None);
        assert_eq!(gen.advance(100), Some(100));
        assert_eq!(gen.advance(150), None);
        assert_eq!(gen.current(), Some(100));
    }

    #[test]
    fn never_regresses() {
        let mut gen = generator(10, 0, 30_000);
        let mut last = None;
        for ts in [50, 10, 70, 0, 69, 71, -5, 200] {
            if let Some(w) = gen.advance(ts) {
                assert!(last.map_or(true, |l| w > l));
                last = Some(w);
            }
        }
        assert_eq!(gen.current(), Some(190));
    }

    #[test]
    fn idle_heartbeat() {
        let mut gen = generator(100, 0, 1000);
        let t0 = Instant::now();
        assert_eq!(gen.advance_at(5000, t0), Some(4900));

        assert_eq!(gen.poll_idle_at(t0 + Duration::from_millis(500)), None);
        let Some(Heartbeat::Watermark(w)) = gen.poll_idle_at(t0 + Duration::from_millis(1000))
        else {
            panic!("expected a heartbeat watermark");
        };
        assert!(w >= 5000);
        let Some(Heartbeat::Watermark(later)) =
            gen.poll_idle_at(t0 + Duration::from_millis(3000))
        else {
            panic!("expected a heartbeat watermark");
        };
        assert!(later >= 6900, "heartbeat keeps advancing: {later}");

        // a new event resets the silence, but the watermark does not go back
        assert_eq!(gen.advance_at(5100, t0 + Duration::from_millis(3000)), None);
        assert_eq!(gen.current(), Some(later));
    }

    #[test]
    fn idle_without_events() {
        let mut gen = generator(100, 0, 1000);
        let t0 = gen.last_event;
        assert_eq!(gen.poll_idle_at(t0 + Duration::from_millis(500)), None);
        assert_eq!(
            gen.poll_idle_at(t0 + Duration::from_millis(1000)),
            Some(Heartbeat::Idle)
        );
        // announced only once
        assert_eq!(gen.poll_idle_at(t0 + Duration::from_millis(2000)), None);
        assert_eq!(gen.current(), None);

        // the first event makes it active again
        let t1 = t0 + Duration::from_millis(2500);
        assert_eq!(gen.advance_at(300, t1), Some(200));
        assert!(matches!(
            gen.poll_idle_at(t1 + Duration::from_millis(1500)),
            Some(Heartbeat::Watermark(w)) if w >= 300
        ));
    }
}
