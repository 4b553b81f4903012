use std::fmt::Display;
use std::marker::PhantomData;
use std::sync::Arc;

use crate::block::{PartitionId, SourceId};
use crate::config::LateDataPolicy;
use crate::metrics::SessionMetrics;
use crate::operator::watermark::WatermarkFrontier;
use crate::operator::window::aggr::WindowAccumulator;
use crate::operator::window::{Assignment, KeyedSessionManager, WindowHandle, WindowResult};
use crate::operator::{DataKey, KeyerFn, SessionError, StreamElement, Timestamp};

/// Destination of what a [`SessionOperator`] produces.
pub trait SessionOutput<Key, Out, T> {
    /// A session has been closed.
    fn emit(&mut self, result: WindowResult<Key, Out>);
    /// An event arrived after the watermark passed it, and the late data policy keeps it.
    fn late(&mut self, item: T, ts: Timestamp);
}

/// Collects the output in memory.
#[derive(Derivative)]
#[derivative(Debug, Default(bound = ""))]
pub struct CollectOutput<Key, Out, T> {
    pub results: Vec<WindowResult<Key, Out>>,
    pub late: Vec<(T, Timestamp)>,
}

impl<Key, Out, T> SessionOutput<Key, Out, T> for CollectOutput<Key, Out, T> {
    fn emit(&mut self, result: WindowResult<Key, Out>) {
        self.results.push(result);
    }

    fn late(&mut self, item: T, ts: Timestamp) {
        self.late.push((item, ts));
    }
}

/// The session-window operator of a single partition.
///
/// It owns the sessions of all the keys routed to the partition: there is a single writer, so no
/// synchronization is needed. Watermarks from every source are merged by a
/// [`WatermarkFrontier`], and the minimum drives the closing of the sessions.
pub struct SessionOperator<Key, T, A, Keyer>
where
    A: WindowAccumulator<In = T>,
    Keyer: KeyerFn<Key, T>,
{
    partition: PartitionId,
    manager: KeyedSessionManager<Key, A>,
    keyer: Keyer,
    frontier: WatermarkFrontier,
    late_data: LateDataPolicy,
    metrics: Arc<SessionMetrics>,
    /// Reused buffer for the closed sessions.
    closed: Vec<WindowResult<Key, A::Out>>,
    _in: PhantomData<fn(T)>,
}

impl<Key, T, A, Keyer> SessionOperator<Key, T, A, Keyer>
where
    Key: DataKey,
    T: Send + 'static,
    A: WindowAccumulator<In = T>,
    Keyer: KeyerFn<Key, T>,
{
    pub fn new(
        partition: PartitionId,
        manager: KeyedSessionManager<Key, A>,
        keyer: Keyer,
        sources: impl IntoIterator<Item = SourceId>,
        late_data: LateDataPolicy,
        metrics: Arc<SessionMetrics>,
    ) -> Self {
        Self {
            partition,
            manager,
            keyer,
            frontier: WatermarkFrontier::new(sources),
            late_data,
            metrics,
            closed: Vec::new(),
            _in: PhantomData,
        }
    }

    pub fn partition(&self) -> PartitionId {
        self.partition
    }

    pub fn manager(&self) -> &KeyedSessionManager<Key, A> {
        &self.manager
    }

    /// The watermark currently driving the closing of the sessions.
    pub fn watermark(&self) -> Option<Timestamp> {
        self.frontier.get()
    }

    /// Whether every source has terminated.
    pub fn is_finished(&self) -> bool {
        self.frontier.all_finished()
    }

    /// Process an element coming from `source`.
    ///
    /// Only an aggregation failure is an error that should stop the partition; `Item`s without a
    /// timestamp are rejected with `MissingTimestamp` and can be skipped.
    pub fn process(
        &mut self,
        source: SourceId,
        el: StreamElement<T>,
        out: &mut impl SessionOutput<Key, A::Out, T>,
    ) -> Result<(), SessionError> {
        match el {
            StreamElement::Timestamped(item, ts) => {
                self.assign(item, ts, out)?;
            }
            StreamElement::Item(_) => {
                self.metrics.malformed(1);
                return Err(SessionError::MissingTimestamp);
            }
            StreamElement::Watermark(ts) => {
                if let Some(w) = self.frontier.update(source, ts) {
                    self.manager.advance(w, &mut self.closed);
                    self.flush_closed(out);
                }
            }
            StreamElement::Idle => {
                debug!("partition {}: source {source} is idle", self.partition);
                if let Some(w) = self.frontier.idle(source) {
                    self.manager.advance(w, &mut self.closed);
                    self.flush_closed(out);
                }
            }
            StreamElement::Terminate => {
                self.frontier.finish(source);
                if self.frontier.all_finished() {
                    debug!(
                        "partition {}: all sources terminated, closing {} sessions",
                        self.partition,
                        self.manager.open_windows()
                    );
                    self.manager.flush(&mut self.closed);
                    self.flush_closed(out);
                }
            }
            StreamElement::FlushAndRestart => {
                let discarded = self.manager.clear();
                self.metrics.discarded_windows(discarded as u64);
                self.frontier.reset();
                debug!(
                    "partition {}: discarded {discarded} open sessions",
                    self.partition
                );
            }
        }
        Ok(())
    }

    /// Assign an event to its session, unless it is late.
    ///
    /// Returns the session the event has been folded into, `None` if it was late.
    pub fn assign(
        &mut self,
        item: T,
        ts: Timestamp,
        out: &mut impl SessionOutput<Key, A::Out, T>,
    ) -> Result<Option<WindowHandle>, SessionError> {
        let key = (self.keyer)(&item);
        if self.manager.is_late_for(&key, ts) {
            self.metrics.late(1);
            match self.late_data {
                LateDataPolicy::Drop => {
                    trace!("partition {}: dropping late event at {ts}", self.partition)
                }
                LateDataPolicy::SideOutput => out.late(item, ts),
            }
            return Ok(None);
        }

        let evicted = self.manager.evicted_keys();
        let handle = self
            .manager
            .add(key, &item, ts, &mut self.closed)
            .map_err(|source| SessionError::Aggregation {
                partition: self.partition,
                source,
            })?;

        self.metrics.events(1);
        match handle.assignment {
            Assignment::Created => self.metrics.windows_opened(1),
            Assignment::Merged => self.metrics.windows_merged(1),
            Assignment::Extended => {}
        }
        self.metrics.evicted_keys(self.manager.evicted_keys() - evicted);
        self.flush_closed(out);
        Ok(Some(handle))
    }

    fn flush_closed(&mut self, out: &mut impl SessionOutput<Key, A::Out, T>) {
        self.metrics.windows_emitted(self.closed.len() as u64);
        for result in self.closed.drain(..) {
            out.emit(result);
        }
    }
}

impl<Key, T, A, Keyer> Display for SessionOperator<Key, T, A, Keyer>
where
    Key: DataKey,
    A: WindowAccumulator<In = T>,
    Keyer: KeyerFn<Key, T>,
{
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "SessionOperator[{}] -> {}", self.partition, self.manager)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::operator::window::aggr::Count;
    use crate::operator::window::SessionWindow;

    type Event = (&'static str, Timestamp);

    fn operator(
        sources: usize,
        late_data: LateDataPolicy,
    ) -> SessionOperator<&'static str, Event, Count<Event>, impl KeyerFn<&'static str, Event>> {
        SessionOperator::new(
            0,
            SessionWindow::new(10).build(Count::new()),
            |e: &Event| e.0,
            0..sources,
            late_data,
            Default::default(),
        )
    }

    fn ev(key: &'static str, ts: Timestamp) -> StreamElement<Event> {
        StreamElement::Timestamped((key, ts), ts)
    }

    #[test]
    fn watermark_closes_sessions() {
        let mut op = operator(1, LateDataPolicy::Drop);
        let mut out = CollectOutput::default();
        op.process(0, ev("a", 0), &mut out).unwrap();
        op.process(0, ev("a", 5), &mut out).unwrap();
        op.process(0, ev("b", 7), &mut out).unwrap();
        op.process(0, StreamElement::Watermark(16), &mut out).unwrap();

        let closed: Vec<_> = out.results.iter().map(|r| (r.key, r.start, r.end, r.value)).collect();
        assert_eq!(closed, vec![("a", 0, 5, 2)]);

        op.process(0, StreamElement::Terminate, &mut out).unwrap();
        assert!(op.is_finished());
        assert_eq!(out.results.len(), 2);
        assert_eq!(op.metrics.snapshot().windows_emitted, 2);
    }

    #[test]
    fn late_events() {
        let mut op = operator(1, LateDataPolicy::SideOutput);
        let mut out = CollectOutput::default();
        op.process(0, ev("a", 100), &mut out).unwrap();
        op.process(0, StreamElement::Watermark(50), &mut out).unwrap();
        op.process(0, ev("a", 49), &mut out).unwrap();
        op.process(0, ev("a", 50), &mut out).unwrap();

        assert_eq!(out.late, vec![(("a", 49), 49)]);
        let metrics = op.metrics.snapshot();
        assert_eq!(metrics.late, 1);
        assert_eq!(metrics.events, 2);

        let mut op = operator(1, LateDataPolicy::Drop);
        let mut out = CollectOutput::default();
        op.process(0, StreamElement::Watermark(50), &mut out).unwrap();
        op.process(0, ev("a", 10), &mut out).unwrap();
        assert!(out.late.is_empty());
        assert_eq!(op.manager().open_windows(), 0);
    }

    #[test]
    fn missing_timestamp() {
        let mut op = operator(1, LateDataPolicy::Drop);
        let mut out = CollectOutput::default();
        let err = op
            .process(0, StreamElement::Item(("a", 0)), &mut out)
            .unwrap_err();
        assert!(matches!(err, SessionError::MissingTimestamp));
        assert_eq!(op.metrics.snapshot().malformed, 1);
    }

    #[test]
    fn minimum_watermark_of_sources() {
        let mut op = operator(2, LateDataPolicy::Drop);
        let mut out = CollectOutput::default();
        op.process(0, ev("a", 0), &mut out).unwrap();
        op.process(0, StreamElement::Watermark(100), &mut out).unwrap();
        // source 1 is still behind
        assert!(out.results.is_empty());
        assert_eq!(op.watermark(), None);

        op.process(1, ev("a", 8), &mut out).unwrap();
        op.process(1, StreamElement::Watermark(15), &mut out).unwrap();
        assert!(out.results.is_empty());
        op.process(1, StreamElement::Watermark(19), &mut out).unwrap();
        assert_eq!(out.results.len(), 1);
        assert_eq!((out.results[0].start, out.results[0].end), (0, 8));
    }

    #[test]
    fn idle_source_does_not_hold_the_watermark() {
        let mut op = operator(2, LateDataPolicy::Drop);
        let mut out = CollectOutput::default();
        op.process(0, ev("a", 0), &mut out).unwrap();
        op.process(0, StreamElement::Watermark(20), &mut out).unwrap();
        assert!(out.results.is_empty());

        op.process(1, StreamElement::Idle, &mut out).unwrap();
        assert_eq!(op.watermark(), Some(20));
        assert_eq!(out.results.len(), 1);
        assert_eq!((out.results[0].key, out.results[0].start), ("a", 0));
    }

    #[test]
    fn cancel_discards() {
        let mut op = operator(1, LateDataPolicy::Drop);
        let mut out = CollectOutput::default();
        op.process(0, ev("a", 0), &mut out).unwrap();
        op.process(0, StreamElement::FlushAndRestart, &mut out).unwrap();
        op.process(0, StreamElement::Terminate, &mut out).unwrap();
        assert!(out.results.is_empty());
        assert_eq!(op.metrics.snapshot().discarded_windows, 1);
    }
}
