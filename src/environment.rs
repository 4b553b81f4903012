//! Construction and execution of a session-window pipeline.
//!
//! A pipeline is made of:
//! - the [`SourceHandle`]s, each with its own [`WatermarkGenerator`], that stamp the events and
//!   route them by key;
//! - one worker thread per partition, running a [`SessionOperator`] over the keys it owns;
//! - an idle ticker that publishes the heartbeat watermark of the sources that went quiet.
//!
//! The closed sessions, the late events and the failures of the partitions are delivered on
//! unbounded channels owned by the [`SessionJob`].

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;

use parking_lot::Mutex;

use crate::block::{NextStrategy, SourceId};
use crate::channel::{bounded, unbounded, Sender, UnboundedReceiver};
use crate::config::SessionConfig;
use crate::metrics::{MetricsSnapshot, SessionMetrics};
use crate::operator::window::aggr::WindowAccumulator;
use crate::operator::{
    Data, DataKey, Heartbeat, KeyerFn, SessionError, SessionOperator, SessionWindow,
    StreamElement, Timestamp, WatermarkGenerator, WindowResult,
};
use crate::worker::{spawn_partition, ChannelOutput, PartitionMessage};

const TICK_MIN: Duration = Duration::from_millis(10);
const TICK_MAX: Duration = Duration::from_secs(1);

/// Entry point for building session-window pipelines.
pub struct StreamEnvironment {
    config: SessionConfig,
}

impl StreamEnvironment {
    pub fn new(config: SessionConfig) -> Self {
        info!("constructing environment");
        StreamEnvironment { config }
    }

    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    /// Start a pipeline that groups the events by `keyer` into sessions, folding each session with
    /// a copy of `accumulator`.
    ///
    /// `timestamp` extracts the event time of an event; events for which it returns `None` are
    /// rejected by [`SourceHandle::send`].
    ///
    /// The worker threads are started immediately: the events are fed through the handles
    /// returned by [`SessionJob::sources`].
    pub fn session_windows<Key, T, A, Keyer, TsFn>(
        &self,
        keyer: Keyer,
        timestamp: TsFn,
        accumulator: A,
    ) -> Result<SessionJob<Key, T, A::Out, impl KeyerFn<u64, T>, TsFn>, SessionError>
    where
        Key: DataKey,
        T: Data,
        A: WindowAccumulator<In = T>,
        Keyer: KeyerFn<Key, T>,
        TsFn: KeyerFn<Option<Timestamp>, T>,
    {
        let config = &self.config;
        config.validate()?;
        let window = SessionWindow::new(config.session_gap);
        info!(
            "starting {window}: {} partitions, {} sources, late data {:?}",
            config.partitions, config.sources, config.late_data
        );

        let metrics = Arc::new(SessionMetrics::default());
        let (results_tx, results) = unbounded();
        let (late_tx, late) = unbounded();
        let (failures_tx, failures) = unbounded();

        let mut senders = Vec::with_capacity(config.partitions);
        let mut workers = Vec::with_capacity(config.partitions);
        for partition in 0..config.partitions {
            let (sender, receiver) = bounded(config.channel_capacity);
            let manager = window
                .build(accumulator.clone())
                .with_max_active_keys(config.max_active_keys);
            let operator = SessionOperator::new(
                partition,
                manager,
                keyer.clone(),
                0..config.sources,
                config.late_data,
                metrics.clone(),
            );
            let output = ChannelOutput {
                results: results_tx.clone(),
                late: late_tx.clone(),
            };
            workers.push(spawn_partition(
                operator,
                receiver,
                output,
                failures_tx.clone(),
            )?);
            senders.push(sender);
        }

        let strategy = NextStrategy::<T>::group_by(keyer).for_partitions(config.partitions);
        let sources: Vec<_> = (0..config.sources)
            .map(|id| SourceHandle {
                id,
                strategy: strategy.clone(),
                timestamp: timestamp.clone(),
                generator: Arc::new(Mutex::new(WatermarkGenerator::new(
                    config.allowed_lateness,
                    config.watermark_min_step,
                    config.idle_timeout(),
                ))),
                senders: senders.clone(),
                metrics: metrics.clone(),
                finished: Arc::new(AtomicBool::new(false)),
            })
            .collect();

        let shutdown = Arc::new(AtomicBool::new(false));
        let idle = sources
            .iter()
            .map(|s| IdleSource {
                id: s.id,
                generator: s.generator.clone(),
                finished: s.finished.clone(),
            })
            .collect();
        let ticker = spawn_ticker(
            idle,
            senders.clone(),
            config.idle_timeout(),
            shutdown.clone(),
        )?;

        Ok(SessionJob {
            sources,
            senders,
            workers,
            ticker: Some(ticker),
            shutdown,
            results,
            late,
            failures,
            metrics,
        })
    }
}

/// The input side of a pipeline: one per source.
///
/// Every event is stamped with its timestamp, routed to the partition owning its key and observed
/// by the watermark generator of the source. When a new watermark is generated it is broadcast to
/// every partition.
///
/// Dropping the handle terminates the source, like [`finish`](Self::finish).
pub struct SourceHandle<T: Data, IndexFn: KeyerFn<u64, T>, TsFn> {
    id: SourceId,
    strategy: NextStrategy<T, IndexFn>,
    timestamp: TsFn,
    /// Shared with the idle ticker.
    generator: Arc<Mutex<WatermarkGenerator>>,
    senders: Vec<Sender<PartitionMessage<T>>>,
    metrics: Arc<SessionMetrics>,
    finished: Arc<AtomicBool>,
}

impl<T, IndexFn, TsFn> SourceHandle<T, IndexFn, TsFn>
where
    T: Data,
    IndexFn: KeyerFn<u64, T>,
    TsFn: KeyerFn<Option<Timestamp>, T>,
{
    pub fn id(&self) -> SourceId {
        self.id
    }

    /// The last watermark published by this source.
    pub fn watermark(&self) -> Option<Timestamp> {
        self.generator.lock().current()
    }

    /// Feed an event to the pipeline, blocking if its partition is full.
    ///
    /// Fails with `MissingTimestamp` if no timestamp can be extracted from the event, and with
    /// `Disconnected` if the partition owning its key has stopped. The other partitions are not
    /// affected by a stopped one.
    pub fn send(&self, item: T) -> Result<(), SessionError> {
        let Some(ts) = (self.timestamp)(&item) else {
            self.metrics.malformed(1);
            return Err(SessionError::MissingTimestamp);
        };
        let partition = self.strategy.index(&item, self.senders.len());

        // the event must reach its partition before the watermark it generates
        let mut generator = self.generator.lock();
        self.senders[partition]
            .send((self.id, StreamElement::Timestamped(item, ts)))
            .map_err(|_| SessionError::Disconnected(partition))?;
        if let Some(w) = generator.advance(ts) {
            trace!("source {} watermark {w}", self.id);
            broadcast(self.id, &self.senders, StreamElement::Watermark(w));
        }
        Ok(())
    }
}

impl<T: Data, IndexFn: KeyerFn<u64, T>, TsFn> SourceHandle<T, IndexFn, TsFn> {
    /// Signal that this source will not produce any more events.
    ///
    /// When every source has finished, the partitions close all the open sessions and stop.
    pub fn finish(mut self) {
        self.terminate()
    }

    fn terminate(&mut self) {
        let _generator = self.generator.lock();
        if self.finished.swap(true, Ordering::AcqRel) {
            return;
        }
        debug!("source {} terminated", self.id);
        broadcast(self.id, &self.senders, StreamElement::Terminate)
    }
}

impl<T: Data, IndexFn: KeyerFn<u64, T>, TsFn> Drop for SourceHandle<T, IndexFn, TsFn> {
    fn drop(&mut self) {
        self.terminate()
    }
}

/// Send a copy of `el` to every partition that is still running.
///
/// A stopped partition has already reported its failure, so it is skipped.
fn broadcast<T: Data>(
    source: SourceId,
    senders: &[Sender<PartitionMessage<T>>],
    el: StreamElement<T>,
) {
    for (partition, sender) in senders.iter().enumerate() {
        if sender.send((source, el.clone())).is_err() {
            trace!(
                "partition {partition} stopped, {:?} from source {source} not delivered",
                el.variant()
            );
        }
    }
}

struct IdleSource {
    id: SourceId,
    generator: Arc<Mutex<WatermarkGenerator>>,
    finished: Arc<AtomicBool>,
}

/// Periodically publish the heartbeat of the idle sources.
///
/// The thread stops when every source has finished or when `shutdown` is set.
fn spawn_ticker<T: Data>(
    sources: Vec<IdleSource>,
    senders: Vec<Sender<PartitionMessage<T>>>,
    idle_timeout: Duration,
    shutdown: Arc<AtomicBool>,
) -> std::io::Result<JoinHandle<()>> {
    let interval = (idle_timeout / 4).clamp(TICK_MIN, TICK_MAX);
    std::thread::Builder::new()
        .name("session-idle-ticker".into())
        .spawn(move || {
            while !shutdown.load(Ordering::Acquire) {
                let mut running = 0;
                for source in &sources {
                    let mut generator = source.generator.lock();
                    if source.finished.load(Ordering::Acquire) {
                        continue;
                    }
                    running += 1;
                    match generator.poll_idle() {
                        Some(Heartbeat::Watermark(w)) => {
                            debug!("source {} is idle, heartbeat watermark {w}", source.id);
                            broadcast(source.id, &senders, StreamElement::Watermark(w));
                        }
                        Some(Heartbeat::Idle) => {
                            debug!("source {} has not produced any event yet", source.id);
                            broadcast(source.id, &senders, StreamElement::Idle);
                        }
                        None => {}
                    }
                }
                if running == 0 {
                    break;
                }
                std::thread::sleep(interval);
            }
            debug!("idle ticker stopped");
        })
}

/// A running session-window pipeline.
pub struct SessionJob<Key: DataKey, T: Data, Out: Data, IndexFn: KeyerFn<u64, T>, TsFn> {
    sources: Vec<SourceHandle<T, IndexFn, TsFn>>,
    /// Used for cancelling the partitions.
    senders: Vec<Sender<PartitionMessage<T>>>,
    workers: Vec<JoinHandle<Result<(), SessionError>>>,
    ticker: Option<JoinHandle<()>>,
    shutdown: Arc<AtomicBool>,
    results: UnboundedReceiver<WindowResult<Key, Out>>,
    late: UnboundedReceiver<(T, Timestamp)>,
    failures: UnboundedReceiver<SessionError>,
    metrics: Arc<SessionMetrics>,
}

impl<Key, T, Out, IndexFn, TsFn> SessionJob<Key, T, Out, IndexFn, TsFn>
where
    Key: DataKey,
    T: Data,
    Out: Data,
    IndexFn: KeyerFn<u64, T>,
    TsFn: KeyerFn<Option<Timestamp>, T>,
{
    /// Take the handles of the sources, one per configured source.
    ///
    /// The handles can be moved to other threads. Calling this again returns an empty vector.
    pub fn sources(&mut self) -> Vec<SourceHandle<T, IndexFn, TsFn>> {
        std::mem::take(&mut self.sources)
    }

    /// The sessions closed by the partitions.
    ///
    /// Within a partition, the sessions closed by the same watermark are ordered by start and key.
    /// The channel is closed when every partition has stopped.
    pub fn results(&self) -> UnboundedReceiver<WindowResult<Key, Out>> {
        self.results.clone()
    }

    /// The late events with their timestamp, when the late data policy forwards them.
    pub fn late(&self) -> UnboundedReceiver<(T, Timestamp)> {
        self.late.clone()
    }

    /// The partitions that stopped because of an error.
    pub fn failures(&self) -> UnboundedReceiver<SessionError> {
        self.failures.clone()
    }

    pub fn metrics(&self) -> MetricsSnapshot {
        self.metrics.snapshot()
    }

    /// Stop the pipeline: the open sessions are discarded without being emitted.
    pub fn cancel(&self) {
        info!("cancelling the pipeline");
        // the source of a control message is not relevant
        broadcast(0, &self.senders, StreamElement::FlushAndRestart);
    }

    /// Wait for all the partitions to stop.
    ///
    /// The sources not taken with [`sources`](Self::sources) are finished first; the ones taken
    /// must be finished (or dropped) by the caller, otherwise this never returns.
    ///
    /// Returns the first error of a partition, if any, otherwise the final metrics.
    pub fn join(mut self) -> Result<MetricsSnapshot, SessionError> {
        self.sources.clear();
        self.senders.clear();

        let mut result = Ok(());
        for (partition, worker) in self.workers.drain(..).enumerate() {
            let outcome = match worker.join() {
                Ok(outcome) => outcome,
                Err(_) => Err(SessionError::PartitionPanicked(partition)),
            };
            if let Err(e) = outcome {
                if result.is_ok() {
                    result = Err(e);
                }
            }
        }

        self.shutdown.store(true, Ordering::Release);
        if let Some(ticker) = self.ticker.take() {
            let _ = ticker.join();
        }

        result?;
        let metrics = self.metrics.snapshot();
        info!("pipeline completed: {}", metrics.to_json());
        Ok(metrics)
    }
}

impl<Key: DataKey, T: Data, Out: Data, IndexFn: KeyerFn<u64, T>, TsFn> Drop
    for SessionJob<Key, T, Out, IndexFn, TsFn>
{
    fn drop(&mut self) {
        self.shutdown.store(true, Ordering::Release);
    }
}
