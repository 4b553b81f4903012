use std::cell::RefCell;
use std::thread::JoinHandle;

use crate::block::{PartitionId, SourceId};
use crate::channel::{Receiver, UnboundedSender};
use crate::operator::window::aggr::WindowAccumulator;
use crate::operator::{
    DataKey, KeyerFn, SessionError, SessionOperator, SessionOutput, StreamElement, Timestamp,
    WindowResult,
};

/// A message sent to a partition: the element and the source that produced it.
pub(crate) type PartitionMessage<T> = (SourceId, StreamElement<T>);

thread_local! {
    /// Partition the current worker thread is working on.
    ///
    /// Access to this by calling `partition_id()`.
    static PARTITION: RefCell<Option<PartitionId>> = const { RefCell::new(None) };
}

/// Get the partition the current thread is working on.
///
/// This will return `Some(id)` only when called from a worker thread, for example from inside an
/// aggregation function, otherwise `None` is returned.
pub fn partition_id() -> Option<PartitionId> {
    PARTITION.with(|x| *x.borrow())
}

/// Call a function if this struct goes out of scope without calling `defuse`, including during a
/// panic stack-unwinding.
struct CatchPanic<F: FnOnce()> {
    /// True if the function should be called.
    primed: bool,
    /// Function to call.
    ///
    /// The `Drop` implementation will move out the function.
    handler: Option<F>,
}

impl<F: FnOnce()> CatchPanic<F> {
    fn new(handler: F) -> Self {
        Self {
            primed: true,
            handler: Some(handler),
        }
    }

    /// Avoid calling the function on drop.
    fn defuse(&mut self) {
        self.primed = false;
    }
}

impl<F: FnOnce()> Drop for CatchPanic<F> {
    fn drop(&mut self) {
        if self.primed {
            if let Some(handler) = self.handler.take() {
                handler();
            }
        }
    }
}

/// Forwards the output of a partition to the channels of the pipeline.
pub(crate) struct ChannelOutput<Key: DataKey, Out: Send + 'static, T: Send + 'static> {
    pub(crate) results: UnboundedSender<WindowResult<Key, Out>>,
    pub(crate) late: UnboundedSender<(T, Timestamp)>,
}

impl<Key: DataKey, Out: Send + 'static, T: Send + 'static> SessionOutput<Key, Out, T>
    for ChannelOutput<Key, Out, T>
{
    fn emit(&mut self, result: WindowResult<Key, Out>) {
        // the caller may have stopped listening, the results are simply dropped
        let _ = self.results.send(result);
    }

    fn late(&mut self, item: T, ts: Timestamp) {
        let _ = self.late.send((item, ts));
    }
}

/// Spawn the thread of a partition.
///
/// The worker terminates when every source terminated, when the pipeline is cancelled or when an
/// aggregation fails. In the last case the error is also sent to `failures`.
pub(crate) fn spawn_partition<Key, T, A, Keyer>(
    mut operator: SessionOperator<Key, T, A, Keyer>,
    receiver: Receiver<PartitionMessage<T>>,
    mut output: ChannelOutput<Key, A::Out, T>,
    failures: UnboundedSender<SessionError>,
) -> std::io::Result<JoinHandle<Result<(), SessionError>>>
where
    Key: DataKey,
    T: Send + 'static,
    A: WindowAccumulator<In = T>,
    Keyer: KeyerFn<Key, T>,
{
    let partition = operator.partition();
    debug!("starting worker for partition {partition}: {operator}");

    std::thread::Builder::new()
        .name(format!("session-partition-{partition}"))
        .spawn(move || {
            // remember in the thread-local the partition of this worker
            PARTITION.with(|x| *x.borrow_mut() = Some(partition));
            let result = do_work(&mut operator, receiver, &mut output);
            if let Err(e) = &result {
                error!("partition {partition} failed: {e}");
                let _ = failures.send(SessionError::PartitionFailed {
                    partition,
                    reason: e.to_string(),
                });
            }
            result
        })
}

fn do_work<Key, T, A, Keyer>(
    operator: &mut SessionOperator<Key, T, A, Keyer>,
    receiver: Receiver<PartitionMessage<T>>,
    output: &mut ChannelOutput<Key, A::Out, T>,
) -> Result<(), SessionError>
where
    Key: DataKey,
    T: Send + 'static,
    A: WindowAccumulator<In = T>,
    Keyer: KeyerFn<Key, T>,
{
    let partition = operator.partition();
    let mut catch_panic = CatchPanic::new(|| {
        error!("worker of partition {partition} crashed!");
    });
    while let Ok((source, el)) = receiver.recv() {
        let cancelled = matches!(el, StreamElement::FlushAndRestart);
        match operator.process(source, el, output) {
            Ok(()) => {}
            Err(SessionError::MissingTimestamp) => {
                warn!("partition {partition}: dropping event without timestamp")
            }
            Err(e) => {
                catch_panic.defuse();
                return Err(e);
            }
        }
        if cancelled {
            info!("partition {partition} cancelled");
            break;
        }
        if operator.is_finished() {
            break;
        }
    }
    catch_panic.defuse();
    info!(
        "partition {partition} completed, watermark {:?}",
        operator.watermark()
    );
    Ok(())
}
