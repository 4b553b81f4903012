//! Operators of the session-window pipeline.
//!
//! Every operator consumes and produces [`StreamElement`]s: data items, optionally tagged with an
//! event-time timestamp, interleaved with watermarks and control messages.

use std::fmt::Debug;
use std::hash::Hash;

use serde::{Deserialize, Serialize};
use thiserror::Error;

pub use session::{CollectOutput, SessionOperator, SessionOutput};
pub use watermark::{Heartbeat, WatermarkFrontier, WatermarkGenerator};
pub use window::aggr::{
    AggregateError, AllOf, Count, CountWhere, Fold, Summing, ToSet, TryFold, WindowAccumulator,
};
pub use window::{Assignment, KeyedSessionManager, SessionWindow, WindowHandle, WindowResult};

pub(crate) mod session;
pub(crate) mod watermark;
pub(crate) mod window;

/// Event time, in milliseconds.
pub type Timestamp = i64;

/// Marker trait that all the types inside a stream should implement.
pub trait Data: Clone + Send + 'static {}
impl<T: Clone + Send + 'static> Data for T {}

/// Marker trait for the keys of the stream.
///
/// Keys are ordered so that the output of a partition can be produced deterministically.
pub trait DataKey: Data + Hash + Eq + Ord + Debug {}
impl<T: Data + Hash + Eq + Ord + Debug> DataKey for T {}

/// Marker trait for the functions that extract a value from an item.
pub trait KeyerFn<Key, Out>: Fn(&Out) -> Key + Clone + Send + Sync + 'static {}
impl<Key, Out, T: Fn(&Out) -> Key + Clone + Send + Sync + 'static> KeyerFn<Key, Out> for T {}

/// Element of a stream.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum StreamElement<Out> {
    /// A normal element containing just the value of the message.
    Item(Out),
    /// Like `Item`, but it's attached with a timestamp, it's used to ensure the ordering of the
    /// messages.
    Timestamped(Out, Timestamp),
    /// When an operator receives a `Watermark` with timestamp `t`, the operator will never see any
    /// message with timestamp less than `t`.
    Watermark(Timestamp),
    /// The sender has not produced anything for a while: do not wait for its watermark until it
    /// sends one.
    Idle,
    /// The stream has been interrupted: the open state is discarded without being emitted.
    FlushAndRestart,
    /// Mark the end of the stream: after this no other message will be received.
    Terminate,
}

impl<Out> StreamElement<Out> {
    /// Create a new `StreamElement` with an `Item(())` if `self` contains an item, otherwise it
    /// returns the same variant of `self`.
    pub fn variant(&self) -> StreamElement<()> {
        match self {
            StreamElement::Item(_) => StreamElement::Item(()),
            StreamElement::Timestamped(_, ts) => StreamElement::Timestamped((), *ts),
            StreamElement::Watermark(w) => StreamElement::Watermark(*w),
            StreamElement::Idle => StreamElement::Idle,
            StreamElement::FlushAndRestart => StreamElement::FlushAndRestart,
            StreamElement::Terminate => StreamElement::Terminate,
        }
    }

    /// Change the type of the element inside the `StreamElement`.
    pub fn map<NewOut>(self, f: impl FnOnce(Out) -> NewOut) -> StreamElement<NewOut> {
        match self {
            StreamElement::Item(item) => StreamElement::Item(f(item)),
            StreamElement::Timestamped(item, ts) => StreamElement::Timestamped(f(item), ts),
            StreamElement::Watermark(w) => StreamElement::Watermark(w),
            StreamElement::Idle => StreamElement::Idle,
            StreamElement::FlushAndRestart => StreamElement::FlushAndRestart,
            StreamElement::Terminate => StreamElement::Terminate,
        }
    }

    /// The timestamp of the element, if any.
    pub fn timestamp(&self) -> Option<&Timestamp> {
        match self {
            StreamElement::Timestamped(_, ts) | StreamElement::Watermark(ts) => Some(ts),
            _ => None,
        }
    }
}

/// Failures of the session operator.
#[derive(Debug, Error)]
pub enum SessionError {
    /// The timestamp extractor produced no timestamp for an event. The event is dropped.
    #[error("event has no valid timestamp")]
    MissingTimestamp,
    /// A user supplied aggregation failed: the state of the partition is no longer valid.
    #[error("aggregation failed in partition {partition}: {source}")]
    Aggregation {
        partition: usize,
        #[source]
        source: AggregateError,
    },
    /// The partition the event was routed to is no longer running.
    #[error("partition {0} disconnected")]
    Disconnected(usize),
    /// The worker of a partition stopped because of an error.
    #[error("partition {partition} failed: {reason}")]
    PartitionFailed { partition: usize, reason: String },
    /// The worker of a partition crashed.
    #[error("partition {0} panicked")]
    PartitionPanicked(usize),
    /// The worker threads could not be started.
    #[error("cannot spawn worker: {0}")]
    Spawn(#[from] std::io::Error),
    #[error(transparent)]
    Config(#[from] crate::config::ConfigError),
}
