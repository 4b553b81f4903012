//! Keyed session windows over out-of-order event streams.
//!
//! Events are grouped by key into sessions: maximal runs of activity where consecutive events are
//! at most a gap apart. Sessions are closed by event-time watermarks, so the result does not
//! depend on the order in which the events arrive, as long as they are not late.
//!
//! ```
//! use std::time::Duration;
//!
//! use sessionflow::prelude::*;
//!
//! let config = SessionConfig::new(1000, 0, 0, Duration::from_secs(60)).partitions(2);
//! let env = StreamEnvironment::new(config);
//! let mut job = env
//!     .session_windows(
//!         |(user, _): &(&'static str, i64)| user.to_string(),
//!         |(_, ts): &(&'static str, i64)| Some(*ts),
//!         Count::new(),
//!     )
//!     .unwrap();
//! let results = job.results();
//! let source = job.sources().pop().unwrap();
//! for event in [("alice", 0), ("alice", 500), ("bob", 700), ("alice", 5000)] {
//!     source.send(event).unwrap();
//! }
//! source.finish();
//! job.join().unwrap();
//!
//! let mut sessions: Vec<_> = results.iter().map(|r| (r.key, r.start, r.value)).collect();
//! sessions.sort();
//! assert_eq!(
//!     sessions,
//!     vec![
//!         ("alice".to_string(), 0, 2),
//!         ("alice".to_string(), 5000, 1),
//!         ("bob".to_string(), 700, 1),
//!     ]
//! );
//! ```

#[macro_use]
extern crate derivative;
#[macro_use]
extern crate log;

pub use config::{LateDataPolicy, SessionConfig};
pub use environment::{SessionJob, SourceHandle, StreamEnvironment};
pub use metrics::MetricsSnapshot;
pub use worker::partition_id;

pub mod block;
pub mod channel;
pub mod config;
mod environment;
pub mod metrics;
pub mod operator;
mod worker;

pub mod prelude {
    pub use super::operator::{
        AllOf, Count, CountWhere, Fold, Summing, Timestamp, ToSet, TryFold, WindowAccumulator,
        WindowResult,
    };
    pub use super::{LateDataPolicy, SessionConfig, StreamEnvironment};
}
