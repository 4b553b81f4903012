//! Counters collected while the pipeline runs.

use std::sync::atomic::{AtomicU64, Ordering};

use serde::{Deserialize, Serialize};

/// Counters shared by the sources and the partitions of a pipeline.
#[derive(Debug, Default)]
pub struct SessionMetrics {
    events: AtomicU64,
    late: AtomicU64,
    malformed: AtomicU64,
    windows_opened: AtomicU64,
    windows_merged: AtomicU64,
    windows_emitted: AtomicU64,
    evicted_keys: AtomicU64,
    discarded_windows: AtomicU64,
}

/// A point-in-time copy of [`SessionMetrics`].
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MetricsSnapshot {
    /// Events folded into a session.
    pub events: u64,
    /// Events that arrived after the watermark passed them.
    pub late: u64,
    /// Events rejected because they had no valid timestamp.
    pub malformed: u64,
    pub windows_opened: u64,
    pub windows_merged: u64,
    pub windows_emitted: u64,
    /// Keys whose sessions have been closed early by the capacity policy.
    pub evicted_keys: u64,
    /// Sessions dropped without being emitted because the pipeline was cancelled.
    pub discarded_windows: u64,
}

macro_rules! counter {
    ($name:ident) => {
        #[inline]
        pub(crate) fn $name(&self, n: u64) {
            self.$name.fetch_add(n, Ordering::Relaxed);
        }
    };
}

impl SessionMetrics {
    counter!(events);
    counter!(late);
    counter!(malformed);
    counter!(windows_opened);
    counter!(windows_merged);
    counter!(windows_emitted);
    counter!(evicted_keys);
    counter!(discarded_windows);

    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            events: self.events.load(Ordering::Relaxed),
            late: self.late.load(Ordering::Relaxed),
            malformed: self.malformed.load(Ordering::Relaxed),
            windows_opened: self.windows_opened.load(Ordering::Relaxed),
            windows_merged: self.windows_merged.load(Ordering::Relaxed),
            windows_emitted: self.windows_emitted.load(Ordering::Relaxed),
            evicted_keys: self.evicted_keys.load(Ordering::Relaxed),
            discarded_windows: self.discarded_windows.load(Ordering::Relaxed),
        }
    }
}

impl MetricsSnapshot {
    /// Serialize the counters as a JSON object.
    pub fn to_json(&self) -> String {
        serde_json::to_string(self).unwrap_or_default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn snapshot_json() {
        let metrics = SessionMetrics::default();
        metrics.events(3);
        metrics.late(1);
        let snapshot = metrics.snapshot();
        assert_eq!(snapshot.events, 3);
        assert_eq!(snapshot.late, 1);

        let parsed: MetricsSnapshot = serde_json::from_str(&snapshot.to_json()).unwrap();
        assert_eq!(parsed, snapshot);
    }
}
