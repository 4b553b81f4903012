//! Session windows.
//!
//! A session groups the events of a key that are separated by at most `gap` milliseconds of
//! inactivity. Sessions live in a [`KeyedSessionManager`] while open and are turned into
//! [`WindowResult`]s once the watermark guarantees that no further event can extend them.

use std::fmt::Display;

use serde::{Deserialize, Serialize};

use crate::operator::{DataKey, Timestamp};

pub mod aggr;
mod manager;
mod store;

use aggr::WindowAccumulator;
pub use manager::KeyedSessionManager;
pub use store::{Assignment, WindowHandle};

/// Description of a session window.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct SessionWindow {
    gap: Timestamp,
}

impl SessionWindow {
    /// A session window that closes after `gap_millis` milliseconds without events.
    pub fn new(gap_millis: Timestamp) -> Self {
        assert!(gap_millis > 0, "session gap must be > 0");
        Self { gap: gap_millis }
    }

    pub fn gap(&self) -> Timestamp {
        self.gap
    }

    /// Build the manager of the sessions, where each session is aggregated with a copy of
    /// `accumulator`.
    pub fn build<Key: DataKey, A: WindowAccumulator>(
        &self,
        accumulator: A,
    ) -> KeyedSessionManager<Key, A> {
        KeyedSessionManager::new(self.gap, accumulator)
    }
}

impl Display for SessionWindow {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "SessionWindow[gap={}]", self.gap)
    }
}

/// The aggregated value of a closed session.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct WindowResult<Key, Out> {
    pub key: Key,
    /// Timestamp of the first event of the session.
    pub start: Timestamp,
    /// Timestamp of the last event of the session.
    pub end: Timestamp,
    pub value: Out,
}

impl<Key, Out> WindowResult<Key, Out> {
    /// Length of the session, in milliseconds.
    pub fn duration(&self) -> Timestamp {
        self.end.saturating_sub(self.start)
    }
}
