#![allow(dead_code)] // not all tests use all the members

use std::sync::mpsc::RecvTimeoutError;
use std::time::Duration;

use log::*;

use sessionflow::operator::Timestamp;
use sessionflow::{LateDataPolicy, SessionConfig};

/// Helper functions for running the integration tests.
pub struct TestHelper;

impl TestHelper {
    pub fn setup() {
        let _ = env_logger::Builder::new()
            .filter(None, log::LevelFilter::Debug)
            .is_test(true)
            .try_init();
    }

    /// A configuration with no watermark debouncing and an idle timeout long enough to never
    /// trigger during a test.
    pub fn config(gap: Timestamp, lateness: Timestamp, partitions: usize) -> SessionConfig {
        SessionConfig::new(gap, lateness, 0, Duration::from_secs(3600))
            .partitions(partitions)
            .late_data(LateDataPolicy::SideOutput)
    }

    /// Run the test `body` in a separate thread, failing if it does not complete before the
    /// timeout.
    ///
    /// The timeout, in seconds, can be changed with `SESSIONFLOW_TEST_TIMEOUT`.
    pub fn run<F>(body: F)
    where
        F: FnOnce() + Send + 'static,
    {
        Self::setup();
        let timeout_sec = std::env::var("SESSIONFLOW_TEST_TIMEOUT")
            .ok()
            .and_then(|v| v.parse().ok())
            .unwrap_or(10);
        let timeout = Duration::from_secs(timeout_sec);
        let (sender, receiver) = std::sync::mpsc::channel();
        let worker = std::thread::Builder::new()
            .name("test-body".into())
            .spawn(move || {
                body();
                sender.send(()).unwrap();
            })
            .unwrap();
        match receiver.recv_timeout(timeout) {
            Ok(_) => {}
            Err(RecvTimeoutError::Timeout) => {
                panic!("Test body didn't complete before the timeout of {timeout:?}");
            }
            Err(RecvTimeoutError::Disconnected) => {
                panic!("Test body has panicked!");
            }
        }
        worker.join().expect("Test body has panicked!");
        debug!("test completed");
    }
}
