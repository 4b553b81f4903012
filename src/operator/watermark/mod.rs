//! Event-time progress: per-source watermark generation and the per-partition frontier.

mod frontier;
mod generator;

pub use frontier::WatermarkFrontier;
pub use generator::{Heartbeat, WatermarkGenerator};
