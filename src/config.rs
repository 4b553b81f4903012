//! Configuration of a session-window pipeline.
//!
//! The configuration can be built in code, parsed from a TOML document or, with the `clap`
//! feature, read from the command line:
//!
//! ```toml
//! session-gap = 5000
//! allowed-lateness = 100
//! watermark-min-step = 100
//! idle-timeout = 30000
//! late-data = "side-output"
//! partitions = 4
//! ```
//!
//! All durations are in milliseconds. The timing parameters have no default: together they decide
//! both how much disorder is tolerated and how long a session stays open after its last event.

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::operator::Timestamp;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("serialization error: {0}")]
    Serialization(#[from] toml::de::Error),

    #[error("input-output error: {0}")]
    IO(#[from] std::io::Error),

    #[error("invalid configuration: {0}")]
    Invalid(String),
}

/// What to do with the events that arrive after the watermark passed them.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
#[cfg_attr(feature = "clap", derive(clap::ValueEnum))]
pub enum LateDataPolicy {
    /// Count and discard them.
    #[default]
    Drop,
    /// Count them and forward them to the late data channel.
    SideOutput,
}

/// The configuration of a session-window pipeline.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case", deny_unknown_fields)]
pub struct SessionConfig {
    /// Maximum inactivity inside a session.
    pub session_gap: Timestamp,
    /// How far behind the highest timestamp the watermark trails.
    pub allowed_lateness: Timestamp,
    /// Minimum advance of the watermark before a new one is published.
    pub watermark_min_step: Timestamp,
    /// Silence after which a source advances its watermark without events.
    pub idle_timeout: u64,
    #[serde(default)]
    pub late_data: LateDataPolicy,
    /// Maximum number of keys with open sessions per partition, unbounded if missing.
    #[serde(default)]
    pub max_active_keys: Option<usize>,
    /// Number of partitions processing the keys in parallel.
    #[serde(default = "default_partitions")]
    pub partitions: usize,
    /// Number of sources feeding the pipeline.
    #[serde(default = "default_sources")]
    pub sources: usize,
    /// Capacity of the channel of each partition.
    #[serde(default = "default_channel_capacity")]
    pub channel_capacity: usize,
}

fn default_partitions() -> usize {
    std::thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(4)
}

fn default_sources() -> usize {
    1
}

fn default_channel_capacity() -> usize {
    1024
}

impl SessionConfig {
    /// Build a configuration with the required parameters, the others take their default.
    pub fn new(
        session_gap: Timestamp,
        allowed_lateness: Timestamp,
        watermark_min_step: Timestamp,
        idle_timeout: Duration,
    ) -> Self {
        Self {
            session_gap,
            allowed_lateness,
            watermark_min_step,
            idle_timeout: idle_timeout.as_millis() as u64,
            late_data: Default::default(),
            max_active_keys: None,
            partitions: default_partitions(),
            sources: default_sources(),
            channel_capacity: default_channel_capacity(),
        }
    }

    pub fn partitions(mut self, partitions: usize) -> Self {
        self.partitions = partitions;
        self
    }

    pub fn sources(mut self, sources: usize) -> Self {
        self.sources = sources;
        self
    }

    pub fn late_data(mut self, late_data: LateDataPolicy) -> Self {
        self.late_data = late_data;
        self
    }

    pub fn max_active_keys(mut self, max_active_keys: Option<usize>) -> Self {
        self.max_active_keys = max_active_keys;
        self
    }

    pub fn idle_timeout(&self) -> Duration {
        Duration::from_millis(self.idle_timeout)
    }

    /// Parse and validate a TOML document.
    pub fn from_toml(s: &str) -> Result<Self, ConfigError> {
        let config: SessionConfig = toml::from_str(s)?;
        config.validate()?;
        Ok(config)
    }

    /// Read, parse and validate a TOML file.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        debug!("reading config from {}", path.display());
        let content = std::fs::read_to_string(path)?;
        Self::from_toml(&content)
    }

    /// Check that the parameters make sense together.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.session_gap <= 0 {
            return Err(ConfigError::Invalid("session-gap must be > 0".into()));
        }
        if self.allowed_lateness < 0 {
            return Err(ConfigError::Invalid("allowed-lateness must be >= 0".into()));
        }
        if self.watermark_min_step < 0 {
            return Err(ConfigError::Invalid("watermark-min-step must be >= 0".into()));
        }
        if self.partitions == 0 {
            return Err(ConfigError::Invalid("partitions must be > 0".into()));
        }
        if self.sources == 0 {
            return Err(ConfigError::Invalid("sources must be > 0".into()));
        }
        if self.channel_capacity == 0 {
            return Err(ConfigError::Invalid("channel-capacity must be > 0".into()));
        }
        if self.max_active_keys == Some(0) {
            return Err(ConfigError::Invalid("max-active-keys must be > 0".into()));
        }
        if self.watermark_min_step > self.session_gap {
            warn!(
                "watermark-min-step ({}) is larger than session-gap ({}): sessions will be closed late",
                self.watermark_min_step, self.session_gap
            );
        }
        Ok(())
    }
}

#[cfg(feature = "clap")]
pub use cli::CommandLineOptions;

#[cfg(feature = "clap")]
mod cli {
    use clap::Parser;

    use super::*;

    #[derive(Debug, Clone, Parser)]
    #[clap(
        name = "sessionflow",
        about = "Session-window aggregation over a simulated online shop"
    )]
    pub struct CommandLineOptions {
        /// Path to a TOML configuration file, the other options override its values.
        #[clap(short, long)]
        pub config: Option<std::path::PathBuf>,

        /// Maximum inactivity inside a session, in milliseconds.
        #[clap(long)]
        pub session_gap: Option<i64>,

        /// How far behind the highest timestamp the watermark trails, in milliseconds.
        #[clap(long)]
        pub allowed_lateness: Option<i64>,

        /// Minimum advance of the watermark before a new one is published, in milliseconds.
        #[clap(long)]
        pub watermark_min_step: Option<i64>,

        /// Silence after which a source advances its watermark, in milliseconds.
        #[clap(long)]
        pub idle_timeout: Option<u64>,

        #[clap(long, value_enum)]
        pub late_data: Option<LateDataPolicy>,

        #[clap(long)]
        pub max_active_keys: Option<usize>,

        #[clap(short, long)]
        pub partitions: Option<usize>,

        #[clap(short, long)]
        pub sources: Option<usize>,

        /// The other arguments.
        pub args: Vec<String>,
    }

    impl SessionConfig {
        /// Build the configuration from the command line arguments.
        ///
        /// Returns the configuration and the positional arguments that were not consumed.
        pub fn from_args() -> Result<(SessionConfig, Vec<String>), ConfigError> {
            CommandLineOptions::parse().into_config()
        }
    }

    impl CommandLineOptions {
        pub fn into_config(self) -> Result<(SessionConfig, Vec<String>), ConfigError> {
            let mut config = match &self.config {
                Some(path) => SessionConfig::from_file(path)?,
                None => SessionConfig::new(
                    required(self.session_gap, "session-gap")?,
                    required(self.allowed_lateness, "allowed-lateness")?,
                    required(self.watermark_min_step, "watermark-min-step")?,
                    std::time::Duration::from_millis(required(self.idle_timeout, "idle-timeout")?),
                ),
            };
            if let Some(gap) = self.session_gap {
                config.session_gap = gap;
            }
            if let Some(lateness) = self.allowed_lateness {
                config.allowed_lateness = lateness;
            }
            if let Some(step) = self.watermark_min_step {
                config.watermark_min_step = step;
            }
            if let Some(idle) = self.idle_timeout {
                config.idle_timeout = idle;
            }
            if let Some(late_data) = self.late_data {
                config.late_data = late_data;
            }
            if self.max_active_keys.is_some() {
                config.max_active_keys = self.max_active_keys;
            }
            if let Some(partitions) = self.partitions {
                config.partitions = partitions;
            }
            if let Some(sources) = self.sources {
                config.sources = sources;
            }
            config.validate()?;
            Ok((config, self.args))
        }
    }

    fn required<T>(value: Option<T>, name: &str) -> Result<T, ConfigError> {
        value.ok_or_else(|| {
            ConfigError::Invalid(format!("--{name} is required when --config is not given"))
        })
    }

    #[cfg(test)]
    mod tests {
        use super::*;

        #[test]
        fn flags_override_file() {
            let mut file = tempfile::NamedTempFile::new().unwrap();
            std::io::Write::write_all(
                &mut file,
                b"session-gap = 5000\nallowed-lateness = 100\nwatermark-min-step = 100\nidle-timeout = 30000\n",
            )
            .unwrap();
            let path = file.path().to_str().unwrap().to_string();

            let opts = CommandLineOptions::parse_from([
                "sessionflow",
                "--config",
                &path,
                "--session-gap",
                "10000",
                "-p",
                "2",
                "rest",
            ]);
            let (config, args) = opts.into_config().unwrap();
            assert_eq!(config.session_gap, 10000);
            assert_eq!(config.allowed_lateness, 100);
            assert_eq!(config.partitions, 2);
            assert_eq!(args, vec!["rest".to_string()]);
        }

        #[test]
        fn missing_required_flag() {
            let opts = CommandLineOptions::parse_from(["sessionflow", "--session-gap", "10"]);
            assert!(matches!(opts.into_config(), Err(ConfigError::Invalid(_))));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_toml() {
        let config = SessionConfig::from_toml(
            r#"
            session-gap = 5000
            allowed-lateness = 100
            watermark-min-step = 100
            idle-timeout = 30000
            late-data = "side-output"
            partitions = 3
            "#,
        )
        .unwrap();
        assert_eq!(config.session_gap, 5000);
        assert_eq!(config.idle_timeout(), Duration::from_secs(30));
        assert_eq!(config.late_data, LateDataPolicy::SideOutput);
        assert_eq!(config.partitions, 3);
        assert_eq!(config.sources, 1);
        assert_eq!(config.max_active_keys, None);
    }

    #[test]
    fn timing_is_required() {
        let err = SessionConfig::from_toml("session-gap = 5000").unwrap_err();
        assert!(matches!(err, ConfigError::Serialization(_)));
    }

    #[test]
    fn invalid_values() {
        let base = SessionConfig::new(5000, 100, 100, Duration::from_secs(30));
        assert!(base.validate().is_ok());
        assert!(SessionConfig { session_gap: 0, ..base.clone() }.validate().is_err());
        assert!(SessionConfig { allowed_lateness: -1, ..base.clone() }.validate().is_err());
        assert!(base.clone().partitions(0).validate().is_err());
        assert!(base.max_active_keys(Some(0)).validate().is_err());
    }
}
