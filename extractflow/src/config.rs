//! Configuration for the extraction scheduler.

use crate::errors::ExtractError;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Prefix of the environment variables read by [`ExtractConfig::from_env`].
pub const ENV_PREFIX: &str = "EXTRACT__";

/// Policy deciding which source the scheduler reads from next.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NextItemMode {
    /// Always read the most recently added source (depth-first).
    Fifo,
    /// Cycle through all sources.
    #[default]
    RoundRobin,
}

impl NextItemMode {
    /// Returns the mode as a string.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Fifo => "fifo",
            Self::RoundRobin => "round_robin",
        }
    }
}

impl std::str::FromStr for NextItemMode {
    type Err = ExtractError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "fifo" => Ok(Self::Fifo),
            "round_robin" => Ok(Self::RoundRobin),
            other => Err(ExtractError::InvalidConfig(format!(
                "unknown next_item_mode '{other}', expected 'fifo' or 'round_robin'"
            ))),
        }
    }
}

/// Configuration for a [`PipeIterator`](crate::iterator::PipeIterator).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExtractConfig {
    /// Upper bound on deferred tasks running at the same time.
    #[serde(default = "default_max_parallel_items")]
    pub max_parallel_items: usize,
    /// Number of pool workers.
    #[serde(default = "default_workers")]
    pub workers: usize,
    /// Poll and backoff interval in seconds.
    #[serde(default = "default_futures_poll_interval")]
    pub futures_poll_interval: f64,
    /// Whether forked items are deep-copied for every additional fork route.
    #[serde(default)]
    pub copy_on_fork: bool,
    /// Source selection policy.
    #[serde(default)]
    pub next_item_mode: NextItemMode,
    /// Number of discovered sources at which round robin falls back to fifo.
    ///
    /// `None` ties the threshold to `max_parallel_items`.
    #[serde(default)]
    pub fifo_switch_threshold: Option<usize>,
}

fn default_max_parallel_items() -> usize {
    20
}

fn default_workers() -> usize {
    5
}

fn default_futures_poll_interval() -> f64 {
    0.01
}

impl Default for ExtractConfig {
    fn default() -> Self {
        Self {
            max_parallel_items: default_max_parallel_items(),
            workers: default_workers(),
            futures_poll_interval: default_futures_poll_interval(),
            copy_on_fork: false,
            next_item_mode: NextItemMode::default(),
            fifo_switch_threshold: None,
        }
    }
}

impl ExtractConfig {
    /// Creates a configuration with defaults.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the maximum number of parallel deferred tasks.
    #[must_use]
    pub fn with_max_parallel_items(mut self, max_parallel_items: usize) -> Self {
        self.max_parallel_items = max_parallel_items;
        self
    }

    /// Sets the number of pool workers.
    #[must_use]
    pub fn with_workers(mut self, workers: usize) -> Self {
        self.workers = workers;
        self
    }

    /// Sets the poll interval.
    #[must_use]
    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.futures_poll_interval = interval.as_secs_f64();
        self
    }

    /// Sets whether forked items are copied.
    #[must_use]
    pub fn with_copy_on_fork(mut self, copy_on_fork: bool) -> Self {
        self.copy_on_fork = copy_on_fork;
        self
    }

    /// Sets the source selection policy.
    #[must_use]
    pub fn with_next_item_mode(mut self, mode: NextItemMode) -> Self {
        self.next_item_mode = mode;
        self
    }

    /// Sets an explicit fifo switch threshold.
    #[must_use]
    pub fn with_fifo_switch_threshold(mut self, threshold: usize) -> Self {
        self.fifo_switch_threshold = Some(threshold);
        self
    }

    /// Gets the poll interval as a Duration.
    #[must_use]
    pub fn poll_interval(&self) -> Duration {
        Duration::try_from_secs_f64(self.futures_poll_interval).unwrap_or_default()
    }

    /// Returns the effective fifo switch threshold.
    #[must_use]
    pub fn effective_fifo_switch_threshold(&self) -> usize {
        self.fifo_switch_threshold.unwrap_or(self.max_parallel_items)
    }

    /// Validates the configuration.
    ///
    /// # Errors
    ///
    /// Returns an error if a count is zero or the poll interval is not a
    /// finite non-negative number.
    pub fn validate(&self) -> Result<(), ExtractError> {
        if self.max_parallel_items == 0 {
            return Err(ExtractError::InvalidConfig(
                "max_parallel_items must be at least 1".to_string(),
            ));
        }
        if self.workers == 0 {
            return Err(ExtractError::InvalidConfig(
                "workers must be at least 1".to_string(),
            ));
        }
        if !self.futures_poll_interval.is_finite() || self.futures_poll_interval < 0.0 {
            return Err(ExtractError::InvalidConfig(format!(
                "futures_poll_interval must be a non-negative number of seconds, got {}",
                self.futures_poll_interval
            )));
        }
        if self.fifo_switch_threshold == Some(0) {
            return Err(ExtractError::InvalidConfig(
                "fifo_switch_threshold must be at least 1".to_string(),
            ));
        }
        Ok(())
    }

    /// Parses and validates a JSON configuration.
    ///
    /// Missing fields take their defaults.
    pub fn from_json_str(json: &str) -> Result<Self, ExtractError> {
        let config: Self = serde_json::from_str(json)
            .map_err(|e| ExtractError::InvalidConfig(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Loads the configuration from `EXTRACT__*` environment variables.
    ///
    /// Unset variables keep their defaults.
    pub fn from_env() -> Result<Self, ExtractError> {
        Self::from_lookup(|key| std::env::var(format!("{ENV_PREFIX}{key}")).ok())
    }

    fn from_lookup<F>(lookup: F) -> Result<Self, ExtractError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = Self::default();

        if let Some(value) = lookup("MAX_PARALLEL_ITEMS") {
            config.max_parallel_items = parse_var("MAX_PARALLEL_ITEMS", &value)?;
        }
        if let Some(value) = lookup("WORKERS") {
            config.workers = parse_var("WORKERS", &value)?;
        }
        if let Some(value) = lookup("FUTURES_POLL_INTERVAL") {
            config.futures_poll_interval = parse_var("FUTURES_POLL_INTERVAL", &value)?;
        }
        if let Some(value) = lookup("COPY_ON_FORK") {
            config.copy_on_fork = parse_var("COPY_ON_FORK", &value)?;
        }
        if let Some(value) = lookup("NEXT_ITEM_MODE") {
            config.next_item_mode = value.parse()?;
        }
        if let Some(value) = lookup("FIFO_SWITCH_THRESHOLD") {
            config.fifo_switch_threshold = Some(parse_var("FIFO_SWITCH_THRESHOLD", &value)?);
        }

        config.validate()?;
        Ok(config)
    }
}

fn parse_var<V>(key: &str, value: &str) -> Result<V, ExtractError>
where
    V: std::str::FromStr,
    V::Err: std::fmt::Display,
{
    value.trim().parse().map_err(|e| {
        ExtractError::InvalidConfig(format!("{ENV_PREFIX}{key}='{value}': {e}"))
    })
}
