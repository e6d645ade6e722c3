use std::{path::PathBuf, time::Duration};

use clap::{Parser, ValueEnum};
use tracing::level_filters::LevelFilter;

use super::tracking::state::MIN_TRACKING_TIME_MS;

/// Where observations come from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, ValueEnum)]
pub enum Source {
    /// A browser bridge reports tab and focus events over the local connection.
    Browser,
    /// The daemon polls the process list itself.
    #[default]
    Desktop,
}

#[derive(Parser)]
pub struct DaemonArgs {
    #[arg(long)]
    pub force: bool,
    #[arg(long)]
    pub dir: Option<PathBuf>,
    /// This option is for debugging purposes only.
    #[arg(long = "log-console")]
    pub log_console: bool,
    #[arg(long = "log-filter")]
    pub log: Option<LevelFilter>,
    #[arg(long, value_enum, default_value_t = Source::Desktop)]
    pub source: Source,
    /// Interval of the periodic save. Defaults to 30 seconds for the browser and 10 for desktop.
    #[arg(long = "tick-seconds")]
    pub tick_seconds: Option<u64>,
    #[arg(long = "poll-seconds", default_value_t = 2)]
    pub poll_seconds: u64,
    /// Visits shorter than this are not recorded.
    #[arg(long = "min-tracking-ms", default_value_t = MIN_TRACKING_TIME_MS)]
    pub min_tracking_ms: u64,
}

/// Tracker settings resolved from the command line.
#[derive(Debug, Clone)]
pub struct TrackerConfig {
    pub source: Source,
    pub tick_interval: Duration,
    pub poll_interval: Duration,
    pub min_tracking_ms: u64,
}

impl DaemonArgs {
    pub fn tracker_config(&self) -> TrackerConfig {
        let default_tick = match self.source {
            Source::Browser => 30,
            Source::Desktop => 10,
        };
        TrackerConfig {
            source: self.source,
            tick_interval: Duration::from_secs(self.tick_seconds.unwrap_or(default_tick).max(1)),
            poll_interval: Duration::from_secs(self.poll_seconds.max(1)),
            min_tracking_ms: self.min_tracking_ms,
        }
    }
}
