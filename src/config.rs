//! Monitor configuration and validation.
//!
//! All validation happens here, before any tracker is spawned. A bad
//! timeout, an empty target list or an empty command never gets as far
//! as the monitor.

use std::fmt;
use std::time::Duration;

use thiserror::Error;

pub const DEFAULT_POLL_INTERVAL_SECS: f64 = 1.0;
pub const DEFAULT_EVAL_INTERVAL_SECS: f64 = 1.0;
pub const DEFAULT_PROBE_TIMEOUT_SECS: f64 = 5.0;

/// One monitored endpoint, identified by address or hostname.
/// Immutable for the run.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Target(String);

impl Target {
    pub fn new(address: impl Into<String>) -> Self {
        Self(address.into())
    }

    pub fn address(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Target {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// The command to run when the gate fires, pre-split into program and
/// arguments so nothing is re-interpolated through a shell.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Action {
    pub program: String,
    pub args: Vec<String>,
}

impl Action {
    pub fn parse(command: &str) -> Result<Self, ConfigError> {
        let mut parts = command.split_whitespace();
        let program = parts.next().ok_or(ConfigError::EmptyCommand)?.to_string();
        Ok(Self {
            program,
            args: parts.map(str::to_string).collect(),
        })
    }
}

impl fmt::Display for Action {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.program)?;
        for arg in &self.args {
            write!(f, " {arg}")?;
        }
        Ok(())
    }
}

/// Configuration errors. All fatal, all reported before monitoring starts.
#[derive(Error, Debug, PartialEq)]
pub enum ConfigError {
    #[error("{name} must be a positive number of seconds, got {value}")]
    NonPositive { name: &'static str, value: f64 },
    #[error("at least one target is required")]
    NoTargets,
    #[error("command must not be empty")]
    EmptyCommand,
}

/// Validated monitoring configuration.
#[derive(Debug, Clone)]
pub struct MonitorConfig {
    pub targets: Vec<Target>,
    /// Per-target continuous-downtime threshold.
    pub timeout: Duration,
    /// Tracker poll cadence.
    pub poll_interval: Duration,
    /// Supervisor evaluation cadence.
    pub eval_interval: Duration,
    /// Bound on a single probe.
    pub probe_timeout: Duration,
    pub action: Action,
}

impl MonitorConfig {
    pub fn new(
        targets: Vec<String>,
        timeout_secs: f64,
        command: &str,
        poll_interval_secs: f64,
        eval_interval_secs: f64,
        probe_timeout_secs: f64,
    ) -> Result<Self, ConfigError> {
        if targets.is_empty() {
            return Err(ConfigError::NoTargets);
        }

        Ok(Self {
            targets: targets.into_iter().map(Target::new).collect(),
            timeout: positive("timeout", timeout_secs)?,
            poll_interval: positive("poll-interval", poll_interval_secs)?,
            eval_interval: positive("eval-interval", eval_interval_secs)?,
            probe_timeout: positive("probe-timeout", probe_timeout_secs)?,
            action: Action::parse(command)?,
        })
    }
}

fn positive(name: &'static str, value: f64) -> Result<Duration, ConfigError> {
    if value.is_finite() && value > 0.0 {
        Ok(Duration::from_secs_f64(value))
    } else {
        Err(ConfigError::NonPositive { name, value })
    }
}
