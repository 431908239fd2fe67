//! Reachability probes.
//!
//! Supports ICMP ping and TCP connect probes. Probers fold every
//! failure mode (timeout, launch error, refused connection) into
//! [`ProbeOutcome::Unreachable`]; the rest of the monitor never
//! distinguishes why a probe failed.

mod ping;
mod tcp;

pub use ping::PingProber;
pub use tcp::TcpProber;

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
#[cfg(test)]
use mockall::automock;
use thiserror::Error;

use crate::config::Target;

/// Probe error types. Internal to the probers: every variant is folded
/// into [`ProbeOutcome::Unreachable`] before it reaches a tracker.
#[derive(Error, Debug)]
pub enum ProbeError {
    #[error("probe timed out after {0:?}")]
    Timeout(Duration),
    #[error("network error: {0}")]
    Network(String),
    #[error("command failed: {0}")]
    Command(String),
}

/// Result of a single reachability check.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProbeOutcome {
    Reachable,
    Unreachable,
}

/// A capability that checks one target once, completing within the
/// prober's own bounded timeout.
#[cfg_attr(test, automock)]
#[async_trait]
pub trait Prober: Send + Sync {
    async fn probe(&self, target: &Target) -> ProbeOutcome;
}

/// Probe mechanism selection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, clap::ValueEnum)]
pub enum ProbeKind {
    Ping,
    Tcp,
}

pub fn build_prober(kind: ProbeKind, timeout: Duration) -> Arc<dyn Prober> {
    match kind {
        ProbeKind::Ping => Arc::new(PingProber::new(timeout)),
        ProbeKind::Tcp => Arc::new(TcpProber::new(timeout)),
    }
}
