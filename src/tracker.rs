//! Per-target downtime tracking.
//!
//! One tracker task polls one target and maintains its downtime state.
//! The state is published after every poll through a watch channel, so
//! the supervisor always reads a complete snapshot, never a partially
//! updated one.
//!
//! # State machine
//!
//! ```text
//!              Unreachable (stamps down_since)
//!        Up ──────────────────────────────────► Down
//!         ▲                                      │
//!         │         Reachable (full reset)       │ Unreachable
//!         └──────────────────────────────────────┘ (down_since kept,
//!                                                   downtime recomputed)
//! ```

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{broadcast, watch};
use tokio::time::{self, Instant, MissedTickBehavior};

use crate::config::Target;
use crate::probe::{ProbeOutcome, Prober};

/// Reachability of a single target.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkStatus {
    Up,
    Down,
}

/// One target's downtime state, published as an immutable snapshot
/// after every poll.
#[derive(Debug, Clone, Copy)]
pub struct DowntimeSnapshot {
    pub status: LinkStatus,
    /// Instant of the most recent Up→Down transition. Present iff Down.
    pub down_since: Option<Instant>,
    /// Elapsed time since `down_since`. Zero while Up.
    pub accumulated: Duration,
}

impl DowntimeSnapshot {
    pub fn up() -> Self {
        Self {
            status: LinkStatus::Up,
            down_since: None,
            accumulated: Duration::ZERO,
        }
    }

    /// Whether this target currently satisfies the downtime threshold.
    pub fn meets_threshold(&self, timeout: Duration) -> bool {
        self.status == LinkStatus::Down && self.accumulated >= timeout
    }

    /// Fold one probe result into the state.
    ///
    /// Downtime is recomputed by direct subtraction from the original
    /// Up→Down transition; `down_since` is never refreshed while the
    /// target stays down. Summing per-poll deltas instead would
    /// double-count time whenever a poll overlaps bookkeeping.
    fn observe(self, outcome: ProbeOutcome, now: Instant) -> Self {
        match outcome {
            ProbeOutcome::Reachable => Self::up(),
            ProbeOutcome::Unreachable => {
                let since = match (self.status, self.down_since) {
                    (LinkStatus::Down, Some(since)) => since,
                    _ => now,
                };
                Self {
                    status: LinkStatus::Down,
                    down_since: Some(since),
                    accumulated: now - since,
                }
            }
        }
    }
}

/// Spawn the poll loop for one target.
///
/// Returns the receiving side of a watch channel holding the target's
/// latest snapshot (initially up). The loop runs until `stop` is
/// signalled; a stop arriving during an in-flight probe discards its
/// result without publishing.
pub fn spawn_tracker(
    target: Target,
    prober: Arc<dyn Prober>,
    poll_interval: Duration,
    mut stop: broadcast::Receiver<()>,
) -> watch::Receiver<DowntimeSnapshot> {
    let (tx, rx) = watch::channel(DowntimeSnapshot::up());

    tokio::spawn(async move {
        let mut interval = time::interval(poll_interval);
        interval.set_missed_tick_behavior(MissedTickBehavior::Skip);

        let mut state = DowntimeSnapshot::up();
        loop {
            tokio::select! {
                _ = stop.recv() => break,
                _ = interval.tick() => {}
            }

            let outcome = tokio::select! {
                _ = stop.recv() => break,
                outcome = prober.probe(&target) => outcome,
            };

            let next = state.observe(outcome, Instant::now());
            match (state.status, next.status) {
                (LinkStatus::Up, LinkStatus::Down) => {
                    tracing::info!("target {} went down", target);
                }
                (LinkStatus::Down, LinkStatus::Up) => {
                    tracing::info!(
                        "target {} recovered after {:?} down",
                        target,
                        state.accumulated
                    );
                }
                _ => {}
            }

            if tx.send(next).is_err() {
                break; // supervisor gone
            }
            state = next;
        }

        tracing::debug!("tracker for {} stopped", target);
    });

    rx
}
