//! Monitor supervisor.
//!
//! Owns one tracker per target and the one-shot trigger gate. On its
//! own cadence it reads every tracker's latest snapshot; when every
//! target has been continuously down for at least the configured
//! threshold, it fires the executor exactly once, stops all trackers
//! and finishes. Partial or staggered downtime never fires.

use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use tokio::sync::{broadcast, watch};
use tokio::time::{self, MissedTickBehavior};

use crate::config::MonitorConfig;
use crate::executor::{ExecError, Executor};
use crate::probe::Prober;
use crate::tracker::{self, DowntimeSnapshot};

/// One-shot gate guarding the triggered action.
///
/// `Pending → Fired` happens exactly once, no matter how many
/// evaluation passes race on it. There is no way back.
#[derive(Debug, Default)]
pub struct TriggerGate {
    fired: AtomicBool,
}

impl TriggerGate {
    pub fn new() -> Self {
        Self::default()
    }

    /// Attempt the Pending→Fired transition. Returns true for exactly
    /// one caller.
    pub fn fire(&self) -> bool {
        self.fired
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }
}

/// How a monitoring run ended.
#[derive(Debug)]
pub enum RunOutcome {
    /// Gate fired and the action succeeded.
    Triggered,
    /// Gate fired but the action reported failure. The gate stays
    /// fired; the action is never retried.
    ActionFailed(ExecError),
    /// Shut down before the gate fired. No action was run.
    Interrupted,
}

pub struct Monitor {
    config: MonitorConfig,
    prober: Arc<dyn Prober>,
    executor: Arc<dyn Executor>,
}

impl Monitor {
    pub fn new(config: MonitorConfig, prober: Arc<dyn Prober>, executor: Arc<dyn Executor>) -> Self {
        Self {
            config,
            prober,
            executor,
        }
    }

    /// Run until the gate fires or `shutdown` resolves.
    ///
    /// Steady-state probe failures never surface here; they are
    /// expressed purely through tracker state.
    pub async fn run(self, shutdown: impl Future<Output = ()>) -> RunOutcome {
        let (stop_tx, _) = broadcast::channel(1);

        let snapshots: Vec<watch::Receiver<DowntimeSnapshot>> = self
            .config
            .targets
            .iter()
            .map(|target| {
                tracker::spawn_tracker(
                    target.clone(),
                    self.prober.clone(),
                    self.config.poll_interval,
                    stop_tx.subscribe(),
                )
            })
            .collect();

        tracing::info!(
            "monitoring {} targets, downtime threshold {:?}",
            snapshots.len(),
            self.config.timeout
        );

        let gate = TriggerGate::new();
        let mut interval = time::interval(self.config.eval_interval);
        interval.set_missed_tick_behavior(MissedTickBehavior::Skip);

        tokio::pin!(shutdown);

        loop {
            tokio::select! {
                _ = &mut shutdown => {
                    tracing::info!("interrupted, stopping all trackers without firing");
                    let _ = stop_tx.send(());
                    return RunOutcome::Interrupted;
                }
                _ = interval.tick() => {}
            }

            let satisfied = snapshots
                .iter()
                .filter(|rx| rx.borrow().meets_threshold(self.config.timeout))
                .count();
            tracing::debug!("{}/{} targets past threshold", satisfied, snapshots.len());

            // An empty target set never fires.
            let all_down = !snapshots.is_empty() && satisfied == snapshots.len();
            if !(all_down && gate.fire()) {
                continue;
            }

            tracing::info!(
                "all targets have been down for at least {:?}, running command",
                self.config.timeout
            );
            let _ = stop_tx.send(());

            return match self.executor.execute(&self.config.action).await {
                Ok(()) => {
                    tracing::info!("command '{}' executed successfully", self.config.action);
                    RunOutcome::Triggered
                }
                Err(e) => {
                    tracing::error!("error running command: {}", e);
                    RunOutcome::ActionFailed(e)
                }
            };
        }
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;
    use std::future::pending;
    use std::sync::atomic::AtomicUsize;
    use std::time::Duration;

    use async_trait::async_trait;
    use tokio::time::Instant;

    use super::*;
    use crate::config::{Action, Target};
    use crate::executor::MockExecutor;
    use crate::probe::{MockProber, ProbeOutcome};

    fn config(targets: &[&str], timeout_secs: f64) -> MonitorConfig {
        MonitorConfig::new(
            targets.iter().map(|t| t.to_string()).collect(),
            timeout_secs,
            "true",
            1.0,
            1.0,
            5.0,
        )
        .unwrap()
    }

    /// Per-target downtime windows, evaluated against elapsed run time.
    /// A target is unreachable while elapsed falls in any of its windows.
    struct PlanProber {
        start: Instant,
        outages: HashMap<String, Vec<(f64, f64)>>,
    }

    impl PlanProber {
        fn new(outages: &[(&str, &[(f64, f64)])]) -> Arc<Self> {
            Arc::new(Self {
                start: Instant::now(),
                outages: outages
                    .iter()
                    .map(|(t, w)| (t.to_string(), w.to_vec()))
                    .collect(),
            })
        }
    }

    #[async_trait]
    impl Prober for PlanProber {
        async fn probe(&self, target: &Target) -> ProbeOutcome {
            let elapsed = self.start.elapsed().as_secs_f64();
            let down = self.outages[target.address()]
                .iter()
                .any(|&(from, to)| elapsed >= from && elapsed < to);
            if down {
                ProbeOutcome::Unreachable
            } else {
                ProbeOutcome::Reachable
            }
        }
    }

    #[derive(Default)]
    struct CountingExecutor(AtomicUsize);

    #[async_trait]
    impl Executor for CountingExecutor {
        async fn execute(&self, _action: &Action) -> Result<(), ExecError> {
            self.0.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    #[tokio::test(start_paused = true)]
    async fn scenario_staggered_outage_fires_when_last_target_qualifies() {
        // A down from t=0, B down from t=2, both stay down, threshold 5s.
        // B reaches 5s of downtime at t=7; the gate must not fire at t=5.
        let prober = PlanProber::new(&[("a", &[(0.0, f64::MAX)]), ("b", &[(2.0, f64::MAX)])]);
        let executor = Arc::new(CountingExecutor::default());

        let start = Instant::now();
        let monitor = Monitor::new(config(&["a", "b"], 5.0), prober, executor.clone());
        let outcome = monitor.run(pending::<()>()).await;

        assert!(matches!(outcome, RunOutcome::Triggered));
        assert_eq!(executor.0.load(Ordering::SeqCst), 1);

        // Fires on the first evaluation at or after t=7, within one
        // evaluation interval of tolerance.
        let elapsed = start.elapsed();
        assert!(elapsed >= Duration::from_secs(7), "fired early at {elapsed:?}");
        assert!(elapsed <= Duration::from_secs(8), "fired late at {elapsed:?}");
    }

    #[tokio::test(start_paused = true)]
    async fn scenario_flapping_target_holds_the_gate() {
        // A down throughout; B down at t=0, up at t=3, down again at t=4.
        // B's continuous downtime restarts at t=4, so nothing may fire
        // at t=5 even though A alone qualifies there.
        let prober = PlanProber::new(&[("a", &[(0.0, f64::MAX)]), ("b", &[(0.0, 3.0), (4.0, f64::MAX)])]);
        let executor = Arc::new(CountingExecutor::default());

        let start = Instant::now();
        let monitor = Monitor::new(config(&["a", "b"], 5.0), prober, executor.clone());
        let outcome = monitor.run(pending::<()>()).await;

        assert!(matches!(outcome, RunOutcome::Triggered));
        assert_eq!(executor.0.load(Ordering::SeqCst), 1);

        let elapsed = start.elapsed();
        assert!(elapsed >= Duration::from_secs(9), "fired early at {elapsed:?}");
        assert!(elapsed <= Duration::from_secs(10), "fired late at {elapsed:?}");
    }

    #[tokio::test(start_paused = true)]
    async fn executor_runs_exactly_once() {
        let prober = PlanProber::new(&[("a", &[(0.0, f64::MAX)])]);

        let mut mock = MockExecutor::new();
        mock.expect_execute()
            .withf(|action| action.program == "true")
            .times(1)
            .returning(|_| Ok(()));

        let monitor = Monitor::new(config(&["a"], 2.0), prober, Arc::new(mock));
        let outcome = monitor.run(pending::<()>()).await;
        assert!(matches!(outcome, RunOutcome::Triggered));
    }

    #[tokio::test(start_paused = true)]
    async fn executor_failure_is_reported_not_retried() {
        let prober = PlanProber::new(&[("a", &[(0.0, f64::MAX)])]);

        let mut mock = MockExecutor::new();
        mock.expect_execute()
            .times(1)
            .returning(|_| Err(ExecError::Launch("true".into(), std::io::Error::other("boom"))));

        let monitor = Monitor::new(config(&["a"], 2.0), prober, Arc::new(mock));
        let outcome = monitor.run(pending::<()>()).await;
        assert!(matches!(outcome, RunOutcome::ActionFailed(_)));
    }

    #[tokio::test(start_paused = true)]
    async fn shutdown_before_threshold_never_fires() {
        let mut prober = MockProber::new();
        prober
            .expect_probe()
            .returning(|_| ProbeOutcome::Unreachable);
        let prober = Arc::new(prober);
        let executor = Arc::new(CountingExecutor::default());

        // Threshold 30s, shutdown at 3s.
        let monitor = Monitor::new(config(&["a"], 30.0), prober, executor.clone());
        let outcome = monitor
            .run(async {
                tokio::time::sleep(Duration::from_secs(3)).await;
            })
            .await;

        assert!(matches!(outcome, RunOutcome::Interrupted));
        assert_eq!(executor.0.load(Ordering::SeqCst), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn empty_target_set_never_fires() {
        // Validation rejects this upstream; the gate must still hold
        // if it ever happens.
        let mut config = config(&["a"], 1.0);
        config.targets.clear();

        let prober = PlanProber::new(&[]);
        let executor = Arc::new(CountingExecutor::default());

        let monitor = Monitor::new(config, prober, executor.clone());
        let outcome = monitor
            .run(async {
                tokio::time::sleep(Duration::from_secs(10)).await;
            })
            .await;

        assert!(matches!(outcome, RunOutcome::Interrupted));
        assert_eq!(executor.0.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn gate_has_exactly_one_winner_under_contention() {
        let gate = Arc::new(TriggerGate::new());
        let mut handles = Vec::new();
        for _ in 0..32 {
            let gate = gate.clone();
            handles.push(tokio::spawn(async move { gate.fire() }));
        }

        let mut winners = 0;
        for handle in handles {
            if handle.await.unwrap() {
                winners += 1;
            }
        }
        assert_eq!(winners, 1);
        assert!(!gate.fire()); // terminal: no way back to pending
    }
}
