//! Health monitor.
//!
//! On every tick, streams that should be running but have no live encoder
//! are restarted. Restarts back off exponentially per stream and stop after
//! `RestartPolicy::max_attempts`, at which point the alert hook fires once.
//! A stream that stays up for `stable_after` gets a clean slate.

use serde::Serialize;
use std::{
    sync::Arc,
    time::{Duration, Instant},
};
use tokio::{task::JoinHandle, time::MissedTickBehavior};
use tokio_util::sync::CancellationToken;

use crate::{
    logger::{self, stream_source},
    store::StreamId,
    supervisor::Supervisor,
};

/// Default health check interval in seconds.
pub const DEFAULT_CHECK_INTERVAL_SECS: u64 = 10;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum HealthState {
    Stopped,
    Running,
    CrashedPendingRestart,
    /// Gave up after too many restarts; only a caller `start` revives it.
    Failed,
}

#[derive(Debug, Clone)]
pub struct RestartPolicy {
    pub max_attempts: u32,
    pub base_backoff: Duration,
    pub max_backoff: Duration,
    pub stable_after: Duration,
}

impl Default for RestartPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 10,
            base_backoff: Duration::from_secs(5),
            max_backoff: Duration::from_secs(300),
            stable_after: Duration::from_secs(60),
        }
    }
}

impl RestartPolicy {
    /// Delay that must pass after restart number `attempt` (1-based)
    /// before the next one.
    pub fn backoff(&self, attempt: u32) -> Duration {
        let factor = 2u32.checked_pow(attempt.saturating_sub(1)).unwrap_or(u32::MAX);
        self.base_backoff
            .checked_mul(factor)
            .unwrap_or(self.max_backoff)
            .min(self.max_backoff)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CrashDecision {
    RestartNow,
    Wait(Duration),
    GiveUp { first_time: bool },
}

#[derive(Debug, Clone, Default)]
pub struct RestartTracker {
    attempts: u32,
    next_eligible: Option<Instant>,
    alerted: bool,
}

impl RestartTracker {
    pub fn attempts(&self) -> u32 {
        self.attempts
    }

    pub fn reset(&mut self) {
        *self = Self::default();
    }

    pub fn on_crash(&mut self, now: Instant, policy: &RestartPolicy) -> CrashDecision {
        if self.attempts >= policy.max_attempts {
            let first_time = !self.alerted;
            self.alerted = true;
            return CrashDecision::GiveUp { first_time };
        }

        if let Some(eligible) = self.next_eligible {
            if now < eligible {
                return CrashDecision::Wait(eligible - now);
            }
        }

        self.attempts += 1;
        self.next_eligible = Some(now + policy.backoff(self.attempts));
        CrashDecision::RestartNow
    }
}

/// Receives crash-loop notifications.
pub trait AlertSink: Send + Sync {
    fn crash_loop(&self, id: StreamId, attempts: u32, last_error: Option<&str>);
}

/// Default sink: an error-level entry in the daemon log.
pub struct LogAlert;

impl AlertSink for LogAlert {
    fn crash_loop(&self, id: StreamId, attempts: u32, last_error: Option<&str>) {
        logger::error(
            &stream_source(id),
            format!(
                "giving up after {} restarts (last error: {})",
                attempts,
                last_error.unwrap_or("none")
            ),
        );
    }
}

#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct TickReport {
    pub restarted: Vec<StreamId>,
    pub failed: Vec<StreamId>,
    pub reaped: usize,
}

#[derive(Clone)]
pub struct HealthMonitor {
    supervisor: Arc<Supervisor>,
    interval: Duration,
}

impl HealthMonitor {
    pub fn new(supervisor: Arc<Supervisor>, interval: Duration) -> Self {
        Self {
            supervisor,
            interval,
        }
    }

    /// One reconciliation pass. Blocks while encoders are spawned.
    pub fn tick(&self) -> TickReport {
        let mut report = TickReport {
            reaped: self.supervisor.reap_stragglers(),
            ..TickReport::default()
        };

        for candidate in self.supervisor.reconcile(Instant::now()) {
            match self.supervisor.restart_if_desired(candidate.id, candidate.generation) {
                Ok(pid) => {
                    logger::warn(
                        &stream_source(candidate.id),
                        format!("encoder was down, restarted as pid {}", pid),
                    );
                    report.restarted.push(candidate.id);
                }
                Err(err) => {
                    logger::error(&stream_source(candidate.id), format!("restart failed: {}", err));
                    report.failed.push(candidate.id);
                }
            }
        }

        report
    }

    pub async fn run(self, cancel: CancellationToken) {
        logger::info(
            "monitor",
            format!("health checks every {}s", self.interval.as_secs_f32()),
        );

        let mut interval = tokio::time::interval(self.interval);
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = interval.tick() => {
                    let monitor = self.clone();
                    if let Err(err) = tokio::task::spawn_blocking(move || monitor.tick()).await {
                        logger::error("monitor", format!("health check panicked: {}", err));
                    }
                }
                _ = cancel.cancelled() => {
                    logger::info("monitor", "health checks stopped");
                    break;
                }
            }
        }
    }
}

pub fn spawn_health_monitor(monitor: HealthMonitor, cancel: CancellationToken) -> JoinHandle<()> {
    tokio::spawn(monitor.run(cancel))
}
