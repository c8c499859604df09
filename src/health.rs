//! Health Monitor
//!
//! Polls application health with a bounded wall-clock budget and
//! classifies the result. The sleep between polls is the only place the
//! whole orchestration suspends.

use crate::backend::ArgoBackend;
use crate::types::HealthStatus;
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, info, warn};

pub const DEFAULT_INTERVAL_SECS: u64 = 30;
pub const MIN_INTERVAL_SECS: u64 = 10;
pub const MAX_INTERVAL_SECS: u64 = 300;

pub const DEFAULT_TIMEOUT_SECS: u64 = 300;
pub const MIN_TIMEOUT_SECS: u64 = 60;
pub const MAX_TIMEOUT_SECS: u64 = 1800;

/// Poll interval and overall budget, already clamped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HealthCheckSettings {
    pub interval: Duration,
    pub timeout: Duration,
}

impl HealthCheckSettings {
    /// Out-of-range values are replaced by their defaults, with a warning.
    pub fn new(interval_secs: u64, timeout_secs: u64) -> Self {
        let interval = if (MIN_INTERVAL_SECS..=MAX_INTERVAL_SECS).contains(&interval_secs) {
            interval_secs
        } else {
            warn!(
                interval_secs,
                default = DEFAULT_INTERVAL_SECS,
                "health check interval out of range [{}, {}], using default",
                MIN_INTERVAL_SECS,
                MAX_INTERVAL_SECS
            );
            DEFAULT_INTERVAL_SECS
        };

        let timeout = if (MIN_TIMEOUT_SECS..=MAX_TIMEOUT_SECS).contains(&timeout_secs) {
            timeout_secs
        } else {
            warn!(
                timeout_secs,
                default = DEFAULT_TIMEOUT_SECS,
                "health check timeout out of range [{}, {}], using default",
                MIN_TIMEOUT_SECS,
                MAX_TIMEOUT_SECS
            );
            DEFAULT_TIMEOUT_SECS
        };

        Self {
            interval: Duration::from_secs(interval),
            timeout: Duration::from_secs(timeout),
        }
    }
}

impl Default for HealthCheckSettings {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(DEFAULT_INTERVAL_SECS),
            timeout: Duration::from_secs(DEFAULT_TIMEOUT_SECS),
        }
    }
}

/// Classified result of monitoring.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HealthOutcome {
    Healthy,
    /// Degraded or Missing; the loop stopped without waiting.
    DegradedFastFail { status: HealthStatus },
    /// Budget exhausted while still in a transient state.
    TimedOut { last: HealthStatus },
    /// Single-shot check reported a transient state.
    Unhealthy { status: HealthStatus },
}

impl HealthOutcome {
    pub fn is_healthy(&self) -> bool {
        matches!(self, HealthOutcome::Healthy)
    }

    /// Failure reason recorded in the deployment record.
    pub fn reason(&self) -> &'static str {
        match self {
            HealthOutcome::Healthy => "healthy",
            HealthOutcome::DegradedFastFail { .. } => "health_degraded",
            HealthOutcome::TimedOut { .. } => "health_timeout",
            HealthOutcome::Unhealthy { .. } => "health_check_failed",
        }
    }

    /// Last observed health.
    pub fn status(&self) -> HealthStatus {
        match self {
            HealthOutcome::Healthy => HealthStatus::Healthy,
            HealthOutcome::DegradedFastFail { status } | HealthOutcome::Unhealthy { status } => {
                *status
            }
            HealthOutcome::TimedOut { last } => *last,
        }
    }
}

pub struct HealthMonitor<'a, B: ArgoBackend> {
    backend: &'a B,
    settings: HealthCheckSettings,
}

impl<'a, B: ArgoBackend> HealthMonitor<'a, B> {
    pub fn new(backend: &'a B, settings: HealthCheckSettings) -> Self {
        Self { backend, settings }
    }

    pub fn settings(&self) -> &HealthCheckSettings {
        &self.settings
    }

    /// One health check. A failed query counts as `Unknown`.
    pub async fn check(&self, app: &str) -> HealthStatus {
        match self.backend.get_app(app).await {
            Ok(view) => view.health,
            Err(e) => {
                warn!(app = %app, error = %e, "health query failed, treating as Unknown");
                HealthStatus::Unknown
            }
        }
    }

    /// Monitor `app` until a verdict.
    ///
    /// With `retry_enabled = false` exactly one check is made and nothing
    /// sleeps. Otherwise checks repeat every interval until Healthy,
    /// a fast-fail state, or the budget (measured from the first check)
    /// runs out. A shortened final sleep puts the last check exactly at
    /// the deadline.
    pub async fn monitor(&self, app: &str, retry_enabled: bool) -> HealthOutcome {
        if !retry_enabled {
            let status = self.check(app).await;
            info!(app = %app, health = %status, "single health check");
            return classify_single(status);
        }

        let started = Instant::now();
        let mut attempt: u32 = 0;

        loop {
            attempt += 1;
            let status = self.check(app).await;
            let elapsed = started.elapsed();
            debug!(app = %app, attempt, health = %status, elapsed_secs = elapsed.as_secs(), "health check");

            if status == HealthStatus::Healthy {
                info!(app = %app, attempt, "application healthy");
                return HealthOutcome::Healthy;
            }

            if status.is_fast_fail() {
                warn!(app = %app, attempt, health = %status, "fast-fail health state");
                return HealthOutcome::DegradedFastFail { status };
            }

            let remaining = self.settings.timeout.saturating_sub(elapsed);
            if remaining.is_zero() {
                warn!(
                    app = %app,
                    attempt,
                    health = %status,
                    timeout_secs = self.settings.timeout.as_secs(),
                    "health check timed out"
                );
                return HealthOutcome::TimedOut { last: status };
            }

            // The last check lands on the deadline, never past it
            tokio::time::sleep(self.settings.interval.min(remaining)).await;
        }
    }
}

fn classify_single(status: HealthStatus) -> HealthOutcome {
    match status {
        HealthStatus::Healthy => HealthOutcome::Healthy,
        s if s.is_fast_fail() => HealthOutcome::DegradedFastFail { status: s },
        s => HealthOutcome::Unhealthy { status: s },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::FakeArgo;
    use HealthStatus::*;

    #[test]
    fn test_settings_clamp_to_defaults() {
        let s = HealthCheckSettings::new(5, 30);
        assert_eq!(s, HealthCheckSettings::default());

        let s = HealthCheckSettings::new(301, 1801);
        assert_eq!(s.interval, Duration::from_secs(DEFAULT_INTERVAL_SECS));
        assert_eq!(s.timeout, Duration::from_secs(DEFAULT_TIMEOUT_SECS));

        let s = HealthCheckSettings::new(10, 1800);
        assert_eq!(s.interval, Duration::from_secs(10));
        assert_eq!(s.timeout, Duration::from_secs(1800));
    }

    #[tokio::test(start_paused = true)]
    async fn test_single_check_never_sleeps() {
        let argo = FakeArgo::new().with_health(&[Progressing, Healthy]);
        let monitor = HealthMonitor::new(&argo, HealthCheckSettings::new(30, 300));

        let started = Instant::now();
        let outcome = monitor.monitor("web", false).await;

        assert_eq!(outcome, HealthOutcome::Unhealthy { status: Progressing });
        assert_eq!(argo.count("get"), 1);
        assert_eq!(started.elapsed(), Duration::ZERO);
    }

    #[tokio::test(start_paused = true)]
    async fn test_single_check_classification() {
        let argo = FakeArgo::new().with_health(&[Healthy]);
        let monitor = HealthMonitor::new(&argo, HealthCheckSettings::default());
        assert_eq!(monitor.monitor("web", false).await, HealthOutcome::Healthy);

        let argo = FakeArgo::new().with_health(&[Missing]);
        let monitor = HealthMonitor::new(&argo, HealthCheckSettings::default());
        assert_eq!(
            monitor.monitor("web", false).await,
            HealthOutcome::DegradedFastFail { status: Missing }
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_degraded_fails_fast() {
        let argo = FakeArgo::new().with_health(&[Degraded]);
        let monitor = HealthMonitor::new(&argo, HealthCheckSettings::new(30, 300));

        let started = Instant::now();
        let outcome = monitor.monitor("web", true).await;

        assert_eq!(outcome, HealthOutcome::DegradedFastFail { status: Degraded });
        assert_eq!(argo.count("get"), 1);
        assert!(started.elapsed() < Duration::from_secs(1));
    }

    #[tokio::test(start_paused = true)]
    async fn test_healthy_after_progressing_stops_early() {
        let argo = FakeArgo::new().with_health(&[Progressing, Suspended, Healthy]);
        let monitor = HealthMonitor::new(&argo, HealthCheckSettings::new(30, 300));

        let started = Instant::now();
        let outcome = monitor.monitor("web", true).await;

        assert_eq!(outcome, HealthOutcome::Healthy);
        assert_eq!(argo.count("get"), 3);
        assert_eq!(started.elapsed(), Duration::from_secs(60));
    }

    #[tokio::test(start_paused = true)]
    async fn test_times_out_on_wall_clock() {
        let argo = FakeArgo::new().with_health(&[Progressing]);
        let monitor = HealthMonitor::new(&argo, HealthCheckSettings::new(30, 60));

        let started = Instant::now();
        let outcome = monitor.monitor("web", true).await;

        assert_eq!(outcome, HealthOutcome::TimedOut { last: Progressing });
        // Checks at 0s, 30s and 60s; no sleep after the last one.
        assert_eq!(argo.count("get"), 3);
        assert_eq!(started.elapsed(), Duration::from_secs(60));
    }

    #[tokio::test(start_paused = true)]
    async fn test_last_check_lands_on_deadline() {
        let argo = FakeArgo::new().with_health(&[Progressing]);
        let monitor = HealthMonitor::new(&argo, HealthCheckSettings::new(30, 70));

        let started = Instant::now();
        let outcome = monitor.monitor("web", true).await;

        assert_eq!(outcome, HealthOutcome::TimedOut { last: Progressing });
        // 0s, 30s, 60s, then a 10s sleep to the 70s deadline
        assert_eq!(argo.count("get"), 4);
        assert_eq!(started.elapsed(), Duration::from_secs(70));
    }

    #[tokio::test(start_paused = true)]
    async fn test_healthy_on_deadline_check() {
        let argo = FakeArgo::new().with_health(&[Progressing, Progressing, Healthy]);
        let monitor = HealthMonitor::new(&argo, HealthCheckSettings::new(50, 70));

        let started = Instant::now();
        let outcome = monitor.monitor("web", true).await;

        assert_eq!(outcome, HealthOutcome::Healthy);
        assert_eq!(started.elapsed(), Duration::from_secs(70));
    }

    #[tokio::test(start_paused = true)]
    async fn test_query_errors_are_unknown_and_retried() {
        let argo = FakeArgo {
            fail_get_app: true,
            ..FakeArgo::new()
        };
        let monitor = HealthMonitor::new(&argo, HealthCheckSettings::new(60, 60));

        let outcome = monitor.monitor("web", true).await;
        assert_eq!(outcome, HealthOutcome::TimedOut { last: Unknown });
        assert_eq!(argo.count("get"), 2);
    }

    #[test]
    fn test_outcome_reasons() {
        assert_eq!(HealthOutcome::Healthy.reason(), "healthy");
        assert_eq!(
            HealthOutcome::DegradedFastFail { status: Degraded }.reason(),
            "health_degraded"
        );
        assert_eq!(HealthOutcome::TimedOut { last: Unknown }.reason(), "health_timeout");
        assert_eq!(HealthOutcome::TimedOut { last: Suspended }.status(), Suspended);
    }
}
