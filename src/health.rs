//! Backend health monitoring.
//!
//! Tracks the patient store's liveness and initialization progress with two
//! independent interval tasks: a fast poll of `/initialization-status` while
//! the store is still loading its data files, and a slower `/live` probe
//! that keeps running for the lifetime of the session. The returned handle
//! aborts both tasks on `stop()` or `Drop`, so no timer outlives its owner.

use std::sync::{Arc, RwLock};
use std::time::Duration;

use chrono::{DateTime, Utc};

use crate::config;
use crate::services::{HealthApi, InitializationStatus};

// ═══════════════════════════════════════════════════════════
// Health state machine
// ═══════════════════════════════════════════════════════════

/// Observed liveness of a backend service.
///
/// `Unknown` exists only before the first probe; once a probe has run the
/// state moves between the three terminal values via `Checking` and never
/// returns to `Unknown`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ServiceHealth {
    Unknown,
    Checking,
    Healthy,
    Degraded,
    Unreachable,
}

impl ServiceHealth {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Unknown => "unknown",
            Self::Checking => "checking",
            Self::Healthy => "healthy",
            Self::Degraded => "degraded",
            Self::Unreachable => "unreachable",
        }
    }
}

impl std::fmt::Display for ServiceHealth {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Default)]
struct MonitorInner {
    liveness: Option<ServiceHealth>,
    initialization: Option<InitializationStatus>,
    checked_at: Option<DateTime<Utc>>,
}

pub struct HealthMonitor {
    api: Arc<dyn HealthApi>,
    inner: Arc<RwLock<MonitorInner>>,
}

/// Handle for the two polling tasks. Aborting is fire-and-forget; an
/// aborted tick never commits a partial state.
pub struct HealthMonitorHandle {
    tasks: Vec<tokio::task::JoinHandle<()>>,
}

impl HealthMonitorHandle {
    pub fn stop(&self) {
        for task in &self.tasks {
            task.abort();
        }
    }
}

impl Drop for HealthMonitorHandle {
    fn drop(&mut self) {
        self.stop();
    }
}

impl HealthMonitor {
    pub fn new(api: Arc<dyn HealthApi>) -> Self {
        Self {
            api,
            inner: Arc::new(RwLock::new(MonitorInner::default())),
        }
    }

    /// Liveness as of the last probe. `Unknown` until the first probe runs.
    pub fn liveness(&self) -> ServiceHealth {
        self.inner
            .read()
            .map(|inner| inner.liveness.unwrap_or(ServiceHealth::Unknown))
            .unwrap_or(ServiceHealth::Unknown)
    }

    /// Latest initialization report, if any poll has completed.
    pub fn initialization(&self) -> Option<InitializationStatus> {
        self.inner
            .read()
            .ok()
            .and_then(|inner| inner.initialization.clone())
    }

    /// When the last liveness probe resolved, if any.
    pub fn last_checked(&self) -> Option<DateTime<Utc>> {
        self.inner.read().ok().and_then(|inner| inner.checked_at)
    }

    /// Start both polling loops with the configured periods.
    pub fn start(&self) -> HealthMonitorHandle {
        self.start_with_periods(config::liveness_poll_period(), config::progress_poll_period())
    }

    /// Start both polling loops. The progress loop exits on its own once
    /// the store reports itself initialized; the liveness loop runs until
    /// the handle is stopped or dropped.
    pub fn start_with_periods(
        &self,
        liveness_period: Duration,
        progress_period: Duration,
    ) -> HealthMonitorHandle {
        tracing::info!(
            liveness_secs = liveness_period.as_secs(),
            progress_secs = progress_period.as_secs(),
            "Health monitor started"
        );

        let liveness_task = {
            let api = self.api.clone();
            let inner = self.inner.clone();
            tokio::spawn(async move {
                let mut ticker = tokio::time::interval(liveness_period);
                loop {
                    ticker.tick().await;
                    probe_liveness(api.as_ref(), &inner).await;
                }
            })
        };

        let progress_task = {
            let api = self.api.clone();
            let inner = self.inner.clone();
            tokio::spawn(async move {
                let mut ticker = tokio::time::interval(progress_period);
                loop {
                    ticker.tick().await;
                    if poll_initialization(api.as_ref(), &inner).await {
                        tracing::info!("Patient store initialized; progress poll stopping");
                        return;
                    }
                }
            })
        };

        HealthMonitorHandle {
            tasks: vec![liveness_task, progress_task],
        }
    }

    /// Probe immediately, outside the polling cadence. Does not reset the
    /// interval timers.
    pub async fn refresh(&self) {
        probe_liveness(self.api.as_ref(), &self.inner).await;
        poll_initialization(self.api.as_ref(), &self.inner).await;
    }
}

fn set_liveness(inner: &RwLock<MonitorInner>, next: ServiceHealth) {
    if let Ok(mut guard) = inner.write() {
        let previous = guard.liveness.replace(next);
        if previous != Some(next) {
            tracing::info!(from = %previous.unwrap_or(ServiceHealth::Unknown), to = %next, "Backend health changed");
        }
    }
}

async fn probe_liveness(api: &dyn HealthApi, inner: &RwLock<MonitorInner>) {
    set_liveness(inner, ServiceHealth::Checking);
    let next = match api.liveness().await {
        Ok(reply) if reply.is_alive() => ServiceHealth::Healthy,
        Ok(reply) => {
            tracing::warn!(status = %reply.status, "Backend alive but not healthy");
            ServiceHealth::Degraded
        }
        Err(e) => {
            tracing::warn!(error = %e, "Liveness probe failed");
            ServiceHealth::Unreachable
        }
    };
    set_liveness(inner, next);
    if let Ok(mut guard) = inner.write() {
        guard.checked_at = Some(Utc::now());
    }
}

/// Returns true once the store reports initialization complete.
async fn poll_initialization(api: &dyn HealthApi, inner: &RwLock<MonitorInner>) -> bool {
    match api.initialization_status().await {
        Ok(status) => {
            let done = status.is_initialized;
            tracing::debug!(
                initialized = status.is_initialized,
                loading = status.is_loading,
                files = status.progress.files_processed,
                "Initialization status"
            );
            if let Ok(mut guard) = inner.write() {
                guard.initialization = Some(status);
            }
            done
        }
        Err(e) => {
            tracing::debug!(error = %e, "Initialization status poll failed");
            false
        }
    }
}
