//! Expiry/hang sweeper
//!
//! Periodically scans every persisted job for two conditions the pings
//! alone cannot surface: an `active` job whose scheduled start never came,
//! and a `running` job whose run never ended. Each job is evaluated in
//! isolation; one bad record never aborts the pass. The service holds no
//! timer of its own beyond the loop in [`SweeperService::start`], and a
//! single pass can equally be driven externally through
//! [`SweeperService::sweep`].

use anyhow::Result;
use chrono::{DateTime, Utc};
use std::time::Duration;
use tokio::time::interval;
use tracing::{debug, error, info};

use crate::database::Database;
use crate::errors::{AppError, AppResult};
use crate::jobs::AlertEffect;
use crate::models::{Job, SweepSummary};
use crate::notifications::NotificationDispatcher;

#[derive(Clone)]
pub struct SweeperService {
    database: Database,
    notifier: NotificationDispatcher,
    sweep_interval: Duration,
}

impl SweeperService {
    pub fn new(database: Database, sweep_interval: Duration) -> Self {
        let notifier = NotificationDispatcher::new(database.clone());
        Self {
            database,
            notifier,
            sweep_interval,
        }
    }

    /// Run sweeps on a fixed cadence until the task is dropped.
    pub async fn start(self) -> Result<()> {
        info!(
            "Starting sweeper service (interval: {}s)",
            self.sweep_interval.as_secs()
        );

        let mut interval = interval(self.sweep_interval);

        loop {
            interval.tick().await;
            match self.sweep().await {
                Ok(summary) => {
                    if summary.expired > 0 || summary.hung > 0 || summary.failed > 0 {
                        info!(
                            "Sweep pass: {} jobs checked, {} expired, {} hung, {} failed",
                            summary.jobs_checked, summary.expired, summary.hung, summary.failed
                        );
                    } else {
                        debug!("Sweep pass: {} jobs checked, all on time", summary.jobs_checked);
                    }
                }
                Err(e) => error!("Sweep pass failed: {}", e),
            }
        }
    }

    /// One sweep pass at the current time.
    pub async fn sweep(&self) -> AppResult<SweepSummary> {
        self.check_expired_jobs(Utc::now()).await
    }

    /// One sweep pass at an explicit reference time.
    pub async fn check_expired_jobs(&self, now: DateTime<Utc>) -> AppResult<SweepSummary> {
        let jobs = self
            .database
            .list_jobs()
            .await
            .map_err(|e| AppError::storage("list_jobs", e))?;

        let mut summary = SweepSummary {
            jobs_checked: jobs.len(),
            ..Default::default()
        };

        for job in jobs {
            let name = job.name.clone();
            match self.sweep_job(job, now).await {
                Ok(Some(AlertEffect::Alert)) => summary.expired += 1,
                Ok(Some(AlertEffect::LateAlert)) => summary.hung += 1,
                Ok(_) => {}
                Err(e) => {
                    summary.failed += 1;
                    error!("Sweep failed for job '{}': {}", name, e);
                }
            }
        }

        Ok(summary)
    }

    async fn sweep_job(&self, mut job: Job, now: DateTime<Utc>) -> AppResult<Option<AlertEffect>> {
        let observed = job.state;

        // Stuck-run check, then missed-start check; the guards are
        // state-disjoint so at most one applies
        if let Some(effect) = job.runtime_exceeded(now) {
            job.updated_at = now;
            let applied = self
                .database
                .update_job_guarded(observed, &job)
                .await
                .map_err(|e| AppError::storage("runtime_exceeded", e))?;
            if !applied {
                debug!("'{}' changed state mid-sweep, skipping", job.name);
                return Ok(None);
            }
            info!("'{}' exceeded its expected run time", job.name);
            self.notifier.dispatch(&job, effect).await;
            return Ok(Some(effect));
        }

        if let Some(effect) = job.time_passed(now)? {
            job.updated_at = now;
            let applied = self
                .database
                .update_job_guarded(observed, &job)
                .await
                .map_err(|e| AppError::storage("time_passed", e))?;
            if !applied {
                debug!("'{}' changed state mid-sweep, skipping", job.name);
                return Ok(None);
            }
            info!("'{}' never ran", job.name);
            self.notifier.dispatch(&job, effect).await;
            return Ok(Some(effect));
        }

        Ok(None)
    }
}
