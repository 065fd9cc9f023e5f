//! Monitor service: the operations the transport layer calls.
//!
//! Owns job and channel CRUD, the ping entry points, and subscription
//! management. Lifecycle transitions are computed on the in-memory job and
//! applied with a guarded update keyed on the state the computation
//! observed, so a ping and a concurrent sweep can never both win on the
//! same job. Notification dispatch happens only after the row update
//! sticks.

use chrono::{DateTime, Utc};
use tracing::{debug, info};
use uuid::Uuid;

use crate::database::Database;
use crate::errors::{AppError, AppResult};
use crate::jobs::AlertEffect;
use crate::models::{
    ChannelCreateRequest, ChannelKind, Job, JobCreateRequest, JobNotification, JobState,
    JobUpdateRequest, NotificationChannel, PingResponse,
};
use crate::notifications::NotificationDispatcher;
use crate::scheduling;
use crate::utils;

/// Attempts before giving up on a transition that keeps losing the
/// optimistic-update race
const TRANSITION_RETRIES: usize = 3;

#[derive(Clone)]
pub struct MonitorService {
    database: Database,
    notifier: NotificationDispatcher,
}

impl MonitorService {
    pub fn new(database: Database) -> Self {
        let notifier = NotificationDispatcher::new(database.clone());
        Self { database, notifier }
    }

    // --- job CRUD -------------------------------------------------------

    pub async fn create_job(&self, request: JobCreateRequest) -> AppResult<Job> {
        let name = request.name.trim().to_string();
        if name.is_empty() {
            return Err(AppError::validation("job name must not be empty"));
        }
        if request.expected_run_time_secs <= 0 {
            return Err(AppError::validation(
                "expected_run_time_secs must be positive",
            ));
        }
        if let Some(buffer) = request.buffer_time_secs {
            if buffer < 0 {
                return Err(AppError::validation("buffer_time_secs must not be negative"));
            }
        }
        scheduling::validate(&request.schedule)?;

        let now = Utc::now();
        let job = Job {
            id: Uuid::new_v4(),
            name,
            public_id: self.issue_public_id().await?,
            next_scheduled_time: scheduling::next_occurrence(&request.schedule, now)?,
            schedule: request.schedule,
            expected_run_time_secs: request.expected_run_time_secs,
            buffer_time_secs: request.buffer_time_secs,
            last_successful_time: None,
            state: JobState::Ready,
            created_at: now,
            updated_at: now,
        };

        self.database
            .create_job(&job)
            .await
            .map_err(|e| AppError::storage("create_job", e))?;

        info!("Created job '{}' ({})", job.name, job.public_id);
        Ok(job)
    }

    /// Rename and/or reschedule a job. The schedule kind is fixed at
    /// creation; changing the carried value resets the job to `ready` with
    /// a freshly computed next occurrence.
    pub async fn update_job(&self, id: Uuid, request: JobUpdateRequest) -> AppResult<Job> {
        let mut job = self.fetch_job(id).await?;

        let name = request.name.trim().to_string();
        if name.is_empty() {
            return Err(AppError::validation("job name must not be empty"));
        }
        if request.expected_run_time_secs <= 0 {
            return Err(AppError::validation(
                "expected_run_time_secs must be positive",
            ));
        }
        if let Some(buffer) = request.buffer_time_secs {
            if buffer < 0 {
                return Err(AppError::validation("buffer_time_secs must not be negative"));
            }
        }
        if request.schedule.kind() != job.schedule.kind() {
            return Err(AppError::validation(format!(
                "schedule kind is immutable: job is {}, request is {}",
                job.schedule.kind(),
                request.schedule.kind()
            )));
        }
        scheduling::validate(&request.schedule)?;

        let now = Utc::now();
        job.name = name;
        job.expected_run_time_secs = request.expected_run_time_secs;
        job.buffer_time_secs = request.buffer_time_secs;
        if request.schedule != job.schedule {
            job.schedule = request.schedule;
            job.state = JobState::Ready;
            job.next_scheduled_time = scheduling::next_occurrence(&job.schedule, now)?;
        }
        job.updated_at = now;

        self.database
            .update_job(&job)
            .await
            .map_err(|e| AppError::storage("update_job", e))?;

        Ok(job)
    }

    pub async fn get_job(&self, id: Uuid) -> AppResult<Job> {
        self.fetch_job(id).await
    }

    pub async fn list_jobs(&self) -> AppResult<Vec<Job>> {
        self.database
            .list_jobs()
            .await
            .map_err(|e| AppError::storage("list_jobs", e))
    }

    pub async fn delete_job(&self, id: Uuid) -> AppResult<()> {
        let deleted = self
            .database
            .delete_job(id)
            .await
            .map_err(|e| AppError::storage("delete_job", e))?;
        if !deleted {
            return Err(AppError::not_found("job", id.to_string()));
        }
        info!("Deleted job {}", id);
        Ok(())
    }

    // --- ping entry points ----------------------------------------------

    pub async fn ping_start(&self, public_id: &str) -> AppResult<PingResponse> {
        self.ping_start_at(public_id, Utc::now()).await
    }

    /// A run has begun. Applies the ready/active/expired rows of the
    /// lifecycle table.
    pub async fn ping_start_at(
        &self,
        public_id: &str,
        now: DateTime<Utc>,
    ) -> AppResult<PingResponse> {
        for _ in 0..TRANSITION_RETRIES {
            let mut job = self.fetch_job_by_public_id(public_id).await?;
            let observed = job.state;
            let effect = job.ping_start(now)?;

            if effect == Some(AlertEffect::EarlyAlert) {
                // Outside the acceptance window: the job is left untouched,
                // only the caller gets flagged
                self.notifier.dispatch(&job, AlertEffect::EarlyAlert).await;
                return Ok(ping_response(&job, false));
            }

            job.updated_at = now;
            let applied = self
                .database
                .update_job_guarded(observed, &job)
                .await
                .map_err(|e| AppError::storage("ping_start", e))?;
            if applied {
                if let Some(effect) = effect {
                    self.notifier.dispatch(&job, effect).await;
                }
                return Ok(ping_response(&job, true));
            }

            debug!(
                "ping-start on '{}' lost a transition race, retrying",
                job.name
            );
        }

        Err(AppError::internal(format!(
            "job '{public_id}' kept changing concurrently"
        )))
    }

    pub async fn ping_end(&self, public_id: &str) -> AppResult<PingResponse> {
        self.ping_end_at(public_id, Utc::now()).await
    }

    /// A run has completed. Applies the running/hung rows of the lifecycle
    /// table.
    pub async fn ping_end_at(
        &self,
        public_id: &str,
        now: DateTime<Utc>,
    ) -> AppResult<PingResponse> {
        for _ in 0..TRANSITION_RETRIES {
            let mut job = self.fetch_job_by_public_id(public_id).await?;
            let observed = job.state;
            let effect = job.ping_end(now)?;

            job.updated_at = now;
            let applied = self
                .database
                .update_job_guarded(observed, &job)
                .await
                .map_err(|e| AppError::storage("ping_end", e))?;
            if applied {
                if let Some(effect) = effect {
                    self.notifier.dispatch(&job, effect).await;
                }
                return Ok(ping_response(&job, true));
            }

            debug!("ping-end on '{}' lost a transition race, retrying", job.name);
        }

        Err(AppError::internal(format!(
            "job '{public_id}' kept changing concurrently"
        )))
    }

    // --- operator escape hatches ----------------------------------------

    /// Put the job straight into `running`, bypassing the timing guard.
    pub async fn force_run(&self, id: Uuid) -> AppResult<Job> {
        let mut job = self.fetch_job(id).await?;
        let now = Utc::now();
        job.force_run(now)?;
        job.updated_at = now;
        self.database
            .update_job(&job)
            .await
            .map_err(|e| AppError::storage("force_run", e))?;
        Ok(job)
    }

    /// Put the job into `active` with an imminent next occurrence,
    /// bypassing the timing guard.
    pub async fn force_active(&self, id: Uuid) -> AppResult<Job> {
        let mut job = self.fetch_job(id).await?;
        let now = Utc::now();
        job.force_active(now)?;
        job.updated_at = now;
        self.database
            .update_job(&job)
            .await
            .map_err(|e| AppError::storage("force_active", e))?;
        Ok(job)
    }

    // --- channels and subscriptions -------------------------------------

    pub async fn create_channel(
        &self,
        request: ChannelCreateRequest,
    ) -> AppResult<NotificationChannel> {
        let name = request.name.trim().to_string();
        if name.is_empty() {
            return Err(AppError::validation("channel name must not be empty"));
        }
        if request.kind == ChannelKind::Webhook {
            match request.value.as_deref() {
                Some(url) if url.starts_with("http://") || url.starts_with("https://") => {}
                _ => {
                    return Err(AppError::validation(
                        "webhook channels require an http(s) URL value",
                    ))
                }
            }
        }

        let now = Utc::now();
        let channel = NotificationChannel {
            id: Uuid::new_v4(),
            name,
            kind: request.kind,
            value: request.value,
            created_at: now,
            updated_at: now,
        };

        self.database
            .create_channel(&channel)
            .await
            .map_err(|e| AppError::storage("create_channel", e))?;

        info!("Created {} channel '{}'", channel.kind, channel.name);
        Ok(channel)
    }

    pub async fn list_channels(&self) -> AppResult<Vec<NotificationChannel>> {
        self.database
            .list_channels()
            .await
            .map_err(|e| AppError::storage("list_channels", e))
    }

    pub async fn delete_channel(&self, id: Uuid) -> AppResult<()> {
        let deleted = self
            .database
            .delete_channel(id)
            .await
            .map_err(|e| AppError::storage("delete_channel", e))?;
        if !deleted {
            return Err(AppError::not_found("channel", id.to_string()));
        }
        Ok(())
    }

    /// Subscribe a channel to a job. Idempotent: an existing binding is
    /// returned as-is.
    pub async fn subscribe(&self, job_id: Uuid, channel_id: Uuid) -> AppResult<JobNotification> {
        let job = self.fetch_job(job_id).await?;
        let channel = self
            .database
            .get_channel(channel_id)
            .await
            .map_err(|e| AppError::storage("get_channel", e))?
            .ok_or_else(|| AppError::not_found("channel", channel_id.to_string()))?;

        if let Some(existing) = self
            .database
            .get_binding(job_id, channel_id)
            .await
            .map_err(|e| AppError::storage("get_binding", e))?
        {
            return Ok(existing);
        }

        let binding = JobNotification {
            id: Uuid::new_v4(),
            job_id,
            channel_id,
            last_event_key: None,
            created_at: Utc::now(),
        };
        self.database
            .create_binding(&binding)
            .await
            .map_err(|e| AppError::storage("create_binding", e))?;

        info!(
            "Subscribed channel '{}' to job '{}'",
            channel.name, job.name
        );
        Ok(binding)
    }

    pub async fn unsubscribe(&self, job_id: Uuid, channel_id: Uuid) -> AppResult<()> {
        let deleted = self
            .database
            .delete_binding(job_id, channel_id)
            .await
            .map_err(|e| AppError::storage("delete_binding", e))?;
        if !deleted {
            return Err(AppError::not_found(
                "subscription",
                format!("{job_id}/{channel_id}"),
            ));
        }
        Ok(())
    }

    // --- internals -------------------------------------------------------

    async fn fetch_job(&self, id: Uuid) -> AppResult<Job> {
        self.database
            .get_job(id)
            .await
            .map_err(|e| AppError::storage("get_job", e))?
            .ok_or_else(|| AppError::not_found("job", id.to_string()))
    }

    async fn fetch_job_by_public_id(&self, public_id: &str) -> AppResult<Job> {
        self.database
            .get_job_by_public_id(public_id)
            .await
            .map_err(|e| AppError::storage("get_job_by_public_id", e))?
            .ok_or_else(|| AppError::not_found("job", public_id))
    }

    /// Issue a fresh ping token, retrying until it does not collide with an
    /// existing job.
    async fn issue_public_id(&self) -> AppResult<String> {
        loop {
            let candidate = utils::generate_public_id();
            let taken = self
                .database
                .public_id_exists(&candidate)
                .await
                .map_err(|e| AppError::storage("public_id_exists", e))?;
            if !taken {
                return Ok(candidate);
            }
        }
    }
}

fn ping_response(job: &Job, accepted: bool) -> PingResponse {
    PingResponse {
        public_id: job.public_id.clone(),
        name: job.name.clone(),
        state: job.state,
        next_scheduled_time: job.next_scheduled_time,
        accepted,
    }
}
