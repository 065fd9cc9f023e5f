use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Lifecycle state of a monitored job.
///
/// Every job is in exactly one of these states; transitions between them
/// happen only through the methods in [`crate::jobs`].
#[derive(Debug, Clone, Copy, Serialize, Deserialize, sqlx::Type, PartialEq, Eq)]
#[sqlx(type_name = "job_state", rename_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum JobState {
    /// Never successfully pinged, or freshly rescheduled
    Ready,
    /// Last run completed, awaiting the next scheduled start
    Active,
    /// A run is currently in progress
    Running,
    /// A scheduled start was missed
    Expired,
    /// A run exceeded its expected duration
    Hung,
}

impl JobState {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobState::Ready => "ready",
            JobState::Active => "active",
            JobState::Running => "running",
            JobState::Expired => "expired",
            JobState::Hung => "hung",
        }
    }

    pub fn parse(value: &str) -> Option<JobState> {
        match value {
            "ready" => Some(JobState::Ready),
            "active" => Some(JobState::Active),
            "running" => Some(JobState::Running),
            "expired" => Some(JobState::Expired),
            "hung" => Some(JobState::Hung),
            _ => None,
        }
    }
}

impl std::fmt::Display for JobState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Schedule specification for a job. The kind is fixed at creation; the
/// carried value may be changed later (rescheduling).
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum ScheduleSpec {
    /// Fixed interval between expected run starts
    Interval { seconds: i64 },
    /// 5- or 6-field cron expression
    Cron { expression: String },
}

impl ScheduleSpec {
    pub fn kind(&self) -> &'static str {
        match self {
            ScheduleSpec::Interval { .. } => "interval",
            ScheduleSpec::Cron { .. } => "cron",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Job {
    pub id: Uuid,
    pub name: String,
    /// Short random token addressing the ping endpoints; issued once at
    /// creation and never reassigned
    pub public_id: String,
    pub schedule: ScheduleSpec,
    pub expected_run_time_secs: i64,
    pub buffer_time_secs: Option<i64>,
    pub last_successful_time: Option<DateTime<Utc>>,
    pub next_scheduled_time: DateTime<Utc>,
    pub state: JobState,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Kind of alerting backend behind a notification channel record
#[derive(Debug, Clone, Copy, Serialize, Deserialize, sqlx::Type, PartialEq, Eq)]
#[sqlx(type_name = "channel_kind", rename_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum ChannelKind {
    Webhook,
    Log,
}

impl ChannelKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ChannelKind::Webhook => "webhook",
            ChannelKind::Log => "log",
        }
    }

    pub fn parse(value: &str) -> Option<ChannelKind> {
        match value {
            "webhook" => Some(ChannelKind::Webhook),
            "log" => Some(ChannelKind::Log),
            _ => None,
        }
    }
}

impl std::fmt::Display for ChannelKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NotificationChannel {
    pub id: Uuid,
    pub name: String,
    pub kind: ChannelKind,
    /// Backend-specific target, e.g. the webhook URL
    pub value: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Binding between a job and a notification channel. Carries the incident
/// key of the last raised alert until the matching recovery clears it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobNotification {
    pub id: Uuid,
    pub job_id: Uuid,
    pub channel_id: Uuid,
    pub last_event_key: Option<String>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobCreateRequest {
    pub name: String,
    pub schedule: ScheduleSpec,
    pub expected_run_time_secs: i64,
    pub buffer_time_secs: Option<i64>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobUpdateRequest {
    pub name: String,
    pub schedule: ScheduleSpec,
    pub expected_run_time_secs: i64,
    pub buffer_time_secs: Option<i64>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChannelCreateRequest {
    pub name: String,
    pub kind: ChannelKind,
    pub value: Option<String>,
}

/// Response returned by the ping endpoints
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PingResponse {
    pub public_id: String,
    pub name: String,
    pub state: JobState,
    pub next_scheduled_time: DateTime<Utc>,
    /// False when a ping-start arrived outside the acceptance window and
    /// was flagged early instead of starting a run
    pub accepted: bool,
}

/// Result of one sweep pass across all jobs
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SweepSummary {
    pub jobs_checked: usize,
    pub expired: usize,
    pub hung: usize,
    pub failed: usize,
}
