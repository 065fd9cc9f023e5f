//! Notification channels and per-binding alert dispatch
//!
//! A channel record names an alerting backend (webhook, log); the
//! [`AlertChannel`] trait is the capability the state machine needs:
//! raise an alert of some flavor and get back an opaque incident key, or
//! recover a previously raised one. Delivery is best-effort: failures are
//! logged and never interfere with the state transition that triggered
//! them.

use async_trait::async_trait;
use serde::Serialize;
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::database::Database;
use crate::errors::ChannelError;
use crate::jobs::AlertEffect;
use crate::models::{ChannelKind, Job, JobNotification, JobState, NotificationChannel};

/// Opaque handle identifying a raised alert on the backend
#[derive(Debug, Clone)]
pub struct AlertEvent {
    pub incident_key: String,
}

/// Capability exposed by every alerting backend
#[async_trait]
pub trait AlertChannel: Send + Sync {
    /// A scheduled start was missed
    async fn alert(&self, job: &Job) -> Result<AlertEvent, ChannelError>;
    /// A ping arrived outside the acceptance window
    async fn early_alert(&self, job: &Job) -> Result<AlertEvent, ChannelError>;
    /// A run exceeded its expected duration
    async fn late_alert(&self, job: &Job) -> Result<AlertEvent, ChannelError>;
    /// Close out a previously raised alert. The incident key may be absent
    /// (the alert never got raised, or raising it failed); backends must
    /// tolerate that.
    async fn recover(&self, job: &Job, incident_key: Option<&str>) -> Result<(), ChannelError>;
}

/// Build the backend for a channel record
pub fn build_channel(
    record: &NotificationChannel,
    http: reqwest::Client,
) -> Result<Box<dyn AlertChannel>, ChannelError> {
    match record.kind {
        ChannelKind::Webhook => {
            let url = record.value.clone().ok_or_else(|| {
                ChannelError::invalid_config(format!(
                    "webhook channel '{}' has no URL configured",
                    record.name
                ))
            })?;
            Ok(Box::new(WebhookChannel::new(url, http)))
        }
        ChannelKind::Log => Ok(Box::new(LogChannel::new(record.name.clone()))),
    }
}

#[derive(Debug, Serialize)]
struct WebhookEvent<'a> {
    event: &'a str,
    job: &'a str,
    public_id: &'a str,
    state: JobState,
    #[serde(skip_serializing_if = "Option::is_none")]
    incident_key: Option<&'a str>,
}

/// Posts JSON events to a configured URL. The response body may carry an
/// `incident_key` for later recovery; when it does not, one is generated
/// locally so the binding still tracks the outstanding alert.
pub struct WebhookChannel {
    url: String,
    client: reqwest::Client,
}

impl WebhookChannel {
    pub fn new(url: String, client: reqwest::Client) -> Self {
        Self { url, client }
    }

    async fn post_event(
        &self,
        event: &str,
        job: &Job,
        incident_key: Option<&str>,
    ) -> Result<AlertEvent, ChannelError> {
        let payload = WebhookEvent {
            event,
            job: &job.name,
            public_id: &job.public_id,
            state: job.state,
            incident_key,
        };
        let response = self.client.post(&self.url).json(&payload).send().await?;
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(ChannelError::rejected(status.as_u16(), body));
        }

        let incident_key = response
            .json::<serde_json::Value>()
            .await
            .ok()
            .and_then(|body| {
                body.get("incident_key")
                    .and_then(|k| k.as_str())
                    .map(str::to_string)
            })
            .unwrap_or_else(generate_incident_key);

        Ok(AlertEvent { incident_key })
    }
}

#[async_trait]
impl AlertChannel for WebhookChannel {
    async fn alert(&self, job: &Job) -> Result<AlertEvent, ChannelError> {
        self.post_event("alert", job, None).await
    }

    async fn early_alert(&self, job: &Job) -> Result<AlertEvent, ChannelError> {
        self.post_event("early_alert", job, None).await
    }

    async fn late_alert(&self, job: &Job) -> Result<AlertEvent, ChannelError> {
        self.post_event("late_alert", job, None).await
    }

    async fn recover(&self, job: &Job, incident_key: Option<&str>) -> Result<(), ChannelError> {
        self.post_event("recover", job, incident_key).await?;
        Ok(())
    }
}

/// Emits events through the process log. Useful for development and as a
/// subscription target in tests; incident keys are fabricated locally.
pub struct LogChannel {
    name: String,
}

impl LogChannel {
    pub fn new(name: String) -> Self {
        Self { name }
    }
}

#[async_trait]
impl AlertChannel for LogChannel {
    async fn alert(&self, job: &Job) -> Result<AlertEvent, ChannelError> {
        warn!(channel = %self.name, job = %job.name, "job missed its scheduled start");
        Ok(AlertEvent {
            incident_key: generate_incident_key(),
        })
    }

    async fn early_alert(&self, job: &Job) -> Result<AlertEvent, ChannelError> {
        warn!(channel = %self.name, job = %job.name, "job pinged ahead of schedule");
        Ok(AlertEvent {
            incident_key: generate_incident_key(),
        })
    }

    async fn late_alert(&self, job: &Job) -> Result<AlertEvent, ChannelError> {
        warn!(channel = %self.name, job = %job.name, "job run exceeded its expected duration");
        Ok(AlertEvent {
            incident_key: generate_incident_key(),
        })
    }

    async fn recover(&self, job: &Job, incident_key: Option<&str>) -> Result<(), ChannelError> {
        info!(
            channel = %self.name,
            job = %job.name,
            incident_key = incident_key.unwrap_or("none"),
            "job recovered"
        );
        Ok(())
    }
}

fn generate_incident_key() -> String {
    Uuid::new_v4().simple().to_string()
}

/// Fans a transition's alert effect out to every binding of a job.
///
/// Raising an alert stores the returned incident key on the binding;
/// recovery hands the stored key back to the backend and then clears it
/// unconditionally, even when the backend call failed. Channel failures
/// never propagate to the caller.
#[derive(Clone)]
pub struct NotificationDispatcher {
    database: Database,
    http: reqwest::Client,
}

impl NotificationDispatcher {
    pub fn new(database: Database) -> Self {
        Self {
            database,
            http: reqwest::Client::new(),
        }
    }

    pub async fn dispatch(&self, job: &Job, effect: AlertEffect) {
        let bindings = match self.database.bindings_for_job(job.id).await {
            Ok(bindings) => bindings,
            Err(e) => {
                error!("Failed to load bindings for job '{}': {}", job.name, e);
                return;
            }
        };

        for binding in bindings {
            let record = match self.database.get_channel(binding.channel_id).await {
                Ok(Some(record)) => record,
                Ok(None) => {
                    warn!(
                        "Binding {} references missing channel {}",
                        binding.id, binding.channel_id
                    );
                    continue;
                }
                Err(e) => {
                    error!("Failed to load channel {}: {}", binding.channel_id, e);
                    continue;
                }
            };

            let backend = match build_channel(&record, self.http.clone()) {
                Ok(backend) => backend,
                Err(e) => {
                    error!("Channel '{}' is unusable: {}", record.name, e);
                    continue;
                }
            };

            match effect {
                AlertEffect::Recover => {
                    self.recover(job, &binding, &record, backend.as_ref()).await
                }
                _ => {
                    self.raise(job, &binding, &record, backend.as_ref(), effect)
                        .await
                }
            }
        }
    }

    async fn raise(
        &self,
        job: &Job,
        binding: &JobNotification,
        record: &NotificationChannel,
        backend: &dyn AlertChannel,
        effect: AlertEffect,
    ) {
        let result = match effect {
            AlertEffect::Alert => backend.alert(job).await,
            AlertEffect::EarlyAlert => backend.early_alert(job).await,
            AlertEffect::LateAlert => backend.late_alert(job).await,
            AlertEffect::Recover => return,
        };

        match result {
            Ok(event) => {
                if let Err(e) = self
                    .database
                    .set_last_event_key(binding.id, Some(&event.incident_key))
                    .await
                {
                    error!(
                        "Failed to store incident key for job '{}' on channel '{}': {}",
                        job.name, record.name, e
                    );
                }
            }
            Err(e) => {
                error!(
                    "Alert delivery failed for job '{}' on channel '{}': {}",
                    job.name, record.name, e
                );
            }
        }
    }

    async fn recover(
        &self,
        job: &Job,
        binding: &JobNotification,
        record: &NotificationChannel,
        backend: &dyn AlertChannel,
    ) {
        if let Err(e) = backend
            .recover(job, binding.last_event_key.as_deref())
            .await
        {
            error!(
                "Recover delivery failed for job '{}' on channel '{}': {}",
                job.name, record.name, e
            );
        }

        // Cleared even when the backend call failed; a stale key must not
        // survive past the incident it belonged to
        if let Err(e) = self.database.set_last_event_key(binding.id, None).await {
            error!(
                "Failed to clear incident key for job '{}' on channel '{}': {}",
                job.name, record.name, e
            );
        }
    }
}
