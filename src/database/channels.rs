//! Notification channel and job binding persistence.

use anyhow::{anyhow, Result};
use sqlx::sqlite::SqliteRow;
use sqlx::Row;
use uuid::Uuid;

use super::Database;
use crate::models::{ChannelKind, JobNotification, NotificationChannel};

fn channel_from_row(row: &SqliteRow) -> Result<NotificationChannel> {
    let kind: String = row.get("kind");
    let kind =
        ChannelKind::parse(&kind).ok_or_else(|| anyhow!("unknown channel kind '{}'", kind))?;

    Ok(NotificationChannel {
        id: Uuid::parse_str(&row.get::<String, _>("id"))?,
        name: row.get("name"),
        kind,
        value: row.get("value"),
        created_at: row.get("created_at"),
        updated_at: row.get("updated_at"),
    })
}

fn binding_from_row(row: &SqliteRow) -> Result<JobNotification> {
    Ok(JobNotification {
        id: Uuid::parse_str(&row.get::<String, _>("id"))?,
        job_id: Uuid::parse_str(&row.get::<String, _>("job_id"))?,
        channel_id: Uuid::parse_str(&row.get::<String, _>("channel_id"))?,
        last_event_key: row.get("last_event_key"),
        created_at: row.get("created_at"),
    })
}

impl Database {
    pub async fn create_channel(&self, channel: &NotificationChannel) -> Result<()> {
        sqlx::query(
            "INSERT INTO notification_channels (id, name, kind, value, created_at, updated_at)
             VALUES (?, ?, ?, ?, ?, ?)",
        )
        .bind(channel.id.to_string())
        .bind(&channel.name)
        .bind(channel.kind.as_str())
        .bind(&channel.value)
        .bind(channel.created_at)
        .bind(channel.updated_at)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    pub async fn get_channel(&self, id: Uuid) -> Result<Option<NotificationChannel>> {
        let row = sqlx::query(
            "SELECT id, name, kind, value, created_at, updated_at
             FROM notification_channels WHERE id = ?",
        )
        .bind(id.to_string())
        .fetch_optional(&self.pool)
        .await?;

        row.map(|row| channel_from_row(&row)).transpose()
    }

    pub async fn list_channels(&self) -> Result<Vec<NotificationChannel>> {
        let rows = sqlx::query(
            "SELECT id, name, kind, value, created_at, updated_at
             FROM notification_channels ORDER BY name",
        )
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(channel_from_row).collect()
    }

    /// Deletes a channel and every binding that references it
    pub async fn delete_channel(&self, id: Uuid) -> Result<bool> {
        sqlx::query("DELETE FROM job_notifications WHERE channel_id = ?")
            .bind(id.to_string())
            .execute(&self.pool)
            .await?;

        let result = sqlx::query("DELETE FROM notification_channels WHERE id = ?")
            .bind(id.to_string())
            .execute(&self.pool)
            .await?;

        Ok(result.rows_affected() > 0)
    }

    pub async fn create_binding(&self, binding: &JobNotification) -> Result<()> {
        sqlx::query(
            "INSERT INTO job_notifications (id, job_id, channel_id, last_event_key, created_at)
             VALUES (?, ?, ?, ?, ?)",
        )
        .bind(binding.id.to_string())
        .bind(binding.job_id.to_string())
        .bind(binding.channel_id.to_string())
        .bind(&binding.last_event_key)
        .bind(binding.created_at)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    pub async fn get_binding(
        &self,
        job_id: Uuid,
        channel_id: Uuid,
    ) -> Result<Option<JobNotification>> {
        let row = sqlx::query(
            "SELECT id, job_id, channel_id, last_event_key, created_at
             FROM job_notifications WHERE job_id = ? AND channel_id = ?",
        )
        .bind(job_id.to_string())
        .bind(channel_id.to_string())
        .fetch_optional(&self.pool)
        .await?;

        row.map(|row| binding_from_row(&row)).transpose()
    }

    pub async fn delete_binding(&self, job_id: Uuid, channel_id: Uuid) -> Result<bool> {
        let result =
            sqlx::query("DELETE FROM job_notifications WHERE job_id = ? AND channel_id = ?")
                .bind(job_id.to_string())
                .bind(channel_id.to_string())
                .execute(&self.pool)
                .await?;

        Ok(result.rows_affected() > 0)
    }

    pub async fn bindings_for_job(&self, job_id: Uuid) -> Result<Vec<JobNotification>> {
        let rows = sqlx::query(
            "SELECT id, job_id, channel_id, last_event_key, created_at
             FROM job_notifications WHERE job_id = ?",
        )
        .bind(job_id.to_string())
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(binding_from_row).collect()
    }

    pub async fn set_last_event_key(&self, binding_id: Uuid, key: Option<&str>) -> Result<()> {
        sqlx::query("UPDATE job_notifications SET last_event_key = ? WHERE id = ?")
            .bind(key)
            .bind(binding_id.to_string())
            .execute(&self.pool)
            .await?;

        Ok(())
    }
}
