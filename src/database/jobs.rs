//! Job persistence: row mapping, CRUD, and the guarded state update that
//! backs the per-job optimistic locking discipline.

use anyhow::{anyhow, Result};
use sqlx::sqlite::SqliteRow;
use sqlx::Row;
use uuid::Uuid;

use super::Database;
use crate::models::{Job, JobState, ScheduleSpec};

const JOB_COLUMNS: &str = "id, name, public_id, schedule_kind, frequency_secs, cron_expression, \
     expected_run_time_secs, buffer_time_secs, last_successful_time, next_scheduled_time, \
     state, created_at, updated_at";

fn job_from_row(row: &SqliteRow) -> Result<Job> {
    let schedule_kind: String = row.get("schedule_kind");
    let schedule = match schedule_kind.as_str() {
        "interval" => {
            let seconds: Option<i64> = row.get("frequency_secs");
            ScheduleSpec::Interval {
                seconds: seconds.ok_or_else(|| anyhow!("interval job missing frequency_secs"))?,
            }
        }
        "cron" => {
            let expression: Option<String> = row.get("cron_expression");
            ScheduleSpec::Cron {
                expression: expression
                    .ok_or_else(|| anyhow!("cron job missing cron_expression"))?,
            }
        }
        other => return Err(anyhow!("unknown schedule kind '{}'", other)),
    };

    let state: String = row.get("state");
    let state =
        JobState::parse(&state).ok_or_else(|| anyhow!("unknown job state '{}'", state))?;

    Ok(Job {
        id: Uuid::parse_str(&row.get::<String, _>("id"))?,
        name: row.get("name"),
        public_id: row.get("public_id"),
        schedule,
        expected_run_time_secs: row.get("expected_run_time_secs"),
        buffer_time_secs: row.get("buffer_time_secs"),
        last_successful_time: row.get("last_successful_time"),
        next_scheduled_time: row.get("next_scheduled_time"),
        state,
        created_at: row.get("created_at"),
        updated_at: row.get("updated_at"),
    })
}

fn schedule_columns(schedule: &ScheduleSpec) -> (&'static str, Option<i64>, Option<&str>) {
    match schedule {
        ScheduleSpec::Interval { seconds } => ("interval", Some(*seconds), None),
        ScheduleSpec::Cron { expression } => ("cron", None, Some(expression.as_str())),
    }
}

impl Database {
    pub async fn create_job(&self, job: &Job) -> Result<()> {
        let (kind, frequency, cron_expression) = schedule_columns(&job.schedule);
        sqlx::query(
            "INSERT INTO jobs (id, name, public_id, schedule_kind, frequency_secs, cron_expression, \
             expected_run_time_secs, buffer_time_secs, last_successful_time, next_scheduled_time, \
             state, created_at, updated_at)
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(job.id.to_string())
        .bind(&job.name)
        .bind(&job.public_id)
        .bind(kind)
        .bind(frequency)
        .bind(cron_expression)
        .bind(job.expected_run_time_secs)
        .bind(job.buffer_time_secs)
        .bind(job.last_successful_time)
        .bind(job.next_scheduled_time)
        .bind(job.state.as_str())
        .bind(job.created_at)
        .bind(job.updated_at)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    pub async fn get_job(&self, id: Uuid) -> Result<Option<Job>> {
        let row = sqlx::query(&format!("SELECT {JOB_COLUMNS} FROM jobs WHERE id = ?"))
            .bind(id.to_string())
            .fetch_optional(&self.pool)
            .await?;

        row.map(|row| job_from_row(&row)).transpose()
    }

    pub async fn get_job_by_public_id(&self, public_id: &str) -> Result<Option<Job>> {
        let row = sqlx::query(&format!(
            "SELECT {JOB_COLUMNS} FROM jobs WHERE public_id = ?"
        ))
        .bind(public_id)
        .fetch_optional(&self.pool)
        .await?;

        row.map(|row| job_from_row(&row)).transpose()
    }

    pub async fn list_jobs(&self) -> Result<Vec<Job>> {
        let rows = sqlx::query(&format!("SELECT {JOB_COLUMNS} FROM jobs ORDER BY name"))
            .fetch_all(&self.pool)
            .await?;

        rows.iter().map(job_from_row).collect()
    }

    /// Unconditional full update; used by operator escape hatches and
    /// non-lifecycle edits
    pub async fn update_job(&self, job: &Job) -> Result<bool> {
        let (kind, frequency, cron_expression) = schedule_columns(&job.schedule);
        let result = sqlx::query(
            "UPDATE jobs SET name = ?, schedule_kind = ?, frequency_secs = ?, cron_expression = ?, \
             expected_run_time_secs = ?, buffer_time_secs = ?, last_successful_time = ?, \
             next_scheduled_time = ?, state = ?, updated_at = ?
             WHERE id = ?",
        )
        .bind(&job.name)
        .bind(kind)
        .bind(frequency)
        .bind(cron_expression)
        .bind(job.expected_run_time_secs)
        .bind(job.buffer_time_secs)
        .bind(job.last_successful_time)
        .bind(job.next_scheduled_time)
        .bind(job.state.as_str())
        .bind(job.updated_at)
        .bind(job.id.to_string())
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() > 0)
    }

    /// Optimistic per-row update for lifecycle transitions: applies only if
    /// the stored state still matches the one the transition was computed
    /// from. Returns false when a concurrent transition won the race.
    pub async fn update_job_guarded(&self, observed_state: JobState, job: &Job) -> Result<bool> {
        let result = sqlx::query(
            "UPDATE jobs SET last_successful_time = ?, next_scheduled_time = ?, state = ?, \
             updated_at = ?
             WHERE id = ? AND state = ?",
        )
        .bind(job.last_successful_time)
        .bind(job.next_scheduled_time)
        .bind(job.state.as_str())
        .bind(job.updated_at)
        .bind(job.id.to_string())
        .bind(observed_state.as_str())
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() > 0)
    }

    /// Deletes a job and its notification bindings; no orphan bindings
    pub async fn delete_job(&self, id: Uuid) -> Result<bool> {
        sqlx::query("DELETE FROM job_notifications WHERE job_id = ?")
            .bind(id.to_string())
            .execute(&self.pool)
            .await?;

        let result = sqlx::query("DELETE FROM jobs WHERE id = ?")
            .bind(id.to_string())
            .execute(&self.pool)
            .await?;

        Ok(result.rows_affected() > 0)
    }

    pub async fn public_id_exists(&self, public_id: &str) -> Result<bool> {
        let count = sqlx::query_scalar::<_, i64>("SELECT COUNT(*) FROM jobs WHERE public_id = ?")
            .bind(public_id)
            .fetch_one(&self.pool)
            .await?;

        Ok(count > 0)
    }
}
