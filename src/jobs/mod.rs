//! Job lifecycle state machine
//!
//! A job moves between `ready`, `active`, `running`, `expired` and `hung`
//! in response to pings from the monitored task and time-based checks from
//! the sweeper. The methods here mutate the job in memory and report which
//! notification effect (if any) the transition produced; persisting the
//! mutated job and dispatching the effect to the job's channel bindings is
//! the caller's concern.

use chrono::{DateTime, Duration, Utc};

use crate::errors::{AppError, AppResult};
use crate::models::{Job, JobState};
use crate::scheduling;

/// Notification effect produced by a state transition
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AlertEffect {
    /// Scheduled start was missed
    Alert,
    /// Ping arrived outside the acceptance window
    EarlyAlert,
    /// Run exceeded its expected duration
    LateAlert,
    /// Job came back from an expired or hung incident
    Recover,
}

impl Job {
    /// Effective timing buffer. Never zero, so exact-tick boundaries do not
    /// flap between states.
    pub fn buffer_time(&self) -> Duration {
        Duration::seconds(self.buffer_time_secs.unwrap_or(1).max(1))
    }

    pub fn expected_run_time(&self) -> Duration {
        Duration::seconds(self.expected_run_time_secs)
    }

    /// Deadline of the run currently in progress, if one is
    pub fn current_run_deadline(&self) -> Option<DateTime<Utc>> {
        match self.state {
            JobState::Running | JobState::Hung => self
                .last_successful_time
                .map(|started| started + self.expected_run_time()),
            _ => None,
        }
    }

    /// The monitored task reports a run has begun.
    ///
    /// From `ready` or `active` the ping must land within the buffer of the
    /// next scheduled occurrence or of the previous one (a job created just
    /// after a cron tick may legitimately report against it). A ping outside
    /// that window flags the caller with an early alert and leaves the job
    /// untouched. From `expired`, any ping is the recovery signal and is
    /// accepted without a timing guard.
    pub fn ping_start(&mut self, now: DateTime<Utc>) -> AppResult<Option<AlertEffect>> {
        match self.state {
            JobState::Ready | JobState::Active => {
                if self.within_start_window(now)? {
                    self.go_run(now)?;
                    Ok(None)
                } else {
                    Ok(Some(AlertEffect::EarlyAlert))
                }
            }
            JobState::Expired => {
                self.go_run(now)?;
                Ok(Some(AlertEffect::Recover))
            }
            state => Err(AppError::invalid_transition(state, "ping-start")),
        }
    }

    /// The monitored task reports a run has completed.
    pub fn ping_end(&mut self, _now: DateTime<Utc>) -> AppResult<Option<AlertEffect>> {
        match self.state {
            JobState::Running => {
                self.state = JobState::Active;
                Ok(None)
            }
            JobState::Hung => {
                self.state = JobState::Active;
                Ok(Some(AlertEffect::Recover))
            }
            state => Err(AppError::invalid_transition(state, "ping-end")),
        }
    }

    /// Sweep rule: an `active` job whose scheduled start has been missed by
    /// more than the buffer expires. Returns `None` when the rule does not
    /// apply, which also makes repeated sweeps of an already-expired job
    /// fire nothing.
    pub fn time_passed(&mut self, now: DateTime<Utc>) -> AppResult<Option<AlertEffect>> {
        if !self.start_overdue(now) {
            return Ok(None);
        }
        self.state = JobState::Expired;
        self.next_scheduled_time = scheduling::next_occurrence(&self.schedule, now)?;
        Ok(Some(AlertEffect::Alert))
    }

    /// Sweep rule: a `running` job past its expected run time by more than
    /// the buffer hangs. Returns `None` when the rule does not apply.
    pub fn runtime_exceeded(&mut self, now: DateTime<Utc>) -> Option<AlertEffect> {
        if !self.run_overdue(now) {
            return None;
        }
        self.state = JobState::Hung;
        Some(AlertEffect::LateAlert)
    }

    /// Whether an `active` job has missed its next scheduled start by more
    /// than the buffer
    pub fn start_overdue(&self, now: DateTime<Utc>) -> bool {
        self.state == JobState::Active
            && now > self.next_scheduled_time
            && (now - self.next_scheduled_time).num_seconds() > self.buffer_time().num_seconds()
    }

    /// Whether a `running` job has exceeded its expected run time by more
    /// than the buffer
    pub fn run_overdue(&self, now: DateTime<Utc>) -> bool {
        self.state == JobState::Running
            && match self.last_successful_time {
                Some(started) => {
                    (now - started).num_seconds()
                        > self.expected_run_time_secs + self.buffer_time().num_seconds()
                }
                None => false,
            }
    }

    /// Operator/test escape hatch: start a run right now, bypassing guards.
    pub fn force_run(&mut self, now: DateTime<Utc>) -> AppResult<()> {
        self.go_run(now)
    }

    /// Operator/test escape hatch: mark the job active with the last run
    /// shifted slightly into the past, so the next scheduled time is
    /// imminent. Bypasses guards.
    pub fn force_active(&mut self, now: DateTime<Utc>) -> AppResult<()> {
        let reference = now - Duration::seconds(5);
        self.state = JobState::Active;
        self.last_successful_time = Some(reference);
        self.next_scheduled_time = scheduling::next_occurrence(&self.schedule, reference)?;
        Ok(())
    }

    fn go_run(&mut self, now: DateTime<Utc>) -> AppResult<()> {
        self.state = JobState::Running;
        self.last_successful_time = Some(now);
        self.next_scheduled_time = scheduling::next_occurrence(&self.schedule, now)?;
        Ok(())
    }

    fn within_start_window(&self, now: DateTime<Utc>) -> AppResult<bool> {
        let buffer_secs = self.buffer_time().num_seconds();
        if (now - self.next_scheduled_time).num_seconds().abs() <= buffer_secs {
            return Ok(true);
        }
        if let Some(previous) = scheduling::previous_occurrence(&self.schedule, now)? {
            return Ok((now - previous).num_seconds().abs() <= buffer_secs);
        }
        Ok(false)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::ScheduleSpec;
    use chrono::TimeZone;
    use uuid::Uuid;

    fn interval_job(seconds: i64, buffer: Option<i64>, created: DateTime<Utc>) -> Job {
        Job {
            id: Uuid::new_v4(),
            name: "nightly-backup".to_string(),
            public_id: "4A5B6C7D8E9F".to_string(),
            schedule: ScheduleSpec::Interval { seconds },
            expected_run_time_secs: 30,
            buffer_time_secs: buffer,
            last_successful_time: None,
            next_scheduled_time: created + Duration::seconds(seconds),
            state: JobState::Ready,
            created_at: created,
            updated_at: created,
        }
    }

    fn cron_job(expression: &str, buffer: Option<i64>, created: DateTime<Utc>) -> Job {
        let schedule = ScheduleSpec::Cron {
            expression: expression.to_string(),
        };
        let next = scheduling::next_occurrence(&schedule, created).unwrap();
        Job {
            id: Uuid::new_v4(),
            name: "cache-warmer".to_string(),
            public_id: "0123456789AB".to_string(),
            schedule,
            expected_run_time_secs: 30,
            buffer_time_secs: buffer,
            last_successful_time: None,
            next_scheduled_time: next,
            state: JobState::Ready,
            created_at: created,
            updated_at: created,
        }
    }

    fn t0() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 3, 5, 12, 0, 0).unwrap()
    }

    #[test]
    fn test_buffer_defaults_to_one_second() {
        let job = interval_job(600, None, t0());
        assert_eq!(job.buffer_time(), Duration::seconds(1));
        let job = interval_job(600, Some(0), t0());
        assert_eq!(job.buffer_time(), Duration::seconds(1));
        let job = interval_job(600, Some(60), t0());
        assert_eq!(job.buffer_time(), Duration::seconds(60));
    }

    #[test]
    fn test_ping_start_exactly_on_schedule_runs_without_alert() {
        let mut job = interval_job(600, None, t0());
        let now = job.next_scheduled_time;
        let effect = job.ping_start(now).unwrap();
        assert_eq!(effect, None);
        assert_eq!(job.state, JobState::Running);
        assert_eq!(job.last_successful_time, Some(now));
        assert_eq!(job.next_scheduled_time, now + Duration::seconds(600));
    }

    #[test]
    fn test_ping_start_within_buffer_is_accepted() {
        // frequency=600s, buffer=60s, created at T0; ping at T0+540 lands
        // within 60s of the T0+600 occurrence
        let mut job = interval_job(600, Some(60), t0());
        let now = t0() + Duration::seconds(540);
        let effect = job.ping_start(now).unwrap();
        assert_eq!(effect, None);
        assert_eq!(job.state, JobState::Running);
        assert_eq!(job.last_successful_time, Some(now));
        assert_eq!(job.next_scheduled_time, now + Duration::seconds(600));
    }

    #[test]
    fn test_ping_start_too_early_flags_without_state_change() {
        let mut job = interval_job(600, Some(60), t0());
        job.state = JobState::Active;
        // More than 2x buffer ahead of the next occurrence
        let now = t0() + Duration::seconds(300);
        let effect = job.ping_start(now).unwrap();
        assert_eq!(effect, Some(AlertEffect::EarlyAlert));
        assert_eq!(job.state, JobState::Active);
        assert_eq!(job.last_successful_time, None);
        assert_eq!(job.next_scheduled_time, t0() + Duration::seconds(600));
    }

    #[test]
    fn test_ping_start_accepts_just_missed_cron_occurrence() {
        // Created moments after a */10 tick; the ping reports against the
        // previous occurrence even though the next one is far away
        let created = Utc.with_ymd_and_hms(2026, 3, 5, 12, 0, 10).unwrap();
        let mut job = cron_job("*/10 * * * *", Some(60), created);
        let now = Utc.with_ymd_and_hms(2026, 3, 5, 12, 0, 30).unwrap();
        let effect = job.ping_start(now).unwrap();
        assert_eq!(effect, None);
        assert_eq!(job.state, JobState::Running);
    }

    #[test]
    fn test_ping_start_from_expired_recovers_regardless_of_timing() {
        let mut job = interval_job(600, Some(60), t0());
        job.state = JobState::Expired;
        // Nowhere near any occurrence
        let now = t0() + Duration::seconds(90);
        let effect = job.ping_start(now).unwrap();
        assert_eq!(effect, Some(AlertEffect::Recover));
        assert_eq!(job.state, JobState::Running);
        assert_eq!(job.last_successful_time, Some(now));
    }

    #[test]
    fn test_ping_start_while_running_is_rejected() {
        let mut job = interval_job(600, None, t0());
        job.state = JobState::Running;
        let err = job.ping_start(t0()).unwrap_err();
        assert!(matches!(err, AppError::InvalidTransition { .. }));
        assert_eq!(job.state, JobState::Running);
    }

    #[test]
    fn test_ping_end_completes_a_run() {
        let mut job = interval_job(600, None, t0());
        job.state = JobState::Running;
        job.last_successful_time = Some(t0());
        let effect = job.ping_end(t0() + Duration::seconds(20)).unwrap();
        assert_eq!(effect, None);
        assert_eq!(job.state, JobState::Active);
    }

    #[test]
    fn test_ping_end_from_hung_recovers() {
        let mut job = interval_job(600, None, t0());
        job.state = JobState::Hung;
        job.last_successful_time = Some(t0());
        let effect = job.ping_end(t0() + Duration::seconds(400)).unwrap();
        assert_eq!(effect, Some(AlertEffect::Recover));
        assert_eq!(job.state, JobState::Active);
    }

    #[test]
    fn test_ping_end_outside_a_run_is_rejected() {
        for state in [JobState::Ready, JobState::Active, JobState::Expired] {
            let mut job = interval_job(600, None, t0());
            job.state = state;
            let err = job.ping_end(t0()).unwrap_err();
            assert!(matches!(err, AppError::InvalidTransition { .. }));
            assert_eq!(job.state, state);
        }
    }

    #[test]
    fn test_time_passed_expires_only_past_the_buffer() {
        let mut job = interval_job(600, Some(60), t0());
        job.state = JobState::Active;
        let next = job.next_scheduled_time;

        // Exactly at the buffer edge: not yet expired
        assert_eq!(job.time_passed(next + Duration::seconds(60)).unwrap(), None);
        assert_eq!(job.state, JobState::Active);

        // One second past the buffer: expired, next postponed
        let now = next + Duration::seconds(61);
        let effect = job.time_passed(now).unwrap();
        assert_eq!(effect, Some(AlertEffect::Alert));
        assert_eq!(job.state, JobState::Expired);
        assert_eq!(job.next_scheduled_time, now + Duration::seconds(600));
    }

    #[test]
    fn test_time_passed_is_one_shot_per_incident() {
        let mut job = interval_job(600, Some(60), t0());
        job.state = JobState::Active;
        let now = job.next_scheduled_time + Duration::seconds(120);
        assert_eq!(job.time_passed(now).unwrap(), Some(AlertEffect::Alert));
        // A later sweep sees the job already expired and fires nothing
        assert_eq!(
            job.time_passed(now + Duration::seconds(60)).unwrap(),
            None
        );
        assert_eq!(job.state, JobState::Expired);
    }

    #[test]
    fn test_runtime_exceeded_hangs_only_past_expected_plus_buffer() {
        let mut job = interval_job(600, Some(60), t0());
        job.state = JobState::Running;
        job.last_successful_time = Some(t0());

        // expected(30) + buffer(60): still inside the allowance
        assert_eq!(job.runtime_exceeded(t0() + Duration::seconds(90)), None);
        assert_eq!(job.state, JobState::Running);

        let effect = job.runtime_exceeded(t0() + Duration::seconds(91));
        assert_eq!(effect, Some(AlertEffect::LateAlert));
        assert_eq!(job.state, JobState::Hung);
    }

    #[test]
    fn test_runtime_exceeded_is_one_shot_per_incident() {
        let mut job = interval_job(600, Some(60), t0());
        job.state = JobState::Running;
        job.last_successful_time = Some(t0());
        let now = t0() + Duration::seconds(120);
        assert_eq!(job.runtime_exceeded(now), Some(AlertEffect::LateAlert));
        assert_eq!(job.runtime_exceeded(now + Duration::seconds(60)), None);
        assert_eq!(job.state, JobState::Hung);
    }

    #[test]
    fn test_hung_run_full_cycle() {
        // ping-start on schedule, no ping-end, sweep flips to hung, the
        // eventual ping-end recovers
        let mut job = interval_job(600, Some(60), t0());
        let start = job.next_scheduled_time;
        assert_eq!(job.ping_start(start).unwrap(), None);

        let sweep_at = start + Duration::seconds(100);
        assert_eq!(job.runtime_exceeded(sweep_at), Some(AlertEffect::LateAlert));
        assert_eq!(job.state, JobState::Hung);

        let effect = job.ping_end(sweep_at + Duration::seconds(5)).unwrap();
        assert_eq!(effect, Some(AlertEffect::Recover));
        assert_eq!(job.state, JobState::Active);
    }

    #[test]
    fn test_force_run_bypasses_the_guard() {
        let mut job = interval_job(600, Some(60), t0());
        // Far outside any acceptance window
        let now = t0() + Duration::seconds(120);
        job.force_run(now).unwrap();
        assert_eq!(job.state, JobState::Running);
        assert_eq!(job.last_successful_time, Some(now));
    }

    #[test]
    fn test_force_active_backdates_the_reference() {
        let mut job = interval_job(600, Some(60), t0());
        let now = t0() + Duration::seconds(120);
        job.force_active(now).unwrap();
        assert_eq!(job.state, JobState::Active);
        assert_eq!(job.last_successful_time, Some(now - Duration::seconds(5)));
        assert_eq!(
            job.next_scheduled_time,
            now - Duration::seconds(5) + Duration::seconds(600)
        );
    }

    #[test]
    fn test_current_run_deadline_tracks_running_jobs() {
        let mut job = interval_job(600, None, t0());
        assert_eq!(job.current_run_deadline(), None);
        job.state = JobState::Running;
        job.last_successful_time = Some(t0());
        assert_eq!(
            job.current_run_deadline(),
            Some(t0() + Duration::seconds(30))
        );
    }
}
