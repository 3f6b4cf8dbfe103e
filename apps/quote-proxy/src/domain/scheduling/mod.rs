//! Recurring Job Records
//!
//! The per-job state machine driven by the scheduler service:
//!
//! ```text
//! Scheduled ──fire──▶ Running ──ok──▶ Scheduled
//!     ▲                  │
//!     │                  └──err──▶ Scheduled      (error_count < max_errors)
//!   start                └──err──▶ Disabled       (error_count >= max_errors)
//!     │
//! Stopped / Disabled
//! ```
//!
//! Fire times are wall-clock UTC. Hour-aligned jobs always land on
//! `HH:00:00`; handler latency never shifts later fire times.

use std::time::Duration;

use chrono::{DateTime, DurationRound, TimeDelta, Utc};
use serde::Serialize;

/// One hour.
pub const HOUR: Duration = Duration::from_secs(3600);

/// Default consecutive-failure threshold.
pub const DEFAULT_MAX_ERRORS: u32 = 5;

/// Lifecycle state of a job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum JobState {
    /// Waiting for its next fire time.
    Scheduled,
    /// Handler currently executing.
    Running,
    /// Not looping; metadata retained.
    Stopped,
    /// Tripped its failure threshold; requires an explicit start.
    Disabled,
}

/// Options supplied when a job is registered.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct JobOptions {
    /// Whether `start_all` picks the job up.
    pub enabled: bool,
    /// Consecutive failures before the job disables itself.
    pub max_errors: u32,
    /// Fire on `HH:00:00` boundaries (intervals of at least one hour).
    pub align_to_hour_boundary: bool,
    /// Fire once as soon as the job first starts.
    pub run_immediately: bool,
}

impl Default for JobOptions {
    fn default() -> Self {
        Self {
            enabled: true,
            max_errors: DEFAULT_MAX_ERRORS,
            align_to_hour_boundary: false,
            run_immediately: false,
        }
    }
}

/// Status record of a registered job.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ScheduledJob {
    /// Unique id.
    pub id: String,
    /// Interval between firings, in milliseconds.
    pub interval_ms: u64,
    /// Hour-boundary alignment requested.
    pub align_to_hour_boundary: bool,
    /// Fire once on first start.
    pub run_immediately: bool,
    /// Eligible to run.
    pub enabled: bool,
    /// Consecutive failures.
    pub error_count: u32,
    /// Failure threshold.
    pub max_errors: u32,
    /// Firings so far.
    pub total_runs: u64,
    /// Failed firings so far.
    pub total_failures: u64,
    /// Message of the most recent failure.
    pub last_error: Option<String>,
    /// Start of the most recent firing.
    pub last_run_at: Option<DateTime<Utc>>,
    /// Next planned firing.
    pub next_run_at: Option<DateTime<Utc>>,
    /// Lifecycle state.
    pub state: JobState,
}

impl ScheduledJob {
    /// Register a job at `now`. Zero intervals are raised to one millisecond.
    #[must_use]
    pub fn new(
        id: impl Into<String>,
        interval: Duration,
        options: JobOptions,
        now: DateTime<Utc>,
    ) -> Self {
        let interval_ms = u64::try_from(interval.as_millis()).unwrap_or(u64::MAX).max(1);
        let mut job = Self {
            id: id.into(),
            interval_ms,
            align_to_hour_boundary: options.align_to_hour_boundary,
            run_immediately: options.run_immediately,
            enabled: options.enabled,
            error_count: 0,
            max_errors: options.max_errors.max(1),
            total_runs: 0,
            total_failures: 0,
            last_error: None,
            last_run_at: None,
            next_run_at: None,
            state: JobState::Stopped,
        };
        job.next_run_at = Some(job.first_run_at(now));
        job
    }

    /// Interval between firings.
    #[must_use]
    pub const fn interval(&self) -> Duration {
        Duration::from_millis(self.interval_ms)
    }

    /// Whether fire times snap to hour boundaries.
    #[must_use]
    pub fn is_hour_aligned(&self) -> bool {
        self.align_to_hour_boundary && self.interval() >= HOUR
    }

    /// Whether the job's loop is live.
    #[must_use]
    pub const fn is_active(&self) -> bool {
        matches!(self.state, JobState::Scheduled | JobState::Running)
    }

    /// First fire time for a job registered at `now`: the start of the next
    /// hour when aligned, else one interval from now.
    #[must_use]
    pub fn first_run_at(&self, now: DateTime<Utc>) -> DateTime<Utc> {
        if self.is_hour_aligned() {
            add(floor_hour(now), HOUR)
        } else {
            add(now, self.interval())
        }
    }

    /// Fire time following a firing that completed at `now`.
    ///
    /// Aligned jobs land on `floor_hour(now) + ceil_hours(interval)`. Other
    /// jobs advance from their previous target, skipping to `now + interval`
    /// when that target already passed.
    #[must_use]
    pub fn next_run_after(&self, now: DateTime<Utc>) -> DateTime<Utc> {
        if self.is_hour_aligned() {
            let hours = self.interval_ms.div_ceil(duration_ms(HOUR));
            let span = HOUR.saturating_mul(u32::try_from(hours).unwrap_or(u32::MAX));
            return add(floor_hour(now), span);
        }
        let candidate = self.next_run_at.map(|previous| add(previous, self.interval()));
        match candidate {
            Some(target) if target > now => target,
            _ => add(now, self.interval()),
        }
    }

    /// Time left until the job is due. Zero when due or overdue.
    #[must_use]
    pub fn remaining(&self, now: DateTime<Utc>) -> Option<Duration> {
        self.next_run_at
            .map(|next| (next - now).to_std().unwrap_or(Duration::ZERO))
    }

    /// (Re-)enable the job and enter `Scheduled`.
    ///
    /// Only a `Disabled` job has its failure streak cleared; a stopped job
    /// resumes with its streak intact. A job that never ran and asked to run
    /// immediately becomes due at `now`; a stale fire time is recomputed.
    /// While a firing is in flight the record is left to that firing.
    pub fn enable(&mut self, now: DateTime<Utc>) {
        self.enabled = true;
        if self.state == JobState::Running {
            return;
        }
        if self.state == JobState::Disabled {
            self.error_count = 0;
        }
        self.state = JobState::Scheduled;
        self.next_run_at = if self.run_immediately && self.total_runs == 0 {
            Some(now)
        } else {
            match self.next_run_at {
                Some(next) if next > now => Some(next),
                _ => Some(self.first_run_at(now)),
            }
        };
    }

    /// Enter `Running` at `now`.
    pub fn begin_run(&mut self, now: DateTime<Utc>) {
        self.state = JobState::Running;
        self.last_run_at = Some(now);
    }

    /// Record a successful firing that completed at `now`.
    pub fn record_success(&mut self, now: DateTime<Utc>) {
        self.total_runs += 1;
        self.error_count = 0;
        self.next_run_at = Some(self.next_run_after(now));
        self.state = JobState::Scheduled;
    }

    /// Record a failed firing. Returns `true` when the job has just disabled
    /// itself.
    pub fn record_failure(&mut self, now: DateTime<Utc>, error: impl Into<String>) -> bool {
        self.total_runs += 1;
        self.total_failures += 1;
        self.error_count += 1;
        self.last_error = Some(error.into());

        if self.error_count >= self.max_errors {
            self.enabled = false;
            self.state = JobState::Disabled;
            self.next_run_at = None;
            true
        } else {
            self.next_run_at = Some(self.next_run_after(now));
            self.state = JobState::Scheduled;
            false
        }
    }

    /// Halt the loop. Disabled jobs stay disabled.
    pub fn mark_stopped(&mut self) {
        if self.state != JobState::Disabled {
            self.state = JobState::Stopped;
        }
    }
}

/// Aggregate counts over all jobs.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct SchedulerStats {
    /// Registered jobs.
    pub total: usize,
    /// Jobs whose loop is live.
    pub active: usize,
    /// Jobs disabled by their failure threshold.
    pub disabled: usize,
    /// Jobs that have failed at least once.
    pub ever_errored: usize,
}

impl SchedulerStats {
    /// Tally `jobs`.
    #[must_use]
    pub fn collect<'a>(jobs: impl IntoIterator<Item = &'a ScheduledJob>) -> Self {
        jobs.into_iter().fold(Self::default(), |mut stats, job| {
            stats.total += 1;
            stats.active += usize::from(job.is_active());
            stats.disabled += usize::from(job.state == JobState::Disabled);
            stats.ever_errored += usize::from(job.total_failures > 0);
            stats
        })
    }
}

/// Start of the UTC hour containing `instant`.
#[must_use]
pub fn floor_hour(instant: DateTime<Utc>) -> DateTime<Utc> {
    instant
        .duration_trunc(TimeDelta::hours(1))
        .unwrap_or(instant)
}

fn add(instant: DateTime<Utc>, delta: Duration) -> DateTime<Utc> {
    TimeDelta::from_std(delta)
        .ok()
        .and_then(|delta| instant.checked_add_signed(delta))
        .unwrap_or(DateTime::<Utc>::MAX_UTC)
}

fn duration_ms(duration: Duration) -> u64 {
    u64::try_from(duration.as_millis()).unwrap_or(u64::MAX)
}
