//! Job Scheduler
//!
//! Registry of named recurring jobs, each driven by its own Tokio task.
//!
//! # Timing
//!
//! A job loop never sleeps for a whole interval. It repeatedly computes the
//! time left until `next_run_at` and waits at most `max_wait` before checking
//! again, so a wall-clock adjustment or a suspended host costs at most one
//! wait cap. After a firing the next target is recomputed from the job's
//! alignment rule, not from when the handler finished.
//!
//! # Failure isolation
//!
//! Handlers run in their own task; an error or panic only counts against
//! the job's failure streak. Once the streak reaches `max_errors` the job
//! disables itself until it is explicitly started again.

use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::{Mutex, RwLock};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::application::ports::{Clock, SystemClock};
use crate::domain::scheduling::{JobOptions, ScheduledJob, SchedulerStats};
use crate::infrastructure::metrics::{self, Outcome};

/// Default bound on a single wait between due-time checks.
pub const DEFAULT_MAX_WAIT: Duration = Duration::from_secs(60);

// =============================================================================
// Handler
// =============================================================================

/// Work performed on each firing.
#[async_trait]
pub trait JobHandler: Send + Sync {
    /// Run once. An error counts toward the job's failure threshold.
    async fn run(&self) -> anyhow::Result<()>;
}

/// Adapter turning an async closure into a [`JobHandler`].
pub struct FnJob<F>(F);

impl<F> FnJob<F> {
    /// Wrap `f`.
    pub const fn new(f: F) -> Self {
        Self(f)
    }
}

#[async_trait]
impl<F, Fut> JobHandler for FnJob<F>
where
    F: Fn() -> Fut + Send + Sync,
    Fut: Future<Output = anyhow::Result<()>> + Send,
{
    async fn run(&self) -> anyhow::Result<()> {
        (self.0)().await
    }
}

// =============================================================================
// Configuration & Errors
// =============================================================================

/// Scheduler configuration.
#[derive(Debug, Clone, Copy)]
pub struct SchedulerConfig {
    /// Longest single wait before re-checking a job's due time.
    pub max_wait: Duration,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            max_wait: DEFAULT_MAX_WAIT,
        }
    }
}

/// Scheduler operation failure.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SchedulerError {
    /// No job registered under the id.
    #[error("job not found: {0}")]
    JobNotFound(String),
}

// =============================================================================
// Scheduler
// =============================================================================

struct RunHandle {
    generation: u64,
    cancel: CancellationToken,
    task: JoinHandle<()>,
}

struct JobSlot {
    record: Mutex<ScheduledJob>,
    handler: Arc<dyn JobHandler>,
    run: Mutex<Option<RunHandle>>,
}

/// Recurring job scheduler.
pub struct Scheduler {
    jobs: RwLock<HashMap<String, Arc<JobSlot>>>,
    config: SchedulerConfig,
    clock: Arc<dyn Clock>,
    shutdown: CancellationToken,
}

impl std::fmt::Debug for Scheduler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Scheduler")
            .field("jobs", &self.jobs.read().len())
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

impl Scheduler {
    /// Create a scheduler on the system clock.
    ///
    /// Cancelling `shutdown` stops every job loop.
    #[must_use]
    pub fn new(config: SchedulerConfig, shutdown: CancellationToken) -> Self {
        Self::with_clock(config, shutdown, Arc::new(SystemClock))
    }

    /// Create a scheduler reading time from `clock`.
    #[must_use]
    pub fn with_clock(
        config: SchedulerConfig,
        shutdown: CancellationToken,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            jobs: RwLock::new(HashMap::new()),
            config,
            clock,
            shutdown,
        }
    }

    /// Register a job. An existing job with the same id is stopped and
    /// replaced.
    ///
    /// The job is not started; see [`Self::start`] and [`Self::start_all`].
    pub fn add_job(
        &self,
        id: impl Into<String>,
        interval: Duration,
        handler: Arc<dyn JobHandler>,
        options: JobOptions,
    ) {
        let id = id.into();
        let record = ScheduledJob::new(id.clone(), interval, options, self.clock.now());
        debug!(
            job_id = %id,
            next_run_at = ?record.next_run_at,
            aligned = record.is_hour_aligned(),
            "Job registered"
        );

        let slot = Arc::new(JobSlot {
            record: Mutex::new(record),
            handler,
            run: Mutex::new(None),
        });

        if let Some(previous) = self.jobs.write().insert(id, slot) {
            cancel_loop(&previous);
        }
    }

    /// Start (or re-enable) a job.
    ///
    /// A disabled job has its failure streak cleared; a stopped job keeps
    /// it. Starting a job whose loop is already live is a no-op. When a
    /// stopped loop is still finishing a firing, the new loop waits for it
    /// before checking the due time, so firings never overlap. Must be
    /// called within a Tokio runtime.
    pub fn start(&self, id: &str) -> Result<(), SchedulerError> {
        let slot = self.slot(id)?;
        let mut run = slot.run.lock();
        let live = run
            .as_ref()
            .is_some_and(|handle| !handle.cancel.is_cancelled() && !handle.task.is_finished());
        if live {
            return Ok(());
        }

        slot.record.lock().enable(self.clock.now());

        let generation = run.as_ref().map_or(0, |handle| handle.generation + 1);
        let previous = run.take().map(|handle| {
            handle.cancel.cancel();
            handle.task
        });
        let cancel = self.shutdown.child_token();
        let task = tokio::spawn(job_loop(
            Arc::clone(&slot),
            previous,
            generation,
            Arc::clone(&self.clock),
            self.config.max_wait,
            cancel.clone(),
        ));
        *run = Some(RunHandle {
            generation,
            cancel,
            task,
        });
        drop(run);

        info!(job_id = %id, "Job started");
        Ok(())
    }

    /// Start every enabled job. Returns how many were started.
    pub fn start_all(&self) -> usize {
        let ids: Vec<String> = self
            .jobs
            .read()
            .iter()
            .filter(|(_, slot)| slot.record.lock().enabled)
            .map(|(id, _)| id.clone())
            .collect();

        ids.iter().filter(|id| self.start(id).is_ok()).count()
    }

    /// Halt a job's future firings. Its metadata is kept.
    pub fn stop(&self, id: &str) -> Result<(), SchedulerError> {
        let slot = self.slot(id)?;
        cancel_loop(&slot);
        info!(job_id = %id, "Job stopped");
        Ok(())
    }

    /// Halt every job.
    pub fn stop_all(&self) {
        for slot in self.jobs.read().values() {
            cancel_loop(slot);
        }
    }

    /// Stop every job and wait for in-flight firings to finish.
    pub async fn shutdown(&self) {
        let slots: Vec<Arc<JobSlot>> = self.jobs.read().values().cloned().collect();
        let tasks: Vec<JoinHandle<()>> = slots
            .iter()
            .filter_map(|slot| {
                cancel_loop(slot);
                slot.run.lock().take().map(|handle| handle.task)
            })
            .collect();

        for task in tasks {
            if let Err(e) = task.await {
                warn!(error = %e, "Job loop ended abnormally");
            }
        }
        for slot in &slots {
            slot.record.lock().mark_stopped();
        }
    }

    /// Status of one job.
    #[must_use]
    pub fn get_status(&self, id: &str) -> Option<ScheduledJob> {
        self.jobs
            .read()
            .get(id)
            .map(|slot| slot.record.lock().clone())
    }

    /// Status of every job, ordered by id.
    #[must_use]
    pub fn get_all_statuses(&self) -> Vec<ScheduledJob> {
        let mut statuses: Vec<ScheduledJob> = self
            .jobs
            .read()
            .values()
            .map(|slot| slot.record.lock().clone())
            .collect();
        statuses.sort_by(|a, b| a.id.cmp(&b.id));
        statuses
    }

    /// Aggregate counts.
    #[must_use]
    pub fn get_stats(&self) -> SchedulerStats {
        let jobs = self.jobs.read();
        let records: Vec<ScheduledJob> = jobs
            .values()
            .map(|slot| slot.record.lock().clone())
            .collect();
        drop(jobs);
        SchedulerStats::collect(&records)
    }

    fn slot(&self, id: &str) -> Result<Arc<JobSlot>, SchedulerError> {
        self.jobs
            .read()
            .get(id)
            .cloned()
            .ok_or_else(|| SchedulerError::JobNotFound(id.to_string()))
    }
}

fn cancel_loop(slot: &JobSlot) {
    if let Some(handle) = slot.run.lock().as_ref() {
        handle.cancel.cancel();
    }
    slot.record.lock().mark_stopped();
}

// =============================================================================
// Job Loop
// =============================================================================

async fn job_loop(
    slot: Arc<JobSlot>,
    previous: Option<JoinHandle<()>>,
    generation: u64,
    clock: Arc<dyn Clock>,
    max_wait: Duration,
    cancel: CancellationToken,
) {
    // Not cancellable: a successor must never overtake an in-flight firing.
    if let Some(previous) = previous {
        if let Err(e) = previous.await {
            warn!(error = %e, "Previous job loop ended abnormally");
        }
    }

    loop {
        if cancel.is_cancelled() {
            break;
        }

        let remaining = {
            let job = slot.record.lock();
            if !job.enabled {
                break;
            }
            job.remaining(clock.now())
        };
        let Some(remaining) = remaining else {
            break;
        };

        if remaining.is_zero() {
            if fire(&slot, clock.as_ref()).await {
                break;
            }
            continue;
        }

        tokio::select! {
            () = cancel.cancelled() => break,
            () = tokio::time::sleep(remaining.min(max_wait)) => {}
        }
    }

    // A restart may already have replaced this loop.
    let current = slot
        .run
        .lock()
        .as_ref()
        .is_some_and(|handle| handle.generation == generation);
    if current {
        slot.record.lock().mark_stopped();
    }
}

/// Run the handler once and record the outcome. Returns `true` when the job
/// disabled itself.
async fn fire(slot: &JobSlot, clock: &dyn Clock) -> bool {
    let job_id = {
        let mut job = slot.record.lock();
        job.begin_run(clock.now());
        job.id.clone()
    };
    debug!(job_id = %job_id, "Job firing");

    let handler = Arc::clone(&slot.handler);
    let outcome = tokio::spawn(async move { handler.run().await }).await;
    let finished = clock.now();

    let failure = match outcome {
        Ok(Ok(())) => None,
        Ok(Err(e)) => Some(format!("{e:#}")),
        Err(e) if e.is_panic() => Some("job handler panicked".to_string()),
        Err(e) => Some(e.to_string()),
    };

    let mut job = slot.record.lock();
    match failure {
        None => {
            job.record_success(finished);
            metrics::record_job_run(&job_id, Outcome::Success);
            debug!(job_id = %job_id, next_run_at = ?job.next_run_at, "Job succeeded");
            false
        }
        Some(message) => {
            let disabled = job.record_failure(finished, message.clone());
            metrics::record_job_run(&job_id, Outcome::Failure);
            if disabled {
                metrics::record_job_disabled(&job_id);
                error!(
                    job_id = %job_id,
                    error_count = job.error_count,
                    error = %message,
                    "Job disabled after repeated failures"
                );
            } else {
                warn!(
                    job_id = %job_id,
                    error_count = job.error_count,
                    error = %message,
                    "Job failed"
                );
            }
            disabled
        }
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicU32, Ordering};

    use chrono::{DateTime, TimeZone, Utc};
    use tokio::time::Instant;

    use super::*;
    use crate::domain::scheduling::{HOUR, JobState};

    /// Wall clock that advances with Tokio's (pausable) clock.
    struct TokioClock {
        base: DateTime<Utc>,
        start: Instant,
    }

    impl TokioClock {
        fn at(base: DateTime<Utc>) -> Arc<Self> {
            Arc::new(Self {
                base,
                start: Instant::now(),
            })
        }
    }

    impl Clock for TokioClock {
        fn now(&self) -> DateTime<Utc> {
            self.base + chrono::TimeDelta::from_std(self.start.elapsed()).unwrap()
        }
    }

    fn ten_seventeen() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 3, 15, 10, 17, 0).unwrap()
    }

    fn scheduler() -> Scheduler {
        Scheduler::with_clock(
            SchedulerConfig::default(),
            CancellationToken::new(),
            TokioClock::at(ten_seventeen()),
        )
    }

    async fn explode() -> anyhow::Result<()> {
        panic!("handler bug")
    }

    fn counting(calls: &Arc<AtomicU32>, fail: bool) -> Arc<dyn JobHandler> {
        let calls = Arc::clone(calls);
        Arc::new(FnJob::new(move || {
            let calls = Arc::clone(&calls);
            async move {
                calls.fetch_add(1, Ordering::SeqCst);
                if fail {
                    anyhow::bail!("upstream unavailable");
                }
                Ok(())
            }
        }))
    }

    #[tokio::test(start_paused = true)]
    async fn aligned_job_fires_on_the_hour() {
        let scheduler = scheduler();
        let calls = Arc::new(AtomicU32::new(0));
        let options = JobOptions {
            align_to_hour_boundary: true,
            ..JobOptions::default()
        };
        scheduler.add_job("collect", HOUR, counting(&calls, false), options);

        let eleven = Utc.with_ymd_and_hms(2024, 3, 15, 11, 0, 0).unwrap();
        assert_eq!(scheduler.get_status("collect").unwrap().next_run_at, Some(eleven));

        scheduler.start("collect").unwrap();
        tokio::time::sleep(Duration::from_secs(42 * 60)).await;
        assert_eq!(calls.load(Ordering::SeqCst), 0);

        tokio::time::sleep(Duration::from_secs(2 * 60)).await;
        assert_eq!(calls.load(Ordering::SeqCst), 1);

        let status = scheduler.get_status("collect").unwrap();
        assert_eq!(status.last_run_at, Some(eleven));
        assert_eq!(
            status.next_run_at,
            Some(Utc.with_ymd_and_hms(2024, 3, 15, 12, 0, 0).unwrap())
        );
    }

    #[tokio::test(start_paused = true)]
    async fn run_immediately_fires_on_start() {
        let scheduler = scheduler();
        let calls = Arc::new(AtomicU32::new(0));
        let options = JobOptions {
            run_immediately: true,
            align_to_hour_boundary: true,
            ..JobOptions::default()
        };
        scheduler.add_job("collect", HOUR, counting(&calls, false), options);

        scheduler.start("collect").unwrap();
        tokio::time::sleep(Duration::from_secs(1)).await;

        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(
            scheduler.get_status("collect").unwrap().next_run_at,
            Some(Utc.with_ymd_and_hms(2024, 3, 15, 11, 0, 0).unwrap())
        );
    }

    #[tokio::test(start_paused = true)]
    async fn failing_job_disables_after_max_errors() {
        let scheduler = scheduler();
        let calls = Arc::new(AtomicU32::new(0));
        let options = JobOptions {
            max_errors: 3,
            run_immediately: true,
            ..JobOptions::default()
        };
        scheduler.add_job("flaky", Duration::from_secs(10), counting(&calls, true), options);

        scheduler.start("flaky").unwrap();
        tokio::time::sleep(Duration::from_secs(120)).await;

        assert_eq!(calls.load(Ordering::SeqCst), 3);
        let status = scheduler.get_status("flaky").unwrap();
        assert_eq!(status.state, JobState::Disabled);
        assert!(!status.enabled);
        assert_eq!(status.error_count, 3);
        assert_eq!(status.last_error.as_deref(), Some("upstream unavailable"));

        tokio::time::sleep(Duration::from_secs(600)).await;
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn start_re_enables_disabled_job() {
        let scheduler = scheduler();
        let calls = Arc::new(AtomicU32::new(0));
        let options = JobOptions {
            max_errors: 1,
            run_immediately: true,
            ..JobOptions::default()
        };
        scheduler.add_job("flaky", Duration::from_secs(10), counting(&calls, true), options);
        scheduler.start("flaky").unwrap();
        tokio::time::sleep(Duration::from_secs(1)).await;
        assert_eq!(scheduler.get_status("flaky").unwrap().state, JobState::Disabled);

        scheduler.start("flaky").unwrap();
        let status = scheduler.get_status("flaky").unwrap();
        assert_eq!(status.state, JobState::Scheduled);
        assert_eq!(status.error_count, 0);

        tokio::time::sleep(Duration::from_secs(11)).await;
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn panicking_handler_counts_as_failure() {
        let scheduler = scheduler();
        let options = JobOptions {
            run_immediately: true,
            ..JobOptions::default()
        };
        scheduler.add_job("buggy", Duration::from_secs(60), Arc::new(FnJob::new(explode)), options);

        scheduler.start("buggy").unwrap();
        tokio::time::sleep(Duration::from_secs(1)).await;

        let status = scheduler.get_status("buggy").unwrap();
        assert_eq!(status.error_count, 1);
        assert_eq!(status.state, JobState::Scheduled);
    }

    #[tokio::test(start_paused = true)]
    async fn stop_halts_firings_and_keeps_metadata() {
        let scheduler = scheduler();
        let calls = Arc::new(AtomicU32::new(0));
        let options = JobOptions {
            run_immediately: true,
            ..JobOptions::default()
        };
        scheduler.add_job("tick", Duration::from_secs(10), counting(&calls, false), options);
        scheduler.start("tick").unwrap();
        tokio::time::sleep(Duration::from_secs(25)).await;
        assert_eq!(calls.load(Ordering::SeqCst), 3);

        scheduler.stop("tick").unwrap();
        tokio::time::sleep(Duration::from_secs(60)).await;

        assert_eq!(calls.load(Ordering::SeqCst), 3);
        let status = scheduler.get_status("tick").unwrap();
        assert_eq!(status.state, JobState::Stopped);
        assert_eq!(status.total_runs, 3);
        assert!(status.last_run_at.is_some());
    }

    #[tokio::test(start_paused = true)]
    async fn stop_and_start_keeps_failure_streak() {
        let scheduler = scheduler();
        let calls = Arc::new(AtomicU32::new(0));
        let options = JobOptions {
            max_errors: 3,
            run_immediately: true,
            ..JobOptions::default()
        };
        scheduler.add_job("flaky", Duration::from_secs(10), counting(&calls, true), options);
        scheduler.start("flaky").unwrap();
        tokio::time::sleep(Duration::from_secs(15)).await;
        assert_eq!(scheduler.get_status("flaky").unwrap().error_count, 2);

        scheduler.stop("flaky").unwrap();
        assert_eq!(scheduler.get_status("flaky").unwrap().error_count, 2);
        scheduler.start("flaky").unwrap();
        assert_eq!(scheduler.get_status("flaky").unwrap().error_count, 2);

        tokio::time::sleep(Duration::from_secs(15)).await;

        assert_eq!(calls.load(Ordering::SeqCst), 3);
        let status = scheduler.get_status("flaky").unwrap();
        assert_eq!(status.state, JobState::Disabled);
        assert_eq!(status.error_count, 3);
    }

    #[tokio::test(start_paused = true)]
    async fn restart_during_slow_firing_never_overlaps() {
        let scheduler = scheduler();
        let running = Arc::new(AtomicU32::new(0));
        let peak = Arc::new(AtomicU32::new(0));
        let calls = Arc::new(AtomicU32::new(0));
        let handler: Arc<dyn JobHandler> = {
            let (running, peak, calls) =
                (Arc::clone(&running), Arc::clone(&peak), Arc::clone(&calls));
            Arc::new(FnJob::new(move || {
                let (running, peak, calls) =
                    (Arc::clone(&running), Arc::clone(&peak), Arc::clone(&calls));
                async move {
                    calls.fetch_add(1, Ordering::SeqCst);
                    let now = running.fetch_add(1, Ordering::SeqCst) + 1;
                    peak.fetch_max(now, Ordering::SeqCst);
                    tokio::time::sleep(Duration::from_secs(5)).await;
                    running.fetch_sub(1, Ordering::SeqCst);
                    Ok(())
                }
            }))
        };
        let options = JobOptions {
            run_immediately: true,
            ..JobOptions::default()
        };
        scheduler.add_job("slow", HOUR, handler, options);

        scheduler.start("slow").unwrap();
        tokio::time::sleep(Duration::from_secs(1)).await;
        scheduler.stop("slow").unwrap();
        scheduler.start("slow").unwrap();
        tokio::time::sleep(Duration::from_secs(10)).await;

        assert_eq!(peak.load(Ordering::SeqCst), 1);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        let status = scheduler.get_status("slow").unwrap();
        assert_eq!(status.total_runs, 1);
        assert_eq!(status.state, JobState::Scheduled);
        assert_eq!(
            status.next_run_at,
            Some(Utc.with_ymd_and_hms(2024, 3, 15, 11, 17, 0).unwrap())
        );
    }

    #[tokio::test(start_paused = true)]
    async fn shutdown_token_stops_all_loops() {
        let shutdown = CancellationToken::new();
        let scheduler = Scheduler::with_clock(
            SchedulerConfig::default(),
            shutdown.clone(),
            TokioClock::at(ten_seventeen()),
        );
        let calls = Arc::new(AtomicU32::new(0));
        for id in ["a", "b"] {
            let handler = counting(&calls, false);
            scheduler.add_job(id, Duration::from_secs(10), handler, JobOptions::default());
        }
        assert_eq!(scheduler.start_all(), 2);

        shutdown.cancel();
        tokio::time::sleep(Duration::from_secs(60)).await;

        assert_eq!(calls.load(Ordering::SeqCst), 0);
        assert_eq!(scheduler.get_stats().active, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn start_all_skips_disabled_option() {
        let scheduler = scheduler();
        let calls = Arc::new(AtomicU32::new(0));
        scheduler.add_job("on", HOUR, counting(&calls, false), JobOptions::default());
        scheduler.add_job(
            "off",
            HOUR,
            counting(&calls, false),
            JobOptions {
                enabled: false,
                ..JobOptions::default()
            },
        );

        assert_eq!(scheduler.start_all(), 1);

        let stats = scheduler.get_stats();
        assert_eq!(stats.total, 2);
        assert_eq!(stats.active, 1);
        let ids: Vec<String> = scheduler.get_all_statuses().into_iter().map(|j| j.id).collect();
        assert_eq!(ids, vec!["off", "on"]);
    }

    #[tokio::test]
    async fn unknown_job_is_an_error() {
        let scheduler = scheduler();
        assert_eq!(
            scheduler.start("missing"),
            Err(SchedulerError::JobNotFound("missing".to_string()))
        );
        assert!(scheduler.stop("missing").is_err());
        assert!(scheduler.get_status("missing").is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn replacing_a_job_stops_the_old_loop() {
        let scheduler = scheduler();
        let old_calls = Arc::new(AtomicU32::new(0));
        let new_calls = Arc::new(AtomicU32::new(0));
        let interval = Duration::from_secs(10);
        scheduler.add_job("job", interval, counting(&old_calls, false), JobOptions::default());
        scheduler.start("job").unwrap();

        scheduler.add_job("job", interval, counting(&new_calls, false), JobOptions::default());
        scheduler.start("job").unwrap();
        tokio::time::sleep(Duration::from_secs(15)).await;

        assert_eq!(old_calls.load(Ordering::SeqCst), 0);
        assert_eq!(new_calls.load(Ordering::SeqCst), 1);
    }
}
