//! Per-source timer loops, the cadence filter, manual refresh requests and
//! the daily full refresh.

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use cptrack_core::{Source, StudentRecord};
use cptrack_storage::sleep_or_cancel;
use tokio::sync::{Mutex, Notify};
use tokio::task::{JoinHandle, JoinSet};
use tokio_cron_scheduler::{Job, JobScheduler};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::config::SourceSettings;
use crate::refresh::{RefreshOutcome, Refresher};

/// Spacing between sources during a full refresh.
pub const FULL_REFRESH_GAP: Duration = Duration::from_secs(10);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TickMode {
    /// Only students whose record is older than the cadence.
    Cadence,
    /// Every active student, ignoring the cadence.
    Full,
}

impl fmt::Display for TickMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            TickMode::Cadence => "cadence",
            TickMode::Full => "full",
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TickSummary {
    pub run_id: Uuid,
    pub source: Source,
    pub mode: TickMode,
    pub considered: usize,
    pub eligible: usize,
    pub refreshed: usize,
    pub stale: usize,
    pub failed: usize,
}

/// Whether `student`'s record for `source` is missing or older than `cadence`.
pub fn is_due(student: &StudentRecord, source: Source, cadence: Duration, now: DateTime<Utc>) -> bool {
    let Some(last) = student.last_updated(source) else {
        return true;
    };
    let cadence = chrono::Duration::from_std(cadence).unwrap_or(chrono::Duration::MAX);
    now.signed_duration_since(last) >= cadence
}

pub struct Scheduler {
    refresher: Arc<Refresher>,
    settings: BTreeMap<Source, SourceSettings>,
    requests: Mutex<HashMap<Source, BTreeSet<String>>>,
    wakeups: HashMap<Source, Arc<Notify>>,
    /// Held for a whole tick so one source never runs two ticks at once.
    tick_locks: HashMap<Source, Arc<Mutex<()>>>,
    cancel: CancellationToken,
    full_refresh_gap: Duration,
}

impl Scheduler {
    pub fn new(refresher: Arc<Refresher>, settings: BTreeMap<Source, SourceSettings>) -> Self {
        let cancel = refresher.cancel_token();
        Self {
            refresher,
            settings,
            requests: Mutex::new(HashMap::new()),
            wakeups: Source::ALL.into_iter().map(|s| (s, Arc::new(Notify::new()))).collect(),
            tick_locks: Source::ALL.into_iter().map(|s| (s, Arc::new(Mutex::new(())))).collect(),
            cancel,
            full_refresh_gap: FULL_REFRESH_GAP,
        }
    }

    pub fn with_full_refresh_gap(mut self, gap: Duration) -> Self {
        self.full_refresh_gap = gap;
        self
    }

    pub fn settings(&self, source: Source) -> SourceSettings {
        self.settings
            .get(&source)
            .cloned()
            .unwrap_or_else(|| SourceSettings::defaults(source))
    }

    pub fn enabled_sources(&self) -> Vec<Source> {
        Source::ALL.into_iter().filter(|s| self.settings(*s).enabled).collect()
    }

    /// Stops the loops; in-flight extractions abort at their next sleep.
    pub fn shutdown(&self) {
        self.cancel.cancel();
    }

    /// Queues `roll_number` for the next tick of `source`, bypassing the
    /// cadence filter, and wakes that source's loop.
    pub async fn request_refresh(&self, roll_number: &str, source: Source) {
        self.requests
            .lock()
            .await
            .entry(source)
            .or_default()
            .insert(roll_number.to_string());
        if let Some(wake) = self.wakeups.get(&source) {
            wake.notify_one();
        }
    }

    async fn take_requests(&self, source: Source) -> BTreeSet<String> {
        self.requests.lock().await.remove(&source).unwrap_or_default()
    }

    /// Runs one tick for `source`. A tick already in progress for the same
    /// source (its timer loop, the daily refresh) is waited for first.
    pub async fn tick(&self, source: Source, mode: TickMode) -> Result<TickSummary> {
        let lock = self.tick_locks.get(&source).cloned().unwrap_or_default();
        let _guard = lock.lock().await;
        let run_id = Uuid::new_v4();
        let settings = self.settings(source);
        let students = self
            .refresher
            .store()
            .list_active_students()
            .await
            .with_context(|| format!("listing active students for {source}"))?;
        let requested = self.take_requests(source).await;
        let now = Utc::now();

        let eligible: Vec<StudentRecord> = students
            .iter()
            .filter(|s| {
                mode == TickMode::Full
                    || requested.contains(&s.roll_number)
                    || is_due(s, source, settings.cadence, now)
            })
            .filter(|s| match s.resolve_identifier(source) {
                Ok(_) => true,
                Err(err) => {
                    debug!(%source, roll_number = %s.roll_number, error = %err, "no usable identifier");
                    false
                }
            })
            .cloned()
            .collect();

        let mut summary = TickSummary {
            run_id,
            source,
            mode,
            considered: students.len(),
            eligible: eligible.len(),
            refreshed: 0,
            stale: 0,
            failed: 0,
        };

        let batch_size = settings.concurrency.max(1);
        for (i, batch) in eligible.chunks(batch_size).enumerate() {
            if i > 0 && sleep_or_cancel(settings.delay, &self.cancel).await.is_err() {
                break;
            }
            let mut in_flight = JoinSet::new();
            for student in batch.iter().cloned() {
                let refresher = Arc::clone(&self.refresher);
                in_flight.spawn(async move { refresher.refresh_student(&student, source).await });
            }
            let mut cancelled = false;
            while let Some(joined) = in_flight.join_next().await {
                match joined {
                    Ok(Ok(RefreshOutcome::Updated { .. })) => summary.refreshed += 1,
                    Ok(Ok(RefreshOutcome::Stale)) => summary.stale += 1,
                    Ok(Err(err)) if err.is_cancelled() => cancelled = true,
                    Ok(Err(_)) => summary.failed += 1,
                    Err(join_err) => {
                        warn!(%source, error = %join_err, "refresh task panicked");
                        summary.failed += 1;
                    }
                }
            }
            if cancelled {
                break;
            }
        }

        info!(
            run_id = %summary.run_id,
            source = %summary.source,
            mode = %summary.mode,
            considered = summary.considered,
            eligible = summary.eligible,
            refreshed = summary.refreshed,
            stale = summary.stale,
            failed = summary.failed,
            "tick finished"
        );
        Ok(summary)
    }

    /// Every enabled source in turn, spaced by the full-refresh gap. A failed
    /// tick is logged and the next source still runs.
    pub async fn full_refresh(&self) -> Vec<TickSummary> {
        let mut summaries = Vec::new();
        for (i, source) in self.enabled_sources().into_iter().enumerate() {
            if i > 0 && sleep_or_cancel(self.full_refresh_gap, &self.cancel).await.is_err() {
                break;
            }
            match self.tick(source, TickMode::Full).await {
                Ok(summary) => summaries.push(summary),
                Err(err) => warn!(%source, error = %err, "full refresh tick aborted"),
            }
        }
        summaries
    }

    async fn run_source_loop(self: Arc<Self>, source: Source) {
        let cadence = self.settings(source).cadence;
        let wake = self.wakeups.get(&source).cloned().unwrap_or_default();
        loop {
            if let Err(err) = self.tick(source, TickMode::Cadence).await {
                warn!(%source, error = %err, "tick aborted");
            }
            tokio::select! {
                _ = self.cancel.cancelled() => break,
                _ = tokio::time::sleep(cadence) => {}
                _ = wake.notified() => {}
            }
        }
        info!(%source, "source loop stopped");
    }

    /// One timer loop per enabled source.
    pub fn spawn(self: &Arc<Self>) -> Vec<JoinHandle<()>> {
        self.enabled_sources()
            .into_iter()
            .map(|source| tokio::spawn(Arc::clone(self).run_source_loop(source)))
            .collect()
    }

    /// Cron job running [`Scheduler::full_refresh`] daily at `hour:minute`
    /// local time. The returned scheduler still has to be started.
    pub async fn daily_job(self: &Arc<Self>, hour: u32, minute: u32) -> Result<JobScheduler> {
        let sched = JobScheduler::new().await.context("creating scheduler")?;
        let cron = format!("0 {minute} {hour} * * *");
        let scheduler = Arc::clone(self);
        let job = Job::new_async_tz(cron.as_str(), chrono::Local, move |_uuid, _lock| {
            let scheduler = Arc::clone(&scheduler);
            Box::pin(async move {
                let summaries = scheduler.full_refresh().await;
                info!(ticks = summaries.len(), "daily full refresh finished");
            })
        })
        .with_context(|| format!("creating daily refresh job for cron {cron}"))?;
        sched.add(job).await.context("adding daily refresh job")?;
        Ok(sched)
    }
}
