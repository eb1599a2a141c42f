//! Reconciliation of job observations arriving from the poller and the stream.
//!
//! Both observers report into one [`JobLedger`] per client. The most recently
//! received observation wins, except that a job never leaves a terminal status
//! once one has been recorded for it.

use std::sync::{Arc, Mutex, MutexGuard};

use moka::sync::Cache;
use tokio::sync::broadcast;

use crate::model::{EnrichmentJob, EnrichmentProgressEvent, JobStatus};

/// How the ledger treated an incoming observation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Observation {
    /// Recorded; the job is still in progress.
    Accepted,
    /// Recorded; this observation moved the job into a terminal status.
    Latched,
    /// Confirms the terminal status already recorded.
    Confirmed,
    /// Ignored: the job already reached a different or terminal status.
    Stale,
}

#[derive(Debug, Clone)]
struct LedgerEntry {
    status: JobStatus,
    completed_rows: u64,
    total_rows: u64,
    progress_percent: Option<f64>,
    error: Option<String>,
    /// Last full snapshot seen through a lookup, patched by stream events.
    job: Option<EnrichmentJob>,
}

impl LedgerEntry {
    fn from_job(job: &EnrichmentJob) -> Self {
        Self {
            status: job.status,
            completed_rows: job.completed_rows,
            total_rows: job.total_rows,
            progress_percent: job.progress_percent,
            error: job.error_message.clone(),
            job: Some(job.clone()),
        }
    }

    fn apply_event(&mut self, event: &EnrichmentProgressEvent) {
        self.status = event.status;
        self.completed_rows = event.completed_rows;
        self.total_rows = event.total_rows;
        self.progress_percent = event.progress_percent;
        if event.error.is_some() {
            self.error = event.error.clone();
        }
        if let Some(job) = self.job.as_mut() {
            job.status = event.status;
            job.completed_rows = event.completed_rows;
            job.total_rows = event.total_rows;
            job.progress_percent = event.progress_percent;
            if event.error.is_some() {
                job.error_message = event.error.clone();
            }
        }
    }

    /// `job` with the status, counters and error recorded here.
    fn patch(&self, job: &EnrichmentJob) -> EnrichmentJob {
        let mut patched = job.clone();
        patched.status = self.status;
        patched.completed_rows = self.completed_rows;
        patched.total_rows = self.total_rows;
        patched.progress_percent = self.progress_percent;
        if self.error.is_some() {
            patched.error_message = self.error.clone();
        }
        patched
    }
}

/// Number of jobs a ledger remembers before the least used are evicted.
pub const DEFAULT_LEDGER_CAPACITY: u64 = 10_000;

type Slot = Arc<Mutex<Option<LedgerEntry>>>;

fn lock(slot: &Slot) -> MutexGuard<'_, Option<LedgerEntry>> {
    slot.lock().unwrap_or_else(|e| e.into_inner())
}

/// Last known status of the jobs a client has observed.
///
/// Bounded: once more than its capacity of jobs has been seen, the least
/// recently used entries are dropped and those jobs count as unobserved.
pub struct JobLedger {
    entries: Cache<String, Slot>,
    latched: broadcast::Sender<String>,
}

impl JobLedger {
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_LEDGER_CAPACITY)
    }

    pub fn with_capacity(capacity: u64) -> Self {
        let (latched, _) = broadcast::channel(64);
        Self {
            entries: Cache::builder().max_capacity(capacity).build(),
            latched,
        }
    }

    fn slot(&self, job_id: &str) -> Slot {
        self.entries
            .get_with(job_id.to_string(), || Arc::new(Mutex::new(None)))
    }

    fn read<T>(&self, job_id: &str, f: impl FnOnce(&LedgerEntry) -> Option<T>) -> Option<T> {
        let slot = self.entries.get(job_id)?;
        let entry = lock(&slot);
        entry.as_ref().and_then(f)
    }

    /// Records a snapshot returned by a lookup.
    ///
    /// A stale snapshot of a job known only from stream events becomes its
    /// terminal snapshot, patched with the recorded terminal state.
    pub fn record_job(&self, job: &EnrichmentJob) -> Observation {
        let slot = self.slot(&job.id);
        let mut entry = lock(&slot);
        let observation = match entry.as_mut() {
            Some(current) if current.status.is_terminal() => {
                if current.status != job.status {
                    if current.job.is_none() {
                        current.job = Some(current.patch(job));
                    }
                    return self.stale(&job.id, current.status, job.status);
                }
                *current = LedgerEntry::from_job(job);
                Observation::Confirmed
            }
            Some(current) => {
                *current = LedgerEntry::from_job(job);
                classify(job.status)
            }
            None => {
                *entry = Some(LedgerEntry::from_job(job));
                classify(job.status)
            }
        };
        drop(entry);

        self.announce(&job.id, observation);
        observation
    }

    /// Records an event pushed over a progress stream.
    pub fn record_event(&self, event: &EnrichmentProgressEvent) -> Observation {
        let slot = self.slot(&event.job_id);
        let mut entry = lock(&slot);
        let observation = match entry.as_mut() {
            Some(current) if current.status.is_terminal() => {
                if current.status != event.status {
                    return self.stale(&event.job_id, current.status, event.status);
                }
                current.apply_event(event);
                Observation::Confirmed
            }
            Some(current) => {
                current.apply_event(event);
                classify(event.status)
            }
            None => {
                let mut fresh = LedgerEntry {
                    status: event.status,
                    completed_rows: 0,
                    total_rows: 0,
                    progress_percent: None,
                    error: None,
                    job: None,
                };
                fresh.apply_event(event);
                *entry = Some(fresh);
                classify(event.status)
            }
        };
        drop(entry);

        self.announce(&event.job_id, observation);
        observation
    }

    /// Recorded status of a job, if it has been observed.
    pub fn status(&self, job_id: &str) -> Option<JobStatus> {
        self.read(job_id, |entry| Some(entry.status))
    }

    pub fn is_terminal(&self, job_id: &str) -> bool {
        self.status(job_id).is_some_and(|status| status.is_terminal())
    }

    /// Full snapshot of a job whose terminal status is recorded.
    pub fn terminal_snapshot(&self, job_id: &str) -> Option<EnrichmentJob> {
        self.read(job_id, |entry| {
            entry
                .job
                .clone()
                .filter(|_| entry.status.is_terminal())
        })
    }

    /// The recorded terminal status of a job, shaped as a progress event.
    pub fn terminal_event(&self, job_id: &str) -> Option<EnrichmentProgressEvent> {
        self.read(job_id, |entry| {
            entry.status.is_terminal().then(|| EnrichmentProgressEvent {
                job_id: job_id.to_string(),
                status: entry.status,
                completed_rows: entry.completed_rows,
                total_rows: entry.total_rows,
                progress_percent: entry.progress_percent,
                current_row_id: None,
                current_result: None,
                error: entry.error.clone(),
            })
        })
    }

    /// Records a looked-up job and returns what callers should see: the
    /// recorded terminal state when the lookup is stale, the job otherwise.
    pub fn settle(&self, job: EnrichmentJob) -> EnrichmentJob {
        match self.record_job(&job) {
            Observation::Stale => self.terminal_snapshot(&job.id).unwrap_or(job),
            _ => job,
        }
    }

    /// Records every job of a list, swapping stale entries for their terminal snapshot.
    pub fn reconcile(&self, jobs: Vec<EnrichmentJob>) -> Vec<EnrichmentJob> {
        jobs.into_iter().map(|job| self.settle(job)).collect()
    }

    /// Export a known job belongs to.
    pub fn export_of(&self, job_id: &str) -> Option<String> {
        self.read(job_id, |entry| {
            entry.job.as_ref().map(|job| job.export_id.clone())
        })
    }

    /// Receives the id of every job that reaches a terminal status.
    pub fn subscribe_latched(&self) -> broadcast::Receiver<String> {
        self.latched.subscribe()
    }

    fn announce(&self, job_id: &str, observation: Observation) {
        if observation == Observation::Latched {
            log::debug!("Job {} reached a terminal status", job_id);
            // No watchers is fine
            let _ = self.latched.send(job_id.to_string());
        }
    }

    fn stale(&self, job_id: &str, recorded: JobStatus, observed: JobStatus) -> Observation {
        log::debug!(
            "Ignoring '{}' for job {}: already {}",
            observed,
            job_id,
            recorded
        );
        Observation::Stale
    }
}

impl Default for JobLedger {
    fn default() -> Self {
        Self::new()
    }
}

fn classify(status: JobStatus) -> Observation {
    if status.is_terminal() {
        Observation::Latched
    } else {
        Observation::Accepted
    }
}
