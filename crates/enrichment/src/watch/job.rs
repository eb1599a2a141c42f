use std::sync::Arc;
use std::time::Duration;

use tokio::sync::broadcast::error::RecvError;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::Instrument;

use super::PollState;
use crate::api::EnrichmentApi;
use crate::model::EnrichmentJob;
use crate::observe::JobLedger;

/// Live view of one job, refreshed until it reaches a terminal status.
///
/// The last fetched value stays readable after polling ends, whether it ended
/// on a terminal status, a missing job, or [`JobWatch::stop`].
pub struct JobWatch {
    job_id: String,
    receiver: watch::Receiver<Option<EnrichmentJob>>,
    state: Arc<PollState>,
    task: Option<JoinHandle<()>>,
}

impl JobWatch {
    pub(crate) fn spawn(
        api: Arc<dyn EnrichmentApi>,
        ledger: Arc<JobLedger>,
        job_id: &str,
        period: Duration,
    ) -> Self {
        // A job already known to be finished is never fetched again.
        if let Some(job) = ledger.terminal_snapshot(job_id) {
            log::debug!("Job {} already {}; not polling", job_id, job.status);
            let (_, receiver) = watch::channel(Some(job));
            return Self {
                job_id: job_id.to_string(),
                receiver,
                state: Arc::new(PollState::new(false)),
                task: None,
            };
        }

        let (sender, receiver) = watch::channel(None);
        let state = Arc::new(PollState::new(true));
        let span = tracing::info_span!("job_watch", job_id = %job_id);
        let task = tokio::spawn(
            poll_job(
                api,
                ledger,
                Arc::clone(&state),
                job_id.to_string(),
                period,
                sender,
            )
            .instrument(span),
        );

        Self {
            job_id: job_id.to_string(),
            receiver,
            state,
            task: Some(task),
        }
    }

    pub fn job_id(&self) -> &str {
        &self.job_id
    }

    /// Most recent snapshot, `None` until the first fetch succeeds.
    pub fn latest(&self) -> Option<EnrichmentJob> {
        self.receiver.borrow().clone()
    }

    /// A receiver that sees every published snapshot.
    pub fn subscribe(&self) -> watch::Receiver<Option<EnrichmentJob>> {
        self.receiver.clone()
    }

    /// Waits for the next published snapshot. `None` once polling has ended.
    pub async fn changed(&mut self) -> Option<EnrichmentJob> {
        self.receiver.changed().await.ok()?;
        self.receiver.borrow_and_update().clone()
    }

    /// Waits until a terminal snapshot is published.
    /// Returns `None` if polling ends without one.
    pub async fn wait_for_terminal(&mut self) -> Option<EnrichmentJob> {
        loop {
            let current = self.receiver.borrow_and_update().clone();
            if let Some(job) = current.filter(EnrichmentJob::is_terminal) {
                return Some(job);
            }
            if self.receiver.changed().await.is_err() {
                return None;
            }
        }
    }

    /// True while the interval timer is running.
    pub fn is_polling(&self) -> bool {
        self.state.is_polling()
    }

    /// Message of the latest failed fetch, cleared by the next success.
    pub fn last_error(&self) -> Option<String> {
        self.state.last_error()
    }

    /// Stops polling. The last fetched value stays readable.
    pub fn stop(&self) {
        if self.state.stop() {
            log::debug!("Stopped watching job {}", self.job_id);
        }
        if let Some(task) = &self.task {
            task.abort();
        }
    }
}

impl Drop for JobWatch {
    fn drop(&mut self) {
        self.stop();
    }
}

async fn poll_job(
    api: Arc<dyn EnrichmentApi>,
    ledger: Arc<JobLedger>,
    state: Arc<PollState>,
    job_id: String,
    period: Duration,
    sender: watch::Sender<Option<EnrichmentJob>>,
) {
    let mut latched = ledger.subscribe_latched();
    let mut latch_open = true;
    let mut ticker = tokio::time::interval(period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            _ = ticker.tick() => {}
            latch = latched.recv(), if latch_open => match latch {
                Ok(id) if id != job_id => continue,
                Ok(_) | Err(RecvError::Lagged(_)) => {}
                Err(RecvError::Closed) => {
                    latch_open = false;
                    continue;
                }
            },
        }

        // Finished through another observer since the last tick.
        if ledger.is_terminal(&job_id) {
            publish_recorded(api.as_ref(), &ledger, &state, &job_id, &sender).await;
            break;
        }

        let result = api.get_job(&job_id).await;
        if state.is_stopped() {
            return;
        }

        match result {
            Ok(job) => {
                state.clear_error();
                let job = ledger.settle(job);
                let terminal = job.is_terminal();
                sender.send_replace(Some(job));
                if terminal {
                    break;
                }
            }
            Err(e) if e.is_not_found() => {
                log::warn!("Job {} not found; stopping watch", job_id);
                state.set_error(&e);
                break;
            }
            Err(e) => {
                log::warn!("Failed to refresh job {}: {}", job_id, e);
                state.set_error(&e);
            }
        }
    }

    state.finish();
    log::debug!("Stopped polling job {}", job_id);
}

/// Publishes the terminal state the ledger holds for a job. Without a full
/// snapshot, the last published value is patched with it, or the job is
/// looked up once when nothing was published yet.
async fn publish_recorded(
    api: &dyn EnrichmentApi,
    ledger: &JobLedger,
    state: &PollState,
    job_id: &str,
    sender: &watch::Sender<Option<EnrichmentJob>>,
) {
    if ledger.terminal_snapshot(job_id).is_none() {
        let published = sender.borrow().clone();
        let base = match published {
            Some(job) => job,
            None => match api.get_job(job_id).await {
                Ok(job) => job,
                Err(e) => {
                    log::warn!("Failed to look up finished job {}: {}", job_id, e);
                    state.set_error(&e);
                    return;
                }
            },
        };
        ledger.settle(base);
    }

    if let Some(job) = ledger.terminal_snapshot(job_id) {
        sender.send_replace(Some(job));
    }
}
