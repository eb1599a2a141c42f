use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::Instrument;

use super::PollState;
use crate::api::EnrichmentApi;
use crate::cache::QueryCache;
use crate::model::EnrichmentJob;
use crate::observe::JobLedger;

type JobList = Arc<Vec<EnrichmentJob>>;

/// Live list of an export's jobs, refreshed until stopped.
pub struct ExportJobsWatch {
    export_id: String,
    receiver: watch::Receiver<Option<JobList>>,
    state: Arc<PollState>,
    task: JoinHandle<()>,
}

impl ExportJobsWatch {
    pub(crate) fn spawn(
        api: Arc<dyn EnrichmentApi>,
        ledger: Arc<JobLedger>,
        cache: QueryCache,
        export_id: &str,
        period: Duration,
    ) -> Self {
        let (sender, receiver) = watch::channel(None);
        let state = Arc::new(PollState::new(true));
        let span = tracing::info_span!("export_jobs_watch", export_id = %export_id);
        let task = tokio::spawn(
            poll_export(
                api,
                ledger,
                cache,
                Arc::clone(&state),
                export_id.to_string(),
                period,
                sender,
            )
            .instrument(span),
        );

        Self {
            export_id: export_id.to_string(),
            receiver,
            state,
            task,
        }
    }

    pub fn export_id(&self) -> &str {
        &self.export_id
    }

    /// Most recent list in backend order, `None` until the first fetch succeeds.
    pub fn latest(&self) -> Option<JobList> {
        self.receiver.borrow().clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<Option<JobList>> {
        self.receiver.clone()
    }

    /// Waits for the next published list. `None` once polling has ended.
    pub async fn changed(&mut self) -> Option<JobList> {
        self.receiver.changed().await.ok()?;
        self.receiver.borrow_and_update().clone()
    }

    pub fn is_polling(&self) -> bool {
        self.state.is_polling()
    }

    pub fn last_error(&self) -> Option<String> {
        self.state.last_error()
    }

    pub fn stop(&self) {
        if self.state.stop() {
            log::debug!("Stopped watching jobs of export {}", self.export_id);
        }
        self.task.abort();
    }
}

impl Drop for ExportJobsWatch {
    fn drop(&mut self) {
        self.stop();
    }
}

async fn poll_export(
    api: Arc<dyn EnrichmentApi>,
    ledger: Arc<JobLedger>,
    cache: QueryCache,
    state: Arc<PollState>,
    export_id: String,
    period: Duration,
    sender: watch::Sender<Option<JobList>>,
) {
    let mut ticker = tokio::time::interval(period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        ticker.tick().await;

        let result = api.list_export_jobs(&export_id).await;
        if state.is_stopped() {
            return;
        }

        match result {
            Ok(jobs) => {
                state.clear_error();
                let jobs: JobList = Arc::new(ledger.reconcile(jobs));
                cache.store_export_jobs(&export_id, Arc::clone(&jobs)).await;
                sender.send_replace(Some(jobs));
            }
            Err(e) => {
                log::warn!("Failed to refresh jobs of export {}: {}", export_id, e);
                state.set_error(&e);
            }
        }
    }
}
