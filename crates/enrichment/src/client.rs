//! Client-side lifecycle of enrichment jobs.

use std::sync::Arc;
use std::time::Duration;

use crate::api::{EnrichmentApi, HttpEnrichmentApi};
use crate::cache::QueryCache;
use crate::config::ClientConfig;
use crate::error::Result;
use crate::model::{CreateJobRequest, EnrichmentJob, ProcessorInfo};
use crate::observe::JobLedger;
use crate::stream::{ProgressListener, ProgressSubscription};
use crate::watch::{ExportJobsWatch, JobWatch};

/// Entry point for creating, observing and cancelling enrichment jobs.
///
/// Each client keeps its own request cache and [`JobLedger`]; watches and
/// progress subscriptions created from the same client agree on which jobs
/// have finished.
pub struct EnrichmentJobClient {
    api: Arc<dyn EnrichmentApi>,
    cache: QueryCache,
    ledger: Arc<JobLedger>,
    job_poll_interval: Duration,
    export_poll_interval: Duration,
}

impl EnrichmentJobClient {
    /// Client talking HTTP to the backend described by `config`.
    pub fn from_config(config: &ClientConfig) -> Result<Self> {
        config.validate()?;
        let api = HttpEnrichmentApi::new(config)?;
        log::debug!("Enrichment API at {}", api.root());
        Self::with_api(Arc::new(api), config)
    }

    /// Client over any [`EnrichmentApi`], using the intervals from `config`.
    /// Fails when `config` does not validate.
    pub fn with_api(api: Arc<dyn EnrichmentApi>, config: &ClientConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            api,
            cache: QueryCache::new(config.export_poll_interval()),
            ledger: Arc::new(JobLedger::new()),
            job_poll_interval: config.job_poll_interval(),
            export_poll_interval: config.export_poll_interval(),
        })
    }

    pub fn ledger(&self) -> &Arc<JobLedger> {
        &self.ledger
    }

    /// The processor catalog. Fetched once per client; concurrent callers share the request.
    pub async fn list_processors(&self) -> Result<Vec<ProcessorInfo>> {
        let api = Arc::clone(&self.api);
        let catalog = self
            .cache
            .processors(async move { api.list_processors().await })
            .await?;
        Ok(catalog.as_ref().clone())
    }

    /// Starts a job. Sent exactly once; a failure is returned, never retried.
    pub async fn create_job(&self, request: CreateJobRequest) -> Result<EnrichmentJob> {
        log::info!(
            "Creating enrichment job for column '{}' of export {}",
            request.column_name,
            request.export_id
        );
        let job = self.api.create_job(&request).await?;
        log::info!("Created enrichment job {} ({})", job.id, job.status);

        self.ledger.record_job(&job);
        self.cache.invalidate_export(&job.export_id).await;
        Ok(job)
    }

    /// One fresh lookup of a job. A job already seen in a terminal status is
    /// returned in that status, whatever the backend reports now.
    pub async fn get_job(&self, job_id: &str) -> Result<EnrichmentJob> {
        let job = self.api.get_job(job_id).await?;
        Ok(self.ledger.settle(job))
    }

    /// Polls a job every job poll interval until it reaches a terminal status.
    pub fn watch_job(&self, job_id: &str) -> JobWatch {
        JobWatch::spawn(
            Arc::clone(&self.api),
            Arc::clone(&self.ledger),
            job_id,
            self.job_poll_interval,
        )
    }

    /// Requests cancellation. Sent exactly once. Local job state is left to
    /// the next observation, since the job may already have finished.
    pub async fn cancel_job(&self, job_id: &str) -> Result<()> {
        log::info!("Cancelling enrichment job {}", job_id);
        self.api.cancel_job(job_id).await?;

        match self.ledger.export_of(job_id) {
            Some(export_id) => self.cache.invalidate_export(&export_id).await,
            None => self.cache.invalidate_all_exports(),
        }
        Ok(())
    }

    /// Jobs of an export in backend order, reused for up to one export poll interval.
    pub async fn list_export_jobs(&self, export_id: &str) -> Result<Vec<EnrichmentJob>> {
        let api = Arc::clone(&self.api);
        let ledger = Arc::clone(&self.ledger);
        let id = export_id.to_string();
        let jobs = self
            .cache
            .export_jobs(export_id, async move {
                let jobs = api.list_export_jobs(&id).await?;
                Ok(ledger.reconcile(jobs))
            })
            .await?;
        Ok(jobs.as_ref().clone())
    }

    /// Polls an export's job list every export poll interval until stopped.
    pub fn watch_export_jobs(&self, export_id: &str) -> ExportJobsWatch {
        ExportJobsWatch::spawn(
            Arc::clone(&self.api),
            Arc::clone(&self.ledger),
            self.cache.clone(),
            export_id,
            self.export_poll_interval,
        )
    }

    /// Subscribes `listener` to the job's pushed progress.
    pub fn stream_job_progress<L: ProgressListener>(
        &self,
        job_id: &str,
        listener: L,
    ) -> ProgressSubscription {
        ProgressSubscription::spawn(
            Arc::clone(&self.api),
            Arc::clone(&self.ledger),
            job_id,
            listener,
        )
    }
}
