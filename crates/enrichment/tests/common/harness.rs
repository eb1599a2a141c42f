//! In-memory backend and listener doubles.

#![allow(dead_code)]

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use futures_util::StreamExt;
use tokio::sync::mpsc;

use enrichment::{
    ClientConfig, CreateJobRequest, EnrichmentApi, EnrichmentError, EnrichmentJob,
    EnrichmentJobClient, EnrichmentProgressEvent, JobStatus, ProcessorInfo, ProgressListener,
    ProgressStream, Result,
};

use super::builders::catalog;

/// Scripted stand-in for the enrichment backend.
///
/// `get_job` walks through the snapshots scripted for a job and then keeps
/// returning the last one.
#[derive(Default)]
pub struct FakeBackend {
    jobs: Mutex<HashMap<String, VecDeque<EnrichmentJob>>>,
    exports: Mutex<HashMap<String, Vec<EnrichmentJob>>>,
    streams: Mutex<HashMap<String, mpsc::UnboundedReceiver<Result<String>>>>,
    create_failure: Mutex<Option<String>>,
    cancel_failure: Mutex<Option<String>>,
    processor_delay: Mutex<Option<Duration>>,

    pub processor_calls: AtomicUsize,
    pub create_calls: AtomicUsize,
    pub get_calls: AtomicUsize,
    pub cancel_calls: AtomicUsize,
    pub list_calls: AtomicUsize,
}

impl FakeBackend {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Snapshots `get_job` returns for this job, in order.
    pub fn script_job(&self, snapshots: Vec<EnrichmentJob>) {
        if let Some(first) = snapshots.first() {
            let id = first.id.clone();
            self.jobs.lock().unwrap().insert(id, snapshots.into());
        }
    }

    pub fn set_export_jobs(&self, export_id: &str, jobs: Vec<EnrichmentJob>) {
        self.exports
            .lock()
            .unwrap()
            .insert(export_id.to_string(), jobs);
    }

    /// The next `create_job` is rejected with this detail.
    pub fn fail_next_create(&self, detail: &str) {
        *self.create_failure.lock().unwrap() = Some(detail.to_string());
    }

    /// The next `cancel_job` is rejected with this detail.
    pub fn fail_next_cancel(&self, detail: &str) {
        *self.cancel_failure.lock().unwrap() = Some(detail.to_string());
    }

    pub fn delay_processors(&self, delay: Duration) {
        *self.processor_delay.lock().unwrap() = Some(delay);
    }

    /// Prepares the progress stream of a job; the returned handle feeds it.
    pub fn stream(&self, job_id: &str) -> StreamScript {
        let (tx, rx) = mpsc::unbounded_channel();
        self.streams.lock().unwrap().insert(job_id.to_string(), rx);
        StreamScript { tx }
    }

    /// Status `get_job` currently reports for a job.
    pub fn current_status(&self, job_id: &str) -> Option<JobStatus> {
        self.jobs
            .lock()
            .unwrap()
            .get(job_id)
            .and_then(|snapshots| snapshots.front())
            .map(|job| job.status)
    }

    pub fn count(counter: &AtomicUsize) -> usize {
        counter.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl EnrichmentApi for FakeBackend {
    async fn list_processors(&self) -> Result<Vec<ProcessorInfo>> {
        self.processor_calls.fetch_add(1, Ordering::SeqCst);
        let delay = *self.processor_delay.lock().unwrap();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        Ok(catalog())
    }

    async fn create_job(&self, request: &CreateJobRequest) -> Result<EnrichmentJob> {
        self.create_calls.fetch_add(1, Ordering::SeqCst);
        if let Some(detail) = self.create_failure.lock().unwrap().take() {
            return Err(EnrichmentError::BackendRejected(detail));
        }

        let job = EnrichmentJob {
            id: uuid::Uuid::new_v4().to_string(),
            export_id: request.export_id.clone(),
            column_key: request.column_name.to_lowercase().replace(' ', "_"),
            column_name: request.column_name.clone(),
            prompt: request.prompt.clone(),
            processor: Some(request.processor.unwrap_or_default().to_string()),
            status: JobStatus::Pending,
            total_rows: 10,
            completed_rows: 0,
            failed_rows: 0,
            taskgroup_id: None,
            error_message: None,
            created_at: Some(chrono::Utc::now()),
            started_at: None,
            completed_at: None,
            progress_percent: Some(0.0),
        };

        self.jobs
            .lock()
            .unwrap()
            .insert(job.id.clone(), VecDeque::from([job.clone()]));
        self.exports
            .lock()
            .unwrap()
            .entry(job.export_id.clone())
            .or_default()
            .insert(0, job.clone());
        Ok(job)
    }

    async fn get_job(&self, job_id: &str) -> Result<EnrichmentJob> {
        self.get_calls.fetch_add(1, Ordering::SeqCst);
        let mut jobs = self.jobs.lock().unwrap();
        let snapshots = jobs
            .get_mut(job_id)
            .ok_or_else(|| EnrichmentError::NotFound("Enrichment job not found".to_string()))?;
        let job = if snapshots.len() > 1 {
            snapshots.pop_front()
        } else {
            snapshots.front().cloned()
        };
        job.ok_or_else(|| EnrichmentError::NotFound("Enrichment job not found".to_string()))
    }

    async fn cancel_job(&self, job_id: &str) -> Result<()> {
        self.cancel_calls.fetch_add(1, Ordering::SeqCst);
        if let Some(detail) = self.cancel_failure.lock().unwrap().take() {
            return Err(EnrichmentError::BackendRejected(detail));
        }

        let mut jobs = self.jobs.lock().unwrap();
        let snapshots = jobs
            .get_mut(job_id)
            .ok_or_else(|| EnrichmentError::NotFound("Enrichment job not found".to_string()))?;
        if let Some(last) = snapshots.back().cloned() {
            if !last.is_terminal() {
                let mut cancelled = last;
                cancelled.status = JobStatus::Cancelled;
                *snapshots = VecDeque::from([cancelled]);
            }
        }
        Ok(())
    }

    async fn list_export_jobs(&self, export_id: &str) -> Result<Vec<EnrichmentJob>> {
        self.list_calls.fetch_add(1, Ordering::SeqCst);
        Ok(self
            .exports
            .lock()
            .unwrap()
            .get(export_id)
            .cloned()
            .unwrap_or_default())
    }

    async fn open_progress_stream(&self, job_id: &str) -> Result<ProgressStream> {
        let mut rx = self
            .streams
            .lock()
            .unwrap()
            .remove(job_id)
            .ok_or_else(|| EnrichmentError::network("Failed to open progress stream"))?;
        Ok(futures_util::stream::poll_fn(move |cx| rx.poll_recv(cx)).boxed())
    }
}

/// Feeds one job's progress stream. Dropping it ends the stream.
pub struct StreamScript {
    tx: mpsc::UnboundedSender<Result<String>>,
}

impl StreamScript {
    pub fn event(&self, event: &EnrichmentProgressEvent) {
        let _ = self.tx.send(Ok(serde_json::to_string(event).unwrap()));
    }

    pub fn raw(&self, payload: &str) {
        let _ = self.tx.send(Ok(payload.to_string()));
    }

    pub fn fail(&self, message: &str) {
        let _ = self
            .tx
            .send(Err(EnrichmentError::StreamTransport(message.to_string())));
    }

    /// True once the client side has closed the channel.
    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }
}

/// Client over `backend` with the default intervals (job 5s, export 10s).
pub fn client_for(backend: &Arc<FakeBackend>) -> EnrichmentJobClient {
    EnrichmentJobClient::with_api(backend.clone(), &ClientConfig::default()).unwrap()
}

/// One progress callback as seen by a listener.
#[derive(Debug, Clone, PartialEq)]
pub enum Call {
    Event(JobStatus, f64),
    Error(String),
    Complete,
}

pub struct RecordingListener {
    tx: mpsc::UnboundedSender<Call>,
}

pub fn recorder() -> (RecordingListener, mpsc::UnboundedReceiver<Call>) {
    let (tx, rx) = mpsc::unbounded_channel();
    (RecordingListener { tx }, rx)
}

impl ProgressListener for RecordingListener {
    fn on_event(&mut self, event: &EnrichmentProgressEvent) {
        let _ = self.tx.send(Call::Event(event.status, event.progress()));
    }

    fn on_error(&mut self, error: EnrichmentError) {
        let _ = self.tx.send(Call::Error(error.to_string()));
    }

    fn on_complete(&mut self) {
        let _ = self.tx.send(Call::Complete);
    }
}

/// Collects calls until the listener is dropped or nothing arrives for a second.
pub async fn drain(calls: &mut mpsc::UnboundedReceiver<Call>) -> Vec<Call> {
    let mut seen = Vec::new();
    while let Ok(Some(call)) = tokio::time::timeout(Duration::from_secs(1), calls.recv()).await {
        seen.push(call);
    }
    seen
}
