//! Push-based progress subscription for a single job.
//!
//! Callback ordering for one subscription:
//! - `on_event` for each well-formed message, in arrival order;
//! - `on_complete` once, right after the terminal event, with the channel already closed;
//! - `on_error` once if the channel fails, after which nothing else is delivered.
//!
//! [`ProgressSubscription::dispose`] closes the channel and stops all further callbacks.

use std::future::poll_fn;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::task::{Context, Poll};
use std::thread::{self, ThreadId};

use futures_util::StreamExt;
use tokio::task::JoinHandle;
use tracing::Instrument;

use crate::api::{EnrichmentApi, ProgressStream};
use crate::error::{EnrichmentError, Result};
use crate::model::EnrichmentProgressEvent;
use crate::observe::{JobLedger, Observation};

/// Receives the progress of one job.
pub trait ProgressListener: Send + 'static {
    fn on_event(&mut self, event: &EnrichmentProgressEvent);

    /// The channel failed before a terminal event arrived.
    fn on_error(&mut self, _error: EnrichmentError) {}

    /// The terminal event has been delivered.
    fn on_complete(&mut self) {}
}

type EventFn = Box<dyn FnMut(&EnrichmentProgressEvent) + Send>;
type ErrorFn = Box<dyn FnMut(EnrichmentError) + Send>;
type CompleteFn = Box<dyn FnMut() + Send>;

/// [`ProgressListener`] assembled from closures.
pub struct ProgressCallbacks {
    on_event: EventFn,
    on_error: Option<ErrorFn>,
    on_complete: Option<CompleteFn>,
}

impl ProgressCallbacks {
    pub fn new(on_event: impl FnMut(&EnrichmentProgressEvent) + Send + 'static) -> Self {
        Self {
            on_event: Box::new(on_event),
            on_error: None,
            on_complete: None,
        }
    }

    pub fn on_error(mut self, f: impl FnMut(EnrichmentError) + Send + 'static) -> Self {
        self.on_error = Some(Box::new(f));
        self
    }

    pub fn on_complete(mut self, f: impl FnMut() + Send + 'static) -> Self {
        self.on_complete = Some(Box::new(f));
        self
    }
}

impl ProgressListener for ProgressCallbacks {
    fn on_event(&mut self, event: &EnrichmentProgressEvent) {
        (self.on_event)(event)
    }

    fn on_error(&mut self, error: EnrichmentError) {
        match self.on_error.as_mut() {
            Some(f) => f(error),
            None => log::warn!("Progress stream error: {}", error),
        }
    }

    fn on_complete(&mut self) {
        if let Some(f) = self.on_complete.as_mut() {
            f()
        }
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|e| e.into_inner())
}

/// State shared between a subscription handle and its reader task.
struct Channel {
    closed: AtomicBool,
    stream: Mutex<Option<ProgressStream>>,
    /// Held while a callback runs.
    delivery: Mutex<()>,
    /// Thread currently running a callback, if any.
    deliverer: Mutex<Option<ThreadId>>,
}

impl Channel {
    fn new() -> Self {
        Self {
            closed: AtomicBool::new(false),
            stream: Mutex::new(None),
            delivery: Mutex::new(()),
            deliverer: Mutex::new(None),
        }
    }

    fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    /// Hands the opened stream over. Returns `false` (and drops it) when already closed.
    fn attach(&self, stream: ProgressStream) -> bool {
        let mut slot = lock(&self.stream);
        if self.is_closed() {
            return false;
        }
        *slot = Some(stream);
        true
    }

    fn poll_next(&self, cx: &mut Context<'_>) -> Poll<Option<Result<String>>> {
        match lock(&self.stream).as_mut() {
            Some(stream) => stream.poll_next_unpin(cx),
            None => Poll::Ready(None),
        }
    }

    /// Marks the channel closed and drops the stream. Returns `true` on the first call.
    fn shut(&self) -> bool {
        if self.closed.swap(true, Ordering::AcqRel) {
            return false;
        }
        drop(lock(&self.stream).take());
        true
    }

    /// Runs a callback unless the channel is closed. With `last`, the channel
    /// is closed before the callback runs and nothing is delivered after it.
    fn deliver(&self, last: bool, callback: impl FnOnce()) -> bool {
        let _gate = lock(&self.delivery);
        if self.is_closed() {
            return false;
        }
        if last {
            self.shut();
        }

        *lock(&self.deliverer) = Some(thread::current().id());
        let _reset = DelivererReset(self);
        callback();
        true
    }

    fn dispose(&self) {
        self.shut();
        // A callback may dispose its own subscription; only wait for callbacks on other threads.
        let delivering_here = *lock(&self.deliverer) == Some(thread::current().id());
        if !delivering_here {
            drop(lock(&self.delivery));
        }
    }
}

struct DelivererReset<'a>(&'a Channel);

impl Drop for DelivererReset<'_> {
    fn drop(&mut self) {
        *lock(&self.0.deliverer) = None;
    }
}

/// Handle to a live progress subscription. Dropping it disposes it.
pub struct ProgressSubscription {
    job_id: String,
    channel: Arc<Channel>,
    task: JoinHandle<()>,
}

impl ProgressSubscription {
    pub(crate) fn spawn<L: ProgressListener>(
        api: Arc<dyn EnrichmentApi>,
        ledger: Arc<JobLedger>,
        job_id: &str,
        listener: L,
    ) -> Self {
        let channel = Arc::new(Channel::new());
        let span = tracing::info_span!("progress_stream", job_id = %job_id);
        let task = tokio::spawn(
            read_progress(api, ledger, Arc::clone(&channel), job_id.to_string(), listener)
                .instrument(span),
        );

        Self {
            job_id: job_id.to_string(),
            channel,
            task,
        }
    }

    pub fn job_id(&self) -> &str {
        &self.job_id
    }

    /// True once the channel is closed, whichever way it ended.
    pub fn is_closed(&self) -> bool {
        self.channel.is_closed()
    }

    /// Closes the channel. No callback starts after this returns.
    /// Safe to call repeatedly and after the subscription already ended.
    pub fn dispose(&self) {
        if !self.channel.is_closed() {
            log::debug!("Disposing progress subscription for job {}", self.job_id);
        }
        self.channel.dispose();
        self.task.abort();
    }
}

impl Drop for ProgressSubscription {
    fn drop(&mut self) {
        self.dispose();
    }
}

async fn read_progress<L: ProgressListener>(
    api: Arc<dyn EnrichmentApi>,
    ledger: Arc<JobLedger>,
    channel: Arc<Channel>,
    job_id: String,
    mut listener: L,
) {
    let stream = match api.open_progress_stream(&job_id).await {
        Ok(stream) => stream,
        Err(e) => {
            log::warn!("Could not open progress stream: {}", e);
            let err = match e {
                EnrichmentError::StreamTransport(_) => e,
                other => EnrichmentError::StreamTransport(other.user_message()),
            };
            channel.deliver(true, || listener.on_error(err));
            return;
        }
    };
    if !channel.attach(stream) {
        return;
    }
    log::debug!("Progress stream open");

    loop {
        let item = poll_fn(|cx| channel.poll_next(cx)).await;
        if channel.is_closed() {
            return;
        }

        let payload = match item {
            Some(Ok(payload)) => payload,
            Some(Err(e)) => {
                log::warn!("Progress stream failed: {}", e);
                channel.deliver(true, || listener.on_error(e));
                return;
            }
            None => {
                log::warn!("Progress stream ended before the job finished");
                let err = EnrichmentError::StreamTransport(
                    "stream ended before the job finished".to_string(),
                );
                channel.deliver(true, || listener.on_error(err));
                return;
            }
        };

        let event = match EnrichmentProgressEvent::parse(&payload) {
            Ok(event) => event,
            Err(source) => {
                let err = EnrichmentError::MalformedEvent { payload, source };
                log::warn!("Skipping progress message: {}", err);
                continue;
            }
        };

        let event = match ledger.record_event(&event) {
            Observation::Stale => match ledger.terminal_event(&job_id) {
                // The job already ended through another observer.
                Some(terminal) => terminal,
                None => continue,
            },
            _ => event,
        };

        if !channel.deliver(false, || listener.on_event(&event)) {
            return;
        }
        if event.is_terminal() {
            log::info!("Job {} finished with status {}", job_id, event.status);
            channel.deliver(true, || listener.on_complete());
            return;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{CreateJobRequest, EnrichmentJob, ProcessorInfo};
    use async_trait::async_trait;
    use std::time::Duration;
    use tokio::sync::mpsc;

    /// Serves one scripted progress stream.
    struct ScriptedApi {
        frames: Mutex<Option<mpsc::UnboundedReceiver<Result<String>>>>,
    }

    #[async_trait]
    impl EnrichmentApi for ScriptedApi {
        async fn list_processors(&self) -> Result<Vec<ProcessorInfo>> {
            Ok(Vec::new())
        }
        async fn create_job(&self, _request: &CreateJobRequest) -> Result<EnrichmentJob> {
            Err(EnrichmentError::network("unused"))
        }
        async fn get_job(&self, _job_id: &str) -> Result<EnrichmentJob> {
            Err(EnrichmentError::network("unused"))
        }
        async fn cancel_job(&self, _job_id: &str) -> Result<()> {
            Ok(())
        }
        async fn list_export_jobs(&self, _export_id: &str) -> Result<Vec<EnrichmentJob>> {
            Ok(Vec::new())
        }
        async fn open_progress_stream(&self, _job_id: &str) -> Result<ProgressStream> {
            let mut rx = lock(&self.frames)
                .take()
                .ok_or_else(|| EnrichmentError::network("stream already opened"))?;
            Ok(futures_util::stream::poll_fn(move |cx| rx.poll_recv(cx)).boxed())
        }
    }

    #[derive(Debug, PartialEq)]
    enum Call {
        Event(u64),
        Error,
        Complete,
    }

    struct Recorder(mpsc::UnboundedSender<Call>);

    impl ProgressListener for Recorder {
        fn on_event(&mut self, event: &EnrichmentProgressEvent) {
            let _ = self.0.send(Call::Event(event.completed_rows));
        }
        fn on_error(&mut self, _error: EnrichmentError) {
            let _ = self.0.send(Call::Error);
        }
        fn on_complete(&mut self) {
            let _ = self.0.send(Call::Complete);
        }
    }

    fn frame(status: &str, completed: u64) -> Result<String> {
        Ok(format!(
            r#"{{"job_id":"j1","status":"{}","completed_rows":{},"total_rows":2}}"#,
            status, completed
        ))
    }

    fn subscribe() -> (
        mpsc::UnboundedSender<Result<String>>,
        mpsc::UnboundedReceiver<Call>,
        ProgressSubscription,
    ) {
        let (frames_tx, frames_rx) = mpsc::unbounded_channel();
        let (calls_tx, calls_rx) = mpsc::unbounded_channel();
        let api = Arc::new(ScriptedApi {
            frames: Mutex::new(Some(frames_rx)),
        });
        let subscription =
            ProgressSubscription::spawn(api, Arc::new(JobLedger::new()), "j1", Recorder(calls_tx));
        (frames_tx, calls_rx, subscription)
    }

    async fn drain(calls: &mut mpsc::UnboundedReceiver<Call>) -> Vec<Call> {
        let mut seen = Vec::new();
        while let Ok(Some(call)) = tokio::time::timeout(Duration::from_millis(100), calls.recv()).await {
            seen.push(call);
        }
        seen
    }

    #[tokio::test]
    async fn test_terminal_event_completes_and_closes() {
        let (frames, mut calls, subscription) = subscribe();
        frames.send(frame("running", 1)).unwrap();
        frames.send(frame("completed", 2)).unwrap();

        assert_eq!(
            drain(&mut calls).await,
            vec![Call::Event(1), Call::Event(2), Call::Complete]
        );
        assert!(subscription.is_closed());
    }

    #[tokio::test]
    async fn test_malformed_message_is_skipped() {
        let (frames, mut calls, _subscription) = subscribe();
        frames.send(Ok("{not json".to_string())).unwrap();
        frames.send(frame("completed", 2)).unwrap();

        assert_eq!(drain(&mut calls).await, vec![Call::Event(2), Call::Complete]);
    }

    #[tokio::test]
    async fn test_transport_error_reported_once() {
        let (frames, mut calls, subscription) = subscribe();
        frames.send(frame("running", 1)).unwrap();
        frames
            .send(Err(EnrichmentError::StreamTransport("reset".to_string())))
            .unwrap();
        frames.send(frame("completed", 2)).unwrap();

        assert_eq!(drain(&mut calls).await, vec![Call::Event(1), Call::Error]);
        assert!(subscription.is_closed());
    }

    #[tokio::test]
    async fn test_dispose_stops_callbacks() {
        let (frames, mut calls, subscription) = subscribe();
        frames.send(frame("running", 1)).unwrap();
        assert_eq!(drain(&mut calls).await, vec![Call::Event(1)]);

        subscription.dispose();
        subscription.dispose();
        assert!(subscription.is_closed());

        let _ = frames.send(frame("completed", 2));
        assert!(drain(&mut calls).await.is_empty());
    }
}
