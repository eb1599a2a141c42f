//! Interval-driven refresh of job state.
//!
//! A watch fetches immediately, then once per period, publishing each result
//! through a `tokio::sync::watch` channel. Stopping or dropping the handle
//! ends the timer; responses that arrive afterwards are discarded.

mod export;
mod job;

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;

use crate::error::EnrichmentError;

pub use export::ExportJobsWatch;
pub use job::JobWatch;

/// Lifecycle flags shared between a watch handle and its poll task.
struct PollState {
    stopped: AtomicBool,
    polling: AtomicBool,
    last_error: Mutex<Option<String>>,
}

impl PollState {
    fn new(polling: bool) -> Self {
        Self {
            stopped: AtomicBool::new(false),
            polling: AtomicBool::new(polling),
            last_error: Mutex::new(None),
        }
    }

    fn stop(&self) -> bool {
        self.polling.store(false, Ordering::Release);
        !self.stopped.swap(true, Ordering::AcqRel)
    }

    fn is_stopped(&self) -> bool {
        self.stopped.load(Ordering::Acquire)
    }

    fn is_polling(&self) -> bool {
        self.polling.load(Ordering::Acquire)
    }

    fn finish(&self) {
        self.polling.store(false, Ordering::Release);
    }

    fn set_error(&self, error: &EnrichmentError) {
        *self.last_error.lock().unwrap_or_else(|e| e.into_inner()) = Some(error.user_message());
    }

    fn clear_error(&self) {
        *self.last_error.lock().unwrap_or_else(|e| e.into_inner()) = None;
    }

    fn last_error(&self) -> Option<String> {
        self.last_error
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }
}
