//! Shared request cache for the one-shot queries.
//!
//! Concurrent callers asking for the same key share a single backend request.
//! Failed loads are not cached.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use moka::future::Cache;

use crate::error::{EnrichmentError, Result};
use crate::model::{EnrichmentJob, ProcessorInfo};

/// Upper bound on the number of exports whose job lists are kept.
const MAX_CACHED_EXPORTS: u64 = 256;

#[derive(Clone)]
pub struct QueryCache {
    /// The catalog is static for the life of the process.
    processors: Cache<(), Arc<Vec<ProcessorInfo>>>,
    export_jobs: Cache<String, Arc<Vec<EnrichmentJob>>>,
}

impl QueryCache {
    /// Creates a cache whose export job lists live for `export_ttl`.
    pub fn new(export_ttl: Duration) -> Self {
        Self {
            processors: Cache::builder().max_capacity(1).build(),
            export_jobs: Cache::builder()
                .max_capacity(MAX_CACHED_EXPORTS)
                .time_to_live(export_ttl)
                .build(),
        }
    }

    /// Returns the cached catalog, loading it with `load` on first use.
    pub async fn processors<F>(&self, load: F) -> Result<Arc<Vec<ProcessorInfo>>>
    where
        F: Future<Output = Result<Vec<ProcessorInfo>>>,
    {
        self.processors
            .try_get_with((), async { load.await.map(Arc::new) })
            .await
            .map_err(EnrichmentError::from_shared)
    }

    /// Returns the cached job list of an export, loading it with `load` when absent or expired.
    pub async fn export_jobs<F>(&self, export_id: &str, load: F) -> Result<Arc<Vec<EnrichmentJob>>>
    where
        F: Future<Output = Result<Vec<EnrichmentJob>>>,
    {
        self.export_jobs
            .try_get_with(export_id.to_string(), async { load.await.map(Arc::new) })
            .await
            .map_err(EnrichmentError::from_shared)
    }

    /// Replaces an export's job list with a freshly fetched one.
    pub async fn store_export_jobs(&self, export_id: &str, jobs: Arc<Vec<EnrichmentJob>>) {
        self.export_jobs.insert(export_id.to_string(), jobs).await;
    }

    /// Drops an export's job list so the next read refetches it.
    pub async fn invalidate_export(&self, export_id: &str) {
        self.export_jobs.invalidate(export_id).await;
    }

    /// Drops every export's job list.
    pub fn invalidate_all_exports(&self) {
        self.export_jobs.invalidate_all();
    }
}
