//! Shared test utilities for enrichment integration tests.
//!
//! This module provides:
//! - `FakeBackend`, an in-memory `EnrichmentApi` with scripted responses and request counters
//! - `RecordingListener` for asserting progress callback order
//! - Builders for jobs, progress events and catalog entries

pub mod builders;
pub mod harness;

pub use builders::*;
pub use harness::*;
