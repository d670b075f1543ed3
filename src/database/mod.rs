// src/database/mod.rs
use anyhow::Result;
use async_trait::async_trait;

use crate::types::{Keyword, MatchQuery, MatchRecord, MatchedCertificate, MonitorProgress};

pub mod postgres;

pub use postgres::PostgresStateStore;

/// The durable backend the ingestion worker consumes: keyword list, match
/// persistence, and the singleton progress/metrics row.
///
/// All operations are transactional at the row level. `insert_match` is
/// idempotent on `(serial, keyword_id)`; `set_running`/`set_last_error` may
/// be called concurrently with `update_progress` from lifecycle paths.
#[async_trait]
pub trait StateStore: Send + Sync {
    /// Empty vec is a valid, common result — there is no requirement that
    /// any keywords exist.
    async fn list_keywords(&self) -> Result<Vec<Keyword>>;

    /// Insert a match, silently ignoring a duplicate `(serial, keyword_id)`.
    async fn insert_match(&self, cert: &MatchedCertificate) -> Result<()>;

    /// Always returns the singleton row; never "not found".
    async fn get_progress(&self) -> Result<MonitorProgress>;

    /// Full overwrite of the mutable fields. `updated_at`/`last_run_at` are
    /// stamped by the store, not the caller.
    async fn update_progress(&self, progress: &MonitorProgress) -> Result<()>;

    /// Toggles only the `is_running` flag.
    async fn set_running(&self, running: bool) -> Result<()>;

    /// Records the last tick's failure; empty string clears it.
    async fn set_last_error(&self, message: &str) -> Result<()>;

    /// Called once at process start, before any `start()` is accepted, so a
    /// previously-crashed worker does not appear alive (§5).
    async fn reset_running_flag(&self) -> Result<()>;

    // --- read/write model for the (out-of-scope) REST surface ---

    async fn insert_keyword(&self, value: &str) -> Result<Keyword>;
    async fn delete_keyword(&self, id: i64) -> Result<()>;
    async fn list_matches(&self, query: &MatchQuery) -> Result<Vec<MatchRecord>>;
}
