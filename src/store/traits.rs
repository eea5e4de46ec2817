//! `RecordStore` trait, the async interface to the record table.

use async_trait::async_trait;

use crate::error::StoreError;
use crate::records::{Queue, Record, RecordUpdate, TimeRange};

/// Backend-agnostic access to the record table.
///
/// Every write is a partial overwrite keyed by `id`: last write wins, with no
/// concurrency token.
#[async_trait]
pub trait RecordStore: Send + Sync {
    /// Name of the table this store reads and writes.
    fn table(&self) -> &str;

    /// Records matching `queue` (all records when `None`) created inside
    /// `window` (inclusive), newest first.
    async fn list(
        &self,
        queue: Option<Queue>,
        window: Option<&TimeRange>,
    ) -> Result<Vec<Record>, StoreError>;

    /// Get a record by ID.
    async fn get(&self, id: i64) -> Result<Option<Record>, StoreError>;

    /// Apply a partial update and return the updated row.
    /// A stale identifier is `StoreError::NotFound`.
    async fn update(&self, id: i64, update: &RecordUpdate) -> Result<Record, StoreError>;

    /// Erase a record.
    async fn delete(&self, id: i64) -> Result<(), StoreError>;
}
