//! `ProgressStore` trait: single async interface for onboarding persistence.

use async_trait::async_trait;

use crate::error::DatabaseError;
use crate::onboarding::model::ProgressAggregate;

/// Backend-agnostic store for progress aggregates.
///
/// Writes are compare-and-swap on `ProgressAggregate::version` so two
/// processes cannot silently overwrite each other.
#[async_trait]
pub trait ProgressStore: Send + Sync {
    /// Run all pending schema migrations.
    async fn run_migrations(&self) -> Result<(), DatabaseError> {
        Ok(())
    }

    async fn get(&self, employee_id: &str) -> Result<Option<ProgressAggregate>, DatabaseError>;

    /// Insert a new aggregate. Fails with `AlreadyExists` if one is stored.
    async fn insert(&self, progress: &ProgressAggregate) -> Result<(), DatabaseError>;

    /// Overwrite the aggregate if the stored version equals `expected_version`.
    ///
    /// Returns `VersionConflict` otherwise (including when the record is gone).
    async fn save(
        &self,
        progress: &ProgressAggregate,
        expected_version: u64,
    ) -> Result<(), DatabaseError>;

    /// Every stored aggregate, ordered by employee id.
    async fn list(&self) -> Result<Vec<ProgressAggregate>, DatabaseError>;
}
