//! In-memory `ProgressStore`, for tests and single-process embedding.

use std::collections::BTreeMap;

use async_trait::async_trait;
use tokio::sync::RwLock;

use crate::error::DatabaseError;
use crate::onboarding::model::ProgressAggregate;
use crate::store::traits::ProgressStore;

#[derive(Debug, Default)]
pub struct MemoryProgressStore {
    records: RwLock<BTreeMap<String, ProgressAggregate>>,
}

impl MemoryProgressStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl ProgressStore for MemoryProgressStore {
    async fn get(&self, employee_id: &str) -> Result<Option<ProgressAggregate>, DatabaseError> {
        Ok(self.records.read().await.get(employee_id).cloned())
    }

    async fn insert(&self, progress: &ProgressAggregate) -> Result<(), DatabaseError> {
        let mut records = self.records.write().await;
        if records.contains_key(&progress.employee_id) {
            return Err(DatabaseError::AlreadyExists(progress.employee_id.clone()));
        }
        records.insert(progress.employee_id.clone(), progress.clone());
        Ok(())
    }

    async fn save(
        &self,
        progress: &ProgressAggregate,
        expected_version: u64,
    ) -> Result<(), DatabaseError> {
        let mut records = self.records.write().await;
        let found = records.get(&progress.employee_id).map(|p| p.version);
        if found != Some(expected_version) {
            return Err(DatabaseError::VersionConflict {
                employee_id: progress.employee_id.clone(),
                expected: expected_version,
                found,
            });
        }
        records.insert(progress.employee_id.clone(), progress.clone());
        Ok(())
    }

    async fn list(&self) -> Result<Vec<ProgressAggregate>, DatabaseError> {
        Ok(self.records.read().await.values().cloned().collect())
    }
}
