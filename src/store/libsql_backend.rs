//! libSQL backend: async `ProgressStore` implementation.
//!
//! Each aggregate is one JSON document row. The `version` column mirrors
//! the aggregate's version and is what compare-and-swap saves check.

use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use libsql::{Connection, Database as LibSqlDatabase, params};
use tracing::{debug, info};

use crate::error::DatabaseError;
use crate::onboarding::model::ProgressAggregate;
use crate::store::migrations;
use crate::store::traits::ProgressStore;

/// libSQL progress store.
///
/// Stores a single connection that is reused for all operations.
/// `libsql::Connection` is `Send + Sync` and safe for concurrent async use.
pub struct LibSqlProgressStore {
    #[allow(dead_code)]
    db: Arc<LibSqlDatabase>,
    conn: Connection,
}

impl LibSqlProgressStore {
    /// Open (or create) a local database file and run migrations.
    pub async fn new_local(path: &Path) -> Result<Self, DatabaseError> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| {
                DatabaseError::Pool(format!("Failed to create database directory: {e}"))
            })?;
        }

        let db = libsql::Builder::new_local(path)
            .build()
            .await
            .map_err(|e| DatabaseError::Pool(format!("Failed to open libSQL database: {e}")))?;

        let conn = db
            .connect()
            .map_err(|e| DatabaseError::Pool(format!("Failed to create connection: {e}")))?;

        let store = Self {
            db: Arc::new(db),
            conn,
        };
        store.run_migrations().await?;
        info!(path = %path.display(), "Database opened");
        Ok(store)
    }

    /// Create an in-memory database (for tests).
    pub async fn new_memory() -> Result<Self, DatabaseError> {
        let db = libsql::Builder::new_local(":memory:")
            .build()
            .await
            .map_err(|e| {
                DatabaseError::Pool(format!("Failed to create in-memory database: {e}"))
            })?;

        let conn = db
            .connect()
            .map_err(|e| DatabaseError::Pool(format!("Failed to create connection: {e}")))?;

        let store = Self {
            db: Arc::new(db),
            conn,
        };
        store.run_migrations().await?;
        Ok(store)
    }

    fn conn(&self) -> &Connection {
        &self.conn
    }
}

fn to_json(progress: &ProgressAggregate) -> Result<String, DatabaseError> {
    serde_json::to_string(progress).map_err(|e| DatabaseError::Serialization(e.to_string()))
}

fn from_json(data: &str) -> Result<ProgressAggregate, DatabaseError> {
    serde_json::from_str(data).map_err(|e| DatabaseError::Serialization(e.to_string()))
}

fn version_param(version: u64) -> Result<i64, DatabaseError> {
    i64::try_from(version)
        .map_err(|_| DatabaseError::Serialization(format!("version {version} out of range")))
}

#[async_trait]
impl ProgressStore for LibSqlProgressStore {
    async fn run_migrations(&self) -> Result<(), DatabaseError> {
        migrations::run_migrations(self.conn()).await
    }

    async fn get(&self, employee_id: &str) -> Result<Option<ProgressAggregate>, DatabaseError> {
        let mut rows = self
            .conn()
            .query(
                "SELECT data FROM onboarding_progress WHERE employee_id = ?1",
                params![employee_id],
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("get_progress: {e}")))?;

        match rows.next().await {
            Ok(Some(row)) => {
                let data: String = row
                    .get(0)
                    .map_err(|e| DatabaseError::Query(format!("get_progress: {e}")))?;
                Ok(Some(from_json(&data)?))
            }
            Ok(None) => Ok(None),
            Err(e) => Err(DatabaseError::Query(format!("get_progress: {e}"))),
        }
    }

    async fn insert(&self, progress: &ProgressAggregate) -> Result<(), DatabaseError> {
        let now = Utc::now().to_rfc3339();
        let data = to_json(progress)?;
        let count = self
            .conn()
            .execute(
                "INSERT INTO onboarding_progress
                    (employee_id, version, data, current_step, is_complete, created_at, updated_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?6)
                 ON CONFLICT (employee_id) DO NOTHING",
                params![
                    progress.employee_id.as_str(),
                    version_param(progress.version)?,
                    data,
                    progress.current_step.to_string(),
                    progress.is_complete as i64,
                    now
                ],
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("insert_progress: {e}")))?;

        if count == 0 {
            return Err(DatabaseError::AlreadyExists(progress.employee_id.clone()));
        }
        debug!(employee_id = %progress.employee_id, "Progress inserted");
        Ok(())
    }

    async fn save(
        &self,
        progress: &ProgressAggregate,
        expected_version: u64,
    ) -> Result<(), DatabaseError> {
        let now = Utc::now().to_rfc3339();
        let data = to_json(progress)?;
        let count = self
            .conn()
            .execute(
                "UPDATE onboarding_progress
                 SET version = ?1, data = ?2, current_step = ?3, is_complete = ?4, updated_at = ?5
                 WHERE employee_id = ?6 AND version = ?7",
                params![
                    version_param(progress.version)?,
                    data,
                    progress.current_step.to_string(),
                    progress.is_complete as i64,
                    now,
                    progress.employee_id.as_str(),
                    version_param(expected_version)?
                ],
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("save_progress: {e}")))?;

        if count == 0 {
            let found = self.get(&progress.employee_id).await?.map(|p| p.version);
            return Err(DatabaseError::VersionConflict {
                employee_id: progress.employee_id.clone(),
                expected: expected_version,
                found,
            });
        }
        debug!(
            employee_id = %progress.employee_id,
            version = progress.version,
            "Progress saved"
        );
        Ok(())
    }

    async fn list(&self) -> Result<Vec<ProgressAggregate>, DatabaseError> {
        let mut rows = self
            .conn()
            .query(
                "SELECT data FROM onboarding_progress ORDER BY employee_id",
                (),
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("list_progress: {e}")))?;

        let mut out = Vec::new();
        while let Some(row) = rows
            .next()
            .await
            .map_err(|e| DatabaseError::Query(format!("list_progress: {e}")))?
        {
            let data: String = row
                .get(0)
                .map_err(|e| DatabaseError::Query(format!("list_progress: {e}")))?;
            out.push(from_json(&data)?);
        }
        Ok(out)
    }
}
