//! Identity / authorization collaborator.
//!
//! The engine asks it who may perform manager-only operations and tells it
//! when an employee has finished onboarding (clearing the "new employee"
//! restriction on normal system access).

use std::collections::HashSet;

use async_trait::async_trait;
use tokio::sync::RwLock;
use tracing::info;

#[derive(Debug, thiserror::Error)]
pub enum IdentityError {
    #[error("Unknown employee: {0:?}")]
    UnknownEmployee(String),
}

#[async_trait]
pub trait IdentityService: Send + Sync {
    /// Whether `actor_id` may perform manager-only operations.
    async fn is_manager(&self, actor_id: &str) -> bool;

    /// Onboarding finished: lift the new-employee restriction.
    async fn mark_onboarded(&self, employee_id: &str) -> Result<(), IdentityError>;
}

/// In-memory identity directory with a fixed manager list.
#[derive(Debug, Default)]
pub struct StaticIdentity {
    managers: RwLock<HashSet<String>>,
    onboarded: RwLock<HashSet<String>>,
}

impl StaticIdentity {
    pub fn new(managers: impl IntoIterator<Item = String>) -> Self {
        Self {
            managers: RwLock::new(managers.into_iter().collect()),
            onboarded: RwLock::new(HashSet::new()),
        }
    }

    pub async fn add_manager(&self, actor_id: impl Into<String>) {
        self.managers.write().await.insert(actor_id.into());
    }

    /// New employees keep restricted access until onboarding completes.
    pub async fn is_new_employee(&self, employee_id: &str) -> bool {
        !self.onboarded.read().await.contains(employee_id)
    }
}

#[async_trait]
impl IdentityService for StaticIdentity {
    async fn is_manager(&self, actor_id: &str) -> bool {
        self.managers.read().await.contains(actor_id)
    }

    async fn mark_onboarded(&self, employee_id: &str) -> Result<(), IdentityError> {
        if employee_id.trim().is_empty() {
            return Err(IdentityError::UnknownEmployee(employee_id.to_string()));
        }
        if self.onboarded.write().await.insert(employee_id.to_string()) {
            info!(employee_id = %employee_id, "New-employee restriction cleared");
        }
        Ok(())
    }
}
