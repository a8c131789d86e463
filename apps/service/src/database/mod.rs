//! Persistence layer
//!
//! Monitor targets, project logs and the alert user directory live behind the
//! [`Database`] trait. Two backends exist: libsql (SQLite file) for real runs
//! and an in-memory map for tests and throwaway instances.

pub mod memory;
pub mod migrations;
pub mod repository;

pub use memory::MemoryDatabase;
pub use repository::LibsqlDatabase;

use std::sync::Arc;

use async_trait::async_trait;

use crate::config::{DatabaseBackend, DatabaseConfig};
use crate::error::PersistenceError;
use crate::monitoring::types::{MonitorStatus, MonitorTarget, ProjectLog, TargetId};

#[async_trait]
pub trait Database: Send + Sync {
    async fn find_target(&self, id: &TargetId) -> Result<Option<MonitorTarget>, PersistenceError>;

    async fn target_exists(&self, id: &TargetId) -> Result<bool, PersistenceError>;

    /// Insert or replace the target with the same identity
    async fn save_target(&self, target: &MonitorTarget) -> Result<(), PersistenceError>;

    /// Returns whether a row was removed
    async fn delete_target(&self, id: &TargetId) -> Result<bool, PersistenceError>;

    /// All targets ordered by identity
    async fn list_targets(&self) -> Result<Vec<MonitorTarget>, PersistenceError>;

    async fn targets_by_status(&self, status: MonitorStatus) -> Result<Vec<MonitorTarget>, PersistenceError>;

    async fn find_project_log(&self, project_id: &str) -> Result<Option<ProjectLog>, PersistenceError>;

    async fn save_project_log(&self, log: &ProjectLog) -> Result<(), PersistenceError>;

    async fn delete_project_log(&self, project_id: &str) -> Result<bool, PersistenceError>;

    /// E-mail addresses of the first registered user
    async fn alert_recipients(&self) -> Result<Vec<String>, PersistenceError>;

    /// Create the alert user when none exists yet
    async fn seed_user(&self, emails: &[String]) -> Result<(), PersistenceError>;
}

/// Open the configured backend, running migrations for libsql.
pub async fn open(config: &DatabaseConfig) -> Result<Arc<dyn Database>, PersistenceError> {
    match config.backend {
        DatabaseBackend::Memory => Ok(Arc::new(MemoryDatabase::new())),
        DatabaseBackend::Libsql => {
            let pool = crate::pool::open_local(&config.path).await?;
            let database = LibsqlDatabase::new_from_pool(pool);
            database.initialize().await?;
            Ok(Arc::new(database))
        }
    }
}
