use std::collections::{BTreeMap, HashMap};

use async_trait::async_trait;
use tokio::sync::RwLock;

use super::Database;
use crate::error::PersistenceError;
use crate::monitoring::types::{MonitorStatus, MonitorTarget, ProjectLog, TargetId};

/// Map-backed store, nothing survives the process.
#[derive(Default)]
pub struct MemoryDatabase {
    targets: RwLock<BTreeMap<TargetId, MonitorTarget>>,
    logs: RwLock<HashMap<String, ProjectLog>>,
    users: RwLock<Vec<Vec<String>>>,
}

impl MemoryDatabase {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl Database for MemoryDatabase {
    async fn find_target(&self, id: &TargetId) -> Result<Option<MonitorTarget>, PersistenceError> {
        Ok(self.targets.read().await.get(id).cloned())
    }

    async fn target_exists(&self, id: &TargetId) -> Result<bool, PersistenceError> {
        Ok(self.targets.read().await.contains_key(id))
    }

    async fn save_target(&self, target: &MonitorTarget) -> Result<(), PersistenceError> {
        self.targets.write().await.insert(target.id.clone(), target.clone());
        Ok(())
    }

    async fn delete_target(&self, id: &TargetId) -> Result<bool, PersistenceError> {
        Ok(self.targets.write().await.remove(id).is_some())
    }

    async fn list_targets(&self) -> Result<Vec<MonitorTarget>, PersistenceError> {
        Ok(self.targets.read().await.values().cloned().collect())
    }

    async fn targets_by_status(&self, status: MonitorStatus) -> Result<Vec<MonitorTarget>, PersistenceError> {
        Ok(self
            .targets
            .read()
            .await
            .values()
            .filter(|target| target.status == status)
            .cloned()
            .collect())
    }

    async fn find_project_log(&self, project_id: &str) -> Result<Option<ProjectLog>, PersistenceError> {
        Ok(self.logs.read().await.get(project_id).cloned())
    }

    async fn save_project_log(&self, log: &ProjectLog) -> Result<(), PersistenceError> {
        self.logs.write().await.insert(log.project_id.clone(), log.clone());
        Ok(())
    }

    async fn delete_project_log(&self, project_id: &str) -> Result<bool, PersistenceError> {
        Ok(self.logs.write().await.remove(project_id).is_some())
    }

    async fn alert_recipients(&self) -> Result<Vec<String>, PersistenceError> {
        Ok(self.users.read().await.first().cloned().unwrap_or_default())
    }

    async fn seed_user(&self, emails: &[String]) -> Result<(), PersistenceError> {
        let mut users = self.users.write().await;
        if users.is_empty() {
            users.push(emails.to_vec());
        }
        Ok(())
    }
}
