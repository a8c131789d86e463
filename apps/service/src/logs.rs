//! Bounded per-project history of probe results.

use std::sync::Arc;

use dashmap::DashMap;
use tokio::sync::Mutex;
use tracing::{debug, warn};

use crate::database::Database;
use crate::error::PersistenceError;
use crate::monitoring::types::{Interval, ProbeResult, ProjectLog};

pub struct LogStore {
    logs: DashMap<String, ProjectLog>,
    capacity: usize,
    database: Option<Arc<dyn Database>>,
    /// One writer at a time per project, each writes the state current when it got the lock
    write_locks: DashMap<String, Arc<Mutex<()>>>,
}

impl LogStore {
    /// History kept in memory only.
    pub fn new(capacity: usize) -> Self {
        Self {
            logs: DashMap::new(),
            capacity: capacity.max(1),
            database: None,
            write_locks: DashMap::new(),
        }
    }

    /// Every append is also written to `database`.
    pub fn with_database(capacity: usize, database: Arc<dyn Database>) -> Self {
        Self { database: Some(database), ..Self::new(capacity) }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Insert `entry` as the newest record of `project_id`, evicting beyond capacity.
    ///
    /// Persisting the updated log is best effort: a failed write is logged
    /// and the in-memory history stays authoritative.
    pub async fn append(&self, project_id: &str, interval: Option<Interval>, entry: ProbeResult) {
        {
            let mut log = self
                .logs
                .entry(project_id.to_string())
                .or_insert_with(|| ProjectLog::new(project_id));
            log.push(entry, self.capacity);
            if interval.is_some() {
                log.interval = interval;
            }
        }

        let Some(database) = &self.database else {
            return;
        };

        let lock = self.write_lock(project_id);
        let _writing = lock.lock().await;
        // Re-read under the lock: a racing append may have landed since ours
        let Some(snapshot) = self.logs.get(project_id).map(|log| log.clone()) else {
            return;
        };
        if let Err(e) = database.save_project_log(&snapshot).await {
            warn!(project = project_id, error = %e, "failed to persist project log");
        }
    }

    fn write_lock(&self, project_id: &str) -> Arc<Mutex<()>> {
        Arc::clone(self.write_locks.entry(project_id.to_string()).or_default().value())
    }

    /// Full bounded history, newest first. Empty for unknown projects.
    pub fn get(&self, project_id: &str) -> Vec<ProbeResult> {
        self.logs
            .get(project_id)
            .map(|log| log.entries.clone())
            .unwrap_or_default()
    }

    pub fn latest(&self, project_id: &str) -> Option<ProbeResult> {
        self.logs.get(project_id).and_then(|log| log.latest().cloned())
    }

    /// Interval of the target that last wrote to the project
    pub fn interval(&self, project_id: &str) -> Option<Interval> {
        self.logs.get(project_id).and_then(|log| log.interval)
    }

    /// Drop the project's history, persisted copy first.
    pub async fn delete(&self, project_id: &str) -> Result<(), PersistenceError> {
        let Some(database) = &self.database else {
            self.logs.remove(project_id);
            return Ok(());
        };

        let lock = self.write_lock(project_id);
        let _writing = lock.lock().await;
        database.delete_project_log(project_id).await?;
        self.logs.remove(project_id);
        debug!(project = project_id, "project log deleted");
        Ok(())
    }

    /// Load persisted history for the given projects.
    pub async fn hydrate<'a>(&self, project_ids: impl IntoIterator<Item = &'a str>) -> Result<usize, PersistenceError> {
        let Some(database) = &self.database else {
            return Ok(0);
        };

        let mut loaded = 0;
        for project_id in project_ids {
            if self.logs.contains_key(project_id) {
                continue;
            }
            if let Some(mut log) = database.find_project_log(project_id).await? {
                log.entries.truncate(self.capacity);
                self.logs.insert(project_id.to_string(), log);
                loaded += 1;
            }
        }
        Ok(loaded)
    }
}
