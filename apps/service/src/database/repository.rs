use async_trait::async_trait;
use chrono::Utc;
use libsql::{Row, params};

use super::Database;
use super::migrations::run_migrations;
use crate::error::PersistenceError;
use crate::monitoring::types::{Interval, MonitorStatus, MonitorTarget, ProbeResult, ProjectLog, TargetId};
use crate::pool::{LibsqlManager, LibsqlPool};

const TARGET_COLUMNS: &str = "id, url, project_id, interval_seconds, status";

/// LibSQL database implementation
pub struct LibsqlDatabase {
    pool: LibsqlPool,
}

impl LibsqlDatabase {
    pub fn new_from_pool(pool: LibsqlPool) -> Self {
        Self { pool }
    }

    /// Bring the schema up to date
    pub async fn initialize(&self) -> Result<(), PersistenceError> {
        let conn = self.get_conn().await?;
        run_migrations(&conn).await
    }

    async fn get_conn(&self) -> Result<deadpool::managed::Object<LibsqlManager>, PersistenceError> {
        self.pool.get().await.map_err(|e| PersistenceError::Pool(e.to_string()))
    }

    async fn query_targets(
        &self,
        sql: &str,
        params: impl libsql::params::IntoParams,
    ) -> Result<Vec<MonitorTarget>, PersistenceError> {
        let conn = self.get_conn().await?;
        let mut rows = conn.query(sql, params).await?;
        let mut targets = Vec::new();

        while let Some(row) = rows.next().await? {
            targets.push(target_from_row(&row)?);
        }

        Ok(targets)
    }
}

fn target_from_row(row: &Row) -> Result<MonitorTarget, PersistenceError> {
    let id: String = row.get(0)?;
    let url: String = row.get(1)?;
    let project_id: String = row.get(2)?;
    let interval_seconds: i64 = row.get(3)?;
    let status: String = row.get(4)?;

    let corrupt = |e: crate::error::ValidationError| PersistenceError::Corrupt(format!("target {id}: {e}"));

    let interval = Interval::from_seconds(interval_seconds as u64).map_err(corrupt)?;
    let status: MonitorStatus = status.parse().map_err(corrupt)?;

    Ok(MonitorTarget::new(url, project_id, interval).map_err(corrupt)?.with_status(status))
}

#[async_trait]
impl Database for LibsqlDatabase {
    async fn find_target(&self, id: &TargetId) -> Result<Option<MonitorTarget>, PersistenceError> {
        let sql = format!("SELECT {TARGET_COLUMNS} FROM monitor_targets WHERE id = ?");
        Ok(self.query_targets(&sql, params![id.as_str()]).await?.into_iter().next())
    }

    async fn target_exists(&self, id: &TargetId) -> Result<bool, PersistenceError> {
        let conn = self.get_conn().await?;
        let mut rows = conn
            .query("SELECT 1 FROM monitor_targets WHERE id = ?", params![id.as_str()])
            .await?;
        Ok(rows.next().await?.is_some())
    }

    async fn save_target(&self, target: &MonitorTarget) -> Result<(), PersistenceError> {
        let conn = self.get_conn().await?;
        let now = Utc::now().timestamp();

        conn.execute(
            "INSERT INTO monitor_targets (id, url, project_id, interval_seconds, status, created_at, updated_at)
             VALUES (?, ?, ?, ?, ?, ?, ?)
             ON CONFLICT(id) DO UPDATE SET
                url = excluded.url,
                project_id = excluded.project_id,
                interval_seconds = excluded.interval_seconds,
                status = excluded.status,
                updated_at = excluded.updated_at",
            params![
                target.id.as_str(),
                target.url.clone(),
                target.project_id.clone(),
                target.interval.seconds() as i64,
                target.status.as_str(),
                now,
                now
            ],
        )
        .await?;

        Ok(())
    }

    async fn delete_target(&self, id: &TargetId) -> Result<bool, PersistenceError> {
        let conn = self.get_conn().await?;
        let affected = conn
            .execute("DELETE FROM monitor_targets WHERE id = ?", params![id.as_str()])
            .await?;
        Ok(affected > 0)
    }

    async fn list_targets(&self) -> Result<Vec<MonitorTarget>, PersistenceError> {
        let sql = format!("SELECT {TARGET_COLUMNS} FROM monitor_targets ORDER BY id");
        self.query_targets(&sql, ()).await
    }

    async fn targets_by_status(&self, status: MonitorStatus) -> Result<Vec<MonitorTarget>, PersistenceError> {
        let sql = format!("SELECT {TARGET_COLUMNS} FROM monitor_targets WHERE status = ? ORDER BY id");
        self.query_targets(&sql, params![status.as_str()]).await
    }

    async fn find_project_log(&self, project_id: &str) -> Result<Option<ProjectLog>, PersistenceError> {
        let conn = self.get_conn().await?;
        let mut rows = conn
            .query(
                "SELECT interval_seconds, entries FROM project_logs WHERE project_id = ?",
                params![project_id],
            )
            .await?;

        let Some(row) = rows.next().await? else {
            return Ok(None);
        };

        let interval_seconds: Option<i64> = row.get(0)?;
        let entries: String = row.get(1)?;
        // An interval outside the offered set only loses the poll cadence, not the history
        let interval = interval_seconds.and_then(|s| Interval::from_seconds(s as u64).ok());
        let entries: Vec<ProbeResult> = serde_json::from_str(&entries)?;

        Ok(Some(ProjectLog { project_id: project_id.to_string(), interval, entries }))
    }

    async fn save_project_log(&self, log: &ProjectLog) -> Result<(), PersistenceError> {
        let conn = self.get_conn().await?;
        let entries = serde_json::to_string(&log.entries)?;

        conn.execute(
            "INSERT INTO project_logs (project_id, interval_seconds, entries, updated_at)
             VALUES (?, ?, ?, ?)
             ON CONFLICT(project_id) DO UPDATE SET
                interval_seconds = excluded.interval_seconds,
                entries = excluded.entries,
                updated_at = excluded.updated_at",
            params![
                log.project_id.clone(),
                log.interval.map(|i| i.seconds() as i64),
                entries,
                Utc::now().timestamp()
            ],
        )
        .await?;

        Ok(())
    }

    async fn delete_project_log(&self, project_id: &str) -> Result<bool, PersistenceError> {
        let conn = self.get_conn().await?;
        let affected = conn
            .execute("DELETE FROM project_logs WHERE project_id = ?", params![project_id])
            .await?;
        Ok(affected > 0)
    }

    async fn alert_recipients(&self) -> Result<Vec<String>, PersistenceError> {
        let conn = self.get_conn().await?;
        let mut rows = conn.query("SELECT emails FROM users ORDER BY id LIMIT 1", ()).await?;

        match rows.next().await? {
            Some(row) => {
                let emails: String = row.get(0)?;
                Ok(serde_json::from_str(&emails)?)
            }
            None => Ok(Vec::new()),
        }
    }

    async fn seed_user(&self, emails: &[String]) -> Result<(), PersistenceError> {
        let conn = self.get_conn().await?;
        let emails = serde_json::to_string(emails)?;

        conn.execute(
            "INSERT INTO users (emails, created_at)
             SELECT ?, ? WHERE NOT EXISTS (SELECT 1 FROM users)",
            params![emails, Utc::now().timestamp()],
        )
        .await?;

        Ok(())
    }
}
