use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use tracing::info;

use crate::alerting::{AlertTrigger, LogNotifier, Notifier, WebhookNotifier};
use crate::config::Config;
use crate::database::{self, Database};
use crate::fanout::Fanout;
use crate::logs::LogStore;
use crate::monitoring::checker::{HttpProber, Prober};
use crate::monitoring::job::JobContext;
use crate::monitoring::scheduler::Scheduler;
use crate::registry::JobRegistry;

/// Fully wired service components.
pub struct App {
    pub registry: Arc<JobRegistry>,
    pub fanout: Arc<Fanout>,
    pub logs: Arc<LogStore>,
    pub scheduler: Scheduler,
    pub database: Arc<dyn Database>,
}

impl App {
    /// Open the database and build every component from `config`.
    pub async fn build(config: &Config) -> anyhow::Result<Self> {
        let database = database::open(&config.database)
            .await
            .with_context(|| format!("failed to open {} database at {}", config.database.backend, config.database.path))?;

        if !config.alerts.recipients.is_empty() {
            database.seed_user(&config.alerts.recipients).await.context("failed to seed alert user")?;
        }

        let prober = HttpProber::from_config(&config.monitoring).context("failed to build http client")?;

        let notifier: Arc<dyn Notifier> = match &config.alerts.webhook_url {
            Some(url) => {
                info!(%url, "alerts delivered by webhook");
                let timeout = Duration::from_secs(config.alerts.webhook_timeout_seconds);
                Arc::new(WebhookNotifier::new(url.clone(), timeout).context("failed to build webhook client")?)
            }
            None => Arc::new(LogNotifier),
        };

        Ok(Self::assemble(config, database, Arc::new(prober), notifier))
    }

    /// Wire components around already constructed collaborators.
    pub fn assemble(
        config: &Config,
        database: Arc<dyn Database>,
        prober: Arc<dyn Prober>,
        notifier: Arc<dyn Notifier>,
    ) -> Self {
        let scheduler = Scheduler::new(config.monitoring.max_concurrent_ticks);
        let logs = Arc::new(LogStore::with_database(config.monitoring.log_capacity, database.clone()));
        let fanout = Arc::new(Fanout::new(logs.clone(), config.fanout.mode, scheduler.clone()));
        let alerts = Arc::new(AlertTrigger::new(
            config.alerts.status_codes.iter().copied(),
            database.clone(),
            notifier,
        ));

        let context = JobContext { prober, logs: logs.clone(), fanout: fanout.clone(), alerts };
        let registry = Arc::new(JobRegistry::new(scheduler.clone(), database.clone(), context));

        Self { registry, fanout, logs, scheduler, database }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::DatabaseBackend;
    use crate::monitoring::types::{Interval, MonitorTarget};
    use crate::registry::JobState;
    use crate::testing::{RecordingNotifier, ScriptedProber};

    fn memory_config() -> Config {
        let mut config = Config::default();
        config.database.backend = DatabaseBackend::Memory;
        config.alerts.recipients = vec!["ops@good.test".into()];
        config
    }

    #[tokio::test]
    async fn test_build_seeds_recipients() {
        let app = App::build(&memory_config()).await.unwrap();

        assert_eq!(app.database.alert_recipients().await.unwrap(), vec!["ops@good.test".to_string()]);
        assert_eq!(app.scheduler.size(), 10);
        assert_eq!(app.logs.capacity(), 5);
        assert!(app.registry.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_restart_restores_persisted_targets() {
        let config = memory_config();
        let database: Arc<dyn Database> = Arc::new(database::MemoryDatabase::new());
        let target = MonitorTarget::new("http://good.test", "p1", Interval::Ten).unwrap();

        let first = App::assemble(&config, database.clone(), ScriptedProber::new([200]), RecordingNotifier::new());
        first.registry.start(target.clone()).await.unwrap();
        tokio::time::sleep(Duration::from_millis(10)).await;
        assert_eq!(first.registry.shutdown().await, 1);

        let second = App::assemble(&config, database, ScriptedProber::new([200]), RecordingNotifier::new());
        let summary = second.registry.restore().await.unwrap();

        assert_eq!(summary.started, 1);
        assert_eq!(second.registry.state(&target.id).await, JobState::Active);
        assert!(!second.logs.get("p1").is_empty());
        second.registry.shutdown().await;
    }
}
