use std::sync::Arc;

use async_trait::async_trait;
use tracing::debug;

use super::checker::Prober;
use super::scheduler::Tick;
use super::types::{MonitorTarget, ProbeResult};
use crate::alerting::AlertTrigger;
use crate::fanout::Fanout;
use crate::logs::LogStore;

/// Collaborators every job tick writes to.
#[derive(Clone)]
pub struct JobContext {
    pub prober: Arc<dyn Prober>,
    pub logs: Arc<LogStore>,
    pub fanout: Arc<Fanout>,
    pub alerts: Arc<AlertTrigger>,
}

/// One monitored target bound to its collaborators.
#[derive(Clone)]
pub struct Job {
    target: MonitorTarget,
    ctx: JobContext,
}

impl Job {
    pub fn new(target: MonitorTarget, ctx: JobContext) -> Self {
        Self { target, ctx }
    }

    pub fn target(&self) -> &MonitorTarget {
        &self.target
    }

    /// Probe once, then append, publish and alert in that order.
    ///
    /// The alert is dispatched without waiting for the notifier.
    pub async fn run(&self) -> ProbeResult {
        let target = &self.target;
        let result = self.ctx.prober.probe(&target.url).await;

        self.ctx
            .logs
            .append(&target.project_id, Some(target.interval), result.clone())
            .await;
        self.ctx.fanout.publish(target, &result);

        if let Some(alert) = self.ctx.alerts.evaluate(&result).await {
            debug!(url = %target.id, status_code = %alert.body.status_code, "dispatching alert");
            self.ctx.alerts.dispatch(alert);
        }

        result
    }
}

#[async_trait]
impl Tick for Job {
    async fn tick(&self) {
        self.run().await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::monitoring::types::Interval;
    use crate::testing::{Harness, ScriptedProber};

    #[tokio::test]
    async fn test_run_appends_and_returns_result() {
        let prober = ScriptedProber::new([200]);
        let harness = Harness::new(prober.clone()).await;
        let target = MonitorTarget::new("http://good.test", "p1", Interval::Ten).unwrap();

        let job = Job::new(target, harness.context.clone());
        let result = job.run().await;

        assert_eq!(result.status_code(), Some(200));
        assert_eq!(harness.context.logs.get("p1"), vec![result]);
        assert_eq!(harness.context.logs.interval("p1"), Some(Interval::Ten));
        assert_eq!(prober.calls(), 1);
    }

    #[tokio::test]
    async fn test_alerting_status_dispatches_once() {
        let harness = Harness::new(ScriptedProber::new([404])).await;
        let target = MonitorTarget::new("http://good.test", "p1", Interval::Ten).unwrap();

        Job::new(target, harness.context.clone()).run().await;

        let sent = harness.notifier.wait_for(1).await;
        assert_eq!(sent[0].body.status_code, "404");
        assert_eq!(sent[0].recipients, vec!["ops@good.test".to_string()]);
    }
}
