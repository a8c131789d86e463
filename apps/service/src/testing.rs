//! Test doubles shared by the unit and scenario suites.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;

use crate::alerting::{AlertRequest, AlertTrigger, Notifier, NotifyError};
use crate::database::{Database, MemoryDatabase};
use crate::fanout::{Fanout, FanoutMode};
use crate::logs::LogStore;
use crate::monitoring::checker::Prober;
use crate::monitoring::job::JobContext;
use crate::monitoring::scheduler::Scheduler;
use crate::monitoring::types::ProbeResult;
use crate::registry::JobRegistry;

pub const RECIPIENT: &str = "ops@good.test";

/// Answers with a scripted sequence of status codes, repeating the last one.
pub struct ScriptedProber {
    script: Mutex<VecDeque<u16>>,
    latency: Duration,
    calls: AtomicUsize,
}

impl ScriptedProber {
    pub fn new(codes: impl IntoIterator<Item = u16>) -> Arc<Self> {
        Self::with_latency(codes, Duration::ZERO)
    }

    /// Each probe sleeps for `latency` before answering.
    pub fn with_latency(codes: impl IntoIterator<Item = u16>, latency: Duration) -> Arc<Self> {
        Arc::new(Self {
            script: Mutex::new(codes.into_iter().collect()),
            latency,
            calls: AtomicUsize::new(0),
        })
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    fn next_code(&self) -> u16 {
        let mut script = self.script.lock().unwrap();
        if script.len() > 1 {
            script.pop_front().unwrap()
        } else {
            script.front().copied().unwrap_or(200)
        }
    }
}

#[async_trait]
impl Prober for ScriptedProber {
    async fn probe(&self, url: &str) -> ProbeResult {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let code = self.next_code();
        if !self.latency.is_zero() {
            tokio::time::sleep(self.latency).await;
        }
        ProbeResult::response(url, self.latency.as_millis() as u64, code)
    }
}

/// Keeps every alert it is asked to deliver.
pub struct RecordingNotifier {
    sent: Mutex<Vec<AlertRequest>>,
    attempts: AtomicUsize,
    fail: bool,
}

impl RecordingNotifier {
    pub fn new() -> Arc<Self> {
        Arc::new(Self { sent: Mutex::new(Vec::new()), attempts: AtomicUsize::new(0), fail: false })
    }

    /// Rejects every alert.
    pub fn failing() -> Arc<Self> {
        Arc::new(Self { sent: Mutex::new(Vec::new()), attempts: AtomicUsize::new(0), fail: true })
    }

    pub fn sent(&self) -> Vec<AlertRequest> {
        self.sent.lock().unwrap().clone()
    }

    pub fn attempts(&self) -> usize {
        self.attempts.load(Ordering::SeqCst)
    }

    /// Alerts are dispatched on their own task, give them a moment to land.
    pub async fn wait_for(&self, count: usize) -> Vec<AlertRequest> {
        for _ in 0..100 {
            let sent = self.sent();
            if sent.len() >= count {
                return sent;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        self.sent()
    }
}

#[async_trait]
impl Notifier for RecordingNotifier {
    async fn notify(&self, alert: &AlertRequest) -> Result<(), NotifyError> {
        self.attempts.fetch_add(1, Ordering::SeqCst);
        if self.fail {
            return Err(NotifyError::Rejected { status: 503, body: "unavailable".into() });
        }
        self.sent.lock().unwrap().push(alert.clone());
        Ok(())
    }
}

/// Fully wired collaborators around an in-memory database.
pub struct Harness {
    pub database: Arc<dyn Database>,
    pub notifier: Arc<RecordingNotifier>,
    pub scheduler: Scheduler,
    pub context: JobContext,
}

impl Harness {
    pub async fn new(prober: Arc<dyn Prober>) -> Self {
        Self::with_database(prober, Arc::new(MemoryDatabase::new())).await
    }

    pub async fn with_database(prober: Arc<dyn Prober>, database: Arc<dyn Database>) -> Self {
        database.seed_user(&[RECIPIENT.to_string()]).await.unwrap();

        let scheduler = Scheduler::new(8);
        let notifier = RecordingNotifier::new();
        let logs = Arc::new(LogStore::with_database(5, database.clone()));
        let fanout = Arc::new(Fanout::new(logs.clone(), FanoutMode::Push, scheduler.clone()));
        let alerts = Arc::new(AlertTrigger::new([404], database.clone(), notifier.clone()));

        Self {
            database,
            notifier,
            scheduler,
            context: JobContext { prober, logs, fanout, alerts },
        }
    }

    pub fn registry(&self) -> Arc<JobRegistry> {
        Arc::new(JobRegistry::new(
            self.scheduler.clone(),
            self.database.clone(),
            self.context.clone(),
        ))
    }
}
