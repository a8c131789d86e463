//! Job registry
//!
//! Owns the mapping from target identity to live schedule and drives the
//! per-identity lifecycle:
//!
//! ```text
//! Absent --start--> Active --pause--> Paused --resume--> Active
//!   ^                  |                 |
//!   +------stop--------+-------stop------+
//! ```
//!
//! Every lifecycle call for one identity runs under that identity's lock, so
//! two concurrent `start` calls can never install two schedules.


use std::mem;
use std::ops::{Deref, DerefMut};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use dashmap::DashMap;
use tokio::sync::{Mutex, OwnedMutexGuard, RwLock};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::database::Database;
use crate::error::{PersistenceError, RegistryError};
use crate::monitoring::job::{Job, JobContext};
use crate::monitoring::scheduler::{ScheduleHandle, Scheduler};
use crate::monitoring::types::{Interval, MonitorStatus, MonitorTarget, ProbeResult, TargetId};

/// Lifecycle state of one identity.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobState {
    Absent,
    Active,
    Paused,
}

/// Describes the schedule installed by `start` or `resume`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JobInfo {
    pub id: TargetId,
    pub project_id: String,
    pub interval: Interval,
    /// Distinct for every schedule ever installed
    pub generation: u64,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RestoreSummary {
    pub started: usize,
    pub paused: usize,
}

struct ActiveJob {
    job: Arc<Job>,
    handle: ScheduleHandle,
    generation: u64,
    manual: ManualRuns,
}

impl ActiveJob {
    /// Stop the schedule and wait for every tick, scheduled or manual, to finish.
    async fn drain(self) {
        self.handle.cancel_and_drain().await;
        self.manual.settle().await;
    }

    /// Stop the schedule and interrupt every in-flight tick.
    async fn abort(self) {
        self.manual.interrupt.cancel();
        self.handle.cancel_and_abort().await;
        self.manual.settle().await;
    }
}

/// Manual probes run outside the schedule. Each holds a read guard for its
/// whole run, so taking the write side waits until none is in flight.
#[derive(Clone, Default)]
struct ManualRuns {
    gate: Arc<RwLock<()>>,
    interrupt: CancellationToken,
}

impl ManualRuns {
    async fn settle(&self) {
        let _idle = self.gate.write().await;
    }
}

enum Slot {
    Absent,
    Active(ActiveJob),
    /// Retained configuration for `resume`
    Paused(MonitorTarget),
}

impl Slot {
    fn state(&self) -> JobState {
        match self {
            Slot::Absent => JobState::Absent,
            Slot::Active(_) => JobState::Active,
            Slot::Paused(_) => JobState::Paused,
        }
    }
}

type SlotCell = Arc<Mutex<Slot>>;

/// Exclusive access to one identity's slot. An `Absent` slot is removed from
/// the map when the guard drops.
struct SlotGuard<'a> {
    slots: &'a DashMap<TargetId, SlotCell>,
    id: TargetId,
    cell: SlotCell,
    slot: OwnedMutexGuard<Slot>,
}

impl Deref for SlotGuard<'_> {
    type Target = Slot;

    fn deref(&self) -> &Slot {
        &self.slot
    }
}

impl DerefMut for SlotGuard<'_> {
    fn deref_mut(&mut self) -> &mut Slot {
        &mut self.slot
    }
}

impl Drop for SlotGuard<'_> {
    fn drop(&mut self) {
        if matches!(*self.slot, Slot::Absent) {
            self.slots.remove_if(&self.id, |_, cell| Arc::ptr_eq(cell, &self.cell));
        }
    }
}

pub struct JobRegistry {
    slots: DashMap<TargetId, SlotCell>,
    scheduler: Scheduler,
    database: Arc<dyn Database>,
    context: JobContext,
    generation: AtomicU64,
}

impl JobRegistry {
    pub fn new(scheduler: Scheduler, database: Arc<dyn Database>, context: JobContext) -> Self {
        Self {
            slots: DashMap::new(),
            scheduler,
            database,
            context,
            generation: AtomicU64::new(1),
        }
    }

    /// Lock the slot for `id`, creating an `Absent` one if needed.
    async fn lock_slot(&self, id: &TargetId) -> SlotGuard<'_> {
        loop {
            let cell = {
                let entry = self
                    .slots
                    .entry(id.clone())
                    .or_insert_with(|| Arc::new(Mutex::new(Slot::Absent)));
                Arc::clone(entry.value())
            };
            let slot = Arc::clone(&cell).lock_owned().await;

            // The previous holder may have removed this cell while we waited
            let current = self
                .slots
                .get(id)
                .is_some_and(|entry| Arc::ptr_eq(entry.value(), &cell));
            if current {
                return SlotGuard { slots: &self.slots, id: id.clone(), cell, slot };
            }
        }
    }

    fn activate(&self, slot: &mut SlotGuard<'_>, target: MonitorTarget) -> JobInfo {
        let generation = self.generation.fetch_add(1, Ordering::Relaxed);
        let info = JobInfo {
            id: target.id.clone(),
            project_id: target.project_id.clone(),
            interval: target.interval,
            generation,
        };

        let period = target.interval.as_duration();
        let job = Arc::new(Job::new(target, self.context.clone()));
        let handle = self.scheduler.schedule(job.clone(), period);
        **slot = Slot::Active(ActiveJob { job, handle, generation, manual: ManualRuns::default() });

        info!(url = %info.id, project = %info.project_id, interval = %info.interval, generation, "monitoring scheduled");
        info
    }

    /// Persist `target` as Active and schedule it, first tick immediately.
    pub async fn start(&self, target: MonitorTarget) -> Result<JobInfo, RegistryError> {
        let mut slot = self.lock_slot(&target.id).await;
        if !matches!(*slot, Slot::Absent) {
            return Err(RegistryError::AlreadyRunning(target.id));
        }

        let target = target.with_status(MonitorStatus::Active);
        self.database.save_target(&target).await?;

        Ok(self.activate(&mut slot, target))
    }

    /// Stop scheduling `id` and keep its configuration for `resume`.
    ///
    /// Waits for an in-flight tick to finish, so no tick of this identity runs
    /// once this returns. Pausing an identity that is not running is not an
    /// error and returns `Ok(false)`.
    pub async fn pause(&self, id: &TargetId) -> Result<bool, RegistryError> {
        let mut slot = self.lock_slot(id).await;
        let active = match mem::replace(&mut *slot, Slot::Absent) {
            Slot::Active(active) => active,
            other => {
                *slot = other;
                warn!(url = %id, "pause requested but monitoring is not running");
                return Ok(false);
            }
        };

        let paused = active.job.target().clone().with_status(MonitorStatus::Paused);
        if let Err(e) = self.database.save_target(&paused).await {
            *slot = Slot::Active(active);
            return Err(e.into());
        }

        *slot = Slot::Paused(paused);
        let generation = active.generation;
        active.drain().await;

        info!(url = %id, generation, "monitoring paused");
        Ok(true)
    }

    /// Reinstall the retained configuration of a paused identity.
    pub async fn resume(&self, id: &TargetId) -> Result<JobInfo, RegistryError> {
        let mut slot = self.lock_slot(id).await;
        let retained = match mem::replace(&mut *slot, Slot::Absent) {
            Slot::Paused(target) => target,
            other => {
                *slot = other;
                return Err(RegistryError::NotPaused(id.clone()));
            }
        };

        let target = retained.with_status(MonitorStatus::Active);
        if let Err(e) = self.database.save_target(&target).await {
            *slot = Slot::Paused(target.with_status(MonitorStatus::Paused));
            return Err(e.into());
        }

        Ok(self.activate(&mut slot, target))
    }

    /// Interrupt the schedule and delete the persisted target.
    ///
    /// The project's log is deleted too unless another target still reports
    /// into it. Registry state is always removed, even when deleting fails:
    /// the schedule stays cancelled and the failure comes back as
    /// [`RegistryError::SchedulerStopFailure`] so the caller can retry the
    /// delete. The log goes before the target row, so a failed attempt
    /// always leaves the row a retry needs to find the project again.
    pub async fn stop(&self, id: &TargetId) -> Result<(), RegistryError> {
        let mut slot = self.lock_slot(id).await;
        let (known_project, was_registered) = match mem::replace(&mut *slot, Slot::Absent) {
            Slot::Active(active) => {
                let project_id = active.job.target().project_id.clone();
                active.abort().await;
                (Some(project_id), true)
            }
            Slot::Paused(target) => (Some(target.project_id), true),
            Slot::Absent => (None, false),
        };

        let removed = self
            .delete_persisted(id, known_project)
            .await
            .map_err(|source| RegistryError::SchedulerStopFailure { target: id.clone(), source })?;

        if !removed && !was_registered {
            return Err(RegistryError::NotRunning(id.clone()));
        }

        info!(url = %id, "monitoring stopped");
        Ok(())
    }

    async fn delete_persisted(
        &self,
        id: &TargetId,
        known_project: Option<String>,
    ) -> Result<bool, PersistenceError> {
        let project_id = match known_project {
            Some(project_id) => Some(project_id),
            None => self.database.find_target(id).await?.map(|target| target.project_id),
        };

        if let Some(project_id) = project_id {
            let shared = self
                .database
                .list_targets()
                .await?
                .iter()
                .any(|target| target.project_id == project_id && target.id != *id);
            if shared {
                debug!(url = %id, project = %project_id, "project log still referenced, keeping it");
            } else {
                self.context.logs.delete(&project_id).await?;
            }
        }

        Ok(self.database.delete_target(id).await?)
    }

    /// Run one tick of an active job immediately, outside its schedule.
    ///
    /// `pause` waits for the run to finish. `stop` interrupts it, and the
    /// interrupted call reports [`RegistryError::NotRunning`].
    pub async fn manual_probe(&self, id: &TargetId) -> Result<ProbeResult, RegistryError> {
        let (job, interrupt, _running) = {
            let slot = self.lock_slot(id).await;
            match &*slot {
                // No writer can hold the gate while the slot is locked
                Slot::Active(active) => (
                    Arc::clone(&active.job),
                    active.manual.interrupt.clone(),
                    Arc::clone(&active.manual.gate).read_owned().await,
                ),
                _ => return Err(RegistryError::NotRunning(id.clone())),
            }
        };

        tokio::select! {
            _ = interrupt.cancelled() => Err(RegistryError::NotRunning(id.clone())),
            result = job.run() => Ok(result),
        }
    }

    /// Persisted targets, Active and Paused.
    pub async fn snapshot_active(&self) -> Result<Vec<MonitorTarget>, RegistryError> {
        Ok(self.database.list_targets().await?)
    }

    pub async fn state(&self, id: &TargetId) -> JobState {
        let cell = match self.slots.get(id) {
            Some(entry) => Arc::clone(entry.value()),
            None => return JobState::Absent,
        };
        let slot = cell.lock().await;
        slot.state()
    }

    /// Identities that are Active or Paused
    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    /// Re-derive schedules from persisted targets after a restart.
    pub async fn restore(&self) -> Result<RestoreSummary, RegistryError> {
        let mut targets = self.database.targets_by_status(MonitorStatus::Active).await?;
        targets.extend(self.database.targets_by_status(MonitorStatus::Paused).await?);
        let hydrated = self
            .context
            .logs
            .hydrate(targets.iter().map(|target| target.project_id.as_str()))
            .await?;
        debug!(projects = hydrated, "project logs hydrated");

        let mut summary = RestoreSummary::default();
        for target in targets {
            let mut slot = self.lock_slot(&target.id).await;
            if !matches!(*slot, Slot::Absent) {
                continue;
            }

            match target.status {
                MonitorStatus::Active => {
                    self.activate(&mut slot, target);
                    summary.started += 1;
                }
                MonitorStatus::Paused => {
                    *slot = Slot::Paused(target);
                    summary.paused += 1;
                }
            }
        }

        info!(started = summary.started, paused = summary.paused, "monitoring restored");
        Ok(summary)
    }

    /// Drain every active schedule. Persisted state is left untouched so the
    /// next start restores the same set.
    pub async fn shutdown(&self) -> usize {
        let ids: Vec<TargetId> = self.slots.iter().map(|entry| entry.key().clone()).collect();

        let mut drained = 0;
        for id in ids {
            let mut slot = self.lock_slot(&id).await;
            match mem::replace(&mut *slot, Slot::Absent) {
                Slot::Active(active) => {
                    active.drain().await;
                    drained += 1;
                }
                other => *slot = other,
            }
        }

        info!(drained, "monitoring shut down");
        drained
    }
}
