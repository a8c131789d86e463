//! Distribution of probe results to live channels.
//!
//! Two audiences exist. Project subscribers receive the bounded history on
//! subscribe and then every new entry of their project. Watchers (control
//! sessions) receive every tick of every target.

use std::collections::HashSet;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;

use async_trait::async_trait;
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::sync::mpsc;
use tracing::{debug, warn};

use crate::logs::LogStore;
use crate::monitoring::scheduler::{ScheduleHandle, Scheduler, Tick};
use crate::monitoring::types::{MonitorTarget, ProbeResult};
use crate::protocol::{log_record, tick_record};

/// Cadence of the poll variant when the project's interval is unknown
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(30);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("live channel is closed")]
pub struct ChannelClosed;

/// A per-connection text channel. Sending never blocks.
pub trait LiveChannel: Send + Sync {
    fn is_open(&self) -> bool;

    fn send_text(&self, text: String) -> Result<(), ChannelClosed>;
}

/// Channel whose receiving half is drained by one connection's writer task.
#[derive(Clone)]
pub struct SessionChannel {
    tx: mpsc::UnboundedSender<String>,
}

impl SessionChannel {
    pub fn new() -> (Self, mpsc::UnboundedReceiver<String>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }
}

impl LiveChannel for SessionChannel {
    fn is_open(&self) -> bool {
        !self.tx.is_closed()
    }

    fn send_text(&self, text: String) -> Result<(), ChannelClosed> {
        self.tx.send(text).map_err(|_| ChannelClosed)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SubscriberId(u64);

impl fmt::Display for SubscriberId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "sub-{}", self.0)
    }
}

/// How new entries reach project subscribers.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FanoutMode {
    /// Each append pushes the new entry
    #[default]
    Push,
    /// A per-subscriber ticker sends the latest entry when it changed
    Poll,
}

impl fmt::Display for FanoutMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FanoutMode::Push => write!(f, "push"),
            FanoutMode::Poll => write!(f, "poll"),
        }
    }
}

struct Subscriber {
    project_id: String,
    channel: Arc<dyn LiveChannel>,
    /// Last entry delivered, never resent
    last_sent: Option<ProbeResult>,
    poller: Option<ScheduleHandle>,
}

impl Subscriber {
    /// Whether `entry` is newer than anything already delivered.
    fn is_behind(&self, entry: &ProbeResult) -> bool {
        match &self.last_sent {
            None => true,
            Some(last) => last != entry && entry.timestamp >= last.timestamp,
        }
    }
}

pub struct Fanout {
    logs: Arc<LogStore>,
    mode: FanoutMode,
    scheduler: Scheduler,
    subscribers: DashMap<SubscriberId, Subscriber>,
    by_project: DashMap<String, HashSet<SubscriberId>>,
    watchers: DashMap<SubscriberId, Arc<dyn LiveChannel>>,
    next_id: AtomicU64,
}

impl Fanout {
    pub fn new(logs: Arc<LogStore>, mode: FanoutMode, scheduler: Scheduler) -> Self {
        Self {
            logs,
            mode,
            scheduler,
            subscribers: DashMap::new(),
            by_project: DashMap::new(),
            watchers: DashMap::new(),
            next_id: AtomicU64::new(1),
        }
    }

    pub fn mode(&self) -> FanoutMode {
        self.mode
    }

    fn next_id(&self) -> SubscriberId {
        SubscriberId(self.next_id.fetch_add(1, Ordering::Relaxed))
    }

    /// Register `channel` for `project_id` and replay its history oldest first.
    pub fn subscribe(
        self: &Arc<Self>,
        project_id: &str,
        channel: Arc<dyn LiveChannel>,
    ) -> Result<SubscriberId, ChannelClosed> {
        let id = self.next_id();

        {
            // Held across the replay so a concurrent publish cannot slip in between
            let mut members = self.by_project.entry(project_id.to_string()).or_default();
            let history = self.logs.get(project_id);
            let replayed = history
                .iter()
                .rev()
                .try_for_each(|entry| channel.send_text(log_record(entry)));
            if let Err(e) = replayed {
                drop(members);
                self.by_project.remove_if(project_id, |_, members| members.is_empty());
                return Err(e);
            }

            self.subscribers.insert(
                id,
                Subscriber {
                    project_id: project_id.to_string(),
                    channel,
                    last_sent: history.into_iter().next(),
                    poller: None,
                },
            );
            members.insert(id);
        }

        if self.mode == FanoutMode::Poll {
            let period = self
                .logs
                .interval(project_id)
                .map(|interval| interval.as_duration())
                .unwrap_or(DEFAULT_POLL_INTERVAL);
            let poller = self
                .scheduler
                .schedule(Arc::new(PollTick { fanout: Arc::downgrade(self), id }), period);
            if let Some(mut subscriber) = self.subscribers.get_mut(&id) {
                subscriber.poller = Some(poller);
            }
        }

        debug!(subscriber = %id, project = project_id, mode = %self.mode, "subscribed");
        Ok(id)
    }

    /// Remove a subscriber and its cursor. Unknown ids are ignored.
    pub fn unsubscribe(&self, id: SubscriberId) {
        let Some((_, subscriber)) = self.subscribers.remove(&id) else {
            return;
        };

        if let Some(mut members) = self.by_project.get_mut(&subscriber.project_id) {
            members.remove(&id);
        }
        self.by_project
            .remove_if(&subscriber.project_id, |_, members| members.is_empty());

        // Dropping the handle stops the poll ticker
        drop(subscriber);
        debug!(subscriber = %id, "unsubscribed");
    }

    /// Receive every tick record regardless of project.
    pub fn watch(&self, channel: Arc<dyn LiveChannel>) -> SubscriberId {
        let id = self.next_id();
        self.watchers.insert(id, channel);
        id
    }

    pub fn unwatch(&self, id: SubscriberId) {
        self.watchers.remove(&id);
    }

    pub fn subscriber_count(&self, project_id: &str) -> usize {
        self.by_project.get(project_id).map(|members| members.len()).unwrap_or(0)
    }

    pub fn watcher_count(&self) -> usize {
        self.watchers.len()
    }

    /// Deliver a freshly appended result. Closed channels are pruned.
    pub fn publish(&self, target: &MonitorTarget, result: &ProbeResult) {
        let mut closed_watchers = Vec::new();
        let tick = tick_record(target, result);
        for watcher in self.watchers.iter() {
            if watcher.value().send_text(tick.clone()).is_err() {
                closed_watchers.push(*watcher.key());
            }
        }
        for id in closed_watchers {
            debug!(watcher = %id, "dropping closed watcher");
            self.unwatch(id);
        }

        if self.mode != FanoutMode::Push {
            return;
        }

        let mut closed = Vec::new();
        if let Some(members) = self.by_project.get(&target.project_id) {
            let record = log_record(result);
            for id in members.iter() {
                let Some(mut subscriber) = self.subscribers.get_mut(id) else {
                    continue;
                };
                if !subscriber.is_behind(result) {
                    continue;
                }
                match subscriber.channel.send_text(record.clone()) {
                    Ok(()) => subscriber.last_sent = Some(result.clone()),
                    Err(ChannelClosed) => closed.push(*id),
                }
            }
        }

        for id in closed {
            self.unsubscribe(id);
        }
    }

    /// Send the project's latest entry if it differs from the subscriber's cursor.
    ///
    /// Returns whether anything was sent.
    pub fn poll(&self, id: SubscriberId) -> bool {
        let delivered = {
            let Some(mut subscriber) = self.subscribers.get_mut(&id) else {
                return false;
            };
            let Some(latest) = self.logs.latest(&subscriber.project_id) else {
                return false;
            };
            if !subscriber.is_behind(&latest) {
                return false;
            }

            let sent = subscriber.channel.send_text(log_record(&latest));
            if sent.is_ok() {
                subscriber.last_sent = Some(latest);
            }
            sent
        };

        match delivered {
            Ok(()) => true,
            Err(ChannelClosed) => {
                warn!(subscriber = %id, "live channel closed during poll");
                self.unsubscribe(id);
                false
            }
        }
    }
}

/// Periodic poll of one subscriber. Holds the fanout weakly so a forgotten
/// ticker cannot keep it alive.
struct PollTick {
    fanout: Weak<Fanout>,
    id: SubscriberId,
}

#[async_trait]
impl Tick for PollTick {
    async fn tick(&self) {
        if let Some(fanout) = self.fanout.upgrade() {
            fanout.poll(self.id);
        }
    }
}
