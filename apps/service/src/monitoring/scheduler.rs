use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::Semaphore;
use tokio::task::{JoinError, JoinHandle, JoinSet};
use tokio::time::{Instant, MissedTickBehavior, interval_at};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error};

/// Body of a scheduled job. Each call is one tick.
#[async_trait]
pub trait Tick: Send + Sync + 'static {
    async fn tick(&self);
}

/// Shared worker pool that runs fixed-rate schedules.
///
/// Any number of schedules may be registered; the pool size only bounds how
/// many ticks execute at the same moment. A tick that is due while an earlier
/// one of the same schedule is still running is dispatched anyway.
#[derive(Clone)]
pub struct Scheduler {
    workers: Arc<Semaphore>,
    size: usize,
}

impl Scheduler {
    pub fn new(max_concurrent_ticks: usize) -> Self {
        let size = max_concurrent_ticks.max(1);
        Self { workers: Arc::new(Semaphore::new(size)), size }
    }

    pub fn size(&self) -> usize {
        self.size
    }

    /// Schedule `job` every `period`, first tick immediately.
    pub fn schedule(&self, job: Arc<dyn Tick>, period: Duration) -> ScheduleHandle {
        let stop = CancellationToken::new();
        let abort = CancellationToken::new();

        let driver = tokio::spawn(drive(
            job,
            period,
            Arc::clone(&self.workers),
            stop.clone(),
            abort.clone(),
        ));

        ScheduleHandle { stop, abort, driver: Some(driver) }
    }
}

/// Owns one schedule slot.
///
/// The two ways to end a schedule are separate operations on purpose:
/// [`cancel_and_drain`](Self::cancel_and_drain) lets in-flight ticks finish,
/// [`cancel_and_abort`](Self::cancel_and_abort) interrupts them. Dropping the
/// handle stops dispatching new ticks and drains in the background.
pub struct ScheduleHandle {
    stop: CancellationToken,
    abort: CancellationToken,
    driver: Option<JoinHandle<()>>,
}

impl ScheduleHandle {
    /// Stop dispatching and wait until every in-flight tick has completed.
    pub async fn cancel_and_drain(mut self) {
        self.stop.cancel();
        self.join().await;
    }

    /// Stop dispatching and interrupt in-flight ticks at their next await point.
    pub async fn cancel_and_abort(mut self) {
        self.stop.cancel();
        self.abort.cancel();
        self.join().await;
    }

    async fn join(&mut self) {
        if let Some(driver) = self.driver.take() {
            if let Err(e) = driver.await {
                if e.is_panic() {
                    error!("schedule driver panicked: {e}");
                }
            }
        }
    }
}

impl Drop for ScheduleHandle {
    fn drop(&mut self) {
        self.stop.cancel();
    }
}

async fn drive(
    job: Arc<dyn Tick>,
    period: Duration,
    workers: Arc<Semaphore>,
    stop: CancellationToken,
    abort: CancellationToken,
) {
    // Burst keeps the nth tick at start + n * period even after a stall
    let mut timer = interval_at(Instant::now(), period);
    timer.set_missed_tick_behavior(MissedTickBehavior::Burst);
    let mut in_flight = JoinSet::new();

    loop {
        tokio::select! {
            biased;
            _ = stop.cancelled() => break,
            _ = timer.tick() => {
                let job = Arc::clone(&job);
                let workers = Arc::clone(&workers);
                let stop = stop.clone();
                in_flight.spawn(async move {
                    let Ok(_permit) = workers.acquire_owned().await else {
                        return;
                    };
                    // Dispatched but still queued for a worker when the schedule ended
                    if stop.is_cancelled() {
                        return;
                    }
                    job.tick().await;
                });
            }
            Some(joined) = in_flight.join_next(), if !in_flight.is_empty() => report(joined),
        }
    }

    debug!(in_flight = in_flight.len(), "schedule stopped, settling in-flight ticks");

    loop {
        tokio::select! {
            biased;
            _ = abort.cancelled() => {
                in_flight.abort_all();
                while let Some(joined) = in_flight.join_next().await {
                    report(joined);
                }
                break;
            }
            joined = in_flight.join_next() => match joined {
                Some(joined) => report(joined),
                None => break,
            },
        }
    }
}

fn report(joined: Result<(), JoinError>) {
    if let Err(e) = joined {
        if e.is_panic() {
            error!("scheduled tick panicked: {e}");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Records the virtual time of every tick start and completion.
    struct Recorder {
        started: Mutex<Vec<Instant>>,
        finished: AtomicUsize,
        running: AtomicUsize,
        peak: AtomicUsize,
        work: Duration,
    }

    impl Recorder {
        fn new(work: Duration) -> Arc<Self> {
            Arc::new(Self {
                started: Mutex::new(Vec::new()),
                finished: AtomicUsize::new(0),
                running: AtomicUsize::new(0),
                peak: AtomicUsize::new(0),
                work,
            })
        }

        fn starts(&self) -> usize {
            self.started.lock().unwrap().len()
        }
    }

    #[async_trait]
    impl Tick for Recorder {
        async fn tick(&self) {
            self.started.lock().unwrap().push(Instant::now());
            let now = self.running.fetch_add(1, Ordering::SeqCst) + 1;
            self.peak.fetch_max(now, Ordering::SeqCst);
            tokio::time::sleep(self.work).await;
            self.running.fetch_sub(1, Ordering::SeqCst);
            self.finished.fetch_add(1, Ordering::SeqCst);
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_fixed_rate_with_immediate_first_tick() {
        let scheduler = Scheduler::new(4);
        let recorder = Recorder::new(Duration::from_millis(50));
        let origin = Instant::now();

        let handle = scheduler.schedule(recorder.clone(), Duration::from_secs(10));
        tokio::time::sleep(Duration::from_secs(25)).await;

        let offsets: Vec<u64> = recorder
            .started
            .lock()
            .unwrap()
            .iter()
            .map(|at| at.duration_since(origin).as_secs())
            .collect();
        assert_eq!(offsets, vec![0, 10, 20]);

        handle.cancel_and_drain().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_slow_ticks_do_not_shift_the_schedule() {
        let scheduler = Scheduler::new(4);
        // Each tick outlives the period, ticks overlap instead of drifting
        let recorder = Recorder::new(Duration::from_secs(15));
        let origin = Instant::now();

        let handle = scheduler.schedule(recorder.clone(), Duration::from_secs(10));
        tokio::time::sleep(Duration::from_secs(21)).await;

        let offsets: Vec<u64> = recorder
            .started
            .lock()
            .unwrap()
            .iter()
            .map(|at| at.duration_since(origin).as_secs())
            .collect();
        assert_eq!(offsets, vec![0, 10, 20]);
        assert!(recorder.peak.load(Ordering::SeqCst) >= 2);

        handle.cancel_and_abort().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_pool_bounds_simultaneous_ticks() {
        let scheduler = Scheduler::new(1);
        let a = Recorder::new(Duration::from_secs(3));
        let b = Recorder::new(Duration::from_secs(3));
        let peak_probe = Arc::new(AtomicUsize::new(0));

        let ha = scheduler.schedule(a.clone(), Duration::from_secs(10));
        let hb = scheduler.schedule(b.clone(), Duration::from_secs(10));

        for _ in 0..14 {
            tokio::time::sleep(Duration::from_millis(500)).await;
            let together = a.running.load(Ordering::SeqCst) + b.running.load(Ordering::SeqCst);
            peak_probe.fetch_max(together, Ordering::SeqCst);
        }

        assert_eq!(peak_probe.load(Ordering::SeqCst), 1);
        assert_eq!(a.finished.load(Ordering::SeqCst) + b.finished.load(Ordering::SeqCst), 2);

        ha.cancel_and_drain().await;
        hb.cancel_and_drain().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_drain_waits_for_in_flight_tick() {
        let scheduler = Scheduler::new(2);
        let recorder = Recorder::new(Duration::from_secs(5));

        let handle = scheduler.schedule(recorder.clone(), Duration::from_secs(10));
        tokio::time::sleep(Duration::from_secs(1)).await;
        assert_eq!(recorder.running.load(Ordering::SeqCst), 1);

        handle.cancel_and_drain().await;
        assert_eq!(recorder.finished.load(Ordering::SeqCst), 1);

        tokio::time::sleep(Duration::from_secs(30)).await;
        assert_eq!(recorder.starts(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_abort_interrupts_in_flight_tick() {
        let scheduler = Scheduler::new(2);
        let recorder = Recorder::new(Duration::from_secs(5));

        let handle = scheduler.schedule(recorder.clone(), Duration::from_secs(10));
        tokio::time::sleep(Duration::from_secs(1)).await;

        handle.cancel_and_abort().await;
        assert_eq!(recorder.finished.load(Ordering::SeqCst), 0);

        tokio::time::sleep(Duration::from_secs(30)).await;
        assert_eq!(recorder.starts(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_dropping_handle_stops_dispatch() {
        let scheduler = Scheduler::new(2);
        let recorder = Recorder::new(Duration::from_millis(10));

        let handle = scheduler.schedule(recorder.clone(), Duration::from_secs(10));
        tokio::time::sleep(Duration::from_secs(1)).await;
        drop(handle);

        tokio::time::sleep(Duration::from_secs(60)).await;
        assert_eq!(recorder.starts(), 1);
    }
}
