//! Background timer: the scheduler run-loop.
//!
//! Maintains a `BTreeMap<Instant, ScheduleEntry>` priority queue and sleeps
//! until the next deadline via `tokio::time::sleep_until`. Zero polling.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::jobs::Job;
use crate::core::error::AppError;
use crate::subsystems::runtime::{Component, ComponentFuture};

// ── Schedule entry ───────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ScheduleEntry {
    pub job: Job,
    pub every: Duration,
}

// ── Busy flag ────────────────────────────────────────────────────────────────

/// Held from the moment the timer hands a job off until the runner has
/// finished it. A tick that finds the flag held is dropped.
#[derive(Debug, Clone, Default)]
pub struct BusyFlag(Arc<AtomicBool>);

impl BusyFlag {
    /// Take the flag if the runner is idle.
    pub fn try_claim(&self) -> bool {
        self.0
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }

    pub fn release(&self) {
        self.0.store(false, Ordering::Release);
    }

    pub fn is_busy(&self) -> bool {
        self.0.load(Ordering::Acquire)
    }
}

// ── Service ──────────────────────────────────────────────────────────────────

/// Fires each entry's job every `every`, starting one interval after start.
pub struct TimerService {
    entries: Vec<ScheduleEntry>,
    job_tx: mpsc::Sender<Job>,
    busy: BusyFlag,
}

impl TimerService {
    pub fn new(entries: Vec<ScheduleEntry>, job_tx: mpsc::Sender<Job>, busy: BusyFlag) -> Self {
        Self {
            entries,
            job_tx,
            busy,
        }
    }

    /// Run the timer loop until shutdown or the job runner goes away.
    pub async fn run_loop(self, shutdown: CancellationToken) -> Result<(), AppError> {
        let now = Instant::now();
        // Same-instant deadlines are nudged by 1ns to keep keys unique.
        let mut queue: BTreeMap<Instant, ScheduleEntry> = BTreeMap::new();
        for entry in self.entries {
            insert_unique(&mut queue, now + entry.every, entry);
        }

        info!(jobs = queue.len(), "scheduler running");

        loop {
            let Some(next_deadline) = queue.keys().next().copied() else {
                // Nothing scheduled; park until shutdown.
                shutdown.cancelled().await;
                break;
            };

            tokio::select! {
                biased;

                _ = shutdown.cancelled() => {
                    info!("scheduler shutting down ({} schedules dropped)", queue.len());
                    break;
                }

                _ = tokio::time::sleep_until(next_deadline) => {
                    let Some((deadline, entry)) = queue.pop_first() else { continue };
                    insert_unique(&mut queue, deadline + entry.every, entry);

                    if !self.busy.try_claim() {
                        warn!(job = %entry.job, "job runner busy, skipping this run");
                        continue;
                    }
                    debug!(job = %entry.job, "timer firing");

                    match self.job_tx.try_send(entry.job) {
                        Ok(()) => {}
                        Err(mpsc::error::TrySendError::Full(job)) => {
                            self.busy.release();
                            warn!(%job, "job queue full, skipping this run");
                        }
                        Err(mpsc::error::TrySendError::Closed(_)) => {
                            info!("job runner gone, scheduler stopping");
                            break;
                        }
                    }
                }
            }
        }
        Ok(())
    }
}

impl Component for TimerService {
    fn id(&self) -> &str {
        "scheduler"
    }

    fn run(self: Box<Self>, shutdown: CancellationToken) -> ComponentFuture {
        Box::pin(self.run_loop(shutdown))
    }
}

// ── Helpers ──────────────────────────────────────────────────────────────────

/// Insert into the BTreeMap, nudging the key by 1ns if it already exists.
/// Returns the actual key used.
fn insert_unique(
    queue: &mut BTreeMap<Instant, ScheduleEntry>,
    mut deadline: Instant,
    entry: ScheduleEntry,
) -> Instant {
    while queue.contains_key(&deadline) {
        deadline += Duration::from_nanos(1);
    }
    queue.insert(deadline, entry);
    deadline
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::time;

    /// Spawn a timer and let it register its first deadlines.
    async fn spawn_timer(
        entries: Vec<ScheduleEntry>,
    ) -> (mpsc::Receiver<Job>, BusyFlag, CancellationToken) {
        let (tx, rx) = mpsc::channel(1);
        let busy = BusyFlag::default();
        let shutdown = CancellationToken::new();
        tokio::spawn(TimerService::new(entries, tx, busy.clone()).run_loop(shutdown.clone()));
        tokio::task::yield_now().await;
        (rx, busy, shutdown)
    }

    async fn next_job(rx: &mut mpsc::Receiver<Job>) -> Job {
        time::timeout(Duration::from_secs(1), rx.recv())
            .await
            .expect("timeout waiting for job")
            .expect("channel closed")
    }

    #[test]
    fn insert_unique_nudges_collisions() {
        let mut queue = BTreeMap::new();
        let at = Instant::now();
        let entry = ScheduleEntry {
            job: Job::Reports,
            every: Duration::from_secs(1),
        };
        let a = insert_unique(&mut queue, at, entry);
        let b = insert_unique(&mut queue, at, entry);
        assert_eq!(a, at);
        assert_eq!(b, at + Duration::from_nanos(1));
        assert_eq!(queue.len(), 2);
    }

    #[test]
    fn busy_flag_claims_once() {
        let busy = BusyFlag::default();
        assert!(busy.try_claim());
        assert!(!busy.try_claim());
        assert!(busy.is_busy());
        busy.release();
        assert!(!busy.is_busy());
        assert!(busy.try_claim());
    }

    #[tokio::test]
    async fn interval_fires_repeatedly() {
        time::pause();
        let (mut rx, busy, shutdown) = spawn_timer(vec![ScheduleEntry {
            job: Job::SlackSync,
            every: Duration::from_secs(10),
        }])
        .await;

        time::advance(Duration::from_secs(5)).await;
        assert!(rx.try_recv().is_err(), "must not fire before the first interval");

        time::advance(Duration::from_secs(6)).await;
        assert_eq!(next_job(&mut rx).await, Job::SlackSync);
        busy.release();

        time::advance(Duration::from_secs(10)).await;
        assert_eq!(next_job(&mut rx).await, Job::SlackSync);

        shutdown.cancel();
    }

    #[tokio::test]
    async fn entries_fire_in_deadline_order() {
        time::pause();
        let (mut rx, busy, shutdown) = spawn_timer(vec![
            ScheduleEntry {
                job: Job::Reports,
                every: Duration::from_secs(30),
            },
            ScheduleEntry {
                job: Job::GmailSync,
                every: Duration::from_secs(20),
            },
        ])
        .await;

        time::advance(Duration::from_secs(21)).await;
        assert_eq!(next_job(&mut rx).await, Job::GmailSync);
        busy.release();

        time::advance(Duration::from_secs(10)).await;
        assert_eq!(next_job(&mut rx).await, Job::Reports);

        shutdown.cancel();
    }

    #[tokio::test]
    async fn tick_while_busy_is_dropped() {
        time::pause();
        let (mut rx, busy, shutdown) = spawn_timer(vec![ScheduleEntry {
            job: Job::Reports,
            every: Duration::from_secs(10),
        }])
        .await;

        time::advance(Duration::from_secs(11)).await;
        assert_eq!(next_job(&mut rx).await, Job::Reports);

        // Runner still working on the first job when the next tick lands.
        time::advance(Duration::from_secs(10)).await;
        tokio::task::yield_now().await;
        assert!(
            rx.try_recv().is_err(),
            "a tick during a running job must not be queued"
        );

        // Once idle, the following tick goes through again.
        busy.release();
        time::advance(Duration::from_secs(10)).await;
        assert_eq!(next_job(&mut rx).await, Job::Reports);

        shutdown.cancel();
    }

    #[tokio::test]
    async fn stops_when_runner_is_gone() {
        time::pause();
        let (tx, rx) = mpsc::channel(1);
        drop(rx);
        let svc = TimerService::new(
            vec![ScheduleEntry {
                job: Job::DriveSync,
                every: Duration::from_secs(1),
            }],
            tx,
            BusyFlag::default(),
        );
        let handle = tokio::spawn(svc.run_loop(CancellationToken::new()));
        tokio::task::yield_now().await;
        time::advance(Duration::from_secs(2)).await;
        let res = time::timeout(Duration::from_secs(1), handle)
            .await
            .expect("timer should exit")
            .expect("task panicked");
        assert!(res.is_ok());
    }

    #[tokio::test]
    async fn empty_schedule_waits_for_shutdown() {
        let shutdown = CancellationToken::new();
        let (tx, _rx) = mpsc::channel(1);
        let handle = tokio::spawn(
            TimerService::new(Vec::new(), tx, BusyFlag::default()).run_loop(shutdown.clone()),
        );
        shutdown.cancel();
        assert!(handle.await.expect("task panicked").is_ok());
    }
}
