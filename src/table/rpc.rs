//! Worker lanes and pending updates.
//!
//! Every shard is owned by one worker lane. A lane is a thread draining a
//! bounded queue of jobs; non-blocking table updates are shipped to the lane
//! owning the destination shard and hand back a [`PendingUpdate`] that can be
//! waited on later, alone or as part of a [`FutureGroup`].

use crate::error::{Error, Result};
use crossbeam_channel::{bounded, Receiver, Sender};
use parking_lot::Mutex;
use std::thread::JoinHandle;
use tracing::{debug, warn};

pub(crate) type Job = Box<dyn FnOnce() + Send + 'static>;

struct WorkerLane {
    tx: Option<Sender<Job>>,
    handle: Mutex<Option<JoinHandle<()>>>,
}

/// Fixed set of worker lanes shared by every table of one master.
pub(crate) struct WorkerPool {
    lanes: Vec<WorkerLane>,
}

impl WorkerPool {
    pub(crate) fn start(count: usize, queue_capacity: usize) -> Result<Self> {
        let count = count.max(1);
        let mut lanes = Vec::with_capacity(count);
        for id in 0..count {
            let (tx, rx): (Sender<Job>, Receiver<Job>) = bounded(queue_capacity.max(1));
            let handle = std::thread::Builder::new()
                .name(format!("spartan-worker-{id}"))
                .spawn(move || {
                    while let Ok(job) = rx.recv() {
                        job();
                    }
                    debug!(worker = id, "worker lane drained");
                })?;
            lanes.push(WorkerLane {
                tx: Some(tx),
                handle: Mutex::new(Some(handle)),
            });
        }
        Ok(Self { lanes })
    }

    pub(crate) fn len(&self) -> usize {
        self.lanes.len()
    }

    /// Lane owning `shard`.
    #[inline]
    pub(crate) fn worker_for_shard(&self, shard: usize) -> usize {
        shard % self.lanes.len()
    }

    pub(crate) fn submit(&self, worker: usize, job: Job) -> Result<()> {
        let tx = self.lanes[worker]
            .tx
            .as_ref()
            .ok_or(Error::WorkerGone(worker))?;
        tx.send(job).map_err(|_| Error::WorkerGone(worker))
    }
}

impl Drop for WorkerPool {
    fn drop(&mut self) {
        for lane in &mut self.lanes {
            lane.tx.take();
        }
        let current = std::thread::current().id();
        for lane in &self.lanes {
            if let Some(handle) = lane.handle.lock().take() {
                // The last table handle may be released from inside a job.
                if handle.thread().id() == current {
                    continue;
                }
                if handle.join().is_err() {
                    warn!("worker lane panicked during shutdown");
                }
            }
        }
    }
}

/// Completion handle of one non-blocking update.
#[must_use = "a pending update must be waited on"]
pub struct PendingUpdate {
    worker: usize,
    rx: Receiver<Result<()>>,
}

impl PendingUpdate {
    pub(crate) fn channel(worker: usize) -> (Sender<Result<()>>, Self) {
        let (tx, rx) = bounded(1);
        (tx, Self { worker, rx })
    }

    /// Block until the owning worker has applied the update.
    pub fn wait(self) -> Result<()> {
        self.rx.recv().map_err(|_| Error::WorkerGone(self.worker))?
    }
}

/// A group of non-blocking updates that is awaited as a unit.
#[derive(Default)]
#[must_use = "a future group must be waited on"]
pub struct FutureGroup {
    pending: Vec<PendingUpdate>,
}

impl FutureGroup {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn append(&mut self, update: PendingUpdate) {
        self.pending.push(update);
    }

    pub fn len(&self) -> usize {
        self.pending.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }

    /// Wait for every appended update. All updates are awaited even when one
    /// fails; the first failure is returned.
    pub fn wait(self) -> Result<()> {
        let mut first_err = None;
        for update in self.pending {
            if let Err(err) = update.wait() {
                first_err.get_or_insert(err);
            }
        }
        match first_err {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    #[test]
    fn lanes_run_jobs_and_report_completion() {
        let pool = WorkerPool::start(3, 8).unwrap();
        assert_eq!(pool.len(), 3);
        assert_eq!(pool.worker_for_shard(7), 1);

        let counter = Arc::new(AtomicUsize::new(0));
        let mut group = FutureGroup::new();
        for shard in 0..10 {
            let worker = pool.worker_for_shard(shard);
            let (tx, pending) = PendingUpdate::channel(worker);
            let counter = Arc::clone(&counter);
            pool.submit(
                worker,
                Box::new(move || {
                    counter.fetch_add(1, Ordering::SeqCst);
                    let _ = tx.send(Ok(()));
                }),
            )
            .unwrap();
            group.append(pending);
        }
        assert_eq!(group.len(), 10);
        group.wait().unwrap();
        assert_eq!(counter.load(Ordering::SeqCst), 10);
    }

    #[test]
    fn dropped_reply_surfaces_as_worker_gone() {
        let pool = WorkerPool::start(1, 1).unwrap();
        let (tx, pending) = PendingUpdate::channel(0);
        pool.submit(0, Box::new(move || drop(tx))).unwrap();
        assert!(matches!(pending.wait(), Err(Error::WorkerGone(0))));
    }

    #[test]
    fn group_reports_first_failure_after_waiting_all() {
        let mut group = FutureGroup::new();
        let (ok_tx, ok) = PendingUpdate::channel(0);
        let (err_tx, err) = PendingUpdate::channel(1);
        ok_tx.send(Ok(())).unwrap();
        err_tx.send(Err(Error::UnknownTable(crate::table::TableId(9)))).unwrap();
        group.append(ok);
        group.append(err);
        assert!(matches!(group.wait(), Err(Error::UnknownTable(_))));
    }
}
