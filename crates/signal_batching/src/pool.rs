//! Ordered, reentrant pool of worker identities.
//!
//! Workers are long-lived threads, each owning a private job channel; a
//! dispatched job answers through a one-shot reply channel, which is the
//! future awaited by the consumer task. The pool itself only tracks
//! membership and availability: `take`/`put`/`wait`/`reset` forward to the
//! owning state under one mutex, so a cloned handle behaves the same from
//! any thread.

use std::collections::{BTreeMap, VecDeque};
use std::sync::{Arc, Condvar, Mutex};
use std::thread::{self, JoinHandle};

use crossbeam_channel::{bounded, unbounded, Receiver, Sender};
use tracing::{debug, warn};

use crate::channel::lock;
use crate::error::Result;
use crate::item::Batch;
use crate::materialize::{MaterializedBatch, Materializer};

pub type WorkerId = usize;

pub(crate) type MaterializeResult = Result<MaterializedBatch>;

/// One unit of work for a worker thread.
struct WorkerJob {
    batch: Batch,
    reply: Sender<MaterializeResult>,
}

/// A worker checked out of the pool.
///
/// Dropping a lease without `put`ting it back leaves the worker checked
/// out until the next `reset`.
pub struct WorkerLease {
    id: WorkerId,
    job_tx: Sender<WorkerJob>,
}

impl WorkerLease {
    pub fn id(&self) -> WorkerId {
        self.id
    }

    /// Sends `batch` to the worker and returns the one-shot future for its
    /// result. If the worker is already gone the job is dropped with its
    /// reply sender, so the returned receiver reports disconnection, which
    /// the caller maps to `WorkerLost`.
    pub(crate) fn dispatch(&self, batch: Batch) -> Receiver<MaterializeResult> {
        let (reply_tx, reply_rx) = bounded(1);
        let _ = self.job_tx.send(WorkerJob {
            batch,
            reply: reply_tx,
        });
        reply_rx
    }
}

struct WorkerMember {
    job_tx: Sender<WorkerJob>,
    handle: JoinHandle<()>,
}

struct PoolState {
    members: BTreeMap<WorkerId, WorkerMember>,
    ready: VecDeque<WorkerId>,
}

struct PoolInner {
    state: Mutex<PoolState>,
    ready_cv: Condvar,
}

/// Ordered multi-producer/multi-consumer holder of worker identities.
#[derive(Clone)]
pub struct WorkerPool {
    inner: Arc<PoolInner>,
}

impl WorkerPool {
    /// A pool with no workers; the service runs its single-worker loop on
    /// the manager thread instead.
    pub fn empty() -> Self {
        Self {
            inner: Arc::new(PoolInner {
                state: Mutex::new(PoolState {
                    members: BTreeMap::new(),
                    ready: VecDeque::new(),
                }),
                ready_cv: Condvar::new(),
            }),
        }
    }

    /// Spawns `num_workers` worker threads, each executing materialization
    /// jobs with the given materializer, and enqueues them in id order.
    pub fn spawn(num_workers: usize, materializer: Arc<Materializer>) -> Result<Self> {
        let pool = Self::empty();
        {
            let mut state = lock(&pool.inner.state);
            for id in 0..num_workers {
                let (job_tx, job_rx) = unbounded();
                let materializer = Arc::clone(&materializer);
                let handle = thread::Builder::new()
                    .name(format!("batch-worker-{id}"))
                    .spawn(move || worker_loop(job_rx, materializer))
                    .map_err(|e| {
                        crate::error::BatchError::transient(format!(
                            "failed to spawn worker thread {id}: {e}"
                        ))
                    })?;
                state.members.insert(id, WorkerMember { job_tx, handle });
                state.ready.push_back(id);
            }
        }
        Ok(pool)
    }

    /// Total managed workers, including checked-out ones.
    pub fn len(&self) -> usize {
        lock(&self.inner.state).members.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Workers currently waiting in the ready queue.
    pub fn available(&self) -> usize {
        lock(&self.inner.state).ready.len()
    }

    /// Checks the next ready worker out of the pool, blocking while none
    /// is available.
    pub fn take(&self) -> WorkerLease {
        let mut state = lock(&self.inner.state);
        loop {
            if let Some(id) = state.ready.pop_front() {
                if let Some(member) = state.members.get(&id) {
                    return WorkerLease {
                        id,
                        job_tx: member.job_tx.clone(),
                    };
                }
                // A reset removed the member between enqueue and take;
                // keep looking.
                continue;
            }
            state = self
                .inner
                .ready_cv
                .wait(state)
                .unwrap_or_else(std::sync::PoisonError::into_inner);
        }
    }

    /// Non-blocking `take`: `None` when no worker is ready right now.
    pub fn try_take(&self) -> Option<WorkerLease> {
        let mut state = lock(&self.inner.state);
        while let Some(id) = state.ready.pop_front() {
            if let Some(member) = state.members.get(&id) {
                return Some(WorkerLease {
                    id,
                    job_tx: member.job_tx.clone(),
                });
            }
        }
        None
    }

    /// Returns a lease to the ready queue. Idempotent for known members;
    /// leases of workers dropped by `reset` are discarded.
    pub fn put(&self, lease: WorkerLease) {
        let mut state = lock(&self.inner.state);
        if state.members.contains_key(&lease.id) && !state.ready.contains(&lease.id) {
            state.ready.push_back(lease.id);
            self.inner.ready_cv.notify_one();
        }
    }

    /// Blocks until at least one worker is available, without consuming
    /// it.
    ///
    /// This is an at-most-once nudge, not a reservation: a worker that
    /// becomes available between `wait` and a following `take` may be
    /// grabbed by another task. Returns immediately on an empty pool so a
    /// caller can observe membership collapse instead of blocking forever.
    pub fn wait(&self) {
        let mut state = lock(&self.inner.state);
        while state.ready.is_empty() && !state.members.is_empty() {
            state = self
                .inner
                .ready_cv
                .wait(state)
                .unwrap_or_else(std::sync::PoisonError::into_inner);
        }
    }

    /// Drains the ready queue, drops workers whose thread has exited, and
    /// re-enqueues every live managed worker exactly once in ascending id
    /// order. Idempotent; tolerates concurrent `take`/`put`.
    pub fn reset(&self) {
        let mut state = lock(&self.inner.state);
        state.ready.clear();
        let dead: Vec<WorkerId> = state
            .members
            .iter()
            .filter(|(_, member)| member.handle.is_finished())
            .map(|(&id, _)| id)
            .collect();
        for id in dead {
            warn!(worker = id, "dropping dead worker from pool");
            state.members.remove(&id);
        }
        let live: Vec<WorkerId> = state.members.keys().copied().collect();
        state.ready.extend(live);
        self.inner.ready_cv.notify_all();
    }
}

impl Drop for PoolInner {
    fn drop(&mut self) {
        // Dropping the job senders ends each worker loop; then wait for
        // the threads so in-flight jobs finish before teardown.
        let members = std::mem::take(&mut lock(&self.state).members);
        for (_, member) in members {
            drop(member.job_tx);
            let _ = member.handle.join();
        }
    }
}

fn worker_loop(job_rx: Receiver<WorkerJob>, materializer: Arc<Materializer>) {
    for job in job_rx.iter() {
        let result = materializer.materialize_batch_with_retry(&job.batch);
        if job.reply.send(result).is_err() {
            // The consumer abandoned this job (cancellation); keep
            // serving, the pool decides our lifetime.
            debug!("materialization result discarded after cancellation");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::materialize::testing::constant_materializer;

    fn pool_of(n: usize) -> WorkerPool {
        WorkerPool::spawn(n, constant_materializer()).unwrap()
    }

    #[test]
    fn spawn_enqueues_workers_in_id_order() {
        let pool = pool_of(3);
        assert_eq!(pool.len(), 3);
        assert_eq!(pool.available(), 3);
        let ids: Vec<WorkerId> = (0..3).map(|_| pool.take().id()).collect();
        assert_eq!(ids, vec![0, 1, 2]);
    }

    #[test]
    fn put_is_idempotent_for_known_members() {
        let pool = pool_of(2);
        let lease = pool.take();
        let id = lease.id();
        let twin = WorkerLease {
            id,
            job_tx: lease.job_tx.clone(),
        };
        pool.put(lease);
        pool.put(twin);
        assert_eq!(pool.available(), 2);
    }

    #[test]
    fn take_blocks_until_put() {
        let pool = pool_of(1);
        let lease = pool.take();
        assert_eq!(pool.available(), 0);

        let waiter = {
            let pool = pool.clone();
            std::thread::spawn(move || pool.take().id())
        };
        std::thread::sleep(std::time::Duration::from_millis(30));
        pool.put(lease);
        assert_eq!(waiter.join().unwrap(), 0);
    }

    #[test]
    fn try_take_is_non_blocking() {
        let pool = pool_of(1);
        let lease = pool.try_take().unwrap();
        assert!(pool.try_take().is_none());
        pool.put(lease);
        assert!(pool.try_take().is_some());
    }

    #[test]
    fn wait_does_not_consume() {
        let pool = pool_of(1);
        pool.wait();
        assert_eq!(pool.available(), 1);
    }

    #[test]
    fn reset_restores_checked_out_workers() {
        let pool = pool_of(3);
        let a = pool.take();
        let _b = pool.take();
        assert_eq!(pool.available(), 1);

        pool.reset();
        assert_eq!(pool.available(), 3);
        assert_eq!(pool.len(), 3);

        // A stale lease returned after reset must not duplicate the
        // worker in the ready queue.
        pool.put(a);
        assert_eq!(pool.available(), 3);
    }

    #[test]
    fn empty_pool_wait_returns() {
        let pool = WorkerPool::empty();
        pool.wait();
        assert_eq!(pool.len(), 0);
    }
}
