//! Multi-worker batching loop: a feeder task dispatches materialization
//! jobs across the pool in iteration order, the consumer drains the
//! resulting futures in the same order onto the output channel, and a
//! sentinel converts an external close of the output into closure of the
//! jobs channel.
//!
//! Ordering does not depend on completion order: the jobs channel is
//! FIFO and filled sequentially, so the consumer awaits futures in the
//! exact order the feeder issued them. Back-pressure comes from the pool
//! (the feeder blocks while no worker is free) and from the bounded
//! output channel (the consumer blocks while the trainer lags).

use std::sync::Arc;
use std::thread;

use crossbeam_channel::{bounded, Receiver};
use tracing::debug;

use crate::channel::Channel;
use crate::error::BatchError;
use crate::iterator::BatchIterator;
use crate::pool::{MaterializeResult, WorkerLease, WorkerPool};
use crate::state::IterationState;

use super::{Delivery, LoopOutcome};

enum Job {
    Batch {
        /// `None` for synthetic futures (iterator failure); the job then
        /// attributes its error to the manager as worker 0.
        lease: Option<WorkerLease>,
        future: Receiver<MaterializeResult>,
        new_state: IterationState,
        prev_state: IterationState,
    },
    Terminal {
        prev_state: IterationState,
    },
}

pub(crate) fn run_multi(
    spec: Arc<dyn BatchIterator>,
    pool: WorkerPool,
    out: Channel<Delivery>,
    start: IterationState,
) -> LoopOutcome {
    let jobs: Channel<Job> = Channel::unbounded();

    let sentinel = {
        let out = out.clone();
        let jobs = jobs.clone();
        thread::Builder::new()
            .name("batch-sentinel".into())
            .spawn(move || {
                out.wait_closed();
                jobs.close();
            })
    };
    let sentinel = match sentinel {
        Ok(handle) => handle,
        Err(e) => {
            out.close();
            return LoopOutcome::Failed(BatchError::transient(format!(
                "failed to spawn sentinel thread: {e}"
            )));
        }
    };

    let feeder = {
        let spec = Arc::clone(&spec);
        let pool = pool.clone();
        let jobs = jobs.clone();
        thread::Builder::new()
            .name("batch-feeder".into())
            .spawn(move || feed(spec, pool, jobs, start))
    };
    let feeder = match feeder {
        Ok(handle) => handle,
        Err(e) => {
            jobs.close();
            out.close();
            let _ = sentinel.join();
            return LoopOutcome::Failed(BatchError::transient(format!(
                "failed to spawn feeder thread: {e}"
            )));
        }
    };

    let outcome = consume(&jobs, &pool, &out);

    // Cleanup on every exit path: stop the feeder, close the stream, and
    // return in-flight workers before anyone joins.
    jobs.close();
    out.close();
    pool.reset();
    let _ = feeder.join();
    let _ = sentinel.join();
    // The feeder may have dropped a freshly-taken lease while shutting
    // down; a second reset reclaims it.
    pool.reset();

    debug!(?outcome, "multi-worker loop finished");
    outcome
}

/// Advances the iterator sequentially and dispatches each batch to a pool
/// worker, pushing jobs in iteration order. Ends by pushing the terminal
/// job, or silently once the jobs channel closes under it.
fn feed(spec: Arc<dyn BatchIterator>, pool: WorkerPool, jobs: Channel<Job>, start: IterationState) {
    let mut prev = start;
    let mut state = start;
    loop {
        match spec.next_batch(&state) {
            Ok(Some((batch, new_state))) => {
                // Wait without consuming, then re-check the jobs channel:
                // cancellation must win over a newly free worker. The
                // non-consuming wait is a nudge, not a reservation, so
                // loop until a take actually lands.
                let lease = loop {
                    pool.wait();
                    if jobs.is_closed() || pool.is_empty() {
                        return;
                    }
                    if let Some(lease) = pool.try_take() {
                        break lease;
                    }
                };
                let future = lease.dispatch(batch);
                let job = Job::Batch {
                    lease: Some(lease),
                    future,
                    new_state,
                    prev_state: prev,
                };
                if jobs.send(job).is_err() {
                    return;
                }
                prev = new_state;
                state = new_state;
            }
            Ok(None) => {
                let _ = jobs.send(Job::Terminal { prev_state: prev });
                return;
            }
            Err(e) => {
                // Deliver the failure in iteration order through a
                // pre-resolved future.
                let (tx, rx) = bounded(1);
                let _ = tx.send(Err(e));
                let _ = jobs.send(Job::Batch {
                    lease: None,
                    future: rx,
                    new_state: state,
                    prev_state: prev,
                });
                return;
            }
        }
    }
}

/// Drains jobs in FIFO order, returning workers to the pool on success
/// and pushing deliveries onto the output channel. On a failed or lost
/// future, closes the jobs channel (stopping the feeder) and reports the
/// failure.
fn consume(jobs: &Channel<Job>, pool: &WorkerPool, out: &Channel<Delivery>) -> LoopOutcome {
    loop {
        let job = match jobs.recv() {
            Ok(job) => job,
            Err(_) => return LoopOutcome::Closed,
        };
        match job {
            Job::Terminal { prev_state } => {
                let sent = out.send(Delivery {
                    payload: None,
                    prev_state,
                });
                return match sent {
                    Ok(()) => LoopOutcome::Done,
                    Err(_) => LoopOutcome::Closed,
                };
            }
            Job::Batch {
                lease,
                future,
                new_state,
                prev_state,
            } => {
                let worker = lease.as_ref().map(WorkerLease::id).unwrap_or(0);
                match future.recv() {
                    Ok(Ok(materialized)) => {
                        if let Some(lease) = lease {
                            pool.put(lease);
                        }
                        let delivery = Delivery {
                            payload: Some((materialized, new_state)),
                            prev_state,
                        };
                        if out.send(delivery).is_err() {
                            return LoopOutcome::Closed;
                        }
                    }
                    Ok(Err(e)) => {
                        if let Some(lease) = lease {
                            pool.put(lease);
                        }
                        jobs.close();
                        return LoopOutcome::Failed(BatchError::remote(worker, e));
                    }
                    Err(_) => {
                        // The worker died holding the job; its lease is
                        // dropped and the next reset removes the member.
                        jobs.close();
                        return LoopOutcome::Failed(BatchError::remote(
                            worker,
                            BatchError::WorkerLost(worker),
                        ));
                    }
                }
            }
        }
    }
}
