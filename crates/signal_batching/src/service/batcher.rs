//! The service façade: lifecycle, consumer synchronization, and status.

use std::sync::Arc;
use std::thread::{self, JoinHandle};

use crossbeam_channel::{bounded, Receiver, RecvTimeoutError, TryRecvError};
use tracing::{debug, warn};

use crate::channel::Channel;
use crate::config::BatcherConfig;
use crate::error::{BatchError, Result};
use crate::iterator::BatchIterator;
use crate::materialize::{MaterializedBatch, Materializer};
use crate::pool::WorkerPool;
use crate::state::IterationState;

use super::multi::run_multi;
use super::single::run_single;
use super::{Delivery, LoopOutcome, Status};

/// Handle to the batching service.
///
/// Owns the worker pool, the manager thread of the current run, and the
/// bounded output channel. `take` is the consumer-side primitive: it
/// drives training by handing in the expected iteration state and
/// resynchronizes the service transparently whenever that state does not
/// match the stream.
pub struct Batcher {
    spec: Arc<dyn BatchIterator>,
    materializer: Arc<Materializer>,
    pool: WorkerPool,
    config: BatcherConfig,
    out: Channel<Delivery>,
    manager: Option<JoinHandle<()>>,
    status_rx: Option<Receiver<LoopOutcome>>,
    resolved: Status,
}

impl Batcher {
    /// Builds the service. With `config.start_state` set, the first run
    /// starts immediately; otherwise the service stays `Stopped` until
    /// `start` or the first `take`.
    pub fn new(
        pool: WorkerPool,
        materializer: Arc<Materializer>,
        spec: Arc<dyn BatchIterator>,
        config: BatcherConfig,
    ) -> Result<Self> {
        config.validate()?;
        let start_state = config.start_state;

        // Placeholder channel; every start creates a fresh one.
        let out = Channel::bounded(1);
        out.close();

        let mut batcher = Self {
            spec,
            materializer,
            pool,
            config,
            out,
            manager: None,
            status_rx: None,
            resolved: Status::Stopped,
        };
        if let Some(state) = start_state {
            batcher.start(state)?;
        }
        Ok(batcher)
    }

    /// Starts a run from `state` on a fresh output channel. A `start`
    /// while the service is running warns and is a no-op; the existing
    /// run and its in-flight batches are left untouched.
    pub fn start(&mut self, state: IterationState) -> Result<()> {
        if self.status().is_running() {
            warn!("batcher already running; ignoring start");
            return Ok(());
        }

        // The previous channel may be closed or half-drained; recreate
        // rather than reuse.
        let out = Channel::bounded(self.config.buffer_for(self.pool.len()));
        self.out = out.clone();

        let (status_tx, status_rx) = bounded(1);
        let spec = Arc::clone(&self.spec);
        let materializer = Arc::clone(&self.materializer);
        let pool = self.pool.clone();
        let single = pool.is_empty();

        let manager = thread::Builder::new()
            .name("batch-manager".into())
            .spawn(move || {
                let outcome = if single {
                    run_single(spec.as_ref(), materializer.as_ref(), &out, state)
                } else {
                    run_multi(spec, pool, out, state)
                };
                let _ = status_tx.send(outcome);
            })
            .map_err(|e| BatchError::transient(format!("failed to spawn manager thread: {e}")))?;

        debug!(?state, workers = self.pool.len(), "batcher started");
        self.manager = Some(manager);
        self.status_rx = Some(status_rx);
        self.resolved = Status::Running;
        Ok(())
    }

    /// Closes the output channel and waits for the manager to finish.
    /// Idempotent: stopping a non-running service returns its status
    /// unchanged. Never raises; a run that failed reports through the
    /// returned status and the next `take`.
    pub fn stop(&mut self) -> Status {
        self.out.close();
        if let Some(status_rx) = self.status_rx.take() {
            match status_rx.recv_timeout(self.config.stop_timeout) {
                Ok(outcome) => {
                    if let Some(manager) = self.manager.take() {
                        let _ = manager.join();
                    }
                    self.resolved = outcome.into_status();
                }
                Err(RecvTimeoutError::Timeout) => {
                    warn!(
                        timeout = ?self.config.stop_timeout,
                        "manager did not acknowledge stop; detaching"
                    );
                    self.manager.take();
                    self.resolved = Status::Unknown;
                }
                Err(RecvTimeoutError::Disconnected) => {
                    if let Some(manager) = self.manager.take() {
                        let _ = manager.join();
                    }
                    self.resolved = Status::Unknown;
                }
            }
        }
        self.resolved.clone()
    }

    /// Non-blocking peek at the service state. A fatal error is returned
    /// here (not raised) and remains the resolved status until the next
    /// `start`.
    pub fn status(&mut self) -> Status {
        let polled = self.status_rx.as_ref().map(|rx| rx.try_recv());
        match polled {
            Some(Ok(outcome)) => {
                let status = outcome.into_status();
                self.settle(status.clone());
                status
            }
            Some(Err(TryRecvError::Empty)) => Status::Running,
            Some(Err(TryRecvError::Disconnected)) => {
                self.settle(Status::Unknown);
                Status::Unknown
            }
            None => self.resolved.clone(),
        }
    }

    /// Takes the batch produced at `state`, returning it with the state
    /// that produces the next one, or `None` once the iteration is
    /// exhausted.
    ///
    /// Synchronization protocol: a resolved failure is raised before the
    /// channel is touched; otherwise the head of the output stream is
    /// consumed and its `prev_state` compared against `state`. On a
    /// mismatch the service logs a drift warning, stops, restarts from
    /// `state`, and retries, so consumers can rewind or fast-forward by
    /// passing an arbitrary state.
    pub fn take(
        &mut self,
        state: &IterationState,
    ) -> Result<Option<(MaterializedBatch, IterationState)>> {
        loop {
            match self.status() {
                Status::Failed(e) => return Err(e),
                Status::Stopped | Status::Unknown => self.start(*state)?,
                Status::Running | Status::Closed | Status::Done => {}
            }

            match self.out.recv() {
                Ok(delivery) if delivery.prev_state == *state => {
                    if delivery.payload.is_none() {
                        // Terminal sentinel: the run is ending right
                        // behind it. Settle so status reports Done
                        // without racing the manager.
                        self.stop();
                    }
                    return Ok(delivery.payload);
                }
                Ok(delivery) => {
                    warn!(
                        expected = ?state,
                        found = ?delivery.prev_state,
                        "iteration state drift; resynchronizing"
                    );
                    self.stop();
                    self.start(*state)?;
                }
                Err(_) => {
                    // Closed and drained: the run ended. Raise its failure
                    // or restart from the caller's state.
                    if let Status::Failed(e) = self.stop() {
                        return Err(e);
                    }
                    self.start(*state)?;
                }
            }
        }
    }

    /// A handle to the current run's output channel. Closing it is the
    /// canonical external cancellation: the run winds down to
    /// `Status::Closed` and returns its workers to the pool.
    pub fn output(&self) -> Channel<Delivery> {
        self.out.clone()
    }

    /// The worker pool backing this service.
    pub fn workers(&self) -> &WorkerPool {
        &self.pool
    }

    fn settle(&mut self, status: Status) {
        self.status_rx = None;
        if let Some(manager) = self.manager.take() {
            let _ = manager.join();
        }
        self.resolved = status;
    }
}

impl Drop for Batcher {
    fn drop(&mut self) {
        self.out.close();
        if let Some(manager) = self.manager.take() {
            let _ = manager.join();
        }
    }
}
