//! src/service/mod.rs
//!
//! The batching service: turns a lazy stream of batch specifications into
//! a stream of materialized batches, in iteration order, across a pool of
//! workers.
//!
//! # Architecture Overview
//!
//! ```text
//!                 ┌───────────────┐
//!                 │ BatchIterator │ (pure: state -> batch, state')
//!                 └───────┬───────┘
//!                         │ batches, in iteration order
//!                         ↓
//!   ┌──────── manager thread ────────────────────────────────┐
//!   │  ┌────────┐   jobs (unbounded, FIFO)   ┌──────────┐    │
//!   │  │ feeder │ ─────────────────────────→ │ consumer │    │
//!   │  └───┬────┘                            └────┬─────┘    │
//!   │      │ take/wait              put/await     │          │
//!   └──────┼──────────────────────────────────────┼──────────┘
//!          ↓                                      │
//!     ┌─────────┐     one-shot reply futures      │
//!     │ workers │ ────────────────────────────────┘
//!     └─────────┘
//!                                                 │ in-order
//!                                                 ↓
//!                                     out (bounded, close-able)
//!                                                 │
//!                                                 ↓
//!                                       Batcher::take(state)
//! ```
//!
//! The feeder advances the iterator sequentially and dispatches each batch
//! to a pool worker, pushing the resulting future onto the jobs channel in
//! iteration order. The consumer drains jobs in FIFO order, so results
//! reach the output channel in iteration order no matter when each future
//! completes. A sentinel watches the output channel and closes the jobs
//! channel when a consumer closes the output externally, which is the
//! canonical cancellation signal.
//!
//! With an empty pool the manager thread materializes batches itself
//! ([`single`]); the delivered stream is identical either way.

mod batcher;
mod multi;
mod single;
mod status;

pub use batcher::Batcher;
pub use status::Status;

pub(crate) use status::LoopOutcome;

use crate::materialize::MaterializedBatch;
use crate::state::IterationState;

/// One element of the output stream.
///
/// `prev_state` is the state that reproduces this element, and the
/// synchronization anchor for [`Batcher::take`]: consecutive elements
/// chain `prev_{k+1} = new_k`. The terminal sentinel carries
/// `payload = None` and still has a `prev_state`, so a consumer can
/// resynchronize even at end of iteration.
#[derive(Debug, Clone, PartialEq)]
pub struct Delivery {
    pub payload: Option<(MaterializedBatch, IterationState)>,
    pub prev_state: IterationState,
}
