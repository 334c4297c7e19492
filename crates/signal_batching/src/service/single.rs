//! Single-worker batching loop: drives the iterator and the materializer
//! on the manager thread itself. Used when the worker pool is empty.

use tracing::debug;

use crate::channel::Channel;
use crate::error::BatchError;
use crate::iterator::BatchIterator;
use crate::materialize::Materializer;
use crate::state::IterationState;

use super::{Delivery, LoopOutcome};

/// Runs until the iterator ends, the output channel closes, or a fatal
/// error occurs. Fatal errors close the output channel and are wrapped
/// `Remote { worker: 0 }` so failures surface identically across
/// manager/worker layouts.
pub(crate) fn run_single(
    spec: &dyn BatchIterator,
    materializer: &Materializer,
    out: &Channel<Delivery>,
    start: IterationState,
) -> LoopOutcome {
    let mut prev = start;
    let mut state = start;
    loop {
        let step = match spec.next_batch(&state) {
            Ok(step) => step,
            Err(e) => {
                out.close();
                return LoopOutcome::Failed(BatchError::remote(0, e));
            }
        };
        let (batch, new_state) = match step {
            Some(step) => step,
            None => {
                let sent = out.send(Delivery {
                    payload: None,
                    prev_state: prev,
                });
                out.close();
                return match sent {
                    Ok(()) => {
                        debug!("iterator exhausted; terminal sentinel delivered");
                        LoopOutcome::Done
                    }
                    Err(_) => LoopOutcome::Closed,
                };
            }
        };

        match materializer.materialize_batch_with_retry(&batch) {
            Ok(materialized) => {
                let delivery = Delivery {
                    payload: Some((materialized, new_state)),
                    prev_state: prev,
                };
                if out.send(delivery).is_err() {
                    return LoopOutcome::Closed;
                }
                prev = new_state;
                state = new_state;
            }
            Err(e) if e.is_closed() => return LoopOutcome::Closed,
            Err(e) => {
                out.close();
                return LoopOutcome::Failed(BatchError::remote(0, e));
            }
        }
    }
}
