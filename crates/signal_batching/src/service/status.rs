use crate::error::BatchError;

/// Lifecycle state of a [`Batcher`](super::Batcher).
///
/// Transitions: `Stopped --start--> Running`; a running service moves to
/// `Done` on iterator end, `Closed` when its output channel closes (by
/// `stop` or externally), and `Failed` on a fatal worker or materializer
/// error. Any terminal state can be restarted. `Unknown` is reported when
/// `stop` gives up waiting for the manager to acknowledge shutdown.
#[derive(Debug, Clone, PartialEq)]
pub enum Status {
    Stopped,
    Running,
    Closed,
    Done,
    Failed(BatchError),
    Unknown,
}

impl Status {
    pub fn is_running(&self) -> bool {
        matches!(self, Status::Running)
    }

    /// The stored failure, if the last run failed.
    pub fn error(&self) -> Option<&BatchError> {
        match self {
            Status::Failed(e) => Some(e),
            _ => None,
        }
    }
}

/// How a batching loop ended; sent once over the manager's status
/// channel.
#[derive(Debug)]
pub(crate) enum LoopOutcome {
    /// The iterator ran out; the terminal sentinel was delivered.
    Done,
    /// The output channel closed under the loop (cancellation).
    Closed,
    /// A fatal error; also surfaced on the next `take`.
    Failed(BatchError),
}

impl LoopOutcome {
    pub(crate) fn into_status(self) -> Status {
        match self {
            LoopOutcome::Done => Status::Done,
            LoopOutcome::Closed => Status::Closed,
            LoopOutcome::Failed(e) => Status::Failed(e),
        }
    }
}
