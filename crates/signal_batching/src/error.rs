use std::io;
use std::path::Path;

use thiserror::Error;

pub type Result<T> = std::result::Result<T, BatchError>;

/// Error taxonomy of the batching service.
///
/// The enum is `Clone + PartialEq` so a stored failure can be returned from
/// `status()` any number of times and tests can assert on error classes.
///
/// # Classes
/// - `InvalidArgument`, `ShapeMismatch`: misconfiguration; never retried.
/// - `OutOfRange`, `Open`: typed I/O failures from the byte-range reader;
///   never retried.
/// - `Transient`: network hiccups, partial reads; subject to retry with
///   exponential backoff.
/// - `ChannelClosed`: cooperative cancellation. Never surfaced to the user
///   as an error; loops convert it into the `Closed` outcome.
/// - `WorkerLost` / `Remote`: a worker died holding a job, or raised any
///   error while executing one. `Remote` carries the worker id.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum BatchError {
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    #[error("shape mismatch: expected per-item shape {expected:?}, got {actual:?}")]
    ShapeMismatch {
        expected: Vec<usize>,
        actual: Vec<usize>,
    },

    #[error("range {offset}+{count} is out of bounds for '{path}' ({size} bytes)")]
    OutOfRange {
        path: String,
        offset: u64,
        count: u64,
        size: u64,
    },

    #[error("failed to open '{path}': {reason}")]
    Open { path: String, reason: String },

    #[error("transient failure: {0}")]
    Transient(String),

    #[error("channel closed")]
    ChannelClosed,

    #[error("worker {0} was lost before replying")]
    WorkerLost(usize),

    #[error("worker {worker} failed: {source}")]
    Remote {
        worker: usize,
        #[source]
        source: Box<BatchError>,
    },
}

impl BatchError {
    pub fn invalid(message: impl Into<String>) -> Self {
        BatchError::InvalidArgument(message.into())
    }

    pub fn transient(message: impl Into<String>) -> Self {
        BatchError::Transient(message.into())
    }

    /// Wraps an error raised while a worker held the job.
    pub fn remote(worker: usize, source: BatchError) -> Self {
        BatchError::Remote {
            worker,
            source: Box::new(source),
        }
    }

    /// True for failures that a retry may resolve.
    pub fn is_transient(&self) -> bool {
        matches!(self, BatchError::Transient(_))
    }

    /// True for the cooperative cancellation signal.
    pub fn is_closed(&self) -> bool {
        matches!(self, BatchError::ChannelClosed)
    }

    /// Classifies an `io::Error` raised while touching `path`.
    ///
    /// Interrupted or short reads are transient; everything else (missing
    /// file, permissions) is a terminal open failure.
    pub fn from_io(path: &Path, err: io::Error) -> Self {
        match err.kind() {
            io::ErrorKind::Interrupted
            | io::ErrorKind::WouldBlock
            | io::ErrorKind::TimedOut
            | io::ErrorKind::UnexpectedEof
            | io::ErrorKind::ConnectionReset
            | io::ErrorKind::ConnectionAborted
            | io::ErrorKind::BrokenPipe => {
                BatchError::Transient(format!("{}: {}", path.display(), err))
            }
            _ => BatchError::Open {
                path: path.display().to_string(),
                reason: err.to_string(),
            },
        }
    }
}
