//! Ordered, reproducible, back-pressured batching of labeled time-series
//! signals.
//!
//! A [`BatchIterator`] lazily produces cheap batch specifications from an
//! [`IterationState`]; a [`WorkerPool`] materializes them into dense
//! `(channels, time, batch)` tensors concurrently; the [`Batcher`]
//! delivers the results strictly in iteration order and resynchronizes
//! whenever a consumer hands in an unexpected state. For any given initial
//! state the emitted sequence is identical across worker counts,
//! scheduling jitter, and restarts.

pub mod channel;
pub mod config;
pub mod error;
pub mod io;
pub mod item;
pub mod iterator;
pub mod materialize;
pub mod pool;
pub mod service;
pub mod state;

pub use config::{BatcherConfig, BatcherConfigBuilder};
pub use error::{BatchError, Result};
pub use item::{AlignmentRule, Batch, BatchItem, ChannelSelector, SampleSpan, SamplingMeta};
pub use iterator::{BatchIterator, FiniteBatches, RandomBatches, RecordingInfo};
pub use materialize::{
    InMemoryRecordings, MaterializedBatch, Materializer, RetryPolicy, SampleLoader,
};
pub use pool::WorkerPool;
pub use service::{Batcher, Delivery, Status};
pub use state::IterationState;
