//! Materialization: the expensive step turning a batch of items into dense
//! tensors.
//!
//! Loading is delegated to a [`SampleLoader`] (object storage, local
//! files, in-memory buffers); this module selects channels, extracts label
//! windows, runs the per-item loads concurrently within one worker, and
//! stacks the results on a new trailing batch axis.

mod channels;
mod inmemory;
mod retry;

pub use channels::get_channel_data;
pub use inmemory::{InMemoryRecordings, RecordingBuffers};
pub use retry::{retry_transient, RetryPolicy};

use std::sync::Arc;
use std::thread;

use ndarray::{s, stack, Array2, Array3, ArrayView2, Axis};

use crate::error::{BatchError, Result};
use crate::item::{Batch, BatchItem};

/// Raw signal tensors for one item, as produced by a loader: all recorded
/// channels over the item's sample span.
#[derive(Debug, Clone)]
pub struct SampleBlock {
    pub channels: Vec<String>,
    /// `(channels, time)` over the item's sample span.
    pub data: Array2<f32>,
    pub sample_rate: f64,
}

/// Label tensors covering at least the item's label window.
#[derive(Debug, Clone)]
pub struct LabelBlock {
    pub labels: Vec<String>,
    /// `(label_channels, label_time)` starting at `start`.
    pub data: Array2<f32>,
    pub label_rate: f64,
    /// Label-sample index of the first column of `data`.
    pub start: u64,
}

/// Storage-backend seam: fetches the raw tensors for one item.
pub trait SampleLoader: Send + Sync {
    fn load_item_samples(&self, item: &BatchItem) -> Result<(SampleBlock, LabelBlock)>;
}

/// A pair `(X, Y)` of stacked tensors: signal `(channels, time, batch)`
/// and labels `(label_channels, label_time, batch)`. The trailing axis is
/// always the batch axis.
#[derive(Debug, Clone, PartialEq)]
pub struct MaterializedBatch {
    pub x: Array3<f32>,
    pub y: Array3<f32>,
}

impl MaterializedBatch {
    pub fn batch_size(&self) -> usize {
        self.x.dim().2
    }
}

/// Turns items and batches into tensors via a loader, with transient-error
/// retry.
pub struct Materializer {
    loader: Arc<dyn SampleLoader>,
    retry: RetryPolicy,
}

impl Materializer {
    pub fn new(loader: Arc<dyn SampleLoader>, retry: RetryPolicy) -> Self {
        Self { loader, retry }
    }

    /// Loads one item and returns its `(signal, labels)` pair of
    /// `(channels, time)` tensors.
    pub fn materialize_item(&self, item: &BatchItem) -> Result<(Array2<f32>, Array2<f32>)> {
        let (samples, labels) = self.loader.load_item_samples(item)?;
        let x = get_channel_data(&samples, &item.selector)?;
        let y = extract_label_window(&labels, item)?;
        Ok((x, y))
    }

    /// Materializes every item of `batch` concurrently within this
    /// process, then stacks the per-item tensors on a new trailing axis.
    /// All items must produce identical per-item shapes.
    pub fn materialize_batch(&self, batch: &Batch) -> Result<MaterializedBatch> {
        if batch.is_empty() {
            return Err(BatchError::invalid("cannot materialize an empty batch"));
        }

        let per_item: Vec<(Array2<f32>, Array2<f32>)> = thread::scope(|scope| {
            let handles: Vec<_> = batch
                .iter()
                .map(|item| scope.spawn(move || self.materialize_item(item)))
                .collect();
            handles
                .into_iter()
                .map(|handle| match handle.join() {
                    Ok(result) => result,
                    Err(panic) => std::panic::resume_unwind(panic),
                })
                .collect::<Result<Vec<_>>>()
        })?;

        let signal_shape = per_item[0].0.dim();
        let label_shape = per_item[0].1.dim();
        for (x, y) in &per_item {
            if x.dim() != signal_shape {
                return Err(BatchError::ShapeMismatch {
                    expected: vec![signal_shape.0, signal_shape.1],
                    actual: vec![x.nrows(), x.ncols()],
                });
            }
            if y.dim() != label_shape {
                return Err(BatchError::ShapeMismatch {
                    expected: vec![label_shape.0, label_shape.1],
                    actual: vec![y.nrows(), y.ncols()],
                });
            }
        }

        let x_views: Vec<ArrayView2<f32>> = per_item.iter().map(|(x, _)| x.view()).collect();
        let y_views: Vec<ArrayView2<f32>> = per_item.iter().map(|(_, y)| y.view()).collect();
        let x = stack(Axis(2), &x_views)
            .map_err(|e| BatchError::invalid(format!("failed to stack signal tensors: {e}")))?;
        let y = stack(Axis(2), &y_views)
            .map_err(|e| BatchError::invalid(format!("failed to stack label tensors: {e}")))?;
        Ok(MaterializedBatch { x, y })
    }

    /// `materialize_batch` wrapped with exponential backoff on transient
    /// errors. `ChannelClosed` aborts the retry immediately.
    pub fn materialize_batch_with_retry(&self, batch: &Batch) -> Result<MaterializedBatch> {
        retry_transient(&self.retry, || self.materialize_batch(batch))
    }
}

/// Slices the item's label window out of a loaded label block.
fn extract_label_window(block: &LabelBlock, item: &BatchItem) -> Result<Array2<f32>> {
    let window = &item.label_window;
    let available = block.data.ncols() as u64;
    if window.start < block.start || window.end() > block.start + available {
        return Err(BatchError::invalid(format!(
            "label window {}..{} of '{}' exceeds the loaded label span {}..{}",
            window.start,
            window.end(),
            item.source.recording,
            block.start,
            block.start + available,
        )));
    }
    let offset = (window.start - block.start) as usize;
    let len = window.len as usize;
    Ok(block.data.slice(s![.., offset..offset + len]).to_owned())
}
