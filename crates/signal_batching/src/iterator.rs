//! The batch-specification iterator contract and its default
//! implementations.
//!
//! An iterator is a value carrying everything needed to produce a
//! deterministic, restartable, potentially infinite sequence of batch
//! items. `next_item` is a pure function of the iteration state: it must
//! be side-effect-free, fast, and independent of wall-clock or process
//! identity. The expensive work happens later, in the materializer.

use std::path::PathBuf;

use rand::distr::weighted::WeightedIndex;
use rand::distr::Distribution;
use rand::Rng;

use crate::error::{BatchError, Result};
use crate::item::{Batch, BatchItem, ChannelSelector, SampleSpan, SamplingMeta, SignalSource};
use crate::state::IterationState;

/// Lazy sequence of batch specifications.
///
/// `next_item` returns the item produced at `state` together with the
/// state that produces the following item, or `None` once the sequence is
/// exhausted. Implementations must not mutate shared state; callers clone
/// the state at every boundary.
pub trait BatchIterator: Send + Sync {
    /// Items per batch.
    fn batch_size(&self) -> usize;

    fn next_item(&self, state: &IterationState) -> Result<Option<(BatchItem, IterationState)>>;

    /// The `batch_size`-fold composition of `next_item`. Ends without a
    /// partial batch when the item sequence runs out mid-batch.
    /// Implementations may override this for efficiency.
    fn next_batch(&self, state: &IterationState) -> Result<Option<(Batch, IterationState)>> {
        let mut batch = Vec::with_capacity(self.batch_size());
        let mut state = *state;
        for _ in 0..self.batch_size() {
            match self.next_item(&state)? {
                Some((item, next)) => {
                    batch.push(item);
                    state = next;
                }
                None => return Ok(None),
            }
        }
        Ok(Some((batch, state)))
    }
}

/// One recording eligible for random window placement.
#[derive(Debug, Clone, PartialEq)]
pub struct RecordingInfo {
    pub id: String,
    pub path: PathBuf,
    pub num_samples: u64,
}

/// The default random iterator: draws a recording by weight, then places
/// a fixed-length window uniformly inside it, aligned to label-sample
/// boundaries so every span converts exactly under any alignment rule.
pub struct RandomBatches {
    recordings: Vec<RecordingInfo>,
    dist: WeightedIndex<f64>,
    selector: ChannelSelector,
    sampling: SamplingMeta,
    batch_size: usize,
    window_samples: u64,
    samples_per_label: u64,
}

impl RandomBatches {
    pub fn new(
        recordings: Vec<RecordingInfo>,
        weights: Vec<f64>,
        selector: ChannelSelector,
        sampling: SamplingMeta,
        batch_size: usize,
        window_samples: u64,
    ) -> Result<Self> {
        if recordings.is_empty() {
            return Err(BatchError::invalid("no recordings to sample from"));
        }
        if weights.len() != recordings.len() {
            return Err(BatchError::invalid(format!(
                "{} weights for {} recordings",
                weights.len(),
                recordings.len()
            )));
        }
        if weights.iter().any(|w| !w.is_finite() || *w < 0.0) {
            return Err(BatchError::invalid(
                "all recording weights must be finite and non-negative",
            ));
        }
        if batch_size == 0 {
            return Err(BatchError::invalid("batch_size must be > 0"));
        }
        if window_samples == 0 {
            return Err(BatchError::invalid("window_samples must be > 0"));
        }

        let samples_per_label = sampling.samples_per_label()?;
        if window_samples % samples_per_label != 0 {
            return Err(BatchError::invalid(format!(
                "window of {window_samples} samples does not divide into whole label samples \
                 ({samples_per_label} signal samples per label)"
            )));
        }
        for recording in &recordings {
            if recording.num_samples < window_samples {
                return Err(BatchError::invalid(format!(
                    "recording '{}' has {} samples, shorter than the {window_samples}-sample window",
                    recording.id, recording.num_samples
                )));
            }
        }

        let dist = WeightedIndex::new(&weights)
            .map_err(|e| BatchError::invalid(format!("invalid recording weights: {e}")))?;

        Ok(Self {
            recordings,
            dist,
            selector,
            sampling,
            batch_size,
            window_samples,
            samples_per_label,
        })
    }
}

impl BatchIterator for RandomBatches {
    fn batch_size(&self) -> usize {
        self.batch_size
    }

    fn next_item(&self, state: &IterationState) -> Result<Option<(BatchItem, IterationState)>> {
        let mut rng = state.rng();
        let recording = &self.recordings[self.dist.sample(&mut rng)];

        let max_start_label = (recording.num_samples - self.window_samples) / self.samples_per_label;
        let start = rng.random_range(0..=max_start_label) * self.samples_per_label;
        let sample_span = SampleSpan {
            start,
            len: self.window_samples,
        };
        let label_window = self.sampling.label_window_for(&sample_span)?;

        let item = BatchItem {
            source: SignalSource {
                recording: recording.id.clone(),
                path: recording.path.clone(),
            },
            sample_span,
            label_window,
            selector: self.selector.clone(),
            sampling: self.sampling.clone(),
        };
        Ok(Some((item, state.advanced())))
    }
}

/// Caps an inner iterator at a fixed number of batches; the finite
/// sequence then terminates cleanly with the service's terminal sentinel.
///
/// The cap is counted in items via the state's step, so the inner
/// iterator must advance the step by exactly one per item (as
/// `RandomBatches` does).
pub struct FiniteBatches<I> {
    inner: I,
    max_batches: u64,
}

impl<I: BatchIterator> FiniteBatches<I> {
    pub fn new(inner: I, max_batches: u64) -> Self {
        Self { inner, max_batches }
    }
}

impl<I: BatchIterator> BatchIterator for FiniteBatches<I> {
    fn batch_size(&self) -> usize {
        self.inner.batch_size()
    }

    fn next_item(&self, state: &IterationState) -> Result<Option<(BatchItem, IterationState)>> {
        let item_limit = self.max_batches * self.inner.batch_size() as u64;
        if state.step() >= item_limit {
            return Ok(None);
        }
        self.inner.next_item(state)
    }
}
