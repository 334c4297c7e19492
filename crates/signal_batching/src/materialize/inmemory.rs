//! In-memory storage backend: recordings held as dense arrays.
//!
//! The natural backend for unit tests and for corpora small enough to
//! preload; windows are sliced straight out of the resident arrays with
//! the same span discipline the file backends use.

use std::collections::HashMap;

use ndarray::{s, Array2};

use crate::error::{BatchError, Result};
use crate::item::BatchItem;

use super::{LabelBlock, SampleBlock, SampleLoader};

/// Fully resident signal and label data for one recording.
#[derive(Debug, Clone)]
pub struct RecordingBuffers {
    pub channels: Vec<String>,
    /// `(channels, total_samples)`.
    pub samples: Array2<f32>,
    pub labels: Vec<String>,
    /// `(label_channels, total_labels)`.
    pub label_data: Array2<f32>,
    pub sample_rate: f64,
    pub label_rate: f64,
}

/// `SampleLoader` over a set of preloaded recordings, keyed by recording
/// id.
#[derive(Debug, Clone, Default)]
pub struct InMemoryRecordings {
    recordings: HashMap<String, RecordingBuffers>,
}

impl InMemoryRecordings {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_recording(mut self, id: impl Into<String>, buffers: RecordingBuffers) -> Self {
        self.recordings.insert(id.into(), buffers);
        self
    }

    pub fn len(&self) -> usize {
        self.recordings.len()
    }

    pub fn is_empty(&self) -> bool {
        self.recordings.is_empty()
    }
}

impl SampleLoader for InMemoryRecordings {
    fn load_item_samples(&self, item: &BatchItem) -> Result<(SampleBlock, LabelBlock)> {
        let recording = self.recordings.get(&item.source.recording).ok_or_else(|| {
            BatchError::Open {
                path: item.source.recording.clone(),
                reason: "recording not loaded".into(),
            }
        })?;

        let span = &item.sample_span;
        let total_samples = recording.samples.ncols() as u64;
        if span.end() > total_samples {
            return Err(BatchError::OutOfRange {
                path: item.source.recording.clone(),
                offset: span.start,
                count: span.len,
                size: total_samples,
            });
        }

        let window = &item.label_window;
        let total_labels = recording.label_data.ncols() as u64;
        if window.end() > total_labels {
            return Err(BatchError::OutOfRange {
                path: item.source.recording.clone(),
                offset: window.start,
                count: window.len,
                size: total_labels,
            });
        }

        let samples = SampleBlock {
            channels: recording.channels.clone(),
            data: recording
                .samples
                .slice(s![.., span.start as usize..span.end() as usize])
                .to_owned(),
            sample_rate: recording.sample_rate,
        };
        let labels = LabelBlock {
            labels: recording.labels.clone(),
            data: recording
                .label_data
                .slice(s![.., window.start as usize..window.end() as usize])
                .to_owned(),
            label_rate: recording.label_rate,
            start: window.start,
        };
        Ok((samples, labels))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::materialize::testing::test_item;

    fn loader() -> InMemoryRecordings {
        InMemoryRecordings::new().with_recording(
            "rec",
            RecordingBuffers {
                channels: vec!["c0".into()],
                samples: Array2::from_shape_fn((1, 64), |(_, t)| t as f32),
                labels: vec!["l0".into()],
                label_data: Array2::from_shape_fn((1, 8), |(_, t)| t as f32),
                sample_rate: 8.0,
                label_rate: 1.0,
            },
        )
    }

    #[test]
    fn slices_the_requested_windows() {
        let (samples, labels) = loader().load_item_samples(&test_item("rec", 8, 16)).unwrap();
        assert_eq!(samples.data.dim(), (1, 16));
        assert_eq!(samples.data[[0, 0]], 8.0);
        assert_eq!(labels.data.dim(), (1, 2));
        assert_eq!(labels.start, 1);
    }

    #[test]
    fn unknown_recording_is_an_open_error() {
        let err = loader()
            .load_item_samples(&test_item("ghost", 0, 8))
            .unwrap_err();
        assert!(matches!(err, BatchError::Open { .. }));
    }

    #[test]
    fn span_past_recording_end_is_out_of_range() {
        let err = loader()
            .load_item_samples(&test_item("rec", 56, 16))
            .unwrap_err();
        assert!(matches!(err, BatchError::OutOfRange { .. }));
    }
}
