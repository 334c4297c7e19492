use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::error::{BatchError, Result};

/// Where the signal bytes of one item live.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SignalSource {
    /// Logical recording id, stable across storage layouts.
    pub recording: String,
    /// Backend-specific location (file path or URL path).
    pub path: PathBuf,
}

/// Half-open window `[start, start + len)` in signal-sample units.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SampleSpan {
    pub start: u64,
    pub len: u64,
}

impl SampleSpan {
    pub fn end(&self) -> u64 {
        self.start + self.len
    }
}

/// Half-open window `[start, start + len)` in label-sample units.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct LabelWindow {
    pub start: u64,
    pub len: u64,
}

impl LabelWindow {
    pub fn end(&self) -> u64 {
        self.start + self.len
    }
}

/// How sample-rate boundaries that do not fall exactly on label-rate
/// boundaries are resolved.
///
/// `Strict` is the default: any fractional boundary is an error rather than
/// a silent shift.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AlignmentRule {
    Floor,
    Nearest,
    #[default]
    Strict,
}

/// Sampling metadata carried by every item.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SamplingMeta {
    /// Signal samples per second.
    pub sample_rate: f64,
    /// Label samples per second.
    pub label_rate: f64,
    #[serde(default)]
    pub alignment: AlignmentRule,
}

impl SamplingMeta {
    pub fn new(sample_rate: f64, label_rate: f64, alignment: AlignmentRule) -> Self {
        Self {
            sample_rate,
            label_rate,
            alignment,
        }
    }

    /// Signal samples per label sample. The ratio must be a positive
    /// integer; fractional ratios cannot be aligned under any rule.
    pub fn samples_per_label(&self) -> Result<u64> {
        if self.sample_rate <= 0.0 || self.label_rate <= 0.0 {
            return Err(BatchError::invalid(format!(
                "sample rate ({}) and label rate ({}) must be positive",
                self.sample_rate, self.label_rate
            )));
        }
        let ratio = self.sample_rate / self.label_rate;
        if ratio < 1.0 || ratio.fract() != 0.0 {
            return Err(BatchError::invalid(format!(
                "sample rate ({}) must be an integer multiple of label rate ({})",
                self.sample_rate, self.label_rate
            )));
        }
        Ok(ratio as u64)
    }

    /// Converts a signal-sample span into the corresponding label window,
    /// applying the configured alignment rule to both boundaries.
    pub fn label_window_for(&self, span: &SampleSpan) -> Result<LabelWindow> {
        let per_label = self.samples_per_label()?;
        Ok(LabelWindow {
            start: align(span.start, per_label, self.alignment)?,
            len: align(span.len, per_label, self.alignment)?,
        })
    }
}

fn align(samples: u64, per_label: u64, rule: AlignmentRule) -> Result<u64> {
    let remainder = samples % per_label;
    if remainder == 0 {
        return Ok(samples / per_label);
    }
    match rule {
        AlignmentRule::Floor => Ok(samples / per_label),
        AlignmentRule::Nearest => Ok(samples / per_label + u64::from(remainder * 2 >= per_label)),
        AlignmentRule::Strict => Err(BatchError::invalid(format!(
            "sample boundary {samples} is not aligned to the label rate \
             ({per_label} samples per label); set an explicit rounding mode"
        ))),
    }
}

/// Selects which signal channels an item materializes, and how.
///
/// The selector is embedded in the item and round-trips through serde as a
/// tagged variant, so custom selections survive crossing process
/// boundaries.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ChannelSelector {
    /// Select the named channels, in the given order. A missing channel is
    /// an error.
    Named { channels: Vec<String> },
    /// Select the contiguous index range `[start, end)`.
    Index { start: usize, end: usize },
    /// Like `Named`, but channels absent from the recording are filled
    /// with zeros instead of failing. Keeps channel layouts uniform across
    /// heterogeneous recordings.
    ZeroFill { channels: Vec<String> },
}

impl ChannelSelector {
    pub fn named<I, S>(channels: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        ChannelSelector::Named {
            channels: channels.into_iter().map(Into::into).collect(),
        }
    }

    /// Number of output channels this selector produces.
    pub fn output_channels(&self) -> usize {
        match self {
            ChannelSelector::Named { channels } | ChannelSelector::ZeroFill { channels } => {
                channels.len()
            }
            ChannelSelector::Index { start, end } => end.saturating_sub(*start),
        }
    }
}

/// Specification for one sample of a batch: the logical coordinates needed
/// to fetch and slice a numeric window. Cheap to derive, expensive to
/// materialize.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BatchItem {
    pub source: SignalSource,
    pub sample_span: SampleSpan,
    pub label_window: LabelWindow,
    pub selector: ChannelSelector,
    pub sampling: SamplingMeta,
}

/// An ordered sequence of items of fixed length. A batch has no identity
/// beyond its position in the iteration.
pub type Batch = Vec<BatchItem>;
