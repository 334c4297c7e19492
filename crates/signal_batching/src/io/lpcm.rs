//! LPCM persistence: raw little-endian sample frames plus a JSON sidecar
//! carrying the metadata needed to re-open and byte-range-read the array.
//!
//! Layout of `X.lpcm`: interleaved frames, one frame per time step, one
//! `f32` per channel, starting at `start_offset` bytes. The sidecar
//! `X.lpcm.json` records sample rate, channel names, sample type, and the
//! start offset. Labels use the same container under
//! `X.labels.lpcm`.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use ndarray::Array2;
use serde::{Deserialize, Serialize};

use crate::error::{BatchError, Result};
use crate::item::BatchItem;
use crate::materialize::{LabelBlock, SampleBlock, SampleLoader};

use super::{LocalRangeReader, RangeReader};

/// Element encoding of the raw array.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SampleType {
    #[serde(rename = "f32le")]
    F32Le,
}

impl SampleType {
    pub fn bytes_per_sample(&self) -> u64 {
        match self {
            SampleType::F32Le => 4,
        }
    }
}

/// Sidecar metadata record for one LPCM object.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LpcmMeta {
    pub sample_rate: f64,
    pub channels: Vec<String>,
    pub sample_type: SampleType,
    /// Byte offset of the first frame.
    pub start_offset: u64,
}

impl LpcmMeta {
    pub fn f32le(sample_rate: f64, channels: Vec<String>) -> Self {
        Self {
            sample_rate,
            channels,
            sample_type: SampleType::F32Le,
            start_offset: 0,
        }
    }

    fn frame_bytes(&self) -> u64 {
        self.channels.len() as u64 * self.sample_type.bytes_per_sample()
    }
}

/// Sidecar location for an LPCM object: the object path with `.json`
/// appended.
pub fn sidecar_path(path: &Path) -> PathBuf {
    let mut os = path.as_os_str().to_owned();
    os.push(".json");
    PathBuf::from(os)
}

/// Writes `data` (`(channels, time)`) and its sidecar. Used to persist
/// label signals and to build fixtures.
pub fn write_lpcm(path: &Path, meta: &LpcmMeta, data: &Array2<f32>) -> Result<()> {
    if data.nrows() != meta.channels.len() {
        return Err(BatchError::invalid(format!(
            "array has {} rows but metadata names {} channels",
            data.nrows(),
            meta.channels.len()
        )));
    }

    let mut bytes = Vec::with_capacity(data.len() * 4 + meta.start_offset as usize);
    bytes.resize(meta.start_offset as usize, 0);
    for t in 0..data.ncols() {
        for c in 0..data.nrows() {
            bytes.extend_from_slice(&data[[c, t]].to_le_bytes());
        }
    }
    std::fs::write(path, bytes).map_err(|e| BatchError::from_io(path, e))?;

    let sidecar = sidecar_path(path);
    let json = serde_json::to_vec_pretty(meta)
        .map_err(|e| BatchError::invalid(format!("failed to encode sidecar: {e}")))?;
    std::fs::write(&sidecar, json).map_err(|e| BatchError::from_io(&sidecar, e))
}

/// Windowed reads over one LPCM object via a `RangeReader`.
pub struct LpcmReader {
    path: PathBuf,
    meta: LpcmMeta,
    reader: Arc<dyn RangeReader>,
}

impl std::fmt::Debug for LpcmReader {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LpcmReader")
            .field("path", &self.path)
            .field("meta", &self.meta)
            .finish_non_exhaustive()
    }
}

impl LpcmReader {
    /// Opens the object by reading its sidecar; the raw bytes are only
    /// touched by subsequent `read_window` calls.
    pub fn open(path: impl Into<PathBuf>, reader: Arc<dyn RangeReader>) -> Result<Self> {
        let path = path.into();
        let sidecar = sidecar_path(&path);
        let bytes = std::fs::read(&sidecar).map_err(|e| BatchError::from_io(&sidecar, e))?;
        let meta: LpcmMeta = serde_json::from_slice(&bytes).map_err(|e| {
            BatchError::invalid(format!("malformed sidecar '{}': {e}", sidecar.display()))
        })?;
        Ok(Self { path, meta, reader })
    }

    pub fn meta(&self) -> &LpcmMeta {
        &self.meta
    }

    /// Total frames stored in the object.
    pub fn num_samples(&self) -> Result<u64> {
        let size = self.reader.size(&self.path)?;
        Ok(size.saturating_sub(self.meta.start_offset) / self.meta.frame_bytes())
    }

    /// Reads `len` frames starting at frame `start` into a
    /// `(channels, len)` array.
    pub fn read_window(&self, start: u64, len: u64) -> Result<Array2<f32>> {
        let frame_bytes = self.meta.frame_bytes();
        let offset = self.meta.start_offset + start * frame_bytes;
        let bytes = self.reader.read_range(&self.path, offset, len * frame_bytes)?;

        let num_channels = self.meta.channels.len();
        let values: Vec<f32> = bytes
            .chunks_exact(4)
            .map(|b| f32::from_le_bytes([b[0], b[1], b[2], b[3]]))
            .collect();
        // Frames are time-major on disk; transpose into (channels, time).
        let by_time = Array2::from_shape_vec((len as usize, num_channels), values)
            .map_err(|e| BatchError::invalid(format!("frame decode failed: {e}")))?;
        Ok(by_time.reversed_axes())
    }
}

/// `SampleLoader` resolving items against LPCM signal/label file pairs:
/// the signal at the item's source path, labels beside it under
/// `*.labels.lpcm`.
pub struct LpcmSampleLoader {
    reader: Arc<dyn RangeReader>,
}

impl LpcmSampleLoader {
    pub fn new(reader: Arc<dyn RangeReader>) -> Self {
        Self { reader }
    }

    /// Loader over local files.
    pub fn local() -> Self {
        Self::new(Arc::new(LocalRangeReader))
    }

    fn label_path(signal_path: &Path) -> PathBuf {
        signal_path.with_extension("labels.lpcm")
    }
}

impl SampleLoader for LpcmSampleLoader {
    fn load_item_samples(&self, item: &BatchItem) -> Result<(SampleBlock, LabelBlock)> {
        let signal = LpcmReader::open(&item.source.path, Arc::clone(&self.reader))?;
        if signal.meta().sample_rate != item.sampling.sample_rate {
            return Err(BatchError::invalid(format!(
                "item expects {} Hz but '{}' is recorded at {} Hz",
                item.sampling.sample_rate,
                item.source.path.display(),
                signal.meta().sample_rate
            )));
        }
        let span = &item.sample_span;
        let data = signal.read_window(span.start, span.len)?;
        let samples = SampleBlock {
            channels: signal.meta().channels.clone(),
            data,
            sample_rate: signal.meta().sample_rate,
        };

        let labels_path = Self::label_path(&item.source.path);
        let labels = LpcmReader::open(&labels_path, Arc::clone(&self.reader))?;
        if labels.meta().sample_rate != item.sampling.label_rate {
            return Err(BatchError::invalid(format!(
                "item expects {} Hz labels but '{}' is recorded at {} Hz",
                item.sampling.label_rate,
                labels_path.display(),
                labels.meta().sample_rate
            )));
        }
        let window = &item.label_window;
        let label_data = labels.read_window(window.start, window.len)?;
        let labels = LabelBlock {
            labels: labels.meta().channels.clone(),
            data: label_data,
            label_rate: item.sampling.label_rate,
            start: window.start,
        };
        Ok((samples, labels))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ramp(channels: usize, len: usize) -> Array2<f32> {
        Array2::from_shape_fn((channels, len), |(c, t)| (c * 1000 + t) as f32)
    }

    #[test]
    fn written_windows_read_back_exactly() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("rec.lpcm");
        let meta = LpcmMeta::f32le(256.0, vec!["c3".into(), "c4".into()]);
        let data = ramp(2, 32);
        write_lpcm(&path, &meta, &data).unwrap();

        let reader = LpcmReader::open(&path, Arc::new(LocalRangeReader)).unwrap();
        assert_eq!(reader.meta(), &meta);
        assert_eq!(reader.num_samples().unwrap(), 32);

        let window = reader.read_window(4, 8).unwrap();
        assert_eq!(window.dim(), (2, 8));
        assert_eq!(window[[0, 0]], 4.0);
        assert_eq!(window[[1, 7]], 1011.0);
    }

    #[test]
    fn start_offset_shifts_the_first_frame() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("rec.lpcm");
        let mut meta = LpcmMeta::f32le(256.0, vec!["c0".into()]);
        meta.start_offset = 16;
        write_lpcm(&path, &meta, &ramp(1, 8)).unwrap();

        let reader = LpcmReader::open(&path, Arc::new(LocalRangeReader)).unwrap();
        assert_eq!(reader.num_samples().unwrap(), 8);
        assert_eq!(reader.read_window(0, 1).unwrap()[[0, 0]], 0.0);
    }

    #[test]
    fn window_past_end_is_out_of_range() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("rec.lpcm");
        let meta = LpcmMeta::f32le(256.0, vec!["c0".into()]);
        write_lpcm(&path, &meta, &ramp(1, 8)).unwrap();

        let reader = LpcmReader::open(&path, Arc::new(LocalRangeReader)).unwrap();
        let err = reader.read_window(4, 8).unwrap_err();
        assert!(matches!(err, BatchError::OutOfRange { .. }));
    }

    #[test]
    fn missing_sidecar_is_an_open_error() {
        let err = LpcmReader::open("not-a-path.lpcm", Arc::new(LocalRangeReader)).unwrap_err();
        assert!(matches!(err, BatchError::Open { .. }));
    }
}
