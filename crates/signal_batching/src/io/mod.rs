//! Storage access: ranged reads with typed errors, and the LPCM on-disk
//! signal/label format.

mod lpcm;

pub use lpcm::{
    sidecar_path, write_lpcm, LpcmMeta, LpcmReader, LpcmSampleLoader, SampleType,
};

use std::fs::File;
use std::io::{Read, Seek, SeekFrom};
use std::path::Path;

use crate::error::{BatchError, Result};

/// Ranged access to stored objects.
///
/// Backends must return a typed `OutOfRange` when the requested range
/// exceeds the object size, so callers can distinguish a bad span from a
/// flaky read.
pub trait RangeReader: Send + Sync {
    /// Object size in bytes.
    fn size(&self, path: &Path) -> Result<u64>;

    /// Reads exactly `count` bytes starting at `offset`.
    fn read_range(&self, path: &Path, offset: u64, count: u64) -> Result<Vec<u8>>;
}

/// `RangeReader` over the local filesystem.
#[derive(Debug, Clone, Copy, Default)]
pub struct LocalRangeReader;

impl RangeReader for LocalRangeReader {
    fn size(&self, path: &Path) -> Result<u64> {
        std::fs::metadata(path)
            .map(|m| m.len())
            .map_err(|e| BatchError::from_io(path, e))
    }

    fn read_range(&self, path: &Path, offset: u64, count: u64) -> Result<Vec<u8>> {
        let size = self.size(path)?;
        if offset.checked_add(count).map_or(true, |end| end > size) {
            return Err(BatchError::OutOfRange {
                path: path.display().to_string(),
                offset,
                count,
                size,
            });
        }

        let mut file = File::open(path).map_err(|e| BatchError::from_io(path, e))?;
        file.seek(SeekFrom::Start(offset))
            .map_err(|e| BatchError::from_io(path, e))?;
        let mut buf = vec![0u8; count as usize];
        file.read_exact(&mut buf)
            .map_err(|e| BatchError::from_io(path, e))?;
        Ok(buf)
    }
}
