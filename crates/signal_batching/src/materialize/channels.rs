//! Channel selection: the polymorphic step between raw recorded channels
//! and the signal tensor an item asks for.

use ndarray::{s, Array2};

use crate::error::{BatchError, Result};
use crate::item::ChannelSelector;

use super::SampleBlock;

/// Applies the item's channel selector to a loaded sample block, returning
/// the `(channels, time)` signal tensor.
///
/// - `Named` projects the listed channels in order; a missing name fails
///   with `InvalidArgument`.
/// - `Index` takes the contiguous range `[start, end)`.
/// - `ZeroFill` behaves like `Named` but fills rows for absent channels
///   with zeros, so recordings with different montages still stack.
pub fn get_channel_data(block: &SampleBlock, selector: &ChannelSelector) -> Result<Array2<f32>> {
    match selector {
        ChannelSelector::Named { channels } => {
            let mut out = Array2::zeros((channels.len(), block.data.ncols()));
            for (row, name) in channels.iter().enumerate() {
                let idx = channel_index(block, name).ok_or_else(|| {
                    BatchError::invalid(format!(
                        "channel '{name}' not present in recording (have {:?})",
                        block.channels
                    ))
                })?;
                out.row_mut(row).assign(&block.data.row(idx));
            }
            Ok(out)
        }
        ChannelSelector::Index { start, end } => {
            if start >= end {
                return Err(BatchError::invalid(format!(
                    "empty channel index range {start}..{end}"
                )));
            }
            if *end > block.channels.len() {
                return Err(BatchError::invalid(format!(
                    "channel index range {start}..{end} exceeds {} recorded channels",
                    block.channels.len()
                )));
            }
            Ok(block.data.slice(s![*start..*end, ..]).to_owned())
        }
        ChannelSelector::ZeroFill { channels } => {
            let mut out = Array2::zeros((channels.len(), block.data.ncols()));
            for (row, name) in channels.iter().enumerate() {
                if let Some(idx) = channel_index(block, name) {
                    out.row_mut(row).assign(&block.data.row(idx));
                }
            }
            Ok(out)
        }
    }
}

fn channel_index(block: &SampleBlock, name: &str) -> Option<usize> {
    block.channels.iter().position(|c| c == name)
}
