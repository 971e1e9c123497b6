use serde_derive::{Deserialize, Serialize};

use super::index::ENTRY_WIDTH;
use crate::common::{ByteOrder, Error, Result};

pub const DEFAULT_MAX_STORE_BYTES: u64 = 1024;
pub const DEFAULT_MAX_INDEX_BYTES: u64 = 1024;

/// Per-segment limits and the offset a brand new log starts at.
///
/// Zero limits are treated as "unset" and replaced by the defaults.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SegmentConfig {
    pub max_store_bytes: u64,
    pub max_index_bytes: u64,
    pub initial_offset: u64,
}

impl Default for SegmentConfig {
    fn default() -> Self {
        SegmentConfig {
            max_store_bytes: DEFAULT_MAX_STORE_BYTES,
            max_index_bytes: DEFAULT_MAX_INDEX_BYTES,
            initial_offset: 0,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Config {
    pub segment: SegmentConfig,
    pub byte_order: ByteOrder,
}

impl Config {
    pub fn with_segment(segment: SegmentConfig) -> Self {
        Config {
            segment,
            byte_order: ByteOrder::default(),
        }
    }

    /// Fills unset limits with defaults and rejects limits no segment could live with.
    pub fn normalized(mut self) -> Result<Self> {
        if self.segment.max_store_bytes == 0 {
            self.segment.max_store_bytes = DEFAULT_MAX_STORE_BYTES;
        }
        if self.segment.max_index_bytes == 0 {
            self.segment.max_index_bytes = DEFAULT_MAX_INDEX_BYTES;
        }
        if self.segment.max_index_bytes < ENTRY_WIDTH {
            return Err(Error::Config(format!(
                "max_index_bytes must hold at least one {}-byte entry, got {}",
                ENTRY_WIDTH, self.segment.max_index_bytes
            )));
        }
        Ok(self)
    }
}
