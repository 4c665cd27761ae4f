//! Configuration structures for Strata memory components.

use crate::error::{Result, StrataError};
use crate::page::{DEFAULT_BLOCK_SIZE, DEFAULT_PAGE_SIZE, PAGE_HEADER_SIZE};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Page arena configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ArenaConfig {
    /// Size in bytes of a default page, header included.
    pub page_size: usize,
}

impl Default for ArenaConfig {
    fn default() -> Self {
        Self {
            page_size: DEFAULT_PAGE_SIZE,
        }
    }
}

impl ArenaConfig {
    /// Returns the usable bytes of an empty default page.
    pub fn page_limit(&self) -> usize {
        self.page_size.saturating_sub(PAGE_HEADER_SIZE)
    }

    pub fn validate(&self) -> Result<()> {
        if self.page_size <= PAGE_HEADER_SIZE {
            return Err(StrataError::InvalidArgument(format!(
                "page_size {} must exceed the {} byte page header",
                self.page_size, PAGE_HEADER_SIZE
            )));
        }
        Ok(())
    }
}

/// Row store configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RowStoreConfig {
    /// Size in bytes of every block, header included.
    pub block_size: usize,
}

impl Default for RowStoreConfig {
    fn default() -> Self {
        Self {
            block_size: DEFAULT_BLOCK_SIZE,
        }
    }
}

impl RowStoreConfig {
    /// Returns the payload capacity of an empty block.
    pub fn block_capacity(&self) -> usize {
        self.block_size.saturating_sub(PAGE_HEADER_SIZE)
    }

    pub fn validate(&self) -> Result<()> {
        if self.block_size <= PAGE_HEADER_SIZE {
            return Err(StrataError::InvalidArgument(format!(
                "block_size {} must exceed the {} byte block header",
                self.block_size, PAGE_HEADER_SIZE
            )));
        }
        Ok(())
    }
}

/// Pacing for bulk page release.
///
/// After every `batch_pages` pages handed back to the allocator the releasing
/// thread sleeps for `sleep_interval`. Release stops once the reserved total
/// drops to `keep_bytes`; zero keeps nothing.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReleaseThrottle {
    /// Pages freed between pauses (0 = never pause).
    pub batch_pages: usize,
    /// Pause length.
    pub sleep_interval: Duration,
    /// Reserved bytes to retain (0 = release everything).
    pub keep_bytes: usize,
}

impl Default for ReleaseThrottle {
    fn default() -> Self {
        Self {
            batch_pages: 64,
            sleep_interval: Duration::from_micros(100),
            keep_bytes: 0,
        }
    }
}

impl ReleaseThrottle {
    /// Releases everything without pausing.
    pub fn unthrottled() -> Self {
        Self {
            batch_pages: 0,
            sleep_interval: Duration::ZERO,
            keep_bytes: 0,
        }
    }

    /// Returns a copy retaining `keep_bytes`.
    pub fn keep(mut self, keep_bytes: usize) -> Self {
        self.keep_bytes = keep_bytes;
        self
    }

    /// Returns true if release pauses at all.
    pub fn is_paced(&self) -> bool {
        self.batch_pages > 0
    }
}
