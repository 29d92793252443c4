//! Configuration types for Crimson
//!
//! Libraries take these values explicitly; only the binaries read config
//! files and merge them with command line arguments.

use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};

/// Root configuration
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct Config {
    /// Store configuration
    #[serde(default)]
    pub store: StoreConfig,
    /// Write client configuration
    #[serde(default)]
    pub write_client: WriteClientConfig,
}

/// Store configuration
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct StoreConfig {
    /// Number of per-core shards, fixed at process start
    #[serde(default = "default_core_count")]
    pub core_count: usize,
    /// Bytes per page; must be a power of two
    #[serde(default = "default_page_size")]
    pub page_size: u64,
    /// Consecutive pages assigned to one core before moving to the next;
    /// must be a power of two
    #[serde(default = "default_pages_per_stride")]
    pub pages_per_stride: u64,
    /// Cap on object name length in bytes
    #[serde(default = "default_max_name_len")]
    pub max_object_name_len: usize,
    /// Cap on attribute key length in bytes
    #[serde(default = "default_max_name_len")]
    pub max_attr_name_len: usize,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            core_count: default_core_count(),
            page_size: default_page_size(),
            pages_per_stride: default_pages_per_stride(),
            max_object_name_len: default_max_name_len(),
            max_attr_name_len: default_max_name_len(),
        }
    }
}

impl StoreConfig {
    /// Validate the configuration
    pub fn validate(&self) -> Result<()> {
        if self.core_count == 0 {
            return Err(Error::invalid_argument("core_count must be at least 1"));
        }
        if !self.page_size.is_power_of_two() {
            return Err(Error::invalid_argument(format!(
                "page_size {} is not a power of two",
                self.page_size
            )));
        }
        if !self.pages_per_stride.is_power_of_two() {
            return Err(Error::invalid_argument(format!(
                "pages_per_stride {} is not a power of two",
                self.pages_per_stride
            )));
        }
        if self.max_object_name_len == 0 || self.max_object_name_len > crate::types::MAX_NAME_LEN {
            return Err(Error::invalid_argument(format!(
                "max_object_name_len must be within 1..={}",
                crate::types::MAX_NAME_LEN
            )));
        }
        if self.max_attr_name_len == 0 || self.max_attr_name_len > crate::types::MAX_NAME_LEN {
            return Err(Error::invalid_argument(format!(
                "max_attr_name_len must be within 1..={}",
                crate::types::MAX_NAME_LEN
            )));
        }
        Ok(())
    }

    /// Bytes covered by one stride of pages on one core
    #[must_use]
    pub fn stride_bytes(&self) -> u64 {
        self.page_size * self.pages_per_stride
    }
}

/// Write client configuration
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct WriteClientConfig {
    /// Maximum unapplied requests in flight
    #[serde(default = "default_max_in_flight")]
    pub max_in_flight: usize,
    /// Block alignment for client block reads
    #[serde(default = "default_block_size")]
    pub block_size: usize,
}

impl Default for WriteClientConfig {
    fn default() -> Self {
        Self {
            max_in_flight: default_max_in_flight(),
            block_size: default_block_size(),
        }
    }
}

impl WriteClientConfig {
    /// Validate the configuration
    pub fn validate(&self) -> Result<()> {
        if self.max_in_flight == 0 {
            return Err(Error::invalid_argument("max_in_flight must be at least 1"));
        }
        if self.block_size == 0 {
            return Err(Error::invalid_argument("block_size must be at least 1"));
        }
        Ok(())
    }
}

fn default_core_count() -> usize {
    std::thread::available_parallelism()
        .map(std::num::NonZeroUsize::get)
        .unwrap_or(1)
}

fn default_page_size() -> u64 {
    65536
}

fn default_pages_per_stride() -> u64 {
    16
}

fn default_max_name_len() -> usize {
    1024
}

fn default_max_in_flight() -> usize {
    32
}

fn default_block_size() -> usize {
    4096
}
