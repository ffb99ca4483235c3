//! # Configuration
//!
//! Export-tree settings and the shape of a device queue.

use crate::error::{SysfsError, SysfsResult};

/// Default bound for a single attribute read
pub const DEFAULT_PAGE_SIZE: usize = 4096;

/// Smallest page size accepted by [`MqSysfsConfig::validate`]
pub const MIN_PAGE_SIZE: usize = 64;

/// Group name of the root node under the device
pub const DEFAULT_GROUP_NAME: &str = "mq";

/// Upper bound on CPUs a queue can describe
pub const MAX_CPUS: u32 = crate::cpumask::NR_CPUS;

// =============================================================================
// EXPORT TREE CONFIG
// =============================================================================

/// Export tree configuration
#[derive(Debug, Clone)]
pub struct MqSysfsConfig {
    /// Bound on the bytes produced by one read
    pub page_size: usize,
    /// Name of the root node under the device
    pub group_name: &'static str,
}

impl Default for MqSysfsConfig {
    fn default() -> Self {
        Self {
            page_size: DEFAULT_PAGE_SIZE,
            group_name: DEFAULT_GROUP_NAME,
        }
    }
}

impl MqSysfsConfig {
    /// Set the read bound
    pub fn with_page_size(mut self, page_size: usize) -> Self {
        self.page_size = page_size;
        self
    }

    /// Set the root group name
    pub fn with_group_name(mut self, name: &'static str) -> Self {
        self.group_name = name;
        self
    }

    /// Check the configuration
    pub fn validate(&self) -> SysfsResult<()> {
        if self.page_size < MIN_PAGE_SIZE {
            return Err(SysfsError::InvalidConfig("page size below minimum"));
        }
        if self.group_name.is_empty() || self.group_name.contains('/') {
            return Err(SysfsError::InvalidConfig("bad group name"));
        }
        Ok(())
    }
}

// =============================================================================
// QUEUE CONFIG
// =============================================================================

/// Shape of a device queue
#[derive(Debug, Clone)]
pub struct QueueConfig {
    /// Number of hardware dispatch queues
    pub nr_hw_queues: u32,
    /// Number of possible CPUs (one software context each)
    pub nr_cpus: u32,
    /// Tags per hardware queue
    pub queue_depth: u32,
    /// Tags reserved out of `queue_depth`
    pub reserved_tags: u32,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            nr_hw_queues: 1,
            nr_cpus: 1,
            queue_depth: 64,
            reserved_tags: 0,
        }
    }
}

impl QueueConfig {
    /// Create a config with the given topology
    pub fn new(nr_hw_queues: u32, nr_cpus: u32) -> Self {
        Self {
            nr_hw_queues,
            nr_cpus,
            ..Self::default()
        }
    }

    /// Set the tag depth
    pub fn with_tags(mut self, queue_depth: u32, reserved_tags: u32) -> Self {
        self.queue_depth = queue_depth;
        self.reserved_tags = reserved_tags;
        self
    }

    /// Check the configuration
    pub fn validate(&self) -> SysfsResult<()> {
        if self.nr_hw_queues == 0 {
            return Err(SysfsError::InvalidConfig("no hardware queues"));
        }
        if self.nr_cpus == 0 || self.nr_cpus > MAX_CPUS {
            return Err(SysfsError::InvalidConfig("cpu count out of range"));
        }
        if self.reserved_tags > self.queue_depth {
            return Err(SysfsError::InvalidConfig("reserved tags exceed depth"));
        }
        Ok(())
    }
}
