//! # Request Statistics
//!
//! Latency/throughput samples kept per software context in four buckets
//! (read/write × background/foreground). A hardware queue reports the sum of
//! its contexts' buckets.

use core::fmt;

/// Number of statistic buckets per context
pub const NR_STAT_BUCKETS: usize = 4;

/// Statistic bucket
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(usize)]
pub enum StatBucket {
    /// Background reads
    Read    = 0,
    /// Background writes
    Write   = 1,
    /// Foreground reads
    FgRead  = 2,
    /// Foreground writes
    FgWrite = 3,
}

impl StatBucket {
    /// All buckets in report order
    pub const ALL: [StatBucket; NR_STAT_BUCKETS] = [
        StatBucket::Read,
        StatBucket::Write,
        StatBucket::FgRead,
        StatBucket::FgWrite,
    ];

    /// Line prefix used by the `stats` attribute
    pub const fn label(&self) -> &'static str {
        match self {
            StatBucket::Read => "read :",
            StatBucket::Write => "write:",
            StatBucket::FgRead => "fg-read:",
            StatBucket::FgWrite => "fg-write:",
        }
    }

    /// Index into a bucket array
    pub const fn index(&self) -> usize {
        *self as usize
    }
}

/// Sample summary for one bucket
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RqStat {
    nr_samples: u64,
    sum: u64,
    min: u64,
    max: u64,
}

impl Default for RqStat {
    fn default() -> Self {
        Self::new()
    }
}

impl RqStat {
    /// Empty bucket
    pub const fn new() -> Self {
        Self {
            nr_samples: 0,
            sum: 0,
            min: u64::MAX,
            max: 0,
        }
    }

    /// Drop all samples
    pub fn reset(&mut self) {
        *self = Self::new();
    }

    /// Record one sample
    pub fn add(&mut self, value: u64) {
        self.nr_samples += 1;
        self.sum = self.sum.saturating_add(value);
        self.min = self.min.min(value);
        self.max = self.max.max(value);
    }

    /// Fold another bucket into this one
    pub fn merge(&mut self, other: &RqStat) {
        if other.nr_samples == 0 {
            return;
        }
        self.nr_samples += other.nr_samples;
        self.sum = self.sum.saturating_add(other.sum);
        self.min = self.min.min(other.min);
        self.max = self.max.max(other.max);
    }

    /// Number of samples
    pub const fn samples(&self) -> u64 {
        self.nr_samples
    }

    /// Sample-weighted mean, 0 when empty
    pub fn mean(&self) -> u64 {
        if self.nr_samples == 0 {
            0
        } else {
            self.sum / self.nr_samples
        }
    }

    /// Smallest sample, 0 when empty
    pub fn min(&self) -> u64 {
        if self.nr_samples == 0 {
            0
        } else {
            self.min
        }
    }

    /// Largest sample
    pub const fn max(&self) -> u64 {
        self.max
    }
}

impl fmt::Display for RqStat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "samples={}, mean={}, min={}, max={}",
            self.samples(),
            self.mean(),
            self.min(),
            self.max()
        )
    }
}

#[cfg(test)]
mod tests {
    use alloc::format;

    use super::*;

    #[test]
    fn test_empty_bucket() {
        let stat = RqStat::new();
        assert_eq!(format!("{}", stat), "samples=0, mean=0, min=0, max=0");
    }

    #[test]
    fn test_add_and_merge() {
        let mut a = RqStat::new();
        a.add(10);
        a.add(30);
        let mut b = RqStat::new();
        b.add(5);
        a.merge(&b);
        a.merge(&RqStat::new());
        assert_eq!(a.samples(), 3);
        assert_eq!(a.mean(), 15);
        assert_eq!(a.min(), 5);
        assert_eq!(a.max(), 30);
        a.reset();
        assert_eq!(a, RqStat::new());
    }

    #[test]
    fn test_labels() {
        assert_eq!(StatBucket::Read.label(), "read :");
        assert_eq!(StatBucket::FgWrite.index(), 3);
    }
}
