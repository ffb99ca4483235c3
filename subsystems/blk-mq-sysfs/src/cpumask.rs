//! CPU affinity mask.

use core::fmt;

/// Maximum CPUs a mask can hold
pub const NR_CPUS: u32 = 256;

const WORDS: usize = (NR_CPUS / 64) as usize;

/// Fixed-size CPU bitmap
#[derive(Clone, Copy, Default, PartialEq, Eq)]
pub struct CpuMask {
    bits: [u64; WORDS],
}

impl CpuMask {
    /// Empty mask
    pub const fn new() -> Self {
        Self { bits: [0; WORDS] }
    }

    /// Mask with CPUs `0..n` set
    pub fn first(n: u32) -> Self {
        let mut mask = Self::new();
        for cpu in 0..n.min(NR_CPUS) {
            mask.set(cpu);
        }
        mask
    }

    /// Mask from a list of CPUs
    pub fn from_cpus(cpus: &[u32]) -> Self {
        let mut mask = Self::new();
        for &cpu in cpus {
            mask.set(cpu);
        }
        mask
    }

    /// Set a CPU
    pub fn set(&mut self, cpu: u32) {
        if cpu < NR_CPUS {
            self.bits[(cpu / 64) as usize] |= 1u64 << (cpu % 64);
        }
    }

    /// Clear a CPU
    pub fn clear(&mut self, cpu: u32) {
        if cpu < NR_CPUS {
            self.bits[(cpu / 64) as usize] &= !(1u64 << (cpu % 64));
        }
    }

    /// Clear every CPU
    pub fn zero(&mut self) {
        self.bits = [0; WORDS];
    }

    /// Whether a CPU is set
    pub fn test(&self, cpu: u32) -> bool {
        cpu < NR_CPUS && self.bits[(cpu / 64) as usize] & (1u64 << (cpu % 64)) != 0
    }

    /// Number of CPUs set
    pub fn weight(&self) -> u32 {
        self.bits.iter().map(|w| w.count_ones()).sum()
    }

    /// No CPU set
    pub fn is_empty(&self) -> bool {
        self.bits.iter().all(|&w| w == 0)
    }

    /// Set CPUs in ascending order
    pub fn iter(&self) -> CpuMaskIter<'_> {
        CpuMaskIter { mask: self, next: 0 }
    }
}

impl fmt::Debug for CpuMask {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_list().entries(self.iter()).finish()
    }
}

/// Ascending iterator over a [`CpuMask`]
#[derive(Debug)]
pub struct CpuMaskIter<'a> {
    mask: &'a CpuMask,
    next: u32,
}

impl Iterator for CpuMaskIter<'_> {
    type Item = u32;

    fn next(&mut self) -> Option<u32> {
        while self.next < NR_CPUS {
            let word = self.mask.bits[(self.next / 64) as usize] >> (self.next % 64);
            if word == 0 {
                self.next = (self.next / 64 + 1) * 64;
                continue;
            }
            let cpu = self.next + word.trailing_zeros();
            self.next = cpu + 1;
            return Some(cpu);
        }
        None
    }
}
