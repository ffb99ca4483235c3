//! # Tag Pool Summary
//!
//! The tag allocator belongs to the dispatch path. The `tags` attribute only
//! asks it for a text summary through [`TagPool`].

use core::sync::atomic::{AtomicU32, Ordering};

use crate::page::{Page, Shown};

/// Source of the `tags` attribute text
pub trait TagPool: Send + Sync {
    /// Write a summary of the pool into `page`
    fn show(&self, page: &mut Page) -> Shown;
}

/// Simple counting tag pool
#[derive(Debug)]
pub struct TagSet {
    nr_tags: u32,
    nr_reserved_tags: u32,
    bits_per_word: u32,
    free: AtomicU32,
    reserved_free: AtomicU32,
    active_queues: AtomicU32,
}

impl TagSet {
    /// Create a pool of `nr_tags` tags, `reserved` of which are reserved
    pub fn new(nr_tags: u32, reserved: u32) -> Self {
        let reserved = reserved.min(nr_tags);
        Self {
            nr_tags,
            nr_reserved_tags: reserved,
            bits_per_word: bits_per_word(nr_tags),
            free: AtomicU32::new(nr_tags - reserved),
            reserved_free: AtomicU32::new(reserved),
            active_queues: AtomicU32::new(0),
        }
    }

    /// Take a tag, `false` when the pool is exhausted
    pub fn get(&self, reserved: bool) -> bool {
        let pool = if reserved { &self.reserved_free } else { &self.free };
        pool.fetch_update(Ordering::AcqRel, Ordering::Acquire, |n| n.checked_sub(1))
            .is_ok()
    }

    /// Return a tag
    pub fn put(&self, reserved: bool) {
        let (pool, cap) = if reserved {
            (&self.reserved_free, self.nr_reserved_tags)
        } else {
            (&self.free, self.nr_tags - self.nr_reserved_tags)
        };
        let _ = pool.fetch_update(Ordering::AcqRel, Ordering::Acquire, |n| {
            (n < cap).then_some(n + 1)
        });
    }

    /// Mark a queue as sharing this pool
    pub fn queue_active(&self) {
        self.active_queues.fetch_add(1, Ordering::Relaxed);
    }

    /// Unmark a queue as sharing this pool
    pub fn queue_idle(&self) {
        let _ = self
            .active_queues
            .fetch_update(Ordering::Relaxed, Ordering::Relaxed, |n| n.checked_sub(1));
    }
}

impl TagPool for TagSet {
    fn show(&self, page: &mut Page) -> Shown {
        page.emit(format_args!(
            "nr_tags={}, reserved_tags={}, bits_per_word={}\n\
             nr_free={}, nr_reserved={}\n\
             active_queues={}\n",
            self.nr_tags,
            self.nr_reserved_tags,
            self.bits_per_word,
            self.free.load(Ordering::Relaxed),
            self.reserved_free.load(Ordering::Relaxed),
            self.active_queues.load(Ordering::Relaxed),
        ))
    }
}

/// Bitmap word width chosen so small pools spread across several words
fn bits_per_word(depth: u32) -> u32 {
    let mut shift = 6;
    if depth >= 4 {
        while (4u32 << shift) > depth {
            shift -= 1;
        }
    }
    1 << shift
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_summary() {
        let tags = TagSet::new(64, 2);
        assert!(tags.get(false));
        tags.queue_active();
        let mut page = Page::new(4096);
        assert!(!tags.show(&mut page).is_truncated());
        assert_eq!(
            page.as_str(),
            "nr_tags=64, reserved_tags=2, bits_per_word=16\n\
             nr_free=61, nr_reserved=2\n\
             active_queues=1\n"
        );
    }

    #[test]
    fn test_exhaustion() {
        let tags = TagSet::new(2, 1);
        assert!(tags.get(true));
        assert!(!tags.get(true));
        tags.put(true);
        tags.put(true);
        assert!(tags.get(true));
        assert!(!tags.get(true));
    }

    #[test]
    fn test_bits_per_word() {
        assert_eq!(bits_per_word(1), 64);
        assert_eq!(bits_per_word(256), 64);
        assert_eq!(bits_per_word(32), 8);
    }
}
