//! # Bounded Output Page
//!
//! Every attribute read formats into a [`Page`]. The page holds at most
//! `size - 1` bytes, leaving the last byte of the page for the terminator the
//! export mechanism appends.
//!
//! Writes through [`Page::try_write`] are all-or-nothing: a formatted piece
//! that does not fit leaves the page exactly as it was.

use alloc::vec::Vec;
use core::fmt;

/// Outcome of a successful read
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Shown {
    /// The full representation was written
    Complete(usize),
    /// A shortened representation was written
    Truncated(usize),
}

impl Shown {
    /// Number of bytes produced
    pub const fn len(&self) -> usize {
        match *self {
            Shown::Complete(n) | Shown::Truncated(n) => n,
        }
    }

    /// Nothing produced
    pub const fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Output was shortened to fit
    pub const fn is_truncated(&self) -> bool {
        matches!(self, Shown::Truncated(_))
    }
}

/// Bounded output buffer for one attribute read
#[derive(Debug, Clone)]
pub struct Page {
    buf: Vec<u8>,
    limit: usize,
}

impl Page {
    /// Create a page of `size` bytes
    pub fn new(size: usize) -> Self {
        let limit = size.saturating_sub(1);
        Self {
            buf: Vec::with_capacity(limit),
            limit,
        }
    }

    /// Bytes written so far
    pub fn len(&self) -> usize {
        self.buf.len()
    }

    /// Whether nothing was written
    pub fn is_empty(&self) -> bool {
        self.buf.is_empty()
    }

    /// Maximum bytes this page can hold
    pub fn limit(&self) -> usize {
        self.limit
    }

    /// Bytes still available
    pub fn remaining(&self) -> usize {
        self.limit - self.buf.len()
    }

    /// Written bytes
    pub fn as_bytes(&self) -> &[u8] {
        &self.buf
    }

    /// Written bytes as text
    pub fn as_str(&self) -> &str {
        // Only `&str` pieces are ever appended.
        core::str::from_utf8(&self.buf).unwrap_or_default()
    }

    /// Discard everything past `len`
    pub fn truncate(&mut self, len: usize) {
        self.buf.truncate(len);
    }

    /// Reset to empty
    pub fn clear(&mut self) {
        self.buf.clear();
    }

    /// Append formatted text if all of it fits
    ///
    /// Returns `false` and leaves the page untouched otherwise.
    pub fn try_write(&mut self, args: fmt::Arguments<'_>) -> bool {
        let mark = self.buf.len();
        if fmt::write(self, args).is_err() {
            self.buf.truncate(mark);
            return false;
        }
        true
    }

    /// Append formatted text, or mark the read truncated
    pub fn emit(&mut self, args: fmt::Arguments<'_>) -> Shown {
        if self.try_write(args) {
            Shown::Complete(self.len())
        } else {
            Shown::Truncated(self.len())
        }
    }

    /// Current length as a complete read
    pub fn complete(&self) -> Shown {
        Shown::Complete(self.len())
    }
}

impl fmt::Write for Page {
    fn write_str(&mut self, s: &str) -> fmt::Result {
        if s.len() > self.remaining() {
            return Err(fmt::Error);
        }
        self.buf.extend_from_slice(s.as_bytes());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_limit_reserves_terminator() {
        let page = Page::new(64);
        assert_eq!(page.limit(), 63);
        assert_eq!(page.remaining(), 63);
    }

    #[test]
    fn test_try_write_all_or_nothing() {
        let mut page = Page::new(8);
        assert!(page.try_write(format_args!("{}", "abc")));
        assert!(!page.try_write(format_args!("{}-{}", "defg", "h")));
        assert_eq!(page.as_str(), "abc");
        assert!(page.try_write(format_args!("{}", "defg")));
        assert_eq!(page.remaining(), 0);
    }

    #[test]
    fn test_emit() {
        let mut page = Page::new(4);
        assert_eq!(page.emit(format_args!("{}\n", 12)), Shown::Complete(3));
        assert!(page.emit(format_args!("x")).is_truncated());
        assert_eq!(page.len(), 3);
    }
}
