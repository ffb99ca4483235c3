//! # Attribute Tables
//!
//! One static, ordered table per node kind. Tables are read-only templates
//! shared by every node of that kind; a node only carries a reference to its
//! table.
//!
//! | Kind        | Attributes                                                    |
//! |-------------|---------------------------------------------------------------|
//! | device root | none                                                          |
//! | hw queue    | queued, run, dispatched, pending, tags, cpu_list, active,     |
//! |             | io_poll, stats (with the `stats` feature)                     |
//! | sw context  | dispatched, merged, completed, rq_list                        |

use core::fmt;

use bitflags::bitflags;

use crate::error::{Direction, SysfsError, SysfsResult};
use crate::handlers;
use crate::page::{Page, Shown};
use crate::queue::{HwQueue, SwCtx};

bitflags! {
    /// Permission bits of an attribute
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct AttrMode: u16 {
        /// Owner may read
        const USR_READ  = 0o400;
        /// Owner may write
        const USR_WRITE = 0o200;
        /// Group may read
        const GRP_READ  = 0o040;
        /// Others may read
        const OTH_READ  = 0o004;

        /// World readable
        const READ_ALL  = Self::USR_READ.bits() | Self::GRP_READ.bits() | Self::OTH_READ.bits();
        /// World readable, owner writable
        const READ_ALL_USR_WRITE = Self::READ_ALL.bits() | Self::USR_WRITE.bits();
    }
}

/// Read handler
pub type ShowFn<T> = fn(&T, &mut Page) -> SysfsResult<Shown>;

/// Write handler
pub type StoreFn<T> = fn(&T, &[u8]) -> SysfsResult<usize>;

/// Named attribute of a node kind
pub struct Attribute<T> {
    /// File name under the node
    pub name: &'static str,
    /// Permission bits
    pub mode: AttrMode,
    /// Read handler
    pub show: Option<ShowFn<T>>,
    /// Write handler
    pub store: Option<StoreFn<T>>,
}

impl<T> Attribute<T> {
    /// World-readable attribute
    pub const fn read_only(name: &'static str, show: ShowFn<T>) -> Self {
        Self {
            name,
            mode: AttrMode::READ_ALL,
            show: Some(show),
            store: None,
        }
    }

    /// World-readable, owner-writable attribute
    pub const fn read_write(name: &'static str, show: ShowFn<T>, store: StoreFn<T>) -> Self {
        Self {
            name,
            mode: AttrMode::READ_ALL_USR_WRITE,
            show: Some(show),
            store: Some(store),
        }
    }

    /// Read handler, or `NoHandler`
    pub fn show_fn(&self) -> SysfsResult<ShowFn<T>> {
        self.show.ok_or(SysfsError::NoHandler {
            attr: self.name,
            direction: Direction::Read,
        })
    }

    /// Write handler, or `NoHandler`
    pub fn store_fn(&self) -> SysfsResult<StoreFn<T>> {
        self.store.ok_or(SysfsError::NoHandler {
            attr: self.name,
            direction: Direction::Write,
        })
    }
}

impl<T> fmt::Debug for Attribute<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Attribute")
            .field("name", &self.name)
            .field("mode", &self.mode)
            .field("show", &self.show.is_some())
            .field("store", &self.store.is_some())
            .finish()
    }
}

/// Find an attribute by name
pub fn lookup<T: 'static>(
    table: &'static [Attribute<T>],
    name: &str,
) -> SysfsResult<&'static Attribute<T>> {
    table
        .iter()
        .find(|attr| attr.name == name)
        .ok_or_else(|| SysfsError::UnknownAttribute(name.into()))
}

// =============================================================================
// TABLES
// =============================================================================

/// Software context attributes
pub static SW_CTX_ATTRS: [Attribute<SwCtx>; 4] = [
    Attribute::read_only("dispatched", handlers::ctx_dispatched_show),
    Attribute::read_only("merged", handlers::ctx_merged_show),
    Attribute::read_only("completed", handlers::ctx_completed_show),
    Attribute::read_only("rq_list", handlers::ctx_rq_list_show),
];

cfg_if::cfg_if! {
    if #[cfg(feature = "stats")] {
        /// Hardware queue attributes
        pub static HW_QUEUE_ATTRS: [Attribute<HwQueue>; 9] = [
            Attribute::read_only("queued", handlers::hctx_queued_show),
            Attribute::read_only("run", handlers::hctx_run_show),
            Attribute::read_only("dispatched", handlers::hctx_dispatched_show),
            Attribute::read_only("pending", handlers::hctx_pending_show),
            Attribute::read_only("tags", handlers::hctx_tags_show),
            Attribute::read_only("cpu_list", handlers::hctx_cpus_show),
            Attribute::read_only("active", handlers::hctx_active_show),
            Attribute::read_only("io_poll", handlers::hctx_poll_show),
            Attribute::read_write("stats", handlers::hctx_stat_show, handlers::hctx_stat_store),
        ];
    } else {
        /// Hardware queue attributes
        pub static HW_QUEUE_ATTRS: [Attribute<HwQueue>; 8] = [
            Attribute::read_only("queued", handlers::hctx_queued_show),
            Attribute::read_only("run", handlers::hctx_run_show),
            Attribute::read_only("dispatched", handlers::hctx_dispatched_show),
            Attribute::read_only("pending", handlers::hctx_pending_show),
            Attribute::read_only("tags", handlers::hctx_tags_show),
            Attribute::read_only("cpu_list", handlers::hctx_cpus_show),
            Attribute::read_only("active", handlers::hctx_active_show),
            Attribute::read_only("io_poll", handlers::hctx_poll_show),
        ];
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_table_names() {
        let names: alloc::vec::Vec<&str> = SW_CTX_ATTRS.iter().map(|a| a.name).collect();
        assert_eq!(names, ["dispatched", "merged", "completed", "rq_list"]);
        assert_eq!(HW_QUEUE_ATTRS[0].name, "queued");
        assert_eq!(HW_QUEUE_ATTRS[7].name, "io_poll");
    }

    #[test]
    fn test_read_only_modes() {
        for attr in SW_CTX_ATTRS.iter() {
            assert_eq!(attr.mode.bits(), 0o444);
            assert!(attr.store.is_none());
        }
        let queued = lookup(&HW_QUEUE_ATTRS, "queued").expect("queued exists");
        assert_eq!(
            queued.store_fn().err(),
            Some(SysfsError::NoHandler {
                attr: "queued",
                direction: Direction::Write
            })
        );
    }

    #[cfg(feature = "stats")]
    #[test]
    fn test_stats_writable() {
        let stats = lookup(&HW_QUEUE_ATTRS, "stats").expect("stats compiled in");
        assert_eq!(stats.mode.bits(), 0o644);
        assert!(stats.store_fn().is_ok());
    }

    #[test]
    fn test_unknown() {
        assert_eq!(
            lookup(&SW_CTX_ATTRS, "nope").err(),
            Some(SysfsError::UnknownAttribute("nope".into()))
        );
    }
}
