//! # Dispatch Gate
//!
//! Single entry point for every attribute read and write.
//!
//! ```text
//!   show/store(node, attr)
//!          │
//!          ▼
//!   resolve attribute ──▶ UnknownAttribute / NoHandler
//!          │
//!          ▼
//!   ┌──────────────────────────── sysfs lock ───────────────────────────┐
//!   │  dying? ──▶ Gone                                                   │
//!   │  upgrade node handle ──▶ Gone                                     │
//!   │  handler(obj, page | bytes)                                       │
//!   └───────────────────────────────────────────────────────────────────┘
//! ```
//!
//! The lock is per device, so every dispatch on a device is ordered against
//! [`QueueGate::mark_dying`]. Counters have their own synchronization; the
//! lock only excludes the shutdown transition.

use alloc::sync::Arc;
use core::sync::atomic::{AtomicBool, Ordering};

use log::debug;
use spin::Mutex;

use crate::attr;
use crate::error::{SysfsError, SysfsResult};
use crate::node::{ExportNode, NodeKind};
use crate::page::{Page, Shown};

/// Per-device serialization lock and dying flag
#[derive(Debug)]
pub struct QueueGate {
    sysfs_lock: Mutex<()>,
    dying: AtomicBool,
}

impl QueueGate {
    /// Create a gate for a live device
    pub const fn new() -> Self {
        Self {
            sysfs_lock: Mutex::new(()),
            dying: AtomicBool::new(false),
        }
    }

    /// Set the dying flag; irreversible
    ///
    /// Taken under the sysfs lock: when this returns, no handler is running
    /// and none will be started again.
    pub fn mark_dying(&self) {
        let _lock = self.sysfs_lock.lock();
        if !self.dying.swap(true, Ordering::AcqRel) {
            debug!("blk-mq-sysfs: device marked dying");
        }
    }

    /// Whether the dying flag is set
    pub fn is_dying(&self) -> bool {
        self.dying.load(Ordering::Acquire)
    }

    /// Run `f` under the sysfs lock unless the device is dying
    pub fn enter<R>(&self, f: impl FnOnce() -> SysfsResult<R>) -> SysfsResult<R> {
        let _lock = self.sysfs_lock.lock();
        if self.dying.load(Ordering::Acquire) {
            debug!("blk-mq-sysfs: dispatch refused, device dying");
            return Err(SysfsError::Gone);
        }
        f()
    }
}

impl Default for QueueGate {
    fn default() -> Self {
        Self::new()
    }
}

/// Read attribute `attr` of `node` into `page`
pub fn show(node: &Arc<ExportNode>, attr: &str, page: &mut Page) -> SysfsResult<Shown> {
    let node = Arc::clone(node);

    match node.kind() {
        NodeKind::Device => Err(SysfsError::UnknownAttribute(attr.into())),
        NodeKind::HwQueue { queue, attrs } => {
            let show = attr::lookup(attrs, attr)?.show_fn()?;
            node.gate().enter(|| {
                let hctx = queue.upgrade().ok_or(SysfsError::Gone)?;
                show(&hctx, page)
            })
        },
        NodeKind::SwCtx { ctx, attrs } => {
            let show = attr::lookup(attrs, attr)?.show_fn()?;
            node.gate().enter(|| {
                let ctx = ctx.upgrade().ok_or(SysfsError::Gone)?;
                show(&ctx, page)
            })
        },
    }
}

/// Write `buf` to attribute `attr` of `node`
pub fn store(node: &Arc<ExportNode>, attr: &str, buf: &[u8]) -> SysfsResult<usize> {
    let node = Arc::clone(node);

    match node.kind() {
        NodeKind::Device => Err(SysfsError::UnknownAttribute(attr.into())),
        NodeKind::HwQueue { queue, attrs } => {
            let store = attr::lookup(attrs, attr)?.store_fn()?;
            node.gate().enter(|| {
                let hctx = queue.upgrade().ok_or(SysfsError::Gone)?;
                store(&hctx, buf)
            })
        },
        NodeKind::SwCtx { ctx, attrs } => {
            let store = attr::lookup(attrs, attr)?.store_fn()?;
            node.gate().enter(|| {
                let ctx = ctx.upgrade().ok_or(SysfsError::Gone)?;
                store(&ctx, buf)
            })
        },
    }
}
