//! # Helix Multi-Queue Block Statistics Tree
//!
//! Exports the runtime counters of a multi-queue block device as a
//! three-level tree of named attributes, and dispatches attribute reads and
//! writes safely against a device that may be shutting down.
//!
//! ## Tree Shape
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                                                                         │
//! │   <disk>/mq                            group node, no attributes        │
//! │     ├── 0                              hardware queue 0                 │
//! │     │   ├── queued run dispatched pending tags cpu_list active          │
//! │     │   ├── io_poll stats                                               │
//! │     │   ├── cpu0                       software context of cpu0         │
//! │     │   │   └── dispatched merged completed rq_list                     │
//! │     │   └── cpu2                                                        │
//! │     └── 1                                                               │
//! │         └── cpu1                                                        │
//! │                                                                         │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Components
//!
//! | Module        | Role                                                     |
//! |---------------|----------------------------------------------------------|
//! | [`attr`]      | Static attribute table per node kind                     |
//! | [`gate`]      | Liveness check and per-device lock around every dispatch |
//! | [`lifecycle`] | Build, attach, detach and release of the tree            |
//! | [`handlers`]  | Text formatting of counters, lists and masks             |
//! | [`queue`]     | Device queue, hardware queues and software contexts      |
//! | [`export`]    | Backend primitives and an in-memory backend              |
//!
//! ## Usage
//!
//! ```rust,ignore
//! let tree = Arc::new(ExportTree::new());
//! tree.add_device("sda");
//! let sysfs = MqSysfs::new(MqSysfsConfig::default(), tree.clone(), hotplug)?;
//!
//! let queue = Arc::new(DeviceQueue::new(&QueueConfig::new(2, 4))?);
//! let disk = Disk::new("sda", queue);
//! sysfs.register_disk(&disk)?;
//!
//! let mut page = sysfs.page();
//! tree.show("sda/mq/0", "cpu_list", &mut page)?;   // "0, 2\n"
//! ```

#![cfg_attr(not(test), no_std)]

// =============================================================================
// EXTERNAL DEPENDENCIES
// =============================================================================

extern crate alloc;

// =============================================================================
// MODULE DECLARATIONS
// =============================================================================

/// Attribute tables and permission bits
pub mod attr;

/// Configuration
pub mod config;

/// CPU sets
pub mod cpumask;

/// Error types
pub mod error;

/// Export backend primitives
pub mod export;

/// Dispatch gate
pub mod gate;

/// Attribute handlers
pub mod handlers;

/// CPU hotplug exclusion
pub mod hotplug;

/// Tree lifecycle
pub mod lifecycle;

/// Export nodes
pub mod node;

/// Bounded output page
pub mod page;

/// Queue topology and counters
pub mod queue;

/// Latency statistics
#[cfg(feature = "stats")]
pub mod stat;

/// Tag pool summary
pub mod tags;

// =============================================================================
// RE-EXPORTS
// =============================================================================

pub use attr::{AttrMode, Attribute, HW_QUEUE_ATTRS, SW_CTX_ATTRS};
pub use config::{MqSysfsConfig, QueueConfig};
pub use cpumask::CpuMask;
pub use error::{Direction, ExportError, RegistrationStage, SysfsError, SysfsResult};
pub use export::{ExportBackend, ExportTree, KobjAction, Parent, TreeEvent};
pub use gate::QueueGate;
pub use hotplug::{CpuHotplug, HotplugGuard, HotplugLock};
pub use lifecycle::{MqSysfs, RegistrationState};
pub use node::{ExportNode, NodeId, NodeKind};
pub use page::{Page, Shown};
pub use queue::{default_cpu_map, DeviceQueue, Disk, HwQueue, IoClass, RequestId, SwCtx};
#[cfg(feature = "stats")]
pub use stat::{RqStat, StatBucket};
pub use tags::{TagPool, TagSet};

// =============================================================================
// CONSTANTS
// =============================================================================

/// Buckets of the dispatch-order histogram
pub const MAX_DISPATCH_ORDER: usize = 7;

static_assertions::const_assert!(MAX_DISPATCH_ORDER >= 2);
static_assertions::const_assert_eq!(queue::RQ_ENTRY_LEN, 18);
static_assertions::assert_impl_all!(ExportNode: Send, Sync);
static_assertions::assert_impl_all!(DeviceQueue: Send, Sync);
static_assertions::assert_impl_all!(MqSysfs: Send, Sync);

// =============================================================================
// TESTS
// =============================================================================
