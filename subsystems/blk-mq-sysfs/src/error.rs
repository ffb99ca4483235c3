//! # Error Types
//!
//! Errors surfaced by the attribute dispatch gate and the node lifecycle
//! manager.
//!
//! ## Propagation
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────────────┐
//! │  attribute read/write                      device attach             │
//! │         │                                        │                   │
//! │         ▼                                        ▼                   │
//! │  ┌─────────────┐                          ┌─────────────┐            │
//! │  │  Dispatch   │──▶ NoHandler ──▶ caller  │  Lifecycle  │            │
//! │  │    Gate     │──▶ Gone      ──▶ caller  │   Manager   │            │
//! │  └─────────────┘                          └──────┬──────┘            │
//! │                                                  │ attach fails      │
//! │                                                  ▼                   │
//! │                                           full unwind, then          │
//! │                                           PartialRegistration        │
//! │                                                  │                   │
//! │                                                  ▼                   │
//! │                                             attach caller            │
//! └──────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! A shortened read is not an error: handlers return
//! [`Shown::Truncated`](crate::page::Shown::Truncated).

use alloc::string::String;
use core::fmt;

use crate::lifecycle::RegistrationState;

// =============================================================================
// ERRNO VALUES
// =============================================================================

/// No such file or directory
pub const ENOENT: i32 = 2;
/// I/O error
pub const EIO: i32 = 5;
/// Out of memory
pub const ENOMEM: i32 = 12;
/// Device or resource busy
pub const EBUSY: i32 = 16;
/// File exists
pub const EEXIST: i32 = 17;
/// Invalid argument
pub const EINVAL: i32 = 22;

/// Result type for sysfs operations
pub type SysfsResult<T> = Result<T, SysfsError>;

// =============================================================================
// DIRECTION
// =============================================================================

/// Direction of an attribute operation
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    /// `show`
    Read,
    /// `store`
    Write,
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Direction::Read => f.write_str("read"),
            Direction::Write => f.write_str("write"),
        }
    }
}

// =============================================================================
// REGISTRATION STAGE
// =============================================================================

/// Step of tree registration that failed
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RegistrationStage {
    /// Attaching the group node under the device
    Root,
    /// Attaching a hardware queue node
    HwQueue(u32),
    /// Attaching a software context node under a hardware queue
    SwCtx {
        /// Hardware queue index
        hw_queue: u32,
        /// CPU of the context
        cpu: u32,
    },
}

impl fmt::Display for RegistrationStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RegistrationStage::Root => f.write_str("root"),
            RegistrationStage::HwQueue(idx) => write!(f, "hw queue {}", idx),
            RegistrationStage::SwCtx { hw_queue, cpu } => {
                write!(f, "hw queue {} / cpu{}", hw_queue, cpu)
            },
        }
    }
}

// =============================================================================
// EXPORT ERROR
// =============================================================================

/// Errors reported by an export backend
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ExportError {
    /// A node with that name already exists under the parent
    Exists,
    /// The parent is not attached
    NoParent,
    /// The node is not attached
    NotAttached,
    /// The backend refused the operation
    Rejected(&'static str),
}

impl ExportError {
    /// Negative errno for this error
    pub const fn errno(&self) -> i32 {
        match self {
            ExportError::Exists => -EEXIST,
            ExportError::NoParent | ExportError::NotAttached => -ENOENT,
            ExportError::Rejected(_) => -ENOMEM,
        }
    }
}

impl fmt::Display for ExportError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ExportError::Exists => f.write_str("node already exists"),
            ExportError::NoParent => f.write_str("parent not attached"),
            ExportError::NotAttached => f.write_str("node not attached"),
            ExportError::Rejected(why) => write!(f, "rejected: {}", why),
        }
    }
}

// =============================================================================
// SYSFS ERROR
// =============================================================================

/// Errors from attribute dispatch and tree lifecycle
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SysfsError {
    /// The attribute has no handler in the requested direction
    NoHandler {
        /// Attribute name
        attr: &'static str,
        /// Requested direction
        direction: Direction,
    },
    /// The device is shutting down; node data is no longer available
    Gone,
    /// No attribute with that name on the node
    UnknownAttribute(String),
    /// Tree registration failed and was fully unwound
    PartialRegistration {
        /// Where registration stopped
        stage: RegistrationStage,
        /// Backend error that stopped it
        cause: ExportError,
    },
    /// Lifecycle operation attempted in the wrong state
    InvalidState {
        /// State required by the operation
        expected: RegistrationState,
        /// State actually found
        found: RegistrationState,
    },
    /// Configuration rejected by `validate()`
    InvalidConfig(&'static str),
    /// The hotplug guard was taken on a different hotplug lock
    ForeignHotplugSection,
    /// Export backend failure outside of registration
    Export(ExportError),
}

impl SysfsError {
    /// Negative errno reported to the export mechanism
    pub fn errno(&self) -> i32 {
        match self {
            SysfsError::NoHandler { .. } => -EIO,
            SysfsError::Gone | SysfsError::UnknownAttribute(_) => -ENOENT,
            SysfsError::PartialRegistration { cause, .. } => cause.errno(),
            SysfsError::InvalidState { .. } => -EBUSY,
            SysfsError::InvalidConfig(_) | SysfsError::ForeignHotplugSection => -EINVAL,
            SysfsError::Export(e) => e.errno(),
        }
    }

    /// Permanent for the life of the current device instance
    pub fn is_permanent(&self) -> bool {
        matches!(self, SysfsError::NoHandler { .. } | SysfsError::Gone)
    }
}

impl fmt::Display for SysfsError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SysfsError::NoHandler { attr, direction } => {
                write!(f, "attribute '{}' has no {} handler", attr, direction)
            },
            SysfsError::Gone => f.write_str("device is gone"),
            SysfsError::UnknownAttribute(name) => write!(f, "no attribute '{}'", name),
            SysfsError::PartialRegistration { stage, cause } => {
                write!(f, "registration failed at {}: {}", stage, cause)
            },
            SysfsError::InvalidState { expected, found } => {
                write!(f, "expected state {:?}, found {:?}", expected, found)
            },
            SysfsError::InvalidConfig(why) => write!(f, "invalid config: {}", why),
            SysfsError::ForeignHotplugSection => {
                f.write_str("hotplug section held on another hotplug lock")
            },
            SysfsError::Export(e) => write!(f, "export: {}", e),
        }
    }
}

impl From<ExportError> for SysfsError {
    fn from(e: ExportError) -> Self {
        SysfsError::Export(e)
    }
}

// =============================================================================
// TESTS
// =============================================================================
