//! # Export Backend
//!
//! The mechanism that presents nodes to userspace is a collaborator. The
//! lifecycle manager only needs three primitives from it, collected in
//! [`ExportBackend`]: attach a node under a parent, detach it, and announce a
//! change to observers.
//!
//! [`ExportTree`] is an in-memory backend keyed by path. It keeps an ordered
//! event log, supports failure injection by path, and can dispatch reads and
//! writes by path through the gate.
//!
//! ```text
//!   sda/mq                 (group)
//!   sda/mq/0               (hw queue 0)
//!   sda/mq/0/cpu0          (sw context)
//!   sda/mq/0/cpu2
//!   sda/mq/1
//!   sda/mq/1/cpu1
//! ```

use alloc::boxed::Box;
use alloc::collections::{BTreeMap, BTreeSet};
use alloc::string::String;
use alloc::sync::Arc;
use alloc::vec::Vec;
use core::fmt;

use log::debug;
use spin::{Mutex, RwLock};

use crate::error::{ExportError, SysfsError, SysfsResult};
use crate::node::{ExportNode, NodeId};
use crate::page::{Page, Shown};

/// Where a node is attached
#[derive(Debug, Clone, Copy)]
pub enum Parent<'a> {
    /// Directly under a device, by device name
    Device(&'a str),
    /// Under another export node
    Node(&'a Arc<ExportNode>),
}

/// Change announced to observers
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KobjAction {
    /// Node became visible
    Add,
    /// Node is about to go away
    Remove,
}

impl fmt::Display for KobjAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            KobjAction::Add => f.write_str("add"),
            KobjAction::Remove => f.write_str("remove"),
        }
    }
}

/// Node export primitives
pub trait ExportBackend: Send + Sync {
    /// Attach `node` under `parent` using the node's name
    fn add(&self, node: &Arc<ExportNode>, parent: Parent<'_>) -> Result<(), ExportError>;

    /// Detach `node`; detaching an unknown node is a no-op
    fn del(&self, node: &Arc<ExportNode>);

    /// Announce `action` on `node` to observers
    fn uevent(&self, node: &Arc<ExportNode>, action: KobjAction);
}

// =============================================================================
// IN-MEMORY TREE
// =============================================================================

/// Entry of the [`ExportTree`] log
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TreeEvent {
    /// Node attached at path
    Added(String),
    /// Node detached from path
    Removed(String),
    /// Change announced for path
    Uevent(String, KobjAction),
}

/// Observer of [`TreeEvent`]s
pub type Listener = Box<dyn Fn(&TreeEvent) + Send + Sync>;

#[derive(Default)]
struct TreeInner {
    devices: BTreeSet<String>,
    nodes: BTreeMap<String, Arc<ExportNode>>,
    paths: BTreeMap<NodeId, String>,
    failures: BTreeSet<String>,
    events: Vec<TreeEvent>,
}

/// In-memory export backend
pub struct ExportTree {
    inner: Mutex<TreeInner>,
    listeners: RwLock<Vec<Listener>>,
}

impl ExportTree {
    /// Create an empty tree with no devices
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(TreeInner::default()),
            listeners: RwLock::new(Vec::new()),
        }
    }

    /// Make a device available as a parent
    pub fn add_device(&self, name: &str) {
        self.inner.lock().devices.insert(name.into());
    }

    /// Make attaching a node at `path` fail
    pub fn inject_failure(&self, path: &str) {
        self.inner.lock().failures.insert(path.into());
    }

    /// Drop every injected failure
    pub fn clear_failures(&self) {
        self.inner.lock().failures.clear();
    }

    /// Register an observer of every tree event
    ///
    /// Listeners run with the lifecycle manager mid-operation and must not
    /// call back into it.
    pub fn subscribe(&self, listener: impl Fn(&TreeEvent) + Send + Sync + 'static) {
        self.listeners.write().push(Box::new(listener));
    }

    /// Node attached at `path`
    pub fn lookup(&self, path: &str) -> Option<Arc<ExportNode>> {
        self.inner.lock().nodes.get(path).cloned()
    }

    /// Whether a node is attached at `path`
    pub fn contains(&self, path: &str) -> bool {
        self.inner.lock().nodes.contains_key(path)
    }

    /// Path of an attached node
    pub fn path_of(&self, node: &ExportNode) -> Option<String> {
        self.inner.lock().paths.get(&node.id()).cloned()
    }

    /// Names of the nodes attached directly under `path`
    pub fn children(&self, path: &str) -> Vec<String> {
        let inner = self.inner.lock();
        inner
            .nodes
            .keys()
            .filter_map(|p| {
                let rest = p.strip_prefix(path)?.strip_prefix('/')?;
                (!rest.contains('/')).then(|| String::from(rest))
            })
            .collect()
    }

    /// Number of attached nodes
    pub fn len(&self) -> usize {
        self.inner.lock().nodes.len()
    }

    /// Whether no node is attached
    pub fn is_empty(&self) -> bool {
        self.inner.lock().nodes.is_empty()
    }

    /// Event log, oldest first
    pub fn events(&self) -> Vec<TreeEvent> {
        self.inner.lock().events.clone()
    }

    /// Empty the event log
    pub fn clear_events(&self) {
        self.inner.lock().events.clear();
    }

    /// Read an attribute of the node at `path`
    pub fn show(&self, path: &str, attr: &str, page: &mut Page) -> SysfsResult<Shown> {
        let node = self
            .lookup(path)
            .ok_or(SysfsError::Export(ExportError::NotAttached))?;
        node.show(attr, page)
    }

    /// Write an attribute of the node at `path`
    pub fn store(&self, path: &str, attr: &str, buf: &[u8]) -> SysfsResult<usize> {
        let node = self
            .lookup(path)
            .ok_or(SysfsError::Export(ExportError::NotAttached))?;
        node.store(attr, buf)
    }

    fn record(&self, event: TreeEvent) {
        for listener in self.listeners.read().iter() {
            listener(&event);
        }
        self.inner.lock().events.push(event);
    }
}

impl ExportBackend for ExportTree {
    fn add(&self, node: &Arc<ExportNode>, parent: Parent<'_>) -> Result<(), ExportError> {
        let path = {
            let mut inner = self.inner.lock();
            let base = match parent {
                Parent::Device(dev) => inner
                    .devices
                    .get(dev)
                    .cloned()
                    .ok_or(ExportError::NoParent)?,
                Parent::Node(p) => inner
                    .paths
                    .get(&p.id())
                    .cloned()
                    .ok_or(ExportError::NoParent)?,
            };
            let path = alloc::format!("{}/{}", base, node.name());

            if inner.nodes.contains_key(&path) {
                return Err(ExportError::Exists);
            }
            if inner.failures.contains(&path) {
                return Err(ExportError::Rejected("injected failure"));
            }
            inner.nodes.insert(path.clone(), Arc::clone(node));
            inner.paths.insert(node.id(), path.clone());
            path
        };

        debug!("blk-mq-sysfs: export add {}", path);
        self.record(TreeEvent::Added(path));
        Ok(())
    }

    fn del(&self, node: &Arc<ExportNode>) {
        let path = {
            let mut inner = self.inner.lock();
            let Some(path) = inner.paths.remove(&node.id()) else {
                return;
            };
            inner.nodes.remove(&path);

            // Whatever is still below goes with the directory.
            let prefix = alloc::format!("{}/", path);
            let stale: Vec<String> = inner
                .nodes
                .keys()
                .filter(|p| p.starts_with(&prefix))
                .cloned()
                .collect();
            for p in stale {
                if let Some(child) = inner.nodes.remove(&p) {
                    inner.paths.remove(&child.id());
                }
            }
            path
        };

        debug!("blk-mq-sysfs: export del {}", path);
        self.record(TreeEvent::Removed(path));
    }

    fn uevent(&self, node: &Arc<ExportNode>, action: KobjAction) {
        let Some(path) = self.path_of(node) else {
            return;
        };
        debug!("blk-mq-sysfs: uevent {} {}", action, path);
        self.record(TreeEvent::Uevent(path, action));
    }
}

impl Default for ExportTree {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for ExportTree {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let inner = self.inner.lock();
        f.debug_struct("ExportTree")
            .field("devices", &inner.devices)
            .field("nodes", &inner.nodes.keys().collect::<Vec<_>>())
            .field("events", &inner.events.len())
            .finish()
    }
}
