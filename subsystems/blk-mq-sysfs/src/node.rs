//! # Export Nodes
//!
//! One node per directory of the exported tree. A node never owns the domain
//! object it describes: it keeps a [`Weak`] handle to the hardware queue or
//! software context plus the per-device [`QueueGate`], and the node kind's
//! static attribute table.
//!
//! Nodes are shared as `Arc<ExportNode>`. The lifecycle manager holds the
//! creating reference, the export backend holds one while the node is
//! attached, and every attribute dispatch holds one for its duration.

use alloc::string::String;
use alloc::sync::{Arc, Weak};
use alloc::vec::Vec;
use core::fmt;
use core::sync::atomic::{AtomicBool, AtomicU64, Ordering};

use crate::attr::{self, AttrMode, Attribute, HW_QUEUE_ATTRS, SW_CTX_ATTRS};
use crate::error::SysfsResult;
use crate::gate::{self, QueueGate};
use crate::page::{Page, Shown};
use crate::queue::{HwQueue, SwCtx};

static NEXT_NODE_ID: AtomicU64 = AtomicU64::new(1);

/// Unique node identifier
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct NodeId(u64);

impl NodeId {
    fn next() -> Self {
        Self(NEXT_NODE_ID.fetch_add(1, Ordering::Relaxed))
    }

    /// Raw value
    pub const fn as_u64(self) -> u64 {
        self.0
    }
}

/// What a node describes
pub enum NodeKind {
    /// Group node for the whole device; no attributes
    Device,
    /// Hardware queue directory
    HwQueue {
        /// Observed queue
        queue: Weak<HwQueue>,
        /// Attribute table of the kind
        attrs: &'static [Attribute<HwQueue>],
    },
    /// Software context directory
    SwCtx {
        /// Observed context
        ctx: Weak<SwCtx>,
        /// Attribute table of the kind
        attrs: &'static [Attribute<SwCtx>],
    },
}

impl NodeKind {
    /// Short kind name for logs
    pub const fn as_str(&self) -> &'static str {
        match self {
            NodeKind::Device => "device",
            NodeKind::HwQueue { .. } => "hw_queue",
            NodeKind::SwCtx { .. } => "sw_ctx",
        }
    }
}

impl fmt::Debug for NodeKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Directory of the exported statistics tree
pub struct ExportNode {
    id: NodeId,
    name: String,
    kind: NodeKind,
    gate: Arc<QueueGate>,
    attached: AtomicBool,
}

impl ExportNode {
    fn new(name: String, kind: NodeKind, gate: Arc<QueueGate>) -> Arc<Self> {
        Arc::new(Self {
            id: NodeId::next(),
            name,
            kind,
            gate,
            attached: AtomicBool::new(false),
        })
    }

    /// Group node placed under the device
    pub fn device(group_name: &str, gate: Arc<QueueGate>) -> Arc<Self> {
        Self::new(group_name.into(), NodeKind::Device, gate)
    }

    /// Node for a hardware queue, named by its index
    pub fn hw_queue(queue: &Arc<HwQueue>, gate: Arc<QueueGate>) -> Arc<Self> {
        let kind = NodeKind::HwQueue {
            queue: Arc::downgrade(queue),
            attrs: &HW_QUEUE_ATTRS,
        };
        Self::new(alloc::format!("{}", queue.queue_num()), kind, gate)
    }

    /// Node for a software context, named `cpu<N>`
    pub fn sw_ctx(ctx: &Arc<SwCtx>, gate: Arc<QueueGate>) -> Arc<Self> {
        let kind = NodeKind::SwCtx {
            ctx: Arc::downgrade(ctx),
            attrs: &SW_CTX_ATTRS,
        };
        Self::new(alloc::format!("cpu{}", ctx.cpu()), kind, gate)
    }

    /// Node identifier
    pub fn id(&self) -> NodeId {
        self.id
    }

    /// Name under the parent
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Node kind
    pub fn kind(&self) -> &NodeKind {
        &self.kind
    }

    /// Liveness gate of the owning device
    pub fn gate(&self) -> &Arc<QueueGate> {
        &self.gate
    }

    /// Whether the node is currently attached to an export backend
    pub fn is_attached(&self) -> bool {
        self.attached.load(Ordering::Acquire)
    }

    pub(crate) fn set_attached(&self, attached: bool) {
        self.attached.store(attached, Ordering::Release);
    }

    /// Attribute names in table order
    pub fn attr_names(&self) -> Vec<&'static str> {
        match &self.kind {
            NodeKind::Device => Vec::new(),
            NodeKind::HwQueue { attrs, .. } => attrs.iter().map(|a| a.name).collect(),
            NodeKind::SwCtx { attrs, .. } => attrs.iter().map(|a| a.name).collect(),
        }
    }

    /// Permission bits of an attribute
    pub fn attr_mode(&self, name: &str) -> SysfsResult<AttrMode> {
        match &self.kind {
            NodeKind::Device => Err(crate::SysfsError::UnknownAttribute(name.into())),
            NodeKind::HwQueue { attrs, .. } => attr::lookup(attrs, name).map(|a| a.mode),
            NodeKind::SwCtx { attrs, .. } => attr::lookup(attrs, name).map(|a| a.mode),
        }
    }

    /// Read an attribute through the dispatch gate
    pub fn show(self: &Arc<Self>, attr: &str, page: &mut Page) -> SysfsResult<Shown> {
        gate::show(self, attr, page)
    }

    /// Write an attribute through the dispatch gate
    pub fn store(self: &Arc<Self>, attr: &str, buf: &[u8]) -> SysfsResult<usize> {
        gate::store(self, attr, buf)
    }
}

impl fmt::Debug for ExportNode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ExportNode")
            .field("id", &self.id)
            .field("name", &self.name)
            .field("kind", &self.kind)
            .field("attached", &self.is_attached())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::SysfsError;

    #[test]
    fn test_names() {
        let gate = Arc::new(QueueGate::new());
        let hctx = Arc::new(HwQueue::new(3, None));
        let ctx = Arc::new(SwCtx::new(12));

        assert_eq!(ExportNode::device("mq", gate.clone()).name(), "mq");
        assert_eq!(ExportNode::hw_queue(&hctx, gate.clone()).name(), "3");
        assert_eq!(ExportNode::sw_ctx(&ctx, gate).name(), "cpu12");
    }

    #[test]
    fn test_unique_ids() {
        let gate = Arc::new(QueueGate::new());
        let a = ExportNode::device("mq", gate.clone());
        let b = ExportNode::device("mq", gate);
        assert_ne!(a.id(), b.id());
    }

    #[test]
    fn test_attr_listing() {
        let gate = Arc::new(QueueGate::new());
        let ctx = Arc::new(SwCtx::new(0));
        let node = ExportNode::sw_ctx(&ctx, gate.clone());
        assert_eq!(node.attr_names(), ["dispatched", "merged", "completed", "rq_list"]);
        assert_eq!(node.attr_mode("merged").map(|m| m.bits()), Ok(0o444));

        let root = ExportNode::device("mq", gate);
        assert!(root.attr_names().is_empty());
        assert_eq!(
            root.attr_mode("queued"),
            Err(SysfsError::UnknownAttribute("queued".into()))
        );
    }

    #[test]
    fn test_node_does_not_own_queue() {
        let gate = Arc::new(QueueGate::new());
        let hctx = Arc::new(HwQueue::new(0, None));
        let node = ExportNode::hw_queue(&hctx, gate);
        assert_eq!(Arc::strong_count(&hctx), 1);
        drop(hctx);

        let mut page = Page::new(64);
        assert_eq!(node.show("queued", &mut page), Err(SysfsError::Gone));
        assert!(page.is_empty());
    }
}
