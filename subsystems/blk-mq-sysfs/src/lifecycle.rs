//! # Node Lifecycle Manager
//!
//! Builds and tears down the three-level export tree of a device queue.
//!
//! ```text
//!   Unregistered ──register_disk──▶ Initializing ──all attached──▶ Registered
//!        ▲                               │                            │
//!        │                          attach failed                unregister_disk
//!        │                         (full unwind)                      │
//!        │                               ▼                            ▼
//!        └───────────────────────────────┴─────────────────────  Unregistering
//! ```
//!
//! Attach order is root, then each hardware queue followed by its contexts.
//! Detach order is the reverse: contexts, their hardware queue, and the root
//! last. Hardware queues with no mapped context are never attached.
//!
//! Every transition runs inside a CPU hotplug section, since the context set
//! of each hardware queue follows the CPU topology.

use alloc::sync::Arc;
use alloc::vec::Vec;

use log::{debug, info, warn};

use crate::config::MqSysfsConfig;
use crate::cpumask::CpuMask;
use crate::error::{ExportError, RegistrationStage, SysfsError, SysfsResult};
use crate::export::{ExportBackend, KobjAction, Parent};
use crate::gate::QueueGate;
use crate::hotplug::{CpuHotplug, HotplugGuard};
use crate::node::ExportNode;
use crate::page::Page;
use crate::queue::{DeviceQueue, Disk, HwQueue};

/// Registration state of a device queue's export tree
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RegistrationState {
    /// No node attached
    Unregistered,
    /// Nodes being built and attached
    Initializing,
    /// Tree fully attached
    Registered,
    /// Tree being detached
    Unregistering,
}

type AttachFailure = (RegistrationStage, ExportError);

/// Nodes of one hardware queue
struct HwNodes {
    queue_num: u32,
    node: Arc<ExportNode>,
    ctxs: Vec<(u32, Arc<ExportNode>)>,
}

impl HwNodes {
    fn build(hctx: &Arc<HwQueue>, gate: &Arc<QueueGate>) -> Self {
        Self {
            queue_num: hctx.queue_num(),
            node: ExportNode::hw_queue(hctx, Arc::clone(gate)),
            ctxs: hctx
                .ctxs()
                .iter()
                .map(|ctx| (ctx.cpu(), ExportNode::sw_ctx(ctx, Arc::clone(gate))))
                .collect(),
        }
    }
}

/// Export tree of one device queue
pub(crate) struct MqTree {
    state: RegistrationState,
    root: Option<Arc<ExportNode>>,
    hw: Vec<HwNodes>,
}

impl MqTree {
    pub(crate) const fn new() -> Self {
        Self {
            state: RegistrationState::Unregistered,
            root: None,
            hw: Vec::new(),
        }
    }

    pub(crate) fn state(&self) -> RegistrationState {
        self.state
    }

    fn build_hw(&mut self, queue: &DeviceQueue) {
        self.hw = queue
            .hw_queues()
            .iter()
            .map(|hctx| HwNodes::build(hctx, queue.gate()))
            .collect();
    }

    fn release(&mut self) {
        self.hw.clear();
        self.root = None;
    }
}

// =============================================================================
// MANAGER
// =============================================================================

/// Registers device queues with an export backend
pub struct MqSysfs {
    config: MqSysfsConfig,
    backend: Arc<dyn ExportBackend>,
    hotplug: Arc<dyn CpuHotplug>,
}

impl MqSysfs {
    /// Create a manager; the configuration is validated
    pub fn new(
        config: MqSysfsConfig,
        backend: Arc<dyn ExportBackend>,
        hotplug: Arc<dyn CpuHotplug>,
    ) -> SysfsResult<Self> {
        config.validate()?;
        Ok(Self {
            config,
            backend,
            hotplug,
        })
    }

    /// Active configuration
    pub fn config(&self) -> &MqSysfsConfig {
        &self.config
    }

    /// Enter a CPU hotplug section
    pub fn hotplug_section(&self) -> HotplugGuard<'_> {
        HotplugGuard::acquire(&*self.hotplug)
    }

    /// Fresh output page sized per the configuration
    pub fn page(&self) -> Page {
        Page::new(self.config.page_size)
    }

    /// Build and attach the export tree of `disk`
    ///
    /// On failure everything attached so far is detached again, the queue is
    /// left `Unregistered`, and the failing step is reported.
    pub fn register_disk(&self, disk: &Disk) -> SysfsResult<()> {
        let _guard = self.hotplug_section();
        let queue = disk.queue();
        let mut tree = queue.tree.lock();

        if tree.state != RegistrationState::Unregistered {
            return Err(SysfsError::InvalidState {
                expected: RegistrationState::Unregistered,
                found: tree.state,
            });
        }
        tree.state = RegistrationState::Initializing;

        let root = ExportNode::device(self.config.group_name, Arc::clone(queue.gate()));
        tree.root = Some(Arc::clone(&root));
        tree.build_hw(queue);

        let attached = self
            .attach(&root, Parent::Device(disk.name()))
            .map_err(|e| (RegistrationStage::Root, e))
            .and_then(|()| self.attach_hw_layer(&root, &tree.hw));

        if let Err((stage, cause)) = attached {
            warn!(
                "blk-mq-sysfs: {} registration failed at {}: {}, rolling back",
                disk.name(),
                stage,
                cause
            );
            self.detach_hw_layer(&tree.hw);
            self.detach(&root);
            tree.release();
            tree.state = RegistrationState::Unregistered;
            return Err(SysfsError::PartialRegistration { stage, cause });
        }

        self.backend.uevent(&root, KobjAction::Add);
        tree.state = RegistrationState::Registered;
        info!(
            "blk-mq-sysfs: registered {}/{} ({} hw queues)",
            disk.name(),
            self.config.group_name,
            tree.hw.iter().filter(|h| h.node.is_attached()).count()
        );
        Ok(())
    }

    /// Detach and release the export tree of `disk`
    pub fn unregister_disk(&self, disk: &Disk) -> SysfsResult<()> {
        let _guard = self.hotplug_section();
        let queue = disk.queue();
        let mut tree = queue.tree.lock();

        if tree.state != RegistrationState::Registered {
            return Err(SysfsError::InvalidState {
                expected: RegistrationState::Registered,
                found: tree.state,
            });
        }
        tree.state = RegistrationState::Unregistering;

        self.detach_hw_layer(&tree.hw);
        if let Some(root) = tree.root.as_ref() {
            self.backend.uevent(root, KobjAction::Remove);
            self.detach(root);
        }
        tree.release();
        tree.state = RegistrationState::Unregistered;

        info!(
            "blk-mq-sysfs: unregistered {}/{}",
            disk.name(),
            self.config.group_name
        );
        Ok(())
    }

    /// Detach every hardware queue and its contexts, keeping the root
    ///
    /// `guard` must be a section of this manager's hotplug lock. A no-op
    /// unless the tree is registered.
    pub fn unregister_hw_queues(
        &self,
        queue: &DeviceQueue,
        guard: &HotplugGuard<'_>,
    ) -> SysfsResult<()> {
        self.check_section(guard)?;
        let mut tree = queue.tree.lock();
        if tree.state != RegistrationState::Registered {
            return Ok(());
        }
        self.detach_hw_layer(&tree.hw);
        tree.hw.clear();
        Ok(())
    }

    /// Re-derive the hardware queue layer from the current topology
    ///
    /// Any layer still attached is detached first. A no-op unless the tree is
    /// registered. A failed attach leaves the layer empty and the root in
    /// place.
    pub fn register_hw_queues(
        &self,
        queue: &DeviceQueue,
        guard: &HotplugGuard<'_>,
    ) -> SysfsResult<()> {
        self.check_section(guard)?;
        let mut tree = queue.tree.lock();
        if tree.state != RegistrationState::Registered {
            return Ok(());
        }
        let Some(root) = tree.root.clone() else {
            return Ok(());
        };

        self.detach_hw_layer(&tree.hw);
        tree.build_hw(queue);

        if let Err((stage, cause)) = self.attach_hw_layer(&root, &tree.hw) {
            warn!(
                "blk-mq-sysfs: hw queue re-registration failed at {}: {}",
                stage, cause
            );
            self.detach_hw_layer(&tree.hw);
            tree.hw.clear();
            return Err(SysfsError::PartialRegistration { stage, cause });
        }
        Ok(())
    }

    /// Apply a new CPU → hardware queue map and rebuild the hardware layer
    pub fn remap_queues(
        &self,
        queue: &DeviceQueue,
        online: &CpuMask,
        map: &[u32],
    ) -> SysfsResult<()> {
        let guard = self.hotplug_section();
        self.unregister_hw_queues(queue, &guard)?;
        let mapped = queue.remap(online, map);
        self.register_hw_queues(queue, &guard)?;
        mapped
    }

    fn check_section(&self, guard: &HotplugGuard<'_>) -> SysfsResult<()> {
        if guard.holds(&*self.hotplug) {
            Ok(())
        } else {
            Err(SysfsError::ForeignHotplugSection)
        }
    }

    // -------------------------------------------------------------------------
    // attach / detach
    // -------------------------------------------------------------------------

    fn attach(&self, node: &Arc<ExportNode>, parent: Parent<'_>) -> Result<(), ExportError> {
        self.backend.add(node, parent)?;
        node.set_attached(true);
        debug!("blk-mq-sysfs: attached {} node {}", node.kind().as_str(), node.name());
        Ok(())
    }

    fn detach(&self, node: &Arc<ExportNode>) {
        if !node.is_attached() {
            return;
        }
        self.backend.del(node);
        node.set_attached(false);
        debug!("blk-mq-sysfs: detached {} node {}", node.kind().as_str(), node.name());
    }

    fn attach_hw_layer(
        &self,
        root: &Arc<ExportNode>,
        hw: &[HwNodes],
    ) -> Result<(), AttachFailure> {
        for h in hw.iter().filter(|h| !h.ctxs.is_empty()) {
            self.attach(&h.node, Parent::Node(root))
                .map_err(|e| (RegistrationStage::HwQueue(h.queue_num), e))?;

            for (cpu, ctx) in &h.ctxs {
                let stage = RegistrationStage::SwCtx {
                    hw_queue: h.queue_num,
                    cpu: *cpu,
                };
                self.attach(ctx, Parent::Node(&h.node))
                    .map_err(|e| (stage, e))?;
            }
        }
        Ok(())
    }

    fn detach_hw_layer(&self, hw: &[HwNodes]) {
        for h in hw {
            for (_, ctx) in &h.ctxs {
                self.detach(ctx);
            }
            self.detach(&h.node);
        }
    }
}

impl core::fmt::Debug for MqSysfs {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("MqSysfs")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

// =============================================================================
// TESTS
// =============================================================================
