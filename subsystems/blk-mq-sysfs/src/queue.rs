//! # Queue Topology
//!
//! The device-side objects the export tree observes.
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────────┐
//! │  DeviceQueue                                                     │
//! │   ├── hw_queues: [HwQueue 0] [HwQueue 1] ... [HwQueue N-1]       │
//! │   │                  │            │                              │
//! │   │            ctxs ─┘      ctxs ─┘   (CPU → hw queue mapping)   │
//! │   │                                                              │
//! │   └── ctxs:      [SwCtx cpu0] [SwCtx cpu1] ... [SwCtx cpuM-1]    │
//! └──────────────────────────────────────────────────────────────────┘
//! ```
//!
//! The device owns every hardware queue and software context. A hardware
//! queue lists the contexts currently mapped to it; offline CPUs map to no
//! hardware queue. Counters are updated by the dispatch path through the
//! `record_*` methods and only read by the attribute handlers.

use alloc::collections::VecDeque;
use alloc::string::String;
use alloc::sync::Arc;
use alloc::vec::Vec;
use core::fmt;
use core::sync::atomic::{AtomicU32, AtomicU64, Ordering};

use spin::{Mutex, RwLock};

use crate::config::QueueConfig;
use crate::cpumask::CpuMask;
use crate::error::{SysfsError, SysfsResult};
use crate::gate::QueueGate;
use crate::hotplug::HotplugGuard;
use crate::lifecycle::{MqTree, RegistrationState};
#[cfg(feature = "stats")]
use crate::stat::{RqStat, StatBucket, NR_STAT_BUCKETS};
use crate::tags::{TagPool, TagSet};
use crate::MAX_DISPATCH_ORDER;

/// Marker for a context bound to no hardware queue
const NO_HW_QUEUE: u32 = u32::MAX;

// =============================================================================
// REQUESTS
// =============================================================================

/// Opaque request handle shown in pending-list previews
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct RequestId(pub u64);

impl fmt::Display for RequestId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:016x}", self.0)
    }
}

/// Bytes one pending-list entry occupies: tab, 16 hex digits, newline
pub const RQ_ENTRY_LEN: usize = 2 * core::mem::size_of::<u64>() + 2;

/// Priority class of a request
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(usize)]
pub enum IoClass {
    /// Asynchronous / background
    Background = 0,
    /// Synchronous / foreground
    Foreground = 1,
}

/// Histogram bucket for a dispatch batch of `queued` requests
pub fn queued_to_index(queued: usize) -> usize {
    if queued == 0 {
        return 0;
    }
    (queued.ilog2() as usize + 1).min(MAX_DISPATCH_ORDER - 1)
}

// =============================================================================
// SOFTWARE CONTEXT
// =============================================================================

/// Per-CPU submission context
pub struct SwCtx {
    cpu: u32,
    hw_queue: AtomicU32,
    rq_dispatched: [AtomicU64; 2],
    rq_merged: AtomicU64,
    rq_completed: [AtomicU64; 2],
    rq_list: Mutex<VecDeque<RequestId>>,
    #[cfg(feature = "stats")]
    stat: [Mutex<RqStat>; NR_STAT_BUCKETS],
}

impl SwCtx {
    /// Create the context for `cpu`
    pub fn new(cpu: u32) -> Self {
        Self {
            cpu,
            hw_queue: AtomicU32::new(NO_HW_QUEUE),
            rq_dispatched: Default::default(),
            rq_merged: AtomicU64::new(0),
            rq_completed: Default::default(),
            rq_list: Mutex::new(VecDeque::new()),
            #[cfg(feature = "stats")]
            stat: core::array::from_fn(|_| Mutex::new(RqStat::new())),
        }
    }

    /// CPU this context belongs to
    pub fn cpu(&self) -> u32 {
        self.cpu
    }

    /// Hardware queue this context is mapped to
    pub fn hw_queue(&self) -> Option<u32> {
        match self.hw_queue.load(Ordering::Acquire) {
            NO_HW_QUEUE => None,
            idx => Some(idx),
        }
    }

    fn bind(&self, hw_queue: Option<u32>) {
        self.hw_queue
            .store(hw_queue.unwrap_or(NO_HW_QUEUE), Ordering::Release);
    }

    /// Count a dispatched request
    pub fn record_dispatched(&self, class: IoClass) {
        self.rq_dispatched[class as usize].fetch_add(1, Ordering::Relaxed);
    }

    /// Count a merged request
    pub fn record_merged(&self) {
        self.rq_merged.fetch_add(1, Ordering::Relaxed);
    }

    /// Count a completed request
    pub fn record_completed(&self, class: IoClass) {
        self.rq_completed[class as usize].fetch_add(1, Ordering::Relaxed);
    }

    /// Dispatched count for a class
    pub fn dispatched(&self, class: IoClass) -> u64 {
        self.rq_dispatched[class as usize].load(Ordering::Relaxed)
    }

    /// Merged count
    pub fn merged(&self) -> u64 {
        self.rq_merged.load(Ordering::Relaxed)
    }

    /// Completed count for a class
    pub fn completed(&self, class: IoClass) -> u64 {
        self.rq_completed[class as usize].load(Ordering::Relaxed)
    }

    /// Queue a request on this context
    pub fn insert_request(&self, rq: RequestId) {
        self.rq_list.lock().push_back(rq);
    }

    /// Remove a queued request
    pub fn remove_request(&self, rq: RequestId) -> bool {
        let mut list = self.rq_list.lock();
        match list.iter().position(|&r| r == rq) {
            Some(pos) => list.remove(pos).is_some(),
            None => false,
        }
    }

    /// Move every queued request out
    pub fn take_requests(&self) -> Vec<RequestId> {
        self.rq_list.lock().drain(..).collect()
    }

    /// Pending-request list, locked for the caller
    pub(crate) fn rq_list(&self) -> &Mutex<VecDeque<RequestId>> {
        &self.rq_list
    }

    /// Record a latency/throughput sample
    #[cfg(feature = "stats")]
    pub fn record_latency(&self, bucket: StatBucket, value: u64) {
        self.stat[bucket.index()].lock().add(value);
    }

    /// Snapshot of one bucket
    #[cfg(feature = "stats")]
    pub fn stat(&self, bucket: StatBucket) -> RqStat {
        *self.stat[bucket.index()].lock()
    }

    /// Empty every bucket, one at a time
    #[cfg(feature = "stats")]
    pub fn reset_stats(&self) {
        for bucket in &self.stat {
            bucket.lock().reset();
        }
    }
}

impl fmt::Debug for SwCtx {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SwCtx")
            .field("cpu", &self.cpu)
            .field("hw_queue", &self.hw_queue())
            .finish_non_exhaustive()
    }
}

// =============================================================================
// HARDWARE QUEUE
// =============================================================================

/// Hardware dispatch queue
pub struct HwQueue {
    queue_num: u32,
    queued: AtomicU64,
    run: AtomicU64,
    dispatched: [AtomicU64; MAX_DISPATCH_ORDER],
    nr_active: AtomicU32,
    poll_invoked: AtomicU64,
    poll_success: AtomicU64,
    cpumask: RwLock<CpuMask>,
    ctxs: RwLock<Vec<Arc<SwCtx>>>,
    dispatch: Mutex<VecDeque<RequestId>>,
    tags: Option<Arc<dyn TagPool>>,
}

impl HwQueue {
    /// Create hardware queue `queue_num`
    pub fn new(queue_num: u32, tags: Option<Arc<dyn TagPool>>) -> Self {
        Self {
            queue_num,
            queued: AtomicU64::new(0),
            run: AtomicU64::new(0),
            dispatched: Default::default(),
            nr_active: AtomicU32::new(0),
            poll_invoked: AtomicU64::new(0),
            poll_success: AtomicU64::new(0),
            cpumask: RwLock::new(CpuMask::new()),
            ctxs: RwLock::new(Vec::new()),
            dispatch: Mutex::new(VecDeque::new()),
            tags,
        }
    }

    /// Index within the device
    pub fn queue_num(&self) -> u32 {
        self.queue_num
    }

    /// Number of software contexts mapped here
    pub fn nr_ctx(&self) -> usize {
        self.ctxs.read().len()
    }

    /// Contexts mapped here, in mapping order
    pub fn ctxs(&self) -> Vec<Arc<SwCtx>> {
        self.ctxs.read().clone()
    }

    /// CPUs served by this queue
    pub fn cpumask(&self) -> CpuMask {
        *self.cpumask.read()
    }

    /// Tag pool, if any
    pub fn tags(&self) -> Option<&Arc<dyn TagPool>> {
        self.tags.as_ref()
    }

    /// Count an allocated request
    pub fn record_queued(&self) {
        self.queued.fetch_add(1, Ordering::Relaxed);
    }

    /// Count a queue run
    pub fn record_run(&self) {
        self.run.fetch_add(1, Ordering::Relaxed);
    }

    /// Count a dispatch batch of `batch` requests
    pub fn record_dispatch(&self, batch: usize) {
        self.dispatched[queued_to_index(batch)].fetch_add(1, Ordering::Relaxed);
    }

    /// Count a poll attempt
    pub fn record_poll(&self, success: bool) {
        self.poll_invoked.fetch_add(1, Ordering::Relaxed);
        if success {
            self.poll_success.fetch_add(1, Ordering::Relaxed);
        }
    }

    /// A request became in-flight
    pub fn start_request(&self) {
        self.nr_active.fetch_add(1, Ordering::Relaxed);
    }

    /// An in-flight request finished
    pub fn finish_request(&self) {
        let _ = self
            .nr_active
            .fetch_update(Ordering::Relaxed, Ordering::Relaxed, |n| n.checked_sub(1));
    }

    /// Allocated request count
    pub fn queued(&self) -> u64 {
        self.queued.load(Ordering::Relaxed)
    }

    /// Queue run count
    pub fn run(&self) -> u64 {
        self.run.load(Ordering::Relaxed)
    }

    /// Dispatch histogram snapshot
    pub fn dispatched(&self) -> [u64; MAX_DISPATCH_ORDER] {
        core::array::from_fn(|i| self.dispatched[i].load(Ordering::Relaxed))
    }

    /// In-flight request count
    pub fn active(&self) -> u32 {
        self.nr_active.load(Ordering::Relaxed)
    }

    /// Poll counters as `(invoked, success)`
    pub fn poll(&self) -> (u64, u64) {
        (
            self.poll_invoked.load(Ordering::Relaxed),
            self.poll_success.load(Ordering::Relaxed),
        )
    }

    /// Put a request back on the dispatch list
    pub fn requeue(&self, rq: RequestId) {
        self.dispatch.lock().push_back(rq);
    }

    /// Take the next request from the dispatch list
    pub fn pop_dispatch(&self) -> Option<RequestId> {
        self.dispatch.lock().pop_front()
    }

    /// Pending-dispatch list, locked for the caller
    pub(crate) fn dispatch_list(&self) -> &Mutex<VecDeque<RequestId>> {
        &self.dispatch
    }

    /// Sum of each statistic bucket over the mapped contexts
    #[cfg(feature = "stats")]
    pub fn stat_get(&self) -> [RqStat; NR_STAT_BUCKETS] {
        let mut sum = [RqStat::new(); NR_STAT_BUCKETS];
        for ctx in self.ctxs.read().iter() {
            for bucket in StatBucket::ALL {
                sum[bucket.index()].merge(&ctx.stat(bucket));
            }
        }
        sum
    }

    /// Empty every bucket of every mapped context
    #[cfg(feature = "stats")]
    pub fn stat_clear(&self) {
        for ctx in self.ctxs.read().iter() {
            ctx.reset_stats();
        }
    }

    fn unmap(&self) {
        self.cpumask.write().zero();
        self.ctxs.write().clear();
    }

    fn map(&self, ctx: &Arc<SwCtx>) {
        self.cpumask.write().set(ctx.cpu());
        self.ctxs.write().push(Arc::clone(ctx));
    }
}

impl fmt::Debug for HwQueue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HwQueue")
            .field("queue_num", &self.queue_num)
            .field("cpumask", &self.cpumask())
            .finish_non_exhaustive()
    }
}

// =============================================================================
// DEVICE QUEUE
// =============================================================================

/// Round-robin CPU → hardware queue map
pub fn default_cpu_map(nr_cpus: u32, nr_hw_queues: u32) -> Vec<u32> {
    (0..nr_cpus).map(|cpu| cpu % nr_hw_queues.max(1)).collect()
}

/// Block device submission queue
pub struct DeviceQueue {
    hw_queues: Vec<Arc<HwQueue>>,
    ctxs: Vec<Arc<SwCtx>>,
    gate: Arc<QueueGate>,
    pub(crate) tree: Mutex<MqTree>,
}

impl DeviceQueue {
    /// Build a queue with every CPU online and the round-robin map
    pub fn new(config: &QueueConfig) -> SysfsResult<Self> {
        config.validate()?;

        let hw_queues = (0..config.nr_hw_queues)
            .map(|i| {
                let tags: Arc<dyn TagPool> =
                    Arc::new(TagSet::new(config.queue_depth, config.reserved_tags));
                Arc::new(HwQueue::new(i, Some(tags)))
            })
            .collect();
        let ctxs = (0..config.nr_cpus).map(|cpu| Arc::new(SwCtx::new(cpu))).collect();

        let queue = Self {
            hw_queues,
            ctxs,
            gate: Arc::new(QueueGate::new()),
            tree: Mutex::new(MqTree::new()),
        };
        let map = default_cpu_map(config.nr_cpus, config.nr_hw_queues);
        queue.remap(&CpuMask::first(config.nr_cpus), &map)?;
        Ok(queue)
    }

    /// Rebuild CPU → hardware queue membership
    ///
    /// `map[cpu]` names the hardware queue for each possible CPU; CPUs not in
    /// `online` are left unmapped. Must run inside a hotplug section. Only an
    /// unregistered queue may be remapped here; a registered one goes through
    /// [`MqSysfs::remap_queues`](crate::lifecycle::MqSysfs::remap_queues).
    pub fn map_queues(
        &self,
        online: &CpuMask,
        map: &[u32],
        _guard: &HotplugGuard<'_>,
    ) -> SysfsResult<()> {
        let tree = self.tree.lock();
        if tree.state() != RegistrationState::Unregistered {
            return Err(SysfsError::InvalidState {
                expected: RegistrationState::Unregistered,
                found: tree.state(),
            });
        }
        self.remap(online, map)
    }

    pub(crate) fn remap(&self, online: &CpuMask, map: &[u32]) -> SysfsResult<()> {
        if map.len() != self.ctxs.len() {
            return Err(SysfsError::InvalidConfig("map does not cover every cpu"));
        }
        if map.iter().any(|&hw| hw as usize >= self.hw_queues.len()) {
            return Err(SysfsError::InvalidConfig("map names a missing hw queue"));
        }

        for hctx in &self.hw_queues {
            hctx.unmap();
        }
        for ctx in &self.ctxs {
            if !online.test(ctx.cpu()) {
                ctx.bind(None);
                continue;
            }
            let hw = map[ctx.cpu() as usize];
            self.hw_queues[hw as usize].map(ctx);
            ctx.bind(Some(hw));
        }
        Ok(())
    }

    /// Hardware queues in index order
    pub fn hw_queues(&self) -> &[Arc<HwQueue>] {
        &self.hw_queues
    }

    /// Hardware queue by index
    pub fn hw_queue(&self, index: u32) -> Option<&Arc<HwQueue>> {
        self.hw_queues.get(index as usize)
    }

    /// Software context of a CPU
    pub fn ctx(&self, cpu: u32) -> Option<&Arc<SwCtx>> {
        self.ctxs.get(cpu as usize)
    }

    /// Liveness gate shared with the export nodes
    pub fn gate(&self) -> &Arc<QueueGate> {
        &self.gate
    }

    /// Start shutdown; no attribute handler runs once this returns
    pub fn mark_dying(&self) {
        self.gate.mark_dying();
    }

    /// Whether shutdown has started
    pub fn is_dying(&self) -> bool {
        self.gate.is_dying()
    }

    /// Export tree registration state
    pub fn registration_state(&self) -> RegistrationState {
        self.tree.lock().state()
    }
}

impl fmt::Debug for DeviceQueue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DeviceQueue")
            .field("nr_hw_queues", &self.hw_queues.len())
            .field("nr_cpus", &self.ctxs.len())
            .field("dying", &self.is_dying())
            .finish_non_exhaustive()
    }
}

/// A named block device and its queue
#[derive(Debug)]
pub struct Disk {
    name: String,
    queue: Arc<DeviceQueue>,
}

impl Disk {
    /// Create a disk
    pub fn new(name: impl Into<String>, queue: Arc<DeviceQueue>) -> Self {
        Self {
            name: name.into(),
            queue,
        }
    }

    /// Device name
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Device queue
    pub fn queue(&self) -> &Arc<DeviceQueue> {
        &self.queue
    }
}

// =============================================================================
// TESTS
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hotplug::HotplugLock;

    fn queue(nr_hw: u32, nr_cpus: u32) -> DeviceQueue {
        DeviceQueue::new(&QueueConfig::new(nr_hw, nr_cpus)).expect("valid config")
    }

    #[test]
    fn test_queued_to_index() {
        assert_eq!(queued_to_index(0), 0);
        assert_eq!(queued_to_index(1), 1);
        assert_eq!(queued_to_index(2), 2);
        assert_eq!(queued_to_index(3), 2);
        assert_eq!(queued_to_index(32), 6);
        assert_eq!(queued_to_index(1 << 20), MAX_DISPATCH_ORDER - 1);
    }

    #[test]
    fn test_round_robin_mapping() {
        let q = queue(2, 4);
        let cpus: Vec<u32> = q.hw_queues()[1].cpumask().iter().collect();
        assert_eq!(cpus, [1, 3]);
        assert_eq!(q.ctx(2).and_then(|c| c.hw_queue()), Some(0));
    }

    #[test]
    fn test_offline_cpus_unmapped() {
        let q = queue(4, 4);
        let lock = HotplugLock::new();
        let guard = HotplugGuard::acquire(&lock);
        q.map_queues(&CpuMask::from_cpus(&[0, 1]), &default_cpu_map(4, 4), &guard)
            .expect("valid map");
        drop(guard);

        assert_eq!(q.hw_queues()[0].nr_ctx(), 1);
        assert_eq!(q.hw_queues()[2].nr_ctx(), 0);
        assert_eq!(q.ctx(3).and_then(|c| c.hw_queue()), None);
    }

    #[test]
    fn test_bad_map_rejected() {
        let q = queue(2, 2);
        let lock = HotplugLock::new();
        let guard = HotplugGuard::acquire(&lock);
        assert!(q.map_queues(&CpuMask::first(2), &[0], &guard).is_err());
        assert!(q.map_queues(&CpuMask::first(2), &[0, 5], &guard).is_err());
    }

    #[test]
    fn test_counters() {
        let q = queue(1, 1);
        let hctx = &q.hw_queues()[0];
        hctx.record_dispatch(0);
        hctx.record_dispatch(4);
        hctx.record_poll(true);
        hctx.record_poll(false);
        hctx.start_request();
        hctx.finish_request();
        hctx.finish_request();
        assert_eq!(hctx.dispatched()[0], 1);
        assert_eq!(hctx.dispatched()[3], 1);
        assert_eq!(hctx.poll(), (2, 1));
        assert_eq!(hctx.active(), 0);

        let ctx = q.ctx(0).expect("cpu0");
        ctx.insert_request(RequestId(1));
        ctx.insert_request(RequestId(2));
        assert!(ctx.remove_request(RequestId(1)));
        assert!(!ctx.remove_request(RequestId(9)));
        assert_eq!(ctx.take_requests(), [RequestId(2)]);
    }

    #[cfg(feature = "stats")]
    #[test]
    fn test_stat_aggregation() {
        let q = queue(1, 2);
        q.ctx(0).expect("cpu0").record_latency(StatBucket::Read, 10);
        q.ctx(1).expect("cpu1").record_latency(StatBucket::Read, 20);
        let sum = q.hw_queues()[0].stat_get();
        assert_eq!(sum[0].samples(), 2);
        assert_eq!(sum[0].mean(), 15);
        q.hw_queues()[0].stat_clear();
        assert_eq!(q.hw_queues()[0].stat_get()[0].samples(), 0);
    }

    #[test]
    fn test_request_id_width() {
        use alloc::format;
        assert_eq!(format!("\t{}\n", RequestId(0xabc)).len(), RQ_ENTRY_LEN);
    }
}
