//! # Attribute Handlers
//!
//! Read handlers format live counters into a bounded [`Page`]; the only write
//! handler resets statistics. Handlers run with the device's serialization
//! lock held and never block on anything but the short per-list locks.

use alloc::collections::VecDeque;

use crate::error::SysfsResult;
use crate::page::{Page, Shown};
use crate::queue::{HwQueue, IoClass, RequestId, SwCtx, RQ_ENTRY_LEN};
#[cfg(feature = "stats")]
use crate::stat::StatBucket;
use crate::MAX_DISPATCH_ORDER;

/// Line appended when a pending list does not fit
pub const TRUNCATION_MARKER: &str = "\t...\n";

// =============================================================================
// SHARED FORMATTERS
// =============================================================================

/// Preview of a pending-request list
///
/// Entries are printed until the next one would not fit. The marker line is
/// then appended; if even the marker does not fit, the last printed entry is
/// dropped to make room for it, or the label when no entry was printed.
fn list_show(page: &mut Page, list: &VecDeque<RequestId>, label: &str) -> Shown {
    if !page.try_write(format_args!("{}:\n", label)) {
        return Shown::Truncated(page.len());
    }

    let mut printed = 0usize;
    for rq in list {
        if page.remaining() < RQ_ENTRY_LEN {
            if page.remaining() < TRUNCATION_MARKER.len() {
                // drop the last entry, or the label if none was printed
                let keep = if printed > 0 { page.len() - RQ_ENTRY_LEN } else { 0 };
                page.truncate(keep);
            }
            page.try_write(format_args!("{}", TRUNCATION_MARKER));
            return Shown::Truncated(page.len());
        }
        page.try_write(format_args!("\t{}\n", rq));
        printed += 1;
    }

    page.complete()
}

/// Comma-separated ascending CPU list
///
/// An id that would not fit, together with room for the closing newline, ends
/// the list early without a marker.
fn cpus_show(page: &mut Page, cpus: impl Iterator<Item = u32>) -> Shown {
    let mut shown = Shown::Complete(0);

    for (i, cpu) in cpus.enumerate() {
        let mark = page.len();
        let fits = if i == 0 {
            page.try_write(format_args!("{}", cpu))
        } else {
            page.try_write(format_args!(", {}", cpu))
        };
        if !fits || page.remaining() == 0 {
            page.truncate(mark);
            shown = Shown::Truncated(0);
            break;
        }
    }

    page.try_write(format_args!("\n"));
    match shown {
        Shown::Truncated(_) => Shown::Truncated(page.len()),
        Shown::Complete(_) => page.complete(),
    }
}

// =============================================================================
// SOFTWARE CONTEXT
// =============================================================================

pub(crate) fn ctx_dispatched_show(ctx: &SwCtx, page: &mut Page) -> SysfsResult<Shown> {
    Ok(page.emit(format_args!(
        "{} {}\n",
        ctx.dispatched(IoClass::Foreground),
        ctx.dispatched(IoClass::Background)
    )))
}

pub(crate) fn ctx_merged_show(ctx: &SwCtx, page: &mut Page) -> SysfsResult<Shown> {
    Ok(page.emit(format_args!("{}\n", ctx.merged())))
}

pub(crate) fn ctx_completed_show(ctx: &SwCtx, page: &mut Page) -> SysfsResult<Shown> {
    Ok(page.emit(format_args!(
        "{} {}\n",
        ctx.completed(IoClass::Foreground),
        ctx.completed(IoClass::Background)
    )))
}

pub(crate) fn ctx_rq_list_show(ctx: &SwCtx, page: &mut Page) -> SysfsResult<Shown> {
    let list = ctx.rq_list().lock();
    Ok(list_show(page, &list, "CTX pending"))
}

// =============================================================================
// HARDWARE QUEUE
// =============================================================================

pub(crate) fn hctx_queued_show(hctx: &HwQueue, page: &mut Page) -> SysfsResult<Shown> {
    Ok(page.emit(format_args!("{}\n", hctx.queued())))
}

pub(crate) fn hctx_run_show(hctx: &HwQueue, page: &mut Page) -> SysfsResult<Shown> {
    Ok(page.emit(format_args!("{}\n", hctx.run())))
}

pub(crate) fn hctx_dispatched_show(hctx: &HwQueue, page: &mut Page) -> SysfsResult<Shown> {
    let counts = hctx.dispatched();

    if !page.try_write(format_args!("{:8}\t{}\n", 0u32, counts[0])) {
        return Ok(Shown::Truncated(page.len()));
    }
    for i in 1..MAX_DISPATCH_ORDER {
        let batch = 1u64 << (i - 1);
        if !page.try_write(format_args!("{:8}\t{}\n", batch, counts[i])) {
            return Ok(Shown::Truncated(page.len()));
        }
    }
    Ok(page.complete())
}

pub(crate) fn hctx_pending_show(hctx: &HwQueue, page: &mut Page) -> SysfsResult<Shown> {
    let list = hctx.dispatch_list().lock();
    Ok(list_show(page, &list, "HCTX pending"))
}

pub(crate) fn hctx_tags_show(hctx: &HwQueue, page: &mut Page) -> SysfsResult<Shown> {
    match hctx.tags() {
        Some(tags) => Ok(tags.show(page)),
        None => Ok(page.complete()),
    }
}

pub(crate) fn hctx_cpus_show(hctx: &HwQueue, page: &mut Page) -> SysfsResult<Shown> {
    Ok(cpus_show(page, hctx.cpumask().iter()))
}

pub(crate) fn hctx_active_show(hctx: &HwQueue, page: &mut Page) -> SysfsResult<Shown> {
    Ok(page.emit(format_args!("{}\n", hctx.active())))
}

pub(crate) fn hctx_poll_show(hctx: &HwQueue, page: &mut Page) -> SysfsResult<Shown> {
    let (invoked, success) = hctx.poll();
    Ok(page.emit(format_args!("invoked={}, success={}\n", invoked, success)))
}

#[cfg(feature = "stats")]
pub(crate) fn hctx_stat_show(hctx: &HwQueue, page: &mut Page) -> SysfsResult<Shown> {
    let stats = hctx.stat_get();
    for bucket in StatBucket::ALL {
        if !page.try_write(format_args!("{} {}\n", bucket.label(), stats[bucket.index()])) {
            return Ok(Shown::Truncated(page.len()));
        }
    }
    Ok(page.complete())
}

/// Reset every bucket; the written bytes are ignored
#[cfg(feature = "stats")]
pub(crate) fn hctx_stat_store(hctx: &HwQueue, buf: &[u8]) -> SysfsResult<usize> {
    if buf.is_empty() {
        return Ok(0);
    }
    hctx.stat_clear();
    Ok(buf.len())
}

// =============================================================================
// TESTS
// =============================================================================

#[cfg(test)]
mod tests {
    use alloc::string::String;

    use super::*;
    use crate::config::QueueConfig;
    use crate::cpumask::CpuMask;
    use crate::queue::DeviceQueue;

    fn queue(nr_hw: u32, nr_cpus: u32) -> DeviceQueue {
        DeviceQueue::new(&QueueConfig::new(nr_hw, nr_cpus)).expect("valid config")
    }

    fn read<T>(obj: &T, show: fn(&T, &mut Page) -> SysfsResult<Shown>) -> String {
        let mut page = Page::new(4096);
        show(obj, &mut page).expect("show succeeds");
        String::from(page.as_str())
    }

    #[test]
    fn test_ctx_counters() {
        let q = queue(1, 1);
        let ctx = q.ctx(0).expect("cpu0");
        ctx.record_dispatched(IoClass::Foreground);
        ctx.record_dispatched(IoClass::Foreground);
        ctx.record_dispatched(IoClass::Background);
        ctx.record_merged();
        ctx.record_completed(IoClass::Background);

        assert_eq!(read(&**ctx, ctx_dispatched_show), "2 1\n");
        assert_eq!(read(&**ctx, ctx_merged_show), "1\n");
        assert_eq!(read(&**ctx, ctx_completed_show), "0 1\n");
    }

    #[test]
    fn test_hctx_counters() {
        let q = queue(1, 1);
        let hctx = &q.hw_queues()[0];
        hctx.record_queued();
        hctx.record_run();
        hctx.record_run();
        hctx.start_request();
        hctx.record_poll(true);

        assert_eq!(read(&**hctx, hctx_queued_show), "1\n");
        assert_eq!(read(&**hctx, hctx_run_show), "2\n");
        assert_eq!(read(&**hctx, hctx_active_show), "1\n");
        assert_eq!(read(&**hctx, hctx_poll_show), "invoked=1, success=1\n");
    }

    #[test]
    fn test_dispatched_histogram() {
        let q = queue(1, 1);
        let hctx = &q.hw_queues()[0];
        for _ in 0..5 {
            hctx.record_dispatch(0);
        }
        for _ in 0..3 {
            hctx.record_dispatch(1000);
        }

        let out = read(&**hctx, hctx_dispatched_show);
        let lines: alloc::vec::Vec<&str> = out.lines().collect();
        assert_eq!(lines.len(), MAX_DISPATCH_ORDER);
        assert_eq!(lines[0], "       0\t5");
        assert_eq!(lines[1], "       1\t0");
        assert_eq!(lines[2], "       2\t0");
        assert_eq!(
            lines[MAX_DISPATCH_ORDER - 1],
            alloc::format!("{:8}\t3", 1u64 << (MAX_DISPATCH_ORDER - 2))
        );
        assert!(out.starts_with("       0\t5\n"));
    }

    #[test]
    fn test_cpu_list() {
        let mut page = Page::new(4096);
        let shown = cpus_show(&mut page, CpuMask::from_cpus(&[0, 2, 3]).iter());
        assert_eq!(page.as_str(), "0, 2, 3\n");
        assert!(!shown.is_truncated());

        let unmapped = HwQueue::new(0, None);
        assert_eq!(read(&unmapped, hctx_cpus_show), "\n");
    }

    #[test]
    fn test_cpu_list_stops_early() {
        // 15 usable bytes hold "0, 1, 2, 3, 4" and the newline
        let mut page = Page::new(16);
        let shown = cpus_show(&mut page, CpuMask::first(64).iter());
        assert_eq!(page.as_str(), "0, 1, 2, 3, 4\n");
        assert!(shown.is_truncated());
        assert!(page.len() <= page.limit());
        assert!(!page.as_str().contains("..."));
    }

    #[test]
    fn test_cpu_list_from_mapping() {
        let q = queue(2, 6);
        assert_eq!(read(&*q.hw_queues()[0], hctx_cpus_show), "0, 2, 4\n");
        assert_eq!(read(&*q.hw_queues()[1], hctx_cpus_show), "1, 3, 5\n");
    }

    #[test]
    fn test_rq_list() {
        let q = queue(1, 1);
        let ctx = q.ctx(0).expect("cpu0");
        assert_eq!(read(&**ctx, ctx_rq_list_show), "CTX pending:\n");
        ctx.insert_request(RequestId(0x1000));
        ctx.insert_request(RequestId(0x2000));
        assert_eq!(
            read(&**ctx, ctx_rq_list_show),
            "CTX pending:\n\t0000000000001000\n\t0000000000002000\n"
        );

        let hctx = &q.hw_queues()[0];
        hctx.requeue(RequestId(7));
        assert_eq!(
            read(&**hctx, hctx_pending_show),
            "HCTX pending:\n\t0000000000000007\n"
        );
    }

    #[test]
    fn test_rq_list_truncation() {
        let mut list = VecDeque::new();
        for i in 0..1000 {
            list.push_back(RequestId(i));
        }

        for size in [64usize, 100, 4096] {
            let mut page = Page::new(size);
            let shown = list_show(&mut page, &list, "CTX pending");
            assert!(shown.is_truncated());
            assert_eq!(shown.len(), page.len());
            assert!(page.len() <= size - 1);
            assert!(page.as_str().ends_with(TRUNCATION_MARKER));
            assert_eq!(page.as_str().matches("...").count(), 1);
        }
    }

    #[test]
    fn test_rq_list_backspace() {
        // label (13) + 2 entries (36) = 49 of 51 usable bytes: the third entry
        // does not fit and neither does the marker, so one entry is dropped.
        let mut list = VecDeque::new();
        for i in 0..3 {
            list.push_back(RequestId(i));
        }
        let mut page = Page::new(52);
        let shown = list_show(&mut page, &list, "CTX pending");
        assert!(shown.is_truncated());
        assert_eq!(
            page.as_str(),
            "CTX pending:\n\t0000000000000000\n\t...\n"
        );
    }

    #[test]
    fn test_rq_list_marker_replaces_label() {
        // 16 usable bytes: the label (13) leaves no room for the marker
        let mut list = VecDeque::new();
        list.push_back(RequestId(0));
        let mut page = Page::new(17);
        let shown = list_show(&mut page, &list, "CTX pending");
        assert!(shown.is_truncated());
        assert_eq!(page.as_str(), "\t...\n");
    }

    #[test]
    fn test_tags_without_pool() {
        let hctx = HwQueue::new(0, None);
        assert_eq!(read(&hctx, hctx_tags_show), "");
    }

    #[cfg(feature = "stats")]
    #[test]
    fn test_stats_show_and_reset() {
        let q = queue(1, 2);
        let hctx = &q.hw_queues()[0];
        q.ctx(0).expect("cpu0").record_latency(StatBucket::Read, 100);
        q.ctx(1).expect("cpu1").record_latency(StatBucket::Read, 300);
        q.ctx(1).expect("cpu1").record_latency(StatBucket::FgWrite, 7);

        assert_eq!(
            read(&**hctx, hctx_stat_show),
            "read : samples=2, mean=200, min=100, max=300\n\
             write: samples=0, mean=0, min=0, max=0\n\
             fg-read: samples=0, mean=0, min=0, max=0\n\
             fg-write: samples=1, mean=7, min=7, max=7\n"
        );

        assert_eq!(hctx_stat_store(hctx, b"x"), Ok(1));
        assert_eq!(
            read(&**hctx, hctx_stat_show),
            "read : samples=0, mean=0, min=0, max=0\n\
             write: samples=0, mean=0, min=0, max=0\n\
             fg-read: samples=0, mean=0, min=0, max=0\n\
             fg-write: samples=0, mean=0, min=0, max=0\n"
        );
    }

    #[cfg(feature = "stats")]
    #[test]
    fn test_stats_empty_write() {
        let q = queue(1, 1);
        let hctx = &q.hw_queues()[0];
        q.ctx(0).expect("cpu0").record_latency(StatBucket::Write, 1);
        assert_eq!(hctx_stat_store(hctx, b""), Ok(0));
        assert_eq!(hctx.stat_get()[StatBucket::Write.index()].samples(), 1);
        assert_eq!(hctx_stat_store(hctx, b"anything at all\n"), Ok(16));
        assert_eq!(hctx.stat_get()[StatBucket::Write.index()].samples(), 0);
    }
}
