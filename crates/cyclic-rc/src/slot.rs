//! Counted slot: the header embedded in every managed allocation, and the
//! trial-deletion operations over it.
//!
//! Traversals use explicit work stacks, so graph depth is bounded by heap
//! size rather than by the call stack.

use std::cell::RefCell;
use std::ptr::NonNull;

use crate::collector::Collector;
use crate::mode::{self, Mode};
use crate::state::RcState;
use crate::trace::{Tracer, VisitTag};

/// Reports the value's out-edges.
pub type TraceFn<M> = unsafe fn(NonNull<Header<M>>, &mut Tracer);
/// Drops the value in place, leaving the allocation.
pub type DropFn<M> = unsafe fn(NonNull<Header<M>>);
/// Frees the allocation. The value must already be dropped.
pub type DeallocFn<M> = unsafe fn(NonNull<Header<M>>);

/// Counted slot stored at offset zero of every managed allocation.
///
/// The function pointers are filled in at allocation time with the concrete
/// value type, so the collector never needs to know it.
#[doc(hidden)]
#[repr(C)]
pub struct Header<M: Mode> {
    pub(crate) state: RcState<M::Word>,
    pub(crate) trace_fn: TraceFn<M>,
    pub(crate) drop_fn: DropFn<M>,
    pub(crate) dealloc_fn: DeallocFn<M>,
}

impl<M: Mode> Header<M> {
    pub(crate) fn new(
        acyclic: bool,
        trace_fn: TraceFn<M>,
        drop_fn: DropFn<M>,
        dealloc_fn: DeallocFn<M>,
    ) -> Self {
        Self {
            state: RcState::new(acyclic),
            trace_fn,
            drop_fn,
            dealloc_fn,
        }
    }
}

/// Borrow the state cell of a live header.
///
/// # Safety
///
/// `header` must point to an allocation that has not been deallocated.
#[inline]
pub(crate) unsafe fn state<'a, M: Mode>(header: NonNull<Header<M>>) -> &'a RcState<M::Word> {
    // SAFETY: Caller guarantees the allocation is live
    unsafe { &(*header.as_ptr()).state }
}

/// Free the allocation once nothing can reach it any more: the value is gone,
/// no handle points at it and no buffer holds it.
///
/// # Safety
///
/// `header` must be live and not referenced by the free queue.
pub(crate) unsafe fn dealloc_if_unreachable<M: Mode>(header: NonNull<Header<M>>) -> bool {
    // SAFETY: Caller guarantees the allocation is live
    let s = unsafe { state(header) };
    if s.is_dropped() && s.is_count_zero() && !s.is_buffered() {
        // SAFETY: Nothing references the allocation any more
        unsafe { ((*header.as_ptr()).dealloc_fn)(header) };
        true
    } else {
        false
    }
}

// ============================================================================
// Reference counting
// ============================================================================

/// Count a new handle.
///
/// # Safety
///
/// `header` must be live and the caller must already own a handle to it.
#[inline]
pub(crate) unsafe fn increase_refcount<M: Mode>(header: NonNull<Header<M>>) {
    // SAFETY: Caller guarantees the allocation is live
    unsafe { state(header) }.increase_count();
}

/// Drop one handle.
///
/// A count reaching zero releases the object. A nonzero count makes it a
/// possible cycle root. Handles to objects already queued for destruction
/// only decrement, and free the allocation when they were the last.
///
/// # Safety
///
/// `header` must be live and the caller must give up one counted handle.
pub(crate) unsafe fn decrease_refcount<M: Mode>(header: NonNull<Header<M>>) {
    let handled = M::with_collector(|cell| {
        // SAFETY: Caller guarantees the allocation is live
        let s = unsafe { state(header) };
        let count = s.decrease_count();
        if s.is_doomed() {
            // SAFETY: The dropped value no longer owns the allocation
            unsafe { dealloc_if_unreachable(header) };
        } else if count == 0 {
            // SAFETY: Count reached zero while live
            unsafe { release(header, cell) };
        } else {
            // SAFETY: The object is still owned
            unsafe { possible_root(header, cell) };
        }
    });

    if handled.is_none() {
        // SAFETY: Caller guarantees the allocation is live
        unsafe { decrease_detached(header) };
    }
}

/// Decrement without a collector, used after this thread's collector is gone.
///
/// Values are dropped inline. Nothing can be buffered at this point.
unsafe fn decrease_detached<M: Mode>(header: NonNull<Header<M>>) {
    // SAFETY: Caller guarantees the allocation is live
    let s = unsafe { state(header) };
    let count = s.decrease_count();
    if !s.is_doomed() && count == 0 {
        s.mark_black();
        s.mark_doomed();
        // SAFETY: Count reached zero, nothing else drops the value
        unsafe { call_destructor(header) };
    }
    // SAFETY: Dropped values no longer own the allocation
    unsafe { dealloc_if_unreachable(header) };
}

/// Count reached zero: queue the object for destruction and drain the queue
/// unless a drain or a collection is already running on this thread.
///
/// Children are decremented when the value is dropped by the drain, which
/// keeps the stack flat however long the chain being freed is.
unsafe fn release<M: Mode>(header: NonNull<Header<M>>, cell: &RefCell<Collector<M>>) {
    // SAFETY: Caller guarantees the allocation is live
    let s = unsafe { state(header) };
    if s.is_doomed() {
        return;
    }
    s.mark_black();
    s.mark_doomed();
    crate::metrics::record_release();

    let collecting = match cell.try_borrow_mut() {
        Ok(mut collector) => {
            collector.enqueue_free(header);
            collector.is_collecting()
        }
        // Only reachable if a Trace or Drop impl re-enters the collector while
        // it is borrowed; the object leaks rather than corrupting the queue.
        Err(_) => return,
    };

    if !collecting && !mode::is_freeing::<M>() {
        crate::collector::process_free_objects(cell);
    }
}

/// Buffer the object as a cycle-root candidate unless it is acyclic, already
/// a candidate, or already buffered.
unsafe fn possible_root<M: Mode>(header: NonNull<Header<M>>, cell: &RefCell<Collector<M>>) {
    // SAFETY: Caller guarantees the allocation is live
    let s = unsafe { state(header) };
    if s.is_acyclic() || s.is_purple() {
        return;
    }
    s.mark_purple();
    if s.is_buffered() {
        return;
    }
    if let Ok(mut collector) = cell.try_borrow_mut() {
        collector.add_young(header);
    }
}

/// Drop the value, once.
///
/// The value is flagged dead before its destructor runs, so handles reached
/// from inside that destructor see it as gone, and flagged dropped after, so
/// the allocation outlives the destructor.
///
/// # Safety
///
/// `header` must be live, doomed, and its value not yet dropped.
pub(crate) unsafe fn call_destructor<M: Mode>(header: NonNull<Header<M>>) {
    // SAFETY: Caller guarantees the allocation is live
    let s = unsafe { state(header) };
    debug_assert!(s.is_doomed() && !s.is_dead());
    s.mark_dead();
    // SAFETY: The value is still initialized and nothing else drops it
    unsafe { ((*header.as_ptr()).drop_fn)(header) };
    s.mark_dropped();
}

// ============================================================================
// Trial deletion
// ============================================================================

/// Reusable traversal state for one collection.
pub(crate) struct Scratch<M: Mode> {
    tracer: Tracer,
    edges: Vec<NonNull<Header<M>>>,
    pending: Vec<NonNull<Header<M>>>,
    black: Vec<NonNull<Header<M>>>,
}

impl<M: Mode> Scratch<M> {
    pub(crate) fn new() -> Self {
        Self {
            tracer: Tracer::for_mode(M::MULTITHREADED),
            edges: Vec::new(),
            pending: Vec::new(),
            black: Vec::new(),
        }
    }

    /// End of pass: unlock whatever the traversals locked.
    pub(crate) fn finish_pass(&mut self) {
        self.tracer.release_locks();
    }
}

/// Report the children of `header` into `tracer`, then push each one that
/// takes part in cycle collection onto `out`.
///
/// Acyclic children are never trial-decremented, and doomed ones belong to a
/// previous collection, so neither is pushed.
unsafe fn children<M: Mode>(
    header: NonNull<Header<M>>,
    tracer: &mut Tracer,
    tag: VisitTag,
    out: &mut Vec<NonNull<Header<M>>>,
) {
    tracer.begin(tag);
    // SAFETY: Caller guarantees the allocation is live
    unsafe { ((*header.as_ptr()).trace_fn)(header, tracer) };
    for edge in tracer.drain() {
        let child = edge.cast::<Header<M>>();
        // SAFETY: Every reported edge is an owned, hence live, handle
        let s = unsafe { state(child) };
        if !s.is_acyclic() && !s.is_doomed() {
            out.push(child);
        }
    }
}

/// Gray the subgraph reachable from `root`, removing each internal edge from
/// its target's count.
///
/// # Safety
///
/// Every object reachable from `root` must be live.
pub(crate) unsafe fn mark_gray<M: Mode>(root: NonNull<Header<M>>, scratch: &mut Scratch<M>) {
    // SAFETY: Caller guarantees the allocation is live
    let s = unsafe { state(root) };
    if s.is_gray() || s.is_acyclic() {
        return;
    }
    s.mark_gray();

    let Scratch {
        tracer,
        edges,
        pending,
        ..
    } = scratch;
    pending.push(root);
    while let Some(node) = pending.pop() {
        // SAFETY: Gray objects are live for the whole collection
        unsafe { children(node, tracer, VisitTag::MarkGray, edges) };
        for child in edges.drain(..) {
            // SAFETY: Pushed by `children`, so live
            let c = unsafe { state(child) };
            c.trial_decrement();
            if !c.is_gray() {
                c.mark_gray();
                pending.push(child);
            }
        }
    }
}

/// Decide the fate of the gray subgraph under `root`: anything still counted
/// from outside is restored, the rest turns white.
///
/// # Safety
///
/// Every object reachable from `root` must be live.
pub(crate) unsafe fn scan<M: Mode>(root: NonNull<Header<M>>, scratch: &mut Scratch<M>) {
    let Scratch {
        tracer,
        edges,
        pending,
        black,
    } = scratch;
    pending.push(root);
    while let Some(node) = pending.pop() {
        // SAFETY: Reachable from a buffered root, so live
        let s = unsafe { state(node) };
        if !s.is_gray() {
            continue;
        }
        if s.is_count_zero() {
            s.mark_white();
            // SAFETY: Live, see above
            unsafe { children(node, tracer, VisitTag::Scan, pending) };
        } else {
            // SAFETY: Live, see above
            unsafe { scan_black(node, tracer, edges, black) };
        }
    }
}

/// Restore the counts of the subgraph under `root`, which is reachable from
/// outside after all.
unsafe fn scan_black<M: Mode>(
    root: NonNull<Header<M>>,
    tracer: &mut Tracer,
    edges: &mut Vec<NonNull<Header<M>>>,
    black: &mut Vec<NonNull<Header<M>>>,
) {
    // SAFETY: Caller guarantees the allocation is live
    unsafe { state(root) }.mark_black();
    black.push(root);
    while let Some(node) = black.pop() {
        // SAFETY: Blackened nodes are live
        unsafe { children(node, tracer, VisitTag::ScanBlack, edges) };
        for child in edges.drain(..) {
            // SAFETY: Pushed by `children`, so live
            let c = unsafe { state(child) };
            c.restore_count();
            if !c.is_black() {
                c.mark_black();
                black.push(child);
            }
        }
    }
}

/// Gather every white object reachable from `root` into `to_free`.
///
/// Each edge leaving a collected object gets its trial decrement back, so
/// once the garbage values are dropped every target has been decremented
/// exactly once per handle. Collected objects are only blackened here; the
/// caller dooms them once every root of the pass is done, so that `doomed`
/// keeps meaning "excluded from this pass's trial decrements".
///
/// Returns the number of objects collected.
///
/// # Safety
///
/// Every object reachable from `root` must be live.
pub(crate) unsafe fn collect_white<M: Mode>(
    root: NonNull<Header<M>>,
    scratch: &mut Scratch<M>,
    to_free: &mut Vec<NonNull<Header<M>>>,
) -> usize {
    // SAFETY: Caller guarantees the allocation is live
    let s = unsafe { state(root) };
    if !s.is_white() {
        return 0;
    }
    s.mark_black();
    to_free.push(root);
    let mut collected = 1;

    let Scratch {
        tracer, pending, ..
    } = scratch;
    pending.push(root);
    while let Some(node) = pending.pop() {
        tracer.begin(VisitTag::CollectWhite);
        // SAFETY: White objects are live until drained
        unsafe { ((*node.as_ptr()).trace_fn)(node, tracer) };
        for edge in tracer.drain() {
            let child = edge.cast::<Header<M>>();
            // SAFETY: Targets of owned handles are live
            let c = unsafe { state(child) };
            if c.is_acyclic() || c.is_doomed() {
                continue;
            }
            c.restore_count();
            if c.is_white() {
                c.mark_black();
                to_free.push(child);
                pending.push(child);
                collected += 1;
            }
        }
    }
    collected
}
