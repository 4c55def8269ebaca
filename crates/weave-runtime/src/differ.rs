#![forbid(unsafe_code)]

//! Batched, ordered application of deferred mutations.
//!
//! Directive bindings never touch the document from inside a watcher
//! callback. They [`append`](Differ::append) a handler keyed by
//! `(depth, kind, target)` and the differ runs everything on the next turn.
//!
//! # Ordering
//!
//! One flush pass runs groups in ascending depth. Within a depth, all
//! `Repeat` handlers run first, then `Shown`, then `Element`, since repeat
//! and shown handlers create and destroy the elements that element handlers
//! target. Handlers scheduled during a pass run in the next pass; the flush
//! loops until a pass schedules nothing.
//!
//! # Invariants
//!
//! 1. At most one `Repeat` and one `Shown` handler survives per target and
//!    depth (later registrations overwrite earlier ones). `Element` handlers
//!    all run, in registration order.
//! 2. Appending while no flush is running arms exactly one turn task.
//! 3. A flush never runs more than `max_flush_passes` passes; leftover work
//!    is kept and the differ re-arms.
//!
//! # Failure Modes
//!
//! - **Self-rescheduling handler**: the pass cap trips, an error is logged
//!   and the remaining work moves to the next turn.
//! - **Handler panics**: the panic propagates; the differ leaves its
//!   flushing state so later appends re-arm normally.

use std::cell::{Cell, RefCell};
use std::collections::BTreeMap;
use std::fmt;
use std::rc::{Rc, Weak};

use indexmap::IndexMap;
use smallvec::SmallVec;
use tracing::{debug_span, error, field, trace};
use weave_dom::NodeId;

use crate::turn::TurnScheduler;

/// Deferred mutation.
pub type Handler = Box<dyn FnOnce()>;

/// Mutation category. The derived order is the flush order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum MutationKind {
    Repeat,
    Shown,
    Element,
}

/// What a deferred mutation targets.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TargetKey {
    Block(u64),
    Node(NodeId),
    Watcher(u64),
}

#[derive(Default)]
struct Group {
    repeat: IndexMap<TargetKey, Handler>,
    shown: IndexMap<TargetKey, Handler>,
    element: IndexMap<TargetKey, SmallVec<[Handler; 2]>>,
}

impl Group {
    fn len(&self) -> usize {
        self.repeat.len() + self.shown.len() + self.element.values().map(SmallVec::len).sum::<usize>()
    }

    fn run(self) {
        for (_, handler) in self.repeat {
            handler();
        }
        for (_, handler) in self.shown {
            handler();
        }
        for (_, handlers) in self.element {
            for handler in handlers {
                handler();
            }
        }
    }
}

struct DifferInner {
    groups: RefCell<BTreeMap<u32, Group>>,
    hooks: RefCell<Vec<Handler>>,
    armed: Cell<bool>,
    flushing: Cell<bool>,
    scheduler: Rc<dyn TurnScheduler>,
    max_passes: usize,
    trace_passes: bool,
}

/// Per-instance mutation batching scheduler.
#[derive(Clone)]
pub struct Differ {
    inner: Rc<DifferInner>,
}

impl Differ {
    pub fn new(scheduler: Rc<dyn TurnScheduler>, max_passes: usize, trace_passes: bool) -> Self {
        Self {
            inner: Rc::new(DifferInner {
                groups: RefCell::new(BTreeMap::new()),
                hooks: RefCell::new(Vec::new()),
                armed: Cell::new(false),
                flushing: Cell::new(false),
                scheduler,
                max_passes: max_passes.max(1),
                trace_passes,
            }),
        }
    }

    /// Register a deferred mutation.
    pub fn append(&self, kind: MutationKind, depth: u32, key: TargetKey, handler: Handler) {
        {
            let mut groups = self.inner.groups.borrow_mut();
            let group = groups.entry(depth).or_default();
            match kind {
                MutationKind::Repeat => {
                    group.repeat.insert(key, handler);
                }
                MutationKind::Shown => {
                    group.shown.insert(key, handler);
                }
                MutationKind::Element => group.element.entry(key).or_default().push(handler),
            }
        }
        self.arm();
    }

    /// Register a one-shot hook that runs after the next flush completes.
    pub fn then(&self, hook: impl FnOnce() + 'static) {
        self.inner.hooks.borrow_mut().push(Box::new(hook));
        self.arm();
    }

    fn arm(&self) {
        if self.inner.armed.get() || self.inner.flushing.get() {
            return;
        }
        self.inner.armed.set(true);
        let weak: Weak<DifferInner> = Rc::downgrade(&self.inner);
        self.inner.scheduler.schedule(Box::new(move || {
            if let Some(inner) = weak.upgrade() {
                Differ { inner }.flush();
            }
        }));
    }

    /// Run every pending mutation, then the post-flush hooks.
    ///
    /// A nested call from inside a handler returns immediately; the running
    /// flush picks the new work up in its next pass.
    pub fn flush(&self) {
        struct Flushing<'a>(&'a DifferInner);
        impl Drop for Flushing<'_> {
            fn drop(&mut self) {
                self.0.flushing.set(false);
            }
        }

        if self.inner.flushing.get() {
            return;
        }
        self.inner.armed.set(false);
        self.inner.flushing.set(true);
        let guard = Flushing(&self.inner);

        let span = debug_span!("differ.flush", passes = field::Empty);
        let _enter = span.enter();
        let mut passes = 0usize;
        let mut overflow = false;
        loop {
            let groups = std::mem::take(&mut *self.inner.groups.borrow_mut());
            if groups.is_empty() {
                break;
            }
            if passes >= self.inner.max_passes {
                let pending: usize = groups.values().map(Group::len).sum();
                error!(passes, pending, "differ flush did not settle; deferring the rest to the next turn");
                // Nothing ran since the take, so the live map is still empty.
                *self.inner.groups.borrow_mut() = groups;
                overflow = true;
                break;
            }
            passes += 1;
            if self.inner.trace_passes {
                let pending: usize = groups.values().map(Group::len).sum();
                trace!(pass = passes, pending, "differ pass");
            }
            for (_, group) in groups {
                group.run();
            }
        }
        span.record("passes", passes);
        drop(guard);

        if overflow {
            self.arm();
        }
        let hooks = std::mem::take(&mut *self.inner.hooks.borrow_mut());
        for hook in hooks {
            hook();
        }
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.inner.groups.borrow().is_empty() && self.inner.hooks.borrow().is_empty()
    }

    /// Number of queued handlers (hooks excluded).
    #[must_use]
    pub fn pending_len(&self) -> usize {
        self.inner.groups.borrow().values().map(Group::len).sum()
    }

    #[must_use]
    pub fn is_flushing(&self) -> bool {
        self.inner.flushing.get()
    }

    #[must_use]
    pub fn is_armed(&self) -> bool {
        self.inner.armed.get()
    }

    /// Drop all pending work and hooks.
    pub fn clear(&self) {
        let groups = std::mem::take(&mut *self.inner.groups.borrow_mut());
        let hooks = std::mem::take(&mut *self.inner.hooks.borrow_mut());
        drop(groups);
        drop(hooks);
    }
}

impl fmt::Debug for Differ {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Differ")
            .field("pending", &self.pending_len())
            .field("armed", &self.inner.armed.get())
            .field("flushing", &self.inner.flushing.get())
            .finish()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::turn::TurnQueue;

    fn differ(max_passes: usize) -> (Differ, TurnQueue) {
        let queue = TurnQueue::new();
        let differ = Differ::new(Rc::new(queue.clone()), max_passes, false);
        (differ, queue)
    }

    fn log() -> Rc<RefCell<Vec<String>>> {
        Rc::new(RefCell::new(Vec::new()))
    }

    fn push(log: &Rc<RefCell<Vec<String>>>, entry: &str) -> Handler {
        let log = log.clone();
        let entry = entry.to_string();
        Box::new(move || log.borrow_mut().push(entry))
    }

    #[test]
    fn repeat_runs_before_shown_at_same_depth() {
        let (d, _) = differ(8);
        let out = log();
        d.append(MutationKind::Shown, 2, TargetKey::Block(1), push(&out, "shown"));
        d.append(MutationKind::Element, 2, TargetKey::Watcher(1), push(&out, "element"));
        d.append(MutationKind::Repeat, 2, TargetKey::Block(2), push(&out, "repeat"));
        d.flush();
        assert_eq!(out.borrow().as_slice(), ["repeat", "shown", "element"]);
    }

    #[test]
    fn shallower_depth_runs_first() {
        let (d, _) = differ(8);
        let out = log();
        d.append(MutationKind::Repeat, 5, TargetKey::Block(1), push(&out, "deep"));
        d.append(MutationKind::Element, 1, TargetKey::Watcher(1), push(&out, "shallow"));
        d.flush();
        assert_eq!(out.borrow().as_slice(), ["shallow", "deep"]);
    }

    #[test]
    fn structural_kinds_overwrite_element_kind_accumulates() {
        let (d, _) = differ(8);
        let out = log();
        d.append(MutationKind::Shown, 1, TargetKey::Block(1), push(&out, "shown-1"));
        d.append(MutationKind::Shown, 1, TargetKey::Block(1), push(&out, "shown-2"));
        d.append(MutationKind::Element, 1, TargetKey::Watcher(9), push(&out, "el-1"));
        d.append(MutationKind::Element, 1, TargetKey::Watcher(9), push(&out, "el-2"));
        assert_eq!(d.pending_len(), 3);
        d.flush();
        assert_eq!(out.borrow().as_slice(), ["shown-2", "el-1", "el-2"]);
        assert!(d.is_empty());
    }

    #[test]
    fn one_timer_per_turn() {
        let (d, queue) = differ(8);
        let out = log();
        for i in 0..5 {
            d.append(MutationKind::Element, 0, TargetKey::Watcher(i), push(&out, "x"));
        }
        assert_eq!(queue.pending(), 1);
        assert_eq!(queue.run_pending(), 1);
        assert_eq!(out.borrow().len(), 5);
        assert!(!d.is_armed());
    }

    #[test]
    fn work_scheduled_during_flush_runs_in_same_flush() {
        let (d, queue) = differ(8);
        let out = log();
        let d2 = d.clone();
        let out2 = out.clone();
        d.append(
            MutationKind::Repeat,
            1,
            TargetKey::Block(1),
            Box::new(move || {
                out2.borrow_mut().push("outer".into());
                d2.append(MutationKind::Element, 2, TargetKey::Watcher(1), push(&out2, "inner"));
            }),
        );
        queue.run_pending();
        assert_eq!(out.borrow().as_slice(), ["outer", "inner"]);
        assert_eq!(queue.pending(), 0);
    }

    #[test]
    fn runaway_flush_is_capped_and_rearmed() {
        let (d, queue) = differ(3);
        let runs = Rc::new(Cell::new(0));

        fn reschedule(d: Differ, runs: Rc<Cell<u32>>) {
            let d2 = d.clone();
            d.append(
                MutationKind::Element,
                0,
                TargetKey::Watcher(1),
                Box::new(move || {
                    runs.set(runs.get() + 1);
                    reschedule(d2, runs);
                }),
            );
        }

        reschedule(d.clone(), runs.clone());
        queue.run_pending();
        assert_eq!(runs.get(), 3);
        assert_eq!(d.pending_len(), 1);
        assert_eq!(queue.pending(), 1);
        d.clear();
        queue.run_pending();
        assert_eq!(runs.get(), 3);
    }

    #[test]
    fn then_hooks_run_after_flush() {
        let (d, queue) = differ(8);
        let out = log();
        let out2 = out.clone();
        d.then(move || out2.borrow_mut().push("hook".into()));
        d.append(MutationKind::Element, 0, TargetKey::Watcher(1), push(&out, "work"));
        assert_eq!(queue.pending(), 1);
        queue.run_pending();
        assert_eq!(out.borrow().as_slice(), ["work", "hook"]);

        queue.run_pending();
        assert_eq!(out.borrow().len(), 2);
    }

    #[test]
    fn panicking_handler_leaves_differ_usable() {
        let (d, queue) = differ(8);
        d.append(MutationKind::Element, 0, TargetKey::Watcher(1), Box::new(|| panic!("handler failed")));
        let result = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| d.flush()));
        assert!(result.is_err());
        assert!(!d.is_flushing());
        queue.clear();
        let out = log();
        d.append(MutationKind::Element, 0, TargetKey::Watcher(2), push(&out, "after"));
        assert_eq!(queue.pending(), 1);
        queue.run_pending();
        assert_eq!(out.borrow().as_slice(), ["after"]);
    }
}
