#![forbid(unsafe_code)]

//! The "currently evaluating" stack.
//!
//! Reads of reactive properties register the top of this stack as a
//! subscriber. Entries are pushed and popped exclusively through
//! [`TrackingScope`], an RAII guard, so the stack stays balanced even when a
//! getter panics and unwinds.
//!
//! A `None` entry suspends tracking for nested code (see [`untracked`]).
//!
//! # Invariants
//!
//! 1. `stack_depth()` after a scope is dropped equals the depth before it was
//!    entered.
//! 2. Scopes are strictly nested: a scope is always the top when it drops.

use std::cell::RefCell;
use std::marker::PhantomData;
use std::rc::Rc;

use crate::dep::Subscriber;

thread_local! {
    static TARGET_STACK: RefCell<Vec<Option<Rc<dyn Subscriber>>>> =
        const { RefCell::new(Vec::new()) };
}

/// Scoped acquisition of the evaluation slot.
///
/// While alive, reads are routed to the subscriber it was entered with.
#[must_use = "tracking ends as soon as the scope is dropped"]
pub struct TrackingScope {
    depth: usize,
    _not_send: PhantomData<Rc<()>>,
}

impl TrackingScope {
    /// Push `target` (or a tracking pause for `None`).
    pub fn enter(target: Option<Rc<dyn Subscriber>>) -> Self {
        let depth = TARGET_STACK.with(|stack| {
            let mut stack = stack.borrow_mut();
            stack.push(target);
            stack.len()
        });
        Self {
            depth,
            _not_send: PhantomData,
        }
    }
}

impl Drop for TrackingScope {
    fn drop(&mut self) {
        TARGET_STACK.with(|stack| {
            let mut stack = stack.borrow_mut();
            debug_assert_eq!(stack.len(), self.depth, "tracking scopes dropped out of order");
            stack.truncate(self.depth.saturating_sub(1));
        });
    }
}

/// The subscriber reads should currently be attributed to, if any.
#[must_use]
pub fn current_target() -> Option<Rc<dyn Subscriber>> {
    TARGET_STACK.with(|stack| stack.borrow().last().cloned().flatten())
}

#[must_use]
pub fn is_tracking() -> bool {
    TARGET_STACK.with(|stack| matches!(stack.borrow().last(), Some(Some(_))))
}

/// Run `f` with dependency tracking suspended.
pub fn untracked<R>(f: impl FnOnce() -> R) -> R {
    let _scope = TrackingScope::enter(None);
    f()
}

#[must_use]
pub fn stack_depth() -> usize {
    TARGET_STACK.with(|stack| stack.borrow().len())
}
