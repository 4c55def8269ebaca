#![forbid(unsafe_code)]

//! Notification hubs.
//!
//! A [`Dep`] is attached to every reactive property and to every observed
//! object or array. Whoever is evaluating when the property is read (see
//! [`tracking`](crate::tracking)) becomes a subscriber; writing the property
//! calls [`Dep::notify`], which runs [`Subscriber::update`] on each of them.
//!
//! # Invariants
//!
//! 1. A subscriber appears at most once in a dependency's list.
//! 2. `notify` works on a snapshot taken before the first `update` call, so
//!    removal during notification never skips or repeats a subscriber.
//! 3. Subscribers are held weakly; dead entries are pruned on `notify`.

use std::cell::{Cell, RefCell};
use std::fmt;
use std::rc::{Rc, Weak};

use crate::tracking;

thread_local! {
    static NEXT_DEP_ID: Cell<u64> = const { Cell::new(1) };
    static NEXT_SUBSCRIBER_ID: Cell<u64> = const { Cell::new(1) };
}

/// Opaque, process-unique (per thread) dependency identifier.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct DepId(u64);

impl DepId {
    fn next() -> Self {
        NEXT_DEP_ID.with(|id| {
            let raw = id.get();
            id.set(raw + 1);
            Self(raw)
        })
    }

    #[must_use]
    pub const fn raw(self) -> u64 {
        self.0
    }
}

impl fmt::Debug for DepId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "DepId({})", self.0)
    }
}

/// Identifier of a subscriber (in practice, a [`Watcher`](crate::Watcher)).
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SubscriberId(u64);

impl SubscriberId {
    /// Allocate a fresh identifier.
    #[must_use]
    pub fn next() -> Self {
        NEXT_SUBSCRIBER_ID.with(|id| {
            let raw = id.get();
            id.set(raw + 1);
            Self(raw)
        })
    }

    #[must_use]
    pub const fn raw(self) -> u64 {
        self.0
    }
}

impl fmt::Debug for SubscriberId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "SubscriberId({})", self.0)
    }
}

/// Something that can depend on a [`Dep`] and be told when it changes.
pub trait Subscriber {
    fn subscriber_id(&self) -> SubscriberId;

    /// Record that `dep` was read during the current evaluation.
    fn add_dep(&self, dep: &Dep);

    /// React to a change of one of the dependencies.
    fn update(&self);
}

struct DepInner {
    id: DepId,
    subs: RefCell<Vec<(SubscriberId, Weak<dyn Subscriber>)>>,
}

/// A notification hub with an ordered set of subscribers.
///
/// Cloning a `Dep` creates a new handle to the same hub.
#[derive(Clone)]
pub struct Dep {
    inner: Rc<DepInner>,
}

impl Default for Dep {
    fn default() -> Self {
        Self::new()
    }
}

impl Dep {
    #[must_use]
    pub fn new() -> Self {
        Self {
            inner: Rc::new(DepInner {
                id: DepId::next(),
                subs: RefCell::new(Vec::new()),
            }),
        }
    }

    #[must_use]
    pub fn id(&self) -> DepId {
        self.inner.id
    }

    /// Add a subscriber. Adding the same id twice is a no-op.
    pub fn add_sub(&self, id: SubscriberId, sub: Weak<dyn Subscriber>) {
        let mut subs = self.inner.subs.borrow_mut();
        if subs.iter().any(|(existing, _)| *existing == id) {
            return;
        }
        subs.push((id, sub));
    }

    /// Remove a subscriber. Removing an absent id is a no-op.
    pub fn remove_sub(&self, id: SubscriberId) {
        self.inner
            .subs
            .borrow_mut()
            .retain(|(existing, _)| *existing != id);
    }

    /// Register this dependency with whoever is currently evaluating.
    pub fn depend(&self) {
        if let Some(target) = tracking::current_target() {
            target.add_dep(self);
        }
    }

    /// Notify every subscriber present at the time of the call.
    pub fn notify(&self) {
        let snapshot: Vec<Rc<dyn Subscriber>> = {
            let mut subs = self.inner.subs.borrow_mut();
            subs.retain(|(_, weak)| weak.strong_count() > 0);
            subs.iter().filter_map(|(_, weak)| weak.upgrade()).collect()
        };
        for sub in snapshot {
            sub.update();
        }
    }

    /// Number of live subscribers.
    #[must_use]
    pub fn subscriber_count(&self) -> usize {
        self.inner
            .subs
            .borrow()
            .iter()
            .filter(|(_, weak)| weak.strong_count() > 0)
            .count()
    }

    #[must_use]
    pub fn has_subscriber(&self, id: SubscriberId) -> bool {
        self.inner
            .subs
            .borrow()
            .iter()
            .any(|(existing, weak)| *existing == id && weak.strong_count() > 0)
    }

    #[must_use]
    pub fn ptr_eq(&self, other: &Self) -> bool {
        Rc::ptr_eq(&self.inner, &other.inner)
    }
}

impl fmt::Debug for Dep {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Dep")
            .field("id", &self.inner.id)
            .field("subscribers", &self.subscriber_count())
            .finish()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    struct Counter {
        id: SubscriberId,
        hits: Cell<u32>,
        on_update: RefCell<Option<Box<dyn Fn()>>>,
    }

    impl Counter {
        fn new() -> Rc<Self> {
            Rc::new(Self {
                id: SubscriberId::next(),
                hits: Cell::new(0),
                on_update: RefCell::new(None),
            })
        }
    }

    impl Subscriber for Counter {
        fn subscriber_id(&self) -> SubscriberId {
            self.id
        }

        fn add_dep(&self, dep: &Dep) {
            let _ = dep;
        }

        fn update(&self) {
            self.hits.set(self.hits.get() + 1);
            if let Some(f) = self.on_update.borrow().as_ref() {
                f();
            }
        }
    }

    fn weak_of(counter: &Rc<Counter>) -> Weak<dyn Subscriber> {
        let weak: Weak<Counter> = Rc::downgrade(counter);
        weak
    }

    #[test]
    fn ids_are_unique() {
        assert_ne!(Dep::new().id(), Dep::new().id());
    }

    #[test]
    fn add_sub_is_idempotent() {
        let dep = Dep::new();
        let c = Counter::new();
        dep.add_sub(c.id, weak_of(&c));
        dep.add_sub(c.id, weak_of(&c));
        assert_eq!(dep.subscriber_count(), 1);
        dep.notify();
        assert_eq!(c.hits.get(), 1);
    }

    #[test]
    fn notify_tolerates_removal_mid_pass() {
        let dep = Dep::new();
        let a = Counter::new();
        let b = Counter::new();
        let dep_clone = dep.clone();
        let b_id = b.id;
        *a.on_update.borrow_mut() = Some(Box::new(move || dep_clone.remove_sub(b_id)));
        dep.add_sub(a.id, weak_of(&a));
        dep.add_sub(b.id, weak_of(&b));

        dep.notify();
        // b was in the snapshot, so it still ran this pass.
        assert_eq!(a.hits.get(), 1);
        assert_eq!(b.hits.get(), 1);

        dep.notify();
        assert_eq!(a.hits.get(), 2);
        assert_eq!(b.hits.get(), 1);
    }

    #[test]
    fn dead_subscribers_are_pruned() {
        let dep = Dep::new();
        {
            let c = Counter::new();
            dep.add_sub(c.id, weak_of(&c));
            assert_eq!(dep.subscriber_count(), 1);
        }
        assert_eq!(dep.subscriber_count(), 0);
        dep.notify();
    }

    #[test]
    fn remove_absent_is_noop() {
        let dep = Dep::new();
        dep.remove_sub(SubscriberId::next());
        assert_eq!(dep.subscriber_count(), 0);
    }
}
