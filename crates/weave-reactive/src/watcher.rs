#![forbid(unsafe_code)]

//! Dependency-tracking evaluators.
//!
//! A [`Watcher`] runs a getter inside a [`TrackingScope`], collects the
//! dependencies it read, and reconciles its subscriptions against the
//! previous evaluation. When one of them is notified the watcher either
//! re-runs immediately and calls its callback (eager) or marks itself dirty
//! for the next [`evaluate`](Watcher::evaluate) (lazy).
//!
//! # Invariants
//!
//! 1. After every evaluation the watcher is subscribed to exactly the
//!    dependencies read during that evaluation.
//! 2. An eager callback fires when the new value differs strictly from the
//!    old one, and always for composite values and deep watchers.
//! 3. A lazy watcher recomputes at most once per dependency change.
//! 4. After [`teardown`](Watcher::teardown) no dependency references the
//!    watcher and no callback fires again. Teardown is idempotent.
//! 5. A callback that re-triggers its own watcher does not re-enter; the
//!    watcher re-runs after the callback returns instead.
//!
//! # Failure Modes
//!
//! - **Getter panics**: the panic propagates to whoever triggered the
//!   evaluation. The tracking stack is still popped and the subscriptions
//!   read before the panic are kept, so the watcher stays live.
//! - **Self-feeding callback**: re-runs are capped; after the cap a warning
//!   is logged and the loop stops.

use std::cell::{Cell, RefCell};
use std::collections::{BTreeMap, HashSet};
use std::fmt;
use std::rc::{Rc, Weak};

use tracing::warn;

use crate::dep::{Dep, DepId, Subscriber, SubscriberId};
use crate::tracking::TrackingScope;
use crate::value::Value;

/// Maximum consecutive self-triggered re-runs of one eager watcher.
const MAX_RERUNS: u32 = 100;

type Getter = Box<dyn Fn() -> Value>;
type Callback = Box<dyn FnMut(&Value, &Value)>;

/// Construction flags.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct WatcherOptions {
    /// Defer recomputation until [`Watcher::evaluate`].
    pub lazy: bool,
    /// Track every nested read of the produced value.
    pub deep: bool,
}

impl WatcherOptions {
    #[must_use]
    pub fn lazy() -> Self {
        Self {
            lazy: true,
            deep: false,
        }
    }

    #[must_use]
    pub fn deep() -> Self {
        Self {
            lazy: false,
            deep: true,
        }
    }
}

struct WatcherInner {
    id: SubscriberId,
    this: Weak<WatcherInner>,
    getter: Getter,
    callback: RefCell<Option<Callback>>,
    lazy: bool,
    deep: bool,
    dirty: Cell<bool>,
    active: Cell<bool>,
    running: Cell<bool>,
    rerun: Cell<bool>,
    value: RefCell<Value>,
    deps: RefCell<BTreeMap<DepId, Dep>>,
    new_deps: RefCell<BTreeMap<DepId, Dep>>,
    owner: RefCell<Option<Weak<WatcherSet>>>,
    evaluations: Cell<u64>,
}

impl WatcherInner {
    fn get(&self) -> Value {
        struct Reconcile<'a>(&'a WatcherInner);
        impl Drop for Reconcile<'_> {
            fn drop(&mut self) {
                self.0.cleanup_deps();
            }
        }

        // Declared first so it drops last, after the scope is popped.
        let _reconcile = Reconcile(self);
        let target = self.this.upgrade().map(|rc| rc as Rc<dyn Subscriber>);
        let _scope = TrackingScope::enter(target);
        self.evaluations.set(self.evaluations.get() + 1);
        let value = (self.getter)();
        if self.deep {
            traverse(&value, &mut HashSet::new());
        }
        value
    }

    fn cleanup_deps(&self) {
        let fresh = std::mem::take(&mut *self.new_deps.borrow_mut());
        let stale = std::mem::replace(&mut *self.deps.borrow_mut(), fresh);
        let keep_current = self.active.get();
        for (id, dep) in stale {
            if !keep_current || !self.deps.borrow().contains_key(&id) {
                dep.remove_sub(self.id);
            }
        }
        if !keep_current {
            for (_, dep) in std::mem::take(&mut *self.deps.borrow_mut()) {
                dep.remove_sub(self.id);
            }
        }
    }

    fn run(&self) {
        struct Running<'a>(&'a WatcherInner);
        impl Drop for Running<'_> {
            fn drop(&mut self) {
                self.0.rerun.set(false);
                self.0.running.set(false);
            }
        }

        if !self.active.get() {
            return;
        }
        if self.running.get() {
            self.rerun.set(true);
            return;
        }
        self.running.set(true);
        let _running = Running(self);
        let mut reruns = 0;
        loop {
            self.rerun.set(false);
            self.run_once();
            if !self.rerun.get() || !self.active.get() {
                break;
            }
            reruns += 1;
            if reruns >= MAX_RERUNS {
                warn!(watcher = self.id.raw(), reruns, "watcher keeps re-triggering itself; giving up");
                break;
            }
        }
    }

    fn run_once(&self) {
        let new = self.get();
        let old = self.value.replace(new.clone());
        let changed = !new.same_value(&old) || new.is_composite() || self.deep;
        if !changed || !self.active.get() {
            return;
        }
        let callback = self.callback.borrow_mut().take();
        if let Some(mut cb) = callback {
            cb(&new, &old);
            if self.active.get() {
                let mut slot = self.callback.borrow_mut();
                if slot.is_none() {
                    *slot = Some(cb);
                }
            }
        }
    }

    fn teardown(&self) {
        if !self.active.replace(false) {
            return;
        }
        let owner = self.owner.borrow_mut().take();
        if let Some(owner) = owner.and_then(|w| w.upgrade()) {
            owner.remove(self.id);
        }
        let deps = std::mem::take(&mut *self.deps.borrow_mut());
        for dep in deps.values() {
            dep.remove_sub(self.id);
        }
        let callback = self.callback.borrow_mut().take();
        drop(callback);
    }
}

impl Subscriber for WatcherInner {
    fn subscriber_id(&self) -> SubscriberId {
        self.id
    }

    fn add_dep(&self, dep: &Dep) {
        if !self.active.get() {
            return;
        }
        let id = dep.id();
        {
            let mut new_deps = self.new_deps.borrow_mut();
            if new_deps.contains_key(&id) {
                return;
            }
            new_deps.insert(id, dep.clone());
        }
        if !self.deps.borrow().contains_key(&id) {
            let weak: Weak<dyn Subscriber> = self.this.clone();
            dep.add_sub(self.id, weak);
        }
    }

    fn update(&self) {
        if !self.active.get() {
            return;
        }
        if self.lazy {
            self.dirty.set(true);
        } else {
            self.run();
        }
    }
}

impl Drop for WatcherInner {
    fn drop(&mut self) {
        for dep in self.deps.get_mut().values() {
            dep.remove_sub(self.id);
        }
        for dep in self.new_deps.get_mut().values() {
            dep.remove_sub(self.id);
        }
    }
}

/// Visit every nested member so each read registers with the current target.
fn traverse(value: &Value, seen: &mut HashSet<usize>) {
    match value {
        Value::Object(obj) => {
            if !seen.insert(obj.ptr_id()) {
                return;
            }
            for key in obj.keys() {
                traverse(&obj.get(&key), seen);
            }
        }
        Value::Array(arr) => {
            if !seen.insert(arr.ptr_id()) {
                return;
            }
            for item in arr.to_vec() {
                traverse(&item, seen);
            }
        }
        _ => {}
    }
}

/// Shared handle to a dependency-tracking evaluator.
///
/// Cloning a `Watcher` creates a new handle to the same evaluator.
#[derive(Clone)]
pub struct Watcher {
    inner: Rc<WatcherInner>,
}

impl Watcher {
    /// Eager watcher: evaluates now and calls `callback(new, old)` on change.
    pub fn new(
        getter: impl Fn() -> Value + 'static,
        callback: impl FnMut(&Value, &Value) + 'static,
    ) -> Self {
        Self::with_options(
            getter,
            Some(Box::new(callback)),
            WatcherOptions::default(),
            None,
        )
    }

    /// Lazy watcher: starts dirty, computes on [`evaluate`](Self::evaluate).
    pub fn lazy(getter: impl Fn() -> Value + 'static) -> Self {
        Self::with_options(getter, None, WatcherOptions::lazy(), None)
    }

    /// General constructor. When `owner` is given, the watcher registers in
    /// it and unregisters on teardown.
    pub fn with_options(
        getter: impl Fn() -> Value + 'static,
        callback: Option<Box<dyn FnMut(&Value, &Value)>>,
        options: WatcherOptions,
        owner: Option<&Rc<WatcherSet>>,
    ) -> Self {
        let inner = Rc::new_cyclic(|this| WatcherInner {
            id: SubscriberId::next(),
            this: this.clone(),
            getter: Box::new(getter),
            callback: RefCell::new(callback),
            lazy: options.lazy,
            deep: options.deep,
            dirty: Cell::new(options.lazy),
            active: Cell::new(true),
            running: Cell::new(false),
            rerun: Cell::new(false),
            value: RefCell::new(Value::Null),
            deps: RefCell::new(BTreeMap::new()),
            new_deps: RefCell::new(BTreeMap::new()),
            owner: RefCell::new(owner.map(Rc::downgrade)),
            evaluations: Cell::new(0),
        });
        let watcher = Self { inner };
        if let Some(owner) = owner {
            owner.add(watcher.clone());
        }
        if !options.lazy {
            let value = watcher.inner.get();
            *watcher.inner.value.borrow_mut() = value;
        }
        watcher
    }

    #[must_use]
    pub fn id(&self) -> SubscriberId {
        self.inner.id
    }

    /// Last computed value.
    #[must_use]
    pub fn value(&self) -> Value {
        self.inner.value.borrow().clone()
    }

    #[must_use]
    pub fn is_lazy(&self) -> bool {
        self.inner.lazy
    }

    #[must_use]
    pub fn is_dirty(&self) -> bool {
        self.inner.dirty.get()
    }

    #[must_use]
    pub fn is_active(&self) -> bool {
        self.inner.active.get()
    }

    /// How many times the getter has run.
    #[must_use]
    pub fn evaluations(&self) -> u64 {
        self.inner.evaluations.get()
    }

    /// Ids of the dependencies the watcher is currently subscribed to.
    #[must_use]
    pub fn dep_ids(&self) -> Vec<DepId> {
        self.inner.deps.borrow().keys().copied().collect()
    }

    #[must_use]
    pub fn depends_on(&self, dep: &Dep) -> bool {
        self.inner.deps.borrow().contains_key(&dep.id())
    }

    /// Recompute if dirty, clear the dirty flag and return the value.
    pub fn evaluate(&self) -> Value {
        if self.inner.dirty.get() && self.inner.active.get() {
            let value = self.inner.get();
            *self.inner.value.borrow_mut() = value;
            self.inner.dirty.set(false);
        }
        self.value()
    }

    /// Make the current evaluator depend on everything this watcher depends
    /// on.
    pub fn depend(&self) {
        let deps: Vec<Dep> = self.inner.deps.borrow().values().cloned().collect();
        for dep in deps {
            dep.depend();
        }
    }

    /// Behave as if a dependency changed.
    pub fn update(&self) {
        self.inner.update();
    }

    /// Unsubscribe from every dependency and drop the callback.
    pub fn teardown(&self) {
        self.inner.teardown();
    }

    #[must_use]
    pub fn ptr_eq(&self, other: &Self) -> bool {
        Rc::ptr_eq(&self.inner, &other.inner)
    }
}

impl fmt::Debug for Watcher {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Watcher")
            .field("id", &self.inner.id)
            .field("lazy", &self.inner.lazy)
            .field("dirty", &self.inner.dirty.get())
            .field("active", &self.inner.active.get())
            .field("deps", &self.inner.deps.borrow().len())
            .finish()
    }
}

// ---------------------------------------------------------------------------
// WatcherSet
// ---------------------------------------------------------------------------

/// The watchers owned by one view-model.
#[derive(Default)]
pub struct WatcherSet {
    watchers: RefCell<Vec<Watcher>>,
}

impl WatcherSet {
    #[must_use]
    pub fn new() -> Rc<Self> {
        Rc::new(Self::default())
    }

    pub fn add(&self, watcher: Watcher) {
        let mut watchers = self.watchers.borrow_mut();
        if !watchers.iter().any(|w| w.ptr_eq(&watcher)) {
            watchers.push(watcher);
        }
    }

    pub fn remove(&self, id: SubscriberId) {
        self.watchers.borrow_mut().retain(|w| w.id() != id);
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.watchers.borrow().len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.watchers.borrow().is_empty()
    }

    #[must_use]
    pub fn snapshot(&self) -> Vec<Watcher> {
        self.watchers.borrow().clone()
    }

    /// Tear down every watcher, most recently added first.
    pub fn teardown_all(&self) {
        let watchers = std::mem::take(&mut *self.watchers.borrow_mut());
        for watcher in watchers.iter().rev() {
            watcher.teardown();
        }
    }
}

impl fmt::Debug for WatcherSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WatcherSet").field("len", &self.len()).finish()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
