#![forbid(unsafe_code)]

//! Reactive keyed objects.
//!
//! Every property owns one [`Dep`]. A tracked [`get`](ReactiveObject::get)
//! subscribes the current evaluator to that dependency and, when the value
//! is itself observed, to the child's structural dependency (and to every
//! element's when the child is a collection), so membership changes reach
//! readers without per-index tracking.
//!
//! # Invariants
//!
//! 1. Keys keep insertion order.
//! 2. A write that leaves the value unchanged (see [`Value::same_value`])
//!    notifies nobody.
//! 3. No internal borrow is held while subscribers run.

use std::cell::{Cell, OnceCell, RefCell};
use std::fmt;
use std::rc::Rc;

use indexmap::IndexMap;

use crate::dep::Dep;
use crate::observer::{self, Observer};
use crate::tracking;
use crate::value::{Shallow, Value};

struct Property {
    value: Value,
    dep: Dep,
}

impl Property {
    fn new(value: Value) -> Self {
        Self {
            value,
            dep: Dep::new(),
        }
    }
}

struct ObjectInner {
    props: RefCell<IndexMap<Rc<str>, Property>>,
    observer: OnceCell<Observer>,
    frozen: Cell<bool>,
}

/// Shared handle to a keyed object whose properties are dependency-tracked.
#[derive(Clone)]
pub struct ReactiveObject {
    inner: Rc<ObjectInner>,
}

impl Default for ReactiveObject {
    fn default() -> Self {
        Self::new()
    }
}

impl ReactiveObject {
    #[must_use]
    pub fn new() -> Self {
        Self {
            inner: Rc::new(ObjectInner {
                props: RefCell::new(IndexMap::new()),
                observer: OnceCell::new(),
                frozen: Cell::new(false),
            }),
        }
    }

    pub fn from_pairs<K, I>(pairs: I) -> Self
    where
        K: Into<Rc<str>>,
        I: IntoIterator<Item = (K, Value)>,
    {
        let obj = Self::new();
        {
            let mut props = obj.inner.props.borrow_mut();
            for (key, value) in pairs {
                props.insert(key.into(), Property::new(value));
            }
        }
        obj
    }

    /// Tracked read. A missing key reads as `Null`.
    #[must_use]
    pub fn get(&self, key: &str) -> Value {
        let found = {
            let props = self.inner.props.borrow();
            props.get(key).map(|p| (p.value.clone(), p.dep.clone()))
        };
        let tracking = tracking::is_tracking();
        match found {
            Some((value, dep)) => {
                if tracking {
                    dep.depend();
                    depend_child(&value);
                }
                value
            }
            None => {
                if tracking && let Some(ob) = self.observer() {
                    ob.dep().depend();
                }
                Value::Null
            }
        }
    }

    /// Untracked read.
    #[must_use]
    pub fn peek(&self, key: &str) -> Value {
        self.inner
            .props
            .borrow()
            .get(key)
            .map(|p| p.value.clone())
            .unwrap_or_default()
    }

    /// Write an existing key, or store a brand-new one without notifying
    /// anybody. Use [`observer::set`] to add a key with notification.
    pub fn set(&self, key: &str, value: impl Into<Value>) {
        let value = value.into();
        let dep = {
            let mut props = self.inner.props.borrow_mut();
            match props.get_mut(key) {
                Some(prop) => {
                    if prop.value.same_value(&value) {
                        return;
                    }
                    prop.value = value.clone();
                    Some(prop.dep.clone())
                }
                None => {
                    props.insert(key.into(), Property::new(value.clone()));
                    None
                }
            }
        };
        if self.observer().is_some() {
            observer::observe(&value, None);
        }
        if let Some(dep) = dep {
            dep.notify();
        }
    }

    /// Whether the key exists, without tracking.
    #[must_use]
    pub fn has_own(&self, key: &str) -> bool {
        self.inner.props.borrow().contains_key(key)
    }

    /// Tracked membership test: subscribes to structural changes.
    #[must_use]
    pub fn contains_key(&self, key: &str) -> bool {
        self.depend_structure();
        self.has_own(key)
    }

    /// Tracked key list.
    #[must_use]
    pub fn keys(&self) -> Vec<Rc<str>> {
        self.depend_structure();
        self.inner.props.borrow().keys().cloned().collect()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.depend_structure();
        self.peek_len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    #[must_use]
    pub fn peek_len(&self) -> usize {
        self.inner.props.borrow().len()
    }

    /// Untracked snapshot of all entries in key order.
    #[must_use]
    pub fn peek_entries(&self) -> Vec<(Rc<str>, Value)> {
        self.inner
            .props
            .borrow()
            .iter()
            .map(|(k, p)| (k.clone(), p.value.clone()))
            .collect()
    }

    /// Dependency of a single property, if present.
    #[must_use]
    pub fn property_dep(&self, key: &str) -> Option<Dep> {
        self.inner.props.borrow().get(key).map(|p| p.dep.clone())
    }

    #[must_use]
    pub fn observer(&self) -> Option<Observer> {
        self.inner.observer.get().cloned()
    }

    /// Observe this object and everything under it. `None` when frozen.
    pub fn observe(&self) -> Option<Observer> {
        if self.inner.frozen.get() {
            return None;
        }
        if let Some(ob) = self.inner.observer.get() {
            return Some(ob.clone());
        }
        let ob = Observer::new();
        // Tag first so cyclic children find the observer already in place.
        let _ = self.inner.observer.set(ob.clone());
        for (_, value) in self.peek_entries() {
            observer::observe(&value, None);
        }
        Some(ob)
    }

    /// Mark this object as never observable. Has no effect once observed.
    pub fn freeze(&self) {
        self.inner.frozen.set(true);
    }

    #[must_use]
    pub fn is_frozen(&self) -> bool {
        self.inner.frozen.get()
    }

    pub(crate) fn define(&self, key: Rc<str>, value: Value) {
        observer::observe(&value, None);
        self.inner
            .props
            .borrow_mut()
            .insert(key, Property::new(value));
    }

    pub(crate) fn undefine(&self, key: &str) -> Option<Dep> {
        self.inner
            .props
            .borrow_mut()
            .shift_remove(key)
            .map(|p| p.dep)
    }

    fn depend_structure(&self) {
        if let Some(ob) = self.inner.observer.get() {
            ob.dep().depend();
        }
    }

    /// Stable address usable as an identity key while the object is alive.
    #[must_use]
    pub fn ptr_id(&self) -> usize {
        Rc::as_ptr(&self.inner).cast::<()>() as usize
    }

    #[must_use]
    pub fn ptr_eq(&self, other: &Self) -> bool {
        Rc::ptr_eq(&self.inner, &other.inner)
    }
}

/// Subscribe to the structural dependency of a child value, descending into
/// collections.
pub(crate) fn depend_child(value: &Value) {
    match value {
        Value::Object(obj) => obj.depend_structure(),
        Value::Array(arr) => {
            if let Some(ob) = arr.observer() {
                ob.dep().depend();
            }
            for item in arr.peek_vec() {
                if item.is_composite() {
                    depend_child(&item);
                }
            }
        }
        _ => {}
    }
}

impl fmt::Debug for ReactiveObject {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let props = self.inner.props.borrow();
        f.debug_map()
            .entries(props.iter().map(|(k, p)| (k, Shallow(&p.value))))
            .finish()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
