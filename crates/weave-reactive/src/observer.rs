#![forbid(unsafe_code)]

//! Observation of composite values and structural mutation.
//!
//! [`observe`] attaches an [`Observer`] to a [`ReactiveObject`] or
//! [`ObservableArray`] and recursively to everything it contains. The
//! observer's own [`Dep`] is notified on *structural* changes (a key added or
//! removed, a collection mutated) and is what readers of the containing
//! property subscribe to alongside the property's own dependency.
//!
//! A plain property write can only replace an existing key. [`set`] and
//! [`delete`] cover the cases it cannot: adding a brand-new key to an
//! observed object, and index assignment or removal on a collection. Owners
//! registered through `observe(value, Some(owner))` (view-models, in
//! practice) are told about added and removed keys so they can re-digest.
//!
//! # Invariants
//!
//! 1. A value is observed by at most one observer; `observe` on an observed
//!    value returns the existing one.
//! 2. Primitives and frozen composites are never observed.
//! 3. An owner is registered at most once per observer.
//!
//! # Failure Modes
//!
//! - **Structural mutation of a primitive**: logged with `warn!`, no effect.
//! - **Owner dropped**: its weak registration is skipped on the next
//!   notification.

use std::cell::RefCell;
use std::fmt;
use std::rc::{Rc, Weak};

use tracing::warn;

use crate::dep::Dep;
use crate::value::Value;

/// Party interested in keys being added to or removed from a data object.
pub trait StructuralOwner {
    fn owner_id(&self) -> u64;
    fn key_added(&self, key: &str);
    fn key_removed(&self, key: &str);
}

struct ObserverInner {
    dep: Dep,
    owners: RefCell<Vec<(u64, Weak<dyn StructuralOwner>)>>,
}

/// The observation tag of a composite value.
#[derive(Clone)]
pub struct Observer {
    inner: Rc<ObserverInner>,
}

impl Observer {
    pub(crate) fn new() -> Self {
        Self {
            inner: Rc::new(ObserverInner {
                dep: Dep::new(),
                owners: RefCell::new(Vec::new()),
            }),
        }
    }

    /// Dependency notified on structural change.
    #[must_use]
    pub fn dep(&self) -> &Dep {
        &self.inner.dep
    }

    pub fn add_owner(&self, owner: &Rc<dyn StructuralOwner>) {
        let id = owner.owner_id();
        let mut owners = self.inner.owners.borrow_mut();
        if owners.iter().any(|(existing, _)| *existing == id) {
            return;
        }
        owners.push((id, Rc::downgrade(owner)));
    }

    pub fn remove_owner(&self, id: u64) {
        self.inner
            .owners
            .borrow_mut()
            .retain(|(existing, _)| *existing != id);
    }

    #[must_use]
    pub fn owner_count(&self) -> usize {
        self.inner
            .owners
            .borrow()
            .iter()
            .filter(|(_, weak)| weak.strong_count() > 0)
            .count()
    }

    fn live_owners(&self) -> Vec<Rc<dyn StructuralOwner>> {
        let mut owners = self.inner.owners.borrow_mut();
        owners.retain(|(_, weak)| weak.strong_count() > 0);
        owners.iter().filter_map(|(_, weak)| weak.upgrade()).collect()
    }

    #[must_use]
    pub fn ptr_eq(&self, other: &Self) -> bool {
        Rc::ptr_eq(&self.inner, &other.inner)
    }
}

impl fmt::Debug for Observer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Observer")
            .field("dep", &self.inner.dep)
            .field("owners", &self.owner_count())
            .finish()
    }
}

/// Observe `value`, optionally registering `owner` for structural
/// notifications.
///
/// Returns `None` for primitives and frozen composites.
pub fn observe(value: &Value, owner: Option<&Rc<dyn StructuralOwner>>) -> Option<Observer> {
    let ob = match value {
        Value::Object(obj) => obj.observe()?,
        Value::Array(arr) => arr.observe()?,
        _ => return None,
    };
    if let Some(owner) = owner {
        ob.add_owner(owner);
    }
    Some(ob)
}

/// Address of a member inside a composite.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Key {
    Index(usize),
    Name(Rc<str>),
}

impl Key {
    fn as_index(&self) -> Option<usize> {
        match self {
            Self::Index(idx) => Some(*idx),
            Self::Name(name) => name.parse().ok(),
        }
    }

    fn to_name(&self) -> Rc<str> {
        match self {
            Self::Index(idx) => idx.to_string().into(),
            Self::Name(name) => name.clone(),
        }
    }
}

impl From<usize> for Key {
    fn from(idx: usize) -> Self {
        Self::Index(idx)
    }
}

impl From<&str> for Key {
    fn from(name: &str) -> Self {
        Self::Name(name.into())
    }
}

impl From<String> for Key {
    fn from(name: String) -> Self {
        Self::Name(name.into())
    }
}

impl From<Rc<str>> for Key {
    fn from(name: Rc<str>) -> Self {
        Self::Name(name)
    }
}

/// Write `key` on `target`, adding the key with full notification when it is
/// new on an observed object.
pub fn set(target: &Value, key: impl Into<Key>, value: impl Into<Value>) {
    let key = key.into();
    let value = value.into();
    match target {
        Value::Array(arr) => match key.as_index() {
            Some(idx) => arr.set_at(idx, value),
            None => warn!(key = ?key, "set: non-index key on a collection ignored"),
        },
        Value::Object(obj) => {
            let name = key.to_name();
            if obj.has_own(&name) {
                obj.set(&name, value);
                return;
            }
            let Some(ob) = obj.observer() else {
                obj.set(&name, value);
                return;
            };
            obj.define(name.clone(), value);
            ob.dep().notify();
            for owner in ob.live_owners() {
                owner.key_added(&name);
            }
        }
        _ => warn!(key = ?key, "set: target is not an object or collection"),
    }
}

/// Remove `key` from `target` with notification.
pub fn delete(target: &Value, key: impl Into<Key>) {
    let key = key.into();
    match target {
        Value::Array(arr) => match key.as_index() {
            Some(idx) => {
                arr.remove_at(idx);
            }
            None => warn!(key = ?key, "delete: non-index key on a collection ignored"),
        },
        Value::Object(obj) => {
            let name = key.to_name();
            let Some(removed_dep) = obj.undefine(&name) else {
                return;
            };
            let Some(ob) = obj.observer() else {
                return;
            };
            ob.dep().notify();
            removed_dep.notify();
            for owner in ob.live_owners() {
                owner.key_removed(&name);
            }
        }
        _ => warn!(key = ?key, "delete: target is not an object or collection"),
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::watcher::Watcher;
    use serde_json::json;
    use std::cell::{Cell, RefCell};

    struct Owner {
        added: RefCell<Vec<String>>,
        removed: RefCell<Vec<String>>,
    }

    impl StructuralOwner for Owner {
        fn owner_id(&self) -> u64 {
            7
        }
        fn key_added(&self, key: &str) {
            self.added.borrow_mut().push(key.to_string());
        }
        fn key_removed(&self, key: &str) {
            self.removed.borrow_mut().push(key.to_string());
        }
    }

    fn owner() -> Rc<Owner> {
        Rc::new(Owner {
            added: RefCell::new(Vec::new()),
            removed: RefCell::new(Vec::new()),
        })
    }

    #[test]
    fn observe_is_idempotent() {
        let data = Value::from_json(json!({"a": {"b": 1}}));
        let first = observe(&data, None).unwrap();
        let second = observe(&data, None).unwrap();
        assert!(first.ptr_eq(&second));
    }

    #[test]
    fn observe_recurses_into_children() {
        let data = Value::from_json(json!({"a": {"b": 1}, "list": [{"c": 2}]}));
        observe(&data, None);
        assert!(data.peek("a").as_object().unwrap().observer().is_some());
        let list = data.peek("list");
        assert!(list.as_array().unwrap().observer().is_some());
        assert!(list.peek("0").as_object().unwrap().observer().is_some());
    }

    #[test]
    fn primitives_and_frozen_values_are_not_observed() {
        assert!(observe(&Value::from(3), None).is_none());
        let frozen = Value::from_json(json!({"x": 1}));
        frozen.as_object().unwrap().freeze();
        assert!(observe(&frozen, None).is_none());
    }

    #[test]
    fn cyclic_data_observes_once() {
        let data = Value::from_json(json!({"name": "root"}));
        data.as_object().unwrap().set("me", data.clone());
        let ob = observe(&data, None).unwrap();
        assert!(data.peek("me").as_object().unwrap().observer().unwrap().ptr_eq(&ob));
    }

    #[test]
    fn set_new_key_notifies_and_informs_owner() {
        let data = Value::from_json(json!({"a": 1}));
        let own = owner();
        let own_dyn: Rc<dyn StructuralOwner> = own.clone();
        observe(&data, Some(&own_dyn));

        let fired = Rc::new(Cell::new(0));
        let fired2 = fired.clone();
        let d = data.clone();
        let _w = Watcher::new(move || d.get("b"), move |_, _| fired2.set(fired2.get() + 1));

        set(&data, "b", 5);
        assert_eq!(fired.get(), 1);
        assert_eq!(data.peek("b"), Value::from(5));
        assert_eq!(own.added.borrow().as_slice(), ["b".to_string()]);
    }

    #[test]
    fn set_existing_key_is_a_plain_write() {
        let data = Value::from_json(json!({"a": 1}));
        let own = owner();
        let own_dyn: Rc<dyn StructuralOwner> = own.clone();
        observe(&data, Some(&own_dyn));
        set(&data, "a", 2);
        assert_eq!(data.peek("a"), Value::from(2));
        assert!(own.added.borrow().is_empty());
    }

    #[test]
    fn set_index_on_collection_extends() {
        let list = Value::from_json(json!([1]));
        observe(&list, None);
        set(&list, 3usize, "x");
        assert_eq!(list.to_json(), json!([1, null, null, "x"]));
    }

    #[test]
    fn delete_notifies_direct_readers() {
        let data = Value::from_json(json!({"a": 1, "b": 2}));
        let own = owner();
        let own_dyn: Rc<dyn StructuralOwner> = own.clone();
        observe(&data, Some(&own_dyn));

        let seen = Rc::new(RefCell::new(Vec::new()));
        let seen2 = seen.clone();
        let d = data.clone();
        let _w = Watcher::new(move || d.get("a"), move |new, _| seen2.borrow_mut().push(new.clone()));

        delete(&data, "a");
        assert_eq!(seen.borrow().as_slice(), [Value::Null]);
        assert_eq!(own.removed.borrow().as_slice(), ["a".to_string()]);
        delete(&data, "missing");
        assert_eq!(own.removed.borrow().len(), 1);
    }

    #[test]
    fn structural_ops_on_primitives_are_ignored() {
        set(&Value::from(1), "a", 1);
        delete(&Value::Null, "a");
    }
}
