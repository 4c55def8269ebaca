#![forbid(unsafe_code)]

//! Observable sequences.
//!
//! [`ObservableArray`] exposes the mutating operations of a sequence
//! directly. Each one observes the elements it inserts and then notifies the
//! array's structural dependency exactly once. Reads (`len`, `get`,
//! `to_vec`) subscribe to that dependency.
//!
//! # Invariants
//!
//! 1. One mutation call produces at most one notification.
//! 2. A mutation that changes nothing (popping an empty array, truncating to
//!    a larger length, writing an identical element) notifies nobody.
//! 3. The item borrow is released before subscribers run, so callbacks may
//!    read or mutate the same array.
//!
//! # Failure Modes
//!
//! - **Index far past the end**: [`ObservableArray::set_at`] pads at most
//!   [`MAX_SET_PADDING`] `Null`s; a write further out is logged with `warn!`
//!   and ignored.

use std::cell::{Cell, OnceCell, RefCell};
use std::cmp::Ordering;
use std::fmt;
use std::rc::Rc;

use tracing::warn;

use crate::observer::{self, Observer};
use crate::value::{Shallow, Value};

/// Most `Null`s a single [`ObservableArray::set_at`] may pad with.
pub const MAX_SET_PADDING: usize = 1 << 16;

struct ArrayInner {
    items: RefCell<Vec<Value>>,
    observer: OnceCell<Observer>,
    frozen: Cell<bool>,
}

/// Shared handle to a dependency-tracked sequence.
#[derive(Clone)]
pub struct ObservableArray {
    inner: Rc<ArrayInner>,
}

impl Default for ObservableArray {
    fn default() -> Self {
        Self::new()
    }
}

impl ObservableArray {
    #[must_use]
    pub fn new() -> Self {
        Self::from_vec(Vec::new())
    }

    #[must_use]
    pub fn from_vec(items: Vec<Value>) -> Self {
        Self {
            inner: Rc::new(ArrayInner {
                items: RefCell::new(items),
                observer: OnceCell::new(),
                frozen: Cell::new(false),
            }),
        }
    }

    // -----------------------------------------------------------------------
    // Reads
    // -----------------------------------------------------------------------

    #[must_use]
    pub fn len(&self) -> usize {
        self.depend();
        self.peek_len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    #[must_use]
    pub fn get(&self, idx: usize) -> Option<Value> {
        self.depend();
        self.inner.items.borrow().get(idx).cloned()
    }

    /// Tracked snapshot of the elements.
    #[must_use]
    pub fn to_vec(&self) -> Vec<Value> {
        self.depend();
        self.peek_vec()
    }

    #[must_use]
    pub fn peek_len(&self) -> usize {
        self.inner.items.borrow().len()
    }

    /// Untracked snapshot of the elements.
    #[must_use]
    pub fn peek_vec(&self) -> Vec<Value> {
        self.inner.items.borrow().clone()
    }

    // -----------------------------------------------------------------------
    // Mutations
    // -----------------------------------------------------------------------

    pub fn push(&self, value: impl Into<Value>) {
        let value = value.into();
        self.observe_item(&value);
        self.inner.items.borrow_mut().push(value);
        self.notify();
    }

    pub fn pop(&self) -> Option<Value> {
        let popped = self.inner.items.borrow_mut().pop();
        if popped.is_some() {
            self.notify();
        }
        popped
    }

    pub fn shift(&self) -> Option<Value> {
        let shifted = {
            let mut items = self.inner.items.borrow_mut();
            if items.is_empty() {
                None
            } else {
                Some(items.remove(0))
            }
        };
        if shifted.is_some() {
            self.notify();
        }
        shifted
    }

    /// Prepend `values`, keeping their order.
    pub fn unshift(&self, values: impl IntoIterator<Item = Value>) {
        self.splice(0, 0, values);
    }

    /// Insert at `idx`, clamped to the current length.
    pub fn insert(&self, idx: usize, value: impl Into<Value>) {
        let value = value.into();
        self.observe_item(&value);
        {
            let mut items = self.inner.items.borrow_mut();
            let idx = idx.min(items.len());
            items.insert(idx, value);
        }
        self.notify();
    }

    pub fn remove_at(&self, idx: usize) -> Option<Value> {
        let removed = {
            let mut items = self.inner.items.borrow_mut();
            (idx < items.len()).then(|| items.remove(idx))
        };
        if removed.is_some() {
            self.notify();
        }
        removed
    }

    /// Remove the first element strictly equal to `value`.
    pub fn remove(&self, value: &Value) -> bool {
        let pos = self
            .inner
            .items
            .borrow()
            .iter()
            .position(|item| item.strict_eq(value));
        match pos {
            Some(idx) => self.remove_at(idx).is_some(),
            None => false,
        }
    }

    /// Remove `delete_count` elements at `start` and insert `items` in their
    /// place. Returns the removed elements.
    pub fn splice(
        &self,
        start: usize,
        delete_count: usize,
        items: impl IntoIterator<Item = Value>,
    ) -> Vec<Value> {
        let inserted: Vec<Value> = items.into_iter().collect();
        for item in &inserted {
            self.observe_item(item);
        }
        let removed: Vec<Value> = {
            let mut current = self.inner.items.borrow_mut();
            let start = start.min(current.len());
            let end = start.saturating_add(delete_count).min(current.len());
            if start == end && inserted.is_empty() {
                return Vec::new();
            }
            let removed = current.splice(start..end, inserted).collect();
            removed
        };
        self.notify();
        removed
    }

    pub fn truncate(&self, len: usize) {
        {
            let mut items = self.inner.items.borrow_mut();
            if len >= items.len() {
                return;
            }
            items.truncate(len);
        }
        self.notify();
    }

    pub fn clear(&self) {
        self.truncate(0);
    }

    pub fn reverse(&self) {
        {
            let mut items = self.inner.items.borrow_mut();
            if items.len() < 2 {
                return;
            }
            items.reverse();
        }
        self.notify();
    }

    /// Stable sort with a caller-supplied ordering.
    pub fn sort_by(&self, mut compare: impl FnMut(&Value, &Value) -> Ordering) {
        // Sort a copy so the comparator may read this array.
        let mut sorted = self.peek_vec();
        if sorted.len() < 2 {
            return;
        }
        sorted.sort_by(|a, b| compare(a, b));
        *self.inner.items.borrow_mut() = sorted;
        self.notify();
    }

    /// Index assignment. Writing past the end pads with `Null`, up to
    /// [`MAX_SET_PADDING`] slots.
    pub fn set_at(&self, idx: usize, value: impl Into<Value>) {
        let value = value.into();
        {
            let items = self.inner.items.borrow();
            if items.get(idx).is_some_and(|old| old.same_value(&value)) {
                return;
            }
            let len = items.len();
            if idx > len.saturating_add(MAX_SET_PADDING) || idx.checked_add(1).is_none() {
                warn!(idx, len, "set_at: index too far past the end; write ignored");
                return;
            }
        }
        self.observe_item(&value);
        {
            let mut items = self.inner.items.borrow_mut();
            if idx >= items.len() {
                items.resize(idx + 1, Value::Null);
            }
            items[idx] = value;
        }
        self.notify();
    }

    /// Replace the whole content.
    pub fn replace(&self, values: Vec<Value>) {
        for item in &values {
            self.observe_item(item);
        }
        *self.inner.items.borrow_mut() = values;
        self.notify();
    }

    // -----------------------------------------------------------------------
    // Observation
    // -----------------------------------------------------------------------

    #[must_use]
    pub fn observer(&self) -> Option<Observer> {
        self.inner.observer.get().cloned()
    }

    /// Observe this array and its elements. `None` when frozen.
    pub fn observe(&self) -> Option<Observer> {
        if self.inner.frozen.get() {
            return None;
        }
        if let Some(ob) = self.inner.observer.get() {
            return Some(ob.clone());
        }
        let ob = Observer::new();
        let _ = self.inner.observer.set(ob.clone());
        for item in self.peek_vec() {
            observer::observe(&item, None);
        }
        Some(ob)
    }

    pub fn freeze(&self) {
        self.inner.frozen.set(true);
    }

    fn observe_item(&self, value: &Value) {
        if self.inner.observer.get().is_some() {
            observer::observe(value, None);
        }
    }

    fn depend(&self) {
        if let Some(ob) = self.inner.observer.get() {
            ob.dep().depend();
        }
    }

    fn notify(&self) {
        if let Some(ob) = self.inner.observer.get() {
            ob.dep().notify();
        }
    }

    #[must_use]
    pub fn ptr_id(&self) -> usize {
        Rc::as_ptr(&self.inner).cast::<()>() as usize
    }

    #[must_use]
    pub fn ptr_eq(&self, other: &Self) -> bool {
        Rc::ptr_eq(&self.inner, &other.inner)
    }
}

impl fmt::Debug for ObservableArray {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let items = self.inner.items.borrow();
        f.debug_list().entries(items.iter().map(Shallow)).finish()
    }
}

impl FromIterator<Value> for ObservableArray {
    fn from_iter<I: IntoIterator<Item = Value>>(iter: I) -> Self {
        Self::from_vec(iter.into_iter().collect())
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
