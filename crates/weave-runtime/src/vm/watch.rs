#![forbid(unsafe_code)]

use std::cell::RefCell;
use std::rc::Rc;

use weave_reactive::{Value, Watcher, WatcherOptions};

use super::Vm;
use crate::compiler::directive::{self, Anchor};
use crate::differ::MutationKind;
use crate::template::Binding;

impl Vm {
    /// Watch `binding`; `callback` receives the latest value at most once
    /// per turn, after the writes of that turn have settled.
    ///
    /// Returns the underlying watcher, or `None` on a static view-model,
    /// where nothing is watched.
    pub fn watch(
        &self,
        binding: Binding,
        callback: impl FnMut(&Value) + 'static,
    ) -> Option<Watcher> {
        if self.is_static() {
            return None;
        }
        let key = self.app()?.inner.next_id();
        let callback = RefCell::new(callback);
        let deferred = directive::deferred(
            MutationKind::Element,
            Anchor::Watcher(key),
            Rc::new(move |_: &Vm, value: Value| {
                let mut callback = callback.borrow_mut();
                (*callback)(&value);
            }),
        );
        Some(directive::subscribe(self, binding.getter(), deferred))
    }

    /// Watch `binding` and run `callback(new, old)` synchronously on every
    /// change.
    pub fn watch_sync(
        &self,
        binding: Binding,
        callback: impl FnMut(&Value, &Value) + 'static,
    ) -> Watcher {
        let weak = self.downgrade();
        let getter = binding.getter();
        Watcher::with_options(
            move || weak.upgrade().map_or(Value::Null, |vm| getter(&vm)),
            Some(Box::new(callback)),
            WatcherOptions::default(),
            Some(self.watchers()),
        )
    }
}
