#![forbid(unsafe_code)]

//! Rendering backends.
//!
//! A backend receives mutation batches for one instance. The runtime never
//! inspects what the backend does with them.

use std::cell::RefCell;
use std::rc::Rc;

use crate::mutation::Mutation;

/// Sink for mutation batches.
pub trait RenderBackend {
    fn send(&self, instance_id: &str, batch: Vec<Mutation>);
}

/// Discards everything.
#[derive(Debug, Clone, Copy, Default)]
pub struct NullBackend;

impl RenderBackend for NullBackend {
    fn send(&self, _instance_id: &str, _batch: Vec<Mutation>) {}
}

/// Keeps every batch in memory. Clones share the same log.
#[derive(Debug, Clone, Default)]
pub struct RecordingBackend {
    batches: Rc<RefCell<Vec<Vec<Mutation>>>>,
}

impl RecordingBackend {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Every batch received so far.
    #[must_use]
    pub fn batches(&self) -> Vec<Vec<Mutation>> {
        self.batches.borrow().clone()
    }

    #[must_use]
    pub fn batch_count(&self) -> usize {
        self.batches.borrow().len()
    }

    /// All mutations, flattened in delivery order.
    #[must_use]
    pub fn mutations(&self) -> Vec<Mutation> {
        self.batches.borrow().iter().flatten().cloned().collect()
    }

    /// Number of delivered mutations with the given action name.
    #[must_use]
    pub fn count(&self, action: &str) -> usize {
        self.batches
            .borrow()
            .iter()
            .flatten()
            .filter(|m| m.action() == action)
            .count()
    }

    /// Drain the log.
    pub fn take(&self) -> Vec<Vec<Mutation>> {
        std::mem::take(&mut *self.batches.borrow_mut())
    }
}

impl RenderBackend for RecordingBackend {
    fn send(&self, _instance_id: &str, batch: Vec<Mutation>) {
        if !batch.is_empty() {
            self.batches.borrow_mut().push(batch);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn recording_backend_shares_log_between_clones() {
        let backend = RecordingBackend::new();
        let sink: Box<dyn RenderBackend> = Box::new(backend.clone());
        sink.send("1", vec![Mutation::CreateFinish]);
        sink.send("1", Vec::new());
        assert_eq!(backend.batch_count(), 1);
        assert_eq!(backend.count("createFinish"), 1);
        assert_eq!(backend.take().len(), 1);
        assert_eq!(backend.batch_count(), 0);
    }
}
