#![forbid(unsafe_code)]

//! Turn scheduling.
//!
//! The differ never flushes synchronously on its own: it asks a
//! [`TurnScheduler`] to run the flush on the next turn. [`TurnQueue`] is the
//! in-process implementation; the host (or a test) drives it with
//! [`TurnQueue::run_pending`].

use std::cell::RefCell;
use std::collections::VecDeque;
use std::fmt;
use std::rc::Rc;

pub type Task = Box<dyn FnOnce()>;

/// Defers a task to a later turn.
pub trait TurnScheduler {
    fn schedule(&self, task: Task);
}

/// FIFO of tasks. Clones share the same queue.
#[derive(Clone, Default)]
pub struct TurnQueue {
    tasks: Rc<RefCell<VecDeque<Task>>>,
}

impl TurnQueue {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Run the tasks queued before this call. Tasks scheduled while running
    /// wait for the next turn. Returns how many ran.
    pub fn run_pending(&self) -> usize {
        let batch: Vec<Task> = self.tasks.borrow_mut().drain(..).collect();
        let count = batch.len();
        for task in batch {
            task();
        }
        count
    }

    #[must_use]
    pub fn pending(&self) -> usize {
        self.tasks.borrow().len()
    }

    pub fn clear(&self) {
        self.tasks.borrow_mut().clear();
    }
}

impl TurnScheduler for TurnQueue {
    fn schedule(&self, task: Task) {
        self.tasks.borrow_mut().push_back(task);
    }
}

impl fmt::Debug for TurnQueue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TurnQueue")
            .field("pending", &self.pending())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::Cell;

    #[test]
    fn tasks_scheduled_during_a_turn_wait() {
        let queue = TurnQueue::new();
        let ran = Rc::new(Cell::new(0));
        let (q, r) = (queue.clone(), ran.clone());
        queue.schedule(Box::new(move || {
            r.set(r.get() + 1);
            let r2 = r.clone();
            q.schedule(Box::new(move || r2.set(r2.get() + 10)));
        }));
        assert_eq!(queue.run_pending(), 1);
        assert_eq!(ran.get(), 1);
        assert_eq!(queue.pending(), 1);
        assert_eq!(queue.run_pending(), 1);
        assert_eq!(ran.get(), 11);
    }
}
