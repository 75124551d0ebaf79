//! Deferred guest-side destructor calls.
//!
//! Host values that own guest resources (closures, owned handles) push a
//! [`Finalizer`] here when they are dropped without being released. The
//! queue is drained by whoever holds the guest store, at a point where no
//! guest call is in progress.

use parking_lot::Mutex;
use std::collections::VecDeque;
use std::sync::Arc;

/// A pending guest-side cleanup.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Finalizer {
    /// Run a closure destructor: `dtor(a, b)` through the function table.
    Closure {
        /// Function table index of the destructor.
        dtor: u32,
        /// First word of the closure state.
        a: u32,
        /// Second word of the closure state.
        b: u32,
    },
    /// Free a guest object: `__hostlink_<class>_free(ptr, 1)`.
    Owned {
        /// Class name used to find the free export.
        class: String,
        /// Guest pointer.
        ptr: u32,
    },
}

/// Shared queue of pending finalizers.
#[derive(Debug, Clone, Default)]
pub struct FinalizerQueue {
    inner: Arc<Mutex<VecDeque<Finalizer>>>,
}

impl FinalizerQueue {
    /// Create an empty queue.
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue a finalizer.
    pub fn push(&self, finalizer: Finalizer) {
        tracing::trace!(?finalizer, "Finalizer queued");
        self.inner.lock().push_back(finalizer);
    }

    /// Take every queued finalizer, oldest first.
    pub fn drain(&self) -> Vec<Finalizer> {
        self.inner.lock().drain(..).collect()
    }

    /// Number of queued finalizers.
    pub fn len(&self) -> usize {
        self.inner.lock().len()
    }

    /// Check if the queue is empty.
    pub fn is_empty(&self) -> bool {
        self.inner.lock().is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn drain_is_fifo_and_empties() {
        let queue = FinalizerQueue::new();
        let clone = queue.clone();
        queue.push(Finalizer::Closure { dtor: 1, a: 2, b: 3 });
        clone.push(Finalizer::Owned {
            class: "jsowner".to_string(),
            ptr: 64,
        });
        assert_eq!(queue.len(), 2);

        let drained = queue.drain();
        assert!(matches!(drained[0], Finalizer::Closure { dtor: 1, .. }));
        assert!(matches!(&drained[1], Finalizer::Owned { ptr: 64, .. }));
        assert!(clone.is_empty());
    }
}
