//! Host wrappers around guest-owned objects.
//!
//! The guest hands out a raw pointer to one of its own objects; the host
//! wraps it so that it is released exactly once, either explicitly through
//! [`OwnedHandle::free`] or, if the wrapper is dropped first, through a
//! queued [`Finalizer::Owned`].

use crate::error::Result;
use crate::finalize::{Finalizer, FinalizerQueue};
use std::fmt;
use std::sync::atomic::{AtomicU32, Ordering};

/// A guest object owned by the host.
pub struct OwnedHandle {
    ptr: AtomicU32,
    class: String,
    finalizers: FinalizerQueue,
}

impl OwnedHandle {
    /// Wrap a guest pointer of the given class.
    pub fn wrap(class: impl Into<String>, ptr: u32, finalizers: FinalizerQueue) -> Self {
        Self {
            ptr: AtomicU32::new(ptr),
            class: class.into(),
            finalizers,
        }
    }

    /// Current guest pointer, `0` once released.
    pub fn ptr(&self) -> u32 {
        self.ptr.load(Ordering::Acquire)
    }

    /// Class name of the wrapped object.
    pub fn class(&self) -> &str {
        &self.class
    }

    /// Whether the pointer was already handed back.
    pub fn is_released(&self) -> bool {
        self.ptr() == 0
    }

    /// Take the raw pointer, leaving `0` behind.
    ///
    /// Ownership moves to the caller; a second call returns `0`.
    pub fn destroy_into_raw(&self) -> u32 {
        self.ptr.swap(0, Ordering::AcqRel)
    }

    /// Release the object through `release`, at most once.
    pub fn free<F>(&self, release: F) -> Result<()>
    where
        F: FnOnce(u32) -> Result<()>,
    {
        let ptr = self.destroy_into_raw();
        if ptr == 0 {
            return Ok(());
        }
        release(ptr)
    }
}

impl Drop for OwnedHandle {
    fn drop(&mut self) {
        let ptr = *self.ptr.get_mut();
        if ptr != 0 {
            self.finalizers.push(Finalizer::Owned {
                class: std::mem::take(&mut self.class),
                ptr,
            });
        }
    }
}

impl fmt::Debug for OwnedHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("OwnedHandle")
            .field("class", &self.class)
            .field("ptr", &self.ptr())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::Cell;

    #[test]
    fn free_releases_once() {
        let queue = FinalizerQueue::new();
        let owned = OwnedHandle::wrap("jsowner", 64, queue.clone());
        let calls = Cell::new(0);

        owned
            .free(|ptr| {
                assert_eq!(ptr, 64);
                calls.set(calls.get() + 1);
                Ok(())
            })
            .unwrap();
        owned
            .free(|_| {
                calls.set(calls.get() + 1);
                Ok(())
            })
            .unwrap();

        assert_eq!(calls.get(), 1);
        assert!(owned.is_released());
        drop(owned);
        assert!(queue.is_empty());
    }

    #[test]
    fn destroy_into_raw_moves_ownership() {
        let queue = FinalizerQueue::new();
        let owned = OwnedHandle::wrap("jsowner", 64, queue.clone());
        assert_eq!(owned.destroy_into_raw(), 64);
        assert_eq!(owned.destroy_into_raw(), 0);
        drop(owned);
        assert!(queue.is_empty());
    }

    #[test]
    fn drop_queues_one_finalizer() {
        let queue = FinalizerQueue::new();
        drop(OwnedHandle::wrap("jsowner", 64, queue.clone()));
        assert_eq!(
            queue.drain(),
            vec![Finalizer::Owned {
                class: "jsowner".to_string(),
                ptr: 64
            }]
        );
    }
}
