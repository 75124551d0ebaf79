//! Guest closures exposed to the host as callable values.
//!
//! A guest closure is two words of guest state (`a`, `b`), a function table
//! index that invokes it and one that destroys it. The host side keeps a
//! reference count: the guest owner holds one reference and every active
//! call pins one more. While a call is active `a` is zeroed, so a reentrant
//! call is detected instead of aliasing the guest state. The destructor runs
//! exactly once, when the last reference goes away.

use crate::error::{HostlinkError, Result};
use crate::finalize::{Finalizer, FinalizerQueue};
use parking_lot::Mutex;
use std::fmt;
use std::sync::Arc;

/// Access to the guest needed to run a closure.
///
/// Implemented by the runtime over its store; tests use a recording fake.
pub trait ClosureHost {
    /// Value produced by a successful invocation.
    type Output;

    /// Run the closure body: `invoker(a, b, ..args)`.
    fn invoke(&mut self, invoker: u32, a: u32, b: u32) -> Result<Self::Output>;

    /// Run the closure destructor: `dtor(a, b)`.
    fn destroy(&mut self, dtor: u32, a: u32, b: u32) -> Result<()>;
}

#[derive(Debug)]
struct ClosureState {
    a: u32,
    b: u32,
    cnt: u32,
    dtor: u32,
    /// The guest owner's reference has been released.
    released: bool,
    finished: bool,
}

struct ClosureInner {
    state: Mutex<ClosureState>,
    invoker: u32,
    finalizers: FinalizerQueue,
}

impl Drop for ClosureInner {
    fn drop(&mut self) {
        let state = self.state.get_mut();
        if !state.finished && state.a != 0 {
            self.finalizers.push(Finalizer::Closure {
                dtor: state.dtor,
                a: state.a,
                b: state.b,
            });
        }
    }
}

/// Host-side handle on a guest closure. Clones share the same state.
#[derive(Clone)]
pub struct GuestClosure(Arc<ClosureInner>);

impl GuestClosure {
    /// Wrap guest closure state. The guest owner holds the first reference.
    pub fn new(a: u32, b: u32, dtor: u32, invoker: u32, finalizers: FinalizerQueue) -> Self {
        Self(Arc::new(ClosureInner {
            state: Mutex::new(ClosureState {
                a,
                b,
                cnt: 1,
                dtor,
                released: false,
                finished: false,
            }),
            invoker,
            finalizers,
        }))
    }

    /// Invoke the closure.
    ///
    /// The state lock is released before entering the guest, so the guest
    /// may call back into this closure; such a call fails with
    /// [`HostlinkError::ClosureRecursive`] and leaves the outer call intact.
    pub fn call<H: ClosureHost>(&self, host: &mut H) -> Result<H::Output> {
        let (a, b) = {
            let mut state = self.0.state.lock();
            if state.finished {
                return Err(HostlinkError::ClosureDropped);
            }
            state.cnt += 1;
            let a = state.a;
            state.a = 0;
            (a, state.b)
        };

        let result = if a == 0 {
            Err(HostlinkError::ClosureRecursive)
        } else {
            host.invoke(self.0.invoker, a, b)
        };

        let dtor = {
            let mut state = self.0.state.lock();
            state.cnt -= 1;
            if state.cnt == 0 {
                state.finished = true;
                Some(state.dtor)
            } else {
                state.a = a;
                None
            }
        };

        let destroyed = match dtor {
            Some(dtor) => {
                tracing::debug!(dtor, a, b, "Destroying closure after last call");
                host.destroy(dtor, a, b)
            }
            None => Ok(()),
        };
        let output = result?;
        destroyed?;
        Ok(output)
    }

    /// Release the guest owner's reference (the `cb_drop` import).
    ///
    /// Returns `true` when this was the last reference: the closure is
    /// finished and the guest frees its own state. Returns `false` while a
    /// call is still active; the destructor then runs when it unwinds.
    /// The owner reference is released once; later calls do nothing.
    pub fn drop_ref(&self) -> bool {
        let mut state = self.0.state.lock();
        if state.finished || state.released {
            return false;
        }
        state.released = true;
        state.cnt -= 1;
        if state.cnt == 0 {
            state.a = 0;
            state.finished = true;
            true
        } else {
            false
        }
    }

    /// Current reference count.
    pub fn ref_count(&self) -> u32 {
        self.0.state.lock().cnt
    }

    /// Whether the destructor ran or the guest released the closure.
    pub fn is_finished(&self) -> bool {
        self.0.state.lock().finished
    }

    /// Function table index of the invoker.
    pub fn invoker(&self) -> u32 {
        self.0.invoker
    }

    /// Identity comparison.
    pub fn ptr_eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.0, &other.0)
    }
}

impl fmt::Debug for GuestClosure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.0.state.lock();
        f.debug_struct("GuestClosure")
            .field("invoker", &self.0.invoker)
            .field("dtor", &state.dtor)
            .field("cnt", &state.cnt)
            .field("finished", &state.finished)
            .finish()
    }
}
