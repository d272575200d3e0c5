//! Lock-guarded responder handle.
//!
//! A bus driver (interrupt handler, USB callback, simulated bus) and the
//! cooperative loop that calls `process()` run concurrently with respect to
//! each other. `SharedResponder` puts the engine behind a mutex that acts as
//! the critical section, and keeps a second handle to the atomic pending-work
//! flags so the cooperative side can check for work without taking the lock.

use std::sync::Arc;

use parking_lot::{Mutex, MutexGuard};

use super::{PendingWork, Responder};
use crate::protocol::Status;
use crate::transport::ResponderEvents;

/// Clonable, thread-safe handle to a [`Responder`]
pub struct SharedResponder<M = Vec<u8>>
where
    M: AsRef<[u8]> + AsMut<[u8]>,
{
    inner: Arc<Mutex<Responder<M>>>,
    pending: Arc<PendingWork>,
}

impl<M> Clone for SharedResponder<M>
where
    M: AsRef<[u8]> + AsMut<[u8]>,
{
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
            pending: Arc::clone(&self.pending),
        }
    }
}

impl<M> SharedResponder<M>
where
    M: AsRef<[u8]> + AsMut<[u8]>,
{
    /// Wrap a configured responder
    pub fn new(responder: Responder<M>) -> Self {
        let pending = responder.pending();
        Self {
            inner: Arc::new(Mutex::new(responder)),
            pending,
        }
    }

    /// Lock the engine (application-side access to memory, status, ...)
    pub fn lock(&self) -> MutexGuard<'_, Responder<M>> {
        self.inner.lock()
    }

    /// Run `f` with exclusive access to the engine
    pub fn with<R>(&self, f: impl FnOnce(&mut Responder<M>) -> R) -> R {
        f(&mut self.inner.lock())
    }

    /// Current status register
    pub fn status(&self) -> Status {
        self.inner.lock().status()
    }

    /// Returns true while a backup restore is pending, without locking
    pub fn is_busy(&self) -> bool {
        self.pending.restore_pending()
    }

    /// Returns true if `poll()` has deferred work to run, without locking
    pub fn has_pending_work(&self) -> bool {
        self.pending.has_work()
    }

    /// Byte written by the controller
    pub fn on_byte_received(&self, byte: u8) {
        self.inner.lock().on_byte_received(byte);
    }

    /// Byte clocked out by the controller
    pub fn on_byte_requested(&self) -> u8 {
        self.inner.lock().on_byte_requested()
    }

    /// Run deferred work if any is pending
    ///
    /// Returns true if `process()` ran.
    pub fn poll(&self) -> bool {
        if !self.pending.has_work() {
            return false;
        }

        self.inner.lock().process();
        true
    }
}

impl<M> ResponderEvents for SharedResponder<M>
where
    M: AsRef<[u8]> + AsMut<[u8]>,
{
    fn on_byte_received(&mut self, byte: u8) {
        SharedResponder::on_byte_received(self, byte);
    }

    fn on_byte_requested(&mut self) -> u8 {
        SharedResponder::on_byte_requested(self)
    }

    fn poll(&mut self) {
        SharedResponder::poll(self);
    }
}
