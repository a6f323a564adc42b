//! Concurrency Gate
//!
//! Bounds the number of simultaneous outbound requests.

use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::sync::{OwnedSemaphorePermit, Semaphore, TryAcquireError};
use tracing::{debug, trace};

use crate::error::ApiError;

/// Gate statistics.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct GateStats {
    pub capacity: usize,
    pub in_use: usize,
    pub peak_in_use: usize,
    pub total_acquired: u64,
    pub waiting: usize,
}

struct GateInner {
    semaphore: Arc<Semaphore>,
    capacity: usize,
    in_use: AtomicUsize,
    peak_in_use: AtomicUsize,
    total_acquired: AtomicU64,
    waiting: AtomicUsize,
}

/// Counting gate with FIFO admission.
///
/// Cloning yields a handle to the same gate.
#[derive(Clone)]
pub struct ConcurrencyGate {
    inner: Arc<GateInner>,
}

impl ConcurrencyGate {
    /// Create a gate admitting at most `capacity` holders. A capacity of
    /// zero is raised to one.
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            inner: Arc::new(GateInner {
                semaphore: Arc::new(Semaphore::new(capacity)),
                capacity,
                in_use: AtomicUsize::new(0),
                peak_in_use: AtomicUsize::new(0),
                total_acquired: AtomicU64::new(0),
                waiting: AtomicUsize::new(0),
            }),
        }
    }

    /// Wait for a free slot.
    ///
    /// Waiters are admitted in arrival order. Dropping the returned future
    /// leaves the queue without consuming a slot.
    pub async fn acquire(&self) -> Result<ScopedSlot, ApiError> {
        match self.inner.semaphore.clone().try_acquire_owned() {
            Ok(permit) => return Ok(self.admit(permit)),
            Err(TryAcquireError::Closed) => return Err(ApiError::GateClosed),
            Err(TryAcquireError::NoPermits) => {}
        }

        let _waiting = WaitingGuard::enter(&self.inner.waiting);
        debug!(capacity = self.inner.capacity, "waiting for a request slot");

        let permit = self
            .inner
            .semaphore
            .clone()
            .acquire_owned()
            .await
            .map_err(|_| ApiError::GateClosed)?;
        Ok(self.admit(permit))
    }

    /// Take a slot only if one is free right now.
    pub fn try_acquire(&self) -> Option<ScopedSlot> {
        self.inner
            .semaphore
            .clone()
            .try_acquire_owned()
            .ok()
            .map(|permit| self.admit(permit))
    }

    fn admit(&self, permit: OwnedSemaphorePermit) -> ScopedSlot {
        let in_use = self.inner.in_use.fetch_add(1, Ordering::SeqCst) + 1;
        self.inner.peak_in_use.fetch_max(in_use, Ordering::SeqCst);
        self.inner.total_acquired.fetch_add(1, Ordering::Relaxed);
        trace!(in_use, "request slot acquired");

        ScopedSlot {
            _permit: permit,
            inner: Arc::clone(&self.inner),
        }
    }

    /// Configured maximum number of holders.
    pub fn capacity(&self) -> usize {
        self.inner.capacity
    }

    /// Slots currently held.
    pub fn in_use(&self) -> usize {
        self.inner.in_use.load(Ordering::SeqCst)
    }

    /// Slots currently free.
    pub fn available(&self) -> usize {
        self.inner.semaphore.available_permits()
    }

    /// Reject queued and future acquisitions. Held slots stay valid.
    pub fn close(&self) {
        debug!("closing concurrency gate");
        self.inner.semaphore.close();
    }

    pub fn is_closed(&self) -> bool {
        self.inner.semaphore.is_closed()
    }

    /// Get gate statistics.
    pub fn stats(&self) -> GateStats {
        GateStats {
            capacity: self.inner.capacity,
            in_use: self.inner.in_use.load(Ordering::SeqCst),
            peak_in_use: self.inner.peak_in_use.load(Ordering::SeqCst),
            total_acquired: self.inner.total_acquired.load(Ordering::Relaxed),
            waiting: self.inner.waiting.load(Ordering::SeqCst),
        }
    }
}

impl std::fmt::Debug for ConcurrencyGate {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConcurrencyGate")
            .field("capacity", &self.inner.capacity)
            .field("in_use", &self.in_use())
            .finish()
    }
}

/// RAII guard for a gate slot.
///
/// The slot is returned when the guard drops, on every exit path.
pub struct ScopedSlot {
    _permit: OwnedSemaphorePermit,
    inner: Arc<GateInner>,
}

impl Drop for ScopedSlot {
    fn drop(&mut self) {
        // Decrement before the permit field drops so in_use never exceeds
        // capacity as observed by a newly admitted holder.
        let remaining = self.inner.in_use.fetch_sub(1, Ordering::SeqCst) - 1;
        trace!(in_use = remaining, "request slot released");
    }
}

impl std::fmt::Debug for ScopedSlot {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ScopedSlot").finish_non_exhaustive()
    }
}

struct WaitingGuard<'a>(&'a AtomicUsize);

impl<'a> WaitingGuard<'a> {
    fn enter(counter: &'a AtomicUsize) -> Self {
        counter.fetch_add(1, Ordering::SeqCst);
        Self(counter)
    }
}

impl Drop for WaitingGuard<'_> {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}
