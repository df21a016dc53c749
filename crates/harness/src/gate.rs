//! Exclusion gate - single-permit lock shared by the write generator and the checker
//!
//! The generator takes the gate with a non-blocking attempt around every insert
//! and skips the tick when it is taken. The checker waits for it and holds it
//! for the whole check window. Holding a [`GatePermit`] is holding the gate;
//! dropping it releases, so every exit path of the holder gives the gate back.

use crate::error::GateMisuseError;
use std::sync::{
    atomic::{AtomicUsize, Ordering},
    Arc,
};
use std::time::Instant;
use tokio::sync::{OwnedSemaphorePermit, Semaphore};

struct GateInner {
    semaphore: Arc<Semaphore>,
    /// Recorded holders; must never exceed 1
    holders: AtomicUsize,
}

/// Binary mutual-exclusion primitive
#[derive(Clone)]
pub struct ExclusionGate {
    inner: Arc<GateInner>,
}

impl ExclusionGate {
    /// Create an open gate
    pub fn new() -> Self {
        Self {
            inner: Arc::new(GateInner {
                semaphore: Arc::new(Semaphore::new(1)),
                holders: AtomicUsize::new(0),
            }),
        }
    }

    /// Take the gate if it is free right now
    pub fn try_acquire(&self) -> Option<GatePermit> {
        let permit = self.inner.semaphore.clone().try_acquire_owned().ok()?;
        Some(self.admit(permit))
    }

    /// Wait until the gate is free and take it
    pub async fn acquire(&self) -> GatePermit {
        // The semaphore is owned by the gate and never closed
        let permit = self
            .inner
            .semaphore
            .clone()
            .acquire_owned()
            .await
            .expect("exclusion gate semaphore closed");
        self.admit(permit)
    }

    fn admit(&self, permit: OwnedSemaphorePermit) -> GatePermit {
        let prev = self.inner.holders.fetch_add(1, Ordering::SeqCst);
        debug_assert_eq!(prev, 0, "exclusion gate admitted a second holder");
        if prev != 0 {
            tracing::error!("Exclusion gate admitted holder #{}", prev + 1);
        }
        GatePermit {
            permit: Some(permit),
            inner: self.inner.clone(),
            acquired_at: Instant::now(),
        }
    }

    /// Whether someone currently holds the gate
    pub fn is_held(&self) -> bool {
        self.inner.holders.load(Ordering::SeqCst) > 0
    }

    /// Current recorded holder count (0 or 1)
    pub fn holders(&self) -> usize {
        self.inner.holders.load(Ordering::SeqCst)
    }
}

impl Default for ExclusionGate {
    fn default() -> Self {
        Self::new()
    }
}

/// Proof of holding the gate
#[must_use = "dropping the permit releases the gate immediately"]
pub struct GatePermit {
    permit: Option<OwnedSemaphorePermit>,
    inner: Arc<GateInner>,
    acquired_at: Instant,
}

impl GatePermit {
    /// Release the gate
    ///
    /// Fails if the holder count was corrupted, which means the single-holder
    /// invariant may already have been broken. Debug builds panic instead.
    pub fn release(mut self) -> Result<(), GateMisuseError> {
        self.release_inner()
    }

    /// How long the gate has been held
    pub fn held_for(&self) -> std::time::Duration {
        self.acquired_at.elapsed()
    }

    fn release_inner(&mut self) -> Result<(), GateMisuseError> {
        let Some(permit) = self.permit.take() else {
            return Ok(());
        };

        let result = match self
            .inner
            .holders
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |h| h.checked_sub(1))
        {
            Ok(1) => Ok(()),
            Ok(prev) => Err(GateMisuseError::UnpairedRelease { holders: prev }),
            Err(prev) => Err(GateMisuseError::UnpairedRelease { holders: prev }),
        };
        drop(permit);

        tracing::trace!("Exclusion gate released after {:?}", self.acquired_at.elapsed());

        if let Err(ref e) = result {
            tracing::error!("Exclusion gate misuse: {}", e);
            debug_assert!(false, "exclusion gate misuse: {}", e);
        }
        result
    }
}

impl Drop for GatePermit {
    fn drop(&mut self) {
        let _ = self.release_inner();
    }
}
