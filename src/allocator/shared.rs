//! Thread-safe handle around a single allocator.
//!
//! K_i: Score and commit must not interleave between callers, so the whole
//! allocation runs under one lock.

use super::Allocator;
use crate::models::{Allocation, AllocationError, Arm, Characteristics, Enrollment, ParticipantId};
use crate::report::CharacteristicsByArm;
use parking_lot::Mutex;
use std::sync::Arc;

/// Cloneable, lock-serialised allocator handle.
#[derive(Clone)]
pub struct SharedAllocator {
    inner: Arc<Mutex<Allocator>>,
}

impl SharedAllocator {
    pub fn new(allocator: Allocator) -> Self {
        Self {
            inner: Arc::new(Mutex::new(allocator)),
        }
    }

    pub fn allocate(
        &self,
        id: impl Into<ParticipantId>,
        characteristics: Characteristics,
    ) -> Result<Arm, AllocationError> {
        self.inner.lock().allocate(id, characteristics)
    }

    pub fn allocate_detailed(
        &self,
        id: impl Into<ParticipantId>,
        characteristics: Characteristics,
    ) -> Result<Allocation, AllocationError> {
        self.inner.lock().allocate_detailed(id, characteristics)
    }

    pub fn characteristics_by_arm(&self) -> CharacteristicsByArm {
        self.inner.lock().characteristics_by_arm()
    }

    /// Snapshot of the ledger.
    pub fn participants(&self) -> Vec<Enrollment> {
        self.inner.lock().participants().to_vec()
    }

    pub fn len(&self) -> usize {
        self.inner.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.lock().is_empty()
    }

    /// Run `f` with exclusive access to the allocator.
    pub fn with<R>(&self, f: impl FnOnce(&mut Allocator) -> R) -> R {
        f(&mut self.inner.lock())
    }
}
