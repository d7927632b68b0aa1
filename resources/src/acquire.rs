use std::fmt;
use std::ops::Deref;

use parking_lot::RwLockReadGuard;

use crate::resource::{Resource, ResourceRecord};

/// How [`ResourceManager::acquire`](crate::ResourceManager::acquire) deals
/// with resources that are not loaded yet.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum AcquireMode {
    /// Returns the payload as is, without loading or waiting.
    PointerOnly,
    /// Queues the resource and waits for it. Never returns a fallback.
    NoFallback,
    /// Queues the resource and returns its loading fallback while it loads.
    /// Waits like [`AcquireMode::NoFallback`] if no fallback is set.
    #[default]
    AllowLoadingFallback,
    /// Queues the resource with the highest priority and waits for it.
    BlockTillLoaded,
}

/// What a [`ResourceLock`] points at.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AcquireResult {
    /// The requested resource.
    Final,
    /// The loading fallback of the requested resource.
    LoadingFallback,
}

/// Read access to a resource payload.
///
/// Content updates and unloads of the resource wait until every lock is
/// dropped, so keep it short-lived.
pub struct ResourceLock<'a, T> {
    guard: RwLockReadGuard<'a, T>,
    record: &'a ResourceRecord,
    result: AcquireResult,
}

impl<'a, T: Resource> ResourceLock<'a, T> {
    pub(crate) fn new(
        guard: RwLockReadGuard<'a, T>,
        record: &'a ResourceRecord,
        result: AcquireResult,
    ) -> Self {
        Self {
            guard,
            record,
            result,
        }
    }

    pub fn result(&self) -> AcquireResult {
        self.result
    }

    /// Bookkeeping of the resource the lock points at, which is the
    /// fallback for [`AcquireResult::LoadingFallback`].
    pub fn record(&self) -> &'a ResourceRecord {
        self.record
    }
}

impl<T> Deref for ResourceLock<'_, T> {
    type Target = T;

    fn deref(&self) -> &T {
        &self.guard
    }
}

impl<T> fmt::Debug for ResourceLock<'_, T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ResourceLock")
            .field("id", &self.record.id())
            .field("result", &self.result)
            .finish()
    }
}
