//! Reference-counted handles to resources.

use std::any::TypeId;
use std::fmt;
use std::marker::PhantomData;
use std::sync::Arc;

use redlilium_core::ArenaHandle;

use crate::resource::{Resource, ResourceRecord};
use crate::state::ResourceState;

/// Identifies a resource slot in the manager.
///
/// Ids are generation-checked: once a resource was deallocated, its id never
/// resolves again, even if the slot is reused.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default)]
pub struct ResourceId(ArenaHandle);

impl ResourceId {
    pub const INVALID: ResourceId = ResourceId(ArenaHandle::INVALID);

    pub(crate) fn from_handle(handle: ArenaHandle) -> Self {
        Self(handle)
    }

    pub(crate) fn handle(&self) -> ArenaHandle {
        self.0
    }

    pub fn is_valid(&self) -> bool {
        self.0.is_valid()
    }
}

impl fmt::Debug for ResourceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Resource({:?})", self.0)
    }
}

/// A counted reference to a resource of any type.
///
/// Cloning increments the resource's reference count and dropping
/// decrements it. Resources with a count of zero may be freed by
/// [`ResourceManager::free_all_unused_resources`](crate::ResourceManager::free_all_unused_resources).
#[derive(Default)]
pub struct TypelessResourceHandle {
    record: Option<Arc<ResourceRecord>>,
}

impl TypelessResourceHandle {
    pub(crate) fn new(record: Arc<ResourceRecord>) -> Self {
        record.add_reference();
        Self {
            record: Some(record),
        }
    }

    /// A handle that refers to nothing.
    pub fn invalid() -> Self {
        Self::default()
    }

    pub fn is_valid(&self) -> bool {
        self.record.is_some()
    }

    pub fn resource_id(&self) -> ResourceId {
        self.record
            .as_ref()
            .map_or(ResourceId::INVALID, |record| record.resource_id())
    }

    pub fn id(&self) -> Option<&str> {
        self.record.as_deref().map(ResourceRecord::id)
    }

    /// Loading state, [`ResourceState::Invalid`] for invalid handles.
    pub fn state(&self) -> ResourceState {
        self.record
            .as_ref()
            .map_or(ResourceState::Invalid, |record| record.state())
    }

    /// Bookkeeping of the referenced resource.
    pub fn record(&self) -> Option<&ResourceRecord> {
        self.record.as_deref()
    }

    /// Converts to a typed handle if the resource is a `T`.
    pub fn downcast<T: Resource>(self) -> Option<ResourceHandle<T>> {
        let matches = self
            .record
            .as_ref()
            .is_some_and(|record| record.type_id() == TypeId::of::<T>());
        matches.then(|| ResourceHandle {
            inner: self,
            _marker: PhantomData,
        })
    }

    /// Drops the reference, leaving an invalid handle.
    pub fn invalidate(&mut self) {
        if let Some(record) = self.record.take() {
            record.release_reference();
        }
    }
}

impl Clone for TypelessResourceHandle {
    fn clone(&self) -> Self {
        match &self.record {
            Some(record) => Self::new(record.clone()),
            None => Self::invalid(),
        }
    }
}

impl Drop for TypelessResourceHandle {
    fn drop(&mut self) {
        self.invalidate();
    }
}

impl PartialEq for TypelessResourceHandle {
    fn eq(&self, other: &Self) -> bool {
        match (&self.record, &other.record) {
            (Some(a), Some(b)) => Arc::ptr_eq(a, b),
            (None, None) => true,
            _ => false,
        }
    }
}

impl Eq for TypelessResourceHandle {}

impl fmt::Debug for TypelessResourceHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.record {
            Some(record) => write!(f, "ResourceHandle({:?}, '{}')", record.resource_id(), record.id()),
            None => f.write_str("ResourceHandle(invalid)"),
        }
    }
}

/// A counted reference to a resource of type `T`.
pub struct ResourceHandle<T> {
    inner: TypelessResourceHandle,
    _marker: PhantomData<fn() -> T>,
}

impl<T: Resource> ResourceHandle<T> {
    pub(crate) fn new(record: Arc<ResourceRecord>) -> Self {
        debug_assert_eq!(record.type_id(), TypeId::of::<T>());
        Self {
            inner: TypelessResourceHandle::new(record),
            _marker: PhantomData,
        }
    }

    pub fn invalid() -> Self {
        Self {
            inner: TypelessResourceHandle::invalid(),
            _marker: PhantomData,
        }
    }

    pub fn is_valid(&self) -> bool {
        self.inner.is_valid()
    }

    pub fn resource_id(&self) -> ResourceId {
        self.inner.resource_id()
    }

    pub fn id(&self) -> Option<&str> {
        self.inner.id()
    }

    pub fn state(&self) -> ResourceState {
        self.inner.state()
    }

    pub fn record(&self) -> Option<&ResourceRecord> {
        self.inner.record()
    }

    pub fn typeless(&self) -> &TypelessResourceHandle {
        &self.inner
    }

    pub fn into_typeless(self) -> TypelessResourceHandle {
        self.inner
    }

    pub fn invalidate(&mut self) {
        self.inner.invalidate();
    }
}

impl<T: Resource> Default for ResourceHandle<T> {
    fn default() -> Self {
        Self::invalid()
    }
}

impl<T> Clone for ResourceHandle<T> {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
            _marker: PhantomData,
        }
    }
}

impl<T> PartialEq for ResourceHandle<T> {
    fn eq(&self, other: &Self) -> bool {
        self.inner == other.inner
    }
}

impl<T> Eq for ResourceHandle<T> {}

impl<T> fmt::Debug for ResourceHandle<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.inner.fmt(f)
    }
}

impl AsRef<TypelessResourceHandle> for TypelessResourceHandle {
    fn as_ref(&self) -> &TypelessResourceHandle {
        self
    }
}

impl<T> AsRef<TypelessResourceHandle> for ResourceHandle<T> {
    fn as_ref(&self) -> &TypelessResourceHandle {
        &self.inner
    }
}

impl<T> From<ResourceHandle<T>> for TypelessResourceHandle {
    fn from(handle: ResourceHandle<T>) -> Self {
        handle.inner
    }
}
