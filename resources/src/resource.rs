//! Resource payloads and their shared bookkeeping.
//!
//! A resource type implements [`Resource`]. The manager stores each instance
//! in a [`ResourceRecord`]: the loading state, flags and statistics live in
//! atomics readable from any thread, the payload sits behind a reader/writer
//! lock so consumers read while only content updates and unloads write.

use std::any::{Any, TypeId};
use std::cell::Cell;
use std::collections::hash_map::DefaultHasher;
use std::fmt;
use std::hash::{Hash, Hasher};
use std::sync::OnceLock;
use std::sync::atomic::{AtomicU8, AtomicU32, AtomicUsize, Ordering};
use std::time::{Instant, SystemTime};

use parking_lot::{Mutex, RwLock};

use crate::flags::{AtomicResourceFlags, ResourceFlags};
use crate::handle::{ResourceId, TypelessResourceHandle};
use crate::priority::ResourcePriority;
use crate::state::ResourceState;

/// What a resource reports after its content changed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ResourceLoadDesc {
    pub state: ResourceState,
    /// Quality levels that could be unloaded again.
    pub quality_levels_discardable: u8,
    /// Quality levels that could still be loaded.
    pub quality_levels_loadable: u8,
}

impl ResourceLoadDesc {
    /// Fully loaded, nothing more to stream in.
    pub fn loaded() -> Self {
        Self {
            state: ResourceState::Loaded,
            quality_levels_discardable: 0,
            quality_levels_loadable: 0,
        }
    }

    pub fn missing() -> Self {
        Self {
            state: ResourceState::LoadedResourceMissing,
            quality_levels_discardable: 0,
            quality_levels_loadable: 0,
        }
    }

    pub fn unloaded() -> Self {
        Self {
            state: ResourceState::Unloaded,
            quality_levels_discardable: 0,
            quality_levels_loadable: 0,
        }
    }
}

/// How much of a resource to unload.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Unload {
    AllQualityLevels,
    OneQualityLevel,
}

/// Memory held by a resource, in bytes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct MemoryUsage {
    pub cpu: u64,
    pub gpu: u64,
}

/// A streamable resource type.
///
/// # Example
///
/// ```
/// use redlilium_resources::{MemoryUsage, Resource, ResourceLoadDesc, Unload};
///
/// struct Text(String);
///
/// impl Resource for Text {
///     fn create(_id: &str) -> Self {
///         Text(String::new())
///     }
///
///     fn update_content(&mut self, data: &[u8]) -> ResourceLoadDesc {
///         match std::str::from_utf8(data) {
///             Ok(text) => {
///                 self.0 = text.to_owned();
///                 ResourceLoadDesc::loaded()
///             }
///             Err(_) => ResourceLoadDesc::missing(),
///         }
///     }
///
///     fn unload_data(&mut self, _what: Unload) -> ResourceLoadDesc {
///         self.0.clear();
///         ResourceLoadDesc::unloaded()
///     }
///
///     fn memory_usage(&self) -> MemoryUsage {
///         MemoryUsage { cpu: self.0.capacity() as u64, gpu: 0 }
///     }
/// }
/// ```
pub trait Resource: Send + Sync + Sized + 'static {
    /// Content updates of this type must run on the main thread.
    const UPDATE_ON_MAIN_THREAD: bool = false;
    /// Data for this type is produced without file access.
    const NO_FILE_ACCESS_REQUIRED: bool = false;

    /// Creates the empty, unloaded resource.
    fn create(id: &str) -> Self;

    /// Consumes loaded data. Return [`ResourceLoadDesc::missing`] for data
    /// that cannot be decoded.
    fn update_content(&mut self, data: &[u8]) -> ResourceLoadDesc;

    fn unload_data(&mut self, what: Unload) -> ResourceLoadDesc;

    fn memory_usage(&self) -> MemoryUsage;
}

/// A resource that can be created in place from a descriptor, see
/// [`ResourceManager::create_resource`](crate::ResourceManager::create_resource).
pub trait CreateResource: Resource {
    type Descriptor: Send + 'static;

    fn create_from_descriptor(&mut self, descriptor: Self::Descriptor) -> ResourceLoadDesc;
}

/// Type-erased access to the payload of a [`ResourceRecord`].
pub(crate) trait ErasedContent: Send + Sync {
    fn update_content(&self, data: &[u8]) -> ResourceLoadDesc;
    fn unload_data(&self, what: Unload) -> ResourceLoadDesc;
    fn memory_usage(&self) -> MemoryUsage;
    fn as_any(&self) -> &dyn Any;
}

pub(crate) struct TypedContent<T> {
    pub(crate) content: RwLock<T>,
}

impl<T: Resource> ErasedContent for TypedContent<T> {
    fn update_content(&self, data: &[u8]) -> ResourceLoadDesc {
        self.content.write().update_content(data)
    }

    fn unload_data(&self, what: Unload) -> ResourceLoadDesc {
        self.content.write().unload_data(what)
    }

    fn memory_usage(&self) -> MemoryUsage {
        self.content.read().memory_usage()
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

thread_local! {
    static UPDATING_CONTENT: Cell<Option<TypeId>> = const { Cell::new(None) };
}

/// Type whose content is being updated on this thread, if any.
pub(crate) fn currently_updating_content() -> Option<TypeId> {
    UPDATING_CONTENT.with(Cell::get)
}

/// Marks the current thread as updating content of a type until dropped.
pub(crate) struct UpdatingContentScope {
    previous: Option<TypeId>,
}

impl UpdatingContentScope {
    pub(crate) fn enter(type_id: TypeId) -> Self {
        let previous = UPDATING_CONTENT.with(|cell| cell.replace(Some(type_id)));
        Self { previous }
    }
}

impl Drop for UpdatingContentScope {
    fn drop(&mut self) {
        UPDATING_CONTENT.with(|cell| cell.set(self.previous));
    }
}

/// 64-bit hash of a resource identifier.
pub fn hash_resource_id(id: &str) -> u64 {
    let mut hasher = DefaultHasher::new();
    id.hash(&mut hasher);
    hasher.finish()
}

/// Shared state of one resource instance.
///
/// Records are owned by the manager and by every handle to them. Loaders
/// receive a reference to query the identifier and what was loaded before.
pub struct ResourceRecord {
    handle: ResourceId,
    type_id: TypeId,
    type_name: &'static str,
    id: String,
    id_hash: u64,
    state: AtomicU8,
    pub(crate) flags: AtomicResourceFlags,
    priority: AtomicU8,
    reference_count: AtomicUsize,
    last_acquire: Mutex<Option<Instant>>,
    quality_levels_discardable: AtomicU8,
    quality_levels_loadable: AtomicU8,
    memory_usage: Mutex<MemoryUsage>,
    description: RwLock<String>,
    modification_time: Mutex<Option<SystemTime>>,
    change_counter: AtomicU32,
    loading_fallback: OnceLock<TypelessResourceHandle>,
    pub(crate) content: Box<dyn ErasedContent>,
}

impl ResourceRecord {
    pub(crate) fn new<T: Resource>(
        handle: ResourceId,
        id: &str,
        flags: ResourceFlags,
        priority: ResourcePriority,
    ) -> Self {
        let mut flags = flags;
        flags.set(ResourceFlags::UPDATE_ON_MAIN_THREAD, T::UPDATE_ON_MAIN_THREAD);
        flags.set(ResourceFlags::NO_FILE_ACCESS_REQUIRED, T::NO_FILE_ACCESS_REQUIRED);

        Self {
            handle,
            type_id: TypeId::of::<T>(),
            type_name: std::any::type_name::<T>(),
            id: id.to_owned(),
            id_hash: hash_resource_id(id),
            state: AtomicU8::new(ResourceState::Unloaded as u8),
            flags: AtomicResourceFlags::new(flags),
            priority: AtomicU8::new(priority as u8),
            reference_count: AtomicUsize::new(0),
            last_acquire: Mutex::new(None),
            quality_levels_discardable: AtomicU8::new(0),
            quality_levels_loadable: AtomicU8::new(0),
            memory_usage: Mutex::new(MemoryUsage::default()),
            description: RwLock::new(String::new()),
            modification_time: Mutex::new(None),
            change_counter: AtomicU32::new(0),
            loading_fallback: OnceLock::new(),
            content: Box::new(TypedContent {
                content: RwLock::new(T::create(id)),
            }),
        }
    }

    pub fn resource_id(&self) -> ResourceId {
        self.handle
    }

    /// Identifier the resource was requested with.
    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn id_hash(&self) -> u64 {
        self.id_hash
    }

    pub fn type_id(&self) -> TypeId {
        self.type_id
    }

    pub fn type_name(&self) -> &'static str {
        self.type_name
    }

    pub fn state(&self) -> ResourceState {
        ResourceState::from_u8(self.state.load(Ordering::Acquire))
    }

    pub fn flags(&self) -> ResourceFlags {
        self.flags.get()
    }

    pub fn priority(&self) -> ResourcePriority {
        ResourcePriority::from_u8(self.priority.load(Ordering::Relaxed))
    }

    pub(crate) fn set_priority(&self, priority: ResourcePriority) {
        self.priority.store(priority as u8, Ordering::Relaxed);
    }

    /// Number of live handles.
    pub fn reference_count(&self) -> usize {
        self.reference_count.load(Ordering::Acquire)
    }

    pub(crate) fn add_reference(&self) {
        self.reference_count.fetch_add(1, Ordering::AcqRel);
    }

    pub(crate) fn release_reference(&self) {
        let previous = self.reference_count.fetch_sub(1, Ordering::AcqRel);
        debug_assert!(previous > 0, "resource '{}' released too often", self.id);
    }

    pub fn last_acquire(&self) -> Option<Instant> {
        *self.last_acquire.lock()
    }

    pub(crate) fn touch(&self, now: Instant) {
        *self.last_acquire.lock() = Some(now);
    }

    /// Loading queue score of this resource at `now`.
    pub fn loading_score(&self, now: Instant) -> f32 {
        self.priority().loading_score(self.last_acquire(), now)
    }

    pub fn quality_levels_discardable(&self) -> u8 {
        self.quality_levels_discardable.load(Ordering::Relaxed)
    }

    pub fn quality_levels_loadable(&self) -> u8 {
        self.quality_levels_loadable.load(Ordering::Relaxed)
    }

    pub fn memory_usage(&self) -> MemoryUsage {
        *self.memory_usage.lock()
    }

    /// Free-form description, e.g. the file the data came from.
    pub fn description(&self) -> String {
        self.description.read().clone()
    }

    pub(crate) fn set_description(&self, description: String) {
        *self.description.write() = description;
    }

    /// Modification time of the data that was loaded last, as reported by
    /// the loader.
    pub fn loaded_modification_time(&self) -> Option<SystemTime> {
        *self.modification_time.lock()
    }

    pub(crate) fn set_loaded_modification_time(&self, time: Option<SystemTime>) {
        *self.modification_time.lock() = time;
    }

    /// Incremented every time the content changed.
    pub fn change_counter(&self) -> u32 {
        self.change_counter.load(Ordering::Acquire)
    }

    pub(crate) fn loading_fallback(&self) -> Option<&TypelessResourceHandle> {
        self.loading_fallback.get()
    }

    pub(crate) fn set_loading_fallback(&self, fallback: TypelessResourceHandle) -> bool {
        if self.loading_fallback.set(fallback).is_err() {
            return false;
        }
        self.flags.insert(ResourceFlags::RESOURCE_HAS_FALLBACK);
        true
    }

    /// The payload, if the record holds a `T`.
    pub(crate) fn typed_content<T: Resource>(&self) -> Option<&TypedContent<T>> {
        self.content.as_any().downcast_ref::<TypedContent<T>>()
    }

    /// Applies what the resource reported after a content change. Returns
    /// the previous state.
    ///
    /// Only touches atomics, so it is safe under the manager lock.
    pub(crate) fn apply_load_desc(&self, desc: ResourceLoadDesc) -> ResourceState {
        self.quality_levels_discardable
            .store(desc.quality_levels_discardable, Ordering::Relaxed);
        self.quality_levels_loadable
            .store(desc.quality_levels_loadable, Ordering::Relaxed);
        self.change_counter.fetch_add(1, Ordering::AcqRel);
        ResourceState::from_u8(self.state.swap(desc.state as u8, Ordering::AcqRel))
    }

    /// Reads the memory usage from the payload. Takes the payload read lock;
    /// never call it under the manager lock.
    pub(crate) fn refresh_memory_usage(&self) {
        let usage = self.content.memory_usage();
        *self.memory_usage.lock() = usage;
    }

    pub(crate) fn update_content(&self, data: &[u8]) -> ResourceLoadDesc {
        let _scope = UpdatingContentScope::enter(self.type_id);
        self.content.update_content(data)
    }

    /// Unloads the payload. Returns the previous state.
    pub(crate) fn unload_data(&self, what: Unload) -> ResourceState {
        let desc = self.content.unload_data(what);
        if what == Unload::AllQualityLevels {
            debug_assert!(
                desc.state <= ResourceState::LoadedResourceMissing,
                "resource '{}' should be unloaded now",
                self.id
            );
        }
        self.refresh_memory_usage();
        self.apply_load_desc(desc)
    }
}

impl fmt::Debug for ResourceRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ResourceRecord")
            .field("id", &self.id)
            .field("type", &self.type_name)
            .field("handle", &self.handle)
            .field("state", &self.state())
            .field("flags", &self.flags())
            .field("references", &self.reference_count())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Default)]
    struct Blob {
        bytes: Vec<u8>,
    }

    impl Resource for Blob {
        const UPDATE_ON_MAIN_THREAD: bool = true;

        fn create(_id: &str) -> Self {
            Self::default()
        }

        fn update_content(&mut self, data: &[u8]) -> ResourceLoadDesc {
            self.bytes = data.to_vec();
            ResourceLoadDesc::loaded()
        }

        fn unload_data(&mut self, _what: Unload) -> ResourceLoadDesc {
            self.bytes.clear();
            ResourceLoadDesc::unloaded()
        }

        fn memory_usage(&self) -> MemoryUsage {
            MemoryUsage {
                cpu: self.bytes.len() as u64,
                gpu: 0,
            }
        }
    }

    fn record() -> ResourceRecord {
        ResourceRecord::new::<Blob>(
            ResourceId::INVALID,
            "blob.bin",
            ResourceFlags::IS_RELOADABLE,
            ResourcePriority::High,
        )
    }

    #[test]
    fn new_record_is_unloaded_with_type_flags() {
        let record = record();
        assert_eq!(record.state(), ResourceState::Unloaded);
        assert!(record.flags().contains(ResourceFlags::UPDATE_ON_MAIN_THREAD));
        assert!(!record.flags().contains(ResourceFlags::NO_FILE_ACCESS_REQUIRED));
        assert_eq!(record.priority(), ResourcePriority::High);
        assert_eq!(record.id_hash(), hash_resource_id("blob.bin"));
    }

    #[test]
    fn update_and_unload_track_state_and_memory() {
        let record = record();
        let desc = record.update_content(b"abcd");
        record.refresh_memory_usage();
        assert_eq!(record.apply_load_desc(desc), ResourceState::Unloaded);
        assert_eq!(record.state(), ResourceState::Loaded);
        assert_eq!(record.memory_usage().cpu, 4);
        assert_eq!(
            record
                .typed_content::<Blob>()
                .map(|typed| typed.content.read().bytes.len()),
            Some(4)
        );

        assert_eq!(record.unload_data(Unload::AllQualityLevels), ResourceState::Loaded);
        assert_eq!(record.state(), ResourceState::Unloaded);
        assert_eq!(record.memory_usage(), MemoryUsage::default());
        assert_eq!(record.change_counter(), 2);
    }

    #[test]
    fn content_of_other_type_is_not_readable() {
        let record = record();
        assert!(record.typed_content::<Blob>().is_some());

        struct Other;
        impl Resource for Other {
            fn create(_id: &str) -> Self {
                Other
            }
            fn update_content(&mut self, _data: &[u8]) -> ResourceLoadDesc {
                ResourceLoadDesc::loaded()
            }
            fn unload_data(&mut self, _what: Unload) -> ResourceLoadDesc {
                ResourceLoadDesc::unloaded()
            }
            fn memory_usage(&self) -> MemoryUsage {
                MemoryUsage::default()
            }
        }
        assert!(record.typed_content::<Other>().is_none());
    }

    #[test]
    fn updating_scope_restores_previous_type() {
        assert_eq!(currently_updating_content(), None);
        {
            let _outer = UpdatingContentScope::enter(TypeId::of::<Blob>());
            {
                let _inner = UpdatingContentScope::enter(TypeId::of::<u32>());
                assert_eq!(currently_updating_content(), Some(TypeId::of::<u32>()));
            }
            assert_eq!(currently_updating_content(), Some(TypeId::of::<Blob>()));
        }
        assert_eq!(currently_updating_content(), None);
    }
}
