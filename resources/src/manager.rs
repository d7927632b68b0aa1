//! The resource manager: resource table, loading queue and the tasks that
//! stream data in.
//!
//! # Loading pipeline
//!
//! A preload puts the resource into the [`LoadingQueue`] and, if allowed,
//! starts a data load task in the [`TaskPriority::FileAccess`] band. That
//! task keeps popping the front of the queue, opens the data through the
//! resource's loader and starts one content update task per resource, on
//! the main thread for types that require it and in
//! [`TaskPriority::LateNextFrame`] otherwise. Only one data load task runs at
//! a time unless a file access worker itself asks for a resource with the
//! highest priority, which would otherwise wait for itself.
//!
//! # Locking
//!
//! All bookkeeping sits behind one mutex. Payload locks are never taken
//! while it is held, and listeners are called after it was released.

use std::any::{TypeId, type_name};
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};
use std::time::{Duration, Instant};

use parking_lot::{Mutex, RwLock};
use redlilium_core::Arena;
use redlilium_core::profiling::{profile_message, profile_plot, profile_scope, profile_scope_dynamic};
use redlilium_tasks::{
    OnTaskRunning, Scheduler, Task, TaskContext, TaskGroupId, TaskNesting, TaskPriority, TaskWork,
    WorkerType,
};

use crate::acquire::{AcquireMode, AcquireResult, ResourceLock};
use crate::config::ResourceManagerConfig;
use crate::error::AcquireError;
use crate::events::{
    ListenerId, Listeners, ManagerEvent, PendingEvents, ResourceEvent, ResourceEventKind,
};
use crate::flags::ResourceFlags;
use crate::handle::{ResourceHandle, ResourceId, TypelessResourceHandle};
use crate::loader::{FileResourceLoader, LoaderData, ResourceTypeLoader};
use crate::loading_queue::{LoadingQueue, LoadingQueueEntry};
use crate::priority::ResourcePriority;
use crate::resource::{
    CreateResource, Resource, ResourceLoadDesc, ResourceRecord, Unload,
    currently_updating_content,
};
use crate::state::ResourceState;

struct TypeRecord {
    name: &'static str,
    priority: ResourcePriority,
    loader: Option<Arc<dyn ResourceTypeLoader>>,
    resources: HashMap<String, ResourceId>,
    /// Types whose resources may be acquired while content of this type is
    /// updated.
    nested_acquire: HashSet<TypeId>,
}

impl TypeRecord {
    fn new(name: &'static str, priority: ResourcePriority) -> Self {
        Self {
            name,
            priority,
            loader: None,
            resources: HashMap::new(),
            nested_acquire: HashSet::new(),
        }
    }
}

/// A content update task that has been started.
struct PendingContentUpdate {
    resource: ResourceId,
    type_id: TypeId,
    group: TaskGroupId,
}

struct ManagerState {
    resources: Arena<Arc<ResourceRecord>>,
    types: HashMap<TypeId, TypeRecord>,
    /// Lookup name to real resource id.
    named: HashMap<String, String>,
    loading_queue: LoadingQueue,
    allow_launch_data_load: bool,
    data_load_groups: Vec<TaskGroupId>,
    content_updates: Vec<PendingContentUpdate>,
    custom_loaders: HashMap<ResourceId, Arc<dyn ResourceTypeLoader>>,
    default_loader: Option<Arc<dyn ResourceTypeLoader>>,
    /// Unloads that have to wait for the main thread, keyed by id hash.
    pending_main_thread_unloads: HashMap<u64, TypeId>,
    next_data_loader: u64,
    next_unique_id: u64,
    free_unused_cursor: usize,
    events: PendingEvents,
}

pub(crate) struct ManagerShared {
    config: ResourceManagerConfig,
    scheduler: Scheduler,
    state: Mutex<ManagerState>,
    listeners: RwLock<Listeners>,
    last_frame_update: Mutex<Instant>,
    shutting_down: AtomicBool,
}

/// Outcome of the locked part of a reload.
struct ReloadPlan {
    unload_now: bool,
    preload: bool,
}

/// A resource taken out of the queue by a data load task.
struct LoadJob {
    record: Arc<ResourceRecord>,
    loader: Option<Arc<dyn ResourceTypeLoader>>,
}

/// Body of a content update task.
struct ContentUpdateWork {
    manager: Weak<ManagerShared>,
    record: Arc<ResourceRecord>,
    loader: Option<Arc<dyn ResourceTypeLoader>>,
    /// `None` for types that open their data in this task.
    data: Mutex<Option<LoaderData>>,
}

impl TaskWork for ContentUpdateWork {
    fn execute(&self, _ctx: &TaskContext) {
        let Some(manager) = ResourceManager::upgrade(&self.manager) else {
            return;
        };
        let data = self.data.lock().take();
        manager.update_content(&self.record, self.loader.as_deref(), data);
    }
}

fn resource_event(kind: ResourceEventKind, record: &ResourceRecord) -> ResourceEvent {
    ResourceEvent {
        kind,
        resource: record.resource_id(),
        id: record.id().to_owned(),
        type_name: record.type_name(),
        state: record.state(),
    }
}

/// Handle to a resource manager. Clones share the same manager.
///
/// # Example
///
/// ```ignore
/// let scheduler = Scheduler::default();
/// let manager = ResourceManager::new(scheduler.clone(), ResourceManagerConfig::default());
/// manager.set_default_loader(FileResourceLoader::new("assets"));
///
/// let mesh = manager.load_resource::<Mesh>("meshes/rock.mesh");
/// manager.preload_resource(&mesh);
///
/// loop {
///     manager.per_frame_update();
///     if let Ok(mesh) = manager.acquire(&mesh, AcquireMode::AllowLoadingFallback) {
///         draw(&mesh);
///     }
///     scheduler.finish_frame_tasks();
/// }
/// ```
#[derive(Clone)]
pub struct ResourceManager {
    shared: Arc<ManagerShared>,
}

impl ResourceManager {
    /// Creates a manager that runs its loading tasks on `scheduler`.
    ///
    /// If the config names an `asset_root`, a [`FileResourceLoader`] rooted
    /// there becomes the default loader.
    pub fn new(scheduler: Scheduler, config: ResourceManagerConfig) -> Self {
        let default_loader = config.asset_root.as_ref().map(|root| {
            log::info!("Loading resources from {}", root.display());
            Arc::new(FileResourceLoader::new(root)) as Arc<dyn ResourceTypeLoader>
        });

        Self {
            shared: Arc::new(ManagerShared {
                config,
                scheduler,
                state: Mutex::new(ManagerState {
                    resources: Arena::new(),
                    types: HashMap::new(),
                    named: HashMap::new(),
                    loading_queue: LoadingQueue::new(),
                    allow_launch_data_load: true,
                    data_load_groups: Vec::new(),
                    content_updates: Vec::new(),
                    custom_loaders: HashMap::new(),
                    default_loader,
                    pending_main_thread_unloads: HashMap::new(),
                    next_data_loader: 0,
                    next_unique_id: 0,
                    free_unused_cursor: 0,
                    events: PendingEvents::default(),
                }),
                listeners: RwLock::new(Listeners::default()),
                last_frame_update: Mutex::new(Instant::now()),
                shutting_down: AtomicBool::new(false),
            }),
        }
    }

    fn upgrade(shared: &Weak<ManagerShared>) -> Option<Self> {
        shared.upgrade().map(|shared| Self { shared })
    }

    pub fn scheduler(&self) -> &Scheduler {
        &self.shared.scheduler
    }

    pub fn config(&self) -> &ResourceManagerConfig {
        &self.shared.config
    }

    pub fn is_shutting_down(&self) -> bool {
        self.shared.shutting_down.load(Ordering::Acquire)
    }

    fn last_frame_update(&self) -> Instant {
        *self.shared.last_frame_update.lock()
    }

    /// Runs `f` under the manager lock, then delivers the events it queued.
    fn locked<R>(&self, f: impl FnOnce(&mut ManagerState) -> R) -> R {
        let (result, events) = {
            let mut state = self.shared.state.lock();
            let result = f(&mut state);
            (result, std::mem::take(&mut state.events))
        };
        self.dispatch(events);
        result
    }

    fn dispatch(&self, events: PendingEvents) {
        if events.is_empty() {
            return;
        }
        let (resource_listeners, manager_listeners) = {
            let listeners = self.shared.listeners.read();
            (listeners.resource_listeners(), listeners.manager_listeners())
        };
        for event in events.manager {
            for listener in &manager_listeners {
                listener(event);
            }
        }
        for event in &events.resource {
            for listener in &resource_listeners {
                listener(event);
            }
        }
    }

    fn emit(&self, event: ResourceEvent) {
        self.dispatch(PendingEvents {
            resource: vec![event],
            manager: Vec::new(),
        });
    }

    // ---------------------------------------------------------------------
    // Resource types
    // ---------------------------------------------------------------------

    /// Registers `T`. Happens implicitly on first use of the type.
    pub fn register_resource_type<T: Resource>(&self) {
        self.locked(|state| {
            self.type_record::<T>(state);
        });
    }

    fn type_record<'s, T: Resource>(&self, state: &'s mut ManagerState) -> &'s mut TypeRecord {
        let priority = self.shared.config.default_priority;
        state.types.entry(TypeId::of::<T>()).or_insert_with(|| {
            log::debug!("Registered resource type {}", type_name::<T>());
            TypeRecord::new(type_name::<T>(), priority)
        })
    }

    /// Priority of resources of `T` created from now on.
    pub fn set_resource_type_priority<T: Resource>(&self, priority: ResourcePriority) {
        self.locked(|state| self.type_record::<T>(state).priority = priority);
    }

    /// Loader for resources of `T`. Overrides the default loader.
    pub fn set_resource_type_loader<T: Resource>(&self, loader: impl ResourceTypeLoader + 'static) {
        let loader: Arc<dyn ResourceTypeLoader> = Arc::new(loader);
        self.locked(|state| self.type_record::<T>(state).loader = Some(loader));
    }

    /// Loader for every type without its own loader.
    pub fn set_default_loader(&self, loader: impl ResourceTypeLoader + 'static) {
        let loader: Arc<dyn ResourceTypeLoader> = Arc::new(loader);
        self.locked(|state| state.default_loader = Some(loader));
    }

    /// Allows [`Resource::update_content`] of `Updated` to acquire resources
    /// of `Acquired`. Permissions are transitive.
    ///
    /// Waiting for a resource also helps with pending content updates, except
    /// for those that may acquire the awaited type, so undeclared nested
    /// acquires could deadlock. In debug builds they panic.
    pub fn allow_resource_type_acquire_during_update_content<Updated: Resource, Acquired: Resource>(
        &self,
    ) {
        self.locked(|state| {
            self.type_record::<Acquired>(state);
            self.type_record::<Updated>(state)
                .nested_acquire
                .insert(TypeId::of::<Acquired>());
        });
    }

    fn is_acquire_allowed(state: &ManagerState, updating: TypeId, acquired: TypeId) -> bool {
        let mut visited = HashSet::new();
        let mut pending = vec![updating];
        while let Some(type_id) = pending.pop() {
            if !visited.insert(type_id) {
                continue;
            }
            if let Some(record) = state.types.get(&type_id) {
                if record.nested_acquire.contains(&acquired) {
                    return true;
                }
                pending.extend(record.nested_acquire.iter().copied());
            }
        }
        false
    }

    fn type_loader(
        state: &ManagerState,
        record: &ResourceRecord,
    ) -> Option<Arc<dyn ResourceTypeLoader>> {
        state
            .types
            .get(&record.type_id())
            .and_then(|ty| ty.loader.clone())
            .or_else(|| state.default_loader.clone())
    }

    // ---------------------------------------------------------------------
    // Resources
    // ---------------------------------------------------------------------

    fn existing_record<T: Resource>(state: &ManagerState, id: &str) -> Option<Arc<ResourceRecord>> {
        let resource = state.types.get(&TypeId::of::<T>())?.resources.get(id)?;
        state.resources.get(resource.handle()).cloned()
    }

    fn get_or_create_record<T: Resource>(
        &self,
        state: &mut ManagerState,
        id: &str,
        reloadable: bool,
    ) -> Option<Arc<ResourceRecord>> {
        if id.is_empty() {
            return None;
        }
        if let Some(record) = Self::existing_record::<T>(state, id) {
            return Some(record);
        }

        let priority = self.type_record::<T>(state).priority;
        let flags = if reloadable {
            ResourceFlags::IS_RELOADABLE
        } else {
            ResourceFlags::empty()
        };
        let handle = state.resources.insert_with(|handle| {
            Arc::new(ResourceRecord::new::<T>(
                ResourceId::from_handle(handle),
                id,
                flags,
                priority,
            ))
        });
        self.type_record::<T>(state)
            .resources
            .insert(id.to_owned(), ResourceId::from_handle(handle));
        log::trace!("Created resource '{id}' ({})", type_name::<T>());
        state.resources.get(handle).cloned()
    }

    /// Returns a handle to the resource `id` of type `T`, creating the
    /// resource unloaded if it does not exist. Nothing is loaded until the
    /// resource is preloaded or acquired.
    ///
    /// Names registered with [`ResourceManager::register_named_resource`] are
    /// resolved first. An empty id yields an invalid handle.
    pub fn load_resource<T: Resource>(&self, id: &str) -> ResourceHandle<T> {
        self.locked(|state| {
            let resolved = state.named.get(id).cloned();
            let id = resolved.as_deref().unwrap_or(id);
            self.get_or_create_record::<T>(state, id, true)
                .map_or_else(ResourceHandle::invalid, ResourceHandle::new)
        })
    }

    /// Returns the resource if it was already created.
    pub fn get_existing_resource<T: Resource>(&self, id: &str) -> Option<ResourceHandle<T>> {
        self.locked(|state| Self::existing_record::<T>(state, id).map(ResourceHandle::new))
    }

    /// Returns the existing resource, or creates one whose data will come
    /// from `loader` when it is first loaded.
    ///
    /// Resources created this way are not reloadable from their source.
    pub fn get_existing_or_create_async<T: Resource>(
        &self,
        id: &str,
        loader: impl ResourceTypeLoader + 'static,
    ) -> ResourceHandle<T> {
        self.locked(|state| {
            if let Some(record) = Self::existing_record::<T>(state, id) {
                return ResourceHandle::new(record);
            }
            let Some(record) = self.get_or_create_record::<T>(state, id, false) else {
                return ResourceHandle::invalid();
            };
            record
                .flags
                .insert(ResourceFlags::IS_CREATED_RESOURCE | ResourceFlags::HAS_CUSTOM_DATA_LOADER);
            state
                .custom_loaders
                .insert(record.resource_id(), Arc::new(loader));
            ResourceHandle::new(record)
        })
    }

    /// Creates a resource and fills it from `descriptor` right away.
    ///
    /// # Panics
    ///
    /// Panics if the resource already has content, or if
    /// [`CreateResource::create_from_descriptor`] reports
    /// [`ResourceState::Unloaded`].
    pub fn create_resource<T: CreateResource>(
        &self,
        id: &str,
        descriptor: T::Descriptor,
    ) -> ResourceHandle<T> {
        let Some((record, handle)) = self.locked(|state| {
            let record = self.get_or_create_record::<T>(state, id, false)?;
            record.flags.insert(ResourceFlags::IS_CREATED_RESOURCE);
            let handle = ResourceHandle::<T>::new(record.clone());
            Some((record, handle))
        }) else {
            return ResourceHandle::invalid();
        };

        assert_eq!(
            record.state(),
            ResourceState::Unloaded,
            "resource '{id}' was already created"
        );
        let Some(content) = record.typed_content::<T>() else {
            return ResourceHandle::invalid();
        };
        let desc = content.content.write().create_from_descriptor(descriptor);
        assert_ne!(
            desc.state,
            ResourceState::Unloaded,
            "creating '{id}' from a descriptor must leave it loaded"
        );
        record.refresh_memory_usage();
        record.apply_load_desc(desc);
        self.emit(resource_event(ResourceEventKind::LoadingStateChanged, &record));
        handle
    }

    /// Returns the existing resource or creates it from `descriptor`.
    pub fn get_or_create_resource<T: CreateResource>(
        &self,
        id: &str,
        descriptor: T::Descriptor,
    ) -> ResourceHandle<T> {
        match self.get_existing_resource::<T>(id) {
            Some(handle) => handle,
            None => self.create_resource(id, descriptor),
        }
    }

    /// Returns `"{prefix}-{n}"` with a number unique to this manager.
    pub fn generate_unique_resource_id(&self, prefix: &str) -> String {
        let n = self.locked(|state| {
            state.next_unique_id += 1;
            state.next_unique_id
        });
        format!("{prefix}-{n}")
    }

    /// Makes `load_resource(lookup)` return the resource `target`.
    pub fn register_named_resource(&self, lookup: impl Into<String>, target: impl Into<String>) {
        let (lookup, target) = (lookup.into(), target.into());
        self.locked(|state| state.named.insert(lookup, target));
    }

    pub fn unregister_named_resource(&self, lookup: &str) {
        self.locked(|state| state.named.remove(lookup));
    }

    /// Shown instead of `handle` by [`AcquireMode::AllowLoadingFallback`]
    /// while it loads. Can be set once; returns `false` afterwards.
    pub fn set_loading_fallback<T: Resource>(
        &self,
        handle: &ResourceHandle<T>,
        fallback: ResourceHandle<T>,
    ) -> bool {
        assert!(handle != &fallback, "a resource cannot be its own fallback");
        handle
            .record()
            .is_some_and(|record| record.set_loading_fallback(fallback.into_typeless()))
    }

    /// Loading state, [`ResourceState::Invalid`] for invalid handles.
    pub fn get_loading_state(&self, handle: impl AsRef<TypelessResourceHandle>) -> ResourceState {
        handle.as_ref().state()
    }

    // ---------------------------------------------------------------------
    // Loading queue
    // ---------------------------------------------------------------------

    /// Queues the resource for loading.
    pub fn preload_resource(&self, handle: impl AsRef<TypelessResourceHandle>) {
        if let Some(record) = handle.as_ref().record() {
            self.internal_preload(record, false);
        }
    }

    /// Queues the resource at the front of the loading queue, or moves it
    /// there if it is already queued.
    pub fn preload_resource_highest_priority(&self, handle: impl AsRef<TypelessResourceHandle>) {
        if let Some(record) = handle.as_ref().record() {
            self.internal_preload(record, true);
        }
    }

    fn internal_preload(&self, record: &ResourceRecord, highest_priority: bool) {
        if self.is_shutting_down() {
            return;
        }
        self.locked(|state| self.preload_locked(state, record, highest_priority));
    }

    fn preload_locked(&self, state: &mut ManagerState, record: &ResourceRecord, highest_priority: bool) {
        if record.state() == ResourceState::Loaded && record.quality_levels_loadable() == 0 {
            return;
        }

        let flags = record.flags();
        if flags.contains(ResourceFlags::IS_QUEUED_FOR_LOADING) {
            if !highest_priority || !state.loading_queue.remove(record.resource_id()) {
                return;
            }
            record.flags.remove(ResourceFlags::IS_QUEUED_FOR_LOADING);
        } else if flags.contains(ResourceFlags::IS_BEING_LOADED) {
            return;
        }

        self.enqueue_locked(state, record, highest_priority);

        if highest_priority && self.scheduler().current_worker_type() == WorkerType::FileAccess {
            // The calling loader may be blocked on this very resource.
            state.allow_launch_data_load = true;
        }
        self.run_data_loader_task(state);
    }

    fn enqueue_locked(&self, state: &mut ManagerState, record: &ResourceRecord, highest_priority: bool) {
        debug_assert!(
            !record.flags.contains(ResourceFlags::IS_QUEUED_FOR_LOADING),
            "resource '{}' is queued twice",
            record.id()
        );
        record.flags.insert(ResourceFlags::IS_QUEUED_FOR_LOADING);
        if highest_priority {
            record.set_priority(ResourcePriority::Critical);
            state.loading_queue.push_front(record.resource_id(), 0.0);
        } else {
            let score = record.loading_score(self.last_frame_update());
            state.loading_queue.push_back(record.resource_id(), score);
        }
    }

    /// Starts a data load task if launching is allowed and work is queued.
    fn run_data_loader_task(&self, state: &mut ManagerState) {
        if self.is_shutting_down()
            || !state.allow_launch_data_load
            || state.loading_queue.is_empty()
        {
            return;
        }
        state.allow_launch_data_load = false;
        state.next_data_loader += 1;

        let weak = Arc::downgrade(&self.shared);
        let task = Task::new(
            format!("Resource Data Loader {}", state.next_data_loader),
            move |_ctx: &TaskContext| {
                if let Some(manager) = ResourceManager::upgrade(&weak) {
                    manager.run_data_loader();
                }
            },
        )
        .with_nesting(TaskNesting::Maybe)
        .into_shared();

        let scheduler = self.scheduler();
        let group = scheduler.start_single_task(task, TaskPriority::FileAccess, None);
        state
            .data_load_groups
            .retain(|group| !scheduler.is_task_group_finished(*group));
        state.data_load_groups.push(group);
    }

    fn run_data_loader(&self) {
        while let Some(job) = self.next_load_job() {
            self.load_data(job);
        }
    }

    fn next_load_job(&self) -> Option<LoadJob> {
        self.locked(|state| {
            loop {
                if self.is_shutting_down() {
                    return None;
                }
                let Some(entry) = state.loading_queue.pop_front() else {
                    state.allow_launch_data_load = true;
                    return None;
                };
                let Some(record) = state.resources.get(entry.resource.handle()).cloned() else {
                    continue;
                };
                record.flags.remove(ResourceFlags::IS_QUEUED_FOR_LOADING);
                record.flags.insert(ResourceFlags::IS_BEING_LOADED);

                let mut loader = None;
                if record.flags.contains(ResourceFlags::HAS_CUSTOM_DATA_LOADER) {
                    // Custom loaders are used once; the content stays until a
                    // forced reload.
                    record.flags.remove(ResourceFlags::HAS_CUSTOM_DATA_LOADER);
                    record.flags.insert(ResourceFlags::PREVENT_FILE_RELOAD);
                    loader = state.custom_loaders.remove(&record.resource_id());
                }
                let loader = loader.or_else(|| Self::type_loader(state, &record));
                return Some(LoadJob { record, loader });
            }
        })
    }

    fn open_data(record: &ResourceRecord, loader: Option<&dyn ResourceTypeLoader>) -> LoaderData {
        match loader {
            Some(loader) => loader.open_data_stream(record),
            None => {
                log::warn!(
                    "No loader for resource '{}' ({})",
                    record.id(),
                    record.type_name()
                );
                LoaderData::missing()
            }
        }
    }

    fn load_data(&self, job: LoadJob) {
        let LoadJob { record, loader } = job;
        profile_scope_dynamic!(record.id());

        let data = if record.flags.contains(ResourceFlags::NO_FILE_ACCESS_REQUIRED) {
            None
        } else {
            Some(Self::open_data(&record, loader.as_deref()))
        };
        let band = if record.flags.contains(ResourceFlags::UPDATE_ON_MAIN_THREAD) {
            TaskPriority::SomeFrameMainThread
        } else {
            TaskPriority::LateNextFrame
        };

        let task = Task::from_work(
            format!("Resource Content Update '{}'", record.id()),
            ContentUpdateWork {
                manager: Arc::downgrade(&self.shared),
                record: record.clone(),
                loader,
                data: Mutex::new(data),
            },
        )
        .with_nesting(TaskNesting::Maybe)
        .into_shared();

        self.locked(|state| {
            if self.is_shutting_down() {
                record.flags.remove(ResourceFlags::IS_BEING_LOADED);
                return;
            }
            let scheduler = self.scheduler();
            let group = scheduler.start_single_task(task, band, None);
            state
                .content_updates
                .retain(|update| !scheduler.is_task_group_finished(update.group));
            state.content_updates.push(PendingContentUpdate {
                resource: record.resource_id(),
                type_id: record.type_id(),
                group,
            });
        });
    }

    fn update_content(
        &self,
        record: &ResourceRecord,
        loader: Option<&dyn ResourceTypeLoader>,
        data: Option<LoaderData>,
    ) {
        let data = data.unwrap_or_else(|| Self::open_data(record, loader));
        let desc = match &data.data {
            Some(bytes) => record.update_content(bytes),
            None => {
                log::warn!(
                    "Resource '{}' ({}) is missing",
                    record.id(),
                    record.type_name()
                );
                ResourceLoadDesc::missing()
            }
        };
        if let Some(description) = &data.description {
            record.set_description(description.clone());
        }
        record.set_loaded_modification_time(data.modification_time);
        record.refresh_memory_usage();
        if let Some(loader) = loader {
            loader.close_data_stream(record, data);
        }

        self.locked(|state| {
            let previous = record.apply_load_desc(desc);
            record.flags.remove(ResourceFlags::IS_BEING_LOADED);
            if previous != record.state() {
                state
                    .events
                    .resource
                    .push(resource_event(ResourceEventKind::LoadingStateChanged, record));
            }
            state
                .events
                .resource
                .push(resource_event(ResourceEventKind::ContentUpdated, record));
        });
        log::trace!("Updated content of '{}': {:?}", record.id(), record.state());
    }

    /// Number of queued resources.
    pub fn loading_queue_len(&self) -> usize {
        self.locked(|state| state.loading_queue.len())
    }

    /// Snapshot of the loading queue, front first.
    pub fn loading_queue_entries(&self) -> Vec<LoadingQueueEntry> {
        self.locked(|state| state.loading_queue.iter().copied().collect())
    }

    /// `true` while resources are queued or any loading task is unfinished.
    pub fn is_any_loading_in_progress(&self) -> bool {
        let scheduler = self.scheduler();
        self.locked(|state| {
            !state.loading_queue.is_empty()
                || state
                    .data_load_groups
                    .iter()
                    .any(|group| !scheduler.is_task_group_finished(*group))
                || state
                    .content_updates
                    .iter()
                    .any(|update| !scheduler.is_task_group_finished(update.group))
        })
    }

    // ---------------------------------------------------------------------
    // Waiting and acquiring
    // ---------------------------------------------------------------------

    /// Loads the resource with the highest priority and waits for it.
    pub fn force_load_resource_now(&self, handle: impl AsRef<TypelessResourceHandle>) {
        let Some(record) = handle.as_ref().record() else {
            return;
        };
        if !record.state().is_settled() {
            self.internal_preload(record, true);
            self.ensure_state(record, ResourceState::Loaded);
        }
    }

    /// Waits until the resource reached `requested` or turned out missing,
    /// queueing it first if nothing is loading it.
    pub fn ensure_resource_loading_state(
        &self,
        handle: impl AsRef<TypelessResourceHandle>,
        requested: ResourceState,
    ) {
        let Some(record) = handle.as_ref().record() else {
            return;
        };
        let loading = ResourceFlags::IS_QUEUED_FOR_LOADING | ResourceFlags::IS_BEING_LOADED;
        if record.state() < requested && !record.flags().intersects(loading) {
            self.internal_preload(record, false);
        }
        self.ensure_state(record, requested);
    }

    fn ensure_state(&self, record: &ResourceRecord, requested: ResourceState) {
        let reached = || {
            let state = record.state();
            state >= requested || state == ResourceState::LoadedResourceMissing
        };

        let scheduler = self.scheduler();
        while !reached() {
            // Help with content updates that cannot acquire this resource's
            // type; the others might wait for us.
            let group = self.locked(|state| {
                state
                    .content_updates
                    .retain(|update| !scheduler.is_task_group_finished(update.group));
                let state: &ManagerState = state;
                state
                    .content_updates
                    .iter()
                    .find(|update| {
                        update.resource != record.resource_id()
                            && !Self::is_acquire_allowed(state, update.type_id, record.type_id())
                    })
                    .map(|update| update.group)
            });

            match group {
                Some(group) => scheduler.wait_for_group(group),
                None => scheduler.wait_for_condition(reached),
            }
        }
    }

    /// Read access to a resource, loading it as `mode` asks.
    ///
    /// Returns [`AcquireError::Missing`] for resources whose data could not
    /// be loaded.
    pub fn acquire<'a, T: Resource>(
        &self,
        handle: &'a ResourceHandle<T>,
        mode: AcquireMode,
    ) -> Result<ResourceLock<'a, T>, AcquireError> {
        let record = handle.record().ok_or(AcquireError::InvalidHandle)?;
        self.acquire_record(record, mode, AcquireResult::Final)
    }

    fn acquire_record<'a, T: Resource>(
        &self,
        record: &'a ResourceRecord,
        mode: AcquireMode,
        result: AcquireResult,
    ) -> Result<ResourceLock<'a, T>, AcquireError> {
        if mode != AcquireMode::PointerOnly
            && let Some(updating) = currently_updating_content()
        {
            let (allowed, updating_name) = self.locked(|state| {
                (
                    Self::is_acquire_allowed(state, updating, TypeId::of::<T>()),
                    state.types.get(&updating).map_or("<unknown>", |ty| ty.name),
                )
            });
            debug_assert!(
                allowed,
                "acquiring {} during the content update of {}; declare it with \
                 allow_resource_type_acquire_during_update_content first",
                type_name::<T>(),
                updating_name
            );
        }

        let content = record
            .typed_content::<T>()
            .ok_or_else(|| AcquireError::TypeMismatch {
                expected: type_name::<T>(),
                found: record.type_name(),
            })?;

        if mode == AcquireMode::PointerOnly {
            return Ok(ResourceLock::new(content.content.read(), record, result));
        }

        record.touch(self.last_frame_update());

        let state = record.state();
        if state == ResourceState::Loaded {
            if !record.flags.contains(ResourceFlags::IS_QUEUED_FOR_LOADING)
                && record.quality_levels_loadable() > 0
            {
                self.internal_preload(record, false);
            }
        } else if state != ResourceState::LoadedResourceMissing {
            self.internal_preload(record, mode == AcquireMode::BlockTillLoaded);

            if mode == AcquireMode::AllowLoadingFallback
                && let Some(fallback) = record.loading_fallback().and_then(|handle| handle.record())
            {
                return self.acquire_record(
                    fallback,
                    AcquireMode::BlockTillLoaded,
                    AcquireResult::LoadingFallback,
                );
            }

            self.ensure_state(record, ResourceState::Loaded);
        }

        if record.state() == ResourceState::LoadedResourceMissing {
            return Err(AcquireError::Missing(record.id().to_owned()));
        }
        Ok(ResourceLock::new(content.content.read(), record, result))
    }

    // ---------------------------------------------------------------------
    // Reloading
    // ---------------------------------------------------------------------

    /// Unloads the resource so it is loaded again from its source.
    ///
    /// Returns `false` if nothing was done: the resource is not reloadable,
    /// has no loader, was never loaded, is being loaded right now, or (unless
    /// `force`) its source did not change. A resource that is still waiting
    /// in the loading queue keeps its entry and skips the change check.
    ///
    /// The resource is queued again right away only if it was acquired
    /// recently; otherwise it loads on next use.
    pub fn reload_resource(&self, handle: impl AsRef<TypelessResourceHandle>, force: bool) -> bool {
        match handle.as_ref().record() {
            Some(record) => self.reload_record(record, force),
            None => false,
        }
    }

    fn reload_record(&self, record: &ResourceRecord, force: bool) -> bool {
        let Some(plan) = self.locked(|state| self.plan_reload(state, record, force)) else {
            return false;
        };
        if plan.unload_now {
            self.unload_record(record, Unload::AllQualityLevels);
        }
        if plan.preload {
            self.internal_preload(record, false);
        }
        true
    }

    fn plan_reload(
        &self,
        state: &mut ManagerState,
        record: &ResourceRecord,
        force: bool,
    ) -> Option<ReloadPlan> {
        let flags = record.flags();
        if !flags.contains(ResourceFlags::IS_RELOADABLE) {
            return None;
        }
        if !force && flags.contains(ResourceFlags::PREVENT_FILE_RELOAD) {
            return None;
        }
        let loader = state
            .custom_loaders
            .get(&record.resource_id())
            .cloned()
            .or_else(|| Self::type_loader(state, record))?;
        if record.state() == ResourceState::Unloaded {
            return None;
        }
        if flags.contains(ResourceFlags::IS_BEING_LOADED) {
            log::debug!(
                "Not reloading '{}', it is being loaded right now",
                record.id()
            );
            return None;
        }

        let queued = flags.contains(ResourceFlags::IS_QUEUED_FOR_LOADING);
        if !force && !queued {
            if !loader.is_resource_outdated(record) {
                return None;
            }
            if record.state() == ResourceState::LoadedResourceMissing {
                log::info!("Resource '{}' is missing, retrying", record.id());
            } else {
                log::info!("Resource '{}' is outdated, reloading", record.id());
            }
        }

        let unload_now = !flags.contains(ResourceFlags::UPDATE_ON_MAIN_THREAD)
            || self.scheduler().is_main_thread();
        if !unload_now {
            state
                .pending_main_thread_unloads
                .insert(record.id_hash(), record.type_id());
        }

        let window = self.shared.config.recent_acquire_window();
        let recently_acquired = record
            .last_acquire()
            .is_some_and(|last| last.elapsed() <= window);

        Some(ReloadPlan {
            unload_now,
            preload: !queued && recently_acquired,
        })
    }

    fn unload_record(&self, record: &ResourceRecord, what: Unload) {
        self.emit(resource_event(ResourceEventKind::ContentUnloading, record));
        let previous = record.unload_data(what);
        if previous != record.state() {
            self.emit(resource_event(ResourceEventKind::LoadingStateChanged, record));
        }
    }

    fn records_where(&self, predicate: impl Fn(&ResourceRecord) -> bool) -> Vec<Arc<ResourceRecord>> {
        self.locked(|state| {
            state
                .resources
                .iter()
                .filter(|(_, record)| predicate(record))
                .map(|(_, record)| record.clone())
                .collect()
        })
    }

    /// Reloads every resource of `T`. Returns how many were reloaded.
    pub fn reload_resources_of_type<T: Resource>(&self, force: bool) -> usize {
        self.records_where(|record| record.type_id() == TypeId::of::<T>())
            .iter()
            .filter(|record| self.reload_record(record, force))
            .count()
    }

    /// Reloads every resource with identifier `id`, of any type.
    pub fn reload_resources_with_id(&self, id: &str, force: bool) -> usize {
        self.records_where(|record| record.id() == id)
            .iter()
            .filter(|record| self.reload_record(record, force))
            .count()
    }

    /// Reloads all resources. Broadcasts [`ManagerEvent::ReloadAllResources`]
    /// if anything was reloaded.
    pub fn reload_all_resources(&self, force: bool) -> usize {
        profile_scope!("reload_all_resources");
        let reloaded = self
            .records_where(|_| true)
            .iter()
            .filter(|record| self.reload_record(record, force))
            .count();
        if reloaded > 0 {
            log::info!("Reloaded {reloaded} resources");
            profile_message!("reload_all_resources");
            self.dispatch(PendingEvents {
                resource: Vec::new(),
                manager: vec![ManagerEvent::ReloadAllResources],
            });
        }
        reloaded
    }

    /// Allows file reloads again after a custom loader provided the content,
    /// and reloads from the source.
    pub fn restore_resource(&self, handle: impl AsRef<TypelessResourceHandle>) -> bool {
        let Some(record) = handle.as_ref().record() else {
            return false;
        };
        record.flags.remove(ResourceFlags::PREVENT_FILE_RELOAD);
        self.reload_record(record, true)
    }

    /// Replaces the content with data from `loader`. Later non-forced
    /// reloads are ignored until [`ResourceManager::restore_resource`].
    pub fn update_resource_with_custom_loader(
        &self,
        handle: impl AsRef<TypelessResourceHandle>,
        loader: impl ResourceTypeLoader + 'static,
    ) -> bool {
        let Some(record) = handle.as_ref().record() else {
            return false;
        };
        let loader: Arc<dyn ResourceTypeLoader> = Arc::new(loader);
        self.locked(|state| {
            record.flags.insert(ResourceFlags::HAS_CUSTOM_DATA_LOADER);
            state.custom_loaders.insert(record.resource_id(), loader);
        });
        self.reload_record(record, true)
    }

    // ---------------------------------------------------------------------
    // Frame updates and freeing
    // ---------------------------------------------------------------------

    /// Call once per frame on the main thread.
    ///
    /// Performs unloads that had to wait for the main thread, rescores part
    /// of the loading queue and, if configured, frees unused resources
    /// within a time budget.
    pub fn per_frame_update(&self) {
        profile_scope!("resource_manager_per_frame_update");
        let now = Instant::now();
        *self.shared.last_frame_update.lock() = now;

        let window = self.shared.config.priority_update_window;
        let unloads = self.locked(|state| {
            let pending = std::mem::take(&mut state.pending_main_thread_unloads);
            let mut unloads = Vec::new();
            for (hash, type_id) in pending {
                let Some(ty) = state.types.get(&type_id) else {
                    continue;
                };
                unloads.extend(
                    ty.resources
                        .values()
                        .filter_map(|resource| state.resources.get(resource.handle()))
                        .filter(|record| record.id_hash() == hash)
                        .cloned(),
                );
            }

            let ManagerState {
                loading_queue,
                resources,
                ..
            } = state;
            loading_queue.update_priorities(window, |resource| {
                resources
                    .get(resource.handle())
                    .map(|record| record.loading_score(now))
            });
            profile_plot!("loading_queue_len", loading_queue.len());
            unloads
        });

        for record in &unloads {
            self.unload_record(record, Unload::AllQualityLevels);
        }

        if let Some((timeout, threshold)) = self.shared.config.auto_free_unused() {
            self.free_unused_resources(timeout, threshold);
        }
    }

    /// Takes an unreferenced resource out of all tables. Resources that are
    /// being loaded stay.
    ///
    /// Handles to tracked records are only created under the manager lock,
    /// so a count of zero seen here cannot grow until the lock is released.
    fn take_unused_locked(state: &mut ManagerState, resource: ResourceId) -> Option<Arc<ResourceRecord>> {
        let record = state.resources.get(resource.handle())?;
        if record.reference_count() > 0 || record.flags.contains(ResourceFlags::IS_BEING_LOADED) {
            return None;
        }
        let record = state.resources.remove(resource.handle())?;
        if record.flags.contains(ResourceFlags::IS_QUEUED_FOR_LOADING) {
            state.loading_queue.remove(resource);
            record.flags.remove(ResourceFlags::IS_QUEUED_FOR_LOADING);
        }
        if let Some(ty) = state.types.get_mut(&record.type_id()) {
            ty.resources.remove(record.id());
        }
        state.custom_loaders.remove(&resource);
        Some(record)
    }

    fn destroy_record(&self, record: Arc<ResourceRecord>) {
        if record.state() != ResourceState::Unloaded {
            self.unload_record(&record, Unload::AllQualityLevels);
        }
        log::trace!("Deleted resource '{}'", record.id());
        self.emit(resource_event(ResourceEventKind::ResourceDeleted, &record));
    }

    /// Frees every resource without handles, repeating while freeing
    /// releases further resources (e.g. loading fallbacks). Resources being
    /// loaded are skipped. Returns how many were freed.
    pub fn free_all_unused_resources(&self) -> usize {
        profile_scope!("free_all_unused_resources");
        let mut freed = 0;
        loop {
            let removed: Vec<Arc<ResourceRecord>> = self.locked(|state| {
                let unused: Vec<ResourceId> = state
                    .resources
                    .iter()
                    .filter(|(_, record)| record.reference_count() == 0)
                    .map(|(_, record)| record.resource_id())
                    .collect();
                unused
                    .into_iter()
                    .filter_map(|resource| Self::take_unused_locked(state, resource))
                    .collect()
            });
            if removed.is_empty() {
                break;
            }
            freed += removed.len();
            for record in removed {
                self.destroy_record(record);
            }
        }
        if freed > 0 {
            log::debug!("Freed {freed} unused resources");
        }
        freed
    }

    /// Frees unreferenced resources that were not acquired within
    /// `last_acquire_threshold`, spending at most about `timeout`.
    ///
    /// Continues where the previous call stopped, so calling this every
    /// frame eventually visits every resource.
    pub fn free_unused_resources(&self, timeout: Duration, last_acquire_threshold: Duration) -> usize {
        if timeout.is_zero() {
            return 0;
        }
        profile_scope!("free_unused_resources");
        let start = Instant::now();

        let removed: Vec<Arc<ResourceRecord>> = self.locked(|state| {
            let handles = state.resources.handles();
            let mut index = state.free_unused_cursor;
            let mut removed = Vec::new();
            while start.elapsed() < timeout {
                let Some(&handle) = handles.get(index) else {
                    index = 0;
                    break;
                };
                index += 1;

                let recently_acquired = state.resources.get(handle).is_some_and(|record| {
                    record
                        .last_acquire()
                        .is_some_and(|last| start.saturating_duration_since(last) < last_acquire_threshold)
                });
                if recently_acquired {
                    continue;
                }
                if let Some(record) = Self::take_unused_locked(state, ResourceId::from_handle(handle)) {
                    removed.push(record);
                }
            }
            state.free_unused_cursor = index;
            removed
        });

        let freed = removed.len();
        for record in removed {
            self.destroy_record(record);
        }
        freed
    }

    /// Number of resources in the table.
    pub fn resource_count(&self) -> usize {
        self.locked(|state| state.resources.len())
    }

    // ---------------------------------------------------------------------
    // Events
    // ---------------------------------------------------------------------

    pub fn add_event_listener(
        &self,
        listener: impl Fn(&ResourceEvent) + Send + Sync + 'static,
    ) -> ListenerId {
        self.shared
            .listeners
            .write()
            .add_resource_listener(Arc::new(listener))
    }

    pub fn add_manager_event_listener(
        &self,
        listener: impl Fn(ManagerEvent) + Send + Sync + 'static,
    ) -> ListenerId {
        self.shared
            .listeners
            .write()
            .add_manager_listener(Arc::new(listener))
    }

    pub fn remove_event_listener(&self, id: ListenerId) -> bool {
        self.shared.listeners.write().remove(id)
    }

    // ---------------------------------------------------------------------
    // Shutdown
    // ---------------------------------------------------------------------

    /// Stops loading and frees all unreferenced resources.
    ///
    /// Queued loads are dropped, loading tasks are cancelled (running ones
    /// are waited for). Resources still referenced afterwards are reported.
    pub fn shutdown(&self) {
        if self.shared.shutting_down.swap(true, Ordering::AcqRel) {
            return;
        }
        profile_message!("resource manager shutdown");
        self.dispatch(PendingEvents {
            resource: Vec::new(),
            manager: vec![ManagerEvent::ShuttingDown],
        });

        let groups: Vec<TaskGroupId> = self.locked(|state| {
            state.allow_launch_data_load = false;
            for entry in state.loading_queue.iter() {
                if let Some(record) = state.resources.get(entry.resource.handle()) {
                    record.flags.remove(ResourceFlags::IS_QUEUED_FOR_LOADING);
                }
            }
            state.loading_queue.clear();
            state
                .data_load_groups
                .drain(..)
                .chain(state.content_updates.drain(..).map(|update| update.group))
                .collect()
        });

        for group in groups {
            if let Err(err) = self
                .scheduler()
                .cancel_group(group, OnTaskRunning::WaitTillFinished)
            {
                log::debug!("Loading task finished during shutdown: {err}");
            }
        }

        // Cancelled content updates never cleared their flag.
        self.locked(|state| {
            for (_, record) in state.resources.iter() {
                record.flags.remove(ResourceFlags::IS_BEING_LOADED);
            }
        });

        let freed = self.free_all_unused_resources();
        let remaining = self.records_where(|_| true);
        for record in &remaining {
            log::warn!(
                "Resource '{}' ({}) is still referenced {} times at shutdown",
                record.id(),
                record.type_name(),
                record.reference_count()
            );
        }
        log::info!(
            "Resource manager shut down, freed {freed} resources, {} still referenced",
            remaining.len()
        );
    }
}
