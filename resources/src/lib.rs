//! # RedLilium Resources
//!
//! Asynchronous resource streaming on top of the `redlilium-tasks`
//! scheduler.
//!
//! Resources are created unloaded by [`ResourceManager::load_resource`] and
//! queued for loading when they are preloaded or acquired. The
//! [`LoadingQueue`] is kept roughly ordered by a per-frame incremental sort;
//! file access workers take resources from its front, read their data through
//! a [`ResourceTypeLoader`] and hand it to a content update task. Reloads
//! coordinate with loads that are already in flight.

mod acquire;
mod config;
mod error;
mod events;
mod flags;
mod handle;
mod loader;
mod loading_queue;
mod manager;
mod priority;
mod resource;
mod state;
#[cfg(feature = "watcher")]
mod watcher;

pub use acquire::{AcquireMode, AcquireResult, ResourceLock};
pub use config::ResourceManagerConfig;
pub use error::AcquireError;
pub use events::{ListenerId, ManagerEvent, ResourceEvent, ResourceEventKind};
pub use flags::ResourceFlags;
pub use handle::{ResourceHandle, ResourceId, TypelessResourceHandle};
pub use loader::{FileResourceLoader, LoaderData, MemoryResourceLoader, ResourceTypeLoader};
pub use loading_queue::{LoadingQueue, LoadingQueueEntry};
pub use manager::ResourceManager;
pub use priority::ResourcePriority;
pub use resource::{
    CreateResource, MemoryUsage, Resource, ResourceLoadDesc, ResourceRecord, Unload,
    hash_resource_id,
};
pub use state::ResourceState;
#[cfg(feature = "watcher")]
pub use watcher::ResourceWatcher;
