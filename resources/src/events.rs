//! Notifications about resource and manager changes.
//!
//! Listeners are called on whichever thread caused the change, after the
//! manager released its lock, so they may call back into the manager.

use std::sync::Arc;

use crate::handle::ResourceId;
use crate::state::ResourceState;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResourceEventKind {
    /// The loading state changed.
    LoadingStateChanged,
    /// New content was loaded, including reloads.
    ContentUpdated,
    /// The content is about to be unloaded.
    ContentUnloading,
    /// The resource was deallocated. Its id no longer resolves.
    ResourceDeleted,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ResourceEvent {
    pub kind: ResourceEventKind,
    pub resource: ResourceId,
    pub id: String,
    pub type_name: &'static str,
    /// State at the time of the event.
    pub state: ResourceState,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ManagerEvent {
    /// A reload of all resources reloaded at least one resource.
    ReloadAllResources,
    ShuttingDown,
}

/// Returned by listener registration, used to remove the listener again.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ListenerId(u64);

type ResourceListener = Arc<dyn Fn(&ResourceEvent) + Send + Sync>;
type ManagerListener = Arc<dyn Fn(ManagerEvent) + Send + Sync>;

#[derive(Default)]
pub(crate) struct Listeners {
    next_id: u64,
    resource: Vec<(ListenerId, ResourceListener)>,
    manager: Vec<(ListenerId, ManagerListener)>,
}

impl Listeners {
    fn next_id(&mut self) -> ListenerId {
        self.next_id += 1;
        ListenerId(self.next_id)
    }

    pub(crate) fn add_resource_listener(&mut self, listener: ResourceListener) -> ListenerId {
        let id = self.next_id();
        self.resource.push((id, listener));
        id
    }

    pub(crate) fn add_manager_listener(&mut self, listener: ManagerListener) -> ListenerId {
        let id = self.next_id();
        self.manager.push((id, listener));
        id
    }

    pub(crate) fn remove(&mut self, id: ListenerId) -> bool {
        let before = self.resource.len() + self.manager.len();
        self.resource.retain(|(listener, _)| *listener != id);
        self.manager.retain(|(listener, _)| *listener != id);
        before != self.resource.len() + self.manager.len()
    }

    pub(crate) fn resource_listeners(&self) -> Vec<ResourceListener> {
        self.resource.iter().map(|(_, listener)| listener.clone()).collect()
    }

    pub(crate) fn manager_listeners(&self) -> Vec<ManagerListener> {
        self.manager.iter().map(|(_, listener)| listener.clone()).collect()
    }
}

/// Events collected while the manager lock is held.
#[derive(Debug, Default)]
pub(crate) struct PendingEvents {
    pub(crate) resource: Vec<ResourceEvent>,
    pub(crate) manager: Vec<ManagerEvent>,
}

impl PendingEvents {
    pub(crate) fn is_empty(&self) -> bool {
        self.resource.is_empty() && self.manager.is_empty()
    }
}
