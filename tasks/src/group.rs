//! Task groups and their generation-checked handles.
//!
//! Group slots are recycled. Each slot carries a counter that is always odd
//! while a handle may refer to it: it advances by two when the slot is handed
//! out again and by two when the group finishes. A [`TaskGroupId`] remembers
//! the counter it was created with, so "finished" is simply "the slot's
//! counter moved on", and handles from an earlier use of the slot read as
//! finished instead of aliasing the new group.

use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicU32, Ordering};

use parking_lot::{Condvar, Mutex};

use crate::priority::TaskPriority;
use crate::task::Task;

/// Handle to a task group.
///
/// Equality requires both the slot index and the counter. The default
/// handle is invalid and always reads as finished.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct TaskGroupId {
    pub(crate) index: u32,
    pub(crate) counter: u32,
}

impl TaskGroupId {
    /// A handle that refers to no group.
    pub const INVALID: Self = Self {
        index: 0,
        counter: 0,
    };

    pub fn is_valid(&self) -> bool {
        self.counter != 0
    }

    /// Slot index of the group.
    pub fn index(&self) -> u32 {
        self.index
    }

    /// Generation counter captured when the group was created.
    pub fn counter(&self) -> u32 {
        self.counter
    }
}

impl fmt::Debug for TaskGroupId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_valid() {
            write!(f, "TaskGroup({}#{})", self.index, self.counter)
        } else {
            f.write_str("TaskGroup(invalid)")
        }
    }
}

/// Callback invoked once a group finished, with the handle of the group.
pub type GroupFinishedCallback = Box<dyn FnOnce(TaskGroupId) + Send>;

/// Lock-free part of a group slot, readable without the scheduler lock.
pub(crate) struct GroupSlot {
    counter: AtomicU32,
    remaining_tasks: AtomicU32,
    wait_lock: Mutex<()>,
    finished: Condvar,
}

impl GroupSlot {
    pub(crate) fn new() -> Self {
        Self {
            counter: AtomicU32::new(1),
            remaining_tasks: AtomicU32::new(0),
            wait_lock: Mutex::new(()),
            finished: Condvar::new(),
        }
    }

    pub(crate) fn counter(&self) -> u32 {
        self.counter.load(Ordering::Acquire)
    }

    /// Hands the slot out again and returns the new counter.
    pub(crate) fn reuse(&self) -> u32 {
        self.counter.fetch_add(2, Ordering::AcqRel) + 2
    }

    pub(crate) fn set_remaining_tasks(&self, count: u32) {
        self.remaining_tasks.store(count, Ordering::Release);
    }

    /// Returns `true` if this was the last outstanding task.
    pub(crate) fn task_finished(&self) -> bool {
        let previous = self.remaining_tasks.fetch_sub(1, Ordering::AcqRel);
        debug_assert!(previous > 0, "group finished more tasks than it had");
        previous == 1
    }

    /// Advances the counter, which makes every handle read as finished.
    pub(crate) fn mark_finished(&self) {
        let _guard = self.wait_lock.lock();
        self.counter.fetch_add(2, Ordering::AcqRel);
    }

    pub(crate) fn notify_waiters(&self) {
        self.finished.notify_all();
    }

    /// Blocks until the group behind `counter` finished.
    pub(crate) fn wait_for_finish(&self, counter: u32) {
        let mut guard = self.wait_lock.lock();
        while self.counter() == counter {
            self.finished.wait(&mut guard);
        }
    }
}

/// Part of a group slot guarded by the scheduler lock.
pub(crate) struct GroupData {
    pub(crate) slot: Arc<GroupSlot>,
    pub(crate) in_use: bool,
    pub(crate) started: bool,
    pub(crate) priority: TaskPriority,
    pub(crate) tasks: Vec<Arc<Task>>,
    pub(crate) depends_on: Vec<TaskGroupId>,
    pub(crate) dependents: Vec<TaskGroupId>,
    pub(crate) active_dependencies: u32,
    pub(crate) on_finished: Option<GroupFinishedCallback>,
}

impl GroupData {
    pub(crate) fn new() -> Self {
        Self {
            slot: Arc::new(GroupSlot::new()),
            in_use: false,
            started: false,
            priority: TaskPriority::ThisFrame,
            tasks: Vec::new(),
            depends_on: Vec::new(),
            dependents: Vec::new(),
            active_dependencies: 0,
            on_finished: None,
        }
    }

    /// Prepares a free slot for a new group, keeping allocations.
    pub(crate) fn reuse(
        &mut self,
        priority: TaskPriority,
        on_finished: Option<GroupFinishedCallback>,
    ) {
        debug_assert!(!self.in_use);
        self.in_use = true;
        self.started = false;
        self.priority = priority;
        self.tasks.clear();
        self.depends_on.clear();
        self.dependents.clear();
        self.active_dependencies = 0;
        self.on_finished = on_finished;
    }
}
