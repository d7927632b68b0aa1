//! The task scheduler.
//!
//! [`Scheduler`] is a cheap, clonable handle to shared scheduler state: the
//! per-band queues, the group table and the worker pools. All queue and group
//! bookkeeping happens under one mutex; group completion counters and
//! generation counters are atomics so "is this group finished" never takes
//! the lock.
//!
//! # Example
//!
//! ```no_run
//! use redlilium_tasks::{Scheduler, SchedulerConfig, Task, TaskPriority};
//!
//! let scheduler = Scheduler::new(SchedulerConfig::default());
//!
//! let decode = scheduler.create_task_group(TaskPriority::ThisFrame);
//! scheduler.add_task_to_group(decode, Task::new("decode", |_| {}).into_shared());
//!
//! let upload = scheduler.create_task_group(TaskPriority::ThisFrameMainThread);
//! scheduler.add_task_to_group(upload, Task::new("upload", |_| {}).into_shared());
//! scheduler.add_task_group_dependency(upload, decode);
//!
//! scheduler.start_task_group_batch(&[upload, decode]);
//! scheduler.wait_for_group(upload);
//! ```

use std::collections::VecDeque;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::thread::{self, ThreadId};

use parking_lot::{Mutex, RwLock};
use redlilium_core::profiling::{profile_scope, profile_scope_dynamic};

use crate::config::SchedulerConfig;
use crate::error::CancelError;
use crate::frame::FrameBudget;
use crate::group::{GroupData, GroupFinishedCallback, GroupSlot, TaskGroupId};
use crate::priority::{PRIORITY_COUNT, TaskPriority, WorkerType};
use crate::task::{Task, TaskNesting, TaskState};
use crate::worker::{WorkerPools, WorkerSlot, WorkerState, current_task, replace_current_task};

static NEXT_SCHEDULER_ID: AtomicU64 = AtomicU64::new(1);

/// Which queued tasks a thread is willing to pick up.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskFilter {
    /// Any task in the scanned bands.
    Any,
    /// Used by threads that are blocked in a wait: only tasks that never wait
    /// themselves, or tasks of the group being waited for.
    NonNesting { waiting_for: TaskGroupId },
}

impl TaskFilter {
    fn accepts(&self, item: &QueuedTask) -> bool {
        match self {
            TaskFilter::Any => true,
            TaskFilter::NonNesting { waiting_for } => {
                item.task.nesting() == TaskNesting::Never
                    || (waiting_for.is_valid() && item.group == *waiting_for)
            }
        }
    }
}

/// What [`Scheduler::cancel_task`] does when the task is already executing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OnTaskRunning {
    /// Block (helping with other work) until the task finished.
    WaitTillFinished,
    /// Return immediately.
    ReturnWithoutBlocking,
}

/// One invocation of a task waiting in a band.
pub(crate) struct QueuedTask {
    pub(crate) task: Arc<Task>,
    pub(crate) group: TaskGroupId,
    pub(crate) invocation: u32,
}

pub(crate) struct SchedulerState {
    pub(crate) queues: [VecDeque<QueuedTask>; PRIORITY_COUNT],
    pub(crate) groups: Vec<GroupData>,
}

/// Follow-up work collected under the scheduler lock and run after it was
/// released.
#[derive(Default)]
struct Deferred {
    wake: [usize; 3],
    finished_groups: Vec<TaskGroupId>,
}

impl Deferred {
    fn wake(&mut self, priority: TaskPriority, count: usize) {
        if let Some(worker_type) = priority.worker_type()
            && let Some(index) = worker_type.pool_index()
        {
            self.wake[index] += count;
        }
    }
}

pub(crate) struct SchedulerShared {
    id: u64,
    config: SchedulerConfig,
    main_thread: ThreadId,
    shutting_down: AtomicBool,
    pub(crate) state: Mutex<SchedulerState>,
    group_slots: RwLock<Vec<Arc<GroupSlot>>>,
    pub(crate) workers: Mutex<WorkerPools>,
    pub(crate) frame: Mutex<FrameBudget>,
}

impl Drop for SchedulerShared {
    fn drop(&mut self) {
        self.shutting_down.store(true, Ordering::Release);
        Scheduler::stop_workers(self, &WorkerType::POOLED);
    }
}

/// Handle to a task scheduler. Clones share the same scheduler; the worker
/// threads stop when the last handle is dropped.
#[derive(Clone)]
pub struct Scheduler {
    shared: Arc<SchedulerShared>,
}

impl Scheduler {
    /// Creates a scheduler and spawns its worker pools.
    ///
    /// The calling thread becomes the scheduler's main thread.
    pub fn new(config: SchedulerConfig) -> Self {
        let scheduler = Self {
            shared: Arc::new(SchedulerShared {
                id: NEXT_SCHEDULER_ID.fetch_add(1, Ordering::Relaxed),
                config,
                main_thread: thread::current().id(),
                shutting_down: AtomicBool::new(false),
                state: Mutex::new(SchedulerState {
                    queues: std::array::from_fn(|_| VecDeque::new()),
                    groups: Vec::new(),
                }),
                group_slots: RwLock::new(Vec::new()),
                workers: Mutex::new(WorkerPools::default()),
                frame: Mutex::new(FrameBudget::default()),
            }),
        };
        scheduler.spawn_initial_workers();
        scheduler
    }

    pub(crate) fn upgrade(shared: &Weak<SchedulerShared>) -> Option<Self> {
        shared.upgrade().map(|shared| Self { shared })
    }

    pub(crate) fn shared(&self) -> &Arc<SchedulerShared> {
        &self.shared
    }

    pub(crate) fn id(&self) -> u64 {
        self.shared.id
    }

    pub fn config(&self) -> &SchedulerConfig {
        &self.shared.config
    }

    pub(crate) fn is_shutting_down(&self) -> bool {
        self.shared.shutting_down.load(Ordering::Acquire)
    }

    /// Stops and joins all worker threads.
    ///
    /// Queued work is left in place; the main thread can still help with it.
    /// Must not be called while tasks are blocked waiting for work that only
    /// the workers could finish.
    pub fn shutdown(&self) {
        if self.shared.shutting_down.swap(true, Ordering::AcqRel) {
            return;
        }
        let pending = self.queued_task_count();
        if pending > 0 {
            log::warn!("Scheduler shutting down with {pending} queued tasks");
        }
        Self::stop_workers(&self.shared, &WorkerType::POOLED);
        log::info!("Task scheduler shut down");
    }

    // ---------------------------------------------------------------------
    // Threads
    // ---------------------------------------------------------------------

    /// Returns `true` on the thread that created the scheduler.
    pub fn is_main_thread(&self) -> bool {
        thread::current().id() == self.shared.main_thread
    }

    /// Kind of the calling thread, as seen by this scheduler.
    pub fn current_worker_type(&self) -> WorkerType {
        if let Some(slot) = self.current_worker_slot() {
            slot.worker_type()
        } else if self.is_main_thread() {
            WorkerType::MainThread
        } else {
            WorkerType::Unknown
        }
    }

    // ---------------------------------------------------------------------
    // Groups
    // ---------------------------------------------------------------------

    /// Allocates a task group. Its tasks will be queued in `priority`.
    pub fn create_task_group(&self, priority: TaskPriority) -> TaskGroupId {
        self.allocate_group(priority, None)
    }

    /// Like [`Scheduler::create_task_group`], with a callback invoked once the
    /// group finished (after its dependents were scheduled).
    pub fn create_task_group_with_callback(
        &self,
        priority: TaskPriority,
        on_finished: impl FnOnce(TaskGroupId) + Send + 'static,
    ) -> TaskGroupId {
        self.allocate_group(priority, Some(Box::new(on_finished)))
    }

    fn allocate_group(
        &self,
        priority: TaskPriority,
        on_finished: Option<GroupFinishedCallback>,
    ) -> TaskGroupId {
        let mut state = self.shared.state.lock();

        let index = match state.groups.iter().position(|group| !group.in_use) {
            Some(index) => index,
            None => {
                let data = GroupData::new();
                self.shared.group_slots.write().push(data.slot.clone());
                state.groups.push(data);
                state.groups.len() - 1
            }
        };

        let data = &mut state.groups[index];
        data.reuse(priority, on_finished);
        let counter = data.slot.reuse();

        TaskGroupId {
            index: index as u32,
            counter,
        }
    }

    fn group_slot(&self, index: u32) -> Option<Arc<GroupSlot>> {
        self.shared.group_slots.read().get(index as usize).cloned()
    }

    fn live_group_mut(state: &mut SchedulerState, group: TaskGroupId) -> Option<&mut GroupData> {
        state
            .groups
            .get_mut(group.index as usize)
            .filter(|data| data.in_use && data.slot.counter() == group.counter)
    }

    fn expect_live_group(state: &mut SchedulerState, group: TaskGroupId) -> &mut GroupData {
        match Self::live_group_mut(state, group) {
            Some(data) => data,
            None => panic!("task group {group:?} is not alive"),
        }
    }

    /// Adds `task` to a group that has not been started yet.
    ///
    /// # Panics
    ///
    /// Panics if the group was already started or finished, or if the task
    /// was added to a group before.
    pub fn add_task_to_group(&self, group: TaskGroupId, task: Arc<Task>) {
        let mut state = self.shared.state.lock();
        let data = Self::expect_live_group(&mut state, group);
        assert!(
            !data.started,
            "cannot add task '{}' to {group:?}: the group was already started",
            task.name()
        );
        task.attach_to_group(group);
        data.tasks.push(task);
    }

    /// Makes `group` wait for `depends_on` to finish before its tasks are
    /// queued. Must be called before `group` is started.
    ///
    /// # Panics
    ///
    /// Panics if a group is made to depend on itself or `group` was already
    /// started.
    pub fn add_task_group_dependency(&self, group: TaskGroupId, depends_on: TaskGroupId) {
        self.add_task_group_dependency_batch(&[(group, depends_on)]);
    }

    /// Adds several `(group, depends_on)` dependencies under one lock.
    pub fn add_task_group_dependency_batch(&self, dependencies: &[(TaskGroupId, TaskGroupId)]) {
        let mut state = self.shared.state.lock();
        for &(group, depends_on) in dependencies {
            assert_ne!(group, depends_on, "a task group cannot depend on itself");
            let data = Self::expect_live_group(&mut state, group);
            assert!(
                !data.started,
                "cannot add a dependency to {group:?}: the group was already started"
            );
            data.depends_on.push(depends_on);
        }
    }

    /// Starts a group. Its tasks are queued once all dependencies finished.
    ///
    /// # Panics
    ///
    /// Panics if the group was already started.
    pub fn start_task_group(&self, group: TaskGroupId) {
        self.start_task_group_batch(&[group]);
    }

    /// Starts several groups under one lock.
    pub fn start_task_group_batch(&self, groups: &[TaskGroupId]) {
        let mut deferred = Deferred::default();
        {
            let mut state = self.shared.state.lock();
            for &group in groups {
                self.start_group_locked(&mut state, group, &mut deferred);
            }
        }
        self.flush(deferred);
    }

    fn start_group_locked(
        &self,
        state: &mut SchedulerState,
        group: TaskGroupId,
        deferred: &mut Deferred,
    ) {
        let data = Self::expect_live_group(state, group);
        assert!(!data.started, "task group {group:?} was started twice");
        data.started = true;
        let depends_on = std::mem::take(&mut data.depends_on);

        let mut active = 0;
        for &dependency in &depends_on {
            // A finished dependency never notifies again.
            if self.is_task_group_finished(dependency) {
                continue;
            }
            let dependency_data = &mut state.groups[dependency.index as usize];
            dependency_data.dependents.push(group);
            active += 1;
        }

        let data = &mut state.groups[group.index as usize];
        data.depends_on = depends_on;
        data.active_dependencies = active;

        if active == 0 {
            Self::schedule_group_tasks(state, group, false, deferred);
        }
    }

    fn schedule_group_tasks(
        state: &mut SchedulerState,
        group: TaskGroupId,
        at_front: bool,
        deferred: &mut Deferred,
    ) {
        let data = &mut state.groups[group.index as usize];
        let priority = data.priority;

        if data.tasks.is_empty() {
            // Finishes like a group with one task that completed instantly.
            data.slot.set_remaining_tasks(1);
            deferred.finished_groups.push(group);
            return;
        }

        data.slot.set_remaining_tasks(data.tasks.len() as u32);

        let mut items = Vec::with_capacity(data.tasks.len());
        for task in &data.tasks {
            task.set_state(TaskState::Queued);
            for invocation in 0..task.invocation_count() {
                items.push(QueuedTask {
                    task: task.clone(),
                    group,
                    invocation,
                });
            }
        }
        deferred.wake(priority, items.len());

        let queue = &mut state.queues[priority.index()];
        if at_front {
            for item in items.into_iter().rev() {
                queue.push_front(item);
            }
        } else {
            queue.extend(items);
        }
    }

    fn dependency_has_finished(
        state: &mut SchedulerState,
        dependent: TaskGroupId,
        deferred: &mut Deferred,
    ) {
        let data = &mut state.groups[dependent.index as usize];
        debug_assert!(data.active_dependencies > 0);
        data.active_dependencies -= 1;
        if data.active_dependencies == 0 {
            // Work that was waiting on others is the most urgent in its band.
            Self::schedule_group_tasks(state, dependent, true, deferred);
        }
    }

    fn flush(&self, deferred: Deferred) {
        for (worker_type, count) in WorkerType::POOLED.into_iter().zip(deferred.wake) {
            self.wake_up_threads(worker_type, count);
        }
        for group in deferred.finished_groups {
            self.task_has_finished(group);
        }
    }

    fn task_has_finished(&self, group: TaskGroupId) {
        let Some(slot) = self.group_slot(group.index) else {
            return;
        };
        if slot.task_finished() {
            self.group_has_finished(group, &slot);
        }
    }

    fn group_has_finished(&self, group: TaskGroupId, slot: &GroupSlot) {
        slot.mark_finished();

        let mut deferred = Deferred::default();
        let callback = {
            let mut state = self.shared.state.lock();
            let data = &mut state.groups[group.index as usize];
            data.tasks.clear();
            let dependents = std::mem::take(&mut data.dependents);
            let callback = data.on_finished.take();
            for dependent in dependents {
                Self::dependency_has_finished(&mut state, dependent, &mut deferred);
            }
            callback
        };

        slot.notify_waiters();
        self.flush(deferred);

        if let Some(callback) = callback {
            callback(group);
        }

        self.shared.state.lock().groups[group.index as usize].in_use = false;
    }

    /// Returns `true` once every task of the group finished. Invalid and
    /// stale handles always read as finished.
    pub fn is_task_group_finished(&self, group: TaskGroupId) -> bool {
        if !group.is_valid() {
            return true;
        }
        self.group_slot(group.index)
            .is_none_or(|slot| slot.counter() != group.counter)
    }

    /// Creates a group holding only `task`, optionally depending on another
    /// group, and starts it.
    pub fn start_single_task(
        &self,
        task: Arc<Task>,
        priority: TaskPriority,
        depends_on: Option<TaskGroupId>,
    ) -> TaskGroupId {
        let group = self.create_task_group(priority);
        self.add_task_to_group(group, task);
        if let Some(dependency) = depends_on {
            self.add_task_group_dependency(group, dependency);
        }
        self.start_task_group(group);
        group
    }

    // ---------------------------------------------------------------------
    // Execution
    // ---------------------------------------------------------------------

    /// Dequeues and runs one eligible task from `bands`.
    ///
    /// This is the single dispatch path for worker loops, waits and frame
    /// processing. When nothing is eligible and `idle_slot` is given, the
    /// worker is switched to idle under the scheduler lock so a concurrent
    /// wake-up cannot be missed.
    pub(crate) fn execute_task(
        &self,
        bands: &[TaskPriority],
        filter: TaskFilter,
        idle_slot: Option<&WorkerSlot>,
    ) -> bool {
        match self.next_task(bands, filter, idle_slot) {
            Some(item) => {
                self.run_task(item);
                true
            }
            None => false,
        }
    }

    fn next_task(
        &self,
        bands: &[TaskPriority],
        filter: TaskFilter,
        idle_slot: Option<&WorkerSlot>,
    ) -> Option<QueuedTask> {
        let mut state = self.shared.state.lock();
        for band in bands {
            let queue = &mut state.queues[band.index()];
            if let Some(position) = queue.iter().position(|item| filter.accepts(item)) {
                return queue.remove(position);
            }
        }
        if let Some(slot) = idle_slot {
            let previous = slot.set_state(WorkerState::Idle);
            debug_assert_eq!(previous, WorkerState::Active, "corrupt worker state");
        }
        None
    }

    fn run_task(&self, item: QueuedTask) {
        let QueuedTask {
            task,
            group,
            invocation,
        } = item;
        task.set_state(TaskState::Running);

        if task.is_cancelled() {
            log::trace!("Skipping cancelled task '{}'", task.name());
        } else {
            profile_scope_dynamic!(task.name());
            let previous = replace_current_task(Some(task.clone()));
            let result = panic::catch_unwind(AssertUnwindSafe(|| task.execute(self, invocation)));
            replace_current_task(previous);
            if result.is_err() {
                log::error!("Task '{}' panicked", task.name());
            }
        }

        if task.complete_runs(1) {
            self.finish_task(&task, group);
        }
    }

    fn finish_task(&self, task: &Task, group: TaskGroupId) {
        task.finish();
        self.task_has_finished(group);
    }

    /// Runs one eligible task from the bands `worker_type` services.
    pub fn run_one_eligible_task(&self, worker_type: WorkerType, filter: TaskFilter) -> bool {
        self.execute_task(worker_type.bands(), filter, None)
    }

    /// Runs one task the calling thread may execute while it waits for
    /// `waiting_for` (pass [`TaskGroupId::INVALID`] when waiting for a
    /// condition). The main thread may take any task it services; every
    /// other thread only takes non-nesting tasks or tasks of the awaited
    /// group.
    pub fn help_executing_tasks(&self, waiting_for: TaskGroupId) -> bool {
        let worker_type = self.current_worker_type();
        let filter = if worker_type == WorkerType::MainThread {
            TaskFilter::Any
        } else {
            TaskFilter::NonNesting { waiting_for }
        };
        self.execute_task(worker_type.bands(), filter, None)
    }

    fn assert_may_wait(&self) {
        if let Some(task) = current_task() {
            assert!(
                task.nesting() != TaskNesting::Never,
                "task '{}' is flagged to never wait for other tasks but does so anyway",
                task.name()
            );
        }
    }

    /// Blocks until `group` finished, helping with eligible work meanwhile.
    ///
    /// The main thread never sleeps: it keeps helping and yields its time
    /// slice when there is nothing to do. Other threads mark themselves
    /// blocked, make sure another worker can take over, and sleep until the
    /// group signals completion.
    ///
    /// # Panics
    ///
    /// Panics when called from a task with [`TaskNesting::Never`].
    pub fn wait_for_group(&self, group: TaskGroupId) {
        profile_scope!("wait_for_group");
        self.assert_may_wait();

        let worker_type = self.current_worker_type();
        let allow_sleep = worker_type != WorkerType::MainThread;

        while !self.is_task_group_finished(group) {
            if self.help_executing_tasks(group) {
                continue;
            }
            if !allow_sleep {
                thread::yield_now();
                continue;
            }

            let Some(slot) = self.group_slot(group.index) else {
                break;
            };
            self.block_current_worker(worker_type, || slot.wait_for_finish(group.counter));
            break;
        }
    }

    /// Blocks until `condition` returns `true`, helping with non-nesting work
    /// meanwhile.
    pub fn wait_for_condition(&self, condition: impl Fn() -> bool) {
        profile_scope!("wait_for_condition");
        self.assert_may_wait();

        let worker_type = self.current_worker_type();
        let allow_sleep = worker_type != WorkerType::MainThread;

        while !condition() {
            if self.help_executing_tasks(TaskGroupId::INVALID) {
                continue;
            }
            if !allow_sleep {
                thread::yield_now();
                continue;
            }

            self.block_current_worker(worker_type, || {
                while !condition() {
                    thread::yield_now();
                }
            });
            break;
        }
    }

    fn block_current_worker(&self, worker_type: WorkerType, wait: impl FnOnce()) {
        let worker = self.current_worker_slot();
        if let Some(slot) = &worker {
            let previous = slot.set_state(WorkerState::Blocked);
            debug_assert_eq!(previous, WorkerState::Active, "corrupt worker state");
        }

        let wake_type = match worker_type {
            WorkerType::Unknown => WorkerType::ShortTasks,
            other => other,
        };
        self.wake_up_threads(wake_type, 1);

        wait();

        if let Some(slot) = &worker {
            slot.set_state(WorkerState::Active);
        }
    }

    // ---------------------------------------------------------------------
    // Cancellation
    // ---------------------------------------------------------------------

    /// Cancels a task.
    ///
    /// Succeeds if the task is finished or could be removed before it ran.
    /// A task that is already executing only gets its cancellation flag set;
    /// depending on `on_running` this waits for it to finish, and either way
    /// returns [`CancelError::StillRunning`].
    pub fn cancel_task(&self, task: &Arc<Task>, on_running: OnTaskRunning) -> Result<(), CancelError> {
        if task.is_finished() {
            return Ok(());
        }
        task.cancellation_token().cancel();

        let removed = {
            let mut state = self.shared.state.lock();

            if task.state() == TaskState::Created {
                if let Some(group) = task.group()
                    && let Some(data) = Self::live_group_mut(&mut state, group)
                {
                    data.tasks.retain(|member| !Arc::ptr_eq(member, task));
                }
                task.discard_unscheduled();
                log::debug!("Cancelled task '{}' before it was scheduled", task.name());
                return Ok(());
            }

            let mut removed = 0;
            for queue in state.queues.iter_mut() {
                let before = queue.len();
                queue.retain(|item| !Arc::ptr_eq(&item.task, task));
                removed += before - queue.len();
            }
            removed as u32
        };

        if removed > 0 && task.complete_runs(removed) {
            log::debug!("Cancelled task '{}' while it was queued", task.name());
            if let Some(group) = task.group() {
                self.finish_task(task, group);
            } else {
                task.finish();
            }
            return Ok(());
        }

        if task.is_finished() {
            return Ok(());
        }

        if on_running == OnTaskRunning::WaitTillFinished {
            self.wait_for_condition(|| task.is_finished());
        }
        Err(CancelError::StillRunning {
            task: task.name().to_string(),
        })
    }

    /// Cancels every task of a group.
    ///
    /// Returns the first [`CancelError`] if any task was already running.
    pub fn cancel_group(&self, group: TaskGroupId, on_running: OnTaskRunning) -> Result<(), CancelError> {
        let tasks: Vec<Arc<Task>> = {
            let mut state = self.shared.state.lock();
            Self::live_group_mut(&mut state, group)
                .map(|data| data.tasks.clone())
                .unwrap_or_default()
        };

        let mut first_error = None;
        for task in &tasks {
            if let Err(err) = self.cancel_task(task, OnTaskRunning::ReturnWithoutBlocking) {
                first_error.get_or_insert(err);
            }
        }

        match first_error {
            None => Ok(()),
            Some(err) => {
                if on_running == OnTaskRunning::WaitTillFinished {
                    self.wait_for_group(group);
                }
                Err(err)
            }
        }
    }

    // ---------------------------------------------------------------------
    // Introspection
    // ---------------------------------------------------------------------

    /// Number of task invocations waiting in `priority`.
    pub fn queued_task_count_in(&self, priority: TaskPriority) -> usize {
        self.shared.state.lock().queues[priority.index()].len()
    }

    /// Number of task invocations waiting in all bands.
    pub fn queued_task_count(&self) -> usize {
        self.shared
            .state
            .lock()
            .queues
            .iter()
            .map(VecDeque::len)
            .sum()
    }
}

impl Default for Scheduler {
    fn default() -> Self {
        Self::new(SchedulerConfig::default())
    }
}

impl std::fmt::Debug for Scheduler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Scheduler")
            .field("id", &self.shared.id)
            .field("queued_tasks", &self.queued_task_count())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;
    use std::time::Duration;

    fn scheduler_with(short: usize) -> Scheduler {
        Scheduler::new(SchedulerConfig {
            short_task_workers: Some(short),
            long_task_workers: 1,
            file_access_workers: 1,
            ..SchedulerConfig::default()
        })
    }

    /// A scheduler without workers: only the calling (main) thread runs work.
    fn manual_scheduler() -> Scheduler {
        Scheduler::new(SchedulerConfig {
            short_task_workers: Some(0),
            long_task_workers: 0,
            file_access_workers: 0,
            max_workers_per_type: 0,
            ..SchedulerConfig::default()
        })
    }

    fn counting_task(name: &str, counter: &Arc<AtomicUsize>) -> Arc<Task> {
        let counter = counter.clone();
        Task::new(name, move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
        })
        .into_shared()
    }

    #[test]
    fn group_handles_go_stale_after_reuse() {
        let scheduler = manual_scheduler();
        let first = scheduler.create_task_group(TaskPriority::ThisFrameMainThread);
        scheduler.start_task_group(first);
        assert!(scheduler.is_task_group_finished(first));

        let second = scheduler.create_task_group(TaskPriority::ThisFrameMainThread);
        assert_eq!(first.index(), second.index());
        assert_ne!(first, second);
        assert!(scheduler.is_task_group_finished(first));
        assert!(!scheduler.is_task_group_finished(second));
        assert_eq!(second.counter() % 2, 1);
    }

    #[test]
    fn empty_group_finishes_on_start_and_runs_callback() {
        let scheduler = manual_scheduler();
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = calls.clone();
        let group = scheduler.create_task_group_with_callback(TaskPriority::ThisFrame, move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
        });
        scheduler.start_task_group(group);
        assert!(scheduler.is_task_group_finished(group));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn main_thread_runs_main_thread_band() {
        let scheduler = manual_scheduler();
        let counter = Arc::new(AtomicUsize::new(0));
        let group = scheduler.create_task_group(TaskPriority::ThisFrameMainThread);
        scheduler.add_task_to_group(group, counting_task("a", &counter));
        scheduler.add_task_to_group(group, counting_task("b", &counter));
        scheduler.start_task_group(group);

        scheduler.wait_for_group(group);
        assert_eq!(counter.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn multiplicity_runs_every_invocation() {
        let scheduler = scheduler_with(3);
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = seen.clone();
        let task = Task::new("split", move |ctx| {
            sink.lock().push(ctx.invocation());
        })
        .with_multiplicity(5)
        .into_shared();

        let group = scheduler.start_single_task(task.clone(), TaskPriority::ThisFrame, None);
        scheduler.wait_for_group(group);

        let mut seen = seen.lock().clone();
        seen.sort_unstable();
        assert_eq!(seen, vec![0, 1, 2, 3, 4]);
        assert!(task.is_finished());
        assert_eq!(task.executed_runs(), 5);
    }

    #[test]
    fn dependent_group_waits_for_dependency() {
        let scheduler = scheduler_with(2);
        let done = Arc::new(AtomicUsize::new(0));
        let observed = Arc::new(AtomicUsize::new(usize::MAX));

        let a = scheduler.create_task_group(TaskPriority::ThisFrame);
        for name in ["t1", "t2"] {
            let done = done.clone();
            scheduler.add_task_to_group(
                a,
                Task::new(name, move |_| {
                    std::thread::sleep(Duration::from_millis(5));
                    done.fetch_add(1, Ordering::SeqCst);
                })
                .into_shared(),
            );
        }

        let b = scheduler.create_task_group(TaskPriority::ThisFrame);
        {
            let done = done.clone();
            let observed = observed.clone();
            scheduler.add_task_to_group(
                b,
                Task::new("t3", move |_| {
                    observed.store(done.load(Ordering::SeqCst), Ordering::SeqCst);
                })
                .into_shared(),
            );
        }
        scheduler.add_task_group_dependency(b, a);
        scheduler.start_task_group_batch(&[b, a]);

        scheduler.wait_for_group(b);
        assert!(scheduler.is_task_group_finished(a));
        assert_eq!(observed.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn cancel_before_start_never_runs() {
        let scheduler = manual_scheduler();
        let counter = Arc::new(AtomicUsize::new(0));
        let group = scheduler.create_task_group(TaskPriority::ThisFrameMainThread);
        let task = counting_task("doomed", &counter);
        scheduler.add_task_to_group(group, task.clone());

        assert!(scheduler.cancel_task(&task, OnTaskRunning::ReturnWithoutBlocking).is_ok());
        assert!(task.is_finished());

        scheduler.start_task_group(group);
        assert!(scheduler.is_task_group_finished(group));
        assert_eq!(counter.load(Ordering::SeqCst), 0);
        assert_eq!(task.executed_runs(), 0);
    }

    #[test]
    fn cancel_queued_task_finishes_group_once() {
        let scheduler = manual_scheduler();
        let counter = Arc::new(AtomicUsize::new(0));
        let finished = Arc::new(AtomicUsize::new(0));
        let finished_counter = finished.clone();
        let group = scheduler.create_task_group_with_callback(
            TaskPriority::SomeFrameMainThread,
            move |_| {
                finished_counter.fetch_add(1, Ordering::SeqCst);
            },
        );
        let keep = counting_task("keep", &counter);
        let drop_me = counting_task("drop", &counter);
        scheduler.add_task_to_group(group, keep);
        scheduler.add_task_to_group(group, drop_me.clone());
        scheduler.start_task_group(group);
        assert_eq!(scheduler.queued_task_count_in(TaskPriority::SomeFrameMainThread), 2);

        assert!(scheduler.cancel_task(&drop_me, OnTaskRunning::ReturnWithoutBlocking).is_ok());
        assert_eq!(scheduler.queued_task_count_in(TaskPriority::SomeFrameMainThread), 1);
        assert!(!scheduler.is_task_group_finished(group));

        scheduler.wait_for_group(group);
        assert_eq!(counter.load(Ordering::SeqCst), 1);
        assert_eq!(finished.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn cancel_running_task_reports_still_running() {
        let scheduler = scheduler_with(1);
        let started = Arc::new(AtomicBool::new(false));
        let flag = started.clone();
        let task = Task::new("spin", move |ctx| {
            flag.store(true, Ordering::SeqCst);
            while !ctx.is_cancelled() {
                std::thread::yield_now();
            }
        })
        .into_shared();
        let group = scheduler.start_single_task(task.clone(), TaskPriority::ThisFrame, None);
        while !started.load(Ordering::SeqCst) {
            std::thread::yield_now();
        }

        let result = scheduler.cancel_task(&task, OnTaskRunning::WaitTillFinished);
        assert!(matches!(result, Err(CancelError::StillRunning { .. })));
        assert!(task.is_finished());
        scheduler.wait_for_group(group);
    }

    #[test]
    fn never_nesting_task_that_waits_panics() {
        let scheduler = manual_scheduler();
        let task = Task::new("strict", |ctx| {
            ctx.scheduler().wait_for_condition(|| true);
        })
        .with_nesting(TaskNesting::Never)
        .into_shared();
        let group = scheduler.start_single_task(task.clone(), TaskPriority::ThisFrameMainThread, None);
        // The panic is caught by the executor and logged; the group still finishes.
        scheduler.wait_for_group(group);
        assert!(task.is_finished());
        assert_eq!(task.executed_runs(), 0);
    }

    #[test]
    #[should_panic(expected = "started twice")]
    fn double_start_panics() {
        let scheduler = manual_scheduler();
        let group = scheduler.create_task_group(TaskPriority::ThisFrame);
        let counter = Arc::new(AtomicUsize::new(0));
        scheduler.add_task_to_group(group, counting_task("x", &counter));
        scheduler.start_task_group(group);
        scheduler.start_task_group(group);
    }

    #[test]
    #[should_panic(expected = "cannot depend on itself")]
    fn self_dependency_panics() {
        let scheduler = manual_scheduler();
        let group = scheduler.create_task_group(TaskPriority::ThisFrame);
        scheduler.add_task_group_dependency(group, group);
    }

    #[test]
    fn blocked_waiter_spawns_extra_worker() {
        let scheduler = Scheduler::new(SchedulerConfig {
            short_task_workers: Some(1),
            long_task_workers: 0,
            file_access_workers: 0,
            max_workers_per_type: 4,
            ..SchedulerConfig::default()
        });

        let inner_ran = Arc::new(AtomicBool::new(false));
        let flag = inner_ran.clone();
        let outer = Task::new("outer", move |ctx| {
            let flag = flag.clone();
            let inner = Task::new("inner", move |_| flag.store(true, Ordering::SeqCst))
                .into_shared();
            let scheduler = ctx.scheduler();
            let group = scheduler.start_single_task(inner, TaskPriority::ThisFrame, None);
            scheduler.wait_for_group(group);
        })
        .into_shared();

        let group = scheduler.start_single_task(outer, TaskPriority::ThisFrame, None);
        scheduler.wait_for_group(group);
        assert!(inner_ran.load(Ordering::SeqCst));
        assert!(scheduler.worker_thread_count(WorkerType::ShortTasks) >= 1);
    }

    #[test]
    fn current_worker_type_on_main_thread() {
        let scheduler = manual_scheduler();
        assert!(scheduler.is_main_thread());
        assert_eq!(scheduler.current_worker_type(), WorkerType::MainThread);
        assert!(!scheduler.is_worker_thread());
    }
}
