//! The unit of work executed by the scheduler.
//!
//! A [`Task`] is shared between the code that submitted it and the scheduler
//! (`Arc<Task>`). It runs once per invocation (see
//! [`Task::with_multiplicity`]) and is finished once every invocation either
//! ran or was cancelled. Tasks are never reused: after it finished, a task
//! can still be inspected but adding it to another group is a contract
//! violation.

use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicU8, AtomicU32, Ordering};

use parking_lot::Mutex;
use redlilium_core::CancellationToken;

use crate::group::TaskGroupId;
use crate::scheduler::Scheduler;

/// Whether a task may block on other tasks while it runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TaskNesting {
    /// The task never waits. Threads that are themselves blocked in a wait
    /// may pick it up without risking a deadlock.
    Never,
    /// The task may wait for other groups or conditions.
    #[default]
    Maybe,
}

/// Lifecycle of a task.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum TaskState {
    /// Not yet handed to the queues.
    Created = 0,
    /// Waiting in a priority band.
    Queued = 1,
    /// At least one invocation was dequeued for execution.
    Running = 2,
    /// All invocations completed or were cancelled.
    Finished = 3,
}

impl TaskState {
    fn from_u8(value: u8) -> Self {
        match value {
            0 => TaskState::Created,
            1 => TaskState::Queued,
            2 => TaskState::Running,
            _ => TaskState::Finished,
        }
    }
}

/// Executable body of a task.
///
/// Implemented for every `Fn(&TaskContext)` closure. Implement it directly
/// for task types that carry their own state and use [`Task::from_work`].
pub trait TaskWork: Send + Sync {
    fn execute(&self, ctx: &TaskContext);
}

impl<F> TaskWork for F
where
    F: Fn(&TaskContext) + Send + Sync,
{
    fn execute(&self, ctx: &TaskContext) {
        self(ctx)
    }
}

type FinishedCallback = Box<dyn FnOnce(&Task) + Send>;

/// A unit of work.
pub struct Task {
    name: String,
    nesting: TaskNesting,
    multiplicity: u32,
    work: Box<dyn TaskWork>,
    remaining_runs: AtomicU32,
    executed_runs: AtomicU32,
    state: AtomicU8,
    token: CancellationToken,
    group: Mutex<Option<TaskGroupId>>,
    on_finished: Mutex<Option<FinishedCallback>>,
}

impl Task {
    /// Creates a task that runs `work` once.
    ///
    /// # Panics
    ///
    /// Panics if `name` is empty.
    pub fn new<F>(name: impl Into<String>, work: F) -> Self
    where
        F: Fn(&TaskContext) + Send + Sync + 'static,
    {
        Self::from_work(name, work)
    }

    /// Creates a task from any [`TaskWork`] implementation.
    pub fn from_work(name: impl Into<String>, work: impl TaskWork + 'static) -> Self {
        let name = name.into();
        assert!(!name.is_empty(), "tasks need a non-empty name");
        Self {
            name,
            nesting: TaskNesting::default(),
            multiplicity: 0,
            work: Box::new(work),
            remaining_runs: AtomicU32::new(1),
            executed_runs: AtomicU32::new(0),
            state: AtomicU8::new(TaskState::Created as u8),
            token: CancellationToken::new(),
            group: Mutex::new(None),
            on_finished: Mutex::new(None),
        }
    }

    /// Sets the nesting policy.
    pub fn with_nesting(mut self, nesting: TaskNesting) -> Self {
        self.nesting = nesting;
        self
    }

    /// Requests `multiplicity` parallel invocations. Each receives its index
    /// through [`TaskContext::invocation`]. `0` and `1` both mean one run.
    pub fn with_multiplicity(mut self, multiplicity: u32) -> Self {
        self.multiplicity = multiplicity;
        self.remaining_runs = AtomicU32::new(multiplicity.max(1));
        self
    }

    /// Called once, on the thread that completed the last invocation, before
    /// the owning group is told the task finished.
    pub fn with_on_finished(mut self, callback: impl FnOnce(&Task) + Send + 'static) -> Self {
        self.on_finished = Mutex::new(Some(Box::new(callback)));
        self
    }

    /// Wraps the task for submission.
    pub fn into_shared(self) -> Arc<Task> {
        Arc::new(self)
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn nesting(&self) -> TaskNesting {
        self.nesting
    }

    /// Requested multiplicity as configured (`0` for a plain task).
    pub fn multiplicity(&self) -> u32 {
        self.multiplicity
    }

    /// Number of invocations this task is split into.
    pub fn invocation_count(&self) -> u32 {
        self.multiplicity.max(1)
    }

    /// Invocations that have not completed yet. `0` once finished.
    pub fn remaining_runs(&self) -> u32 {
        self.remaining_runs.load(Ordering::Acquire)
    }

    /// Invocations whose body actually executed.
    pub fn executed_runs(&self) -> u32 {
        self.executed_runs.load(Ordering::Acquire)
    }

    pub fn state(&self) -> TaskState {
        TaskState::from_u8(self.state.load(Ordering::Acquire))
    }

    pub fn is_finished(&self) -> bool {
        self.state() == TaskState::Finished
    }

    /// Whether cancellation was requested.
    pub fn is_cancelled(&self) -> bool {
        self.token.is_cancelled()
    }

    /// Token the task body can poll or hand to nested work.
    pub fn cancellation_token(&self) -> &CancellationToken {
        &self.token
    }

    /// Group this task was added to.
    pub fn group(&self) -> Option<TaskGroupId> {
        *self.group.lock()
    }

    pub(crate) fn set_state(&self, state: TaskState) {
        self.state.store(state as u8, Ordering::Release);
    }

    pub(crate) fn attach_to_group(&self, group: TaskGroupId) {
        assert_eq!(
            self.state(),
            TaskState::Created,
            "task '{}' was already scheduled; tasks cannot be reused",
            self.name
        );
        let mut slot = self.group.lock();
        assert!(
            slot.is_none(),
            "task '{}' already belongs to group {:?}",
            self.name,
            *slot
        );
        *slot = Some(group);
    }

    /// Marks `count` invocations as done. Returns `true` if this completed
    /// the task.
    pub(crate) fn complete_runs(&self, count: u32) -> bool {
        let previous = self.remaining_runs.fetch_sub(count, Ordering::AcqRel);
        debug_assert!(previous >= count, "task '{}' over-completed", self.name);
        previous == count
    }

    /// Cancels a task that never reached the queues.
    pub(crate) fn discard_unscheduled(&self) {
        self.remaining_runs.store(0, Ordering::Release);
        self.set_state(TaskState::Finished);
    }

    pub(crate) fn execute(self: &Arc<Self>, scheduler: &Scheduler, invocation: u32) {
        let ctx = TaskContext {
            task: self.clone(),
            invocation,
            scheduler: scheduler.clone(),
        };
        self.work.execute(&ctx);
        self.executed_runs.fetch_add(1, Ordering::AcqRel);
    }

    /// Runs the completion callback and marks the task finished.
    pub(crate) fn finish(&self) {
        let callback = self.on_finished.lock().take();
        if let Some(callback) = callback {
            callback(self);
        }
        self.set_state(TaskState::Finished);
    }
}

impl fmt::Debug for Task {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Task")
            .field("name", &self.name)
            .field("nesting", &self.nesting)
            .field("state", &self.state())
            .field("remaining_runs", &self.remaining_runs())
            .field("cancelled", &self.is_cancelled())
            .finish()
    }
}

/// What a running task can see of its surroundings.
pub struct TaskContext {
    task: Arc<Task>,
    invocation: u32,
    scheduler: Scheduler,
}

impl TaskContext {
    /// Index of this invocation, `0..invocation_count`.
    pub fn invocation(&self) -> u32 {
        self.invocation
    }

    pub fn invocation_count(&self) -> u32 {
        self.task.invocation_count()
    }

    pub fn task_name(&self) -> &str {
        self.task.name()
    }

    /// Whether cancellation was requested for this task.
    pub fn is_cancelled(&self) -> bool {
        self.task.is_cancelled()
    }

    pub fn cancellation_token(&self) -> &CancellationToken {
        self.task.cancellation_token()
    }

    /// The scheduler executing this task, for spawning or waiting on
    /// nested work.
    pub fn scheduler(&self) -> &Scheduler {
        &self.scheduler
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn new_task_is_created_with_one_run() {
        let task = Task::new("load", |_| {});
        assert_eq!(task.state(), TaskState::Created);
        assert_eq!(task.remaining_runs(), 1);
        assert_eq!(task.invocation_count(), 1);
        assert_eq!(task.nesting(), TaskNesting::Maybe);
    }

    #[test]
    fn multiplicity_sets_remaining_runs() {
        let task = Task::new("split", |_| {}).with_multiplicity(4);
        assert_eq!(task.remaining_runs(), 4);
        assert!(!task.complete_runs(3));
        assert!(task.complete_runs(1));
        assert_eq!(task.remaining_runs(), 0);
    }

    #[test]
    #[should_panic(expected = "non-empty name")]
    fn empty_name_rejected() {
        let _ = Task::new("", |_| {});
    }

    #[test]
    fn finish_runs_callback_once() {
        use std::sync::atomic::AtomicUsize;
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = calls.clone();
        let task = Task::new("cb", |_| {}).with_on_finished(move |t| {
            assert_eq!(t.name(), "cb");
            counter.fetch_add(1, Ordering::SeqCst);
        });
        task.finish();
        task.finish();
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert!(task.is_finished());
    }
}
