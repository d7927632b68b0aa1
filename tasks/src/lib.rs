//! # RedLilium Tasks
//!
//! Task-graph scheduler for frame-based workloads.
//!
//! Work is expressed as [`Task`]s collected in task groups. Groups can depend
//! on other groups and are queued in one of the [`TaskPriority`] bands once
//! their dependencies finished. Worker pools (short tasks, long tasks, file
//! access) drain the bands they service; the main thread drives per-frame
//! processing through [`Scheduler::finish_frame_tasks`].
//!
//! Threads that wait for a group keep helping with eligible work, and a pool
//! whose workers are all blocked in such waits grows by one thread so that
//! progress is never lost.

mod config;
mod error;
mod frame;
mod group;
mod priority;
mod scheduler;
mod task;
mod worker;

pub use config::SchedulerConfig;
pub use error::CancelError;
pub use group::{GroupFinishedCallback, TaskGroupId};
pub use priority::{PRIORITY_COUNT, TaskPriority, WorkerType};
pub use scheduler::{OnTaskRunning, Scheduler, TaskFilter};
pub use task::{Task, TaskContext, TaskNesting, TaskState, TaskWork};
pub use worker::{WorkerState, WorkerStats};
