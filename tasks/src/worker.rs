//! Worker thread pools.
//!
//! One pool per [`WorkerType::POOLED`] entry. Pools start with the configured
//! number of threads and grow on demand: when work arrives and no idle worker
//! can take it while some workers of that type sit blocked inside a wait, an
//! extra worker is spawned (up to `max_workers_per_type`). Pools never shrink
//! on their own.

use std::cell::RefCell;
use std::sync::atomic::{AtomicBool, AtomicU8, AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use parking_lot::{Condvar, Mutex};
use redlilium_core::profiling::set_thread_name;

use crate::priority::WorkerType;
use crate::scheduler::{Scheduler, SchedulerShared, TaskFilter};
use crate::task::Task;

/// What a worker thread is currently doing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum WorkerState {
    /// Executing a task or looking for one.
    Active = 0,
    /// Parked until new work arrives.
    Idle = 1,
    /// Executing a task that waits for other work.
    Blocked = 2,
}

impl WorkerState {
    fn from_u8(value: u8) -> Self {
        match value {
            0 => WorkerState::Active,
            1 => WorkerState::Idle,
            _ => WorkerState::Blocked,
        }
    }
}

/// Snapshot of one worker, see [`Scheduler::worker_stats`].
#[derive(Debug, Clone)]
pub struct WorkerStats {
    pub worker_type: WorkerType,
    pub index: usize,
    pub name: String,
    pub state: WorkerState,
    /// Fraction of the last frame spent executing tasks, `0.0..=1.0`.
    pub utilization: f64,
    pub executed_tasks: u64,
}

/// State shared between a worker thread and the scheduler.
pub(crate) struct WorkerSlot {
    worker_type: WorkerType,
    index: usize,
    name: String,
    state: AtomicU8,
    wake: Mutex<bool>,
    wake_cv: Condvar,
    stop: AtomicBool,
    busy_nanos: AtomicU64,
    utilization_bits: AtomicU64,
    executed_tasks: AtomicU64,
}

impl WorkerSlot {
    fn new(worker_type: WorkerType, index: usize) -> Self {
        Self {
            worker_type,
            index,
            name: format!("{} Worker {}", worker_type.label(), index),
            state: AtomicU8::new(WorkerState::Active as u8),
            wake: Mutex::new(false),
            wake_cv: Condvar::new(),
            stop: AtomicBool::new(false),
            busy_nanos: AtomicU64::new(0),
            utilization_bits: AtomicU64::new(0f64.to_bits()),
            executed_tasks: AtomicU64::new(0),
        }
    }

    pub(crate) fn worker_type(&self) -> WorkerType {
        self.worker_type
    }

    pub(crate) fn state(&self) -> WorkerState {
        WorkerState::from_u8(self.state.load(Ordering::Acquire))
    }

    pub(crate) fn set_state(&self, state: WorkerState) -> WorkerState {
        WorkerState::from_u8(self.state.swap(state as u8, Ordering::AcqRel))
    }

    /// Switches an idle worker to active and signals it.
    fn try_wake(&self) -> bool {
        if self
            .state
            .compare_exchange(
                WorkerState::Idle as u8,
                WorkerState::Active as u8,
                Ordering::AcqRel,
                Ordering::Acquire,
            )
            .is_err()
        {
            return false;
        }
        self.signal();
        true
    }

    fn signal(&self) {
        *self.wake.lock() = true;
        self.wake_cv.notify_one();
    }

    fn wait_for_wakeup(&self) {
        let mut woken = self.wake.lock();
        while !*woken {
            self.wake_cv.wait(&mut woken);
        }
        *woken = false;
    }

    fn request_stop(&self) {
        self.stop.store(true, Ordering::Release);
        self.signal();
    }

    fn should_stop(&self) -> bool {
        self.stop.load(Ordering::Acquire)
    }

    fn record_task(&self, busy: Duration) {
        self.busy_nanos
            .fetch_add(busy.as_nanos() as u64, Ordering::Relaxed);
        self.executed_tasks.fetch_add(1, Ordering::Relaxed);
    }

    fn update_utilization(&self, frame: Duration) {
        let busy = self.busy_nanos.swap(0, Ordering::Relaxed) as f64;
        let total = frame.as_nanos().max(1) as f64;
        let utilization = (busy / total).clamp(0.0, 1.0);
        self.utilization_bits
            .store(utilization.to_bits(), Ordering::Relaxed);
    }

    fn stats(&self) -> WorkerStats {
        WorkerStats {
            worker_type: self.worker_type,
            index: self.index,
            name: self.name.clone(),
            state: self.state(),
            utilization: f64::from_bits(self.utilization_bits.load(Ordering::Relaxed)),
            executed_tasks: self.executed_tasks.load(Ordering::Relaxed),
        }
    }
}

struct WorkerEntry {
    slot: Arc<WorkerSlot>,
    thread: Option<JoinHandle<()>>,
}

/// All worker threads of one scheduler, indexed by [`WorkerType::pool_index`].
#[derive(Default)]
pub(crate) struct WorkerPools {
    pools: [Vec<WorkerEntry>; 3],
    /// Set once a pool hit `max_workers_per_type`, so the limit is logged once.
    at_limit: [bool; 3],
}

/// Per-thread registration, set for worker threads only.
#[derive(Clone)]
pub(crate) struct ThreadInfo {
    pub(crate) scheduler_id: u64,
    pub(crate) slot: Arc<WorkerSlot>,
}

thread_local! {
    static THREAD_INFO: RefCell<Option<ThreadInfo>> = const { RefCell::new(None) };
    static CURRENT_TASK: RefCell<Option<Arc<Task>>> = const { RefCell::new(None) };
}

pub(crate) fn current_thread_info() -> Option<ThreadInfo> {
    THREAD_INFO.with(|info| info.borrow().clone())
}

/// Task executing on this thread, innermost first.
pub(crate) fn current_task() -> Option<Arc<Task>> {
    CURRENT_TASK.with(|task| task.borrow().clone())
}

/// Installs `task` as the current task, returning the previous one.
pub(crate) fn replace_current_task(task: Option<Arc<Task>>) -> Option<Arc<Task>> {
    CURRENT_TASK.with(|current| current.replace(task))
}

fn worker_main(shared: Weak<SchedulerShared>, scheduler_id: u64, slot: Arc<WorkerSlot>) {
    set_thread_name!(slot.name.as_str());
    THREAD_INFO.with(|info| {
        *info.borrow_mut() = Some(ThreadInfo {
            scheduler_id,
            slot: slot.clone(),
        })
    });
    log::debug!("{} started", slot.name);

    let bands = slot.worker_type.bands();
    while !slot.should_stop() {
        let Some(scheduler) = Scheduler::upgrade(&shared) else {
            break;
        };
        if scheduler.is_shutting_down() {
            break;
        }

        let started = Instant::now();
        let ran = scheduler.execute_task(bands, TaskFilter::Any, Some(slot.as_ref()));
        drop(scheduler);

        if ran {
            slot.record_task(started.elapsed());
        } else {
            slot.wait_for_wakeup();
        }
    }

    log::debug!("{} stopped", slot.name);
}

impl Scheduler {
    /// Wakes up to `count` idle workers of `worker_type`, spawning one more if
    /// the pool is saturated with blocked workers.
    pub(crate) fn wake_up_threads(&self, worker_type: WorkerType, count: usize) {
        if count == 0 || self.is_shutting_down() {
            return;
        }
        let Some(pool_index) = worker_type.pool_index() else {
            return;
        };

        let mut pools = self.shared().workers.lock();
        let pool = &pools.pools[pool_index];
        let pool_len = pool.len();

        let mut remaining = count;
        let mut blocked = 0;
        for worker in pool {
            match worker.slot.state() {
                WorkerState::Idle => {
                    if remaining > 0 && worker.slot.try_wake() {
                        remaining -= 1;
                    }
                }
                WorkerState::Blocked => blocked += 1,
                WorkerState::Active => {}
            }
        }

        if remaining > 0 && (blocked > 0 || pool_len == 0) {
            if pool_len < self.config().max_workers_per_type {
                log::debug!(
                    "{} pool saturated ({} blocked), spawning another worker",
                    worker_type.label(),
                    blocked
                );
                self.spawn_worker(&mut pools, worker_type);
            } else if !pools.at_limit[pool_index] {
                pools.at_limit[pool_index] = true;
                log::warn!(
                    "{} pool reached its limit of {} workers",
                    worker_type.label(),
                    pool_len
                );
            }
        }
    }

    fn spawn_worker(&self, pools: &mut WorkerPools, worker_type: WorkerType) -> bool {
        let Some(pool_index) = worker_type.pool_index() else {
            return false;
        };
        let index = pools.pools[pool_index].len();
        let slot = Arc::new(WorkerSlot::new(worker_type, index));

        let shared = Arc::downgrade(self.shared());
        let scheduler_id = self.id();
        let thread_slot = slot.clone();
        let spawned = thread::Builder::new()
            .name(slot.name.clone())
            .spawn(move || worker_main(shared, scheduler_id, thread_slot));

        match spawned {
            Ok(handle) => {
                pools.pools[pool_index].push(WorkerEntry {
                    slot,
                    thread: Some(handle),
                });
                true
            }
            Err(err) => {
                log::error!("Failed to spawn {}: {err}", slot.name);
                false
            }
        }
    }

    pub(crate) fn spawn_initial_workers(&self) {
        let config = self.config();
        let counts = [
            config.resolved_short_task_workers(),
            config.long_task_workers,
            config.file_access_workers,
        ];
        let mut pools = self.shared().workers.lock();
        for (worker_type, count) in WorkerType::POOLED.into_iter().zip(counts) {
            for _ in 0..count {
                self.spawn_worker(&mut pools, worker_type);
            }
        }
        log::info!(
            "Task scheduler started with {} short, {} long and {} file access workers",
            counts[0],
            counts[1],
            counts[2]
        );
    }

    /// Stops and joins every worker of the given types.
    pub(crate) fn stop_workers(shared: &SchedulerShared, worker_types: &[WorkerType]) {
        let entries: Vec<WorkerEntry> = {
            let mut pools = shared.workers.lock();
            worker_types
                .iter()
                .filter_map(|ty| ty.pool_index())
                .flat_map(|index| {
                    pools.at_limit[index] = false;
                    std::mem::take(&mut pools.pools[index])
                })
                .collect()
        };

        for entry in &entries {
            entry.slot.request_stop();
        }

        let current = thread::current().id();
        for entry in entries {
            let Some(handle) = entry.thread else {
                continue;
            };
            // A worker may drop the last scheduler reference itself.
            if handle.thread().id() == current {
                continue;
            }
            if handle.join().is_err() {
                log::error!("{} panicked", entry.slot.name);
            }
        }
    }

    /// Replaces the short- and long-task pools with pools of the given sizes.
    ///
    /// `None` keeps the configured default for that pool. The file access
    /// pool is left untouched.
    ///
    /// # Panics
    ///
    /// Panics when called from one of this scheduler's worker threads.
    pub fn set_worker_thread_count(&self, short_tasks: Option<usize>, long_tasks: Option<usize>) {
        assert!(
            !self.is_worker_thread(),
            "worker pools cannot be resized from a worker thread"
        );
        let config = self.config();
        let short = short_tasks.unwrap_or_else(|| config.resolved_short_task_workers());
        let long = long_tasks.unwrap_or(config.long_task_workers);

        Self::stop_workers(
            self.shared(),
            &[WorkerType::ShortTasks, WorkerType::LongTasks],
        );

        let mut pools = self.shared().workers.lock();
        for _ in 0..short {
            self.spawn_worker(&mut pools, WorkerType::ShortTasks);
        }
        for _ in 0..long {
            self.spawn_worker(&mut pools, WorkerType::LongTasks);
        }
        drop(pools);

        log::info!("Worker pools resized to {short} short and {long} long task workers");
        // Work may have been queued while the pools were empty.
        self.wake_up_threads(WorkerType::ShortTasks, short);
        self.wake_up_threads(WorkerType::LongTasks, long);
    }

    /// Current number of workers of `worker_type`.
    pub fn worker_thread_count(&self, worker_type: WorkerType) -> usize {
        worker_type
            .pool_index()
            .map_or(0, |index| self.shared().workers.lock().pools[index].len())
    }

    /// Snapshot of every worker.
    pub fn worker_stats(&self) -> Vec<WorkerStats> {
        let pools = self.shared().workers.lock();
        pools
            .pools
            .iter()
            .flatten()
            .map(|entry| entry.slot.stats())
            .collect()
    }

    pub(crate) fn update_thread_utilization(&self, frame: Duration) {
        let pools = self.shared().workers.lock();
        for entry in pools.pools.iter().flatten() {
            entry.slot.update_utilization(frame);
        }
    }

    /// Returns `true` if the calling thread is one of this scheduler's workers.
    pub fn is_worker_thread(&self) -> bool {
        current_thread_info().is_some_and(|info| info.scheduler_id == self.id())
    }

    /// Worker slot of the calling thread, if it belongs to this scheduler.
    pub(crate) fn current_worker_slot(&self) -> Option<Arc<WorkerSlot>> {
        current_thread_info()
            .filter(|info| info.scheduler_id == self.id())
            .map(|info| info.slot)
    }
}
