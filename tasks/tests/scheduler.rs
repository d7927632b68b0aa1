use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::Duration;

use parking_lot::Mutex;
use redlilium_tasks::{
    OnTaskRunning, Scheduler, SchedulerConfig, Task, TaskGroupId, TaskNesting, TaskPriority,
    WorkerType,
};

fn init_logging() {
    let _ = env_logger::builder().is_test(true).try_init();
}

fn scheduler(short: usize, long: usize, file: usize) -> Scheduler {
    init_logging();
    Scheduler::new(SchedulerConfig {
        short_task_workers: Some(short),
        long_task_workers: long,
        file_access_workers: file,
        ..SchedulerConfig::default()
    })
}

// ---------------------------------------------------------------------------
// Group completion
// ---------------------------------------------------------------------------

#[test]
fn group_finishes_exactly_once_under_concurrency() {
    let scheduler = scheduler(4, 0, 0);
    let notifications = Arc::new(AtomicUsize::new(0));
    let executed = Arc::new(AtomicUsize::new(0));

    for _ in 0..20 {
        let counter = notifications.clone();
        let group = scheduler.create_task_group_with_callback(TaskPriority::ThisFrame, move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
        });
        for i in 0..32 {
            let executed = executed.clone();
            scheduler.add_task_to_group(
                group,
                Task::new(format!("work {i}"), move |_| {
                    executed.fetch_add(1, Ordering::SeqCst);
                })
                .with_nesting(TaskNesting::Never)
                .into_shared(),
            );
        }
        scheduler.start_task_group(group);
        scheduler.wait_for_group(group);
    }

    assert_eq!(notifications.load(Ordering::SeqCst), 20);
    assert_eq!(executed.load(Ordering::SeqCst), 20 * 32);
}

#[test]
fn no_task_is_dispatched_twice() {
    let scheduler = scheduler(6, 0, 0);
    let runs: Arc<Vec<AtomicUsize>> = Arc::new((0..500).map(|_| AtomicUsize::new(0)).collect());

    let group = scheduler.create_task_group(TaskPriority::EarlyThisFrame);
    for i in 0..500 {
        let runs = runs.clone();
        scheduler.add_task_to_group(
            group,
            Task::new(format!("count {i}"), move |_| {
                runs[i].fetch_add(1, Ordering::SeqCst);
            })
            .into_shared(),
        );
    }
    scheduler.start_task_group(group);
    scheduler.wait_for_group(group);

    assert!(runs.iter().all(|count| count.load(Ordering::SeqCst) == 1));
}

// ---------------------------------------------------------------------------
// Dependencies
// ---------------------------------------------------------------------------

#[test]
fn dependency_chain_runs_in_order() {
    let scheduler = scheduler(3, 0, 0);
    let order = Arc::new(Mutex::new(Vec::new()));

    let mut previous: Option<TaskGroupId> = None;
    let mut groups = Vec::new();
    for step in 0..6 {
        let group = scheduler.create_task_group(TaskPriority::ThisFrame);
        let order = order.clone();
        scheduler.add_task_to_group(
            group,
            Task::new(format!("step {step}"), move |_| {
                std::thread::sleep(Duration::from_millis(1));
                order.lock().push(step);
            })
            .into_shared(),
        );
        if let Some(previous) = previous {
            scheduler.add_task_group_dependency(group, previous);
        }
        previous = Some(group);
        groups.push(group);
    }

    // Start last-to-first so that nothing runs just because it was started early.
    groups.reverse();
    scheduler.start_task_group_batch(&groups);
    scheduler.wait_for_group(groups[0]);

    assert_eq!(*order.lock(), vec![0, 1, 2, 3, 4, 5]);
}

#[test]
fn dependency_on_finished_group_starts_immediately() {
    let scheduler = scheduler(2, 0, 0);
    let first = scheduler.start_single_task(
        Task::new("first", |_| {}).into_shared(),
        TaskPriority::ThisFrame,
        None,
    );
    scheduler.wait_for_group(first);

    let ran = Arc::new(AtomicBool::new(false));
    let flag = ran.clone();
    let second = scheduler.start_single_task(
        Task::new("second", move |_| flag.store(true, Ordering::SeqCst)).into_shared(),
        TaskPriority::ThisFrame,
        Some(first),
    );
    scheduler.wait_for_group(second);
    assert!(ran.load(Ordering::SeqCst));
}

#[test]
fn fan_in_waits_for_all_dependencies() {
    let scheduler = scheduler(4, 0, 0);
    let finished = Arc::new(AtomicUsize::new(0));
    let seen_at_join = Arc::new(AtomicUsize::new(0));

    let join = scheduler.create_task_group(TaskPriority::ThisFrame);
    {
        let finished = finished.clone();
        let seen = seen_at_join.clone();
        scheduler.add_task_to_group(
            join,
            Task::new("join", move |_| {
                seen.store(finished.load(Ordering::SeqCst), Ordering::SeqCst);
            })
            .into_shared(),
        );
    }

    let mut dependencies = Vec::new();
    for i in 0..8 {
        let group = scheduler.create_task_group(TaskPriority::NextFrame);
        let finished = finished.clone();
        scheduler.add_task_to_group(
            group,
            Task::new(format!("input {i}"), move |_| {
                std::thread::sleep(Duration::from_millis(2));
                finished.fetch_add(1, Ordering::SeqCst);
            })
            .into_shared(),
        );
        dependencies.push((join, group));
    }
    scheduler.add_task_group_dependency_batch(&dependencies);

    scheduler.start_task_group(join);
    let inputs: Vec<_> = dependencies.iter().map(|&(_, group)| group).collect();
    scheduler.start_task_group_batch(&inputs);

    scheduler.wait_for_group(join);
    assert_eq!(seen_at_join.load(Ordering::SeqCst), 8);
}

// ---------------------------------------------------------------------------
// Worker types
// ---------------------------------------------------------------------------

#[test]
fn bands_run_on_their_worker_types() {
    let scheduler = scheduler(1, 1, 1);
    let seen = Arc::new(Mutex::new(Vec::new()));

    let mut groups = Vec::new();
    for priority in [
        TaskPriority::ThisFrame,
        TaskPriority::LongRunning,
        TaskPriority::FileAccess,
    ] {
        let seen = seen.clone();
        let task = Task::new(format!("{priority:?}"), move |ctx| {
            seen.lock()
                .push((priority, ctx.scheduler().current_worker_type()));
        })
        .into_shared();
        groups.push(scheduler.start_single_task(task, priority, None));
    }
    for group in groups {
        scheduler.wait_for_group(group);
    }

    let seen = seen.lock();
    for (priority, worker_type) in seen.iter() {
        assert_eq!(priority.worker_type(), Some(*worker_type));
    }
    assert_eq!(seen.len(), 3);
}

#[test]
fn pool_grows_when_workers_block() {
    let scheduler = Scheduler::new(SchedulerConfig {
        short_task_workers: Some(1),
        long_task_workers: 1,
        file_access_workers: 0,
        max_workers_per_type: 4,
        ..SchedulerConfig::default()
    });

    // The only long worker waits for another long-running group. It either
    // helps with that group itself or blocks and gets a second worker spawned.
    let second_ran = Arc::new(AtomicBool::new(false));
    let flag = second_ran.clone();
    let second = Task::new("second long", move |_| flag.store(true, Ordering::SeqCst))
        .into_shared();

    let second_group = scheduler.create_task_group(TaskPriority::LongRunning);
    scheduler.add_task_to_group(second_group, second);

    let first = Task::new("first long", move |ctx| {
        let scheduler = ctx.scheduler();
        scheduler.start_task_group(second_group);
        scheduler.wait_for_group(second_group);
    })
    .into_shared();
    let first_group = scheduler.start_single_task(first, TaskPriority::LongRunning, None);

    scheduler.wait_for_group(first_group);
    assert!(second_ran.load(Ordering::SeqCst));
    assert!(scheduler.worker_thread_count(WorkerType::LongTasks) >= 1);
}

#[test]
fn resizing_pools_keeps_queued_work() {
    let scheduler = scheduler(1, 1, 0);
    scheduler.set_worker_thread_count(Some(3), Some(0));
    assert_eq!(scheduler.worker_thread_count(WorkerType::ShortTasks), 3);
    assert_eq!(scheduler.worker_thread_count(WorkerType::LongTasks), 0);

    let counter = Arc::new(AtomicUsize::new(0));
    let group = scheduler.create_task_group(TaskPriority::ThisFrame);
    for i in 0..10 {
        let counter = counter.clone();
        scheduler.add_task_to_group(
            group,
            Task::new(format!("after resize {i}"), move |_| {
                counter.fetch_add(1, Ordering::SeqCst);
            })
            .into_shared(),
        );
    }
    scheduler.start_task_group(group);
    scheduler.wait_for_group(group);
    assert_eq!(counter.load(Ordering::SeqCst), 10);
}

#[test]
fn worker_stats_report_executed_tasks() {
    let scheduler = scheduler(2, 0, 0);
    let group = scheduler.create_task_group(TaskPriority::ThisFrame);
    for i in 0..8 {
        scheduler.add_task_to_group(
            group,
            Task::new(format!("stat {i}"), |_| std::thread::sleep(Duration::from_millis(1)))
                .into_shared(),
        );
    }
    scheduler.start_task_group(group);
    scheduler.wait_for_group(group);
    scheduler.finish_frame_tasks();

    // Workers record a task after its group was already signalled.
    let deadline = std::time::Instant::now() + Duration::from_secs(5);
    let executed = || -> u64 { scheduler.worker_stats().iter().map(|s| s.executed_tasks).sum() };
    while executed() < 8 && std::time::Instant::now() < deadline {
        std::thread::sleep(Duration::from_millis(1));
    }
    assert_eq!(executed(), 8);

    let stats = scheduler.worker_stats();
    assert_eq!(stats.len(), 2);
    assert!(stats.iter().all(|s| (0.0..=1.0).contains(&s.utilization)));
    assert!(stats.iter().all(|s| s.name.starts_with("Short Tasks Worker")));
}

// ---------------------------------------------------------------------------
// Cancellation
// ---------------------------------------------------------------------------

#[test]
fn cancel_group_stops_queued_work() {
    let scheduler = scheduler(1, 0, 0);

    // Occupy the only worker so the group below stays queued.
    let release = Arc::new(AtomicBool::new(false));
    let gate = release.clone();
    let blocker = scheduler.start_single_task(
        Task::new("blocker", move |_| {
            while !gate.load(Ordering::SeqCst) {
                std::thread::yield_now();
            }
        })
        .into_shared(),
        TaskPriority::EarlyThisFrame,
        None,
    );

    let counter = Arc::new(AtomicUsize::new(0));
    let group = scheduler.create_task_group(TaskPriority::LateThisFrame);
    for i in 0..5 {
        let counter = counter.clone();
        scheduler.add_task_to_group(
            group,
            Task::new(format!("queued {i}"), move |_| {
                counter.fetch_add(1, Ordering::SeqCst);
            })
            .into_shared(),
        );
    }
    scheduler.start_task_group(group);

    // The blocker may not have been picked up yet; it then stays queued ahead.
    let result = scheduler.cancel_group(group, OnTaskRunning::ReturnWithoutBlocking);
    release.store(true, Ordering::SeqCst);

    assert!(result.is_ok());
    assert!(scheduler.is_task_group_finished(group));
    scheduler.wait_for_group(blocker);
    assert_eq!(counter.load(Ordering::SeqCst), 0);
}

#[test]
fn cooperative_cancellation_reaches_task_body() {
    let scheduler = scheduler(1, 0, 0);
    let iterations = Arc::new(AtomicUsize::new(0));
    let counter = iterations.clone();
    let started = Arc::new(AtomicBool::new(false));
    let flag = started.clone();

    let task = Task::new("long loop", move |ctx| {
        flag.store(true, Ordering::SeqCst);
        while ctx.cancellation_token().checkpoint().is_ok() {
            counter.fetch_add(1, Ordering::SeqCst);
            std::thread::sleep(Duration::from_micros(50));
        }
    })
    .into_shared();
    let group = scheduler.start_single_task(task.clone(), TaskPriority::ThisFrame, None);
    while !started.load(Ordering::SeqCst) {
        std::thread::yield_now();
    }

    let result = scheduler.cancel_task(&task, OnTaskRunning::ReturnWithoutBlocking);
    assert!(result.is_err());
    scheduler.wait_for_group(group);
    assert!(task.is_cancelled());
    assert!(iterations.load(Ordering::SeqCst) > 0);
}
