use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use criterion::{BenchmarkId, Criterion, black_box, criterion_group, criterion_main};

use redlilium_tasks::{Scheduler, SchedulerConfig, Task, TaskPriority};

fn scheduler(short_workers: usize) -> Scheduler {
    Scheduler::new(SchedulerConfig {
        short_task_workers: Some(short_workers),
        long_task_workers: 0,
        file_access_workers: 0,
        ..SchedulerConfig::default()
    })
}

// ---------------------------------------------------------------------------
// Group fan-out
// ---------------------------------------------------------------------------

fn bench_group_fan_out(c: &mut Criterion) {
    let mut group = c.benchmark_group("group_fan_out");
    for &workers in &[1usize, 4] {
        let scheduler = scheduler(workers);
        let counter = Arc::new(AtomicUsize::new(0));

        group.bench_with_input(BenchmarkId::from_parameter(workers), &workers, |b, _| {
            b.iter(|| {
                let id = scheduler.create_task_group(TaskPriority::ThisFrame);
                for i in 0..256 {
                    let counter = counter.clone();
                    scheduler.add_task_to_group(
                        id,
                        Task::new(format!("bench {i}"), move |_| {
                            counter.fetch_add(1, Ordering::Relaxed);
                        })
                        .into_shared(),
                    );
                }
                scheduler.start_task_group(id);
                scheduler.wait_for_group(id);
            });
        });
        black_box(counter.load(Ordering::Relaxed));
    }
    group.finish();
}

// ---------------------------------------------------------------------------
// Dependency chains
// ---------------------------------------------------------------------------

fn bench_dependency_chain(c: &mut Criterion) {
    let scheduler = scheduler(2);

    c.bench_function("dependency_chain_64", |b| {
        b.iter(|| {
            let mut groups = Vec::with_capacity(64);
            for i in 0..64 {
                let id = scheduler.create_task_group(TaskPriority::ThisFrame);
                scheduler.add_task_to_group(id, Task::new(format!("link {i}"), |_| {}).into_shared());
                if let Some(&previous) = groups.last() {
                    scheduler.add_task_group_dependency(id, previous);
                }
                groups.push(id);
            }
            scheduler.start_task_group_batch(&groups);
            if let Some(&last) = groups.last() {
                scheduler.wait_for_group(last);
            }
        });
    });
}

// ---------------------------------------------------------------------------
// Main-thread frame processing
// ---------------------------------------------------------------------------

fn bench_finish_frame(c: &mut Criterion) {
    let scheduler = Scheduler::new(SchedulerConfig {
        short_task_workers: Some(0),
        long_task_workers: 0,
        file_access_workers: 0,
        max_workers_per_type: 0,
        ..SchedulerConfig::default()
    });

    c.bench_function("finish_frame_64_main_thread_tasks", |b| {
        b.iter(|| {
            let id = scheduler.create_task_group(TaskPriority::ThisFrameMainThread);
            for i in 0..64 {
                scheduler.add_task_to_group(id, Task::new(format!("frame {i}"), |_| {}).into_shared());
            }
            scheduler.start_task_group(id);
            scheduler.finish_frame_tasks();
            black_box(scheduler.is_task_group_finished(id))
        });
    });
}

criterion_group!(
    benches,
    bench_group_fan_out,
    bench_dependency_chain,
    bench_finish_frame
);
criterion_main!(benches);
