//! Per-frame processing on the main thread.

use std::time::{Duration, Instant};

use redlilium_core::profiling::{profile_plot, profile_scope};

use crate::priority::{THIS_FRAME_BANDS, TaskPriority};
use crate::scheduler::{Scheduler, TaskFilter};

/// Adaptive budget for [`TaskPriority::SomeFrameMainThread`] work.
#[derive(Debug, Default)]
pub(crate) struct FrameBudget {
    /// Grows each frame the some-frame work is skipped, reset once the queue
    /// drains. `None` until the first call.
    threshold: Option<Duration>,
    last_execution: Option<Instant>,
    last_utilization_update: Option<Instant>,
}

impl Scheduler {
    /// Finishes the main thread's share of the frame.
    ///
    /// Runs every [`TaskPriority::ThisFrameMainThread`] task and helps with
    /// the this-frame bands until they are empty or being worked on, then
    /// ages the frame bands, executes some-frame tasks within the configured
    /// frame budget and updates worker utilization.
    ///
    /// # Panics
    ///
    /// Panics when not called on the main thread.
    pub fn finish_frame_tasks(&self) {
        profile_scope!("finish_frame_tasks");
        assert!(
            self.is_main_thread(),
            "finish_frame_tasks must be called on the main thread"
        );

        loop {
            if self.execute_task(
                &[TaskPriority::ThisFrameMainThread],
                TaskFilter::Any,
                None,
            ) {
                continue;
            }
            if self.execute_task(THIS_FRAME_BANDS, TaskFilter::Any, None) {
                continue;
            }
            break;
        }

        self.reprioritize_frame_tasks();
        self.execute_some_frame_tasks(self.config().target_frame_time());

        let now = Instant::now();
        let previous = self
            .shared()
            .frame
            .lock()
            .last_utilization_update
            .replace(now);
        if let Some(previous) = previous {
            let frame = now - previous;
            if !frame.is_zero() {
                self.update_thread_utilization(frame);
            }
        }
    }

    /// Ages the frame bands by one frame.
    ///
    /// Leftover this-frame work moves into [`TaskPriority::EarlyThisFrame`],
    /// next-frame bands become the matching this-frame bands and every
    /// `InNFrames` band moves one step closer (`In2Frames` becomes
    /// [`TaskPriority::LateNextFrame`]).
    pub fn reprioritize_frame_tasks(&self) {
        profile_scope!("reprioritize_frame_tasks");
        let mut state = self.shared().state.lock();
        let queues = &mut state.queues;

        for band in [TaskPriority::ThisFrame, TaskPriority::LateThisFrame] {
            let moved = std::mem::take(&mut queues[band.index()]);
            queues[TaskPriority::EarlyThisFrame.index()].extend(moved);
        }

        for band in [
            TaskPriority::EarlyNextFrame,
            TaskPriority::NextFrame,
            TaskPriority::LateNextFrame,
        ] {
            let moved = std::mem::take(&mut queues[band.index()]);
            queues[band.index() - 3].extend(moved);
        }

        // Ascending, so each band is emptied before the next one moves in.
        for index in TaskPriority::In2Frames.index()..=TaskPriority::In9Frames.index() {
            let moved = std::mem::take(&mut queues[index]);
            queues[index - 1].extend(moved);
        }
    }

    /// Executes [`TaskPriority::SomeFrameMainThread`] tasks within a frame
    /// time budget.
    ///
    /// While frames stay shorter than `smooth_frame_time` the queue is
    /// drained. After a slow frame the work is skipped, but each skip raises
    /// an internal threshold so that eventually at least one task per frame
    /// runs however slow the frames are. Large backlogs force extra tasks
    /// through regardless of frame time.
    pub fn execute_some_frame_tasks(&self, smooth_frame_time: Duration) {
        profile_scope!("execute_some_frame_tasks");
        const BAND: &[TaskPriority] = &[TaskPriority::SomeFrameMainThread];

        let (last_time, threshold) = {
            let mut budget = self.shared().frame.lock();
            let threshold = *budget.threshold.get_or_insert(smooth_frame_time);
            (budget.last_execution.replace(Instant::now()), threshold)
        };
        let since_last = |now: Instant| last_time.map_or(Duration::MAX, |last| now - last);

        let mut now = Instant::now();
        while since_last(now) < smooth_frame_time {
            if !self.execute_task(BAND, TaskFilter::Any, None) {
                self.shared().frame.lock().threshold = Some(smooth_frame_time);
                return;
            }
            now = Instant::now();
        }

        let pending = self.queued_task_count_in(TaskPriority::SomeFrameMainThread);
        profile_plot!("some_frame_tasks_pending", pending);
        if pending == 0 {
            return;
        }

        if since_last(now) < threshold {
            // The threshold caught up; from now on at least one task per frame.
            self.execute_task(BAND, TaskFilter::Any, None);
        } else {
            let step = self.config().frame_threshold_step();
            self.shared().frame.lock().threshold = Some(threshold.saturating_add(step));
        }

        let forced = self
            .config()
            .forced_execution_thresholds
            .iter()
            .filter(|&&limit| pending > limit)
            .count();
        for _ in 0..forced {
            self.execute_task(BAND, TaskFilter::Any, None);
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};

    use super::*;
    use crate::SchedulerConfig;
    use crate::task::Task;

    fn manual_scheduler() -> Scheduler {
        Scheduler::new(SchedulerConfig {
            short_task_workers: Some(0),
            long_task_workers: 0,
            file_access_workers: 0,
            max_workers_per_type: 0,
            ..SchedulerConfig::default()
        })
    }

    fn queue_tasks(scheduler: &Scheduler, priority: TaskPriority, count: usize, counter: &Arc<AtomicUsize>) {
        let group = scheduler.create_task_group(priority);
        for i in 0..count {
            let counter = counter.clone();
            scheduler.add_task_to_group(
                group,
                Task::new(format!("task {i}"), move |_| {
                    counter.fetch_add(1, Ordering::SeqCst);
                })
                .into_shared(),
            );
        }
        scheduler.start_task_group(group);
    }

    #[test]
    fn reprioritize_ages_frame_bands() {
        let scheduler = manual_scheduler();
        let counter = Arc::new(AtomicUsize::new(0));
        queue_tasks(&scheduler, TaskPriority::LateThisFrame, 1, &counter);
        queue_tasks(&scheduler, TaskPriority::NextFrame, 2, &counter);
        queue_tasks(&scheduler, TaskPriority::In2Frames, 3, &counter);
        queue_tasks(&scheduler, TaskPriority::In9Frames, 4, &counter);

        scheduler.reprioritize_frame_tasks();

        assert_eq!(scheduler.queued_task_count_in(TaskPriority::EarlyThisFrame), 1);
        assert_eq!(scheduler.queued_task_count_in(TaskPriority::LateThisFrame), 0);
        assert_eq!(scheduler.queued_task_count_in(TaskPriority::ThisFrame), 2);
        assert_eq!(scheduler.queued_task_count_in(TaskPriority::LateNextFrame), 3);
        assert_eq!(scheduler.queued_task_count_in(TaskPriority::In8Frames), 4);
        assert_eq!(scheduler.queued_task_count_in(TaskPriority::In9Frames), 0);
        assert_eq!(counter.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn repeated_reprioritize_reaches_this_frame() {
        let scheduler = manual_scheduler();
        let counter = Arc::new(AtomicUsize::new(0));
        queue_tasks(&scheduler, TaskPriority::In9Frames, 1, &counter);
        for _ in 0..10 {
            scheduler.reprioritize_frame_tasks();
        }
        assert_eq!(scheduler.queued_task_count_in(TaskPriority::EarlyThisFrame), 1);
    }

    #[test]
    fn finish_frame_runs_main_thread_and_this_frame_work() {
        let scheduler = manual_scheduler();
        let counter = Arc::new(AtomicUsize::new(0));
        queue_tasks(&scheduler, TaskPriority::ThisFrameMainThread, 2, &counter);
        queue_tasks(&scheduler, TaskPriority::EarlyThisFrame, 3, &counter);
        queue_tasks(&scheduler, TaskPriority::EarlyNextFrame, 1, &counter);

        scheduler.finish_frame_tasks();

        assert_eq!(counter.load(Ordering::SeqCst), 5);
        // Next-frame work is now this-frame work.
        assert_eq!(scheduler.queued_task_count_in(TaskPriority::EarlyThisFrame), 1);
    }

    #[test]
    fn first_slow_frame_skips_then_threshold_grows() {
        let scheduler = manual_scheduler();
        let counter = Arc::new(AtomicUsize::new(0));
        queue_tasks(&scheduler, TaskPriority::SomeFrameMainThread, 10, &counter);

        // The first call has no previous frame to compare with: it counts as slow.
        scheduler.execute_some_frame_tasks(Duration::from_millis(16));
        assert_eq!(counter.load(Ordering::SeqCst), 0);
        let threshold = scheduler.shared().frame.lock().threshold;
        assert_eq!(threshold, Some(Duration::from_millis(16) + Duration::from_micros(200)));
    }

    #[test]
    fn smooth_frames_drain_queue_and_reset_threshold() {
        let scheduler = manual_scheduler();
        let counter = Arc::new(AtomicUsize::new(0));
        queue_tasks(&scheduler, TaskPriority::SomeFrameMainThread, 10, &counter);

        scheduler.execute_some_frame_tasks(Duration::from_secs(10));
        scheduler.execute_some_frame_tasks(Duration::from_secs(10));

        assert_eq!(counter.load(Ordering::SeqCst), 10);
        let threshold = scheduler.shared().frame.lock().threshold;
        assert_eq!(threshold, Some(Duration::from_secs(10)));
    }

    #[test]
    fn large_backlog_forces_progress() {
        let scheduler = manual_scheduler();
        let counter = Arc::new(AtomicUsize::new(0));
        queue_tasks(&scheduler, TaskPriority::SomeFrameMainThread, 120, &counter);

        // A zero budget means every frame is "slow".
        scheduler.execute_some_frame_tasks(Duration::ZERO);
        // Over 100, 75 and 50 pending: three forced tasks.
        assert_eq!(counter.load(Ordering::SeqCst), 3);
    }
}
