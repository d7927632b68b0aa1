/// Scheduling band of a task group.
///
/// Bands are declared in descending urgency. Each band owns its own queue and
/// workers drain the bands they service in declaration order, so a task in an
/// earlier band is always preferred over one in a later band.
///
/// The frame bands age: at the start of every frame
/// [`Scheduler::reprioritize_frame_tasks`](crate::Scheduler::reprioritize_frame_tasks)
/// moves "next frame" work into "this frame" and every `InNFrames` band one
/// step closer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum TaskPriority {
    /// Highest priority, guaranteed to be finished by the end of this frame.
    EarlyThisFrame,
    /// Finished by the end of this frame.
    ThisFrame,
    /// Finished by the end of this frame, after the other this-frame bands.
    LateThisFrame,
    EarlyNextFrame,
    NextFrame,
    LateNextFrame,
    In2Frames,
    In3Frames,
    In4Frames,
    In5Frames,
    In6Frames,
    In7Frames,
    In8Frames,
    In9Frames,
    /// Long-running work, serviced by the long-task pool only.
    LongRunningHighPriority,
    LongRunning,
    /// File I/O, serviced by the file-access pool only.
    FileAccessHighPriority,
    FileAccess,
    /// Executed by the main thread during this frame.
    ThisFrameMainThread,
    /// Executed by the main thread whenever the frame budget allows.
    SomeFrameMainThread,
}

/// Number of priority bands.
pub const PRIORITY_COUNT: usize = 20;

impl TaskPriority {
    /// All bands in descending urgency.
    pub const ALL: [TaskPriority; PRIORITY_COUNT] = [
        TaskPriority::EarlyThisFrame,
        TaskPriority::ThisFrame,
        TaskPriority::LateThisFrame,
        TaskPriority::EarlyNextFrame,
        TaskPriority::NextFrame,
        TaskPriority::LateNextFrame,
        TaskPriority::In2Frames,
        TaskPriority::In3Frames,
        TaskPriority::In4Frames,
        TaskPriority::In5Frames,
        TaskPriority::In6Frames,
        TaskPriority::In7Frames,
        TaskPriority::In8Frames,
        TaskPriority::In9Frames,
        TaskPriority::LongRunningHighPriority,
        TaskPriority::LongRunning,
        TaskPriority::FileAccessHighPriority,
        TaskPriority::FileAccess,
        TaskPriority::ThisFrameMainThread,
        TaskPriority::SomeFrameMainThread,
    ];

    /// Position of the band in [`TaskPriority::ALL`].
    pub fn index(self) -> usize {
        self as usize
    }

    /// Inverse of [`TaskPriority::index`].
    pub fn from_index(index: usize) -> Option<Self> {
        Self::ALL.get(index).copied()
    }

    /// The worker pool that gets woken when work arrives in this band.
    ///
    /// Main-thread bands return `None`: the main thread polls them itself.
    pub fn worker_type(self) -> Option<WorkerType> {
        match self {
            TaskPriority::LongRunningHighPriority | TaskPriority::LongRunning => {
                Some(WorkerType::LongTasks)
            }
            TaskPriority::FileAccessHighPriority | TaskPriority::FileAccess => {
                Some(WorkerType::FileAccess)
            }
            TaskPriority::ThisFrameMainThread | TaskPriority::SomeFrameMainThread => None,
            _ => Some(WorkerType::ShortTasks),
        }
    }

    /// Returns `true` for bands only the main thread executes.
    pub fn is_main_thread_only(self) -> bool {
        matches!(
            self,
            TaskPriority::ThisFrameMainThread | TaskPriority::SomeFrameMainThread
        )
    }
}

/// Kind of thread executing tasks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum WorkerType {
    /// Pool for the frame bands.
    ShortTasks,
    /// Pool for long-running work.
    LongTasks,
    /// Pool for file I/O.
    FileAccess,
    /// The thread that created the scheduler.
    MainThread,
    /// Any other thread that calls into the scheduler.
    Unknown,
}

/// Bands serviced by the short-task pool and by foreign threads.
const SHORT_BANDS: &[TaskPriority] = &[
    TaskPriority::EarlyThisFrame,
    TaskPriority::ThisFrame,
    TaskPriority::LateThisFrame,
    TaskPriority::EarlyNextFrame,
    TaskPriority::NextFrame,
    TaskPriority::LateNextFrame,
    TaskPriority::In2Frames,
    TaskPriority::In3Frames,
    TaskPriority::In4Frames,
    TaskPriority::In5Frames,
    TaskPriority::In6Frames,
    TaskPriority::In7Frames,
    TaskPriority::In8Frames,
    TaskPriority::In9Frames,
];

const LONG_BANDS: &[TaskPriority] = &[
    TaskPriority::LongRunningHighPriority,
    TaskPriority::LongRunning,
];

const FILE_BANDS: &[TaskPriority] = &[
    TaskPriority::FileAccessHighPriority,
    TaskPriority::FileAccess,
];

const MAIN_THREAD_BANDS: &[TaskPriority] = &[
    TaskPriority::ThisFrameMainThread,
    TaskPriority::SomeFrameMainThread,
];

/// Bands [`Scheduler::finish_frame_tasks`](crate::Scheduler::finish_frame_tasks)
/// helps with after the main-thread queue ran dry.
pub(crate) const THIS_FRAME_BANDS: &[TaskPriority] = &[
    TaskPriority::EarlyThisFrame,
    TaskPriority::ThisFrame,
    TaskPriority::LateThisFrame,
];

impl WorkerType {
    /// Worker types that own a thread pool.
    pub const POOLED: [WorkerType; 3] = [
        WorkerType::ShortTasks,
        WorkerType::LongTasks,
        WorkerType::FileAccess,
    ];

    /// Bands this kind of thread takes work from, in the order it scans them.
    pub fn bands(self) -> &'static [TaskPriority] {
        match self {
            WorkerType::ShortTasks | WorkerType::Unknown => SHORT_BANDS,
            WorkerType::LongTasks => LONG_BANDS,
            WorkerType::FileAccess => FILE_BANDS,
            WorkerType::MainThread => MAIN_THREAD_BANDS,
        }
    }

    /// Index into the scheduler's pool table, `None` for unpooled threads.
    pub(crate) fn pool_index(self) -> Option<usize> {
        match self {
            WorkerType::ShortTasks => Some(0),
            WorkerType::LongTasks => Some(1),
            WorkerType::FileAccess => Some(2),
            WorkerType::MainThread | WorkerType::Unknown => None,
        }
    }

    /// Human-readable name used for worker thread names.
    pub fn label(self) -> &'static str {
        match self {
            WorkerType::ShortTasks => "Short Tasks",
            WorkerType::LongTasks => "Long Tasks",
            WorkerType::FileAccess => "File Access",
            WorkerType::MainThread => "Main Thread",
            WorkerType::Unknown => "Unknown",
        }
    }
}
