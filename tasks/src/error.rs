use std::fmt;

/// Returned by [`Scheduler::cancel_task`](crate::Scheduler::cancel_task) and
/// [`Scheduler::cancel_group`](crate::Scheduler::cancel_group) when the work
/// could not be prevented from running.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CancelError {
    /// The task was already executing. Its cancellation token is set, so it
    /// may still stop early if it checks the token.
    StillRunning { task: String },
}

impl fmt::Display for CancelError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CancelError::StillRunning { task } => {
                write!(f, "task '{task}' was already running")
            }
        }
    }
}

impl std::error::Error for CancelError {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display() {
        let err = CancelError::StillRunning {
            task: "decode".into(),
        };
        assert_eq!(err.to_string(), "task 'decode' was already running");
    }
}
