use core::fmt;

/// Boxed error returned by a failed task.
pub type BoxError = Box<dyn core::error::Error + Send + Sync>;

/// Observable state of a [`TaskQueue`](crate::TaskQueue).
///
/// - [`QueueState::Idle`]: nothing queued, nothing running.
/// - [`QueueState::Pending`]: tasks are queued but the consumer has not picked
///   the next one up yet. This state is transient.
/// - [`QueueState::Processing`]: exactly one task is running.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum QueueState {
    /// Nothing queued and nothing running.
    Idle,
    /// At least one task is queued and none is running.
    Pending,
    /// A task is running. Others may be queued behind it.
    Processing,
}

/// Why a task did not complete successfully.
#[derive(Debug)]
pub enum FailureKind {
    /// The task's future resolved to an error.
    Error(BoxError),
    /// The task panicked. Holds the panic message when it was a string.
    Panic(String),
}

impl fmt::Display for FailureKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Error(err) => write!(f, "task failed: {err}"),
            Self::Panic(msg) => write!(f, "task panicked: {msg}"),
        }
    }
}

/// A task failure, as reported to the queue's error handler.
#[derive(Debug)]
pub struct TaskFailure {
    /// Position of the failed task in execution order, which is also
    /// submission order, starting at `0`. Successful tasks are counted too.
    pub seq: u64,
    /// Whether the task returned an error or panicked.
    pub kind: FailureKind,
}

impl fmt::Display for TaskFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{} {}", self.seq, self.kind)
    }
}
