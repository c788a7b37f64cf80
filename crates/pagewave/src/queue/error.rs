/// Errors returned by the [`TaskQueue`](crate::TaskQueue) handle.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, thiserror::Error)]
#[non_exhaustive]
pub enum QueueError {
    /// The queue was closed, or its consumer loop is gone.
    #[error("task queue is closed")]
    Closed,
}
