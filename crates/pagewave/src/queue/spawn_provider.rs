use core::future::Future;

/// A trait that abstracts over how a detached background future is spawned.
///
/// This allows the task queue to be generic over runtimes like `Tokio` or
/// `Smol`. The spawned future runs the queue's consumer loop until every
/// handle to the queue is dropped or the queue is closed.
pub trait SpawnProvider {
    fn spawn<F>(future: F)
    where
        F: Future<Output = ()> + Send + 'static;
}
