use crate::queue::SpawnProvider;

/// An implementation of [`SpawnProvider`] using Tokio's executor.
///
/// The consumer loop is spawned with [`tokio::spawn`], so the queue must be
/// created from within a Tokio runtime.
pub struct TokioSpawn;
impl SpawnProvider for TokioSpawn {
    fn spawn<F>(future: F)
    where
        F: Future<Output = ()> + Send + 'static,
    {
        drop(tokio::spawn(future));
    }
}
