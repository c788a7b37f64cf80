use crate::queue::SpawnProvider;

/// An implementation of [`SpawnProvider`] using Smol's global executor.
///
/// The consumer loop is detached, so it keeps running after the spawning
/// scope returns.
pub struct SmolSpawn;
impl SpawnProvider for SmolSpawn {
    fn spawn<F>(future: F)
    where
        F: Future<Output = ()> + Send + 'static,
    {
        smol::spawn(future).detach();
    }
}
