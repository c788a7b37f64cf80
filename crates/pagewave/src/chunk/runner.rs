use core::ops::Range;

use futures::{
    FutureExt,
    future::{join_all, try_join_all},
};
#[cfg(feature = "tracing")]
use tracing::instrument;

use crate::chunk::{ChunkError, PageSource};

/// How a wave reacts when one of its requests fails.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub enum FailurePolicy {
    /// Resolve the wave on the first error. Sibling requests still in flight
    /// are dropped.
    #[default]
    FailFast,
    /// Let every request in the wave settle, then report the error of the
    /// lowest failing page.
    WaitForAll,
}

/// Fetches every record of a [`PageSource`] in bounded concurrent waves.
///
/// Page `0` is always requested alone, since the total page count is derived
/// from its response. The remaining pages `1..total` are split into waves of at
/// most `chunk_size` requests. Each wave is issued concurrently and fully
/// awaited before the next one starts, so no more than `chunk_size` requests
/// are ever in flight.
///
/// The runner itself is stateless and can be reused across runs.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ChunkedRequestRunner {
    chunk_size: usize,
    policy: FailurePolicy,
}

impl ChunkedRequestRunner {
    /// Creates a runner issuing up to `chunk_size` requests per wave with the
    /// [`FailurePolicy::FailFast`] policy.
    ///
    /// A `chunk_size` of zero is accepted here but rejected by
    /// [`run`](Self::run) before any request is made.
    pub const fn new(chunk_size: usize) -> Self {
        Self {
            chunk_size,
            policy: FailurePolicy::FailFast,
        }
    }

    /// Sets the failure policy used for every wave.
    #[must_use]
    pub const fn with_policy(mut self, policy: FailurePolicy) -> Self {
        self.policy = policy;
        self
    }

    /// Maximum number of requests issued per wave.
    pub const fn chunk_size(&self) -> usize {
        self.chunk_size
    }

    /// Failure policy applied to every wave.
    pub const fn policy(&self) -> FailurePolicy {
        self.policy
    }

    /// Fetches all pages of `source` and returns their records in page order.
    ///
    /// # Errors
    ///
    /// - [`ChunkError::ZeroChunkSize`] if the runner was built with a chunk
    ///   size of zero. No request is issued.
    /// - [`ChunkError::Request`] if any page request fails. No later wave is
    ///   started and no partial result is returned.
    #[cfg_attr(
        feature = "tracing",
        instrument(level = "debug", skip(self, source), fields(chunk_size = self.chunk_size))
    )]
    pub async fn run<S>(&self, source: &S) -> Result<Vec<S::Record>, ChunkError<S::Error>>
    where
        S: PageSource,
    {
        if self.chunk_size == 0 {
            return Err(ChunkError::ZeroChunkSize);
        }

        let first = source
            .request(0)
            .await
            .map_err(|source| ChunkError::Request { index: 0, source })?;
        let total = source.total_requests(&first);
        let mut records = source.records(first);

        #[cfg(feature = "tracing")]
        tracing::debug!(total, "first page resolved");

        let mut next = 1;
        while next < total {
            let end = total.min(next.saturating_add(self.chunk_size));
            for response in self.run_wave(source, next..end).await? {
                records.extend(source.records(response));
            }
            next = end;
        }

        Ok(records)
    }

    async fn run_wave<S>(
        &self,
        source: &S,
        pages: Range<usize>,
    ) -> Result<Vec<S::Response>, ChunkError<S::Error>>
    where
        S: PageSource,
    {
        #[cfg(feature = "tracing")]
        tracing::trace!(start = pages.start, end = pages.end, "issuing wave");

        let requests = pages.map(|index| {
            source
                .request(index)
                .map(move |res| res.map_err(|source| ChunkError::Request { index, source }))
        });

        let wave = match self.policy {
            FailurePolicy::FailFast => try_join_all(requests).await,
            FailurePolicy::WaitForAll => join_all(requests).await.into_iter().collect(),
        };

        #[cfg(feature = "tracing")]
        if let Err(ChunkError::Request { index, .. }) = &wave {
            tracing::warn!(page = *index, "wave failed, aborting run");
        }

        wave
    }
}

/// A chunk size paired with the source it applies to.
///
/// Immutable for the lifetime of a run.
#[derive(Clone, Debug)]
pub struct ChunkRequestSpec<S> {
    /// Number of requests dispatched per wave.
    pub chunk_size: usize,
    /// The paginated source to fetch.
    pub source: S,
}

impl<S> ChunkRequestSpec<S>
where
    S: PageSource,
{
    /// Pairs `chunk_size` with `source`.
    pub const fn new(chunk_size: usize, source: S) -> Self {
        Self { chunk_size, source }
    }

    /// Runs a fail-fast [`ChunkedRequestRunner`] with this chunk size over the
    /// source.
    ///
    /// # Errors
    ///
    /// See [`ChunkedRequestRunner::run`].
    pub async fn fetch_all(&self) -> Result<Vec<S::Record>, ChunkError<S::Error>> {
        ChunkedRequestRunner::new(self.chunk_size)
            .run(&self.source)
            .await
    }
}
