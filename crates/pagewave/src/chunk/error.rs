/// Errors produced while fetching a paginated collection.
///
/// The generic parameter `E` is the error type of the underlying
/// [`PageSource`](crate::PageSource).
#[derive(Clone, Debug, PartialEq, Eq, thiserror::Error)]
#[non_exhaustive]
pub enum ChunkError<E> {
    /// The runner was configured with a chunk size of zero. Reported before
    /// any request is issued.
    #[error("chunk size must be greater than zero")]
    ZeroChunkSize,

    /// The request for page `index` failed. No partial results are returned.
    #[error("request for page {index} failed: {source}")]
    Request {
        /// Zero-based page index of the failed request.
        index: usize,
        #[source]
        source: E,
    },
}

impl<E> ChunkError<E> {
    /// Returns the page index of a failed request, if any.
    pub const fn page(&self) -> Option<usize> {
        match self {
            Self::Request { index, .. } => Some(*index),
            Self::ZeroChunkSize => None,
        }
    }

    /// Consumes the error, returning the source's error if a request failed.
    pub fn into_source(self) -> Option<E> {
        match self {
            Self::Request { source, .. } => Some(source),
            Self::ZeroChunkSize => None,
        }
    }
}
