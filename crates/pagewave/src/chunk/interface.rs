use core::future::Future;

/// A remote collection that is fetched one page at a time.
///
/// The total number of pages is not known up front. It is derived from the
/// first page's response through [`PageSource::total_requests`], and every
/// response is flattened into records through [`PageSource::records`]. This
/// keeps the transport shape of a response decoupled from how pages are
/// aggregated.
pub trait PageSource {
    /// Raw response for a single page.
    type Response;
    /// Item type collected across pages.
    type Record;
    /// Error returned by a failed page request.
    type Error;

    /// Requests the page at the zero-based `index`.
    fn request(&self, index: usize) -> impl Future<Output = Result<Self::Response, Self::Error>>;

    /// Total number of page requests needed to cover the collection.
    ///
    /// Only ever called with the response to page `0`. Rounding is the
    /// implementor's concern; the value is used as returned.
    fn total_requests(&self, first: &Self::Response) -> usize;

    /// Projects a response into its ordered records.
    fn records(&self, response: Self::Response) -> Vec<Self::Record>;
}

/// A [`PageSource`] assembled from three closures.
///
/// # Example
///
/// ```
/// use pagewave::{ChunkedRequestRunner, FnPageSource};
///
/// let source = FnPageSource::new(
///     |index: usize| async move { Ok::<_, core::convert::Infallible>(vec![index; 2]) },
///     |_first: &Vec<usize>| 3,
///     |page: Vec<usize>| page,
/// );
///
/// let records = futures::executor::block_on(ChunkedRequestRunner::new(2).run(&source)).unwrap();
/// assert_eq!(records, vec![0, 0, 1, 1, 2, 2]);
/// ```
pub struct FnPageSource<M, T, G> {
    make_request: M,
    total_requests: T,
    records: G,
}

impl<M, T, G> FnPageSource<M, T, G> {
    /// Creates a source from a request function and the two projections.
    pub const fn new(make_request: M, total_requests: T, records: G) -> Self {
        Self {
            make_request,
            total_requests,
            records,
        }
    }
}

impl<M, Fut, T, G, Resp, Rec, E> PageSource for FnPageSource<M, T, G>
where
    M: Fn(usize) -> Fut,
    Fut: Future<Output = Result<Resp, E>>,
    T: Fn(&Resp) -> usize,
    G: Fn(Resp) -> Vec<Rec>,
{
    type Response = Resp;
    type Record = Rec;
    type Error = E;

    fn request(&self, index: usize) -> impl Future<Output = Result<Resp, E>> {
        (self.make_request)(index)
    }

    fn total_requests(&self, first: &Resp) -> usize {
        (self.total_requests)(first)
    }

    fn records(&self, response: Resp) -> Vec<Rec> {
        (self.records)(response)
    }
}
