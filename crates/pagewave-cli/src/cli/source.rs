use core::time::Duration;
use std::sync::atomic::{AtomicUsize, Ordering};

use pagewave::PageSource;

use crate::cli::config::RunConfig;

/// A single record served by the simulated endpoint.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Record {
    pub id: usize,
    pub page: usize,
}

/// One page of the endpoint's response, carrying the collection size the way
/// paginated RPC responses usually do.
#[derive(Debug)]
pub struct Page {
    pub total_records: usize,
    pub page_size: usize,
    pub records: Vec<Record>,
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SourceError {
    #[error("page {0} is unavailable")]
    Unavailable(usize),
    #[error("page {0} is out of range")]
    OutOfRange(usize),
}

/// An in-process stand-in for a paginated RPC endpoint.
///
/// Each request sleeps for the configured latency before answering. The
/// configured failing page, if any, always answers with
/// [`SourceError::Unavailable`].
#[derive(Debug)]
pub struct SimulatedSource {
    total_records: usize,
    page_size: usize,
    latency: Duration,
    fail_page: Option<usize>,
    requests: AtomicUsize,
}

impl SimulatedSource {
    pub fn new(config: &RunConfig) -> Self {
        Self {
            total_records: config.total_records,
            page_size: config.page_size,
            latency: config.latency,
            fail_page: config.fail_page,
            requests: AtomicUsize::new(0),
        }
    }

    /// Number of page requests issued so far.
    pub fn requests(&self) -> usize {
        self.requests.load(Ordering::Relaxed)
    }
}

impl PageSource for SimulatedSource {
    type Response = Page;
    type Record = Record;
    type Error = SourceError;

    async fn request(&self, index: usize) -> Result<Page, SourceError> {
        self.requests.fetch_add(1, Ordering::Relaxed);
        tracing::debug!(page = index, "requesting page");

        if !self.latency.is_zero() {
            tokio::time::sleep(self.latency).await;
        }

        if self.fail_page == Some(index) {
            return Err(SourceError::Unavailable(index));
        }

        let start = index.saturating_mul(self.page_size);
        if index > 0 && start >= self.total_records {
            return Err(SourceError::OutOfRange(index));
        }
        let end = self.total_records.min(start.saturating_add(self.page_size));

        Ok(Page {
            total_records: self.total_records,
            page_size: self.page_size,
            records: (start..end).map(|id| Record { id, page: index }).collect(),
        })
    }

    fn total_requests(&self, first: &Page) -> usize {
        first.total_records.div_ceil(first.page_size)
    }

    fn records(&self, response: Page) -> Vec<Record> {
        response.records
    }
}
