use core::{fmt, time::Duration};
use std::{
    collections::BTreeMap,
    sync::{
        Arc,
        atomic::{AtomicUsize, Ordering},
    },
    time::Instant,
};

use anyhow::Context;
use pagewave::{BoxError, ChunkedRequestRunner, TaskQueue, TokioSpawn};
use tokio::sync::Mutex;

use crate::cli::{
    config::RunConfig,
    source::{Record, SimulatedSource},
};

/// Page index built by the queue: page number to the ids it holds.
type PageIndex = Arc<Mutex<BTreeMap<usize, Vec<usize>>>>;

/// Outcome of a successful run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Summary {
    pub requests: usize,
    pub records: usize,
    pub pages_indexed: usize,
    pub failed_tasks: usize,
    pub elapsed: Duration,
}

impl fmt::Display for Summary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(
            f,
            "fetched {} records in {} requests ({:.1?})",
            self.records, self.requests, self.elapsed
        )?;
        write!(
            f,
            "indexed {} pages, {} indexing tasks failed",
            self.pages_indexed, self.failed_tasks
        )
    }
}

/// Fetches every page of the simulated endpoint, then indexes the pages one
/// at a time through a [`TaskQueue`].
///
/// # Errors
///
/// Fails if any page request fails, or if the indexing queue shuts down
/// before draining.
#[tracing::instrument(level = "info", skip_all, fields(chunk_size = config.chunk_size))]
pub async fn run(config: &RunConfig) -> anyhow::Result<Summary> {
    let started = Instant::now();

    let source = SimulatedSource::new(config);
    let records = ChunkedRequestRunner::new(config.chunk_size)
        .with_policy(config.policy)
        .run(&source)
        .await
        .context("failed to fetch every page")?;

    tracing::info!(
        records = records.len(),
        requests = source.requests(),
        "all pages fetched"
    );

    let index = PageIndex::default();
    let failed = Arc::new(AtomicUsize::new(0));
    let queue = {
        let failed = Arc::clone(&failed);
        TaskQueue::with_error_handler::<TokioSpawn, _>(move |failure| {
            tracing::error!(%failure, "indexing task failed");
            failed.fetch_add(1, Ordering::Relaxed);
        })
    };

    for batch in records.chunk_by(|a, b| a.page == b.page) {
        let batch = batch.to_vec();
        let index = Arc::clone(&index);
        queue.add_task(move || index_page(index, batch))?;
    }
    queue.drained().await?;
    queue.close();

    let pages_indexed = index.lock().await.len();
    Ok(Summary {
        requests: source.requests(),
        records: records.len(),
        pages_indexed,
        failed_tasks: failed.load(Ordering::Relaxed),
        elapsed: started.elapsed(),
    })
}

async fn index_page(index: PageIndex, batch: Vec<Record>) -> Result<(), BoxError> {
    let Some(page) = batch.first().map(|record| record.page) else {
        return Ok(());
    };

    let ids: Vec<usize> = batch.iter().map(|record| record.id).collect();
    if ids.windows(2).any(|pair| pair[1] != pair[0] + 1) {
        return Err(format!("page {page} holds non-contiguous ids").into());
    }

    let mut index = index.lock().await;
    if index.insert(page, ids).is_some() {
        return Err(format!("page {page} was indexed twice").into());
    }

    tracing::debug!(page, records = batch.len(), "page indexed");
    Ok(())
}
