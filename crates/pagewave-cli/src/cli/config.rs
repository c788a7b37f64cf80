use core::time::Duration;

use anyhow::bail;
use clap::Parser;
use pagewave::FailurePolicy;

/// Runtime configuration for the `pagewave` binary.
///
/// Every setting can be given as a flag or through the matching environment
/// variable, which may also come from a `.env` file in the working directory.
#[derive(Parser, Debug, Clone)]
#[command(
    name = "pagewave",
    version,
    about = "Fetches a simulated paginated endpoint in bounded waves and indexes the pages"
)]
pub struct CliArgs {
    /// Maximum number of page requests in flight at once.
    ///
    /// Pages after the first are requested in waves of this size, and each
    /// wave completes before the next one starts.
    ///
    /// Environment variable: `CHUNK_SIZE`
    #[arg(long, env = "CHUNK_SIZE", default_value_t = 5)]
    pub chunk_size: usize,

    /// Number of records exposed by the simulated endpoint.
    ///
    /// Environment variable: `TOTAL_RECORDS`
    #[arg(long, env = "TOTAL_RECORDS", default_value_t = 100)]
    pub total_records: usize,

    /// Number of records returned per page.
    ///
    /// Environment variable: `PAGE_SIZE`
    #[arg(long, env = "PAGE_SIZE", default_value_t = 10)]
    pub page_size: usize,

    /// Simulated round-trip latency of a single page request, in milliseconds.
    ///
    /// Environment variable: `LATENCY_MS`
    #[arg(long, env = "LATENCY_MS", default_value_t = 20)]
    pub latency_ms: u64,

    /// Page index that always fails, to exercise error handling.
    ///
    /// Environment variable: `FAIL_PAGE`
    #[arg(long, env = "FAIL_PAGE")]
    pub fail_page: Option<usize>,

    /// Let every request of a failing wave settle before reporting, instead of
    /// failing on the first error.
    ///
    /// Environment variable: `WAIT_FOR_ALL`
    #[arg(long, env = "WAIT_FOR_ALL", default_value_t = false)]
    pub wait_for_all: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunConfig {
    pub chunk_size: usize,
    pub total_records: usize,
    pub page_size: usize,
    pub latency: Duration,
    pub fail_page: Option<usize>,
    pub policy: FailurePolicy,
}

impl RunConfig {
    /// Number of pages the simulated endpoint serves. Never less than one,
    /// since page `0` is always requested.
    pub const fn total_pages(&self) -> usize {
        let pages = self.total_records.div_ceil(self.page_size);
        if pages == 0 { 1 } else { pages }
    }
}

impl TryFrom<CliArgs> for RunConfig {
    type Error = anyhow::Error;

    fn try_from(args: CliArgs) -> Result<Self, Self::Error> {
        if args.chunk_size == 0 {
            bail!("CHUNK_SIZE must be greater than 0");
        }

        if args.page_size == 0 {
            bail!("PAGE_SIZE must be greater than 0");
        }

        let config = Self {
            chunk_size: args.chunk_size,
            total_records: args.total_records,
            page_size: args.page_size,
            latency: Duration::from_millis(args.latency_ms),
            fail_page: args.fail_page,
            policy: if args.wait_for_all {
                FailurePolicy::WaitForAll
            } else {
                FailurePolicy::FailFast
            },
        };

        if let Some(page) = config.fail_page.filter(|&page| page >= config.total_pages()) {
            bail!(
                "FAIL_PAGE ({}) is out of range, the endpoint only serves {} pages",
                page,
                config.total_pages()
            );
        }

        Ok(config)
    }
}
