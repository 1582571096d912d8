use futures_util::StreamExt;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::fs::{self, File};
use tokio::io::AsyncWriteExt;
use tokio::sync::{mpsc, Mutex};
use tracing::{debug, error, warn};
use url::Url;

use crate::progress::ProgressReporter;

/// Download of one page image into the staging directory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FetchTask {
    pub page_index: usize,
    pub source: Url,
    pub destination: PathBuf,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FetchOptions {
    /// Number of concurrent download workers.
    pub concurrency: usize,
    /// Attempts per page; zero still makes one attempt.
    pub max_retries: u32,
    /// Fixed wait between two attempts of the same page.
    pub retry_delay: Duration,
}

impl Default for FetchOptions {
    fn default() -> Self {
        Self {
            concurrency: 1,
            max_retries: 1,
            retry_delay: Duration::from_secs(1),
        }
    }
}

impl FetchOptions {
    fn attempts(&self) -> u32 {
        self.max_retries.max(1)
    }
}

#[derive(Debug, Error)]
pub enum FetchError {
    #[error("request to {url} failed: {message}")]
    Request { url: String, message: String },

    #[error("{url} returned HTTP {status}")]
    Status { url: String, status: u16 },

    #[error("download from {url} was interrupted: {message}")]
    Body { url: String, message: String },

    #[error("failed to write {}: {source}", .path.display())]
    Write {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

impl FetchError {
    /// Network and HTTP failures may succeed on another attempt, local disk failures won't.
    pub fn is_retryable(&self) -> bool {
        !matches!(self, FetchError::Write { .. })
    }
}

/// A page that was written to disk.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StagedPage {
    pub page_index: usize,
    pub path: PathBuf,
    pub bytes_written: u64,
}

/// A page that could not be downloaded.
#[derive(Debug, Error)]
#[error("page {page_index:04} failed after {attempts} attempt(s): {error}")]
pub struct PageFailure {
    pub page_index: usize,
    pub attempts: u32,
    pub error: FetchError,
}

/// Outcome of a whole run. Failures are kept in the order they were discovered.
#[derive(Debug, Default)]
pub struct FetchReport {
    staged: Vec<StagedPage>,
    failed: Vec<PageFailure>,
}

impl FetchReport {
    pub fn succeeded(&self) -> usize {
        self.staged.len()
    }

    pub fn failed(&self) -> &[PageFailure] {
        &self.failed
    }

    pub fn first_error(&self) -> Option<&PageFailure> {
        self.failed.first()
    }

    pub fn is_complete(&self) -> bool {
        self.failed.is_empty()
    }

    /// Staged pages sorted by page index.
    pub fn staged(&self) -> &[StagedPage] {
        &self.staged
    }

    pub fn staged_paths(&self) -> Vec<PathBuf> {
        self.staged.iter().map(|page| page.path.clone()).collect()
    }
}

type Outcome = Result<StagedPage, PageFailure>;

/// Bounded pool of download workers sharing one task queue.
#[derive(Clone)]
pub struct Fetcher {
    client: reqwest::Client,
    options: FetchOptions,
}

impl Fetcher {
    pub fn new(client: reqwest::Client, options: FetchOptions) -> Self {
        Self { client, options }
    }

    /// Downloads every task and returns once each one has succeeded or run out of attempts.
    pub async fn run(&self, tasks: Vec<FetchTask>, progress: Arc<ProgressReporter>) -> FetchReport {
        // No point starting more workers than there are pages.
        let workers = self.options.concurrency.clamp(1, tasks.len().max(1));
        debug!(tasks = tasks.len(), workers, "Starting page downloads");

        // Bounded queue, drained by every worker through one lock.
        let (queue_tx, queue_rx) = mpsc::channel::<FetchTask>(workers);
        let queue = Arc::new(Mutex::new(queue_rx));
        let (outcome_tx, mut outcome_rx) = mpsc::unbounded_channel::<Outcome>();

        // Dropping the sender once every task is queued is what stops the workers.
        let producer = tokio::spawn(async move {
            for task in tasks {
                if queue_tx.send(task).await.is_err() {
                    break;
                }
            }
        });

        let handles: Vec<_> = (0..workers)
            .map(|worker| {
                let fetcher = self.clone();
                let queue = Arc::clone(&queue);
                let outcomes = outcome_tx.clone();
                let progress = Arc::clone(&progress);
                tokio::spawn(async move { fetcher.work(worker, queue, outcomes, progress).await })
            })
            .collect();
        // Only the workers hold senders now, so the loop below ends when the last one exits.
        drop(outcome_tx);

        let mut report = FetchReport::default();
        while let Some(outcome) = outcome_rx.recv().await {
            match outcome {
                Ok(page) => report.staged.push(page),
                Err(failure) => {
                    warn!("{}", failure);
                    report.failed.push(failure);
                }
            }
        }

        for handle in handles {
            if let Err(e) = handle.await {
                error!("Download worker stopped unexpectedly: {}", e);
            }
        }
        if let Err(e) = producer.await {
            error!("Page queue stopped unexpectedly: {}", e);
        }

        // Workers finish out of order; assembly needs page order.
        report.staged.sort_by_key(|page| page.page_index);
        report
    }

    async fn work(
        &self,
        worker: usize,
        queue: Arc<Mutex<mpsc::Receiver<FetchTask>>>,
        outcomes: mpsc::UnboundedSender<Outcome>,
        progress: Arc<ProgressReporter>,
    ) {
        loop {
            // The lock is released before the download starts.
            let next = queue.lock().await.recv().await;
            let Some(task) = next else {
                debug!(worker, "Page queue drained");
                break;
            };

            let outcome = self.fetch_page(&task).await;
            if outcome.is_ok() {
                progress.increment();
            }
            if outcomes.send(outcome).is_err() {
                break;
            }
        }
    }

    async fn fetch_page(&self, task: &FetchTask) -> Outcome {
        let attempts = self.options.attempts();
        let mut attempt = 0;

        loop {
            attempt += 1;

            match self.fetch_once(task).await {
                Ok(bytes_written) => {
                    if attempt > 1 {
                        debug!(page = task.page_index, attempt, "Page downloaded after retry");
                    }
                    return Ok(StagedPage {
                        page_index: task.page_index,
                        path: task.destination.clone(),
                        bytes_written,
                    });
                }
                Err(error) => {
                    // Never leave a truncated image behind for the assembler.
                    discard_partial(&task.destination).await;

                    if !error.is_retryable() || attempt >= attempts {
                        return Err(PageFailure {
                            page_index: task.page_index,
                            attempts: attempt,
                            error,
                        });
                    }

                    debug!(
                        page = task.page_index,
                        attempt,
                        attempts,
                        error = %error,
                        "Page download failed, retrying"
                    );
                    // Fixed wait, only between attempts.
                    tokio::time::sleep(self.options.retry_delay).await;
                }
            }
        }
    }

    async fn fetch_once(&self, task: &FetchTask) -> Result<u64, FetchError> {
        let url = task.source.as_str();

        let response = self
            .client
            .get(task.source.clone())
            .send()
            .await
            .map_err(|e| FetchError::Request {
                url: url.to_string(),
                message: e.to_string(),
            })?;

        let status = response.status();
        if !status.is_success() {
            return Err(FetchError::Status {
                url: url.to_string(),
                status: status.as_u16(),
            });
        }

        let write_error = |source| FetchError::Write {
            path: task.destination.clone(),
            source,
        };

        // Stream straight to disk instead of buffering the whole image.
        let mut file = File::create(&task.destination).await.map_err(write_error)?;
        let mut body = response.bytes_stream();
        let mut written = 0u64;

        while let Some(chunk) = body.next().await {
            let chunk = chunk.map_err(|e| FetchError::Body {
                url: url.to_string(),
                message: e.to_string(),
            })?;
            file.write_all(&chunk).await.map_err(write_error)?;
            written += chunk.len() as u64;
        }
        file.flush().await.map_err(write_error)?;

        Ok(written)
    }
}

async fn discard_partial(path: &Path) {
    if fs::try_exists(path).await.unwrap_or(false) {
        if let Err(e) = fs::remove_file(path).await {
            warn!("Failed to remove partial file {}: {}", path.display(), e);
        }
    }
}
