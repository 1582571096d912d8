use anyhow::{anyhow, Context, Result};
use colored::*;
use slug::slugify;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::fs;
use tracing::{debug, error, info, warn};

use crate::config::{Config, FailurePolicy};
use crate::fetcher::{FetchReport, Fetcher};
use crate::pdf_builder::build_document;
use crate::planner::{plan, plan_tasks};
use crate::progress::ProgressReporter;
use crate::resolver::{ResolvedBook, Resolver};

/// Result of a successful run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RunOutcome {
    Created(PathBuf),
    /// The PDF was already there; nothing was downloaded or written.
    AlreadyExists(PathBuf),
}

pub struct Downloader {
    config: Config,
    show_progress: bool,
}

impl Downloader {
    pub fn new(config: Config) -> Self {
        Self {
            config,
            show_progress: true,
        }
    }

    /// Disables the terminal progress bars.
    pub fn quiet(mut self) -> Self {
        self.show_progress = false;
        self
    }

    pub async fn run(&self, document_url: &str) -> Result<RunOutcome> {
        info!("Preparing to download \"{}\"", document_url.green());

        if self.config.insecure {
            warn!("{}", "Insecure mode enabled: TLS certificates are not verified".yellow());
        }

        let client = self.config.http_client()?;
        let book = Resolver::new(client.clone(), &self.config)
            .resolve(document_url)
            .await?;

        info!(
            "Found \"{}\" with {} pages",
            book.title.green(),
            book.manifest.page_count
        );

        let output_path = self.config.output_dir.join(format!("{}.pdf", book.title));
        if fs::try_exists(&output_path).await.unwrap_or(false) {
            info!(
                "Output file {} already exists, nothing to do",
                output_path.display().to_string().blue()
            );
            return Ok(RunOutcome::AlreadyExists(output_path));
        }

        let staging_dir = self.staging_dir(&book);
        fs::create_dir_all(&staging_dir)
            .await
            .with_context(|| format!("Failed to create staging directory {}", staging_dir.display()))?;

        let report = self.download_pages(client, &book, &staging_dir).await;
        self.check_report(&report, &staging_dir)?;

        info!("Converting {} pages to PDF", report.succeeded());
        let progress = self.progress(report.succeeded(), "Assembling");
        build_document(&report.staged_paths(), &output_path, &progress)
            .await
            .with_context(|| format!("Failed to create {}", output_path.display()))?;

        if self.config.keep_temp {
            info!("Keeping downloaded pages in {}", staging_dir.display().to_string().blue());
        } else {
            info!("Cleaning up downloaded pages...");
            remove_staged_pages(&report, &staging_dir).await;
        }

        info!("PDF saved to: {}", output_path.display().to_string().green());
        Ok(RunOutcome::Created(output_path))
    }

    async fn download_pages(
        &self,
        client: reqwest::Client,
        book: &ResolvedBook,
        staging_dir: &Path,
    ) -> FetchReport {
        let tasks = plan_tasks(plan(&book.manifest, &book.root), staging_dir);
        info!(
            "Downloading {} pages into {} ({} threads)",
            tasks.len(),
            staging_dir.display().to_string().blue(),
            self.config.fetch.concurrency
        );

        let progress = Arc::new(self.progress(tasks.len(), "Downloading"));
        let report = Fetcher::new(client, self.config.fetch)
            .run(tasks, Arc::clone(&progress))
            .await;
        progress.finish();
        report
    }

    fn check_report(&self, report: &FetchReport, staging_dir: &Path) -> Result<()> {
        let Some(first) = report.first_error() else {
            return Ok(());
        };

        let failed = report.failed().len();
        error!(
            "{} of {} pages failed to download, first error: {}",
            failed,
            failed + report.succeeded(),
            first
        );

        match self.config.failure_policy {
            FailurePolicy::Abort => {
                info!(
                    "Downloaded pages were kept in {}",
                    staging_dir.display().to_string().blue()
                );
                Err(anyhow!(
                    "{} {} could not be downloaded ({}); rerun or pass --allow-partial to build an incomplete PDF",
                    failed,
                    if failed == 1 { "page" } else { "pages" },
                    first
                ))
            }
            FailurePolicy::AssemblePartial if report.succeeded() > 0 => {
                warn!("Building an incomplete PDF from {} pages", report.succeeded());
                Ok(())
            }
            FailurePolicy::AssemblePartial => Err(anyhow!("No pages could be downloaded")),
        }
    }

    fn staging_dir(&self, book: &ResolvedBook) -> PathBuf {
        self.config.temp_dir.clone().unwrap_or_else(|| {
            let name = slugify(&book.title);
            if name.is_empty() {
                self.config.output_dir.join("flip2pdf-pages")
            } else {
                self.config.output_dir.join(name)
            }
        })
    }

    fn progress(&self, total: usize, label: &str) -> ProgressReporter {
        if self.show_progress {
            ProgressReporter::new(total, label)
        } else {
            ProgressReporter::hidden(total)
        }
    }
}

/// Deletes the page files this run wrote, then the staging directory if nothing else is in it.
/// The directory may be shared with the user's own files, so it is never removed recursively.
async fn remove_staged_pages(report: &FetchReport, staging_dir: &Path) {
    for path in report.staged_paths() {
        if let Err(e) = fs::remove_file(&path).await {
            warn!("Failed to remove {}: {}", path.display(), e);
        }
    }

    match fs::read_dir(staging_dir).await {
        Ok(mut entries) => {
            if let Ok(None) = entries.next_entry().await {
                if let Err(e) = fs::remove_dir(staging_dir).await {
                    warn!("Failed to remove {}: {}", staging_dir.display(), e);
                }
            } else {
                debug!("Leaving {} in place, it holds other files", staging_dir.display());
            }
        }
        Err(e) => warn!("Failed to read {}: {}", staging_dir.display(), e),
    }
}
