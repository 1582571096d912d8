//! # flip2pdf
//!
//! A CLI utility to download online flipbooks and save them as PDF files.
//!
//! ## Pipeline
//!
//! - Resolve the flipbook manifest (page count, page file names, title)
//! - Plan one image URL per page
//! - Download all pages with a bounded pool of workers, retrying each page
//! - Assemble the staged images, in page order, into a single PDF
//!
//! ## Usage
//!
//! ```bash
//! flip2pdf download https://anyflip.com/abcd/efgh --threads 8 --retries 3
//! ```

mod config;
mod downloader;
mod fetcher;
mod manifest;
mod pdf_builder;
mod planner;
mod progress;
mod resolver;

pub use config::{parse_duration, parse_timeout, Config, FailurePolicy, DEFAULT_HOST};
pub use downloader::{Downloader, RunOutcome};
pub use fetcher::{FetchError, FetchOptions, FetchReport, FetchTask, Fetcher, PageFailure, StagedPage};
pub use manifest::{parse_manifest, parse_title, sanitize_title, Manifest, ManifestError, PageLocator};
pub use pdf_builder::{build_document, collect_images, AssemblyError, PdfBuilder};
pub use planner::{plan, plan_tasks, staged_file_name};
pub use progress::ProgressReporter;
pub use resolver::{document_root, ResolvedBook, Resolver};
