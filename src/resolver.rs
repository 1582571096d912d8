use colored::*;
use reqwest::StatusCode;
use tracing::{debug, info};
use url::Url;

use crate::config::Config;
use crate::manifest::{parse_manifest, sanitize_title, Manifest, ManifestError};
use crate::planner::child_url;

const FALLBACK_TITLE: &str = "flipbook";

/// A flipbook whose manifest has been fetched and parsed.
#[derive(Debug, Clone)]
pub struct ResolvedBook {
    /// `<host>/<account>/<book>`, the base of every asset URL.
    pub root: Url,
    pub manifest: Manifest,
    /// File-name safe title used for the PDF and the staging directory.
    pub title: String,
}

pub struct Resolver {
    client: reqwest::Client,
    host: Url,
    title: Option<String>,
}

impl Resolver {
    pub fn new(client: reqwest::Client, config: &Config) -> Self {
        Self {
            client,
            host: config.host.clone(),
            title: config.title.clone(),
        }
    }

    pub async fn resolve(&self, document_url: &str) -> Result<ResolvedBook, ManifestError> {
        let root = document_root(&self.host, document_url)?;
        let manifest_url = child_url(&root, &["mobile", "javascript", "config.js"]);

        info!("Fetching manifest \"{}\"", manifest_url.as_str().green());
        let raw = self.fetch_manifest(&manifest_url).await?;
        let manifest = parse_manifest(&raw)?;
        debug!(
            pages = manifest.page_count,
            locator = ?manifest.locator,
            "Parsed manifest"
        );

        let title = self
            .title
            .as_deref()
            .and_then(sanitize_title)
            .or_else(|| manifest.title.as_deref().and_then(sanitize_title))
            .or_else(|| {
                root.path_segments()
                    .and_then(|mut segments| segments.next_back())
                    .and_then(sanitize_title)
            })
            .unwrap_or_else(|| FALLBACK_TITLE.to_string());

        Ok(ResolvedBook {
            root,
            manifest,
            title,
        })
    }

    async fn fetch_manifest(&self, url: &Url) -> Result<Vec<u8>, ManifestError> {
        let response = self
            .client
            .get(url.clone())
            .send()
            .await
            .map_err(|e| ManifestError::Network(e.to_string()))?;

        let status = response.status();
        if status == StatusCode::NOT_FOUND {
            return Err(ManifestError::NotFound(url.to_string()));
        }
        if !status.is_success() {
            return Err(ManifestError::Network(format!("HTTP {} from {}", status, url)));
        }

        let body = response
            .bytes()
            .await
            .map_err(|e| ManifestError::Network(e.to_string()))?;

        Ok(body.to_vec())
    }
}

/// Maps any URL of a flipbook (viewer sub-pages included) to `<host>/<account>/<book>`.
pub fn document_root(host: &Url, document_url: &str) -> Result<Url, ManifestError> {
    let input = document_url.trim();
    let parsed = Url::parse(input)
        .or_else(|_| Url::parse(&format!("https://{}", input)))
        .map_err(|e| ManifestError::InvalidUrl(format!("{}: {}", input, e)))?;

    let segments: Vec<&str> = parsed
        .path_segments()
        .map(|segments| segments.filter(|s| !s.is_empty()).take(2).collect())
        .unwrap_or_default();

    if segments.len() < 2 {
        return Err(ManifestError::InvalidUrl(format!(
            "{}: expected a path like /<account>/<book>",
            input
        )));
    }

    let mut root = host.clone();
    root.set_path(&format!("/{}/{}", segments[0], segments[1]));
    root.set_query(None);
    root.set_fragment(None);
    Ok(root)
}
