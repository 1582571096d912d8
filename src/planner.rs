use std::path::Path;
use url::Url;

use crate::fetcher::FetchTask;
use crate::manifest::{Manifest, PageLocator};

/// Appends path segments to `root`, percent-encoding each of them.
pub(crate) fn child_url(root: &Url, parts: &[&str]) -> Url {
    let mut url = root.clone();
    if let Ok(mut segments) = url.path_segments_mut() {
        segments.pop_if_empty().extend(parts);
    }
    url
}

/// Page image URLs in page order, one per page.
pub fn plan(manifest: &Manifest, root: &Url) -> Vec<Url> {
    match &manifest.locator {
        PageLocator::Explicit(names) => names
            .iter()
            .take(manifest.page_count)
            .map(|name| child_url(root, &["files", "large", name.as_str()]))
            .collect(),
        PageLocator::Sequential(extension) => (1..=manifest.page_count)
            .map(|page| {
                let name = format!("{}.{}", page, extension);
                child_url(root, &["files", "mobile", name.as_str()])
            })
            .collect(),
    }
}

/// Zero-padded page index plus the source extension, so lexical order is page order.
pub fn staged_file_name(page_index: usize, source: &Url) -> String {
    let extension = source
        .path_segments()
        .and_then(|mut segments| segments.next_back())
        .and_then(|name| Path::new(name).extension())
        .and_then(|ext| ext.to_str())
        .filter(|ext| !ext.is_empty());

    match extension {
        Some(ext) => format!("{:04}.{}", page_index, ext),
        None => format!("{:04}", page_index),
    }
}

pub fn plan_tasks(urls: Vec<Url>, staging_dir: &Path) -> Vec<FetchTask> {
    urls.into_iter()
        .enumerate()
        .map(|(page_index, source)| FetchTask {
            page_index,
            destination: staging_dir.join(staged_file_name(page_index, &source)),
            source,
        })
        .collect()
}
