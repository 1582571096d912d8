use regex::Regex;
use std::sync::LazyLock;
use thiserror::Error;

/// Extension used by the numbered mobile page images.
pub const SEQUENTIAL_EXTENSION: &str = "jpg";

// Key spellings seen across versions of the hosted config.js.
static PAGE_COUNT: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#""?(?:bookConfig\.)?(?:total)?[Pp]ageCount"?\s*[=:]\s*"?(\d+)"?"#).unwrap()
});

static PAGE_FILE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r#""n":\["(.*?)"\]"#).unwrap());

static TITLE_PATTERNS: LazyLock<Vec<Regex>> = LazyLock::new(|| {
    [
        r#""?(?:bookConfig\.)?bookTitle"?\s*[=:]\s*"((?:[^"\\]|\\.)*)""#,
        r#""title"\s*:\s*"((?:[^"\\]|\\.)*)""#,
    ]
    .iter()
    .map(|pattern| Regex::new(pattern).unwrap())
    .collect()
});

#[derive(Debug, Error)]
pub enum ManifestError {
    #[error("Invalid flipbook URL: {0}")]
    InvalidUrl(String),

    #[error("Flipbook manifest not found at {0}")]
    NotFound(String),

    #[error("Failed to fetch flipbook manifest: {0}")]
    Network(String),

    #[error("Malformed flipbook manifest: {0}")]
    Malformed(String),

    #[error("Flipbook has no pages")]
    NoPages,
}

/// How the image of each page is located on the host.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PageLocator {
    /// Pages are numbered `1.<ext>`, `2.<ext>`, ...
    Sequential(String),
    /// One file name per page, in page order.
    Explicit(Vec<String>),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Manifest {
    pub page_count: usize,
    pub locator: PageLocator,
    pub title: Option<String>,
}

/// Extracts page count, page file names and title from a raw `config.js`.
pub fn parse_manifest(raw: &[u8]) -> Result<Manifest, ManifestError> {
    let text = String::from_utf8_lossy(raw);

    let page_count = parse_page_count(&text)?;
    if page_count == 0 {
        return Err(ManifestError::NoPages);
    }

    let mut names = parse_page_files(&text);
    let locator = if names.is_empty() {
        PageLocator::Sequential(SEQUENTIAL_EXTENSION.to_string())
    } else if names.len() < page_count {
        return Err(ManifestError::Malformed(format!(
            "{} page files listed for {} pages",
            names.len(),
            page_count
        )));
    } else {
        names.truncate(page_count);
        PageLocator::Explicit(names)
    };

    Ok(Manifest {
        page_count,
        locator,
        title: parse_title(&text),
    })
}

fn parse_page_count(text: &str) -> Result<usize, ManifestError> {
    let digits = PAGE_COUNT
        .captures(text)
        .and_then(|caps| caps.get(1))
        .ok_or_else(|| ManifestError::Malformed("page count not found".to_string()))?;

    digits
        .as_str()
        .parse()
        .map_err(|_| ManifestError::Malformed(format!("invalid page count '{}'", digits.as_str())))
}

fn parse_page_files(text: &str) -> Vec<String> {
    PAGE_FILE
        .captures_iter(text)
        .filter_map(|caps| caps.get(1))
        .filter_map(|m| m.as_str().split('"').next())
        .filter(|name| !name.is_empty())
        .map(str::to_string)
        .collect()
}

/// Returns the book title declared in the manifest, if any.
pub fn parse_title(text: &str) -> Option<String> {
    TITLE_PATTERNS
        .iter()
        .filter_map(|pattern| pattern.captures(text))
        .filter_map(|caps| caps.get(1))
        .map(|m| unescape(m.as_str()).trim().to_string())
        .find(|title| !title.is_empty())
}

/// Resolves backslash escapes of a JS string literal; `\n`, `\r` and `\t` become spaces.
fn unescape(raw: &str) -> String {
    let mut out = String::with_capacity(raw.len());
    let mut chars = raw.chars();
    while let Some(c) = chars.next() {
        if c != '\\' {
            out.push(c);
            continue;
        }
        match chars.next() {
            Some('n' | 'r' | 't') => out.push(' '),
            Some(other) => out.push(other),
            None => {}
        }
    }
    out
}

/// Makes a title usable as a file name: no separators, quotes or reserved characters.
pub fn sanitize_title(title: &str) -> Option<String> {
    let cleaned: String = title
        .chars()
        .map(|c| if c.is_control() { ' ' } else { c })
        .filter(|c| !matches!(c, '/' | '\\' | ':' | '*' | '?' | '"' | '\'' | '<' | '>' | '|'))
        .collect();

    let collapsed = cleaned.split_whitespace().collect::<Vec<_>>().join(" ");
    let trimmed = collapsed.trim_matches(|c: char| c == '.' || c == ' ');

    if trimmed.is_empty() {
        None
    } else {
        Some(trimmed.to_string())
    }
}
