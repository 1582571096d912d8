use anyhow::{anyhow, Result};
use std::path::PathBuf;
use std::time::Duration;
use url::Url;

use crate::fetcher::FetchOptions;

/// Origin serving flipbook manifests and page images.
pub const DEFAULT_HOST: &str = "https://online.anyflip.com";

const USER_AGENT: &str = concat!("flip2pdf/", env!("CARGO_PKG_VERSION"));

/// What to do when some pages could not be downloaded.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum FailurePolicy {
    /// Keep the staging directory and skip PDF assembly.
    #[default]
    Abort,
    /// Build the PDF from whatever pages were staged, leaving gaps.
    AssemblePartial,
}

/// Run configuration, built once at startup and handed to every stage.
#[derive(Debug, Clone)]
pub struct Config {
    pub host: Url,
    pub title: Option<String>,
    pub insecure: bool,
    /// Per-request timeout. Zero disables it.
    pub timeout: Duration,
    pub fetch: FetchOptions,
    pub keep_temp: bool,
    pub temp_dir: Option<PathBuf>,
    pub output_dir: PathBuf,
    pub failure_policy: FailurePolicy,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            host: Url::parse(DEFAULT_HOST).expect("default host is a valid URL"),
            title: None,
            insecure: false,
            timeout: Duration::from_secs(30),
            fetch: FetchOptions::default(),
            keep_temp: false,
            temp_dir: None,
            output_dir: PathBuf::from("."),
            failure_policy: FailurePolicy::default(),
        }
    }
}

impl Config {
    /// Builds the HTTP client shared by the manifest fetch and every page download.
    pub fn http_client(&self) -> Result<reqwest::Client> {
        let mut builder = reqwest::Client::builder()
            .user_agent(USER_AGENT)
            .danger_accept_invalid_certs(self.insecure);

        // Zero means wait as long as the server takes.
        if !self.timeout.is_zero() {
            builder = builder.timeout(self.timeout);
        }

        builder
            .build()
            .map_err(|e| anyhow!("Failed to create HTTP client: {}", e))
    }
}

pub fn parse_timeout(s: &str) -> Result<f64, String> {
    let value = s.parse::<f64>().map_err(|_| "Not a number.")?;
    if Duration::try_from_secs_f64(value).is_err() {
        return Err("Must be zero or positive number.".to_string());
    }
    Ok(value)
}

/// Parses durations such as `500ms`, `2s`, `1.5s`, `1m` or a bare number of seconds.
pub fn parse_duration(s: &str) -> Result<Duration, String> {
    let s = s.trim();
    let split = s
        .find(|c: char| !(c.is_ascii_digit() || c == '.'))
        .unwrap_or(s.len());
    let (number, unit) = s.split_at(split);

    let value = number
        .parse::<f64>()
        .map_err(|_| format!("Invalid duration '{}'", s))?;
    if !value.is_finite() || value < 0.0 {
        return Err(format!("Invalid duration '{}'", s));
    }

    let seconds = match unit.trim() {
        "ms" => value / 1000.0,
        "" | "s" => value,
        "m" => value * 60.0,
        "h" => value * 3600.0,
        other => return Err(format!("Unknown duration unit '{}'", other)),
    };

    Duration::try_from_secs_f64(seconds).map_err(|_| format!("Duration '{}' is out of range", s))
}
