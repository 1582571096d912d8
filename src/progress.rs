use indicatif::{ProgressBar, ProgressStyle};
use std::sync::atomic::{AtomicU64, Ordering};

const TEMPLATE: &str = "{msg:>12} [{wide_bar}] {pos}/{len}";

/// Terminal progress bar shared between workers. Purely cosmetic.
pub struct ProgressReporter {
    bar: ProgressBar,
    completed: AtomicU64,
}

impl ProgressReporter {
    pub fn new(total: usize, label: &str) -> Self {
        let style = ProgressStyle::with_template(TEMPLATE)
            .unwrap_or_else(|_| ProgressStyle::default_bar())
            .progress_chars("=> ");

        Self::with_bar(
            ProgressBar::new(total as u64)
                .with_style(style)
                .with_message(label.to_string()),
        )
    }

    /// A reporter that counts but never draws.
    pub fn hidden(total: usize) -> Self {
        let bar = ProgressBar::hidden();
        bar.set_length(total as u64);
        Self::with_bar(bar)
    }

    fn with_bar(bar: ProgressBar) -> Self {
        Self {
            bar,
            completed: AtomicU64::new(0),
        }
    }

    pub fn increment(&self) {
        self.completed.fetch_add(1, Ordering::Relaxed);
        self.bar.inc(1);
    }

    pub fn finish(&self) {
        self.bar.finish();
    }

    pub fn completed(&self) -> u64 {
        self.completed.load(Ordering::Relaxed)
    }
}
