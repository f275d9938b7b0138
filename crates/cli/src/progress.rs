//! Cargo-style progress output for assetsync
//!
//! Displays progress in the familiar cargo format:
//! ```text
//!     Syncing 42 assets to s3
//! [text/css] css/site.css
//!   Uploading [===========>             ] 20/42 img/logo.png
//!      Synced 3 uploaded (84.21 KiB), 39 unchanged in 1.20s
//! ```
//!
//! Uploaded assets go to stdout as `[content-type] remote-path`; everything
//! else goes to stderr.

use std::io::{self, Write as _};
use std::path::{Path, PathBuf};
use std::sync::{LazyLock, Mutex};
use std::time::Instant;

use assetsync_sync::{AssetOutcome, Outcome, SyncObserver, SyncReport};
use indicatif::{MultiProgress, ProgressBar, ProgressStyle};

/// Shared draw target, so log lines and bars do not trample each other
static MULTI: LazyLock<MultiProgress> = LazyLock::new(MultiProgress::new);

/// Status verbs for cargo-style output (right-aligned to 12 chars)
struct Status;

impl Status {
    const SYNCING: &str = "Syncing";
    const UPLOADING: &str = "Uploading";
    const SYNCED: &str = "Synced";
    const FINISHED: &str = "Finished";
    const FAILED: &str = "Failed";
    const WARNING: &str = "Warning";
    const LOG: &str = "Log";
}

/// Print a cargo-style status line
fn print_status(style: &console::Style, status: &str, message: &str) {
    MULTI.suspend(|| {
        let mut term = console::Term::stderr();
        let _ = writeln!(term, "{:>12} {}", style.apply_to(status), message);
    });
}

fn green() -> console::Style {
    console::Style::new().green().bold()
}

fn yellow() -> console::Style {
    console::Style::new().yellow().bold()
}

fn red() -> console::Style {
    console::Style::new().red().bold()
}

/// Writer for the console log layer, routed around the progress bars
#[derive(Debug, Clone, Copy, Default)]
pub struct ProgressWriter;

impl io::Write for ProgressWriter {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        MULTI.suspend(|| io::stderr().write(buf))
    }

    fn flush(&mut self) -> io::Result<()> {
        io::stderr().flush()
    }
}

impl<'a> tracing_subscriber::fmt::MakeWriter<'a> for ProgressWriter {
    type Writer = Self;

    fn make_writer(&'a self) -> Self::Writer {
        *self
    }
}

/// Format a duration the way cargo does
fn elapsed_str(start: Instant) -> String {
    let elapsed = start.elapsed();
    if elapsed.as_secs() >= 1 {
        format!("{:.2}s", elapsed.as_secs_f64())
    } else {
        format!("{}ms", elapsed.as_millis())
    }
}

/// Progress tracker for a sync pass
pub struct SyncProgress {
    start: Mutex<Instant>,
    quiet: bool,
    log_path: Option<PathBuf>,
    bar: Mutex<Option<ProgressBar>>,
}

impl SyncProgress {
    pub fn new(quiet: bool) -> Self {
        Self {
            start: Mutex::new(Instant::now()),
            quiet,
            log_path: None,
            bar: Mutex::new(None),
        }
    }

    /// Point at the session trace file when a pass has failures
    #[must_use]
    pub fn with_log_path(mut self, path: &Path) -> Self {
        self.log_path = Some(path.to_path_buf());
        self
    }

    /// Create a progress bar for the assets of a pass
    fn asset_bar(total: u64) -> ProgressBar {
        let pb = MULTI.add(ProgressBar::new(total));
        pb.set_style(
            ProgressStyle::default_bar()
                .template(
                    "{spinner:.green} {msg:>12} [{bar:25.cyan/dim}] {pos}/{len} {prefix:.dim}",
                )
                .expect("valid template")
                .progress_chars("=> "),
        );
        pb.set_message(Status::UPLOADING);
        pb.enable_steady_tick(std::time::Duration::from_millis(100));
        pb
    }

    fn bar(&self) -> std::sync::MutexGuard<'_, Option<ProgressBar>> {
        self.bar
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
    }
}

impl SyncObserver for SyncProgress {
    fn on_start(&self, storage: &str, total: usize) {
        *self
            .start
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner) = Instant::now();
        print_status(&green(), Status::SYNCING, &format!("{total} assets to {storage}"));
        *self.bar() = Some(Self::asset_bar(total as u64));
    }

    fn on_outcome(&self, outcome: &AssetOutcome) {
        if let Some(bar) = self.bar().as_ref() {
            bar.inc(1);
            bar.set_prefix(outcome.remote_path.clone());
        }

        if outcome.outcome == Outcome::Uploaded && !self.quiet {
            MULTI.suspend(|| {
                println!(
                    "[{}] {}",
                    outcome.content_type.as_deref().unwrap_or_default(),
                    outcome.remote_path
                );
            });
        }
    }

    fn on_finish(&self, report: &SyncReport) {
        if let Some(bar) = self.bar().take() {
            bar.finish_and_clear();
            MULTI.remove(&bar);
        }

        let start = *self
            .start
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner);
        let size = humansize::format_size(report.uploaded_bytes(), humansize::BINARY);
        let summary = format!(
            "{} uploaded ({size}), {} unchanged in {}",
            report.uploaded(),
            report.skipped(),
            elapsed_str(start)
        );

        if report.failed() == 0 {
            print_status(&green(), Status::SYNCED, &summary);
        } else {
            print_status(
                &yellow(),
                Status::FINISHED,
                &format!("{summary}, {} failed", report.failed()),
            );
            for (path, reason) in report.failures() {
                print_status(&red(), Status::FAILED, &format!("{path}: {reason}"));
            }
            if let Some(log_path) = &self.log_path {
                print_status(&yellow(), Status::LOG, &format!("details in {}", log_path.display()));
            }
        }
    }
}

/// Warn about a session that did not close cleanly
pub fn close_warning(report: &SyncReport) {
    if let Some(error) = &report.close_error {
        print_status(&yellow(), Status::WARNING, &format!("closing storage failed: {error}"));
    }
}
