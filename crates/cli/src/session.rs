//! Per-invocation logging for assetsync
//!
//! Every run gets a session id and a trace file at
//! `$ASSETSYNC_LOG_DIR/assetsync-<id>.log` (the system temp dir by default).
//! The console layer shares the terminal with the progress bars and only
//! shows what the chosen verbosity lets through.

use std::path::{Path, PathBuf};

use tracing_subscriber::Layer as _;
use tracing_subscriber::filter::{EnvFilter, LevelFilter};
use tracing_subscriber::layer::SubscriberExt as _;
use tracing_subscriber::util::SubscriberInitExt as _;
use uuid::Uuid;

use crate::progress;

/// Overrides the directory trace files are written to
pub const LOG_DIR_ENV: &str = "ASSETSYNC_LOG_DIR";

/// Targets traced in full in the session file
const TRACED_CRATES: &[&str] = &[
    "assetsync",
    "assetsync_core",
    "assetsync_storage",
    "assetsync_sync",
];

/// How much logging reaches the terminal
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Verbosity {
    /// Errors only (`sync --quiet`)
    Quiet,
    Normal,
    /// Debug output (`--verbose`)
    Verbose,
}

impl Verbosity {
    /// `--verbose` wins over `--quiet`
    #[must_use]
    pub fn from_flags(verbose: bool, quiet: bool) -> Self {
        match (verbose, quiet) {
            (true, _) => Self::Verbose,
            (false, true) => Self::Quiet,
            (false, false) => Self::Normal,
        }
    }

    /// Regular output comes from the progress reporter, so the console log
    /// stays at warnings unless asked otherwise
    fn console_level(self) -> LevelFilter {
        match self {
            Self::Quiet => LevelFilter::ERROR,
            Self::Normal => LevelFilter::WARN,
            Self::Verbose => LevelFilter::DEBUG,
        }
    }
}

/// A logging session, flushed when dropped
pub struct Session {
    id: Uuid,
    log_path: PathBuf,
    _guard: tracing_appender::non_blocking::WorkerGuard,
}

impl Session {
    /// Install the global subscriber: trace file plus console.
    ///
    /// Keep the session alive until the program exits.
    pub fn start(verbosity: Verbosity) -> Self {
        let id = Uuid::new_v4();
        let dir = log_dir(std::env::var_os(LOG_DIR_ENV).map(PathBuf::from));
        let file_name = log_file_name(id);
        let log_path = dir.join(&file_name);

        let (writer, guard) =
            tracing_appender::non_blocking(tracing_appender::rolling::never(&dir, &file_name));

        let file_layer = tracing_subscriber::fmt::layer()
            .with_writer(writer)
            .with_ansi(false)
            .with_thread_ids(true)
            .with_file(true)
            .with_line_number(true)
            .with_filter(
                EnvFilter::try_from_default_env()
                    .unwrap_or_else(|_| EnvFilter::new(file_directives())),
            );

        let console_layer = tracing_subscriber::fmt::layer()
            .with_writer(progress::ProgressWriter)
            .with_target(false)
            .without_time()
            .with_filter(verbosity.console_level());

        tracing_subscriber::registry()
            .with(file_layer)
            .with(console_layer)
            .init();

        tracing::debug!(session = %id, "trace log at {}", log_path.display());
        Self {
            id,
            log_path,
            _guard: guard,
        }
    }

    #[must_use]
    pub fn id(&self) -> Uuid {
        self.id
    }

    #[must_use]
    pub fn log_path(&self) -> &Path {
        &self.log_path
    }
}

fn log_dir(overridden: Option<PathBuf>) -> PathBuf {
    overridden
        .filter(|dir| !dir.as_os_str().is_empty())
        .unwrap_or_else(std::env::temp_dir)
}

fn log_file_name(id: Uuid) -> String {
    format!("assetsync-{id}.log")
}

/// `warn` for dependencies, `trace` for our own crates
fn file_directives() -> String {
    std::iter::once("warn".to_string())
        .chain(TRACED_CRATES.iter().map(|krate| format!("{krate}=trace")))
        .collect::<Vec<_>>()
        .join(",")
}
