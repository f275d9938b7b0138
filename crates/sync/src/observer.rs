//! Hooks around a sync pass

use tracing::{debug, error, info};

use crate::outcome::{AssetOutcome, Outcome, SyncReport};

/// Receives progress from a running pass.
///
/// All methods default to doing nothing. `on_outcome` may be called from
/// several tasks when uploads run in parallel.
pub trait SyncObserver: Send + Sync {
    /// Session opened, `total` assets are about to be considered
    fn on_start(&self, _storage: &str, _total: usize) {}

    /// One asset finished
    fn on_outcome(&self, _outcome: &AssetOutcome) {}

    /// All assets finished, the session is about to close
    fn on_finish(&self, _report: &SyncReport) {}
}

/// Observer that ignores everything
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopObserver;

impl SyncObserver for NoopObserver {}

/// Observer that logs through `tracing`
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingObserver;

impl SyncObserver for TracingObserver {
    fn on_start(&self, storage: &str, total: usize) {
        info!("syncing {total} assets to {storage}");
    }

    fn on_outcome(&self, outcome: &AssetOutcome) {
        let path = &outcome.remote_path;
        match &outcome.outcome {
            Outcome::Uploaded => info!(
                "[{}] {path}",
                outcome.content_type.as_deref().unwrap_or_default()
            ),
            Outcome::SkippedUnchanged => debug!("{path} unchanged"),
            Outcome::SkippedNotCombinable => debug!("{path} is not combinable"),
            Outcome::Failed { reason } => error!("{path}: {reason}"),
        }
    }

    fn on_finish(&self, report: &SyncReport) {
        info!(
            "{} uploaded, {} skipped, {} failed",
            report.uploaded(),
            report.skipped(),
            report.failed()
        );
    }
}
