//! One sync pass from the media root to a storage backend

use std::fmt;
use std::sync::Arc;

use assetsync_core::config::Settings;
use assetsync_core::{Asset, Combiner, ProcessorChain, join_remote_path};
use assetsync_storage::{Storage, StorageError};
use bytes::Bytes;
use color_eyre::Result;
use color_eyre::eyre::{WrapErr as _, eyre};
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tracing::{debug, info, warn};

use crate::observer::{SyncObserver, TracingObserver};
use crate::outcome::{AssetOutcome, Outcome, SyncReport};
use crate::plan::{PlannedAsset, Source, plan};

/// Where a pass currently is
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncPhase {
    Idle,
    Opened,
    SyncingJoined,
    SyncingTree,
    Closed,
}

impl fmt::Display for SyncPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Idle => "idle",
            Self::Opened => "opened",
            Self::SyncingJoined => "syncing-joined",
            Self::SyncingTree => "syncing-tree",
            Self::Closed => "closed",
        };
        f.write_str(name)
    }
}

fn enter(phase: &mut SyncPhase, next: SyncPhase) {
    if *phase != next {
        debug!("sync phase {phase} -> {next}");
        *phase = next;
    }
}

/// Render an error with its sources, `outer: inner: root`
fn describe(err: &(dyn std::error::Error + 'static)) -> String {
    let mut message = err.to_string();
    let mut source = err.source();
    while let Some(cause) = source {
        message.push_str(": ");
        message.push_str(&cause.to_string());
        source = cause.source();
    }
    message
}

/// Sync orchestrator
pub struct Syncer {
    settings: Settings,
    storage: Arc<dyn Storage>,
    combiner: Arc<Combiner>,
    chain: Arc<ProcessorChain>,
    observer: Arc<dyn SyncObserver>,
    workers: usize,
}

impl fmt::Debug for Syncer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Syncer")
            .field("storage", &self.storage.name())
            .field("media_root", &self.settings.media_root)
            .field("chain", &self.chain)
            .field("workers", &self.workers)
            .finish_non_exhaustive()
    }
}

impl Syncer {
    /// Create a syncer, resolving the configured processors.
    ///
    /// # Errors
    /// Returns a [`ConfigError`](assetsync_core::ConfigError) if a processor is unknown or unavailable.
    pub fn new(settings: Settings, storage: Arc<dyn Storage>) -> Result<Self> {
        let chain = ProcessorChain::from_settings(&settings)?;
        Ok(Self {
            combiner: Arc::new(Combiner::from_settings(&settings)),
            workers: settings.workers.max(1),
            settings,
            storage,
            chain: Arc::new(chain),
            observer: Arc::new(TracingObserver),
        })
    }

    /// Replace the processor chain
    #[must_use]
    pub fn with_chain(mut self, chain: ProcessorChain) -> Self {
        self.chain = Arc::new(chain);
        self
    }

    #[must_use]
    pub fn with_observer(mut self, observer: Arc<dyn SyncObserver>) -> Self {
        self.observer = observer;
        self
    }

    /// Number of concurrent uploads, 1 means sequential
    #[must_use]
    pub fn with_workers(mut self, workers: usize) -> Self {
        self.workers = workers.max(1);
        self
    }

    #[must_use]
    pub fn settings(&self) -> &Settings {
        &self.settings
    }

    #[must_use]
    pub fn storage(&self) -> &Arc<dyn Storage> {
        &self.storage
    }

    /// Assets a pass would consider, in upload order
    #[must_use]
    pub fn plan(&self) -> Vec<PlannedAsset> {
        plan(&self.settings, &self.combiner)
    }

    /// Run one full pass.
    ///
    /// Per-asset failures are recorded in the report and never abort the
    /// pass. Once the session is open it is always closed; a failing close
    /// is reported, not raised.
    ///
    /// # Errors
    /// Returns an error if the storage session cannot be opened.
    pub async fn run(&self, force: bool) -> Result<SyncReport> {
        let mut phase = SyncPhase::Idle;
        let planned = self.plan();

        self.storage
            .open()
            .await
            .wrap_err_with(|| format!("failed to open {} storage", self.storage.name()))?;
        enter(&mut phase, SyncPhase::Opened);
        self.observer.on_start(self.storage.name(), planned.len());

        let mut report = SyncReport::default();
        let mut uploads = Uploads::new(Arc::clone(&self.storage), self.workers, force);

        for item in planned {
            let next = if item.is_bundle() {
                SyncPhase::SyncingJoined
            } else {
                SyncPhase::SyncingTree
            };
            enter(&mut phase, next);

            let combiner = Arc::clone(&self.combiner);
            let chain = Arc::clone(&self.chain);
            let serve_remote = self.settings.serve_remote;
            let source = item.clone();
            let prepared =
                blocking(move || prepare(&combiner, &chain, &source, serve_remote)).await;

            match prepared {
                Ok(Some(asset)) => {
                    for done in uploads.submit(asset).await {
                        self.record(&mut report, done);
                    }
                }
                Ok(None) => self.record(
                    &mut report,
                    AssetOutcome {
                        remote_path: item.remote_path,
                        content_type: None,
                        local_path: None,
                        size: None,
                        outcome: Outcome::SkippedNotCombinable,
                    },
                ),
                Err(e) => {
                    let mut failed = AssetOutcome::failed(item.remote_path, format!("{e:#}"));
                    if let Source::File { local_path } = item.source {
                        failed.local_path = Some(local_path);
                    }
                    self.record(&mut report, failed);
                }
            }
        }

        for done in uploads.drain().await {
            self.record(&mut report, done);
        }

        self.observer.on_finish(&report);
        self.close(&mut report).await;
        enter(&mut phase, SyncPhase::Closed);

        info!(
            "sync finished: {} uploaded, {} skipped, {} failed",
            report.uploaded(),
            report.skipped(),
            report.failed()
        );
        Ok(report)
    }

    /// Process and upload a single in-memory asset to `remote_dir/name`.
    ///
    /// Processors always run as if serving remotely.
    ///
    /// # Errors
    /// Returns an error if processing fails or the session cannot be opened.
    pub async fn upload(
        &self,
        remote_dir: &str,
        name: &str,
        bytes: Vec<u8>,
        force: bool,
    ) -> Result<AssetOutcome> {
        let remote_path = join_remote_path([remote_dir, name]);
        let asset = Asset::from_bytes(&remote_path, bytes);
        let chain = Arc::clone(&self.chain);
        let asset = blocking(move || process(&chain, asset, true)).await?;

        self.storage
            .open()
            .await
            .wrap_err_with(|| format!("failed to open {} storage", self.storage.name()))?;
        let outcome = put(Arc::clone(&self.storage), asset, force).await;
        self.observer.on_outcome(&outcome);

        let mut report = SyncReport::default();
        self.close(&mut report).await;
        Ok(outcome)
    }

    /// Combine and process a configured bundle without uploading it
    ///
    /// # Errors
    /// Returns an error if the bundle is not configured, a source cannot be
    /// read, or a processor fails.
    pub fn render_bundle(&self, name: &str) -> Result<Option<Asset>> {
        let sources = self
            .settings
            .joined
            .get(name)
            .ok_or_else(|| eyre!("no joined bundle named `{name}`"))?;

        let Some(combined) = self.combiner.combine(name, sources)? else {
            return Ok(None);
        };
        process(&self.chain, combined.into_asset(), self.settings.serve_remote).map(Some)
    }

    /// Base URL assets are served from, without a trailing slash.
    ///
    /// When serving remotely this is the backend URL; a backend that cannot
    /// serve `secure` URLs falls back to its plain URL. Otherwise it is the
    /// configured `media_url`.
    ///
    /// # Errors
    /// Returns an error if the backend URL cannot be determined.
    pub async fn media_url(&self, secure: bool) -> Result<String> {
        if !self.settings.serve_remote {
            return Ok(self.settings.media_url.trim_end_matches('/').to_string());
        }

        let url = match self.base_url(secure).await {
            Err(StorageError::Unsupported { what, backend }) if secure => {
                debug!("{backend} does not support {what}, using plain URL");
                self.base_url(false).await
            }
            other => other,
        };
        Ok(url?.trim_end_matches('/').to_string())
    }

    /// Backend base URL, opening a session if the backend needs one
    async fn base_url(&self, secure: bool) -> Result<String, StorageError> {
        match self.storage.remote_base_url(secure) {
            Err(StorageError::NotOpen) => {
                self.storage.open().await?;
                let url = self.storage.remote_base_url(secure);
                if let Err(e) = self.storage.close().await {
                    warn!("failed to close {} storage: {e}", self.storage.name());
                }
                url
            }
            other => other,
        }
    }

    fn record(&self, report: &mut SyncReport, outcome: AssetOutcome) {
        self.observer.on_outcome(&outcome);
        report.outcomes.push(outcome);
    }

    async fn close(&self, report: &mut SyncReport) {
        if let Err(e) = self.storage.close().await {
            warn!("failed to close {} storage: {e}", self.storage.name());
            report.close_error = Some(describe(&e));
        }
    }
}

/// Run file reads and processors on the blocking pool, off the upload workers
async fn blocking<T, F>(work: F) -> Result<T>
where
    T: Send + 'static,
    F: FnOnce() -> Result<T> + Send + 'static,
{
    tokio::task::spawn_blocking(work)
        .await
        .wrap_err("asset preparation task failed")?
}

/// Read (or combine) an asset and run the processor chain over it
fn prepare(
    combiner: &Combiner,
    chain: &ProcessorChain,
    item: &PlannedAsset,
    serve_remote: bool,
) -> Result<Option<Asset>> {
    let asset = match &item.source {
        Source::Bundle { name, sources } => match combiner.combine(name, sources)? {
            Some(combined) => {
                debug!("bundle {name}: {} of {} sources", combined.members, sources.len());
                combined.into_asset()
            }
            None => return Ok(None),
        },
        Source::File { local_path } => Asset::read(local_path, &item.remote_path)
            .wrap_err_with(|| format!("failed to read {}", local_path.display()))?,
    };
    process(chain, asset, serve_remote).map(Some)
}

fn process(chain: &ProcessorChain, asset: Asset, serve_remote: bool) -> Result<Asset> {
    let Asset {
        local_path,
        remote_path,
        content_type,
        bytes,
    } = asset;
    let bytes = chain
        .run(bytes, &content_type, &remote_path, serve_remote)
        .wrap_err_with(|| format!("failed to process {remote_path}"))?;
    Ok(Asset {
        local_path,
        remote_path,
        content_type,
        bytes,
    })
}

/// Upload one prepared asset and turn the result into an outcome
async fn put(storage: Arc<dyn Storage>, asset: Asset, force: bool) -> AssetOutcome {
    let Asset {
        local_path,
        remote_path,
        content_type,
        bytes,
    } = asset;
    let size = u64::try_from(bytes.len()).ok();

    let outcome = match storage
        .put(Bytes::from(bytes), &content_type, &remote_path, force)
        .await
    {
        Ok(true) => Outcome::Uploaded,
        Ok(false) => Outcome::SkippedUnchanged,
        Err(e) => Outcome::Failed {
            reason: describe(&e),
        },
    };

    AssetOutcome {
        remote_path,
        content_type: Some(content_type),
        local_path,
        size,
        outcome,
    }
}

/// Upload dispatcher: inline when sequential, a bounded task set otherwise
struct Uploads {
    storage: Arc<dyn Storage>,
    force: bool,
    workers: usize,
    permits: Arc<Semaphore>,
    tasks: JoinSet<AssetOutcome>,
}

impl Uploads {
    fn new(storage: Arc<dyn Storage>, workers: usize, force: bool) -> Self {
        Self {
            storage,
            force,
            workers,
            permits: Arc::new(Semaphore::new(workers)),
            tasks: JoinSet::new(),
        }
    }

    /// Start (or, when sequential, perform) an upload.
    ///
    /// Returns the outcomes that completed in the meantime.
    async fn submit(&mut self, asset: Asset) -> Vec<AssetOutcome> {
        if self.workers <= 1 {
            return vec![put(Arc::clone(&self.storage), asset, self.force).await];
        }

        let remote_path = asset.remote_path.clone();
        let permit = match Arc::clone(&self.permits).acquire_owned().await {
            Ok(permit) => permit,
            Err(e) => return vec![AssetOutcome::failed(remote_path, e.to_string())],
        };

        let upload = put(Arc::clone(&self.storage), asset, self.force);
        self.tasks.spawn(async move {
            // A panicking upload still yields an outcome for its path
            let result = tokio::spawn(upload).await;
            drop(permit);
            result.unwrap_or_else(|e| {
                AssetOutcome::failed(remote_path, format!("upload task failed: {e}"))
            })
        });

        let mut done = Vec::new();
        while let Some(joined) = self.tasks.try_join_next() {
            done.extend(finished(joined));
        }
        done
    }

    /// Wait for every outstanding upload
    async fn drain(&mut self) -> Vec<AssetOutcome> {
        let mut done = Vec::new();
        while let Some(joined) = self.tasks.join_next().await {
            done.extend(finished(joined));
        }
        done
    }
}

fn finished(joined: Result<AssetOutcome, tokio::task::JoinError>) -> Option<AssetOutcome> {
    joined
        .inspect_err(|e| warn!("upload task was lost: {e}"))
        .ok()
}
