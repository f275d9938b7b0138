//! assetsync-sync: the sync orchestrator
//!
//! Drives one pass: plan the assets, open the storage session, upload bundles
//! and then the media tree, and always close the session again.

pub mod observer;
pub mod outcome;
pub mod plan;
pub mod syncer;

pub use observer::{NoopObserver, SyncObserver, TracingObserver};
pub use outcome::{AssetOutcome, Outcome, SyncReport};
pub use plan::{PlannedAsset, Source};
pub use syncer::{SyncPhase, Syncer};
