//! assetsync-core: asset pipeline primitives
//!
//! Provides tree walking, bundling, content classification, the processor
//! chain, checksums and gzip companions used by the sync orchestrator.

pub mod asset;
pub mod checksum;
pub mod classify;
pub mod combine;
pub mod compress;
pub mod config;
pub mod minify;
pub mod process;
pub mod walk;

pub use asset::{Asset, join_remote_path};
pub use checksum::Checksum;
pub use classify::{AssetKind, classify};
pub use combine::{Combined, Combiner};
pub use compress::Compressed;
pub use config::{ConfigError, Settings};
pub use process::{Processor, ProcessorChain};
pub use walk::Walker;
