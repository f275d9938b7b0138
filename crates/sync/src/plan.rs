//! What a pass will look at, before anything is read or uploaded

use std::collections::BTreeSet;
use std::path::PathBuf;

use assetsync_core::config::Settings;
use assetsync_core::{Combiner, Walker, classify, join_remote_path};
use serde::Serialize;
use tracing::debug;

/// Where an asset's bytes come from
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "source", rename_all = "kebab-case")]
pub enum Source {
    /// A joined bundle, assembled from `sources` at upload time
    Bundle { name: String, sources: Vec<String> },
    File { local_path: PathBuf },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PlannedAsset {
    pub remote_path: String,
    pub content_type: String,
    #[serde(flatten)]
    pub source: Source,
}

impl PlannedAsset {
    #[must_use]
    pub fn is_bundle(&self) -> bool {
        matches!(self.source, Source::Bundle { .. })
    }
}

/// Bundles first (in name order), then every syncable file below each
/// syncable top-level directory of the media root.
///
/// Files directly in the media root are not synced. A tree file whose remote
/// path matches a bundle output is left to the bundle.
#[must_use]
pub fn plan(settings: &Settings, combiner: &Combiner) -> Vec<PlannedAsset> {
    let mut planned = Vec::new();
    let mut seen = BTreeSet::new();

    for (name, sources) in &settings.joined {
        // Only css/js bundles produce output; other names leave the tree alone
        let remote_path = match combiner.bundle_path(name) {
            Some(path) => {
                seen.insert(path.clone());
                path
            }
            None => join_remote_path([name.as_str()]),
        };
        planned.push(PlannedAsset {
            content_type: classify(&remote_path),
            remote_path,
            source: Source::Bundle {
                name: name.clone(),
                sources: sources.clone(),
            },
        });
    }

    let root = &settings.media_root;
    for dir in Walker::new(root).top_level_dirs() {
        let dir_path = root.join(&dir);
        for relative in Walker::new(&dir_path).iter() {
            let remote_path = join_remote_path([dir.as_str(), relative.as_str()]);
            if !seen.insert(remote_path.clone()) {
                debug!("{remote_path} is produced by a bundle, not syncing the file");
                continue;
            }
            planned.push(PlannedAsset {
                content_type: classify(&remote_path),
                remote_path,
                source: Source::File {
                    local_path: dir_path.join(&relative),
                },
            });
        }
    }

    planned
}
