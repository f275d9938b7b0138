//! Asset tree walking via the `ignore` crate
//!
//! Hidden (`.`) and private (`_`) entries are never synced. Directories are
//! pruned before descent, so their subtrees are never read.

use std::path::{Path, PathBuf};

use ignore::{DirEntry, WalkBuilder};
use tracing::warn;

/// Whether a file or directory base name is eligible for syncing
#[must_use]
pub fn is_syncable_name(name: &str) -> bool {
    !name.starts_with('.') && !name.starts_with('_')
}

/// Walker over the syncable files below a root directory
#[derive(Debug, Clone)]
pub struct Walker {
    root: PathBuf,
}

impl Walker {
    /// Create a new walker for the given root directory
    #[must_use]
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    #[must_use]
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Create a configured walk builder
    fn walk_builder(&self) -> WalkBuilder {
        let mut builder = WalkBuilder::new(&self.root);
        builder
            .standard_filters(false) // visibility is decided by name only
            .follow_links(false)
            .sort_by_file_name(|a, b| a.cmp(b))
            .filter_entry(keep_entry);
        builder
    }

    /// Lazily enumerate syncable files as root-relative, slash-separated paths.
    ///
    /// Every call starts a fresh walk. A missing root yields nothing.
    #[must_use]
    pub fn iter(&self) -> Paths {
        let inner = self.root.is_dir().then(|| self.walk_builder().build());
        Paths {
            root: self.root.clone(),
            inner,
        }
    }

    /// Syncable directories directly below the root, sorted by name
    #[must_use]
    pub fn top_level_dirs(&self) -> Vec<String> {
        let Ok(entries) = std::fs::read_dir(&self.root) else {
            return Vec::new();
        };

        let mut dirs: Vec<String> = entries
            .filter_map(Result::ok)
            .filter(|entry| entry.path().is_dir())
            .filter_map(|entry| entry.file_name().into_string().ok())
            .filter(|name| is_syncable_name(name))
            .collect();
        dirs.sort();
        dirs
    }
}

/// Prune hidden and private entries, never the root itself
fn keep_entry(entry: &DirEntry) -> bool {
    entry.depth() == 0 || is_syncable_name(&entry.file_name().to_string_lossy())
}

/// Iterator returned by [`Walker::iter`]
pub struct Paths {
    root: PathBuf,
    inner: Option<ignore::Walk>,
}

impl Iterator for Paths {
    type Item = String;

    fn next(&mut self) -> Option<Self::Item> {
        let walk = self.inner.as_mut()?;
        loop {
            let entry = match walk.next()? {
                Ok(entry) => entry,
                Err(err) => {
                    warn!("skipping unreadable entry under {}: {err}", self.root.display());
                    continue;
                }
            };

            // Skip directories, only yield files
            if !entry.path().is_file() {
                continue;
            }

            if let Some(relative) = relative_path(&self.root, entry.path()) {
                return Some(relative);
            }
        }
    }
}

/// Root-relative path with forward slashes
fn relative_path(root: &Path, path: &Path) -> Option<String> {
    let relative = path.strip_prefix(root).ok()?;
    let parts: Vec<_> = relative
        .components()
        .map(|c| c.as_os_str().to_string_lossy())
        .collect();
    if parts.is_empty() {
        return None;
    }
    Some(parts.join("/"))
}
