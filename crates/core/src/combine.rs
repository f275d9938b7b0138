//! Joined bundles: several CSS or JS sources concatenated into one asset

use std::path::{Path, PathBuf};

use color_eyre::Result;
use color_eyre::eyre::WrapErr as _;
use tracing::{debug, warn};

use crate::asset::{Asset, join_remote_path};
use crate::classify::AssetKind;
use crate::config::Settings;

impl AssetKind {
    /// Text appended after every bundle member.
    ///
    /// JS gets a `;` so a member without a trailing semicolon cannot merge
    /// with the next one.
    #[must_use]
    pub fn separator(self) -> &'static [u8] {
        match self {
            Self::Css => b"\n",
            Self::Js => b";\n",
        }
    }
}

/// Output of [`Combiner::combine`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Combined {
    /// Bundle name as configured, without surrounding slashes
    pub name: String,
    /// Directory the sources were read from (may be empty)
    pub subdirectory: String,
    pub kind: AssetKind,
    pub bytes: Vec<u8>,
    /// Number of sources that were actually found
    pub members: usize,
}

impl Combined {
    /// Remote path of the bundle, `[subdirectory/]name`
    #[must_use]
    pub fn remote_path(&self) -> String {
        join_remote_path([self.subdirectory.as_str(), self.name.as_str()])
    }

    /// Turn the bundle into an uploadable asset
    #[must_use]
    pub fn into_asset(self) -> Asset {
        let remote_path = self.remote_path();
        Asset::from_bytes(&remote_path, self.bytes)
    }
}

/// Concatenates bundle sources found below a media root
#[derive(Debug, Clone)]
pub struct Combiner {
    root: PathBuf,
    css_dir: String,
    js_dir: String,
}

impl Combiner {
    #[must_use]
    pub fn new(root: impl Into<PathBuf>, css_dir: &str, js_dir: &str) -> Self {
        Self {
            root: root.into(),
            css_dir: css_dir.trim_matches('/').to_string(),
            js_dir: js_dir.trim_matches('/').to_string(),
        }
    }

    #[must_use]
    pub fn from_settings(settings: &Settings) -> Self {
        Self::new(&settings.media_root, settings.css_dir(), settings.js_dir())
    }

    #[must_use]
    pub fn root(&self) -> &Path {
        &self.root
    }

    fn subdirectory(&self, kind: AssetKind) -> &str {
        match kind {
            AssetKind::Css => &self.css_dir,
            AssetKind::Js => &self.js_dir,
        }
    }

    /// Remote path the bundle `name` is uploaded to, `None` if it is not css or js
    #[must_use]
    pub fn bundle_path(&self, name: &str) -> Option<String> {
        let name = name.trim_matches('/');
        let kind = AssetKind::from_name(name)?;
        Some(join_remote_path([self.subdirectory(kind), name]))
    }

    /// Concatenate `sources` in order into the bundle `name`.
    ///
    /// Returns `None` for bundles that are neither `.css` nor `.js`. Sources
    /// that are not regular files are skipped with a warning, and a bundle
    /// left without any member gets one more.
    ///
    /// # Errors
    /// Returns an error if an existing source cannot be read.
    pub fn combine<S: AsRef<str>>(&self, name: &str, sources: &[S]) -> Result<Option<Combined>> {
        let name = name.trim_matches('/');
        let Some(kind) = AssetKind::from_name(name) else {
            debug!("bundle {name} is not css or js, bypassing");
            return Ok(None);
        };

        let subdirectory = self.subdirectory(kind);
        let dir = self.root.join(subdirectory);
        let separator = kind.separator();

        let mut bytes = Vec::new();
        let mut members = 0;
        for source in sources {
            let source = source.as_ref();
            let path = dir.join(source);
            if !path.is_file() {
                warn!("bundle {name}: source {} not found, skipping", path.display());
                continue;
            }

            let data = std::fs::read(&path)
                .wrap_err_with(|| format!("failed to read bundle source {}", path.display()))?;
            bytes.extend_from_slice(&data);
            bytes.extend_from_slice(separator);
            members += 1;
        }

        if members == 0 && !sources.is_empty() {
            warn!(
                "bundle {name}: none of its {} sources exist, it will be empty",
                sources.len()
            );
        }

        Ok(Some(Combined {
            name: name.to_string(),
            subdirectory: subdirectory.to_string(),
            kind,
            bytes,
            members,
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    #[test]
    fn test_non_css_js_bundles_are_bypassed() {
        let dir = TempDir::new().unwrap();
        fs::write(dir.path().join("a.txt"), "a").unwrap();

        let combiner = Combiner::new(dir.path(), "", "");
        assert!(combiner.combine("app.txt", &["a.txt"]).unwrap().is_none());
    }

    #[test]
    fn test_css_members_are_newline_separated() {
        let dir = TempDir::new().unwrap();
        fs::write(dir.path().join("a.css"), "a{}").unwrap();
        fs::write(dir.path().join("b.css"), "b{}").unwrap();

        let combiner = Combiner::new(dir.path(), "", "");
        let combined = combiner
            .combine("app.css", &["a.css", "b.css"])
            .unwrap()
            .unwrap();
        assert_eq!(combined.bytes, b"a{}\nb{}\n");
        assert_eq!(combined.remote_path(), "app.css");
        assert_eq!(combined.members, 2);
    }

    #[test]
    fn test_js_members_are_semicolon_separated() {
        let dir = TempDir::new().unwrap();
        fs::create_dir(dir.path().join("js")).unwrap();
        fs::write(dir.path().join("js/1.js"), "var a = 1").unwrap();
        fs::write(dir.path().join("js/2.js"), "var b = 2").unwrap();

        let combiner = Combiner::new(dir.path(), "", "/js/");
        let combined = combiner
            .combine("joined.js", &["1.js", "2.js"])
            .unwrap()
            .unwrap();
        assert_eq!(combined.bytes, b"var a = 1;\nvar b = 2;\n");
        assert_eq!(combined.subdirectory, "js");
        assert_eq!(combined.remote_path(), "js/joined.js");
    }

    #[test]
    fn test_joined_css_scenario() {
        let dir = TempDir::new().unwrap();
        fs::create_dir(dir.path().join("css")).unwrap();
        fs::write(dir.path().join("css/1.css"), "a{color:red}").unwrap();
        fs::write(dir.path().join("css/2.css"), "b{color:blue}").unwrap();

        let combiner = Combiner::new(dir.path(), "css", "js");
        let asset = combiner
            .combine("joined.css", &["1.css", "2.css"])
            .unwrap()
            .unwrap()
            .into_asset();

        assert_eq!(asset.bytes, b"a{color:red}\nb{color:blue}\n");
        assert_eq!(asset.content_type, "text/css");
        assert_eq!(asset.remote_path, "css/joined.css");
        assert!(asset.local_path.is_none());
    }

    #[test]
    fn test_order_follows_source_list() {
        let dir = TempDir::new().unwrap();
        fs::write(dir.path().join("a.css"), "a").unwrap();
        fs::write(dir.path().join("b.css"), "b").unwrap();

        let combiner = Combiner::new(dir.path(), "", "");
        let forward = combiner.combine("x.css", &["a.css", "b.css"]).unwrap().unwrap();
        let reverse = combiner.combine("x.css", &["b.css", "a.css"]).unwrap().unwrap();
        assert_eq!(forward.bytes, b"a\nb\n");
        assert_eq!(reverse.bytes, b"b\na\n");
    }

    #[test]
    fn test_missing_sources_are_skipped() {
        let dir = TempDir::new().unwrap();
        fs::write(dir.path().join("a.css"), "a").unwrap();
        fs::create_dir(dir.path().join("dir.css")).unwrap();

        let combiner = Combiner::new(dir.path(), "", "");
        let combined = combiner
            .combine("x.css", &["missing.css", "a.css", "dir.css"])
            .unwrap()
            .unwrap();
        assert_eq!(combined.bytes, b"a\n");
        assert_eq!(combined.members, 1);
    }

    #[test]
    fn test_bundle_without_members_is_empty() {
        let dir = TempDir::new().unwrap();

        let combiner = Combiner::new(dir.path(), "", "");
        let combined = combiner
            .combine("x.js", &["typo.js", "gone.js"])
            .unwrap()
            .unwrap();
        assert!(combined.bytes.is_empty());
        assert_eq!(combined.members, 0);
    }

    #[test]
    fn test_bundle_path() {
        let combiner = Combiner::new("/srv/static", "/css/", "js");
        assert_eq!(combiner.bundle_path("joined.css").as_deref(), Some("css/joined.css"));
        assert_eq!(combiner.bundle_path("/app.js").as_deref(), Some("js/app.js"));
        assert_eq!(combiner.bundle_path("notes.txt"), None);
    }
}
