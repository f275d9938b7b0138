//! assetsync configuration file parsing (assetsync.toml)

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

/// Config file name
pub const CONFIG_FILE: &str = "assetsync.toml";

/// Default cache window for uploaded objects
pub const DEFAULT_EXPIRATION_DAYS: u32 = 365;

/// Errors that make a sync run impossible before any I/O happens
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("no storage backend configured, set `backend` in {CONFIG_FILE}")]
    MissingBackend,

    #[error("`{0}` is not a valid storage backend (expected s3, cloudfiles, local or dummy)")]
    UnknownBackend(String),

    #[error("missing required setting `{0}`")]
    MissingSetting(&'static str),

    #[error("`{0}` and `{1}` must be set together")]
    IncompleteCredentials(&'static str, &'static str),

    #[error("unknown processor `{0}`")]
    UnknownProcessor(String),

    #[error("processor `{name}` requires `{setting}` to be set")]
    ProcessorUnavailable { name: String, setting: &'static str },

    #[error("failed to read {}", path.display())]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse {}", path.display())]
    Parse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },
}

/// assetsync project configuration
#[derive(Debug, Clone, serde::Deserialize)]
#[serde(default)]
pub struct Settings {
    /// Storage backend identifier (s3, cloudfiles, local, dummy)
    pub backend: String,

    /// Local directory holding the assets to sync
    pub media_root: PathBuf,

    /// Base URL used when assets are served locally
    pub media_url: String,

    /// Whether assets are served from the storage backend
    pub serve_remote: bool,

    /// Cache window for `Expires` and `Cache-Control`
    pub expiration_days: u32,

    /// Subdirectory that joined CSS bundles are assembled from
    pub css_path: String,

    /// Subdirectory that joined JS bundles are assembled from
    pub js_path: String,

    /// Joined bundles: output name -> ordered source names
    pub joined: BTreeMap<String, Vec<String>>,

    /// Ordered processor identifiers
    pub processors: Vec<String>,

    /// Number of concurrent uploads (1 = sequential)
    pub workers: usize,

    /// Path to the YUI compressor jar, enables the `yui-*` processors
    pub yui_compressor_path: Option<PathBuf>,

    /// Path to the Closure Compiler jar, enables the `closure-js` processor
    pub closure_compiler_path: Option<PathBuf>,

    pub s3: S3Settings,
    pub cloudfiles: CloudFilesSettings,
    pub local: LocalSettings,
    pub dummy: DummySettings,
}

/// `[s3]` section
#[derive(Debug, Clone, Default, serde::Deserialize)]
#[serde(default)]
pub struct S3Settings {
    pub bucket: Option<String>,
    /// Key prefix prepended to every remote path
    pub prefix: String,
    /// Serve from `http(s)://<bucket>` instead of the S3 host
    pub bucket_cname: bool,
    pub key: Option<String>,
    pub secret: Option<String>,
    pub region: Option<String>,
    /// Custom endpoint for S3-compatible services (MinIO, LocalStack)
    pub endpoint: Option<String>,
}

/// `[cloudfiles]` section
#[derive(Debug, Clone, Default, serde::Deserialize)]
#[serde(default)]
pub struct CloudFilesSettings {
    pub container: Option<String>,
    pub username: Option<String>,
    pub api_key: Option<String>,
    /// Authentication endpoint (defaults to the Rackspace v1.0 endpoint)
    pub auth_url: Option<String>,
}

/// `[local]` section
#[derive(Debug, Clone, Default, serde::Deserialize)]
#[serde(default)]
pub struct LocalSettings {
    pub path: Option<PathBuf>,
    pub base_url: Option<String>,
}

/// `[dummy]` section
#[derive(Debug, Clone, serde::Deserialize)]
#[serde(default)]
pub struct DummySettings {
    pub base_url: String,
}

impl Default for DummySettings {
    fn default() -> Self {
        Self {
            base_url: "dummy://media".to_string(),
        }
    }
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            backend: String::new(),
            media_root: PathBuf::from("static"),
            media_url: "/media/".to_string(),
            serve_remote: true,
            expiration_days: DEFAULT_EXPIRATION_DAYS,
            css_path: String::new(),
            js_path: String::new(),
            joined: BTreeMap::new(),
            processors: vec!["css-minifier".to_string(), "js-minifier".to_string()],
            workers: 1,
            yui_compressor_path: None,
            closure_compiler_path: None,
            s3: S3Settings::default(),
            cloudfiles: CloudFilesSettings::default(),
            local: LocalSettings::default(),
            dummy: DummySettings::default(),
        }
    }
}

impl Settings {
    /// Load config from project root.
    ///
    /// Returns default settings if assetsync.toml doesn't exist.
    ///
    /// # Errors
    /// Returns an error if the file exists but cannot be read or parsed.
    pub fn load(root: &Path) -> Result<Self, ConfigError> {
        Self::load_file(&root.join(CONFIG_FILE))
    }

    /// Load config from an explicit file path.
    ///
    /// Relative `media_root` and `local.path` values are resolved against the
    /// directory containing the file.
    ///
    /// # Errors
    /// Returns an error if the file exists but cannot be read or parsed.
    pub fn load_file(path: &Path) -> Result<Self, ConfigError> {
        let base = path.parent().unwrap_or(Path::new("."));
        if !path.exists() {
            let mut settings = Self::default();
            settings.media_root = base.join(&settings.media_root);
            return Ok(settings);
        }

        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        let mut settings: Self = toml::from_str(&content).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })?;

        if settings.media_root.is_relative() {
            settings.media_root = base.join(&settings.media_root);
        }
        if let Some(local) = settings.local.path.as_mut() {
            if local.is_relative() {
                *local = base.join(&*local);
            }
        }

        Ok(settings)
    }

    /// CSS bundle subdirectory without surrounding slashes
    #[must_use]
    pub fn css_dir(&self) -> &str {
        self.css_path.trim_matches('/')
    }

    /// JS bundle subdirectory without surrounding slashes
    #[must_use]
    pub fn js_dir(&self) -> &str {
        self.js_path.trim_matches('/')
    }

    /// Cache window in seconds
    #[must_use]
    pub fn expiration_secs(&self) -> u64 {
        u64::from(self.expiration_days) * 24 * 3600
    }

    /// Check the settings that every run depends on.
    ///
    /// Backend specific settings are validated when the backend is built.
    ///
    /// # Errors
    /// Returns an error if no backend is configured.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.backend.trim().is_empty() {
            return Err(ConfigError::MissingBackend);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_full_config() {
        let toml = r#"
backend = "s3"
media_root = "/srv/static"
serve_remote = true
expiration_days = 30
css_path = "/styles/"
js_path = "scripts"
processors = ["css-minifier"]
workers = 4

[joined]
"app.css" = ["reset.css", "site.css"]
"app.js" = ["jquery.js", "site.js"]

[s3]
bucket = "media.example.com"
prefix = "v2"
bucket_cname = true
"#;

        let settings: Settings = toml::from_str(toml).unwrap();
        assert_eq!(settings.backend, "s3");
        assert_eq!(settings.media_root, PathBuf::from("/srv/static"));
        assert_eq!(settings.expiration_days, 30);
        assert_eq!(settings.expiration_secs(), 30 * 86_400);
        assert_eq!(settings.css_dir(), "styles");
        assert_eq!(settings.js_dir(), "scripts");
        assert_eq!(settings.processors, vec!["css-minifier"]);
        assert_eq!(settings.workers, 4);
        assert_eq!(
            settings.joined["app.css"],
            vec!["reset.css".to_string(), "site.css".to_string()]
        );
        assert_eq!(settings.s3.bucket.as_deref(), Some("media.example.com"));
        assert_eq!(settings.s3.prefix, "v2");
        assert!(settings.s3.bucket_cname);
    }

    #[test]
    fn test_parse_empty_config() {
        let settings: Settings = toml::from_str("").unwrap();
        assert!(settings.backend.is_empty());
        assert_eq!(settings.expiration_days, DEFAULT_EXPIRATION_DAYS);
        assert_eq!(settings.processors, vec!["css-minifier", "js-minifier"]);
        assert_eq!(settings.workers, 1);
        assert_eq!(settings.dummy.base_url, "dummy://media");
        assert!(settings.joined.is_empty());
    }

    #[test]
    fn test_validate_requires_backend() {
        let settings = Settings::default();
        assert!(matches!(
            settings.validate(),
            Err(ConfigError::MissingBackend)
        ));

        let settings = Settings {
            backend: "dummy".to_string(),
            ..Settings::default()
        };
        assert!(settings.validate().is_ok());
    }

    #[test]
    fn test_load_resolves_relative_media_root() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(
            dir.path().join(CONFIG_FILE),
            "backend = \"local\"\nmedia_root = \"assets\"\n\n[local]\npath = \"out\"\n",
        )
        .unwrap();

        let settings = Settings::load(dir.path()).unwrap();
        assert_eq!(settings.media_root, dir.path().join("assets"));
        assert_eq!(settings.local.path, Some(dir.path().join("out")));
    }

    #[test]
    fn test_load_missing_file_uses_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let settings = Settings::load(dir.path()).unwrap();
        assert!(settings.backend.is_empty());
        assert_eq!(settings.media_root, dir.path().join("static"));
    }

    #[test]
    fn test_load_invalid_toml_is_config_error() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join(CONFIG_FILE), "backend = [").unwrap();

        let err = Settings::load(dir.path()).unwrap_err();
        assert!(matches!(err, ConfigError::Parse { .. }));
    }
}
