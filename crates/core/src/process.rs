//! Processor chain: ordered transformations applied to an asset before upload
//!
//! A processor is any value implementing [`Processor`], including plain
//! closures with the signature
//! `Fn(&[u8], content_type, remote_path, serve_remote) -> Result<Option<Vec<u8>>>`.
//! Returning `None` leaves the asset untouched.

use std::fmt;
use std::io::Write as _;
use std::path::PathBuf;
use std::process::{Command, Stdio};
use std::sync::Arc;

use color_eyre::Result;
use color_eyre::eyre::{WrapErr as _, bail};
use tracing::debug;

use crate::classify::AssetKind;
use crate::config::{ConfigError, Settings};
use crate::minify::{minify_css, minify_js};

/// One step of the chain
pub trait Processor: Send + Sync {
    /// Transform `data`, or return `None` to leave it unchanged.
    ///
    /// `serve_remote` is false when assets are served locally, letting steps
    /// such as minifiers stay out of the way during development.
    fn process(
        &self,
        data: &[u8],
        content_type: &str,
        remote_path: &str,
        serve_remote: bool,
    ) -> Result<Option<Vec<u8>>>;
}

impl<F> Processor for F
where
    F: Fn(&[u8], &str, &str, bool) -> Result<Option<Vec<u8>>> + Send + Sync,
{
    fn process(
        &self,
        data: &[u8],
        content_type: &str,
        remote_path: &str,
        serve_remote: bool,
    ) -> Result<Option<Vec<u8>>> {
        self(data, content_type, remote_path, serve_remote)
    }
}

/// Ordered list of processors
#[derive(Clone, Default)]
pub struct ProcessorChain {
    steps: Vec<Arc<dyn Processor>>,
}

impl fmt::Debug for ProcessorChain {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ProcessorChain")
            .field("steps", &self.steps.len())
            .finish()
    }
}

impl ProcessorChain {
    /// Create an empty chain (assets pass through untouched)
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a step
    pub fn push(&mut self, step: impl Processor + 'static) {
        self.steps.push(Arc::new(step));
    }

    /// Append a step, builder style
    #[must_use]
    pub fn with(mut self, step: impl Processor + 'static) -> Self {
        self.push(step);
        self
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.steps.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }

    /// Resolve configured processor identifiers into a chain.
    ///
    /// Known identifiers: `css-minifier`, `js-minifier`, `yui-css`, `yui-js`,
    /// `closure-js`, `upper-case` and `command:<program> [args...]`.
    ///
    /// # Errors
    /// Returns an error for unknown identifiers, or for jar-backed steps
    /// whose jar is not configured.
    pub fn from_names<S: AsRef<str>>(names: &[S], settings: &Settings) -> Result<Self, ConfigError> {
        let mut chain = Self::new();
        for name in names {
            let name = name.as_ref().trim();
            match name {
                "css-minifier" => chain.push(css_minifier),
                "js-minifier" => chain.push(js_minifier),
                "upper-case" => chain.push(upper_case),
                "yui-css" | "yui-js" => {
                    let jar = settings.yui_compressor_path.clone().ok_or_else(|| {
                        ConfigError::ProcessorUnavailable {
                            name: name.to_string(),
                            setting: "yui_compressor_path",
                        }
                    })?;
                    let kind = if name == "yui-css" {
                        AssetKind::Css
                    } else {
                        AssetKind::Js
                    };
                    chain.push(ExternalCommand::yui_compressor(jar, kind));
                }
                "closure-js" => {
                    let jar = settings.closure_compiler_path.clone().ok_or_else(|| {
                        ConfigError::ProcessorUnavailable {
                            name: name.to_string(),
                            setting: "closure_compiler_path",
                        }
                    })?;
                    chain.push(ExternalCommand::closure_compiler(jar));
                }
                _ => {
                    let command = name
                        .strip_prefix("command:")
                        .and_then(ExternalCommand::parse)
                        .ok_or_else(|| ConfigError::UnknownProcessor(name.to_string()))?;
                    chain.push(command);
                }
            }
        }
        Ok(chain)
    }

    /// Resolve the processors named in the settings
    ///
    /// # Errors
    /// See [`ProcessorChain::from_names`].
    pub fn from_settings(settings: &Settings) -> Result<Self, ConfigError> {
        Self::from_names(&settings.processors, settings)
    }

    /// Run every step in order, each seeing the previous step's output.
    ///
    /// # Errors
    /// Returns the first error raised by a step.
    pub fn run(
        &self,
        data: Vec<u8>,
        content_type: &str,
        remote_path: &str,
        serve_remote: bool,
    ) -> Result<Vec<u8>> {
        let mut current = data;
        for step in &self.steps {
            if let Some(processed) = step.process(&current, content_type, remote_path, serve_remote)? {
                current = processed;
            }
        }
        Ok(current)
    }
}

/// Minify CSS when serving remotely
///
/// # Errors
/// Never fails; non UTF-8 stylesheets are left unchanged.
pub fn css_minifier(
    data: &[u8],
    content_type: &str,
    remote_path: &str,
    serve_remote: bool,
) -> Result<Option<Vec<u8>>> {
    if !serve_remote || AssetKind::detect(content_type, remote_path) != Some(AssetKind::Css) {
        return Ok(None);
    }
    let Ok(css) = std::str::from_utf8(data) else {
        debug!("{remote_path} is not valid UTF-8, leaving it unminified");
        return Ok(None);
    };
    Ok(Some(minify_css(css).into_bytes()))
}

/// Minify JS when serving remotely
///
/// # Errors
/// Never fails; non UTF-8 scripts are left unchanged.
pub fn js_minifier(
    data: &[u8],
    content_type: &str,
    remote_path: &str,
    serve_remote: bool,
) -> Result<Option<Vec<u8>>> {
    if !serve_remote || AssetKind::detect(content_type, remote_path) != Some(AssetKind::Js) {
        return Ok(None);
    }
    let Ok(js) = std::str::from_utf8(data) else {
        debug!("{remote_path} is not valid UTF-8, leaving it unminified");
        return Ok(None);
    };
    Ok(Some(minify_js(js).into_bytes()))
}

/// Upper-case ASCII letters, handy for checking a chain is wired up
///
/// # Errors
/// Never fails.
pub fn upper_case(
    data: &[u8],
    _content_type: &str,
    _remote_path: &str,
    _serve_remote: bool,
) -> Result<Option<Vec<u8>>> {
    Ok(Some(data.to_ascii_uppercase()))
}

/// Pipe assets through an external program, stdout replaces the asset
#[derive(Debug, Clone)]
pub struct ExternalCommand {
    program: PathBuf,
    args: Vec<String>,
    /// Only run for this kind of asset
    kind: Option<AssetKind>,
    /// Only run when serving remotely
    remote_only: bool,
}

impl ExternalCommand {
    /// Parse `program arg1 arg2` (whitespace separated, no quoting)
    #[must_use]
    pub fn parse(command: &str) -> Option<Self> {
        let mut parts = command.split_whitespace();
        let program = parts.next()?;
        Some(Self {
            program: PathBuf::from(program),
            args: parts.map(str::to_string).collect(),
            kind: None,
            remote_only: false,
        })
    }

    /// `java -jar <jar> --type css|js`
    #[must_use]
    pub fn yui_compressor(jar: PathBuf, kind: AssetKind) -> Self {
        let kind_arg = match kind {
            AssetKind::Css => "css",
            AssetKind::Js => "js",
        };
        Self {
            program: PathBuf::from("java"),
            args: vec![
                "-jar".to_string(),
                jar.to_string_lossy().into_owned(),
                "--type".to_string(),
                kind_arg.to_string(),
            ],
            kind: Some(kind),
            remote_only: true,
        }
    }

    /// `java -jar <jar> --compilation_level SIMPLE_OPTIMIZATIONS`, JS only.
    ///
    /// Runs whether or not assets are served remotely.
    #[must_use]
    pub fn closure_compiler(jar: PathBuf) -> Self {
        Self {
            program: PathBuf::from("java"),
            args: vec![
                "-jar".to_string(),
                jar.to_string_lossy().into_owned(),
                "--compilation_level".to_string(),
                "SIMPLE_OPTIMIZATIONS".to_string(),
            ],
            kind: Some(AssetKind::Js),
            remote_only: false,
        }
    }

    fn applies(&self, content_type: &str, remote_path: &str, serve_remote: bool) -> bool {
        if self.remote_only && !serve_remote {
            return false;
        }
        match self.kind {
            Some(kind) => AssetKind::detect(content_type, remote_path) == Some(kind),
            None => true,
        }
    }
}

impl Processor for ExternalCommand {
    fn process(
        &self,
        data: &[u8],
        content_type: &str,
        remote_path: &str,
        serve_remote: bool,
    ) -> Result<Option<Vec<u8>>> {
        if !self.applies(content_type, remote_path, serve_remote) {
            return Ok(None);
        }

        debug!("piping {remote_path} through {}", self.program.display());
        let mut child = Command::new(&self.program)
            .args(&self.args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .wrap_err_with(|| format!("failed to start {}", self.program.display()))?;

        // Feed stdin from a separate thread so a full stdout pipe cannot deadlock us
        let mut stdin = child
            .stdin
            .take()
            .ok_or_else(|| color_eyre::eyre::eyre!("child stdin unavailable"))?;
        let input = data.to_vec();
        let writer = std::thread::spawn(move || stdin.write_all(&input));

        let output = child.wait_with_output()?;
        writer
            .join()
            .map_err(|_| color_eyre::eyre::eyre!("stdin writer panicked"))??;

        if !output.status.success() {
            bail!(
                "{} exited with {}: {}",
                self.program.display(),
                output.status,
                String::from_utf8_lossy(&output.stderr).trim()
            );
        }
        Ok(Some(output.stdout))
    }
}
