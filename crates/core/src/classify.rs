//! Content type detection and the type predicates used by bundling,
//! processing and compression

use std::path::Path;

/// Content type used when the extension is unknown
pub const DEFAULT_CONTENT_TYPE: &str = "application/octet-stream";

pub const JS_TYPES: &[&str] = &[
    "application/javascript",
    "application/x-javascript",
    "text/javascript",
];

pub const CSS_TYPES: &[&str] = &["text/css"];

/// Non-script types worth gzipping
const TEXT_TYPES: &[&str] = &[
    "application/json",
    "application/xml",
    "text/html",
    "text/plain",
    "text/xml",
];

/// Asset kinds that get special treatment (bundling, minification)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AssetKind {
    Css,
    Js,
}

impl AssetKind {
    /// Kind implied by a file name's extension (`.css` / `.js`)
    #[must_use]
    pub fn from_name(name: &str) -> Option<Self> {
        if name.ends_with(".css") {
            Some(Self::Css)
        } else if name.ends_with(".js") {
            Some(Self::Js)
        } else {
            None
        }
    }

    /// Kind of an asset from its content type, falling back to the remote path
    #[must_use]
    pub fn detect(content_type: &str, remote_path: &str) -> Option<Self> {
        if is_css(content_type) {
            Some(Self::Css)
        } else if is_js(content_type) {
            Some(Self::Js)
        } else {
            Self::from_name(&remote_path.to_ascii_lowercase())
        }
    }
}

/// Guess the content type of a path from its extension
#[must_use]
pub fn classify(path: impl AsRef<Path>) -> String {
    mime_guess::from_path(path)
        .first_raw()
        .unwrap_or(DEFAULT_CONTENT_TYPE)
        .to_string()
}

/// Strip parameters (`; charset=...`) from a content type
fn essence(content_type: &str) -> &str {
    content_type
        .split(';')
        .next()
        .unwrap_or(content_type)
        .trim()
}

#[must_use]
pub fn is_css(content_type: &str) -> bool {
    CSS_TYPES.contains(&essence(content_type))
}

#[must_use]
pub fn is_js(content_type: &str) -> bool {
    JS_TYPES.contains(&essence(content_type))
}

/// Whether a content type is on the gzip allow-list
#[must_use]
pub fn is_compressible(content_type: &str) -> bool {
    let essence = essence(content_type);
    TEXT_TYPES.contains(&essence) || is_css(essence) || is_js(essence)
}
