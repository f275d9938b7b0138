//! CSS and JS minification

use std::sync::LazyLock;

use regex::Regex;

struct CssRule {
    pattern: Regex,
    replacement: &'static str,
}

/// Applied in order. Whitespace is collapsed before the punctuation rules run,
/// so each rule only ever sees single spaces.
static CSS_RULES: LazyLock<Vec<CssRule>> = LazyLock::new(|| {
    [
        (r"\r\n", "\n"),
        (r"(?s)/\*.*?\*/|\t+", ""),
        (r"\s+", " "),
        (r"\}\s+", "}\n"),
        (r";\s+", ";"),
        (r"\s*\{\s*", "{"),
        (r"\s+\}", "}"),
        (r":\s+", ":"),
        (r",\s+", ","),
    ]
    .into_iter()
    .map(|(pattern, replacement)| CssRule {
        pattern: Regex::new(pattern).expect("valid css rule"),
        replacement,
    })
    .collect()
});

/// Minify a stylesheet.
///
/// Comments and tabs are removed, whitespace runs collapse to a single space,
/// and each closing brace followed by whitespace ends its line.
#[must_use]
pub fn minify_css(css: &str) -> String {
    let mut css = css.trim().to_string();
    for rule in CSS_RULES.iter() {
        css = rule.pattern.replace_all(&css, rule.replacement).into_owned();
    }
    css.trim().to_string()
}

/// Minify a script, comment and whitespace stripping is left to `minifier`
#[must_use]
pub fn minify_js(js: &str) -> String {
    minifier::js::minify(js).to_string()
}
