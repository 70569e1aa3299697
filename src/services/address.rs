//! Address bar input resolution.
//!
//! Decides whether typed text is literal HTML, an address, or a search, and
//! turns it into something the render engine can load.

use url::Url;

use crate::types::settings::DEFAULT_SEARCH_URL;

/// Prefixes that mark text as an address outright.
const URI_PREFIXES: &[&str] = &[
    "http://",
    "https://",
    "ftp://",
    "file://",
    "mailto:",
    "javascript:",
    "about:",
    "data:",
];

/// What the renderer should do with a piece of address bar input.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LoadTarget {
    /// Leave the view as it is (`about:blank`).
    Nothing,
    /// Render the text directly as HTML.
    Html(String),
    /// Navigate to the address.
    Uri(String),
}

/// True if `text` already names an address rather than search terms.
pub fn looks_like_uri(text: &str) -> bool {
    if URI_PREFIXES.iter().any(|prefix| text.starts_with(prefix)) {
        return true;
    }
    !(text.is_empty() || text.contains(char::is_whitespace) || !text.contains('.'))
}

/// True if `text` starts with a scheme this browser understands.
pub fn has_scheme(text: &str) -> bool {
    URI_PREFIXES.iter().any(|prefix| text.starts_with(prefix))
}

/// Substitute URL-escaped `terms` into a search template.
pub fn search_uri(terms: &str, search_url: &str) -> String {
    let template = if search_url.contains("%s") {
        search_url
    } else {
        DEFAULT_SEARCH_URL
    };
    let escaped: String = url::form_urlencoded::byte_serialize(terms.as_bytes()).collect();
    template.replace("%s", &escaped)
}

/// Resolve address bar input.
pub fn resolve_input(input: &str, search_url: &str) -> LoadTarget {
    if input.contains('\n') {
        return LoadTarget::Html(input.to_string());
    }

    let text = input.trim();
    if text.is_empty() || text == "about:blank" {
        return LoadTarget::Nothing;
    }

    let mut uri = if looks_like_uri(text) {
        text.to_string()
    } else {
        search_uri(text, search_url)
    };

    if !has_scheme(&uri) {
        uri = format!("https://{}", uri);
    }

    LoadTarget::Uri(uri)
}

/// Lower-cased host of an absolute address.
pub fn host_of(uri: &str) -> Option<String> {
    Url::parse(uri)
        .ok()
        .and_then(|url| url.host_str().map(str::to_lowercase))
}

/// Scheme of an absolute address.
pub fn scheme_of(uri: &str) -> Option<String> {
    Url::parse(uri).ok().map(|url| url.scheme().to_string())
}

/// True if going from `from` to `to` drops `https` for `http`.
pub fn is_downgrade(from: &str, to: &str) -> bool {
    from.starts_with("https://") && to.starts_with("http://")
}
