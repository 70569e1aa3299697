use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::collections::BTreeMap;

use super::protocol::FilterRule;

/// Per-profile configuration stored in `config.json`.
///
/// Every field has a default, so a partial file merges over the defaults.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "kebab-case", default)]
pub struct ProfileConfig {
    pub web_view_settings: BTreeMap<String, Value>,
    pub adblock: BTreeMap<String, FilterRule>,
    pub media_filters: BTreeMap<String, FilterRule>,
    /// Named remote filter lists: `(source url, active)`.
    pub content_filters: BTreeMap<String, FilterRule>,
    pub content_filter_whitelist: BTreeMap<String, FilterRule>,
    pub search: BTreeMap<String, String>,
    pub default_search: String,
    pub user_agents: BTreeMap<String, String>,
    pub default_user_agent: String,
    pub find_str: String,
    pub clear_on_exit: bool,
    pub hide_address_bar: bool,
    pub home_uri: String,
}

impl Default for ProfileConfig {
    fn default() -> Self {
        Self {
            web_view_settings: Self::default_web_view_settings(),
            adblock: rules(&[
                ("/ads/", r"\/ads\/"),
                ("doubleclick", r"doubleclick\.net"),
                ("pubads", r"pubads\."),
            ]),
            media_filters: rules(&[("soundcloud mp3s", r"\.mp3\?")]),
            content_filters: rules(&[(
                "easylist",
                "https://easylist.to/easylist/easylist.txt",
            )]),
            content_filter_whitelist: BTreeMap::new(),
            search: BTreeMap::from([(
                "StartPage".to_string(),
                DEFAULT_SEARCH_URL.to_string(),
            )]),
            default_search: "StartPage".to_string(),
            user_agents: BTreeMap::from([(
                "Chromium".to_string(),
                "Mozilla/5.0 (X11; Linux x86_64) AppleWebKit/537.36 \
                 (KHTML, like Gecko) Chrome/49.0.2623.110 Safari/537.36"
                    .to_string(),
            )]),
            default_user_agent: "Chromium".to_string(),
            find_str: String::new(),
            clear_on_exit: true,
            hide_address_bar: false,
            home_uri: "https://www.startpage.com".to_string(),
        }
    }
}

/// Search template used when the configured one is missing or has no `%s`.
pub const DEFAULT_SEARCH_URL: &str = "https://startpage.com/do/search?query=%s";

impl ProfileConfig {
    /// Engine settings applied to every new view.
    pub fn default_web_view_settings() -> BTreeMap<String, Value> {
        let defaults = json!({
            "enable-page-cache": false,
            "enable-dns-prefetching": false,
            "enable-html5-database": false,
            "enable-html5-local-storage": false,
            "enable-offline-web-application-cache": false,
            "enable-hyperlink-auditing": true,
            "enable-media-stream": false,
            "enable-java": false,
            "enable-plugins": false,
            "enable-mediasource": true,
            "enable-javascript": true,
            "enable-javascript-markup": true,
            "enable-webaudio": true,
            "enable-webgl": true,
            "enable-accelerated-2d-canvas": true,
            "enable-developer-extras": true,
            "allow-file-access-from-file-urls": false,
            "allow-modal-dialogs": false,
            "auto-load-images": true,
            "enable-caret-browsing": false,
            "enable-fullscreen": true,
            "enable-resizable-text-areas": true,
            "enable-site-specific-quirks": true,
            "enable-smooth-scrolling": false,
            "enable-spatial-navigation": false,
            "enable-tabs-to-links": true,
            "enable-write-console-messages-to-stdout": false,
            "enable-xss-auditor": true,
            "javascript-can-access-clipboard": false,
            "javascript-can-open-windows-automatically": false,
            "media-playback-requires-user-gesture": false,
            "print-backgrounds": true,
            "zoom-text-only": false,
            "default-font-family": "sans-serif",
            "default-font-size": 16,
            "serif-font-family": "Serif 10",
            "sans-serif-font-family": "Sans 10",
            "monospace-font-family": "Monospace 10",
            "enable-media": true,
        });
        match defaults {
            Value::Object(map) => map.into_iter().collect(),
            _ => BTreeMap::new(),
        }
    }

    /// The search template selected by `default-search`.
    pub fn search_url(&self) -> &str {
        self.search
            .get(&self.default_search)
            .map(String::as_str)
            .filter(|url| url.contains("%s"))
            .unwrap_or(DEFAULT_SEARCH_URL)
    }

    /// The user agent selected by `default-user-agent`, or empty for the
    /// engine default.
    pub fn user_agent(&self) -> &str {
        self.user_agents
            .get(&self.default_user_agent)
            .map(String::as_str)
            .unwrap_or("")
    }

    /// Names of the content filter lists that are switched on.
    pub fn active_content_filters(&self) -> Vec<String> {
        self.content_filters
            .iter()
            .filter(|(_, rule)| rule.active())
            .map(|(name, _)| name.clone())
            .collect()
    }
}

fn rules(entries: &[(&str, &str)]) -> BTreeMap<String, FilterRule> {
    entries
        .iter()
        .map(|(name, pattern)| (name.to_string(), FilterRule(pattern.to_string(), true)))
        .collect()
}
