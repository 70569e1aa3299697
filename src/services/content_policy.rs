//! Content policy for renderer views.
//!
//! Decides what happens to navigations, responses and sub-resources:
//! adblock and media pattern tables (regular expressions keyed by name),
//! compiled Adblock-Plus content filter lists, popup blocking, the
//! middle/ctrl-click new-tab gesture and private-mode downgrade protection.

use std::collections::BTreeMap;
use std::fs;
use std::path::Path;

use log::{debug, info, warn};
use regex::Regex;

use crate::services::address::{host_of, is_downgrade};
use crate::services::render_engine::{NavigationAction, ResponseInfo};
use crate::types::errors::FilterError;
use crate::types::protocol::FilterRule;

/// Outcome for a navigation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NavigationVerdict {
    Allow,
    Block,
    /// Ignore the navigation here and open it in a new tab instead.
    OpenInNewTab {
        /// Create the tab inside this renderer process.
        same_process: bool,
        /// `Some(false)` asks for a non-private tab.
        private: Option<bool>,
    },
}

/// Outcome for a response.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResponseVerdict {
    Allow,
    Block,
    /// Cancel rendering and hand the response to the download sink.
    Download,
}

/// What a starting sub-resource load means for the page.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ResourceVerdict {
    /// Matched a media filter: report a passive download.
    pub media: bool,
    /// Plain http resource on an https page.
    pub insecure: bool,
}

struct FilterEntry {
    pattern: String,
    regex: Regex,
    active: bool,
}

/// Named regular-expression filters that can be toggled one by one.
#[derive(Default)]
pub struct FilterTable {
    entries: BTreeMap<String, FilterEntry>,
}

impl FilterTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a table, skipping (and logging) invalid patterns.
    pub fn from_rules(rules: &BTreeMap<String, FilterRule>) -> Self {
        let mut table = Self::new();
        for (name, rule) in rules {
            if let Err(e) = table.set(name, rule.pattern(), rule.active()) {
                warn!("Skipping filter {}: {}", name, e);
            }
        }
        table
    }

    /// Add or replace a filter.
    pub fn set(&mut self, name: &str, pattern: &str, active: bool) -> Result<(), FilterError> {
        let regex = Regex::new(pattern).map_err(|e| FilterError::InvalidPattern(e.to_string()))?;
        self.entries.insert(
            name.to_string(),
            FilterEntry {
                pattern: pattern.to_string(),
                regex,
                active,
            },
        );
        Ok(())
    }

    pub fn remove(&mut self, name: &str) -> bool {
        self.entries.remove(name).is_some()
    }

    /// Name of the first active filter matching `text`.
    pub fn matches(&self, text: &str) -> Option<&str> {
        self.entries
            .iter()
            .find(|(_, entry)| entry.active && entry.regex.is_match(text))
            .map(|(name, _)| name.as_str())
    }

    pub fn pattern(&self, name: &str) -> Option<&str> {
        self.entries.get(name).map(|entry| entry.pattern.as_str())
    }

    pub fn is_active(&self, name: &str) -> bool {
        self.entries.get(name).is_some_and(|entry| entry.active)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Compiled Adblock-Plus lists plus a page-host whitelist.
pub struct ContentBlocker {
    lists: BTreeMap<String, Vec<String>>,
    whitelist: FilterTable,
    #[cfg(feature = "network")]
    engine: Option<adblock::Engine>,
}

impl ContentBlocker {
    pub fn new(whitelist: FilterTable) -> Self {
        Self {
            lists: BTreeMap::new(),
            whitelist,
            #[cfg(feature = "network")]
            engine: None,
        }
    }

    /// Load `<dir>/<name>.txt` as a rule list.
    pub fn load_from_dir(&mut self, dir: &Path, name: &str) -> Result<(), FilterError> {
        let path = dir.join(format!("{}.txt", name));
        if !path.is_file() {
            return Err(FilterError::NotFound(name.to_string()));
        }
        let text = fs::read_to_string(&path).map_err(|e| FilterError::IoError(e.to_string()))?;
        self.load_list(name, &text);
        Ok(())
    }

    /// Install (or replace) a rule list from its text.
    pub fn load_list(&mut self, name: &str, rules: &str) {
        let lines: Vec<String> = rules
            .lines()
            .map(str::trim)
            .filter(|line| !line.is_empty() && !line.starts_with('!') && !line.starts_with('['))
            .map(str::to_string)
            .collect();
        info!("Loaded content filter {} ({} rules)", name, lines.len());
        self.lists.insert(name.to_string(), lines);
        self.rebuild();
    }

    pub fn unload_list(&mut self, name: &str) -> bool {
        let removed = self.lists.remove(name).is_some();
        if removed {
            self.rebuild();
        }
        removed
    }

    pub fn has_list(&self, name: &str) -> bool {
        self.lists.contains_key(name)
    }

    pub fn whitelist_mut(&mut self) -> &mut FilterTable {
        &mut self.whitelist
    }

    /// True if a request for `uri` made by `page_uri` must be cancelled.
    pub fn should_block(&self, uri: &str, page_uri: &str) -> bool {
        if let Some(host) = host_of(page_uri) {
            if self.whitelist.matches(&host).is_some() {
                return false;
            }
        }
        self.engine_blocks(uri, page_uri)
    }

    #[cfg(feature = "network")]
    fn rebuild(&mut self) {
        if self.lists.is_empty() {
            self.engine = None;
            return;
        }
        let mut filter_set = adblock::lists::FilterSet::new(false);
        for rules in self.lists.values() {
            filter_set.add_filters(rules, adblock::lists::ParseOptions::default());
        }
        self.engine = Some(adblock::Engine::from_filter_set(filter_set, true));
    }

    #[cfg(not(feature = "network"))]
    fn rebuild(&mut self) {}

    #[cfg(feature = "network")]
    fn engine_blocks(&self, uri: &str, page_uri: &str) -> bool {
        let Some(engine) = &self.engine else {
            return false;
        };
        let source = if page_uri.is_empty() { uri } else { page_uri };
        match adblock::request::Request::new(uri, source, "other") {
            Ok(request) => engine.check_network_request(&request).matched,
            Err(e) => {
                debug!("Unfilterable request {}: {:?}", uri, e);
                false
            }
        }
    }

    #[cfg(not(feature = "network"))]
    fn engine_blocks(&self, _uri: &str, _page_uri: &str) -> bool {
        false
    }
}

/// Per-process content policy shared by all views of a renderer.
pub struct ContentPolicy {
    adblock: FilterTable,
    media: FilterTable,
    content: ContentBlocker,
}

impl ContentPolicy {
    pub fn new(adblock: FilterTable, media: FilterTable, content: ContentBlocker) -> Self {
        Self {
            adblock,
            media,
            content,
        }
    }

    pub fn adblock_mut(&mut self) -> &mut FilterTable {
        &mut self.adblock
    }

    pub fn media_mut(&mut self) -> &mut FilterTable {
        &mut self.media
    }

    pub fn content_mut(&mut self) -> &mut ContentBlocker {
        &mut self.content
    }

    fn is_blocked(&self, uri: &str, page_uri: &str) -> bool {
        if let Some(name) = self.adblock.matches(uri) {
            info!("Blocking ({}): {}", name, uri);
            return true;
        }
        if self.content.should_block(uri, page_uri) {
            info!("Blocking (content filter): {}", uri);
            return true;
        }
        false
    }

    /// Decide a navigation requested while `page_uri` is shown.
    ///
    /// `private` is the privacy mode of the view asking.
    pub fn decide_navigation(
        &self,
        action: &NavigationAction,
        page_uri: &str,
        private: bool,
    ) -> NavigationVerdict {
        if action.new_window && !action.user_gesture {
            debug!("Blocking popup: {}", action.uri);
            return NavigationVerdict::Block;
        }

        let new_tab_click = action.mouse_button == 2
            || (action.mouse_button == 1 && action.modifiers.control);
        if new_tab_click {
            return NavigationVerdict::OpenInNewTab {
                same_process: action.modifiers.shift,
                private: if action.modifiers.alt { Some(false) } else { None },
            };
        }

        if self.is_blocked(&action.uri, page_uri) {
            return NavigationVerdict::Block;
        }

        if private && is_downgrade(page_uri, &action.uri) {
            info!("Blocking downgrade: {} -> {}", page_uri, action.uri);
            return NavigationVerdict::Block;
        }

        if action.new_window {
            return NavigationVerdict::OpenInNewTab {
                same_process: true,
                private: None,
            };
        }

        NavigationVerdict::Allow
    }

    /// Decide a response; `supported` is the engine's MIME verdict.
    pub fn decide_response(
        &self,
        response: &ResponseInfo,
        page_uri: &str,
        private: bool,
        supported: bool,
    ) -> ResponseVerdict {
        if self.is_blocked(&response.uri, page_uri) {
            return ResponseVerdict::Block;
        }
        if private && is_downgrade(page_uri, &response.uri) {
            info!("Blocking downgrade: {} -> {}", page_uri, response.uri);
            return ResponseVerdict::Block;
        }
        if !supported {
            return ResponseVerdict::Download;
        }
        ResponseVerdict::Allow
    }

    /// Classify a sub-resource load started by `page_uri`.
    pub fn inspect_resource(&self, uri: &str, page_uri: &str) -> ResourceVerdict {
        ResourceVerdict {
            media: self.media.matches(uri).is_some(),
            insecure: page_uri.starts_with("https://") && uri.starts_with("http://"),
        }
    }
}
