//! Render capability used by renderer views.
//!
//! [`RenderEngine`] is the seam to the web engine: it navigates, keeps the
//! back/forward list, serializes sessions and reports what happens through a
//! queue of [`EngineEvent`]s. Navigations and responses are held until the
//! owner answers the matching policy decision.
//!
//! [`HeadlessEngine`] is a deterministic implementation with no network
//! access. It keeps a real history, runs the navigation/response policy
//! round trip and can simulate user input and crashes.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::path::PathBuf;
use std::rc::Rc;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::services::address::host_of;
use crate::types::errors::EngineError;
use crate::types::protocol::{BackForwardList, CertificateInfo, HistoryItem, LoadStatus, SecureInfo};

/// Identifies a pending policy decision.
pub type DecisionId = u64;

/// Answer to a policy decision.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Decision {
    Use,
    Ignore,
}

/// Keyboard modifiers held during a click.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Modifiers {
    pub shift: bool,
    pub control: bool,
    pub alt: bool,
}

/// A navigation awaiting a decision.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NavigationAction {
    pub uri: String,
    /// 0 for none, 1 left, 2 middle, 3 right.
    pub mouse_button: u32,
    pub modifiers: Modifiers,
    pub user_gesture: bool,
    /// The page asked for a new window.
    pub new_window: bool,
}

impl NavigationAction {
    pub fn plain(uri: &str) -> Self {
        Self {
            uri: uri.to_string(),
            mouse_button: 0,
            modifiers: Modifiers::default(),
            user_gesture: false,
            new_window: false,
        }
    }
}

/// A response awaiting a decision.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResponseInfo {
    pub uri: String,
    pub mime_type: String,
    pub suggested_filename: String,
    pub content_length: u64,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PolicyRequest {
    Navigation(NavigationAction),
    Response(ResponseInfo),
}

/// Something the engine reports to its owner.
#[derive(Debug, Clone, PartialEq)]
pub enum EngineEvent {
    PolicyDecision { id: DecisionId, request: PolicyRequest },
    LoadChanged(LoadStatus),
    TitleChanged(String),
    UriChanged(String),
    ProgressChanged(f64),
    IsLoadingChanged(bool),
    IsPlayingAudioChanged(bool),
    FaviconChanged,
    ResourceLoadStarted { uri: String, mime_type: String, content_length: u64 },
    InsecureContentDetected,
    TlsErrors { uri: String },
    LoadFailed { uri: String, message: String },
    MouseTargetChanged { uri: String, title: String },
    FoundText(u32),
    FailedToFindText,
    PermissionRequested { id: DecisionId, permission: String },
    WebProcessCrashed,
    MouseMotion,
}

/// Directory of a profile holding the persistent network state.
pub const WEBSITE_DATA_DIR: &str = "website-data";

/// Network state (cookies, cache) shared by engines of one privacy mode.
///
/// Private contexts keep everything in memory; a non-private context may
/// persist into `data_dir`.
#[derive(Debug, PartialEq, Eq)]
pub struct NetworkContext {
    pub id: u64,
    pub private: bool,
    pub data_dir: Option<PathBuf>,
}

impl NetworkContext {
    pub fn new(id: u64, private: bool) -> Self {
        Self {
            id,
            private,
            data_dir: None,
        }
    }

    /// Persist cookies and cache under `dir`. Ignored for private contexts.
    pub fn with_data_dir(mut self, dir: PathBuf) -> Self {
        if !self.private {
            self.data_dir = Some(dir);
        }
        self
    }
}

/// The opaque web engine behind one view.
pub trait RenderEngine {
    fn context(&self) -> &Rc<NetworkContext>;
    fn load_uri(&mut self, uri: &str);
    fn load_html(&mut self, html: &str);
    fn stop_loading(&mut self);
    fn reload(&mut self, bypass_cache: bool);
    /// Jump by `offset` entries in the back/forward list (negative = back).
    fn go_to_history(&mut self, offset: i32);
    fn back_forward_list(&self) -> BackForwardList;
    fn uri(&self) -> Option<String>;
    fn title(&self) -> Option<String>;
    fn can_go_back(&self) -> bool;
    fn can_go_forward(&self) -> bool;
    fn is_loading(&self) -> bool;
    fn tls_info(&self) -> SecureInfo;
    /// PNG bytes of the page icon, empty if none.
    fn favicon_png(&self) -> Vec<u8>;
    fn session_state(&self) -> Vec<u8>;
    fn restore_session_state(&mut self, state: &[u8]) -> Result<(), EngineError>;
    fn set_setting(&mut self, name: &str, value: &Value) -> Result<(), EngineError>;
    fn find(&mut self, text: &str);
    fn find_next(&mut self);
    fn find_prev(&mut self);
    fn find_finish(&mut self);
    fn is_mime_type_supported(&self, mime_type: &str) -> bool;
    fn decide(&mut self, id: DecisionId, decision: Decision);
    fn take_events(&mut self) -> Vec<EngineEvent>;

    /// A view is blank while it has no history and shows nothing.
    fn is_blank(&self) -> bool {
        let showing = self
            .uri()
            .map(|uri| !uri.is_empty() && uri != "about:blank")
            .unwrap_or(false);
        !(self.can_go_back() || self.can_go_forward() || showing)
    }
}

/// Builds engines bound to a network context.
pub trait EngineFactory {
    type Engine: RenderEngine;

    fn create(&mut self, context: &Rc<NetworkContext>) -> Self::Engine;
}

// === HeadlessEngine ===

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Target {
    New,
    History(usize),
    Reload,
}

#[derive(Debug, Clone)]
enum Pending {
    Navigation { uri: String, target: Target },
    Response { uri: String, target: Target },
    Permission,
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct SavedSession {
    history: Vec<HistoryItem>,
    current: Option<usize>,
}

/// Deterministic engine with no network access.
pub struct HeadlessEngine {
    context: Rc<NetworkContext>,
    history: Vec<HistoryItem>,
    current: Option<usize>,
    html: Option<String>,
    loading: bool,
    pending: HashMap<DecisionId, Pending>,
    next_decision: DecisionId,
    events: Vec<EngineEvent>,
    settings: BTreeMap<String, Value>,
    find_text: Option<String>,
    redirects: HashMap<String, String>,
    mime_overrides: HashMap<String, String>,
    untrusted_hosts: HashSet<String>,
    favicons: HashMap<String, Vec<u8>>,
    crashed: bool,
}

impl HeadlessEngine {
    pub fn new(context: &Rc<NetworkContext>) -> Self {
        Self {
            context: Rc::clone(context),
            history: Vec::new(),
            current: None,
            html: None,
            loading: false,
            pending: HashMap::new(),
            next_decision: 1,
            events: Vec::new(),
            settings: BTreeMap::new(),
            find_text: None,
            redirects: HashMap::new(),
            mime_overrides: HashMap::new(),
            untrusted_hosts: HashSet::new(),
            favicons: HashMap::new(),
            crashed: false,
        }
    }

    /// Serve `from` as a redirect to `to`.
    pub fn add_redirect(&mut self, from: &str, to: &str) {
        self.redirects.insert(from.to_string(), to.to_string());
    }

    /// Force the MIME type reported for `uri`.
    pub fn set_mime_type(&mut self, uri: &str, mime_type: &str) {
        self.mime_overrides.insert(uri.to_string(), mime_type.to_string());
    }

    /// Report certificates of `host` as unverified.
    pub fn set_host_untrusted(&mut self, host: &str) {
        self.untrusted_hosts.insert(host.to_lowercase());
    }

    pub fn set_favicon(&mut self, host: &str, png: Vec<u8>) {
        self.favicons.insert(host.to_lowercase(), png);
    }

    pub fn setting(&self, name: &str) -> Option<&Value> {
        self.settings.get(name)
    }

    pub fn html(&self) -> Option<&str> {
        self.html.as_deref()
    }

    pub fn is_crashed(&self) -> bool {
        self.crashed
    }

    /// Ids of decisions not answered yet.
    pub fn pending_decisions(&self) -> Vec<DecisionId> {
        let mut ids: Vec<_> = self.pending.keys().copied().collect();
        ids.sort_unstable();
        ids
    }

    /// A click on a link in the page.
    pub fn simulate_click(&mut self, uri: &str, mouse_button: u32, modifiers: Modifiers) {
        let action = NavigationAction {
            uri: uri.to_string(),
            mouse_button,
            modifiers,
            user_gesture: true,
            new_window: false,
        };
        self.request_navigation(action, Target::New);
    }

    /// The page asks for a new window.
    pub fn simulate_popup(&mut self, uri: &str, user_gesture: bool) {
        let action = NavigationAction {
            uri: uri.to_string(),
            mouse_button: 0,
            modifiers: Modifiers::default(),
            user_gesture,
            new_window: true,
        };
        self.request_navigation(action, Target::New);
    }

    /// The page starts loading a sub-resource.
    pub fn simulate_resource(&mut self, uri: &str, content_length: u64) {
        let mime_type = self.mime_type_for(uri);
        self.events.push(EngineEvent::ResourceLoadStarted {
            uri: uri.to_string(),
            mime_type,
            content_length,
        });
    }

    pub fn simulate_hover(&mut self, uri: &str, title: &str) {
        self.events.push(EngineEvent::MouseTargetChanged {
            uri: uri.to_string(),
            title: title.to_string(),
        });
    }

    pub fn simulate_permission_request(&mut self, permission: &str) -> DecisionId {
        let id = self.next_id();
        self.pending.insert(id, Pending::Permission);
        self.events.push(EngineEvent::PermissionRequested {
            id,
            permission: permission.to_string(),
        });
        id
    }

    pub fn simulate_audio(&mut self, playing: bool) {
        self.events.push(EngineEvent::IsPlayingAudioChanged(playing));
    }

    pub fn simulate_mouse_motion(&mut self) {
        self.events.push(EngineEvent::MouseMotion);
    }

    /// The engine's content process dies.
    pub fn simulate_crash(&mut self) {
        self.crashed = true;
        self.loading = false;
        self.pending.clear();
        self.events.push(EngineEvent::WebProcessCrashed);
    }

    fn next_id(&mut self) -> DecisionId {
        let id = self.next_decision;
        self.next_decision += 1;
        id
    }

    fn request_navigation(&mut self, action: NavigationAction, target: Target) {
        let id = self.next_id();
        self.pending.insert(
            id,
            Pending::Navigation {
                uri: action.uri.clone(),
                target,
            },
        );
        self.events.push(EngineEvent::PolicyDecision {
            id,
            request: PolicyRequest::Navigation(action),
        });
    }

    fn mime_type_for(&self, uri: &str) -> String {
        if let Some(mime) = self.mime_overrides.get(uri) {
            return mime.clone();
        }
        guess_mime_type(uri).to_string()
    }

    fn start_load(&mut self, uri: String, target: Target) {
        self.loading = true;
        self.events.push(EngineEvent::LoadChanged(LoadStatus::Started));
        self.events.push(EngineEvent::IsLoadingChanged(true));
        self.events.push(EngineEvent::ProgressChanged(0.1));

        let uri = match self.redirects.get(&uri) {
            Some(to) => {
                self.events.push(EngineEvent::LoadChanged(LoadStatus::Redirected));
                self.events.push(EngineEvent::UriChanged(to.clone()));
                to.clone()
            }
            None => uri,
        };

        let id = self.next_id();
        let response = ResponseInfo {
            suggested_filename: suggested_filename(&uri),
            mime_type: self.mime_type_for(&uri),
            content_length: 0,
            uri: uri.clone(),
        };
        self.pending.insert(id, Pending::Response { uri, target });
        self.events.push(EngineEvent::PolicyDecision {
            id,
            request: PolicyRequest::Response(response),
        });
    }

    fn commit(&mut self, uri: String, target: Target) {
        match target {
            Target::New => {
                let keep = self.current.map(|i| i + 1).unwrap_or(0);
                self.history.truncate(keep);
                let title = host_of(&uri).unwrap_or_else(|| uri.clone());
                self.history.push(HistoryItem {
                    title,
                    uri: uri.clone(),
                    original_uri: uri.clone(),
                });
                self.current = Some(self.history.len() - 1);
            }
            Target::History(index) => self.current = Some(index),
            Target::Reload => {}
        }
        self.html = None;
        self.loading = false;
        self.crashed = false;

        let title = self.title().unwrap_or_default();
        self.events.push(EngineEvent::LoadChanged(LoadStatus::Committed));
        self.events.push(EngineEvent::UriChanged(uri.clone()));
        self.events.push(EngineEvent::TitleChanged(title));
        if host_of(&uri).is_some_and(|host| self.favicons.contains_key(&host)) {
            self.events.push(EngineEvent::FaviconChanged);
        }
        self.events.push(EngineEvent::ProgressChanged(1.0));
        self.events.push(EngineEvent::LoadChanged(LoadStatus::Finished));
        self.events.push(EngineEvent::IsLoadingChanged(false));
    }

    fn current_item(&self) -> Option<&HistoryItem> {
        self.current.and_then(|i| self.history.get(i))
    }

    fn run_find(&mut self) {
        let Some(text) = self.find_text.clone() else {
            return;
        };
        let needle = text.to_lowercase();
        let haystack = match self.current_item() {
            Some(item) => format!("{} {}", item.title, item.uri).to_lowercase(),
            None => self.html.clone().unwrap_or_default().to_lowercase(),
        };
        let count = haystack.matches(&needle).count() as u32;
        if needle.is_empty() || count == 0 {
            self.events.push(EngineEvent::FailedToFindText);
        } else {
            self.events.push(EngineEvent::FoundText(count));
        }
    }
}

impl RenderEngine for HeadlessEngine {
    fn context(&self) -> &Rc<NetworkContext> {
        &self.context
    }

    fn load_uri(&mut self, uri: &str) {
        self.request_navigation(NavigationAction::plain(uri), Target::New);
    }

    fn load_html(&mut self, html: &str) {
        self.html = Some(html.to_string());
        self.events.push(EngineEvent::LoadChanged(LoadStatus::Started));
        self.events.push(EngineEvent::LoadChanged(LoadStatus::Committed));
        self.events.push(EngineEvent::LoadChanged(LoadStatus::Finished));
    }

    fn stop_loading(&mut self) {
        if !self.loading && self.pending.is_empty() {
            return;
        }
        self.pending.retain(|_, p| matches!(p, Pending::Permission));
        self.loading = false;
        self.events.push(EngineEvent::LoadChanged(LoadStatus::Finished));
        self.events.push(EngineEvent::IsLoadingChanged(false));
    }

    fn reload(&mut self, _bypass_cache: bool) {
        if let Some(item) = self.current_item().cloned() {
            self.request_navigation(NavigationAction::plain(&item.uri), Target::Reload);
        }
    }

    fn go_to_history(&mut self, offset: i32) {
        let Some(current) = self.current else {
            return;
        };
        let target = current as i64 + i64::from(offset);
        if offset == 0 || target < 0 || target as usize >= self.history.len() {
            return;
        }
        let index = target as usize;
        let uri = self.history[index].uri.clone();
        self.request_navigation(NavigationAction::plain(&uri), Target::History(index));
    }

    fn back_forward_list(&self) -> BackForwardList {
        match self.current {
            Some(current) => {
                let back = self.history[..current].to_vec();
                let forward = self.history[current + 1..].to_vec();
                BackForwardList(back, self.history.get(current).cloned(), forward)
            }
            None => BackForwardList::default(),
        }
    }

    fn uri(&self) -> Option<String> {
        self.current_item().map(|item| item.uri.clone())
    }

    fn title(&self) -> Option<String> {
        self.current_item().map(|item| item.title.clone())
    }

    fn can_go_back(&self) -> bool {
        self.current.is_some_and(|i| i > 0)
    }

    fn can_go_forward(&self) -> bool {
        self.current.is_some_and(|i| i + 1 < self.history.len())
    }

    fn is_loading(&self) -> bool {
        self.loading
    }

    fn tls_info(&self) -> SecureInfo {
        let Some(uri) = self.uri() else {
            return SecureInfo::default();
        };
        if !uri.starts_with("https://") {
            return SecureInfo::default();
        }
        let host = host_of(&uri).unwrap_or_default();
        if self.untrusted_hosts.contains(&host) {
            // G_TLS_CERTIFICATE_UNKNOWN_CA
            return SecureInfo(false, false, None, 1);
        }
        let certificate: String = host.bytes().map(|b| format!("{:02x}", b)).collect();
        let cert = CertificateInfo {
            certificate,
            cert_pem: format!(
                "-----BEGIN CERTIFICATE-----\n{}\n-----END CERTIFICATE-----\n",
                host
            ),
            issuer: "Headless Root CA".to_string(),
            issuer_pem: "-----BEGIN CERTIFICATE-----\nheadless-root\n-----END CERTIFICATE-----\n"
                .to_string(),
        };
        SecureInfo(true, true, Some(cert), 0)
    }

    fn favicon_png(&self) -> Vec<u8> {
        self.uri()
            .and_then(|uri| host_of(&uri))
            .and_then(|host| self.favicons.get(&host).cloned())
            .unwrap_or_default()
    }

    fn session_state(&self) -> Vec<u8> {
        let saved = SavedSession {
            history: self.history.clone(),
            current: self.current,
        };
        serde_json::to_vec(&saved).unwrap_or_default()
    }

    fn restore_session_state(&mut self, state: &[u8]) -> Result<(), EngineError> {
        let saved: SavedSession = if state.is_empty() {
            SavedSession::default()
        } else {
            serde_json::from_slice(state).map_err(|e| EngineError::InvalidSession(e.to_string()))?
        };
        if let Some(current) = saved.current {
            if current >= saved.history.len() {
                return Err(EngineError::InvalidSession(format!(
                    "current entry {} out of range",
                    current
                )));
            }
        }
        self.history = saved.history;
        self.current = saved.current;
        self.crashed = false;
        if let Some(index) = self.current {
            let uri = self.history[index].uri.clone();
            self.request_navigation(NavigationAction::plain(&uri), Target::History(index));
        }
        Ok(())
    }

    fn set_setting(&mut self, name: &str, value: &Value) -> Result<(), EngineError> {
        if name.is_empty() {
            return Err(EngineError::InvalidSetting("empty setting name".to_string()));
        }
        if value.is_object() || value.is_array() {
            return Err(EngineError::InvalidSetting(format!(
                "{} expects a scalar value",
                name
            )));
        }
        self.settings.insert(name.to_string(), value.clone());
        Ok(())
    }

    fn find(&mut self, text: &str) {
        self.find_text = Some(text.to_string());
        self.run_find();
    }

    fn find_next(&mut self) {
        self.run_find();
    }

    fn find_prev(&mut self) {
        self.run_find();
    }

    fn find_finish(&mut self) {
        self.find_text = None;
    }

    fn is_mime_type_supported(&self, mime_type: &str) -> bool {
        let mime = mime_type.split(';').next().unwrap_or("").trim();
        mime.starts_with("text/")
            || mime.starts_with("image/")
            || mime.starts_with("audio/")
            || mime.starts_with("video/")
            || matches!(
                mime,
                "application/xhtml+xml" | "application/json" | "application/javascript"
            )
    }

    fn decide(&mut self, id: DecisionId, decision: Decision) {
        let Some(pending) = self.pending.remove(&id) else {
            return;
        };
        match (pending, decision) {
            (Pending::Navigation { uri, target }, Decision::Use) => self.start_load(uri, target),
            (Pending::Navigation { .. }, Decision::Ignore) => {}
            (Pending::Response { uri, target }, Decision::Use) => self.commit(uri, target),
            (Pending::Response { uri, .. }, Decision::Ignore) => {
                self.loading = false;
                self.events.push(EngineEvent::LoadFailed {
                    uri,
                    message: "Frame load interrupted by policy change".to_string(),
                });
                self.events.push(EngineEvent::LoadChanged(LoadStatus::Finished));
                self.events.push(EngineEvent::IsLoadingChanged(false));
            }
            (Pending::Permission, _) => {}
        }
    }

    fn take_events(&mut self) -> Vec<EngineEvent> {
        std::mem::take(&mut self.events)
    }
}

/// Builds [`HeadlessEngine`]s.
#[derive(Debug, Default)]
pub struct HeadlessFactory;

impl EngineFactory for HeadlessFactory {
    type Engine = HeadlessEngine;

    fn create(&mut self, context: &Rc<NetworkContext>) -> HeadlessEngine {
        HeadlessEngine::new(context)
    }
}

/// MIME type guessed from the path extension.
pub fn guess_mime_type(uri: &str) -> &'static str {
    let path = uri.split(['?', '#']).next().unwrap_or(uri).to_lowercase();
    let extension = path.rsplit_once('.').map(|(_, ext)| ext).unwrap_or("");
    match extension {
        "mp3" => "audio/mpeg",
        "ogg" => "audio/ogg",
        "mp4" => "video/mp4",
        "png" => "image/png",
        "jpg" | "jpeg" => "image/jpeg",
        "gif" => "image/gif",
        "json" => "application/json",
        "js" => "application/javascript",
        "txt" => "text/plain",
        "css" => "text/css",
        "pdf" => "application/pdf",
        "zip" => "application/zip",
        "gz" | "tgz" => "application/gzip",
        "exe" | "bin" | "iso" => "application/octet-stream",
        _ => "text/html",
    }
}

fn suggested_filename(uri: &str) -> String {
    let path = uri.split(['?', '#']).next().unwrap_or(uri);
    let path = path.split_once("://").map(|(_, rest)| rest).unwrap_or(path);
    match path.split_once('/') {
        Some((_, rest)) => rest.rsplit('/').next().unwrap_or("").to_string(),
        None => String::new(),
    }
}
