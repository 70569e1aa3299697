//! Wire protocol shared by the UI process and renderer processes.
//!
//! Every message is a `(signal, data)` pair. On the wire a message is an
//! adjacently tagged JSON object `{"signal": "...", "data": ...}` wrapped in an
//! [`Envelope`] naming the renderer-side view it belongs to.

use std::collections::BTreeMap;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use super::session::{ClosedSession, SessionSnapshot};

/// Embedding surface identifier allocated by the UI process.
pub type SocketId = u64;

/// Renderer-local view identifier used to address a view over its process pipe.
pub type ChannelId = u64;

/// Channel id of the view a renderer process creates at startup.
pub const INITIAL_CHANNEL: ChannelId = 1;

/// A message addressed to (or sent from) one renderer-side view.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Envelope<T> {
    pub channel: ChannelId,
    pub message: T,
}

impl<T> Envelope<T> {
    pub fn new(channel: ChannelId, message: T) -> Self {
        Self { channel, message }
    }
}

/// Commands sent from the UI process to a renderer view.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "signal", content = "data", rename_all = "kebab-case")]
pub enum Command {
    Close,
    GrabFocus,
    OpenUri(String),
    NewTab(NewTabRequest),
    SocketId(SocketId),
    Stop,
    Refresh,
    RefreshBypass,
    HistoryGoTo(i32),
    Find(String),
    FindNext,
    FindPrev,
    FindFinish,
    RestoreSession(SessionSnapshot),
    GetSession,
    WebViewSettings(String, serde_json::Value),
    DefaultSearch(String),
    Adblock(String, String, bool),
    MediaFilter(String, String, bool),
    ContentFilter(String, String, bool),
    ContentFilterWhitelist(String, String, bool),
}

impl Command {
    /// Signal name as it appears on the wire.
    pub fn signal(&self) -> &'static str {
        match self {
            Command::Close => "close",
            Command::GrabFocus => "grab-focus",
            Command::OpenUri(_) => "open-uri",
            Command::NewTab(_) => "new-tab",
            Command::SocketId(_) => "socket-id",
            Command::Stop => "stop",
            Command::Refresh => "refresh",
            Command::RefreshBypass => "refresh-bypass",
            Command::HistoryGoTo(_) => "history-go-to",
            Command::Find(_) => "find",
            Command::FindNext => "find-next",
            Command::FindPrev => "find-prev",
            Command::FindFinish => "find-finish",
            Command::RestoreSession(_) => "restore-session",
            Command::GetSession => "get-session",
            Command::WebViewSettings(_, _) => "web-view-settings",
            Command::DefaultSearch(_) => "default-search",
            Command::Adblock(_, _, _) => "adblock",
            Command::MediaFilter(_, _, _) => "media-filter",
            Command::ContentFilter(_, _, _) => "content-filter",
            Command::ContentFilterWhitelist(_, _, _) => "content-filter-whitelist",
        }
    }
}

/// Events sent from a renderer view to the UI process.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "signal", content = "data", rename_all = "kebab-case")]
pub enum Event {
    Title(String),
    Uri(String),
    EstimatedLoadProgress(f64),
    IsLoading(bool),
    LoadStatus(LoadStatus),
    BackForwardList(BackForwardList),
    CanGoBack(bool),
    CanGoForward(bool),
    IsSecure(SecureInfo),
    IconBytes(#[serde(with = "base64_bytes")] Vec<u8>),
    InsecureContent(bool),
    HoverLink(HoverLink),
    IsPlayingAudio(bool),
    FindFailed(bool),
    TlsError(bool),
    LoadError(LoadErrorInfo),
    Download(DownloadRequest),
    SessionData(String),
    Crashed(String),
    TabInfo(TabInfo),
    CreateTab(CreateTabRequest),
    Closed(ClosedInfo),
    PlugAdded,
    MouseMotion,
}

impl Event {
    /// Signal name as it appears on the wire.
    pub fn signal(&self) -> &'static str {
        match self {
            Event::Title(_) => "title",
            Event::Uri(_) => "uri",
            Event::EstimatedLoadProgress(_) => "estimated-load-progress",
            Event::IsLoading(_) => "is-loading",
            Event::LoadStatus(_) => "load-status",
            Event::BackForwardList(_) => "back-forward-list",
            Event::CanGoBack(_) => "can-go-back",
            Event::CanGoForward(_) => "can-go-forward",
            Event::IsSecure(_) => "is-secure",
            Event::IconBytes(_) => "icon-bytes",
            Event::InsecureContent(_) => "insecure-content",
            Event::HoverLink(_) => "hover-link",
            Event::IsPlayingAudio(_) => "is-playing-audio",
            Event::FindFailed(_) => "find-failed",
            Event::TlsError(_) => "tls-error",
            Event::LoadError(_) => "load-error",
            Event::Download(_) => "download",
            Event::SessionData(_) => "session-data",
            Event::Crashed(_) => "crashed",
            Event::TabInfo(_) => "tab-info",
            Event::CreateTab(_) => "create-tab",
            Event::Closed(_) => "closed",
            Event::PlugAdded => "plug-added",
            Event::MouseMotion => "mouse-motion",
        }
    }

    /// High-frequency signals that are only worth logging at debug level.
    pub fn is_chatty(&self) -> bool {
        matches!(
            self,
            Event::MouseMotion
                | Event::BackForwardList(_)
                | Event::CanGoBack(_)
                | Event::CanGoForward(_)
                | Event::IsSecure(_)
                | Event::IconBytes(_)
                | Event::EstimatedLoadProgress(_)
                | Event::HoverLink(_)
                | Event::SessionData(_)
                | Event::Closed(_)
        )
    }
}

/// Load lifecycle reported with `load-status`; encoded as an integer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(into = "u8", try_from = "u8")]
pub enum LoadStatus {
    Started,
    Redirected,
    Committed,
    Finished,
}

impl From<LoadStatus> for u8 {
    fn from(status: LoadStatus) -> u8 {
        match status {
            LoadStatus::Started => 0,
            LoadStatus::Redirected => 1,
            LoadStatus::Committed => 2,
            LoadStatus::Finished => 3,
        }
    }
}

impl TryFrom<u8> for LoadStatus {
    type Error = String;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            0 => Ok(LoadStatus::Started),
            1 => Ok(LoadStatus::Redirected),
            2 => Ok(LoadStatus::Committed),
            3 => Ok(LoadStatus::Finished),
            other => Err(format!("unknown load status: {}", other)),
        }
    }
}

/// One entry of a back/forward list.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct HistoryItem {
    pub title: String,
    pub uri: String,
    pub original_uri: String,
}

/// `(back, current, forward)`; the back list is oldest first, the forward list
/// nearest first.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BackForwardList(
    pub Vec<HistoryItem>,
    pub Option<HistoryItem>,
    pub Vec<HistoryItem>,
);

impl BackForwardList {
    pub fn back(&self) -> &[HistoryItem] {
        &self.0
    }

    pub fn current(&self) -> Option<&HistoryItem> {
        self.1.as_ref()
    }

    pub fn forward(&self) -> &[HistoryItem] {
        &self.2
    }

    /// Total number of entries including the current one.
    pub fn len(&self) -> usize {
        self.0.len() + self.2.len() + usize::from(self.1.is_some())
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Certificate details attached to `is-secure`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct CertificateInfo {
    pub certificate: String,
    pub cert_pem: String,
    pub issuer: String,
    pub issuer_pem: String,
}

/// `(verified, issuer_known, certificate, tls_flags)`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SecureInfo(pub bool, pub bool, pub Option<CertificateInfo>, pub u32);

impl SecureInfo {
    pub fn verified(&self) -> bool {
        self.0
    }

    pub fn issuer_known(&self) -> bool {
        self.1
    }

    pub fn certificate(&self) -> Option<&CertificateInfo> {
        self.2.as_ref()
    }

    pub fn tls_flags(&self) -> u32 {
        self.3
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct HoverLink {
    pub uri: String,
    pub title: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LoadErrorInfo {
    pub uri: String,
    pub message: String,
}

/// A request handed to the download sink.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct DownloadRequest {
    pub uri: String,
    pub filename: String,
    pub mime_type: String,
    pub length: u64,
    pub user_agent: String,
    #[serde(default = "default_true")]
    pub start: bool,
}

/// Ask a renderer to open a sibling view in its own process.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct NewTabRequest {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub uri: Option<String>,
    #[serde(default)]
    pub focus: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub private: Option<bool>,
    #[serde(default = "default_index")]
    pub index: i32,
    #[serde(default)]
    pub order: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub session_data: Option<String>,
}

impl From<&SessionSnapshot> for NewTabRequest {
    fn from(snapshot: &SessionSnapshot) -> Self {
        Self {
            uri: None,
            focus: snapshot.focus,
            private: Some(snapshot.private),
            index: snapshot.index,
            order: snapshot.order,
            session_data: Some(snapshot.session_data.clone()),
        }
    }
}

/// Announces a view created inside an existing renderer process.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct TabInfo {
    pub uri: String,
    pub pid: u32,
    pub channel: ChannelId,
    pub focus: bool,
    pub private: bool,
    pub index: i32,
    pub order: u64,
}

/// Ask the UI to open a tab in a brand-new renderer process.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct CreateTabRequest {
    pub uri: String,
    #[serde(default)]
    pub focus: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub private: Option<bool>,
}

/// Teardown confirmation sent once a view's embedding surface is gone.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct ClosedInfo {
    pub session: ClosedSession,
    pub is_last: bool,
}

/// `(pattern, active)` as stored in the profile and sent at startup.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FilterRule(pub String, pub bool);

impl FilterRule {
    pub fn pattern(&self) -> &str {
        &self.0
    }

    pub fn active(&self) -> bool {
        self.1
    }
}

/// Startup payload a renderer process reads as its first message.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct InitPayload {
    pub private: bool,
    #[serde(default)]
    pub web_view_settings: BTreeMap<String, serde_json::Value>,
    pub search_url: String,
    #[serde(default)]
    pub user_agent: String,
    #[serde(default)]
    pub adblock_filters: BTreeMap<String, FilterRule>,
    #[serde(default)]
    pub media_filters: BTreeMap<String, FilterRule>,
    #[serde(default)]
    pub content_filters: Vec<String>,
    #[serde(default)]
    pub content_filters_path: Option<PathBuf>,
    #[serde(default)]
    pub content_filter_whitelist: BTreeMap<String, FilterRule>,
    #[serde(default)]
    pub profile_path: Option<PathBuf>,
    pub socket_id: SocketId,
    pub uri: String,
}

fn default_true() -> bool {
    true
}

fn default_index() -> i32 {
    -1
}

/// Serde adapter carrying raw bytes as base64 text.
pub mod base64_bytes {
    use base64::{engine::general_purpose::STANDARD as BASE64, Engine as _};
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(bytes: &[u8], serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&BASE64.encode(bytes))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<u8>, D::Error> {
        let text = String::deserialize(deserializer)?;
        BASE64.decode(text.as_bytes()).map_err(serde::de::Error::custom)
    }
}
