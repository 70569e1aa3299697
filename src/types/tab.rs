use serde::{Deserialize, Serialize};

use super::protocol::{ChannelId, Command, HistoryItem, SecureInfo, SocketId, INITIAL_CHANNEL};
use super::session::{SessionSnapshot, TabState};

/// Placeholder shown in place of a missing favicon.
pub const PLACEHOLDER_ICON: &str = "text-html";

/// Why a page is shown as not secure.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum InsecureReason {
    NotHttps,
    Unverified,
    MixedContent,
}

/// Security indicator of a tab. The three states are mutually exclusive.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
pub enum SecurityState {
    #[default]
    Neutral,
    Verified,
    Insecure(InsecureReason),
}

impl SecurityState {
    /// Priority-ordered decision: blank page, then scheme, then certificate,
    /// then mixed content.
    pub fn compute(uri: &str, verified: bool, insecure_content: bool) -> Self {
        if uri.is_empty() || uri == "about:blank" {
            return SecurityState::Neutral;
        }
        if !uri.starts_with("https://") {
            return SecurityState::Insecure(InsecureReason::NotHttps);
        }
        match (verified, insecure_content) {
            (true, false) => SecurityState::Verified,
            (true, true) => SecurityState::Insecure(InsecureReason::MixedContent),
            (false, _) => SecurityState::Insecure(InsecureReason::Unverified),
        }
    }

    pub fn is_secure(&self) -> bool {
        matches!(self, SecurityState::Verified)
    }
}

/// Icon of the stop/reload button.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
pub enum ReloadAction {
    Stop,
    #[default]
    Reload,
}

/// Display state of the toolbar and tab label belonging to one tab.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct TabChrome {
    pub spinner: bool,
    pub action: ReloadAction,
    pub progress: f64,
    pub security: SecurityState,
    pub tooltip: String,
    pub address_text: String,
    pub hover_uri: String,
    pub find_failed: bool,
    pub playing_audio: bool,
    pub can_go_back: bool,
    pub can_go_forward: bool,
}

/// A visible tab in the UI process, paired with one renderer-side view.
#[derive(Debug, Clone)]
pub struct TabRecord {
    pub socket_id: SocketId,
    /// Owning renderer process id; 0 until the supervisor replies.
    pub pid: u32,
    pub channel: ChannelId,
    pub uri: String,
    pub title: String,
    pub back_list: Vec<HistoryItem>,
    pub forward_list: Vec<HistoryItem>,
    pub current: Option<HistoryItem>,
    pub is_loading: bool,
    pub cert_data: SecureInfo,
    pub insecure_content: bool,
    pub icon: Vec<u8>,
    pub private: bool,
    pub focus: bool,
    pub closing: bool,
    pub plug_added: bool,
    pub order: u64,
    /// Whether inbound events are still applied to this record.
    pub subscribed: bool,
    pub state: TabState,
    /// Last crash-survival snapshot of this tab.
    pub session: SessionSnapshot,
    /// Commands issued while `pid` is still 0.
    pub pending: Vec<Command>,
    pub chrome: TabChrome,
}

impl TabRecord {
    pub fn new(socket_id: SocketId, private: bool) -> Self {
        Self {
            socket_id,
            pid: 0,
            channel: INITIAL_CHANNEL,
            uri: String::new(),
            title: String::new(),
            back_list: Vec::new(),
            forward_list: Vec::new(),
            current: None,
            is_loading: false,
            cert_data: SecureInfo::default(),
            insecure_content: false,
            icon: Vec::new(),
            private,
            focus: false,
            closing: false,
            plug_added: false,
            order: 0,
            subscribed: true,
            state: TabState::default(),
            session: SessionSnapshot {
                private,
                ..SessionSnapshot::default()
            },
            pending: Vec::new(),
            chrome: TabChrome::default(),
        }
    }

    /// Window title for this tab.
    pub fn title_str(&self) -> String {
        let private = if self.private { "(private)" } else { "" };
        format!("{} (pid: {}) {}", self.title, self.pid, private)
            .trim_end()
            .to_string()
    }

    /// Crash-survival snapshot reflecting the tab's current position and flags.
    pub fn snapshot(&self, index: i32) -> SessionSnapshot {
        SessionSnapshot {
            session_data: self.session.session_data.clone(),
            title: self.title.clone(),
            uri: self.uri.clone(),
            index,
            state: self.state,
            pid: self.pid,
            private: self.private,
            focus: self.focus,
            order: self.order,
        }
    }

    pub fn has_history(&self) -> bool {
        !self.back_list.is_empty() || !self.forward_list.is_empty()
    }
}
