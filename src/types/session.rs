use serde::{Deserialize, Serialize};

/// Minimized/hidden layout flags of a tab.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct TabState {
    pub minimized: bool,
    pub hidden: bool,
}

/// A tab's persisted state: enough to restore its history after a close,
/// a renderer crash or an application restart.
///
/// `session_data` is the engine's opaque session state as base64 text.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "kebab-case", default)]
pub struct SessionSnapshot {
    pub session_data: String,
    pub title: String,
    pub uri: String,
    pub index: i32,
    pub state: TabState,
    pub pid: u32,
    pub private: bool,
    pub focus: bool,
    pub order: u64,
}

impl Default for SessionSnapshot {
    fn default() -> Self {
        Self {
            session_data: String::new(),
            title: String::new(),
            uri: String::new(),
            index: -1,
            state: TabState::default(),
            pid: 0,
            private: true,
            focus: false,
            order: 0,
        }
    }
}

impl SessionSnapshot {
    /// True when the snapshot carries no navigation history.
    pub fn is_empty(&self) -> bool {
        self.session_data.is_empty()
    }

    /// Keep only the layout part of the snapshot.
    ///
    /// Used when quitting: the `closed` reply of each tab fills the
    /// navigation part back in.
    pub fn layout_only(&self) -> Self {
        Self {
            session_data: String::new(),
            title: String::new(),
            uri: String::new(),
            ..self.clone()
        }
    }

    /// Merge the navigation part reported by a renderer into this snapshot.
    pub fn merge_closed(&mut self, closed: &ClosedSession) {
        self.session_data = closed.session_data.clone();
        self.title = closed.title.clone();
        self.uri = closed.uri.clone();
    }
}

/// Navigation part of a session captured by a renderer view at teardown.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "kebab-case", default)]
pub struct ClosedSession {
    pub session_data: String,
    pub title: String,
    pub uri: String,
}

impl ClosedSession {
    pub fn is_empty(&self) -> bool {
        self.session_data.is_empty()
    }
}
