//! Tab Registry for the UI process.
//!
//! Owns the ordered list of visible tabs and the routing table from a
//! renderer-side view `(pid, channel)` to its tab. Inbound renderer events
//! update tab display state; gestures become outbound commands. Everything
//! that has to leave the registry (spawning, sending, terminating, saving)
//! is queued as a [`UiEffect`] for the application loop to carry out.

use std::collections::{HashMap, HashSet};

use log::{debug, info, warn};

use crate::services::message_channel::Watch;
use crate::types::protocol::{
    ChannelId, ClosedInfo, Command, DownloadRequest, Event, InitPayload, LoadStatus,
    NewTabRequest, SocketId, TabInfo,
};
use crate::types::session::{SessionSnapshot, TabState};
use crate::types::tab::{ReloadAction, SecurityState, TabRecord};

/// Work the application loop must carry out for the registry.
#[derive(Debug, Clone, PartialEq)]
pub enum UiEffect {
    /// Start a renderer process for a tab and hand it `init`.
    Spawn { socket_id: SocketId, init: InitPayload },
    Send { pid: u32, channel: ChannelId, command: Command },
    Terminate { pid: u32 },
    /// Ask the supervisor whether `pid` is alive, then call
    /// [`TabRegistry::probe_result`].
    ProbeAlive { socket_id: SocketId, pid: u32 },
    SaveCrashSessions(Vec<SessionSnapshot>),
    StoreClosedSession(SessionSnapshot),
    ClearClosedSessions,
    Download { pid: u32, request: DownloadRequest },
    /// The last tab is gone.
    Quit,
}

/// How a new tab should be opened.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TabOptions {
    pub focus: bool,
    /// `None` uses the profile default.
    pub private: Option<bool>,
    /// Display position; `None` appends.
    pub index: Option<usize>,
}

/// Modifier keys held during a new-tab gesture.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct GestureModifiers {
    /// Open inside the current tab's renderer process.
    pub shift: bool,
    /// Open as non-private.
    pub alt: bool,
}

/// The UI-side collection of tabs.
pub struct TabRegistry {
    tabs: Vec<TabRecord>,
    current: Option<SocketId>,
    routes: HashMap<(u32, ChannelId), SocketId>,
    next_socket_id: SocketId,
    /// Old pid of a restored session -> tab now hosting that process's views.
    pid_map: HashMap<u32, SocketId>,
    terminated: HashSet<u32>,
    closing_app: bool,
    template: InitPayload,
    window_title: String,
    effects: Vec<UiEffect>,
}

impl TabRegistry {
    /// `template` provides every startup payload field except the socket id
    /// and the uri.
    pub fn new(template: InitPayload) -> Self {
        Self {
            tabs: Vec::new(),
            current: None,
            routes: HashMap::new(),
            next_socket_id: 1,
            pid_map: HashMap::new(),
            terminated: HashSet::new(),
            closing_app: false,
            template,
            window_title: String::new(),
            effects: Vec::new(),
        }
    }

    pub fn template(&self) -> &InitPayload {
        &self.template
    }

    /// Profile values used for renderers started from now on.
    pub fn template_mut(&mut self) -> &mut InitPayload {
        &mut self.template
    }

    pub fn take_effects(&mut self) -> Vec<UiEffect> {
        std::mem::take(&mut self.effects)
    }

    pub fn tabs(&self) -> &[TabRecord] {
        &self.tabs
    }

    pub fn len(&self) -> usize {
        self.tabs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tabs.is_empty()
    }

    pub fn tab(&self, socket_id: SocketId) -> Option<&TabRecord> {
        self.tabs.iter().find(|tab| tab.socket_id == socket_id)
    }

    fn tab_mut(&mut self, socket_id: SocketId) -> Option<&mut TabRecord> {
        self.tabs.iter_mut().find(|tab| tab.socket_id == socket_id)
    }

    fn position(&self, socket_id: SocketId) -> Option<usize> {
        self.tabs.iter().position(|tab| tab.socket_id == socket_id)
    }

    pub fn current(&self) -> Option<&TabRecord> {
        self.current.and_then(|socket_id| self.tab(socket_id))
    }

    pub fn current_id(&self) -> Option<SocketId> {
        self.current
    }

    pub fn is_closing_app(&self) -> bool {
        self.closing_app
    }

    pub fn window_title(&self) -> &str {
        &self.window_title
    }

    /// Tab routed from a renderer view.
    pub fn route(&self, pid: u32, channel: ChannelId) -> Option<SocketId> {
        self.routes.get(&(pid, channel)).copied()
    }

    // === Creation ===

    /// Open a tab in a brand-new renderer process.
    pub fn make_tab(&mut self, uri: &str, options: TabOptions) -> SocketId {
        let socket_id = self.next_socket_id;
        self.next_socket_id += 1;

        let private = options.private.unwrap_or(self.template.private);
        let mut tab = TabRecord::new(socket_id, private);
        tab.uri = uri.to_string();
        tab.title = uri.to_string();
        tab.chrome.address_text = uri.to_string();

        let index = options.index.unwrap_or(self.tabs.len()).min(self.tabs.len());
        self.tabs.insert(index, tab);

        let init = InitPayload {
            private,
            socket_id,
            uri: uri.to_string(),
            ..self.template.clone()
        };
        info!("New tab {} (private: {}): {}", socket_id, private, uri);
        self.effects.push(UiEffect::Spawn { socket_id, init });

        if options.focus || self.current.is_none() {
            self.focus_tab(socket_id);
        }
        socket_id
    }

    /// The supervisor started the process for `socket_id`.
    pub fn process_started(&mut self, socket_id: SocketId, pid: u32) {
        // A reused pid names a new process.
        self.terminated.remove(&pid);
        self.pid_map.remove(&pid);
        let Some(tab) = self.tab_mut(socket_id) else {
            info!("Tab {} went away before process {} started", socket_id, pid);
            self.terminate(pid);
            return;
        };
        tab.pid = pid;
        let channel = tab.channel;
        let pending = std::mem::take(&mut tab.pending);
        self.routes.insert((pid, channel), socket_id);
        for command in pending {
            self.effects.push(UiEffect::Send {
                pid,
                channel,
                command,
            });
        }
        if self.current == Some(socket_id) {
            self.refresh_window_title();
        }
    }

    /// The process for `socket_id` could not be started.
    pub fn process_failed(&mut self, socket_id: SocketId) {
        warn!("No renderer for tab {}", socket_id);
        self.remove_tab(socket_id);
    }

    // === Commands ===

    /// Send a command to a tab, buffering it while its process is starting.
    pub fn send(&mut self, socket_id: SocketId, command: Command) -> bool {
        let Some(tab) = self.tab_mut(socket_id) else {
            return false;
        };
        if tab.pid == 0 {
            tab.pending.push(command);
            return true;
        }
        let (pid, channel) = (tab.pid, tab.channel);
        self.effects.push(UiEffect::Send {
            pid,
            channel,
            command,
        });
        true
    }

    fn send_current(&mut self, command: Command) -> bool {
        match self.current {
            Some(socket_id) => self.send(socket_id, command),
            None => false,
        }
    }

    /// Send a command to every tab.
    pub fn broadcast(&mut self, command: Command) {
        let ids: Vec<SocketId> = self.tabs.iter().map(|tab| tab.socket_id).collect();
        for socket_id in ids {
            self.send(socket_id, command.clone());
        }
    }

    pub fn open_uri(&mut self, text: &str) -> bool {
        if let Some(socket_id) = self.current {
            if let Some(tab) = self.tab_mut(socket_id) {
                tab.chrome.address_text = text.to_string();
            }
        }
        self.send_current(Command::OpenUri(text.to_string()))
    }

    pub fn go_back(&mut self) -> bool {
        self.history_go_to(-1)
    }

    pub fn go_forward(&mut self) -> bool {
        self.history_go_to(1)
    }

    pub fn history_go_to(&mut self, offset: i32) -> bool {
        self.send_current(Command::HistoryGoTo(offset))
    }

    pub fn stop(&mut self) -> bool {
        self.send_current(Command::Stop)
    }

    pub fn reload(&mut self, bypass_cache: bool) -> bool {
        if bypass_cache {
            self.send_current(Command::RefreshBypass)
        } else {
            self.send_current(Command::Refresh)
        }
    }

    pub fn find(&mut self, text: &str) -> bool {
        self.send_current(Command::Find(text.to_string()))
    }

    pub fn find_next(&mut self) -> bool {
        self.send_current(Command::FindNext)
    }

    pub fn find_prev(&mut self) -> bool {
        self.send_current(Command::FindPrev)
    }

    pub fn find_finish(&mut self) -> bool {
        if let Some(tab) = self.current.and_then(|id| self.tab_mut(id)) {
            tab.chrome.find_failed = false;
        }
        self.send_current(Command::FindFinish)
    }

    /// Set the minimized/hidden layout flags of the current tab.
    pub fn set_tab_state(&mut self, state: TabState) {
        if let Some(tab) = self.current.and_then(|id| self.tab_mut(id)) {
            tab.state = state;
            tab.session.state = state;
        }
    }

    /// Open a new tab next to the current one.
    pub fn open_new_tab(&mut self, uri: &str, modifiers: GestureModifiers, focus: bool) {
        let private = if modifiers.alt { Some(false) } else { None };
        let index = self
            .current
            .and_then(|id| self.position(id))
            .map(|position| position + 1);

        if modifiers.shift {
            if let Some(current) = self.current().cloned() {
                let request = NewTabRequest {
                    uri: Some(uri.to_string()),
                    focus,
                    private,
                    index: index.map(|i| i as i32).unwrap_or(-1),
                    order: current.order + 1,
                    session_data: None,
                };
                self.send(current.socket_id, Command::NewTab(request));
                return;
            }
        }

        self.make_tab(
            uri,
            TabOptions {
                focus,
                private,
                index,
            },
        );
    }

    // === Focus ===

    /// Switch focus; the new tab's order becomes the previous tab's order + 1.
    pub fn focus_tab(&mut self, socket_id: SocketId) -> bool {
        if self.tab(socket_id).is_none() {
            return false;
        }
        let previous_order = match self.current {
            Some(previous) if previous != socket_id => self.tab(previous).map(|tab| tab.order),
            _ => None,
        };
        for tab in self.tabs.iter_mut() {
            tab.focus = tab.socket_id == socket_id;
            tab.session.focus = tab.focus;
        }
        if let Some(order) = previous_order {
            if let Some(tab) = self.tab_mut(socket_id) {
                tab.order = order + 1;
                tab.session.order = tab.order;
            }
        }
        self.current = Some(socket_id);
        self.refresh_window_title();
        self.send(socket_id, Command::GrabFocus);
        true
    }

    /// Focus the tab at display position `index`.
    pub fn switch_to(&mut self, index: usize) -> bool {
        match self.tabs.get(index).map(|tab| tab.socket_id) {
            Some(socket_id) => self.focus_tab(socket_id),
            None => false,
        }
    }

    /// The most recently active tab other than `closing`.
    pub fn next_focus(&self, closing: SocketId) -> Option<SocketId> {
        self.tabs
            .iter()
            .filter(|tab| tab.socket_id != closing)
            .fold(None::<&TabRecord>, |best, tab| match best {
                Some(best) if best.order >= tab.order => Some(best),
                _ => Some(tab),
            })
            .map(|tab| tab.socket_id)
    }

    fn refresh_window_title(&mut self) {
        if let Some(title) = self.current().map(TabRecord::title_str) {
            self.window_title = title;
        }
    }

    // === Closing ===

    /// Close a tab. `force` (Alt) skips the polite close.
    pub fn close_tab(&mut self, socket_id: SocketId, force: bool) {
        let Some(tab) = self.tab(socket_id) else {
            return;
        };
        let (pid, closing, plug_added) = (tab.pid, tab.closing, tab.plug_added);

        if self.current == Some(socket_id) {
            if let Some(next) = self.next_focus(socket_id) {
                self.focus_tab(next);
            }
        }

        if force {
            self.force_remove(socket_id);
            return;
        }

        if closing {
            if pid == 0 {
                self.remove_tab(socket_id);
            } else {
                self.effects.push(UiEffect::ProbeAlive { socket_id, pid });
            }
            return;
        }

        if !plug_added {
            let siblings = pid != 0 && self.tabs.iter().any(|t| t.pid == pid && t.socket_id != socket_id);
            self.remove_tab(socket_id);
            if !siblings {
                self.terminate(pid);
            }
            return;
        }

        if let Some(tab) = self.tab_mut(socket_id) {
            tab.closing = true;
            tab.subscribed = false;
        }
        self.send(socket_id, Command::Close);
    }

    /// Answer to [`UiEffect::ProbeAlive`].
    pub fn probe_result(&mut self, socket_id: SocketId, alive: bool) {
        if alive {
            info!("Tab {} is hung, terminating its process", socket_id);
        } else {
            info!("Process of tab {} is gone", socket_id);
        }
        self.force_remove(socket_id);
    }

    /// Remove the tab and terminate its process.
    ///
    /// Other tabs served by the same process lose their surface and go
    /// through [`plug_removed`](Self::plug_removed).
    fn force_remove(&mut self, socket_id: SocketId) {
        let Some(pid) = self.tab(socket_id).map(|tab| tab.pid) else {
            return;
        };
        if pid == 0 {
            self.remove_tab(socket_id);
            return;
        }
        let siblings: Vec<SocketId> = self
            .tabs
            .iter()
            .filter(|tab| tab.pid == pid && tab.socket_id != socket_id)
            .map(|tab| tab.socket_id)
            .collect();
        self.terminate(pid);
        for id in siblings {
            self.plug_removed(id);
        }
        self.remove_tab(socket_id);
    }

    /// Request termination of a process at most once.
    fn terminate(&mut self, pid: u32) {
        if pid == 0 || !self.terminated.insert(pid) {
            return;
        }
        self.routes.retain(|(route_pid, _), _| *route_pid != pid);
        self.effects.push(UiEffect::Terminate { pid });
    }

    /// Drop a tab and its route; refocus if it was current.
    fn remove_tab(&mut self, socket_id: SocketId) -> Option<TabRecord> {
        let position = self.position(socket_id)?;
        if self.current == Some(socket_id) {
            match self.next_focus(socket_id) {
                Some(next) => {
                    self.focus_tab(next);
                }
                None => self.current = None,
            }
        }
        let tab = self.tabs.remove(position);
        self.routes.remove(&(tab.pid, tab.channel));
        debug!("Removed tab {}", socket_id);
        if self.tabs.is_empty() {
            self.current = None;
            self.effects.push(UiEffect::Quit);
        }
        Some(tab)
    }

    /// Quit: close every tab, collecting each tab's session as it closes.
    pub fn request_quit(&mut self) {
        self.closing_app = true;
        self.effects.push(UiEffect::ClearClosedSessions);
        if self.tabs.is_empty() {
            self.effects.push(UiEffect::Quit);
            return;
        }
        let ids: Vec<SocketId> = self.tabs.iter().map(|tab| tab.socket_id).collect();
        for (index, socket_id) in ids.iter().enumerate() {
            if let Some(tab) = self.tab_mut(*socket_id) {
                let snapshot = tab.snapshot(index as i32);
                tab.session = snapshot.layout_only();
            }
        }
        for socket_id in ids {
            self.close_tab(socket_id, false);
        }
    }

    /// Drop whatever is left after quitting took too long.
    pub fn force_close_all(&mut self) {
        let ids: Vec<SocketId> = self.tabs.iter().map(|tab| tab.socket_id).collect();
        for socket_id in ids {
            self.force_remove(socket_id);
        }
    }

    // === Recovery ===

    /// A renderer process went away (pipe closed or send failed).
    pub fn renderer_gone(&mut self, pid: u32) {
        let orphans: Vec<SocketId> = self
            .tabs
            .iter()
            .filter(|tab| tab.pid == pid)
            .map(|tab| tab.socket_id)
            .collect();
        if orphans.is_empty() {
            self.terminate(pid);
            return;
        }
        warn!("Renderer {} is gone ({} tabs)", pid, orphans.len());
        for socket_id in orphans {
            self.plug_removed(socket_id);
        }
    }

    /// The tab's embedding surface disappeared without a close.
    pub fn plug_removed(&mut self, socket_id: SocketId) {
        let Some(position) = self.position(socket_id) else {
            return;
        };
        let tab = &self.tabs[position];
        let pid = tab.pid;
        let recover = !tab.closing && !self.closing_app;
        let snapshot = tab.snapshot(position as i32);

        self.terminate(pid);
        if recover {
            info!("Recovering tab {} from process {}", socket_id, pid);
            self.restore_session(snapshot);
        } else if self.closing_app && !snapshot.is_empty() {
            self.effects.push(UiEffect::StoreClosedSession(snapshot));
        }
        self.remove_tab(socket_id);
    }

    /// Reopen a saved or recovered session.
    ///
    /// Sessions that came from the same old process are grouped into the
    /// same new process.
    pub fn restore_session(&mut self, snapshot: SessionSnapshot) -> SocketId {
        let host = (snapshot.pid != 0)
            .then(|| self.pid_map.get(&snapshot.pid).copied())
            .flatten()
            .filter(|id| self.tab(*id).is_some_and(|tab| !tab.closing));

        if let Some(host) = host {
            let mut request = NewTabRequest::from(&snapshot);
            request.uri = Some(snapshot.uri.clone()).filter(|uri| !uri.is_empty());
            self.send(host, Command::NewTab(request));
            return host;
        }

        // Without history the tab just reopens its address.
        let start_uri = if snapshot.is_empty() && !snapshot.uri.is_empty() {
            snapshot.uri.as_str()
        } else {
            "about:blank"
        };
        let socket_id = self.make_tab(
            start_uri,
            TabOptions {
                focus: snapshot.focus,
                private: Some(snapshot.private),
                index: None,
            },
        );
        if let Some(tab) = self.tab_mut(socket_id) {
            tab.order = snapshot.order;
            tab.state = snapshot.state;
            tab.title = snapshot.title.clone();
            tab.uri = snapshot.uri.clone();
            tab.session = snapshot.clone();
        }
        if snapshot.pid != 0 {
            self.pid_map.insert(snapshot.pid, socket_id);
        }
        if !snapshot.is_empty() {
            self.send(socket_id, Command::RestoreSession(snapshot));
        }
        socket_id
    }

    /// Crash-survival snapshots of every tab that has history.
    pub fn snapshots(&self) -> Vec<SessionSnapshot> {
        self.tabs
            .iter()
            .enumerate()
            .map(|(index, tab)| tab.snapshot(index as i32))
            .filter(|snapshot| !snapshot.is_empty())
            .collect()
    }

    // === Inbound events ===

    /// Apply one event from the renderer view `(pid, channel)`.
    pub fn handle_event(&mut self, pid: u32, channel: ChannelId, event: Event) -> Watch {
        let Some(socket_id) = self.route(pid, channel) else {
            debug!("{} from unrouted view {}:{}", event.signal(), pid, channel);
            return Watch::Continue;
        };

        match event {
            Event::Closed(info) => return self.handle_closed(socket_id, info),
            Event::TabInfo(info) => self.handle_tab_info(socket_id, info),
            Event::CreateTab(request) => {
                let index = self.position(socket_id).map(|position| position + 1);
                self.make_tab(
                    &request.uri,
                    TabOptions {
                        focus: request.focus,
                        private: request.private,
                        index,
                    },
                );
            }
            Event::Download(request) => self.effects.push(UiEffect::Download { pid, request }),
            Event::SessionData(session_data) => {
                if let Some(tab) = self.tab_mut(socket_id).filter(|tab| !tab.closing) {
                    tab.session.session_data = session_data;
                }
            }
            Event::Crashed(session_data) => {
                warn!("Renderer view of tab {} crashed and was restored", socket_id);
                if let Some(tab) = self.tab_mut(socket_id).filter(|tab| !tab.closing) {
                    tab.session.session_data = session_data;
                }
            }
            Event::PlugAdded => {
                if let Some(tab) = self.tab_mut(socket_id) {
                    tab.plug_added = true;
                }
            }
            Event::BackForwardList(list) => {
                if let Some(tab) = self.tab_mut(socket_id) {
                    tab.back_list = list.0;
                    tab.current = list.1;
                    tab.forward_list = list.2;
                }
                if !self.closing_app {
                    let snapshots = self.snapshots();
                    self.effects.push(UiEffect::SaveCrashSessions(snapshots));
                }
            }
            other => self.update_display(socket_id, other),
        }
        Watch::Continue
    }

    fn handle_tab_info(&mut self, parent: SocketId, info: TabInfo) {
        let socket_id = self.next_socket_id;
        self.next_socket_id += 1;

        let mut tab = TabRecord::new(socket_id, info.private);
        tab.pid = info.pid;
        tab.channel = info.channel;
        tab.uri = info.uri.clone();
        tab.title = info.uri.clone();
        tab.chrome.address_text = info.uri;
        tab.order = info.order;
        tab.session.order = info.order;

        let index = if info.index >= 0 {
            (info.index as usize).min(self.tabs.len())
        } else {
            self.position(parent).map(|p| p + 1).unwrap_or(self.tabs.len())
        };
        self.tabs.insert(index, tab);
        self.routes.insert((info.pid, info.channel), socket_id);
        info!(
            "Tab {} joined process {} on channel {}",
            socket_id, info.pid, info.channel
        );

        self.send(socket_id, Command::SocketId(socket_id));
        if info.focus {
            self.focus_tab(socket_id);
        }
    }

    fn handle_closed(&mut self, socket_id: SocketId, info: ClosedInfo) -> Watch {
        let Some(position) = self.position(socket_id) else {
            return Watch::Continue;
        };
        let tab = &self.tabs[position];
        let pid = tab.pid;
        if !info.session.is_empty() {
            let mut snapshot = if self.closing_app {
                tab.session.clone()
            } else {
                tab.snapshot(position as i32)
            };
            snapshot.merge_closed(&info.session);
            self.effects.push(UiEffect::StoreClosedSession(snapshot));
        }
        self.remove_tab(socket_id);
        if !self.closing_app {
            let snapshots = self.snapshots();
            self.effects.push(UiEffect::SaveCrashSessions(snapshots));
        }
        if info.is_last {
            self.terminate(pid);
            return Watch::Stop;
        }
        Watch::Continue
    }

    fn update_display(&mut self, socket_id: SocketId, event: Event) {
        let focused = self.current == Some(socket_id);
        let Some(tab) = self.tab_mut(socket_id) else {
            return;
        };
        if !tab.subscribed {
            return;
        }

        match event {
            Event::Title(title) => {
                tab.title = title.clone();
                tab.chrome.tooltip = title;
            }
            Event::Uri(uri) => {
                tab.chrome.address_text = uri.clone();
                tab.uri = uri;
            }
            Event::IsLoading(loading) => tab.is_loading = loading,
            Event::LoadStatus(status) => {
                match status {
                    LoadStatus::Started => {
                        tab.chrome.spinner = true;
                        tab.chrome.action = ReloadAction::Stop;
                        tab.insecure_content = false;
                    }
                    LoadStatus::Finished => {
                        tab.chrome.spinner = false;
                        tab.chrome.action = ReloadAction::Reload;
                        tab.chrome.progress = 0.0;
                    }
                    LoadStatus::Redirected | LoadStatus::Committed => {}
                }
            }
            Event::EstimatedLoadProgress(progress) => {
                tab.chrome.progress = if progress >= 1.0 { 0.0 } else { progress };
            }
            Event::IsSecure(info) => {
                tab.chrome.security =
                    SecurityState::compute(&tab.uri, info.verified(), tab.insecure_content);
                tab.cert_data = info;
            }
            Event::InsecureContent(insecure) => {
                tab.insecure_content = insecure;
                tab.chrome.security = SecurityState::compute(
                    &tab.uri,
                    tab.cert_data.verified(),
                    tab.insecure_content,
                );
            }
            Event::CanGoBack(can) => tab.chrome.can_go_back = can,
            Event::CanGoForward(can) => tab.chrome.can_go_forward = can,
            Event::IconBytes(icon) => tab.icon = icon,
            Event::HoverLink(link) => tab.chrome.hover_uri = link.uri,
            Event::IsPlayingAudio(playing) => tab.chrome.playing_audio = playing,
            Event::FindFailed(failed) => tab.chrome.find_failed = failed,
            Event::TlsError(_) => warn!("TLS error in tab {}", socket_id),
            Event::LoadError(error) => info!("Load error {}: {}", error.uri, error.message),
            Event::MouseMotion => {}
            other => debug!("Unhandled {} for tab {}", other.signal(), socket_id),
        }

        if focused {
            self.refresh_window_title();
        }
    }
}
