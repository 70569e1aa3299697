//! Renderer (plug) process state.
//!
//! A [`RendererProcess`] hosts one or more views. Each view wraps one render
//! engine and is addressed over the process pipe by its channel id. Commands
//! from the UI are applied with [`RendererProcess::handle_command`]; engine
//! callbacks are turned into outbound events by [`RendererProcess::pump`].
//! Outbound events collect in an outbox that the process loop flushes to the
//! pipe after every step.

use std::collections::{BTreeMap, HashMap};
use std::path::PathBuf;
use std::rc::Rc;

use base64::{engine::general_purpose::STANDARD as BASE64, Engine as _};
use log::{debug, info, warn};
use serde_json::Value;

use crate::services::address::{resolve_input, LoadTarget};
use crate::services::content_policy::{
    ContentBlocker, ContentPolicy, FilterTable, NavigationVerdict, ResponseVerdict,
};
use crate::services::message_channel::Watch;
use crate::services::render_engine::{
    Decision, EngineEvent, EngineFactory, NetworkContext, PolicyRequest, RenderEngine,
    WEBSITE_DATA_DIR,
};
use crate::types::protocol::{
    ChannelId, ClosedInfo, Command, CreateTabRequest, DownloadRequest, Envelope, Event, HoverLink,
    InitPayload, LoadErrorInfo, LoadStatus, NewTabRequest, SocketId, TabInfo, INITIAL_CHANNEL,
};
use crate::types::session::{ClosedSession, SessionSnapshot};

/// Upper bound on engine event rounds handled in one pump.
const MAX_PUMP_ROUNDS: usize = 256;

/// Embedding surface of a view, created once the UI has allocated its id.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Plug {
    pub socket_id: SocketId,
}

/// One render engine instance hosted by the process.
pub struct ViewRecord<E> {
    pub channel: ChannelId,
    /// 0 until the UI assigns an embedding id.
    pub socket_id: SocketId,
    pub engine: E,
    pub plug: Option<Plug>,
    /// Engine callbacks are only processed while subscribed.
    pub subscribed: bool,
    pub private: bool,
    pub insecure_content: bool,
    /// Navigation state captured just before teardown.
    pub session: Option<ClosedSession>,
}

/// State of one renderer process.
pub struct RendererProcess<F: EngineFactory> {
    pid: u32,
    private: bool,
    settings: BTreeMap<String, Value>,
    search_url: String,
    user_agent: String,
    policy: ContentPolicy,
    content_filters_path: Option<PathBuf>,
    website_data_dir: Option<PathBuf>,
    views: BTreeMap<ChannelId, ViewRecord<F::Engine>>,
    next_channel: ChannelId,
    factory: F,
    contexts: HashMap<bool, Rc<NetworkContext>>,
    outbox: Vec<Envelope<Event>>,
    finished: bool,
}

impl<F: EngineFactory> RendererProcess<F> {
    /// Build the process from its startup payload and open the first view.
    pub fn new(init: InitPayload, factory: F, pid: u32) -> Self {
        let mut content = ContentBlocker::new(FilterTable::from_rules(&init.content_filter_whitelist));
        if let Some(dir) = &init.content_filters_path {
            for name in &init.content_filters {
                if let Err(e) = content.load_from_dir(dir, name) {
                    warn!("Content filter {} not loaded: {}", name, e);
                }
            }
        }
        let policy = ContentPolicy::new(
            FilterTable::from_rules(&init.adblock_filters),
            FilterTable::from_rules(&init.media_filters),
            content,
        );

        let mut process = Self {
            pid,
            private: init.private,
            settings: init.web_view_settings,
            search_url: init.search_url,
            user_agent: init.user_agent,
            policy,
            content_filters_path: init.content_filters_path,
            website_data_dir: init
                .profile_path
                .map(|profile| profile.join(WEBSITE_DATA_DIR)),
            views: BTreeMap::new(),
            next_channel: INITIAL_CHANNEL,
            factory,
            contexts: HashMap::new(),
            outbox: Vec::new(),
            finished: false,
        };

        let channel = process.create_view(init.socket_id, init.private);
        info!("Renderer {} started (private: {})", pid, init.private);
        process.load(channel, &init.uri);
        process.pump();
        process
    }

    pub fn pid(&self) -> u32 {
        self.pid
    }

    pub fn is_private(&self) -> bool {
        self.private
    }

    /// True once the last view is gone.
    pub fn is_finished(&self) -> bool {
        self.finished
    }

    pub fn channels(&self) -> Vec<ChannelId> {
        self.views.keys().copied().collect()
    }

    pub fn view(&self, channel: ChannelId) -> Option<&ViewRecord<F::Engine>> {
        self.views.get(&channel)
    }

    pub fn engine_mut(&mut self, channel: ChannelId) -> Option<&mut F::Engine> {
        self.views.get_mut(&channel).map(|view| &mut view.engine)
    }

    pub fn search_url(&self) -> &str {
        &self.search_url
    }

    pub fn policy(&self) -> &ContentPolicy {
        &self.policy
    }

    /// Take every event produced since the last drain.
    pub fn drain_outbox(&mut self) -> Vec<Envelope<Event>> {
        std::mem::take(&mut self.outbox)
    }

    fn emit(&mut self, channel: ChannelId, event: Event) {
        if event.is_chatty() {
            debug!("[{}:{}] -> {}", self.pid, channel, event.signal());
        } else {
            info!("[{}:{}] -> {}", self.pid, channel, event.signal());
        }
        self.outbox.push(Envelope::new(channel, event));
    }

    /// One shared context per privacy mode.
    fn context_for(&mut self, private: bool) -> Rc<NetworkContext> {
        if let Some(context) = self.contexts.get(&private) {
            return Rc::clone(context);
        }
        let mut context = NetworkContext::new(self.contexts.len() as u64 + 1, private);
        if let Some(dir) = self.website_data_dir.clone().filter(|_| !private) {
            if let Err(e) = std::fs::create_dir_all(&dir) {
                warn!("Can't create {}: {}", dir.display(), e);
            }
            context = context.with_data_dir(dir);
        }
        let context = Rc::new(context);
        self.contexts.insert(private, Rc::clone(&context));
        context
    }

    fn new_engine(&mut self, private: bool) -> F::Engine {
        let context = self.context_for(private);
        let mut engine = self.factory.create(&context);
        for (name, value) in &self.settings {
            if let Err(e) = engine.set_setting(name, value) {
                warn!("Setting {} not applied: {}", name, e);
            }
        }
        if !self.user_agent.is_empty() {
            let agent = Value::String(self.user_agent.clone());
            if let Err(e) = engine.set_setting("user-agent", &agent) {
                warn!("User agent not applied: {}", e);
            }
        }
        if private {
            if let Err(e) = engine.set_setting("enable-private-browsing", &Value::Bool(true)) {
                warn!("Private browsing not enabled: {}", e);
            }
        }
        engine
    }

    fn create_view(&mut self, socket_id: SocketId, private: bool) -> ChannelId {
        let channel = self.next_channel;
        self.next_channel += 1;
        let engine = self.new_engine(private);
        self.views.insert(
            channel,
            ViewRecord {
                channel,
                socket_id: 0,
                engine,
                plug: None,
                subscribed: true,
                private,
                insecure_content: false,
                session: None,
            },
        );
        if socket_id != 0 {
            self.attach_plug(channel, socket_id);
        }
        channel
    }

    fn attach_plug(&mut self, channel: ChannelId, socket_id: SocketId) {
        let Some(view) = self.views.get_mut(&channel) else {
            return;
        };
        view.socket_id = socket_id;
        if view.plug.is_none() {
            view.plug = Some(Plug { socket_id });
            self.emit(channel, Event::PlugAdded);
        }
    }

    /// Serialized navigation state of a view, empty while it is blank.
    pub fn get_session(&self, channel: ChannelId) -> Option<String> {
        self.views.get(&channel).map(|view| session_of(&view.engine))
    }

    /// Apply one command from the UI to the view on `channel`.
    pub fn handle_command(&mut self, channel: ChannelId, command: Command) -> Watch {
        if !self.views.contains_key(&channel) {
            debug!("Command {} for unknown channel {}", command.signal(), channel);
            return Watch::from(!self.finished);
        }
        debug!("[{}:{}] <- {}", self.pid, channel, command.signal());

        match command {
            Command::Close => self.close_view(channel),
            Command::GrabFocus => debug!("View {} grabbed focus", channel),
            Command::OpenUri(input) => self.load(channel, &input),
            Command::NewTab(request) => {
                self.new_tab(channel, request);
            }
            Command::SocketId(socket_id) => self.attach_plug(channel, socket_id),
            Command::Stop => self.with_engine(channel, |engine| engine.stop_loading()),
            Command::Refresh => self.with_engine(channel, |engine| engine.reload(false)),
            Command::RefreshBypass => self.with_engine(channel, |engine| engine.reload(true)),
            Command::HistoryGoTo(offset) => {
                self.with_engine(channel, |engine| engine.go_to_history(offset))
            }
            Command::Find(text) => self.with_engine(channel, |engine| engine.find(&text)),
            Command::FindNext => self.with_engine(channel, |engine| engine.find_next()),
            Command::FindPrev => self.with_engine(channel, |engine| engine.find_prev()),
            Command::FindFinish => self.with_engine(channel, |engine| engine.find_finish()),
            Command::RestoreSession(snapshot) => self.restore_session(channel, snapshot),
            Command::GetSession => {
                let session = self.get_session(channel).unwrap_or_default();
                self.emit(channel, Event::SessionData(session));
            }
            Command::WebViewSettings(name, value) => self.apply_setting(name, value),
            Command::DefaultSearch(template) => self.search_url = template,
            Command::Adblock(name, pattern, active) => {
                if let Err(e) = self.policy.adblock_mut().set(&name, &pattern, active) {
                    warn!("Adblock filter {} rejected: {}", name, e);
                }
            }
            Command::MediaFilter(name, pattern, active) => {
                if let Err(e) = self.policy.media_mut().set(&name, &pattern, active) {
                    warn!("Media filter {} rejected: {}", name, e);
                }
            }
            Command::ContentFilter(name, _source, active) => self.toggle_content_filter(&name, active),
            Command::ContentFilterWhitelist(name, pattern, active) => {
                let whitelist = self.policy.content_mut().whitelist_mut();
                if let Err(e) = whitelist.set(&name, &pattern, active) {
                    warn!("Whitelist entry {} rejected: {}", name, e);
                }
            }
        }

        self.pump();
        Watch::from(!self.finished)
    }

    fn with_engine(&mut self, channel: ChannelId, f: impl FnOnce(&mut F::Engine)) {
        if let Some(view) = self.views.get_mut(&channel) {
            f(&mut view.engine);
        }
    }

    fn apply_setting(&mut self, name: String, value: Value) {
        if name == "user-agent" {
            self.user_agent = value.as_str().unwrap_or_default().to_string();
        }
        for view in self.views.values_mut() {
            if let Err(e) = view.engine.set_setting(&name, &value) {
                warn!("Setting {} not applied: {}", name, e);
            }
        }
        self.settings.insert(name, value);
    }

    fn toggle_content_filter(&mut self, name: &str, active: bool) {
        let content = self.policy.content_mut();
        if !active {
            content.unload_list(name);
            return;
        }
        match &self.content_filters_path {
            Some(dir) => {
                if let Err(e) = content.load_from_dir(dir, name) {
                    warn!("Content filter {} not loaded: {}", name, e);
                }
            }
            None => warn!("No content filter directory for {}", name),
        }
    }

    /// Load address bar input into a view.
    fn load(&mut self, channel: ChannelId, input: &str) {
        match resolve_input(input, &self.search_url) {
            LoadTarget::Nothing => {}
            LoadTarget::Html(html) => self.with_engine(channel, |engine| engine.load_html(&html)),
            LoadTarget::Uri(uri) => {
                self.with_engine(channel, |engine| engine.load_uri(&uri));
                self.emit(channel, Event::Title(uri));
            }
        }
    }

    /// Tear a view down; the last view ends the process.
    fn close_view(&mut self, channel: ChannelId) {
        let Some(view) = self.views.get_mut(&channel) else {
            return;
        };
        view.subscribed = false;
        let session = ClosedSession {
            session_data: session_of(&view.engine),
            title: view.engine.title().unwrap_or_default(),
            uri: view.engine.uri().unwrap_or_default(),
        };
        view.session = Some(session.clone());
        view.engine.stop_loading();
        view.engine.take_events();
        view.plug = None;

        self.views.remove(&channel);
        let is_last = self.views.is_empty();
        self.emit(channel, Event::Closed(ClosedInfo { session, is_last }));
        if is_last {
            info!("Renderer {} closed its last view", self.pid);
            self.finished = true;
        }
    }

    /// Open a sibling view in this process and announce it on `parent`.
    fn new_tab(&mut self, parent: ChannelId, request: NewTabRequest) -> ChannelId {
        let parent_private = self
            .views
            .get(&parent)
            .map(|view| view.private)
            .unwrap_or(self.private);
        let private = request.private.unwrap_or(parent_private);
        let channel = self.create_view(0, private);

        self.emit(
            parent,
            Event::TabInfo(TabInfo {
                uri: request.uri.clone().unwrap_or_default(),
                pid: self.pid,
                channel,
                focus: request.focus,
                private,
                index: request.index,
                order: request.order,
            }),
        );

        match (&request.session_data, &request.uri) {
            (Some(data), uri) if !data.is_empty() => {
                if !self.replay_session(channel, data) {
                    if let Some(uri) = uri {
                        self.load(channel, uri);
                    }
                }
            }
            (_, Some(uri)) => self.load(channel, uri),
            _ => {}
        }
        channel
    }

    /// Decode and restore session data into a view's engine.
    fn replay_session(&mut self, channel: ChannelId, session_data: &str) -> bool {
        let bytes = match BASE64.decode(session_data.as_bytes()) {
            Ok(bytes) => bytes,
            Err(e) => {
                warn!("Session for view {} is not base64: {}", channel, e);
                return false;
            }
        };
        let Some(view) = self.views.get_mut(&channel) else {
            return false;
        };
        match view.engine.restore_session_state(&bytes) {
            Ok(()) => true,
            Err(e) => {
                warn!("Session for view {} not restored: {}", channel, e);
                false
            }
        }
    }

    /// Restore in place when the view is blank, else in a new sibling view.
    fn restore_session(&mut self, channel: ChannelId, snapshot: SessionSnapshot) {
        let blank = self
            .views
            .get(&channel)
            .map(|view| view.engine.is_blank())
            .unwrap_or(false);
        if blank {
            // An empty session leaves the view blank.
            if snapshot.is_empty() {
                return;
            }
            if !self.replay_session(channel, &snapshot.session_data) {
                if !snapshot.uri.is_empty() {
                    self.load(channel, &snapshot.uri);
                }
                return;
            }
            self.send_back_forward(channel);
        } else {
            let mut request = NewTabRequest::from(&snapshot);
            request.uri = Some(snapshot.uri.clone()).filter(|uri| !uri.is_empty());
            self.new_tab(channel, request);
        }
    }

    /// History sync sent after every completed load and restore.
    fn send_back_forward(&mut self, channel: ChannelId) {
        let Some(view) = self.views.get(&channel) else {
            return;
        };
        let session = session_of(&view.engine);
        let can_go_back = view.engine.can_go_back();
        let can_go_forward = view.engine.can_go_forward();
        let list = view.engine.back_forward_list();
        self.emit(channel, Event::SessionData(session));
        self.emit(channel, Event::CanGoBack(can_go_back));
        self.emit(channel, Event::CanGoForward(can_go_forward));
        self.emit(channel, Event::BackForwardList(list));
    }

    fn verify_view(&mut self, channel: ChannelId) {
        if let Some(view) = self.views.get(&channel) {
            let info = view.engine.tls_info();
            self.emit(channel, Event::IsSecure(info));
        }
    }

    /// Replace a crashed engine and replay its session into the new one.
    fn recover_crash(&mut self, channel: ChannelId) {
        let Some(view) = self.views.get(&channel) else {
            return;
        };
        let private = view.private;
        let session = session_of(&view.engine);
        warn!("Engine of view {} crashed, restoring", channel);
        self.emit(channel, Event::Crashed(session.clone()));

        let engine = self.new_engine(private);
        if let Some(view) = self.views.get_mut(&channel) {
            view.engine = engine;
            view.insecure_content = false;
        }
        if !session.is_empty() {
            self.replay_session(channel, &session);
        }
    }

    /// Process engine callbacks until every engine is quiet.
    pub fn pump(&mut self) {
        for _ in 0..MAX_PUMP_ROUNDS {
            let mut batch = Vec::new();
            for (channel, view) in self.views.iter_mut() {
                let events = view.engine.take_events();
                if view.subscribed && !events.is_empty() {
                    batch.push((*channel, events));
                }
            }
            if batch.is_empty() {
                return;
            }
            for (channel, events) in batch {
                for event in events {
                    self.handle_engine_event(channel, event);
                }
            }
        }
        warn!("Renderer {} engines still busy after pump", self.pid);
    }

    fn handle_engine_event(&mut self, channel: ChannelId, event: EngineEvent) {
        if !self.views.get(&channel).is_some_and(|view| view.subscribed) {
            return;
        }
        match event {
            EngineEvent::PolicyDecision { id, request } => self.decide(channel, id, request),
            EngineEvent::LoadChanged(status) => {
                if status == LoadStatus::Started {
                    if let Some(view) = self.views.get_mut(&channel) {
                        view.insecure_content = false;
                    }
                }
                self.emit(channel, Event::LoadStatus(status));
                if status == LoadStatus::Finished {
                    self.send_back_forward(channel);
                    self.verify_view(channel);
                }
            }
            EngineEvent::TitleChanged(title) => self.emit(channel, Event::Title(title)),
            EngineEvent::UriChanged(uri) => self.emit(channel, Event::Uri(uri)),
            EngineEvent::ProgressChanged(progress) => {
                self.emit(channel, Event::EstimatedLoadProgress(progress))
            }
            EngineEvent::IsLoadingChanged(loading) => self.emit(channel, Event::IsLoading(loading)),
            EngineEvent::IsPlayingAudioChanged(playing) => {
                self.emit(channel, Event::IsPlayingAudio(playing))
            }
            EngineEvent::FaviconChanged => {
                let icon = self
                    .views
                    .get(&channel)
                    .map(|view| view.engine.favicon_png())
                    .unwrap_or_default();
                self.emit(channel, Event::IconBytes(icon));
            }
            EngineEvent::ResourceLoadStarted {
                uri,
                mime_type,
                content_length,
            } => self.resource_started(channel, uri, mime_type, content_length),
            EngineEvent::InsecureContentDetected => {
                if let Some(view) = self.views.get_mut(&channel) {
                    view.insecure_content = true;
                }
                self.emit(channel, Event::InsecureContent(true));
            }
            EngineEvent::TlsErrors { uri } => {
                warn!("TLS errors loading {}", uri);
                self.emit(channel, Event::TlsError(true));
            }
            EngineEvent::LoadFailed { uri, message } => {
                self.emit(channel, Event::LoadError(LoadErrorInfo { uri, message }))
            }
            EngineEvent::MouseTargetChanged { uri, title } => {
                self.emit(channel, Event::HoverLink(HoverLink { uri, title }))
            }
            EngineEvent::FoundText(_) => self.emit(channel, Event::FindFailed(false)),
            EngineEvent::FailedToFindText => self.emit(channel, Event::FindFailed(true)),
            EngineEvent::PermissionRequested { id, permission } => {
                info!("Denying {} permission for view {}", permission, channel);
                self.with_engine(channel, |engine| engine.decide(id, Decision::Ignore));
            }
            EngineEvent::WebProcessCrashed => self.recover_crash(channel),
            EngineEvent::MouseMotion => self.emit(channel, Event::MouseMotion),
        }
    }

    fn decide(&mut self, channel: ChannelId, id: u64, request: PolicyRequest) {
        let Some(view) = self.views.get(&channel) else {
            return;
        };
        let page_uri = view.engine.uri().unwrap_or_default();
        let private = view.private;

        match request {
            PolicyRequest::Navigation(action) => {
                match self.policy.decide_navigation(&action, &page_uri, private) {
                    NavigationVerdict::Allow => {
                        self.with_engine(channel, |engine| engine.decide(id, Decision::Use))
                    }
                    NavigationVerdict::Block => {
                        self.with_engine(channel, |engine| engine.decide(id, Decision::Ignore))
                    }
                    NavigationVerdict::OpenInNewTab {
                        same_process,
                        private,
                    } => {
                        self.with_engine(channel, |engine| engine.decide(id, Decision::Ignore));
                        if same_process {
                            let request = NewTabRequest {
                                uri: Some(action.uri),
                                private,
                                ..NewTabRequest::default()
                            };
                            self.new_tab(channel, request);
                        } else {
                            self.emit(
                                channel,
                                Event::CreateTab(CreateTabRequest {
                                    uri: action.uri,
                                    focus: false,
                                    private,
                                }),
                            );
                        }
                    }
                }
            }
            PolicyRequest::Response(response) => {
                let supported = view.engine.is_mime_type_supported(&response.mime_type);
                match self
                    .policy
                    .decide_response(&response, &page_uri, private, supported)
                {
                    ResponseVerdict::Allow => {
                        self.with_engine(channel, |engine| engine.decide(id, Decision::Use))
                    }
                    ResponseVerdict::Block => {
                        self.with_engine(channel, |engine| engine.decide(id, Decision::Ignore))
                    }
                    ResponseVerdict::Download => {
                        self.with_engine(channel, |engine| engine.decide(id, Decision::Ignore));
                        let filename = if response.suggested_filename.is_empty() {
                            last_segment(&response.uri)
                        } else {
                            response.suggested_filename
                        };
                        let download = DownloadRequest {
                            uri: response.uri,
                            filename,
                            mime_type: response.mime_type,
                            length: response.content_length,
                            user_agent: self.user_agent.clone(),
                            start: true,
                        };
                        self.emit(channel, Event::Download(download));
                    }
                }
            }
        }
    }

    fn resource_started(
        &mut self,
        channel: ChannelId,
        uri: String,
        mime_type: String,
        content_length: u64,
    ) {
        let page_uri = self
            .views
            .get(&channel)
            .and_then(|view| view.engine.uri())
            .unwrap_or_default();
        let verdict = self.policy.inspect_resource(&uri, &page_uri);
        if verdict.media {
            info!("Media filter matched: {}", uri);
            let download = DownloadRequest {
                filename: last_segment(&uri),
                uri,
                mime_type,
                length: content_length,
                user_agent: self.user_agent.clone(),
                start: false,
            };
            self.emit(channel, Event::Download(download));
        }
        if verdict.insecure {
            if let Some(view) = self.views.get_mut(&channel) {
                view.insecure_content = true;
            }
            self.emit(channel, Event::InsecureContent(true));
        }
    }
}

/// Base64 session state of an engine, empty while the engine is blank.
fn session_of<E: RenderEngine>(engine: &E) -> String {
    if engine.is_blank() {
        String::new()
    } else {
        BASE64.encode(engine.session_state())
    }
}

fn last_segment(uri: &str) -> String {
    let path = uri.split(['?', '#']).next().unwrap_or(uri);
    path.rsplit('/').next().unwrap_or_default().to_string()
}
