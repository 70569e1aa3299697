//! App Core for plugbrowser.
//!
//! The UI process: one cooperative event loop that owns the tab registry,
//! the session manager, the download sink and the content filter store, and
//! talks to renderer processes through the supervisor and their pipes.
//! Every input (renderer events, a renderer going away, user gestures,
//! external-instance requests, finished filter fetches) arrives on a single
//! queue and is handled to completion before the next one.

use std::collections::HashMap;
use std::error::Error;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use log::{debug, error, info, warn};
use serde_json::{json, Value};
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::{ChildStdin, ChildStdout};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::managers::download_manager::{DownloadManager, DownloadManagerTrait};
use crate::managers::session_manager::{SessionManager, SessionManagerTrait};
use crate::managers::tab_registry::{TabOptions, TabRegistry, UiEffect};
use crate::services::content_filter_store::{ContentFilterStore, FilterFetched};
#[cfg(unix)]
use crate::services::instance_socket::{InstanceSocket, Rendezvous};
use crate::services::message_channel::{MessageReader, MessageWriter};
use crate::services::process_supervisor::{
    ProcessLink, RendererLauncher, Supervisor, SupervisorHandle,
};
use crate::services::settings_engine::{SettingsEngine, SettingsEngineTrait};
use crate::types::errors::{ChannelError, FilterError};
use crate::types::protocol::{Command, Envelope, Event, FilterRule};
use crate::types::session::TabState;
use crate::ui::console::{self, FilterKind, Gesture, RestoreTarget};

/// How long quitting waits for tabs to report `closed`.
const QUIT_TIMEOUT: Duration = Duration::from_secs(3);

/// Everything the event loop reacts to.
pub enum AppEvent {
    Renderer { pid: u32, envelope: Envelope<Event> },
    /// The renderer's stdout reached end of stream.
    RendererGone { pid: u32 },
    /// URIs handed over by another invocation.
    External(Vec<String>),
    Gesture(Gesture),
    /// The console input was closed.
    InputClosed,
    FilterFetched {
        name: String,
        source: String,
        result: Result<FilterFetched, FilterError>,
    },
    QuitTimeout,
}

/// Startup options from the command line.
pub struct AppOptions {
    pub profile: String,
    pub verbosity: u8,
    pub renderer_program: PathBuf,
}

/// Central application struct.
pub struct App {
    settings: SettingsEngine,
    sessions: SessionManager,
    downloads: DownloadManager,
    filters: Arc<ContentFilterStore>,
    registry: TabRegistry,
    supervisor: SupervisorHandle<ProcessLink>,
    writers: HashMap<u32, MessageWriter<ChildStdin>>,
    events_tx: mpsc::UnboundedSender<AppEvent>,
    events_rx: mpsc::UnboundedReceiver<AppEvent>,
    instance: Option<(CancellationToken, JoinHandle<()>)>,
    window_title: String,
    quitting: bool,
    finished: bool,
}

impl App {
    /// Open the profile and start the supervisor task.
    ///
    /// Must be called from within a tokio runtime.
    pub fn new(options: AppOptions) -> Result<Self, Box<dyn Error>> {
        let mut settings = SettingsEngine::open(&options.profile)?;
        if let Err(e) = settings.load() {
            error!("{}; using default settings", e);
        }

        let sessions = settings.session_manager();
        let filters = Arc::new(ContentFilterStore::new(settings.content_filters_dir()));
        let registry = TabRegistry::new(settings.init_template());
        let launcher = RendererLauncher::new(options.renderer_program, options.verbosity);
        let supervisor = SupervisorHandle::spawn(Supervisor::new(launcher));
        let (events_tx, events_rx) = mpsc::unbounded_channel();

        Ok(Self {
            settings,
            sessions,
            downloads: DownloadManager::new(),
            filters,
            registry,
            supervisor,
            writers: HashMap::new(),
            events_tx,
            events_rx,
            instance: None,
            window_title: String::new(),
            quitting: false,
            finished: false,
        })
    }

    /// Run until the last tab is gone. Returns early when another instance
    /// accepted `uris`.
    pub async fn run(mut self, uris: Vec<String>) -> Result<(), Box<dyn Error>> {
        if self.forwarded(&uris)? {
            self.supervisor.quit().await;
            return Ok(());
        }

        self.read_console();
        self.startup(uris).await;

        while !self.finished {
            let Some(event) = self.events_rx.recv().await else {
                break;
            };
            self.handle(event).await;
            self.apply_effects().await;
            self.show_title();
        }
        Ok(())
    }

    /// Restore saved sessions, or open the command-line URIs.
    async fn startup(&mut self, uris: Vec<String>) {
        let restored = match self.sessions.load_sessions() {
            Ok(sessions) => sessions,
            Err(e) => {
                error!("{}", e);
                Vec::new()
            }
        };
        info!("Restoring {} sessions", restored.len());
        for session in restored {
            self.registry.restore_session(session);
        }

        if self.registry.is_empty() {
            self.open_uris(uris);
        }

        let config = self.settings.get_config();
        let missing: Vec<(String, String)> = config
            .content_filters
            .iter()
            .filter(|(name, rule)| rule.active() && !self.filters.has(name))
            .map(|(name, rule)| (name.clone(), rule.pattern().to_string()))
            .collect();
        for (name, source) in missing {
            self.fetch_filter(name, source);
        }

        self.apply_effects().await;
    }

    fn open_uris(&mut self, uris: Vec<String>) {
        let home = self.settings.get_config().home_uri.clone();
        let blank = uris.iter().all(|uri| uri == "about:blank") && uris.len() <= 1;
        let uris = if blank { vec![home] } else { uris };
        for (i, uri) in uris.iter().enumerate() {
            self.registry.make_tab(
                uri,
                TabOptions {
                    focus: i == 0,
                    ..TabOptions::default()
                },
            );
        }
    }

    // === Inputs ===

    /// Hand `uris` to a running instance, or become the running instance.
    #[cfg(unix)]
    fn forwarded(&mut self, uris: &[String]) -> Result<bool, Box<dyn Error>> {
        match InstanceSocket::open(&self.settings.socket_file(), uris)? {
            Rendezvous::Forwarded => Ok(true),
            Rendezvous::Bound(socket) => {
                self.listen_external(socket);
                Ok(false)
            }
        }
    }

    #[cfg(not(unix))]
    fn forwarded(&mut self, _uris: &[String]) -> Result<bool, Box<dyn Error>> {
        Ok(false)
    }

    #[cfg(unix)]
    fn listen_external(&mut self, socket: InstanceSocket) {
        let token = CancellationToken::new();
        let cancelled = token.clone();
        let events = self.events_tx.clone();
        let task = tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = cancelled.cancelled() => break,
                    request = socket.recv() => match request {
                        Ok(Some(uris)) => {
                            if events.send(AppEvent::External(uris)).is_err() {
                                break;
                            }
                        }
                        Ok(None) => {}
                        Err(e) => {
                            warn!("Instance socket: {}", e);
                            break;
                        }
                    },
                }
            }
            socket.close();
        });
        self.instance = Some((token, task));
    }

    fn read_console(&self) {
        let events = self.events_tx.clone();
        tokio::spawn(async move {
            let mut lines = BufReader::new(tokio::io::stdin()).lines();
            loop {
                match lines.next_line().await {
                    Ok(Some(line)) => match console::parse_gesture(&line) {
                        Ok(Some(gesture)) => {
                            if events.send(AppEvent::Gesture(gesture)).is_err() {
                                return;
                            }
                        }
                        Ok(None) => {}
                        Err(message) => println!("{}", message),
                    },
                    Ok(None) => break,
                    Err(e) => {
                        warn!("Console input: {}", e);
                        break;
                    }
                }
            }
            let _ = events.send(AppEvent::InputClosed);
        });
    }

    fn read_renderer(&self, pid: u32, stdout: ChildStdout) {
        let events = self.events_tx.clone();
        tokio::spawn(async move {
            let mut reader = MessageReader::new(BufReader::new(stdout));
            loop {
                match reader.recv::<Envelope<Event>>().await {
                    Ok(Some(envelope)) => {
                        if events.send(AppEvent::Renderer { pid, envelope }).is_err() {
                            return;
                        }
                    }
                    Ok(None) => break,
                    Err(ChannelError::Decode(msg)) => warn!("Renderer {}: {}", pid, msg),
                    Err(e) => {
                        warn!("Renderer {}: {}", pid, e);
                        break;
                    }
                }
            }
            let _ = events.send(AppEvent::RendererGone { pid });
        });
    }

    fn fetch_filter(&self, name: String, source: String) {
        let store = Arc::clone(&self.filters);
        let events = self.events_tx.clone();
        tokio::spawn(async move {
            let result = store.fetch_and_save(&name, &source).await;
            let _ = events.send(AppEvent::FilterFetched {
                name,
                source,
                result,
            });
        });
    }

    async fn handle(&mut self, event: AppEvent) {
        match event {
            AppEvent::Renderer { pid, envelope } => {
                let watch = self
                    .registry
                    .handle_event(pid, envelope.channel, envelope.message);
                if !watch.keep_watching() {
                    self.writers.remove(&pid);
                }
            }
            AppEvent::RendererGone { pid } => {
                self.writers.remove(&pid);
                self.registry.renderer_gone(pid);
            }
            AppEvent::External(uris) => {
                if !self.quitting {
                    self.open_uris(uris);
                }
            }
            AppEvent::Gesture(gesture) => self.handle_gesture(gesture),
            AppEvent::InputClosed => self.request_quit(),
            AppEvent::FilterFetched {
                name,
                source,
                result,
            } => match result {
                Ok(fetched) => {
                    println!("filter list {} ready ({} rules)", fetched.name, fetched.rules);
                    self.registry
                        .broadcast(Command::ContentFilter(name, source, true));
                }
                Err(FilterError::Cancelled) => debug!("Fetch of {} cancelled", name),
                Err(e) => println!("filter list {}: {}", name, e),
            },
            AppEvent::QuitTimeout => {
                if !self.finished {
                    warn!("Tabs did not close in time; forcing");
                    self.registry.force_close_all();
                }
            }
        }
    }

    fn handle_gesture(&mut self, gesture: Gesture) {
        if self.quitting {
            return;
        }
        let registry = &mut self.registry;
        let delivered = match gesture {
            Gesture::Open(text) => registry.open_uri(&text),
            Gesture::NewTab { uri, modifiers } => {
                registry.open_new_tab(&uri, modifiers, true);
                true
            }
            Gesture::Close { index, force } => {
                let target = match index {
                    Some(index) => registry.tabs().get(index).map(|tab| tab.socket_id),
                    None => registry.current_id(),
                };
                match target {
                    Some(socket_id) => {
                        registry.close_tab(socket_id, force);
                        true
                    }
                    None => false,
                }
            }
            Gesture::Switch(index) => registry.switch_to(index),
            Gesture::Back => registry.go_back(),
            Gesture::Forward => registry.go_forward(),
            Gesture::Go(offset) => registry.history_go_to(offset),
            Gesture::Stop => registry.stop(),
            Gesture::Reload { bypass_cache } => registry.reload(bypass_cache),
            Gesture::Find(text) => {
                let sent = registry.find(&text);
                if let Err(e) = self.settings.set_value("find-str", json!(text)) {
                    warn!("{}", e);
                }
                sent
            }
            Gesture::FindNext => registry.find_next(),
            Gesture::FindPrev => registry.find_prev(),
            Gesture::FindDone => registry.find_finish(),
            Gesture::Set { key, value } => {
                self.apply_setting(&key, value);
                true
            }
            Gesture::Filter {
                kind,
                name,
                pattern,
                active,
            } => {
                self.apply_filter(kind, &name, &pattern, active);
                true
            }
            Gesture::Sessions => {
                println!("{}", console::render_sessions(self.sessions.closed_sessions()));
                true
            }
            Gesture::Restore(target) => {
                let sessions = match target {
                    RestoreTarget::All => Ok(self.sessions.restore_all()),
                    RestoreTarget::Indices(indices) => self.sessions.restore_selected(&indices),
                };
                match sessions {
                    Ok(sessions) => {
                        for session in sessions {
                            self.registry.restore_session(session);
                        }
                    }
                    Err(e) => println!("{}", e),
                }
                true
            }
            Gesture::Tabs => {
                println!("{}", console::render_tabs(registry));
                true
            }
            Gesture::Minimize => {
                let state = current_state(registry);
                registry.set_tab_state(TabState {
                    minimized: !state.minimized,
                    ..state
                });
                true
            }
            Gesture::Hide => {
                let state = current_state(registry);
                registry.set_tab_state(TabState {
                    hidden: !state.hidden,
                    ..state
                });
                true
            }
            Gesture::Quit => {
                self.request_quit();
                true
            }
            Gesture::Help => {
                println!("{}", console::HELP);
                true
            }
        };
        if !delivered {
            println!("no such tab");
        }
    }

    /// Change a profile setting and push it to the running renderers.
    fn apply_setting(&mut self, key: &str, value: Value) {
        if let Err(e) = self.settings.set_value(key, value.clone()) {
            println!("{}", e);
            return;
        }
        let config = self.settings.get_config();
        let (table, name) = key.split_once('.').unwrap_or((key, ""));
        let command = match table {
            "web-view-settings" if !name.is_empty() => {
                Some(Command::WebViewSettings(name.to_string(), value))
            }
            "search" | "default-search" => {
                Some(Command::DefaultSearch(config.search_url().to_string()))
            }
            "user-agents" | "default-user-agent" => Some(Command::WebViewSettings(
                "user-agent".to_string(),
                json!(config.user_agent()),
            )),
            "adblock" | "media-filters" | "content-filter-whitelist" if !name.is_empty() => {
                serde_json::from_value::<FilterRule>(value).ok().map(|rule| {
                    let kind = match table {
                        "adblock" => FilterKind::Adblock,
                        "media-filters" => FilterKind::Media,
                        _ => FilterKind::Whitelist,
                    };
                    kind.command(name, rule.pattern(), rule.active())
                })
            }
            _ => None,
        };
        *self.registry.template_mut() = self.settings.init_template();
        if let Some(command) = command {
            self.registry.broadcast(command);
        }
    }

    fn apply_filter(&mut self, kind: FilterKind, name: &str, pattern: &str, active: bool) {
        if kind != FilterKind::Content {
            if let Err(e) = regex::Regex::new(pattern) {
                println!("invalid pattern: {}", e);
                return;
            }
        }
        let key = format!("{}.{}", kind.config_key(), name);
        if let Err(e) = self.settings.set_value(&key, json!([pattern, active])) {
            println!("{}", e);
            return;
        }
        *self.registry.template_mut() = self.settings.init_template();

        if kind != FilterKind::Content {
            self.registry.broadcast(kind.command(name, pattern, active));
            return;
        }
        if active {
            self.fetch_filter(name.to_string(), pattern.to_string());
        } else {
            if let Err(e) = self.filters.remove(name) {
                warn!("{}", e);
            }
            self.registry.broadcast(kind.command(name, pattern, false));
        }
    }

    // === Effects ===

    async fn apply_effects(&mut self) {
        loop {
            let effects = self.registry.take_effects();
            if effects.is_empty() {
                break;
            }
            for effect in effects {
                self.apply(effect).await;
            }
        }
    }

    async fn apply(&mut self, effect: UiEffect) {
        match effect {
            UiEffect::Spawn { socket_id, init } => match self.supervisor.new_proc().await {
                Ok((pid, link)) => {
                    let ProcessLink { stdin, stdout, .. } = link;
                    let mut writer = MessageWriter::new(stdin);
                    self.read_renderer(pid, stdout);
                    if let Err(e) = writer.send(&init).await {
                        warn!("Renderer {} did not take its payload: {}", pid, e);
                    }
                    self.writers.insert(pid, writer);
                    self.registry.process_started(socket_id, pid);
                }
                Err(e) => {
                    error!("{}", e);
                    self.registry.process_failed(socket_id);
                }
            },
            UiEffect::Send {
                pid,
                channel,
                command,
            } => {
                let Some(writer) = self.writers.get_mut(&pid) else {
                    debug!("No channel to {} for {}", pid, command.signal());
                    return;
                };
                if let Err(e) = writer.send(&Envelope::new(channel, command)).await {
                    warn!("Send to renderer {} failed: {}", pid, e);
                    self.writers.remove(&pid);
                    if e.is_broken() {
                        self.registry.renderer_gone(pid);
                    }
                }
            }
            UiEffect::Terminate { pid } => {
                self.writers.remove(&pid);
                self.supervisor.terminate(pid);
            }
            UiEffect::ProbeAlive { socket_id, pid } => {
                let alive = self.supervisor.is_alive(pid).await;
                self.registry.probe_result(socket_id, alive);
            }
            UiEffect::SaveCrashSessions(snapshots) => {
                if let Err(e) = self.sessions.save_sessions(&snapshots, true) {
                    error!("{}", e);
                }
            }
            UiEffect::StoreClosedSession(snapshot) => {
                if let Err(e) = self.sessions.add_session(snapshot) {
                    warn!("{}", e);
                }
            }
            UiEffect::ClearClosedSessions => self.sessions.clear(),
            UiEffect::Download { pid, request } => {
                let uri = request.uri.clone();
                let id = self.downloads.add_request(pid, request);
                println!("download {}: {}", id, uri);
            }
            UiEffect::Quit => self.finish().await,
        }
    }

    // === Quitting ===

    fn request_quit(&mut self) {
        if self.quitting {
            return;
        }
        info!("Quitting");
        self.quitting = true;
        self.registry.request_quit();

        let events = self.events_tx.clone();
        tokio::spawn(async move {
            tokio::time::sleep(QUIT_TIMEOUT).await;
            let _ = events.send(AppEvent::QuitTimeout);
        });
    }

    async fn finish(&mut self) {
        if self.finished {
            return;
        }
        self.finished = true;

        if self.registry.is_closing_app() {
            if let Err(e) = self.sessions.save_sessions(self.sessions.closed_sessions(), false) {
                error!("{}", e);
            }
        }
        if let Err(e) = self.sessions.discard_crash_file() {
            error!("{}", e);
        }

        let cancelled = self.downloads.cancel_all();
        if cancelled > 0 {
            info!("Cancelled {} downloads", cancelled);
        }
        self.filters.cancel_all();
        self.writers.clear();
        self.supervisor.quit().await;

        if self.settings.get_config().clear_on_exit {
            if let Err(e) = self.settings.clear_website_data() {
                error!("{}", e);
            }
        }

        if let Some((token, task)) = self.instance.take() {
            token.cancel();
            if let Err(e) = task.await {
                warn!("Instance socket task: {}", e);
            }
        }
        info!("Bye");
    }

    /// Print the window title when it changed.
    fn show_title(&mut self) {
        let title = self.registry.window_title();
        if !self.finished && title != self.window_title {
            self.window_title = title.to_string();
            println!("== {} ==", self.window_title);
        }
    }
}

fn current_state(registry: &TabRegistry) -> TabState {
    registry.current().map(|tab| tab.state).unwrap_or_default()
}
