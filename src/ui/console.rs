//! Console chrome.
//!
//! Parses one line of user input into a [`Gesture`] and renders the tab
//! strip and the closed-session list as text.

use serde_json::Value;

use crate::managers::tab_registry::{GestureModifiers, TabRegistry};
use crate::types::protocol::Command;
use crate::types::session::SessionSnapshot;
use crate::types::tab::{InsecureReason, ReloadAction, SecurityState, TabRecord};

/// Which filter table a filter gesture edits.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FilterKind {
    Adblock,
    Media,
    Content,
    Whitelist,
}

impl FilterKind {
    /// Key of the table in the profile config.
    pub fn config_key(self) -> &'static str {
        match self {
            FilterKind::Adblock => "adblock",
            FilterKind::Media => "media-filters",
            FilterKind::Content => "content-filters",
            FilterKind::Whitelist => "content-filter-whitelist",
        }
    }

    pub fn command(self, name: &str, pattern: &str, active: bool) -> Command {
        let (name, pattern) = (name.to_string(), pattern.to_string());
        match self {
            FilterKind::Adblock => Command::Adblock(name, pattern, active),
            FilterKind::Media => Command::MediaFilter(name, pattern, active),
            FilterKind::Content => Command::ContentFilter(name, pattern, active),
            FilterKind::Whitelist => Command::ContentFilterWhitelist(name, pattern, active),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RestoreTarget {
    All,
    Indices(Vec<usize>),
}

/// A user gesture.
#[derive(Debug, Clone, PartialEq)]
pub enum Gesture {
    /// Load address-bar text in the current tab.
    Open(String),
    NewTab {
        uri: String,
        modifiers: GestureModifiers,
    },
    /// Close the tab at a display position, or the current one.
    Close { index: Option<usize>, force: bool },
    Switch(usize),
    Back,
    Forward,
    Go(i32),
    Stop,
    Reload { bypass_cache: bool },
    Find(String),
    FindNext,
    FindPrev,
    FindDone,
    Set { key: String, value: Value },
    Filter {
        kind: FilterKind,
        name: String,
        pattern: String,
        active: bool,
    },
    Sessions,
    Restore(RestoreTarget),
    Tabs,
    Minimize,
    Hide,
    Quit,
    Help,
}

pub const HELP: &str = "\
open TEXT            load an address or search in the current tab
tab[+][!] [URI]      new tab (+ same process, ! not private)
close[!] [N]         close tab N or the current tab (! force)
switch N             focus tab N
back | forward | go N
stop | reload | reload!
find TEXT | find-next | find-prev | find-done
set KEY JSON         change a profile setting
adblock|media|filter|whitelist NAME PATTERN on|off
sessions | restore all | restore N...
tabs | minimize | hide | quit";

/// Parse one input line. Blank lines yield `Ok(None)`.
pub fn parse_gesture(line: &str) -> Result<Option<Gesture>, String> {
    let line = line.trim();
    if line.is_empty() {
        return Ok(None);
    }
    let (word, rest) = match line.split_once(char::is_whitespace) {
        Some((word, rest)) => (word, rest.trim()),
        None => (line, ""),
    };

    let gesture = match word {
        "open" | "o" => Gesture::Open(rest.to_string()),
        "back" => Gesture::Back,
        "forward" => Gesture::Forward,
        "go" => Gesture::Go(parse_number(word, rest)?),
        "switch" | "s" => Gesture::Switch(parse_number(word, rest)?),
        "stop" => Gesture::Stop,
        "reload" => Gesture::Reload {
            bypass_cache: false,
        },
        "reload!" => Gesture::Reload { bypass_cache: true },
        "find" => Gesture::Find(rest.to_string()),
        "find-next" => Gesture::FindNext,
        "find-prev" => Gesture::FindPrev,
        "find-done" => Gesture::FindDone,
        "set" => parse_set(rest)?,
        "adblock" => parse_filter(FilterKind::Adblock, rest)?,
        "media" => parse_filter(FilterKind::Media, rest)?,
        "filter" => parse_filter(FilterKind::Content, rest)?,
        "whitelist" => parse_filter(FilterKind::Whitelist, rest)?,
        "sessions" => Gesture::Sessions,
        "restore" => parse_restore(rest)?,
        "tabs" | "ls" => Gesture::Tabs,
        "minimize" => Gesture::Minimize,
        "hide" => Gesture::Hide,
        "quit" | "q" => Gesture::Quit,
        "help" | "?" => Gesture::Help,
        _ if word.starts_with("tab") && word[3..].chars().all(|c| c == '+' || c == '!') => {
            let flags = &word[3..];
            Gesture::NewTab {
                uri: if rest.is_empty() { "about:blank" } else { rest }.to_string(),
                modifiers: GestureModifiers {
                    shift: flags.contains('+'),
                    alt: flags.contains('!'),
                },
            }
        }
        "close" | "close!" => Gesture::Close {
            index: if rest.is_empty() {
                None
            } else {
                Some(parse_number(word, rest)?)
            },
            force: word.ends_with('!'),
        },
        _ => return Err(format!("unknown command: {}", word)),
    };
    Ok(Some(gesture))
}

fn parse_number<T: std::str::FromStr>(word: &str, text: &str) -> Result<T, String> {
    text.parse()
        .map_err(|_| format!("{}: expected a number, got '{}'", word, text))
}

fn parse_set(rest: &str) -> Result<Gesture, String> {
    let (key, raw) = rest
        .split_once(char::is_whitespace)
        .ok_or_else(|| "set: expected KEY VALUE".to_string())?;
    let raw = raw.trim();
    // Bare words are taken as strings.
    let value = serde_json::from_str(raw).unwrap_or_else(|_| Value::String(raw.to_string()));
    Ok(Gesture::Set {
        key: key.to_string(),
        value,
    })
}

fn parse_filter(kind: FilterKind, rest: &str) -> Result<Gesture, String> {
    let parts: Vec<&str> = rest.split_whitespace().collect();
    let [name, pattern, switch] = parts.as_slice() else {
        return Err(format!("{}: expected NAME PATTERN on|off", kind.config_key()));
    };
    let active = match *switch {
        "on" => true,
        "off" => false,
        other => return Err(format!("expected on or off, got '{}'", other)),
    };
    Ok(Gesture::Filter {
        kind,
        name: name.to_string(),
        pattern: pattern.to_string(),
        active,
    })
}

fn parse_restore(rest: &str) -> Result<Gesture, String> {
    if rest.is_empty() || rest == "all" {
        return Ok(Gesture::Restore(RestoreTarget::All));
    }
    let indices = rest
        .split_whitespace()
        .map(|n| parse_number("restore", n))
        .collect::<Result<Vec<usize>, String>>()?;
    Ok(Gesture::Restore(RestoreTarget::Indices(indices)))
}

// === Rendering ===

fn security_mark(state: &SecurityState) -> &'static str {
    match state {
        SecurityState::Neutral => " ",
        SecurityState::Verified => "🔒",
        SecurityState::Insecure(InsecureReason::NotHttps) => "!",
        SecurityState::Insecure(InsecureReason::Unverified) => "✗",
        SecurityState::Insecure(InsecureReason::MixedContent) => "~",
    }
}

/// One line describing a tab.
pub fn render_tab(index: usize, tab: &TabRecord) -> String {
    let focus = if tab.focus { '*' } else { ' ' };
    let loading = match tab.chrome.action {
        ReloadAction::Stop => format!(" {:>3.0}%", tab.chrome.progress * 100.0),
        ReloadAction::Reload => String::new(),
    };
    let audio = if tab.chrome.playing_audio { " ♪" } else { "" };
    format!(
        "{}{:>2} {} {}{}{}  {}",
        focus,
        index,
        security_mark(&tab.chrome.security),
        tab.title_str(),
        loading,
        audio,
        tab.chrome.address_text
    )
}

/// The tab strip, one tab per line.
pub fn render_tabs(registry: &TabRegistry) -> String {
    registry
        .tabs()
        .iter()
        .enumerate()
        .map(|(index, tab)| render_tab(index, tab))
        .collect::<Vec<_>>()
        .join("\n")
}

/// The closed-session list, numbered for `restore N`.
pub fn render_sessions(sessions: &[SessionSnapshot]) -> String {
    if sessions.is_empty() {
        return "no closed tabs".to_string();
    }
    sessions
        .iter()
        .enumerate()
        .map(|(index, session)| {
            let title = if session.title.is_empty() {
                &session.uri
            } else {
                &session.title
            };
            format!("{:>2} {}  {}", index, title, session.uri)
        })
        .collect::<Vec<_>>()
        .join("\n")
}
