//! Unit tests for the UI-side tab registry.

use std::collections::BTreeMap;

use plugbrowser::managers::tab_registry::{GestureModifiers, TabOptions, TabRegistry, UiEffect};
use plugbrowser::services::message_channel::Watch;
use plugbrowser::types::protocol::{
    BackForwardList, ClosedInfo, Command, CreateTabRequest, DownloadRequest, Event, HistoryItem,
    InitPayload, LoadStatus, SecureInfo, TabInfo,
};
use plugbrowser::types::session::{ClosedSession, SessionSnapshot};
use plugbrowser::types::tab::{InsecureReason, ReloadAction, SecurityState};

fn template() -> InitPayload {
    InitPayload {
        private: false,
        web_view_settings: BTreeMap::new(),
        search_url: "https://search.test/?q=%s".to_string(),
        user_agent: String::new(),
        adblock_filters: BTreeMap::new(),
        media_filters: BTreeMap::new(),
        content_filters: Vec::new(),
        content_filters_path: None,
        content_filter_whitelist: BTreeMap::new(),
        profile_path: None,
        socket_id: 0,
        uri: String::new(),
    }
}

/// A focused tab whose renderer is running and has attached its plug.
fn open(registry: &mut TabRegistry, uri: &str, pid: u32) -> u64 {
    let socket_id = registry.make_tab(
        uri,
        TabOptions {
            focus: true,
            ..TabOptions::default()
        },
    );
    registry.process_started(socket_id, pid);
    registry.handle_event(pid, 1, Event::PlugAdded);
    socket_id
}

fn closed(uri: &str, is_last: bool) -> Event {
    Event::Closed(ClosedInfo {
        session: ClosedSession {
            session_data: "c2Vzc2lvbg==".to_string(),
            title: uri.to_string(),
            uri: uri.to_string(),
        },
        is_last,
    })
}

fn item(uri: &str) -> HistoryItem {
    HistoryItem {
        title: uri.to_string(),
        uri: uri.to_string(),
        original_uri: uri.to_string(),
    }
}

// === Creation ===

#[test]
fn test_make_tab_spawns_renderer_with_template() {
    let mut registry = TabRegistry::new(template());
    let socket_id = registry.make_tab("https://example.org/", TabOptions::default());

    let effects = registry.take_effects();
    let expected = InitPayload {
        socket_id,
        uri: "https://example.org/".to_string(),
        ..template()
    };
    assert_eq!(
        effects,
        vec![UiEffect::Spawn {
            socket_id,
            init: expected
        }]
    );
    // the first tab takes focus even without asking
    assert_eq!(registry.current_id(), Some(socket_id));
    assert_eq!(registry.tab(socket_id).unwrap().pid, 0);
}

#[test]
fn test_commands_buffer_until_process_starts() {
    let mut registry = TabRegistry::new(template());
    let socket_id = registry.make_tab("https://example.org/", TabOptions::default());
    registry.take_effects();

    registry.send(socket_id, Command::Stop);
    assert!(registry.take_effects().is_empty());

    registry.process_started(socket_id, 100);
    let effects = registry.take_effects();
    assert_eq!(
        effects,
        vec![
            UiEffect::Send {
                pid: 100,
                channel: 1,
                command: Command::GrabFocus
            },
            UiEffect::Send {
                pid: 100,
                channel: 1,
                command: Command::Stop
            },
        ]
    );
    assert_eq!(registry.route(100, 1), Some(socket_id));
}

#[test]
fn test_process_started_for_vanished_tab_terminates_it() {
    let mut registry = TabRegistry::new(template());
    registry.process_started(42, 500);
    assert_eq!(registry.take_effects(), vec![UiEffect::Terminate { pid: 500 }]);
}

#[test]
fn test_process_failed_removes_tab() {
    let mut registry = TabRegistry::new(template());
    let socket_id = registry.make_tab("https://example.org/", TabOptions::default());
    registry.take_effects();

    registry.process_failed(socket_id);
    assert!(registry.is_empty());
    assert_eq!(registry.take_effects(), vec![UiEffect::Quit]);
}

#[test]
fn test_private_option_overrides_profile_default() {
    let mut registry = TabRegistry::new(template());
    let socket_id = registry.make_tab(
        "about:blank",
        TabOptions {
            private: Some(true),
            ..TabOptions::default()
        },
    );
    assert!(registry.tab(socket_id).unwrap().private);
    assert!(matches!(
        registry.take_effects().first(),
        Some(UiEffect::Spawn { init, .. }) if init.private
    ));
}

#[test]
fn test_new_tab_opens_next_to_current() {
    let mut registry = TabRegistry::new(template());
    let first = open(&mut registry, "https://one.test/", 100);
    let second = open(&mut registry, "https://two.test/", 200);
    registry.focus_tab(first);
    registry.take_effects();

    registry.open_new_tab("https://three.test/", GestureModifiers::default(), false);
    let ids: Vec<u64> = registry.tabs().iter().map(|tab| tab.socket_id).collect();
    assert_eq!(ids.len(), 3);
    assert_eq!(ids[0], first);
    assert_eq!(ids[2], second);
    // not focused
    assert_eq!(registry.current_id(), Some(first));
}

#[test]
fn test_shift_new_tab_asks_current_renderer() {
    let mut registry = TabRegistry::new(template());
    let socket_id = open(&mut registry, "https://one.test/", 100);
    registry.take_effects();

    let modifiers = GestureModifiers {
        shift: true,
        alt: true,
    };
    registry.open_new_tab("https://two.test/", modifiers, true);

    let effects = registry.take_effects();
    let [UiEffect::Send {
        pid: 100,
        channel: 1,
        command: Command::NewTab(request),
    }] = effects.as_slice()
    else {
        panic!("expected a new-tab command, got {:?}", effects);
    };
    assert_eq!(request.uri.as_deref(), Some("https://two.test/"));
    assert_eq!(request.private, Some(false));
    assert_eq!(request.index, 1);
    assert_eq!(request.order, registry.tab(socket_id).unwrap().order + 1);
    assert_eq!(registry.len(), 1);
}

// === Inbound events ===

#[test]
fn test_tab_info_adds_routed_sibling() {
    let mut registry = TabRegistry::new(template());
    let parent = open(&mut registry, "https://one.test/", 100);
    registry.take_effects();

    registry.handle_event(
        100,
        1,
        Event::TabInfo(TabInfo {
            uri: "https://two.test/".to_string(),
            pid: 100,
            channel: 2,
            focus: true,
            private: false,
            index: -1,
            order: 7,
        }),
    );

    assert_eq!(registry.len(), 2);
    let child = registry.route(100, 2).unwrap();
    assert_ne!(child, parent);
    assert_eq!(registry.tabs()[1].socket_id, child);
    assert_eq!(registry.current_id(), Some(child));
    assert!(registry.take_effects().contains(&UiEffect::Send {
        pid: 100,
        channel: 2,
        command: Command::SocketId(child)
    }));
}

#[test]
fn test_create_tab_spawns_new_process() {
    let mut registry = TabRegistry::new(template());
    open(&mut registry, "https://one.test/", 100);
    registry.take_effects();

    registry.handle_event(
        100,
        1,
        Event::CreateTab(CreateTabRequest {
            uri: "https://two.test/".to_string(),
            focus: false,
            private: None,
        }),
    );
    assert_eq!(registry.len(), 2);
    assert!(registry
        .take_effects()
        .iter()
        .any(|effect| matches!(effect, UiEffect::Spawn { init, .. } if init.uri == "https://two.test/")));
}

#[test]
fn test_download_is_forwarded() {
    let mut registry = TabRegistry::new(template());
    open(&mut registry, "https://one.test/", 100);
    registry.take_effects();

    let request = DownloadRequest {
        uri: "https://files.test/a.zip".to_string(),
        filename: "a.zip".to_string(),
        mime_type: "application/zip".to_string(),
        length: 10,
        user_agent: String::new(),
        start: true,
    };
    registry.handle_event(100, 1, Event::Download(request.clone()));
    assert_eq!(
        registry.take_effects(),
        vec![UiEffect::Download { pid: 100, request }]
    );
}

#[test]
fn test_back_forward_list_saves_crash_sessions() {
    let mut registry = TabRegistry::new(template());
    let socket_id = open(&mut registry, "https://one.test/", 100);
    registry.handle_event(100, 1, Event::SessionData("AAAA".to_string()));
    registry.take_effects();

    let list = BackForwardList(vec![item("https://zero.test/")], Some(item("https://one.test/")), vec![]);
    registry.handle_event(100, 1, Event::BackForwardList(list));

    let effects = registry.take_effects();
    let [UiEffect::SaveCrashSessions(snapshots)] = effects.as_slice() else {
        panic!("expected a crash save, got {:?}", effects);
    };
    assert_eq!(snapshots.len(), 1);
    assert_eq!(snapshots[0].session_data, "AAAA");
    assert_eq!(snapshots[0].pid, 100);
    assert!(registry.tab(socket_id).unwrap().has_history());
}

#[test]
fn test_display_state_follows_load() {
    let mut registry = TabRegistry::new(template());
    let socket_id = open(&mut registry, "https://one.test/", 100);

    registry.handle_event(100, 1, Event::LoadStatus(LoadStatus::Started));
    let chrome = &registry.tab(socket_id).unwrap().chrome;
    assert!(chrome.spinner);
    assert_eq!(chrome.action, ReloadAction::Stop);

    registry.handle_event(100, 1, Event::Uri("https://one.test/page".to_string()));
    registry.handle_event(100, 1, Event::EstimatedLoadProgress(0.5));
    assert_eq!(registry.tab(socket_id).unwrap().chrome.progress, 0.5);

    registry.handle_event(100, 1, Event::LoadStatus(LoadStatus::Finished));
    let tab = registry.tab(socket_id).unwrap();
    assert!(!tab.chrome.spinner);
    assert_eq!(tab.chrome.action, ReloadAction::Reload);
    assert_eq!(tab.chrome.address_text, "https://one.test/page");
}

#[test]
fn test_security_indicator() {
    let mut registry = TabRegistry::new(template());
    let socket_id = open(&mut registry, "https://one.test/", 100);
    registry.handle_event(100, 1, Event::Uri("https://one.test/".to_string()));

    registry.handle_event(100, 1, Event::IsSecure(SecureInfo(true, true, None, 0)));
    assert_eq!(
        registry.tab(socket_id).unwrap().chrome.security,
        SecurityState::Verified
    );

    registry.handle_event(100, 1, Event::InsecureContent(true));
    assert_eq!(
        registry.tab(socket_id).unwrap().chrome.security,
        SecurityState::Insecure(InsecureReason::MixedContent)
    );

    // a new load clears mixed content
    registry.handle_event(100, 1, Event::LoadStatus(LoadStatus::Started));
    registry.handle_event(100, 1, Event::IsSecure(SecureInfo(true, true, None, 0)));
    assert!(registry.tab(socket_id).unwrap().chrome.security.is_secure());
}

#[test]
fn test_window_title_follows_focused_tab_only() {
    let mut registry = TabRegistry::new(template());
    let first = open(&mut registry, "https://one.test/", 100);
    open(&mut registry, "https://two.test/", 200);

    registry.handle_event(200, 1, Event::Title("Two".to_string()));
    assert_eq!(registry.window_title(), "Two (pid: 200)");

    registry.handle_event(100, 1, Event::Title("One".to_string()));
    assert_eq!(registry.window_title(), "Two (pid: 200)");

    registry.focus_tab(first);
    assert_eq!(registry.window_title(), "One (pid: 100)");
}

#[test]
fn test_unrouted_events_are_ignored() {
    let mut registry = TabRegistry::new(template());
    open(&mut registry, "https://one.test/", 100);
    registry.take_effects();
    let watch = registry.handle_event(999, 1, Event::Title("x".to_string()));
    assert!(matches!(watch, Watch::Continue));
    assert!(registry.take_effects().is_empty());
}

// === Closing ===

#[test]
fn test_polite_close_waits_for_closed_reply() {
    let mut registry = TabRegistry::new(template());
    let socket_id = open(&mut registry, "https://one.test/", 100);
    registry.take_effects();

    registry.close_tab(socket_id, false);
    assert_eq!(
        registry.take_effects(),
        vec![UiEffect::Send {
            pid: 100,
            channel: 1,
            command: Command::Close
        }]
    );
    let tab = registry.tab(socket_id).unwrap();
    assert!(tab.closing);
    assert!(!tab.subscribed);

    // display updates are dropped while closing
    registry.handle_event(100, 1, Event::Title("late".to_string()));
    assert_ne!(registry.tab(socket_id).unwrap().title, "late");

    let watch = registry.handle_event(100, 1, closed("https://one.test/", true));
    assert!(matches!(watch, Watch::Stop));
    assert!(registry.is_empty());

    let effects = registry.take_effects();
    assert!(effects.contains(&UiEffect::Terminate { pid: 100 }));
    assert!(effects.contains(&UiEffect::Quit));
    // the crash snapshot no longer lists the closed tab
    assert!(effects.contains(&UiEffect::SaveCrashSessions(Vec::new())));
    assert!(effects.iter().any(|effect| matches!(
        effect,
        UiEffect::StoreClosedSession(snapshot) if snapshot.uri == "https://one.test/"
    )));
}

#[test]
fn test_close_before_plug_added_terminates_lonely_process() {
    let mut registry = TabRegistry::new(template());
    open(&mut registry, "https://one.test/", 100);
    let socket_id = registry.make_tab("https://two.test/", TabOptions::default());
    registry.process_started(socket_id, 200);
    registry.take_effects();

    registry.close_tab(socket_id, false);
    assert!(registry.tab(socket_id).is_none());
    assert_eq!(registry.take_effects(), vec![UiEffect::Terminate { pid: 200 }]);
}

fn sibling(pid: u32, uri: &str) -> Event {
    Event::TabInfo(TabInfo {
        uri: uri.to_string(),
        pid,
        channel: 2,
        focus: false,
        private: false,
        index: -1,
        order: 0,
    })
}

#[test]
fn test_force_close_recovers_sibling_tabs_of_the_process() {
    let mut registry = TabRegistry::new(template());
    let parent = open(&mut registry, "https://one.test/", 700);
    let other = open(&mut registry, "https://other.test/", 200);
    registry.handle_event(700, 1, sibling(700, "https://two.test/"));
    registry.handle_event(700, 2, Event::SessionData("QkJC".to_string()));
    assert_eq!(registry.len(), 3);
    registry.take_effects();

    registry.close_tab(parent, true);

    assert_eq!(registry.len(), 2);
    assert_eq!(registry.route(700, 2), None);
    assert!(registry.tab(parent).is_none());
    assert!(registry.tab(other).is_some());

    let recovered = registry
        .tabs()
        .iter()
        .find(|tab| tab.socket_id != other)
        .unwrap();
    assert_eq!(recovered.uri, "https://two.test/");
    assert!(recovered.pending.iter().any(|command| matches!(
        command,
        Command::RestoreSession(snapshot)
            if snapshot.session_data == "QkJC" && snapshot.uri == "https://two.test/"
    )));

    let effects = registry.take_effects();
    assert_eq!(
        effects
            .iter()
            .filter(|effect| **effect == UiEffect::Terminate { pid: 700 })
            .count(),
        1
    );
    assert_eq!(
        effects
            .iter()
            .filter(|effect| matches!(effect, UiEffect::Spawn { .. }))
            .count(),
        1
    );
    assert!(!effects.contains(&UiEffect::Quit));
    assert!(!effects
        .iter()
        .any(|effect| matches!(effect, UiEffect::StoreClosedSession(_))));
}

#[test]
fn test_force_close_all_while_quitting_does_not_respawn() {
    let mut registry = TabRegistry::new(template());
    let parent = open(&mut registry, "https://one.test/", 700);
    registry.handle_event(700, 1, sibling(700, "https://two.test/"));
    registry.handle_event(700, 2, Event::PlugAdded);
    let two = registry.route(700, 2).unwrap();
    assert_ne!(two, parent);
    registry.request_quit();
    registry.take_effects();
    assert_eq!(registry.len(), 2);

    // neither view answered the close in time
    registry.force_close_all();

    assert!(registry.is_empty());
    let effects = registry.take_effects();
    assert!(!effects.iter().any(|effect| matches!(effect, UiEffect::Spawn { .. })));
    assert!(effects.contains(&UiEffect::Terminate { pid: 700 }));
    assert_eq!(effects.last(), Some(&UiEffect::Quit));
}

#[test]
fn test_reused_pid_can_be_terminated_again() {
    let mut registry = TabRegistry::new(template());
    let first = open(&mut registry, "https://one.test/", 500);
    registry.close_tab(first, true);
    assert!(registry.take_effects().contains(&UiEffect::Terminate { pid: 500 }));

    let second = open(&mut registry, "https://two.test/", 500);
    registry.take_effects();
    registry.close_tab(second, true);
    assert!(registry.take_effects().contains(&UiEffect::Terminate { pid: 500 }));
}

#[test]
fn test_reused_pid_does_not_group_restored_sessions() {
    let mut registry = TabRegistry::new(template());
    let snapshot = SessionSnapshot {
        session_data: "AAAA".to_string(),
        uri: "https://saved.test/".to_string(),
        pid: 42,
        private: false,
        ..SessionSnapshot::default()
    };
    let host = registry.restore_session(snapshot.clone());
    registry.process_started(host, 600);

    // a later renderer gets the old pid
    let unrelated = registry.make_tab("https://new.test/", TabOptions::default());
    registry.process_started(unrelated, 42);
    registry.take_effects();

    let restored = registry.restore_session(snapshot);
    assert_ne!(restored, host);
    assert!(registry
        .take_effects()
        .iter()
        .any(|effect| matches!(effect, UiEffect::Spawn { .. })));
}

#[test]
fn test_second_close_probes_and_removes() {
    let mut registry = TabRegistry::new(template());
    let socket_id = open(&mut registry, "https://one.test/", 100);
    registry.close_tab(socket_id, false);
    registry.take_effects();

    registry.close_tab(socket_id, false);
    assert_eq!(
        registry.take_effects(),
        vec![UiEffect::ProbeAlive { socket_id, pid: 100 }]
    );

    registry.probe_result(socket_id, true);
    assert!(registry.is_empty());
    let effects = registry.take_effects();
    assert!(effects.contains(&UiEffect::Terminate { pid: 100 }));
    assert!(effects.contains(&UiEffect::Quit));

    // gone for good
    registry.close_tab(socket_id, false);
    assert!(registry.take_effects().is_empty());
}

// === Recovery ===

#[test]
fn test_renderer_gone_recovers_tabs_into_one_process() {
    let mut registry = TabRegistry::new(template());
    let parent = open(&mut registry, "https://one.test/", 100);
    registry.handle_event(100, 1, Event::SessionData("T05F".to_string()));
    registry.handle_event(
        100,
        1,
        Event::TabInfo(TabInfo {
            uri: "https://two.test/".to_string(),
            pid: 100,
            channel: 2,
            focus: false,
            private: false,
            index: -1,
            order: 0,
        }),
    );
    registry.take_effects();

    registry.renderer_gone(100);

    assert_eq!(registry.len(), 1);
    let recovered = registry.tabs()[0].socket_id;
    assert_ne!(recovered, parent);
    assert_eq!(registry.tabs()[0].uri, "https://one.test/");

    let effects = registry.take_effects();
    let spawns = effects
        .iter()
        .filter(|effect| matches!(effect, UiEffect::Spawn { .. }))
        .count();
    assert_eq!(spawns, 1);
    assert_eq!(
        effects
            .iter()
            .filter(|effect| **effect == UiEffect::Terminate { pid: 100 })
            .count(),
        1
    );
    assert!(!effects.contains(&UiEffect::Quit));

    // both views are replayed into the new process once it starts
    registry.process_started(recovered, 300);
    let commands: Vec<Command> = registry
        .take_effects()
        .into_iter()
        .filter_map(|effect| match effect {
            UiEffect::Send { pid: 300, command, .. } => Some(command),
            _ => None,
        })
        .collect();
    assert!(commands
        .iter()
        .any(|c| matches!(c, Command::RestoreSession(s) if s.session_data == "T05F")));
    assert!(commands.iter().any(|c| matches!(
        c,
        Command::NewTab(request) if request.uri.as_deref() == Some("https://two.test/")
    )));
}

#[test]
fn test_renderer_gone_while_closing_does_not_recover() {
    let mut registry = TabRegistry::new(template());
    let socket_id = open(&mut registry, "https://one.test/", 100);
    registry.close_tab(socket_id, false);
    registry.take_effects();

    registry.renderer_gone(100);
    assert!(registry.is_empty());
    let effects = registry.take_effects();
    assert!(!effects.iter().any(|effect| matches!(effect, UiEffect::Spawn { .. })));
    assert!(effects.contains(&UiEffect::Quit));
}

#[test]
fn test_restore_session_sends_snapshot() {
    let mut registry = TabRegistry::new(template());
    let snapshot = SessionSnapshot {
        session_data: "AAAA".to_string(),
        title: "Saved".to_string(),
        uri: "https://saved.test/".to_string(),
        private: false,
        order: 4,
        ..SessionSnapshot::default()
    };
    let socket_id = registry.restore_session(snapshot.clone());

    let tab = registry.tab(socket_id).unwrap();
    assert_eq!(tab.title, "Saved");
    assert_eq!(tab.order, 4);
    assert!(!tab.private);
    assert_eq!(tab.pending, vec![Command::GrabFocus, Command::RestoreSession(snapshot)]);
}

#[test]
fn test_restore_empty_session_reopens_its_address() {
    let mut registry = TabRegistry::new(template());
    let snapshot = SessionSnapshot {
        uri: "https://fresh.test/".to_string(),
        private: false,
        ..SessionSnapshot::default()
    };
    let socket_id = registry.restore_session(snapshot);

    let tab = registry.tab(socket_id).unwrap();
    assert!(!tab
        .pending
        .iter()
        .any(|command| matches!(command, Command::RestoreSession(_))));
    let effects = registry.take_effects();
    assert!(effects.iter().any(|effect| matches!(
        effect,
        UiEffect::Spawn { init, .. } if init.uri == "https://fresh.test/"
    )));
}

// === Quitting ===

#[test]
fn test_quit_collects_sessions_in_display_order() {
    let mut registry = TabRegistry::new(template());
    open(&mut registry, "https://one.test/", 100);
    open(&mut registry, "https://two.test/", 200);
    registry.take_effects();

    registry.request_quit();
    assert!(registry.is_closing_app());
    let effects = registry.take_effects();
    assert_eq!(effects[0], UiEffect::ClearClosedSessions);
    assert_eq!(
        effects
            .iter()
            .filter(|effect| matches!(effect, UiEffect::Send { command: Command::Close, .. }))
            .count(),
        2
    );

    registry.handle_event(200, 1, closed("https://two.test/", true));
    registry.handle_event(100, 1, closed("https://one.test/", true));

    let stored: Vec<SessionSnapshot> = registry
        .take_effects()
        .into_iter()
        .filter_map(|effect| match effect {
            UiEffect::StoreClosedSession(snapshot) => Some(snapshot),
            _ => None,
        })
        .collect();
    assert_eq!(stored.len(), 2);
    assert_eq!(stored[0].index, 1);
    assert_eq!(stored[0].uri, "https://two.test/");
    assert_eq!(stored[1].index, 0);
    assert!(registry.is_empty());
}

#[test]
fn test_quit_with_no_tabs_quits_at_once() {
    let mut registry = TabRegistry::new(template());
    registry.request_quit();
    assert_eq!(
        registry.take_effects(),
        vec![UiEffect::ClearClosedSessions, UiEffect::Quit]
    );
}

#[test]
fn test_force_close_all_after_timeout() {
    let mut registry = TabRegistry::new(template());
    open(&mut registry, "https://one.test/", 100);
    open(&mut registry, "https://two.test/", 200);
    registry.request_quit();
    registry.take_effects();

    registry.force_close_all();
    assert!(registry.is_empty());
    let effects = registry.take_effects();
    assert!(effects.contains(&UiEffect::Terminate { pid: 100 }));
    assert!(effects.contains(&UiEffect::Terminate { pid: 200 }));
    assert!(effects.contains(&UiEffect::Quit));
}
