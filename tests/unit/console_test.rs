//! Unit tests for the console gesture parser and text rendering.

use plugbrowser::managers::tab_registry::GestureModifiers;
use plugbrowser::types::protocol::Command;
use plugbrowser::types::session::SessionSnapshot;
use plugbrowser::ui::console::{
    parse_gesture, render_sessions, FilterKind, Gesture, RestoreTarget,
};
use rstest::rstest;
use serde_json::json;

#[rstest]
#[case("back", Gesture::Back)]
#[case("forward", Gesture::Forward)]
#[case("go -2", Gesture::Go(-2))]
#[case("s 3", Gesture::Switch(3))]
#[case("stop", Gesture::Stop)]
#[case("reload", Gesture::Reload { bypass_cache: false })]
#[case("reload!", Gesture::Reload { bypass_cache: true })]
#[case("find  needle ", Gesture::Find("needle".to_string()))]
#[case("find-next", Gesture::FindNext)]
#[case("find-done", Gesture::FindDone)]
#[case("open example.com", Gesture::Open("example.com".to_string()))]
#[case("close", Gesture::Close { index: None, force: false })]
#[case("close! 2", Gesture::Close { index: Some(2), force: true })]
#[case("sessions", Gesture::Sessions)]
#[case("restore", Gesture::Restore(RestoreTarget::All))]
#[case("restore all", Gesture::Restore(RestoreTarget::All))]
#[case("restore 0 2", Gesture::Restore(RestoreTarget::Indices(vec![0, 2])))]
#[case("ls", Gesture::Tabs)]
#[case("q", Gesture::Quit)]
#[case("?", Gesture::Help)]
fn test_parse_simple_gestures(#[case] line: &str, #[case] expected: Gesture) {
    assert_eq!(parse_gesture(line), Ok(Some(expected)));
}

#[rstest]
#[case("tab", "about:blank", false, false)]
#[case("tab https://a.test/", "https://a.test/", false, false)]
#[case("tab+ x", "x", true, false)]
#[case("tab!", "about:blank", false, true)]
#[case("tab+! y", "y", true, true)]
fn test_parse_new_tab(
    #[case] line: &str,
    #[case] uri: &str,
    #[case] shift: bool,
    #[case] alt: bool,
) {
    assert_eq!(
        parse_gesture(line),
        Ok(Some(Gesture::NewTab {
            uri: uri.to_string(),
            modifiers: GestureModifiers { shift, alt },
        }))
    );
}

#[test]
fn test_blank_line_is_nothing() {
    assert_eq!(parse_gesture("   "), Ok(None));
}

#[rstest]
#[case("frobnicate")]
#[case("tabx")]
#[case("go far")]
#[case("switch")]
#[case("set lonely")]
#[case("adblock name pattern maybe")]
#[case("media name")]
#[case("restore 1 two")]
fn test_parse_errors(#[case] line: &str) {
    assert!(parse_gesture(line).is_err());
}

#[test]
fn test_set_parses_json_or_bare_words() {
    assert_eq!(
        parse_gesture("set clear-on-exit false"),
        Ok(Some(Gesture::Set {
            key: "clear-on-exit".to_string(),
            value: json!(false),
        }))
    );
    assert_eq!(
        parse_gesture("set home-uri https://home.test/"),
        Ok(Some(Gesture::Set {
            key: "home-uri".to_string(),
            value: json!("https://home.test/"),
        }))
    );
}

#[test]
fn test_filter_gesture_and_command() {
    let gesture = parse_gesture("whitelist docs docs\\.test off").unwrap().unwrap();
    assert_eq!(
        gesture,
        Gesture::Filter {
            kind: FilterKind::Whitelist,
            name: "docs".to_string(),
            pattern: "docs\\.test".to_string(),
            active: false,
        }
    );
    assert_eq!(
        FilterKind::Adblock.command("ads", "/ads/", true),
        Command::Adblock("ads".to_string(), "/ads/".to_string(), true)
    );
    assert_eq!(FilterKind::Content.config_key(), "content-filters");
    assert_eq!(FilterKind::Media.config_key(), "media-filters");
}

#[test]
fn test_render_sessions() {
    assert_eq!(render_sessions(&[]), "no closed tabs");

    let titled = SessionSnapshot {
        title: "Example".to_string(),
        uri: "https://example.test/".to_string(),
        ..Default::default()
    };
    let untitled = SessionSnapshot {
        uri: "https://bare.test/".to_string(),
        ..Default::default()
    };
    let text = render_sessions(&[titled, untitled]);
    let lines: Vec<&str> = text.lines().collect();
    assert_eq!(lines.len(), 2);
    assert_eq!(lines[0], " 0 Example  https://example.test/");
    assert_eq!(lines[1], " 1 https://bare.test/  https://bare.test/");
}
