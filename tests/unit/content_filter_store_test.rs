//! Unit tests for the on-disk content filter list store.

use plugbrowser::services::content_filter_store::{count_rules, ContentFilterStore};
use plugbrowser::types::errors::FilterError;
use tempfile::TempDir;
use url::Url;

const LIST: &str = "[Adblock Plus 2.0]\n! Title: test list\n\n||ads.example.com^\n##.banner\n";

fn store(dir: &TempDir) -> ContentFilterStore {
    ContentFilterStore::new(dir.path().to_path_buf())
}

fn file_source(dir: &TempDir, name: &str, text: &str) -> String {
    let path = dir.path().join(name);
    std::fs::write(&path, text).unwrap();
    Url::from_file_path(&path).unwrap().to_string()
}

#[test]
fn test_count_rules_skips_comments_and_header() {
    assert_eq!(count_rules(LIST), 2);
    assert_eq!(count_rules(""), 0);
    assert_eq!(count_rules("   \n! only comments\n"), 0);
}

#[tokio::test]
async fn test_save_load_list_and_remove() {
    let dir = TempDir::new().unwrap();
    let store = store(&dir);
    assert!(store.list().is_empty());

    let path = store.save("mine", LIST).await.unwrap();
    assert_eq!(path, store.path_for("mine"));
    store.save("another", "||x.test^\n").await.unwrap();
    std::fs::write(dir.path().join("notes.md"), "not a list").unwrap();

    assert!(store.has("mine"));
    assert_eq!(store.list(), vec!["another".to_string(), "mine".to_string()]);
    assert_eq!(store.load("mine").await.unwrap(), LIST);

    assert!(store.remove("mine").unwrap());
    assert!(!store.remove("mine").unwrap());
    assert!(!store.has("mine"));
}

#[tokio::test]
async fn test_load_missing_list_is_not_found() {
    let dir = TempDir::new().unwrap();
    let result = store(&dir).load("absent").await;
    assert!(matches!(result, Err(FilterError::NotFound(name)) if name == "absent"));
}

#[tokio::test]
async fn test_fetch_and_save_from_file_source() {
    let source_dir = TempDir::new().unwrap();
    let source = file_source(&source_dir, "easylist.txt", LIST);

    let dir = TempDir::new().unwrap();
    let store = store(&dir);
    let fetched = store.fetch_and_save("easylist", &source).await.unwrap();

    assert_eq!(fetched.name, "easylist");
    assert_eq!(fetched.rules, 2);
    assert_eq!(fetched.path, store.path_for("easylist"));
    assert_eq!(std::fs::read_to_string(&fetched.path).unwrap(), LIST);
}

#[tokio::test]
async fn test_fetch_rejects_bad_sources() {
    let dir = TempDir::new().unwrap();
    let store = store(&dir);

    assert!(matches!(
        store.fetch("not a url").await,
        Err(FilterError::FetchFailed(_))
    ));

    let missing = Url::from_file_path(dir.path().join("missing.txt")).unwrap();
    assert!(matches!(
        store.fetch(missing.as_str()).await,
        Err(FilterError::FetchFailed(_))
    ));
}

#[tokio::test]
async fn test_cancelled_store_refuses_work() {
    let source_dir = TempDir::new().unwrap();
    let source = file_source(&source_dir, "list.txt", LIST);

    let dir = TempDir::new().unwrap();
    let store = store(&dir);
    let token = store.token();
    store.cancel_all();

    assert!(store.is_cancelled());
    assert!(token.is_cancelled());
    assert!(matches!(store.fetch(&source).await, Err(FilterError::Cancelled)));
    assert!(matches!(
        store.fetch_and_save("list", &source).await,
        Err(FilterError::Cancelled)
    ));
    assert!(matches!(store.save("list", LIST).await, Err(FilterError::Cancelled)));
    assert!(!store.has("list"));
}
