// macOS: ~/Library/Application Support/plugbrowser

use std::env;
use std::path::PathBuf;

use super::APP_DIR;

pub fn get_config_dir() -> PathBuf {
    let home = env::var_os("HOME").unwrap_or_else(|| "/tmp".into());
    PathBuf::from(home)
        .join("Library")
        .join("Application Support")
        .join(APP_DIR)
}
