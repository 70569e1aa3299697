// Linux: $XDG_CONFIG_HOME/plugbrowser, falling back to ~/.config/plugbrowser

use std::env;
use std::path::PathBuf;

use super::APP_DIR;

pub fn get_config_dir() -> PathBuf {
    match env::var_os("XDG_CONFIG_HOME").filter(|dir| !dir.is_empty()) {
        Some(xdg) => PathBuf::from(xdg).join(APP_DIR),
        None => {
            let home = env::var_os("HOME").unwrap_or_else(|| "/tmp".into());
            PathBuf::from(home).join(".config").join(APP_DIR)
        }
    }
}
