// plugbrowser platform paths
// Resolves where profiles live. Selected with `cfg(target_os)` at compile time.

use std::path::PathBuf;

#[cfg(target_os = "linux")]
mod linux;

#[cfg(target_os = "macos")]
mod macos;

/// Application directory name under the platform config root.
pub const APP_DIR: &str = "plugbrowser";

/// Returns the platform-specific configuration directory for plugbrowser.
///
/// - **Linux**: `$XDG_CONFIG_HOME/plugbrowser` (or `~/.config/plugbrowser`)
/// - **macOS**: `~/Library/Application Support/plugbrowser`
/// - elsewhere: `./.plugbrowser`
pub fn get_config_dir() -> PathBuf {
    #[cfg(target_os = "linux")]
    {
        linux::get_config_dir()
    }
    #[cfg(target_os = "macos")]
    {
        macos::get_config_dir()
    }
    #[cfg(not(any(target_os = "linux", target_os = "macos")))]
    {
        PathBuf::from(format!(".{}", APP_DIR))
    }
}

/// Directory of a named profile.
pub fn get_profile_dir(profile: &str) -> PathBuf {
    get_config_dir().join(profile)
}
