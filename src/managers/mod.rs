// plugbrowser state managers
// Managers hold UI-side state: the tab registry, closed and saved sessions, downloads.

pub mod download_manager;
pub mod session_manager;
pub mod tab_registry;
