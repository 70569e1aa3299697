//! plugbrowser — a multi-process web browser shell.
//!
//! One UI process owns the tabs; every tab group is served by its own
//! renderer process speaking newline-delimited JSON over stdin/stdout.
//! This library crate exposes all modules for use by both binaries and the
//! integration tests.

pub mod app;
pub mod managers;
pub mod platform;
pub mod services;
pub mod types;
pub mod ui;

/// Initialise `env_logger` for either binary.
///
/// `RUST_LOG` wins; otherwise `verbosity` picks the level (0 error, 1 warn,
/// 2 info, 3 and up debug). Output goes to stderr, never to the channel.
pub fn init_logging(verbosity: u8) {
    let level = match verbosity {
        0 => "error",
        1 => "warn",
        2 => "info",
        _ => "debug",
    };
    let _ = env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(level))
        .try_init();
}
