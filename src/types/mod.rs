// plugbrowser shared type definitions
// Plain data shared by both processes: wire protocol, sessions, tab records, profile config, errors.

pub mod download;
pub mod errors;
pub mod protocol;
pub mod session;
pub mod settings;
pub mod tab;
