// plugbrowser services
// Services do the work behind the tabs: message transport, renderer processes, policies, settings, filters.

pub mod address;
pub mod content_filter_store;
pub mod content_policy;
#[cfg(unix)]
pub mod instance_socket;
pub mod message_channel;
pub mod process_supervisor;
pub mod render_engine;
pub mod renderer;
pub mod settings_engine;
