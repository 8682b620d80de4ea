//! Runtime helpers shared by the netflow plugin binaries.
//!
//! - [`init_tracing`] installs the global tracing subscriber.
//! - [`PluginEnv`] describes the directories the host hands to the plugin.

pub mod plugin_env;
pub use plugin_env::PluginEnv;

mod tracing_setup;
pub use tracing_setup::init_tracing;
