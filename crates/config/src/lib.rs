//! Configuration loading and env substitution.
//!
//! Config files: `switchyard.toml`, `switchyard.yaml`, or `switchyard.json`
//! Searched in `./` then the user config dir (`~/.config/switchyard/`).
//!
//! `${ENV_VAR}` and `${ENV_VAR:-fallback}` are expanded before parsing.

pub mod env_subst;
pub mod loader;
pub mod schema;

pub use {
    loader::{config_dir, default_data_dir, discover_and_load, load_config, resolve_data_dir},
    schema::{
        CalendarConfig, ChannelsConfig, DispatchConfig, ReconnectConfig, SchedulerConfig,
        StdioConfig, SwitchyardConfig,
    },
};
