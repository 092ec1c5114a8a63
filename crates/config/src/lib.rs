//! Configuration loading and env overrides.
//!
//! Config file: `murmur.toml`, searched in `./` then `~/.config/murmur/`.
//! Every value has a default; `MURMUR_*` environment variables override the
//! file.

pub mod loader;
pub mod schema;

pub use {
    loader::{apply_env_overrides, discover_and_load, load_config},
    schema::{
        AuthConfig, DatabaseConfig, HeartbeatConfig, MurmurConfig, QueueConfig, ServerConfig,
        SessionConfig,
    },
};
