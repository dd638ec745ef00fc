//! Configuration loading, validation, env substitution.
//!
//! Config files: `kestrel.toml`, `kestrel.yaml`, or `kestrel.json`
//! Searched in `./` then `~/.config/kestrel/`.
//!
//! Supports `${ENV_VAR}` and `${ENV_VAR:-fallback}` substitution in all
//! string values, so credentials can stay in the environment (or a `.env`).

pub mod env_subst;
pub mod loader;
pub mod schema;

pub use {
    loader::{config_dir, discover_and_load, load_config, load_or_discover},
    schema::{AgentConfig, GatewayConfig, KestrelConfig, ModelConfig, MsfConfig, ScannerConfig},
};
