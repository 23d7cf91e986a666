//! Configuration system for nudge.
//!
//! Provides TOML-based configuration with:
//! - One optional section per subsystem (`[embedding]`, `[retrieval]`, `[weakness]`, ...)
//! - Config file layering (user config dir + project-local `nudge.toml`)
//! - API key resolution (config file, then `OPENAI_API_KEY`)
//! - Cross-field validation before anything is built from it

pub mod discovery;
pub mod error;
pub mod types;

pub use discovery::{LoadedConfig, load_config, save_config, user_config_dir, user_config_path};
pub use error::{ConfigError, Result};
pub use types::*;
