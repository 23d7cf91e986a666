//! Config file discovery.
//!
//! Two layers, the project file overriding the user file section by section:
//! 1. `config.toml` in the user config directory (`$NUDGE_CONFIG_DIR` or
//!    `~/.config/nudge`)
//! 2. `./nudge.toml`
//!
//! A layer that fails to parse is skipped with a warning so one bad file
//! does not take the CLI down.

use std::path::{Path, PathBuf};

use crate::{ConfigError, NudgeConfig, Result};

const PROJECT_FILE: &str = "nudge.toml";
const USER_FILE: &str = "config.toml";
const CONFIG_DIR_ENV: &str = "NUDGE_CONFIG_DIR";

/// Merged configuration plus what went into it.
#[derive(Debug, Clone, Default)]
pub struct LoadedConfig {
    pub config: NudgeConfig,
    /// Files merged, lowest precedence first.
    pub loaded_from: Vec<PathBuf>,
    /// Skipped layers and plaintext API keys.
    pub warnings: Vec<String>,
}

/// Merge the user layer (from `config_dir` if given) and the project layer
/// in `project_dir` (the working directory by default).
pub fn load_config(project_dir: Option<&Path>, config_dir: Option<&Path>) -> LoadedConfig {
    let mut loaded = LoadedConfig::default();

    let user = config_dir
        .map(|d| d.join(USER_FILE))
        .or_else(user_config_path);
    let project = project_dir.unwrap_or(Path::new(".")).join(PROJECT_FILE);

    for path in user.into_iter().chain([project]) {
        if !path.is_file() {
            continue;
        }
        match read_file(&path) {
            Ok(layer) => {
                loaded.config.merge(layer);
                loaded.loaded_from.push(path);
            }
            Err(e) => loaded
                .warnings
                .push(format!("Skipped {}: {}", path.display(), e)),
        }
    }

    for section in loaded.config.plaintext_key_sections() {
        loaded.warnings.push(format!(
            "[{}] holds a plaintext API key; prefer OPENAI_API_KEY",
            section
        ));
    }
    loaded
}

fn read_file(path: &Path) -> Result<NudgeConfig> {
    let contents = std::fs::read_to_string(path).map_err(|e| ConfigError::ReadFile {
        path: path.display().to_string(),
        source: e,
    })?;
    NudgeConfig::from_toml(&contents)
}

/// Write `config` to `path`, creating parent directories.
pub fn save_config(config: &NudgeConfig, path: &Path) -> Result<()> {
    let write_err = |p: &Path, e| ConfigError::WriteFile {
        path: p.display().to_string(),
        source: e,
    };
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent).map_err(|e| write_err(parent, e))?;
    }
    std::fs::write(path, config.to_toml()?).map_err(|e| write_err(path, e))
}

/// `$NUDGE_CONFIG_DIR` if set, else the platform config directory.
pub fn user_config_dir() -> Option<PathBuf> {
    match std::env::var(CONFIG_DIR_ENV) {
        Ok(dir) if !dir.is_empty() => Some(PathBuf::from(dir)),
        _ => dirs::config_dir().map(|d| d.join("nudge")),
    }
}

pub fn user_config_path() -> Option<PathBuf> {
    user_config_dir().map(|d| d.join(USER_FILE))
}
