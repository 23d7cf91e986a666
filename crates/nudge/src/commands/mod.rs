//! CLI command handlers.

use std::path::PathBuf;

use anyhow::{Context as _, Result};
use console::Style;
use nudge_config::{LoadedConfig, NudgeConfig, StorageConfig};
use nudge_router::RoutingEngine;

pub mod cluster;
pub mod config;
pub mod patterns;
pub mod reload;
pub mod route;
pub mod stats;
pub mod watch;

/// Shared context for all commands.
#[derive(Debug, Clone)]
pub struct Context {
    /// Output as JSON for scripting.
    pub json_output: bool,
    /// Verbose output enabled.
    pub verbose: bool,
    /// Overrides the user config directory.
    pub config_dir: Option<PathBuf>,
    /// Overrides `[storage] data_dir`.
    pub data_dir: Option<PathBuf>,
}

impl Context {
    /// Discover and merge config layers, then apply CLI overrides.
    pub fn load_config(&self) -> Result<LoadedConfig> {
        let mut loaded = nudge_config::load_config(None, self.config_dir.as_deref());

        if let Some(ref data_dir) = self.data_dir {
            loaded.config.storage = Some(StorageConfig {
                data_dir: Some(data_dir.clone()),
                ..loaded.config.storage()
            });
        }

        for warning in &loaded.warnings {
            tracing::warn!("{}", warning);
        }
        Ok(loaded)
    }

    pub fn config(&self) -> Result<NudgeConfig> {
        Ok(self.load_config()?.config)
    }

    /// Build the routing engine over the configured data directory.
    pub async fn engine(&self) -> Result<RoutingEngine> {
        let config = self.config()?;
        RoutingEngine::initialize(&config)
            .await
            .context("Failed to open the pattern store")
    }
}

/// Print `value` as pretty JSON.
pub fn print_json<T: serde::Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

/// Section heading with a rule underneath.
pub fn print_heading(title: &str) {
    let dim = Style::new().dim();
    println!("{}", console::style(title).bold());
    println!("{}", dim.apply_to("─".repeat(50)));
}

/// Truncate a string to `max` characters, appending "..." when cut.
pub fn truncate(s: &str, max: usize) -> String {
    if s.chars().count() <= max {
        s.to_string()
    } else {
        let cut: String = s.chars().take(max.saturating_sub(3)).collect();
        format!("{}...", cut)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_truncate_counts_characters() {
        assert_eq!(truncate("短文本", 10), "短文本");
        assert_eq!(truncate("未说明糖尿病的并发症和用药", 8), "未说明糖尿...");
    }
}
