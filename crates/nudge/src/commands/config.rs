//! Config command - configuration management.

use anyhow::Result;
use clap::{Args, Subcommand};
use console::Style;

use super::{Context, print_json};

/// Arguments for the config command.
#[derive(Args, Debug)]
pub struct ConfigArgs {
    #[command(subcommand)]
    pub command: ConfigCommand,
}

#[derive(Subcommand, Debug)]
pub enum ConfigCommand {
    /// Show the resolved configuration and where it came from
    Show,

    /// Show configuration and data paths
    Path,

    /// Write a config file with every default spelled out
    Init {
        /// Create project-local config (./nudge.toml) instead of user config
        #[arg(long)]
        local: bool,

        /// Overwrite an existing file
        #[arg(long)]
        force: bool,
    },
}

/// Run the config command.
pub async fn run(args: ConfigArgs, ctx: &Context) -> Result<()> {
    match args.command {
        ConfigCommand::Show => cmd_show(ctx),
        ConfigCommand::Path => cmd_path(ctx),
        ConfigCommand::Init { local, force } => cmd_init(local, force, ctx),
    }
}

fn cmd_show(ctx: &Context) -> Result<()> {
    let loaded = ctx.load_config()?;
    let config = &loaded.config;
    config.validate()?;

    if ctx.json_output {
        return print_json(&effective(config));
    }

    let dim = Style::new().dim();
    println!("# nudge Configuration\n");

    let sources = &loaded.loaded_from;
    if sources.is_empty() {
        println!("No config files loaded (using defaults)\n");
    } else {
        println!("Config files:");
        for source in sources {
            println!("  {}", source.display());
        }
        println!();
    }

    for warning in &loaded.warnings {
        println!("{} {}", Style::new().yellow().apply_to("warning:"), warning);
    }
    if !loaded.warnings.is_empty() {
        println!();
    }

    let embedding = config.embedding();
    let key_status = match embedding.resolve_api_key() {
        Some(_) => Style::new().green().apply_to("key set"),
        None => dim.apply_to("no key"),
    };
    println!(
        "Embedding: {} ({} dims)  {}\n",
        embedding.provider.as_str(),
        embedding.dimensions,
        key_status
    );

    println!("{}", dim.apply_to("# Effective values"));
    println!("{}", effective(config).to_toml()?);
    Ok(())
}

fn cmd_path(ctx: &Context) -> Result<()> {
    let config = ctx.config()?;
    let storage = config.storage();
    let config_path = match ctx.config_dir {
        Some(ref dir) => Some(dir.join("config.toml")),
        None => nudge_config::user_config_path(),
    };

    if ctx.json_output {
        return print_json(&serde_json::json!({
            "config": config_path,
            "data_dir": storage.resolved_data_dir(),
            "patterns": storage.patterns_path(),
            "index": storage.index_path(),
            "cache": storage.cache_path(),
            "catalog": config.weakness().catalog_path(&storage),
            "entities": storage.entities_path(),
        }));
    }

    match config_path {
        Some(path) => println!("config:   {}", path.display()),
        None => println!("config:   (could not determine config directory)"),
    }
    println!("data:     {}", storage.resolved_data_dir().display());
    println!("patterns: {}", storage.patterns_path().display());
    println!("index:    {}", storage.index_path().display());
    println!("cache:    {}", storage.cache_path().display());
    println!(
        "catalog:  {}",
        config.weakness().catalog_path(&storage).display()
    );
    println!("entities: {}", storage.entities_path().display());
    Ok(())
}

fn cmd_init(local: bool, force: bool, ctx: &Context) -> Result<()> {
    let path = if local {
        std::path::PathBuf::from("nudge.toml")
    } else {
        match ctx.config_dir {
            Some(ref dir) => dir.join("config.toml"),
            None => nudge_config::user_config_path()
                .ok_or_else(|| anyhow::anyhow!("Could not determine config directory"))?,
        }
    };

    if path.exists() && !force {
        anyhow::bail!(
            "{} already exists (use --force to overwrite)",
            path.display()
        );
    }

    nudge_config::save_config(&effective(&nudge_config::NudgeConfig::default()), &path)?;
    println!("Created {}", path.display());
    Ok(())
}

/// Every section filled in, so the output shows defaults explicitly.
fn effective(config: &nudge_config::NudgeConfig) -> nudge_config::NudgeConfig {
    let mut embedding = config.embedding();
    // Never echo a configured key.
    if embedding.api_key.is_some() {
        embedding.api_key = Some("<redacted>".to_string());
    }
    let mut abstraction = config.abstraction();
    if abstraction.api_key.is_some() {
        abstraction.api_key = Some("<redacted>".to_string());
    }

    nudge_config::NudgeConfig {
        embedding: Some(embedding),
        storage: Some(config.storage()),
        index: Some(config.index()),
        dedup: Some(config.dedup()),
        retrieval: Some(config.retrieval()),
        weakness: Some(config.weakness()),
        clustering: Some(config.clustering()),
        abstraction: Some(abstraction),
        reload: Some(config.reload()),
        routing: Some(config.routing()),
    }
}
