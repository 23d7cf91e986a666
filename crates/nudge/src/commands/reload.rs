//! Reload command - validate the on-disk snapshot.
//!
//! Loading fails on any corrupt artifact or invalid catalog, which makes this
//! a pre-deployment check: a non-zero exit means a running engine would
//! reject the same files.

use anyhow::Result;
use clap::Args;
use console::style;

use super::{Context, print_heading, print_json};

/// Arguments for the reload command.
#[derive(Args, Debug)]
pub struct ReloadArgs {}

/// Run the reload command.
pub async fn run(_args: ReloadArgs, ctx: &Context) -> Result<()> {
    let engine = ctx.engine().await?;
    let outcome = engine.force_reload().await?;

    if ctx.json_output {
        return print_json(&outcome);
    }

    print_heading("Snapshot OK");
    println!();
    println!("  Patterns:    {}", style(outcome.counts.patterns).cyan());
    println!("  Clusters:    {}", style(outcome.counts.clusters).cyan());
    println!("  Weaknesses:  {}", style(outcome.counts.weaknesses).cyan());
    println!("  Entities:    {}", style(outcome.counts.entities).cyan());
    println!();
    Ok(())
}
