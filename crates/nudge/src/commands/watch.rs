//! Watch command - run the reload supervisor in the foreground.

use std::time::Duration;

use anyhow::Result;
use clap::Args;
use console::{Style, style};
use tracing::info;

use super::Context;

/// Arguments for the watch command.
#[derive(Args, Debug)]
pub struct WatchArgs {
    /// Poll on this interval instead of using filesystem notifications
    #[arg(long)]
    pub poll_secs: Option<u64>,
}

/// Run the watch command until Ctrl-C.
pub async fn run(args: WatchArgs, ctx: &Context) -> Result<()> {
    let engine = ctx.engine().await?;

    match args.poll_secs {
        Some(secs) => engine.spawn_polling(Duration::from_secs(secs.max(1))),
        None => engine.watch()?,
    }

    let counts = engine.snapshot().counts();
    println!(
        "{} {} ({} patterns, {} weaknesses)",
        style("Watching").green().bold(),
        engine.paths().store.patterns.display(),
        counts.patterns,
        counts.weaknesses
    );
    println!("{}", Style::new().dim().apply_to("Press Ctrl-C to stop"));

    tokio::signal::ctrl_c().await?;
    info!(generation = engine.snapshot().generation, "Stopping watch");
    engine.shutdown();
    Ok(())
}
