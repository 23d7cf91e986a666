//! Cluster command - group stored patterns and pick representatives.

use anyhow::Result;
use clap::Args;
use console::{Style, style};
use nudge_memory::{ClusterReport, RepresentativeStrategy};

use super::{Context, print_heading, print_json, truncate};

/// Arguments for the cluster command.
#[derive(Args, Debug)]
pub struct ClusterArgs {
    /// Target number of clusters
    #[arg(short = 'k', long)]
    pub clusters: Option<usize>,

    /// Clusters smaller than this are folded into their nearest neighbour
    #[arg(long)]
    pub min_size: Option<usize>,

    /// Representative selection (highest_frequency, highest_severity, balanced)
    #[arg(long)]
    pub strategy: Option<RepresentativeStrategy>,

    /// Condense large clusters into one reminder with the configured chat model
    #[arg(long = "abstract")]
    pub abstract_clusters: bool,
}

/// Run the cluster command.
pub async fn run(args: ClusterArgs, ctx: &Context) -> Result<()> {
    let engine = ctx.engine().await?;

    let mut options = engine.settings().cluster.clone();
    if let Some(k) = args.clusters {
        options.target_clusters = k;
    }
    if let Some(min_size) = args.min_size {
        options.min_cluster_size = min_size;
    }
    if let Some(strategy) = args.strategy {
        options.strategy = strategy;
    }

    let report = engine.cluster(Some(options), args.abstract_clusters).await?;
    engine.save().await?;

    if ctx.json_output {
        return print_json(&report);
    }
    print_report(&report);
    Ok(())
}

fn print_report(report: &ClusterReport) {
    let dim = Style::new().dim();

    print_heading("Clusters");
    println!();
    println!(
        "  {} patterns in {} clusters",
        style(report.total_patterns).cyan(),
        style(report.clusters.len()).cyan()
    );
    if report.abstraction_failures > 0 {
        println!(
            "  {}",
            Style::new().yellow().apply_to(format!(
                "{} abstraction(s) failed; representatives kept",
                report.abstraction_failures
            ))
        );
    }
    println!();

    for cluster in &report.clusters {
        println!(
            "{} {}",
            style(format!("#{}", cluster.cluster_id)).cyan(),
            dim.apply_to(format!("({} patterns)", cluster.size))
        );
        println!("   {}", truncate(&cluster.representative_text, 70));
        if let Some(ref abstracted) = cluster.abstracted_reminder {
            println!("   {} {}", dim.apply_to("abstracted:"), truncate(abstracted, 60));
        }
        let mix: Vec<String> = cluster
            .by_category
            .iter()
            .map(|(category, count)| format!("{} {}", category, count))
            .collect();
        println!("   {}", dim.apply_to(mix.join(" · ")));
    }
    println!();
}
