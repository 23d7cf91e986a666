//! Stats command - pattern store and catalog statistics.

use std::collections::BTreeMap;

use anyhow::Result;
use clap::Args;
use console::{Style, style};

use super::{Context, print_heading, print_json};

/// Arguments for the stats command.
#[derive(Args, Debug)]
pub struct StatsArgs {
    /// Also list the most frequent patterns
    #[arg(long)]
    pub top: Option<usize>,
}

/// Run the stats command.
pub async fn run(args: StatsArgs, ctx: &Context) -> Result<()> {
    let engine = ctx.engine().await?;
    let stats = engine.stats();

    if ctx.json_output {
        return print_json(&stats);
    }

    let dim = Style::new().dim();

    print_heading("Pattern Store");
    println!();
    println!("  Patterns:    {}", style(stats.pattern_count).cyan());
    println!("  Frequency:   {}", style(stats.total_frequency).cyan());
    println!("  Clusters:    {}", style(stats.cluster_count).cyan());
    println!("  Dimensions:  {}", style(stats.dimensions).cyan());
    println!("  Index:       {}", style(stats.index_mode).cyan());
    println!("  Generation:  {}", dim.apply_to(stats.generation));
    println!();

    print_counts("By category", &stats.category_counts);
    print_counts("By severity", &stats.severity_counts);
    print_counts("By error type", &stats.error_type_counts);

    print_heading("Weakness Catalog");
    println!();
    if stats.catalog.total == 0 {
        println!("  {}", dim.apply_to("(no catalog, Tier 1 disabled)"));
        println!();
    } else {
        println!("  Entries:        {}", style(stats.catalog.total).cyan());
        println!("  Avg frequency:  {:.2}", stats.catalog.avg_frequency);
        println!();
        print_counts("By category", &stats.catalog.by_category);
        print_counts("By severity", &stats.catalog.by_severity);
    }

    print_heading("Entity Catalog");
    println!();
    if stats.entity_count == 0 && stats.out_of_domain_count == 0 {
        println!("  {}", dim.apply_to("(no entity catalog)"));
    } else {
        println!("  Entities:       {}", style(stats.entity_count).cyan());
        println!("  Out of domain:  {}", style(stats.out_of_domain_count).cyan());
    }
    println!();

    if let Some(n) = args.top {
        print_heading("Most Frequent");
        println!();
        for record in engine.top_patterns(n, None, 1) {
            println!(
                "  {:>4}×  {}  {}",
                style(record.frequency).cyan(),
                super::truncate(record.reminder_text(), 60),
                dim.apply_to(format!("[{}]", record.category))
            );
        }
        println!();
    }

    Ok(())
}

fn print_counts(label: &str, counts: &BTreeMap<String, usize>) {
    if counts.is_empty() {
        return;
    }
    println!("  {}", style(label).bold());
    for (key, count) in counts {
        println!("    {:<16} {}", key, count);
    }
    println!();
}
