//! Route command - pick reminders for a question.

use std::time::Duration;

use anyhow::Result;
use clap::Args;
use console::{Style, style};
use nudge_memory::Category;
use nudge_router::{RouteRequest, RoutingDecision, Tier};

use super::{Context, print_heading, print_json};

/// Arguments for the route command.
#[derive(Args, Debug)]
pub struct RouteArgs {
    /// The question to route
    pub question: String,

    /// Category hint (disease, examination, surgery, vaccine, general)
    #[arg(short, long)]
    pub category: Option<Category>,

    /// Minimum retrieval similarity, overriding the configured threshold
    #[arg(long)]
    pub min_confidence: Option<f32>,

    /// Decision deadline in milliseconds
    #[arg(long)]
    pub deadline_ms: Option<u64>,

    /// Print only the prompt section the serving layer would inject
    #[arg(long)]
    pub prompt: bool,
}

/// Run the route command.
pub async fn run(args: RouteArgs, ctx: &Context) -> Result<()> {
    if let Some(min) = args.min_confidence
        && !(0.0..=1.0).contains(&min)
    {
        anyhow::bail!("--min-confidence must be within [0, 1], got {}", min);
    }

    let engine = ctx.engine().await?;

    let mut request = RouteRequest::new(args.question.as_str()).with_category(args.category);
    if let Some(min) = args.min_confidence {
        request = request.with_min_confidence(min);
    }
    if let Some(ms) = args.deadline_ms {
        request = request.with_deadline(Duration::from_millis(ms));
    }

    let decision = engine.route(request).await;

    if ctx.json_output {
        print_json(&decision)?;
    } else if args.prompt {
        print!("{}", decision.render_prompt_section());
    } else {
        print_decision(&args.question, &decision, ctx.verbose);
    }
    Ok(())
}

fn print_decision(question: &str, decision: &RoutingDecision, verbose: bool) {
    let dim = Style::new().dim();

    print_heading("Routing Decision");
    println!();
    if verbose {
        println!("  Question:    {}", question);
    }
    let tier = match decision.tier {
        Tier::Weakness => style(decision.tier.as_str()).green(),
        Tier::Retrieval => style(decision.tier.as_str()).cyan(),
        Tier::CategoryFallback => style(decision.tier.as_str()).yellow(),
    };
    println!("  Tier:        {}", tier);
    println!("  Confidence:  {:.3}", decision.confidence);
    let trace: Vec<&str> = decision.trace.iter().map(|t| t.as_str()).collect();
    println!("  Trace:       {}", dim.apply_to(trace.join(" → ")));
    if let Some(ref entity) = decision.entity {
        println!(
            "  Entity:      {} {}",
            entity.name,
            dim.apply_to(format!("({}, {} {:.2})", entity.category, entity.kind, entity.confidence))
        );
    }
    if let Some(ref reason) = decision.fallback_reason {
        println!("  Fallback:    {}", Style::new().red().apply_to(reason));
    }
    println!();

    if decision.reminders.is_empty() {
        println!("{}", dim.apply_to("No reminders"));
        return;
    }

    for (i, reminder) in decision.reminders.iter().enumerate() {
        println!("{}. {}", style(i + 1).cyan(), reminder.text);
        let mut detail = format!("score {:.3} · {}", reminder.score, reminder.source_id);
        if let Some(severity) = reminder.severity {
            detail.push_str(&format!(" · {}", severity.as_str()));
        }
        println!("   {}", dim.apply_to(detail));
    }
    println!();
}
