//! Patterns command - manage the error-pattern store.

use std::path::{Path, PathBuf};

use anyhow::{Context as _, Result};
use clap::{Args, Subcommand};
use console::{Style, style};
use nudge_memory::{Category, ErrorType, InsertOutcome, NewPattern, PatternId, Severity};
use serde::Serialize;

use super::{Context, print_heading, print_json, truncate};

/// Arguments for the patterns command.
#[derive(Args, Debug)]
pub struct PatternsArgs {
    #[command(subcommand)]
    pub command: PatternsCommand,
}

#[derive(Subcommand, Debug)]
pub enum PatternsCommand {
    /// Record one error pattern (merged into a near-duplicate if one exists)
    Add {
        /// What went wrong in the answer
        description: String,

        /// How bad it was (minor, major, critical)
        #[arg(short, long, default_value = "major")]
        severity: Severity,

        /// Kind of error (factual_error, incomplete, misleading, irrelevant, unsafe, unclear)
        #[arg(short, long, default_value = "incomplete")]
        error_type: ErrorType,

        /// Category; inferred from the description when omitted
        #[arg(short, long)]
        category: Option<Category>,

        /// Reminder to inject instead of the description
        #[arg(short, long)]
        guideline: Option<String>,

        /// Question/answer excerpt that showed the error
        #[arg(long)]
        example: Option<String>,
    },

    /// Import patterns from a JSON array or JSON Lines file
    Import {
        /// File to read
        file: PathBuf,
    },

    /// List the most frequent patterns
    Top {
        /// Number of patterns to show
        #[arg(short = 'n', long, default_value = "10")]
        limit: usize,

        /// Only this category
        #[arg(short, long)]
        category: Option<Category>,

        /// Skip patterns seen fewer times than this
        #[arg(long, default_value = "1")]
        min_frequency: u32,
    },

    /// Remove patterns by id
    Purge {
        /// Pattern ids
        #[arg(required = true)]
        ids: Vec<PatternId>,
    },
}

/// Run the patterns command.
pub async fn run(args: PatternsArgs, ctx: &Context) -> Result<()> {
    match args.command {
        PatternsCommand::Add {
            description,
            severity,
            error_type,
            category,
            guideline,
            example,
        } => {
            let mut pattern = NewPattern::new(description, severity, error_type);
            pattern.category = category;
            pattern.guideline = guideline;
            pattern.example = example;
            cmd_add(pattern, ctx).await
        }
        PatternsCommand::Import { file } => cmd_import(&file, ctx).await,
        PatternsCommand::Top {
            limit,
            category,
            min_frequency,
        } => cmd_top(limit, category, min_frequency, ctx).await,
        PatternsCommand::Purge { ids } => cmd_purge(&ids, ctx).await,
    }
}

#[derive(Debug, Serialize)]
struct ImportSummary {
    inserted: usize,
    merged: usize,
    total_patterns: usize,
}

async fn cmd_add(pattern: NewPattern, ctx: &Context) -> Result<()> {
    let engine = ctx.engine().await?;
    let outcome = engine.insert_pattern(pattern).await?;
    engine.save().await?;

    if ctx.json_output {
        let similarity = match outcome {
            InsertOutcome::Merged { similarity, .. } => Some(similarity),
            InsertOutcome::Inserted(_) => None,
        };
        return print_json(&serde_json::json!({
            "id": outcome.id(),
            "merged": outcome.is_merge(),
            "similarity": similarity,
        }));
    }

    match outcome {
        InsertOutcome::Inserted(id) => {
            println!("{} {}", Style::new().green().apply_to("Added"), id);
        }
        InsertOutcome::Merged { id, similarity } => {
            let frequency = engine
                .snapshot()
                .store
                .get(&id)
                .map(|r| r.frequency)
                .unwrap_or_default();
            println!(
                "{} {} {}",
                Style::new().yellow().apply_to("Merged into"),
                id,
                Style::new()
                    .dim()
                    .apply_to(format!("(similarity {:.3}, seen {}×)", similarity, frequency))
            );
        }
    }
    Ok(())
}

async fn cmd_import(file: &Path, ctx: &Context) -> Result<()> {
    let contents = std::fs::read_to_string(file)
        .with_context(|| format!("Failed to read {}", file.display()))?;
    let patterns = parse_patterns(&contents)
        .with_context(|| format!("Failed to parse {}", file.display()))?;

    let engine = ctx.engine().await?;
    let outcomes = engine.insert_patterns(patterns).await?;
    engine.save().await?;

    let merged = outcomes.iter().filter(|o| o.is_merge()).count();
    let summary = ImportSummary {
        inserted: outcomes.len() - merged,
        merged,
        total_patterns: engine.stats().pattern_count,
    };

    if ctx.json_output {
        return print_json(&summary);
    }
    println!(
        "Imported {} patterns ({} new, {} merged); store now holds {}",
        style(outcomes.len()).cyan(),
        summary.inserted,
        summary.merged,
        style(summary.total_patterns).cyan()
    );
    Ok(())
}

async fn cmd_top(
    limit: usize,
    category: Option<Category>,
    min_frequency: u32,
    ctx: &Context,
) -> Result<()> {
    let engine = ctx.engine().await?;
    let records = engine.top_patterns(limit, category, min_frequency);

    if ctx.json_output {
        return print_json(&records);
    }

    let dim = Style::new().dim();
    print_heading("Most Frequent Patterns");
    println!();
    if records.is_empty() {
        println!("{}", dim.apply_to("No patterns"));
        return Ok(());
    }
    for (i, record) in records.iter().enumerate() {
        println!(
            "{}. {}",
            style(i + 1).cyan(),
            truncate(record.reminder_text(), 70)
        );
        println!(
            "   {}",
            dim.apply_to(format!(
                "{}× · {} · {} · {} · {}",
                record.frequency, record.category, record.severity, record.error_type, record.id
            ))
        );
    }
    println!();
    Ok(())
}

async fn cmd_purge(ids: &[PatternId], ctx: &Context) -> Result<()> {
    let engine = ctx.engine().await?;
    let removed = engine.purge(ids).await?;
    if removed > 0 {
        engine.save().await?;
    }

    if ctx.json_output {
        return print_json(&serde_json::json!({ "removed": removed }));
    }
    println!("Removed {} of {} patterns", style(removed).cyan(), ids.len());
    Ok(())
}

/// Accept a JSON array, or one JSON object per line.
fn parse_patterns(contents: &str) -> Result<Vec<NewPattern>> {
    let trimmed = contents.trim_start();
    if trimmed.starts_with('[') {
        return Ok(serde_json::from_str(trimmed)?);
    }

    contents
        .lines()
        .enumerate()
        .filter(|(_, line)| !line.trim().is_empty())
        .map(|(i, line)| {
            serde_json::from_str(line).with_context(|| format!("line {}", i + 1))
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_json_array() {
        let json = r#"[
            {"description": "未说明接种间隔", "severity": "major", "error_type": "incomplete"},
            {"description": "剂量错误", "severity": "critical", "error_type": "factual_error",
             "category": "disease", "guideline": "核对用药剂量"}
        ]"#;
        let patterns = parse_patterns(json).unwrap();
        assert_eq!(patterns.len(), 2);
        assert_eq!(patterns[1].category, Some(Category::Disease));
        assert_eq!(patterns[1].guideline.as_deref(), Some("核对用药剂量"));
    }

    #[test]
    fn test_parse_json_lines_skips_blanks() {
        let jsonl = "{\"description\": \"a\", \"severity\": \"minor\", \"error_type\": \"unclear\"}\n\n\
                     {\"description\": \"b\", \"severity\": \"minor\", \"error_type\": \"unclear\"}\n";
        assert_eq!(parse_patterns(jsonl).unwrap().len(), 2);
    }

    #[test]
    fn test_parse_reports_bad_line() {
        let jsonl = "{\"description\": \"a\", \"severity\": \"minor\", \"error_type\": \"unclear\"}\n\
                     {\"description\": \"b\"}\n";
        let err = parse_patterns(jsonl).unwrap_err();
        assert!(format!("{:#}", err).contains("line 2"));
    }
}
