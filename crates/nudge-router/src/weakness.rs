//! Tier 1: rule-based matching against a curated catalog of known weaknesses.
//!
//! The catalog is small and authored by hand, so matching is plain keyword,
//! entity-type and regex checks with no embedding call.
//!
//! ```json
//! { "weaknesses": [ { "id": "vaccine-schedule", "category": "vaccine",
//!   "keywords": ["疫苗"], "question_pattern": "打几针|间隔",
//!   "entity_types": ["vaccine"], "reminder": "...",
//!   "severity": "major", "frequency": 0.4 } ] }
//! ```
//!
//! Triggers may also be nested, with plain substrings instead of a regex:
//!
//! ```json
//! { "weakness_id": "w1", "category": "diseases",
//!   "triggers": { "keywords": ["糖尿病"], "entity_types": ["diseases"],
//!                 "question_patterns": ["并发症", "能不能吃"] },
//!   "prompt_addition": "...", "severity": "major", "frequency": 0.5 }
//! ```
//!
//! Unknown fields are rejected, and so is an entry with no trigger at all.

use std::collections::{BTreeMap, HashSet};
use std::path::Path;

use nudge_config::{MatchWeights, WeaknessConfig};
use nudge_memory::{Category, Severity};
use regex::Regex;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::error::{Result, RouterError};

/// One known failure mode of the answering model.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct WeaknessEntry {
    #[serde(alias = "weakness_id")]
    pub id: String,
    pub category: Category,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub subcategory: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default)]
    pub keywords: Vec<String>,
    /// Regular expression tested against the question.
    #[serde(default)]
    pub question_pattern: Option<String>,
    /// Category hints that count as an entity match.
    #[serde(default)]
    pub entity_types: Vec<Category>,
    #[serde(alias = "prompt_addition")]
    pub reminder: String,
    pub severity: Severity,
    /// Share of evaluated answers that showed this weakness, 0.0 to 1.0.
    pub frequency: f32,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct CatalogFile {
    /// Free-form provenance, ignored.
    #[serde(default)]
    #[allow(dead_code)]
    metadata: Option<serde_json::Value>,
    weaknesses: Vec<CatalogEntry>,
}

/// An entry as written on disk, flat or with nested `triggers`.
#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct CatalogEntry {
    #[serde(alias = "weakness_id")]
    id: String,
    category: Category,
    #[serde(default)]
    subcategory: Option<String>,
    #[serde(default)]
    description: Option<String>,
    #[serde(default)]
    keywords: Vec<String>,
    #[serde(default)]
    question_pattern: Option<String>,
    #[serde(default)]
    entity_types: Vec<Category>,
    #[serde(default)]
    triggers: Option<Triggers>,
    #[serde(alias = "prompt_addition")]
    reminder: String,
    severity: Severity,
    frequency: f32,
}

#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
struct Triggers {
    #[serde(default)]
    keywords: Vec<String>,
    #[serde(default)]
    entity_types: Vec<Category>,
    /// Literal substrings; any one matching counts as a pattern hit.
    #[serde(default)]
    question_patterns: Vec<String>,
}

impl From<CatalogEntry> for WeaknessEntry {
    fn from(raw: CatalogEntry) -> Self {
        let triggers = raw.triggers.unwrap_or_default();

        let mut keywords = raw.keywords;
        for keyword in triggers.keywords {
            if !keywords.contains(&keyword) {
                keywords.push(keyword);
            }
        }
        let mut entity_types = raw.entity_types;
        for entity_type in triggers.entity_types {
            if !entity_types.contains(&entity_type) {
                entity_types.push(entity_type);
            }
        }

        let literals: Vec<String> = triggers
            .question_patterns
            .iter()
            .filter(|p| !p.is_empty())
            .map(|p| regex::escape(p))
            .collect();
        let flat = raw.question_pattern.filter(|p| !p.is_empty());
        let question_pattern = match (flat, literals.is_empty()) {
            (pattern, true) => pattern,
            (None, false) => Some(literals.join("|")),
            (Some(pattern), false) => Some(format!("(?:{})|{}", pattern, literals.join("|"))),
        };

        Self {
            id: raw.id,
            category: raw.category,
            subcategory: raw.subcategory,
            description: raw.description,
            keywords,
            question_pattern,
            entity_types,
            reminder: raw.reminder,
            severity: raw.severity,
            frequency: raw.frequency,
        }
    }
}

#[derive(Debug, Clone)]
struct CompiledEntry {
    entry: WeaknessEntry,
    keywords: Vec<String>,
    pattern: Option<Regex>,
}

/// Validated weakness entries with their patterns compiled.
#[derive(Debug, Clone, Default)]
pub struct WeaknessCatalog {
    entries: Vec<CompiledEntry>,
}

/// Catalog composition.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CatalogStats {
    pub total: usize,
    pub by_category: BTreeMap<String, usize>,
    pub by_severity: BTreeMap<String, usize>,
    pub avg_frequency: f32,
}

impl WeaknessCatalog {
    pub fn empty() -> Self {
        Self::default()
    }

    /// Validate entries and compile their question patterns.
    pub fn new(entries: Vec<WeaknessEntry>) -> Result<Self> {
        let mut seen = HashSet::new();
        let mut compiled = Vec::with_capacity(entries.len());

        for entry in entries {
            if entry.id.trim().is_empty() {
                return Err(invalid_entry("entry with an empty id"));
            }
            if !seen.insert(entry.id.clone()) {
                return Err(invalid_entry(format!("duplicate weakness id '{}'", entry.id)));
            }
            if !(0.0..=1.0).contains(&entry.frequency) {
                return Err(invalid_entry(format!(
                    "weakness '{}' has frequency {} outside [0, 1]",
                    entry.id, entry.frequency
                )));
            }
            if entry.reminder.trim().is_empty() {
                return Err(invalid_entry(format!(
                    "weakness '{}' has an empty reminder",
                    entry.id
                )));
            }

            let pattern = match entry.question_pattern.as_deref() {
                Some(p) if !p.is_empty() => {
                    Some(Regex::new(p).map_err(|source| RouterError::InvalidPattern {
                        id: entry.id.clone(),
                        source,
                    })?)
                }
                _ => None,
            };
            let keywords: Vec<String> = entry
                .keywords
                .iter()
                .map(|k| k.trim().to_lowercase())
                .filter(|k| !k.is_empty())
                .collect();
            if keywords.is_empty() && entry.entity_types.is_empty() && pattern.is_none() {
                return Err(invalid_entry(format!(
                    "weakness '{}' has no keywords, entity types or question pattern",
                    entry.id
                )));
            }

            compiled.push(CompiledEntry {
                entry,
                keywords,
                pattern,
            });
        }

        Ok(Self { entries: compiled })
    }

    /// Parse a catalog document. `origin` is only used in error messages.
    pub fn from_json(json: &str, origin: &Path) -> Result<Self> {
        let file: CatalogFile =
            serde_json::from_str(json).map_err(|e| RouterError::InvalidCatalog {
                path: origin.to_path_buf(),
                reason: e.to_string(),
            })?;
        let entries = file.weaknesses.into_iter().map(WeaknessEntry::from).collect();
        Self::new(entries).map_err(|e| match e {
            RouterError::InvalidCatalog { reason, .. } => RouterError::InvalidCatalog {
                path: origin.to_path_buf(),
                reason,
            },
            other => other,
        })
    }

    /// Load from disk. A missing file is an empty catalog.
    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            debug!(path = %path.display(), "No weakness catalog, Tier 1 disabled");
            return Ok(Self::empty());
        }
        let json = std::fs::read_to_string(path)?;
        let catalog = Self::from_json(&json, path)?;
        info!(path = %path.display(), entries = catalog.len(), "Loaded weakness catalog");
        Ok(catalog)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn entries(&self) -> impl Iterator<Item = &WeaknessEntry> {
        self.entries.iter().map(|c| &c.entry)
    }

    pub fn stats(&self) -> CatalogStats {
        let mut by_category = BTreeMap::new();
        let mut by_severity = BTreeMap::new();
        let mut frequency_sum = 0.0f32;

        for entry in self.entries() {
            *by_category.entry(entry.category.to_string()).or_insert(0) += 1;
            *by_severity
                .entry(entry.severity.as_str().to_string())
                .or_insert(0) += 1;
            frequency_sum += entry.frequency;
        }

        CatalogStats {
            total: self.len(),
            by_category,
            by_severity,
            avg_frequency: if self.is_empty() {
                0.0
            } else {
                frequency_sum / self.len() as f32
            },
        }
    }
}

fn invalid_entry(reason: impl Into<String>) -> RouterError {
    RouterError::InvalidCatalog {
        path: Default::default(),
        reason: reason.into(),
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Matcher
// ─────────────────────────────────────────────────────────────────────────────

/// Matcher thresholds and signal weights.
#[derive(Debug, Clone, PartialEq)]
pub struct MatcherConfig {
    pub weights: MatchWeights,
    pub top_k: usize,
    pub min_score: f32,
    /// Entries observed less often than this are skipped entirely.
    pub min_frequency: f32,
}

impl Default for MatcherConfig {
    fn default() -> Self {
        Self::from(&WeaknessConfig::default())
    }
}

impl From<&WeaknessConfig> for MatcherConfig {
    fn from(config: &WeaknessConfig) -> Self {
        Self {
            weights: config.weights,
            top_k: config.top_k,
            min_score: config.min_score,
            min_frequency: config.min_frequency,
        }
    }
}

/// A catalog entry that fired, with its score.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct WeaknessMatch {
    pub entry: WeaknessEntry,
    pub score: f32,
}

#[derive(Debug, Clone, Default)]
pub struct WeaknessMatcher {
    config: MatcherConfig,
}

impl WeaknessMatcher {
    pub fn new(config: MatcherConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &MatcherConfig {
        &self.config
    }

    /// Score every eligible entry and return the best `top_k`, strongest first.
    ///
    /// Ties on score are broken by catalog frequency.
    pub fn match_question(
        &self,
        catalog: &WeaknessCatalog,
        question: &str,
        entity_hint: Option<Category>,
    ) -> Vec<WeaknessMatch> {
        let lowered = question.to_lowercase();

        let mut matches: Vec<WeaknessMatch> = catalog
            .entries
            .iter()
            .filter(|c| c.entry.frequency >= self.config.min_frequency)
            .filter_map(|c| {
                let score = self.score(c, question, &lowered, entity_hint);
                (score > 0.0 && score >= self.config.min_score).then(|| WeaknessMatch {
                    entry: c.entry.clone(),
                    score,
                })
            })
            .collect();

        matches.sort_by(|a, b| {
            b.score
                .total_cmp(&a.score)
                .then(b.entry.frequency.total_cmp(&a.entry.frequency))
        });
        matches.truncate(self.config.top_k);

        if !matches.is_empty() {
            debug!(
                ids = ?matches.iter().map(|m| m.entry.id.as_str()).collect::<Vec<_>>(),
                "Weakness match"
            );
        }
        matches
    }

    fn score(
        &self,
        compiled: &CompiledEntry,
        question: &str,
        lowered: &str,
        entity_hint: Option<Category>,
    ) -> f32 {
        let weights = &self.config.weights;
        let mut score = 0.0;

        if !compiled.keywords.is_empty() {
            let hits = compiled
                .keywords
                .iter()
                .filter(|k| lowered.contains(k.as_str()))
                .count();
            score += weights.keyword * hits as f32 / compiled.keywords.len() as f32;
        }

        if let Some(hint) = entity_hint
            && compiled.entry.entity_types.contains(&hint)
        {
            score += weights.entity;
        }

        if let Some(pattern) = &compiled.pattern
            && pattern.is_match(question)
        {
            score += weights.pattern;
        }

        score.clamp(0.0, 1.0)
    }
}
