//! Entity-name resolution: which known medical entity a question is about.
//!
//! The catalog lists entity names per category plus topics known to be
//! outside the knowledge base:
//!
//! ```json
//! { "diseases": ["糖尿病", "高血压"], "vaccines": ["乙肝疫苗"],
//!   "out_of_domain": ["婴儿摇晃综合征"] }
//! ```
//!
//! An exact name match supplies the category for routing when the request
//! carries none. An out-of-domain topic skips retrieval entirely.

use std::collections::HashSet;
use std::fmt;
use std::path::Path;

use nudge_memory::Category;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::error::{Result, RouterError};

/// Confidence of a full entity name found in the question.
pub const EXACT_MATCH_CONFIDENCE: f32 = 0.95;

/// Confidence of a name prefix found in the question.
pub const PARTIAL_MATCH_CONFIDENCE: f32 = 0.6;

/// Characters of a name compared in a partial match.
const PREFIX_CHARS: usize = 3;

/// Prefixes containing these say nothing about the specific entity.
const GENERIC_TERMS: &[&str] = &["检查", "手术", "疫苗"];

#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
struct EntityFile {
    #[serde(default, alias = "diseases")]
    disease: Vec<String>,
    #[serde(default, alias = "examinations")]
    examination: Vec<String>,
    #[serde(default, alias = "surgeries")]
    surgery: Vec<String>,
    #[serde(default, alias = "vaccines")]
    vaccine: Vec<String>,
    #[serde(default)]
    out_of_domain: Vec<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MatchKind {
    Exact,
    Partial,
}

impl fmt::Display for MatchKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MatchKind::Exact => f.write_str("exact"),
            MatchKind::Partial => f.write_str("partial"),
        }
    }
}

/// A known entity the question mentions.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EntityMatch {
    pub name: String,
    pub category: Category,
    pub kind: MatchKind,
    pub confidence: f32,
}

/// What the entity catalog says about a question.
#[derive(Debug, Clone, PartialEq)]
pub enum EntityLookup {
    Entity(EntityMatch),
    /// The question is about a topic the knowledge base does not cover.
    OutOfDomain(String),
    Unknown,
}

impl EntityLookup {
    pub fn entity(&self) -> Option<&EntityMatch> {
        match self {
            EntityLookup::Entity(m) => Some(m),
            _ => None,
        }
    }

    pub fn category(&self) -> Option<Category> {
        self.entity().map(|m| m.category)
    }
}

#[derive(Debug, Clone)]
struct KnownEntity {
    name: String,
    category: Category,
    prefix: Option<String>,
}

/// Entity names by category, longest names first.
#[derive(Debug, Clone, Default)]
pub struct EntityCatalog {
    entities: Vec<KnownEntity>,
    out_of_domain: Vec<String>,
}

impl EntityCatalog {
    pub fn empty() -> Self {
        Self::default()
    }

    /// Build from `(category, names)` groups and out-of-domain topics.
    ///
    /// A name listed under several categories keeps the first one.
    pub fn new<I, N>(groups: I, out_of_domain: Vec<String>) -> Self
    where
        I: IntoIterator<Item = (Category, N)>,
        N: IntoIterator<Item = String>,
    {
        let mut seen = HashSet::new();
        let mut entities = Vec::new();
        for (category, names) in groups {
            for name in names {
                let name = name.trim().to_string();
                if name.is_empty() || !seen.insert(name.clone()) {
                    continue;
                }
                entities.push(KnownEntity {
                    prefix: partial_prefix(&name),
                    name,
                    category,
                });
            }
        }
        // Longest first, so "乙肝疫苗" wins over "乙肝".
        entities.sort_by(|a, b| {
            b.name
                .chars()
                .count()
                .cmp(&a.name.chars().count())
                .then_with(|| a.name.cmp(&b.name))
        });

        let out_of_domain = out_of_domain
            .into_iter()
            .map(|t| t.trim().to_string())
            .filter(|t| !t.is_empty())
            .collect();

        Self {
            entities,
            out_of_domain,
        }
    }

    /// Parse an entity document. `origin` is only used in error messages.
    pub fn from_json(json: &str, origin: &Path) -> Result<Self> {
        let file: EntityFile =
            serde_json::from_str(json).map_err(|e| RouterError::InvalidEntities {
                path: origin.to_path_buf(),
                reason: e.to_string(),
            })?;
        Ok(Self::new(
            [
                (Category::Disease, file.disease),
                (Category::Examination, file.examination),
                (Category::Surgery, file.surgery),
                (Category::Vaccine, file.vaccine),
            ],
            file.out_of_domain,
        ))
    }

    /// Load from disk. A missing file is an empty catalog.
    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            debug!(path = %path.display(), "No entity catalog, entity resolution disabled");
            return Ok(Self::empty());
        }
        let json = std::fs::read_to_string(path)?;
        let catalog = Self::from_json(&json, path)?;
        info!(
            path = %path.display(),
            entities = catalog.len(),
            out_of_domain = catalog.out_of_domain_len(),
            "Loaded entity catalog"
        );
        Ok(catalog)
    }

    pub fn len(&self) -> usize {
        self.entities.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entities.is_empty() && self.out_of_domain.is_empty()
    }

    pub fn out_of_domain_len(&self) -> usize {
        self.out_of_domain.len()
    }

    /// Exact names first, then out-of-domain topics, then name prefixes.
    pub fn lookup(&self, question: &str) -> EntityLookup {
        if let Some(known) = self.entities.iter().find(|e| question.contains(&e.name)) {
            return EntityLookup::Entity(known.to_match(MatchKind::Exact));
        }

        if let Some(topic) = self
            .out_of_domain
            .iter()
            .find(|t| question.contains(t.as_str()))
        {
            return EntityLookup::OutOfDomain(topic.clone());
        }

        self.entities
            .iter()
            .find(|e| {
                e.prefix
                    .as_deref()
                    .is_some_and(|prefix| question.contains(prefix))
            })
            .map(|known| EntityLookup::Entity(known.to_match(MatchKind::Partial)))
            .unwrap_or(EntityLookup::Unknown)
    }
}

impl KnownEntity {
    fn to_match(&self, kind: MatchKind) -> EntityMatch {
        EntityMatch {
            name: self.name.clone(),
            category: self.category,
            kind,
            confidence: match kind {
                MatchKind::Exact => EXACT_MATCH_CONFIDENCE,
                MatchKind::Partial => PARTIAL_MATCH_CONFIDENCE,
            },
        }
    }
}

/// Leading characters used for partial matches; `None` for short names and
/// prefixes that are only a generic term.
fn partial_prefix(name: &str) -> Option<String> {
    if name.chars().count() <= PREFIX_CHARS {
        return None;
    }
    let prefix: String = name.chars().take(PREFIX_CHARS).collect();
    if GENERIC_TERMS.iter().any(|term| prefix.contains(term)) {
        return None;
    }
    Some(prefix)
}
