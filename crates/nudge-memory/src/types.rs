//! Core record types for the pattern memory.
//!
//! - [`PatternRecord`]: one learned error pattern with its embedding
//! - [`NewPattern`]: a pattern submitted for insertion
//! - [`ClusterAssignment`]: the result of clustering, persisted with the records

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

use crate::error::MemoryError;

/// Examples kept per record; the oldest are dropped first.
pub const DEFAULT_MAX_EXAMPLES: usize = 5;

// ─────────────────────────────────────────────────────────────────────────────
// ID Types
// ─────────────────────────────────────────────────────────────────────────────

/// Unique identifier for a pattern record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PatternId(Uuid);

impl PatternId {
    /// Create a new random pattern ID.
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    pub fn from_uuid(uuid: Uuid) -> Self {
        Self(uuid)
    }

    pub fn from_bytes(bytes: [u8; 16]) -> Self {
        Self(Uuid::from_bytes(bytes))
    }

    pub fn as_bytes(&self) -> &[u8; 16] {
        self.0.as_bytes()
    }
}

impl Default for PatternId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for PatternId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for PatternId {
    type Err = MemoryError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Uuid::parse_str(s)
            .map(Self)
            .map_err(|e| MemoryError::InvalidData(format!("invalid pattern id '{}': {}", s, e)))
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Closed enums
// ─────────────────────────────────────────────────────────────────────────────

/// Medical topic a pattern or weakness belongs to.
///
/// `General` is the catch-all: it matches every category hint.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Category {
    #[serde(alias = "diseases")]
    Disease,
    #[serde(alias = "examinations")]
    Examination,
    #[serde(alias = "surgeries")]
    Surgery,
    #[serde(alias = "vaccines")]
    Vaccine,
    General,
}

impl Category {
    pub const ALL: [Category; 5] = [
        Category::Disease,
        Category::Examination,
        Category::Surgery,
        Category::Vaccine,
        Category::General,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Category::Disease => "disease",
            Category::Examination => "examination",
            Category::Surgery => "surgery",
            Category::Vaccine => "vaccine",
            Category::General => "general",
        }
    }

    /// Whether a record of this category may answer a query with `hint`.
    ///
    /// No hint matches everything, and `General` records match every hint.
    pub fn matches(self, hint: Option<Category>) -> bool {
        match hint {
            None => true,
            Some(hint) => self == Category::General || self == hint,
        }
    }
}

impl fmt::Display for Category {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Category {
    type Err = MemoryError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "disease" | "diseases" => Ok(Category::Disease),
            "examination" | "examinations" => Ok(Category::Examination),
            "surgery" | "surgeries" => Ok(Category::Surgery),
            "vaccine" | "vaccines" => Ok(Category::Vaccine),
            "general" => Ok(Category::General),
            other => Err(MemoryError::InvalidData(format!(
                "unknown category '{}'",
                other
            ))),
        }
    }
}

/// How harmful an error is. Ordered `Minor < Major < Critical`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Minor,
    Major,
    Critical,
}

impl Severity {
    pub const ALL: [Severity; 3] = [Severity::Minor, Severity::Major, Severity::Critical];

    pub fn as_str(&self) -> &'static str {
        match self {
            Severity::Minor => "minor",
            Severity::Major => "major",
            Severity::Critical => "critical",
        }
    }

    /// Numeric weight used by the balanced representative strategy.
    pub fn weight(&self) -> u32 {
        match self {
            Severity::Minor => 1,
            Severity::Major => 2,
            Severity::Critical => 3,
        }
    }
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Severity {
    type Err = MemoryError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "minor" => Ok(Severity::Minor),
            "major" => Ok(Severity::Major),
            "critical" => Ok(Severity::Critical),
            other => Err(MemoryError::InvalidData(format!(
                "unknown severity '{}'",
                other
            ))),
        }
    }
}

/// Kind of mistake the answer made.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorType {
    FactualError,
    Incomplete,
    Misleading,
    Irrelevant,
    Unsafe,
    Unclear,
}

impl ErrorType {
    pub const ALL: [ErrorType; 6] = [
        ErrorType::FactualError,
        ErrorType::Incomplete,
        ErrorType::Misleading,
        ErrorType::Irrelevant,
        ErrorType::Unsafe,
        ErrorType::Unclear,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorType::FactualError => "factual_error",
            ErrorType::Incomplete => "incomplete",
            ErrorType::Misleading => "misleading",
            ErrorType::Irrelevant => "irrelevant",
            ErrorType::Unsafe => "unsafe",
            ErrorType::Unclear => "unclear",
        }
    }
}

impl fmt::Display for ErrorType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ErrorType {
    type Err = MemoryError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let needle = s.trim().to_ascii_lowercase();
        ErrorType::ALL
            .into_iter()
            .find(|t| t.as_str() == needle)
            .ok_or_else(|| MemoryError::InvalidData(format!("unknown error type '{}'", s)))
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Records
// ─────────────────────────────────────────────────────────────────────────────

/// A learned error pattern.
///
/// The embedding is not serialized with the record; it lives in the index
/// artifact and is reattached on load.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PatternRecord {
    pub id: PatternId,
    pub description: String,
    pub guideline: Option<String>,
    pub category: Category,
    pub severity: Severity,
    pub error_type: ErrorType,
    pub frequency: u32,
    pub examples: Vec<String>,
    #[serde(skip)]
    pub embedding: Vec<f32>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub cluster_id: Option<usize>,
}

impl PatternRecord {
    /// Build a fresh record (frequency 1) from a submission.
    pub fn from_new(pattern: NewPattern, category: Category, embedding: Vec<f32>) -> Self {
        let now = Utc::now();
        Self {
            id: PatternId::new(),
            description: pattern.description,
            guideline: pattern.guideline,
            category,
            severity: pattern.severity,
            error_type: pattern.error_type,
            frequency: 1,
            examples: pattern.example.into_iter().collect(),
            embedding,
            created_at: now,
            updated_at: now,
            cluster_id: None,
        }
    }

    /// Text injected into a prompt: the guideline if present, else the description.
    pub fn reminder_text(&self) -> &str {
        self.guideline
            .as_deref()
            .filter(|g| !g.trim().is_empty())
            .unwrap_or(&self.description)
    }

    /// Fold a duplicate submission into this record.
    ///
    /// Frequency goes up by one, severity keeps the maximum, and the example
    /// list stays capped at `max_examples` by dropping the oldest.
    pub fn absorb(&mut self, duplicate: &NewPattern, max_examples: usize) {
        self.frequency = self.frequency.saturating_add(1);
        self.severity = self.severity.max(duplicate.severity);
        if self.guideline.is_none() {
            self.guideline = duplicate.guideline.clone();
        }
        if let Some(ref example) = duplicate.example {
            self.examples.push(example.clone());
        }
        if self.examples.len() > max_examples {
            let excess = self.examples.len() - max_examples;
            self.examples.drain(..excess);
        }
        self.updated_at = Utc::now();
    }
}

/// A pattern submitted for insertion.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewPattern {
    pub description: String,
    #[serde(default)]
    pub guideline: Option<String>,
    /// Left empty to have the store infer it from the description.
    #[serde(default)]
    pub category: Option<Category>,
    pub severity: Severity,
    pub error_type: ErrorType,
    /// Question/answer excerpt that exhibited the error.
    #[serde(default)]
    pub example: Option<String>,
}

impl NewPattern {
    pub fn new(description: impl Into<String>, severity: Severity, error_type: ErrorType) -> Self {
        Self {
            description: description.into(),
            guideline: None,
            category: None,
            severity,
            error_type,
            example: None,
        }
    }

    pub fn with_guideline(mut self, guideline: impl Into<String>) -> Self {
        self.guideline = Some(guideline.into());
        self
    }

    pub fn with_category(mut self, category: Category) -> Self {
        self.category = Some(category);
        self
    }

    pub fn with_example(mut self, example: impl Into<String>) -> Self {
        self.example = Some(example.into());
        self
    }
}

/// What `insert` did with a submission.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum InsertOutcome {
    /// A new record was created.
    Inserted(PatternId),
    /// The submission was folded into an existing near-duplicate.
    Merged { id: PatternId, similarity: f32 },
}

impl InsertOutcome {
    pub fn id(&self) -> PatternId {
        match self {
            InsertOutcome::Inserted(id) => *id,
            InsertOutcome::Merged { id, .. } => *id,
        }
    }

    pub fn is_merge(&self) -> bool {
        matches!(self, InsertOutcome::Merged { .. })
    }
}

/// One cluster produced by [`PatternStore::cluster`](crate::PatternStore::cluster).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClusterAssignment {
    pub cluster_id: usize,
    pub members: Vec<PatternId>,
    pub centroid: Vec<f32>,
    pub representative: PatternId,
    pub abstracted_reminder: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn new_pattern(severity: Severity, example: &str) -> NewPattern {
        NewPattern::new("desc", severity, ErrorType::Incomplete).with_example(example)
    }

    #[test]
    fn test_category_matches() {
        assert!(Category::Disease.matches(None));
        assert!(Category::Disease.matches(Some(Category::Disease)));
        assert!(!Category::Disease.matches(Some(Category::Vaccine)));
        for hint in Category::ALL {
            assert!(Category::General.matches(Some(hint)));
        }
    }

    #[test]
    fn test_category_serde_aliases() {
        let c: Category = serde_json::from_str("\"diseases\"").unwrap();
        assert_eq!(c, Category::Disease);
        let c: Category = serde_json::from_str("\"vaccine\"").unwrap();
        assert_eq!(c, Category::Vaccine);
        assert_eq!(
            serde_json::to_string(&Category::Surgery).unwrap(),
            "\"surgery\""
        );
        assert!(serde_json::from_str::<Category>("\"cardiology\"").is_err());
        assert_eq!("Examinations".parse::<Category>().unwrap(), Category::Examination);
    }

    #[test]
    fn test_severity_order() {
        assert!(Severity::Minor < Severity::Major);
        assert!(Severity::Major < Severity::Critical);
        assert_eq!(Severity::Minor.max(Severity::Critical), Severity::Critical);
    }

    #[test]
    fn test_error_type_round_trip_names() {
        for t in ErrorType::ALL {
            assert_eq!(t.as_str().parse::<ErrorType>().unwrap(), t);
            assert_eq!(
                serde_json::to_string(&t).unwrap(),
                format!("\"{}\"", t.as_str())
            );
        }
    }

    #[test]
    fn test_reminder_text_prefers_guideline() {
        let pattern = NewPattern::new("missed contraindication", Severity::Major, ErrorType::Unsafe);
        let mut record = PatternRecord::from_new(pattern, Category::Disease, vec![1.0]);
        assert_eq!(record.reminder_text(), "missed contraindication");

        record.guideline = Some("Always list contraindications".to_string());
        assert_eq!(record.reminder_text(), "Always list contraindications");

        record.guideline = Some("  ".to_string());
        assert_eq!(record.reminder_text(), "missed contraindication");
    }

    #[test]
    fn test_absorb_caps_examples_and_keeps_max_severity() {
        let mut record =
            PatternRecord::from_new(new_pattern(Severity::Critical, "e0"), Category::General, vec![]);
        for i in 1..7 {
            record.absorb(&new_pattern(Severity::Minor, &format!("e{}", i)), 5);
        }
        assert_eq!(record.frequency, 7);
        assert_eq!(record.severity, Severity::Critical);
        assert_eq!(record.examples, vec!["e2", "e3", "e4", "e5", "e6"]);
    }

    #[test]
    fn test_record_json_requires_fields() {
        let json = r#"{"id":"6f1c1c3e-52a8-4bde-9a55-6f8f1a9d7b10","description":"x"}"#;
        assert!(serde_json::from_str::<PatternRecord>(json).is_err());
    }

    #[test]
    fn test_record_json_skips_embedding() {
        let record = PatternRecord::from_new(
            new_pattern(Severity::Minor, "e"),
            Category::Vaccine,
            vec![0.5, 0.5],
        );
        let json = serde_json::to_string(&record).unwrap();
        assert!(!json.contains("embedding"));
        let back: PatternRecord = serde_json::from_str(&json).unwrap();
        assert!(back.embedding.is_empty());
        assert_eq!(back.id, record.id);
    }
}
