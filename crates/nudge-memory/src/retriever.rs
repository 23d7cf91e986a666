//! Similarity retrieval of stored patterns for a question.

use serde::Serialize;
use tracing::debug;

use crate::error::Result;
use crate::store::PatternStore;
use crate::types::{Category, PatternRecord, Severity};
use crate::validation::validate_unit_interval;

/// Parameters of a single retrieval.
#[derive(Debug, Clone, PartialEq)]
pub struct RetrievalQuery {
    pub question: String,
    pub category_hint: Option<Category>,
    pub k: usize,
    pub similarity_threshold: f32,
    pub min_frequency: u32,
    pub min_severity: Option<Severity>,
}

impl RetrievalQuery {
    pub fn new(question: impl Into<String>) -> Self {
        Self {
            question: question.into(),
            category_hint: None,
            k: 3,
            similarity_threshold: 0.5,
            min_frequency: 1,
            min_severity: None,
        }
    }

    pub fn with_category(mut self, category: Option<Category>) -> Self {
        self.category_hint = category;
        self
    }

    pub fn with_k(mut self, k: usize) -> Self {
        self.k = k;
        self
    }

    pub fn with_threshold(mut self, threshold: f32) -> Self {
        self.similarity_threshold = threshold;
        self
    }

    pub fn with_min_frequency(mut self, min_frequency: u32) -> Self {
        self.min_frequency = min_frequency;
        self
    }

    pub fn with_min_severity(mut self, severity: Severity) -> Self {
        self.min_severity = Some(severity);
        self
    }
}

/// A stored pattern together with its similarity to the query.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RetrievedPattern {
    pub record: PatternRecord,
    pub similarity: f32,
}

/// Retrieves patterns by embedding similarity under category, frequency and
/// threshold constraints.
#[derive(Debug, Clone)]
pub struct Retriever {
    oversample_factor: usize,
}

impl Default for Retriever {
    fn default() -> Self {
        Self::new(3)
    }
}

impl Retriever {
    pub fn new(oversample_factor: usize) -> Self {
        Self {
            oversample_factor: oversample_factor.max(1),
        }
    }

    /// Embed the question and return at most `k` matching patterns.
    ///
    /// An empty result is a normal outcome, not an error.
    pub async fn retrieve(
        &self,
        store: &PatternStore,
        query: &RetrievalQuery,
    ) -> Result<Vec<RetrievedPattern>> {
        if query.k == 0 {
            return Ok(Vec::new());
        }
        let embedding = store.cache().get_or_compute(&query.question).await?;
        self.retrieve_with_embedding(store, query, &embedding)
    }

    /// Same as [`retrieve`](Self::retrieve) with a precomputed query vector.
    pub fn retrieve_with_embedding(
        &self,
        store: &PatternStore,
        query: &RetrievalQuery,
        embedding: &[f32],
    ) -> Result<Vec<RetrievedPattern>> {
        validate_unit_interval("similarity_threshold", query.similarity_threshold)?;

        // The candidate set depends only on k, so a higher threshold can only shrink the result.
        let fetch = query.k.saturating_mul(self.oversample_factor);
        let candidates = store.nearest(embedding, fetch)?;
        let fetched = candidates.len();

        let mut results: Vec<RetrievedPattern> = candidates
            .into_iter()
            .filter(|(record, similarity)| {
                record.category.matches(query.category_hint)
                    && record.frequency >= query.min_frequency
                    && query.min_severity.is_none_or(|min| record.severity >= min)
                    && *similarity >= query.similarity_threshold
            })
            .map(|(record, similarity)| RetrievedPattern { record, similarity })
            .collect();

        results.sort_by(|a, b| {
            b.similarity
                .total_cmp(&a.similarity)
                .then(b.record.severity.cmp(&a.record.severity))
        });
        results.truncate(query.k);

        debug!(
            fetched,
            returned = results.len(),
            threshold = query.similarity_threshold,
            category = ?query.category_hint,
            "Pattern retrieval"
        );
        Ok(results)
    }
}
