//! Pattern store: deduplicating storage of error patterns.
//!
//! Records and their index live behind one `parking_lot::RwLock`. Writers
//! (insert, cluster, purge) additionally serialize on an async write gate, so
//! the slow parts of a write (embedding, abstraction) run without holding the
//! data lock and readers are never blocked on a provider call.
//!
//! - `insert()`: embed, find the nearest record, merge or add
//! - `cluster()`: k-means grouping with representatives (see [`cluster`])
//! - `purge()`: explicit administrative removal
//! - `save()` / `load()`: `patterns.json` + index artifact (see [`persist`])

mod category;
pub mod cluster;
pub mod persist;

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use parking_lot::RwLock;
use serde::Serialize;
use tracing::{debug, info};

use crate::cache::EmbeddingCache;
use crate::error::{MemoryError, Result};
use crate::index::{IndexConfig, IndexMode, VectorIndex};
use crate::types::{
    Category, ClusterAssignment, DEFAULT_MAX_EXAMPLES, InsertOutcome, NewPattern, PatternId,
    PatternRecord,
};
use crate::validation::validate_unit_interval;

pub use category::infer_category;
pub use cluster::{ClusterOptions, ClusterReport, ClusterSummary, RepresentativeStrategy};
pub use persist::StorePaths;

// ─────────────────────────────────────────────────────────────────────────────
// Configuration
// ─────────────────────────────────────────────────────────────────────────────

/// Tuning for a [`PatternStore`].
#[derive(Debug, Clone, PartialEq)]
pub struct StoreConfig {
    /// Cosine similarity at or above which a submission merges into an existing record.
    pub merge_threshold: f32,
    /// Examples kept per record.
    pub max_examples: usize,
    /// Re-infer the category when a submission says `general`.
    pub infer_general: bool,
    pub index: IndexConfig,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            merge_threshold: 0.95,
            max_examples: DEFAULT_MAX_EXAMPLES,
            infer_general: true,
            index: IndexConfig::default(),
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Statistics
// ─────────────────────────────────────────────────────────────────────────────

/// Counts over the stored records.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StoreStats {
    pub total_patterns: usize,
    pub total_frequency: u64,
    pub by_category: BTreeMap<String, usize>,
    pub by_severity: BTreeMap<String, usize>,
    pub by_error_type: BTreeMap<String, usize>,
    pub cluster_count: usize,
    pub dimensions: usize,
    pub index_mode: IndexMode,
}

// ─────────────────────────────────────────────────────────────────────────────
// Store
// ─────────────────────────────────────────────────────────────────────────────

#[derive(Debug)]
pub(crate) struct StoreData {
    pub(crate) records: Vec<PatternRecord>,
    pub(crate) positions: HashMap<PatternId, usize>,
    pub(crate) index: VectorIndex,
    pub(crate) clusters: Vec<ClusterAssignment>,
}

impl StoreData {
    fn empty(index: VectorIndex) -> Self {
        Self {
            records: Vec::new(),
            positions: HashMap::new(),
            index,
            clusters: Vec::new(),
        }
    }

    fn reindex_positions(&mut self) {
        self.positions = self
            .records
            .iter()
            .enumerate()
            .map(|(i, r)| (r.id, i))
            .collect();
    }

    fn get_mut(&mut self, id: &PatternId) -> Option<&mut PatternRecord> {
        let position = *self.positions.get(id)?;
        self.records.get_mut(position)
    }
}

/// Deduplicating store of [`PatternRecord`]s with a vector index.
pub struct PatternStore {
    pub(crate) data: RwLock<StoreData>,
    cache: Arc<EmbeddingCache>,
    write_gate: tokio::sync::Mutex<()>,
    config: StoreConfig,
}

impl std::fmt::Debug for PatternStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PatternStore")
            .field("patterns", &self.len())
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

impl PatternStore {
    /// Create an empty store whose dimension is the cache's embedder dimension.
    pub fn new(cache: Arc<EmbeddingCache>, config: StoreConfig) -> Result<Self> {
        validate_unit_interval("merge_threshold", config.merge_threshold)?;
        let index = VectorIndex::new(cache.dimensions(), config.index.clone())?;
        Ok(Self::from_data(StoreData::empty(index), cache, config))
    }

    pub(crate) fn from_data(data: StoreData, cache: Arc<EmbeddingCache>, config: StoreConfig) -> Self {
        Self {
            data: RwLock::new(data),
            cache,
            write_gate: tokio::sync::Mutex::new(()),
            config,
        }
    }

    pub fn cache(&self) -> &Arc<EmbeddingCache> {
        &self.cache
    }

    pub fn config(&self) -> &StoreConfig {
        &self.config
    }

    pub fn dimensions(&self) -> usize {
        self.cache.dimensions()
    }

    /// Insert a pattern, merging it into a near-duplicate when one exists.
    pub async fn insert(&self, pattern: NewPattern) -> Result<InsertOutcome> {
        if pattern.description.trim().is_empty() {
            return Err(MemoryError::InvalidData(
                "pattern description is empty".to_string(),
            ));
        }

        let _gate = self.write_gate.lock().await;
        let embedding = self.cache.get_or_compute(&pattern.description).await?;

        let category = match pattern.category {
            Some(Category::General) if self.config.infer_general => {
                infer_category(&pattern.description)
            }
            Some(category) => category,
            None => infer_category(&pattern.description),
        };

        let mut data = self.data.write();
        let nearest = data.index.search(&embedding, 1)?.into_iter().next();

        if let Some((id, similarity)) = nearest
            && similarity >= self.config.merge_threshold
            && let Some(record) = data.get_mut(&id)
        {
            record.absorb(&pattern, self.config.max_examples);
            debug!(
                pattern_id = %id,
                similarity,
                frequency = record.frequency,
                "Merged duplicate pattern"
            );
            return Ok(InsertOutcome::Merged { id, similarity });
        }

        let record = PatternRecord::from_new(pattern, category, embedding.clone());
        let id = record.id;
        data.index.add(id, embedding)?;
        let position = data.records.len();
        data.records.push(record);
        data.positions.insert(id, position);

        debug!(pattern_id = %id, category = %category, "Inserted pattern");
        Ok(InsertOutcome::Inserted(id))
    }

    /// Insert many patterns in order. Stops at the first error.
    pub async fn insert_batch(&self, patterns: Vec<NewPattern>) -> Result<Vec<InsertOutcome>> {
        let mut outcomes = Vec::with_capacity(patterns.len());
        for pattern in patterns {
            outcomes.push(self.insert(pattern).await?);
        }
        let merged = outcomes.iter().filter(|o| o.is_merge()).count();
        info!(
            inserted = outcomes.len() - merged,
            merged,
            "Batch insert complete"
        );
        Ok(outcomes)
    }

    /// Remove records by id. Returns how many existed.
    ///
    /// Cluster assignments are trimmed, not recomputed: purged members leave
    /// their cluster, emptied clusters disappear and a purged representative
    /// is replaced. A trimmed cluster may fall below the `min_cluster_size`
    /// it was built with until the next [`cluster`](Self::cluster) call.
    pub async fn purge(&self, ids: &[PatternId]) -> Result<usize> {
        let _gate = self.write_gate.lock().await;
        let mut data = self.data.write();

        let before = data.records.len();
        data.records.retain(|r| !ids.contains(&r.id));
        let removed = before - data.records.len();
        if removed == 0 {
            return Ok(0);
        }

        data.reindex_positions();
        data.index.remove(ids);

        let StoreData {
            records,
            positions,
            clusters,
            ..
        } = &mut *data;
        clusters.retain_mut(|cluster| {
            cluster.members.retain(|id| positions.contains_key(id));
            if !positions.contains_key(&cluster.representative)
                && let Some(best) = cluster
                    .members
                    .iter()
                    .filter_map(|id| positions.get(id).map(|&p| &records[p]))
                    .max_by_key(|r| (r.frequency, r.severity))
            {
                cluster.representative = best.id;
            }
            !cluster.members.is_empty()
        });

        info!(removed, remaining = data.records.len(), "Purged patterns");
        Ok(removed)
    }

    pub fn get(&self, id: &PatternId) -> Option<PatternRecord> {
        let data = self.data.read();
        data.positions.get(id).map(|&p| data.records[p].clone())
    }

    pub fn len(&self) -> usize {
        self.data.read().records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// All records in insertion order.
    pub fn records(&self) -> Vec<PatternRecord> {
        self.data.read().records.clone()
    }

    pub fn clusters(&self) -> Vec<ClusterAssignment> {
        self.data.read().clusters.clone()
    }

    pub fn index_mode(&self) -> IndexMode {
        self.data.read().index.mode()
    }

    /// The `k` records nearest to `embedding`, most similar first.
    pub fn nearest(&self, embedding: &[f32], k: usize) -> Result<Vec<(PatternRecord, f32)>> {
        let data = self.data.read();
        let hits = data.index.search(embedding, k)?;
        Ok(hits
            .into_iter()
            .filter_map(|(id, sim)| data.positions.get(&id).map(|&p| (data.records[p].clone(), sim)))
            .collect())
    }

    /// Most frequent records first, optionally restricted to one category.
    pub fn top_patterns(
        &self,
        n: usize,
        category: Option<Category>,
        min_frequency: u32,
    ) -> Vec<PatternRecord> {
        let data = self.data.read();
        let mut selected: Vec<&PatternRecord> = data
            .records
            .iter()
            .filter(|r| category.is_none_or(|c| r.category == c))
            .filter(|r| r.frequency >= min_frequency)
            .collect();
        selected.sort_by(|a, b| {
            b.frequency
                .cmp(&a.frequency)
                .then(b.severity.cmp(&a.severity))
        });
        selected.into_iter().take(n).cloned().collect()
    }

    pub fn stats(&self) -> StoreStats {
        let data = self.data.read();
        let mut by_category = BTreeMap::new();
        let mut by_severity = BTreeMap::new();
        let mut by_error_type = BTreeMap::new();
        let mut total_frequency = 0u64;

        for record in &data.records {
            *by_category.entry(record.category.to_string()).or_insert(0) += 1;
            *by_severity.entry(record.severity.to_string()).or_insert(0) += 1;
            *by_error_type.entry(record.error_type.to_string()).or_insert(0) += 1;
            total_frequency += record.frequency as u64;
        }

        StoreStats {
            total_patterns: data.records.len(),
            total_frequency,
            by_category,
            by_severity,
            by_error_type,
            cluster_count: data.clusters.len(),
            dimensions: data.index.dimensions(),
            index_mode: data.index.mode(),
        }
    }
}
