//! Common helpers for router integration tests.

#![allow(dead_code)]

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use nudge_llm::{RetryPolicy, SharedEmbedder, TableEmbedder};
use nudge_memory::{Category, EmbeddingCache, Severity, StoreConfig};
use nudge_router::{EngineSettings, RoutingEngine, SnapshotPaths, WeaknessEntry};
use tempfile::TempDir;

/// An engine over a temporary data directory.
pub struct TestEngine {
    pub engine: RoutingEngine,
    pub embedder: Arc<TableEmbedder>,
    pub dir: TempDir,
}

impl TestEngine {
    pub fn start(embedder: TableEmbedder) -> Result<Self> {
        Self::start_with(embedder, EngineSettings::default(), StoreConfig::default())
    }

    pub fn start_with(
        embedder: TableEmbedder,
        settings: EngineSettings,
        store_config: StoreConfig,
    ) -> Result<Self> {
        let dir = TempDir::new()?;
        let embedder = Arc::new(embedder);
        let engine = open_engine(dir.path(), embedder.clone(), settings, store_config)?;
        Ok(Self {
            engine,
            embedder,
            dir,
        })
    }

    pub fn paths(&self) -> SnapshotPaths {
        SnapshotPaths::in_dir(self.dir.path())
    }

    /// A second engine over the same directory with its own cache.
    pub fn open_sibling(&self, embedder: Arc<TableEmbedder>) -> Result<RoutingEngine> {
        open_engine(
            self.dir.path(),
            embedder,
            EngineSettings::default(),
            StoreConfig::default(),
        )
    }
}

pub fn open_engine(
    dir: &Path,
    embedder: Arc<TableEmbedder>,
    settings: EngineSettings,
    store_config: StoreConfig,
) -> Result<RoutingEngine> {
    let shared: SharedEmbedder = embedder;
    let cache = EmbeddingCache::in_memory(shared, fast_policy())?;
    Ok(RoutingEngine::open(
        SnapshotPaths::in_dir(dir),
        Arc::new(cache),
        store_config,
        settings,
        None,
    )?)
}

/// No retries and a short timeout, so failure paths finish quickly.
pub fn fast_policy() -> RetryPolicy {
    RetryPolicy {
        timeout: Duration::from_secs(2),
        max_retries: 0,
        initial_backoff: Duration::from_millis(1),
    }
}

pub fn weakness(id: &str, keywords: &[&str], reminder: &str) -> WeaknessEntry {
    WeaknessEntry {
        id: id.to_string(),
        category: Category::Vaccine,
        subcategory: None,
        description: None,
        keywords: keywords.iter().map(|k| k.to_string()).collect(),
        question_pattern: None,
        entity_types: vec![Category::Vaccine],
        reminder: reminder.to_string(),
        severity: Severity::Major,
        frequency: 0.4,
    }
}

pub fn write_catalog(dir: &Path, entries: &[WeaknessEntry]) -> Result<()> {
    let json = serde_json::json!({ "weaknesses": entries });
    std::fs::write(dir.join("weaknesses.json"), serde_json::to_string_pretty(&json)?)?;
    Ok(())
}

pub fn write_entities(dir: &Path, json: serde_json::Value) -> Result<()> {
    std::fs::write(dir.join("entity_names.json"), serde_json::to_string_pretty(&json)?)?;
    Ok(())
}
