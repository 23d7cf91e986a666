//! Immutable routing state and the single pointer readers go through.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use nudge_config::NudgeConfig;
use nudge_memory::{EmbeddingCache, PatternStore, StoreConfig, StorePaths};
use parking_lot::RwLock;
use serde::Serialize;
use tracing::info;

use crate::entities::EntityCatalog;
use crate::error::Result;
use crate::weakness::WeaknessCatalog;

/// Files a snapshot is built from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SnapshotPaths {
    pub store: StorePaths,
    pub catalog: PathBuf,
    pub entities: PathBuf,
}

impl SnapshotPaths {
    /// Default file names inside `dir`.
    pub fn in_dir(dir: impl AsRef<Path>) -> Self {
        let dir = dir.as_ref();
        Self {
            store: StorePaths::in_dir(dir),
            catalog: dir.join("weaknesses.json"),
            entities: dir.join("entity_names.json"),
        }
    }

    pub fn from_config(config: &NudgeConfig) -> Self {
        let storage = config.storage();
        Self {
            store: StorePaths::new(storage.patterns_path(), storage.index_path()),
            catalog: config.weakness().catalog_path(&storage),
            entities: storage.entities_path(),
        }
    }

    /// Every file whose change should trigger a reload.
    pub fn watched(&self) -> [&Path; 4] {
        [
            self.store.patterns.as_path(),
            self.store.index.as_path(),
            self.catalog.as_path(),
            self.entities.as_path(),
        ]
    }
}

/// A complete, validated view of the pattern store and both catalogs.
#[derive(Debug)]
pub struct Snapshot {
    pub store: Arc<PatternStore>,
    pub catalog: Arc<WeaknessCatalog>,
    pub entities: Arc<EntityCatalog>,
    /// Increases by one on every successful swap.
    pub generation: u64,
    pub loaded_at: DateTime<Utc>,
}

/// Sizes of a snapshot, as reported after a (re)load.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct SnapshotCounts {
    pub patterns: usize,
    pub clusters: usize,
    pub weaknesses: usize,
    pub entities: usize,
}

impl Snapshot {
    pub fn counts(&self) -> SnapshotCounts {
        SnapshotCounts {
            patterns: self.store.len(),
            clusters: self.store.clusters().len(),
            weaknesses: self.catalog.len(),
            entities: self.entities.len(),
        }
    }
}

/// Builds snapshots from disk.
#[derive(Debug, Clone)]
pub struct SnapshotLoader {
    paths: SnapshotPaths,
    cache: Arc<EmbeddingCache>,
    store_config: StoreConfig,
}

impl SnapshotLoader {
    pub fn new(paths: SnapshotPaths, cache: Arc<EmbeddingCache>, store_config: StoreConfig) -> Self {
        Self {
            paths,
            cache,
            store_config,
        }
    }

    pub fn paths(&self) -> &SnapshotPaths {
        &self.paths
    }

    /// Load and validate the store, index and both catalogs together.
    ///
    /// Nothing is shared with any live snapshot; a failure leaves no trace.
    pub fn load(&self, generation: u64) -> Result<Snapshot> {
        let store = PatternStore::load(
            &self.paths.store,
            Arc::clone(&self.cache),
            self.store_config.clone(),
        )?;
        let catalog = WeaknessCatalog::load(&self.paths.catalog)?;
        let entities = EntityCatalog::load(&self.paths.entities)?;

        let snapshot = Snapshot {
            store: Arc::new(store),
            catalog: Arc::new(catalog),
            entities: Arc::new(entities),
            generation,
            loaded_at: Utc::now(),
        };
        let counts = snapshot.counts();
        info!(
            generation,
            patterns = counts.patterns,
            weaknesses = counts.weaknesses,
            entities = counts.entities,
            "Snapshot loaded"
        );
        Ok(snapshot)
    }
}

/// The pointer the decision path reads.
///
/// Readers take the read lock only long enough to clone the `Arc`.
#[derive(Debug)]
pub struct SnapshotCell {
    current: RwLock<Arc<Snapshot>>,
}

impl SnapshotCell {
    pub fn new(snapshot: Snapshot) -> Self {
        Self {
            current: RwLock::new(Arc::new(snapshot)),
        }
    }

    pub fn current(&self) -> Arc<Snapshot> {
        Arc::clone(&self.current.read())
    }

    /// Replace the snapshot, returning the previous one.
    pub fn swap(&self, snapshot: Snapshot) -> Arc<Snapshot> {
        let next = Arc::new(snapshot);
        std::mem::replace(&mut *self.current.write(), next)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use nudge_llm::{MockEmbedder, RetryPolicy};

    fn loader(dir: &Path) -> SnapshotLoader {
        let cache =
            EmbeddingCache::in_memory(Arc::new(MockEmbedder::new(8)), RetryPolicy::default())
                .unwrap();
        SnapshotLoader::new(
            SnapshotPaths::in_dir(dir),
            Arc::new(cache),
            StoreConfig::default(),
        )
    }

    #[test]
    fn test_empty_directory_loads_empty_snapshot() {
        let dir = tempfile::tempdir().unwrap();
        let snapshot = loader(dir.path()).load(0).unwrap();
        assert_eq!(
            snapshot.counts(),
            SnapshotCounts {
                patterns: 0,
                clusters: 0,
                weaknesses: 0,
                entities: 0
            }
        );
    }

    #[test]
    fn test_swap_returns_previous() {
        let dir = tempfile::tempdir().unwrap();
        let loader = loader(dir.path());
        let cell = SnapshotCell::new(loader.load(0).unwrap());

        let held = cell.current();
        let previous = cell.swap(loader.load(1).unwrap());

        assert_eq!(previous.generation, 0);
        assert_eq!(held.generation, 0);
        assert_eq!(cell.current().generation, 1);
    }

    #[test]
    fn test_corrupt_catalog_fails_load() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("weaknesses.json"), "{ not json").unwrap();
        assert!(loader(dir.path()).load(0).is_err());
    }

    #[test]
    fn test_entity_catalog_loaded_with_snapshot() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(
            dir.path().join("entity_names.json"),
            r#"{ "diseases": ["糖尿病", "高血压"], "out_of_domain": ["血管瘤"] }"#,
        )
        .unwrap();
        let snapshot = loader(dir.path()).load(0).unwrap();
        assert_eq!(snapshot.counts().entities, 2);
        assert_eq!(snapshot.entities.out_of_domain_len(), 1);
    }

    #[test]
    fn test_corrupt_entity_catalog_fails_load() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("entity_names.json"), "[1, 2]").unwrap();
        assert!(loader(dir.path()).load(0).is_err());
    }

    #[test]
    fn test_paths_from_config() {
        let config = NudgeConfig::from_toml(
            r#"
[storage]
data_dir = "/data"

[weakness]
catalog = "/etc/nudge/weaknesses.json"
"#,
        )
        .unwrap();
        let paths = SnapshotPaths::from_config(&config);
        assert_eq!(paths.store.patterns, PathBuf::from("/data/patterns.json"));
        assert_eq!(paths.catalog, PathBuf::from("/etc/nudge/weaknesses.json"));
        assert_eq!(paths.entities, PathBuf::from("/data/entity_names.json"));
    }
}
