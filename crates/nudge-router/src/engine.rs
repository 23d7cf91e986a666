//! The process-wide routing engine.
//!
//! One [`RoutingEngine`] owns the current snapshot, the decision tiers and the
//! reload supervisor. It is created explicitly with [`RoutingEngine::initialize`]
//! (or [`RoutingEngine::open`] from prebuilt parts) and stopped with
//! [`RoutingEngine::shutdown`].

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use nudge_config::{EmbeddingProvider, NudgeConfig, ReloadConfig, RetrievalConfig};
use nudge_llm::{
    EmbedderSpec, OpenAiAbstractor, OpenAiAbstractorConfig, RetryPolicy, SharedAbstractor,
    build_embedder,
};
use nudge_memory::{
    Category, ClusterOptions, ClusterReport, EmbeddingCache, IndexConfig, IndexMode,
    InsertOutcome, NewPattern, PatternId, PatternRecord, StoreConfig,
};
use parking_lot::Mutex;
use serde::Serialize;
use tokio::task::JoinHandle;
use tracing::{info, warn};

use crate::decision::{DecisionEngine, RouteRequest, RoutingDecision};
use crate::error::Result;
use crate::reload::{Fingerprints, ReloadOutcome, ReloadSupervisor, WatchHandle};
use crate::snapshot::{Snapshot, SnapshotCell, SnapshotLoader, SnapshotPaths};
use crate::weakness::{CatalogStats, MatcherConfig, WeaknessMatcher};

/// Everything the engine needs besides storage.
#[derive(Debug, Clone)]
pub struct EngineSettings {
    pub matcher: MatcherConfig,
    pub retrieval: RetrievalConfig,
    pub cluster: ClusterOptions,
    /// Budget for one decision when the request carries none.
    pub deadline: Duration,
    pub reload: ReloadConfig,
}

impl Default for EngineSettings {
    fn default() -> Self {
        Self {
            matcher: MatcherConfig::default(),
            retrieval: RetrievalConfig::default(),
            cluster: ClusterOptions::default(),
            deadline: Duration::from_secs(10),
            reload: ReloadConfig::default(),
        }
    }
}

impl EngineSettings {
    pub fn from_config(config: &NudgeConfig) -> Result<Self> {
        let clustering = config.clustering();
        Ok(Self {
            matcher: MatcherConfig::from(&config.weakness()),
            retrieval: config.retrieval(),
            cluster: ClusterOptions {
                target_clusters: clustering.target_clusters,
                min_cluster_size: clustering.min_cluster_size,
                strategy: clustering.strategy.parse()?,
                abstraction_min_size: clustering.abstraction_min_size,
                max_iterations: clustering.max_iterations,
                seed: clustering.seed,
            },
            deadline: Duration::from_millis(config.routing().deadline_ms),
            reload: config.reload(),
        })
    }
}

/// Store tuning from the `[dedup]` and `[index]` sections.
pub fn store_config(config: &NudgeConfig) -> StoreConfig {
    let dedup = config.dedup();
    let index = config.index();
    StoreConfig {
        merge_threshold: dedup.merge_threshold,
        max_examples: dedup.max_examples,
        infer_general: dedup.infer_general,
        index: IndexConfig {
            exact_threshold: index.exact_threshold,
            nlist: index.nlist,
            nprobe: index.nprobe,
            seed: index.seed,
            ..IndexConfig::default()
        },
    }
}

/// Retry budget for embedding calls from the `[embedding]` section.
pub fn retry_policy(config: &NudgeConfig) -> RetryPolicy {
    let embedding = config.embedding();
    RetryPolicy {
        timeout: Duration::from_millis(embedding.timeout_ms),
        max_retries: embedding.max_retries,
        initial_backoff: Duration::from_millis(embedding.backoff_ms),
    }
}

/// Counts over the live snapshot.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct EngineStats {
    pub pattern_count: usize,
    pub total_frequency: u64,
    pub category_counts: BTreeMap<String, usize>,
    pub severity_counts: BTreeMap<String, usize>,
    pub error_type_counts: BTreeMap<String, usize>,
    pub cluster_count: usize,
    pub dimensions: usize,
    pub index_mode: IndexMode,
    pub catalog_size: usize,
    pub catalog: CatalogStats,
    pub entity_count: usize,
    pub out_of_domain_count: usize,
    pub generation: u64,
}

pub struct RoutingEngine {
    supervisor: Arc<ReloadSupervisor>,
    decisions: DecisionEngine,
    settings: EngineSettings,
    abstractor: Option<SharedAbstractor>,
    tasks: Mutex<Vec<JoinHandle<()>>>,
    watch: Mutex<Option<WatchHandle>>,
}

impl RoutingEngine {
    /// Build the engine from configuration and load the current snapshot.
    ///
    /// Starts background polling when `[reload] enabled = true`.
    pub async fn initialize(config: &NudgeConfig) -> Result<Self> {
        config.validate()?;

        let embedding = config.embedding();
        let embedder = build_embedder(&EmbedderSpec {
            provider: embedding.provider.as_str().to_string(),
            dimensions: embedding.dimensions,
            api_key: match embedding.provider {
                EmbeddingProvider::OpenAi => embedding.resolve_api_key(),
                EmbeddingProvider::Mock => None,
            },
            model: embedding.model.clone(),
            base_url: embedding.base_url.clone(),
        })?;

        let storage = config.storage();
        let cache = EmbeddingCache::open(storage.cache_path(), embedder, retry_policy(config))?;

        let abstraction = config.abstraction();
        let abstractor: Option<SharedAbstractor> = if abstraction.enabled {
            let mut abstractor_config = OpenAiAbstractorConfig::new(abstraction.resolve_api_key())
                .with_model(&abstraction.model);
            if let Some(ref base_url) = abstraction.base_url {
                abstractor_config = abstractor_config.with_base_url(base_url);
            }
            Some(Arc::new(OpenAiAbstractor::new(abstractor_config)?))
        } else {
            None
        };

        let engine = Self::open(
            SnapshotPaths::from_config(config),
            Arc::new(cache),
            store_config(config),
            EngineSettings::from_config(config)?,
            abstractor,
        )?;

        if engine.settings.reload.enabled {
            engine.spawn_polling(Duration::from_secs(engine.settings.reload.interval_secs));
        }

        info!(
            data_dir = %storage.resolved_data_dir().display(),
            provider = embedding.provider.as_str(),
            "Routing engine initialized"
        );
        Ok(engine)
    }

    /// Load the snapshot at `paths` and assemble the engine. Starts no tasks.
    pub fn open(
        paths: SnapshotPaths,
        cache: Arc<EmbeddingCache>,
        store_config: StoreConfig,
        settings: EngineSettings,
        abstractor: Option<SharedAbstractor>,
    ) -> Result<Self> {
        let recorded = Fingerprints::capture(&paths);
        let loader = SnapshotLoader::new(paths, cache, store_config);
        let cell = Arc::new(SnapshotCell::new(loader.load(0)?));
        let supervisor = Arc::new(ReloadSupervisor::new(loader, cell, recorded));

        let decisions = DecisionEngine::new(
            WeaknessMatcher::new(settings.matcher.clone()),
            settings.retrieval.clone(),
            settings.deadline,
        );

        Ok(Self {
            supervisor,
            decisions,
            settings,
            abstractor,
            tasks: Mutex::new(Vec::new()),
            watch: Mutex::new(None),
        })
    }

    /// The snapshot currently being served.
    pub fn snapshot(&self) -> Arc<Snapshot> {
        self.supervisor.cell().current()
    }

    pub fn settings(&self) -> &EngineSettings {
        &self.settings
    }

    pub fn paths(&self) -> &SnapshotPaths {
        self.supervisor.paths()
    }

    /// Decide which reminders to inject for a question. Never fails.
    pub async fn route(&self, request: RouteRequest) -> RoutingDecision {
        let snapshot = self.snapshot();
        self.decisions.decide(&snapshot, &request).await
    }

    /// Reload if the backing files changed.
    pub async fn reload(&self) -> Result<ReloadOutcome> {
        self.supervisor.check_and_reload().await
    }

    /// Reload even if nothing appears to have changed.
    pub async fn force_reload(&self) -> Result<ReloadOutcome> {
        self.supervisor.force_reload().await
    }

    pub fn stats(&self) -> EngineStats {
        let snapshot = self.snapshot();
        let store = snapshot.store.stats();
        let catalog = snapshot.catalog.stats();
        EngineStats {
            pattern_count: store.total_patterns,
            total_frequency: store.total_frequency,
            category_counts: store.by_category,
            severity_counts: store.by_severity,
            error_type_counts: store.by_error_type,
            cluster_count: store.cluster_count,
            dimensions: store.dimensions,
            index_mode: store.index_mode,
            catalog_size: catalog.total,
            catalog,
            entity_count: snapshot.entities.len(),
            out_of_domain_count: snapshot.entities.out_of_domain_len(),
            generation: snapshot.generation,
        }
    }

    pub fn top_patterns(
        &self,
        n: usize,
        category: Option<Category>,
        min_frequency: u32,
    ) -> Vec<PatternRecord> {
        self.snapshot()
            .store
            .top_patterns(n, category, min_frequency)
    }

    // ─────────────────────────────────────────────────────────────────────
    // Administrative writes
    // ─────────────────────────────────────────────────────────────────────

    /// Insert (or merge) one pattern into the live store. Call [`save`](Self::save) to persist.
    pub async fn insert_pattern(&self, pattern: NewPattern) -> Result<InsertOutcome> {
        let _guard = self.supervisor.write_guard().await;
        Ok(self.snapshot().store.insert(pattern).await?)
    }

    pub async fn insert_patterns(&self, patterns: Vec<NewPattern>) -> Result<Vec<InsertOutcome>> {
        let _guard = self.supervisor.write_guard().await;
        Ok(self.snapshot().store.insert_batch(patterns).await?)
    }

    /// Re-cluster the live store; `options` defaults to the configured ones.
    ///
    /// Abstraction runs only when `abstract_clusters` is set and an abstractor
    /// is configured.
    pub async fn cluster(
        &self,
        options: Option<ClusterOptions>,
        abstract_clusters: bool,
    ) -> Result<ClusterReport> {
        let options = options.unwrap_or_else(|| self.settings.cluster.clone());
        let abstractor = if abstract_clusters {
            if self.abstractor.is_none() {
                warn!("Abstraction requested but no abstractor is configured");
            }
            self.abstractor.as_deref()
        } else {
            None
        };

        let _guard = self.supervisor.write_guard().await;
        Ok(self.snapshot().store.cluster(&options, abstractor).await?)
    }

    pub async fn purge(&self, ids: &[PatternId]) -> Result<usize> {
        let _guard = self.supervisor.write_guard().await;
        Ok(self.snapshot().store.purge(ids).await?)
    }

    /// Persist the live store and mark the written files as already seen.
    pub async fn save(&self) -> Result<()> {
        let mut guard = self.supervisor.write_guard().await;
        self.snapshot().store.save(&self.paths().store)?;
        guard.acknowledge();
        Ok(())
    }

    // ─────────────────────────────────────────────────────────────────────
    // Background reload
    // ─────────────────────────────────────────────────────────────────────

    pub fn spawn_polling(&self, interval: Duration) {
        let handle = self.supervisor.spawn_polling(interval);
        self.tasks.lock().push(handle);
        info!(interval_secs = interval.as_secs(), "Reload polling started");
    }

    /// Reload on filesystem notifications until [`shutdown`](Self::shutdown).
    pub fn watch(&self) -> Result<()> {
        let handle = self
            .supervisor
            .watch(Duration::from_millis(self.settings.reload.debounce_ms))?;
        *self.watch.lock() = Some(handle);
        Ok(())
    }

    /// Stop polling and watching. Routing keeps working on the last snapshot.
    pub fn shutdown(&self) {
        let tasks = std::mem::take(&mut *self.tasks.lock());
        let stopped = tasks.len();
        for task in tasks {
            task.abort();
        }
        let watching = self.watch.lock().take().is_some();
        if stopped > 0 || watching {
            info!(tasks = stopped, watching, "Routing engine background work stopped");
        }
    }
}

impl Drop for RoutingEngine {
    fn drop(&mut self) {
        self.shutdown();
    }
}

impl std::fmt::Debug for RoutingEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RoutingEngine")
            .field("paths", self.paths())
            .field("settings", &self.settings)
            .field("abstractor", &self.abstractor.as_ref().map(|a| a.name()))
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_settings_from_config() {
        let config = NudgeConfig::from_toml(
            r#"
[clustering]
strategy = "balanced"
min_cluster_size = 4

[routing]
deadline_ms = 250
"#,
        )
        .unwrap();
        let settings = EngineSettings::from_config(&config).unwrap();
        assert_eq!(
            settings.cluster.strategy,
            nudge_memory::RepresentativeStrategy::Balanced
        );
        assert_eq!(settings.cluster.min_cluster_size, 4);
        assert_eq!(settings.deadline, Duration::from_millis(250));
    }

    #[test]
    fn test_unknown_strategy_rejected() {
        let config = NudgeConfig::from_toml("[clustering]\nstrategy = \"random\"\n").unwrap();
        assert!(EngineSettings::from_config(&config).is_err());
    }

    #[test]
    fn test_store_config_mapping() {
        let config = NudgeConfig::from_toml(
            r#"
[dedup]
merge_threshold = 0.9

[index]
exact_threshold = 50
nprobe = 2
"#,
        )
        .unwrap();
        let store = store_config(&config);
        assert_eq!(store.merge_threshold, 0.9);
        assert_eq!(store.index.exact_threshold, 50);
        assert_eq!(store.index.nprobe, 2);
        assert_eq!(store.index.max_iterations, IndexConfig::default().max_iterations);
    }

    #[tokio::test]
    async fn test_initialize_with_mock_provider() {
        let dir = tempfile::tempdir().unwrap();
        let config = NudgeConfig::from_toml(&format!(
            r#"
[embedding]
provider = "mock"
dimensions = 16

[storage]
data_dir = "{}"
"#,
            dir.path().display()
        ))
        .unwrap();

        let engine = RoutingEngine::initialize(&config).await.unwrap();
        let stats = engine.stats();
        assert_eq!(stats.pattern_count, 0);
        assert_eq!(stats.dimensions, 16);
        assert!(dir.path().join("embedding_cache.db").exists());
        engine.shutdown();
    }
}
