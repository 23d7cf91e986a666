//! Configuration types mapping to the TOML schema.
//!
//! Top-level config:
//! ```toml
//! [embedding]              # embedding provider and retry budget
//! [storage]                # data directory and file names
//! [index]                  # exact / IVF switch-over
//! [dedup]                  # merge-on-insert
//! [retrieval]              # Tier 2 retrieval defaults
//! [weakness]               # Tier 1 catalog and matcher weights
//! [clustering]             # k-means and representatives
//! [abstraction]            # optional cluster condensation via chat model
//! [reload]                 # hot-reload supervisor
//! [routing]                # per-decision deadline
//! ```

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::{ConfigError, Result};

/// Environment variable consulted when no API key is configured.
pub const OPENAI_API_KEY_ENV: &str = "OPENAI_API_KEY";

// ─────────────────────────────────────────────────────────────────────────────
// Top-level Config
// ─────────────────────────────────────────────────────────────────────────────

/// Root configuration structure.
///
/// All sections are optional so that partial configs (e.g., project-local
/// overrides) can be loaded and merged. Accessors return the section or its
/// defaults.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct NudgeConfig {
    pub embedding: Option<EmbeddingConfig>,
    pub storage: Option<StorageConfig>,
    pub index: Option<IndexSection>,
    pub dedup: Option<DedupConfig>,
    pub retrieval: Option<RetrievalConfig>,
    pub weakness: Option<WeaknessConfig>,
    pub clustering: Option<ClusteringConfig>,
    pub abstraction: Option<AbstractionConfig>,
    pub reload: Option<ReloadConfig>,
    pub routing: Option<RoutingConfig>,
}

impl NudgeConfig {
    /// Create an empty config.
    pub fn new() -> Self {
        Self::default()
    }

    /// Parse from a TOML string.
    pub fn from_toml(toml_str: &str) -> Result<Self> {
        Ok(toml::from_str(toml_str)?)
    }

    /// Serialize to a TOML string.
    pub fn to_toml(&self) -> Result<String> {
        Ok(toml::to_string_pretty(self)?)
    }

    /// Merge another config on top of this one (other takes priority).
    ///
    /// Sections are replaced wholesale, not field by field.
    pub fn merge(&mut self, other: NudgeConfig) {
        if other.embedding.is_some() {
            self.embedding = other.embedding;
        }
        if other.storage.is_some() {
            self.storage = other.storage;
        }
        if other.index.is_some() {
            self.index = other.index;
        }
        if other.dedup.is_some() {
            self.dedup = other.dedup;
        }
        if other.retrieval.is_some() {
            self.retrieval = other.retrieval;
        }
        if other.weakness.is_some() {
            self.weakness = other.weakness;
        }
        if other.clustering.is_some() {
            self.clustering = other.clustering;
        }
        if other.abstraction.is_some() {
            self.abstraction = other.abstraction;
        }
        if other.reload.is_some() {
            self.reload = other.reload;
        }
        if other.routing.is_some() {
            self.routing = other.routing;
        }
    }

    pub fn embedding(&self) -> EmbeddingConfig {
        self.embedding.clone().unwrap_or_default()
    }

    pub fn storage(&self) -> StorageConfig {
        self.storage.clone().unwrap_or_default()
    }

    pub fn index(&self) -> IndexSection {
        self.index.clone().unwrap_or_default()
    }

    pub fn dedup(&self) -> DedupConfig {
        self.dedup.clone().unwrap_or_default()
    }

    pub fn retrieval(&self) -> RetrievalConfig {
        self.retrieval.clone().unwrap_or_default()
    }

    pub fn weakness(&self) -> WeaknessConfig {
        self.weakness.clone().unwrap_or_default()
    }

    pub fn clustering(&self) -> ClusteringConfig {
        self.clustering.clone().unwrap_or_default()
    }

    pub fn abstraction(&self) -> AbstractionConfig {
        self.abstraction.clone().unwrap_or_default()
    }

    pub fn reload(&self) -> ReloadConfig {
        self.reload.clone().unwrap_or_default()
    }

    pub fn routing(&self) -> RoutingConfig {
        self.routing.clone().unwrap_or_default()
    }

    /// Check cross-field constraints.
    ///
    /// Returns the first violation found.
    pub fn validate(&self) -> Result<()> {
        let embedding = self.embedding();
        if embedding.dimensions == 0 {
            return Err(invalid("[embedding] dimensions must be greater than zero"));
        }

        let dedup = self.dedup();
        let retrieval = self.retrieval();
        let weakness = self.weakness();

        unit_interval("dedup.merge_threshold", dedup.merge_threshold)?;
        unit_interval("retrieval.similarity_threshold", retrieval.similarity_threshold)?;
        unit_interval("weakness.min_score", weakness.min_score)?;
        unit_interval("weakness.min_frequency", weakness.min_frequency)?;
        unit_interval("weakness.weights.keyword", weakness.weights.keyword)?;
        unit_interval("weakness.weights.entity", weakness.weights.entity)?;
        unit_interval("weakness.weights.pattern", weakness.weights.pattern)?;

        if dedup.merge_threshold <= retrieval.similarity_threshold {
            return Err(invalid(format!(
                "dedup.merge_threshold ({}) must be greater than retrieval.similarity_threshold ({})",
                dedup.merge_threshold, retrieval.similarity_threshold
            )));
        }
        if dedup.max_examples == 0 {
            return Err(invalid("dedup.max_examples must be at least 1"));
        }
        if retrieval.k == 0 {
            return Err(invalid("retrieval.k must be at least 1"));
        }
        if retrieval.oversample_factor == 0 {
            return Err(invalid("retrieval.oversample_factor must be at least 1"));
        }
        if weakness.top_k == 0 {
            return Err(invalid("weakness.top_k must be at least 1"));
        }

        let index = self.index();
        if index.nprobe == 0 {
            return Err(invalid("index.nprobe must be at least 1"));
        }
        if index.nlist == Some(0) {
            return Err(invalid("index.nlist must be at least 1 when set"));
        }

        let clustering = self.clustering();
        if clustering.target_clusters == 0 {
            return Err(invalid("clustering.target_clusters must be at least 1"));
        }
        if clustering.min_cluster_size == 0 {
            return Err(invalid("clustering.min_cluster_size must be at least 1"));
        }

        if self.reload().interval_secs == 0 {
            return Err(invalid("reload.interval_secs must be at least 1"));
        }

        Ok(())
    }

    /// Sections that carry an API key in plain text.
    pub fn plaintext_key_sections(&self) -> Vec<&'static str> {
        let mut sections = Vec::new();
        if self.embedding.as_ref().is_some_and(|e| e.api_key.is_some()) {
            sections.push("embedding");
        }
        if self.abstraction.as_ref().is_some_and(|a| a.api_key.is_some()) {
            sections.push("abstraction");
        }
        sections
    }
}

fn invalid(message: impl Into<String>) -> ConfigError {
    ConfigError::Invalid(message.into())
}

fn unit_interval(name: &str, value: f32) -> Result<()> {
    if (0.0..=1.0).contains(&value) {
        Ok(())
    } else {
        Err(invalid(format!("{} must be within [0, 1], got {}", name, value)))
    }
}

/// Configured key, falling back to `OPENAI_API_KEY`.
fn resolve_key(configured: Option<&String>) -> Option<String> {
    configured.cloned().or_else(|| {
        std::env::var(OPENAI_API_KEY_ENV)
            .ok()
            .filter(|key| !key.is_empty())
    })
}

// ─────────────────────────────────────────────────────────────────────────────
// Embedding Configuration
// ─────────────────────────────────────────────────────────────────────────────

/// Embedding provider configuration.
///
/// ```toml
/// [embedding]
/// provider = "openai"      # "openai" or "mock"
/// dimensions = 1536
/// model = "text-embedding-3-small"
/// timeout_ms = 5000
/// max_retries = 2
/// backoff_ms = 200
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EmbeddingConfig {
    pub provider: EmbeddingProvider,
    pub dimensions: usize,
    pub model: Option<String>,
    /// Custom base URL (for proxies and compatible servers).
    pub base_url: Option<String>,
    /// API key (prefer the `OPENAI_API_KEY` env var).
    pub api_key: Option<String>,
    /// Per-attempt timeout.
    pub timeout_ms: u64,
    pub max_retries: u32,
    /// Backoff before the first retry; doubled after each.
    pub backoff_ms: u64,
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            provider: EmbeddingProvider::OpenAi,
            dimensions: 1536,
            model: None,
            base_url: None,
            api_key: None,
            timeout_ms: 5_000,
            max_retries: 2,
            backoff_ms: 200,
        }
    }
}

impl EmbeddingConfig {
    /// API key from the config, then `OPENAI_API_KEY`.
    pub fn resolve_api_key(&self) -> Option<String> {
        resolve_key(self.api_key.as_ref())
    }
}

/// Supported embedding providers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EmbeddingProvider {
    /// OpenAI-compatible `/embeddings` endpoint.
    #[serde(rename = "openai")]
    OpenAi,
    /// Deterministic hash embedder for tests and offline runs.
    Mock,
}

impl EmbeddingProvider {
    pub fn as_str(&self) -> &'static str {
        match self {
            EmbeddingProvider::OpenAi => "openai",
            EmbeddingProvider::Mock => "mock",
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Storage Configuration
// ─────────────────────────────────────────────────────────────────────────────

/// Where persisted state lives.
///
/// Relative file names are resolved against `data_dir`.
///
/// ```toml
/// [storage]
/// data_dir = "/var/lib/nudge"
/// patterns_file = "patterns.json"
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    /// Defaults to the platform data directory (`~/.local/share/nudge`).
    pub data_dir: Option<PathBuf>,
    pub patterns_file: String,
    pub index_file: String,
    pub cache_file: String,
    pub weakness_file: String,
    /// Entity-name catalog; a missing file disables entity resolution.
    pub entity_file: String,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            data_dir: None,
            patterns_file: "patterns.json".to_string(),
            index_file: "patterns.idx".to_string(),
            cache_file: "embedding_cache.db".to_string(),
            weakness_file: "weaknesses.json".to_string(),
            entity_file: "entity_names.json".to_string(),
        }
    }
}

impl StorageConfig {
    /// Configured data directory, or the platform default.
    pub fn resolved_data_dir(&self) -> PathBuf {
        self.data_dir.clone().unwrap_or_else(default_data_dir)
    }

    pub fn patterns_path(&self) -> PathBuf {
        self.resolve(&self.patterns_file)
    }

    pub fn index_path(&self) -> PathBuf {
        self.resolve(&self.index_file)
    }

    pub fn cache_path(&self) -> PathBuf {
        self.resolve(&self.cache_file)
    }

    pub fn entities_path(&self) -> PathBuf {
        self.resolve(&self.entity_file)
    }

    fn resolve(&self, name: &str) -> PathBuf {
        let path = PathBuf::from(name);
        if path.is_absolute() {
            path
        } else {
            self.resolved_data_dir().join(path)
        }
    }
}

/// `~/.local/share/nudge` (or the platform equivalent), `./.nudge` as a last resort.
pub fn default_data_dir() -> PathBuf {
    dirs::data_dir()
        .map(|d| d.join("nudge"))
        .unwrap_or_else(|| PathBuf::from(".nudge"))
}

// ─────────────────────────────────────────────────────────────────────────────
// Index / Dedup / Retrieval
// ─────────────────────────────────────────────────────────────────────────────

/// Vector index tuning.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct IndexSection {
    /// Collections at or above this size switch to IVF search.
    pub exact_threshold: usize,
    /// IVF list count; √N when unset.
    pub nlist: Option<usize>,
    pub nprobe: usize,
    pub seed: u64,
}

impl Default for IndexSection {
    fn default() -> Self {
        Self {
            exact_threshold: 1_000,
            nlist: None,
            nprobe: 8,
            seed: 42,
        }
    }
}

/// Merge-on-insert.
///
/// ```toml
/// [dedup]
/// merge_threshold = 0.95
/// max_examples = 5
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DedupConfig {
    pub merge_threshold: f32,
    pub max_examples: usize,
    /// Re-infer the category of submissions tagged `general`.
    pub infer_general: bool,
}

impl Default for DedupConfig {
    fn default() -> Self {
        Self {
            merge_threshold: 0.95,
            max_examples: 5,
            infer_general: true,
        }
    }
}

/// Tier 2 retrieval defaults.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetrievalConfig {
    pub k: usize,
    pub similarity_threshold: f32,
    /// Candidates fetched per requested result before filtering.
    pub oversample_factor: usize,
    pub min_frequency: u32,
}

impl Default for RetrievalConfig {
    fn default() -> Self {
        Self {
            k: 3,
            similarity_threshold: 0.5,
            oversample_factor: 3,
            min_frequency: 1,
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Weakness Configuration
// ─────────────────────────────────────────────────────────────────────────────

/// Tier 1 weakness matching.
///
/// ```toml
/// [weakness]
/// catalog = "weaknesses.json"
/// top_k = 2
/// min_score = 0.1
/// min_frequency = 0.15
///
/// [weakness.weights]
/// keyword = 0.4
/// entity = 0.3
/// pattern = 0.3
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct WeaknessConfig {
    /// Catalog path; relative paths resolve against the data directory.
    /// Falls back to `[storage] weakness_file` when unset.
    pub catalog: Option<PathBuf>,
    pub top_k: usize,
    pub min_score: f32,
    /// Entries observed less often than this are never matched.
    pub min_frequency: f32,
    pub weights: MatchWeights,
}

impl Default for WeaknessConfig {
    fn default() -> Self {
        Self {
            catalog: None,
            top_k: 2,
            min_score: 0.1,
            min_frequency: 0.15,
            weights: MatchWeights::default(),
        }
    }
}

impl WeaknessConfig {
    /// Catalog location given the storage layout.
    pub fn catalog_path(&self, storage: &StorageConfig) -> PathBuf {
        match &self.catalog {
            Some(path) if path.is_absolute() => path.clone(),
            Some(path) => storage.resolved_data_dir().join(path),
            None => storage.resolve(&storage.weakness_file),
        }
    }
}

/// Score contributions of the three match signals.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MatchWeights {
    pub keyword: f32,
    pub entity: f32,
    pub pattern: f32,
}

impl Default for MatchWeights {
    fn default() -> Self {
        Self {
            keyword: 0.4,
            entity: 0.3,
            pattern: 0.3,
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Clustering / Abstraction
// ─────────────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ClusteringConfig {
    pub target_clusters: usize,
    pub min_cluster_size: usize,
    /// "highest_frequency", "highest_severity" or "balanced".
    pub strategy: String,
    pub abstraction_min_size: usize,
    pub max_iterations: usize,
    pub seed: u64,
}

impl Default for ClusteringConfig {
    fn default() -> Self {
        Self {
            target_clusters: 20,
            min_cluster_size: 3,
            strategy: "highest_frequency".to_string(),
            abstraction_min_size: 5,
            max_iterations: 50,
            seed: 42,
        }
    }
}

/// Chat model used to condense large clusters into one reminder.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AbstractionConfig {
    pub enabled: bool,
    pub model: String,
    pub base_url: Option<String>,
    pub api_key: Option<String>,
}

impl Default for AbstractionConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            model: "gpt-4o-mini".to_string(),
            base_url: None,
            api_key: None,
        }
    }
}

impl AbstractionConfig {
    pub fn resolve_api_key(&self) -> Option<String> {
        resolve_key(self.api_key.as_ref())
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Reload / Routing
// ─────────────────────────────────────────────────────────────────────────────

/// Hot-reload supervisor.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ReloadConfig {
    /// Start the polling task on engine initialization.
    pub enabled: bool,
    pub interval_secs: u64,
    /// Quiet period for filesystem notifications in `watch` mode.
    pub debounce_ms: u64,
}

impl Default for ReloadConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            interval_secs: 30,
            debounce_ms: 500,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RoutingConfig {
    /// Budget for one routing decision when the caller supplies none.
    pub deadline_ms: u64,
}

impl Default for RoutingConfig {
    fn default() -> Self {
        Self { deadline_ms: 10_000 }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_config_uses_defaults() {
        let config = NudgeConfig::from_toml("").unwrap();
        assert!(config.embedding.is_none());
        assert_eq!(config.retrieval().similarity_threshold, 0.5);
        assert_eq!(config.dedup().merge_threshold, 0.95);
        assert_eq!(config.weakness().top_k, 2);
        assert_eq!(config.routing().deadline_ms, 10_000);
        config.validate().unwrap();
    }

    #[test]
    fn test_parse_full_config() {
        let toml = r#"
[embedding]
provider = "mock"
dimensions = 64

[storage]
data_dir = "/tmp/nudge-data"

[retrieval]
k = 5
similarity_threshold = 0.6

[weakness]
catalog = "catalog.json"
top_k = 3

[weakness.weights]
keyword = 0.8
entity = 0.1
pattern = 0.1

[clustering]
strategy = "balanced"

[reload]
enabled = true
interval_secs = 5
"#;
        let config = NudgeConfig::from_toml(toml).unwrap();
        let embedding = config.embedding();
        assert_eq!(embedding.provider, EmbeddingProvider::Mock);
        assert_eq!(embedding.dimensions, 64);
        assert_eq!(embedding.max_retries, 2);
        assert_eq!(config.retrieval().k, 5);
        assert_eq!(config.retrieval().oversample_factor, 3);
        assert_eq!(config.weakness().weights.keyword, 0.8);
        assert_eq!(config.clustering().strategy, "balanced");
        assert!(config.reload().enabled);
        assert_eq!(
            config.weakness().catalog_path(&config.storage()),
            PathBuf::from("/tmp/nudge-data/catalog.json")
        );
        config.validate().unwrap();
    }

    #[test]
    fn test_unknown_provider_rejected() {
        let err = NudgeConfig::from_toml("[embedding]\nprovider = \"local\"\n").unwrap_err();
        assert!(matches!(err, ConfigError::Parse(_)));
    }

    #[test]
    fn test_merge_replaces_sections() {
        let mut base = NudgeConfig::from_toml(
            r#"
[retrieval]
k = 7

[routing]
deadline_ms = 100
"#,
        )
        .unwrap();
        let overlay = NudgeConfig::from_toml("[retrieval]\nk = 2\n").unwrap();
        base.merge(overlay);

        assert_eq!(base.retrieval().k, 2);
        assert_eq!(base.routing().deadline_ms, 100);
    }

    #[test]
    fn test_validate_merge_above_similarity() {
        let config = NudgeConfig::from_toml(
            r#"
[dedup]
merge_threshold = 0.5

[retrieval]
similarity_threshold = 0.5
"#,
        )
        .unwrap();
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("merge_threshold"));
    }

    #[test]
    fn test_validate_unit_interval() {
        let config = NudgeConfig::from_toml("[weakness]\nmin_score = 1.5\n").unwrap();
        assert!(matches!(config.validate(), Err(ConfigError::Invalid(_))));
    }

    #[test]
    fn test_validate_zero_dimensions() {
        let config = NudgeConfig::from_toml("[embedding]\ndimensions = 0\n").unwrap();
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("dimensions"));
    }

    #[test]
    fn test_storage_paths_resolve_against_data_dir() {
        let storage = StorageConfig {
            data_dir: Some(PathBuf::from("/srv/nudge")),
            cache_file: "/elsewhere/cache.db".to_string(),
            ..Default::default()
        };
        assert_eq!(storage.patterns_path(), PathBuf::from("/srv/nudge/patterns.json"));
        assert_eq!(storage.index_path(), PathBuf::from("/srv/nudge/patterns.idx"));
        assert_eq!(storage.cache_path(), PathBuf::from("/elsewhere/cache.db"));
        assert_eq!(
            storage.entities_path(),
            PathBuf::from("/srv/nudge/entity_names.json")
        );
        assert_eq!(
            WeaknessConfig::default().catalog_path(&storage),
            PathBuf::from("/srv/nudge/weaknesses.json")
        );
    }

    #[test]
    fn test_configured_key_wins() {
        let embedding = EmbeddingConfig {
            api_key: Some("sk-configured".to_string()),
            ..Default::default()
        };
        assert_eq!(embedding.resolve_api_key().as_deref(), Some("sk-configured"));
    }

    #[test]
    fn test_plaintext_key_sections() {
        let config = NudgeConfig::from_toml(
            r#"
[embedding]
api_key = "sk-a"

[abstraction]
enabled = true
"#,
        )
        .unwrap();
        assert_eq!(config.plaintext_key_sections(), vec!["embedding"]);
    }

    #[test]
    fn test_toml_roundtrip_preserves_sections() {
        let config = NudgeConfig::from_toml("[dedup]\nmax_examples = 3\n").unwrap();
        let text = config.to_toml().unwrap();
        let back = NudgeConfig::from_toml(&text).unwrap();
        assert_eq!(back, config);
        assert!(back.storage.is_none());
    }
}
