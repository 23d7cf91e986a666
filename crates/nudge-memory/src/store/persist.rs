//! Saving and loading a pattern store.
//!
//! A store persists as two files written atomically (temp file + rename):
//! `patterns.json` holds the records (without embeddings) and the cluster
//! assignments, and the index artifact holds every `(id, vector)` pair.
//! Loading validates that the two agree before anything is published.

use std::collections::HashSet;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use super::{PatternStore, StoreConfig, StoreData};
use crate::cache::EmbeddingCache;
use crate::error::{MemoryError, Result};
use crate::index::VectorIndex;
use crate::types::{ClusterAssignment, PatternRecord};

const PATTERNS_FILE_VERSION: u32 = 1;

/// Default file name of the pattern records.
pub const PATTERNS_FILE: &str = "patterns.json";
/// Default file name of the index artifact.
pub const INDEX_FILE: &str = "patterns.idx";

/// Locations of the two files that make up a persisted store.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StorePaths {
    pub patterns: PathBuf,
    pub index: PathBuf,
}

impl StorePaths {
    pub fn new(patterns: impl Into<PathBuf>, index: impl Into<PathBuf>) -> Self {
        Self {
            patterns: patterns.into(),
            index: index.into(),
        }
    }

    /// Default file names inside `dir`.
    pub fn in_dir(dir: impl AsRef<Path>) -> Self {
        let dir = dir.as_ref();
        Self::new(dir.join(PATTERNS_FILE), dir.join(INDEX_FILE))
    }
}

#[derive(Serialize)]
struct PatternsFileOut<'a> {
    version: u32,
    dimensions: usize,
    records: &'a [PatternRecord],
    clusters: &'a [ClusterAssignment],
}

#[derive(Deserialize)]
struct PatternsFileIn {
    version: u32,
    dimensions: usize,
    records: Vec<PatternRecord>,
    #[serde(default)]
    clusters: Vec<ClusterAssignment>,
}

/// Write `bytes` to `path` via a sibling temp file and a rename.
pub fn write_atomic(path: &Path, bytes: &[u8]) -> Result<()> {
    if let Some(parent) = path.parent()
        && !parent.as_os_str().is_empty()
    {
        std::fs::create_dir_all(parent)?;
    }

    let mut tmp_name = path.as_os_str().to_owned();
    tmp_name.push(".tmp");
    let tmp = PathBuf::from(tmp_name);

    {
        let mut file = std::fs::File::create(&tmp)?;
        file.write_all(bytes)?;
        file.sync_all()?;
    }
    std::fs::rename(&tmp, path)?;
    Ok(())
}

fn read_optional(path: &Path) -> Result<Option<Vec<u8>>> {
    match std::fs::read(path) {
        Ok(bytes) => Ok(Some(bytes)),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
        Err(e) => Err(e.into()),
    }
}

impl PatternStore {
    /// Persist records, clusters and index to `paths`.
    ///
    /// The index artifact is written first so a reader never sees records
    /// whose vectors are missing.
    pub fn save(&self, paths: &StorePaths) -> Result<()> {
        let (json, index_bytes, count) = {
            let data = self.data.read();
            let file = PatternsFileOut {
                version: PATTERNS_FILE_VERSION,
                dimensions: data.index.dimensions(),
                records: &data.records,
                clusters: &data.clusters,
            };
            (
                serde_json::to_vec_pretty(&file)?,
                data.index.to_bytes(),
                data.records.len(),
            )
        };

        write_atomic(&paths.index, &index_bytes)?;
        write_atomic(&paths.patterns, &json)?;

        info!(
            patterns = count,
            path = %paths.patterns.display(),
            "Pattern store saved"
        );
        Ok(())
    }

    /// Load a store from `paths`, validating both files against each other.
    ///
    /// Missing files mean an empty store. Any inconsistency is reported as
    /// [`MemoryError::CorruptSnapshot`] or [`MemoryError::DimensionMismatch`].
    pub fn load(
        paths: &StorePaths,
        cache: Arc<EmbeddingCache>,
        config: StoreConfig,
    ) -> Result<Self> {
        let dimensions = cache.dimensions();
        let patterns_bytes = read_optional(&paths.patterns)?;
        let index_bytes = read_optional(&paths.index)?;

        if patterns_bytes.is_none() && index_bytes.is_none() {
            debug!(path = %paths.patterns.display(), "No persisted patterns, starting empty");
            return Self::new(cache, config);
        }

        let file = match patterns_bytes {
            Some(bytes) => {
                let file: PatternsFileIn = serde_json::from_slice(&bytes)
                    .map_err(|e| MemoryError::corrupt(&paths.patterns, e.to_string()))?;
                if file.version != PATTERNS_FILE_VERSION {
                    return Err(MemoryError::corrupt(
                        &paths.patterns,
                        format!("unsupported pattern file version {}", file.version),
                    ));
                }
                if file.dimensions != dimensions {
                    return Err(MemoryError::DimensionMismatch {
                        expected: dimensions,
                        actual: file.dimensions,
                    });
                }
                file
            }
            None => PatternsFileIn {
                version: PATTERNS_FILE_VERSION,
                dimensions,
                records: Vec::new(),
                clusters: Vec::new(),
            },
        };

        let index = match index_bytes {
            Some(bytes) => {
                VectorIndex::from_bytes(&bytes, dimensions, config.index.clone(), &paths.index)?
            }
            None => VectorIndex::new(dimensions, config.index.clone())?,
        };

        let data = assemble(file.records, file.clusters, index, paths)?;
        info!(
            patterns = data.records.len(),
            clusters = data.clusters.len(),
            index_mode = %data.index.mode(),
            path = %paths.patterns.display(),
            "Pattern store loaded"
        );
        Ok(Self::from_data(data, cache, config))
    }
}

/// Check records, clusters and index agree, then attach embeddings.
fn assemble(
    mut records: Vec<PatternRecord>,
    clusters: Vec<ClusterAssignment>,
    index: VectorIndex,
    paths: &StorePaths,
) -> Result<StoreData> {
    let corrupt = |reason: String| MemoryError::corrupt(&paths.patterns, reason);

    let mut ids = HashSet::with_capacity(records.len());
    for record in &mut records {
        if !ids.insert(record.id) {
            return Err(corrupt(format!("duplicate pattern id {}", record.id)));
        }
        if record.frequency == 0 {
            return Err(corrupt(format!("pattern {} has zero frequency", record.id)));
        }
        let Some(vector) = index.get(&record.id) else {
            return Err(corrupt(format!("pattern {} has no indexed vector", record.id)));
        };
        record.embedding = vector.to_vec();
    }
    if index.len() != records.len() {
        return Err(MemoryError::corrupt(
            &paths.index,
            format!(
                "index holds {} vectors for {} patterns",
                index.len(),
                records.len()
            ),
        ));
    }

    let mut clustered = HashSet::new();
    for cluster in &clusters {
        if !cluster.members.contains(&cluster.representative) {
            return Err(corrupt(format!(
                "cluster {} representative is not a member",
                cluster.cluster_id
            )));
        }
        for id in &cluster.members {
            if !ids.contains(id) {
                return Err(corrupt(format!(
                    "cluster {} references unknown pattern {}",
                    cluster.cluster_id, id
                )));
            }
            if !clustered.insert(*id) {
                return Err(corrupt(format!("pattern {} is in two clusters", id)));
            }
        }
    }

    let mut data = StoreData {
        records,
        positions: Default::default(),
        index,
        clusters,
    };
    data.reindex_positions();
    Ok(data)
}
