//! Vector index over pattern embeddings.
//!
//! Small collections are searched exhaustively. Once the collection reaches
//! `exact_threshold` vectors the index trains an inverted file (IVF): k-means
//! centroids partition the vectors into lists, and a query only scores the
//! lists whose centroids are closest to it.
//!
//! # Artifact format
//!
//! ```text
//! header   magic "NDGX" | version u32 | dimensions u32 | reserved u32 | count u64
//! entries  count × ( id [u8; 16] | dimensions × f32 )
//! ```
//!
//! All integers and floats are little-endian.

use std::collections::HashMap;

use serde::Serialize;
use tracing::{debug, info};
use zerocopy::byteorder::little_endian::{F32, U32, U64};
use zerocopy::{FromBytes, Immutable, IntoBytes, KnownLayout, Unaligned};

use nudge_llm::cosine_similarity;

use crate::error::{MemoryError, Result};
use crate::kmeans::kmeans;
use crate::types::PatternId;
use crate::validation::validate_embedding;

const MAGIC: [u8; 4] = *b"NDGX";
const FORMAT_VERSION: u32 = 1;
const HEADER_LEN: usize = std::mem::size_of::<IndexHeader>();

#[derive(Debug, FromBytes, IntoBytes, KnownLayout, Immutable, Unaligned)]
#[repr(C)]
struct IndexHeader {
    magic: [u8; 4],
    version: U32,
    dimensions: U32,
    reserved: U32,
    count: U64,
}

/// Tuning for the index.
#[derive(Debug, Clone, PartialEq)]
pub struct IndexConfig {
    /// Collections at or above this size use the IVF structure.
    pub exact_threshold: usize,
    /// Number of IVF lists; `None` means √N.
    pub nlist: Option<usize>,
    /// Lists probed per query.
    pub nprobe: usize,
    /// k-means iterations when training.
    pub max_iterations: usize,
    /// Seed for centroid training.
    pub seed: u64,
}

impl Default for IndexConfig {
    fn default() -> Self {
        Self {
            exact_threshold: 1_000,
            nlist: None,
            nprobe: 8,
            max_iterations: 20,
            seed: 42,
        }
    }
}

/// Which search structure is active.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "mode", rename_all = "snake_case")]
pub enum IndexMode {
    Exact,
    Ivf { nlist: usize, nprobe: usize },
}

impl std::fmt::Display for IndexMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            IndexMode::Exact => write!(f, "exact"),
            IndexMode::Ivf { nlist, nprobe } => write!(f, "ivf(nlist={}, nprobe={})", nlist, nprobe),
        }
    }
}

#[derive(Debug, Clone)]
struct InvertedFile {
    /// Unit-length centroids.
    centroids: Vec<Vec<f32>>,
    /// Positions into the index's vector table, one list per centroid.
    lists: Vec<Vec<usize>>,
}

impl InvertedFile {
    fn nearest_list(&self, unit: &[f32]) -> usize {
        let mut best = 0;
        let mut best_sim = f32::NEG_INFINITY;
        for (i, c) in self.centroids.iter().enumerate() {
            let sim = dot(unit, c);
            if sim > best_sim {
                best = i;
                best_sim = sim;
            }
        }
        best
    }
}

/// Cosine-similarity index keyed by [`PatternId`].
#[derive(Debug, Clone)]
pub struct VectorIndex {
    dimensions: usize,
    config: IndexConfig,
    ids: Vec<PatternId>,
    vectors: Vec<Vec<f32>>,
    positions: HashMap<PatternId, usize>,
    ivf: Option<InvertedFile>,
}

impl VectorIndex {
    /// Create an empty index for vectors of `dimensions` components.
    pub fn new(dimensions: usize, config: IndexConfig) -> Result<Self> {
        if dimensions == 0 {
            return Err(MemoryError::InvalidData(
                "index dimensions must be greater than zero".to_string(),
            ));
        }
        Ok(Self {
            dimensions,
            config,
            ids: Vec::new(),
            vectors: Vec::new(),
            positions: HashMap::new(),
            ivf: None,
        })
    }

    pub fn dimensions(&self) -> usize {
        self.dimensions
    }

    pub fn config(&self) -> &IndexConfig {
        &self.config
    }

    pub fn len(&self) -> usize {
        self.ids.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ids.is_empty()
    }

    pub fn contains(&self, id: &PatternId) -> bool {
        self.positions.contains_key(id)
    }

    pub fn get(&self, id: &PatternId) -> Option<&[f32]> {
        self.positions.get(id).map(|&p| self.vectors[p].as_slice())
    }

    pub fn ids(&self) -> &[PatternId] {
        &self.ids
    }

    pub fn mode(&self) -> IndexMode {
        match &self.ivf {
            None => IndexMode::Exact,
            Some(ivf) => IndexMode::Ivf {
                nlist: ivf.centroids.len(),
                nprobe: self.config.nprobe.min(ivf.centroids.len()),
            },
        }
    }

    /// Add a vector.
    ///
    /// Crossing `exact_threshold` retrains the IVF structure; otherwise, in
    /// IVF mode, the vector is appended to its nearest list.
    pub fn add(&mut self, id: PatternId, vector: Vec<f32>) -> Result<()> {
        validate_embedding(&vector, self.dimensions)?;
        if self.positions.contains_key(&id) {
            return Err(MemoryError::InvalidData(format!(
                "pattern {} is already indexed",
                id
            )));
        }

        let position = self.ids.len();
        self.ids.push(id);
        self.positions.insert(id, position);

        let unit = unit(&vector);
        self.vectors.push(vector);

        match self.ivf.as_mut() {
            Some(ivf) => {
                let list = ivf.nearest_list(&unit);
                ivf.lists[list].push(position);
            }
            None if self.ids.len() >= self.config.exact_threshold => {
                info!(
                    vectors = self.ids.len(),
                    threshold = self.config.exact_threshold,
                    "Index crossed exact threshold, training IVF"
                );
                self.rebuild();
            }
            None => {}
        }
        Ok(())
    }

    /// Remove the given ids. Returns how many were present.
    ///
    /// The search structure is rebuilt afterwards.
    pub fn remove(&mut self, ids: &[PatternId]) -> usize {
        let before = self.ids.len();
        let doomed: std::collections::HashSet<&PatternId> = ids.iter().collect();

        let mut kept_ids = Vec::with_capacity(before);
        let mut kept_vectors = Vec::with_capacity(before);
        for (id, vector) in self.ids.drain(..).zip(self.vectors.drain(..)) {
            if !doomed.contains(&id) {
                kept_ids.push(id);
                kept_vectors.push(vector);
            }
        }
        self.ids = kept_ids;
        self.vectors = kept_vectors;
        self.positions = self.ids.iter().enumerate().map(|(i, id)| (*id, i)).collect();

        let removed = before - self.ids.len();
        if removed > 0 {
            self.rebuild();
        }
        removed
    }

    /// Retrain the search structure for the current vectors.
    pub fn rebuild(&mut self) {
        if self.ids.len() < self.config.exact_threshold {
            self.ivf = None;
            return;
        }

        let n = self.ids.len();
        let nlist = self
            .config
            .nlist
            .unwrap_or_else(|| (n as f64).sqrt().round() as usize)
            .clamp(1, n);

        let units: Vec<Vec<f32>> = self.vectors.iter().map(|v| unit(v)).collect();
        let refs: Vec<&[f32]> = units.iter().map(|v| v.as_slice()).collect();
        let trained = kmeans(&refs, nlist, self.config.max_iterations, self.config.seed);

        let centroids: Vec<Vec<f32>> = trained.centroids.iter().map(|c| unit(c)).collect();
        let mut lists = vec![Vec::new(); centroids.len()];
        for (position, &list) in trained.assignments.iter().enumerate() {
            lists[list].push(position);
        }

        debug!(vectors = n, nlist = centroids.len(), "IVF trained");
        self.ivf = Some(InvertedFile { centroids, lists });
    }

    /// The `k` most similar vectors to `query`, most similar first.
    pub fn search(&self, query: &[f32], k: usize) -> Result<Vec<(PatternId, f32)>> {
        validate_embedding(query, self.dimensions)?;
        if k == 0 || self.ids.is_empty() {
            return Ok(Vec::new());
        }

        let mut scored: Vec<(usize, f32)> = match &self.ivf {
            None => self
                .vectors
                .iter()
                .enumerate()
                .map(|(i, v)| (i, cosine_similarity(query, v)))
                .collect(),
            Some(ivf) => {
                let q = unit(query);
                let mut order: Vec<(usize, f32)> = ivf
                    .centroids
                    .iter()
                    .enumerate()
                    .map(|(i, c)| (i, dot(&q, c)))
                    .collect();
                order.sort_by(|a, b| b.1.total_cmp(&a.1));

                // Probe at least nprobe lists, and keep going until k candidates exist.
                let mut candidates = Vec::new();
                for (probed, (list, _)) in order.iter().enumerate() {
                    if probed >= self.config.nprobe.max(1) && candidates.len() >= k {
                        break;
                    }
                    candidates.extend(ivf.lists[*list].iter().copied());
                }
                candidates
                    .into_iter()
                    .map(|i| (i, cosine_similarity(query, &self.vectors[i])))
                    .collect()
            }
        };

        scored.sort_by(|a, b| b.1.total_cmp(&a.1));
        scored.truncate(k);
        Ok(scored
            .into_iter()
            .map(|(i, sim)| (self.ids[i], sim))
            .collect())
    }

    /// Serialize every `(id, vector)` pair into the artifact format.
    pub fn to_bytes(&self) -> Vec<u8> {
        let header = IndexHeader {
            magic: MAGIC,
            version: U32::new(FORMAT_VERSION),
            dimensions: U32::new(self.dimensions as u32),
            reserved: U32::new(0),
            count: U64::new(self.ids.len() as u64),
        };

        let entry_len = 16 + self.dimensions * 4;
        let mut out = Vec::with_capacity(HEADER_LEN + self.ids.len() * entry_len);
        out.extend_from_slice(header.as_bytes());
        for (id, vector) in self.ids.iter().zip(&self.vectors) {
            out.extend_from_slice(id.as_bytes());
            for &x in vector {
                out.extend_from_slice(F32::new(x).as_bytes());
            }
        }
        out
    }

    /// Parse an artifact, checking it against `expected_dimensions`.
    ///
    /// Structural problems yield `CorruptSnapshot` (attributed to `origin`);
    /// a well-formed artifact of the wrong dimension yields `DimensionMismatch`.
    pub fn from_bytes(
        bytes: &[u8],
        expected_dimensions: usize,
        config: IndexConfig,
        origin: &std::path::Path,
    ) -> Result<Self> {
        let header_bytes = bytes
            .get(..HEADER_LEN)
            .ok_or_else(|| MemoryError::corrupt(origin, "index artifact shorter than header"))?;
        let header = IndexHeader::read_from_bytes(header_bytes)
            .map_err(|_| MemoryError::corrupt(origin, "unreadable index header"))?;

        if header.magic != MAGIC {
            return Err(MemoryError::corrupt(origin, "bad index magic"));
        }
        if header.version.get() != FORMAT_VERSION {
            return Err(MemoryError::corrupt(
                origin,
                format!("unsupported index version {}", header.version.get()),
            ));
        }

        let dimensions = header.dimensions.get() as usize;
        if dimensions != expected_dimensions {
            return Err(MemoryError::DimensionMismatch {
                expected: expected_dimensions,
                actual: dimensions,
            });
        }

        let count = header.count.get() as usize;
        let entry_len = 16 + dimensions * 4;
        let body = &bytes[HEADER_LEN..];
        if body.len() != count.saturating_mul(entry_len) {
            return Err(MemoryError::corrupt(
                origin,
                format!(
                    "index body is {} bytes, expected {} entries of {} bytes",
                    body.len(),
                    count,
                    entry_len
                ),
            ));
        }

        // Entries are loaded exactly; training happens once at the end.
        let mut index = Self::new(dimensions, config)?;
        let threshold = index.config.exact_threshold;
        index.config.exact_threshold = usize::MAX;
        for entry in body.chunks_exact(entry_len) {
            let mut id = [0u8; 16];
            id.copy_from_slice(&entry[..16]);
            let floats = <[F32]>::ref_from_bytes(&entry[16..])
                .map_err(|_| MemoryError::corrupt(origin, "unreadable vector data"))?;
            let vector: Vec<f32> = floats.iter().map(|f| f.get()).collect();
            index.add(PatternId::from_bytes(id), vector).map_err(|e| match e {
                MemoryError::InvalidData(reason) => MemoryError::corrupt(origin, reason),
                other => other,
            })?;
        }
        index.config.exact_threshold = threshold;
        index.rebuild();
        Ok(index)
    }
}

fn dot(a: &[f32], b: &[f32]) -> f32 {
    a.iter().zip(b).map(|(x, y)| x * y).sum()
}

fn unit(v: &[f32]) -> Vec<f32> {
    let mut out = v.to_vec();
    nudge_llm::normalize(&mut out);
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::StdRng;
    use rand::{Rng, SeedableRng};
    use std::path::Path;

    fn random_unit(rng: &mut StdRng, dims: usize) -> Vec<f32> {
        let v: Vec<f32> = (0..dims).map(|_| rng.random::<f32>() * 2.0 - 1.0).collect();
        unit(&v)
    }

    #[test]
    fn test_zero_dimensions_rejected() {
        assert!(VectorIndex::new(0, IndexConfig::default()).is_err());
    }

    #[test]
    fn test_exact_search_orders_by_similarity() {
        let mut index = VectorIndex::new(2, IndexConfig::default()).unwrap();
        let a = PatternId::new();
        let b = PatternId::new();
        let c = PatternId::new();
        index.add(a, vec![1.0, 0.0]).unwrap();
        index.add(b, vec![0.0, 1.0]).unwrap();
        index.add(c, vec![0.7, 0.7]).unwrap();

        let hits = index.search(&[1.0, 0.1], 2).unwrap();
        assert_eq!(hits.len(), 2);
        assert_eq!(hits[0].0, a);
        assert_eq!(hits[1].0, c);
        assert!(hits[0].1 >= hits[1].1);
        assert_eq!(index.mode(), IndexMode::Exact);
    }

    #[test]
    fn test_add_rejects_wrong_dimension_and_duplicates() {
        let mut index = VectorIndex::new(3, IndexConfig::default()).unwrap();
        let err = index.add(PatternId::new(), vec![1.0, 0.0]).unwrap_err();
        assert!(matches!(
            err,
            MemoryError::DimensionMismatch {
                expected: 3,
                actual: 2
            }
        ));

        let id = PatternId::new();
        index.add(id, vec![1.0, 0.0, 0.0]).unwrap();
        assert!(index.add(id, vec![0.0, 1.0, 0.0]).is_err());
        assert_eq!(index.len(), 1);
    }

    #[test]
    fn test_crossing_threshold_trains_ivf() {
        let config = IndexConfig {
            exact_threshold: 50,
            ..Default::default()
        };
        let mut index = VectorIndex::new(8, config).unwrap();
        let mut rng = StdRng::seed_from_u64(5);
        for _ in 0..49 {
            index.add(PatternId::new(), random_unit(&mut rng, 8)).unwrap();
        }
        assert_eq!(index.mode(), IndexMode::Exact);

        index.add(PatternId::new(), random_unit(&mut rng, 8)).unwrap();
        assert!(matches!(index.mode(), IndexMode::Ivf { nlist: 7, .. }));

        // Later adds are appended without retraining.
        let id = PatternId::new();
        let v = random_unit(&mut rng, 8);
        index.add(id, v.clone()).unwrap();
        let hits = index.search(&v, 1).unwrap();
        assert_eq!(hits[0].0, id);
    }

    #[test]
    fn test_ivf_returns_k_results_even_with_small_lists() {
        let config = IndexConfig {
            exact_threshold: 20,
            nlist: Some(10),
            nprobe: 1,
            ..Default::default()
        };
        let mut index = VectorIndex::new(4, config).unwrap();
        let mut rng = StdRng::seed_from_u64(9);
        for _ in 0..40 {
            index.add(PatternId::new(), random_unit(&mut rng, 4)).unwrap();
        }
        let q = random_unit(&mut rng, 4);
        assert_eq!(index.search(&q, 15).unwrap().len(), 15);
    }

    #[test]
    fn test_remove_and_rebuild() {
        let config = IndexConfig {
            exact_threshold: 10,
            ..Default::default()
        };
        let mut index = VectorIndex::new(4, config).unwrap();
        let mut rng = StdRng::seed_from_u64(11);
        let ids: Vec<PatternId> = (0..10).map(|_| PatternId::new()).collect();
        for id in &ids {
            index.add(*id, random_unit(&mut rng, 4)).unwrap();
        }
        assert!(matches!(index.mode(), IndexMode::Ivf { .. }));

        assert_eq!(index.remove(&ids[..3]), 3);
        assert_eq!(index.len(), 7);
        assert_eq!(index.mode(), IndexMode::Exact);
        assert!(!index.contains(&ids[0]));
        assert!(index.get(&ids[5]).is_some());
        assert_eq!(index.remove(&[PatternId::new()]), 0);
    }

    #[test]
    fn test_artifact_round_trip_and_validation() {
        let mut index = VectorIndex::new(3, IndexConfig::default()).unwrap();
        let id = PatternId::new();
        index.add(id, vec![0.25, -0.5, 1.0]).unwrap();
        let bytes = index.to_bytes();
        assert_eq!(&bytes[..4], b"NDGX");
        assert_eq!(bytes.len(), HEADER_LEN + 16 + 12);

        let origin = Path::new("patterns.idx");
        let back = VectorIndex::from_bytes(&bytes, 3, IndexConfig::default(), origin).unwrap();
        assert_eq!(back.get(&id).unwrap(), &[0.25, -0.5, 1.0]);

        let err = VectorIndex::from_bytes(&bytes, 4, IndexConfig::default(), origin).unwrap_err();
        assert!(matches!(err, MemoryError::DimensionMismatch { .. }));

        let err = VectorIndex::from_bytes(&bytes[..bytes.len() - 1], 3, IndexConfig::default(), origin)
            .unwrap_err();
        assert!(matches!(err, MemoryError::CorruptSnapshot { .. }));

        let mut bad_magic = bytes.clone();
        bad_magic[0] = b'X';
        let err = VectorIndex::from_bytes(&bad_magic, 3, IndexConfig::default(), origin).unwrap_err();
        assert!(matches!(err, MemoryError::CorruptSnapshot { .. }));

        let mut dup = bytes.clone();
        dup[HEADER_LEN - 8] = 2;
        dup.extend_from_slice(&bytes[HEADER_LEN..]);
        let err = VectorIndex::from_bytes(&dup, 3, IndexConfig::default(), origin).unwrap_err();
        assert!(matches!(err, MemoryError::CorruptSnapshot { .. }));
    }
}
