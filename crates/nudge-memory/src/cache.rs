//! Content-addressed embedding cache backed by SQLite.
//!
//! Keys are the SHA-256 hex digest of the (truncated) input text. The cache
//! only grows; rows are never evicted.

use std::path::Path;

use chrono::Utc;
use parking_lot::Mutex;
use rusqlite::{Connection, OpenFlags, OptionalExtension, params};
use sha2::{Digest, Sha256};
use tracing::{debug, info};
use zerocopy::IntoBytes;

use nudge_llm::{RetryPolicy, SharedEmbedder, with_retry};

use crate::error::{MemoryError, Result};
use crate::validation::validate_embedding;

/// Texts are cut to this many characters before hashing and embedding.
pub const MAX_EMBED_CHARS: usize = 5_500;

/// Cut `text` to at most `max_chars` characters, on a char boundary.
pub fn truncate_chars(text: &str, max_chars: usize) -> &str {
    match text.char_indices().nth(max_chars) {
        Some((idx, _)) => &text[..idx],
        None => text,
    }
}

/// Cache key for a text that has already been truncated.
pub fn cache_key(text: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(text.as_bytes());
    hex::encode(hasher.finalize())
}

/// Embedding cache in front of an external [`Embedder`](nudge_llm::Embedder).
pub struct EmbeddingCache {
    conn: Mutex<Connection>,
    embedder: SharedEmbedder,
    policy: RetryPolicy,
    dimensions: usize,
}

impl std::fmt::Debug for EmbeddingCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EmbeddingCache")
            .field("embedder", &self.embedder.name())
            .field("dimensions", &self.dimensions)
            .field("policy", &self.policy)
            .finish_non_exhaustive()
    }
}

impl EmbeddingCache {
    /// Open or create a cache database at `path`.
    pub fn open(
        path: impl AsRef<Path>,
        embedder: SharedEmbedder,
        policy: RetryPolicy,
    ) -> Result<Self> {
        let path = path.as_ref();
        if let Some(parent) = path.parent()
            && !parent.as_os_str().is_empty()
        {
            std::fs::create_dir_all(parent)?;
        }

        let conn = Connection::open_with_flags(
            path,
            OpenFlags::SQLITE_OPEN_READ_WRITE
                | OpenFlags::SQLITE_OPEN_CREATE
                | OpenFlags::SQLITE_OPEN_FULL_MUTEX,
        )?;
        conn.pragma_update(None, "journal_mode", "WAL")?;
        conn.pragma_update(None, "synchronous", "NORMAL")?;

        let cache = Self::with_connection(conn, embedder, policy)?;
        info!(path = %path.display(), entries = cache.len()?, "Embedding cache opened");
        Ok(cache)
    }

    /// Create an in-memory cache (useful for testing).
    pub fn in_memory(embedder: SharedEmbedder, policy: RetryPolicy) -> Result<Self> {
        Self::with_connection(Connection::open_in_memory()?, embedder, policy)
    }

    fn with_connection(
        conn: Connection,
        embedder: SharedEmbedder,
        policy: RetryPolicy,
    ) -> Result<Self> {
        let dimensions = embedder.dimensions();
        if dimensions == 0 {
            return Err(MemoryError::InvalidData(
                "embedder reports zero dimensions".to_string(),
            ));
        }

        conn.execute_batch(
            r#"
            CREATE TABLE IF NOT EXISTS embeddings (
                key TEXT PRIMARY KEY,
                dims INTEGER NOT NULL,
                vector BLOB NOT NULL,
                created_at TEXT NOT NULL
            );
            "#,
        )?;

        Ok(Self {
            conn: Mutex::new(conn),
            embedder,
            policy,
            dimensions,
        })
    }

    pub fn dimensions(&self) -> usize {
        self.dimensions
    }

    /// Number of cached vectors.
    pub fn len(&self) -> Result<usize> {
        let conn = self.conn.lock();
        let count: i64 = conn.query_row("SELECT COUNT(*) FROM embeddings", [], |row| row.get(0))?;
        Ok(count as usize)
    }

    pub fn is_empty(&self) -> Result<bool> {
        Ok(self.len()? == 0)
    }

    /// Return the cached vector for `text`, computing and storing it on a miss.
    ///
    /// Provider failures and timeouts, after the retry budget is spent,
    /// surface as [`MemoryError::EmbeddingUnavailable`].
    pub async fn get_or_compute(&self, text: &str) -> Result<Vec<f32>> {
        let text = truncate_chars(text, MAX_EMBED_CHARS);
        let key = cache_key(text);

        if let Some(vector) = self.lookup(&key)? {
            debug!(key = %&key[..12], "Embedding cache hit");
            return Ok(vector);
        }

        let vector = with_retry(self.policy, self.embedder.name(), || {
            self.embedder.embed(text)
        })
        .await?;
        validate_embedding(&vector, self.dimensions)?;

        self.store(&key, &vector)?;
        debug!(key = %&key[..12], "Embedding cache miss, stored");
        Ok(vector)
    }

    /// Embed many texts, only sending cache misses to the provider.
    ///
    /// Output order matches input order.
    pub async fn get_or_compute_batch(&self, texts: &[&str]) -> Result<Vec<Vec<f32>>> {
        let truncated: Vec<&str> = texts
            .iter()
            .map(|t| truncate_chars(t, MAX_EMBED_CHARS))
            .collect();
        let keys: Vec<String> = truncated.iter().map(|t| cache_key(t)).collect();

        let mut results: Vec<Option<Vec<f32>>> = Vec::with_capacity(texts.len());
        for key in &keys {
            results.push(self.lookup(key)?);
        }

        let misses: Vec<usize> = (0..texts.len()).filter(|&i| results[i].is_none()).collect();
        if !misses.is_empty() {
            let miss_texts: Vec<&str> = misses.iter().map(|&i| truncated[i]).collect();
            let computed = with_retry(self.policy, self.embedder.name(), || {
                self.embedder.embed_batch(&miss_texts)
            })
            .await?;

            if computed.len() != misses.len() {
                return Err(MemoryError::InvalidData(format!(
                    "embedder returned {} vectors for {} texts",
                    computed.len(),
                    misses.len()
                )));
            }

            for (&i, vector) in misses.iter().zip(computed) {
                validate_embedding(&vector, self.dimensions)?;
                self.store(&keys[i], &vector)?;
                results[i] = Some(vector);
            }
        }

        debug!(
            total = texts.len(),
            misses = misses.len(),
            "Batch embedding complete"
        );

        results
            .into_iter()
            .map(|v| v.ok_or_else(|| MemoryError::InvalidData("missing batch embedding".into())))
            .collect()
    }

    fn lookup(&self, key: &str) -> Result<Option<Vec<f32>>> {
        let conn = self.conn.lock();
        let row: Option<(i64, Vec<u8>)> = conn
            .query_row(
                "SELECT dims, vector FROM embeddings WHERE key = ?1",
                params![key],
                |row| Ok((row.get(0)?, row.get(1)?)),
            )
            .optional()?;

        // Rows written for a different dimension (provider change) count as misses.
        Ok(row.and_then(|(dims, bytes)| {
            let dims = dims as usize;
            if dims != self.dimensions || bytes.len() != dims * std::mem::size_of::<f32>() {
                return None;
            }
            let mut vector = vec![0f32; dims];
            vector.as_mut_bytes().copy_from_slice(&bytes);
            Some(vector)
        }))
    }

    fn store(&self, key: &str, vector: &[f32]) -> Result<()> {
        let conn = self.conn.lock();
        conn.execute(
            "INSERT OR REPLACE INTO embeddings (key, dims, vector, created_at) VALUES (?1, ?2, ?3, ?4)",
            params![
                key,
                vector.len() as i64,
                vector.as_bytes(),
                Utc::now().to_rfc3339()
            ],
        )?;
        Ok(())
    }
}
