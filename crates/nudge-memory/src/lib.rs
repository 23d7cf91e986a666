//! Error-pattern memory for nudge.
//!
//! This crate stores the recurring mistakes an answering model has made and
//! finds the ones relevant to a new question.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────────────┐
//! │  Retriever                                                           │
//! │  - oversampled nearest-neighbour query, category/frequency filters   │
//! └──────────────────────────────────────────────────────────────────────┘
//!                                   │
//! ┌──────────────────────────────────────────────────────────────────────┐
//! │  PatternStore                                                        │
//! │  - insert-with-dedup, category inference, clustering, purge          │
//! │  - patterns.json + patterns.idx, atomic save, validated load         │
//! └──────────────────────────────────────────────────────────────────────┘
//!                │                                    │
//! ┌───────────────────────────────┐  ┌───────────────────────────────────┐
//! │  EmbeddingCache (SQLite)      │  │  VectorIndex                      │
//! │  sha256(text) → vector        │  │  exact below threshold, IVF above │
//! └───────────────────────────────┘  └───────────────────────────────────┘
//! ```
//!
//! # Usage
//!
//! ```no_run
//! use std::sync::Arc;
//! use nudge_llm::{MockEmbedder, RetryPolicy};
//! use nudge_memory::{
//!     EmbeddingCache, ErrorType, NewPattern, PatternStore, RetrievalQuery, Retriever,
//!     Severity, StoreConfig,
//! };
//!
//! # async fn demo() -> nudge_memory::Result<()> {
//! let cache = EmbeddingCache::in_memory(Arc::new(MockEmbedder::new(64)), RetryPolicy::default())?;
//! let store = PatternStore::new(Arc::new(cache), StoreConfig::default())?;
//!
//! store
//!     .insert(NewPattern::new("未说明疫苗接种间隔", Severity::Major, ErrorType::Incomplete))
//!     .await?;
//!
//! let query = RetrievalQuery::new("乙肝疫苗要打几针？").with_threshold(0.5);
//! let hits = Retriever::default().retrieve(&store, &query).await?;
//! # Ok(())
//! # }
//! ```

pub mod cache;
pub mod error;
pub mod index;
pub mod kmeans;
pub mod retriever;
pub mod store;
pub mod types;
pub mod validation;

pub use cache::{EmbeddingCache, MAX_EMBED_CHARS};
pub use error::{MemoryError, Result};
pub use index::{IndexConfig, IndexMode, VectorIndex};
pub use retriever::{RetrievalQuery, RetrievedPattern, Retriever};
pub use store::{
    ClusterOptions, ClusterReport, ClusterSummary, PatternStore, RepresentativeStrategy,
    StoreConfig, StorePaths, StoreStats, infer_category,
};
pub use types::{
    Category, ClusterAssignment, ErrorType, InsertOutcome, NewPattern, PatternId, PatternRecord,
    Severity,
};
