//! External model collaborators for nudge.
//!
//! The engine depends on two outside services: an embedding provider that
//! turns text into vectors, and (optionally) a chat model that condenses a
//! cluster of error patterns into one reminder. Both sit behind traits so the
//! rest of the workspace can run against deterministic mocks.
//!
//! ```text
//!   Embedder ──────────┐        Abstractor ─────────┐
//!   ├─ OpenAiEmbedder  │        ├─ OpenAiAbstractor │
//!   ├─ MockEmbedder    │        └─ MockAbstractor   │
//!   └─ TableEmbedder   │                            │
//!                      └──── with_retry(policy) ────┘
//! ```

pub mod abstraction;
pub mod embeddings;
pub mod error;
pub mod retry;

pub use abstraction::{
    Abstractor, MockAbstractor, OpenAiAbstractor, OpenAiAbstractorConfig, SharedAbstractor,
};
pub use embeddings::{
    Embedder, EmbedderSpec, MockEmbedder, OpenAiEmbedder, OpenAiEmbedderConfig, SharedEmbedder,
    TableEmbedder, build_embedder, cosine_similarity, normalize,
};
pub use error::{LlmError, Result};
pub use retry::{RetryPolicy, with_retry};
