//! Tiered reminder routing for nudge.
//!
//! For each incoming question the engine picks the reminders to inject into
//! the answering prompt, trying three strategies in priority order and using
//! the first that produces anything:
//!
//! 1. **Weakness** - rule-based match against a curated catalog of known failure modes
//! 2. **Retrieval** - nearest stored error patterns above a similarity threshold
//! 3. **Category fallback** - fixed boilerplate for the question's category
//!
//! A catalog of known entity names supplies the category when a request
//! carries none, and flags topics outside the knowledge base.
//!
//! The pattern store and catalogs are served from an immutable [`Snapshot`]
//! that the [`ReloadSupervisor`] replaces wholesale when the backing files
//! change.
//!
//! # Example
//!
//! ```no_run
//! use nudge_config::NudgeConfig;
//! use nudge_router::{RouteRequest, RoutingEngine};
//!
//! # async fn demo() -> nudge_router::Result<()> {
//! let engine = RoutingEngine::initialize(&NudgeConfig::default()).await?;
//! let decision = engine.route(RouteRequest::new("乙肝疫苗要打几针？")).await;
//! println!("{}", decision.render_prompt_section());
//! # Ok(())
//! # }
//! ```

pub mod decision;
pub mod engine;
pub mod entities;
mod error;
pub mod fallback;
pub mod reload;
pub mod snapshot;
pub mod weakness;

pub use decision::{DecisionEngine, Reminder, RouteRequest, RoutingDecision, Tier};
pub use entities::{EntityCatalog, EntityLookup, EntityMatch, MatchKind};
pub use engine::{EngineSettings, EngineStats, RoutingEngine, retry_policy, store_config};
pub use error::{Result, RouterError};
pub use fallback::FALLBACK_CONFIDENCE;
pub use reload::{Fingerprints, ReloadOutcome, ReloadSupervisor, WatchHandle, WriteGuard};
pub use snapshot::{Snapshot, SnapshotCell, SnapshotCounts, SnapshotLoader, SnapshotPaths};
pub use weakness::{
    CatalogStats, MatcherConfig, WeaknessCatalog, WeaknessEntry, WeaknessMatch, WeaknessMatcher,
};
