//! End-to-end routing scenarios against a real engine over a temp directory.
//!
//! Embeddings come from a lookup table so similarities are exact.

mod common;

use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use async_trait::async_trait;
use common::{TestEngine, open_engine, weakness, write_catalog};
use nudge_config::MatchWeights;
use nudge_llm::{Embedder, LlmError, RetryPolicy, SharedEmbedder, TableEmbedder};
use nudge_memory::{
    Category, EmbeddingCache, ErrorType, NewPattern, Severity, StoreConfig,
};
use nudge_router::{
    EngineSettings, FALLBACK_CONFIDENCE, RouteRequest, RoutingEngine, SnapshotPaths, Tier,
};

const DISEASE_PATTERN: &str = "未说明糖尿病的并发症";
const DISEASE_GUIDELINE: &str = "回答糖尿病问题时应列出主要并发症";

fn disease_pattern() -> NewPattern {
    NewPattern::new(DISEASE_PATTERN, Severity::Major, ErrorType::Incomplete)
        .with_category(Category::Disease)
        .with_guideline(DISEASE_GUIDELINE)
}

// ─────────────────────────────────────────────────────────────────────────────
// Scenario A: dedup on insert
// ─────────────────────────────────────────────────────────────────────────────

#[tokio::test]
async fn test_near_duplicates_merge_on_insert() -> Result<()> {
    let embedder = TableEmbedder::new(2)
        .with("pattern a", vec![1.0, 0.0])
        .with("pattern b", vec![0.97, 0.2431])
        .with("pattern c", vec![0.1, 0.99499]);
    let harness = TestEngine::start(embedder)?;
    let engine = &harness.engine;

    let first = engine
        .insert_pattern(
            NewPattern::new("pattern a", Severity::Minor, ErrorType::Incomplete)
                .with_example("example a"),
        )
        .await?;
    let second = engine
        .insert_pattern(
            NewPattern::new("pattern b", Severity::Critical, ErrorType::Incomplete)
                .with_example("example b"),
        )
        .await?;
    let third = engine
        .insert_pattern(
            NewPattern::new("pattern c", Severity::Minor, ErrorType::Unclear)
                .with_example("example c"),
        )
        .await?;

    assert!(!first.is_merge());
    assert!(second.is_merge());
    assert_eq!(second.id(), first.id());
    assert!(!third.is_merge());

    let store = engine.snapshot().store.clone();
    assert_eq!(store.len(), 2);

    let merged = store.get(&first.id()).expect("merged record");
    assert_eq!(merged.frequency, 2);
    assert_eq!(merged.examples, vec!["example a", "example b"]);
    assert_eq!(merged.severity, Severity::Critical);

    let single = store.get(&third.id()).expect("separate record");
    assert_eq!(single.frequency, 1);
    Ok(())
}

// ─────────────────────────────────────────────────────────────────────────────
// Scenario B: Tier 1 weakness match
// ─────────────────────────────────────────────────────────────────────────────

#[tokio::test]
async fn test_weakness_keyword_routes_to_tier_one() -> Result<()> {
    let settings = EngineSettings {
        matcher: nudge_router::MatcherConfig {
            weights: MatchWeights {
                keyword: 0.8,
                entity: 0.1,
                pattern: 0.1,
            },
            ..Default::default()
        },
        ..Default::default()
    };
    let harness = TestEngine::start_with(TableEmbedder::new(3), settings, StoreConfig::default())?;
    write_catalog(
        harness.dir.path(),
        &[weakness("vaccine-schedule", &["疫苗"], "说明接种针次和间隔")],
    )?;
    assert!(harness.engine.reload().await?.reloaded);

    let decision = harness.engine.route(RouteRequest::new("疫苗接种")).await;

    assert_eq!(decision.tier, Tier::Weakness);
    assert_eq!(decision.trace, vec![Tier::Weakness]);
    assert!((decision.confidence - 0.8).abs() < 1e-6);
    assert_eq!(decision.reminders.len(), 1);
    assert_eq!(decision.reminders[0].source_id, "vaccine-schedule");
    assert_eq!(decision.reminders[0].tier, Tier::Weakness);
    // Retrieval was never consulted, so nothing was embedded.
    assert_eq!(harness.embedder.calls(), 0);
    Ok(())
}

// ─────────────────────────────────────────────────────────────────────────────
// Scenario C: Tier 2 retrieval
// ─────────────────────────────────────────────────────────────────────────────

#[tokio::test]
async fn test_similar_pattern_routes_to_tier_two() -> Result<()> {
    let embedder = TableEmbedder::new(3)
        .with(DISEASE_PATTERN, vec![1.0, 0.0, 0.0])
        .with("糖尿病会引起什么", vec![0.6, 0.8, 0.0]);
    let harness = TestEngine::start(embedder)?;
    let inserted = harness.engine.insert_pattern(disease_pattern()).await?;

    let decision = harness
        .engine
        .route(RouteRequest::new("糖尿病会引起什么"))
        .await;

    assert_eq!(decision.tier, Tier::Retrieval);
    assert_eq!(decision.trace, vec![Tier::Weakness, Tier::Retrieval]);
    assert!((decision.confidence - 0.6).abs() < 1e-5);
    assert_eq!(decision.reminders.len(), 1);
    assert_eq!(decision.reminders[0].text, DISEASE_GUIDELINE);
    assert_eq!(decision.reminders[0].source_id, inserted.id().to_string());
    assert!(decision.fallback_reason.is_none());
    Ok(())
}

#[tokio::test]
async fn test_min_confidence_overrides_threshold() -> Result<()> {
    let embedder = TableEmbedder::new(3)
        .with(DISEASE_PATTERN, vec![1.0, 0.0, 0.0])
        .with("糖尿病会引起什么", vec![0.6, 0.8, 0.0]);
    let harness = TestEngine::start(embedder)?;
    harness.engine.insert_pattern(disease_pattern()).await?;

    let strict = harness
        .engine
        .route(RouteRequest::new("糖尿病会引起什么").with_min_confidence(0.7))
        .await;
    assert_eq!(strict.tier, Tier::CategoryFallback);

    let lenient = harness
        .engine
        .route(RouteRequest::new("糖尿病会引起什么").with_min_confidence(0.55))
        .await;
    assert_eq!(lenient.tier, Tier::Retrieval);
    Ok(())
}

// ─────────────────────────────────────────────────────────────────────────────
// Scenario D: Tier 3 fallback
// ─────────────────────────────────────────────────────────────────────────────

#[tokio::test]
async fn test_dissimilar_patterns_fall_back_to_category() -> Result<()> {
    let embedder = TableEmbedder::new(3)
        .with(DISEASE_PATTERN, vec![1.0, 0.0, 0.0])
        .with("乙肝疫苗要打几针", vec![0.3, 0.0, 0.9539]);
    let harness = TestEngine::start(embedder)?;
    harness.engine.insert_pattern(disease_pattern()).await?;

    let decision = harness
        .engine
        .route(RouteRequest::new("乙肝疫苗要打几针"))
        .await;

    assert_eq!(decision.tier, Tier::CategoryFallback);
    assert_eq!(
        decision.trace,
        vec![Tier::Weakness, Tier::Retrieval, Tier::CategoryFallback]
    );
    assert_eq!(decision.confidence, FALLBACK_CONFIDENCE);
    assert!(!decision.reminders.is_empty());
    // Category inferred from the question.
    assert!(
        decision
            .reminders
            .iter()
            .all(|r| r.source_id == "fallback:vaccine")
    );
    assert!(decision.fallback_reason.is_none());
    Ok(())
}

#[tokio::test]
async fn test_fallback_uses_category_hint() -> Result<()> {
    let harness = TestEngine::start(TableEmbedder::new(3).with("问题", vec![0.0, 1.0, 0.0]))?;
    let decision = harness
        .engine
        .route(RouteRequest::new("问题").with_category(Some(Category::Surgery)))
        .await;
    assert_eq!(decision.tier, Tier::CategoryFallback);
    assert!(
        decision
            .reminders
            .iter()
            .all(|r| r.source_id == "fallback:surgery")
    );
    Ok(())
}

// ─────────────────────────────────────────────────────────────────────────────
// Dependency failures
// ─────────────────────────────────────────────────────────────────────────────

#[tokio::test]
async fn test_embedding_failure_falls_back_with_reason() -> Result<()> {
    let embedder = TableEmbedder::new(3).with(DISEASE_PATTERN, vec![1.0, 0.0, 0.0]);
    let harness = TestEngine::start(embedder)?;
    harness.engine.insert_pattern(disease_pattern()).await?;

    let decision = harness
        .engine
        .route(RouteRequest::new("an unknown question"))
        .await;

    assert_eq!(decision.tier, Tier::CategoryFallback);
    assert_eq!(decision.confidence, FALLBACK_CONFIDENCE);
    let reason = decision.fallback_reason.expect("reason recorded");
    assert!(reason.contains("mbedding"), "unexpected reason: {}", reason);
    Ok(())
}

/// Never answers within any reasonable deadline.
struct StalledEmbedder;

#[async_trait]
impl Embedder for StalledEmbedder {
    async fn embed(&self, _text: &str) -> nudge_llm::Result<Vec<f32>> {
        tokio::time::sleep(Duration::from_secs(30)).await;
        Err(LlmError::Timeout(Duration::from_secs(30)))
    }

    fn dimensions(&self) -> usize {
        3
    }

    fn name(&self) -> &str {
        "stalled"
    }
}

#[tokio::test]
async fn test_deadline_expiry_falls_back() -> Result<()> {
    let dir = tempfile::tempdir()?;
    let embedder: SharedEmbedder = Arc::new(StalledEmbedder);
    let cache = EmbeddingCache::in_memory(embedder, RetryPolicy::default())?;
    let engine = RoutingEngine::open(
        SnapshotPaths::in_dir(dir.path()),
        Arc::new(cache),
        StoreConfig::default(),
        EngineSettings::default(),
        None,
    )?;

    let started = std::time::Instant::now();
    let decision = engine
        .route(
            RouteRequest::new("乙肝疫苗要打几针").with_deadline(Duration::from_millis(50)),
        )
        .await;

    assert!(started.elapsed() < Duration::from_secs(5));
    assert_eq!(decision.tier, Tier::CategoryFallback);
    let reason = decision.fallback_reason.expect("reason recorded");
    assert!(reason.contains("deadline"), "unexpected reason: {}", reason);
    Ok(())
}

#[tokio::test]
async fn test_weakness_beats_deadline() -> Result<()> {
    let dir = tempfile::tempdir()?;
    write_catalog(dir.path(), &[weakness("v", &["疫苗"], "说明接种间隔")])?;
    let embedder = Arc::new(TableEmbedder::new(3));
    let engine = open_engine(
        dir.path(),
        embedder.clone(),
        EngineSettings::default(),
        StoreConfig::default(),
    )?;

    let decision = engine
        .route(RouteRequest::new("疫苗").with_deadline(Duration::ZERO))
        .await;
    assert_eq!(decision.tier, Tier::Weakness);
    assert_eq!(embedder.calls(), 0);
    Ok(())
}

#[tokio::test]
async fn test_rendered_section_follows_tier() -> Result<()> {
    let embedder = TableEmbedder::new(3)
        .with(DISEASE_PATTERN, vec![1.0, 0.0, 0.0])
        .with("糖尿病会引起什么", vec![0.6, 0.8, 0.0]);
    let harness = TestEngine::start(embedder)?;
    harness.engine.insert_pattern(disease_pattern()).await?;

    let decision = harness
        .engine
        .route(RouteRequest::new("糖尿病会引起什么"))
        .await;
    let section = decision.render_prompt_section();
    assert!(section.contains(DISEASE_GUIDELINE));

    let json = serde_json::to_value(&decision)?;
    assert_eq!(json["tier"], "retrieval");
    assert_eq!(json["trace"], serde_json::json!(["weakness", "retrieval"]));
    Ok(())
}
