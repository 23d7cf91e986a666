//! The three-tier decision: weakness match, then retrieval, then category fallback.
//!
//! Exactly one tier supplies the reminders of a decision. Later tiers are not
//! consulted once an earlier one produced something.
//!
//! Before the tiers run, the question is looked up in the entity catalog. A
//! recognised entity stands in for a missing category hint in Tier 1 and
//! Tier 3; an out-of-domain topic skips retrieval.

use std::collections::HashSet;
use std::fmt;
use std::time::{Duration, Instant};

use nudge_config::RetrievalConfig;
use nudge_memory::{Category, RetrievalQuery, RetrievedPattern, Retriever, Severity};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::entities::{EntityLookup, EntityMatch};
use crate::fallback::{self, FALLBACK_CONFIDENCE};
use crate::snapshot::Snapshot;
use crate::weakness::{WeaknessMatch, WeaknessMatcher};

/// A routing strategy, in priority order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Tier {
    Weakness,
    Retrieval,
    CategoryFallback,
}

impl Tier {
    pub fn as_str(&self) -> &'static str {
        match self {
            Tier::Weakness => "weakness",
            Tier::Retrieval => "retrieval",
            Tier::CategoryFallback => "category_fallback",
        }
    }
}

impl fmt::Display for Tier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One piece of guidance to inject into the answering prompt.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Reminder {
    pub text: String,
    pub tier: Tier,
    pub score: f32,
    /// Weakness id, pattern id, or `fallback:<category>`.
    pub source_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub severity: Option<Severity>,
}

/// What to remind the answering model of, and why.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RoutingDecision {
    pub reminders: Vec<Reminder>,
    /// The tier that supplied the reminders.
    pub tier: Tier,
    /// Tiers consulted, in order.
    pub trace: Vec<Tier>,
    pub confidence: f32,
    /// Set when Tier 3 was reached because a dependency failed, time ran
    /// out, or the topic is out of domain.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fallback_reason: Option<String>,
    /// Known entity the question mentions.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub entity: Option<EntityMatch>,
}

impl RoutingDecision {
    /// Render the reminders as a prompt section; empty when there are none.
    pub fn render_prompt_section(&self) -> String {
        if self.reminders.is_empty() {
            return String::new();
        }

        let heading = match self.tier {
            Tier::Weakness => "## 针对该问题类型的特别提醒",
            Tier::Retrieval => "## 针对此类问题的特别注意",
            Tier::CategoryFallback => "## 回答基本要求",
        };

        let mut section = String::from(heading);
        section.push('\n');
        for reminder in &self.reminders {
            section.push_str("\n- ");
            if let Some(severity) = reminder.severity
                && severity == Severity::Critical
            {
                section.push_str("[critical] ");
            }
            section.push_str(&reminder.text);
        }
        section.push('\n');
        section
    }
}

/// A routing request from the serving layer.
#[derive(Debug, Clone, PartialEq)]
pub struct RouteRequest {
    pub question: String,
    pub category_hint: Option<Category>,
    /// Overrides the configured retrieval similarity threshold.
    pub min_confidence: Option<f32>,
    /// Overrides the configured decision deadline.
    pub deadline: Option<Duration>,
}

impl RouteRequest {
    pub fn new(question: impl Into<String>) -> Self {
        Self {
            question: question.into(),
            category_hint: None,
            min_confidence: None,
            deadline: None,
        }
    }

    pub fn with_category(mut self, category: Option<Category>) -> Self {
        self.category_hint = category;
        self
    }

    pub fn with_min_confidence(mut self, min_confidence: f32) -> Self {
        self.min_confidence = Some(min_confidence);
        self
    }

    pub fn with_deadline(mut self, deadline: Duration) -> Self {
        self.deadline = Some(deadline);
        self
    }
}

/// Runs the tiers against a snapshot.
#[derive(Debug, Clone)]
pub struct DecisionEngine {
    matcher: WeaknessMatcher,
    retriever: Retriever,
    retrieval: RetrievalConfig,
    default_deadline: Duration,
}

impl DecisionEngine {
    pub fn new(
        matcher: WeaknessMatcher,
        retrieval: RetrievalConfig,
        default_deadline: Duration,
    ) -> Self {
        Self {
            matcher,
            retriever: Retriever::new(retrieval.oversample_factor),
            retrieval,
            default_deadline,
        }
    }

    pub fn matcher(&self) -> &WeaknessMatcher {
        &self.matcher
    }

    /// Decide which reminders to use. Never fails.
    pub async fn decide(&self, snapshot: &Snapshot, request: &RouteRequest) -> RoutingDecision {
        let started = Instant::now();
        let deadline = request.deadline.unwrap_or(self.default_deadline);
        let mut trace = vec![Tier::Weakness];

        let lookup = snapshot.entities.lookup(&request.question);
        let hint = request.category_hint.or(lookup.category());
        let entity = lookup.entity().cloned();

        let matches = self
            .matcher
            .match_question(&snapshot.catalog, &request.question, hint);
        if !matches.is_empty() {
            return weakness_decision(matches, trace).with_entity(entity);
        }

        if let EntityLookup::OutOfDomain(topic) = &lookup {
            trace.push(Tier::CategoryFallback);
            let category = fallback::resolve_category(hint, &request.question);
            debug!(%category, topic = %topic, "Out-of-domain topic, skipping retrieval");
            return fallback_decision(
                category,
                trace,
                Some(format!("out-of-domain topic '{}'", topic)),
            );
        }

        trace.push(Tier::Retrieval);
        let query = RetrievalQuery::new(request.question.as_str())
            .with_category(request.category_hint)
            .with_k(self.retrieval.k)
            .with_threshold(
                request
                    .min_confidence
                    .unwrap_or(self.retrieval.similarity_threshold),
            )
            .with_min_frequency(self.retrieval.min_frequency);

        let remaining = deadline.saturating_sub(started.elapsed());
        let fallback_reason = if remaining.is_zero() {
            Some(format!("deadline of {:?} exceeded before retrieval", deadline))
        } else {
            match tokio::time::timeout(
                remaining,
                self.retriever.retrieve(&snapshot.store, &query),
            )
            .await
            {
                Ok(Ok(hits)) if !hits.is_empty() => {
                    return retrieval_decision(hits, trace).with_entity(entity);
                }
                Ok(Ok(_)) => None,
                Ok(Err(e)) => {
                    warn!(error = %e, "Retrieval failed, using category fallback");
                    Some(e.to_string())
                }
                Err(_) => {
                    warn!(
                        deadline_ms = deadline.as_millis() as u64,
                        "Retrieval timed out, using category fallback"
                    );
                    Some(format!("deadline of {:?} exceeded during retrieval", deadline))
                }
            }
        };

        trace.push(Tier::CategoryFallback);
        let category = fallback::resolve_category(hint, &request.question);
        debug!(%category, reason = ?fallback_reason, "Category fallback");
        fallback_decision(category, trace, fallback_reason).with_entity(entity)
    }
}

impl RoutingDecision {
    fn with_entity(mut self, entity: Option<EntityMatch>) -> Self {
        self.entity = entity;
        self
    }
}

fn weakness_decision(matches: Vec<WeaknessMatch>, trace: Vec<Tier>) -> RoutingDecision {
    let confidence = matches[0].score;
    let reminders = matches
        .into_iter()
        .map(|m| Reminder {
            text: m.entry.reminder,
            tier: Tier::Weakness,
            score: m.score,
            source_id: m.entry.id,
            severity: Some(m.entry.severity),
        })
        .collect();
    debug!(tier = "weakness", confidence, "Routing decision");
    RoutingDecision {
        reminders,
        tier: Tier::Weakness,
        trace,
        confidence,
        fallback_reason: None,
        entity: None,
    }
}

fn retrieval_decision(hits: Vec<RetrievedPattern>, trace: Vec<Tier>) -> RoutingDecision {
    let confidence = hits[0].similarity;
    let mut seen = HashSet::new();
    let reminders = hits
        .into_iter()
        .filter_map(|hit| {
            let text = hit.record.reminder_text().to_string();
            seen.insert(text.clone()).then(|| Reminder {
                text,
                tier: Tier::Retrieval,
                score: hit.similarity,
                source_id: hit.record.id.to_string(),
                severity: Some(hit.record.severity),
            })
        })
        .collect();
    debug!(tier = "retrieval", confidence, "Routing decision");
    RoutingDecision {
        reminders,
        tier: Tier::Retrieval,
        trace,
        confidence,
        fallback_reason: None,
        entity: None,
    }
}

fn fallback_decision(
    category: Category,
    trace: Vec<Tier>,
    fallback_reason: Option<String>,
) -> RoutingDecision {
    let reminders = fallback::category_reminders(category)
        .iter()
        .map(|text| Reminder {
            text: text.to_string(),
            tier: Tier::CategoryFallback,
            score: FALLBACK_CONFIDENCE,
            source_id: format!("fallback:{}", category),
            severity: None,
        })
        .collect();
    RoutingDecision {
        reminders,
        tier: Tier::CategoryFallback,
        trace,
        confidence: FALLBACK_CONFIDENCE,
        fallback_reason,
        entity: None,
    }
}
