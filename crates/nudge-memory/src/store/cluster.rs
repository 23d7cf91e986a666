//! Clustering of stored patterns for diverse reminder selection.
//!
//! Patterns are grouped with seeded k-means over their embeddings, clusters
//! below the minimum size are folded into their nearest neighbour, and one
//! representative is chosen per cluster. Large clusters can additionally be
//! condensed into a single reminder by an [`Abstractor`].

use std::collections::BTreeMap;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use nudge_llm::Abstractor;

use super::PatternStore;
use crate::error::{MemoryError, Result};
use crate::kmeans::{kmeans, mean, squared_distance};
use crate::types::{ClusterAssignment, PatternId, PatternRecord};

/// How the representative of a cluster is chosen.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RepresentativeStrategy {
    /// Most frequent, then most severe.
    #[default]
    HighestFrequency,
    /// Most severe, then most frequent.
    HighestSeverity,
    /// Equal blend of severity and (capped) frequency.
    Balanced,
}

impl RepresentativeStrategy {
    fn score(&self, record: &PatternRecord) -> (f64, f64) {
        let severity = record.severity.weight() as f64;
        let frequency = record.frequency as f64;
        match self {
            RepresentativeStrategy::HighestFrequency => (frequency, severity),
            RepresentativeStrategy::HighestSeverity => (severity, frequency),
            RepresentativeStrategy::Balanced => {
                (severity * 0.5 + (frequency / 10.0).min(1.0) * 0.5, 0.0)
            }
        }
    }

    /// Pick the best record; ties go to the earliest.
    pub fn select<'a>(&self, members: &[&'a PatternRecord]) -> Option<&'a PatternRecord> {
        let mut best: Option<(&'a PatternRecord, (f64, f64))> = None;
        for &record in members {
            let score = self.score(record);
            match best {
                Some((_, current)) if score <= current => {}
                _ => best = Some((record, score)),
            }
        }
        best.map(|(record, _)| record)
    }
}

impl FromStr for RepresentativeStrategy {
    type Err = MemoryError;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.trim().replace('-', "_").as_str() {
            "highest_frequency" | "frequency" => Ok(Self::HighestFrequency),
            "highest_severity" | "severity" => Ok(Self::HighestSeverity),
            "balanced" => Ok(Self::Balanced),
            other => Err(MemoryError::InvalidData(format!(
                "unknown representative strategy '{}'",
                other
            ))),
        }
    }
}

/// Parameters for [`PatternStore::cluster`].
#[derive(Debug, Clone, PartialEq)]
pub struct ClusterOptions {
    pub target_clusters: usize,
    pub min_cluster_size: usize,
    pub strategy: RepresentativeStrategy,
    /// Clusters at least this large are sent to the abstractor.
    pub abstraction_min_size: usize,
    pub max_iterations: usize,
    pub seed: u64,
}

impl Default for ClusterOptions {
    fn default() -> Self {
        Self {
            target_clusters: 20,
            min_cluster_size: 3,
            strategy: RepresentativeStrategy::HighestFrequency,
            abstraction_min_size: 5,
            max_iterations: 50,
            seed: 42,
        }
    }
}

/// Per-cluster statistics.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ClusterSummary {
    pub cluster_id: usize,
    pub size: usize,
    pub representative: PatternId,
    pub representative_text: String,
    pub by_category: BTreeMap<String, usize>,
    pub by_error_type: BTreeMap<String, usize>,
    pub abstracted_reminder: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ClusterReport {
    pub total_patterns: usize,
    pub clusters: Vec<ClusterSummary>,
    pub abstraction_failures: usize,
}

/// A group under construction: centroid plus member positions.
#[derive(Debug, Clone)]
struct Group {
    centroid: Vec<f32>,
    members: Vec<usize>,
}

/// k-means into the target count, then fold undersized groups.
fn partition(points: &[&[f32]], options: &ClusterOptions) -> Vec<Group> {
    let n = points.len();
    if n == 0 {
        return Vec::new();
    }

    let k = if n < options.target_clusters {
        (n / 2).max(1)
    } else {
        options.target_clusters.max(1)
    };

    let result = kmeans(points, k, options.max_iterations, options.seed);
    let mut groups: Vec<Group> = result
        .centroids
        .into_iter()
        .map(|centroid| Group {
            centroid,
            members: Vec::new(),
        })
        .collect();
    for (position, &c) in result.assignments.iter().enumerate() {
        groups[c].members.push(position);
    }
    groups.retain(|g| !g.members.is_empty());

    merge_small_groups(&mut groups, points, options.min_cluster_size);
    groups
}

/// Fold groups smaller than `min_size` into the nearest remaining group,
/// smallest first, recomputing the receiving centroid after each fold.
fn merge_small_groups(groups: &mut Vec<Group>, points: &[&[f32]], min_size: usize) {
    while groups.len() > 1 {
        let Some((small, _)) = groups
            .iter()
            .enumerate()
            .filter(|(_, g)| g.members.len() < min_size)
            .min_by_key(|(i, g)| (g.members.len(), *i))
        else {
            break;
        };

        let source = groups.remove(small);
        let target = groups
            .iter()
            .enumerate()
            .min_by(|(_, a), (_, b)| {
                squared_distance(&source.centroid, &a.centroid)
                    .total_cmp(&squared_distance(&source.centroid, &b.centroid))
            })
            .map(|(i, _)| i)
            .unwrap_or(0);

        let receiver = &mut groups[target];
        receiver.members.extend(source.members);
        receiver.members.sort_unstable();
        let member_points: Vec<&[f32]> = receiver.members.iter().map(|&m| points[m]).collect();
        if let Some(centroid) = mean(&member_points) {
            receiver.centroid = centroid;
        }
    }
}

fn summarize(cluster: &ClusterAssignment, records: &[&PatternRecord]) -> ClusterSummary {
    let mut by_category = BTreeMap::new();
    let mut by_error_type = BTreeMap::new();
    for record in records {
        *by_category.entry(record.category.to_string()).or_insert(0) += 1;
        *by_error_type.entry(record.error_type.to_string()).or_insert(0) += 1;
    }
    let representative_text = records
        .iter()
        .find(|r| r.id == cluster.representative)
        .map(|r| r.reminder_text().to_string())
        .unwrap_or_default();

    ClusterSummary {
        cluster_id: cluster.cluster_id,
        size: cluster.members.len(),
        representative: cluster.representative,
        representative_text,
        by_category,
        by_error_type,
        abstracted_reminder: cluster.abstracted_reminder.clone(),
    }
}

impl PatternStore {
    /// Cluster all stored patterns and write the cluster ids back to the records.
    ///
    /// Abstraction failures are logged and counted; they never fail the call.
    pub async fn cluster(
        &self,
        options: &ClusterOptions,
        abstractor: Option<&dyn Abstractor>,
    ) -> Result<ClusterReport> {
        if options.min_cluster_size == 0 {
            return Err(MemoryError::InvalidData(
                "min_cluster_size must be at least 1".to_string(),
            ));
        }
        let _gate = self.write_gate.lock().await;

        // Work on a copy so the data lock is not held across abstraction calls.
        let records = self.data.read().records.clone();
        let points: Vec<&[f32]> = records.iter().map(|r| r.embedding.as_slice()).collect();
        let groups = partition(&points, options);

        let mut clusters = Vec::with_capacity(groups.len());
        for (cluster_id, group) in groups.into_iter().enumerate() {
            let members: Vec<&PatternRecord> = group.members.iter().map(|&m| &records[m]).collect();
            let Some(representative) = options.strategy.select(&members) else {
                continue;
            };
            clusters.push(ClusterAssignment {
                cluster_id,
                members: members.iter().map(|r| r.id).collect(),
                centroid: group.centroid,
                representative: representative.id,
                abstracted_reminder: None,
            });
        }

        let mut abstraction_failures = 0;
        if let Some(abstractor) = abstractor {
            for cluster in clusters
                .iter_mut()
                .filter(|c| c.members.len() >= options.abstraction_min_size)
            {
                let mut members: Vec<&PatternRecord> = records
                    .iter()
                    .filter(|r| cluster.members.contains(&r.id))
                    .collect();
                members.sort_by(|a, b| b.frequency.cmp(&a.frequency));
                let texts: Vec<String> = members.iter().map(|r| r.description.clone()).collect();

                match abstractor.abstract_cluster(&texts).await {
                    Ok(reminder) => cluster.abstracted_reminder = Some(reminder),
                    Err(e) => {
                        abstraction_failures += 1;
                        let err = MemoryError::AbstractionFailed {
                            cluster_id: cluster.cluster_id,
                            reason: e.to_string(),
                        };
                        warn!(
                            cluster_id = cluster.cluster_id,
                            size = cluster.members.len(),
                            error = %err,
                            "Cluster abstraction failed, keeping representative only"
                        );
                    }
                }
            }
        }

        let report = {
            let mut data = self.data.write();
            for record in data.records.iter_mut() {
                record.cluster_id = None;
            }
            for cluster in &clusters {
                for id in &cluster.members {
                    if let Some(record) = data.get_mut(id) {
                        record.cluster_id = Some(cluster.cluster_id);
                    }
                }
            }
            data.clusters = clusters;
            report_for(&data.records, &data.clusters, abstraction_failures)
        };

        info!(
            patterns = report.total_patterns,
            clusters = report.clusters.len(),
            abstraction_failures,
            strategy = ?options.strategy,
            "Clustering complete"
        );
        Ok(report)
    }

    /// Statistics for the current cluster assignments.
    pub fn cluster_report(&self) -> ClusterReport {
        let data = self.data.read();
        report_for(&data.records, &data.clusters, 0)
    }

    /// Reminder texts of the cluster representatives (abstractions preferred).
    pub fn representative_reminders(&self) -> Vec<(PatternId, String)> {
        let data = self.data.read();
        data.clusters
            .iter()
            .filter_map(|c| {
                let text = match &c.abstracted_reminder {
                    Some(text) => text.clone(),
                    None => {
                        let position = data.positions.get(&c.representative)?;
                        data.records[*position].reminder_text().to_string()
                    }
                };
                Some((c.representative, text))
            })
            .collect()
    }
}

fn report_for(
    records: &[PatternRecord],
    clusters: &[ClusterAssignment],
    abstraction_failures: usize,
) -> ClusterReport {
    let summaries = clusters
        .iter()
        .map(|cluster| {
            let members: Vec<&PatternRecord> = records
                .iter()
                .filter(|r| r.cluster_id == Some(cluster.cluster_id))
                .collect();
            summarize(cluster, &members)
        })
        .collect();
    ClusterReport {
        total_patterns: records.len(),
        clusters: summaries,
        abstraction_failures,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::tests::store_with;
    use crate::types::{ErrorType, NewPattern, Severity};
    use nudge_llm::{MockAbstractor, TableEmbedder};
    use std::collections::HashSet;

    fn record(frequency: u32, severity: Severity) -> PatternRecord {
        let mut r = PatternRecord::from_new(
            NewPattern::new("d", severity, ErrorType::Incomplete),
            crate::types::Category::General,
            vec![],
        );
        r.frequency = frequency;
        r
    }

    #[test]
    fn test_strategies() {
        let frequent = record(9, Severity::Minor);
        let severe = record(2, Severity::Critical);
        let middle = record(5, Severity::Major);
        let members = [&frequent, &severe, &middle];

        assert_eq!(
            RepresentativeStrategy::HighestFrequency.select(&members).unwrap().id,
            frequent.id
        );
        assert_eq!(
            RepresentativeStrategy::HighestSeverity.select(&members).unwrap().id,
            severe.id
        );
        // balanced: minor/9 -> 0.95, critical/2 -> 1.6, major/5 -> 1.25
        assert_eq!(
            RepresentativeStrategy::Balanced.select(&members).unwrap().id,
            severe.id
        );
        assert!(RepresentativeStrategy::Balanced.select(&[]).is_none());
    }

    #[test]
    fn test_strategy_parse() {
        assert_eq!(
            "highest-severity".parse::<RepresentativeStrategy>().unwrap(),
            RepresentativeStrategy::HighestSeverity
        );
        assert_eq!(
            "balanced".parse::<RepresentativeStrategy>().unwrap(),
            RepresentativeStrategy::Balanced
        );
        assert!("random".parse::<RepresentativeStrategy>().is_err());
    }

    #[test]
    fn test_merge_small_groups_smallest_first() {
        let pts: Vec<Vec<f32>> = vec![
            vec![0.0, 0.0],
            vec![0.1, 0.0],
            vec![0.0, 0.1],
            vec![5.0, 5.0],
            vec![5.1, 5.0],
            vec![0.5, 0.5],
        ];
        let refs: Vec<&[f32]> = pts.iter().map(|p| p.as_slice()).collect();
        let mut groups = vec![
            Group {
                centroid: vec![0.03, 0.03],
                members: vec![0, 1, 2],
            },
            Group {
                centroid: vec![5.05, 5.0],
                members: vec![3, 4],
            },
            Group {
                centroid: vec![0.5, 0.5],
                members: vec![5],
            },
        ];
        merge_small_groups(&mut groups, &refs, 3);

        // the singleton joins the origin group first, then the pair is folded in
        assert_eq!(groups.len(), 1);
        assert_eq!(groups[0].members, vec![0, 1, 2, 3, 4, 5]);
    }

    #[test]
    fn test_merge_small_groups_keeps_large_enough() {
        let pts: Vec<Vec<f32>> = (0..6).map(|i| vec![i as f32 * 10.0]).collect();
        let refs: Vec<&[f32]> = pts.iter().map(|p| p.as_slice()).collect();
        let mut groups = vec![
            Group {
                centroid: vec![5.0],
                members: vec![0, 1],
            },
            Group {
                centroid: vec![35.0],
                members: vec![2, 3, 4],
            },
            Group {
                centroid: vec![50.0],
                members: vec![5],
            },
        ];
        merge_small_groups(&mut groups, &refs, 2);
        assert_eq!(groups.len(), 2);
        assert!(groups.iter().all(|g| g.members.len() >= 2));
    }

    async fn seeded_store(n: usize) -> PatternStore {
        let store = store_with(TableEmbedder::new(16).with_fallback());
        for i in 0..n {
            let severity = if i % 3 == 0 { Severity::Critical } else { Severity::Minor };
            store
                .insert(NewPattern::new(
                    format!("pattern number {}", i),
                    severity,
                    ErrorType::Incomplete,
                ))
                .await
                .unwrap();
        }
        store
    }

    #[tokio::test]
    async fn test_every_pattern_in_exactly_one_cluster() {
        let store = seeded_store(30).await;
        let options = ClusterOptions {
            target_clusters: 6,
            min_cluster_size: 3,
            ..Default::default()
        };
        let report = store.cluster(&options, None).await.unwrap();

        let mut seen = HashSet::new();
        for cluster in store.clusters() {
            assert!(cluster.members.len() >= 3);
            assert!(cluster.members.contains(&cluster.representative));
            for id in cluster.members {
                assert!(seen.insert(id), "pattern in two clusters");
            }
        }
        assert_eq!(seen.len(), 30);
        assert!(store.records().iter().all(|r| r.cluster_id.is_some()));
        assert_eq!(report.total_patterns, 30);
        assert_eq!(
            report.clusters.iter().map(|c| c.size).sum::<usize>(),
            30
        );
    }

    #[tokio::test]
    async fn test_small_store_collapses_to_one_cluster() {
        let store = seeded_store(2).await;
        let report = store
            .cluster(&ClusterOptions::default(), None)
            .await
            .unwrap();
        assert_eq!(report.clusters.len(), 1);
        assert_eq!(report.clusters[0].size, 2);
    }

    #[tokio::test]
    async fn test_clustering_is_deterministic() {
        let store = seeded_store(20).await;
        let options = ClusterOptions {
            target_clusters: 4,
            ..Default::default()
        };
        store.cluster(&options, None).await.unwrap();
        let first = store.clusters();
        store.cluster(&options, None).await.unwrap();
        assert_eq!(first, store.clusters());
    }

    #[tokio::test]
    async fn test_abstraction_for_large_clusters_only() {
        let store = seeded_store(12).await;
        let options = ClusterOptions {
            target_clusters: 1,
            min_cluster_size: 1,
            abstraction_min_size: 5,
            ..Default::default()
        };
        let abstractor = MockAbstractor::new("Summarize carefully");
        let report = store.cluster(&options, Some(&abstractor)).await.unwrap();

        assert_eq!(report.clusters.len(), 1);
        assert_eq!(
            report.clusters[0].abstracted_reminder.as_deref(),
            Some("Summarize carefully (12 patterns)")
        );
        assert_eq!(abstractor.seen(), vec![12]);

        let reminders = store.representative_reminders();
        assert_eq!(reminders[0].1, "Summarize carefully (12 patterns)");

        let small = seeded_store(4).await;
        let abstractor = MockAbstractor::new("x");
        small.cluster(&options, Some(&abstractor)).await.unwrap();
        assert!(abstractor.seen().is_empty());
    }

    #[tokio::test]
    async fn test_abstraction_failure_is_not_fatal() {
        let store = seeded_store(10).await;
        let options = ClusterOptions {
            target_clusters: 1,
            min_cluster_size: 1,
            ..Default::default()
        };
        let report = store
            .cluster(&options, Some(&MockAbstractor::failing()))
            .await
            .unwrap();
        assert_eq!(report.abstraction_failures, 1);
        assert!(report.clusters[0].abstracted_reminder.is_none());
        assert!(!report.clusters[0].representative_text.is_empty());
    }

    #[tokio::test]
    async fn test_purge_keeps_cluster_membership_consistent() {
        let store = seeded_store(9).await;
        let options = ClusterOptions {
            target_clusters: 1,
            min_cluster_size: 1,
            strategy: RepresentativeStrategy::HighestSeverity,
            ..Default::default()
        };
        store.cluster(&options, None).await.unwrap();
        let representative = store.clusters()[0].representative;

        store.purge(&[representative]).await.unwrap();
        let clusters = store.clusters();
        assert_eq!(clusters[0].members.len(), 8);
        assert_ne!(clusters[0].representative, representative);
        assert!(clusters[0].members.contains(&clusters[0].representative));
    }

    #[tokio::test]
    async fn test_purge_trims_clusters_until_reclustered() {
        let store = seeded_store(12).await;
        let options = ClusterOptions {
            target_clusters: 2,
            min_cluster_size: 4,
            ..Default::default()
        };
        store.cluster(&options, None).await.unwrap();
        let first = store.clusters()[0].clone();
        let survivor = first.members[0];
        let purged: Vec<PatternId> = first.members[1..].to_vec();

        store.purge(&purged).await.unwrap();

        // Trimmed in place, below the minimum it was built with.
        let trimmed = store
            .clusters()
            .into_iter()
            .find(|c| c.cluster_id == first.cluster_id)
            .unwrap();
        assert_eq!(trimmed.members, vec![survivor]);
        assert_eq!(trimmed.representative, survivor);
        let report = store.cluster_report();
        assert_eq!(
            report.clusters.iter().map(|c| c.size).sum::<usize>(),
            store.len()
        );

        let remaining = store.len();
        store.cluster(&options, None).await.unwrap();
        assert!(
            store
                .clusters()
                .iter()
                .all(|c| c.members.len() >= options.min_cluster_size.min(remaining))
        );
    }

    #[tokio::test]
    async fn test_empty_store() {
        let store = store_with(TableEmbedder::new(4).with_fallback());
        let report = store
            .cluster(&ClusterOptions::default(), None)
            .await
            .unwrap();
        assert!(report.clusters.is_empty());
        assert_eq!(report.total_patterns, 0);
    }
}
