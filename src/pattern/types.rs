//! Pattern tree, quality clusters, and the persisted cache snapshot.

use std::collections::BTreeMap;

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

use crate::record::{Dimension, RecordId};

/// Cache format version tag written into every snapshot.
pub const CACHE_VERSION: &str = "1";

/// Activity classification of a cluster based on its most recent member.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Recency {
    Active,
    Recent,
    Past,
    #[default]
    Dormant,
}

impl Recency {
    /// Buckets the age of the most recent member timestamp:
    /// <7d active, <30d recent, <90d past, else dormant.
    #[must_use]
    pub fn bucket(latest: DateTime<Utc>, now: DateTime<Utc>) -> Self {
        let age = now.signed_duration_since(latest);
        if age < Duration::days(7) {
            Recency::Active
        } else if age < Duration::days(30) {
            Recency::Recent
        } else if age < Duration::days(90) {
            Recency::Past
        } else {
            Recency::Dormant
        }
    }
}

/// Descriptive metadata for a pattern cluster.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PatternMetadata {
    /// Most frequent emojis across member sources.
    #[serde(default)]
    pub emojis: Vec<String>,
    /// Keyword themes extracted from member sources.
    #[serde(default)]
    pub themes: Vec<String>,
    /// Per-dimension prominence: fraction of members tagged with the
    /// dimension.
    #[serde(default)]
    pub qualities: BTreeMap<Dimension, f32>,
    #[serde(default)]
    pub recency: Recency,
}

/// A node in the discovered pattern tree.
///
/// Children are owned exclusively by their parent; membership lists carry no
/// back-pointers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NavigablePattern {
    pub id: String,
    pub name: String,
    /// Depth in the tree, 0 for roots.
    pub level: usize,
    /// Member record ids; unique, order irrelevant.
    pub experience_ids: Vec<RecordId>,
    /// Cluster tightness, 0-100.
    pub coherence: f32,
    #[serde(default)]
    pub children: Vec<NavigablePattern>,
    #[serde(default)]
    pub metadata: PatternMetadata,
}

impl NavigablePattern {
    /// Recursively strips a record from this subtree's membership.
    /// Returns true if anything changed. Child nodes left with no members
    /// and no children are dropped.
    pub fn strip_record(&mut self, id: &RecordId) -> bool {
        let before = self.experience_ids.len();
        self.experience_ids.retain(|m| m != id);
        let mut changed = self.experience_ids.len() != before;

        for child in &mut self.children {
            changed |= child.strip_record(id);
        }
        self.children
            .retain(|c| !c.experience_ids.is_empty() || !c.children.is_empty());
        changed
    }

    /// Finds a node by id anywhere in this subtree.
    #[must_use]
    pub fn find(&self, id: &str) -> Option<&NavigablePattern> {
        if self.id == id {
            return Some(self);
        }
        self.children.iter().find_map(|c| c.find(id))
    }

    /// Clones this subtree, keeping at most `depth` levels of children
    /// (0 keeps only this node).
    #[must_use]
    pub fn truncated(&self, depth: usize) -> NavigablePattern {
        let mut node = self.clone();
        if depth == 0 {
            node.children.clear();
        } else {
            node.children = node.children.iter().map(|c| c.truncated(depth - 1)).collect();
        }
        node
    }

    /// Whether the record appears anywhere in this subtree.
    #[must_use]
    pub fn contains(&self, id: &RecordId) -> bool {
        self.experience_ids.contains(id) || self.children.iter().any(|c| c.contains(id))
    }
}

/// A flat cluster scoped to one quality dimension.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QualityPattern {
    pub dimension: Dimension,
    pub cluster_name: String,
    pub semantic_meaning: String,
    pub experience_ids: Vec<RecordId>,
    pub keywords: Vec<String>,
    pub coherence: f32,
    pub size: usize,
}

/// Summary statistics for a cache snapshot.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PatternStats {
    /// Total nodes in the forest, all levels.
    pub total_patterns: usize,
    /// Distinct records belonging to at least one pattern.
    pub clustered_records: usize,
    pub quality_clusters: usize,
}

/// The persisted pattern snapshot.
///
/// Created by the first full discovery, mutated in place by incremental
/// updates, replaced wholesale by full rediscovery.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PatternCache {
    pub patterns: Vec<NavigablePattern>,
    pub quality_patterns: Vec<QualityPattern>,
    pub last_updated: DateTime<Utc>,
    pub version: String,
    pub stats: PatternStats,
}

impl PatternCache {
    /// Builds a cache snapshot from a discovery result, stamping it now.
    #[must_use]
    pub fn from_parts(patterns: Vec<NavigablePattern>, quality_patterns: Vec<QualityPattern>) -> Self {
        let stats = compute_stats(&patterns, &quality_patterns);
        Self {
            patterns,
            quality_patterns,
            last_updated: Utc::now(),
            version: CACHE_VERSION.to_string(),
            stats,
        }
    }

    /// Staleness is a pure function of snapshot age.
    #[must_use]
    pub fn is_stale(&self, max_age: Duration, now: DateTime<Utc>) -> bool {
        now.signed_duration_since(self.last_updated) > max_age
    }

    /// Strips a record from every pattern and quality cluster. Returns true
    /// if any membership changed. Root patterns emptied entirely are
    /// dropped, as are quality clusters.
    pub fn remove_record(&mut self, id: &RecordId) -> bool {
        let mut changed = false;
        for pattern in &mut self.patterns {
            changed |= pattern.strip_record(id);
        }
        self.patterns
            .retain(|p| !p.experience_ids.is_empty() || !p.children.is_empty());

        for cluster in &mut self.quality_patterns {
            let before = cluster.experience_ids.len();
            cluster.experience_ids.retain(|m| m != id);
            if cluster.experience_ids.len() != before {
                cluster.size = cluster.experience_ids.len();
                changed = true;
            }
        }
        self.quality_patterns.retain(|c| !c.experience_ids.is_empty());

        if changed {
            self.stats = compute_stats(&self.patterns, &self.quality_patterns);
        }
        changed
    }

    /// Finds a pattern node by id anywhere in the forest.
    #[must_use]
    pub fn find(&self, id: &str) -> Option<&NavigablePattern> {
        self.patterns.iter().find_map(|p| p.find(id))
    }
}

/// Recomputes summary statistics over a forest and its quality clusters.
#[must_use]
pub fn compute_stats(
    patterns: &[NavigablePattern],
    quality_patterns: &[QualityPattern],
) -> PatternStats {
    fn walk(node: &NavigablePattern, count: &mut usize, members: &mut std::collections::BTreeSet<RecordId>) {
        *count += 1;
        for id in &node.experience_ids {
            members.insert(id.clone());
        }
        for child in &node.children {
            walk(child, count, members);
        }
    }

    let mut total = 0;
    let mut members = std::collections::BTreeSet::new();
    for pattern in patterns {
        walk(pattern, &mut total, &mut members);
    }

    PatternStats {
        total_patterns: total,
        clustered_records: members.len(),
        quality_clusters: quality_patterns.len(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn pattern(id: &str, members: &[&str], children: Vec<NavigablePattern>) -> NavigablePattern {
        NavigablePattern {
            id: id.to_string(),
            name: id.to_string(),
            level: 0,
            experience_ids: members.iter().map(|m| RecordId::from(*m)).collect(),
            coherence: 80.0,
            children,
            metadata: PatternMetadata::default(),
        }
    }

    #[test]
    fn test_recency_buckets() {
        let now = Utc.with_ymd_and_hms(2026, 8, 30, 0, 0, 0).unwrap();
        let days = |d: i64| now - Duration::days(d);

        assert_eq!(Recency::bucket(days(1), now), Recency::Active);
        assert_eq!(Recency::bucket(days(10), now), Recency::Recent);
        assert_eq!(Recency::bucket(days(45), now), Recency::Past);
        assert_eq!(Recency::bucket(days(200), now), Recency::Dormant);
    }

    #[test]
    fn test_strip_record_cascades_through_tree() {
        let child = pattern("child", &["a", "b"], vec![]);
        let mut root = pattern("root", &["a", "c"], vec![child]);

        assert!(root.strip_record(&RecordId::from("a")));
        assert!(!root.contains(&RecordId::from("a")));
        assert!(root.contains(&RecordId::from("b")));

        // Child emptied entirely gets dropped
        assert!(root.strip_record(&RecordId::from("b")));
        assert!(root.children.is_empty());
    }

    #[test]
    fn test_cache_remove_record_updates_stats() {
        let mut cache = PatternCache::from_parts(
            vec![pattern("p1", &["a", "b"], vec![])],
            vec![QualityPattern {
                dimension: Dimension::Mood,
                cluster_name: "mood.open".to_string(),
                semantic_meaning: String::new(),
                experience_ids: vec![RecordId::from("a")],
                keywords: vec![],
                coherence: 70.0,
                size: 1,
            }],
        );
        assert_eq!(cache.stats.clustered_records, 2);

        assert!(cache.remove_record(&RecordId::from("a")));
        assert_eq!(cache.stats.clustered_records, 1);
        assert!(cache.quality_patterns.is_empty());

        // Idempotent
        assert!(!cache.remove_record(&RecordId::from("a")));
    }

    #[test]
    fn test_staleness_is_age_based() {
        let mut cache = PatternCache::from_parts(vec![], vec![]);
        let now = cache.last_updated;

        assert!(!cache.is_stale(Duration::hours(24), now + Duration::hours(23)));
        assert!(cache.is_stale(Duration::hours(24), now + Duration::hours(25)));

        cache.last_updated = now - Duration::days(2);
        assert!(cache.is_stale(Duration::hours(24), now));
    }

    #[test]
    fn test_truncated_depth() {
        let grandchild = pattern("gc", &["x"], vec![]);
        let child = pattern("c", &["y"], vec![grandchild]);
        let root = pattern("r", &["z"], vec![child]);

        assert!(root.truncated(0).children.is_empty());
        let one = root.truncated(1);
        assert_eq!(one.children.len(), 1);
        assert!(one.children[0].children.is_empty());
    }

    #[test]
    fn test_find_walks_tree() {
        let child = pattern("child", &["a"], vec![]);
        let root = pattern("root", &["b"], vec![child]);
        let cache = PatternCache::from_parts(vec![root], vec![]);

        assert!(cache.find("child").is_some());
        assert!(cache.find("missing").is_none());
    }
}
