//! Full pattern discovery via greedy agglomerative clustering.

use std::collections::{BTreeMap, BTreeSet, HashMap};

use chrono::{DateTime, Utc};
use tracing::debug;

use crate::pattern::types::{NavigablePattern, PatternMetadata, QualityPattern, Recency};
use crate::pattern::PatternError;
use crate::record::{Dimension, ExperienceRecord, RecordId};
use crate::vector::cosine_similarity;

/// Fixed parameters for a discovery run.
#[derive(Debug, Clone, Copy)]
pub struct DiscoveryParams {
    /// Minimum cosine similarity to a cluster seed for membership.
    pub similarity_threshold: f32,
    /// Clusters smaller than this are discarded.
    pub min_cluster_size: usize,
    /// Maximum tree depth (1 = flat).
    pub max_depth: usize,
    /// Whether to also build per-dimension quality clusters.
    pub quality_analysis: bool,
}

impl Default for DiscoveryParams {
    fn default() -> Self {
        Self {
            similarity_threshold: 0.6,
            min_cluster_size: 3,
            max_depth: 3,
            quality_analysis: true,
        }
    }
}

/// Result of a full discovery run.
#[derive(Debug, Clone, Default)]
pub struct DiscoveryOutcome {
    pub patterns: Vec<NavigablePattern>,
    pub quality_patterns: Vec<QualityPattern>,
}

/// Pluggable full-discovery algorithm.
pub trait PatternDiscovery: Send + Sync {
    fn discover(
        &self,
        records: &[ExperienceRecord],
        embeddings: &HashMap<RecordId, Vec<f32>>,
        params: &DiscoveryParams,
    ) -> Result<DiscoveryOutcome, PatternError>;
}

/// Greedy leader clustering, recursed per level with a tightened threshold.
///
/// Each level picks the first unassigned record as a seed and pulls in every
/// record whose embedding is at least `similarity_threshold` similar to the
/// seed. Sub-levels re-cluster each cluster's members with the threshold
/// raised by [`LEVEL_TIGHTENING`].
pub struct HierarchicalDiscovery;

/// How much the similarity threshold rises per tree level.
const LEVEL_TIGHTENING: f32 = 0.15;

/// Maximum keyword themes kept per cluster.
const MAX_THEMES: usize = 5;

/// Maximum emojis kept per cluster.
const MAX_EMOJIS: usize = 3;

impl PatternDiscovery for HierarchicalDiscovery {
    fn discover(
        &self,
        records: &[ExperienceRecord],
        embeddings: &HashMap<RecordId, Vec<f32>>,
        params: &DiscoveryParams,
    ) -> Result<DiscoveryOutcome, PatternError> {
        let by_id: HashMap<&RecordId, &ExperienceRecord> =
            records.iter().map(|r| (&r.id, r)).collect();
        let embedded: Vec<&RecordId> = records
            .iter()
            .filter(|r| embeddings.contains_key(&r.id))
            .map(|r| &r.id)
            .collect();

        debug!(
            total = records.len(),
            embedded = embedded.len(),
            "running full pattern discovery"
        );

        let now = Utc::now();
        let mut counter = 0usize;
        let patterns = cluster_level(
            &embedded,
            embeddings,
            &by_id,
            params,
            params.similarity_threshold,
            0,
            &mut counter,
            now,
        );

        let quality_patterns = if params.quality_analysis {
            quality_clusters(records, embeddings, params)
        } else {
            Vec::new()
        };

        Ok(DiscoveryOutcome {
            patterns,
            quality_patterns,
        })
    }
}

/// One level of greedy leader clustering over `ids`, recursing into children.
#[allow(clippy::too_many_arguments)]
fn cluster_level(
    ids: &[&RecordId],
    embeddings: &HashMap<RecordId, Vec<f32>>,
    by_id: &HashMap<&RecordId, &ExperienceRecord>,
    params: &DiscoveryParams,
    threshold: f32,
    level: usize,
    counter: &mut usize,
    now: DateTime<Utc>,
) -> Vec<NavigablePattern> {
    let mut assigned: BTreeSet<&RecordId> = BTreeSet::new();
    let mut patterns = Vec::new();

    for seed in ids {
        if assigned.contains(seed) {
            continue;
        }
        let Some(seed_vec) = embeddings.get(*seed) else {
            continue;
        };

        let members: Vec<&RecordId> = ids
            .iter()
            .filter(|id| !assigned.contains(**id))
            .filter(|id| {
                embeddings
                    .get(**id)
                    .is_some_and(|v| cosine_similarity(seed_vec, v) >= threshold)
            })
            .copied()
            .collect();

        if members.len() < params.min_cluster_size {
            continue;
        }
        for m in &members {
            assigned.insert(*m);
        }

        let member_ids: Vec<RecordId> = members.iter().map(|m| (*m).clone()).collect();
        let records: Vec<&ExperienceRecord> =
            members.iter().filter_map(|m| by_id.get(*m)).copied().collect();

        let mut children = if level + 1 < params.max_depth {
            cluster_level(
                &members,
                embeddings,
                by_id,
                params,
                (threshold + LEVEL_TIGHTENING).min(0.95),
                level + 1,
                counter,
                now,
            )
        } else {
            Vec::new()
        };
        // A single child holding every member adds no structure
        if children.len() == 1 && children[0].experience_ids.len() == members.len() {
            children.clear();
        }

        let themes = extract_themes(&records, MAX_THEMES);
        *counter += 1;
        patterns.push(NavigablePattern {
            id: format!("pattern-{counter}"),
            name: cluster_name(&themes, *counter),
            level,
            coherence: coherence(&member_ids, embeddings),
            metadata: build_metadata(&records, &themes, now),
            experience_ids: member_ids,
            children,
        });
    }

    patterns
}

/// Per-dimension flat clusters over records tagged with that dimension.
fn quality_clusters(
    records: &[ExperienceRecord],
    embeddings: &HashMap<RecordId, Vec<f32>>,
    params: &DiscoveryParams,
) -> Vec<QualityPattern> {
    let mut out = Vec::new();

    for dimension in Dimension::ALL {
        let tagged: Vec<&ExperienceRecord> = records
            .iter()
            .filter(|r| embeddings.contains_key(&r.id))
            .filter(|r| r.normalized_qualities().is_present(dimension))
            .collect();
        if tagged.len() < params.min_cluster_size {
            continue;
        }

        let mut assigned: BTreeSet<&RecordId> = BTreeSet::new();
        let mut index = 0usize;
        for seed in &tagged {
            if assigned.contains(&seed.id) {
                continue;
            }
            let Some(seed_vec) = embeddings.get(&seed.id) else {
                continue;
            };
            let members: Vec<&ExperienceRecord> = tagged
                .iter()
                .filter(|r| !assigned.contains(&r.id))
                .filter(|r| {
                    embeddings
                        .get(&r.id)
                        .is_some_and(|v| cosine_similarity(seed_vec, v) >= params.similarity_threshold)
                })
                .copied()
                .collect();
            if members.len() < params.min_cluster_size {
                continue;
            }
            for m in &members {
                assigned.insert(&m.id);
            }

            let member_ids: Vec<RecordId> = members.iter().map(|m| m.id.clone()).collect();
            let keywords = extract_themes(&members, MAX_THEMES);
            index += 1;
            out.push(QualityPattern {
                dimension,
                cluster_name: format!("{dimension}-{index}"),
                semantic_meaning: keywords.join(", "),
                coherence: coherence(&member_ids, embeddings),
                size: member_ids.len(),
                experience_ids: member_ids,
                keywords,
            });
        }
    }

    out
}

/// Mean pairwise cosine similarity scaled to 0-100. Singleton clusters
/// score 100.
fn coherence(members: &[RecordId], embeddings: &HashMap<RecordId, Vec<f32>>) -> f32 {
    let vectors: Vec<&Vec<f32>> = members.iter().filter_map(|m| embeddings.get(m)).collect();
    if vectors.len() < 2 {
        return 100.0;
    }
    let mut sum = 0.0f32;
    let mut pairs = 0usize;
    for i in 0..vectors.len() {
        for j in (i + 1)..vectors.len() {
            sum += cosine_similarity(vectors[i], vectors[j]);
            pairs += 1;
        }
    }
    ((sum / pairs as f32) * 100.0).clamp(0.0, 100.0)
}

/// Frequency-ranked keywords from member sources, stopwords removed.
fn extract_themes(records: &[&ExperienceRecord], limit: usize) -> Vec<String> {
    let mut counts: BTreeMap<String, usize> = BTreeMap::new();
    for record in records {
        for word in record.source.split_whitespace() {
            let word: String = word
                .chars()
                .filter(|c| c.is_alphanumeric())
                .collect::<String>()
                .to_lowercase();
            if word.len() < 3 || STOPWORDS.contains(&word.as_str()) {
                continue;
            }
            *counts.entry(word).or_insert(0) += 1;
        }
    }

    let mut ranked: Vec<(String, usize)> = counts.into_iter().collect();
    ranked.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.cmp(&b.0)));
    ranked.into_iter().take(limit).map(|(w, _)| w).collect()
}

/// Most frequent emoji characters across member sources.
fn extract_emojis(records: &[&ExperienceRecord], limit: usize) -> Vec<String> {
    let mut counts: BTreeMap<String, usize> = BTreeMap::new();
    for record in records {
        for c in record.source.chars().filter(|c| is_emoji(*c)) {
            *counts.entry(c.to_string()).or_insert(0) += 1;
        }
    }
    let mut ranked: Vec<(String, usize)> = counts.into_iter().collect();
    ranked.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.cmp(&b.0)));
    ranked.into_iter().take(limit).map(|(e, _)| e).collect()
}

fn is_emoji(c: char) -> bool {
    matches!(c as u32,
        0x1F300..=0x1F5FF   // symbols & pictographs
        | 0x1F600..=0x1F64F // emoticons
        | 0x1F680..=0x1F6FF // transport
        | 0x1F900..=0x1F9FF // supplemental
        | 0x2600..=0x27BF   // misc symbols, dingbats
    )
}

fn cluster_name(themes: &[String], ordinal: usize) -> String {
    if themes.is_empty() {
        format!("Pattern {ordinal}")
    } else {
        let mut name = themes.iter().take(2).cloned().collect::<Vec<_>>().join(" & ");
        if let Some(first) = name.get_mut(0..1) {
            first.make_ascii_uppercase();
        }
        name
    }
}

fn build_metadata(
    records: &[&ExperienceRecord],
    themes: &[String],
    now: DateTime<Utc>,
) -> PatternMetadata {
    let mut qualities: BTreeMap<Dimension, f32> = BTreeMap::new();
    for record in records {
        let normalized = record.normalized_qualities();
        for dimension in Dimension::ALL {
            if normalized.is_present(dimension) {
                *qualities.entry(dimension).or_insert(0.0) += 1.0;
            }
        }
    }
    if !records.is_empty() {
        for value in qualities.values_mut() {
            *value /= records.len() as f32;
        }
    }

    let latest = records.iter().map(|r| r.created).max();
    PatternMetadata {
        emojis: extract_emojis(records, MAX_EMOJIS),
        themes: themes.to_vec(),
        qualities,
        recency: latest.map_or(Recency::Dormant, |l| Recency::bucket(l, now)),
    }
}

const STOPWORDS: &[&str] = &[
    "the", "and", "was", "were", "with", "that", "this", "for", "are", "but", "not", "you",
    "all", "had", "has", "have", "her", "his", "its", "our", "out", "she", "they", "them",
    "then", "than", "what", "when", "where", "while", "will", "would", "could", "there",
    "about", "into", "just", "like", "some", "from", "been", "being", "very", "over",
];

#[cfg(test)]
mod tests {
    use super::*;
    use crate::record::qualities::QualityRepresentation;

    fn record(id: &str, source: &str, tokens: &[&str]) -> ExperienceRecord {
        let mut r = ExperienceRecord::new(id, source, "sage");
        r.qualities = QualityRepresentation::from_tokens(tokens.iter().copied());
        r
    }

    fn embeddings(pairs: &[(&str, [f32; 3])]) -> HashMap<RecordId, Vec<f32>> {
        pairs
            .iter()
            .map(|(id, v)| (RecordId::from(*id), v.to_vec()))
            .collect()
    }

    #[test]
    fn test_discovers_one_tight_cluster() {
        let records = vec![
            record("a", "rain on the window", &["mood.open"]),
            record("b", "rain against glass", &["mood.open"]),
            record("c", "listening to rain", &["mood.open"]),
            record("d", "tax return deadline", &["purpose.goal"]),
        ];
        let emb = embeddings(&[
            ("a", [1.0, 0.0, 0.0]),
            ("b", [0.99, 0.1, 0.0]),
            ("c", [0.98, 0.15, 0.0]),
            ("d", [0.0, 1.0, 0.0]),
        ]);

        let outcome = HierarchicalDiscovery
            .discover(&records, &emb, &DiscoveryParams::default())
            .unwrap();

        assert_eq!(outcome.patterns.len(), 1);
        let pattern = &outcome.patterns[0];
        assert_eq!(pattern.experience_ids.len(), 3);
        assert!(!pattern.contains(&RecordId::from("d")));
        assert!(pattern.coherence > 90.0);
        assert!(pattern.metadata.themes.contains(&"rain".to_string()));
    }

    #[test]
    fn test_small_groups_are_discarded() {
        let records = vec![
            record("a", "one", &[]),
            record("b", "two", &[]),
        ];
        let emb = embeddings(&[("a", [1.0, 0.0, 0.0]), ("b", [1.0, 0.0, 0.0])]);

        let outcome = HierarchicalDiscovery
            .discover(&records, &emb, &DiscoveryParams::default())
            .unwrap();
        assert!(outcome.patterns.is_empty());
    }

    #[test]
    fn test_records_without_embeddings_are_skipped() {
        let records = vec![
            record("a", "rain", &[]),
            record("b", "rain", &[]),
            record("c", "rain", &[]),
            record("ghost", "rain", &[]),
        ];
        let emb = embeddings(&[
            ("a", [1.0, 0.0, 0.0]),
            ("b", [1.0, 0.0, 0.0]),
            ("c", [1.0, 0.0, 0.0]),
        ]);

        let outcome = HierarchicalDiscovery
            .discover(&records, &emb, &DiscoveryParams::default())
            .unwrap();
        assert_eq!(outcome.patterns.len(), 1);
        assert!(!outcome.patterns[0].contains(&RecordId::from("ghost")));
    }

    #[test]
    fn test_quality_clusters_scoped_to_dimension() {
        let records = vec![
            record("a", "deep in code", &["focus.narrow"]),
            record("b", "debugging intently", &["focus.narrow"]),
            record("c", "tracing one path", &["focus.narrow"]),
            record("d", "unrelated mood", &["mood.open"]),
        ];
        let emb = embeddings(&[
            ("a", [1.0, 0.0, 0.0]),
            ("b", [0.99, 0.05, 0.0]),
            ("c", [0.98, 0.1, 0.0]),
            ("d", [0.0, 1.0, 0.0]),
        ]);

        let outcome = HierarchicalDiscovery
            .discover(&records, &emb, &DiscoveryParams::default())
            .unwrap();

        let focus: Vec<_> = outcome
            .quality_patterns
            .iter()
            .filter(|q| q.dimension == Dimension::Focus)
            .collect();
        assert_eq!(focus.len(), 1);
        assert_eq!(focus[0].size, 3);
        // Only one mood-tagged record, below minimum size
        assert!(!outcome.quality_patterns.iter().any(|q| q.dimension == Dimension::Mood));
    }

    #[test]
    fn test_quality_analysis_can_be_disabled() {
        let records = vec![
            record("a", "x", &["mood.open"]),
            record("b", "x", &["mood.open"]),
            record("c", "x", &["mood.open"]),
        ];
        let emb = embeddings(&[
            ("a", [1.0, 0.0, 0.0]),
            ("b", [1.0, 0.0, 0.0]),
            ("c", [1.0, 0.0, 0.0]),
        ]);
        let params = DiscoveryParams {
            quality_analysis: false,
            ..DiscoveryParams::default()
        };

        let outcome = HierarchicalDiscovery.discover(&records, &emb, &params).unwrap();
        assert!(outcome.quality_patterns.is_empty());
        assert_eq!(outcome.patterns.len(), 1);
    }

    #[test]
    fn test_coherence_of_identical_vectors_is_100() {
        let emb = embeddings(&[("a", [1.0, 0.0, 0.0]), ("b", [1.0, 0.0, 0.0])]);
        let members = vec![RecordId::from("a"), RecordId::from("b")];
        assert!((coherence(&members, &emb) - 100.0).abs() < 0.01);
    }

    #[test]
    fn test_theme_extraction_skips_stopwords() {
        let records_owned = vec![
            record("a", "the rain and the thunder", &[]),
            record("b", "rain with thunder again", &[]),
        ];
        let refs: Vec<&ExperienceRecord> = records_owned.iter().collect();
        let themes = extract_themes(&refs, 3);
        assert_eq!(themes[0], "rain");
        assert!(themes.contains(&"thunder".to_string()));
        assert!(!themes.contains(&"the".to_string()));
    }
}
