//! Incremental cache maintenance between full discovery runs.
//!
//! Nearest-cluster placement handles additions cheaply. Merge and split
//! detection is advisory only: when either is reported the caller must throw
//! the incremental result away and rediscover from scratch, because this
//! algorithm never restructures the tree.

use std::collections::HashMap;

use tracing::debug;

use crate::pattern::discovery::DiscoveryParams;
use crate::pattern::types::{compute_stats, NavigablePattern, PatternCache};
use crate::pattern::PatternError;
use crate::record::{ExperienceRecord, RecordId};
use crate::vector::cosine_similarity;

/// Classification of a single incremental change.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChangeKind {
    /// Record placed into an existing cluster.
    Addition,
    /// Record removed from clusters it no longer resembles.
    Removal,
    /// Two clusters drifted close enough that they should be one.
    Merge,
    /// A cluster's members drifted apart.
    Split,
}

/// Result of an incremental pass.
#[derive(Debug, Clone)]
pub struct IncrementalOutcome {
    /// Updated cache, valid only when no structural change was reported.
    pub cache: PatternCache,
    pub changes: Vec<ChangeKind>,
    /// Records whose pattern membership changed.
    pub affected: Vec<RecordId>,
    /// Embedded records that joined no existing cluster. Enough of these
    /// means new clusters are waiting to form, which only full discovery
    /// can do.
    pub unplaced: Vec<RecordId>,
}

impl IncrementalOutcome {
    /// True when the result must be discarded in favor of full rediscovery.
    #[must_use]
    pub fn has_structural_change(&self) -> bool {
        self.changes
            .iter()
            .any(|c| matches!(c, ChangeKind::Merge | ChangeKind::Split))
    }
}

/// Pluggable incremental algorithm.
pub trait IncrementalPatternUpdate: Send + Sync {
    fn update(
        &self,
        cache: &PatternCache,
        changed: &[ExperienceRecord],
        embeddings: &HashMap<RecordId, Vec<f32>>,
        params: &DiscoveryParams,
    ) -> Result<IncrementalOutcome, PatternError>;
}

/// Places each changed record into the root cluster with the most similar
/// centroid, then into the best matching child within it.
pub struct NearestClusterUpdate;

/// Coherence floor below which a cluster is flagged as split, as a fraction
/// of the similarity threshold.
const SPLIT_COHERENCE_RATIO: f32 = 0.75;

impl IncrementalPatternUpdate for NearestClusterUpdate {
    fn update(
        &self,
        cache: &PatternCache,
        changed: &[ExperienceRecord],
        embeddings: &HashMap<RecordId, Vec<f32>>,
        params: &DiscoveryParams,
    ) -> Result<IncrementalOutcome, PatternError> {
        let mut next = cache.clone();
        let mut changes = Vec::new();
        let mut affected = Vec::new();
        let mut unplaced = Vec::new();

        for record in changed {
            let Some(vector) = embeddings.get(&record.id) else {
                // Lost its embedding since last discovery, drop memberships
                if next.remove_record(&record.id) {
                    changes.push(ChangeKind::Removal);
                    affected.push(record.id.clone());
                }
                continue;
            };

            // Re-placement starts from a clean slate for this record
            let was_member = next.remove_record(&record.id);

            let scored = score_roots(&next.patterns, vector, embeddings);
            let merge = detect_merge(&scored, &next.patterns, embeddings, params);
            if merge {
                changes.push(ChangeKind::Merge);
                affected.push(record.id.clone());
                continue;
            }

            match scored.first() {
                Some(&(index, similarity)) if similarity >= params.similarity_threshold => {
                    place_into(&mut next.patterns[index], record.id.clone(), vector, embeddings, params);
                    changes.push(ChangeKind::Addition);
                    affected.push(record.id.clone());
                }
                _ => {
                    if was_member {
                        changes.push(ChangeKind::Removal);
                        affected.push(record.id.clone());
                    }
                    unplaced.push(record.id.clone());
                }
            }
        }

        for pattern in &next.patterns {
            let recomputed = mean_pairwise(&pattern.experience_ids, embeddings);
            if pattern.experience_ids.len() >= params.min_cluster_size
                && recomputed < params.similarity_threshold * SPLIT_COHERENCE_RATIO
            {
                debug!(pattern = %pattern.id, coherence = recomputed, "cluster lost cohesion");
                changes.push(ChangeKind::Split);
            }
        }

        refresh_coherence(&mut next.patterns, embeddings);
        next.stats = compute_stats(&next.patterns, &next.quality_patterns);

        Ok(IncrementalOutcome {
            cache: next,
            changes,
            affected,
            unplaced,
        })
    }
}

/// Root clusters ranked by centroid similarity to `vector`, best first.
fn score_roots(
    patterns: &[NavigablePattern],
    vector: &[f32],
    embeddings: &HashMap<RecordId, Vec<f32>>,
) -> Vec<(usize, f32)> {
    let mut scored: Vec<(usize, f32)> = patterns
        .iter()
        .enumerate()
        .filter_map(|(i, p)| centroid(&p.experience_ids, embeddings).map(|c| (i, cosine_similarity(vector, &c))))
        .collect();
    scored.sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap_or(std::cmp::Ordering::Equal));
    scored
}

/// A record pulled strongly toward two clusters whose centroids are also
/// mutually similar signals that the clusters should merge.
fn detect_merge(
    scored: &[(usize, f32)],
    patterns: &[NavigablePattern],
    embeddings: &HashMap<RecordId, Vec<f32>>,
    params: &DiscoveryParams,
) -> bool {
    let close: Vec<usize> = scored
        .iter()
        .filter(|(_, s)| *s >= params.similarity_threshold)
        .map(|(i, _)| *i)
        .collect();
    if close.len() < 2 {
        return false;
    }
    let (a, b) = (close[0], close[1]);
    match (
        centroid(&patterns[a].experience_ids, embeddings),
        centroid(&patterns[b].experience_ids, embeddings),
    ) {
        (Some(ca), Some(cb)) => cosine_similarity(&ca, &cb) >= params.similarity_threshold,
        _ => false,
    }
}

/// Adds the record to `root` and descends into the best matching child.
fn place_into(
    root: &mut NavigablePattern,
    id: RecordId,
    vector: &[f32],
    embeddings: &HashMap<RecordId, Vec<f32>>,
    params: &DiscoveryParams,
) {
    root.experience_ids.push(id.clone());

    let child_threshold = (params.similarity_threshold + 0.15).min(0.95);
    let best = root
        .children
        .iter_mut()
        .filter_map(|c| {
            centroid(&c.experience_ids, embeddings)
                .map(|ctr| (cosine_similarity(vector, &ctr), c))
        })
        .filter(|(s, _)| *s >= child_threshold)
        .max_by(|a, b| a.0.partial_cmp(&b.0).unwrap_or(std::cmp::Ordering::Equal));
    if let Some((_, child)) = best {
        place_into(child, id, vector, embeddings, params);
    }
}

/// Component-wise mean of member embeddings.
fn centroid(members: &[RecordId], embeddings: &HashMap<RecordId, Vec<f32>>) -> Option<Vec<f32>> {
    let vectors: Vec<&Vec<f32>> = members.iter().filter_map(|m| embeddings.get(m)).collect();
    let first = vectors.first()?;
    let mut sum = vec![0.0f32; first.len()];
    let mut count = 0usize;
    for v in &vectors {
        if v.len() != sum.len() {
            continue;
        }
        for (s, x) in sum.iter_mut().zip(v.iter()) {
            *s += x;
        }
        count += 1;
    }
    if count == 0 {
        return None;
    }
    for s in &mut sum {
        *s /= count as f32;
    }
    Some(sum)
}

fn mean_pairwise(members: &[RecordId], embeddings: &HashMap<RecordId, Vec<f32>>) -> f32 {
    let vectors: Vec<&Vec<f32>> = members.iter().filter_map(|m| embeddings.get(m)).collect();
    if vectors.len() < 2 {
        return 1.0;
    }
    let mut sum = 0.0f32;
    let mut pairs = 0usize;
    for i in 0..vectors.len() {
        for j in (i + 1)..vectors.len() {
            sum += cosine_similarity(vectors[i], vectors[j]);
            pairs += 1;
        }
    }
    sum / pairs as f32
}

fn refresh_coherence(patterns: &mut [NavigablePattern], embeddings: &HashMap<RecordId, Vec<f32>>) {
    for pattern in patterns {
        pattern.coherence = (mean_pairwise(&pattern.experience_ids, embeddings) * 100.0).clamp(0.0, 100.0);
        refresh_coherence(&mut pattern.children, embeddings);
    }
}
