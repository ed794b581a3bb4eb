//! Multi-factor recall: filtering, scoring, ranking, pagination.
//!
//! A recall request combines free-text matching, strict field filters,
//! temporal bounds, quality-filter expressions, and optional semantic
//! similarity. Text search is the only exclusion signal; semantic scores
//! augment ranking but never drop records.

use std::cmp::Ordering;
use std::sync::Arc;

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use tracing::{debug, warn};

use crate::embedding::EmbeddingProvider;
use crate::error::{EngineError, EngineResult};
use crate::filter::QualityFilterService;
use crate::record::{ExperienceRecord, Perspective, Processing, RecordId, RecordStore};
use crate::vector::VectorStore;

/// Weight of the text-match term in the combined score.
const TEXT_WEIGHT: f32 = 0.5;
/// Weight of the field-filter term in the combined score.
const FILTER_WEIGHT: f32 = 0.2;
/// Weight of the semantic-similarity term in the combined score.
const SEMANTIC_WEIGHT: f32 = 0.3;
/// Base text term substituted when no free-text query was supplied.
const EMPTY_QUERY_BASE: f32 = 0.5;
/// Score for a full phrase match of the query inside the source text.
const PHRASE_MATCH_SCORE: f32 = 0.9;
/// Weight on the whole-word match ratio.
const WORD_MATCH_WEIGHT: f32 = 0.7;
/// Weight on the partial/substring match ratio.
const PARTIAL_MATCH_WEIGHT: f32 = 0.4;

/// Temporal constraint on record creation time.
///
/// A single date means "on or after"; a range is inclusive on both ends.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum CreatedFilter {
    Single(NaiveDate),
    Range { from: NaiveDate, to: NaiveDate },
}

impl CreatedFilter {
    fn matches(&self, record: &ExperienceRecord) -> bool {
        let date = record.created.date_naive();
        match self {
            CreatedFilter::Single(d) => date >= *d,
            CreatedFilter::Range { from, to } => date >= *from && date <= *to,
        }
    }
}

/// Result ordering.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SortOrder {
    /// Descending by creation time (default).
    #[default]
    Created,
    /// Descending by combined relevance score.
    Relevance,
}

/// A recall request.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct RecallQuery {
    /// Free-text query against record content.
    #[serde(default)]
    pub query: Option<String>,

    #[serde(default)]
    pub limit: Option<usize>,
    #[serde(default)]
    pub offset: usize,

    /// Strict equality filters; omitted means unconstrained.
    #[serde(default, alias = "experiencer")]
    pub who: Option<String>,
    #[serde(default)]
    pub perspective: Option<Perspective>,
    #[serde(default)]
    pub processing: Option<Processing>,
    /// Filters on `processing == crafted`.
    #[serde(default)]
    pub crafted: Option<bool>,

    #[serde(default)]
    pub created: Option<CreatedFilter>,

    /// Quality filter specification, evaluated through
    /// [`QualityFilterService`].
    #[serde(default)]
    pub qualities: Option<JsonValue>,

    /// Text to embed and match against stored vectors.
    #[serde(default)]
    pub semantic_query: Option<String>,
    #[serde(default)]
    pub semantic_threshold: Option<f32>,

    #[serde(default)]
    pub sort: SortOrder,
}

/// Per-result relevance breakdown.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RelevanceBreakdown {
    pub text_match: f32,
    pub filter_relevance: f32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub semantic_similarity: Option<f32>,
    /// Combined score, clamped to `[0, 1]`.
    pub score: f32,
}

/// One scored record.
#[derive(Debug, Clone, Serialize)]
pub struct RecallResult {
    pub record: ExperienceRecord,
    pub relevance: RelevanceBreakdown,
}

/// Why an empty result set came back empty.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum NoResultsReason {
    /// Nothing has been captured yet.
    NoRecords,
    /// Semantic search ran but nothing cleared the similarity threshold.
    SemanticThresholdTooHigh,
    /// The text query matched nothing that survived the filters.
    QueryTooRestrictive,
    /// Field, temporal, or quality filters excluded every record.
    AllFilteredOut,
}

/// Which filters were active, echoed back for debugging.
#[derive(Debug, Clone, Default, Serialize)]
pub struct AppliedFilters {
    pub who: Option<String>,
    pub perspective: Option<Perspective>,
    pub processing: Option<Processing>,
    pub crafted: Option<bool>,
    pub created: Option<CreatedFilter>,
    pub qualities: Option<String>,
    pub semantic: bool,
}

/// Response from [`RecallService::search`].
#[derive(Debug, Clone, Serialize)]
pub struct RecallResponse {
    pub results: Vec<RecallResult>,
    /// Matches before pagination.
    pub total: usize,
    pub query: Option<String>,
    pub filters: AppliedFilters,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub no_results_reason: Option<NoResultsReason>,
}

/// Orchestrates filtering, scoring, and ranking over the record set.
pub struct RecallService {
    records: Arc<dyn RecordStore>,
    vectors: Arc<VectorStore>,
    embedder: Arc<dyn EmbeddingProvider>,
    filters: QualityFilterService,
    default_limit: usize,
    default_semantic_threshold: f32,
    overfetch_floor: usize,
}

impl RecallService {
    pub fn new(
        records: Arc<dyn RecordStore>,
        vectors: Arc<VectorStore>,
        embedder: Arc<dyn EmbeddingProvider>,
        default_limit: usize,
        default_semantic_threshold: f32,
        overfetch_floor: usize,
    ) -> Self {
        Self {
            records,
            vectors,
            embedder,
            filters: QualityFilterService::new(),
            default_limit,
            default_semantic_threshold,
            overfetch_floor,
        }
    }

    /// Runs a recall search.
    ///
    /// Malformed quality filters propagate as typed errors; embedding
    /// failure during semantic recall degrades to text-only scoring with a
    /// logged warning.
    pub fn search(&self, input: &RecallQuery) -> EngineResult<RecallResponse> {
        let limit = input.limit.unwrap_or(self.default_limit);
        let all_records = self
            .records
            .all()
            .map_err(EngineError::RecordStore)?;
        let record_count = all_records.len();

        // Parse the quality filter up front so validation errors surface
        // before any scoring work.
        let quality_expr = match &input.qualities {
            Some(spec) => Some(self.filters.parse(spec)?),
            None => None,
        };

        let semantic_scores = self.semantic_scores(input, limit);

        // Hard filters: fields, time, qualities.
        let candidates: Vec<ExperienceRecord> = all_records
            .into_iter()
            .filter(|r| self.field_filters_pass(input, r))
            .filter(|r| input.created.as_ref().is_none_or(|c| c.matches(r)))
            .filter(|r| {
                quality_expr
                    .as_ref()
                    .is_none_or(|expr| self.filters.evaluate(r, expr))
            })
            .collect();
        let filtered_count = candidates.len();

        let query_text = input
            .query
            .as_deref()
            .map(str::trim)
            .filter(|q| !q.is_empty());

        // Score every remaining record; text search is the only exclusion
        // signal beyond the hard filters above.
        let mut scored: Vec<RecallResult> = candidates
            .into_iter()
            .filter_map(|record| {
                let text_match = match query_text {
                    Some(q) => text_match_score(q, &record.source),
                    None => 1.0,
                };
                if query_text.is_some() && text_match == 0.0 {
                    return None;
                }

                // Always 1.0 for survivors of the hard filters; kept as a
                // soft signal for debug visibility.
                let filter_relevance = if self.field_filters_pass(input, &record) {
                    1.0
                } else {
                    0.0
                };
                let semantic_similarity = semantic_scores
                    .as_ref()
                    .and_then(|scores| scores.iter().find(|(id, _)| id == &record.id))
                    .map(|(_, s)| *s);

                let text_term = if query_text.is_some() {
                    text_match * TEXT_WEIGHT
                } else {
                    EMPTY_QUERY_BASE
                };
                let score = (text_term
                    + filter_relevance * FILTER_WEIGHT
                    + semantic_similarity.unwrap_or(0.0) * SEMANTIC_WEIGHT)
                    .clamp(0.0, 1.0);

                Some(RecallResult {
                    record,
                    relevance: RelevanceBreakdown {
                        text_match,
                        filter_relevance,
                        semantic_similarity,
                        score,
                    },
                })
            })
            .collect();

        // Stable sorts preserve insertion order on ties.
        match input.sort {
            SortOrder::Created => {
                scored.sort_by(|a, b| b.record.created.cmp(&a.record.created));
            }
            SortOrder::Relevance => {
                scored.sort_by(|a, b| {
                    b.relevance
                        .score
                        .partial_cmp(&a.relevance.score)
                        .unwrap_or(Ordering::Equal)
                });
            }
        }

        let total = scored.len();
        let results: Vec<RecallResult> =
            scored.into_iter().skip(input.offset).take(limit).collect();

        let no_results_reason = if total > 0 {
            None
        } else if record_count == 0 {
            Some(NoResultsReason::NoRecords)
        } else if input.semantic_query.is_some()
            && semantic_scores.as_ref().is_some_and(|s| s.is_empty())
        {
            Some(NoResultsReason::SemanticThresholdTooHigh)
        } else if query_text.is_some() && filtered_count > 0 {
            Some(NoResultsReason::QueryTooRestrictive)
        } else {
            Some(NoResultsReason::AllFilteredOut)
        };

        Ok(RecallResponse {
            results,
            total,
            query: query_text.map(str::to_string),
            filters: AppliedFilters {
                who: input.who.clone(),
                perspective: input.perspective,
                processing: input.processing,
                crafted: input.crafted,
                created: input.created,
                qualities: input.qualities.as_ref().map(|q| self.filters.describe(q)),
                semantic: input.semantic_query.is_some(),
            },
            no_results_reason,
        })
    }

    fn field_filters_pass(&self, input: &RecallQuery, record: &ExperienceRecord) -> bool {
        if input.who.as_deref().is_some_and(|w| w != record.who) {
            return false;
        }
        if input
            .perspective
            .is_some_and(|p| p != record.perspective)
        {
            return false;
        }
        if input.processing.is_some_and(|p| p != record.processing) {
            return false;
        }
        if input
            .crafted
            .is_some_and(|c| c != (record.processing == Processing::Crafted))
        {
            return false;
        }
        true
    }

    /// Embeds the semantic query and collects a `record_id -> similarity`
    /// map. Failure never fails the request: it logs and returns `None`.
    fn semantic_scores(&self, input: &RecallQuery, limit: usize) -> Option<Vec<(RecordId, f32)>> {
        let semantic_query = input.semantic_query.as_deref()?;
        let threshold = input
            .semantic_threshold
            .unwrap_or(self.default_semantic_threshold);
        // Over-fetch to leave room for hard filters applied afterwards.
        let fetch_limit = (limit * 2).max(self.overfetch_floor);

        match self.embedder.embed(semantic_query) {
            Ok(query_vector) => {
                let matches = self.vectors.find_similar(&query_vector, fetch_limit, threshold);
                debug!(
                    matches = matches.len(),
                    threshold, "semantic recall candidates"
                );
                Some(matches.into_iter().map(|m| (m.id, m.score)).collect())
            }
            Err(e) => {
                warn!(error = %e, "embedding failed during semantic recall, continuing without semantic scoring");
                None
            }
        }
    }
}

/// Scores free-text relevance of `source` against `query`.
///
/// 1.0 for an empty query, 0.9 for a full phrase match, otherwise the max of
/// the weighted whole-word and partial match ratios. Exactly 0 means no
/// overlap at all.
#[must_use]
pub fn text_match_score(query: &str, source: &str) -> f32 {
    let query = query.trim().to_lowercase();
    if query.is_empty() {
        return 1.0;
    }
    let source_lower = source.to_lowercase();

    if source_lower.contains(&query) {
        return PHRASE_MATCH_SCORE;
    }

    let query_words: Vec<&str> = query.split_whitespace().collect();
    if query_words.is_empty() {
        return 1.0;
    }
    let source_words: Vec<&str> = source_lower
        .split(|c: char| !c.is_alphanumeric())
        .filter(|w| !w.is_empty())
        .collect();

    let whole_hits = query_words
        .iter()
        .filter(|qw| source_words.contains(*qw))
        .count();
    let partial_hits = query_words
        .iter()
        .filter(|qw| source_lower.contains(**qw))
        .count();

    let whole_ratio = whole_hits as f32 / query_words.len() as f32;
    let partial_ratio = partial_hits as f32 / query_words.len() as f32;

    (whole_ratio * WORD_MATCH_WEIGHT).max(partial_ratio * PARTIAL_MATCH_WEIGHT)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::record::{MemoryRecordStore, QualityRepresentation};
    use crate::vector::{VectorDimension, VectorStore};
    use chrono::{TimeZone, Utc};
    use serde_json::json;

    /// Deterministic embedder: known phrases map to fixed directions.
    struct StubEmbedder;

    impl EmbeddingProvider for StubEmbedder {
        fn embed_batch(
            &self,
            texts: &[&str],
        ) -> Result<Vec<Vec<f32>>, crate::embedding::EmbeddingError> {
            Ok(texts
                .iter()
                .map(|t| {
                    if t.contains("rain") {
                        vec![1.0, 0.0, 0.0]
                    } else if t.contains("code") {
                        vec![0.0, 1.0, 0.0]
                    } else {
                        vec![0.0, 0.0, 1.0]
                    }
                })
                .collect())
        }

        fn dimension(&self) -> VectorDimension {
            VectorDimension::new(3).unwrap()
        }
    }

    /// Embedder that always fails, for degraded-mode tests.
    struct FailingEmbedder;

    impl EmbeddingProvider for FailingEmbedder {
        fn embed_batch(
            &self,
            _texts: &[&str],
        ) -> Result<Vec<Vec<f32>>, crate::embedding::EmbeddingError> {
            Err(crate::embedding::EmbeddingError::Generation(
                "model offline".to_string(),
            ))
        }

        fn dimension(&self) -> VectorDimension {
            VectorDimension::new(3).unwrap()
        }
    }

    fn record(id: &str, source: &str, day: u32) -> ExperienceRecord {
        let mut r = ExperienceRecord::new(id, source, "claude");
        r.created = Utc.with_ymd_and_hms(2026, 8, day, 12, 0, 0).unwrap();
        r
    }

    fn service_with(
        records: Vec<ExperienceRecord>,
        embedder: Arc<dyn EmbeddingProvider>,
    ) -> RecallService {
        let store = MemoryRecordStore::new();
        for r in records {
            store.insert(r).unwrap();
        }
        let vectors = Arc::new(VectorStore::in_memory(VectorDimension::new(3).unwrap()));
        RecallService::new(Arc::new(store), vectors, embedder, 20, 0.7, 100)
    }

    #[test]
    fn test_empty_query_returns_everything() {
        let service = service_with(
            vec![
                record("a", "rain on the window", 1),
                record("b", "writing code all afternoon", 2),
                record("c", "a walk in the park", 3),
            ],
            Arc::new(StubEmbedder),
        );

        let response = service.search(&RecallQuery::default()).unwrap();
        assert_eq!(response.total, 3);
        assert_eq!(response.results.len(), 3);
        assert!(response.no_results_reason.is_none());

        // Default sort: created descending
        assert_eq!(response.results[0].record.id.as_str(), "c");
        assert_eq!(response.results[2].record.id.as_str(), "a");
    }

    #[test]
    fn test_pagination() {
        let service = service_with(
            (1..=5).map(|i| record(&format!("r{i}"), "entry", i)).collect(),
            Arc::new(StubEmbedder),
        );

        let response = service
            .search(&RecallQuery {
                limit: Some(2),
                offset: 1,
                ..Default::default()
            })
            .unwrap();
        assert_eq!(response.total, 5);
        assert_eq!(response.results.len(), 2);
        assert_eq!(response.results[0].record.id.as_str(), "r4");
    }

    #[test]
    fn test_text_query_excludes_non_matches() {
        let service = service_with(
            vec![
                record("a", "rain on the window", 1),
                record("b", "writing code all afternoon", 2),
            ],
            Arc::new(StubEmbedder),
        );

        let response = service
            .search(&RecallQuery {
                query: Some("rain".to_string()),
                ..Default::default()
            })
            .unwrap();
        assert_eq!(response.total, 1);
        assert_eq!(response.results[0].record.id.as_str(), "a");
        assert_eq!(response.results[0].relevance.text_match, 0.9);
    }

    #[test]
    fn test_non_matching_query_populates_reason() {
        let service = service_with(
            vec![record("a", "rain on the window", 1)],
            Arc::new(StubEmbedder),
        );

        let response = service
            .search(&RecallQuery {
                query: Some("quantum chromodynamics".to_string()),
                ..Default::default()
            })
            .unwrap();
        assert_eq!(response.total, 0);
        assert_eq!(
            response.no_results_reason,
            Some(NoResultsReason::QueryTooRestrictive)
        );
    }

    #[test]
    fn test_no_records_reason() {
        let service = service_with(vec![], Arc::new(StubEmbedder));
        let response = service.search(&RecallQuery::default()).unwrap();
        assert_eq!(response.no_results_reason, Some(NoResultsReason::NoRecords));
    }

    #[test]
    fn test_field_filters() {
        let mut other = record("b", "rain again", 2);
        other.who = "human".to_string();
        let service = service_with(
            vec![record("a", "rain on the window", 1), other],
            Arc::new(StubEmbedder),
        );

        let response = service
            .search(&RecallQuery {
                who: Some("human".to_string()),
                ..Default::default()
            })
            .unwrap();
        assert_eq!(response.total, 1);
        assert_eq!(response.results[0].record.id.as_str(), "b");
    }

    #[test]
    fn test_crafted_filter_maps_to_processing() {
        let mut crafted = record("b", "a polished reflection", 2);
        crafted.processing = Processing::Crafted;
        let service = service_with(
            vec![record("a", "raw note", 1), crafted],
            Arc::new(StubEmbedder),
        );

        let response = service
            .search(&RecallQuery {
                crafted: Some(true),
                ..Default::default()
            })
            .unwrap();
        assert_eq!(response.total, 1);
        assert_eq!(response.results[0].record.id.as_str(), "b");
    }

    #[test]
    fn test_created_filters() {
        let service = service_with(
            vec![
                record("a", "first", 1),
                record("b", "second", 10),
                record("c", "third", 20),
            ],
            Arc::new(StubEmbedder),
        );

        // Single date: on or after
        let response = service
            .search(&RecallQuery {
                created: Some(CreatedFilter::Single(
                    NaiveDate::from_ymd_opt(2026, 8, 10).unwrap(),
                )),
                ..Default::default()
            })
            .unwrap();
        assert_eq!(response.total, 2);

        // Inclusive range
        let response = service
            .search(&RecallQuery {
                created: Some(CreatedFilter::Range {
                    from: NaiveDate::from_ymd_opt(2026, 8, 1).unwrap(),
                    to: NaiveDate::from_ymd_opt(2026, 8, 10).unwrap(),
                }),
                ..Default::default()
            })
            .unwrap();
        assert_eq!(response.total, 2);
    }

    #[test]
    fn test_quality_filter_applied() {
        let mut open = record("a", "an open morning", 1);
        open.qualities = QualityRepresentation::from_tokens(["mood.open"]);
        let service = service_with(
            vec![open, record("b", "neutral note", 2)],
            Arc::new(StubEmbedder),
        );

        let response = service
            .search(&RecallQuery {
                qualities: Some(json!({"mood": "open"})),
                ..Default::default()
            })
            .unwrap();
        assert_eq!(response.total, 1);
        assert_eq!(response.results[0].record.id.as_str(), "a");

        // Malformed spec propagates as a typed error
        let err = service
            .search(&RecallQuery {
                qualities: Some(json!({"mood": 42})),
                ..Default::default()
            })
            .unwrap_err();
        assert!(matches!(err, EngineError::Filter(_)));
    }

    #[test]
    fn test_semantic_scoring_augments_without_excluding() {
        let rain = record("a", "rain on the window", 1);
        let code = record("b", "writing code all afternoon", 2);
        let store = MemoryRecordStore::new();
        store.insert(rain).unwrap();
        store.insert(code).unwrap();

        let vectors = Arc::new(VectorStore::in_memory(VectorDimension::new(3).unwrap()));
        vectors.add(RecordId::from("a"), vec![1.0, 0.0, 0.0]);
        vectors.add(RecordId::from("b"), vec![0.0, 1.0, 0.0]);

        let service = RecallService::new(
            Arc::new(store),
            vectors,
            Arc::new(StubEmbedder),
            20,
            0.7,
            100,
        );

        let response = service
            .search(&RecallQuery {
                semantic_query: Some("rain sounds".to_string()),
                sort: SortOrder::Relevance,
                ..Default::default()
            })
            .unwrap();

        // Both records survive; the semantically-similar one ranks first.
        assert_eq!(response.total, 2);
        assert_eq!(response.results[0].record.id.as_str(), "a");
        assert_eq!(
            response.results[0].relevance.semantic_similarity,
            Some(1.0)
        );
        assert!(response.results[1].relevance.semantic_similarity.is_none());
    }

    #[test]
    fn test_embedding_failure_degrades_gracefully() {
        let service = service_with(
            vec![record("a", "rain on the window", 1)],
            Arc::new(FailingEmbedder),
        );

        let response = service
            .search(&RecallQuery {
                semantic_query: Some("rain".to_string()),
                ..Default::default()
            })
            .unwrap();
        assert_eq!(response.total, 1);
        assert!(response.results[0].relevance.semantic_similarity.is_none());
    }

    #[test]
    fn test_text_match_score_shape() {
        assert_eq!(text_match_score("", "anything"), 1.0);
        // Both words hit as whole words, but "rain window" is not a
        // contiguous substring, so the phrase branch does not apply
        assert_eq!(
            text_match_score("rain window", "rain on the window"),
            WORD_MATCH_WEIGHT
        );
        assert_eq!(
            text_match_score("on the window", "rain on the window"),
            0.9
        );

        // Two query words, one whole-word hit
        let score = text_match_score("rain thunder", "rain on the window");
        assert!((score - 0.35).abs() < 1e-6);

        // A single-word query inside a longer word still counts as a
        // phrase (substring) match
        assert_eq!(text_match_score("rain", "it was raining hard"), 0.9);

        // Whole-word miss but partial hit: "rain" and "fall" vs "rainfall"
        let score = text_match_score("rain fall", "heavy rainfall overnight");
        assert!((score - PARTIAL_MATCH_WEIGHT).abs() < 1e-6);

        assert_eq!(text_match_score("zebra", "rain on the window"), 0.0);
    }

    #[test]
    fn test_score_clamped() {
        let service = service_with(
            vec![record("a", "rain on the window", 1)],
            Arc::new(StubEmbedder),
        );
        let response = service
            .search(&RecallQuery {
                query: Some("rain on the window".to_string()),
                ..Default::default()
            })
            .unwrap();
        let score = response.results[0].relevance.score;
        assert!((0.0..=1.0).contains(&score));
    }
}
