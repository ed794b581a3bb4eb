//! End-to-end tests over the engine surface: capture, recall, pattern
//! discovery, delete cascade, and restart persistence.

use std::sync::Arc;
use std::time::{Duration, Instant};

use serde_json::json;

use anima::embedding::{EmbeddingError, EmbeddingProvider};
use anima::record::qualities::QualityRepresentation;
use anima::{
    ExperienceEngine, ExperienceRecord, MemoryRecordStore, RecallQuery, RecordId, RecordStore,
    Settings, SortOrder, VectorDimension,
};

/// Deterministic embedder keyed on topic words, so clustering behavior is
/// predictable without the real model.
struct TopicEmbedder;

impl EmbeddingProvider for TopicEmbedder {
    fn embed_batch(&self, texts: &[&str]) -> Result<Vec<Vec<f32>>, EmbeddingError> {
        Ok(texts
            .iter()
            .map(|t| {
                let mut v = vec![0.0f32; 384];
                if t.contains("rain") || t.contains("storm") {
                    v[0] = 1.0;
                    v[1] = 0.1;
                } else if t.contains("debug") || t.contains("code") {
                    v[2] = 1.0;
                    v[3] = 0.1;
                } else {
                    v[4] = 1.0;
                }
                v
            })
            .collect())
    }

    fn dimension(&self) -> VectorDimension {
        VectorDimension::dimension_384()
    }
}

fn engine_with(dir: &std::path::Path) -> (ExperienceEngine, Arc<dyn RecordStore>) {
    let settings = Settings {
        data_path: dir.to_path_buf(),
        ..Settings::default()
    };
    let records: Arc<dyn RecordStore> = MemoryRecordStore::shared();
    let engine = ExperienceEngine::new(&settings, Arc::clone(&records), Arc::new(TopicEmbedder))
        .expect("engine construction");
    (engine, records)
}

fn tagged(id: &str, source: &str, tokens: &[&str]) -> ExperienceRecord {
    let mut record = ExperienceRecord::new(id, source, "sage");
    record.qualities = QualityRepresentation::from_tokens(tokens.iter().copied());
    record
}

#[test]
fn capture_then_recall_by_text_and_quality() {
    let dir = tempfile::tempdir().unwrap();
    let (engine, _records) = engine_with(dir.path());

    engine
        .capture(tagged("exp_1", "rain on the window all night", &["mood.open", "space.here"]))
        .unwrap();
    engine
        .capture(tagged("exp_2", "debugging code until late", &["focus.narrow"]))
        .unwrap();
    engine
        .capture(tagged("exp_3", "storm rolling in over the bay", &["mood.open"]))
        .unwrap();

    // Text query excludes non-matching records
    let response = engine
        .recall(&RecallQuery {
            query: Some("rain".to_string()),
            ..RecallQuery::default()
        })
        .unwrap();
    assert_eq!(response.total, 1);
    assert_eq!(response.results[0].record.id, RecordId::from("exp_1"));

    // Quality filter alone keeps everything tagged mood.open
    let response = engine
        .recall(&RecallQuery {
            qualities: Some(json!({"mood": "open"})),
            ..RecallQuery::default()
        })
        .unwrap();
    assert_eq!(response.total, 2);

    // Combining both narrows to the intersection
    let response = engine
        .recall(&RecallQuery {
            query: Some("storm".to_string()),
            qualities: Some(json!({"mood": "open"})),
            sort: SortOrder::Relevance,
            ..RecallQuery::default()
        })
        .unwrap();
    assert_eq!(response.total, 1);
    assert_eq!(response.results[0].record.id, RecordId::from("exp_3"));
}

#[test]
fn semantic_recall_ranks_by_similarity() {
    let dir = tempfile::tempdir().unwrap();
    let (engine, _records) = engine_with(dir.path());

    engine.capture(tagged("wet", "rain all day", &[])).unwrap();
    engine.capture(tagged("dry", "debugging code", &[])).unwrap();

    let response = engine
        .recall(&RecallQuery {
            semantic_query: Some("storm coming".to_string()),
            semantic_threshold: Some(0.5),
            sort: SortOrder::Relevance,
            ..RecallQuery::default()
        })
        .unwrap();

    assert_eq!(response.results[0].record.id, RecordId::from("wet"));
    let top = &response.results[0].relevance;
    assert!(top.semantic_similarity.is_some_and(|s| s > 0.9));
}

#[test]
fn discovery_tags_records_and_release_cascades() {
    let dir = tempfile::tempdir().unwrap();
    let (engine, records) = engine_with(dir.path());

    for i in 0..4 {
        engine
            .capture(tagged(&format!("rain_{i}"), "steady rain outside", &["mood.open"]))
            .unwrap();
    }
    engine.refresh_patterns().unwrap();

    let patterns = engine.get_patterns().unwrap();
    assert_eq!(patterns.len(), 1);
    assert_eq!(patterns[0].experience_ids.len(), 4);

    // Membership written back onto the records
    let record = records.get(&RecordId::from("rain_0")).unwrap().unwrap();
    assert_eq!(record.pattern_ids, vec![patterns[0].id.clone()]);

    // Release strips the record from store, vectors, and every pattern
    assert!(engine.release(&RecordId::from("rain_0")).unwrap());
    let patterns = engine.get_patterns().unwrap();
    assert!(!patterns.iter().any(|p| p.contains(&RecordId::from("rain_0"))));
    assert!(records.get(&RecordId::from("rain_0")).unwrap().is_none());
}

#[test]
fn batch_threshold_updates_without_waiting_for_timer() {
    let dir = tempfile::tempdir().unwrap();
    let settings = Settings {
        data_path: dir.path().to_path_buf(),
        ..Settings::default()
    };
    let records: Arc<dyn RecordStore> = MemoryRecordStore::shared();
    let engine = ExperienceEngine::new(&settings, Arc::clone(&records), Arc::new(TopicEmbedder))
        .unwrap();

    // Ten captures in a burst hit the default batch threshold; the tenth
    // runs the update inline, so patterns exist without any tick.
    for i in 0..10 {
        engine
            .capture(tagged(&format!("rain_{i}"), "rain again", &[]))
            .unwrap();
    }

    let record = records.get(&RecordId::from("rain_0")).unwrap().unwrap();
    assert!(!record.pattern_ids.is_empty());
}

#[test]
fn pending_update_runs_on_tick_after_deadline() {
    let dir = tempfile::tempdir().unwrap();
    let (engine, _records) = engine_with(dir.path());

    for i in 0..3 {
        engine
            .capture(tagged(&format!("rain_{i}"), "rain again", &[]))
            .unwrap();
    }

    assert!(!engine.tick(Instant::now()));
    assert!(engine.tick(Instant::now() + Duration::from_secs(6)));

    let patterns = engine.get_patterns().unwrap();
    assert_eq!(patterns.len(), 1);
}

#[test]
fn snapshots_survive_restart() {
    let dir = tempfile::tempdir().unwrap();

    let original = {
        let (engine, _records) = engine_with(dir.path());
        for i in 0..3 {
            engine
                .capture(tagged(&format!("rain_{i}"), "rain on the roof", &[]))
                .unwrap();
        }
        engine.refresh_patterns().unwrap();
        let patterns = engine.get_patterns().unwrap();
        engine.shutdown();
        patterns
    };
    assert_eq!(original.len(), 1);

    // New engine over the same data directory; the record store is the
    // host's concern, so reseed it, but vectors and the pattern cache come
    // back from disk.
    let settings = Settings {
        data_path: dir.path().to_path_buf(),
        ..Settings::default()
    };
    let records: Arc<dyn RecordStore> = MemoryRecordStore::shared();
    for i in 0..3 {
        records
            .insert(tagged(&format!("rain_{i}"), "rain on the roof", &[]))
            .unwrap();
    }
    let engine =
        ExperienceEngine::new(&settings, records, Arc::new(TopicEmbedder)).unwrap();

    assert_eq!(engine.vectors().len(), 3);
    assert_eq!(engine.get_patterns().unwrap(), original);
}

#[test]
fn empty_store_reports_no_records() {
    let dir = tempfile::tempdir().unwrap();
    let (engine, _records) = engine_with(dir.path());

    let response = engine.recall(&RecallQuery::default()).unwrap();
    assert!(response.results.is_empty());
    assert_eq!(
        response.no_results_reason,
        Some(anima::recall::NoResultsReason::NoRecords)
    );
}
