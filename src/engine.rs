//! Engine composition root.
//!
//! [`ExperienceEngine`] wires the components together with explicit
//! construction: one instance of each service, no globals. Hosts hand it a
//! [`RecordStore`] and an [`EmbeddingProvider`]; everything else is built
//! from [`Settings`].

use std::sync::Arc;
use std::time::{Duration, Instant};

use tracing::{debug, warn};

use crate::config::Settings;
use crate::embedding::EmbeddingProvider;
use crate::error::{EngineError, EngineResult};
use crate::pattern::{
    DiscoveryParams, NavigablePattern, PatternManager, PatternManagerSettings, QualityPattern,
};
use crate::recall::{RecallQuery, RecallResponse, RecallService};
use crate::record::store::RecordStore;
use crate::record::{Dimension, ExperienceRecord, RecordId};
use crate::vector::{VectorDimension, VectorStore};

pub struct ExperienceEngine {
    records: Arc<dyn RecordStore>,
    vectors: Arc<VectorStore>,
    embedder: Arc<dyn EmbeddingProvider>,
    recall: RecallService,
    patterns: PatternManager,
}

impl ExperienceEngine {
    /// Builds the engine and synchronously brings the pattern cache up to
    /// date (loading its snapshot, or discovering from scratch).
    pub fn new(
        settings: &Settings,
        records: Arc<dyn RecordStore>,
        embedder: Arc<dyn EmbeddingProvider>,
    ) -> EngineResult<Self> {
        let dimension = VectorDimension::new(settings.semantic.dimension)?;
        if embedder.dimension() != dimension {
            return Err(EngineError::Config {
                reason: format!(
                    "embedding provider produces {}-dim vectors but semantic.dimension is {}",
                    embedder.dimension().get(),
                    dimension.get()
                ),
            });
        }
        let vectors = Arc::new(VectorStore::open(
            settings.vector_snapshot_path(),
            dimension,
        ));

        let recall = RecallService::new(
            Arc::clone(&records),
            Arc::clone(&vectors),
            Arc::clone(&embedder),
            settings.recall.default_limit,
            settings.semantic.default_threshold,
            settings.recall.overfetch_floor,
        );

        let patterns = PatternManager::new(
            Arc::clone(&records),
            Arc::clone(&vectors),
            PatternManagerSettings {
                discovery: DiscoveryParams {
                    similarity_threshold: settings.patterns.similarity_threshold,
                    min_cluster_size: settings.patterns.min_cluster_size,
                    max_depth: settings.patterns.max_depth,
                    quality_analysis: settings.patterns.quality_analysis,
                },
                max_cache_age: chrono::Duration::hours(
                    settings.patterns.cache_max_age_hours as i64,
                ),
                debounce_delay: Duration::from_millis(settings.patterns.debounce_ms),
                batch_threshold: settings.patterns.batch_threshold,
                cache_path: Some(settings.pattern_cache_path()),
            },
        );
        patterns.initialize()?;

        Ok(Self {
            records,
            vectors,
            embedder,
            recall,
            patterns,
        })
    }

    /// Stores a new record, embedding its source text.
    ///
    /// Embedding failure degrades rather than fails: the record is stored
    /// without a vector and simply will not participate in semantic recall
    /// or pattern discovery.
    pub fn capture(&self, mut record: ExperienceRecord) -> EngineResult<()> {
        if record.embedding.is_none() {
            match self.embedder.embed(&record.source) {
                Ok(vector) => record.embedding = Some(vector),
                Err(e) => warn!(id = %record.id, "embedding failed, storing without vector: {e}"),
            }
        }
        if let Some(vector) = record.embedding.clone() {
            self.vectors.add(record.id.clone(), vector);
        }

        let id = record.id.clone();
        self.records.insert(record).map_err(EngineError::RecordStore)?;
        self.patterns.on_capture(&id);
        Ok(())
    }

    /// Applies an update to an existing record, re-embedding its source.
    pub fn reconsider(&self, mut record: ExperienceRecord) -> EngineResult<()> {
        match self.embedder.embed(&record.source) {
            Ok(vector) => record.embedding = Some(vector),
            Err(e) => warn!(id = %record.id, "re-embedding failed, keeping prior vector: {e}"),
        }
        if let Some(vector) = record.embedding.clone() {
            self.vectors.add(record.id.clone(), vector);
        }

        let id = record.id.clone();
        self.records.update(record).map_err(EngineError::RecordStore)?;
        self.patterns.on_update(&id);
        Ok(())
    }

    /// Removes a record everywhere: store, vector store, and pattern cache.
    /// The pattern cascade is synchronous, never debounced.
    pub fn release(&self, id: &RecordId) -> EngineResult<bool> {
        let existed = self.records.remove(id).map_err(EngineError::RecordStore)?;
        self.vectors.remove(id);
        self.patterns.on_delete(id);
        if existed {
            debug!(%id, "record released");
        }
        Ok(existed)
    }

    /// Runs a recall search.
    pub fn recall(&self, query: &RecallQuery) -> EngineResult<RecallResponse> {
        self.recall.search(query)
    }

    /// The cached pattern forest, refreshed first if stale.
    pub fn get_patterns(&self) -> EngineResult<Vec<NavigablePattern>> {
        Ok(self.patterns.get_patterns()?)
    }

    /// The cached quality clusters, optionally scoped to one dimension.
    pub fn get_quality_patterns(
        &self,
        dimension: Option<Dimension>,
    ) -> EngineResult<Vec<QualityPattern>> {
        Ok(self.patterns.get_quality_patterns(dimension)?)
    }

    /// Root patterns, or one subtree by id, truncated to `depth`.
    pub fn browse_patterns(
        &self,
        pattern_id: Option<&str>,
        depth: usize,
    ) -> EngineResult<Vec<NavigablePattern>> {
        Ok(self.patterns.browse(pattern_id, depth)?)
    }

    /// Forces full pattern rediscovery.
    pub fn refresh_patterns(&self) -> EngineResult<()> {
        Ok(self.patterns.refresh_patterns()?)
    }

    /// Drives the debounce timer; returns whether a pending update ran.
    pub fn tick(&self, now: Instant) -> bool {
        self.patterns.tick(now)
    }

    /// Flushes pending pattern work and all snapshots. Call once at
    /// teardown.
    pub fn shutdown(&self) {
        self.patterns.shutdown();
        if let Err(e) = self.vectors.save_to_disk() {
            warn!("failed to persist vector snapshot at shutdown: {e}");
        }
    }

    /// Direct access to the vector store, for integrity tooling.
    #[must_use]
    pub fn vectors(&self) -> &VectorStore {
        &self.vectors
    }
}
