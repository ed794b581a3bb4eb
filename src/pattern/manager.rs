//! Cache lifecycle, debounced scheduling, and snapshot persistence.

use std::collections::BTreeSet;
use std::fs;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::Utc;
use parking_lot::{Mutex, RwLock};
use tracing::{debug, info, warn};

use crate::pattern::discovery::{DiscoveryParams, HierarchicalDiscovery, PatternDiscovery};
use crate::pattern::incremental::{IncrementalPatternUpdate, NearestClusterUpdate};
use crate::pattern::types::{NavigablePattern, PatternCache, QualityPattern};
use crate::pattern::PatternError;
use crate::record::store::RecordStore;
use crate::record::{Dimension, ExperienceRecord, RecordId};
use crate::vector::VectorStore;

/// Tunables for cache maintenance.
#[derive(Debug, Clone)]
pub struct PatternManagerSettings {
    pub discovery: DiscoveryParams,
    /// Cache older than this forces full rediscovery before any read.
    pub max_cache_age: chrono::Duration,
    /// Quiet period before a pending incremental update runs.
    pub debounce_delay: Duration,
    /// Pending-set size that forces an immediate update.
    pub batch_threshold: usize,
    /// Snapshot file; `None` disables persistence.
    pub cache_path: Option<PathBuf>,
}

impl Default for PatternManagerSettings {
    fn default() -> Self {
        Self {
            discovery: DiscoveryParams::default(),
            max_cache_age: chrono::Duration::hours(24),
            debounce_delay: Duration::from_secs(5),
            batch_threshold: 10,
            cache_path: None,
        }
    }
}

/// Debounce scheduling state. A single pending deadline per manager;
/// re-noting a change resets it, never stacks a second timer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DebounceState {
    Idle,
    Pending {
        deadline: Instant,
        ids: BTreeSet<RecordId>,
    },
}

/// Owns the pattern cache and keeps it consistent with the record set.
///
/// All discovery work (full, incremental, delete cascades) runs under a
/// single gate so two discoveries never interleave. Readers clone out of an
/// `Arc` swap, so a read overlapping a replacement sees either the old or
/// the new snapshot, never a half-written one.
pub struct PatternManager {
    records: Arc<dyn RecordStore>,
    vectors: Arc<VectorStore>,
    discovery: Box<dyn PatternDiscovery>,
    incremental: Box<dyn IncrementalPatternUpdate>,
    settings: PatternManagerSettings,
    cache: RwLock<Option<Arc<PatternCache>>>,
    debounce: Mutex<DebounceState>,
    discovery_gate: Mutex<()>,
}

impl PatternManager {
    pub fn new(
        records: Arc<dyn RecordStore>,
        vectors: Arc<VectorStore>,
        settings: PatternManagerSettings,
    ) -> Self {
        Self::with_algorithms(
            records,
            vectors,
            settings,
            Box::new(HierarchicalDiscovery),
            Box::new(NearestClusterUpdate),
        )
    }

    /// Constructor with injected algorithms, used by tests.
    pub fn with_algorithms(
        records: Arc<dyn RecordStore>,
        vectors: Arc<VectorStore>,
        settings: PatternManagerSettings,
        discovery: Box<dyn PatternDiscovery>,
        incremental: Box<dyn IncrementalPatternUpdate>,
    ) -> Self {
        Self {
            records,
            vectors,
            discovery,
            incremental,
            settings,
            cache: RwLock::new(None),
            debounce: Mutex::new(DebounceState::Idle),
            discovery_gate: Mutex::new(()),
        }
    }

    /// Loads the persisted snapshot, falling back to full discovery when it
    /// is absent, unreadable, or stale.
    pub fn initialize(&self) -> Result<(), PatternError> {
        if let Some(cache) = self.load_snapshot() {
            if !cache.is_stale(self.settings.max_cache_age, Utc::now()) {
                info!(
                    patterns = cache.stats.total_patterns,
                    "loaded pattern cache from disk"
                );
                *self.cache.write() = Some(Arc::new(cache));
                return Ok(());
            }
            debug!("persisted pattern cache is stale, rediscovering");
        }
        self.refresh_patterns()
    }

    /// The cached forest, refreshing first when the cache is missing or
    /// older than the configured maximum age.
    pub fn get_patterns(&self) -> Result<Vec<NavigablePattern>, PatternError> {
        Ok(self.fresh_cache()?.patterns.clone())
    }

    /// The cached quality clusters, optionally filtered to one dimension.
    pub fn get_quality_patterns(
        &self,
        dimension: Option<Dimension>,
    ) -> Result<Vec<QualityPattern>, PatternError> {
        let cache = self.fresh_cache()?;
        Ok(cache
            .quality_patterns
            .iter()
            .filter(|q| dimension.is_none_or(|d| q.dimension == d))
            .cloned()
            .collect())
    }

    /// Root patterns truncated to `depth`, or one subtree by id.
    pub fn browse(
        &self,
        pattern_id: Option<&str>,
        depth: usize,
    ) -> Result<Vec<NavigablePattern>, PatternError> {
        let cache = self.fresh_cache()?;
        match pattern_id {
            None => Ok(cache.patterns.iter().map(|p| p.truncated(depth)).collect()),
            Some(id) => cache
                .find(id)
                .map(|p| vec![p.truncated(depth)])
                .ok_or_else(|| PatternError::NotFound { id: id.to_string() }),
        }
    }

    /// Notes a newly captured record and (re)schedules the debounced update.
    pub fn on_capture(&self, id: &RecordId) {
        self.note_change(id);
    }

    /// Notes an updated record and (re)schedules the debounced update.
    pub fn on_update(&self, id: &RecordId) {
        self.note_change(id);
    }

    /// Removes a deleted record from every cluster immediately.
    ///
    /// Deletions are never debounced: a stale membership would leak the
    /// deleted id back out through recall results.
    pub fn on_delete(&self, id: &RecordId) {
        if let DebounceState::Pending { ids, .. } = &mut *self.debounce.lock() {
            ids.remove(id);
        }

        let _gate = self.discovery_gate.lock();
        let current = self.cache.read().clone();
        let Some(current) = current else {
            return;
        };

        let mut next = (*current).clone();
        if next.remove_record(id) {
            next.last_updated = Utc::now();
            let next = Arc::new(next);
            *self.cache.write() = Some(Arc::clone(&next));
            if let Err(e) = self.persist(&next) {
                warn!("failed to persist pattern cache after delete: {e}");
            }
        }
    }

    /// Drives the debounce timer. Runs the pending update when `now` has
    /// passed the deadline; returns whether an update ran.
    pub fn tick(&self, now: Instant) -> bool {
        let pending = {
            let mut state = self.debounce.lock();
            match &*state {
                DebounceState::Pending { deadline, ids } if now >= *deadline => {
                    let ids = ids.clone();
                    *state = DebounceState::Idle;
                    Some(ids)
                }
                _ => None,
            }
        };
        match pending {
            Some(ids) => {
                self.apply_incremental(ids);
                true
            }
            None => false,
        }
    }

    /// Forces a full rediscovery, replacing the cache wholesale.
    pub fn refresh_patterns(&self) -> Result<(), PatternError> {
        let _gate = self.discovery_gate.lock();
        self.full_discovery_locked()
    }

    /// Flushes any pending work and persists the cache. Called at teardown.
    pub fn shutdown(&self) {
        let pending = {
            let mut state = self.debounce.lock();
            match std::mem::replace(&mut *state, DebounceState::Idle) {
                DebounceState::Pending { ids, .. } => Some(ids),
                DebounceState::Idle => None,
            }
        };
        if let Some(ids) = pending {
            self.apply_incremental(ids);
        }
        if let Some(cache) = self.cache.read().clone() {
            if let Err(e) = self.persist(&cache) {
                warn!("failed to persist pattern cache at shutdown: {e}");
            }
        }
    }

    /// Current debounce state, for tests and introspection.
    pub fn debounce_state(&self) -> DebounceState {
        self.debounce.lock().clone()
    }

    fn note_change(&self, id: &RecordId) {
        let flush_now = {
            let mut state = self.debounce.lock();
            let mut ids = match std::mem::replace(&mut *state, DebounceState::Idle) {
                DebounceState::Pending { ids, .. } => ids,
                DebounceState::Idle => BTreeSet::new(),
            };
            ids.insert(id.clone());
            if ids.len() >= self.settings.batch_threshold {
                Some(ids)
            } else {
                *state = DebounceState::Pending {
                    deadline: Instant::now() + self.settings.debounce_delay,
                    ids,
                };
                None
            }
        };
        if let Some(ids) = flush_now {
            debug!(pending = ids.len(), "batch threshold reached, updating now");
            self.apply_incremental(ids);
        }
    }

    /// Runs the incremental algorithm over the pending set, falling back to
    /// full discovery on structural change or on any error. Failures leave
    /// the previous cache in place.
    fn apply_incremental(&self, ids: BTreeSet<RecordId>) {
        let _gate = self.discovery_gate.lock();

        let Some(current) = self.cache.read().clone() else {
            if let Err(e) = self.full_discovery_locked() {
                warn!("pattern discovery failed: {e}");
            }
            return;
        };

        let changed: Vec<ExperienceRecord> = ids
            .iter()
            .filter_map(|id| self.records.get(id).ok().flatten())
            .collect();
        if changed.is_empty() {
            return;
        }

        let embeddings = self.vectors.snapshot();
        match self
            .incremental
            .update(&current, &changed, &embeddings, &self.settings.discovery)
        {
            Ok(outcome) if outcome.has_structural_change() => {
                debug!("incremental update detected merge/split, rediscovering");
                if let Err(e) = self.full_discovery_locked() {
                    warn!("full discovery fallback failed: {e}");
                }
            }
            Ok(outcome) if outcome.unplaced.len() >= self.settings.discovery.min_cluster_size => {
                // Enough homeless records to seed a new cluster, which the
                // incremental pass cannot create
                debug!(
                    unplaced = outcome.unplaced.len(),
                    "unplaced records may form new clusters, rediscovering"
                );
                if let Err(e) = self.full_discovery_locked() {
                    warn!("full discovery fallback failed: {e}");
                }
            }
            Ok(outcome) => {
                let mut cache = outcome.cache;
                cache.last_updated = Utc::now();
                let cache = Arc::new(cache);
                *self.cache.write() = Some(Arc::clone(&cache));
                if let Err(e) = self.persist(&cache) {
                    warn!("failed to persist pattern cache: {e}");
                }
                if let Err(e) = self.retag(&cache, &outcome.affected) {
                    warn!("failed to re-tag records after incremental update: {e}");
                }
            }
            Err(e) => {
                warn!("incremental update failed, falling back to full discovery: {e}");
                if let Err(e) = self.full_discovery_locked() {
                    warn!("full discovery fallback failed: {e}");
                }
            }
        }
    }

    /// Full discovery under the gate: cluster every embedded record, replace
    /// the cache, persist, re-tag.
    fn full_discovery_locked(&self) -> Result<(), PatternError> {
        let records = self.records.all()?;
        let embeddings = self.vectors.snapshot();
        let embedded: Vec<RecordId> = records
            .iter()
            .filter(|r| embeddings.contains_key(&r.id))
            .map(|r| r.id.clone())
            .collect();

        let outcome = self
            .discovery
            .discover(&records, &embeddings, &self.settings.discovery)?;
        let cache = Arc::new(PatternCache::from_parts(
            outcome.patterns,
            outcome.quality_patterns,
        ));
        info!(
            patterns = cache.stats.total_patterns,
            clustered = cache.stats.clustered_records,
            "full pattern discovery complete"
        );

        *self.cache.write() = Some(Arc::clone(&cache));
        if let Err(e) = self.persist(&cache) {
            warn!("failed to persist pattern cache: {e}");
        }
        self.retag(&cache, &embedded)?;
        Ok(())
    }

    /// Rewrites the denormalized `pattern_ids`/`pattern_tags` fields on the
    /// given records from the cache, rebuilt rather than patched in place.
    fn retag(&self, cache: &PatternCache, ids: &[RecordId]) -> Result<(), PatternError> {
        for id in ids {
            let Some(mut record) = self.records.get(id)? else {
                continue;
            };
            let (pattern_ids, pattern_tags) = memberships(cache, id);
            if record.pattern_ids != pattern_ids || record.pattern_tags != pattern_tags {
                record.pattern_ids = pattern_ids;
                record.pattern_tags = pattern_tags;
                self.records.update(record)?;
            }
        }
        Ok(())
    }

    /// Serves the cache, running full discovery first when it is missing or
    /// stale. A refresh failure over an existing (stale) cache is logged and
    /// the stale data served rather than erroring the read.
    fn fresh_cache(&self) -> Result<Arc<PatternCache>, PatternError> {
        let current = self.cache.read().clone();
        let stale = current
            .as_ref()
            .is_none_or(|c| c.is_stale(self.settings.max_cache_age, Utc::now()));
        if stale {
            if let Err(e) = self.refresh_patterns() {
                match current {
                    Some(cache) => {
                        warn!("pattern refresh failed, serving stale cache: {e}");
                        return Ok(cache);
                    }
                    None => return Err(e),
                }
            }
        }
        self.cache
            .read()
            .clone()
            .ok_or_else(|| PatternError::DiscoveryFailed {
                reason: "no cache available after discovery".to_string(),
            })
    }

    fn load_snapshot(&self) -> Option<PatternCache> {
        let path = self.settings.cache_path.as_ref()?;
        if !path.exists() {
            return None;
        }
        match fs::read(path).map_err(PatternError::from).and_then(|bytes| {
            serde_json::from_slice::<PatternCache>(&bytes).map_err(PatternError::from)
        }) {
            Ok(cache) => Some(cache),
            Err(e) => {
                warn!(path = %path.display(), "ignoring unreadable pattern cache: {e}");
                None
            }
        }
    }

    /// Serializes to a buffer first so no lock is held across disk I/O.
    fn persist(&self, cache: &PatternCache) -> Result<(), PatternError> {
        let Some(path) = self.settings.cache_path.as_ref() else {
            return Ok(());
        };
        let buffer = serde_json::to_vec_pretty(cache)?;
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::write(path, buffer)?;
        debug!(path = %path.display(), "pattern cache persisted");
        Ok(())
    }
}

/// Pattern ids and human-readable tags for one record, walked from the
/// forest and quality clusters.
fn memberships(cache: &PatternCache, id: &RecordId) -> (Vec<String>, Vec<String>) {
    fn walk(node: &NavigablePattern, id: &RecordId, ids: &mut Vec<String>, tags: &mut Vec<String>) {
        if node.experience_ids.contains(id) {
            ids.push(node.id.clone());
            tags.push(node.name.clone());
        }
        for child in &node.children {
            walk(child, id, ids, tags);
        }
    }

    let mut ids = Vec::new();
    let mut tags = Vec::new();
    for pattern in &cache.patterns {
        walk(pattern, id, &mut ids, &mut tags);
    }
    for cluster in &cache.quality_patterns {
        if cluster.experience_ids.contains(id) {
            tags.push(cluster.cluster_name.clone());
        }
    }
    (ids, tags)
}
