//! Configuration via layered sources.
//!
//! Priority (highest to lowest):
//! 1. Environment variables prefixed `ANIMA_`
//! 2. The settings file (`settings.toml` in the data directory)
//! 3. Built-in defaults
//!
//! Nested keys in environment variables use a double underscore:
//! - `ANIMA_PATTERNS__BATCH_THRESHOLD=20` sets `patterns.batch_threshold`
//! - `ANIMA_SEMANTIC__DEFAULT_THRESHOLD=0.5` sets `semantic.default_threshold`

use std::path::PathBuf;

use figment::{
    Figment,
    providers::{Env, Format, Serialized, Toml},
};
use serde::{Deserialize, Serialize};

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct Settings {
    /// Directory holding snapshots (vectors, pattern cache)
    #[serde(default = "default_data_path")]
    pub data_path: PathBuf,

    /// Enable debug output
    #[serde(default)]
    pub debug: bool,

    #[serde(default)]
    pub semantic: SemanticConfig,

    #[serde(default)]
    pub patterns: PatternConfig,

    #[serde(default)]
    pub recall: RecallConfig,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct SemanticConfig {
    /// Embedding vector dimension; must match the model's output
    #[serde(default = "default_dimension")]
    pub dimension: usize,

    /// Minimum similarity for semantic recall matches
    #[serde(default = "default_semantic_threshold")]
    pub default_threshold: f32,

    /// Embedding model identifier
    #[serde(default = "default_model")]
    pub model: String,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct PatternConfig {
    /// Minimum cosine similarity for cluster membership
    #[serde(default = "default_similarity_threshold")]
    pub similarity_threshold: f32,

    /// Clusters smaller than this are discarded
    #[serde(default = "default_min_cluster_size")]
    pub min_cluster_size: usize,

    /// Maximum pattern tree depth
    #[serde(default = "default_max_depth")]
    pub max_depth: usize,

    /// Build per-dimension quality clusters
    #[serde(default = "default_true")]
    pub quality_analysis: bool,

    /// Cache older than this forces full rediscovery
    #[serde(default = "default_cache_max_age_hours")]
    pub cache_max_age_hours: u64,

    /// Quiet period before a pending incremental update runs
    #[serde(default = "default_debounce_ms")]
    pub debounce_ms: u64,

    /// Pending-set size that forces an immediate update
    #[serde(default = "default_batch_threshold")]
    pub batch_threshold: usize,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct RecallConfig {
    /// Result count when the query does not specify one
    #[serde(default = "default_limit")]
    pub default_limit: usize,

    /// Minimum candidate pool fetched before pagination
    #[serde(default = "default_overfetch_floor")]
    pub overfetch_floor: usize,
}

fn default_data_path() -> PathBuf {
    PathBuf::from(".anima")
}

fn default_dimension() -> usize {
    384
}

fn default_semantic_threshold() -> f32 {
    0.7
}

fn default_model() -> String {
    "AllMiniLML6V2".to_string()
}

fn default_similarity_threshold() -> f32 {
    0.6
}

fn default_min_cluster_size() -> usize {
    3
}

fn default_max_depth() -> usize {
    3
}

fn default_true() -> bool {
    true
}

fn default_cache_max_age_hours() -> u64 {
    24
}

fn default_debounce_ms() -> u64 {
    5000
}

fn default_batch_threshold() -> usize {
    10
}

fn default_limit() -> usize {
    10
}

fn default_overfetch_floor() -> usize {
    100
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            data_path: default_data_path(),
            debug: false,
            semantic: SemanticConfig::default(),
            patterns: PatternConfig::default(),
            recall: RecallConfig::default(),
        }
    }
}

impl Default for SemanticConfig {
    fn default() -> Self {
        Self {
            dimension: default_dimension(),
            default_threshold: default_semantic_threshold(),
            model: default_model(),
        }
    }
}

impl Default for PatternConfig {
    fn default() -> Self {
        Self {
            similarity_threshold: default_similarity_threshold(),
            min_cluster_size: default_min_cluster_size(),
            max_depth: default_max_depth(),
            quality_analysis: default_true(),
            cache_max_age_hours: default_cache_max_age_hours(),
            debounce_ms: default_debounce_ms(),
            batch_threshold: default_batch_threshold(),
        }
    }
}

impl Default for RecallConfig {
    fn default() -> Self {
        Self {
            default_limit: default_limit(),
            overfetch_floor: default_overfetch_floor(),
        }
    }
}

impl Settings {
    /// Load configuration from defaults, `settings.toml` in the data
    /// directory, and `ANIMA_`-prefixed environment variables.
    pub fn load() -> Result<Self, Box<figment::Error>> {
        Self::load_from(default_data_path().join("settings.toml"))
    }

    /// Load configuration layering a specific file over the defaults.
    pub fn load_from(path: impl AsRef<std::path::Path>) -> Result<Self, Box<figment::Error>> {
        Figment::new()
            .merge(Serialized::defaults(Settings::default()))
            .merge(Toml::file(path))
            // Double underscore separates nesting levels, single underscore
            // stays inside a field name
            .merge(Env::prefixed("ANIMA_").map(|key| {
                key.as_str().to_lowercase().replace("__", ".").into()
            }))
            .extract()
            .map_err(Box::new)
    }

    /// Save current configuration to file
    pub fn save(
        &self,
        path: impl AsRef<std::path::Path>,
    ) -> Result<(), Box<dyn std::error::Error>> {
        let parent = path.as_ref().parent().ok_or("Invalid path")?;
        std::fs::create_dir_all(parent)?;

        let toml_string = toml::to_string_pretty(self)?;
        std::fs::write(path, toml_string)?;

        Ok(())
    }

    /// Path of the vector snapshot inside the data directory.
    #[must_use]
    pub fn vector_snapshot_path(&self) -> PathBuf {
        self.data_path.join("vectors.bin")
    }

    /// Path of the pattern cache snapshot inside the data directory.
    #[must_use]
    pub fn pattern_cache_path(&self) -> PathBuf {
        self.data_path.join("patterns.json")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    #[test]
    fn test_defaults() {
        let settings = Settings::default();
        assert_eq!(settings.semantic.dimension, 384);
        assert!((settings.semantic.default_threshold - 0.7).abs() < f32::EPSILON);
        assert!((settings.patterns.similarity_threshold - 0.6).abs() < f32::EPSILON);
        assert_eq!(settings.patterns.min_cluster_size, 3);
        assert_eq!(settings.patterns.max_depth, 3);
        assert!(settings.patterns.quality_analysis);
        assert_eq!(settings.patterns.cache_max_age_hours, 24);
        assert_eq!(settings.patterns.debounce_ms, 5000);
        assert_eq!(settings.patterns.batch_threshold, 10);
        assert_eq!(settings.recall.overfetch_floor, 100);
    }

    #[test]
    fn test_toml_layer_overrides_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("settings.toml");
        fs::write(
            &path,
            r#"
debug = true

[patterns]
batch_threshold = 20

[recall]
default_limit = 25
"#,
        )
        .unwrap();

        let settings = Settings::load_from(&path).unwrap();
        assert!(settings.debug);
        assert_eq!(settings.patterns.batch_threshold, 20);
        assert_eq!(settings.recall.default_limit, 25);
        // Untouched sections keep their defaults
        assert_eq!(settings.patterns.min_cluster_size, 3);
    }

    #[test]
    fn test_save_then_load_round_trips() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("settings.toml");

        let mut settings = Settings::default();
        settings.patterns.batch_threshold = 42;
        settings.save(&path).unwrap();

        let loaded = Settings::load_from(&path).unwrap();
        assert_eq!(loaded.patterns.batch_threshold, 42);
    }

    #[test]
    fn test_missing_file_falls_back_to_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let settings = Settings::load_from(dir.path().join("absent.toml")).unwrap();
        assert_eq!(settings.semantic.dimension, 384);
    }

    #[test]
    fn test_snapshot_paths_derive_from_data_path() {
        let settings = Settings {
            data_path: PathBuf::from("/tmp/anima"),
            ..Settings::default()
        };
        assert_eq!(
            settings.vector_snapshot_path(),
            PathBuf::from("/tmp/anima/vectors.bin")
        );
        assert_eq!(
            settings.pattern_cache_path(),
            PathBuf::from("/tmp/anima/patterns.json")
        );
    }
}
