//! Core data model for experience records.
//!
//! An [`ExperienceRecord`] is a short free-text entry tagged with
//! phenomenological qualities along seven fixed dimensions. Records carry an
//! optional embedding vector and denormalized pattern membership fields that
//! are rebuilt wholesale by the pattern manager, never mutated in place.

pub mod qualities;
pub mod store;

pub use qualities::{NormalizedQualities, NormalizedQuality, QualityRepresentation, QualityValue};
pub use store::{MemoryRecordStore, RecordStore, RecordStoreError};

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Type-safe wrapper for record identifiers.
///
/// Identifiers are opaque strings assigned by the record-storage layer
/// (e.g. `exp_1718476800_a3f9`). The engine never parses them.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RecordId(String);

impl RecordId {
    /// Creates a new `RecordId` from any string-like value.
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Returns the identifier as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for RecordId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for RecordId {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

/// The seven experiential quality dimensions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Dimension {
    Embodied,
    Focus,
    Mood,
    Purpose,
    Space,
    Time,
    Presence,
}

impl Dimension {
    /// All dimensions in canonical order.
    pub const ALL: [Dimension; 7] = [
        Dimension::Embodied,
        Dimension::Focus,
        Dimension::Mood,
        Dimension::Purpose,
        Dimension::Space,
        Dimension::Time,
        Dimension::Presence,
    ];

    /// Returns the lowercase name used in filter specs and quality tokens.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Dimension::Embodied => "embodied",
            Dimension::Focus => "focus",
            Dimension::Mood => "mood",
            Dimension::Purpose => "purpose",
            Dimension::Space => "space",
            Dimension::Time => "time",
            Dimension::Presence => "presence",
        }
    }
}

impl fmt::Display for Dimension {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Dimension {
    type Err = UnknownDimension;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "embodied" => Ok(Dimension::Embodied),
            "focus" => Ok(Dimension::Focus),
            "mood" => Ok(Dimension::Mood),
            "purpose" => Ok(Dimension::Purpose),
            "space" => Ok(Dimension::Space),
            "time" => Ok(Dimension::Time),
            "presence" => Ok(Dimension::Presence),
            other => Err(UnknownDimension(other.to_string())),
        }
    }
}

/// Error returned when a string does not name one of the seven dimensions.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown quality dimension: '{0}'")]
pub struct UnknownDimension(pub String);

/// Narrative perspective of a record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Perspective {
    First,
    Second,
    Third,
    Plural,
}

/// When the record was processed relative to the experience itself.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Processing {
    During,
    RightAfter,
    LongAfter,
    Crafted,
}

/// A single experiential memory entry.
///
/// Identity is immutable once captured; content and qualities change only
/// through an explicit reconsider operation. The `pattern_ids` /
/// `pattern_tags` fields are a denormalized cache owned by the pattern
/// manager.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExperienceRecord {
    pub id: RecordId,

    /// Free-text content of the experience.
    pub source: String,

    /// System capture time.
    pub created: DateTime<Utc>,

    /// Claimed time of the experience, free-form ("yesterday morning").
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub occurred: Option<String>,

    /// Who had the experience.
    #[serde(alias = "experiencer")]
    pub who: String,

    pub perspective: Perspective,
    pub processing: Processing,

    #[serde(default)]
    pub qualities: QualityRepresentation,

    /// 384-float embedding of `source`, when one has been generated.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub embedding: Option<Vec<f32>>,

    /// Records this entry synthesizes; presence marks a pattern realization.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reflects: Option<Vec<RecordId>>,

    /// Pattern memberships, rebuilt on every discovery pass.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub pattern_ids: Vec<String>,

    /// Human-readable pattern names matching `pattern_ids`.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub pattern_tags: Vec<String>,
}

impl ExperienceRecord {
    /// Creates a record with the given identity and content, captured now.
    pub fn new(id: impl Into<RecordId>, source: impl Into<String>, who: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            source: source.into(),
            created: Utc::now(),
            occurred: None,
            who: who.into(),
            perspective: Perspective::First,
            processing: Processing::During,
            qualities: QualityRepresentation::default(),
            embedding: None,
            reflects: None,
            pattern_ids: Vec::new(),
            pattern_tags: Vec::new(),
        }
    }

    /// Whether this record synthesizes other records into a noticed pattern.
    #[must_use]
    pub fn is_pattern_realization(&self) -> bool {
        self.reflects.as_ref().is_some_and(|r| !r.is_empty())
    }

    /// True when the record carries an embedding of the expected dimension
    /// that is not all-zero. An all-zero vector means "not embedded" and is
    /// excluded from clustering.
    #[must_use]
    pub fn has_valid_embedding(&self, dimension: usize) -> bool {
        self.embedding
            .as_ref()
            .is_some_and(|v| v.len() == dimension && v.iter().any(|x| *x != 0.0))
    }

    /// Canonical view of the qualities, independent of representation.
    #[must_use]
    pub fn normalized_qualities(&self) -> NormalizedQualities {
        self.qualities.normalize()
    }
}

impl From<String> for RecordId {
    fn from(value: String) -> Self {
        Self(value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_dimension_round_trip() {
        for dim in Dimension::ALL {
            let parsed: Dimension = dim.as_str().parse().unwrap();
            assert_eq!(parsed, dim);
        }
        assert!("weather".parse::<Dimension>().is_err());
    }

    #[test]
    fn test_record_serde_accepts_experiencer_alias() {
        let json = r#"{
            "id": "exp_1",
            "source": "watching rain on the window",
            "created": "2026-08-01T10:00:00Z",
            "experiencer": "claude",
            "perspective": "first",
            "processing": "during",
            "qualities": ["mood.open", "space.here"]
        }"#;
        let record: ExperienceRecord = serde_json::from_str(json).unwrap();
        assert_eq!(record.who, "claude");
        assert!(record.normalized_qualities().is_present(Dimension::Mood));
    }

    #[test]
    fn test_valid_embedding_rules() {
        let mut record = ExperienceRecord::new("exp_1", "text", "claude");
        assert!(!record.has_valid_embedding(4));

        record.embedding = Some(vec![0.0; 4]);
        assert!(!record.has_valid_embedding(4), "zero vector is not embedded");

        record.embedding = Some(vec![0.1, 0.2, 0.3]);
        assert!(!record.has_valid_embedding(4), "wrong dimension");

        record.embedding = Some(vec![0.1, 0.2, 0.3, 0.4]);
        assert!(record.has_valid_embedding(4));
    }

    #[test]
    fn test_pattern_realization() {
        let mut record = ExperienceRecord::new("exp_2", "a pattern I noticed", "claude");
        assert!(!record.is_pattern_realization());
        record.reflects = Some(vec![RecordId::from("exp_1")]);
        assert!(record.is_pattern_realization());
    }
}
