//! Polymorphic quality representations and their canonical normalization.
//!
//! Records tag qualities in one of two shapes: a legacy map of dimension to
//! mixed value (`false`, `true`, a subtype token, or a free-text sentence),
//! or a newer flat list of `"dimension"` / `"dimension.subtype"` tokens.
//! [`QualityRepresentation::normalize`] is the single place that branches on
//! the shape; everything downstream works on [`NormalizedQualities`].

use std::collections::{BTreeMap, BTreeSet};

use serde::de::Deserializer;
use serde::ser::Serializer;
use serde::{Deserialize, Serialize};

use super::Dimension;

/// A legacy per-dimension quality value.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum QualityValue {
    /// `false`: the dimension is explicitly absent.
    Absent,
    /// `true`: present without further refinement.
    General,
    /// A subtype token (`"open"`) or a free-text sentence
    /// (`"mind wandering through old conversations"`).
    Detail(String),
}

impl QualityValue {
    /// A `Detail` string with whitespace is prose rather than a subtype token.
    #[must_use]
    pub fn is_prose(&self) -> bool {
        matches!(self, QualityValue::Detail(s) if s.trim().contains(char::is_whitespace))
    }
}

impl Serialize for QualityValue {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            QualityValue::Absent => serializer.serialize_bool(false),
            QualityValue::General => serializer.serialize_bool(true),
            QualityValue::Detail(s) => serializer.serialize_str(s),
        }
    }
}

impl<'de> Deserialize<'de> for QualityValue {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        #[derive(Deserialize)]
        #[serde(untagged)]
        enum Raw {
            Flag(bool),
            Text(String),
        }
        Ok(match Raw::deserialize(deserializer)? {
            Raw::Flag(false) => QualityValue::Absent,
            Raw::Flag(true) => QualityValue::General,
            Raw::Text(s) => QualityValue::Detail(s),
        })
    }
}

/// The two wire shapes a record's qualities may take.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum QualityRepresentation {
    /// Flat token list: `["mood.open", "space"]`.
    Tokens(Vec<String>),
    /// Legacy map: `{"mood": "open", "focus": true, "space": false}`.
    Legacy(BTreeMap<Dimension, QualityValue>),
}

impl Default for QualityRepresentation {
    fn default() -> Self {
        QualityRepresentation::Tokens(Vec::new())
    }
}

impl QualityRepresentation {
    /// Builds the flat-token shape from `"dimension"` / `"dimension.subtype"`
    /// strings.
    pub fn from_tokens<I, S>(tokens: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        QualityRepresentation::Tokens(tokens.into_iter().map(Into::into).collect())
    }

    /// Produces the canonical per-dimension view.
    ///
    /// Tokens naming unknown dimensions and legacy `Absent` entries are
    /// dropped. Prose sentences are kept verbatim for keyword matching.
    #[must_use]
    pub fn normalize(&self) -> NormalizedQualities {
        let mut entries: BTreeMap<Dimension, NormalizedQuality> = BTreeMap::new();

        match self {
            QualityRepresentation::Tokens(tokens) => {
                for token in tokens {
                    let (dim_part, subtype) = match token.split_once('.') {
                        Some((d, s)) => (d, Some(s)),
                        None => (token.as_str(), None),
                    };
                    let Ok(dimension) = dim_part.parse::<Dimension>() else {
                        continue;
                    };
                    let entry = entries.entry(dimension).or_default();
                    match subtype {
                        Some(s) if !s.is_empty() => {
                            entry.subtypes.insert(s.to_lowercase());
                        }
                        _ => entry.general = true,
                    }
                }
            }
            QualityRepresentation::Legacy(map) => {
                for (dimension, value) in map {
                    match value {
                        QualityValue::Absent => {}
                        QualityValue::General => {
                            entries.entry(*dimension).or_default().general = true;
                        }
                        QualityValue::Detail(s) => {
                            let entry = entries.entry(*dimension).or_default();
                            if value.is_prose() {
                                entry.prose = Some(s.clone());
                            } else {
                                entry.subtypes.insert(s.to_lowercase());
                            }
                        }
                    }
                }
            }
        }

        NormalizedQualities { entries }
    }
}

/// Canonical value for one dimension after normalization.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct NormalizedQuality {
    /// Present without a subtype (`true` or a bare `"mood"` token).
    pub general: bool,
    /// Subtype tokens, lowercased.
    pub subtypes: BTreeSet<String>,
    /// Legacy free-text sentence, kept verbatim.
    pub prose: Option<String>,
}

impl NormalizedQuality {
    /// A quality counts as present when it carries any value at all.
    #[must_use]
    pub fn is_present(&self) -> bool {
        self.general || !self.subtypes.is_empty() || self.prose.is_some()
    }
}

/// Canonical view of a record's qualities, keyed by dimension.
///
/// Absent dimensions have no entry.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct NormalizedQualities {
    entries: BTreeMap<Dimension, NormalizedQuality>,
}

impl NormalizedQualities {
    /// Returns the normalized value for a dimension, if any.
    #[must_use]
    pub fn get(&self, dimension: Dimension) -> Option<&NormalizedQuality> {
        self.entries.get(&dimension)
    }

    /// Whether the dimension carries any non-empty value.
    #[must_use]
    pub fn is_present(&self, dimension: Dimension) -> bool {
        self.entries.get(&dimension).is_some_and(|q| q.is_present())
    }

    /// Iterates over present dimensions in canonical order.
    pub fn iter(&self) -> impl Iterator<Item = (Dimension, &NormalizedQuality)> {
        self.entries.iter().map(|(d, q)| (*d, q))
    }
}
