//! Keyword pattern sets for matching legacy free-text quality sentences.
//!
//! Older records carry prose instead of subtype tokens ("mind wandering
//! through old conversations" rather than `embodied.thinking`). Each known
//! `dimension.subtype` pair maps to a set of indicator phrases; a filter
//! value matches a prose sentence when any indicator appears in it.

use crate::record::Dimension;

/// Returns the indicator phrases for a `dimension.subtype` pair, if the
/// subtype is one of the known refinements.
#[must_use]
pub fn patterns(dimension: Dimension, subtype: &str) -> Option<&'static [&'static str]> {
    let set: &'static [&'static str] = match (dimension, subtype) {
        (Dimension::Embodied, "thinking") => &[
            "thinking",
            "mind processes",
            "analytically",
            "mental",
            "reasoning",
            "in my head",
            "cognitive",
        ],
        (Dimension::Embodied, "sensing") => &[
            "sensing",
            "body",
            "physical",
            "felt sense",
            "visceral",
            "breath",
            "tension",
        ],
        (Dimension::Focus, "narrow") => &[
            "narrow",
            "single point",
            "zeroed in",
            "locked on",
            "tunnel",
            "concentrated",
        ],
        (Dimension::Focus, "broad") => &[
            "broad",
            "taking in everything",
            "panoramic",
            "wide open",
            "diffuse",
            "scanning",
        ],
        (Dimension::Mood, "open") => &[
            "open",
            "curious",
            "receptive",
            "expansive",
            "welcoming",
            "light",
        ],
        (Dimension::Mood, "closed") => &[
            "closed",
            "defensive",
            "guarded",
            "shut down",
            "contracted",
            "tight",
        ],
        (Dimension::Purpose, "goal") => &[
            "goal",
            "pushing toward",
            "directed",
            "on a mission",
            "deliberate",
            "working toward",
        ],
        (Dimension::Purpose, "wander") => &[
            "wander",
            "drifting",
            "exploring",
            "no particular aim",
            "meandering",
            "aimless",
        ],
        (Dimension::Space, "here") => &[
            "here",
            "right here",
            "present in this place",
            "this room",
            "grounded",
        ],
        (Dimension::Space, "there") => &[
            "there",
            "somewhere else",
            "far away",
            "elsewhere",
            "another place",
        ],
        (Dimension::Time, "past") => &[
            "past",
            "remembering",
            "memory",
            "looking back",
            "nostalgia",
            "used to",
        ],
        (Dimension::Time, "future") => &[
            "future",
            "anticipating",
            "planning",
            "looking ahead",
            "what comes next",
            "will be",
        ],
        (Dimension::Presence, "individual") => &[
            "individual",
            "alone",
            "by myself",
            "solitary",
            "just me",
        ],
        (Dimension::Presence, "collective") => &[
            "collective",
            "together",
            "with others",
            "shared",
            "we were",
            "us",
        ],
        _ => return None,
    };
    Some(set)
}

/// Whether a prose sentence matches a filter value for the given dimension.
///
/// Tries the indicator set for the known subtype first, then falls back to a
/// plain substring check so novel filter values still match literal prose.
#[must_use]
pub fn prose_matches(dimension: Dimension, prose: &str, value: &str) -> bool {
    let prose_lower = prose.to_lowercase();
    let value_lower = value.to_lowercase();

    if let Some(indicators) = patterns(dimension, &value_lower)
        && indicators.iter().any(|kw| prose_lower.contains(kw))
    {
        return true;
    }
    prose_lower.contains(&value_lower)
}
