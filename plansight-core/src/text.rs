//! Marker-text parsing: the marker regex, normalization, edit distance and
//! fuzzy sheet matching shared by the OCR prefilter and the LLM validator.

use std::sync::LazyLock;

use regex::Regex;

/// The canonical marker shape: `detail / sheet`, where the detail is one or
/// two digits or the letter `N`, and the sheet starts with a letter.
static MARKER_RE: LazyLock<Regex> = LazyLock::new(|| {
    #[allow(clippy::unwrap_used)]
    Regex::new(r"(?i)^([0-9]{1,2}|N)\s*/\s*([A-Z][A-Z0-9.\-]*)$").unwrap()
});

/// Looser separator tolerance for recovering markers from free-form model
/// output (slash misread as dash/underscore/em-dash).
static LOOSE_MARKER_RE: LazyLock<Regex> = LazyLock::new(|| {
    #[allow(clippy::unwrap_used)]
    Regex::new(r"(\d+|N)\s*[/_—–-]\s*([A-Z0-9.\-]+)").unwrap()
});

/// Text that frequently sits inside circles on drawings but never is a
/// callout: legends, scales, north arrows, title blocks.
const FALSE_POSITIVE_KEYWORDS: &[&str] = &[
    "SCALE",
    "PLAN",
    "ELEVATION",
    "SECTION",
    "DETAIL",
    "NOTES",
    "LEGEND",
    "TITLE",
    "DATE",
    "DRAWN",
    "SHEET",
    "NORTH",
    "SOUTH",
    "EAST",
    "WEST",
    "GENERAL",
    "ARCHITECTURAL",
    "STRUCTURAL",
    "FLOOR",
    "ROOF",
    "FOUNDATION",
    "WALL",
];

/// A `detail`/`sheet` pair parsed out of marker text, upper-cased.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParsedMarker {
    /// Left of the slash.
    pub detail: String,
    /// Right of the slash.
    pub sheet: String,
}

/// Upper-cases and strips whitespace so `" 3 / a7"` and `3/A7` compare equal.
#[must_use]
pub fn normalize(text: &str) -> String {
    text.chars()
        .filter(|c| !c.is_whitespace())
        .collect::<String>()
        .to_uppercase()
}

/// Parses text against the strict marker shape.
#[must_use]
pub fn parse_marker(text: &str) -> Option<ParsedMarker> {
    let caps = MARKER_RE.captures(text.trim())?;
    Some(ParsedMarker {
        detail: caps[1].to_uppercase(),
        sheet: caps[2].to_uppercase(),
    })
}

/// Finds every loosely-shaped marker in free-form text. Used by the
/// regex fallback when the model's JSON cannot be parsed.
#[must_use]
pub fn find_loose_markers(text: &str) -> Vec<ParsedMarker> {
    LOOSE_MARKER_RE
        .captures_iter(&text.to_uppercase())
        .map(|caps| ParsedMarker {
            detail: caps[1].to_string(),
            sheet: caps[2].to_string(),
        })
        .collect()
}

/// True when OCR text matches a known non-marker pattern: a keyword, an
/// implausible length, or too much punctuation.
#[must_use]
pub fn is_false_positive(text: &str) -> bool {
    if FALSE_POSITIVE_KEYWORDS.iter().any(|kw| text.contains(kw)) {
        return true;
    }
    if text.len() > 20 {
        return true;
    }
    let specials = text
        .chars()
        .filter(|c| !c.is_alphanumeric() && *c != '/')
        .count();
    specials > 3
}

/// Classical Levenshtein edit distance, unweighted.
#[must_use]
pub fn levenshtein(a: &str, b: &str) -> usize {
    let a: Vec<char> = a.chars().collect();
    let b: Vec<char> = b.chars().collect();
    if a.is_empty() {
        return b.len();
    }
    if b.is_empty() {
        return a.len();
    }

    let mut previous: Vec<usize> = (0..=b.len()).collect();
    let mut current = vec![0; b.len() + 1];
    for (i, ca) in a.iter().enumerate() {
        current[0] = i + 1;
        for (j, cb) in b.iter().enumerate() {
            let substitution = previous[j] + usize::from(ca != cb);
            current[j + 1] = substitution.min(previous[j + 1] + 1).min(current[j] + 1);
        }
        std::mem::swap(&mut previous, &mut current);
    }
    previous[b.len()]
}

/// Result of matching a sheet reading against the project sheet list.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SheetMatch {
    /// The canonical sheet name to use.
    pub sheet: String,
    /// Edit distance from the reading to the canonical name.
    pub distance: usize,
}

/// Finds the closest sheet within `max_distance` edits, preferring exact
/// matches. Ties at the same distance resolve to the lexicographically
/// first sheet (the list is ordered), keeping runs deterministic.
#[must_use]
pub fn fuzzy_match_sheet<'a, I>(sheet: &str, valid_sheets: I, max_distance: usize) -> Option<SheetMatch>
where
    I: IntoIterator<Item = &'a String>,
{
    let sheet = sheet.to_uppercase();
    let mut best: Option<SheetMatch> = None;
    for candidate in valid_sheets {
        let distance = levenshtein(&sheet, &candidate.to_uppercase());
        if distance > max_distance {
            continue;
        }
        if best.as_ref().is_none_or(|b| distance < b.distance) {
            best = Some(SheetMatch {
                sheet: candidate.clone(),
                distance,
            });
            if distance == 0 {
                break;
            }
        }
    }
    best
}
