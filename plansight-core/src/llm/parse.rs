//! Interpreting model responses: JSON first, loose regex recovery second,
//! then fuzzy sheet matching against the project context.

use serde::Deserialize;

use crate::markers::{MarkerKind, ProjectContext};
use crate::text::{find_loose_markers, fuzzy_match_sheet};

/// Maximum edit distance Stage 2 will correct a sheet reading by.
const FUZZY_DISTANCE: usize = 2;

/// Confidence of markers recovered by the regex fallback.
const FALLBACK_CONFIDENCE: f64 = 0.6;

/// Ceiling applied to markers whose sheet is not in the project list.
const UNKNOWN_SHEET_CONFIDENCE_CAP: f64 = 0.5;

/// A validated reading, not yet tied to a candidate bbox.
#[derive(Debug, Clone, PartialEq)]
pub struct PendingMarker {
    /// Left of the slash.
    pub detail: String,
    /// Canonical (possibly fuzzy-corrected) sheet.
    pub sheet: String,
    /// Marker kind as the model reported it.
    pub kind: MarkerKind,
    /// Confidence after the unknown-sheet cap.
    pub confidence: f64,
    /// Whether the sheet exists in the project list.
    pub is_valid: bool,
    /// Whether the sheet was corrected from a near-miss.
    pub fuzzy_matched: bool,
    /// The uncorrected reading, when fuzzy matched.
    pub original_sheet: Option<String>,
    /// Correction distance, when fuzzy matched.
    pub edit_distance: Option<usize>,
}

/// One element of the model's JSON array.
#[derive(Debug, Deserialize)]
struct RawMarker {
    #[serde(default)]
    detail: String,
    #[serde(default)]
    sheet: String,
    #[serde(default, rename = "type")]
    kind: Option<String>,
    #[serde(default)]
    confidence: Option<f64>,
    #[serde(default)]
    is_valid: Option<bool>,
    #[serde(default)]
    fuzzy_matched: Option<bool>,
}

/// Parses a model response into pending markers.
///
/// Strips markdown code fences, tries strict JSON, and falls back to a
/// loose `detail/sheet` regex sweep over the raw text when the JSON is
/// unusable. Fallback markers come out at low confidence with kind
/// `Unknown`.
#[must_use]
pub fn parse_response(body: &str, ctx: &ProjectContext) -> Vec<PendingMarker> {
    if let Some(markers) = parse_json(body, ctx) {
        return markers;
    }
    log::warn!("LLM response was not valid JSON, using regex fallback");
    parse_fallback(body, ctx)
}

fn parse_json(body: &str, ctx: &ProjectContext) -> Option<Vec<PendingMarker>> {
    let cleaned = strip_fences(body);
    let raw: Vec<RawMarker> = serde_json::from_str(cleaned).ok()?;

    let markers = raw
        .into_iter()
        .filter_map(|m| {
            let detail = m.detail.trim().to_uppercase();
            let sheet = m.sheet.trim().to_uppercase();
            if detail.is_empty() || sheet.is_empty() {
                return None;
            }
            let kind = match m.kind.as_deref() {
                Some(k) if k.eq_ignore_ascii_case("circular") => MarkerKind::Circular,
                Some(k) if k.eq_ignore_ascii_case("triangular") => MarkerKind::Triangular,
                _ => MarkerKind::Unknown,
            };
            let confidence = m.confidence.unwrap_or(0.8).clamp(0.0, 1.0);
            Some(resolve_sheet(
                detail,
                sheet,
                kind,
                confidence,
                m.is_valid.unwrap_or(true),
                m.fuzzy_matched.unwrap_or(false),
                ctx,
            ))
        })
        .collect();
    Some(markers)
}

fn parse_fallback(body: &str, ctx: &ProjectContext) -> Vec<PendingMarker> {
    find_loose_markers(body)
        .into_iter()
        .filter_map(|m| {
            let pending = resolve_sheet(
                m.detail,
                m.sheet,
                MarkerKind::Unknown,
                FALLBACK_CONFIDENCE,
                true,
                false,
                ctx,
            );
            // regex recovery keeps only sheets the project recognizes
            (ctx.valid_sheets.is_empty() || pending.is_valid).then_some(pending)
        })
        .collect()
}

/// Applies fuzzy sheet matching and the unknown-sheet confidence cap.
fn resolve_sheet(
    detail: String,
    sheet: String,
    kind: MarkerKind,
    confidence: f64,
    llm_is_valid: bool,
    llm_fuzzy: bool,
    ctx: &ProjectContext,
) -> PendingMarker {
    if ctx.valid_sheets.is_empty() {
        return PendingMarker {
            detail,
            sheet,
            kind,
            confidence,
            is_valid: llm_is_valid,
            fuzzy_matched: llm_fuzzy,
            original_sheet: None,
            edit_distance: None,
        };
    }

    match fuzzy_match_sheet(&sheet, &ctx.valid_sheets, FUZZY_DISTANCE) {
        // an exact match can still be a correction the model made itself
        // while reading the crop; keep its flag in that case
        Some(m) if m.distance == 0 => PendingMarker {
            detail,
            sheet: m.sheet,
            kind,
            confidence,
            is_valid: true,
            fuzzy_matched: llm_fuzzy,
            original_sheet: None,
            edit_distance: None,
        },
        Some(m) => PendingMarker {
            detail,
            sheet: m.sheet,
            kind,
            confidence,
            is_valid: true,
            fuzzy_matched: true,
            original_sheet: Some(sheet),
            edit_distance: Some(m.distance),
        },
        None => PendingMarker {
            detail,
            sheet,
            kind,
            confidence: confidence.min(UNKNOWN_SHEET_CONFIDENCE_CAP),
            is_valid: false,
            fuzzy_matched: false,
            original_sheet: None,
            edit_distance: None,
        },
    }
}

/// Removes a surrounding ```/```json fence if present.
fn strip_fences(body: &str) -> &str {
    let trimmed = body.trim();
    let Some(rest) = trimmed.strip_prefix("```") else {
        return trimmed;
    };
    let rest = rest.strip_prefix("json").unwrap_or(rest);
    let rest = rest.strip_suffix("```").unwrap_or(rest);
    rest.trim()
}
