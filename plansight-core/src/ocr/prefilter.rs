//! The accept / reject / uncertain decision on OCR'd candidate text.
//!
//! The classification itself ([`classify_text`]) is a pure function of the
//! text, the OCR confidence and the project context, so its behavior is a
//! fixed decision table rather than engine-dependent.

use std::sync::Arc;

use image::imageops::FilterType;
use image::GrayImage;
use imageproc::contrast::adaptive_threshold;
use log::trace;

use crate::markers::{Candidate, Classification, ProjectContext};
use crate::text::{fuzzy_match_sheet, is_false_positive, parse_marker};

use super::{OcrEngine, OcrRead};

/// Padding added around a candidate box before cropping for OCR.
pub const OCR_CROP_PADDING: f64 = 0.20;

/// OCR confidence below which the text is too unreliable to act on.
const MIN_ACTIONABLE_CONFIDENCE: f64 = 0.3;

/// Confidence at which a non-matching or unknown-sheet reading is a
/// confident rejection rather than a possible OCR slip.
const CONFIDENT_REJECT: f64 = 0.7;

/// Sheets this close to a known sheet are treated as possible OCR errors.
const NEAR_MISS_DISTANCE: usize = 1;

/// Minimum crop height handed to OCR engines; smaller crops are upscaled.
const MIN_OCR_HEIGHT: u32 = 32;

/// Stage 1.5 verdict plus what OCR actually read.
#[derive(Debug, Clone, PartialEq)]
pub struct PrefilterOutcome {
    /// The classification the decision table produced.
    pub classification: Classification,
    /// The OCR reading, absent when the crop was empty or OCR failed.
    pub read: Option<OcrRead>,
}

/// Crops the candidate region with [`OCR_CROP_PADDING`], clamped to tile
/// bounds. `None` when nothing of the box lies inside the tile.
#[must_use]
pub fn crop_for_ocr(tile: &GrayImage, candidate: &Candidate) -> Option<GrayImage> {
    let padded = candidate.bbox.pad(OCR_CROP_PADDING);
    let clipped = padded.clamp_to(tile.width(), tile.height())?;
    if clipped.area() == 0 {
        return None;
    }
    Some(
        image::imageops::crop_imm(
            tile,
            clipped.x as u32,
            clipped.y as u32,
            clipped.w,
            clipped.h,
        )
        .to_image(),
    )
}

/// Standardizes a crop for OCR: binarize against the local mean and upscale
/// small crops to [`MIN_OCR_HEIGHT`] with cubic interpolation.
#[must_use]
pub fn preprocess_for_ocr(crop: &GrayImage) -> GrayImage {
    // local-mean binarization leaves text dark on a light background
    let binary = adaptive_threshold(crop, 5);

    if binary.height() >= MIN_OCR_HEIGHT {
        return binary;
    }
    let scale = f64::from(MIN_OCR_HEIGHT) / f64::from(binary.height().max(1));
    let new_width = ((f64::from(binary.width()) * scale) as u32).max(1);
    image::imageops::resize(&binary, new_width, MIN_OCR_HEIGHT, FilterType::CatmullRom)
}

/// The Stage 1.5 decision table.
///
/// Pure and total in `(text, ocr_confidence, ctx, accept_threshold)`;
/// conditions are checked in order and the first hit wins.
#[must_use]
pub fn classify_text(
    text: &str,
    ocr_confidence: f64,
    ctx: &ProjectContext,
    accept_threshold: f64,
) -> Classification {
    let text = text.trim().to_uppercase();

    if ocr_confidence < MIN_ACTIONABLE_CONFIDENCE {
        return Classification::Uncertain;
    }
    if text.chars().count() <= 1 {
        return Classification::Reject;
    }
    if is_false_positive(&text) {
        return Classification::Reject;
    }

    let Some(marker) = parse_marker(&text) else {
        return if ocr_confidence >= CONFIDENT_REJECT {
            Classification::Reject
        } else {
            Classification::Uncertain
        };
    };

    if !ctx.is_valid_detail(&marker.detail) {
        return if ocr_confidence >= CONFIDENT_REJECT {
            Classification::Reject
        } else {
            Classification::Uncertain
        };
    }

    if ctx.valid_sheets.is_empty() {
        // no sheet list: pattern match and confidence are all we have
        return if ocr_confidence >= accept_threshold {
            Classification::Accept
        } else {
            Classification::Uncertain
        };
    }

    if ctx.valid_sheets.contains(&marker.sheet) {
        return if ocr_confidence >= accept_threshold {
            Classification::Accept
        } else {
            Classification::Uncertain
        };
    }

    if fuzzy_match_sheet(&marker.sheet, &ctx.valid_sheets, NEAR_MISS_DISTANCE).is_some() {
        return Classification::Uncertain;
    }

    if ocr_confidence >= CONFIDENT_REJECT {
        Classification::Reject
    } else {
        Classification::Uncertain
    }
}

/// Runs OCR + the decision table over candidates of one tile.
#[derive(Clone)]
pub struct Prefilter {
    engine: Option<Arc<dyn OcrEngine>>,
    accept_threshold: f64,
}

impl std::fmt::Debug for Prefilter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Prefilter")
            .field("engine", &self.engine.as_ref().map(|e| e.name().to_string()))
            .field("accept_threshold", &self.accept_threshold)
            .finish()
    }
}

impl Prefilter {
    /// Creates a prefilter; `engine: None` disables Stage 1.5 entirely.
    #[must_use]
    pub fn new(engine: Option<Arc<dyn OcrEngine>>, accept_threshold: f64) -> Self {
        Self {
            engine,
            accept_threshold,
        }
    }

    /// True when an OCR engine is configured.
    #[must_use]
    pub fn is_enabled(&self) -> bool {
        self.engine.is_some()
    }

    /// Classifies one candidate against its tile.
    ///
    /// Without an engine everything is `Uncertain` (Stage 2 decides);
    /// empty crops and OCR failures are likewise `Uncertain` rather than
    /// silently dropped.
    #[must_use]
    pub fn classify_candidate(&self, tile: &GrayImage, candidate: &Candidate, ctx: &ProjectContext) -> PrefilterOutcome {
        let Some(engine) = &self.engine else {
            return PrefilterOutcome {
                classification: Classification::Uncertain,
                read: None,
            };
        };

        let Some(crop) = crop_for_ocr(tile, candidate) else {
            return PrefilterOutcome {
                classification: Classification::Uncertain,
                read: None,
            };
        };
        let prepared = preprocess_for_ocr(&crop);

        match engine.recognize(&prepared) {
            Ok(read) => {
                let classification =
                    classify_text(&read.text, read.confidence, ctx, self.accept_threshold);
                trace!(
                    "prefilter[{}]: {:?} (conf {:.2}) -> {classification:?}",
                    engine.name(),
                    read.text,
                    read.confidence
                );
                PrefilterOutcome {
                    classification,
                    read: Some(read),
                }
            }
            Err(e) => {
                log::warn!("OCR failed on candidate in {}: {e}", candidate.source_tile);
                PrefilterOutcome {
                    classification: Classification::Uncertain,
                    read: None,
                }
            }
        }
    }
}
