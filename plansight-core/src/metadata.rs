//! Sheet metadata extraction from title blocks.
//!
//! Title blocks sit in a handful of standard locations (bottom-right above
//! all); each candidate region is OCR'd and parsed for a sheet number. PDF
//! rasterization is an external collaborator behind [`PageRenderer`].

use std::sync::Arc;
use std::sync::LazyLock;

use image::DynamicImage;
use log::debug;
use plansight_tile_utils::PixelRect;
use regex::Regex;
use serde::Serialize;

use crate::ocr::OcrEngine;

/// Renders one page of a PDF to a raster image.
///
/// Rasterization itself is out of scope for this crate; deployments inject
/// an implementation (pdfium, poppler, a sidecar service).
pub trait PageRenderer: Send + Sync {
    /// Renders `page` (0-based) of `pdf_bytes` at `dpi`.
    fn render(&self, pdf_bytes: &[u8], page: usize, dpi: u32) -> Result<DynamicImage, RenderError>;
}

/// Errors rendering a PDF page.
#[non_exhaustive]
#[derive(thiserror::Error, Debug)]
pub enum RenderError {
    /// The bytes are not a renderable document.
    #[error("couldn't render document: {0}")]
    Unrenderable(String),
}

/// Renderer that accepts plain raster uploads (PNG/JPEG) as "page 0".
///
/// Callers frequently send pre-rendered sheets; decoding those directly
/// keeps the endpoint useful without a PDF engine attached.
#[derive(Debug, Default, Clone, Copy)]
pub struct RasterPassthroughRenderer;

impl PageRenderer for RasterPassthroughRenderer {
    fn render(&self, pdf_bytes: &[u8], _page: usize, _dpi: u32) -> Result<DynamicImage, RenderError> {
        image::load_from_memory(pdf_bytes).map_err(|e| RenderError::Unrenderable(e.to_string()))
    }
}

/// What was read out of a sheet's title block.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SheetMetadata {
    /// The sheet code, e.g. `A7` or `S1.0`.
    pub sheet_number: String,
    /// Free-text sheet title, when one could be isolated.
    pub sheet_title: Option<String>,
    /// Extraction confidence in `[0, 1]`; 0 for the fallback.
    pub confidence: f64,
    /// How the number was obtained (`ocr`, `fallback`).
    pub method: String,
    /// Raw OCR text of the winning region, truncated.
    pub extracted_text: String,
    /// Which standard region the title block was found in.
    pub title_block_location: Option<String>,
    /// Every sheet-shaped code seen in the region (cross-reference lists).
    pub all_sheets: Vec<String>,
}

impl SheetMetadata {
    /// The synthesized answer when no title block can be read: processing
    /// continues with a placeholder number derived from the sheet id.
    #[must_use]
    pub fn fallback(sheet_id: &str) -> Self {
        let suffix = if sheet_id.len() >= 4 {
            &sheet_id[sheet_id.len() - 4..]
        } else {
            sheet_id
        };
        Self {
            sheet_number: format!("Sheet-{suffix}"),
            sheet_title: None,
            confidence: 0.0,
            method: "fallback".to_string(),
            extracted_text: String::new(),
            title_block_location: None,
            all_sheets: Vec::new(),
        }
    }
}

/// Discipline-letter sheet codes: S2, A7, M1.2, E101...
static DISCIPLINE_RE: LazyLock<Regex> = LazyLock::new(|| {
    #[allow(clippy::unwrap_used)]
    Regex::new(r"\b([SAEMPCGL]\d+(?:\.\d+)?)\b").unwrap()
});

/// Labelled sheet numbers: `SHEET NO: 7`, `DWG. NO. A-3`, `DRAWING A2`.
static LABELLED_RE: LazyLock<Regex> = LazyLock::new(|| {
    #[allow(clippy::unwrap_used)]
    Regex::new(r"(?i)(?:SHEET|DWG\.?|DRAWING)\s*(?:NO\.?)?\s*[:#]?\s*([A-Z]?\d+(?:\.\d+)?)").unwrap()
});

/// Bare letter+digits token as a last resort.
static BARE_SHEET_RE: LazyLock<Regex> = LazyLock::new(|| {
    #[allow(clippy::unwrap_used)]
    Regex::new(r"\b([A-Z]\d+(?:\.\d+)?)\b").unwrap()
});

/// Extracts sheet number and title from a rendered page.
pub struct TitleBlockExtractor {
    engine: Arc<dyn OcrEngine>,
}

impl std::fmt::Debug for TitleBlockExtractor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TitleBlockExtractor")
            .field("engine", &self.engine.name())
            .finish()
    }
}

impl TitleBlockExtractor {
    /// Creates an extractor around a shared OCR engine.
    #[must_use]
    pub fn new(engine: Arc<dyn OcrEngine>) -> Self {
        Self { engine }
    }

    /// Reads the title block of a rendered page.
    ///
    /// Returns `None` when no region produced a parseable sheet number;
    /// the caller decides whether to degrade to [`SheetMetadata::fallback`].
    #[must_use]
    pub fn extract(&self, page: &DynamicImage) -> Option<SheetMetadata> {
        let gray = page.to_luma8();
        let mut best: Option<SheetMetadata> = None;

        for (location, rect) in title_block_regions(page.width(), page.height()) {
            let crop = image::imageops::crop_imm(
                &gray,
                rect.x.max(0) as u32,
                rect.y.max(0) as u32,
                rect.w,
                rect.h,
            )
            .to_image();

            let read = match self.engine.recognize(&crop) {
                Ok(read) => read,
                Err(e) => {
                    debug!("title block OCR failed in {location}: {e}");
                    continue;
                }
            };
            if read.text.trim().is_empty() {
                continue;
            }

            if let Some(parsed) = parse_title_block(&read.text, read.confidence, location) {
                if best.as_ref().is_none_or(|b| parsed.confidence > b.confidence) {
                    best = Some(parsed);
                }
            }
        }
        best
    }
}

/// Standard title block regions, highest-priority first.
fn title_block_regions(width: u32, height: u32) -> Vec<(&'static str, PixelRect)> {
    let (w, h) = (width as i32, height as i32);
    let frac = |total: i32, f: f64| (f64::from(total) * f) as i32;

    let tb_w = frac(w, 0.25);
    let tb_h = frac(h, 0.15);
    let tb_w_ext = frac(w, 0.35);
    let tb_h_ext = frac(h, 0.20);
    let right_strip = frac(w, 0.12);

    vec![
        (
            "bottom_right",
            PixelRect::new(w - tb_w, h - tb_h, tb_w as u32, tb_h as u32),
        ),
        (
            "bottom_right_extended",
            PixelRect::new(w - tb_w_ext, h - tb_h_ext, tb_w_ext as u32, tb_h_ext as u32),
        ),
        ("top_right", PixelRect::new(w - tb_w, 0, tb_w as u32, tb_h as u32)),
        ("bottom_left", PixelRect::new(0, h - tb_h, tb_w as u32, tb_h as u32)),
        (
            "right_edge",
            PixelRect::new(w - right_strip, 0, right_strip as u32, h as u32),
        ),
    ]
}

/// Parses OCR text from one region into metadata.
fn parse_title_block(text: &str, ocr_confidence: f64, location: &str) -> Option<SheetMetadata> {
    let upper = text.to_uppercase();

    let (sheet_number, pattern_weight) = if let Some(caps) = DISCIPLINE_RE.captures(&upper) {
        (caps[1].to_string(), 1.0)
    } else if let Some(caps) = LABELLED_RE.captures(&upper) {
        (caps[1].to_string(), 0.85)
    } else if let Some(caps) = BARE_SHEET_RE.captures(&upper) {
        (caps[1].to_string(), 0.6)
    } else {
        return None;
    };

    let all_sheets: Vec<String> = {
        let mut seen = Vec::new();
        for caps in DISCIPLINE_RE.captures_iter(&upper) {
            let code = caps[1].to_string();
            if !seen.contains(&code) {
                seen.push(code);
            }
        }
        seen
    };

    Some(SheetMetadata {
        sheet_number,
        sheet_title: guess_title(text),
        confidence: (ocr_confidence.max(0.5) * pattern_weight).clamp(0.0, 1.0),
        method: "ocr".to_string(),
        extracted_text: text.chars().take(500).collect(),
        title_block_location: Some(location.to_string()),
        all_sheets,
    })
}

/// The longest mostly-alphabetic line is usually the sheet title.
fn guess_title(text: &str) -> Option<String> {
    text.lines()
        .map(str::trim)
        .filter(|line| {
            line.len() >= 6
                && line.chars().filter(|c| c.is_alphabetic()).count() * 2 > line.len()
                && !DISCIPLINE_RE.is_match(&line.to_uppercase())
        })
        .max_by_key(|line| line.len())
        .map(ToString::to_string)
}

#[cfg(test)]
mod tests {
    use image::GrayImage;

    use super::*;
    use crate::ocr::{OcrError, OcrRead};

    struct FixedOcr(&'static str);

    impl OcrEngine for FixedOcr {
        fn name(&self) -> &str {
            "fixed"
        }

        fn recognize(&self, _image: &GrayImage) -> Result<OcrRead, OcrError> {
            Ok(OcrRead {
                text: self.0.to_string(),
                confidence: 0.9,
            })
        }
    }

    #[test]
    fn discipline_code_wins() {
        let text = "FLOOR PLAN - LEVEL 2\nSHEET NO: 12\nA7";
        let parsed = parse_title_block(text, 0.9, "bottom_right").unwrap();
        assert_eq!(parsed.sheet_number, "A7");
        assert_eq!(parsed.sheet_title.as_deref(), Some("FLOOR PLAN - LEVEL 2"));
        assert_eq!(parsed.all_sheets, vec!["A7".to_string()]);
    }

    #[test]
    fn labelled_number_is_second_choice() {
        let parsed = parse_title_block("SHEET NO: 12", 0.9, "bottom_right").unwrap();
        assert_eq!(parsed.sheet_number, "12");
        assert!(parsed.confidence < 0.9);
    }

    #[test]
    fn unparseable_text_is_none() {
        assert!(parse_title_block("no numbers here", 0.9, "bottom_right").is_none());
    }

    #[test]
    fn extractor_reads_page() {
        let extractor = TitleBlockExtractor::new(Arc::new(FixedOcr("DETAILS\nS2.1")));
        let page = DynamicImage::new_luma8(1000, 800);
        let meta = extractor.extract(&page).unwrap();
        assert_eq!(meta.sheet_number, "S2.1");
        assert_eq!(meta.method, "ocr");
        assert!(meta.title_block_location.is_some());
    }

    #[test]
    fn fallback_uses_sheet_id_suffix() {
        let meta = SheetMetadata::fallback("sheet-abcdef12");
        assert_eq!(meta.sheet_number, "Sheet-ef12");
        assert_eq!(meta.method, "fallback");
        assert!((meta.confidence - 0.0).abs() < f64::EPSILON);

        let short = SheetMetadata::fallback("x7");
        assert_eq!(short.sheet_number, "Sheet-x7");
    }

    #[test]
    fn regions_cover_standard_locations() {
        let regions = title_block_regions(1000, 800);
        assert_eq!(regions[0].0, "bottom_right");
        assert_eq!(regions[0].1, PixelRect::new(750, 680, 250, 120));
        assert_eq!(regions.len(), 5);
    }

    #[test]
    fn raster_passthrough_decodes_png() {
        let mut png = Vec::new();
        DynamicImage::new_luma8(10, 10)
            .write_to(&mut std::io::Cursor::new(&mut png), image::ImageFormat::Png)
            .unwrap();
        let rendered = RasterPassthroughRenderer.render(&png, 0, 150).unwrap();
        assert_eq!(rendered.width(), 10);

        assert!(RasterPassthroughRenderer.render(b"%PDF-1.4", 0, 150).is_err());
    }
}
