//! The page pipeline: tiles → Stage 1 → Stage 1.5 → Stage 2 → aggregation.
//!
//! Stage 1 and 1.5 are CPU-bound and run per tile on the blocking pool with
//! bounded fan-out; Stage 2 is IO-bound and fans out per batch up to the
//! configured LLM concurrency. Failures of a single tile or batch are
//! contained; the rest of the page proceeds.

use std::io::Cursor;
use std::sync::Arc;

use futures::StreamExt as _;
use image::{DynamicImage, ImageFormat};
use log::{info, warn};

use crate::aggregate;
use crate::detect::{DetectorParams, GeometricDetector};
use crate::llm::{CandidateCrop, MarkerValidator};
use crate::markers::{Candidate, Classification, Marker, ProjectContext};
use crate::ocr::Prefilter;
use crate::tiles::{PageTile, TileError, cut_tiles};

/// Padding fraction applied to candidate boxes before cropping for the
/// vision model; matches the OCR crop padding so both stages see the same
/// context.
pub const STAGE2_CROP_PADDING: f64 = 0.20;

/// Pipeline-level tuning.
#[derive(Debug, Clone)]
pub struct PipelineOptions {
    /// Tile edge length for [`DetectionPipeline::detect_page`].
    pub tile_size: u32,
    /// Fractional tile overlap.
    pub tile_overlap: f64,
    /// Bounded CPU fan-out for Stages 1/1.5; 0 means "number of CPUs".
    pub cpu_concurrency: usize,
    /// Center-distance dedup radius as a fraction of page height.
    pub dedup_radius_fraction: f64,
}

impl Default for PipelineOptions {
    fn default() -> Self {
        Self {
            tile_size: 2048,
            tile_overlap: 0.2,
            cpu_concurrency: 0,
            dedup_radius_fraction: aggregate::DEDUP_RADIUS_FRACTION,
        }
    }
}

/// Everything one page run produced.
#[derive(Debug, Default)]
pub struct PageReport {
    /// Final de-duplicated markers in page coordinates, reading order.
    pub markers: Vec<Marker>,
    /// Raw Stage-1 candidate count.
    pub stage1_candidates: usize,
    /// Candidates Stage 1.5 accepted outright.
    pub accepted: usize,
    /// Candidates Stage 1.5 rejected (never sent to the model).
    pub rejected: usize,
    /// Candidates left for the model to decide.
    pub uncertain: usize,
    /// Markers Stage 2 emitted (before overlap de-duplication).
    pub stage2_validated: usize,
    /// Stage-2 batches that produced nothing.
    pub batches_failed: usize,
}

/// One full detection pipeline with its injected service handles.
///
/// The OCR engine and the validator client are created once at process
/// startup and shared; the pipeline itself holds no per-request state.
#[derive(Debug)]
pub struct DetectionPipeline {
    detector_params: DetectorParams,
    prefilter: Prefilter,
    validator: Arc<MarkerValidator>,
    options: PipelineOptions,
}

impl DetectionPipeline {
    /// Assembles a pipeline from its stages.
    #[must_use]
    pub fn new(
        detector_params: DetectorParams,
        prefilter: Prefilter,
        validator: Arc<MarkerValidator>,
        options: PipelineOptions,
    ) -> Self {
        Self {
            detector_params,
            prefilter,
            validator,
            options,
        }
    }

    /// Cuts a rendered page into tiles and runs the full pipeline.
    pub async fn detect_page(
        &self,
        page: &DynamicImage,
        ctx: &ProjectContext,
        strict_filtering: bool,
    ) -> Result<PageReport, TileError> {
        let tiles = cut_tiles(page, self.options.tile_size, self.options.tile_overlap)?;
        Ok(self.detect_tiles(tiles, ctx, strict_filtering).await)
    }

    /// Runs the pipeline over pre-cut tiles (the HTTP intake path).
    ///
    /// `strict_filtering` switches on the aggressive Stage-1 filters and
    /// drops markers whose sheet failed validation from the final list.
    pub async fn detect_tiles(
        &self,
        tiles: Vec<PageTile>,
        ctx: &ProjectContext,
        strict_filtering: bool,
    ) -> PageReport {
        let placements = aggregate::placements_of(&tiles);
        let page_height = aggregate::page_height_of(&tiles);

        let stage1 = self.run_stage1(tiles, ctx, strict_filtering).await;
        let mut report = PageReport {
            stage1_candidates: stage1.total_candidates,
            accepted: stage1.accepted,
            rejected: stage1.rejected,
            uncertain: stage1.uncertain,
            ..PageReport::default()
        };
        info!(
            "stage 1/1.5: {} candidates ({} accept, {} reject, {} uncertain)",
            report.stage1_candidates, report.accepted, report.rejected, report.uncertain
        );
        if stage1.crops.is_empty() {
            return report;
        }

        // accepted candidates still go to the model for structured output;
        // the win of Stage 1.5 is the rejects that never get here
        let outcome = self.validator.validate(stage1.crops, ctx).await;
        report.batches_failed = outcome.batches_failed;

        let mut markers = outcome.markers;
        if strict_filtering {
            markers.retain(|m| m.is_valid);
        }
        report.stage2_validated = markers.len();

        report.markers = aggregate::aggregate(
            markers,
            &placements,
            page_height,
            self.options.dedup_radius_fraction,
        );
        report
    }

    async fn run_stage1(
        &self,
        tiles: Vec<PageTile>,
        ctx: &ProjectContext,
        strict_filtering: bool,
    ) -> Stage1Output {
        let concurrency = if self.options.cpu_concurrency == 0 {
            num_cpus::get()
        } else {
            self.options.cpu_concurrency
        };

        let mut detector_params = self.detector_params.clone();
        detector_params.strict_filtering = strict_filtering;
        let detector = GeometricDetector::new(detector_params);

        let tasks = tiles.into_iter().enumerate().map(|(index, tile)| {
            let detector = detector.clone();
            let prefilter = self.prefilter.clone();
            let ctx = ctx.clone();
            async move {
                let handle =
                    tokio::task::spawn_blocking(move || process_tile(&detector, &prefilter, &tile, &ctx));
                match handle.await {
                    Ok(output) => Some((index, output)),
                    Err(e) => {
                        warn!("tile task {index} failed: {e}");
                        None
                    }
                }
            }
        });

        let mut per_tile: Vec<(usize, TileOutput)> = futures::stream::iter(tasks)
            .buffer_unordered(concurrency.max(1))
            .filter_map(std::future::ready)
            .collect()
            .await;
        // restore tile order so Stage-2 batching is deterministic
        per_tile.sort_by_key(|(index, _)| *index);

        let mut output = Stage1Output::default();
        for (_, tile_output) in per_tile {
            output.total_candidates += tile_output.candidates;
            output.accepted += tile_output.accepted;
            output.rejected += tile_output.rejected;
            output.uncertain += tile_output.uncertain;
            output.crops.extend(tile_output.crops);
        }
        output
    }
}

#[derive(Debug, Default)]
struct Stage1Output {
    total_candidates: usize,
    accepted: usize,
    rejected: usize,
    uncertain: usize,
    crops: Vec<CandidateCrop>,
}

#[derive(Debug, Default)]
struct TileOutput {
    candidates: usize,
    accepted: usize,
    rejected: usize,
    uncertain: usize,
    crops: Vec<CandidateCrop>,
}

/// Stage 1 + 1.5 for one tile; runs on the blocking pool.
fn process_tile(
    detector: &GeometricDetector,
    prefilter: &Prefilter,
    tile: &PageTile,
    ctx: &ProjectContext,
) -> TileOutput {
    let gray = tile.gray();
    let candidates = detector.detect_tile(&gray, &tile.id);

    let mut output = TileOutput {
        candidates: candidates.len(),
        ..TileOutput::default()
    };
    for candidate in candidates {
        let outcome = prefilter.classify_candidate(&gray, &candidate, ctx);
        match outcome.classification {
            Classification::Reject => {
                output.rejected += 1;
                continue;
            }
            Classification::Accept => output.accepted += 1,
            Classification::Uncertain => output.uncertain += 1,
        }
        match encode_crop(&tile.image, &candidate) {
            Some(png) => output.crops.push(CandidateCrop { candidate, png }),
            None => warn!(
                "couldn't crop candidate at {:?} in {}",
                candidate.bbox, tile.id
            ),
        }
    }
    output
}

/// Context-padded PNG crop of a candidate for the vision model.
fn encode_crop(tile: &DynamicImage, candidate: &Candidate) -> Option<Vec<u8>> {
    let padded = candidate.bbox.pad(STAGE2_CROP_PADDING);
    let clipped = padded.clamp_to(tile.width(), tile.height())?;
    let crop = tile.crop_imm(clipped.x as u32, clipped.y as u32, clipped.w, clipped.h);
    let mut png = Vec::new();
    crop.write_to(&mut Cursor::new(&mut png), ImageFormat::Png)
        .ok()?;
    Some(png)
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicUsize, Ordering};

    use image::{GrayImage, Luma};
    use imageproc::drawing::draw_hollow_circle_mut;

    use super::*;
    use crate::llm::{ExemplarSet, LlmError, ValidatorClient, ValidatorOptions};
    use crate::ocr::{OcrEngine, OcrError, OcrRead};

    /// OCR engine with a fixed answer.
    struct FixedOcr {
        text: &'static str,
        confidence: f64,
    }

    impl OcrEngine for FixedOcr {
        fn name(&self) -> &str {
            "fixed"
        }

        fn recognize(&self, _image: &GrayImage) -> Result<OcrRead, OcrError> {
            Ok(OcrRead {
                text: self.text.to_string(),
                confidence: self.confidence,
            })
        }
    }

    /// Client that always answers with the same body and counts calls.
    struct FixedClient {
        body: String,
        calls: AtomicUsize,
        batch_sizes: Mutex<Vec<usize>>,
    }

    impl FixedClient {
        fn new(body: &str) -> Self {
            Self {
                body: body.to_string(),
                calls: AtomicUsize::new(0),
                batch_sizes: Mutex::new(Vec::new()),
            }
        }
    }

    #[async_trait::async_trait]
    impl ValidatorClient for FixedClient {
        async fn validate_batch(
            &self,
            _prompt: &str,
            _exemplars: &[&[u8]],
            crops: &[Vec<u8>],
        ) -> Result<String, LlmError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.batch_sizes.lock().unwrap().push(crops.len());
            Ok(self.body.clone())
        }
    }

    fn circle_tile() -> PageTile {
        let mut gray = GrayImage::from_pixel(512, 512, Luma([255]));
        draw_hollow_circle_mut(&mut gray, (256, 256), 30, Luma([0]));
        draw_hollow_circle_mut(&mut gray, (256, 256), 29, Luma([0]));
        PageTile::new(0, 0, DynamicImage::ImageLuma8(gray))
    }

    fn pipeline(ocr: Option<Arc<dyn OcrEngine>>, client: Arc<dyn ValidatorClient>) -> DetectionPipeline {
        DetectionPipeline::new(
            DetectorParams::default(),
            Prefilter::new(ocr, 0.7),
            Arc::new(MarkerValidator::new(
                client,
                ExemplarSet::default(),
                ValidatorOptions::default(),
            )),
            PipelineOptions::default(),
        )
    }

    fn ctx() -> ProjectContext {
        ProjectContext::new(vec!["A5".into(), "A6".into(), "A7".into()])
    }

    #[tokio::test]
    async fn clean_callout_end_to_end() {
        let client = Arc::new(FixedClient::new(
            r#"[{"detail":"3","sheet":"A7","type":"circular","confidence":0.95,"is_valid":true,"fuzzy_matched":false}]"#,
        ));
        let ocr: Arc<dyn OcrEngine> = Arc::new(FixedOcr {
            text: "3/A7",
            confidence: 0.9,
        });
        let p = pipeline(Some(ocr), client.clone());

        let report = p.detect_tiles(vec![circle_tile()], &ctx(), false).await;
        assert!(report.stage1_candidates >= 1);
        assert!(report.accepted >= 1);
        assert!(!report.markers.is_empty());
        let m = &report.markers[0];
        assert_eq!(m.text, "3/A7");
        assert_eq!((m.detail.as_str(), m.sheet.as_str()), ("3", "A7"));
        assert!(m.is_valid && !m.fuzzy_matched);
        assert!(client.calls.load(Ordering::SeqCst) >= 1);
    }

    #[tokio::test]
    async fn rejected_text_never_reaches_the_model() {
        let client = Arc::new(FixedClient::new("[]"));
        let ocr: Arc<dyn OcrEngine> = Arc::new(FixedOcr {
            text: "SCALE: 1/4\"=1'-0\"",
            confidence: 0.9,
        });
        let p = pipeline(Some(ocr), client.clone());

        let report = p.detect_tiles(vec![circle_tile()], &ctx(), false).await;
        assert!(report.rejected >= 1);
        assert_eq!(report.uncertain, 0);
        assert_eq!(client.calls.load(Ordering::SeqCst), 0);
        assert!(report.markers.is_empty());
    }

    #[tokio::test]
    async fn ocr_glitch_goes_uncertain_and_model_corrects() {
        // OCR misreads the sheet as "AS"; the candidate must reach the
        // model rather than being rejected, and the model's correction to
        // A7 flows through with its fuzzy flag
        let client = Arc::new(FixedClient::new(
            r#"[{"detail":"3","sheet":"A7","type":"circular","confidence":0.9,"is_valid":true,"fuzzy_matched":true}]"#,
        ));
        let ocr: Arc<dyn OcrEngine> = Arc::new(FixedOcr {
            text: "3/AS",
            confidence: 0.9,
        });
        let p = pipeline(Some(ocr), client.clone());

        let report = p.detect_tiles(vec![circle_tile()], &ctx(), false).await;
        assert!(report.uncertain >= 1);
        assert_eq!(report.accepted, 0);
        let m = &report.markers[0];
        assert_eq!(m.text, "3/A7");
        assert_eq!(m.sheet, "A7");
        assert!(m.fuzzy_matched);
    }

    #[tokio::test]
    async fn missing_ocr_routes_everything_to_stage2() {
        let client = Arc::new(FixedClient::new("[]"));
        let p = pipeline(None, client.clone());

        let report = p.detect_tiles(vec![circle_tile()], &ctx(), false).await;
        assert!(report.stage1_candidates >= 1);
        assert_eq!(report.accepted, 0);
        assert_eq!(report.rejected, 0);
        assert_eq!(report.uncertain, report.stage1_candidates);
        assert!(client.calls.load(Ordering::SeqCst) >= 1);
    }

    #[tokio::test]
    async fn identical_inputs_give_identical_reports() {
        let body =
            r#"[{"detail":"3","sheet":"A7","type":"circular","confidence":0.95,"is_valid":true}]"#;
        let ocr = || -> Arc<dyn OcrEngine> {
            Arc::new(FixedOcr {
                text: "3/A7",
                confidence: 0.9,
            })
        };
        let first = pipeline(Some(ocr()), Arc::new(FixedClient::new(body)))
            .detect_tiles(vec![circle_tile()], &ctx(), false)
            .await;
        let second = pipeline(Some(ocr()), Arc::new(FixedClient::new(body)))
            .detect_tiles(vec![circle_tile()], &ctx(), false)
            .await;
        assert_eq!(first.markers, second.markers);
        assert_eq!(first.stage1_candidates, second.stage1_candidates);
    }

    #[tokio::test]
    async fn small_page_is_one_tile() {
        let client = Arc::new(FixedClient::new("[]"));
        let p = pipeline(None, client);
        let page = DynamicImage::new_luma8(300, 200);
        let report = p.detect_page(&page, &ctx(), false).await.unwrap();
        // a blank page has nothing to find, but it also must not fail
        assert_eq!(report.stage1_candidates, 0);
    }
}
