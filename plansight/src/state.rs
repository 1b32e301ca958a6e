//! Process-wide service state, built once at startup and injected into
//! handlers.
//!
//! The OCR engine handle, the loaded exemplars and the LLM HTTP client are
//! created here and shared; no stage lazily initializes globals. Handlers
//! see the state through [`ReadyState`] and answer 503 until it is set.

use std::sync::{Arc, OnceLock};

use log::{info, warn};
use plansight_core::detect::DetectorParams;
use plansight_core::llm::{
    ExemplarSet, LlmError, MarkerValidator, OpenRouterClient, ValidatorClient, ValidatorOptions,
};
use plansight_core::metadata::{PageRenderer, RasterPassthroughRenderer, TitleBlockExtractor};
use plansight_core::ocr::{OcrEngine, Prefilter};
use plansight_core::pipeline::{DetectionPipeline, PipelineOptions};

use crate::PlansightResult;
use crate::config::{Config, EXTERNAL_CALL_TIMEOUT};

/// Everything request handlers need.
pub struct ServerState {
    /// The full detection pipeline.
    pub pipeline: Arc<DetectionPipeline>,
    /// Title-block metadata extraction; absent without an OCR engine.
    pub metadata: Option<Arc<TitleBlockExtractor>>,
    /// PDF page rasterization (external collaborator).
    pub renderer: Arc<dyn PageRenderer>,
    /// Client for tile/PDF downloads requested by URL.
    pub downloads: reqwest::Client,
    /// The detection configuration the state was built from.
    pub detection: crate::config::DetectionConfig,
}

impl std::fmt::Debug for ServerState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ServerState")
            .field("metadata", &self.metadata.is_some())
            .finish()
    }
}

/// Startup gate: empty until model/service loading finishes.
pub type ReadyState = Arc<OnceLock<Arc<ServerState>>>;

/// Stage-2 client used when no API credential is configured: every batch
/// fails cleanly and surfaces as reduced `stage2_validated`.
#[derive(Debug, Default, Clone, Copy)]
struct DisabledValidator;

#[async_trait::async_trait]
impl ValidatorClient for DisabledValidator {
    async fn validate_batch(
        &self,
        _prompt: &str,
        _exemplars: &[&[u8]],
        _crops: &[Vec<u8>],
    ) -> Result<String, LlmError> {
        Err(LlmError::MissingApiKey)
    }
}

/// Builds the shared service state from configuration.
///
/// Detector tuning, the OCR engine, exemplars and the LLM client are all
/// resolved here; the pipeline itself then stays stateless per request.
pub fn build_state(config: &Config) -> PlansightResult<ServerState> {
    let detection = &config.detection;

    let ocr_engine = make_ocr_engine();
    if ocr_engine.is_none() {
        warn!("no OCR engine available; Stage 1.5 disabled, all candidates go to the model");
    }

    let validator_client: Arc<dyn ValidatorClient> = match &detection.openrouter_api_key {
        Some(key) => Arc::new(OpenRouterClient::new(
            key.clone(),
            detection.openrouter_model.clone(),
            EXTERNAL_CALL_TIMEOUT,
        )?),
        None => {
            warn!("OPENROUTER_API_KEY is not set; Stage 2 validation disabled");
            Arc::new(DisabledValidator)
        }
    };

    let exemplars = detection
        .exemplar_dir
        .as_deref()
        .map(ExemplarSet::load)
        .unwrap_or_default();
    if exemplars.count() == 0 {
        warn!("no few-shot exemplars loaded; the validation prompt will carry none");
    }

    let validator = Arc::new(MarkerValidator::new(
        validator_client,
        exemplars,
        ValidatorOptions {
            batch_size: detection.stage2_batch_size,
            concurrency: detection.stage2_concurrency,
            ..ValidatorOptions::default()
        },
    ));

    let prefilter = Prefilter::new(ocr_engine.clone(), detection.ocr_confidence_threshold);
    let pipeline = Arc::new(DetectionPipeline::new(
        DetectorParams::default(),
        prefilter,
        validator,
        PipelineOptions {
            tile_size: detection.tile_size_px,
            tile_overlap: detection.tile_overlap,
            ..PipelineOptions::default()
        },
    ));

    let metadata = ocr_engine.map(|engine| Arc::new(TitleBlockExtractor::new(engine)));

    let downloads = reqwest::Client::builder()
        .timeout(EXTERNAL_CALL_TIMEOUT)
        .build()
        .map_err(LlmError::Request)?;

    info!("service state ready (ocr: {}, stage 2: {})",
        if metadata.is_some() { "enabled" } else { "disabled" },
        if detection.openrouter_api_key.is_some() { "enabled" } else { "disabled" },
    );

    Ok(ServerState {
        pipeline,
        metadata,
        renderer: Arc::new(RasterPassthroughRenderer),
        downloads,
        detection: detection.clone(),
    })
}

#[cfg(feature = "tesseract")]
fn make_ocr_engine() -> Option<Arc<dyn OcrEngine>> {
    use plansight_core::ocr::{SerialOcr, TesseractOcr};

    // Tesseract is not thread-safe: it lives on a single worker thread
    match SerialOcr::spawn("tesseract", || TesseractOcr::new(None)) {
        Ok(queue) => Some(Arc::new(queue)),
        Err(e) => {
            warn!("couldn't initialize Tesseract: {e}");
            None
        }
    }
}

#[cfg(not(feature = "tesseract"))]
fn make_ocr_engine() -> Option<Arc<dyn OcrEngine>> {
    None
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn state_builds_without_credentials() {
        let state = build_state(&Config::default()).unwrap();
        // no key, no tesseract feature in unit tests: both degrade, never fail
        assert!(state.downloads.get("http://example.org").build().is_ok());
    }
}
