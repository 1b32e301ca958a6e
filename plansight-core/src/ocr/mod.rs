//! Stage 1.5: fast OCR-based candidate prefiltering.
//!
//! Every candidate the prefilter rejects is one fewer vision-model call.
//! OCR engines are pluggable behind [`OcrEngine`]; engines that are not
//! thread-safe run behind the single-worker [`SerialOcr`] queue. With no
//! engine configured the stage is skipped and every candidate goes to
//! Stage 2.

mod prefilter;
mod queue;
#[cfg(feature = "tesseract")]
mod tesseract;

pub use prefilter::{Prefilter, PrefilterOutcome, classify_text, crop_for_ocr, preprocess_for_ocr};
pub use queue::{BlockingOcr, SerialOcr};
#[cfg(feature = "tesseract")]
pub use tesseract::TesseractOcr;

use image::GrayImage;

/// What an OCR engine read out of a crop.
#[derive(Debug, Clone, PartialEq)]
pub struct OcrRead {
    /// The recognized text, possibly empty.
    pub text: String,
    /// Engine confidence in `[0, 1]`.
    pub confidence: f64,
}

/// Errors from OCR engines.
#[non_exhaustive]
#[derive(thiserror::Error, Debug)]
pub enum OcrError {
    /// The engine could not be initialized (missing language data, etc.).
    #[error("couldn't initialize OCR engine: {0}")]
    EngineInit(String),

    /// A single recognition call failed.
    #[error("OCR recognition failed: {0}")]
    Recognition(String),

    /// The serialized worker thread is gone.
    #[error("OCR worker thread terminated")]
    WorkerGone,
}

/// A text recognizer usable from any thread.
///
/// Implementations must be cheap to call concurrently; engines that are not
/// thread-safe should be wrapped in [`SerialOcr`] rather than implementing
/// this trait directly.
pub trait OcrEngine: Send + Sync {
    /// Short engine name for logs.
    fn name(&self) -> &str;

    /// Recognizes text in a preprocessed grayscale crop.
    fn recognize(&self, image: &GrayImage) -> Result<OcrRead, OcrError>;
}
