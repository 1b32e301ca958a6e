//! Tesseract-backed OCR via `leptess`.
//!
//! The Tesseract API object is not thread-safe, so this type implements
//! [`BlockingOcr`] and is meant to be wrapped in [`super::SerialOcr`].

use std::io::Cursor;

use image::{GrayImage, ImageFormat};
use leptess::LepTess;

use super::queue::BlockingOcr;
use super::{OcrError, OcrRead};

/// Single-threaded Tesseract engine.
pub struct TesseractOcr {
    api: LepTess,
}

impl TesseractOcr {
    /// Initializes Tesseract for English.
    ///
    /// `datapath` overrides the `TESSDATA_PREFIX` lookup for the
    /// `eng.traineddata` file.
    pub fn new(datapath: Option<&str>) -> Result<Self, OcrError> {
        let api = LepTess::new(datapath, "eng").map_err(|e| OcrError::EngineInit(e.to_string()))?;
        Ok(Self { api })
    }
}

impl BlockingOcr for TesseractOcr {
    fn name(&self) -> &str {
        "tesseract"
    }

    fn recognize(&mut self, image: &GrayImage) -> Result<OcrRead, OcrError> {
        let mut png = Vec::new();
        image
            .write_to(&mut Cursor::new(&mut png), ImageFormat::Png)
            .map_err(|e| OcrError::Recognition(e.to_string()))?;
        self.api
            .set_image_from_mem(&png)
            .map_err(|e| OcrError::Recognition(e.to_string()))?;

        let text = self
            .api
            .get_utf8_text()
            .map_err(|e| OcrError::Recognition(e.to_string()))?;
        // mean_text_conf is 0-100; an empty page reports 0
        let confidence = f64::from(self.api.mean_text_conf().clamp(0, 100)) / 100.0;

        Ok(OcrRead {
            text: text.split_whitespace().collect::<Vec<_>>().join(" "),
            confidence,
        })
    }
}
