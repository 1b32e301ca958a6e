//! `POST /api/extract-metadata`: sheet number and title from a title block.

use actix_web::http::header::CONTENT_TYPE;
use actix_web::web::{Bytes, Data};
use actix_web::{HttpRequest, HttpResponse, post};
use log::{info, warn};
use plansight_core::metadata::SheetMetadata;
use serde::{Deserialize, Serialize};
use serde_json::json;

use super::ApiError;
use crate::ReadyState;

#[derive(Debug, Deserialize)]
struct MetadataRequest {
    sheet_url: String,
    sheet_id: String,
}

#[derive(Debug, Serialize)]
struct MetadataResponse {
    sheet_number: String,
    metadata: MetadataBody,
}

#[derive(Debug, Serialize)]
struct MetadataBody {
    sheet_title: Option<String>,
    confidence: f64,
    method: String,
    extracted_text: String,
    title_block_location: serde_json::Value,
    all_sheets: Vec<String>,
}

#[post("/api/extract-metadata")]
pub(super) async fn extract_metadata(
    req: HttpRequest,
    body: Bytes,
    ready: Data<ReadyState>,
) -> Result<HttpResponse, ApiError> {
    let state = ready.get().cloned().ok_or(ApiError::Initializing)?;

    let content_type = req
        .headers()
        .get(CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .unwrap_or_default();

    let (pdf_bytes, sheet_id) = if content_type.starts_with("application/pdf") {
        let sheet_id = req
            .headers()
            .get("x-sheet-id")
            .and_then(|v| v.to_str().ok())
            .unwrap_or("unknown")
            .to_string();
        (body.to_vec(), sheet_id)
    } else {
        let parsed: MetadataRequest = serde_json::from_slice(&body)
            .map_err(|e| ApiError::BadRequest(format!("invalid request body: {e}")))?;
        let parsed_url = url::Url::parse(&parsed.sheet_url)
            .map_err(|e| ApiError::BadRequest(format!("invalid sheet_url: {e}")))?;
        let bytes = state
            .downloads
            .get(parsed_url)
            .send()
            .await
            .and_then(reqwest::Response::error_for_status)
            .map_err(|e| ApiError::Download(e.to_string()))?
            .bytes()
            .await
            .map_err(|e| ApiError::Download(e.to_string()))?;
        (bytes.to_vec(), parsed.sheet_id)
    };
    info!("extract-metadata: sheet_id={sheet_id}, {} bytes", pdf_bytes.len());

    // rendering + OCR are CPU-bound; keep them off the reactor
    let renderer = state.renderer.clone();
    let extractor = state.metadata.clone();
    let dpi = state.detection.render_dpi;
    let fallback_id = sheet_id.clone();
    let metadata = tokio::task::spawn_blocking(move || {
        let extracted = match renderer.render(&pdf_bytes, 0, dpi) {
            Ok(page) => extractor.and_then(|e| e.extract(&page)),
            Err(e) => {
                warn!("couldn't render sheet {fallback_id}: {e}");
                None
            }
        };
        extracted.unwrap_or_else(|| {
            info!("title block not found for {fallback_id}, synthesizing fallback number");
            SheetMetadata::fallback(&fallback_id)
        })
    })
    .await
    .map_err(|e| ApiError::Internal(format!("metadata task failed: {e}")))?;

    info!(
        "extract-metadata: sheet_id={sheet_id} -> {} ({}, confidence {:.2})",
        metadata.sheet_number, metadata.method, metadata.confidence
    );

    let location = metadata
        .title_block_location
        .map_or_else(|| json!({}), |region| json!({ "region": region }));

    Ok(HttpResponse::Ok().json(MetadataResponse {
        sheet_number: metadata.sheet_number,
        metadata: MetadataBody {
            sheet_title: metadata.sheet_title,
            confidence: metadata.confidence,
            method: metadata.method,
            extracted_text: metadata.extracted_text,
            title_block_location: location,
            all_sheets: metadata.all_sheets,
        },
    }))
}
