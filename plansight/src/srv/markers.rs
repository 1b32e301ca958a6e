//! `POST /api/detect-markers`: the detection pipeline behind one endpoint.
//!
//! Tiles arrive as a JSON array of base64 images, a list of URLs to
//! download, or an `application/x-tar` stream; all three materialize into
//! the same in-memory tile set before Stage 1 runs.

use std::path::Path;
use std::time::Instant;

use actix_web::http::header::CONTENT_TYPE;
use actix_web::web::{Bytes, Data};
use actix_web::{HttpRequest, HttpResponse, post};
use base64::Engine as _;
use base64::engine::general_purpose::STANDARD as BASE64;
use log::{info, warn};
use plansight_core::markers::{Marker, ProjectContext};
use plansight_core::tiles::PageTile;
use serde::{Deserialize, Serialize};

use super::ApiError;
use crate::ReadyState;

const fn default_true() -> bool {
    true
}

#[derive(Debug, Deserialize)]
struct TileUpload {
    filename: String,
    /// Base64-encoded image bytes.
    data: String,
}

#[derive(Debug, Deserialize)]
struct DetectMarkersRequest {
    #[serde(default)]
    tiles: Vec<TileUpload>,
    #[serde(default)]
    tile_urls: Vec<String>,
    #[serde(default)]
    valid_sheets: Vec<String>,
    #[serde(default = "default_true")]
    strict_filtering: bool,
}

#[derive(Debug, Serialize)]
struct DetectMarkersResponse {
    markers: Vec<Marker>,
    stage1_candidates: usize,
    stage2_validated: usize,
    processing_time_ms: f64,
}

#[post("/api/detect-markers")]
pub(super) async fn detect_markers(
    req: HttpRequest,
    body: Bytes,
    ready: Data<ReadyState>,
) -> Result<HttpResponse, ApiError> {
    let state = ready.get().cloned().ok_or(ApiError::Initializing)?;
    let started = Instant::now();

    let content_type = req
        .headers()
        .get(CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .unwrap_or_default();

    let (tiles, ctx, strict_filtering) = if content_type.starts_with("application/x-tar") {
        // tar intake carries its options in headers
        let sheets = header_list(&req, "x-valid-sheets");
        let strict = !header_value(&req, "x-strict-filtering")
            .is_some_and(|v| v.eq_ignore_ascii_case("false"));
        (tiles_from_tar(&body)?, ProjectContext::new(sheets), strict)
    } else {
        let parsed: DetectMarkersRequest = serde_json::from_slice(&body)
            .map_err(|e| ApiError::BadRequest(format!("invalid request body: {e}")))?;
        let ctx = ProjectContext::new(parsed.valid_sheets);
        let tiles = if !parsed.tiles.is_empty() {
            tiles_from_base64(parsed.tiles)
        } else if !parsed.tile_urls.is_empty() {
            tiles_from_urls(&state.downloads, &parsed.tile_urls).await?
        } else {
            return Err(ApiError::BadRequest(
                "request must contain either tiles or tile_urls".to_string(),
            ));
        };
        (tiles, ctx, parsed.strict_filtering)
    };

    if tiles.is_empty() {
        return Err(ApiError::BadRequest("no decodable tiles in request".to_string()));
    }
    info!(
        "detect-markers: {} tiles, {} valid sheets, strict={strict_filtering}",
        tiles.len(),
        ctx.valid_sheets.len()
    );

    let report = state.pipeline.detect_tiles(tiles, &ctx, strict_filtering).await;

    Ok(HttpResponse::Ok().json(DetectMarkersResponse {
        markers: report.markers,
        stage1_candidates: report.stage1_candidates,
        stage2_validated: report.stage2_validated,
        processing_time_ms: started.elapsed().as_secs_f64() * 1000.0,
    }))
}

fn header_value(req: &HttpRequest, name: &str) -> Option<String> {
    req.headers()
        .get(name)
        .and_then(|v| v.to_str().ok())
        .map(ToString::to_string)
}

fn header_list(req: &HttpRequest, name: &str) -> Vec<String> {
    header_value(req, name)
        .map(|v| {
            v.split(',')
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .map(ToString::to_string)
                .collect()
        })
        .unwrap_or_default()
}

/// Decodes base64 tile uploads; undecodable tiles are skipped, not fatal.
fn tiles_from_base64(uploads: Vec<TileUpload>) -> Vec<PageTile> {
    uploads
        .into_iter()
        .filter_map(|upload| {
            let bytes = match BASE64.decode(upload.data.as_bytes()) {
                Ok(bytes) => bytes,
                Err(e) => {
                    warn!("tile {} has invalid base64: {e}", upload.filename);
                    return None;
                }
            };
            decode_tile(&upload.filename, &bytes)
        })
        .collect()
}

/// Extracts image entries from a tar stream.
fn tiles_from_tar(body: &Bytes) -> Result<Vec<PageTile>, ApiError> {
    let mut archive = tar::Archive::new(body.as_ref());
    let entries = archive
        .entries()
        .map_err(|e| ApiError::BadRequest(format!("invalid tar stream: {e}")))?;

    let mut tiles = Vec::new();
    for entry in entries {
        let mut entry = entry.map_err(|e| ApiError::BadRequest(format!("invalid tar entry: {e}")))?;
        let Ok(path) = entry.path() else { continue };
        // flatten to the file name; tar paths are untrusted
        let Some(filename) = path.file_name().and_then(|n| n.to_str()).map(ToString::to_string)
        else {
            continue;
        };
        if !is_image_name(&filename) {
            continue;
        }
        let mut bytes = Vec::new();
        if let Err(e) = std::io::Read::read_to_end(&mut entry, &mut bytes) {
            warn!("couldn't read tar entry {filename}: {e}");
            continue;
        }
        if let Some(tile) = decode_tile(&filename, &bytes) {
            tiles.push(tile);
        }
    }
    Ok(tiles)
}

/// Downloads tiles by URL; a failed download fails the request (the caller
/// named a resource we cannot see).
async fn tiles_from_urls(
    client: &reqwest::Client,
    urls: &[String],
) -> Result<Vec<PageTile>, ApiError> {
    let mut tiles = Vec::new();
    for raw in urls {
        let parsed = url::Url::parse(raw)
            .map_err(|e| ApiError::BadRequest(format!("invalid tile URL {raw:?}: {e}")))?;
        let filename = Path::new(parsed.path())
            .file_name()
            .and_then(|n| n.to_str())
            .unwrap_or("tile.jpg")
            .to_string();

        let response = client
            .get(parsed)
            .send()
            .await
            .and_then(reqwest::Response::error_for_status)
            .map_err(|e| ApiError::Download(e.to_string()))?;
        let bytes = response
            .bytes()
            .await
            .map_err(|e| ApiError::Download(e.to_string()))?;

        if let Some(tile) = decode_tile(&filename, &bytes) {
            tiles.push(tile);
        }
    }
    Ok(tiles)
}

fn is_image_name(name: &str) -> bool {
    let lower = name.to_lowercase();
    lower.ends_with(".jpg") || lower.ends_with(".jpeg") || lower.ends_with(".png")
}

fn decode_tile(filename: &str, bytes: &[u8]) -> Option<PageTile> {
    match image::load_from_memory(bytes) {
        Ok(image) => Some(PageTile::from_named_image(filename, image)),
        Err(e) => {
            warn!("couldn't decode tile {filename}: {e}");
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn png_bytes() -> Vec<u8> {
        let mut out = Vec::new();
        image::DynamicImage::new_luma8(8, 8)
            .write_to(&mut std::io::Cursor::new(&mut out), image::ImageFormat::Png)
            .unwrap();
        out
    }

    #[test]
    fn base64_tiles_decode_and_keep_offsets() {
        let tiles = tiles_from_base64(vec![
            TileUpload {
                filename: "tile_0_2048.png".into(),
                data: BASE64.encode(png_bytes()),
            },
            TileUpload {
                filename: "bad.png".into(),
                data: "!!!not-base64!!!".into(),
            },
        ]);
        assert_eq!(tiles.len(), 1);
        assert_eq!((tiles[0].offset_x, tiles[0].offset_y), (0, 2048));
    }

    #[test]
    fn tar_stream_extracts_image_entries() {
        let mut builder = tar::Builder::new(Vec::new());
        let png = png_bytes();
        let mut header = tar::Header::new_gnu();
        header.set_size(png.len() as u64);
        header.set_cksum();
        builder
            .append_data(&mut header, "tiles/tile_0_0.png", png.as_slice())
            .unwrap();
        let mut header = tar::Header::new_gnu();
        header.set_size(4);
        header.set_cksum();
        builder
            .append_data(&mut header, "notes.txt", &b"txt!"[..])
            .unwrap();
        let body = Bytes::from(builder.into_inner().unwrap());

        let tiles = tiles_from_tar(&body).unwrap();
        assert_eq!(tiles.len(), 1);
        assert_eq!(tiles[0].id, "tile_0_0.png");
    }

    #[test]
    fn garbage_tar_is_bad_request() {
        let result = tiles_from_tar(&Bytes::from_static(b"definitely not a tar"));
        // the tar reader surfaces the failure on entry iteration
        assert!(result.is_err() || result.unwrap().is_empty());
    }
}
