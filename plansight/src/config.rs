//! Process-wide configuration, read from the environment.
//!
//! Environment access goes through the [`Env`] trait so configuration can
//! be exercised in tests without touching the real process environment.

use std::collections::HashMap;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use log::warn;
use serde::{Deserialize, Serialize};

use crate::{PlansightError, PlansightResult};

pub const KEEP_ALIVE_DEFAULT: u64 = 75;
pub const LISTEN_ADDRESSES_DEFAULT: &str = "0.0.0.0:8000";

/// Deadline for each external call: tile/PDF downloads and LLM batches.
pub const EXTERNAL_CALL_TIMEOUT: Duration = Duration::from_secs(60);

/// Environment variable access that can be mocked in tests.
pub trait Env {
    /// Gets a UTF-8 environment variable.
    fn get(&self, key: &str) -> Option<String>;
}

/// Production implementation reading the process environment.
#[derive(Debug, Default)]
pub struct OsEnv;

impl Env for OsEnv {
    fn get(&self, key: &str) -> Option<String> {
        match std::env::var(key) {
            Ok(v) => Some(v),
            Err(std::env::VarError::NotPresent) => None,
            Err(std::env::VarError::NotUnicode(v)) => {
                warn!(
                    "Environment variable {key} has invalid unicode. Lossy representation: {}",
                    v.to_string_lossy()
                );
                None
            }
        }
    }
}

/// Test implementation with configurable variables.
#[derive(Debug, Default)]
pub struct FauxEnv(pub HashMap<&'static str, String>);

impl Env for FauxEnv {
    fn get(&self, key: &str) -> Option<String> {
        self.0.get(key).cloned()
    }
}

/// HTTP server tuning.
#[serde_with::skip_serializing_none]
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Default)]
pub struct SrvConfig {
    pub keep_alive: Option<u64>,
    pub listen_addresses: Option<String>,
    pub worker_processes: Option<usize>,
}

/// Detection pipeline tuning, one field per documented environment key.
#[derive(Clone, Debug, PartialEq)]
pub struct DetectionConfig {
    /// Bearer credential for the LLM provider; Stage 2 degrades without it.
    pub openrouter_api_key: Option<String>,
    /// Vision model identifier.
    pub openrouter_model: String,
    /// Tile edge length in pixels.
    pub tile_size_px: u32,
    /// Fractional overlap between neighboring tiles.
    pub tile_overlap: f64,
    /// Candidates per Stage-2 request.
    pub stage2_batch_size: usize,
    /// Stage-1.5 accept threshold.
    pub ocr_confidence_threshold: f64,
    /// Max concurrent Stage-2 requests.
    pub stage2_concurrency: usize,
    /// Directory holding the few-shot exemplar images.
    pub exemplar_dir: Option<PathBuf>,
    /// DPI used when rendering uploaded PDFs for metadata extraction.
    pub render_dpi: u32,
}

impl Default for DetectionConfig {
    fn default() -> Self {
        Self {
            openrouter_api_key: None,
            openrouter_model: plansight_core::llm::DEFAULT_MODEL.to_string(),
            tile_size_px: 2048,
            tile_overlap: 0.2,
            stage2_batch_size: 10,
            ocr_confidence_threshold: 0.7,
            stage2_concurrency: 4,
            exemplar_dir: None,
            render_dpi: 150,
        }
    }
}

impl DetectionConfig {
    /// Reads the documented environment keys, falling back to defaults.
    ///
    /// A present-but-unparseable value is an error rather than a silent
    /// default: a typo in `TILE_OVERLAP` should not quietly change tiling.
    pub fn from_env(env: &impl Env) -> PlansightResult<Self> {
        let defaults = Self::default();
        Ok(Self {
            openrouter_api_key: env.get("OPENROUTER_API_KEY").filter(|k| !k.is_empty()),
            openrouter_model: env
                .get("OPENROUTER_MODEL")
                .unwrap_or(defaults.openrouter_model),
            tile_size_px: parse_or(env, "TILE_SIZE_PX", defaults.tile_size_px)?,
            tile_overlap: parse_or(env, "TILE_OVERLAP", defaults.tile_overlap)?,
            stage2_batch_size: parse_or(env, "STAGE2_BATCH_SIZE", defaults.stage2_batch_size)?,
            ocr_confidence_threshold: parse_or(
                env,
                "OCR_CONFIDENCE_THRESHOLD",
                defaults.ocr_confidence_threshold,
            )?,
            stage2_concurrency: parse_or(env, "STAGE2_CONCURRENCY", defaults.stage2_concurrency)?,
            exemplar_dir: env.get("EXEMPLAR_DIR").map(PathBuf::from),
            render_dpi: parse_or(env, "RENDER_DPI", defaults.render_dpi)?,
        })
    }
}

fn parse_or<T: FromStr>(env: &impl Env, key: &'static str, default: T) -> PlansightResult<T> {
    match env.get(key) {
        None => Ok(default),
        Some(raw) => raw
            .parse()
            .map_err(|_| PlansightError::ConfigValue(key, raw)),
    }
}

/// Full process configuration.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct Config {
    pub srv: SrvConfig,
    pub detection: DetectionConfig,
}

impl Config {
    /// Builds the configuration from an environment.
    pub fn from_env(env: &impl Env) -> PlansightResult<Self> {
        Ok(Self {
            srv: SrvConfig::default(),
            detection: DetectionConfig::from_env(env)?,
        })
    }
}
