//! Offline detection runner: feed a directory of tile images (or one page
//! image) through the pipeline and print the marker report as JSON.
//!
//! Useful for tuning thresholds against a corpus without standing up the
//! HTTP service.

use std::path::PathBuf;

use clap::Parser;
use log::{error, info, log_enabled};
use plansight::config::{Config, OsEnv};
use plansight::{PlansightError, PlansightResult, build_state, init_tracing};
use plansight_core::markers::ProjectContext;
use plansight_core::pipeline::PageReport;
use plansight_core::tiles::PageTile;
use serde_json::json;

const VERSION: &str = env!("CARGO_PKG_VERSION");

#[derive(Parser, Debug)]
#[command(about = "Run callout detection over tile images on disk", version)]
struct Args {
    /// Directory of tile images (tile_{x}_{y}.png) or a single page image.
    input: PathBuf,

    /// Valid sheet names, e.g. -s A5 -s A6 -s A7. May be repeated.
    #[arg(short = 's', long = "valid-sheet")]
    valid_sheets: Vec<String>,

    /// Enable aggressive false-positive filtering.
    #[arg(long)]
    strict_filtering: bool,

    /// Write the JSON report here instead of stdout.
    #[arg(short, long)]
    output: Option<PathBuf>,
}

async fn run(args: Args) -> PlansightResult<()> {
    let config = Config::from_env(&OsEnv)?;
    let state = build_state(&config)?;
    let ctx = ProjectContext::new(args.valid_sheets);

    let report: PageReport = if args.input.is_dir() {
        let tiles = load_tiles(&args.input)?;
        info!("loaded {} tiles from {}", tiles.len(), args.input.display());
        state
            .pipeline
            .detect_tiles(tiles, &ctx, args.strict_filtering)
            .await
    } else {
        let page = image::open(&args.input).map_err(|e| {
            PlansightError::IoError(std::io::Error::new(std::io::ErrorKind::InvalidData, e))
        })?;
        info!(
            "loaded page {} ({}x{})",
            args.input.display(),
            page.width(),
            page.height()
        );
        state
            .pipeline
            .detect_page(&page, &ctx, args.strict_filtering)
            .await?
    };

    info!(
        "{} candidates -> {} markers ({} accept / {} reject / {} uncertain, {} failed batches)",
        report.stage1_candidates,
        report.markers.len(),
        report.accepted,
        report.rejected,
        report.uncertain,
        report.batches_failed,
    );

    let out = serde_json::to_string_pretty(&json!({
        "stage1_candidates": report.stage1_candidates,
        "stage2_validated": report.stage2_validated,
        "markers": report.markers,
    }))
    .map_err(|e| PlansightError::IoError(std::io::Error::other(e)))?;

    match args.output {
        Some(path) => {
            std::fs::write(&path, out)?;
            info!("report written to {}", path.display());
        }
        None => println!("{out}"),
    }
    Ok(())
}

fn load_tiles(dir: &std::path::Path) -> PlansightResult<Vec<PageTile>> {
    let mut paths: Vec<PathBuf> = std::fs::read_dir(dir)?
        .filter_map(Result::ok)
        .map(|e| e.path())
        .filter(|p| {
            p.extension()
                .and_then(|ext| ext.to_str())
                .is_some_and(|ext| matches!(ext.to_lowercase().as_str(), "png" | "jpg" | "jpeg"))
        })
        .collect();
    paths.sort();

    let mut tiles = Vec::with_capacity(paths.len());
    for path in paths {
        let Some(name) = path.file_name().and_then(|n| n.to_str()) else {
            continue;
        };
        match image::open(&path) {
            Ok(img) => tiles.push(PageTile::from_named_image(name, img)),
            Err(e) => log::warn!("skipping {}: {e}", path.display()),
        }
    }
    Ok(tiles)
}

#[tokio::main(flavor = "current_thread")]
async fn main() {
    let filter = std::env::var("RUST_LOG").unwrap_or_else(|_| "plansight=info".to_string());
    init_tracing(&filter, std::env::var("PLANSIGHT_LOG_FORMAT").ok());
    info!("plansight-detect v{VERSION}");

    if let Err(e) = run(Args::parse()).await {
        if log_enabled!(log::Level::Error) {
            error!("{e}");
        } else {
            eprintln!("{e}");
        }
        std::process::exit(1);
    }
}
