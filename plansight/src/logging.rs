//! Logging initialization using `tracing` and `tracing-subscriber`.
//!
//! - `RUST_LOG` controls level filtering (standard tracing-subscriber behavior)
//! - `PLANSIGHT_LOG_FORMAT` controls output format (compact, full, pretty, json)

use std::str::FromStr;

use tracing_subscriber::fmt::format::FmtSpan;
use tracing_subscriber::layer::SubscriberExt as _;
use tracing_subscriber::util::SubscriberInitExt as _;
use tracing_subscriber::{EnvFilter, Layer as _, Registry};

/// Log output format options.
///
/// Controlled by the `PLANSIGHT_LOG_FORMAT` environment variable.
#[derive(Debug, Clone, Copy)]
pub enum LogFormat {
    /// Human-readable, single-line logs.
    Full,
    /// A variant of the full format optimized for short lines (default).
    Compact,
    /// Multi-line logs for local development/debugging.
    Pretty,
    /// Newline-delimited structured JSON logs.
    Json,
}

impl Default for LogFormat {
    fn default() -> Self {
        if cfg!(debug_assertions) {
            Self::Pretty
        } else {
            Self::Compact
        }
    }
}

impl FromStr for LogFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "full" => Ok(Self::Full),
            "compact" => Ok(Self::Compact),
            "pretty" | "verbose" => Ok(Self::Pretty),
            "json" | "jsonl" => Ok(Self::Json),
            _ => Err(format!(
                "Invalid log format '{s}'. Valid options: full, compact, pretty, json"
            )),
        }
    }
}

/// Initialize the global tracing subscriber for the given filter and format.
///
/// Bridges `log` records into `tracing` events so library crates using the
/// `log` macros end up in the same stream.
pub fn init_tracing(filter: &str, format: Option<String>) {
    let _ = tracing_log::LogTracer::builder()
        .with_interest_cache(tracing_log::InterestCacheConfig::default())
        .init();

    let env_filter = EnvFilter::from_str(filter).unwrap_or_else(|_| {
        eprintln!("Warning: invalid filter string '{filter}', falling back to 'info'");
        EnvFilter::new("info")
    });

    let format = format
        .and_then(|s| {
            s.parse::<LogFormat>()
                .map_err(|e| eprintln!("Warning: {e}; falling back to the default format"))
                .ok()
        })
        .unwrap_or_default();

    match format {
        LogFormat::Full => {
            let fmt_layer = tracing_subscriber::fmt::layer()
                .with_span_events(FmtSpan::NONE)
                .with_filter(env_filter);
            Registry::default().with(fmt_layer).init();
        }
        LogFormat::Compact => {
            let fmt_layer = tracing_subscriber::fmt::layer()
                .compact()
                .with_span_events(FmtSpan::NONE)
                .with_filter(env_filter);
            Registry::default().with(fmt_layer).init();
        }
        LogFormat::Pretty => {
            let fmt_layer = tracing_subscriber::fmt::layer()
                .pretty()
                .with_filter(env_filter);
            Registry::default().with(fmt_layer).init();
        }
        LogFormat::Json => {
            let fmt_layer = tracing_subscriber::fmt::layer()
                .json()
                .with_span_events(FmtSpan::NONE)
                .with_filter(env_filter);
            Registry::default().with(fmt_layer).init();
        }
    }
}

/// Initialize tracing for tests: compact, test writer, never panics when
/// another test already installed a subscriber.
pub fn init_tracing_for_tests() -> Result<(), Box<dyn std::error::Error>> {
    use tracing_subscriber::fmt;

    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    let subscriber = fmt()
        .compact()
        .with_test_writer()
        .with_env_filter(env_filter)
        .with_span_events(FmtSpan::NONE)
        .finish();

    tracing::subscriber::set_global_default(subscriber)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_known_formats() {
        assert!(matches!("json".parse::<LogFormat>(), Ok(LogFormat::Json)));
        assert!(matches!("PRETTY".parse::<LogFormat>(), Ok(LogFormat::Pretty)));
        assert!("nope".parse::<LogFormat>().is_err());
    }
}
