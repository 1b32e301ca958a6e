use std::sync::{Arc, OnceLock};

use clap::Parser as _;
use log::{error, info, log_enabled};
use plansight::args::Args;
use plansight::config::{Config, OsEnv};
use plansight::srv::new_server;
use plansight::{PlansightResult, ReadyState, build_state, init_tracing};

const VERSION: &str = env!("CARGO_PKG_VERSION");

async fn start(args: Args) -> PlansightResult<()> {
    let filter = std::env::var("RUST_LOG").unwrap_or_else(|_| "plansight=info".to_string());
    init_tracing(&filter, std::env::var("PLANSIGHT_LOG_FORMAT").ok());
    info!("Starting Plansight v{VERSION}");

    let mut config = Config::from_env(&OsEnv)?;
    args.merge_into_config(&mut config);

    // the server answers 503 until model/service loading completes
    let ready: ReadyState = Arc::new(OnceLock::new());
    {
        let ready = ready.clone();
        let config = config.clone();
        tokio::task::spawn_blocking(move || match build_state(&config) {
            Ok(state) => {
                let _ = ready.set(Arc::new(state));
                info!("detectors loaded, service is ready");
            }
            Err(e) => error!("failed to initialize service state: {e}"),
        });
    }

    let (server, listen_addresses) = new_server(config.srv, ready)?;
    info!("Plansight has been started on {listen_addresses}.");
    info!("Use http://{listen_addresses}/health to check readiness.");

    server.await
}

#[actix_web::main]
async fn main() {
    if let Err(e) = start(Args::parse()).await {
        // Ensure the message is printed, even if the logging is disabled
        if log_enabled!(log::Level::Error) {
            error!("{e}");
        } else {
            eprintln!("{e}");
        }
        std::process::exit(1);
    }
}
