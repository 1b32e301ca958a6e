use std::future::Future;
use std::pin::Pin;
use std::time::Duration;

use actix_web::http::header::CACHE_CONTROL;
use actix_web::middleware::{NormalizePath, TrailingSlash};
use actix_web::web::Data;
use actix_web::{App, HttpResponse, HttpServer, Responder, route, web};
use futures::TryFutureExt as _;
use serde_json::json;
use tracing_actix_web::TracingLogger;

use crate::config::{KEEP_ALIVE_DEFAULT, LISTEN_ADDRESSES_DEFAULT, SrvConfig};
use crate::{PlansightError, PlansightResult, ReadyState};

/// Readiness/liveness probe: 200 once models are loaded, 503 before.
#[route("/health", method = "GET", method = "HEAD")]
async fn get_health(ready: Data<ReadyState>) -> impl Responder {
    if ready.get().is_some() {
        HttpResponse::Ok()
            .insert_header((CACHE_CONTROL, "no-cache"))
            .json(json!({"status": "ready"}))
    } else {
        HttpResponse::ServiceUnavailable()
            .insert_header((CACHE_CONTROL, "no-cache"))
            .json(json!({"status": "initializing"}))
    }
}

/// Registers all services.
pub fn router(cfg: &mut web::ServiceConfig) {
    cfg.service(get_health)
        .service(super::markers::detect_markers)
        .service(super::metadata::extract_metadata);
}

type Server = Pin<Box<dyn Future<Output = PlansightResult<()>>>>;

/// Create a future for an Actix web server together with the listening address.
pub fn new_server(config: SrvConfig, ready: ReadyState) -> PlansightResult<(Server, String)> {
    let keep_alive = Duration::from_secs(config.keep_alive.unwrap_or(KEEP_ALIVE_DEFAULT));
    let worker_processes = config.worker_processes.unwrap_or_else(num_cpus::get);
    let listen_addresses = config
        .listen_addresses
        .clone()
        .unwrap_or_else(|| LISTEN_ADDRESSES_DEFAULT.to_string());

    let factory = move || {
        App::new()
            .app_data(Data::new(ready.clone()))
            .wrap(TracingLogger::default())
            .wrap(NormalizePath::new(TrailingSlash::MergeOnly))
            .configure(router)
    };

    let server = HttpServer::new(factory)
        .bind(listen_addresses.clone())
        .map_err(|e| PlansightError::BindingError(e, listen_addresses.clone()))?
        .keep_alive(keep_alive)
        .shutdown_timeout(0)
        .workers(worker_processes)
        .run()
        .err_into();

    Ok((Box::pin(server), listen_addresses))
}
