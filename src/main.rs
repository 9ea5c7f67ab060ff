use actix_web::{
    get, middleware, web::Data, App, HttpRequest, HttpResponse, HttpServer, Responder,
};
use capi_argocd_registrar::{self as registrar, config::Options, telemetry, State};
use clap::Parser;
use prometheus::{Encoder, TextEncoder};
use tracing::{error, info};

#[get("/metrics")]
async fn metrics(c: Data<State>, _req: HttpRequest) -> impl Responder {
    let metrics = c.metrics();
    let encoder = TextEncoder::new();
    let mut buffer = vec![];
    match encoder.encode(&metrics, &mut buffer) {
        Ok(()) => HttpResponse::Ok().body(buffer),
        Err(e) => {
            error!("Failed to encode metrics: {e}");
            HttpResponse::InternalServerError().finish()
        }
    }
}

#[get("/health")]
async fn health(_: HttpRequest) -> impl Responder {
    HttpResponse::Ok().json("healthy")
}

#[get("/")]
async fn index(c: Data<State>, _req: HttpRequest) -> impl Responder {
    let d = c.diagnostics().await;
    HttpResponse::Ok().json(&d)
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let options = Options::parse();
    options.validate().map_err(registrar::Error::from)?;
    telemetry::init(options.log_format)?;

    info!(
        id = %options.cluster_id,
        timeout = ?options.timeout,
        naming = ?options.naming,
        "Starting capi-argocd-registrar"
    );

    // Init k8s controller state
    let state = State::default();
    let cluster_controller = registrar::run(state.clone(), options.clone());

    // Start web server
    let server = HttpServer::new(move || {
        App::new()
            .app_data(Data::new(state.clone()))
            .wrap(middleware::Logger::default().exclude("/health"))
            .service(index)
            .service(health)
            .service(metrics)
    })
    .bind(options.metrics_addr)?
    .shutdown_timeout(5)
    .run();

    let (controller, server) = tokio::join!(cluster_controller, server);
    controller?;
    server?;
    Ok(())
}
