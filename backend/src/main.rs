use std::path::Path;

use actix_files::Files;
use actix_web::middleware::{DefaultHeaders, Logger};
use actix_web::{web, App, HttpServer};
use anyhow::Context;
use clap::Parser;
use log::{error, info, warn};

use potato_leaf_server::config::{Cli, ServerConfig};
use potato_leaf_server::inference::load_classifier;
use potato_leaf_server::routes::{self, AppState};

fn ensure_static_dir(dir: &Path) -> anyhow::Result<()> {
    std::fs::create_dir_all(dir)
        .with_context(|| format!("failed to create static directory {}", dir.display()))
}

#[actix_web::main]
async fn main() -> anyhow::Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info"))
        .format_timestamp_millis()
        .format_module_path(false)
        .init();

    let config = ServerConfig::from(Cli::parse());
    if let Err(e) = config.validate() {
        error!("Invalid configuration: {}", e);
        anyhow::bail!("invalid configuration: {}", e);
    }

    info!("Starting potato leaf disease detection v{}", env!("CARGO_PKG_VERSION"));

    ensure_static_dir(&config.static_dir)?;

    let classifier = load_classifier(&config);
    match &classifier {
        Some(_) => info!("Model loaded from {:?}", config.model_path),
        None => warn!(
            "Running without a model; predictions will report it as not loaded"
        ),
    }

    let bind_address = config.bind_address();
    let workers = config.workers;
    let static_dir = config.static_dir.clone();
    let state = web::Data::new(AppState::new(config, classifier));

    info!("Listening on http://{}", bind_address);
    info!("Workers: {}", workers);
    info!("Endpoints:");
    info!("   GET  /                - Upload form");
    info!("   POST /                - Predict from uploaded image");
    info!("   GET  /api/health      - Health check");
    info!("   GET  /api/model-info  - Model information");
    info!("   GET  /static/*        - Uploaded images");

    HttpServer::new(move || {
        App::new()
            .wrap(Logger::default())
            .wrap(DefaultHeaders::new().add(("X-Content-Type-Options", "nosniff")))
            .app_data(state.clone())
            .configure(routes::configure)
            .service(Files::new("/static", static_dir.clone()))
    })
    .workers(workers)
    .bind(&bind_address)
    .with_context(|| format!("failed to bind {}", bind_address))?
    .run()
    .await
    .context("server stopped with an error")
}
