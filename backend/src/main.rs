use std::io;
use std::sync::Arc;

use actix_cors::Cors;
use actix_web::middleware::Logger;
use actix_web::{web, App, HttpServer};

use trialmatch::classifier::ClassifierAdapter;
use trialmatch::classifier::guard::SkinGuard;
use trialmatch::config::AppConfig;
use trialmatch::routes::configure_routes;
use trialmatch::tasks::orchestrator::Orchestrator;
use trialmatch::tasks::task_store::TaskStore;
use trialmatch::trials::ClinicalTrialsClient;

#[actix_web::main]
async fn main() -> io::Result<()> {
    dotenv::dotenv().ok();
    env_logger::init_from_env(env_logger::Env::new().default_filter_or("info"));

    let config = AppConfig::load().map_err(|e| {
        log::error!("Failed to load configuration: {}", e);
        io::Error::new(io::ErrorKind::InvalidInput, e.to_string())
    })?;

    let classifier = ClassifierAdapter::from_settings(&config.classifier).map_err(|e| {
        log::error!("Failed to initialise classifier: {}", e);
        io::Error::other(e.to_string())
    })?;
    let trials = ClinicalTrialsClient::new(&config.trials).map_err(|e| {
        log::error!("Failed to initialise trial registry client: {}", e);
        io::Error::other(e.to_string())
    })?;

    let store = TaskStore::new();
    let mut orchestrator = Orchestrator::new(
        store.clone(),
        Arc::new(classifier),
        Arc::new(trials),
        &config.workers,
    );
    if config.guard.enabled {
        log::info!("Skin guard enabled (min skin ratio {})", config.guard.min_skin_ratio);
        orchestrator = orchestrator.with_guard(SkinGuard::new(config.guard.min_skin_ratio));
    }

    let server_settings = config.server.clone();
    let static_dir = config.server.static_dir.clone();
    let bind_address = config.bind_address();
    log::info!(
        "Starting server on {} ({} concurrent analyses)",
        bind_address,
        config.workers.max_concurrent
    );

    HttpServer::new(move || {
        App::new()
            .wrap(Logger::default())
            .wrap(
                Cors::default()
                    .allow_any_origin()
                    .allowed_methods(vec!["GET", "POST"])
                    .allowed_headers(vec![
                        actix_web::http::header::ACCEPT,
                        actix_web::http::header::CONTENT_TYPE,
                    ])
                    .max_age(3600),
            )
            .app_data(web::Data::new(store.clone()))
            .app_data(web::Data::new(orchestrator.clone()))
            .app_data(web::Data::new(server_settings.clone()))
            .configure(|cfg| configure_routes(cfg, static_dir.clone()))
    })
    .bind(&bind_address)?
    .run()
    .await
}
