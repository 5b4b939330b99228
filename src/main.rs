mod config;
mod error;
mod import;
mod jobs;
mod models;
mod pg;
mod routes;
mod s3;
mod storage;

use std::{fs, sync::Arc, time::Duration};

use actix_cors::Cors;
use actix_web::{App, HttpServer, middleware::Logger, web};
use config::AppConfig;
use import::Importer;
use jobs::JobRegistry;
use routes::register;
use storage::Storage;
use tracing::info;
use tracing_appender::rolling;
use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

pub struct AppState {
    pub storage: Storage,
    pub jobs: Arc<JobRegistry>,
    pub importer: Importer,
}

#[actix_web::main]
async fn main() -> std::io::Result<()> {
    dotenvy::dotenv().ok();
    let config = AppConfig::from_env().expect("failed to load config");

    fs::create_dir_all(&config.log_dir).expect("failed to create log directory");
    let file_appender = rolling::never(&config.log_dir, "backend.log");
    let (file_writer, guard) = tracing_appender::non_blocking(file_appender);
    let _guard = guard;

    let env_filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new("info"))
        .expect("failed to init logging filter");

    tracing_subscriber::registry()
        .with(env_filter)
        .with(fmt::layer())
        .with(fmt::layer().with_ansi(false).with_writer(file_writer))
        .init();

    let storage = Storage::new(&config.storage_root).expect("failed to prepare storage root");
    let jobs = Arc::new(JobRegistry::new(
        config.job_retention_secs.map(Duration::from_secs),
    ));
    let importer = Importer::start(config.import_workers, Arc::clone(&jobs), storage.clone());

    info!(
        host = %config.host,
        port = config.port,
        workers = config.import_workers,
        storage_root = %config.storage_root.display(),
        "starting harbor backend"
    );

    let bind_addr = format!("{}:{}", config.host, config.port);
    let shared_state = web::Data::new(AppState {
        storage,
        jobs,
        importer,
    });

    HttpServer::new(move || {
        App::new()
            .wrap(Logger::default())
            .wrap(Cors::permissive())
            .app_data(shared_state.clone())
            .configure(register)
    })
    .bind(bind_addr)?
    .run()
    .await
}
