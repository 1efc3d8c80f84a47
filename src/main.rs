use actix_web::{middleware::Logger, web, App, HttpServer};
use env_logger::Env;
use log::{error, info, warn};
use std::io;
use std::sync::Arc;

use transcript_api::admission::AdmissionGate;
use transcript_api::cache::ResultCache;
use transcript_api::config::AppConfig;
use transcript_api::config_loader::{config_path, load_config};
use transcript_api::controller::RequestController;
use transcript_api::handlers::configure;
use transcript_api::metrics::{create_metrics_exporter, Metrics};
use transcript_api::pipeline::PipelineRunner;
use transcript_api::progress::ProgressHub;
use transcript_api::stages::{ScriptTranscriber, YtDlpExtractor};

#[actix_web::main]
async fn main() -> io::Result<()> {
    // Initialize logger
    env_logger::Builder::from_env(Env::default().default_filter_or("info")).init();

    if !load_config() {
        info!(
            "No configuration file at {}, using environment and defaults",
            config_path().display()
        );
    }

    let config = AppConfig::from_env();
    if let Err(e) = config.validate() {
        error!("Invalid configuration: {}", e);
        return Err(io::Error::new(io::ErrorKind::InvalidInput, e));
    }

    let metrics = Metrics::new(create_metrics_exporter(&config.metrics.exporter_type));

    if let Err(e) = config.pipeline.ensure_temp_dir() {
        warn!(
            "Failed to create temp directory {}: {}",
            config.pipeline.temp_dir.display(),
            e
        );
    }

    let cache = Arc::new(ResultCache::new(config.cache.ttl, config.cache.max_entries));
    if let Some(every) = config.cache.sweep_interval {
        cache.spawn_sweeper(every);
    }

    let runner = PipelineRunner::new(
        Arc::new(YtDlpExtractor::new(config.pipeline.extractor_cmd.clone())),
        Arc::new(ScriptTranscriber::new(
            config.pipeline.transcriber_cmd.clone(),
            &config.pipeline.transcriber_script,
        )),
        &config.pipeline,
    );
    let controller = web::Data::new(RequestController::new(
        config.validation.clone(),
        cache,
        AdmissionGate::new(config.admission.max_concurrent_jobs),
        Arc::new(ProgressHub::new()),
        runner,
        metrics.clone(),
    ));

    let server = &config.server;
    info!(
        "Starting Transcript API server on http://{}",
        server.bind_address()
    );
    info!("Using temp directory: {}", config.pipeline.temp_dir.display());
    info!(
        "Extractor: {}, transcriber: {} {}",
        config.pipeline.extractor_cmd,
        config.pipeline.transcriber_cmd,
        config.pipeline.transcriber_script.display()
    );
    info!(
        "Cache: {} entries, TTL {}s; max concurrent jobs: {}",
        config.cache.max_entries,
        config.cache.ttl.as_secs(),
        config.admission.max_concurrent_jobs
    );
    info!("Metrics exporter: {}", config.metrics.exporter_type);

    HttpServer::new(move || {
        App::new()
            .wrap(Logger::default())
            .app_data(controller.clone())
            .app_data(web::Data::new(metrics.clone()))
            .configure(configure)
    })
    .bind(server.bind_address())?
    .client_disconnect_timeout(server.client_timeout)
    .keep_alive(server.keep_alive)
    .workers(server.worker_count())
    .run()
    .await
}
