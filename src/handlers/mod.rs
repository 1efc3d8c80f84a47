// Transcript API HTTP handlers
//
// This module contains the HTTP handlers for the Transcript API.
// It provides the interface between HTTP requests and the request controller.

pub mod routes;

use actix_web::web;

use crate::error::{HandlerError, JobError};

// Re-export handlers for easier access
pub use self::routes::{
    cache_stats, cancel_transcription, health, metrics_handler, progress_stream, transcribe,
};

/// Register every route on an application
///
/// Unreadable JSON bodies are answered like any other invalid input.
pub fn configure(cfg: &mut web::ServiceConfig) {
    let json = web::JsonConfig::default().error_handler(|err, _req| {
        HandlerError::from(JobError::InvalidInput(format!("malformed request body: {}", err)))
            .into()
    });

    cfg.app_data(json)
        .service(transcribe)
        .service(progress_stream)
        .service(cancel_transcription)
        .service(cache_stats)
        .service(health)
        .service(metrics_handler);
}
