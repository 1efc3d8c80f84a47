// API route handlers for Transcript API
//
// This module contains the route handlers for the Transcript API.
// It implements the actual HTTP endpoints on top of the request controller.

use crate::controller::RequestController;
use crate::error::HandlerError;
use crate::metrics::Metrics;
use crate::models::{HealthResponse, SuccessResponse, TranscribeRequest, TranscriptionResponse};
use actix_web::http::StatusCode;
use actix_web::web::Bytes;
use actix_web::{delete, get, post, web, HttpResponse, ResponseError};
use futures::stream::{self, StreamExt};
use log::{error, info};
use std::time::Instant;

/// Handler for transcription requests
///
/// Runs the whole job within the request and answers with the transcript, or with
/// the classified error. A `processId` in the body binds the job to a progress
/// stream opened beforehand on `/api/progress/{processId}`.
#[post("/api/transcribe")]
pub async fn transcribe(
    body: web::Json<TranscribeRequest>,
    controller: web::Data<RequestController>,
    metrics: web::Data<Metrics>,
) -> Result<HttpResponse, HandlerError> {
    let start_time = Instant::now();

    let submission = controller
        .submit(body.into_inner())
        .await
        .map_err(HandlerError::from);

    let status = match &submission {
        Ok(_) => StatusCode::OK,
        Err(e) => e.status_code(),
    };
    metrics
        .record_http_request(
            "/api/transcribe",
            "POST",
            status.as_str(),
            start_time.elapsed().as_secs_f64(),
        )
        .await;

    let submission = submission?;
    Ok(HttpResponse::Ok().json(TranscriptionResponse {
        ok: true,
        artifact: &submission.artifact,
        cached: submission.cached,
    }))
}

/// Server-sent progress events for one job
///
/// The stream ends after the terminal event, or when the job finishes and closes
/// the channel. A client disconnect drops the subscription, which deregisters it.
#[get("/api/progress/{process_id}")]
pub async fn progress_stream(
    process_id: web::Path<String>,
    controller: web::Data<RequestController>,
) -> HttpResponse {
    let process_id = process_id.into_inner();
    info!("Progress stream opened for {}", process_id);
    let subscription = controller.hub().open_channel(&process_id);

    let events = stream::unfold(Some(subscription), |state| async move {
        let mut subscription = state?;
        let event = subscription.recv().await?;
        let frame = Bytes::from(event.to_sse_frame());
        let next = if event.is_terminal() {
            None
        } else {
            Some(subscription)
        };
        Some((Ok::<_, actix_web::Error>(frame), next))
    });
    let body = stream::once(async { Ok(Bytes::from_static(b": connected\n\n")) }).chain(events);

    HttpResponse::Ok()
        .content_type("text/event-stream")
        .insert_header(("Cache-Control", "no-cache"))
        .insert_header(("Access-Control-Allow-Origin", "*"))
        .streaming(body)
}

/// Handler for job cancellation requests
#[delete("/api/transcribe/{process_id}")]
pub async fn cancel_transcription(
    process_id: web::Path<String>,
    controller: web::Data<RequestController>,
    metrics: web::Data<Metrics>,
) -> Result<HttpResponse, HandlerError> {
    let start_time = Instant::now();
    let process_id = process_id.into_inner();

    let cancelled = controller.cancel(&process_id);
    let status = if cancelled { "200" } else { "404" };
    metrics
        .record_http_request(
            "/api/transcribe/{process_id}",
            "DELETE",
            status,
            start_time.elapsed().as_secs_f64(),
        )
        .await;

    if !cancelled {
        return Err(HandlerError::JobNotFound(process_id));
    }
    Ok(HttpResponse::Ok().json(SuccessResponse {
        success: true,
        message: format!("Job {} cancelled", process_id),
    }))
}

/// Read-only view of the result cache
#[get("/api/cache/stats")]
pub async fn cache_stats(controller: web::Data<RequestController>) -> HttpResponse {
    HttpResponse::Ok().json(controller.cache_stats().await)
}

#[get("/health")]
pub async fn health() -> HttpResponse {
    HttpResponse::Ok().json(HealthResponse { ok: true })
}

/// Metrics endpoint handler
#[get("/metrics")]
pub async fn metrics_handler(metrics: web::Data<Metrics>) -> HttpResponse {
    match metrics.export().await {
        Ok(data) => HttpResponse::Ok()
            .content_type("text/plain; version=0.0.4; charset=utf-8")
            .body(data),
        Err(e) => {
            error!("Failed to export metrics: {}", e);
            HttpResponse::InternalServerError().json(format!("Failed to export metrics: {}", e))
        }
    }
}
