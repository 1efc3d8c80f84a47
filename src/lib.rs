// Transcript API Library
//
// This crate provides an HTTP API turning a media URL into a timed transcript.
// Requests are validated, served from a TTL cache when possible, and otherwise run
// through an external extraction and transcription pipeline under a fixed
// concurrency limit, with live progress published per job.

pub mod admission;
pub mod cache;
pub mod config;
pub mod config_loader;
pub mod controller;
pub mod error;
pub mod handlers;
pub mod metrics;
pub mod models;
pub mod pipeline;
pub mod progress;
pub mod stages;
pub mod subtitles;
pub mod validation;
pub mod workspace;

#[cfg(test)]
mod test_support;

// Re-export common types for easier access
pub use config::AppConfig;
pub use controller::{RequestController, Submission};
pub use error::{HandlerError, JobError};
pub use metrics::Metrics;
pub use models::{ErrorResponse, SuccessResponse, TranscriptArtifact, TranscriptionResponse};
