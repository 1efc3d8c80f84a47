// Transcript API data models
//
// This module contains the transcript data model and the request and response
// types used across the API.

use serde::{Deserialize, Serialize};

/// Body of a transcription submission
#[derive(Debug, Default, Deserialize)]
pub struct TranscribeRequest {
    /// Source media URL
    #[serde(default)]
    pub url: String,
    /// Language code, defaults to "auto"
    pub lang: Option<String>,
    /// Model name, defaults to "small"
    pub model: Option<String>,
    /// Progress channel id chosen by the caller
    #[serde(rename = "processId")]
    pub process_id: Option<String>,
}

/// One timed piece of transcribed speech
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Segment {
    /// Start offset in seconds
    pub start: f64,
    /// End offset in seconds
    pub end: f64,
    pub text: String,
}

/// Result of a completed transcription
///
/// `srt` is always rendered from `segments` and carried only for transport.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TranscriptArtifact {
    pub segments: Vec<Segment>,
    /// Detected or declared language
    pub language: Option<String>,
    /// Total media duration in seconds
    pub duration: Option<f64>,
    pub srt: String,
}

/// Successful transcription response
#[derive(Serialize)]
pub struct TranscriptionResponse<'a> {
    pub ok: bool,
    #[serde(flatten)]
    pub artifact: &'a TranscriptArtifact,
    /// True when served from the result cache
    pub cached: bool,
}

/// Error response for API
#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorResponse {
    /// Error message
    pub error: String,
    /// Error class identifier
    pub kind: String,
}

/// Success response for API
#[derive(Serialize)]
pub struct SuccessResponse {
    pub success: bool,
    pub message: String,
}

/// Liveness probe response
#[derive(Serialize)]
pub struct HealthResponse {
    pub ok: bool,
}
