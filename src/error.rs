// Error handling for Transcript API
//
// This module defines the job error taxonomy shared by every component and the
// HTTP error type that maps it onto responses.

use std::io;
use thiserror::Error;

use actix_web::http::StatusCode;
use actix_web::{HttpResponse, ResponseError};

use crate::models::ErrorResponse;

/// Classified failure of a transcription job
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum JobError {
    /// Malformed URL, disallowed host, unknown model or language
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// Every admission slot is taken
    #[error("Server is busy, please try again later")]
    CapacityExceeded,

    /// The download/extraction stage produced no usable audio
    #[error("Audio extraction failed: {0}")]
    ExtractionFailure(String),

    /// The speech-to-text stage reported an error or malformed output
    #[error("Transcription failed: {0}")]
    TranscriptionFailure(String),

    /// The caller withdrew before completion
    #[error("Job was cancelled")]
    Cancelled,

    /// Anything unexpected: spawn failures, filesystem errors
    #[error("Internal error: {0}")]
    Internal(String),
}

impl JobError {
    /// Stable identifier of the error class
    pub fn kind(&self) -> &'static str {
        match self {
            JobError::InvalidInput(_) => "invalid_input",
            JobError::CapacityExceeded => "capacity_exceeded",
            JobError::ExtractionFailure(_) => "extraction_failure",
            JobError::TranscriptionFailure(_) => "transcription_failure",
            JobError::Cancelled => "cancelled",
            JobError::Internal(_) => "internal",
        }
    }

    /// Message safe to return to a client; internal details stay in the logs
    pub fn public_message(&self) -> String {
        match self {
            JobError::Internal(_) => "Internal server error".to_string(),
            other => other.to_string(),
        }
    }
}

impl From<io::Error> for JobError {
    fn from(err: io::Error) -> Self {
        JobError::Internal(err.to_string())
    }
}

/// Errors that can occur in the Transcript API handlers
#[derive(Error, Debug)]
pub enum HandlerError {
    /// A classified job failure
    #[error(transparent)]
    Job(#[from] JobError),

    /// No in-flight job is registered under this id
    #[error("Job not found: {0}")]
    JobNotFound(String),
}

impl ResponseError for HandlerError {
    fn status_code(&self) -> StatusCode {
        match self {
            HandlerError::Job(JobError::InvalidInput(_)) => StatusCode::BAD_REQUEST,
            HandlerError::Job(JobError::CapacityExceeded) => StatusCode::TOO_MANY_REQUESTS,
            HandlerError::Job(JobError::ExtractionFailure(_)) => StatusCode::UNPROCESSABLE_ENTITY,
            HandlerError::Job(JobError::TranscriptionFailure(_)) => StatusCode::BAD_GATEWAY,
            HandlerError::Job(JobError::Cancelled) => StatusCode::CONFLICT,
            HandlerError::Job(JobError::Internal(_)) => StatusCode::INTERNAL_SERVER_ERROR,
            HandlerError::JobNotFound(_) => StatusCode::NOT_FOUND,
        }
    }

    fn error_response(&self) -> HttpResponse {
        let error_response = match self {
            HandlerError::Job(err) => ErrorResponse {
                error: err.public_message(),
                kind: err.kind().to_string(),
            },
            HandlerError::JobNotFound(_) => ErrorResponse {
                error: self.to_string(),
                kind: "not_found".to_string(),
            },
        };

        HttpResponse::build(self.status_code()).json(error_response)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_internal_detail_is_hidden() {
        let err = JobError::Internal("failed to spawn /opt/secret/bin".to_string());
        assert_eq!(err.public_message(), "Internal server error");
        assert_eq!(err.kind(), "internal");
    }

    #[test]
    fn test_status_codes() {
        let cases = [
            (JobError::InvalidInput("x".into()), StatusCode::BAD_REQUEST),
            (JobError::CapacityExceeded, StatusCode::TOO_MANY_REQUESTS),
            (JobError::ExtractionFailure("x".into()), StatusCode::UNPROCESSABLE_ENTITY),
            (JobError::TranscriptionFailure("x".into()), StatusCode::BAD_GATEWAY),
            (JobError::Cancelled, StatusCode::CONFLICT),
            (JobError::Internal("x".into()), StatusCode::INTERNAL_SERVER_ERROR),
        ];
        for (err, status) in cases {
            assert_eq!(HandlerError::from(err).status_code(), status);
        }
        assert_eq!(
            HandlerError::JobNotFound("abc".into()).status_code(),
            StatusCode::NOT_FOUND
        );
    }
}
