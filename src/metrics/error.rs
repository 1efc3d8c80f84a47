//! Error types for the metrics system

use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum MetricsError {
    /// Invalid metric name (empty or characters Prometheus rejects)
    #[error("Invalid metric name '{name}': {reason}")]
    InvalidName { name: String, reason: String },

    /// Metric could not be created or registered
    #[error("Failed to register metric '{name}': {reason}")]
    RegistrationFailed { name: String, reason: String },

    #[error("Failed to export metrics: {reason}")]
    ExportFailed { reason: String },
}

impl MetricsError {
    pub fn invalid_name<N: Into<String>, R: Into<String>>(name: N, reason: R) -> Self {
        Self::InvalidName {
            name: name.into(),
            reason: reason.into(),
        }
    }

    pub fn registration_failed<N: Into<String>, R: Into<String>>(name: N, reason: R) -> Self {
        Self::RegistrationFailed {
            name: name.into(),
            reason: reason.into(),
        }
    }

    pub fn export_failed<R: Into<String>>(reason: R) -> Self {
        Self::ExportFailed {
            reason: reason.into(),
        }
    }
}

/// Check a metric name against the Prometheus naming rules
pub fn validate_metric_name(name: &str) -> Result<(), MetricsError> {
    let mut chars = name.chars();
    match chars.next() {
        None => return Err(MetricsError::invalid_name(name, "name is empty")),
        Some(first) if !(first.is_ascii_alphabetic() || first == '_' || first == ':') => {
            return Err(MetricsError::invalid_name(
                name,
                "must start with a letter, underscore or colon",
            ))
        }
        Some(_) => {}
    }

    if chars.any(|c| !(c.is_ascii_alphanumeric() || c == '_' || c == ':')) {
        return Err(MetricsError::invalid_name(
            name,
            "only letters, digits, underscores and colons are allowed",
        ));
    }
    Ok(())
}
