// Request validation for Transcript API
//
// This module turns raw submission fields into a validated, immutable JobRequest and
// computes the cache fingerprint that identifies semantically identical requests.

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fmt;
use std::str::FromStr;
use url::Url;

use crate::config::ValidationConfig;
use crate::error::JobError;

/// Speech recognition model sizes understood by the transcriber
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Model {
    #[serde(rename = "tiny")]
    Tiny,
    #[serde(rename = "base")]
    Base,
    #[serde(rename = "small")]
    Small,
    #[serde(rename = "medium")]
    Medium,
    #[serde(rename = "large-v2")]
    LargeV2,
}

impl Model {
    pub const ALL: [Model; 5] = [
        Model::Tiny,
        Model::Base,
        Model::Small,
        Model::Medium,
        Model::LargeV2,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Model::Tiny => "tiny",
            Model::Base => "base",
            Model::Small => "small",
            Model::Medium => "medium",
            Model::LargeV2 => "large-v2",
        }
    }
}

impl Default for Model {
    fn default() -> Self {
        Model::Small
    }
}

impl FromStr for Model {
    type Err = JobError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Model::ALL
            .into_iter()
            .find(|model| model.as_str() == s)
            .ok_or_else(|| JobError::InvalidInput(format!("Unsupported model: {}", s)))
    }
}

impl fmt::Display for Model {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Spoken language selector, `Auto` lets the transcriber detect it
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Language {
    Auto,
    Ko,
    En,
    Ja,
    Zh,
}

impl Language {
    pub const ALL: [Language; 5] = [
        Language::Auto,
        Language::Ko,
        Language::En,
        Language::Ja,
        Language::Zh,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Language::Auto => "auto",
            Language::Ko => "ko",
            Language::En => "en",
            Language::Ja => "ja",
            Language::Zh => "zh",
        }
    }
}

impl Default for Language {
    fn default() -> Self {
        Language::Auto
    }
}

impl FromStr for Language {
    type Err = JobError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Language::ALL
            .into_iter()
            .find(|language| language.as_str() == s)
            .ok_or_else(|| JobError::InvalidInput(format!("Unsupported language: {}", s)))
    }
}

impl fmt::Display for Language {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Check that `raw` is an http(s) URL on an allowed host.
///
/// Returns the normalised URL with any fragment removed.
pub fn validate_source_url(raw: &str, allowed_hosts: &[String]) -> Result<Url, JobError> {
    let raw = raw.trim();
    if raw.is_empty() {
        return Err(JobError::InvalidInput("A source URL is required".to_string()));
    }

    let mut url = Url::parse(raw)
        .map_err(|_| JobError::InvalidInput("Malformed source URL".to_string()))?;

    if !matches!(url.scheme(), "http" | "https") {
        return Err(JobError::InvalidInput(format!(
            "Unsupported URL scheme: {}",
            url.scheme()
        )));
    }

    let host = url
        .host_str()
        .ok_or_else(|| JobError::InvalidInput("Source URL has no host".to_string()))?;
    if !allowed_hosts.iter().any(|allowed| allowed.eq_ignore_ascii_case(host)) {
        return Err(JobError::InvalidInput(format!("Host not allowed: {}", host)));
    }

    url.set_fragment(None);
    Ok(url)
}

/// Deterministic digest identifying cache-equivalent requests
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct CacheFingerprint(String);

impl CacheFingerprint {
    pub fn compute(source_url: &Url, model: Model, language: Language) -> Self {
        let mut hasher = Sha256::new();
        hasher.update(format!("{}:{}:{}", source_url, model, language).as_bytes());
        Self(format!("{:x}", hasher.finalize()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for CacheFingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// A validated transcription request
#[derive(Debug, Clone)]
pub struct JobRequest {
    pub source_url: Url,
    pub model: Model,
    pub language: Language,
    /// Caller supplied progress channel key
    pub correlation_id: Option<String>,
}

impl JobRequest {
    /// Validate raw submission fields against the configured allow-lists
    pub fn validate(
        url: &str,
        model: Option<&str>,
        language: Option<&str>,
        correlation_id: Option<String>,
        config: &ValidationConfig,
    ) -> Result<Self, JobError> {
        let source_url = validate_source_url(url, &config.allowed_hosts)?;

        let model = match model {
            Some(name) => name.trim().parse()?,
            None => Model::default(),
        };
        if !config.models.contains(&model) {
            return Err(JobError::InvalidInput(format!("Model not enabled: {}", model)));
        }

        let language = match language {
            Some(code) => code.trim().parse()?,
            None => Language::default(),
        };
        if !config.languages.contains(&language) {
            return Err(JobError::InvalidInput(format!(
                "Language not enabled: {}",
                language
            )));
        }

        let correlation_id = correlation_id
            .map(|id| id.trim().to_string())
            .filter(|id| !id.is_empty());

        Ok(Self {
            source_url,
            model,
            language,
            correlation_id,
        })
    }

    pub fn fingerprint(&self) -> CacheFingerprint {
        CacheFingerprint::compute(&self.source_url, self.model, self.language)
    }
}
