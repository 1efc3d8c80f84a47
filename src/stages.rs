//! External pipeline stages
//!
//! The audio extractor and the speech transcriber are opaque external programs. This
//! module is the only place they are invoked, and therefore the only place where raw
//! process failures are classified into [`JobError`] variants:
//!
//! - failing to spawn a program is [`JobError::Internal`]
//! - a non-zero extractor exit is [`JobError::ExtractionFailure`]
//! - a transcriber `error` field, non-zero exit or unparsable output is
//!   [`JobError::TranscriptionFailure`]
//!
//! Each program runs in its own process group. Dropping a stage future
//! (cancellation) kills the program and everything it started.

use async_trait::async_trait;
use log::{debug, error, warn};
use serde::Deserialize;
use std::env;
use std::path::{Path, PathBuf};
use std::process::{Output, Stdio};
use tokio::process::Command;
use url::Url;

use crate::error::JobError;
use crate::models::Segment;
use crate::validation::{Language, Model};
use crate::workspace::AUDIO_OUTPUT_TEMPLATE;

/// Longest stderr tail kept in logs
const STDERR_EXCERPT_CHARS: usize = 800;

/// Downloads a source and leaves its audio track in the workspace
#[async_trait]
pub trait AudioExtractor: Send + Sync {
    /// Write the audio of `source_url` to the fixed audio file inside `workspace`,
    /// refusing output larger than `max_bytes`.
    async fn extract(&self, source_url: &Url, workspace: &Path, max_bytes: u64)
        -> Result<(), JobError>;
}

/// Structured result of the speech-to-text stage
#[derive(Debug, Clone, PartialEq)]
pub struct TranscriptionOutput {
    pub segments: Vec<Segment>,
    pub language: Option<String>,
    pub duration: Option<f64>,
}

/// Turns an audio file into timed text segments
#[async_trait]
pub trait SpeechTranscriber: Send + Sync {
    async fn transcribe(
        &self,
        audio: &Path,
        model: Model,
        language: Language,
        workspace: &Path,
    ) -> Result<TranscriptionOutput, JobError>;
}

/// Wire format printed by the transcription program
#[derive(Debug, Deserialize)]
struct RawTranscript {
    #[serde(default)]
    language: Option<String>,
    #[serde(default)]
    duration: Option<f64>,
    #[serde(default)]
    segments: Vec<Segment>,
    #[serde(default)]
    error: Option<String>,
}

fn stderr_excerpt(stderr: &[u8]) -> String {
    let text = String::from_utf8_lossy(stderr);
    let text = text.trim();
    let skip = text.chars().count().saturating_sub(STDERR_EXCERPT_CHARS);
    text.chars().skip(skip).collect()
}

/// Kills whatever is left of a stage's process group when dropped
///
/// Stage programs run in their own group, so helpers they start (ffmpeg under
/// yt-dlp or whisper) go down with them on cancellation.
struct ProcessGroupGuard {
    #[cfg_attr(not(unix), allow(dead_code))]
    pgid: Option<u32>,
}

impl Drop for ProcessGroupGuard {
    fn drop(&mut self) {
        #[cfg(unix)]
        if let Some(pgid) = self.pgid.and_then(|id| libc::pid_t::try_from(id).ok()) {
            // SAFETY: killpg only sends a signal; an emptied group yields ESRCH
            if unsafe { libc::killpg(pgid, libc::SIGKILL) } == 0 {
                debug!("Killed leftover processes in group {}", pgid);
            }
        }
    }
}

/// Run a prepared command to completion, capturing its output
async fn run_command(mut command: Command, program: &str) -> Result<Output, JobError> {
    command
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true);
    #[cfg(unix)]
    command.process_group(0);

    let child = command.spawn().map_err(|e| {
        error!("Failed to run {}: {}", program, e);
        JobError::Internal(format!("failed to run {}: {}", program, e))
    })?;
    let _group = ProcessGroupGuard { pgid: child.id() };

    child.wait_with_output().await.map_err(|e| {
        error!("Failed to collect output of {}: {}", program, e);
        JobError::Internal(format!("failed to run {}: {}", program, e))
    })
}

/// Extraction through yt-dlp
#[derive(Debug, Clone)]
pub struct YtDlpExtractor {
    command: String,
}

impl YtDlpExtractor {
    pub fn new<S: Into<String>>(command: S) -> Self {
        Self {
            command: command.into(),
        }
    }
}

#[async_trait]
impl AudioExtractor for YtDlpExtractor {
    async fn extract(
        &self,
        source_url: &Url,
        workspace: &Path,
        max_bytes: u64,
    ) -> Result<(), JobError> {
        let mut command = Command::new(&self.command);
        command
            .current_dir(workspace)
            .arg("-x")
            .arg("--audio-format")
            .arg("mp3")
            .arg("--no-playlist")
            .arg(source_url.as_str())
            .arg("-o")
            .arg(AUDIO_OUTPUT_TEMPLATE)
            .arg("--max-filesize")
            .arg(max_bytes.to_string());

        debug!("Running {} for {}", self.command, source_url);
        let output = run_command(command, &self.command).await?;

        if !output.status.success() {
            error!(
                "{} failed for {} ({}): {}",
                self.command,
                source_url,
                output.status,
                stderr_excerpt(&output.stderr)
            );
            return Err(JobError::ExtractionFailure(
                "could not download the source audio, check the URL".to_string(),
            ));
        }

        Ok(())
    }
}

/// Transcription through an interpreted script printing JSON on stdout
#[derive(Debug, Clone)]
pub struct ScriptTranscriber {
    interpreter: String,
    script: PathBuf,
}

impl ScriptTranscriber {
    /// A relative `script` is resolved against the current directory, since the
    /// program runs inside the job workspace.
    pub fn new<S: Into<String>>(interpreter: S, script: &Path) -> Self {
        let script = if script.is_absolute() {
            script.to_path_buf()
        } else {
            env::current_dir()
                .map(|cwd| cwd.join(script))
                .unwrap_or_else(|_| script.to_path_buf())
        };

        Self {
            interpreter: interpreter.into(),
            script,
        }
    }
}

#[async_trait]
impl SpeechTranscriber for ScriptTranscriber {
    async fn transcribe(
        &self,
        audio: &Path,
        model: Model,
        language: Language,
        workspace: &Path,
    ) -> Result<TranscriptionOutput, JobError> {
        let mut command = Command::new(&self.interpreter);
        command
            .current_dir(workspace)
            .arg(&self.script)
            .arg(audio)
            .arg(model.as_str())
            .arg(language.as_str());

        debug!(
            "Running {} {} (model {}, language {})",
            self.interpreter,
            self.script.display(),
            model,
            language
        );
        let output = run_command(command, &self.interpreter).await?;

        // The program reports its own failures as {"error": ...}, possibly with a
        // non-zero exit status
        let parsed = serde_json::from_slice::<RawTranscript>(&output.stdout);

        if let Ok(RawTranscript {
            error: Some(message),
            ..
        }) = &parsed
        {
            warn!("Transcriber reported an error: {}", message);
            return Err(JobError::TranscriptionFailure(message.clone()));
        }

        if !output.status.success() {
            error!(
                "Transcriber exited with {}: {}",
                output.status,
                stderr_excerpt(&output.stderr)
            );
            return Err(JobError::TranscriptionFailure(format!(
                "transcriber exited with {}",
                output.status
            )));
        }

        match parsed {
            Ok(raw) => Ok(TranscriptionOutput {
                segments: raw.segments,
                language: raw.language,
                duration: raw.duration,
            }),
            Err(e) => {
                error!("Unparsable transcriber output: {}", e);
                Err(JobError::TranscriptionFailure(
                    "malformed transcriber output".to_string(),
                ))
            }
        }
    }
}
