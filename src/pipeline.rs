//! Pipeline runner
//!
//! Runs one job through `Created → Extracting → Transcribing → Rendering → Completed`,
//! with `Failed` reachable from every non-terminal state. Each run owns a fresh
//! [`Workspace`] that is removed when `run` returns, whatever the outcome, including
//! cancellation. Cancelling drops the in-flight stage future, which kills its external
//! programs.

use log::{debug, error, info, warn};
use std::fmt;
use std::future::Future;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;
use tokio_util::sync::CancellationToken;

use crate::config::PipelineConfig;
use crate::error::JobError;
use crate::models::TranscriptArtifact;
use crate::progress::{ProgressSink, Step};
use crate::stages::{AudioExtractor, SpeechTranscriber};
use crate::subtitles::render_srt;
use crate::validation::JobRequest;
use crate::workspace::Workspace;

/// Lifecycle of a single pipeline run
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PipelineState {
    Created,
    Extracting,
    Transcribing,
    Rendering,
    Completed,
    Failed,
}

impl fmt::Display for PipelineState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            PipelineState::Created => "created",
            PipelineState::Extracting => "extracting",
            PipelineState::Transcribing => "transcribing",
            PipelineState::Rendering => "rendering",
            PipelineState::Completed => "completed",
            PipelineState::Failed => "failed",
        };
        f.write_str(name)
    }
}

/// Race a stage against cancellation
async fn cancellable<T, F>(cancel: &CancellationToken, stage: F) -> Result<T, JobError>
where
    F: Future<Output = Result<T, JobError>>,
{
    tokio::select! {
        biased;
        _ = cancel.cancelled() => Err(JobError::Cancelled),
        result = stage => result,
    }
}

pub struct PipelineRunner {
    extractor: Arc<dyn AudioExtractor>,
    transcriber: Arc<dyn SpeechTranscriber>,
    temp_dir: PathBuf,
    max_audio_bytes: u64,
}

impl PipelineRunner {
    pub fn new(
        extractor: Arc<dyn AudioExtractor>,
        transcriber: Arc<dyn SpeechTranscriber>,
        config: &PipelineConfig,
    ) -> Self {
        Self {
            extractor,
            transcriber,
            temp_dir: config.temp_dir.clone(),
            max_audio_bytes: config.max_audio_bytes,
        }
    }

    /// Produce a transcript for `request`, publishing progress to `progress`
    pub async fn run(
        &self,
        request: &JobRequest,
        progress: &ProgressSink,
        cancel: &CancellationToken,
    ) -> Result<TranscriptArtifact, JobError> {
        let start_time = Instant::now();

        let workspace = Workspace::create(&self.temp_dir).map_err(|e| {
            error!(
                "Failed to create workspace under {}: {}",
                self.temp_dir.display(),
                e
            );
            JobError::Internal(format!("workspace creation failed: {}", e))
        })?;

        let mut state = PipelineState::Created;
        let result = self
            .execute(request, &workspace, progress, cancel, &mut state)
            .await;

        match &result {
            Ok(artifact) => info!(
                "Pipeline for {} completed in {:.1}s ({} segments)",
                request.source_url,
                start_time.elapsed().as_secs_f64(),
                artifact.segments.len()
            ),
            Err(e) => {
                warn!(
                    "Pipeline for {} failed while {}: {}",
                    request.source_url, state, e
                );
                transition(&mut state, PipelineState::Failed);
            }
        }

        drop(workspace);
        result
    }

    async fn execute(
        &self,
        request: &JobRequest,
        workspace: &Workspace,
        progress: &ProgressSink,
        cancel: &CancellationToken,
        state: &mut PipelineState,
    ) -> Result<TranscriptArtifact, JobError> {
        let audio_path = workspace.audio_path();

        transition(state, PipelineState::Extracting);
        progress.emit(Step::Downloading, 20, "Downloading source audio");

        cancellable(
            cancel,
            self.extractor
                .extract(&request.source_url, workspace.path(), self.max_audio_bytes),
        )
        .await?;

        let audio_size = match tokio::fs::metadata(&audio_path).await {
            Ok(metadata) => metadata.len(),
            Err(e) => {
                debug!("Expected audio at {}: {}", audio_path.display(), e);
                return Err(JobError::ExtractionFailure(
                    "no audio was produced, check the URL".to_string(),
                ));
            }
        };
        if audio_size > self.max_audio_bytes {
            return Err(JobError::ExtractionFailure(format!(
                "audio is {} bytes, limit is {} bytes",
                audio_size, self.max_audio_bytes
            )));
        }
        info!("Extracted {} bytes of audio for {}", audio_size, request.source_url);

        transition(state, PipelineState::Transcribing);
        progress.emit(Step::Transcribing, 60, "Converting speech to text");

        let output = cancellable(
            cancel,
            self.transcriber.transcribe(
                &audio_path,
                request.model,
                request.language,
                workspace.path(),
            ),
        )
        .await?;

        transition(state, PipelineState::Rendering);
        progress.emit(Step::Generating, 90, "Generating subtitles");

        let srt = render_srt(&output.segments);
        let artifact = TranscriptArtifact {
            segments: output.segments,
            language: output.language,
            duration: output.duration,
            srt,
        };

        transition(state, PipelineState::Completed);
        progress.emit(Step::Completed, 100, "Done");

        Ok(artifact)
    }
}

fn transition(state: &mut PipelineState, next: PipelineState) {
    debug!("Pipeline state {} -> {}", state, next);
    *state = next;
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::progress::ProgressHub;
    use crate::test_support::*;
    use crate::validation::{Language, Model};
    use std::time::Duration;
    use url::Url;

    fn request() -> JobRequest {
        JobRequest {
            source_url: Url::parse("https://youtu.be/abc").unwrap(),
            model: Model::Small,
            language: Language::Auto,
            correlation_id: Some("job-1".to_string()),
        }
    }

    fn runner(
        root: &std::path::Path,
        extractor: Arc<dyn AudioExtractor>,
        transcriber: Arc<dyn SpeechTranscriber>,
    ) -> PipelineRunner {
        let config = PipelineConfig {
            temp_dir: root.to_path_buf(),
            extractor_cmd: String::new(),
            transcriber_cmd: String::new(),
            transcriber_script: PathBuf::new(),
            max_audio_bytes: 1024,
        };
        PipelineRunner::new(extractor, transcriber, &config)
    }

    #[tokio::test]
    async fn test_success_publishes_progress_and_cleans_up() {
        let root = tempfile::tempdir().unwrap();
        let hub = Arc::new(ProgressHub::new());
        let mut sub = hub.open_channel("job-1");
        let sink = ProgressSink::new(Arc::clone(&hub), Some("job-1".to_string()));

        let runner = runner(
            root.path(),
            FakeExtractor::new(ExtractBehavior::Succeed),
            FakeTranscriber::new(TranscribeBehavior::Succeed),
        );
        let artifact = runner
            .run(&request(), &sink, &CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(artifact.segments, sample_segments());
        assert_eq!(artifact.srt, render_srt(&sample_segments()));
        assert_eq!(artifact.language.as_deref(), Some("en"));
        assert_eq!(entries_in(root.path()), 0);

        let mut steps = Vec::new();
        while let Ok(event) = tokio::time::timeout(Duration::from_millis(50), sub.recv()).await {
            match event {
                Some(event) => steps.push((event.step, event.progress)),
                None => break,
            }
        }
        assert_eq!(
            steps,
            vec![
                (Step::Downloading, 20),
                (Step::Transcribing, 60),
                (Step::Generating, 90),
                (Step::Completed, 100),
            ]
        );
    }

    #[tokio::test]
    async fn test_missing_audio_is_extraction_failure() {
        let root = tempfile::tempdir().unwrap();
        let transcriber = FakeTranscriber::new(TranscribeBehavior::Succeed);
        let runner = runner(
            root.path(),
            FakeExtractor::new(ExtractBehavior::NoOutput),
            transcriber.clone(),
        );
        let sink = ProgressSink::detached(Arc::new(ProgressHub::new()));

        let err = runner
            .run(&request(), &sink, &CancellationToken::new())
            .await
            .unwrap_err();
        assert!(matches!(err, JobError::ExtractionFailure(_)));
        assert_eq!(transcriber.calls(), 0);
        assert_eq!(entries_in(root.path()), 0);
    }

    #[tokio::test]
    async fn test_oversized_audio_is_extraction_failure() {
        let root = tempfile::tempdir().unwrap();
        let runner = runner(
            root.path(),
            FakeExtractor::new(ExtractBehavior::WriteBytes(4096)),
            FakeTranscriber::new(TranscribeBehavior::Succeed),
        );
        let sink = ProgressSink::detached(Arc::new(ProgressHub::new()));

        let err = runner
            .run(&request(), &sink, &CancellationToken::new())
            .await
            .unwrap_err();
        assert!(matches!(err, JobError::ExtractionFailure(_)));
        assert_eq!(entries_in(root.path()), 0);
    }

    #[tokio::test]
    async fn test_stage_failures_clean_up() {
        let root = tempfile::tempdir().unwrap();
        let sink = ProgressSink::detached(Arc::new(ProgressHub::new()));

        let failing_extract = runner(
            root.path(),
            FakeExtractor::new(ExtractBehavior::Fail),
            FakeTranscriber::new(TranscribeBehavior::Succeed),
        );
        let err = failing_extract
            .run(&request(), &sink, &CancellationToken::new())
            .await
            .unwrap_err();
        assert!(matches!(err, JobError::ExtractionFailure(_)));
        assert_eq!(entries_in(root.path()), 0);

        let failing_transcribe = runner(
            root.path(),
            FakeExtractor::new(ExtractBehavior::Succeed),
            FakeTranscriber::new(TranscribeBehavior::ReportError),
        );
        let err = failing_transcribe
            .run(&request(), &sink, &CancellationToken::new())
            .await
            .unwrap_err();
        assert!(matches!(err, JobError::TranscriptionFailure(_)));
        assert_eq!(entries_in(root.path()), 0);
    }

    #[tokio::test]
    async fn test_cancellation_mid_run_cleans_up() {
        let root = tempfile::tempdir().unwrap();
        let extractor = FakeExtractor::new(ExtractBehavior::Hang);
        let runner = runner(
            root.path(),
            extractor.clone(),
            FakeTranscriber::new(TranscribeBehavior::Succeed),
        );
        let sink = ProgressSink::detached(Arc::new(ProgressHub::new()));
        let cancel = CancellationToken::new();

        let trigger = cancel.clone();
        let started = extractor.clone();
        tokio::spawn(async move {
            started.started.notified().await;
            trigger.cancel();
        });

        let err = runner.run(&request(), &sink, &cancel).await.unwrap_err();
        assert_eq!(err, JobError::Cancelled);
        assert_eq!(entries_in(root.path()), 0);
    }

    #[tokio::test]
    async fn test_already_cancelled_never_runs_stages() {
        let root = tempfile::tempdir().unwrap();
        let extractor = FakeExtractor::new(ExtractBehavior::Succeed);
        let runner = runner(
            root.path(),
            extractor.clone(),
            FakeTranscriber::new(TranscribeBehavior::Succeed),
        );
        let sink = ProgressSink::detached(Arc::new(ProgressHub::new()));
        let cancel = CancellationToken::new();
        cancel.cancel();

        let err = runner.run(&request(), &sink, &cancel).await.unwrap_err();
        assert_eq!(err, JobError::Cancelled);
        assert_eq!(extractor.calls(), 0);
        assert_eq!(entries_in(root.path()), 0);
    }

    #[cfg(target_os = "linux")]
    #[tokio::test]
    async fn test_cancellation_stops_external_transcriber() {
        use crate::stages::ScriptTranscriber;

        let root = tempfile::tempdir().unwrap();
        let scripts = tempfile::tempdir().unwrap();
        let pid_file = scripts.path().join("helper.pid");
        let script = scripts.path().join("slow.sh");
        std::fs::write(
            &script,
            format!("sleep 30 &\necho $! > '{}'\nwait\n", pid_file.display()),
        )
        .unwrap();

        let runner = runner(
            root.path(),
            FakeExtractor::new(ExtractBehavior::Succeed),
            Arc::new(ScriptTranscriber::new("sh", &script)),
        );
        let sink = ProgressSink::detached(Arc::new(ProgressHub::new()));
        let cancel = CancellationToken::new();

        let trigger = cancel.clone();
        let helper_pid = pid_file.clone();
        let helper = tokio::spawn(async move {
            let pid = read_pid_file(&helper_pid).await;
            trigger.cancel();
            pid
        });

        let started = Instant::now();
        let err = runner.run(&request(), &sink, &cancel).await.unwrap_err();
        assert_eq!(err, JobError::Cancelled);
        assert!(started.elapsed() < Duration::from_secs(10));
        assert_eq!(entries_in(root.path()), 0);

        let pid = helper.await.unwrap();
        assert!(wait_for_exit(pid).await, "process {} outlived the cancelled run", pid);
    }
}
