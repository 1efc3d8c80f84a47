// Stage doubles shared by the pipeline and controller tests

use async_trait::async_trait;
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Notify, Semaphore};
use url::Url;

use crate::error::JobError;
use crate::models::Segment;
use crate::stages::{AudioExtractor, SpeechTranscriber, TranscriptionOutput};
use crate::validation::{Language, Model};
use crate::workspace::AUDIO_FILE_NAME;

#[derive(Debug, Clone, Copy)]
pub enum ExtractBehavior {
    /// Write a small audio file
    Succeed,
    /// Exit cleanly without writing anything
    NoOutput,
    /// Write a file of the given size
    WriteBytes(usize),
    /// Report a failed download
    Fail,
    /// Never finish
    Hang,
    /// Write the file once a release permit is granted
    WaitForRelease,
}

pub struct FakeExtractor {
    behavior: ExtractBehavior,
    pub calls: AtomicUsize,
    pub started: Notify,
    pub release: Semaphore,
}

impl FakeExtractor {
    pub fn new(behavior: ExtractBehavior) -> Arc<Self> {
        Arc::new(Self {
            behavior,
            calls: AtomicUsize::new(0),
            started: Notify::new(),
            release: Semaphore::new(0),
        })
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl AudioExtractor for FakeExtractor {
    async fn extract(
        &self,
        _source_url: &Url,
        workspace: &Path,
        _max_bytes: u64,
    ) -> Result<(), JobError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.started.notify_one();
        let audio = workspace.join(AUDIO_FILE_NAME);

        match self.behavior {
            ExtractBehavior::Succeed => tokio::fs::write(&audio, b"ID3").await?,
            ExtractBehavior::NoOutput => {}
            ExtractBehavior::WriteBytes(len) => tokio::fs::write(&audio, vec![0u8; len]).await?,
            ExtractBehavior::Fail => {
                return Err(JobError::ExtractionFailure("download failed".to_string()))
            }
            ExtractBehavior::Hang => std::future::pending::<()>().await,
            ExtractBehavior::WaitForRelease => {
                if let Ok(permit) = self.release.acquire().await {
                    permit.forget();
                }
                tokio::fs::write(&audio, b"ID3").await?;
            }
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Copy)]
pub enum TranscribeBehavior {
    Succeed,
    ReportError,
    Hang,
}

pub struct FakeTranscriber {
    behavior: TranscribeBehavior,
    pub calls: AtomicUsize,
}

impl FakeTranscriber {
    pub fn new(behavior: TranscribeBehavior) -> Arc<Self> {
        Arc::new(Self {
            behavior,
            calls: AtomicUsize::new(0),
        })
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

pub fn sample_segments() -> Vec<Segment> {
    vec![
        Segment {
            start: 0.0,
            end: 1.5,
            text: "Hello".to_string(),
        },
        Segment {
            start: 1.5,
            end: 3.0,
            text: "world".to_string(),
        },
    ]
}

#[async_trait]
impl SpeechTranscriber for FakeTranscriber {
    async fn transcribe(
        &self,
        audio: &Path,
        _model: Model,
        language: Language,
        _workspace: &Path,
    ) -> Result<TranscriptionOutput, JobError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        assert!(audio.exists(), "transcriber called without audio");

        match self.behavior {
            TranscribeBehavior::Succeed => Ok(TranscriptionOutput {
                segments: sample_segments(),
                language: Some(match language {
                    Language::Auto => "en".to_string(),
                    other => other.to_string(),
                }),
                duration: Some(3.0),
            }),
            TranscribeBehavior::ReportError => Err(JobError::TranscriptionFailure(
                "model crashed".to_string(),
            )),
            TranscribeBehavior::Hang => std::future::pending().await,
        }
    }
}

/// Number of entries left under a workspace root
pub fn entries_in(root: &Path) -> usize {
    std::fs::read_dir(root).map(|dir| dir.count()).unwrap_or(0)
}

/// Pid written by a test script, once the file is complete
#[cfg(target_os = "linux")]
pub async fn read_pid_file(path: &Path) -> u32 {
    tokio::time::timeout(Duration::from_secs(5), async {
        loop {
            if let Ok(text) = tokio::fs::read_to_string(path).await {
                if let Ok(pid) = text.trim().parse() {
                    return pid;
                }
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .expect("pid file not written in time")
}

/// True while `pid` is a running process; zombies count as gone
#[cfg(target_os = "linux")]
pub fn process_alive(pid: u32) -> bool {
    let Ok(stat) = std::fs::read_to_string(format!("/proc/{}/stat", pid)) else {
        return false;
    };
    // State is the first field after the parenthesised command name
    stat.rsplit(')')
        .next()
        .and_then(|rest| rest.trim_start().chars().next())
        .is_some_and(|state| state != 'Z' && state != 'X')
}

/// Wait up to five seconds for `pid` to exit
#[cfg(target_os = "linux")]
pub async fn wait_for_exit(pid: u32) -> bool {
    for _ in 0..100 {
        if !process_alive(pid) {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(50)).await;
    }
    false
}
