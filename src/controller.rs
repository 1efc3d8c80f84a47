// Request controller for Transcript API
//
// Entry point for a transcription submission: validation, cache probe,
// admission, pipeline execution and cache population, in that order.

use log::{debug, info, warn};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Instant;
use tokio_util::sync::CancellationToken;

use crate::admission::AdmissionGate;
use crate::cache::{CacheStats, ResultCache};
use crate::config::ValidationConfig;
use crate::error::JobError;
use crate::metrics::Metrics;
use crate::models::{TranscribeRequest, TranscriptArtifact};
use crate::pipeline::PipelineRunner;
use crate::progress::{ProgressHub, ProgressSink, Step};
use crate::validation::JobRequest;

/// Outcome of a successful submission
#[derive(Debug, Clone)]
pub struct Submission {
    pub artifact: Arc<TranscriptArtifact>,
    /// True when served from the result cache
    pub cached: bool,
}

struct InflightJob {
    generation: u64,
    token: CancellationToken,
}

type InflightMap = Mutex<HashMap<String, InflightJob>>;

fn lock_inflight(inflight: &InflightMap) -> MutexGuard<'_, HashMap<String, InflightJob>> {
    inflight.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Keeps a job's cancellation token registered while the job runs
struct InflightGuard<'a> {
    inflight: &'a InflightMap,
    correlation_id: Option<String>,
    generation: u64,
}

impl Drop for InflightGuard<'_> {
    fn drop(&mut self) {
        let Some(id) = &self.correlation_id else {
            return;
        };
        let mut inflight = lock_inflight(self.inflight);
        if inflight
            .get(id)
            .is_some_and(|job| job.generation == self.generation)
        {
            inflight.remove(id);
        }
    }
}

pub struct RequestController {
    validation: ValidationConfig,
    cache: Arc<ResultCache>,
    gate: AdmissionGate,
    hub: Arc<ProgressHub>,
    runner: PipelineRunner,
    metrics: Metrics,
    inflight: InflightMap,
    next_generation: AtomicU64,
}

impl RequestController {
    pub fn new(
        validation: ValidationConfig,
        cache: Arc<ResultCache>,
        gate: AdmissionGate,
        hub: Arc<ProgressHub>,
        runner: PipelineRunner,
        metrics: Metrics,
    ) -> Self {
        Self {
            validation,
            cache,
            gate,
            hub,
            runner,
            metrics,
            inflight: Mutex::new(HashMap::new()),
            next_generation: AtomicU64::new(0),
        }
    }

    pub fn hub(&self) -> &Arc<ProgressHub> {
        &self.hub
    }

    pub async fn cache_stats(&self) -> CacheStats {
        self.cache.stats().await
    }

    /// Number of pipeline runs currently holding an admission slot
    pub fn jobs_in_flight(&self) -> usize {
        self.gate.in_use()
    }

    /// Handle one transcription submission end to end
    ///
    /// # Errors
    ///
    /// `InvalidInput` and `CapacityExceeded` are returned before any pipeline
    /// work starts. Pipeline failures are returned with their classification.
    pub async fn submit(&self, request: TranscribeRequest) -> Result<Submission, JobError> {
        let job = JobRequest::validate(
            &request.url,
            request.model.as_deref(),
            request.lang.as_deref(),
            request.process_id,
            &self.validation,
        )?;
        let fingerprint = job.fingerprint();

        if let Some(artifact) = self.cache.lookup(&fingerprint).await {
            debug!("Cache hit for {} ({})", job.source_url, fingerprint);
            self.metrics.record_cache_lookup(true).await;
            ProgressSink::new(Arc::clone(&self.hub), job.correlation_id.clone()).emit(
                Step::Completed,
                100,
                "Loaded from cache",
            );
            return Ok(Submission {
                artifact,
                cached: true,
            });
        }
        self.metrics.record_cache_lookup(false).await;

        let slot = match self.gate.try_acquire() {
            Ok(slot) => slot,
            Err(e) => {
                warn!(
                    "Rejected {}: all {} slots in use",
                    job.source_url,
                    self.gate.capacity()
                );
                self.metrics.record_admission_rejected().await;
                return Err(e);
            }
        };
        self.metrics.set_jobs_in_flight(self.gate.in_use()).await;

        let cancel = CancellationToken::new();
        let _registration = self.register(&job, &cancel);

        info!(
            "Starting job for {} (model {}, language {})",
            job.source_url, job.model, job.language
        );
        let sink = ProgressSink::new(Arc::clone(&self.hub), job.correlation_id.clone());
        sink.emit(Step::Queued, 5, "Queued");

        let start_time = Instant::now();
        let result = self.runner.run(&job, &sink, &cancel).await;
        let elapsed = start_time.elapsed().as_secs_f64();

        drop(slot);
        drop(sink);

        let outcome = match &result {
            Ok(_) => "completed",
            Err(e) => e.kind(),
        };
        self.metrics
            .record_job_finished(job.model.as_str(), job.language.as_str(), outcome, elapsed)
            .await;
        self.metrics.set_jobs_in_flight(self.gate.in_use()).await;

        let artifact = Arc::new(result?);
        self.cache.insert(fingerprint, Arc::clone(&artifact)).await;

        Ok(Submission {
            artifact,
            cached: false,
        })
    }

    /// Cancel the running job bound to `correlation_id`
    ///
    /// Returns false when no such job is in flight.
    pub fn cancel(&self, correlation_id: &str) -> bool {
        match lock_inflight(&self.inflight).get(correlation_id) {
            Some(job) => {
                info!("Cancelling job {}", correlation_id);
                job.token.cancel();
                true
            }
            None => false,
        }
    }

    fn register(&self, job: &JobRequest, token: &CancellationToken) -> InflightGuard<'_> {
        let generation = self.next_generation.fetch_add(1, Ordering::Relaxed);
        if let Some(id) = &job.correlation_id {
            let previous = lock_inflight(&self.inflight).insert(
                id.clone(),
                InflightJob {
                    generation,
                    token: token.clone(),
                },
            );
            if previous.is_some() {
                debug!("Job id {} reused while a previous job is running", id);
            }
        }

        InflightGuard {
            inflight: &self.inflight,
            correlation_id: job.correlation_id.clone(),
            generation,
        }
    }
}
