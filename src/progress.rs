//! Per-job progress fan-out
//!
//! The [`ProgressHub`] keeps at most one live subscriber per job id. Publishing never
//! blocks and never fails: events for a job without a subscriber are dropped, and a
//! subscriber that connects late has missed whatever was published before it.
//!
//! Jobs publish through a [`ProgressSink`]. Only the newest job started under an id
//! may publish to it, and dropping that job's sink closes the channel. A job that
//! outlives a newer one sharing its id therefore never reaches the newer job's
//! subscriber.

use log::{debug, trace};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, AtomicU8, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tokio::sync::mpsc;

/// Pipeline step reported to the client
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Step {
    Queued,
    Downloading,
    Transcribing,
    Generating,
    Completed,
}

/// One progress notification
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProgressEvent {
    pub step: Step,
    /// Percentage in 0..=100
    pub progress: u8,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

impl ProgressEvent {
    pub fn new(step: Step, progress: u8, message: impl Into<String>) -> Self {
        Self {
            step,
            progress: progress.min(100),
            message: Some(message.into()),
        }
    }

    pub fn is_terminal(&self) -> bool {
        self.step == Step::Completed
    }

    /// Render as a server-sent events frame
    pub fn to_sse_frame(&self) -> String {
        // Serializing a plain struct of strings and integers cannot fail
        let json = serde_json::to_string(self).unwrap_or_default();
        format!("data: {}\n\n", json)
    }
}

struct Registration {
    generation: u64,
    sender: mpsc::UnboundedSender<ProgressEvent>,
}

#[derive(Default)]
struct Channels {
    subscribers: HashMap<String, Registration>,
    /// Generation of the job currently publishing under each id
    publishers: HashMap<String, u64>,
}

impl Channels {
    fn deliver(&self, job_id: &str, event: ProgressEvent) {
        match self.subscribers.get(job_id) {
            Some(registration) => {
                if registration.sender.send(event).is_err() {
                    trace!("Progress subscriber for {} already gone", job_id);
                }
            }
            None => trace!("No progress subscriber for {}", job_id),
        }
    }
}

/// Registry of live progress subscribers keyed by job id
#[derive(Default)]
pub struct ProgressHub {
    channels: Mutex<Channels>,
    next_generation: AtomicU64,
}

impl ProgressHub {
    pub fn new() -> Self {
        Self::default()
    }

    fn channels(&self) -> MutexGuard<'_, Channels> {
        // The maps stay consistent even if a holder panicked
        self.channels.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn next_generation(&self) -> u64 {
        self.next_generation.fetch_add(1, Ordering::Relaxed)
    }

    /// Register a subscriber for `job_id`, superseding any existing one
    pub fn open_channel(self: &Arc<Self>, job_id: &str) -> Subscription {
        let (sender, receiver) = mpsc::unbounded_channel();
        let generation = self.next_generation();

        let previous = self
            .channels()
            .subscribers
            .insert(job_id.to_string(), Registration { generation, sender });
        if previous.is_some() {
            debug!("Progress subscriber for {} superseded", job_id);
        }

        Subscription {
            job_id: job_id.to_string(),
            generation,
            receiver,
            hub: Arc::clone(self),
        }
    }

    /// Deliver an event to the current subscriber of `job_id`, if any
    pub fn publish(&self, job_id: &str, event: ProgressEvent) {
        self.channels().deliver(job_id, event);
    }

    /// Deregister the subscriber of `job_id`. Idempotent.
    pub fn close_channel(&self, job_id: &str) {
        if self.channels().subscribers.remove(job_id).is_some() {
            debug!("Progress channel {} closed", job_id);
        }
    }

    /// Deregister only if `generation` is still the current registration
    fn release(&self, job_id: &str, generation: u64) {
        let mut channels = self.channels();
        if channels
            .subscribers
            .get(job_id)
            .is_some_and(|registration| registration.generation == generation)
        {
            channels.subscribers.remove(job_id);
            debug!("Progress subscriber for {} disconnected", job_id);
        }
    }

    /// Make a new job the publisher for `job_id`
    fn claim(&self, job_id: &str) -> u64 {
        let generation = self.next_generation();
        let previous = self
            .channels()
            .publishers
            .insert(job_id.to_string(), generation);
        if previous.is_some() {
            debug!("Job id {} taken over by a newer job", job_id);
        }
        generation
    }

    fn publish_as(&self, job_id: &str, publisher: u64, event: ProgressEvent) {
        let channels = self.channels();
        if channels.publishers.get(job_id) == Some(&publisher) {
            channels.deliver(job_id, event);
        } else {
            trace!("Dropping progress from a superseded job {}", job_id);
        }
    }

    /// End a job's publishing; closes the channel unless a newer job owns the id
    fn retire(&self, job_id: &str, publisher: u64) {
        let mut channels = self.channels();
        if channels.publishers.get(job_id) == Some(&publisher) {
            channels.publishers.remove(job_id);
            if channels.subscribers.remove(job_id).is_some() {
                debug!("Progress channel {} closed", job_id);
            }
        }
    }

    pub fn subscriber_count(&self) -> usize {
        self.channels().subscribers.len()
    }

    pub fn has_subscriber(&self, job_id: &str) -> bool {
        self.channels().subscribers.contains_key(job_id)
    }
}

/// Receiving end of a progress channel
///
/// Dropping the subscription deregisters it, unless it was already superseded.
pub struct Subscription {
    job_id: String,
    generation: u64,
    receiver: mpsc::UnboundedReceiver<ProgressEvent>,
    hub: Arc<ProgressHub>,
}

impl Subscription {
    pub fn job_id(&self) -> &str {
        &self.job_id
    }

    /// Next event, or `None` once the channel was closed or superseded
    pub async fn recv(&mut self) -> Option<ProgressEvent> {
        self.receiver.recv().await
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.hub.release(&self.job_id, self.generation);
    }
}

/// Publisher handle given to a running job
///
/// Percentages are clamped so they never decrease within a job. Dropping the sink
/// closes the job's progress channel, on every exit path.
pub struct ProgressSink {
    hub: Arc<ProgressHub>,
    /// Job id and publisher generation
    job: Option<(String, u64)>,
    last_progress: AtomicU8,
}

impl ProgressSink {
    /// Publish for `job_id`, taking the id over from any older job
    pub fn new(hub: Arc<ProgressHub>, job_id: Option<String>) -> Self {
        let job = job_id.map(|id| {
            let publisher = hub.claim(&id);
            (id, publisher)
        });
        Self {
            hub,
            job,
            last_progress: AtomicU8::new(0),
        }
    }

    /// A sink that discards every event
    pub fn detached(hub: Arc<ProgressHub>) -> Self {
        Self::new(hub, None)
    }

    pub fn emit(&self, step: Step, progress: u8, message: &str) {
        let Some((job_id, publisher)) = &self.job else {
            return;
        };

        let progress = progress.min(100);
        let previous = self.last_progress.fetch_max(progress, Ordering::Relaxed);
        let mut event = ProgressEvent::new(step, progress, message);
        event.progress = progress.max(previous);

        self.hub.publish_as(job_id, *publisher, event);
    }
}

impl Drop for ProgressSink {
    fn drop(&mut self) {
        if let Some((job_id, publisher)) = &self.job {
            self.hub.retire(job_id, *publisher);
        }
    }
}
