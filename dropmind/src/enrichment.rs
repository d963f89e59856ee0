//! Out-of-band enrichment worker
//!
//! Captures enqueue a job and return immediately. A dispatcher task pulls jobs
//! off the queue and runs up to `max_concurrent` of them at once. Each job
//! fetches with retry, then hands its result to the applier on the blocking
//! pool. The applier decides whether the item still exists before writing.
//! Every finished job is published as an `EnrichmentEvent`.

use crate::config::EnrichmentSettings;
use crate::geocoding::Geocoder;
use crate::interface::{
    Card, DropMindError, EnrichmentEvent, EnrichmentOutcome, EnrichmentTask, ItemId,
    ResolutionFailure,
};
use crate::link_metadata::LinkResolver;
use rand::Rng;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, mpsc, Semaphore};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

const EVENT_CAPACITY: usize = 256;

/// What to fetch for an item
#[derive(Debug, Clone, PartialEq)]
pub enum EnrichmentTarget {
    Link { url: String },
    Geocode { lat: f64, lon: f64 },
}

#[derive(Debug, Clone, PartialEq)]
pub struct EnrichmentJob {
    pub item_id: ItemId,
    /// Generation of the enrichment record this job was issued for
    pub generation: u32,
    pub target: EnrichmentTarget,
}

impl EnrichmentJob {
    pub fn link(item_id: ItemId, url: impl Into<String>) -> Self {
        Self { item_id, generation: 0, target: EnrichmentTarget::Link { url: url.into() } }
    }

    pub fn geocode(item_id: ItemId, lat: f64, lon: f64) -> Self {
        Self { item_id, generation: 0, target: EnrichmentTarget::Geocode { lat, lon } }
    }

    pub fn with_generation(mut self, generation: u32) -> Self {
        self.generation = generation;
        self
    }

    /// Package the outcome of this job's fetch
    pub fn finish(&self, attempts: u32, result: Result<EnrichmentValue, ResolutionFailure>) -> FetchResult {
        FetchResult { item_id: self.item_id, generation: self.generation, task: self.task(), attempts, result }
    }

    pub fn task(&self) -> EnrichmentTask {
        match self.target {
            EnrichmentTarget::Link { .. } => EnrichmentTask::Link,
            EnrichmentTarget::Geocode { .. } => EnrichmentTask::Geocode,
        }
    }
}

/// Successful fetch result
#[derive(Debug, Clone, PartialEq)]
pub enum EnrichmentValue {
    Card(Card),
    Label(String),
}

/// A finished fetch, ready to be written back
#[derive(Debug, Clone, PartialEq)]
pub struct FetchResult {
    pub item_id: ItemId,
    pub generation: u32,
    pub task: EnrichmentTask,
    pub attempts: u32,
    pub result: Result<EnrichmentValue, ResolutionFailure>,
}

/// Writes fetch results back into the store. Runs on the blocking pool.
pub trait EnrichmentApplier: Send + Sync + 'static {
    fn apply_enrichment(&self, fetched: FetchResult) -> Result<EnrichmentOutcome, DropMindError>;
}

/// Handle to the running worker. Dropping it does not stop the worker; call `shutdown`.
#[derive(Clone)]
pub struct EnrichmentHandle {
    sender: mpsc::UnboundedSender<EnrichmentJob>,
    events: broadcast::Sender<EnrichmentEvent>,
    cancel: CancellationToken,
}

impl EnrichmentHandle {
    /// Start the dispatcher on `runtime`
    pub fn spawn(
        runtime: &tokio::runtime::Handle,
        settings: EnrichmentSettings,
        resolver: Arc<dyn LinkResolver>,
        geocoder: Option<Arc<dyn Geocoder>>,
        applier: Arc<dyn EnrichmentApplier>,
    ) -> Self {
        let (sender, receiver) = mpsc::unbounded_channel();
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        let cancel = CancellationToken::new();

        let worker = Worker {
            semaphore: Arc::new(Semaphore::new(settings.max_concurrent.max(1))),
            context: Arc::new(JobContext {
                settings,
                resolver,
                geocoder,
                applier,
                events: events.clone(),
                cancel: cancel.clone(),
            }),
        };
        runtime.spawn(worker.run(receiver));

        Self { sender, events, cancel }
    }

    pub fn enqueue(&self, job: EnrichmentJob) {
        debug!(item_id = job.item_id, task = job.task().as_str(), "Enqueueing enrichment");
        if self.sender.send(job).is_err() {
            debug!("Enrichment worker stopped; job left pending");
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<EnrichmentEvent> {
        self.events.subscribe()
    }

    /// Stop dispatching. In-flight fetches finish; pending retries are abandoned
    /// without writing, so their records stay `pending` for the next startup.
    pub fn shutdown(&self) {
        self.cancel.cancel();
    }

    pub fn is_shutdown(&self) -> bool {
        self.cancel.is_cancelled()
    }
}

struct Worker {
    semaphore: Arc<Semaphore>,
    context: Arc<JobContext>,
}

impl Worker {
    async fn run(self, mut receiver: mpsc::UnboundedReceiver<EnrichmentJob>) {
        info!("Enrichment worker started");
        let cancel = self.context.cancel.clone();
        loop {
            let job = tokio::select! {
                biased;
                _ = cancel.cancelled() => break,
                job = receiver.recv() => match job {
                    Some(job) => job,
                    None => break,
                },
            };

            let permit = tokio::select! {
                biased;
                _ = cancel.cancelled() => break,
                permit = self.semaphore.clone().acquire_owned() => match permit {
                    Ok(permit) => permit,
                    Err(_) => break,
                },
            };

            let context = self.context.clone();
            tokio::spawn(async move {
                let _permit = permit;
                context.process(job).await;
            });
        }
        info!("Enrichment worker stopped");
    }
}

struct JobContext {
    settings: EnrichmentSettings,
    resolver: Arc<dyn LinkResolver>,
    geocoder: Option<Arc<dyn Geocoder>>,
    applier: Arc<dyn EnrichmentApplier>,
    events: broadcast::Sender<EnrichmentEvent>,
    cancel: CancellationToken,
}

impl JobContext {
    async fn process(&self, job: EnrichmentJob) {
        let item_id = job.item_id;
        let task = job.task();

        let Some(fetched) = self.fetch_with_retry(job).await else {
            return;
        };

        let applier = self.applier.clone();
        let outcome = match tokio::task::spawn_blocking(move || applier.apply_enrichment(fetched)).await {
            Ok(Ok(outcome)) => outcome,
            Ok(Err(e)) => {
                error!(item_id, task = task.as_str(), error = %e, "Failed to store enrichment");
                return;
            }
            Err(e) => {
                error!(item_id, task = task.as_str(), error = %e, "Enrichment applier panicked");
                return;
            }
        };

        match &outcome {
            EnrichmentOutcome::Resolved => info!(item_id, task = task.as_str(), "Enrichment resolved"),
            EnrichmentOutcome::Abandoned { failure, attempts } => {
                warn!(item_id, task = task.as_str(), attempts, failure = %failure, "Enrichment abandoned")
            }
            EnrichmentOutcome::Discarded => {
                debug!(item_id, task = task.as_str(), "Item gone; enrichment discarded")
            }
        }

        // No subscribers is fine
        let _ = self.events.send(EnrichmentEvent { item_id, task, outcome });
    }

    /// Returns None when cancelled mid-retry or when the task cannot run here
    async fn fetch_with_retry(&self, job: EnrichmentJob) -> Option<FetchResult> {
        let task = job.task();
        let max_attempts = self.settings.max_attempts.max(1);
        let timeout = self.settings.fetch_timeout();
        let mut attempt = 0;

        loop {
            attempt += 1;
            let result = match &job.target {
                EnrichmentTarget::Link { url } => self
                    .resolver
                    .resolve(url, timeout)
                    .await
                    .map(EnrichmentValue::Card),
                EnrichmentTarget::Geocode { lat, lon } => {
                    let Some(geocoder) = &self.geocoder else {
                        warn!(item_id = job.item_id, "No geocoder configured; job left pending");
                        return None;
                    };
                    geocoder
                        .reverse(*lat, *lon, timeout)
                        .await
                        .map(EnrichmentValue::Label)
                }
            };

            match result {
                Err(failure) if failure.is_transient() && attempt < max_attempts => {
                    let delay = self.retry_delay(attempt);
                    warn!(
                        item_id = job.item_id,
                        task = task.as_str(),
                        attempt,
                        max_attempts,
                        failure = %failure,
                        delay_ms = delay.as_millis() as u64,
                        "Enrichment failed; retrying"
                    );
                    tokio::select! {
                        _ = self.cancel.cancelled() => return None,
                        _ = tokio::time::sleep(delay) => {}
                    }
                }
                result => {
                    return Some(job.finish(attempt, result));
                }
            }
        }
    }

    fn retry_delay(&self, attempt: u32) -> Duration {
        let base = self.settings.backoff(attempt);
        let jitter_cap = (base.as_millis() as u64 / 4).max(1);
        base + Duration::from_millis(rand::thread_rng().gen_range(0..jitter_cap))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use parking_lot::Mutex;
    use std::collections::VecDeque;
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Replays a script of responses, then keeps returning the last one
    struct ScriptedResolver {
        script: Mutex<VecDeque<Result<Card, ResolutionFailure>>>,
        calls: AtomicUsize,
    }

    impl ScriptedResolver {
        fn new(script: Vec<Result<Card, ResolutionFailure>>) -> Arc<Self> {
            Arc::new(Self { script: Mutex::new(script.into()), calls: AtomicUsize::new(0) })
        }
    }

    #[async_trait]
    impl LinkResolver for ScriptedResolver {
        async fn resolve(&self, _url: &str, _timeout: Duration) -> Result<Card, ResolutionFailure> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            let mut script = self.script.lock();
            if script.len() > 1 {
                script.pop_front().unwrap()
            } else {
                script.front().cloned().unwrap()
            }
        }
    }

    struct FixedGeocoder;

    #[async_trait]
    impl Geocoder for FixedGeocoder {
        async fn reverse(&self, _lat: f64, _lon: f64, _timeout: Duration) -> Result<String, ResolutionFailure> {
            Ok("Somewhere".to_string())
        }
    }

    /// Records results and answers like a store where every item exists
    #[derive(Default)]
    struct RecordingApplier {
        applied: Mutex<Vec<FetchResult>>,
    }

    impl EnrichmentApplier for RecordingApplier {
        fn apply_enrichment(&self, fetched: FetchResult) -> Result<EnrichmentOutcome, DropMindError> {
            let outcome = match &fetched.result {
                Ok(_) => EnrichmentOutcome::Resolved,
                Err(failure) => EnrichmentOutcome::Abandoned { failure: failure.clone(), attempts: fetched.attempts },
            };
            self.applied.lock().push(fetched);
            Ok(outcome)
        }
    }

    fn fast_settings() -> EnrichmentSettings {
        EnrichmentSettings { backoff_base_ms: 1, backoff_max_ms: 5, max_attempts: 3, ..Default::default() }
    }

    fn card(title: &str) -> Card {
        Card { title: Some(title.to_string()), ..Default::default() }
    }

    async fn next_event(events: &mut broadcast::Receiver<EnrichmentEvent>) -> EnrichmentEvent {
        tokio::time::timeout(Duration::from_secs(5), events.recv()).await.unwrap().unwrap()
    }

    #[tokio::test]
    async fn test_transient_failures_retry_until_success() {
        let resolver = ScriptedResolver::new(vec![
            Err(ResolutionFailure::Timeout),
            Err(ResolutionFailure::Unreachable { status: Some(503) }),
            Ok(card("Third time")),
        ]);
        let applier = Arc::new(RecordingApplier::default());
        let handle = EnrichmentHandle::spawn(
            &tokio::runtime::Handle::current(),
            fast_settings(),
            resolver.clone(),
            None,
            applier.clone(),
        );
        let mut events = handle.subscribe();

        handle.enqueue(EnrichmentJob::link(7, "https://example.com"));
        let event = next_event(&mut events).await;

        assert_eq!(event, EnrichmentEvent { item_id: 7, task: EnrichmentTask::Link, outcome: EnrichmentOutcome::Resolved });
        assert_eq!(resolver.calls.load(Ordering::SeqCst), 3);
        let applied = applier.applied.lock();
        assert_eq!(applied[0].attempts, 3);
        assert_eq!(applied[0].result, Ok(EnrichmentValue::Card(card("Third time"))));
        handle.shutdown();
    }

    #[tokio::test]
    async fn test_client_error_abandons_after_one_attempt() {
        let resolver = ScriptedResolver::new(vec![Err(ResolutionFailure::Unreachable { status: Some(404) })]);
        let applier = Arc::new(RecordingApplier::default());
        let handle = EnrichmentHandle::spawn(
            &tokio::runtime::Handle::current(),
            fast_settings(),
            resolver.clone(),
            None,
            applier,
        );
        let mut events = handle.subscribe();

        handle.enqueue(EnrichmentJob::link(1, "https://example.com/gone"));
        let event = next_event(&mut events).await;

        assert_eq!(
            event.outcome,
            EnrichmentOutcome::Abandoned { failure: ResolutionFailure::Unreachable { status: Some(404) }, attempts: 1 }
        );
        assert_eq!(resolver.calls.load(Ordering::SeqCst), 1);
        handle.shutdown();
    }

    #[tokio::test]
    async fn test_transient_failures_stop_at_max_attempts() {
        let resolver = ScriptedResolver::new(vec![Err(ResolutionFailure::Timeout)]);
        let handle = EnrichmentHandle::spawn(
            &tokio::runtime::Handle::current(),
            fast_settings(),
            resolver.clone(),
            None,
            Arc::new(RecordingApplier::default()),
        );
        let mut events = handle.subscribe();

        handle.enqueue(EnrichmentJob::link(2, "https://slow.example.com"));
        let event = next_event(&mut events).await;

        assert_eq!(event.outcome, EnrichmentOutcome::Abandoned { failure: ResolutionFailure::Timeout, attempts: 3 });
        assert_eq!(resolver.calls.load(Ordering::SeqCst), 3);
        handle.shutdown();
    }

    #[tokio::test]
    async fn test_geocode_jobs_use_geocoder() {
        let applier = Arc::new(RecordingApplier::default());
        let handle = EnrichmentHandle::spawn(
            &tokio::runtime::Handle::current(),
            fast_settings(),
            ScriptedResolver::new(vec![Ok(card("unused"))]),
            Some(Arc::new(FixedGeocoder)),
            applier.clone(),
        );
        let mut events = handle.subscribe();

        handle.enqueue(EnrichmentJob::geocode(3, 10.5, 20.25));
        let event = next_event(&mut events).await;

        assert_eq!(event.task, EnrichmentTask::Geocode);
        assert_eq!(applier.applied.lock()[0].result, Ok(EnrichmentValue::Label("Somewhere".into())));
        handle.shutdown();
    }

    #[tokio::test]
    async fn test_many_jobs_all_complete() {
        let resolver = ScriptedResolver::new(vec![Ok(card("ok"))]);
        let settings = EnrichmentSettings { max_concurrent: 2, ..fast_settings() };
        let handle = EnrichmentHandle::spawn(
            &tokio::runtime::Handle::current(),
            settings,
            resolver.clone(),
            None,
            Arc::new(RecordingApplier::default()),
        );
        let mut events = handle.subscribe();

        for id in 0..10 {
            handle.enqueue(EnrichmentJob::link(id, "https://example.com"));
        }
        let mut seen: Vec<ItemId> = Vec::new();
        for _ in 0..10 {
            seen.push(next_event(&mut events).await.item_id);
        }
        seen.sort_unstable();
        assert_eq!(seen, (0..10).collect::<Vec<_>>());
        handle.shutdown();
    }

    #[tokio::test]
    async fn test_shutdown_stops_dispatch() {
        let resolver = ScriptedResolver::new(vec![Ok(card("ok"))]);
        let handle = EnrichmentHandle::spawn(
            &tokio::runtime::Handle::current(),
            fast_settings(),
            resolver.clone(),
            None,
            Arc::new(RecordingApplier::default()),
        );
        handle.shutdown();
        assert!(handle.is_shutdown());
        tokio::task::yield_now().await;

        handle.enqueue(EnrichmentJob::link(1, "https://example.com"));
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(resolver.calls.load(Ordering::SeqCst), 0);
    }
}
