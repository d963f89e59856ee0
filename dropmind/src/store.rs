//! DropMind - the public store API
//!
//! Owns the synchronous `Engine` (SQLite + Tantivy) and the background
//! enrichment worker. Every call returns once its own work is durable; link
//! cards and geocoded labels arrive later and are announced on the enrichment
//! event channel.

use crate::config::{Config, EnrichmentSettings};
use crate::database::Database;
use crate::engine::Engine;
use crate::enrichment::{EnrichmentHandle, EnrichmentJob};
use crate::geocoding::{Geocoder, NominatimGeocoder};
use crate::indexer::{Indexer, SearchIndexEntry};
use crate::interface::{
    BrowseOrder, Clipboard, ClipboardId, DropMindApi, DropMindError, EnrichmentEvent,
    EnrichmentRecord, Item, ItemId, RawPayload, Scope,
};
use crate::link_metadata::{HttpLinkResolver, LinkResolver};
use once_cell::sync::Lazy;
use std::path::PathBuf;
use std::sync::{Arc, Once};
use tokio::sync::broadcast;
use tracing::{info, instrument};

pub const DATABASE_FILENAME: &str = "dropmind.sqlite";
pub const INDEX_DIRNAME: &str = "search_index_v1";

/// Fallback Tokio runtime for callers that have none of their own.
/// Shared across all stores and never dropped.
static FALLBACK_RUNTIME: Lazy<tokio::runtime::Runtime> = Lazy::new(|| {
    tokio::runtime::Builder::new_multi_thread()
        .worker_threads(2)
        .enable_all()
        .thread_name("dropmind-enrich")
        .build()
        .expect("Failed to create fallback tokio runtime")
});

static RAYON_INIT: Once = Once::new();

/// Size the global Rayon pool, leaving room for the Tokio workers
fn init_rayon() {
    RAYON_INIT.call_once(|| {
        let num_threads = std::thread::available_parallelism()
            .map(|n| n.get())
            .unwrap_or(4);
        let rayon_threads = num_threads.saturating_sub(2).max(1);

        let _ = rayon::ThreadPoolBuilder::new()
            .num_threads(rayon_threads)
            .thread_name(|i| format!("dropmind-rayon-{}", i))
            .build_global();
    });
}

/// Current runtime if there is one, otherwise the global fallback
fn runtime_handle() -> tokio::runtime::Handle {
    tokio::runtime::Handle::try_current().unwrap_or_else(|_| FALLBACK_RUNTIME.handle().clone())
}

/// Configures and opens a `DropMind`
#[derive(Default)]
pub struct DropMindBuilder {
    config: Config,
    in_memory: bool,
    resolver: Option<Arc<dyn LinkResolver>>,
    geocoder: Option<Arc<dyn Geocoder>>,
    runtime: Option<tokio::runtime::Handle>,
}

impl DropMindBuilder {
    pub fn config(mut self, config: Config) -> Self {
        self.config = config;
        self
    }

    /// Keep everything in memory; `data_dir` is ignored
    pub fn in_memory(mut self) -> Self {
        self.in_memory = true;
        self
    }

    /// Replace the HTTP link resolver
    pub fn resolver(mut self, resolver: Arc<dyn LinkResolver>) -> Self {
        self.resolver = Some(resolver);
        self
    }

    /// Replace the configured geocoder (and enable geocoding)
    pub fn geocoder(mut self, geocoder: Arc<dyn Geocoder>) -> Self {
        self.geocoder = Some(geocoder);
        self
    }

    /// Runtime the enrichment worker runs on
    pub fn runtime(mut self, runtime: tokio::runtime::Handle) -> Self {
        self.runtime = Some(runtime);
        self
    }

    pub fn open(self) -> Result<DropMind, DropMindError> {
        init_rayon();
        let Self { config, in_memory, resolver, geocoder, runtime } = self;

        let (db, index) = if in_memory {
            (Database::open_in_memory()?, Indexer::new_in_memory(&config.search)?)
        } else {
            let dir = config.resolve_data_dir()?;
            info!(data_dir = %dir.display(), "Opening store");
            (
                Database::open(dir.join(DATABASE_FILENAME))?,
                Indexer::new(&dir.join(INDEX_DIRNAME), &config.search)?,
            )
        };

        let resolver: Arc<dyn LinkResolver> = match resolver {
            Some(resolver) => resolver,
            None => Arc::new(default_resolver(&config.enrichment)?),
        };
        let geocoder: Option<Arc<dyn Geocoder>> = match (geocoder, &config.enrichment.geocoder_url) {
            (Some(geocoder), _) => Some(geocoder),
            (None, Some(url)) => Some(Arc::new(
                NominatimGeocoder::new(url, &config.enrichment.user_agent)
                    .map_err(|e| DropMindError::Config(format!("geocoder client: {e}")))?,
            )),
            (None, None) => None,
        };

        let engine = Arc::new(Engine::new(
            db,
            index,
            config.limits.clone(),
            config.search.clone(),
            geocoder.is_some(),
        ));
        engine.rebuild_index_if_needed()?;

        let runtime = runtime.unwrap_or_else(runtime_handle);
        let enrichment = EnrichmentHandle::spawn(
            &runtime,
            config.enrichment.clone(),
            resolver,
            geocoder,
            engine.clone(),
        );

        let store = DropMind { engine, enrichment };
        store.resume_pending()?;
        Ok(store)
    }
}

fn default_resolver(settings: &EnrichmentSettings) -> Result<HttpLinkResolver, DropMindError> {
    HttpLinkResolver::new(&settings.user_agent, settings.max_html_bytes)
        .map_err(|e| DropMindError::Config(format!("link resolver client: {e}")))
}

/// Item store with multi-clipboard organisation, ranked search and
/// background link-card enrichment
pub struct DropMind {
    engine: Arc<Engine>,
    enrichment: EnrichmentHandle,
}

impl DropMind {
    pub fn builder() -> DropMindBuilder {
        DropMindBuilder::default()
    }

    /// Open the on-disk store described by `config`
    pub fn open(config: Config) -> Result<Self, DropMindError> {
        Self::builder().config(config).open()
    }

    pub fn open_in_memory() -> Result<Self, DropMindError> {
        Self::builder().in_memory().open()
    }

    /// Where an on-disk store keeps its files
    pub fn data_paths(config: &Config) -> Result<(PathBuf, PathBuf), DropMindError> {
        let dir = config.resolve_data_dir()?;
        Ok((dir.join(DATABASE_FILENAME), dir.join(INDEX_DIRNAME)))
    }

    /// Re-enqueue jobs a previous run left pending
    fn resume_pending(&self) -> Result<(), DropMindError> {
        let jobs = self.engine.pending_jobs()?;
        if !jobs.is_empty() {
            info!(jobs = jobs.len(), "Resuming pending enrichment");
        }
        for job in jobs {
            self.enrichment.enqueue(job);
        }
        Ok(())
    }

    fn enqueue(&self, job: Option<EnrichmentJob>) {
        if let Some(job) = job {
            self.enrichment.enqueue(job);
        }
    }

    /// Completed enrichment jobs, as they happen
    pub fn subscribe_enrichment(&self) -> broadcast::Receiver<EnrichmentEvent> {
        self.enrichment.subscribe()
    }

    pub fn browse_ordered(&self, clipboard_id: ClipboardId, order: BrowseOrder) -> Result<Vec<Item>, DropMindError> {
        self.engine.browse_ordered(clipboard_id, order)
    }

    pub fn get_clipboard(&self, clipboard_id: ClipboardId) -> Result<Clipboard, DropMindError> {
        self.engine.get_clipboard(clipboard_id)
    }

    pub fn enrichment_record(&self, item_id: ItemId) -> Result<Option<EnrichmentRecord>, DropMindError> {
        self.engine.enrichment_record(item_id)
    }

    /// What the search index currently holds for an item
    pub fn index_entry(&self, item_id: ItemId) -> Result<Option<SearchIndexEntry>, DropMindError> {
        self.engine.index_entry(item_id)
    }

    /// Rebuild the search index from the store; returns the number of items indexed
    #[instrument(skip(self))]
    pub fn rebuild_index(&self) -> Result<u64, DropMindError> {
        self.engine.rebuild_index()
    }

    /// Stop the enrichment worker. Unfinished jobs stay pending for the next open.
    pub fn shutdown(&self) {
        self.enrichment.shutdown();
    }
}

impl Drop for DropMind {
    fn drop(&mut self) {
        self.enrichment.shutdown();
    }
}

impl DropMindApi for DropMind {
    #[instrument(skip(self, payload))]
    fn capture(&self, payload: RawPayload, clipboard_id: Option<ClipboardId>) -> Result<Item, DropMindError> {
        let (item, job) = self.engine.capture(payload, clipboard_id)?;
        self.enqueue(job);
        Ok(item)
    }

    #[instrument(skip(self))]
    fn search(&self, text: &str, scope: Scope) -> Result<Vec<Item>, DropMindError> {
        self.engine.search(text, scope)
    }

    #[instrument(skip(self))]
    fn browse(&self, clipboard_id: ClipboardId) -> Result<Vec<Item>, DropMindError> {
        self.engine.browse(clipboard_id)
    }

    fn get_item(&self, item_id: ItemId) -> Result<Item, DropMindError> {
        self.engine.get_item(item_id)
    }

    fn list_clipboards(&self) -> Result<Vec<Clipboard>, DropMindError> {
        self.engine.list_clipboards()
    }

    #[instrument(skip(self))]
    fn create_clipboard(&self, name: &str) -> Result<Clipboard, DropMindError> {
        self.engine.create_clipboard(name)
    }

    #[instrument(skip(self))]
    fn rename_clipboard(&self, clipboard_id: ClipboardId, name: &str) -> Result<Clipboard, DropMindError> {
        self.engine.rename_clipboard(clipboard_id, name)
    }

    #[instrument(skip(self))]
    fn delete_clipboard(&self, clipboard_id: ClipboardId) -> Result<(), DropMindError> {
        self.engine.delete_clipboard(clipboard_id)
    }

    #[instrument(skip(self))]
    fn set_favorite(&self, clipboard_id: ClipboardId, favorite: bool) -> Result<Clipboard, DropMindError> {
        self.engine.set_favorite(clipboard_id, favorite)
    }

    #[instrument(skip(self))]
    fn set_default(&self, clipboard_id: ClipboardId) -> Result<Clipboard, DropMindError> {
        self.engine.set_default(clipboard_id)
    }

    #[instrument(skip(self))]
    fn move_item(&self, item_id: ItemId, target_clipboard_id: ClipboardId) -> Result<Item, DropMindError> {
        self.engine.move_item(item_id, target_clipboard_id)
    }

    #[instrument(skip(self))]
    fn set_pinned(&self, item_id: ItemId, pinned: bool) -> Result<Item, DropMindError> {
        self.engine.set_pinned(item_id, pinned)
    }

    #[instrument(skip(self, text))]
    fn edit_text(&self, item_id: ItemId, text: &str) -> Result<Item, DropMindError> {
        self.engine.edit_text(item_id, text)
    }

    #[instrument(skip(self))]
    fn delete_item(&self, item_id: ItemId) -> Result<(), DropMindError> {
        self.engine.delete_item(item_id)
    }

    #[instrument(skip(self))]
    fn retry_enrichment(&self, item_id: ItemId) -> Result<(), DropMindError> {
        let job = self.engine.retry_enrichment(item_id)?;
        self.enrichment.enqueue(job);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::interface::{Card, EnrichmentOutcome, EnrichmentStatus, ItemKind, ResolutionFailure};
    use async_trait::async_trait;
    use std::time::Duration;

    fn runtime() -> tokio::runtime::Runtime {
        tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .unwrap()
    }

    /// Answers every URL with a card titled after its last path segment
    struct EchoResolver;

    #[async_trait]
    impl LinkResolver for EchoResolver {
        async fn resolve(&self, url: &str, _timeout: Duration) -> Result<Card, ResolutionFailure> {
            let slug = url.rsplit('/').next().unwrap_or(url).replace('-', " ");
            Ok(Card { title: Some(slug), site_name: Some("Echo".into()), ..Default::default() })
        }
    }

    struct FailingResolver;

    #[async_trait]
    impl LinkResolver for FailingResolver {
        async fn resolve(&self, _url: &str, _timeout: Duration) -> Result<Card, ResolutionFailure> {
            Err(ResolutionFailure::Unparseable)
        }
    }

    fn memory_store(resolver: Arc<dyn LinkResolver>) -> DropMind {
        DropMind::builder().in_memory().resolver(resolver).open().unwrap()
    }

    async fn next_event(events: &mut broadcast::Receiver<EnrichmentEvent>) -> EnrichmentEvent {
        tokio::time::timeout(Duration::from_secs(5), events.recv()).await.unwrap().unwrap()
    }

    #[test]
    fn test_store_creation() {
        let rt = runtime();
        let store = DropMind::builder()
            .in_memory()
            .runtime(rt.handle().clone())
            .open()
            .unwrap();
        assert_eq!(store.list_clipboards().unwrap().len(), 1);
    }

    #[test]
    fn test_sync_calls_work_outside_a_runtime() {
        let store = memory_store(Arc::new(FailingResolver));
        let item = store.capture(RawPayload::text("no runtime needed"), None).unwrap();
        assert_eq!(store.search("runtime", Scope::Global).unwrap()[0].id, item.id);
    }

    #[tokio::test]
    async fn test_link_card_arrives_in_background() {
        let store = memory_store(Arc::new(EchoResolver));
        let mut events = store.subscribe_enrichment();

        let item = store.capture(RawPayload::text("https://blog.example.com/async-rust-patterns"), None).unwrap();
        assert_eq!(item.kind(), ItemKind::Link);
        assert_eq!(item.card(), None);

        let event = next_event(&mut events).await;
        assert_eq!(event.item_id, item.id);
        assert_eq!(event.outcome, EnrichmentOutcome::Resolved);

        let stored = store.get_item(item.id).unwrap();
        assert_eq!(stored.card().and_then(|c| c.title.as_deref()), Some("async rust patterns"));
        assert_eq!(store.search("patterns", Scope::Global).unwrap()[0].id, item.id);
        assert_eq!(store.search("echo", Scope::Global).unwrap()[0].id, item.id);
    }

    #[tokio::test]
    async fn test_failed_enrichment_leaves_item_intact() {
        let store = memory_store(Arc::new(FailingResolver));
        let mut events = store.subscribe_enrichment();

        let item = store.capture(RawPayload::text("https://example.com/empty"), None).unwrap();
        let event = next_event(&mut events).await;
        assert_eq!(
            event.outcome,
            EnrichmentOutcome::Abandoned { failure: ResolutionFailure::Unparseable, attempts: 1 }
        );

        assert_eq!(store.get_item(item.id).unwrap().card(), None);
        assert_eq!(store.search("example", Scope::Global).unwrap()[0].id, item.id);
        let record = store.enrichment_record(item.id).unwrap().unwrap();
        assert_eq!(record.status, EnrichmentStatus::Abandoned);
    }

    #[tokio::test]
    async fn test_retry_enrichment_requeues() {
        let store = memory_store(Arc::new(FailingResolver));
        let mut events = store.subscribe_enrichment();

        let item = store.capture(RawPayload::text("https://example.com/again"), None).unwrap();
        next_event(&mut events).await;

        store.retry_enrichment(item.id).unwrap();
        let event = next_event(&mut events).await;
        assert_eq!(event.item_id, item.id);
        assert!(matches!(event.outcome, EnrichmentOutcome::Abandoned { .. }));
    }

    #[tokio::test]
    async fn test_pending_jobs_resume_on_open() {
        let dir = tempfile::tempdir().unwrap();
        let config = Config { data_dir: Some(dir.path().to_path_buf()), ..Default::default() };

        // A run that captured a link but never enriched it
        let link_id = {
            let (db_path, index_path) = DropMind::data_paths(&config).unwrap();
            let engine = Engine::new(
                Database::open(db_path).unwrap(),
                Indexer::new(&index_path, &config.search).unwrap(),
                config.limits.clone(),
                config.search.clone(),
                false,
            );
            engine.capture(RawPayload::text("https://example.com/resumed-later"), None).unwrap().0.id
        };

        let store = DropMind::builder().config(config).resolver(Arc::new(EchoResolver)).open().unwrap();
        for _ in 0..500 {
            if store.enrichment_record(link_id).unwrap().unwrap().status == EnrichmentStatus::Resolved {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        let item = store.get_item(link_id).unwrap();
        assert_eq!(item.card().and_then(|c| c.title.as_deref()), Some("resumed later"));
    }

    #[tokio::test]
    async fn test_clipboard_delete_discards_late_enrichment() {
        /// Holds every response until released
        struct GatedResolver(tokio::sync::Notify);

        #[async_trait]
        impl LinkResolver for GatedResolver {
            async fn resolve(&self, _url: &str, _timeout: Duration) -> Result<Card, ResolutionFailure> {
                self.0.notified().await;
                Ok(Card { title: Some("Too Late".into()), ..Default::default() })
            }
        }

        let gate = Arc::new(GatedResolver(tokio::sync::Notify::new()));
        let store = memory_store(gate.clone());
        let mut events = store.subscribe_enrichment();

        let scratch = store.create_clipboard("scratch").unwrap();
        let item = store.capture(RawPayload::text("https://example.com/slow"), Some(scratch.id)).unwrap();
        tokio::task::yield_now().await;

        store.delete_clipboard(scratch.id).unwrap();
        gate.0.notify_one();

        let event = next_event(&mut events).await;
        assert_eq!(event.outcome, EnrichmentOutcome::Discarded);
        assert!(store.get_item(item.id).is_err());
        assert!(store.index_entry(item.id).unwrap().is_none());
        assert!(store.search("late", Scope::Global).unwrap().is_empty());
    }

    #[test]
    fn test_reopen_keeps_items_and_index() {
        let rt = runtime();
        let dir = tempfile::tempdir().unwrap();
        let config = Config { data_dir: Some(dir.path().to_path_buf()), ..Default::default() };

        let id = {
            let store = DropMind::builder()
                .config(config.clone())
                .resolver(Arc::new(FailingResolver))
                .runtime(rt.handle().clone())
                .open()
                .unwrap();
            store.capture(RawPayload::text("persisted across restarts"), None).unwrap().id
        };
        // Let the stopped worker release its handles
        rt.block_on(async { tokio::time::sleep(Duration::from_millis(20)).await });

        let store = DropMind::builder()
            .config(config)
            .resolver(Arc::new(FailingResolver))
            .runtime(rt.handle().clone())
            .open()
            .unwrap();
        assert_eq!(store.search("restarts", Scope::Global).unwrap()[0].id, id);
    }
}
