//! Synchronous core shared by every entry point
//!
//! Every mutation runs in one immediate SQL transaction; the search index is
//! updated and committed inside that transaction, before the SQL commit. If
//! the index write fails the transaction rolls back. If the SQL commit fails,
//! the index change is compensated. Readers therefore never see an index
//! entry for an item that the store does not hold in the same shape, except
//! for the instant between the two commits, which search filters out on
//! hydration.
//!
//! Capture lives in `ingest.rs`, clipboard maintenance in `clipboards.rs`,
//! queries in `search.rs`.

use crate::config::{CaptureLimits, SearchSettings};
use crate::database::{db_now, Database};
use crate::enrichment::{EnrichmentApplier, EnrichmentJob, EnrichmentValue, FetchResult};
use crate::indexer::{Indexer, SearchIndexEntry};
use crate::interface::{
    ClassificationError, ClipboardId, DropMindError, EnrichmentOutcome, EnrichmentRecord,
    EnrichmentStatus, EnrichmentTask, Item, ItemId, ItemPayload,
};
use crate::locks::StripedLocks;
use crate::models::derive_search_text;
use rayon::prelude::*;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, info, warn};

pub struct Engine {
    pub(crate) db: Arc<Database>,
    pub(crate) index: Arc<Indexer>,
    pub(crate) clipboard_locks: StripedLocks,
    pub(crate) item_locks: StripedLocks,
    pub(crate) limits: CaptureLimits,
    pub(crate) search_settings: SearchSettings,
    pub(crate) geocoding_enabled: bool,
}

impl Engine {
    pub fn new(
        db: Database,
        index: Indexer,
        limits: CaptureLimits,
        search_settings: SearchSettings,
        geocoding_enabled: bool,
    ) -> Self {
        Self {
            db: Arc::new(db),
            index: Arc::new(index),
            clipboard_locks: StripedLocks::default(),
            item_locks: StripedLocks::default(),
            limits,
            search_settings,
            geocoding_enabled,
        }
    }

    // ─────────────────────────────────────────────────────────────────────────────
    // Index maintenance
    // ─────────────────────────────────────────────────────────────────────────────

    /// Rebuild when the index and the store disagree on the item count
    pub fn rebuild_index_if_needed(&self) -> Result<(), DropMindError> {
        let stored = self.db.read(|conn| Database::count_items(conn))?;
        let indexed = self.index.num_docs();
        if stored == indexed {
            return Ok(());
        }
        info!(stored, indexed, "Search index out of sync; rebuilding");
        self.rebuild_index().map(|_| ())
    }

    /// Drop every index entry and re-add all stored items. Holds the write
    /// transaction throughout, so no mutation interleaves.
    pub fn rebuild_index(&self) -> Result<u64, DropMindError> {
        self.db.write(|conn| -> Result<u64, DropMindError> {
            let items = Database::fetch_all_items(conn)?;
            self.index.clear()?;
            let staged = items.par_iter().try_for_each(|item| self.index.add_document(item));
            if let Err(e) = staged {
                self.index.rollback();
                return Err(e.into());
            }
            self.index.commit()?;
            info!(items = items.len(), "Rebuilt search index");
            Ok(items.len() as u64)
        })
    }

    pub fn index_entry(&self, item_id: ItemId) -> Result<Option<SearchIndexEntry>, DropMindError> {
        Ok(self.index.entry(item_id)?)
    }

    /// Put an item's previous index document back after a failed SQL commit
    pub(crate) fn restore_index(&self, previous: &Item) {
        if let Err(e) = self.index.index(previous) {
            warn!(item_id = previous.id, error = %e, "Failed to restore index entry");
        }
    }

    pub(crate) fn evict_index(&self, item_ids: &[ItemId]) {
        if let Err(e) = self.index.remove_many(item_ids) {
            warn!(items = item_ids.len(), error = %e, "Failed to evict index entries");
        }
    }

    // ─────────────────────────────────────────────────────────────────────────────
    // Items
    // ─────────────────────────────────────────────────────────────────────────────

    pub fn get_item(&self, item_id: ItemId) -> Result<Item, DropMindError> {
        self.db
            .read(|conn| Database::fetch_item(conn, item_id))?
            .ok_or_else(|| DropMindError::item_not_found(item_id))
    }

    /// Reassign an item to another clipboard. Moving to its current clipboard is a no-op.
    pub fn move_item(&self, item_id: ItemId, target: ClipboardId) -> Result<Item, DropMindError> {
        let _clipboard_guard = self.clipboard_locks.read(target);
        let _item_guard = self.item_locks.write(item_id);

        let (item, _) = self.db.write_compensated(
            |conn| -> Result<(Item, Item), DropMindError> {
                let previous = Database::fetch_item(conn, item_id)?
                    .ok_or_else(|| DropMindError::item_not_found(item_id))?;
                if Database::get_clipboard(conn, target)?.is_none() {
                    return Err(DropMindError::clipboard_not_found(target));
                }
                if previous.clipboard_id == target {
                    return Ok((previous.clone(), previous));
                }

                let now = db_now();
                Database::set_item_clipboard(conn, item_id, target, now)?;
                let item = Item { clipboard_id: target, updated_at: now, ..previous.clone() };
                self.index.index(&item)?;
                Ok((item, previous))
            },
            |(_, previous)| self.restore_index(previous),
        )?;

        debug!(item_id, clipboard_id = target, "Moved item");
        Ok(item)
    }

    pub fn set_pinned(&self, item_id: ItemId, pinned: bool) -> Result<Item, DropMindError> {
        let _item_guard = self.item_locks.write(item_id);

        let (item, _) = self.db.write_compensated(
            |conn| -> Result<(Item, Item), DropMindError> {
                let previous = Database::fetch_item(conn, item_id)?
                    .ok_or_else(|| DropMindError::item_not_found(item_id))?;
                if previous.pinned == pinned {
                    return Ok((previous.clone(), previous));
                }

                let now = db_now();
                Database::set_item_pinned(conn, item_id, pinned, now)?;
                let item = Item { pinned, updated_at: now, ..previous.clone() };
                self.index.index(&item)?;
                Ok((item, previous))
            },
            |(_, previous)| self.restore_index(previous),
        )?;
        Ok(item)
    }

    /// Replace a note's text, an attachment's caption or a location's label
    pub fn edit_text(&self, item_id: ItemId, text: &str) -> Result<Item, DropMindError> {
        let size = text.len() as u64;
        if size > self.limits.max_text_bytes {
            return Err(ClassificationError::TooLarge { size, limit: self.limits.max_text_bytes }.into());
        }
        let _item_guard = self.item_locks.write(item_id);

        let (item, _) = self.db.write_compensated(
            |conn| -> Result<(Item, Item), DropMindError> {
                let previous = Database::fetch_item(conn, item_id)?
                    .ok_or_else(|| DropMindError::item_not_found(item_id))?;

                let mut item = previous.clone();
                item.payload.replace_text(text).map_err(DropMindError::InvalidInput)?;
                item.search_text = derive_search_text(&item.payload);
                item.updated_at = db_now();

                Database::save_payload(conn, &item, true)?;
                // A label typed by the user supersedes any geocode still in flight
                if matches!(item.payload, ItemPayload::Location { label: Some(_), .. })
                    && Database::cancel_pending_enrichment(conn, item_id)?
                {
                    debug!(item_id, "Cancelled pending geocode");
                }
                self.index.index(&item)?;
                Ok((item, previous))
            },
            |(_, previous)| self.restore_index(previous),
        )?;

        debug!(item_id, kind = %item.kind(), "Edited item text");
        Ok(item)
    }

    pub fn delete_item(&self, item_id: ItemId) -> Result<(), DropMindError> {
        let _item_guard = self.item_locks.write(item_id);

        self.db.write_compensated(
            |conn| -> Result<Item, DropMindError> {
                let previous = Database::fetch_item(conn, item_id)?
                    .ok_or_else(|| DropMindError::item_not_found(item_id))?;
                Database::delete_item(conn, item_id)?;
                self.index.remove(item_id)?;
                Ok(previous)
            },
            |previous| self.restore_index(previous),
        )?;

        debug!(item_id, "Deleted item");
        Ok(())
    }

    // ─────────────────────────────────────────────────────────────────────────────
    // Enrichment bookkeeping
    // ─────────────────────────────────────────────────────────────────────────────

    /// The background job a freshly captured item calls for
    pub(crate) fn job_for_capture(&self, item: &Item) -> Option<EnrichmentJob> {
        match (&item.payload, item.payload.enrichment_task()?) {
            (ItemPayload::Link { url, .. }, EnrichmentTask::Link) => Some(EnrichmentJob::link(item.id, url.clone())),
            (ItemPayload::Location { lat, lon, .. }, EnrichmentTask::Geocode) if self.geocoding_enabled => {
                Some(EnrichmentJob::geocode(item.id, *lat, *lon))
            }
            _ => None,
        }
    }

    /// Reset the item's record to pending and return the job to enqueue
    pub fn retry_enrichment(&self, item_id: ItemId) -> Result<EnrichmentJob, DropMindError> {
        let _item_guard = self.item_locks.write(item_id);

        self.db.write(|conn| {
            let item = Database::fetch_item(conn, item_id)?
                .ok_or_else(|| DropMindError::item_not_found(item_id))?;
            let job = match &item.payload {
                ItemPayload::Link { url, .. } => EnrichmentJob::link(item_id, url.clone()),
                ItemPayload::Location { lat, lon, label: None } if self.geocoding_enabled => {
                    EnrichmentJob::geocode(item_id, *lat, *lon)
                }
                _ => {
                    return Err(DropMindError::InvalidInput(format!(
                        "{} item {item_id} has nothing to enrich",
                        item.kind()
                    )))
                }
            };
            let generation = Database::mark_enrichment_pending(conn, item_id, job.task(), db_now())?;
            Ok(job.with_generation(generation))
        })
    }

    pub fn enrichment_record(&self, item_id: ItemId) -> Result<Option<EnrichmentRecord>, DropMindError> {
        Ok(self.db.read(|conn| Database::enrichment_record(conn, item_id))?)
    }

    /// Jobs left pending by a previous run
    pub fn pending_jobs(&self) -> Result<Vec<EnrichmentJob>, DropMindError> {
        let pending = self.db.read(|conn| Database::pending_enrichment(conn))?;
        let ids: Vec<ItemId> = pending.iter().map(|(id, _, _)| *id).collect();
        let items = self.db.read(|conn| Database::fetch_items_by_ids(conn, &ids))?;
        let tasks: HashMap<ItemId, (EnrichmentTask, u32)> =
            pending.into_iter().map(|(id, task, generation)| (id, (task, generation))).collect();

        Ok(items
            .iter()
            .filter_map(|item| Some((item, tasks.get(&item.id)?)))
            .filter_map(|(item, (task, generation))| {
                let job = match (&item.payload, task) {
                    (ItemPayload::Link { url, .. }, EnrichmentTask::Link) => EnrichmentJob::link(item.id, url.clone()),
                    (ItemPayload::Location { lat, lon, label: None }, EnrichmentTask::Geocode)
                        if self.geocoding_enabled =>
                    {
                        EnrichmentJob::geocode(item.id, *lat, *lon)
                    }
                    _ => return None,
                };
                Some(job.with_generation(*generation))
            })
            .collect())
    }
}

impl EnrichmentApplier for Engine {
    /// Store a fetch result if the item still exists and the result belongs to
    /// its current pending record. Re-indexes exactly once on success.
    fn apply_enrichment(&self, fetched: FetchResult) -> Result<EnrichmentOutcome, DropMindError> {
        let item_id = fetched.item_id;
        let _item_guard = self.item_locks.write(item_id);

        let (outcome, _) = self.db.write_compensated(
            |conn| -> Result<(EnrichmentOutcome, Option<Item>), DropMindError> {
                let Some(previous) = Database::fetch_item(conn, item_id)? else {
                    return Ok((EnrichmentOutcome::Discarded, None));
                };
                let current = Database::enrichment_record(conn, item_id)?.filter(|record| {
                    record.status == EnrichmentStatus::Pending && record.generation == fetched.generation
                });
                if current.is_none() {
                    debug!(item_id, generation = fetched.generation, "Stale enrichment result");
                    return Ok((EnrichmentOutcome::Discarded, None));
                }
                let now = db_now();

                let value = match fetched.result {
                    Ok(value) => value,
                    Err(failure) => {
                        Database::mark_enrichment_finished(conn, item_id, fetched.attempts, Some(&failure), now)?;
                        return Ok((EnrichmentOutcome::Abandoned { failure, attempts: fetched.attempts }, None));
                    }
                };

                let mut item = previous.clone();
                let applied = match value {
                    EnrichmentValue::Card(card) => item.payload.set_card(card),
                    EnrichmentValue::Label(label) => item.payload.set_label(label),
                };
                if !applied {
                    debug!(item_id, task = fetched.task.as_str(), "Item no longer takes this enrichment");
                    Database::mark_enrichment_finished(conn, item_id, fetched.attempts, None, now)?;
                    return Ok((EnrichmentOutcome::Discarded, None));
                }

                item.search_text = derive_search_text(&item.payload);
                Database::save_payload(conn, &item, false)?;
                Database::mark_enrichment_finished(conn, item_id, fetched.attempts, None, now)?;
                self.index.index(&item)?;
                Ok((EnrichmentOutcome::Resolved, Some(previous)))
            },
            |(_, previous)| {
                if let Some(previous) = previous {
                    self.restore_index(previous);
                }
            },
        )?;
        Ok(outcome)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::interface::{Card, RawPayload, ResolutionFailure, Scope};

    fn engine() -> Engine {
        engine_with_geocoding(false)
    }

    fn engine_with_geocoding(geocoding_enabled: bool) -> Engine {
        let settings = SearchSettings::default();
        Engine::new(
            Database::open_in_memory().unwrap(),
            Indexer::new_in_memory(&settings).unwrap(),
            CaptureLimits::default(),
            settings,
            geocoding_enabled,
        )
    }

    fn capture_text(engine: &Engine, text: &str) -> Item {
        engine.capture(RawPayload::text(text), None).unwrap().0
    }

    fn resolved(job: &EnrichmentJob, card: Card) -> FetchResult {
        job.finish(1, Ok(EnrichmentValue::Card(card)))
    }

    fn ids(items: &[Item]) -> Vec<ItemId> {
        items.iter().map(|i| i.id).collect()
    }

    #[test]
    fn test_move_updates_store_and_index() {
        let engine = engine();
        let item = capture_text(&engine, "quarterly budget numbers");
        let other = engine.create_clipboard("work").unwrap();

        let moved = engine.move_item(item.id, other.id).unwrap();
        assert_eq!(moved.clipboard_id, other.id);
        assert_eq!(engine.get_item(item.id).unwrap().clipboard_id, other.id);
        assert_eq!(engine.index_entry(item.id).unwrap().unwrap().clipboard_id, other.id);

        assert!(engine.search("budget", Scope::Clipboard(item.clipboard_id)).unwrap().is_empty());
        assert_eq!(ids(&engine.search("budget", Scope::Clipboard(other.id)).unwrap()), vec![item.id]);
    }

    #[test]
    fn test_move_to_same_clipboard_is_noop() {
        let engine = engine();
        let item = capture_text(&engine, "stay put");
        let moved = engine.move_item(item.id, item.clipboard_id).unwrap();
        assert_eq!(moved, item);
    }

    #[test]
    fn test_move_errors() {
        let engine = engine();
        let item = capture_text(&engine, "some note");
        assert!(matches!(engine.move_item(item.id, 999), Err(DropMindError::NotFound { .. })));
        assert!(matches!(engine.move_item(999, item.clipboard_id), Err(DropMindError::NotFound { .. })));
        assert_eq!(engine.get_item(item.id).unwrap().clipboard_id, item.clipboard_id);
    }

    #[test]
    fn test_pin_is_idempotent() {
        let engine = engine();
        let item = capture_text(&engine, "pin me");
        let pinned = engine.set_pinned(item.id, true).unwrap();
        assert!(pinned.pinned);
        let again = engine.set_pinned(item.id, true).unwrap();
        assert_eq!(again, pinned);
        assert!(!engine.set_pinned(item.id, false).unwrap().pinned);
    }

    #[test]
    fn test_edit_note_reindexes() {
        let engine = engine();
        let item = capture_text(&engine, "draft about apples");
        let edited = engine.edit_text(item.id, "final about oranges").unwrap();

        assert_eq!(edited.search_text, "final about oranges");
        assert!(edited.updated_at >= item.updated_at);
        assert!(engine.search("apples", Scope::Global).unwrap().is_empty());
        assert_eq!(ids(&engine.search("oranges", Scope::Global).unwrap()), vec![item.id]);
    }

    #[test]
    fn test_edit_rejects_links_and_blank_notes() {
        let engine = engine();
        let link = capture_text(&engine, "https://example.com");
        assert!(matches!(engine.edit_text(link.id, "new"), Err(DropMindError::InvalidInput(_))));

        let note = capture_text(&engine, "keep me");
        assert!(matches!(engine.edit_text(note.id, "   "), Err(DropMindError::InvalidInput(_))));
        assert_eq!(engine.get_item(note.id).unwrap().payload, note.payload);
    }

    #[test]
    fn test_edit_enforces_size_limit() {
        let mut engine = engine();
        engine.limits.max_text_bytes = 8;
        let note = capture_text(&engine, "short");
        assert!(matches!(
            engine.edit_text(note.id, "definitely too long"),
            Err(DropMindError::Classification(ClassificationError::TooLarge { .. }))
        ));
    }

    #[test]
    fn test_delete_item_removes_from_index() {
        let engine = engine();
        let item = capture_text(&engine, "ephemeral thought");
        engine.delete_item(item.id).unwrap();

        assert!(matches!(engine.get_item(item.id), Err(DropMindError::NotFound { .. })));
        assert!(engine.index_entry(item.id).unwrap().is_none());
        assert!(engine.search("ephemeral", Scope::Global).unwrap().is_empty());
        assert!(matches!(engine.delete_item(item.id), Err(DropMindError::NotFound { .. })));
    }

    #[test]
    fn test_apply_card_reindexes_with_title() {
        let engine = engine();
        let (link, job) = engine.capture(RawPayload::text("https://example.com/post"), None).unwrap();
        let job = job.unwrap();
        assert_eq!(job, EnrichmentJob::link(link.id, "https://example.com/post").with_generation(1));
        assert!(engine.search("ferris", Scope::Global).unwrap().is_empty());

        let card = Card { title: Some("Ferris the Crab".into()), site_name: Some("Rustacean".into()), ..Default::default() };
        let outcome = engine.apply_enrichment(resolved(&job, card.clone())).unwrap();
        assert_eq!(outcome, EnrichmentOutcome::Resolved);

        let stored = engine.get_item(link.id).unwrap();
        assert_eq!(stored.card(), Some(&card));
        assert_eq!(stored.updated_at, link.updated_at);
        assert_eq!(ids(&engine.search("ferris", Scope::Global).unwrap()), vec![link.id]);

        let record = engine.enrichment_record(link.id).unwrap().unwrap();
        assert_eq!(record.status, crate::interface::EnrichmentStatus::Resolved);
    }

    #[test]
    fn test_apply_for_deleted_item_is_discarded() {
        let engine = engine();
        let (link, job) = engine.capture(RawPayload::text("https://example.com"), None).unwrap();
        engine.delete_item(link.id).unwrap();

        let outcome = engine
            .apply_enrichment(resolved(&job.unwrap(), Card { title: Some("Ghost".into()), ..Default::default() }))
            .unwrap();
        assert_eq!(outcome, EnrichmentOutcome::Discarded);
        assert!(engine.index_entry(link.id).unwrap().is_none());
        assert!(engine.search("ghost", Scope::Global).unwrap().is_empty());
    }

    #[test]
    fn test_apply_failure_records_abandonment() {
        let engine = engine();
        let (link, job) = engine.capture(RawPayload::text("https://example.com/404"), None).unwrap();
        let failure = ResolutionFailure::Unreachable { status: Some(404) };
        let fetched = job.unwrap().finish(1, Err(failure.clone()));

        let outcome = engine.apply_enrichment(fetched).unwrap();
        assert_eq!(outcome, EnrichmentOutcome::Abandoned { failure: failure.clone(), attempts: 1 });
        assert_eq!(engine.get_item(link.id).unwrap().card(), None);

        let record = engine.enrichment_record(link.id).unwrap().unwrap();
        assert_eq!(record.status, crate::interface::EnrichmentStatus::Abandoned);
        assert_eq!(record.last_failure, Some(failure));

        let job = engine.retry_enrichment(link.id).unwrap();
        assert_eq!(job.task(), EnrichmentTask::Link);
        let record = engine.enrichment_record(link.id).unwrap().unwrap();
        assert_eq!(record.status, crate::interface::EnrichmentStatus::Pending);
        assert_eq!(record.attempts, 0);
    }

    #[test]
    fn test_retry_on_note_is_invalid() {
        let engine = engine();
        let note = capture_text(&engine, "plain");
        assert!(matches!(engine.retry_enrichment(note.id), Err(DropMindError::InvalidInput(_))));
    }

    #[test]
    fn test_geocode_jobs_only_when_enabled() {
        let disabled = engine();
        let (location, job) = disabled.capture(RawPayload::location(1.0, 2.0, None), None).unwrap();
        assert_eq!(job, None);
        assert!(disabled.retry_enrichment(location.id).is_err());

        let enabled = engine_with_geocoding(true);
        let (location, job) = enabled.capture(RawPayload::location(1.0, 2.0, None), None).unwrap();
        let job = job.unwrap();
        assert_eq!(job, EnrichmentJob::geocode(location.id, 1.0, 2.0).with_generation(1));

        let fetched = job.finish(2, Ok(EnrichmentValue::Label("Null Island Annex".into())));
        assert_eq!(enabled.apply_enrichment(fetched).unwrap(), EnrichmentOutcome::Resolved);
        assert_eq!(ids(&enabled.search("annex", Scope::Global).unwrap()), vec![location.id]);
    }

    #[test]
    fn test_pending_jobs_survive_restart() {
        let dir = tempfile::tempdir().unwrap();
        let settings = SearchSettings::default();
        let open = || {
            Engine::new(
                Database::open(dir.path().join("dropmind.sqlite")).unwrap(),
                Indexer::new(&dir.path().join("index"), &settings).unwrap(),
                CaptureLimits::default(),
                settings.clone(),
                false,
            )
        };

        let link_id = {
            let engine = open();
            capture_text(&engine, "note alongside");
            engine.capture(RawPayload::text("https://example.com/later"), None).unwrap().0.id
        };

        let engine = open();
        assert_eq!(
            engine.pending_jobs().unwrap(),
            vec![EnrichmentJob::link(link_id, "https://example.com/later").with_generation(1)]
        );
    }

    #[test]
    fn test_user_label_survives_late_geocode() {
        let engine = engine_with_geocoding(true);
        let (place, job) = engine.capture(RawPayload::text("48.8584, 2.2945"), None).unwrap();
        let job = job.unwrap();
        assert_eq!(job.task(), EnrichmentTask::Geocode);

        engine.edit_text(place.id, "Grandma's house").unwrap();
        assert!(engine.enrichment_record(place.id).unwrap().is_none());
        assert!(engine.pending_jobs().unwrap().is_empty());

        let late = job.finish(1, Ok(EnrichmentValue::Label("Rue Inconnue, Nowhere".into())));
        assert_eq!(engine.apply_enrichment(late).unwrap(), EnrichmentOutcome::Discarded);

        let stored = engine.get_item(place.id).unwrap();
        assert_eq!(stored.payload.title_text(), Some("Grandma's house"));
        assert_eq!(ids(&engine.search("grandma", Scope::Global).unwrap()), vec![place.id]);
        assert!(engine.search("inconnue", Scope::Global).unwrap().is_empty());
        assert!(matches!(engine.retry_enrichment(place.id), Err(DropMindError::InvalidInput(_))));
    }

    #[test]
    fn test_stale_job_cannot_overwrite_retry_outcome() {
        let engine = engine();
        let (link, first) = engine.capture(RawPayload::text("https://example.com/flaky"), None).unwrap();
        let first = first.unwrap();
        let retry = engine.retry_enrichment(link.id).unwrap();
        assert_eq!(retry.generation, first.generation + 1);

        let card = Card { title: Some("Fresh".into()), ..Default::default() };
        assert_eq!(engine.apply_enrichment(resolved(&retry, card.clone())).unwrap(), EnrichmentOutcome::Resolved);

        let stale = first.finish(3, Err(ResolutionFailure::Timeout));
        assert_eq!(engine.apply_enrichment(stale).unwrap(), EnrichmentOutcome::Discarded);

        let record = engine.enrichment_record(link.id).unwrap().unwrap();
        assert_eq!(record.status, crate::interface::EnrichmentStatus::Resolved);
        assert_eq!(record.last_failure, None);
        assert_eq!(engine.get_item(link.id).unwrap().card(), Some(&card));
    }

    #[test]
    fn test_rebuild_index_restores_entries() {
        let engine = engine();
        let a = capture_text(&engine, "alpha bravo");
        let b = capture_text(&engine, "bravo charlie");
        engine.index.clear().unwrap();
        assert!(engine.search("bravo", Scope::Global).unwrap().is_empty());

        engine.rebuild_index_if_needed().unwrap();
        let mut found = ids(&engine.search("bravo", Scope::Global).unwrap());
        found.sort_unstable();
        assert_eq!(found, vec![a.id, b.id]);
        assert_eq!(engine.rebuild_index().unwrap(), 2);
    }
}
