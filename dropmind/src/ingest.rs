//! Ingestion pipeline: classify, persist, index, then hand back the enrichment job

use crate::content_detection::classify;
use crate::database::{db_now, Database};
use crate::engine::Engine;
use crate::enrichment::EnrichmentJob;
use crate::interface::{ClipboardId, DropMindError, Item, RawPayload};
use tracing::{debug, info};

impl Engine {
    /// Store a raw payload. Nothing is written when classification fails.
    ///
    /// The returned item is already searchable by its literal text. The job,
    /// if any, still has to be enqueued by the caller.
    pub fn capture(
        &self,
        raw: RawPayload,
        clipboard_id: Option<ClipboardId>,
    ) -> Result<(Item, Option<EnrichmentJob>), DropMindError> {
        let draft = classify(raw, &self.limits)?;
        debug!(kind = %draft.kind(), "Classified payload");

        // Explicit targets are held against concurrent deletion. The default
        // clipboard can't be deleted, so resolving it inside the transaction is enough.
        let _clipboard_guard = clipboard_id.map(|id| self.clipboard_locks.read(id));

        let (item, job) = self.db.write_compensated(
            |conn| -> Result<(Item, Option<EnrichmentJob>), DropMindError> {
                let target = match clipboard_id {
                    Some(id) => Database::get_clipboard(conn, id)?
                        .ok_or_else(|| DropMindError::clipboard_not_found(id))?,
                    None => Database::default_clipboard(conn)?
                        .ok_or_else(|| DropMindError::InvalidInput("store has no default clipboard".into()))?,
                };

                let now = db_now();
                let item = Database::insert_item(conn, target.id, &draft, now)?;
                let job = match self.job_for_capture(&item) {
                    Some(job) => {
                        let generation = Database::mark_enrichment_pending(conn, item.id, job.task(), now)?;
                        Some(job.with_generation(generation))
                    }
                    None => None,
                };
                self.index.index(&item)?;
                Ok((item, job))
            },
            |(item, _)| self.evict_index(&[item.id]),
        )?;

        info!(item_id = item.id, clipboard_id = item.clipboard_id, kind = %item.kind(), enrich = job.is_some(), "Captured item");
        Ok((item, job))
    }
}
