//! Query path: tokenize, look up candidates, hydrate, re-check, rank
//!
//! The index only narrows candidates. Every hit is re-read from the store and
//! re-checked against the scope and the query tokens, so an item moved or
//! edited between the index lookup and hydration never shows up where it no
//! longer belongs.

use crate::database::Database;
use crate::engine::Engine;
use crate::interface::{BrowseOrder, ClipboardId, DropMindError, Item, Scope};
use crate::ranking::rank;
use std::collections::BTreeSet;
use tracing::debug;

impl Engine {
    /// Ranked search. Queries with no usable tokens browse the scope instead.
    pub fn search(&self, text: &str, scope: Scope) -> Result<Vec<Item>, DropMindError> {
        let clipboard = self.scope_clipboard(scope)?;
        let tokens = self.index.tokenize(text);
        if tokens.is_empty() {
            return self.browse_scope(clipboard, BrowseOrder::Recent);
        }

        let candidate_ids = self.index.query(&tokens, clipboard)?;
        let candidates = self.db.read(|conn| Database::fetch_items_by_ids(conn, &candidate_ids))?;

        let matches: Vec<Item> = candidates
            .into_iter()
            .filter(|item| clipboard.map_or(true, |id| item.clipboard_id == id))
            .filter(|item| self.still_matches(item, &tokens))
            .collect();

        debug!(
            tokens = tokens.len(),
            candidates = candidate_ids.len(),
            matches = matches.len(),
            global = clipboard.is_none(),
            "Search"
        );
        Ok(rank(matches, &tokens))
    }

    /// A clipboard's items, pinned first, newest first
    pub fn browse(&self, clipboard_id: ClipboardId) -> Result<Vec<Item>, DropMindError> {
        self.browse_ordered(clipboard_id, BrowseOrder::Recent)
    }

    pub fn browse_ordered(&self, clipboard_id: ClipboardId, order: BrowseOrder) -> Result<Vec<Item>, DropMindError> {
        let clipboard = self.scope_clipboard(Scope::Clipboard(clipboard_id))?;
        self.browse_scope(clipboard, order)
    }

    fn browse_scope(&self, clipboard: Option<ClipboardId>, order: BrowseOrder) -> Result<Vec<Item>, DropMindError> {
        Ok(self.db.read(|conn| Database::browse(conn, clipboard, order))?)
    }

    /// Validate the scope; None means global
    fn scope_clipboard(&self, scope: Scope) -> Result<Option<ClipboardId>, DropMindError> {
        match scope {
            Scope::Global => Ok(None),
            Scope::Clipboard(id) => {
                self.db
                    .read(|conn| Database::get_clipboard(conn, id))?
                    .ok_or_else(|| DropMindError::clipboard_not_found(id))?;
                Ok(Some(id))
            }
        }
    }

    fn still_matches(&self, item: &Item, tokens: &BTreeSet<String>) -> bool {
        let item_tokens = self.index.tokenize(&item.search_text);
        tokens.is_subset(&item_tokens)
    }
}
