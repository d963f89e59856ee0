//! Clipboard maintenance
//!
//! A store always holds at least one clipboard, and exactly one of them is the
//! default. Names are unique ignoring case and surrounding whitespace.

use crate::database::{db_now, Database};
use crate::engine::Engine;
use crate::interface::{Clipboard, ClipboardId, DropMindError};
use rusqlite::Connection;
use tracing::info;

fn clean_name(name: &str) -> Result<&str, DropMindError> {
    let name = name.trim();
    if name.is_empty() {
        return Err(DropMindError::InvalidInput("clipboard name cannot be blank".into()));
    }
    Ok(name)
}

/// Fails when another clipboard already uses `name`
fn ensure_name_free(conn: &Connection, name: &str, except: Option<ClipboardId>) -> Result<(), DropMindError> {
    match Database::find_clipboard_by_name(conn, name)? {
        Some(existing) if Some(existing.id) != except => {
            Err(DropMindError::DuplicateName { name: existing.name })
        }
        _ => Ok(()),
    }
}

fn require_clipboard(conn: &Connection, id: ClipboardId) -> Result<Clipboard, DropMindError> {
    Database::get_clipboard(conn, id)?.ok_or_else(|| DropMindError::clipboard_not_found(id))
}

impl Engine {
    pub fn list_clipboards(&self) -> Result<Vec<Clipboard>, DropMindError> {
        Ok(self.db.read(|conn| Database::list_clipboards(conn))?)
    }

    pub fn get_clipboard(&self, id: ClipboardId) -> Result<Clipboard, DropMindError> {
        self.db
            .read(|conn| Database::get_clipboard(conn, id))?
            .ok_or_else(|| DropMindError::clipboard_not_found(id))
    }

    pub fn create_clipboard(&self, name: &str) -> Result<Clipboard, DropMindError> {
        let name = clean_name(name)?;
        let clipboard = self.db.write(|conn| {
            ensure_name_free(conn, name, None)?;
            Ok::<_, DropMindError>(Database::insert_clipboard(conn, name, db_now())?)
        })?;
        info!(clipboard_id = clipboard.id, name = %clipboard.name, "Created clipboard");
        Ok(clipboard)
    }

    pub fn rename_clipboard(&self, id: ClipboardId, name: &str) -> Result<Clipboard, DropMindError> {
        let name = clean_name(name)?;
        let _guard = self.clipboard_locks.write(id);
        self.db.write(|conn| {
            require_clipboard(conn, id)?;
            ensure_name_free(conn, name, Some(id))?;
            Database::rename_clipboard(conn, id, name)?;
            require_clipboard(conn, id)
        })
    }

    pub fn set_favorite(&self, id: ClipboardId, favorite: bool) -> Result<Clipboard, DropMindError> {
        self.db.write(|conn| {
            if !Database::set_clipboard_favorite(conn, id, favorite)? {
                return Err(DropMindError::clipboard_not_found(id));
            }
            require_clipboard(conn, id)
        })
    }

    /// Promote `id` to default; the previous default is demoted in the same transaction
    pub fn set_default(&self, id: ClipboardId) -> Result<Clipboard, DropMindError> {
        let clipboard = self.db.write(|conn| {
            require_clipboard(conn, id)?;
            Database::set_default_clipboard(conn, id)?;
            require_clipboard(conn, id)
        })?;
        info!(clipboard_id = id, "Default clipboard changed");
        Ok(clipboard)
    }

    /// Delete a clipboard and every item in it.
    ///
    /// Refuses the last remaining clipboard and the default one. Items are
    /// evicted from the index before the SQL commit; a failed commit puts them back.
    pub fn delete_clipboard(&self, id: ClipboardId) -> Result<(), DropMindError> {
        let _clipboard_guard = self.clipboard_locks.write(id);

        // Captures and moves into this clipboard are blocked by the guard, so
        // the member set can only shrink from here.
        let members = self.db.read(|conn| Database::item_ids_in_clipboard(conn, id))?;
        let _item_guards = self.item_locks.write_many(members.iter().copied());

        let removed = self.db.write_compensated(
            |conn| {
                let clipboard = require_clipboard(conn, id)?;
                if Database::count_clipboards(conn)? <= 1 {
                    return Err(DropMindError::LastClipboard);
                }
                if clipboard.is_default {
                    return Err(DropMindError::DefaultClipboard);
                }

                let items = Database::browse(conn, Some(id), Default::default())?;
                Database::delete_clipboard(conn, id)?;
                let ids: Vec<_> = items.iter().map(|item| item.id).collect();
                self.index.remove_many(&ids)?;
                Ok(items)
            },
            |items| {
                for item in items {
                    self.restore_index(item);
                }
            },
        )?;

        info!(clipboard_id = id, items = removed.len(), "Deleted clipboard");
        Ok(())
    }
}
