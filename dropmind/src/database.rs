//! SQLite database layer for clipboards and items
//!
//! Normalized schema: base `items` table + kind-specific child tables, owned by
//! `clipboards` through cascading foreign keys. Uses r2d2 connection pooling so
//! reads proceed concurrently; writes run in `BEGIN IMMEDIATE` transactions.

use crate::interface::{
    Attachment, BrowseOrder, Card, Clipboard, ClipboardId, EnrichmentRecord, EnrichmentStatus,
    EnrichmentTask, Item, ItemId, ItemKind, ItemPayload, ResolutionFailure,
};
use crate::models::DraftItem;
use chrono::{DateTime, SubsecRound, TimeZone, Utc};
use r2d2::{Pool, PooledConnection};
use r2d2_sqlite::SqliteConnectionManager;
use rusqlite::{params, Connection, OptionalExtension, TransactionBehavior};
use std::path::Path;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum DatabaseError {
    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Connection pool error: {0}")]
    Pool(#[from] r2d2::Error),
}

pub type DatabaseResult<T> = Result<T, DatabaseError>;

/// Name of the clipboard created for an empty store
pub const INITIAL_CLIPBOARD_NAME: &str = "main";

const TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S%.6f";

/// Fixed-width so lexical order in SQL matches chronological order
pub(crate) fn format_db_timestamp(ts: DateTime<Utc>) -> String {
    ts.format(TIMESTAMP_FORMAT).to_string()
}

/// Current time at the precision the database stores
pub(crate) fn db_now() -> DateTime<Utc> {
    Utc::now().trunc_subsecs(6)
}

/// Parse a stored timestamp. Unreadable values are a conversion error on `column`.
fn parse_db_timestamp(column: usize, timestamp_str: &str) -> rusqlite::Result<DateTime<Utc>> {
    chrono::NaiveDateTime::parse_from_str(timestamp_str, "%Y-%m-%d %H:%M:%S%.f")
        .or_else(|_| chrono::NaiveDateTime::parse_from_str(timestamp_str, "%Y-%m-%d %H:%M:%S"))
        .map(|dt| Utc.from_utc_datetime(&dt))
        .map_err(|e| conversion_error(column, format!("bad timestamp {timestamp_str:?}: {e}")))
}

fn conversion_error(column: usize, message: String) -> rusqlite::Error {
    rusqlite::Error::FromSqlConversionFailure(column, rusqlite::types::Type::Text, message.into())
}

const ITEM_COLUMNS: &str = r#"
    i.id, i.clipboardId, i.kind, i.searchText, i.pinned, i.createdAt, i.updatedAt,
    n.text,
    l.url, l.resolved, l.title, l.description, l.imageUrl, l.siteName,
    a.storageRef, a.filename, a.mimeType, a.sizeBytes, a.caption,
    g.lat, g.lon, g.label
"#;

const ITEM_JOINS: &str = r#"
    FROM items i
    LEFT JOIN note_items n ON n.itemId = i.id
    LEFT JOIN link_items l ON l.itemId = i.id
    LEFT JOIN attachment_items a ON a.itemId = i.id
    LEFT JOIN location_items g ON g.itemId = i.id
"#;

/// Thread-safe database wrapper using connection pooling
pub struct Database {
    pool: Pool<SqliteConnectionManager>,
}

impl Database {
    /// Open or create a database at the given path with connection pooling
    pub fn open<P: AsRef<Path>>(path: P) -> DatabaseResult<Self> {
        if let Some(parent) = path.as_ref().parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }

        let manager = SqliteConnectionManager::file(path)
            .with_init(|conn| {
                conn.execute_batch("
                    PRAGMA journal_mode=WAL;
                    PRAGMA synchronous=NORMAL;
                    PRAGMA foreign_keys=ON;
                    PRAGMA cache_size=-16000;
                ")?;
                Ok(())
            });

        let pool = Pool::builder()
            .max_size(8)
            .build(manager)?;

        let db = Self { pool };
        db.setup_schema()?;
        Ok(db)
    }

    /// Open an in-memory database
    pub fn open_in_memory() -> DatabaseResult<Self> {
        let manager = SqliteConnectionManager::memory()
            .with_init(|conn| {
                conn.execute_batch("
                    PRAGMA journal_mode=WAL;
                    PRAGMA synchronous=NORMAL;
                    PRAGMA foreign_keys=ON;
                ")?;
                Ok(())
            });

        // In-memory needs single connection to maintain state
        let pool = Pool::builder()
            .max_size(1)
            .build(manager)?;

        let db = Self { pool };
        db.setup_schema()?;
        Ok(db)
    }

    /// Get a connection from the pool
    fn get_conn(&self) -> DatabaseResult<PooledConnection<SqliteConnectionManager>> {
        Ok(self.pool.get()?)
    }

    fn setup_schema(&self) -> DatabaseResult<()> {
        let conn = self.get_conn()?;

        conn.execute_batch(r#"
            CREATE TABLE IF NOT EXISTS clipboards (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                name TEXT NOT NULL UNIQUE COLLATE NOCASE,
                isFavorite INTEGER NOT NULL DEFAULT 0,
                isDefault INTEGER NOT NULL DEFAULT 0,
                createdAt TEXT NOT NULL
            );

            CREATE UNIQUE INDEX IF NOT EXISTS idx_clipboards_single_default
                ON clipboards(isDefault) WHERE isDefault = 1;

            CREATE TABLE IF NOT EXISTS items (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                clipboardId INTEGER NOT NULL REFERENCES clipboards(id) ON DELETE CASCADE,
                kind TEXT NOT NULL,
                searchText TEXT NOT NULL,
                pinned INTEGER NOT NULL DEFAULT 0,
                createdAt TEXT NOT NULL,
                updatedAt TEXT NOT NULL
            );

            CREATE TABLE IF NOT EXISTS note_items (
                itemId INTEGER PRIMARY KEY REFERENCES items(id) ON DELETE CASCADE,
                text TEXT NOT NULL
            );

            CREATE TABLE IF NOT EXISTS link_items (
                itemId INTEGER PRIMARY KEY REFERENCES items(id) ON DELETE CASCADE,
                url TEXT NOT NULL,
                resolved INTEGER NOT NULL DEFAULT 0,
                title TEXT,
                description TEXT,
                imageUrl TEXT,
                siteName TEXT
            );

            CREATE TABLE IF NOT EXISTS attachment_items (
                itemId INTEGER PRIMARY KEY REFERENCES items(id) ON DELETE CASCADE,
                storageRef TEXT NOT NULL,
                filename TEXT NOT NULL,
                mimeType TEXT NOT NULL,
                sizeBytes INTEGER NOT NULL DEFAULT 0,
                caption TEXT
            );

            CREATE TABLE IF NOT EXISTS location_items (
                itemId INTEGER PRIMARY KEY REFERENCES items(id) ON DELETE CASCADE,
                lat REAL NOT NULL,
                lon REAL NOT NULL,
                label TEXT
            );

            CREATE TABLE IF NOT EXISTS enrichment (
                itemId INTEGER PRIMARY KEY REFERENCES items(id) ON DELETE CASCADE,
                task TEXT NOT NULL,
                status TEXT NOT NULL,
                attempts INTEGER NOT NULL DEFAULT 0,
                lastFailure TEXT,
                updatedAt TEXT NOT NULL,
                generation INTEGER NOT NULL DEFAULT 0
            );

            CREATE INDEX IF NOT EXISTS idx_items_clipboard ON items(clipboardId, pinned, createdAt);
            CREATE INDEX IF NOT EXISTS idx_items_created ON items(createdAt);
            CREATE INDEX IF NOT EXISTS idx_enrichment_status ON enrichment(status);
        "#)?;

        Self::ensure_default_clipboard(&conn)?;
        Ok(())
    }

    /// Seed `main` into an empty store; promote the oldest clipboard when none is default.
    fn ensure_default_clipboard(conn: &Connection) -> DatabaseResult<()> {
        let now = format_db_timestamp(Utc::now());
        conn.execute(
            "INSERT INTO clipboards (name, isFavorite, isDefault, createdAt)
             SELECT ?1, 0, 1, ?2 WHERE NOT EXISTS (SELECT 1 FROM clipboards)",
            params![INITIAL_CLIPBOARD_NAME, now],
        )?;
        conn.execute(
            "UPDATE clipboards SET isDefault = 1
             WHERE id = (SELECT id FROM clipboards ORDER BY createdAt, id LIMIT 1)
               AND NOT EXISTS (SELECT 1 FROM clipboards WHERE isDefault = 1)",
            [],
        )?;
        Ok(())
    }

    // ─────────────────────────────────────────────────────────────────────────────
    // Connection scopes
    // ─────────────────────────────────────────────────────────────────────────────

    /// Run `f` against a pooled connection outside any explicit transaction
    pub(crate) fn read<T, F>(&self, f: F) -> DatabaseResult<T>
    where
        F: FnOnce(&Connection) -> DatabaseResult<T>,
    {
        let conn = self.get_conn()?;
        f(&conn)
    }

    /// Run `f` inside an immediate (write-locked) transaction and commit.
    /// Any error from `f` rolls the transaction back.
    pub(crate) fn write<T, E, F>(&self, f: F) -> Result<T, E>
    where
        F: FnOnce(&Connection) -> Result<T, E>,
        E: From<DatabaseError>,
    {
        self.write_compensated(f, |_| {})
    }

    /// Like `write`, but runs `compensate` with the closure's result when the
    /// final commit fails, so side effects made inside `f` can be undone.
    pub(crate) fn write_compensated<T, E, F, C>(&self, f: F, compensate: C) -> Result<T, E>
    where
        F: FnOnce(&Connection) -> Result<T, E>,
        C: FnOnce(&T),
        E: From<DatabaseError>,
    {
        let mut conn = self.get_conn()?;
        let tx = conn
            .transaction_with_behavior(TransactionBehavior::Immediate)
            .map_err(DatabaseError::from)?;
        let value = f(&tx)?;
        if let Err(e) = tx.commit() {
            compensate(&value);
            return Err(DatabaseError::from(e).into());
        }
        Ok(value)
    }

    // ─────────────────────────────────────────────────────────────────────────────
    // Clipboards
    // ─────────────────────────────────────────────────────────────────────────────

    fn row_to_clipboard(row: &rusqlite::Row) -> rusqlite::Result<Clipboard> {
        let created_at: String = row.get(4)?;
        Ok(Clipboard {
            id: row.get(0)?,
            name: row.get(1)?,
            is_favorite: row.get(2)?,
            is_default: row.get(3)?,
            created_at: parse_db_timestamp(4, &created_at)?,
        })
    }

    /// Favorites first, then by name
    pub fn list_clipboards(conn: &Connection) -> DatabaseResult<Vec<Clipboard>> {
        let mut stmt = conn.prepare(
            "SELECT id, name, isFavorite, isDefault, createdAt FROM clipboards
             ORDER BY isFavorite DESC, name COLLATE NOCASE, id",
        )?;
        let clipboards = stmt
            .query_map([], Self::row_to_clipboard)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(clipboards)
    }

    pub fn get_clipboard(conn: &Connection, id: ClipboardId) -> DatabaseResult<Option<Clipboard>> {
        Ok(conn
            .query_row(
                "SELECT id, name, isFavorite, isDefault, createdAt FROM clipboards WHERE id = ?1",
                [id],
                Self::row_to_clipboard,
            )
            .optional()?)
    }

    pub fn default_clipboard(conn: &Connection) -> DatabaseResult<Option<Clipboard>> {
        Ok(conn
            .query_row(
                "SELECT id, name, isFavorite, isDefault, createdAt FROM clipboards WHERE isDefault = 1",
                [],
                Self::row_to_clipboard,
            )
            .optional()?)
    }

    /// Case-insensitive lookup
    pub fn find_clipboard_by_name(conn: &Connection, name: &str) -> DatabaseResult<Option<Clipboard>> {
        Ok(conn
            .query_row(
                "SELECT id, name, isFavorite, isDefault, createdAt FROM clipboards WHERE name = ?1 COLLATE NOCASE",
                [name],
                Self::row_to_clipboard,
            )
            .optional()?)
    }

    pub fn count_clipboards(conn: &Connection) -> DatabaseResult<u64> {
        let count: i64 = conn.query_row("SELECT COUNT(*) FROM clipboards", [], |row| row.get(0))?;
        Ok(count as u64)
    }

    pub fn insert_clipboard(conn: &Connection, name: &str, now: DateTime<Utc>) -> DatabaseResult<Clipboard> {
        conn.execute(
            "INSERT INTO clipboards (name, isFavorite, isDefault, createdAt) VALUES (?1, 0, 0, ?2)",
            params![name, format_db_timestamp(now)],
        )?;
        Ok(Clipboard {
            id: conn.last_insert_rowid(),
            name: name.to_string(),
            is_favorite: false,
            is_default: false,
            created_at: now.trunc_subsecs(6),
        })
    }

    pub fn rename_clipboard(conn: &Connection, id: ClipboardId, name: &str) -> DatabaseResult<bool> {
        Ok(conn.execute("UPDATE clipboards SET name = ?1 WHERE id = ?2", params![name, id])? > 0)
    }

    pub fn set_clipboard_favorite(conn: &Connection, id: ClipboardId, favorite: bool) -> DatabaseResult<bool> {
        Ok(conn.execute("UPDATE clipboards SET isFavorite = ?1 WHERE id = ?2", params![favorite, id])? > 0)
    }

    /// Demote the current default and promote `id`. Caller checks `id` exists.
    pub fn set_default_clipboard(conn: &Connection, id: ClipboardId) -> DatabaseResult<()> {
        conn.execute("UPDATE clipboards SET isDefault = 0 WHERE isDefault = 1 AND id != ?1", [id])?;
        conn.execute("UPDATE clipboards SET isDefault = 1 WHERE id = ?1", [id])?;
        Ok(())
    }

    /// Delete a clipboard; member items and their child rows cascade
    pub fn delete_clipboard(conn: &Connection, id: ClipboardId) -> DatabaseResult<bool> {
        Ok(conn.execute("DELETE FROM clipboards WHERE id = ?1", [id])? > 0)
    }

    pub fn item_ids_in_clipboard(conn: &Connection, id: ClipboardId) -> DatabaseResult<Vec<ItemId>> {
        let mut stmt = conn.prepare("SELECT id FROM items WHERE clipboardId = ?1")?;
        let ids = stmt
            .query_map([id], |row| row.get(0))?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(ids)
    }

    // ─────────────────────────────────────────────────────────────────────────────
    // Items
    // ─────────────────────────────────────────────────────────────────────────────

    pub fn count_items(conn: &Connection) -> DatabaseResult<u64> {
        let count: i64 = conn.query_row("SELECT COUNT(*) FROM items", [], |row| row.get(0))?;
        Ok(count as u64)
    }

    /// Insert a classified draft into `clipboard_id` and return the stored item
    pub fn insert_item(
        conn: &Connection,
        clipboard_id: ClipboardId,
        draft: &DraftItem,
        now: DateTime<Utc>,
    ) -> DatabaseResult<Item> {
        let timestamp = format_db_timestamp(now);
        let search_text = draft.search_text();

        conn.execute(
            r#"INSERT INTO items (clipboardId, kind, searchText, pinned, createdAt, updatedAt)
               VALUES (?1, ?2, ?3, 0, ?4, ?4)"#,
            params![clipboard_id, draft.kind().as_str(), search_text, timestamp],
        )?;
        let item_id = conn.last_insert_rowid();

        match &draft.payload {
            ItemPayload::Note { text } => {
                conn.execute(
                    "INSERT INTO note_items (itemId, text) VALUES (?1, ?2)",
                    params![item_id, text],
                )?;
            }
            ItemPayload::Link { url, card } => {
                let card_fields = card.clone().unwrap_or_default();
                conn.execute(
                    r#"INSERT INTO link_items (itemId, url, resolved, title, description, imageUrl, siteName)
                       VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)"#,
                    params![
                        item_id,
                        url,
                        card.is_some(),
                        card_fields.title,
                        card_fields.description,
                        card_fields.image_url,
                        card_fields.site_name,
                    ],
                )?;
            }
            ItemPayload::File(attachment) | ItemPayload::Image(attachment) => {
                conn.execute(
                    r#"INSERT INTO attachment_items (itemId, storageRef, filename, mimeType, sizeBytes, caption)
                       VALUES (?1, ?2, ?3, ?4, ?5, ?6)"#,
                    params![
                        item_id,
                        attachment.storage_ref,
                        attachment.filename,
                        attachment.mime_type,
                        attachment.size_bytes as i64,
                        attachment.caption,
                    ],
                )?;
            }
            ItemPayload::Location { lat, lon, label } => {
                conn.execute(
                    "INSERT INTO location_items (itemId, lat, lon, label) VALUES (?1, ?2, ?3, ?4)",
                    params![item_id, lat, lon, label],
                )?;
            }
        }

        let created_at = now.trunc_subsecs(6);
        Ok(Item {
            id: item_id,
            clipboard_id,
            created_at,
            updated_at: created_at,
            pinned: false,
            payload: draft.payload.clone(),
            search_text,
        })
    }

    /// Persist the item's mutable payload fields and derived search text.
    /// `touch` bumps `updatedAt` (user edits do, enrichment doesn't).
    pub fn save_payload(conn: &Connection, item: &Item, touch: bool) -> DatabaseResult<()> {
        match &item.payload {
            ItemPayload::Note { text } => {
                conn.execute("UPDATE note_items SET text = ?1 WHERE itemId = ?2", params![text, item.id])?;
            }
            ItemPayload::Link { url, card } => {
                let card_fields = card.clone().unwrap_or_default();
                conn.execute(
                    r#"UPDATE link_items SET url = ?1, resolved = ?2, title = ?3, description = ?4,
                       imageUrl = ?5, siteName = ?6 WHERE itemId = ?7"#,
                    params![
                        url,
                        card.is_some(),
                        card_fields.title,
                        card_fields.description,
                        card_fields.image_url,
                        card_fields.site_name,
                        item.id,
                    ],
                )?;
            }
            ItemPayload::File(attachment) | ItemPayload::Image(attachment) => {
                conn.execute(
                    "UPDATE attachment_items SET caption = ?1 WHERE itemId = ?2",
                    params![attachment.caption, item.id],
                )?;
            }
            ItemPayload::Location { label, .. } => {
                conn.execute("UPDATE location_items SET label = ?1 WHERE itemId = ?2", params![label, item.id])?;
            }
        }

        if touch {
            conn.execute(
                "UPDATE items SET searchText = ?1, updatedAt = ?2 WHERE id = ?3",
                params![item.search_text, format_db_timestamp(item.updated_at), item.id],
            )?;
        } else {
            conn.execute(
                "UPDATE items SET searchText = ?1 WHERE id = ?2",
                params![item.search_text, item.id],
            )?;
        }
        Ok(())
    }

    pub fn set_item_clipboard(
        conn: &Connection,
        id: ItemId,
        clipboard_id: ClipboardId,
        now: DateTime<Utc>,
    ) -> DatabaseResult<bool> {
        Ok(conn.execute(
            "UPDATE items SET clipboardId = ?1, updatedAt = ?2 WHERE id = ?3",
            params![clipboard_id, format_db_timestamp(now), id],
        )? > 0)
    }

    pub fn set_item_pinned(conn: &Connection, id: ItemId, pinned: bool, now: DateTime<Utc>) -> DatabaseResult<bool> {
        Ok(conn.execute(
            "UPDATE items SET pinned = ?1, updatedAt = ?2 WHERE id = ?3",
            params![pinned, format_db_timestamp(now), id],
        )? > 0)
    }

    pub fn delete_item(conn: &Connection, id: ItemId) -> DatabaseResult<bool> {
        Ok(conn.execute("DELETE FROM items WHERE id = ?1", [id])? > 0)
    }

    pub fn fetch_item(conn: &Connection, id: ItemId) -> DatabaseResult<Option<Item>> {
        let sql = format!("SELECT {ITEM_COLUMNS} {ITEM_JOINS} WHERE i.id = ?1");
        Ok(conn.query_row(&sql, [id], Self::row_to_item).optional()?)
    }

    /// Fetch items preserving the order of `ids`; missing ids are skipped
    pub fn fetch_items_by_ids(conn: &Connection, ids: &[ItemId]) -> DatabaseResult<Vec<Item>> {
        if ids.is_empty() {
            return Ok(Vec::new());
        }

        let placeholders = ids.iter().map(|_| "?").collect::<Vec<_>>().join(",");
        let sql = format!("SELECT {ITEM_COLUMNS} {ITEM_JOINS} WHERE i.id IN ({placeholders})");

        let mut stmt = conn.prepare(&sql)?;
        let params: Vec<rusqlite::types::Value> = ids.iter().map(|&id| id.into()).collect();
        let mut by_id: std::collections::HashMap<ItemId, Item> = stmt
            .query_map(rusqlite::params_from_iter(params), Self::row_to_item)?
            .map(|item| item.map(|item| (item.id, item)))
            .collect::<Result<_, _>>()?;

        Ok(ids.iter().filter_map(|id| by_id.remove(id)).collect())
    }

    /// Items of one clipboard (or all when `clipboard_id` is None), pinned first
    pub fn browse(
        conn: &Connection,
        clipboard_id: Option<ClipboardId>,
        order: BrowseOrder,
    ) -> DatabaseResult<Vec<Item>> {
        let order_by = match order {
            BrowseOrder::Recent => "i.pinned DESC, i.createdAt DESC, i.id DESC",
            BrowseOrder::Oldest => "i.pinned DESC, i.createdAt ASC, i.id ASC",
            BrowseOrder::Activity => "i.pinned DESC, i.updatedAt DESC, i.id DESC",
        };

        let items = match clipboard_id {
            Some(clipboard_id) => {
                let sql = format!("SELECT {ITEM_COLUMNS} {ITEM_JOINS} WHERE i.clipboardId = ?1 ORDER BY {order_by}");
                let mut stmt = conn.prepare(&sql)?;
                let rows = stmt.query_map([clipboard_id], Self::row_to_item)?;
                rows.collect::<Result<Vec<_>, _>>()?
            }
            None => {
                let sql = format!("SELECT {ITEM_COLUMNS} {ITEM_JOINS} ORDER BY {order_by}");
                let mut stmt = conn.prepare(&sql)?;
                let rows = stmt.query_map([], Self::row_to_item)?;
                rows.collect::<Result<Vec<_>, _>>()?
            }
        };
        Ok(items)
    }

    pub fn fetch_all_items(conn: &Connection) -> DatabaseResult<Vec<Item>> {
        Self::browse(conn, None, BrowseOrder::Oldest)
    }

    fn row_to_item(row: &rusqlite::Row) -> rusqlite::Result<Item> {
        let id: ItemId = row.get(0)?;
        let kind_str: String = row.get(2)?;
        let kind = ItemKind::from_database_str(&kind_str)
            .ok_or_else(|| conversion_error(2, format!("unknown item kind {kind_str:?}")))?;
        let created_at: String = row.get(5)?;
        let updated_at: String = row.get(6)?;

        let missing = |table: &str| conversion_error(0, format!("item {id} has no {table} row"));

        let payload = match kind {
            ItemKind::Note => {
                let text: Option<String> = row.get(7)?;
                ItemPayload::Note { text: text.ok_or_else(|| missing("note_items"))? }
            }
            ItemKind::Link => {
                let url: Option<String> = row.get(8)?;
                let url = url.ok_or_else(|| missing("link_items"))?;
                let resolved: bool = row.get(9)?;
                let card = resolved.then(|| -> rusqlite::Result<Card> {
                    Ok(Card {
                        title: row.get(10)?,
                        description: row.get(11)?,
                        image_url: row.get(12)?,
                        site_name: row.get(13)?,
                    })
                });
                ItemPayload::Link { url, card: card.transpose()? }
            }
            ItemKind::File | ItemKind::Image => {
                let storage_ref: Option<String> = row.get(14)?;
                let size_bytes: i64 = row.get::<_, Option<i64>>(17)?.unwrap_or(0);
                let attachment = Attachment {
                    storage_ref: storage_ref.ok_or_else(|| missing("attachment_items"))?,
                    filename: row.get::<_, Option<String>>(15)?.unwrap_or_default(),
                    mime_type: row.get::<_, Option<String>>(16)?.unwrap_or_default(),
                    size_bytes: size_bytes.max(0) as u64,
                    caption: row.get(18)?,
                };
                if kind == ItemKind::Image {
                    ItemPayload::Image(attachment)
                } else {
                    ItemPayload::File(attachment)
                }
            }
            ItemKind::Location => {
                let lat: Option<f64> = row.get(19)?;
                let lon: Option<f64> = row.get(20)?;
                match (lat, lon) {
                    (Some(lat), Some(lon)) => ItemPayload::Location { lat, lon, label: row.get(21)? },
                    _ => return Err(missing("location_items")),
                }
            }
        };

        Ok(Item {
            id,
            clipboard_id: row.get(1)?,
            created_at: parse_db_timestamp(5, &created_at)?,
            updated_at: parse_db_timestamp(6, &updated_at)?,
            pinned: row.get(4)?,
            payload,
            search_text: row.get(3)?,
        })
    }

    // ─────────────────────────────────────────────────────────────────────────────
    // Enrichment bookkeeping
    // ─────────────────────────────────────────────────────────────────────────────

    /// Create or reset the record to pending. Returns the new generation;
    /// results fetched for an older generation are stale.
    pub fn mark_enrichment_pending(
        conn: &Connection,
        item_id: ItemId,
        task: EnrichmentTask,
        now: DateTime<Utc>,
    ) -> DatabaseResult<u32> {
        let generation = conn.query_row(
            r#"INSERT INTO enrichment (itemId, task, status, attempts, lastFailure, updatedAt, generation)
               VALUES (?1, ?2, 'pending', 0, NULL, ?3, 1)
               ON CONFLICT(itemId) DO UPDATE SET
                   task = excluded.task, status = 'pending', attempts = 0,
                   lastFailure = NULL, updatedAt = excluded.updatedAt,
                   generation = enrichment.generation + 1
               RETURNING generation"#,
            params![item_id, task.as_str(), format_db_timestamp(now)],
            |row| row.get(0),
        )?;
        Ok(generation)
    }

    /// Drop a record that is still pending. Its outstanding job becomes stale.
    pub fn cancel_pending_enrichment(conn: &Connection, item_id: ItemId) -> DatabaseResult<bool> {
        Ok(conn.execute("DELETE FROM enrichment WHERE itemId = ?1 AND status = 'pending'", [item_id])? > 0)
    }

    pub fn mark_enrichment_finished(
        conn: &Connection,
        item_id: ItemId,
        attempts: u32,
        failure: Option<&ResolutionFailure>,
        now: DateTime<Utc>,
    ) -> DatabaseResult<()> {
        let status = if failure.is_some() { EnrichmentStatus::Abandoned } else { EnrichmentStatus::Resolved };
        let failure_json = failure.and_then(|f| serde_json::to_string(f).ok());
        conn.execute(
            "UPDATE enrichment SET status = ?1, attempts = ?2, lastFailure = ?3, updatedAt = ?4 WHERE itemId = ?5",
            params![status.as_str(), attempts, failure_json, format_db_timestamp(now), item_id],
        )?;
        Ok(())
    }

    pub fn enrichment_record(conn: &Connection, item_id: ItemId) -> DatabaseResult<Option<EnrichmentRecord>> {
        Ok(conn
            .query_row(
                "SELECT itemId, task, status, attempts, lastFailure, updatedAt, generation FROM enrichment WHERE itemId = ?1",
                [item_id],
                |row| {
                    let task: String = row.get(1)?;
                    let status: String = row.get(2)?;
                    let last_failure: Option<String> = row.get(4)?;
                    let updated_at: String = row.get(5)?;
                    Ok(EnrichmentRecord {
                        item_id: row.get(0)?,
                        task: EnrichmentTask::from_database_str(&task)
                            .ok_or_else(|| conversion_error(1, format!("unknown task {task:?}")))?,
                        status: EnrichmentStatus::from_database_str(&status)
                            .ok_or_else(|| conversion_error(2, format!("unknown status {status:?}")))?,
                        attempts: row.get(3)?,
                        last_failure: last_failure.and_then(|json| serde_json::from_str(&json).ok()),
                        updated_at: parse_db_timestamp(5, &updated_at)?,
                        generation: row.get(6)?,
                    })
                },
            )
            .optional()?)
    }

    /// Jobs left pending by an interrupted run, with their generation
    pub fn pending_enrichment(conn: &Connection) -> DatabaseResult<Vec<(ItemId, EnrichmentTask, u32)>> {
        let mut stmt = conn.prepare(
            "SELECT itemId, task, generation FROM enrichment WHERE status = 'pending' ORDER BY updatedAt, itemId",
        )?;
        let rows = stmt
            .query_map([], |row| {
                let task: String = row.get(1)?;
                Ok((row.get(0)?, EnrichmentTask::from_database_str(&task), row.get(2)?))
            })?
            .collect::<Result<Vec<(ItemId, Option<EnrichmentTask>, u32)>, _>>()?;
        Ok(rows
            .into_iter()
            .filter_map(|(id, task, generation)| task.map(|t| (id, t, generation)))
            .collect())
    }
}
