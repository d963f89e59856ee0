//! DropMind public interface
//!
//! Shared types consumed by the API layer, the error taxonomy, and the
//! `DropMindApi` trait implemented by the `DropMind` store.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

pub type ItemId = i64;
pub type ClipboardId = i64;

// ═══════════════════════════════════════════════════════════════════════════════
// ITEMS
// ═══════════════════════════════════════════════════════════════════════════════

/// Item kind, fixed at creation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ItemKind {
    Note,
    Link,
    File,
    Image,
    Location,
}

impl ItemKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ItemKind::Note => "note",
            ItemKind::Link => "link",
            ItemKind::File => "file",
            ItemKind::Image => "image",
            ItemKind::Location => "location",
        }
    }

    pub fn from_database_str(s: &str) -> Option<Self> {
        match s {
            "note" => Some(ItemKind::Note),
            "link" => Some(ItemKind::Link),
            "file" => Some(ItemKind::File),
            "image" => Some(ItemKind::Image),
            "location" => Some(ItemKind::Location),
            _ => None,
        }
    }
}

impl fmt::Display for ItemKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Smart link card extracted from a page's metadata
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Card {
    pub title: Option<String>,
    pub description: Option<String>,
    pub image_url: Option<String>,
    pub site_name: Option<String>,
}

impl Card {
    pub fn is_empty(&self) -> bool {
        self.title.is_none()
            && self.description.is_none()
            && self.image_url.is_none()
            && self.site_name.is_none()
    }
}

/// Reference to externally stored binary content. The core never reads the blob.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Attachment {
    pub storage_ref: String,
    pub filename: String,
    pub mime_type: String,
    pub size_bytes: u64,
    pub caption: Option<String>,
}

/// Kind-specific item content
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum ItemPayload {
    Note { text: String },
    Link { url: String, card: Option<Card> },
    File(Attachment),
    Image(Attachment),
    Location { lat: f64, lon: f64, label: Option<String> },
}

impl ItemPayload {
    pub fn kind(&self) -> ItemKind {
        match self {
            ItemPayload::Note { .. } => ItemKind::Note,
            ItemPayload::Link { .. } => ItemKind::Link,
            ItemPayload::File(_) => ItemKind::File,
            ItemPayload::Image(_) => ItemKind::Image,
            ItemPayload::Location { .. } => ItemKind::Location,
        }
    }
}

/// A captured item as stored and returned to callers
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Item {
    pub id: ItemId,
    pub clipboard_id: ClipboardId,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub pinned: bool,
    pub payload: ItemPayload,
    pub search_text: String,
}

impl Item {
    pub fn kind(&self) -> ItemKind {
        self.payload.kind()
    }

    /// The resolved card, for link items only
    pub fn card(&self) -> Option<&Card> {
        match &self.payload {
            ItemPayload::Link { card, .. } => card.as_ref(),
            _ => None,
        }
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// CLIPBOARDS
// ═══════════════════════════════════════════════════════════════════════════════

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Clipboard {
    pub id: ClipboardId,
    pub name: String,
    pub is_favorite: bool,
    pub is_default: bool,
    pub created_at: DateTime<Utc>,
}

// ═══════════════════════════════════════════════════════════════════════════════
// CAPTURE & RETRIEVAL REQUESTS
// ═══════════════════════════════════════════════════════════════════════════════

/// Attachment metadata as received from the upload collaborator
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RawAttachment {
    pub storage_ref: String,
    pub filename: String,
    pub mime_type: Option<String>,
    pub size_bytes: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RawLocation {
    pub lat: f64,
    pub lon: f64,
    pub label: Option<String>,
}

/// Untyped capture request. Classification decides which kind it becomes.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RawPayload {
    pub text: Option<String>,
    pub attachment: Option<RawAttachment>,
    pub location: Option<RawLocation>,
}

impl RawPayload {
    pub fn text(text: impl Into<String>) -> Self {
        Self { text: Some(text.into()), ..Default::default() }
    }

    pub fn attachment(attachment: RawAttachment) -> Self {
        Self { attachment: Some(attachment), ..Default::default() }
    }

    pub fn location(lat: f64, lon: f64, label: Option<String>) -> Self {
        Self {
            location: Some(RawLocation { lat, lon, label }),
            ..Default::default()
        }
    }

    pub fn with_text(mut self, text: impl Into<String>) -> Self {
        self.text = Some(text.into());
        self
    }
}

/// Query scope
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum Scope {
    Clipboard(ClipboardId),
    Global,
}

/// Browse ordering. Pinned items always come first.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BrowseOrder {
    /// Newest first by creation time
    #[default]
    Recent,
    /// Oldest first by creation time
    Oldest,
    /// Most recently edited, moved or pinned first
    Activity,
}

impl FromStr for BrowseOrder {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "recent" | "desc" => Ok(BrowseOrder::Recent),
            "oldest" | "asc" => Ok(BrowseOrder::Oldest),
            "activity" => Ok(BrowseOrder::Activity),
            other => Err(format!("unknown browse order: {other}")),
        }
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// ENRICHMENT
// ═══════════════════════════════════════════════════════════════════════════════

/// Why a link (or geocode) resolution did not produce a result
#[derive(Error, Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum ResolutionFailure {
    #[error("request timed out")]
    Timeout,
    #[error("unreachable{}", .status.map(|s| format!(" (HTTP {s})")).unwrap_or_default())]
    Unreachable { status: Option<u16> },
    #[error("response carried no usable metadata")]
    Unparseable,
    #[error("unsupported content type: {content_type}")]
    UnsupportedContentType { content_type: String },
}

impl ResolutionFailure {
    /// Transient failures are retried; everything else abandons immediately.
    pub fn is_transient(&self) -> bool {
        match self {
            ResolutionFailure::Timeout => true,
            ResolutionFailure::Unreachable { status: None } => true,
            ResolutionFailure::Unreachable { status: Some(code) } => *code >= 500,
            ResolutionFailure::Unparseable
            | ResolutionFailure::UnsupportedContentType { .. } => false,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EnrichmentTask {
    /// Fetch a link card
    Link,
    /// Reverse-geocode an unlabeled location
    Geocode,
}

impl EnrichmentTask {
    pub fn as_str(&self) -> &'static str {
        match self {
            EnrichmentTask::Link => "link",
            EnrichmentTask::Geocode => "geocode",
        }
    }

    pub fn from_database_str(s: &str) -> Option<Self> {
        match s {
            "link" => Some(EnrichmentTask::Link),
            "geocode" => Some(EnrichmentTask::Geocode),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EnrichmentStatus {
    Pending,
    Resolved,
    Abandoned,
}

impl EnrichmentStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            EnrichmentStatus::Pending => "pending",
            EnrichmentStatus::Resolved => "resolved",
            EnrichmentStatus::Abandoned => "abandoned",
        }
    }

    pub fn from_database_str(s: &str) -> Option<Self> {
        match s {
            "pending" => Some(EnrichmentStatus::Pending),
            "resolved" => Some(EnrichmentStatus::Resolved),
            "abandoned" => Some(EnrichmentStatus::Abandoned),
            _ => None,
        }
    }
}

/// Resolution bookkeeping, kept apart from the item itself
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EnrichmentRecord {
    pub item_id: ItemId,
    pub task: EnrichmentTask,
    pub status: EnrichmentStatus,
    pub attempts: u32,
    pub last_failure: Option<ResolutionFailure>,
    pub updated_at: DateTime<Utc>,
    /// Bumped on every reset to pending
    pub generation: u32,
}

/// Published once per completed enrichment job
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EnrichmentEvent {
    pub item_id: ItemId,
    pub task: EnrichmentTask,
    pub outcome: EnrichmentOutcome,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EnrichmentOutcome {
    /// Card or label stored and the item re-indexed
    Resolved,
    /// Gave up; the item stays without enrichment
    Abandoned { failure: ResolutionFailure, attempts: u32 },
    /// The item no longer exists; nothing was written
    Discarded,
}

// ═══════════════════════════════════════════════════════════════════════════════
// ERRORS
// ═══════════════════════════════════════════════════════════════════════════════

/// Rejected capture payloads. Nothing is persisted when classification fails.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ClassificationError {
    #[error("payload is empty")]
    Empty,
    #[error("payload is {size} bytes, limit is {limit}")]
    TooLarge { size: u64, limit: u64 },
    #[error("payload matches no known kind: {0}")]
    Unrecognized(String),
    #[error("payload carries both an attachment and a location")]
    Ambiguous,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Entity {
    Item,
    Clipboard,
}

impl fmt::Display for Entity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Entity::Item => f.write_str("item"),
            Entity::Clipboard => f.write_str("clipboard"),
        }
    }
}

#[derive(Error, Debug)]
pub enum DropMindError {
    #[error("Classification failed: {0}")]
    Classification(#[from] ClassificationError),
    #[error("A clipboard named {name:?} already exists")]
    DuplicateName { name: String },
    #[error("Cannot delete the last remaining clipboard")]
    LastClipboard,
    #[error("Cannot delete the default clipboard; promote another clipboard to default first")]
    DefaultClipboard,
    #[error("{entity} {id} not found")]
    NotFound { entity: Entity, id: i64 },
    #[error("Invalid input: {0}")]
    InvalidInput(String),
    #[error("Database error: {0}")]
    Database(String),
    #[error("Index error: {0}")]
    Index(String),
    #[error("Configuration error: {0}")]
    Config(String),
}

impl DropMindError {
    pub(crate) fn item_not_found(id: ItemId) -> Self {
        DropMindError::NotFound { entity: Entity::Item, id }
    }

    pub(crate) fn clipboard_not_found(id: ClipboardId) -> Self {
        DropMindError::NotFound { entity: Entity::Clipboard, id }
    }
}

impl From<crate::database::DatabaseError> for DropMindError {
    fn from(e: crate::database::DatabaseError) -> Self {
        DropMindError::Database(e.to_string())
    }
}

impl From<crate::config::ConfigError> for DropMindError {
    fn from(e: crate::config::ConfigError) -> Self {
        DropMindError::Config(e.to_string())
    }
}

impl From<crate::indexer::IndexerError> for DropMindError {
    fn from(e: crate::indexer::IndexerError) -> Self {
        DropMindError::Index(e.to_string())
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// SERVICE INTERFACE
// ═══════════════════════════════════════════════════════════════════════════════

/// The contract the API layer calls into. Implemented by `DropMind`.
pub trait DropMindApi: Send + Sync {
    // ─────────────────────────────────────────────────────────────────────────────
    // Capture
    // ─────────────────────────────────────────────────────────────────────────────

    /// Classify, persist and index a payload. Omitting the clipboard targets the default.
    /// Link cards are resolved in the background; the returned item has none yet.
    fn capture(&self, payload: RawPayload, clipboard_id: Option<ClipboardId>) -> Result<Item, DropMindError>;

    // ─────────────────────────────────────────────────────────────────────────────
    // Retrieval
    // ─────────────────────────────────────────────────────────────────────────────

    /// Ranked free-text query. Empty text degrades to browsing the scope.
    fn search(&self, text: &str, scope: Scope) -> Result<Vec<Item>, DropMindError>;

    /// A clipboard's items, pinned first, newest first
    fn browse(&self, clipboard_id: ClipboardId) -> Result<Vec<Item>, DropMindError>;

    fn get_item(&self, item_id: ItemId) -> Result<Item, DropMindError>;

    // ─────────────────────────────────────────────────────────────────────────────
    // Clipboards
    // ─────────────────────────────────────────────────────────────────────────────

    fn list_clipboards(&self) -> Result<Vec<Clipboard>, DropMindError>;

    fn create_clipboard(&self, name: &str) -> Result<Clipboard, DropMindError>;

    fn rename_clipboard(&self, clipboard_id: ClipboardId, name: &str) -> Result<Clipboard, DropMindError>;

    /// Deletes the clipboard and every item in it
    fn delete_clipboard(&self, clipboard_id: ClipboardId) -> Result<(), DropMindError>;

    fn set_favorite(&self, clipboard_id: ClipboardId, favorite: bool) -> Result<Clipboard, DropMindError>;

    /// Promote a clipboard to default, demoting the previous one
    fn set_default(&self, clipboard_id: ClipboardId) -> Result<Clipboard, DropMindError>;

    // ─────────────────────────────────────────────────────────────────────────────
    // Items
    // ─────────────────────────────────────────────────────────────────────────────

    fn move_item(&self, item_id: ItemId, target_clipboard_id: ClipboardId) -> Result<Item, DropMindError>;

    fn set_pinned(&self, item_id: ItemId, pinned: bool) -> Result<Item, DropMindError>;

    /// Replace a note's text, an attachment's caption or a location's label
    fn edit_text(&self, item_id: ItemId, text: &str) -> Result<Item, DropMindError>;

    fn delete_item(&self, item_id: ItemId) -> Result<(), DropMindError>;

    /// Re-run enrichment for a link (or unlabeled location) item
    fn retry_enrichment(&self, item_id: ItemId) -> Result<(), DropMindError>;
}
