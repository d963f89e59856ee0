//! Core data models for DropMind
//!
//! The public item types live in `interface`; this module holds the derived
//! views over them (search text, title text, enrichment eligibility) and the
//! draft produced by classification.

use crate::interface::{Card, EnrichmentTask, ItemKind, ItemPayload};

// ─────────────────────────────────────────────────────────────────────────────
// DRAFT ITEM (classified, not yet persisted)
// ─────────────────────────────────────────────────────────────────────────────

/// Output of classification: a typed payload without id or placement
#[derive(Debug, Clone, PartialEq)]
pub struct DraftItem {
    pub payload: ItemPayload,
}

impl DraftItem {
    pub fn new(payload: ItemPayload) -> Self {
        Self { payload }
    }

    pub fn kind(&self) -> ItemKind {
        self.payload.kind()
    }

    pub fn search_text(&self) -> String {
        derive_search_text(&self.payload)
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// DERIVED TEXT
// ─────────────────────────────────────────────────────────────────────────────

/// Newline-joined human-readable fields for the payload's kind.
///
/// Pure: the same payload (and card) always yields the same text, so the
/// index tokens derived from it are stable across re-indexing.
pub fn derive_search_text(payload: &ItemPayload) -> String {
    let parts: Vec<&str> = match payload {
        ItemPayload::Note { text } => vec![text.as_str()],
        ItemPayload::Link { url, card } => {
            let mut parts = vec![url.as_str()];
            if let Some(card) = card {
                parts.extend(
                    [&card.title, &card.description, &card.site_name]
                        .into_iter()
                        .filter_map(|field| field.as_deref()),
                );
            }
            parts
        }
        ItemPayload::File(attachment) | ItemPayload::Image(attachment) => {
            let mut parts = vec![attachment.filename.as_str()];
            parts.extend(attachment.caption.as_deref());
            parts
        }
        ItemPayload::Location { label, .. } => label.as_deref().into_iter().collect(),
    };

    parts
        .into_iter()
        .map(str::trim)
        .filter(|part| !part.is_empty())
        .collect::<Vec<_>>()
        .join("\n")
}

impl ItemPayload {
    /// Field that earns the title-match ranking boost
    pub fn title_text(&self) -> Option<&str> {
        match self {
            ItemPayload::Note { .. } => None,
            ItemPayload::Link { card, .. } => card.as_ref().and_then(|c| c.title.as_deref()),
            ItemPayload::File(attachment) | ItemPayload::Image(attachment) => {
                Some(attachment.filename.as_str())
            }
            ItemPayload::Location { label, .. } => label.as_deref(),
        }
    }

    /// Background work this payload calls for, if any
    pub fn enrichment_task(&self) -> Option<EnrichmentTask> {
        match self {
            ItemPayload::Link { .. } => Some(EnrichmentTask::Link),
            ItemPayload::Location { label: None, .. } => Some(EnrichmentTask::Geocode),
            _ => None,
        }
    }

    /// Replace the user-editable text. Links carry none.
    pub(crate) fn replace_text(&mut self, text: &str) -> Result<(), String> {
        let trimmed = text.trim();
        match self {
            ItemPayload::Note { text: current } => {
                if trimmed.is_empty() {
                    return Err("note text cannot be empty".to_string());
                }
                *current = text.to_string();
            }
            ItemPayload::File(attachment) | ItemPayload::Image(attachment) => {
                attachment.caption = non_blank(trimmed);
            }
            ItemPayload::Location { label, .. } => {
                *label = non_blank(trimmed);
            }
            ItemPayload::Link { .. } => {
                return Err("link items have no editable text".to_string());
            }
        }
        Ok(())
    }

    pub(crate) fn set_card(&mut self, resolved: Card) -> bool {
        match self {
            ItemPayload::Link { card, .. } => {
                *card = Some(resolved);
                true
            }
            _ => false,
        }
    }

    /// Fill in a looked-up place name. A label already present wins.
    pub(crate) fn set_label(&mut self, resolved: String) -> bool {
        match self {
            ItemPayload::Location { label: label @ None, .. } => {
                *label = Some(resolved);
                true
            }
            _ => false,
        }
    }
}

pub(crate) fn non_blank(s: &str) -> Option<String> {
    let trimmed = s.trim();
    (!trimmed.is_empty()).then(|| trimmed.to_string())
}
